//! Event Bridge — forwards session events to the controller's callbacks.
//!
//! ```text
//!   session ──Change──▸ sink (mirror into external state) ──▸ on_change
//!           ──Focus───▸ on_focus
//!           ──Blur────▸ on_blur
//!           ──Error───▸ on_error            (direct mode only)
//! ```
//!
//! Handlers hold a weak reference to the session so a registration never
//! keeps a discarded session alive. At most one session is attached at a
//! time; attaching a new one detaches the previous.

use std::sync::{Arc, Mutex, Weak};

use logos_core::{ChangeInfo, Editor, EditorEvent, EventHandler, EventKind, ListenerId};

use crate::config::Callbacks;
use crate::error::{ErrorDetails, SyncError};
use crate::lock;

/// Receives change notifications tagged with the session generation they
/// were registered under.
pub type ChangeSink = Arc<dyn Fn(u64, &ChangeInfo) + Send + Sync>;

struct Registration<E> {
    editor: Weak<E>,
    listeners: Vec<(EventKind, ListenerId)>,
}

pub struct EventBridge<E: Editor> {
    callbacks: Callbacks<E>,
    registration: Mutex<Option<Registration<E>>>,
}

impl<E: Editor> EventBridge<E> {
    pub fn new(callbacks: Callbacks<E>) -> Self {
        Self {
            callbacks,
            registration: Mutex::new(None),
        }
    }

    /// Subscribe to `editor`. Engine `Error` events are forwarded to
    /// `on_error` only when `forward_errors` is set; supervised sessions
    /// report crashes through their watchdog instead.
    pub fn attach(&self, editor: &Arc<E>, generation: u64, sink: ChangeSink, forward_errors: bool) {
        self.detach();

        let weak = Arc::downgrade(editor);
        let mut listeners = Vec::with_capacity(EventKind::ALL.len());

        let change: EventHandler = {
            let weak = weak.clone();
            let on_change = self.callbacks.on_change.clone();
            Arc::new(move |event: &EditorEvent| {
                let EditorEvent::Change(info) = event else { return };
                sink(generation, info);
                if let (Some(on_change), Some(editor)) = (&on_change, weak.upgrade()) {
                    on_change(info, &editor);
                }
            })
        };
        listeners.push((EventKind::Change, editor.on(EventKind::Change, change)));

        if let Some(on_focus) = self.callbacks.on_focus.clone() {
            let weak = weak.clone();
            let handler: EventHandler = Arc::new(move |event: &EditorEvent| {
                if let (EditorEvent::Focus(info), Some(editor)) = (event, weak.upgrade()) {
                    on_focus(info, &editor);
                }
            });
            listeners.push((EventKind::Focus, editor.on(EventKind::Focus, handler)));
        }

        if let Some(on_blur) = self.callbacks.on_blur.clone() {
            let weak = weak.clone();
            let handler: EventHandler = Arc::new(move |event: &EditorEvent| {
                if let (EditorEvent::Blur(info), Some(editor)) = (event, weak.upgrade()) {
                    on_blur(info, &editor);
                }
            });
            listeners.push((EventKind::Blur, editor.on(EventKind::Blur, handler)));
        }

        if forward_errors {
            let on_error = self.callbacks.on_error.clone();
            let handler: EventHandler = Arc::new(move |event: &EditorEvent| {
                if let EditorEvent::Error(error) = event {
                    let error = SyncError::Engine(error.clone());
                    dispatch_error(on_error.as_ref(), &error, ErrorDetails::runtime(false));
                }
            });
            listeners.push((EventKind::Error, editor.on(EventKind::Error, handler)));
        }

        log::debug!(
            "Bridge attached to editor {} ({} listeners, generation {})",
            editor.id(),
            listeners.len(),
            generation
        );
        *lock(&self.registration) = Some(Registration {
            editor: weak,
            listeners,
        });
    }

    /// Drop every subscription of the attached session, if any.
    pub fn detach(&self) {
        let Some(registration) = lock(&self.registration).take() else {
            return;
        };
        if let Some(editor) = registration.editor.upgrade() {
            for (kind, id) in registration.listeners {
                editor.off(kind, id);
            }
        }
    }

    pub fn is_attached(&self) -> bool {
        lock(&self.registration).is_some()
    }

    pub fn notify_ready(&self, editor: &Arc<E>) {
        if let Some(on_ready) = &self.callbacks.on_ready {
            on_ready(editor);
        }
    }

    pub fn report_error(&self, error: &SyncError, details: ErrorDetails) {
        dispatch_error(self.callbacks.on_error.as_ref(), error, details);
    }
}

impl<E: Editor> Drop for EventBridge<E> {
    fn drop(&mut self) {
        self.detach();
    }
}

fn dispatch_error(
    on_error: Option<&crate::config::ErrorCallback>,
    error: &SyncError,
    details: ErrorDetails,
) {
    match on_error {
        Some(on_error) => on_error(error, &details),
        None => log::error!(
            "Editor error ({:?}, will_restart: {}): {}",
            details.phase,
            details.will_restart,
            error
        ),
    }
}
