//! Controller Facade — the single entry point a UI binding talks to.
//!
//! ```text
//!                 ┌──────────────── MultiRootController ────────────────┐
//!  set_data ─────▸│ validate ─▸ normalize ─▸ external state ─▸ reconcile │──▸ session
//!  set_attributes │                                  ▲                  │
//!  set_roots      │                                  └── mirror ◂───────│◂── Change events
//!                 │ SessionLifecycle (direct | watchdog | context)      │
//!                 │ EventBridge ─▸ on_ready / on_change / on_error ...  │
//!                 └─────────────────────────────────────────────────────┘
//! ```
//!
//! State machine:
//!
//! ```text
//!  Uninitialized ─▸ Initializing ─▸ Ready ⇄ Reconciling
//!                        ▲            │
//!                        └── crash ───┘          any ─▸ Destroyed
//! ```
//!
//! The controller lock is never held while the session is written to, since
//! session writes raise events that come back into the controller.

use std::sync::{Arc, Mutex, Weak};

use logos_core::{
    attribute_schema, fill_attribute_shape, normalize_root_attributes, validate_roots,
    ChangeInfo, EditableDescriptor, Editor, EditorConfig, EditorFactory, RootData,
    RootsAttributes,
};
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use crate::bridge::{ChangeSink, EventBridge};
use crate::config::ControllerConfig;
use crate::error::{ErrorDetails, ErrorPhase, SyncError};
use crate::lifecycle::{SessionLifecycle, SessionSlot};
use crate::synchronizer::RootSynchronizer;
use crate::watchdog::{WatchdogFailure, WatchdogState};
use crate::lock;

/// Lifecycle state of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    /// No session requested yet, or the last one was lost for good.
    Uninitialized,
    /// Creation (or crash recovery) pending; no session exposed.
    Initializing,
    Ready,
    /// A reconciliation pass is writing to the session.
    Reconciling,
    Destroyed,
}

/// Published on every observable change; see [`MultiRootController::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControllerStatus {
    pub state: ControllerState,
    pub editor_id: Option<Uuid>,
    /// Increases with every published change.
    pub revision: u64,
}

/// Point-in-time view of a controller.
#[derive(Serialize)]
#[serde(bound = "")]
pub struct ControllerSnapshot<E> {
    #[serde(skip)]
    pub editor: Option<Arc<E>>,
    pub editor_id: Option<Uuid>,
    pub state: ControllerState,
    pub data: RootData,
    pub attributes: RootsAttributes,
    pub editables: Vec<EditableDescriptor>,
    pub revision: u64,
}

struct Shared<E> {
    phase: ControllerState,
    session: SessionSlot<E>,
    data: RootData,
    attributes: RootsAttributes,
    editables: Vec<EditableDescriptor>,
    layout_ready: bool,
    disabled: bool,
    /// A creation call or a watchdog restart is in flight.
    creating: bool,
    /// External state changed while it could not be applied.
    rerun: bool,
    revision: u64,
}

impl<E: Editor> Shared<E> {
    fn status(&self) -> ControllerStatus {
        ControllerStatus {
            state: self.phase,
            editor_id: self.session.current().map(|editor| editor.id()),
            revision: self.revision,
        }
    }

    /// One descriptor per root in data order. Descriptors of surviving roots
    /// keep their key while the session stays the same.
    fn rebuild_editables(&mut self) {
        let Some(editor_id) = self.session.current().map(|editor| editor.id()) else {
            self.editables.clear();
            return;
        };

        let previous = std::mem::take(&mut self.editables);
        self.editables = self
            .data
            .keys()
            .map(|root| {
                previous
                    .iter()
                    .find(|d| &d.root == root && d.editor_id == editor_id)
                    .cloned()
                    .unwrap_or_else(|| EditableDescriptor::new(root.clone(), editor_id))
            })
            .collect();
    }
}

/// Outcome of handing a fresh session to the controller.
enum Adoption {
    Adopted,
    /// The controller was destroyed meanwhile.
    Destroyed,
    /// External state could not be applied; the session was not published.
    Rejected(SyncError),
}

struct Inner<F: EditorFactory> {
    id: Uuid,
    lifecycle: SessionLifecycle<F>,
    bridge: EventBridge<F::Editor>,
    synchronizer: RootSynchronizer,
    shared: Mutex<Shared<F::Editor>>,
    status: watch::Sender<ControllerStatus>,
}

/// Keeps one multi-root editing session in step with external root maps.
pub struct MultiRootController<F: EditorFactory> {
    inner: Arc<Inner<F>>,
}

impl<F: EditorFactory> Clone for MultiRootController<F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<F: EditorFactory> MultiRootController<F> {
    /// Build a controller. No session is created until
    /// [`initialize`](Self::initialize).
    pub fn new(config: ControllerConfig<F>) -> Result<Self, SyncError> {
        validate_roots(&config.data, &config.attributes)?;
        let mut attributes = config.attributes;
        fill_attribute_shape(&mut attributes);

        let id = Uuid::new_v4();
        let lifecycle = SessionLifecycle::new(
            config.factory,
            config.disable_watchdog,
            config.watchdog,
            config.context,
            id.to_string(),
        );

        let shared = Shared {
            phase: ControllerState::Uninitialized,
            session: SessionSlot::empty(),
            data: config.data,
            attributes,
            editables: Vec::new(),
            layout_ready: config.is_layout_ready,
            disabled: config.disabled,
            creating: false,
            rerun: false,
            revision: 0,
        };
        let (status, _) = watch::channel(shared.status());

        let inner = Arc::new(Inner {
            id,
            lifecycle,
            bridge: EventBridge::new(config.callbacks),
            synchronizer: RootSynchronizer::new(),
            shared: Mutex::new(shared),
            status,
        });

        let weak = Arc::downgrade(&inner);
        inner.lifecycle.on_restart(Arc::new(move |editor: Arc<F::Editor>| {
            if let Some(inner) = weak.upgrade() {
                log::info!("Controller {} adopting restarted editor {}", inner.id, editor.id());
                if let Adoption::Rejected(error) = Inner::adopt(&inner, editor.clone()) {
                    Inner::reject_restart(&inner, editor, error);
                }
            }
        }));

        let weak = Arc::downgrade(&inner);
        inner.lifecycle.on_failure(Arc::new(move |failure: &WatchdogFailure| {
            if let Some(inner) = weak.upgrade() {
                Inner::handle_failure(&inner, failure);
            }
        }));

        log::debug!("Controller {} created", id);
        Ok(Self { inner })
    }

    /// [`new`](Self::new) followed by [`initialize`](Self::initialize).
    pub async fn start(config: ControllerConfig<F>) -> Result<Self, SyncError> {
        let controller = Self::new(config)?;
        controller.initialize().await?;
        Ok(controller)
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Create the session. Deferred (returns `Ok`) while the layout gate is
    /// closed; a no-op while a session exists, creation is in flight or the
    /// watchdog is recreating a crashed session.
    ///
    /// On failure the error is reported with phase `Initialization`, the
    /// controller stays `Initializing` and the call may be retried. This
    /// includes a fresh session that rejects the external roots; it is
    /// destroyed without being published.
    pub async fn initialize(&self) -> Result<(), SyncError> {
        let inner = &self.inner;
        let config = {
            let mut shared = lock(&inner.shared);
            match shared.phase {
                ControllerState::Destroyed => return Err(SyncError::ControllerDestroyed),
                ControllerState::Ready | ControllerState::Reconciling => return Ok(()),
                ControllerState::Uninitialized | ControllerState::Initializing => {}
            }
            if !shared.layout_ready {
                log::debug!("Controller {}: layout not ready, creation deferred", inner.id);
                return Ok(());
            }
            if shared.creating {
                return Ok(());
            }

            shared.creating = true;
            shared.rerun = false;
            inner.set_phase(&mut shared, ControllerState::Initializing);
            EditorConfig {
                initial_data: shared.data.clone(),
                roots_attributes: shared.attributes.clone(),
                read_only: shared.disabled,
                ..EditorConfig::default()
            }
        };

        let seeded = config.initial_data.clone();
        let editor = match inner.lifecycle.create(config).await {
            Ok(editor) => editor,
            Err(error) => {
                let destroyed = {
                    let mut shared = lock(&inner.shared);
                    shared.creating = false;
                    shared.phase == ControllerState::Destroyed
                };
                if destroyed {
                    return Err(SyncError::ControllerDestroyed);
                }
                let error = SyncError::from(error);
                inner.bridge.report_error(&error, ErrorDetails::initialization());
                return Err(error);
            }
        };

        inner.synchronizer.seed(&*editor, &seeded);
        match Inner::adopt(inner, editor.clone()) {
            Adoption::Adopted => Ok(()),
            Adoption::Destroyed => {
                log::debug!("Controller {} destroyed during creation, discarding editor", inner.id);
                if let Err(e) = editor.destroy().await {
                    log::warn!("Failed to destroy discarded editor {}: {}", editor.id(), e);
                }
                Err(SyncError::ControllerDestroyed)
            }
            Adoption::Rejected(error) => {
                if let Err(e) = inner.lifecycle.discard(editor.clone()).await {
                    log::warn!("Failed to destroy rejected editor {}: {}", editor.id(), e);
                }
                inner.bridge.report_error(&error, ErrorDetails::initialization());
                Err(error)
            }
        }
    }

    /// Tear the session down. Idempotent; setters fail afterwards.
    pub async fn destroy(&self) -> Result<(), SyncError> {
        let inner = &self.inner;
        let editor = {
            let mut shared = lock(&inner.shared);
            if shared.phase == ControllerState::Destroyed {
                return Ok(());
            }
            let editor = shared.session.take();
            shared.editables.clear();
            inner.set_phase(&mut shared, ControllerState::Destroyed);
            editor
        };
        inner.bridge.detach();

        log::debug!("Controller {} destroying", inner.id);
        if let Err(error) = inner.lifecycle.destroy(editor).await {
            let error = SyncError::from(error);
            inner
                .bridge
                .report_error(&error, ErrorDetails::new(ErrorPhase::Teardown, false));
            return Err(error);
        }
        Ok(())
    }

    /// Open or close the layout gate. Opening it starts a deferred creation.
    pub async fn set_layout_ready(&self, ready: bool) -> Result<(), SyncError> {
        let pending = {
            let mut shared = lock(&self.inner.shared);
            shared.layout_ready = ready;
            ready && shared.phase == ControllerState::Uninitialized
        };
        if pending {
            self.initialize().await?;
        }
        Ok(())
    }

    /// Bind the session's read-only mode.
    pub fn set_disabled(&self, disabled: bool) {
        let editor = {
            let mut shared = lock(&self.inner.shared);
            shared.disabled = disabled;
            shared.session.current().cloned()
        };
        if let Some(editor) = editor {
            editor.set_read_only(disabled);
        }
    }

    /// Replace the root contents. The attribute map must already cover the
    /// same roots.
    pub fn set_data(&self, data: RootData) -> Result<(), SyncError> {
        Inner::apply_external(&self.inner, Some(data), None)
    }

    /// Replace the root attributes. The data map must already cover the
    /// same roots.
    pub fn set_attributes(&self, attributes: RootsAttributes) -> Result<(), SyncError> {
        Inner::apply_external(&self.inner, None, Some(attributes))
    }

    /// Replace both maps in one step; needed to add or remove roots.
    pub fn set_roots(&self, data: RootData, attributes: RootsAttributes) -> Result<(), SyncError> {
        Inner::apply_external(&self.inner, Some(data), Some(attributes))
    }

    /// The live session, absent while creating or recovering.
    pub fn editor(&self) -> Option<Arc<F::Editor>> {
        lock(&self.inner.shared).session.current().cloned()
    }

    pub fn data(&self) -> RootData {
        lock(&self.inner.shared).data.clone()
    }

    pub fn attributes(&self) -> RootsAttributes {
        lock(&self.inner.shared).attributes.clone()
    }

    pub fn editables(&self) -> Vec<EditableDescriptor> {
        lock(&self.inner.shared).editables.clone()
    }

    pub fn state(&self) -> ControllerState {
        lock(&self.inner.shared).phase
    }

    /// State of the supervising watchdog; `None` in direct mode.
    pub fn watchdog_state(&self) -> Option<WatchdogState> {
        self.inner.lifecycle.watchdog_state()
    }

    pub fn snapshot(&self) -> ControllerSnapshot<F::Editor> {
        let shared = lock(&self.inner.shared);
        let editor = shared.session.current().cloned();
        ControllerSnapshot {
            editor_id: editor.as_ref().map(|editor| editor.id()),
            editor,
            state: shared.phase,
            data: shared.data.clone(),
            attributes: shared.attributes.clone(),
            editables: shared.editables.clone(),
            revision: shared.revision,
        }
    }

    /// Status updates. The current value is available immediately.
    pub fn subscribe(&self) -> watch::Receiver<ControllerStatus> {
        self.inner.status.subscribe()
    }
}

impl<F: EditorFactory> Inner<F> {
    fn publish(&self, shared: &mut Shared<F::Editor>) {
        shared.revision += 1;
        self.status.send_replace(shared.status());
    }

    fn set_phase(&self, shared: &mut Shared<F::Editor>, phase: ControllerState) {
        shared.phase = phase;
        self.publish(shared);
    }

    fn change_sink(inner: &Arc<Self>) -> ChangeSink {
        let weak: Weak<Self> = Arc::downgrade(inner);
        Arc::new(move |generation: u64, info: &ChangeInfo| {
            if let Some(inner) = weak.upgrade() {
                Inner::handle_session_change(&inner, generation, info);
            }
        })
    }

    /// Make `editor` the live session: apply external state, wire the
    /// bridge, publish. A session that cannot take the external state is
    /// never published; the caller disposes of it.
    fn adopt(inner: &Arc<Self>, editor: Arc<F::Editor>) -> Adoption {
        let (data, attributes, disabled) = {
            let mut shared = lock(&inner.shared);
            if shared.phase == ControllerState::Destroyed {
                shared.creating = false;
                return Adoption::Destroyed;
            }
            shared.rerun = false;
            (shared.data.clone(), shared.attributes.clone(), shared.disabled)
        };

        editor.set_read_only(disabled);
        if let Err(error) = inner
            .synchronizer
            .reconcile_from_external(&*editor, &data, &attributes)
        {
            let mut shared = lock(&inner.shared);
            shared.creating = false;
            if shared.phase == ControllerState::Destroyed {
                return Adoption::Destroyed;
            }
            log::warn!("Controller {}: editor {} rejected: {}", inner.id, editor.id(), error);
            return Adoption::Rejected(error);
        }
        let mirrored = inner
            .synchronizer
            .mirror_from_session(&*editor, &data, &attributes);

        let rerun = {
            let mut shared = lock(&inner.shared);
            shared.creating = false;
            if shared.phase == ControllerState::Destroyed {
                return Adoption::Destroyed;
            }

            let generation = shared.session.publish(editor.clone());
            inner.bridge.attach(
                &editor,
                generation,
                Self::change_sink(inner),
                !inner.lifecycle.is_supervised(),
            );

            let rerun = std::mem::take(&mut shared.rerun);
            if let Some((data, attributes)) = mirrored.filter(|_| !rerun) {
                shared.data = data;
                shared.attributes = attributes;
            }
            shared.rebuild_editables();
            inner.set_phase(&mut shared, ControllerState::Ready);
            rerun
        };

        log::info!("Controller {} ready with editor {}", inner.id, editor.id());
        inner.bridge.notify_ready(&editor);

        if rerun {
            if let Err(e) = Self::run_reconcile(inner) {
                log::debug!("Controller {}: deferred reconcile failed: {}", inner.id, e);
            }
        }
        Adoption::Adopted
    }

    /// A restarted session could not be brought up to date: drop it and
    /// give up on recovery, as for a failed restart.
    fn reject_restart(inner: &Arc<Self>, editor: Arc<F::Editor>, error: SyncError) {
        {
            let mut shared = lock(&inner.shared);
            if shared.phase == ControllerState::Destroyed {
                return;
            }
            inner.set_phase(&mut shared, ControllerState::Uninitialized);
        }

        let discard = inner.lifecycle.discard(editor.clone());
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = discard.await {
                        log::warn!("Failed to destroy rejected editor {}: {}", editor.id(), e);
                    }
                });
            }
            Err(_) => log::warn!("No async runtime, rejected editor {} left undestroyed", editor.id()),
        }

        inner
            .bridge
            .report_error(&error, ErrorDetails::new(ErrorPhase::Restart, false));
    }

    fn handle_failure(inner: &Arc<Self>, failure: &WatchdogFailure) {
        let error = SyncError::Engine(failure.error.clone());
        if failure.during_restart {
            {
                let mut shared = lock(&inner.shared);
                if shared.phase == ControllerState::Destroyed {
                    return;
                }
                shared.creating = false;
                inner.set_phase(&mut shared, ControllerState::Uninitialized);
            }
            inner
                .bridge
                .report_error(&error, ErrorDetails::new(ErrorPhase::Restart, false));
            return;
        }

        {
            let mut shared = lock(&inner.shared);
            if shared.phase == ControllerState::Destroyed {
                return;
            }
            shared.session.take();
            shared.editables.clear();
            shared.rerun = false;
            // Recovery owns the next session; `initialize` must not start another.
            shared.creating = failure.causes_restart;
            let phase = if failure.causes_restart {
                ControllerState::Initializing
            } else {
                ControllerState::Uninitialized
            };
            inner.set_phase(&mut shared, phase);
        }
        inner.bridge.detach();
        inner
            .bridge
            .report_error(&error, ErrorDetails::runtime(failure.causes_restart));
    }

    fn handle_session_change(inner: &Arc<Self>, generation: u64, info: &ChangeInfo) {
        if inner.synchronizer.is_applying() {
            return;
        }

        let (editor, data, attributes) = {
            let shared = lock(&inner.shared);
            if shared.phase != ControllerState::Ready || shared.session.generation() != generation {
                return;
            }
            let Some(editor) = shared.session.current().cloned() else {
                return;
            };
            (editor, shared.data.clone(), shared.attributes.clone())
        };

        let Some((data, attributes)) = inner
            .synchronizer
            .mirror_from_session(&*editor, &data, &attributes)
        else {
            return;
        };

        let mut shared = lock(&inner.shared);
        if shared.phase != ControllerState::Ready || shared.session.generation() != generation {
            return;
        }
        log::trace!("Mirrored {:?} on {:?} from editor {}", info.kind, info.roots, editor.id());
        shared.data = data;
        shared.attributes = attributes;
        shared.rebuild_editables();
        inner.publish(&mut shared);
    }

    fn apply_external(
        inner: &Arc<Self>,
        data: Option<RootData>,
        attributes: Option<RootsAttributes>,
    ) -> Result<(), SyncError> {
        let reconcile = {
            let mut shared = lock(&inner.shared);
            if shared.phase == ControllerState::Destroyed {
                return Err(SyncError::ControllerDestroyed);
            }

            let data = data.unwrap_or_else(|| shared.data.clone());
            let patch = attributes.unwrap_or_else(|| shared.attributes.clone());
            if let Err(error) = validate_roots(&data, &patch) {
                drop(shared);
                let error = SyncError::from(error);
                inner.bridge.report_error(&error, ErrorDetails::runtime(false));
                return Err(error);
            }

            let mut schema = attribute_schema(&shared.attributes);
            schema.extend(attribute_schema(&patch));
            let attributes: RootsAttributes = patch
                .iter()
                .map(|(root, attrs)| {
                    let normalized =
                        normalize_root_attributes(shared.attributes.get(root), attrs, &schema);
                    (root.clone(), normalized)
                })
                .collect();

            shared.data = data;
            shared.attributes = attributes;
            shared.rebuild_editables();
            inner.publish(&mut shared);

            match shared.phase {
                ControllerState::Ready => true,
                ControllerState::Reconciling | ControllerState::Initializing => {
                    shared.rerun = true;
                    false
                }
                _ => false,
            }
        };

        if reconcile {
            Self::run_reconcile(inner)?;
        }
        Ok(())
    }

    /// Reconcile until no setter call is left unapplied.
    fn run_reconcile(inner: &Arc<Self>) -> Result<(), SyncError> {
        loop {
            let (editor, generation, data, attributes) = {
                let mut shared = lock(&inner.shared);
                match shared.phase {
                    ControllerState::Ready => {}
                    ControllerState::Reconciling => {
                        shared.rerun = true;
                        return Ok(());
                    }
                    _ => return Ok(()),
                }
                let Some(editor) = shared.session.current().cloned() else {
                    return Ok(());
                };
                shared.rerun = false;
                shared.phase = ControllerState::Reconciling;
                (
                    editor,
                    shared.session.generation(),
                    shared.data.clone(),
                    shared.attributes.clone(),
                )
            };

            let result = inner
                .synchronizer
                .reconcile_from_external(&*editor, &data, &attributes);
            let mirrored = match &result {
                Ok(_) => inner
                    .synchronizer
                    .mirror_from_session(&*editor, &data, &attributes),
                Err(_) => None,
            };

            let again = {
                let mut shared = lock(&inner.shared);
                if shared.phase != ControllerState::Reconciling
                    || shared.session.generation() != generation
                {
                    return result.map(|_| ());
                }
                let again = std::mem::take(&mut shared.rerun);
                if let Some((data, attributes)) = mirrored.filter(|_| !again) {
                    shared.data = data;
                    shared.attributes = attributes;
                    shared.rebuild_editables();
                }
                inner.set_phase(&mut shared, ControllerState::Ready);
                again
            };

            if let Err(error) = result {
                inner.bridge.report_error(&error, ErrorDetails::runtime(false));
                return Err(error);
            }
            if !again {
                return Ok(());
            }
        }
    }
}
