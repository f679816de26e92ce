//! Crash supervisors for editing sessions.
//!
//! ```text
//!  create(config) ──▸ factory.create ──▸ install (subscribe to Error)
//!                                            │
//!                          EditorEvent::Error│
//!                                            ▼
//!                                     handle_crash
//!                                  ┌──────┴────────┐
//!                  crashes ≤ limit │               │ crashes > limit
//!                                  ▼               ▼
//!                   failure(causes_restart)   failure(no restart)
//!                   spawn restart task        CrashedPermanently
//!                                  │
//!                 destroy crashed, create empty session
//!                                  │
//!                                  ▼
//!                        restart handlers(new editor)
//! ```
//!
//! A replacement session starts with no roots. Whoever listens for the
//! restart rebuilds the roots from its own state.
//!
//! Restarts run on the runtime that created the session, so a crash raised
//! from an engine thread outside that runtime still restarts. Without any
//! runtime the crash is final and reported as such.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use futures_util::future::BoxFuture;
use logos_core::{
    Editor, EditorConfig, EditorEvent, EditorFactory, EngineError, EventKind, ListenerId,
    SharedContext,
};
use serde::Serialize;
use tokio::runtime::Handle;

use crate::config::WatchdogConfig;
use crate::lock;

/// Lifecycle of a supervised session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WatchdogState {
    Initializing,
    Ready,
    Crashed,
    CrashedPermanently,
    Destroyed,
}

/// A crash (or failed restart) observed by a watchdog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchdogFailure {
    pub error: EngineError,
    /// A replacement session is being created.
    pub causes_restart: bool,
    /// The failure came from the replacement attempt itself.
    pub during_restart: bool,
}

pub type RestartHandler<E> = Arc<dyn Fn(Arc<E>) + Send + Sync>;
pub type FailureHandler = Arc<dyn Fn(&WatchdogFailure) + Send + Sync>;
/// Context-level failure handler, called with the failing item's id.
pub type ItemFailureHandler = Arc<dyn Fn(&str, &WatchdogFailure) + Send + Sync>;

/// Supervisor capability the lifecycle manager delegates to.
pub trait Watchdog<E: Editor>: Send + Sync {
    fn create(&self, config: EditorConfig) -> BoxFuture<'static, Result<Arc<E>, EngineError>>;

    fn destroy(&self) -> BoxFuture<'static, Result<(), EngineError>>;

    /// The live supervised session, if any.
    fn editor(&self) -> Option<Arc<E>>;

    fn state(&self) -> WatchdogState;

    /// Called with every replacement session after a crash.
    fn on_restart(&self, handler: RestartHandler<E>);

    fn on_failure(&self, handler: FailureHandler);
}

// ---------------------------------------------------------------
// EditorWatchdog
// ---------------------------------------------------------------

struct WatchdogSlot<E> {
    state: WatchdogState,
    editor: Option<Arc<E>>,
    error_listener: Option<ListenerId>,
    /// Carried into replacement sessions.
    read_only: bool,
    crashes: u32,
    /// Bumped on every install; stale crash reports are ignored.
    generation: u64,
    /// Runtime the last creation ran on; restarts are spawned there.
    runtime: Option<Handle>,
    restart_handlers: Vec<RestartHandler<E>>,
    failure_handlers: Vec<FailureHandler>,
}

struct WatchdogInner<F: EditorFactory> {
    factory: Arc<F>,
    config: WatchdogConfig,
    /// Injected into every session this watchdog creates.
    context: Option<SharedContext>,
    slot: Mutex<WatchdogSlot<F::Editor>>,
}

/// Supervises one editing session, recreating it after crashes.
pub struct EditorWatchdog<F: EditorFactory> {
    inner: Arc<WatchdogInner<F>>,
}

impl<F: EditorFactory> Clone for EditorWatchdog<F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<F: EditorFactory> EditorWatchdog<F> {
    pub fn new(factory: Arc<F>, config: WatchdogConfig) -> Self {
        Self::build(factory, config, None)
    }

    /// A watchdog whose sessions all receive `context` in their config.
    pub fn with_context(factory: Arc<F>, config: WatchdogConfig, context: SharedContext) -> Self {
        Self::build(factory, config, Some(context))
    }

    fn build(factory: Arc<F>, config: WatchdogConfig, context: Option<SharedContext>) -> Self {
        Self {
            inner: Arc::new(WatchdogInner {
                factory,
                config,
                context,
                slot: Mutex::new(WatchdogSlot {
                    state: WatchdogState::Initializing,
                    editor: None,
                    error_listener: None,
                    read_only: false,
                    crashes: 0,
                    generation: 0,
                    runtime: None,
                    restart_handlers: Vec::new(),
                    failure_handlers: Vec::new(),
                }),
            }),
        }
    }

    /// Crashes observed since the watchdog was built.
    pub fn crash_count(&self) -> u32 {
        lock(&self.inner.slot).crashes
    }

    /// Drop `editor` from supervision without marking the watchdog destroyed;
    /// a later `create` starts over. The returned future destroys `editor`.
    pub fn release(&self, editor: Arc<F::Editor>) -> BoxFuture<'static, Result<(), EngineError>> {
        let listener = {
            let mut slot = lock(&self.inner.slot);
            let current = slot.editor.as_ref().map(|e| e.id());
            if current == Some(editor.id()) {
                slot.editor = None;
                slot.generation += 1;
                if slot.state != WatchdogState::Destroyed {
                    slot.state = WatchdogState::Initializing;
                }
                slot.error_listener.take()
            } else {
                None
            }
        };
        if let Some(listener) = listener {
            editor.off(EventKind::Error, listener);
        }
        log::debug!("Watchdog released editor {}", editor.id());
        editor.destroy()
    }
}

impl<F: EditorFactory> WatchdogInner<F> {
    /// Subscribe to the session's error stream and make it the live one.
    fn install(inner: &Arc<Self>, editor: Arc<F::Editor>) -> Arc<F::Editor> {
        let generation = lock(&inner.slot).generation + 1;
        let weak: Weak<Self> = Arc::downgrade(inner);

        let listener = editor.on(
            EventKind::Error,
            Arc::new(move |event: &EditorEvent| {
                if let EditorEvent::Error(error) = event {
                    if let Some(inner) = weak.upgrade() {
                        WatchdogInner::handle_crash(&inner, generation, error.clone());
                    }
                }
            }),
        );

        let mut slot = lock(&inner.slot);
        slot.generation = generation;
        slot.editor = Some(editor.clone());
        slot.error_listener = Some(listener);
        slot.state = WatchdogState::Ready;
        editor
    }

    async fn create_editor(
        inner: Arc<Self>,
        mut config: EditorConfig,
    ) -> Result<Arc<F::Editor>, EngineError> {
        {
            let mut slot = lock(&inner.slot);
            slot.state = WatchdogState::Initializing;
            slot.read_only = config.read_only;
            if let Ok(runtime) = Handle::try_current() {
                slot.runtime = Some(runtime);
            }
        }
        if config.context.is_none() {
            config.context = inner.context.clone();
        }

        let editor = inner.factory.create(config).await?;

        if lock(&inner.slot).state == WatchdogState::Destroyed {
            log::debug!("Watchdog destroyed during creation, discarding editor {}", editor.id());
            if let Err(e) = editor.destroy().await {
                log::warn!("Failed to destroy discarded editor: {}", e);
            }
            return Err(EngineError::Destroyed);
        }

        Ok(Self::install(&inner, editor))
    }

    fn handle_crash(inner: &Arc<Self>, generation: u64, error: EngineError) {
        let (crashed, listener, runtime, handlers) = {
            let mut slot = lock(&inner.slot);
            if slot.generation != generation || slot.state != WatchdogState::Ready {
                return;
            }
            slot.crashes += 1;
            let runtime = if slot.crashes <= inner.config.crash_number_limit {
                let runtime = Handle::try_current().ok().or_else(|| slot.runtime.clone());
                if runtime.is_none() {
                    log::error!("No async runtime available, cannot restart crashed editor");
                }
                runtime
            } else {
                None
            };
            slot.state = if runtime.is_some() {
                WatchdogState::Crashed
            } else {
                WatchdogState::CrashedPermanently
            };
            (
                slot.editor.take(),
                slot.error_listener.take(),
                runtime,
                slot.failure_handlers.clone(),
            )
        };
        let causes_restart = runtime.is_some();

        if let (Some(editor), Some(listener)) = (&crashed, listener) {
            editor.off(EventKind::Error, listener);
        }

        log::warn!(
            "Editor crashed ({}), restart: {}",
            error,
            if causes_restart { "yes" } else { "no" }
        );

        let failure = WatchdogFailure {
            error,
            causes_restart,
            during_restart: false,
        };
        for handler in &handlers {
            handler(&failure);
        }

        if let Some(runtime) = runtime {
            let inner = inner.clone();
            runtime.spawn(async move {
                WatchdogInner::restart(inner, crashed).await;
            });
        }
    }

    async fn restart(inner: Arc<Self>, crashed: Option<Arc<F::Editor>>) {
        if let Some(editor) = crashed {
            if let Err(e) = editor.destroy().await {
                log::warn!("Failed to destroy crashed editor {}: {}", editor.id(), e);
            }
        }

        let config = {
            let slot = lock(&inner.slot);
            if slot.state == WatchdogState::Destroyed {
                return;
            }
            EditorConfig {
                read_only: slot.read_only,
                context: inner.context.clone(),
                ..EditorConfig::default()
            }
        };

        match inner.factory.create(config).await {
            Ok(editor) => {
                if lock(&inner.slot).state == WatchdogState::Destroyed {
                    if let Err(e) = editor.destroy().await {
                        log::warn!("Failed to destroy discarded editor: {}", e);
                    }
                    return;
                }

                let editor = Self::install(&inner, editor);
                log::info!("Editor restarted as {}", editor.id());

                let handlers = lock(&inner.slot).restart_handlers.clone();
                for handler in &handlers {
                    handler(editor.clone());
                }
            }
            Err(error) => {
                log::error!("Editor restart failed: {}", error);
                let handlers = {
                    let mut slot = lock(&inner.slot);
                    slot.state = WatchdogState::CrashedPermanently;
                    slot.failure_handlers.clone()
                };
                let failure = WatchdogFailure {
                    error,
                    causes_restart: false,
                    during_restart: true,
                };
                for handler in &handlers {
                    handler(&failure);
                }
            }
        }
    }
}

impl<F: EditorFactory> Watchdog<F::Editor> for EditorWatchdog<F> {
    fn create(&self, config: EditorConfig) -> BoxFuture<'static, Result<Arc<F::Editor>, EngineError>> {
        Box::pin(WatchdogInner::create_editor(self.inner.clone(), config))
    }

    fn destroy(&self) -> BoxFuture<'static, Result<(), EngineError>> {
        let (editor, listener) = {
            let mut slot = lock(&self.inner.slot);
            slot.state = WatchdogState::Destroyed;
            (slot.editor.take(), slot.error_listener.take())
        };

        Box::pin(async move {
            match editor {
                Some(editor) => {
                    if let Some(listener) = listener {
                        editor.off(EventKind::Error, listener);
                    }
                    editor.destroy().await
                }
                None => Ok(()),
            }
        })
    }

    fn editor(&self) -> Option<Arc<F::Editor>> {
        lock(&self.inner.slot).editor.clone()
    }

    fn state(&self) -> WatchdogState {
        lock(&self.inner.slot).state
    }

    fn on_restart(&self, handler: RestartHandler<F::Editor>) {
        lock(&self.inner.slot).restart_handlers.push(handler);
    }

    fn on_failure(&self, handler: FailureHandler) {
        lock(&self.inner.slot).failure_handlers.push(handler);
    }
}

// ---------------------------------------------------------------
// ContextWatchdog
// ---------------------------------------------------------------

struct ContextInner<F: EditorFactory> {
    config: WatchdogConfig,
    context: SharedContext,
    items: Mutex<HashMap<String, EditorWatchdog<F>>>,
    failure_handlers: Mutex<Vec<ItemFailureHandler>>,
}

impl<F: EditorFactory> ContextInner<F> {
    fn item_failed(&self, item_id: &str, failure: &WatchdogFailure) {
        let handlers = lock(&self.failure_handlers).clone();
        for handler in &handlers {
            handler(item_id, failure);
        }
    }
}

/// Shared context supervising several sessions, one watchdog per item id.
///
/// Every item's sessions are created with the context's [`SharedContext`],
/// and every item failure is also reported to the context's own handlers.
pub struct ContextWatchdog<F: EditorFactory> {
    inner: Arc<ContextInner<F>>,
}

impl<F: EditorFactory> Clone for ContextWatchdog<F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<F: EditorFactory> ContextWatchdog<F> {
    pub fn new(config: WatchdogConfig) -> Self {
        Self::with_context(config, SharedContext::new())
    }

    pub fn with_context(config: WatchdogConfig, context: SharedContext) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                config,
                context,
                items: Mutex::new(HashMap::new()),
                failure_handlers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The value handed to every item's sessions.
    pub fn context(&self) -> &SharedContext {
        &self.inner.context
    }

    /// Called with the item id for every crash or failed restart of any item.
    pub fn on_item_failure(&self, handler: ItemFailureHandler) {
        lock(&self.inner.failure_handlers).push(handler);
    }

    /// Register an item, or return the watchdog already registered under `item_id`.
    pub fn add(&self, item_id: impl Into<String>, factory: Arc<F>) -> EditorWatchdog<F> {
        let item_id = item_id.into();
        let mut items = lock(&self.inner.items);
        if let Some(item) = items.get(&item_id) {
            return item.clone();
        }

        let item = EditorWatchdog::with_context(
            factory,
            self.inner.config.clone(),
            self.inner.context.clone(),
        );
        let weak: Weak<ContextInner<F>> = Arc::downgrade(&self.inner);
        let id = item_id.clone();
        item.on_failure(Arc::new(move |failure: &WatchdogFailure| {
            if let Some(context) = weak.upgrade() {
                context.item_failed(&id, failure);
            }
        }));
        items.insert(item_id, item.clone());
        item
    }

    /// Live session of an item.
    pub fn get_item(&self, item_id: &str) -> Option<Arc<F::Editor>> {
        lock(&self.inner.items).get(item_id).and_then(|item| item.editor())
    }

    pub fn item_state(&self, item_id: &str) -> Option<WatchdogState> {
        lock(&self.inner.items).get(item_id).map(|item| item.state())
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.items).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner.items).is_empty()
    }

    /// Unregister an item and destroy its session.
    pub fn remove(&self, item_id: &str) -> BoxFuture<'static, Result<(), EngineError>> {
        let item = lock(&self.inner.items).remove(item_id);
        Box::pin(async move {
            match item {
                Some(item) => item.destroy().await,
                None => Ok(()),
            }
        })
    }

    /// Destroy every item. The first failure is returned after all items ran.
    pub fn destroy(&self) -> BoxFuture<'static, Result<(), EngineError>> {
        let items: Vec<EditorWatchdog<F>> = lock(&self.inner.items)
            .drain()
            .map(|(_, item)| item)
            .collect();

        Box::pin(async move {
            let mut first_error = None;
            for item in items {
                if let Err(e) = item.destroy().await {
                    log::warn!("Failed to destroy context item: {}", e);
                    first_error.get_or_insert(e);
                }
            }
            first_error.map_or(Ok(()), Err)
        })
    }
}
