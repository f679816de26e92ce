//! Session lifecycle: how sessions are created, supervised and torn down.
//!
//! Three strategies, picked once from the controller configuration:
//!
//! | Mode      | Creation                         | Crash handling                   |
//! |-----------|----------------------------------|----------------------------------|
//! | Direct    | `EditorFactory::create`          | reported only, no restart        |
//! | Watchdog  | private `EditorWatchdog`         | watchdog recreates the session   |
//! | Context   | item of a shared `ContextWatchdog` | item watchdog recreates it     |

use std::sync::Arc;

use futures_util::future::BoxFuture;
use logos_core::{Editor, EditorConfig, EditorFactory, EngineError};

use crate::config::WatchdogConfig;
use crate::watchdog::{
    ContextWatchdog, EditorWatchdog, FailureHandler, RestartHandler, Watchdog, WatchdogState,
};

/// The one published session reference.
///
/// Written only through [`publish`](Self::publish) and [`take`](Self::take),
/// each of which replaces the whole slot and bumps its generation.
pub struct SessionSlot<E> {
    editor: Option<Arc<E>>,
    generation: u64,
}

impl<E: Editor> SessionSlot<E> {
    pub fn empty() -> Self {
        Self {
            editor: None,
            generation: 0,
        }
    }

    pub fn current(&self) -> Option<&Arc<E>> {
        self.editor.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn publish(&mut self, editor: Arc<E>) -> u64 {
        self.generation += 1;
        self.editor = Some(editor);
        self.generation
    }

    pub(crate) fn take(&mut self) -> Option<Arc<E>> {
        self.generation += 1;
        self.editor.take()
    }
}

enum Supervisor<F: EditorFactory> {
    Direct,
    Watchdog(EditorWatchdog<F>),
    Context {
        context: ContextWatchdog<F>,
        item_id: String,
        item: EditorWatchdog<F>,
    },
}

/// Creates and destroys sessions for one controller.
pub struct SessionLifecycle<F: EditorFactory> {
    factory: Arc<F>,
    supervisor: Supervisor<F>,
}

impl<F: EditorFactory> SessionLifecycle<F> {
    pub fn new(
        factory: Arc<F>,
        disable_watchdog: bool,
        watchdog: WatchdogConfig,
        context: Option<ContextWatchdog<F>>,
        item_id: String,
    ) -> Self {
        let supervisor = match (disable_watchdog, context) {
            (true, _) => Supervisor::Direct,
            (false, Some(context)) => {
                let item = context.add(item_id.clone(), factory.clone());
                Supervisor::Context {
                    context,
                    item_id,
                    item,
                }
            }
            (false, None) => Supervisor::Watchdog(EditorWatchdog::new(factory.clone(), watchdog)),
        };

        Self {
            factory,
            supervisor,
        }
    }

    fn watchdog(&self) -> Option<&EditorWatchdog<F>> {
        match &self.supervisor {
            Supervisor::Direct => None,
            Supervisor::Watchdog(watchdog) => Some(watchdog),
            Supervisor::Context { item, .. } => Some(item),
        }
    }

    /// Whether crashes are handled by a watchdog.
    pub fn is_supervised(&self) -> bool {
        self.watchdog().is_some()
    }

    pub fn watchdog_state(&self) -> Option<WatchdogState> {
        self.watchdog().map(|watchdog| watchdog.state())
    }

    pub async fn create(&self, config: EditorConfig) -> Result<Arc<F::Editor>, EngineError> {
        match self.watchdog() {
            Some(watchdog) => watchdog.create(config).await,
            None => self.factory.create(config).await,
        }
    }

    /// Tear down the session. Supervised sessions are destroyed by their
    /// watchdog, which owns them; `editor` only matters in direct mode.
    pub async fn destroy(&self, editor: Option<Arc<F::Editor>>) -> Result<(), EngineError> {
        match &self.supervisor {
            Supervisor::Direct => match editor {
                Some(editor) => editor.destroy().await,
                None => Ok(()),
            },
            Supervisor::Watchdog(watchdog) => watchdog.destroy().await,
            Supervisor::Context {
                context, item_id, ..
            } => context.remove(item_id).await,
        }
    }

    /// Tear down a session that was created but never published. A
    /// supervisor stays usable for the next `create`.
    pub fn discard(&self, editor: Arc<F::Editor>) -> BoxFuture<'static, Result<(), EngineError>> {
        match self.watchdog() {
            Some(watchdog) => watchdog.release(editor),
            None => editor.destroy(),
        }
    }

    pub fn on_restart(&self, handler: RestartHandler<F::Editor>) {
        if let Some(watchdog) = self.watchdog() {
            watchdog.on_restart(handler);
        }
    }

    pub fn on_failure(&self, handler: FailureHandler) {
        if let Some(watchdog) = self.watchdog() {
            watchdog.on_failure(handler);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logos_engine::YrsEditorFactory;

    fn lifecycle(disable_watchdog: bool) -> SessionLifecycle<YrsEditorFactory> {
        SessionLifecycle::new(
            Arc::new(YrsEditorFactory::new()),
            disable_watchdog,
            WatchdogConfig::default(),
            None,
            "item".into(),
        )
    }

    #[test]
    fn test_slot_generation_bumps_on_every_write() {
        let mut slot: SessionSlot<logos_engine::YrsEditor> = SessionSlot::empty();
        assert!(slot.current().is_none());
        assert!(slot.take().is_none());
        assert_eq!(slot.generation(), 1);
    }

    #[tokio::test]
    async fn test_direct_mode_is_unsupervised() {
        let lifecycle = lifecycle(true);
        assert!(!lifecycle.is_supervised());
        assert!(lifecycle.watchdog_state().is_none());

        let editor = lifecycle.create(EditorConfig::default()).await.unwrap();
        lifecycle.destroy(Some(editor.clone())).await.unwrap();
        assert!(editor.is_destroyed());
    }

    #[tokio::test]
    async fn test_watchdog_mode_owns_editor() {
        let lifecycle = lifecycle(false);
        let editor = lifecycle.create(EditorConfig::default()).await.unwrap();
        assert_eq!(lifecycle.watchdog_state(), Some(WatchdogState::Ready));

        lifecycle.destroy(None).await.unwrap();
        assert!(editor.is_destroyed());
    }

    #[tokio::test]
    async fn test_context_mode_registers_item() {
        let context = ContextWatchdog::new(WatchdogConfig::default());
        let lifecycle = SessionLifecycle::new(
            Arc::new(YrsEditorFactory::new()),
            false,
            WatchdogConfig::default(),
            Some(context.clone()),
            "controller-1".into(),
        );

        let editor = lifecycle.create(EditorConfig::default()).await.unwrap();
        assert_eq!(context.get_item("controller-1").unwrap().id(), editor.id());

        lifecycle.destroy(None).await.unwrap();
        assert!(context.is_empty());
        assert!(editor.is_destroyed());
    }

    #[tokio::test]
    async fn test_discard_keeps_watchdog_usable() {
        let lifecycle = lifecycle(false);
        let editor = lifecycle.create(EditorConfig::default()).await.unwrap();

        lifecycle.discard(editor.clone()).await.unwrap();
        assert!(editor.is_destroyed());
        assert_eq!(lifecycle.watchdog_state(), Some(WatchdogState::Initializing));

        lifecycle.create(EditorConfig::default()).await.unwrap();
        assert_eq!(lifecycle.watchdog_state(), Some(WatchdogState::Ready));
    }

    #[tokio::test]
    async fn test_context_mode_shares_context_and_failures() {
        let context = ContextWatchdog::new(WatchdogConfig::default());
        let failed = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = failed.clone();
        context.on_item_failure(Arc::new(move |item_id: &str, _: &crate::WatchdogFailure| {
            crate::lock(&sink).push(item_id.to_string())
        }));
        let lifecycle = SessionLifecycle::new(
            Arc::new(YrsEditorFactory::new()),
            false,
            WatchdogConfig::default(),
            Some(context.clone()),
            "controller-1".into(),
        );

        let editor = lifecycle.create(EditorConfig::default()).await.unwrap();
        assert_eq!(editor.context(), Some(context.context()));

        editor.crash("boom");
        assert_eq!(*crate::lock(&failed), vec!["controller-1".to_string()]);
        lifecycle.destroy(None).await.unwrap();
    }
}
