//! Factory producing [`YrsEditor`] sessions.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use logos_core::{EditorConfig, EditorFactory, EngineError};

use crate::editor::{lock, YrsEditor};

/// Creates [`YrsEditor`] sessions and remembers every instance it built.
///
/// Creation can be delayed or made to fail, which lets callers exercise
/// slow and failing startups.
#[derive(Clone, Default)]
pub struct YrsEditorFactory {
    creation_delay: Option<Duration>,
    /// Failures consumed by the next `create` calls, oldest first.
    failures: Arc<Mutex<Vec<String>>>,
    /// Root-addition failure handed to the next editor built.
    add_root_failure: Arc<Mutex<Option<String>>>,
    created: Arc<Mutex<Vec<Arc<YrsEditor>>>>,
}

impl YrsEditorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `delay` before every creation completes.
    pub fn with_creation_delay(mut self, delay: Duration) -> Self {
        self.creation_delay = Some(delay);
        self
    }

    /// Make the next `create` call fail with `reason`.
    pub fn fail_next_creation(&self, reason: impl Into<String>) {
        lock(&self.failures).push(reason.into());
    }

    /// Make the next editor built reject every `add_root` with `reason`.
    pub fn fail_root_additions_in_next_editor(&self, reason: impl Into<String>) {
        *lock(&self.add_root_failure) = Some(reason.into());
    }

    /// Every editor created so far, oldest first.
    pub fn created(&self) -> Vec<Arc<YrsEditor>> {
        lock(&self.created).clone()
    }

    /// Most recently created editor.
    pub fn last(&self) -> Option<Arc<YrsEditor>> {
        lock(&self.created).last().cloned()
    }

    pub fn created_count(&self) -> usize {
        lock(&self.created).len()
    }
}

impl EditorFactory for YrsEditorFactory {
    type Editor = YrsEditor;

    fn create(&self, config: EditorConfig) -> BoxFuture<'static, Result<Arc<YrsEditor>, EngineError>> {
        let failure = {
            let mut failures = lock(&self.failures);
            if failures.is_empty() {
                None
            } else {
                Some(failures.remove(0))
            }
        };
        let delay = self.creation_delay;
        let created = self.created.clone();
        let add_root_failure = self.add_root_failure.clone();

        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(reason) = failure {
                log::warn!("Editor creation failed: {}", reason);
                return Err(EngineError::Creation(reason));
            }

            let editor = Arc::new(YrsEditor::with_config(&config)?);
            if let Some(reason) = lock(&add_root_failure).take() {
                editor.fail_root_additions(reason);
            }
            lock(&created).push(editor.clone());
            Ok(editor)
        })
    }
}
