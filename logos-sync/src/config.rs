//! Controller configuration and external callbacks.

use std::fmt;
use std::sync::Arc;

use logos_core::{ChangeInfo, EditorFactory, FocusInfo, RootData, RootsAttributes};

use crate::error::{ErrorDetails, SyncError};
use crate::watchdog::ContextWatchdog;

pub type ReadyCallback<E> = Arc<dyn Fn(&Arc<E>) + Send + Sync>;
pub type ChangeCallback<E> = Arc<dyn Fn(&ChangeInfo, &Arc<E>) + Send + Sync>;
pub type FocusCallback<E> = Arc<dyn Fn(&FocusInfo, &Arc<E>) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&SyncError, &ErrorDetails) + Send + Sync>;

/// Callbacks invoked by the event bridge. All are optional.
pub struct Callbacks<E> {
    pub on_ready: Option<ReadyCallback<E>>,
    pub on_change: Option<ChangeCallback<E>>,
    pub on_focus: Option<FocusCallback<E>>,
    pub on_blur: Option<FocusCallback<E>>,
    /// Without one, errors are logged.
    pub on_error: Option<ErrorCallback>,
}

impl<E> Callbacks<E> {
    pub fn new() -> Self {
        Self {
            on_ready: None,
            on_change: None,
            on_focus: None,
            on_blur: None,
            on_error: None,
        }
    }

    pub fn on_ready(mut self, f: impl Fn(&Arc<E>) + Send + Sync + 'static) -> Self {
        self.on_ready = Some(Arc::new(f));
        self
    }

    pub fn on_change(mut self, f: impl Fn(&ChangeInfo, &Arc<E>) + Send + Sync + 'static) -> Self {
        self.on_change = Some(Arc::new(f));
        self
    }

    pub fn on_focus(mut self, f: impl Fn(&FocusInfo, &Arc<E>) + Send + Sync + 'static) -> Self {
        self.on_focus = Some(Arc::new(f));
        self
    }

    pub fn on_blur(mut self, f: impl Fn(&FocusInfo, &Arc<E>) + Send + Sync + 'static) -> Self {
        self.on_blur = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&SyncError, &ErrorDetails) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }
}

impl<E> Default for Callbacks<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for Callbacks<E> {
    fn clone(&self) -> Self {
        Self {
            on_ready: self.on_ready.clone(),
            on_change: self.on_change.clone(),
            on_focus: self.on_focus.clone(),
            on_blur: self.on_blur.clone(),
            on_error: self.on_error.clone(),
        }
    }
}

impl<E> fmt::Debug for Callbacks<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_ready", &self.on_ready.is_some())
            .field("on_change", &self.on_change.is_some())
            .field("on_focus", &self.on_focus.is_some())
            .field("on_blur", &self.on_blur.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Watchdog restart policy.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// Crashes tolerated before the watchdog gives up restarting.
    pub crash_number_limit: u32,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            crash_number_limit: 3,
        }
    }
}

/// Everything a [`MultiRootController`](crate::MultiRootController) needs.
pub struct ControllerConfig<F: EditorFactory> {
    pub factory: Arc<F>,
    /// Initial content per root.
    pub data: RootData,
    /// Initial attributes per root; must cover the same roots as `data`.
    pub attributes: RootsAttributes,
    /// Creation waits while this is false.
    pub is_layout_ready: bool,
    /// Binds the session's read-only mode.
    pub disabled: bool,
    /// Create and own the session directly instead of through a watchdog.
    pub disable_watchdog: bool,
    pub watchdog: WatchdogConfig,
    /// Shared watchdog context; when set the session becomes one of its items.
    pub context: Option<ContextWatchdog<F>>,
    pub callbacks: Callbacks<F::Editor>,
}

impl<F: EditorFactory> ControllerConfig<F> {
    pub fn new(factory: F) -> Self {
        Self::with_factory(Arc::new(factory))
    }

    pub fn with_factory(factory: Arc<F>) -> Self {
        Self {
            factory,
            data: RootData::new(),
            attributes: RootsAttributes::new(),
            is_layout_ready: true,
            disabled: false,
            disable_watchdog: false,
            watchdog: WatchdogConfig::default(),
            context: None,
            callbacks: Callbacks::new(),
        }
    }

    pub fn roots(mut self, data: RootData, attributes: RootsAttributes) -> Self {
        self.data = data;
        self.attributes = attributes;
        self
    }

    pub fn layout_ready(mut self, ready: bool) -> Self {
        self.is_layout_ready = ready;
        self
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn disable_watchdog(mut self, disable: bool) -> Self {
        self.disable_watchdog = disable;
        self
    }

    pub fn watchdog(mut self, config: WatchdogConfig) -> Self {
        self.watchdog = config;
        self
    }

    pub fn context(mut self, context: ContextWatchdog<F>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn callbacks(mut self, callbacks: Callbacks<F::Editor>) -> Self {
        self.callbacks = callbacks;
        self
    }
}
