//! Contract consumed from the rich-text editing engine.
//!
//! The sync layer never touches the engine's document model directly. It
//! only talks to a live session through [`Editor`] and creates sessions
//! through an [`EditorFactory`]. Both traits are object-safe; async
//! operations return boxed futures.
//!
//! ```text
//! EditorFactory::create(config) ──▸ Arc<Editor>
//!                                      │
//!            add_root / detach_root ◂──┤──▸ on(kind, handler)
//!            set_data / get_full_data  │        │
//!            set_root_attributes       │        ▼
//!                                      │   EditorEvent::{Change, Focus, Blur, Error}
//!                               destroy()
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::roots::{RootAttributes, RootData, RootId, RootsAttributes};

/// Errors reported by an editing engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("editor creation failed: {0}")]
    Creation(String),

    #[error("editor crashed: {0}")]
    Crash(String),

    #[error("editor destruction failed: {0}")]
    Destroy(String),

    #[error("unknown root: {0}")]
    UnknownRoot(RootId),

    #[error("root already exists: {0}")]
    DuplicateRoot(RootId),

    #[error("editor write failed: {0}")]
    Write(String),

    #[error("editor has been destroyed")]
    Destroyed,
}

/// Configuration handed to [`EditorFactory::create`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EditorConfig {
    /// Roots created with the session, in order.
    pub initial_data: RootData,
    /// Attributes for the initial roots.
    pub roots_attributes: RootsAttributes,
    /// Start in read-only mode.
    pub read_only: bool,
    /// Context the session belongs to, when it is one of several sharing one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<SharedContext>,
}

impl EditorConfig {
    pub fn new(initial_data: RootData, roots_attributes: RootsAttributes) -> Self {
        Self {
            initial_data,
            roots_attributes,
            read_only: false,
            context: None,
        }
    }
}

/// Value shared by every session created inside one context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedContext {
    pub id: Uuid,
    pub settings: BTreeMap<String, Value>,
}

impl SharedContext {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            settings: BTreeMap::new(),
        }
    }

    pub fn setting(mut self, key: impl Into<String>, value: Value) -> Self {
        self.settings.insert(key.into(), value);
        self
    }
}

impl Default for SharedContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Options for [`Editor::add_root`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddRootOptions {
    pub data: String,
    pub attributes: RootAttributes,
    /// Whether the engine records the insertion in its undo stack.
    pub is_undoable: bool,
}

/// Event families an [`Editor`] can be subscribed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    Change,
    Focus,
    Blur,
    Error,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::Change,
        EventKind::Focus,
        EventKind::Blur,
        EventKind::Error,
    ];
}

/// What a `Change` event touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Data,
    RootAdded,
    RootDetached,
    Attributes,
}

/// Payload of a `Change` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeInfo {
    pub kind: ChangeKind,
    pub roots: Vec<RootId>,
}

impl ChangeInfo {
    pub fn new(kind: ChangeKind, roots: Vec<RootId>) -> Self {
        Self { kind, roots }
    }
}

/// Payload of `Focus` / `Blur` events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusInfo {
    /// Root holding the selection, if any.
    pub root: Option<RootId>,
}

/// An event raised by a live session.
#[derive(Debug, Clone, PartialEq)]
pub enum EditorEvent {
    Change(ChangeInfo),
    Focus(FocusInfo),
    Blur(FocusInfo),
    /// Internal engine failure. The session is unusable afterwards.
    Error(EngineError),
}

impl EditorEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            EditorEvent::Change(_) => EventKind::Change,
            EditorEvent::Focus(_) => EventKind::Focus,
            EditorEvent::Blur(_) => EventKind::Blur,
            EditorEvent::Error(_) => EventKind::Error,
        }
    }
}

/// Handle returned by [`Editor::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

/// Event handler registered on an editor.
pub type EventHandler = Arc<dyn Fn(&EditorEvent) + Send + Sync>;

/// One live editing-session instance.
///
/// Implementations deliver events synchronously from the mutating call and
/// must not hold internal locks while invoking handlers: handlers may call
/// back into the editor.
pub trait Editor: Send + Sync + 'static {
    /// Unique per instance; a recreated session gets a new id.
    fn id(&self) -> Uuid;

    fn add_root(&self, root: &str, options: AddRootOptions) -> Result<(), EngineError>;

    fn detach_root(&self, root: &str) -> Result<(), EngineError>;

    /// Attached roots in engine order.
    fn root_names(&self) -> Vec<RootId>;

    /// Attributes of a root. Every registered key is present, unset ones as `null`.
    fn get_root_attributes(&self, root: &str) -> Result<RootAttributes, EngineError>;

    /// Replace a root's attributes. `null` values clear the key.
    fn set_root_attributes(&self, root: &str, attributes: &RootAttributes) -> Result<(), EngineError>;

    fn register_root_attribute(&self, key: &str);

    fn registered_root_attributes(&self) -> BTreeSet<String>;

    fn get_data(&self, root: &str) -> Result<String, EngineError>;

    /// Overwrite the content of every listed root in one change.
    fn set_data(&self, data: &RootData) -> Result<(), EngineError>;

    fn get_full_data(&self) -> RootData;

    fn is_read_only(&self) -> bool;

    fn set_read_only(&self, read_only: bool);

    fn on(&self, kind: EventKind, handler: EventHandler) -> ListenerId;

    fn off(&self, kind: EventKind, listener: ListenerId);

    fn destroy(&self) -> BoxFuture<'static, Result<(), EngineError>>;
}

/// Creates editing sessions.
pub trait EditorFactory: Send + Sync + 'static {
    type Editor: Editor;

    fn create(&self, config: EditorConfig) -> BoxFuture<'static, Result<Arc<Self::Editor>, EngineError>>;
}
