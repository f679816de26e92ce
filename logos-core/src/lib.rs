//! # logos-core — multi-root document model
//!
//! Shared types for keeping a multi-root editing session in step with an
//! external state model.
//!
//! ## Modules
//!
//! - [`roots`] — root maps, key-set validation, attribute normalization
//! - [`engine`] — the contract consumed from the editing engine

pub mod engine;
pub mod roots;

pub use engine::{
    AddRootOptions, ChangeInfo, ChangeKind, Editor, EditorConfig, EditorEvent, EditorFactory,
    EngineError, EventHandler, EventKind, FocusInfo, ListenerId, SharedContext,
};
pub use roots::{
    attribute_schema, fill_attribute_shape, mismatched_roots, normalize_root_attributes,
    same_roots, validate_roots, EditableDescriptor, RootAttributes, RootData, RootId,
    RootsAttributes, RootsError,
};
