//! # logos-engine — Yrs-backed multi-root editing engine
//!
//! Reference implementation of the `logos_core::engine` contract. Every
//! root lives in one shared `yrs::Doc`, so a session can later be wired to
//! the CRDT sync stack without changing its storage.
//!
//! ```text
//! YrsEditorFactory::create(config)
//!        │
//!        ▼
//! ┌──────────────────────────────┐
//! │ YrsEditor                    │
//! │   yrs::Doc                   │
//! │   ├── "root:intro"      Text │
//! │   ├── "attributes:intro" Map │
//! │   └── …                      │
//! │   listeners (by EventKind)   │
//! └──────────────────────────────┘
//! ```

pub mod editor;
pub mod factory;

pub use editor::{normalize_markup, EditorStats, YrsEditor};
pub use factory::YrsEditorFactory;
