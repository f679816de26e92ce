//! `YrsEditor` — a multi-root editing session backed by a Yrs document.
//!
//! Storage layout inside the `yrs::Doc`:
//!
//! ```text
//! "root:<id>"        TextRef  — serialized markup of the root
//! "attributes:<id>"  MapRef   — attribute name → JSON-encoded value
//! ```
//!
//! Yrs cannot delete top-level types, so detaching a root clears its text
//! and attribute map and drops it from the ordered root list. Re-adding the
//! same name later starts from empty shared types again.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures_util::future::{self, BoxFuture};
use logos_core::{
    AddRootOptions, ChangeInfo, ChangeKind, Editor, EditorConfig, EditorEvent, EngineError,
    EventHandler, EventKind, FocusInfo, ListenerId, RootAttributes, RootData, RootId, SharedContext,
};
use serde_json::Value;
use uuid::Uuid;
use yrs::{Any, Doc, GetString, Map, Out, Text, Transact};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn text_name(root: &str) -> String {
    format!("root:{root}")
}

fn attributes_name(root: &str) -> String {
    format!("attributes:{root}")
}

/// Wrap bare text in a paragraph, the way the data pipeline upcasts input.
pub fn normalize_markup(content: &str) -> String {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('<') {
        trimmed.to_string()
    } else {
        format!("<p>{trimmed}</p>")
    }
}

/// Snapshot of the write counters of one editor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EditorStats {
    pub add_root_calls: u64,
    pub detach_root_calls: u64,
    pub set_data_calls: u64,
    pub attribute_writes: u64,
}

impl EditorStats {
    /// Every engine write, regardless of kind.
    pub fn total_writes(&self) -> u64 {
        self.add_root_calls + self.detach_root_calls + self.set_data_calls + self.attribute_writes
    }
}

/// Lock-free counters, read through [`YrsEditor::stats`].
#[derive(Default)]
struct AtomicEditorStats {
    add_root_calls: AtomicU64,
    detach_root_calls: AtomicU64,
    set_data_calls: AtomicU64,
    attribute_writes: AtomicU64,
}

#[derive(Default)]
struct EditorState {
    /// Attached roots, in insertion order.
    roots: Vec<RootId>,
    registered_attributes: BTreeSet<String>,
    read_only: bool,
    crashed: bool,
    destroyed: bool,
    /// Error returned by the next `destroy()` call.
    destroy_failure: Option<String>,
    /// Error returned by every `add_root()` call while set.
    add_root_failure: Option<String>,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    by_kind: HashMap<EventKind, Vec<(ListenerId, EventHandler)>>,
}

/// One live editing session.
pub struct YrsEditor {
    id: Uuid,
    doc: Doc,
    state: Mutex<EditorState>,
    listeners: Mutex<Listeners>,
    stats: AtomicEditorStats,
    context: Option<SharedContext>,
}

impl YrsEditor {
    /// Build a session with the roots described by `config`.
    ///
    /// No events are raised for the initial roots.
    pub fn with_config(config: &EditorConfig) -> Result<Self, EngineError> {
        let editor = Self {
            id: Uuid::new_v4(),
            doc: Doc::new(),
            state: Mutex::new(EditorState {
                read_only: config.read_only,
                ..EditorState::default()
            }),
            listeners: Mutex::new(Listeners::default()),
            stats: AtomicEditorStats::default(),
            context: config.context.clone(),
        };

        {
            let mut state = lock(&editor.state);
            for attrs in config.roots_attributes.values() {
                state.registered_attributes.extend(attrs.keys().cloned());
            }
        }

        for (root, data) in &config.initial_data {
            {
                let mut state = lock(&editor.state);
                if state.roots.contains(root) {
                    return Err(EngineError::DuplicateRoot(root.clone()));
                }
                state.roots.push(root.clone());
            }
            editor.write_text(root, data);
            if let Some(attrs) = config.roots_attributes.get(root) {
                editor.write_attributes(root, attrs);
            }
        }

        log::debug!(
            "YrsEditor {} created with {} roots",
            editor.id,
            config.initial_data.len()
        );
        Ok(editor)
    }

    /// Write counters accumulated since creation.
    pub fn stats(&self) -> EditorStats {
        EditorStats {
            add_root_calls: self.stats.add_root_calls.load(Ordering::Relaxed),
            detach_root_calls: self.stats.detach_root_calls.load(Ordering::Relaxed),
            set_data_calls: self.stats.set_data_calls.load(Ordering::Relaxed),
            attribute_writes: self.stats.attribute_writes.load(Ordering::Relaxed),
        }
    }

    /// Number of handlers currently registered, across all kinds.
    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).by_kind.values().map(Vec::len).sum()
    }

    pub fn is_destroyed(&self) -> bool {
        lock(&self.state).destroyed
    }

    pub fn is_crashed(&self) -> bool {
        lock(&self.state).crashed
    }

    /// Context the session was created in.
    pub fn context(&self) -> Option<&SharedContext> {
        self.context.as_ref()
    }

    /// Move the selection into `root` and raise `Focus`.
    pub fn focus(&self, root: Option<&str>) {
        self.emit(EditorEvent::Focus(FocusInfo {
            root: root.map(str::to_string),
        }));
    }

    /// Raise `Blur`.
    pub fn blur(&self) {
        self.emit(EditorEvent::Blur(FocusInfo::default()));
    }

    /// Simulate an internal engine failure.
    ///
    /// The session keeps its data but raises an `Error` event; supervisors
    /// are expected to discard it.
    pub fn crash(&self, reason: impl Into<String>) {
        let reason = reason.into();
        lock(&self.state).crashed = true;
        log::warn!("YrsEditor {} crashed: {}", self.id, reason);
        self.emit(EditorEvent::Error(EngineError::Crash(reason)));
    }

    /// Make the next `destroy()` call fail with `reason`.
    pub fn fail_next_destroy(&self, reason: impl Into<String>) {
        lock(&self.state).destroy_failure = Some(reason.into());
    }

    /// Make every later `add_root()` call fail with `reason`.
    pub fn fail_root_additions(&self, reason: impl Into<String>) {
        lock(&self.state).add_root_failure = Some(reason.into());
    }

    // ---------------------------------------------------------------
    // Yrs storage
    // ---------------------------------------------------------------

    fn write_text(&self, root: &str, content: &str) {
        let text = self.doc.get_or_insert_text(text_name(root));
        let content = normalize_markup(content);

        let mut txn = self.doc.transact_mut();
        let len = text.len(&txn);
        if len > 0 {
            text.remove_range(&mut txn, 0, len);
        }
        if !content.is_empty() {
            text.insert(&mut txn, 0, &content);
        }
    }

    fn read_text(&self, root: &str) -> String {
        let text = self.doc.get_or_insert_text(text_name(root));
        let txn = self.doc.transact();
        text.get_string(&txn)
    }

    fn write_attributes(&self, root: &str, attributes: &RootAttributes) {
        let map = self.doc.get_or_insert_map(attributes_name(root));

        let mut txn = self.doc.transact_mut();
        map.clear(&mut txn);
        for (key, value) in attributes {
            if value.is_null() {
                continue;
            }
            match serde_json::to_string(value) {
                Ok(json) => {
                    map.insert(&mut txn, key.clone(), json);
                }
                Err(e) => log::warn!("Skipping attribute {key} on root {root}: {e}"),
            }
        }
    }

    fn read_attributes(&self, root: &str) -> RootAttributes {
        let registered = lock(&self.state).registered_attributes.clone();
        let map = self.doc.get_or_insert_map(attributes_name(root));

        let mut attributes: RootAttributes = registered
            .into_iter()
            .map(|key| (key, Value::Null))
            .collect();

        let txn = self.doc.transact();
        for (key, out) in map.iter(&txn) {
            if let Out::Any(Any::String(json)) = out {
                match serde_json::from_str::<Value>(&json) {
                    Ok(value) => {
                        attributes.insert(key.to_string(), value);
                    }
                    Err(e) => log::warn!("Corrupt attribute {key} on root {root}: {e}"),
                }
            }
        }

        attributes
    }

    // ---------------------------------------------------------------
    // Events
    // ---------------------------------------------------------------

    fn emit(&self, event: EditorEvent) {
        let handlers: Vec<EventHandler> = lock(&self.listeners)
            .by_kind
            .get(&event.kind())
            .map(|list| list.iter().map(|(_, handler)| handler.clone()).collect())
            .unwrap_or_default();

        for handler in handlers {
            handler(&event);
        }
    }

    fn ensure_live(&self) -> Result<(), EngineError> {
        if lock(&self.state).destroyed {
            return Err(EngineError::Destroyed);
        }
        Ok(())
    }

    fn ensure_root(&self, root: &str) -> Result<(), EngineError> {
        let state = lock(&self.state);
        if state.destroyed {
            return Err(EngineError::Destroyed);
        }
        if !state.roots.iter().any(|r| r == root) {
            return Err(EngineError::UnknownRoot(root.to_string()));
        }
        Ok(())
    }
}

impl Editor for YrsEditor {
    fn id(&self) -> Uuid {
        self.id
    }

    fn add_root(&self, root: &str, options: AddRootOptions) -> Result<(), EngineError> {
        {
            let mut state = lock(&self.state);
            if state.destroyed {
                return Err(EngineError::Destroyed);
            }
            if let Some(reason) = &state.add_root_failure {
                return Err(EngineError::Write(reason.clone()));
            }
            if state.roots.iter().any(|r| r == root) {
                return Err(EngineError::DuplicateRoot(root.to_string()));
            }
            state.roots.push(root.to_string());
        }

        self.stats.add_root_calls.fetch_add(1, Ordering::Relaxed);
        self.write_text(root, &options.data);
        self.write_attributes(root, &options.attributes);

        log::debug!("YrsEditor {}: added root {}", self.id, root);
        self.emit(EditorEvent::Change(ChangeInfo::new(
            ChangeKind::RootAdded,
            vec![root.to_string()],
        )));
        Ok(())
    }

    fn detach_root(&self, root: &str) -> Result<(), EngineError> {
        self.ensure_root(root)?;
        lock(&self.state).roots.retain(|r| r != root);

        self.stats.detach_root_calls.fetch_add(1, Ordering::Relaxed);
        self.write_text(root, "");
        self.write_attributes(root, &RootAttributes::new());

        log::debug!("YrsEditor {}: detached root {}", self.id, root);
        self.emit(EditorEvent::Change(ChangeInfo::new(
            ChangeKind::RootDetached,
            vec![root.to_string()],
        )));
        Ok(())
    }

    fn root_names(&self) -> Vec<RootId> {
        lock(&self.state).roots.clone()
    }

    fn get_root_attributes(&self, root: &str) -> Result<RootAttributes, EngineError> {
        self.ensure_root(root)?;
        Ok(self.read_attributes(root))
    }

    fn set_root_attributes(&self, root: &str, attributes: &RootAttributes) -> Result<(), EngineError> {
        self.ensure_root(root)?;

        self.stats.attribute_writes.fetch_add(1, Ordering::Relaxed);
        self.write_attributes(root, attributes);

        self.emit(EditorEvent::Change(ChangeInfo::new(
            ChangeKind::Attributes,
            vec![root.to_string()],
        )));
        Ok(())
    }

    fn register_root_attribute(&self, key: &str) {
        lock(&self.state).registered_attributes.insert(key.to_string());
    }

    fn registered_root_attributes(&self) -> BTreeSet<String> {
        lock(&self.state).registered_attributes.clone()
    }

    fn get_data(&self, root: &str) -> Result<String, EngineError> {
        self.ensure_root(root)?;
        Ok(self.read_text(root))
    }

    fn set_data(&self, data: &RootData) -> Result<(), EngineError> {
        self.ensure_live()?;
        for root in data.keys() {
            self.ensure_root(root)?;
        }

        self.stats.set_data_calls.fetch_add(1, Ordering::Relaxed);
        for (root, content) in data {
            self.write_text(root, content);
        }

        self.emit(EditorEvent::Change(ChangeInfo::new(
            ChangeKind::Data,
            data.keys().cloned().collect(),
        )));
        Ok(())
    }

    fn get_full_data(&self) -> RootData {
        self.root_names()
            .into_iter()
            .map(|root| {
                let content = self.read_text(&root);
                (root, content)
            })
            .collect()
    }

    fn is_read_only(&self) -> bool {
        lock(&self.state).read_only
    }

    fn set_read_only(&self, read_only: bool) {
        lock(&self.state).read_only = read_only;
    }

    fn on(&self, kind: EventKind, handler: EventHandler) -> ListenerId {
        let mut listeners = lock(&self.listeners);
        listeners.next_id += 1;
        let id = ListenerId(listeners.next_id);
        listeners.by_kind.entry(kind).or_default().push((id, handler));
        id
    }

    fn off(&self, kind: EventKind, listener: ListenerId) {
        if let Some(list) = lock(&self.listeners).by_kind.get_mut(&kind) {
            list.retain(|(id, _)| *id != listener);
        }
    }

    fn destroy(&self) -> BoxFuture<'static, Result<(), EngineError>> {
        let failure = {
            let mut state = lock(&self.state);
            match state.destroy_failure.take() {
                Some(reason) => Some(reason),
                None => {
                    state.destroyed = true;
                    None
                }
            }
        };

        let result = match failure {
            Some(reason) => Err(EngineError::Destroy(reason)),
            None => {
                lock(&self.listeners).by_kind.clear();
                log::debug!("YrsEditor {} destroyed", self.id);
                Ok(())
            }
        };

        Box::pin(future::ready(result))
    }
}
