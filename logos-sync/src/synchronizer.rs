//! Root Synchronizer — reconciles external root maps with a live session.
//!
//! ```text
//!   external (data, attributes) ──reconcile_from_external──▸ session
//!                                                               │
//!   external (data, attributes) ◂───mirror_from_session─────────┘
//! ```
//!
//! Write order within one pass: register new attribute keys, detach extra
//! roots, add missing roots, one `set_data` for every changed root, then
//! per-root attribute writes. Roots whose content and attributes already
//! match cost nothing.
//!
//! Engines may normalize what they are given (`"text"` → `"<p>text</p>"`).
//! The synchronizer remembers, per root, what it pushed and what the session
//! made of it, so pushing the same external value again is recognised as a
//! no-op instead of a fresh write.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use logos_core::{
    attribute_schema, fill_attribute_shape, normalize_root_attributes, validate_roots,
    AddRootOptions, Editor, RootAttributes, RootData, RootId, RootsAttributes,
};
use serde_json::Value;
use uuid::Uuid;

use crate::error::SyncError;
use crate::lock;

/// What one reconciliation pass wrote to the session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: Vec<RootId>,
    pub detached: Vec<RootId>,
    pub updated_data: Vec<RootId>,
    pub updated_attributes: Vec<RootId>,
}

impl ReconcileReport {
    /// Whether the pass left the session untouched.
    pub fn is_noop(&self) -> bool {
        self.added.is_empty()
            && self.detached.is_empty()
            && self.updated_data.is_empty()
            && self.updated_attributes.is_empty()
    }
}

/// Pushed external content and the session value it produced.
#[derive(Default)]
struct AppliedContent {
    editor: Option<Uuid>,
    by_root: HashMap<RootId, (String, String)>,
}

/// Marks the synchronizer busy for the lifetime of a pass.
struct ApplyGuard<'a>(&'a AtomicUsize);

impl<'a> ApplyGuard<'a> {
    fn enter(depth: &'a AtomicUsize) -> Self {
        depth.fetch_add(1, Ordering::SeqCst);
        Self(depth)
    }
}

impl Drop for ApplyGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RootSynchronizer {
    applying: AtomicUsize,
    applied: Mutex<AppliedContent>,
}

impl RootSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a pass is writing to the session. Change events raised in
    /// that window are echoes of the pass itself.
    pub fn is_applying(&self) -> bool {
        self.applying.load(Ordering::SeqCst) > 0
    }

    /// Record the content a freshly created session was seeded with.
    pub fn seed<E: Editor + ?Sized>(&self, editor: &E, data: &RootData) {
        for (root, content) in data {
            self.remember(editor, root, content);
        }
    }

    fn content_matches(&self, editor: Uuid, root: &str, external: &str, session: &str) -> bool {
        if external == session {
            return true;
        }
        let applied = lock(&self.applied);
        applied.editor == Some(editor)
            && applied
                .by_root
                .get(root)
                .is_some_and(|(pushed, produced)| pushed == external && produced == session)
    }

    fn remember<E: Editor + ?Sized>(&self, editor: &E, root: &str, external: &str) {
        let produced = match editor.get_data(root) {
            Ok(produced) => produced,
            Err(_) => return,
        };
        let mut applied = lock(&self.applied);
        if applied.editor != Some(editor.id()) {
            *applied = AppliedContent {
                editor: Some(editor.id()),
                by_root: HashMap::new(),
            };
        }
        applied
            .by_root
            .insert(root.to_string(), (external.to_string(), produced));
    }

    /// Make the session's root set, content and attributes match the
    /// external maps.
    pub fn reconcile_from_external<E: Editor + ?Sized>(
        &self,
        editor: &E,
        data: &RootData,
        attributes: &RootsAttributes,
    ) -> Result<ReconcileReport, SyncError> {
        validate_roots(data, attributes)?;

        let _guard = ApplyGuard::enter(&self.applying);
        let mut report = ReconcileReport::default();
        let session_roots = editor.root_names();

        let mut schema: BTreeSet<String> = editor.registered_root_attributes();
        for key in attribute_schema(attributes) {
            if !schema.contains(&key) {
                editor.register_root_attribute(&key);
                schema.insert(key);
            }
        }

        let normalized = |root: &str| {
            let patch = attributes.get(root).cloned().unwrap_or_default();
            normalize_root_attributes(None, &patch, &schema)
        };

        for root in &session_roots {
            if !data.contains_key(root) {
                editor.detach_root(root)?;
                report.detached.push(root.clone());
            }
        }

        let mut modified = RootData::new();
        for (root, content) in data {
            if !session_roots.contains(root) {
                editor.add_root(
                    root,
                    AddRootOptions {
                        data: content.clone(),
                        attributes: normalized(root),
                        is_undoable: false,
                    },
                )?;
                self.remember(editor, root, content);
                report.added.push(root.clone());
                continue;
            }

            let current = editor.get_data(root)?;
            if !self.content_matches(editor.id(), root, content, &current) {
                modified.insert(root.clone(), content.clone());
            }
        }

        if !modified.is_empty() {
            editor.set_data(&modified)?;
            for (root, content) in &modified {
                self.remember(editor, root, content);
            }
            report.updated_data.extend(modified.keys().cloned());
        }

        for root in data.keys() {
            if report.added.contains(root) {
                continue;
            }
            let wanted = normalized(root);
            if editor.get_root_attributes(root)? != wanted {
                editor.set_root_attributes(root, &wanted)?;
                report.updated_attributes.push(root.clone());
            }
        }

        if !report.is_noop() {
            log::debug!(
                "Reconciled editor {}: +{} -{} data:{} attrs:{}",
                editor.id(),
                report.added.len(),
                report.detached.len(),
                report.updated_data.len(),
                report.updated_attributes.len()
            );
        }

        Ok(report)
    }

    /// Read the session's roots back into external shape.
    ///
    /// Roots already known keep their external order; roots new to the
    /// external state follow in session order. Attribute keys seen before
    /// for a root survive as `null`. Returns `None` when the result equals
    /// the current external state.
    pub fn mirror_from_session<E: Editor + ?Sized>(
        &self,
        editor: &E,
        data: &RootData,
        attributes: &RootsAttributes,
    ) -> Option<(RootData, RootsAttributes)> {
        let full = editor.get_full_data();

        let mut mirrored = RootData::with_capacity(full.len());
        for root in data.keys() {
            if let Some(content) = full.get(root) {
                mirrored.insert(root.clone(), content.clone());
            }
        }
        for (root, content) in &full {
            if !mirrored.contains_key(root) {
                mirrored.insert(root.clone(), content.clone());
            }
        }

        let mut mirrored_attributes = RootsAttributes::with_capacity(mirrored.len());
        for root in mirrored.keys() {
            let mut attrs: RootAttributes = match editor.get_root_attributes(root) {
                Ok(attrs) => attrs,
                Err(e) => {
                    log::warn!("Cannot read attributes of root {}: {}", root, e);
                    attributes.get(root).cloned().unwrap_or_default()
                }
            };
            if let Some(previous) = attributes.get(root) {
                for key in previous.keys() {
                    attrs.entry(key.clone()).or_insert(Value::Null);
                }
            }
            mirrored_attributes.insert(root.clone(), attrs);
        }
        fill_attribute_shape(&mut mirrored_attributes);

        let unchanged = mirrored.iter().eq(data.iter())
            && mirrored_attributes.iter().eq(attributes.iter());
        if unchanged {
            None
        } else {
            Some((mirrored, mirrored_attributes))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logos_core::EditorConfig;
    use logos_engine::YrsEditor;
    use serde_json::json;

    fn attrs(value: Value) -> RootAttributes {
        serde_json::from_value(value).unwrap()
    }

    fn sample() -> (RootData, RootsAttributes) {
        let mut data = RootData::new();
        data.insert("intro".into(), "<h2>Sample</h2>".into());
        data.insert("content".into(), "<p>Body</p>".into());

        let mut attributes = RootsAttributes::new();
        attributes.insert("intro".into(), attrs(json!({ "row": "1", "order": 10 })));
        attributes.insert("content".into(), attrs(json!({ "row": "1", "order": 20 })));
        (data, attributes)
    }

    fn editor() -> YrsEditor {
        let (data, attributes) = sample();
        YrsEditor::with_config(&EditorConfig::new(data, attributes)).unwrap()
    }

    #[test]
    fn test_matching_session_is_noop() {
        let (data, attributes) = sample();
        let editor = editor();
        let sync = RootSynchronizer::new();

        let report = sync.reconcile_from_external(&editor, &data, &attributes).unwrap();

        assert!(report.is_noop());
        assert_eq!(editor.stats().total_writes(), 0);
        assert!(sync.mirror_from_session(&editor, &data, &attributes).is_none());
    }

    #[test]
    fn test_empty_session_gets_every_root() {
        let (data, attributes) = sample();
        let editor = YrsEditor::with_config(&EditorConfig::default()).unwrap();
        let sync = RootSynchronizer::new();

        let report = sync.reconcile_from_external(&editor, &data, &attributes).unwrap();

        assert_eq!(report.added, vec!["intro", "content"]);
        assert_eq!(editor.root_names(), vec!["intro", "content"]);
        assert_eq!(editor.get_root_attributes("content").unwrap(), attributes["content"]);
        assert!(sync.mirror_from_session(&editor, &data, &attributes).is_none());
    }

    #[test]
    fn test_changed_roots_share_one_set_data() {
        let (mut data, attributes) = sample();
        let editor = editor();
        let sync = RootSynchronizer::new();

        data.insert("intro".into(), "New data".into());
        data.insert("content".into(), "Other".into());
        let report = sync.reconcile_from_external(&editor, &data, &attributes).unwrap();

        assert_eq!(report.updated_data, vec!["intro", "content"]);
        assert_eq!(editor.stats().set_data_calls, 1);
        assert_eq!(editor.get_data("intro").unwrap(), "<p>New data</p>");
    }

    #[test]
    fn test_second_pass_with_unnormalized_input_writes_nothing() {
        let (mut data, attributes) = sample();
        let editor = editor();
        let sync = RootSynchronizer::new();
        data.insert("intro".into(), "New data".into());

        sync.reconcile_from_external(&editor, &data, &attributes).unwrap();
        let writes = editor.stats().total_writes();
        let second = sync.reconcile_from_external(&editor, &data, &attributes).unwrap();

        assert!(second.is_noop());
        assert_eq!(editor.stats().total_writes(), writes);
    }

    #[test]
    fn test_removed_root_is_detached() {
        let (mut data, mut attributes) = sample();
        let editor = editor();
        let sync = RootSynchronizer::new();
        data.shift_remove("intro");
        attributes.shift_remove("intro");

        let report = sync.reconcile_from_external(&editor, &data, &attributes).unwrap();

        assert_eq!(report.detached, vec!["intro"]);
        assert_eq!(editor.root_names(), vec!["content"]);
    }

    #[test]
    fn test_mismatched_keys_leave_session_untouched() {
        let (mut data, attributes) = sample();
        let editor = editor();
        let sync = RootSynchronizer::new();
        data.shift_remove("intro");

        let err = sync.reconcile_from_external(&editor, &data, &attributes).unwrap_err();

        assert!(matches!(err, SyncError::Roots(_)));
        assert_eq!(editor.root_names().len(), 2);
        assert_eq!(editor.stats().total_writes(), 0);
    }

    #[test]
    fn test_empty_attributes_become_nulls() {
        let (data, mut attributes) = sample();
        let editor = editor();
        let sync = RootSynchronizer::new();
        attributes.insert("intro".into(), RootAttributes::new());

        sync.reconcile_from_external(&editor, &data, &attributes).unwrap();

        assert_eq!(
            editor.get_root_attributes("intro").unwrap(),
            attrs(json!({ "row": null, "order": null }))
        );
        let (_, mirrored) = sync.mirror_from_session(&editor, &data, &attributes).unwrap();
        assert_eq!(mirrored["intro"], attrs(json!({ "row": null, "order": null })));
    }

    #[test]
    fn test_new_attribute_key_spreads_to_all_roots() {
        let (data, mut attributes) = sample();
        let editor = editor();
        let sync = RootSynchronizer::new();
        attributes.insert("intro".into(), attrs(json!({ "foo": "bar", "order": 5 })));

        sync.reconcile_from_external(&editor, &data, &attributes).unwrap();
        let (_, mirrored) = sync.mirror_from_session(&editor, &data, &attributes).unwrap();

        assert_eq!(mirrored["intro"], attrs(json!({ "foo": "bar", "order": 5, "row": null })));
        assert_eq!(mirrored["content"]["foo"], Value::Null);
        assert_eq!(mirrored["content"]["order"], json!(20));
    }

    #[test]
    fn test_mirror_keeps_external_order_and_appends_new_roots() {
        let (data, attributes) = sample();
        let editor = editor();
        let sync = RootSynchronizer::new();

        editor.add_root("outro", AddRootOptions::default()).unwrap();
        let (mirrored, mirrored_attributes) =
            sync.mirror_from_session(&editor, &data, &attributes).unwrap();

        assert_eq!(mirrored.keys().collect::<Vec<_>>(), vec!["intro", "content", "outro"]);
        assert_eq!(mirrored["outro"], "");
        assert_eq!(mirrored_attributes["outro"], attrs(json!({ "row": null, "order": null })));
    }

    #[test]
    fn test_applying_flag_only_during_pass() {
        let (data, attributes) = sample();
        let editor = editor();
        let sync = std::sync::Arc::new(RootSynchronizer::new());

        let seen = std::sync::Arc::new(Mutex::new(Vec::new()));
        let (probe, sink) = (sync.clone(), seen.clone());
        editor.on(
            logos_core::EventKind::Change,
            std::sync::Arc::new(move |_: &logos_core::EditorEvent| {
                lock(&sink).push(probe.is_applying())
            }),
        );

        let mut changed = data.clone();
        changed.insert("intro".into(), "Changed".into());
        sync.reconcile_from_external(&editor, &changed, &attributes).unwrap();
        editor.set_data(&data).unwrap();

        assert_eq!(*lock(&seen), vec![true, false]);
        assert!(!sync.is_applying());
    }
}
