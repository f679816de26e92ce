//! Root data model, key-set validation and attribute normalization.
//!
//! A multi-root session is described externally by two maps that must
//! always share the same keys:
//!
//! ```text
//! RootData        { intro: "<h2>…</h2>",   content: "<p>…</p>" }
//! RootsAttributes { intro: {row, order},   content: {row, order} }
//! ```
//!
//! Attribute maps are kept structurally complete: every attribute key known
//! for any root appears on every root, with `null` standing in for unset
//! values.

use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Name of a document fragment inside one editing session.
pub type RootId = String;

/// Serialized content per root, in rendering order.
pub type RootData = IndexMap<RootId, String>;

/// Attribute name → value for one root. `Value::Null` marks an unset key.
pub type RootAttributes = BTreeMap<String, Value>;

/// Attributes for every root, in rendering order.
pub type RootsAttributes = IndexMap<RootId, RootAttributes>;

/// Errors raised while validating root maps.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RootsError {
    #[error("`data` and `attributes` objects must have the same keys (roots); mismatched: {roots:?}")]
    KeySetMismatch { roots: Vec<RootId> },
}

/// One renderable editable surface, created per live root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditableDescriptor {
    pub root: RootId,
    /// Session that owns the surface. A replaced session gets new descriptors.
    pub editor_id: Uuid,
    /// Stable render key, minted when the root appears.
    pub key: Uuid,
}

impl EditableDescriptor {
    pub fn new(root: impl Into<RootId>, editor_id: Uuid) -> Self {
        Self {
            root: root.into(),
            editor_id,
            key: Uuid::new_v4(),
        }
    }
}

// ---------------------------------------------------------------
// Validator
// ---------------------------------------------------------------

/// Roots present in exactly one of the two maps.
///
/// Data-only roots come first (in data order), then attribute-only roots.
pub fn mismatched_roots(data: &RootData, attributes: &RootsAttributes) -> Vec<RootId> {
    let data_only = data.keys().filter(|root| !attributes.contains_key(*root));
    let attributes_only = attributes.keys().filter(|root| !data.contains_key(*root));

    data_only.chain(attributes_only).cloned().collect()
}

/// Whether both maps describe the same set of roots.
#[inline]
pub fn same_roots(data: &RootData, attributes: &RootsAttributes) -> bool {
    data.len() == attributes.len() && data.keys().all(|root| attributes.contains_key(root))
}

/// Check key-set equality, returning the offending roots on mismatch.
pub fn validate_roots(data: &RootData, attributes: &RootsAttributes) -> Result<(), RootsError> {
    if same_roots(data, attributes) {
        return Ok(());
    }

    Err(RootsError::KeySetMismatch {
        roots: mismatched_roots(data, attributes),
    })
}

// ---------------------------------------------------------------
// Normalizer
// ---------------------------------------------------------------

/// Every attribute key used by any root.
pub fn attribute_schema(attributes: &RootsAttributes) -> BTreeSet<String> {
    attributes
        .values()
        .flat_map(|attrs| attrs.keys().cloned())
        .collect()
}

/// Merge a requested patch over a root's existing attributes.
///
/// The result carries every key from `schema`, `existing` and `patch`.
/// Values come from `patch` only; anything it leaves out becomes `null`.
pub fn normalize_root_attributes(
    existing: Option<&RootAttributes>,
    patch: &RootAttributes,
    schema: &BTreeSet<String>,
) -> RootAttributes {
    let mut normalized: RootAttributes = schema
        .iter()
        .chain(existing.into_iter().flat_map(|attrs| attrs.keys()))
        .map(|key| (key.clone(), Value::Null))
        .collect();

    for (key, value) in patch {
        normalized.insert(key.clone(), value.clone());
    }

    normalized
}

/// Give every root the same attribute shape, filling gaps with `null`.
///
/// Returns `true` when any root was widened.
pub fn fill_attribute_shape(attributes: &mut RootsAttributes) -> bool {
    let schema = attribute_schema(attributes);
    let mut widened = false;

    for attrs in attributes.values_mut() {
        for key in &schema {
            if !attrs.contains_key(key) {
                attrs.insert(key.clone(), Value::Null);
                widened = true;
            }
        }
    }

    widened
}
