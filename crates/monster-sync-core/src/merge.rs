//! Merge semantics for partial snapshots.
//!
//! Peers receive a mix of full snapshots and index-aligned diffs. Folding
//! them into a mirror must reconstruct the leader's state without the leader
//! ever resending unchanged entries.
//!
//! # Merge Rules
//!
//! | List | Strategy |
//! |------|----------|
//! | parts | per index: incoming wins, else existing, else absent |
//! | ailments | per index: incoming wins, else existing, else absent |
//!
//! Merging is idempotent: applying the same partial snapshot twice leaves
//! the mirror as applying it once.

use crate::model::{EntitySnapshot, IndexedValue};
use std::collections::BTreeMap;

/// Strategy used to fold an incoming snapshot into an existing one.
pub trait MergePolicy: Send + Sync {
    /// Merge `incoming` into `existing` in place.
    fn merge(&self, existing: &mut EntitySnapshot, incoming: &EntitySnapshot);
}

/// Default index-reconciling merge.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexMerge;

impl MergePolicy for IndexMerge {
    fn merge(&self, existing: &mut EntitySnapshot, incoming: &EntitySnapshot) {
        existing.id.clone_from(&incoming.id);
        existing.parts = merge_indexed(&existing.parts, &incoming.parts);
        existing.ailments = merge_indexed(&existing.ailments, &incoming.ailments);
    }
}

/// Reconcile two indexed lists.
///
/// The result is ordered by index and holds every index present in either
/// input, taking the incoming value where both have one.
#[must_use]
pub fn merge_indexed<T: IndexedValue>(existing: &[T], incoming: &[T]) -> Vec<T> {
    let mut by_index: BTreeMap<u32, T> = existing.iter().map(|v| (v.index(), *v)).collect();
    for value in incoming {
        by_index.insert(value.index(), *value);
    }
    by_index.into_values().collect()
}
