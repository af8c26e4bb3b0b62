//! Stateful diff generation.
//!
//! The engine remembers the last snapshot sent for every entity and turns
//! each new snapshot into the smallest delta a peer needs. Deltas are
//! index-aligned: entry `i` of the new list is compared with entry `i` of the
//! stored list, which is only sound while both lists have the same length.

use crate::merge::{IndexMerge, MergePolicy};
use crate::model::{EntitySnapshot, IndexedValue};
use std::collections::HashMap;

/// Per-entity "last sent" store producing minimal diffs.
#[derive(Debug, Default)]
pub struct DiffEngine {
    last_sent: HashMap<String, EntitySnapshot>,
}

impl DiffEngine {
    /// Create an empty diff engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute one diff per input snapshot.
    ///
    /// Unchanged entities yield a diff with empty parts and ailments; callers
    /// decide whether to send those.
    pub fn compute_diffs(&mut self, snapshots: &[EntitySnapshot]) -> Vec<EntitySnapshot> {
        snapshots.iter().map(|s| self.diff_one(s)).collect()
    }

    fn diff_one(&mut self, snapshot: &EntitySnapshot) -> EntitySnapshot {
        let Some(existing) = self.last_sent.get_mut(&snapshot.id) else {
            self.last_sent.insert(snapshot.id.clone(), snapshot.clone());
            return snapshot.clone();
        };

        if existing.parts.len() != snapshot.parts.len()
            || existing.ailments.len() != snapshot.ailments.len()
        {
            tracing::trace!(
                id = %snapshot.id,
                parts = snapshot.parts.len(),
                ailments = snapshot.ailments.len(),
                "List sizes changed, sending full snapshot"
            );
            *existing = snapshot.clone();
            return snapshot.clone();
        }

        let diff = EntitySnapshot {
            id: snapshot.id.clone(),
            parts: changed(&existing.parts, &snapshot.parts),
            ailments: changed(&existing.ailments, &snapshot.ailments),
        };
        IndexMerge.merge(existing, &diff);
        diff
    }

    /// Last accepted snapshot for an entity.
    #[must_use]
    pub fn last_sent(&self, id: &str) -> Option<&EntitySnapshot> {
        self.last_sent.get(id)
    }

    /// Number of tracked entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.last_sent.len()
    }

    /// True if nothing has been sent yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.last_sent.is_empty()
    }

    /// Forget all sent state; the next snapshot per id is sent in full.
    pub fn clear(&mut self) {
        self.last_sent.clear();
    }
}

fn changed<T: IndexedValue>(old: &[T], new: &[T]) -> Vec<T> {
    new.iter()
        .zip(old)
        .filter(|(n, o)| !n.same_as(o))
        .map(|(n, _)| *n)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PartState;

    fn monster(healths: &[f32]) -> EntitySnapshot {
        let mut s = EntitySnapshot::new("em_001");
        for (i, h) in (0u32..).zip(healths) {
            s = s.with_part(i, *h);
        }
        s
    }

    #[test]
    fn first_snapshot_is_sent_in_full() {
        let mut engine = DiffEngine::new();
        let snapshot = monster(&[100.0, 80.0]).with_ailment(0, 3.0);

        let diffs = engine.compute_diffs(&[snapshot.clone()]);

        assert_eq!(diffs, vec![snapshot]);
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn identical_input_yields_empty_diffs() {
        let mut engine = DiffEngine::new();
        let input = vec![
            monster(&[100.0, 80.0]).with_ailment(0, 3.0),
            EntitySnapshot::new("em_002").with_part(0, 50.0),
        ];

        engine.compute_diffs(&input);
        let second = engine.compute_diffs(&input);

        assert_eq!(second.len(), 2);
        assert!(second.iter().all(EntitySnapshot::is_empty));
        assert_eq!(second[0].id, "em_001");
        assert_eq!(second[1].id, "em_002");
    }

    #[test]
    fn only_changed_entries_are_sent() {
        let mut engine = DiffEngine::new();
        engine.compute_diffs(&[monster(&[100.0, 80.0, 60.0])]);

        let diffs = engine.compute_diffs(&[monster(&[100.4, 70.0, 60.0])]);

        assert_eq!(diffs[0].parts, vec![PartState::new(1, 70.0)]);
        assert!(diffs[0].ailments.is_empty());
    }

    #[test]
    fn stored_state_follows_accepted_diffs() {
        let mut engine = DiffEngine::new();
        engine.compute_diffs(&[monster(&[100.0, 80.0])]);
        engine.compute_diffs(&[monster(&[100.5, 70.0])]);

        // 100.5 was within tolerance, so the stored value stays at 100.
        let stored = engine.last_sent("em_001").unwrap();
        assert_eq!(stored.part(0).map(|p| p.health), Some(100.0));
        assert_eq!(stored.part(1).map(|p| p.health), Some(70.0));

        // Slow drift is caught once it exceeds tolerance against the stored value.
        let diffs = engine.compute_diffs(&[monster(&[99.0, 70.0])]);
        assert_eq!(diffs[0].parts, vec![PartState::new(0, 99.0)]);
    }

    #[test]
    fn size_change_falls_back_to_full_snapshot() {
        let mut engine = DiffEngine::new();
        engine.compute_diffs(&[monster(&[100.0, 80.0])]);

        let grown = monster(&[100.0, 80.0, 30.0]);
        let diffs = engine.compute_diffs(&[grown.clone()]);
        assert_eq!(diffs[0], grown);

        let shrunk = monster(&[100.0]);
        let diffs = engine.compute_diffs(&[shrunk.clone()]);
        assert_eq!(diffs[0], shrunk);
        assert_eq!(engine.last_sent("em_001"), Some(&shrunk));
    }

    #[test]
    fn clear_forces_full_resend() {
        let mut engine = DiffEngine::new();
        let snapshot = monster(&[100.0]);
        engine.compute_diffs(&[snapshot.clone()]);

        engine.clear();

        assert!(engine.is_empty());
        assert_eq!(engine.compute_diffs(&[snapshot.clone()]), vec![snapshot]);
    }

    #[test]
    fn count_churn_never_emits_misaligned_diffs() {
        let mut engine = DiffEngine::new();
        let mut mirror: Option<EntitySnapshot> = None;
        let sizes = [3usize, 3, 5, 5, 2, 2, 4, 1, 1, 6];

        for (step, size) in sizes.iter().enumerate() {
            #[allow(clippy::cast_precision_loss)]
            let healths: Vec<f32> = (0..*size).map(|i| (100 - step * 7 - i) as f32).collect();
            let snapshot = monster(&healths);
            let previous_len = engine.last_sent("em_001").map(|s| s.parts.len());

            let diff = engine.compute_diffs(&[snapshot.clone()]).remove(0);

            if previous_len != Some(*size) {
                assert_eq!(diff, snapshot, "step {step}: resize must resend in full");
            } else {
                assert!(diff.parts.len() <= *size);
            }

            match mirror.as_mut() {
                None => mirror = Some(diff),
                Some(m) => IndexMerge.merge(m, &diff),
            }

            let m = mirror.as_ref().unwrap();
            for part in &snapshot.parts {
                let mirrored = m.part(part.index).unwrap();
                assert!(part.same_as(mirrored), "step {step}: index {} diverged", part.index);
            }
        }
    }
}
