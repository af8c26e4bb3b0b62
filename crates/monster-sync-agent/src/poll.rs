//! Peer-side mirror of the leader's entities.
//!
//! The engine merges whatever it is handed. Deciding which pushes belong to
//! this peer (poll mode, matching session) is the coordinator's job, and it
//! clears the mirror when the peer leaves poll mode or the session.

use monster_sync_core::{EntitySnapshot, IndexMerge, MergePolicy};
use monster_sync_proto::PushSnapshots;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Mirrored entities by id.
pub type Mirror = HashMap<String, EntitySnapshot>;

/// Merges inbound pushes into a local mirror the host polls.
pub struct PollEngine {
    mirror: Mutex<Mirror>,
    policy: Box<dyn MergePolicy>,
}

impl Default for PollEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PollEngine {
    /// Empty mirror merging with [`IndexMerge`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_policy(IndexMerge)
    }

    /// Empty mirror merging with a custom policy.
    #[must_use]
    pub fn with_policy(policy: impl MergePolicy + 'static) -> Self {
        Self {
            mirror: Mutex::new(Mirror::new()),
            policy: Box::new(policy),
        }
    }

    /// Fold a push into the mirror. Returns the number of entities merged.
    pub fn handle_inbound(&self, push: &PushSnapshots) -> usize {
        let mut mirror = self.lock();
        for incoming in &push.entities {
            match mirror.get_mut(&incoming.id) {
                Some(existing) => self.policy.merge(existing, incoming),
                None => {
                    mirror.insert(incoming.id.clone(), incoming.clone());
                }
            }
        }

        tracing::trace!(
            session_id = %push.session_id,
            entities = push.entities.len(),
            mirrored = mirror.len(),
            "Merged push"
        );
        push.entities.len()
    }

    /// Take exclusive access to the mirror until the guard is dropped.
    pub fn borrow(&self) -> Borrow<'_> {
        Borrow { guard: self.lock() }
    }

    /// Drop every mirrored entity.
    pub fn clear(&self) {
        let mut mirror = self.lock();
        if !mirror.is_empty() {
            tracing::debug!(entities = mirror.len(), "Mirror cleared");
            mirror.clear();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Mirror> {
        self.mirror.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive view of the mirror.
///
/// Entries may be read or removed. Inbound merges wait until the borrow is
/// released, so hold it briefly.
pub struct Borrow<'a> {
    guard: MutexGuard<'a, Mirror>,
}

impl Borrow<'_> {
    /// Release the mirror explicitly.
    pub fn release(self) {}
}

impl Deref for Borrow<'_> {
    type Target = Mirror;

    fn deref(&self) -> &Mirror {
        &self.guard
    }
}

impl DerefMut for Borrow<'_> {
    fn deref_mut(&mut self) -> &mut Mirror {
        &mut self.guard
    }
}
