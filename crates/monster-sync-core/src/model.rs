//! Entity snapshot model.
//!
//! A snapshot captures everything a peer needs to render one monster: the
//! health of each body part and the buildup of each status ailment. Both
//! lists are keyed by a per-list `index` that is unique within a snapshot.

use serde::{Deserialize, Serialize};

/// Two float values closer than this are treated as unchanged.
///
/// Scan jitter on health and buildup values is well below one unit, so
/// anything smaller is not worth a network message.
pub const FLOAT_TOLERANCE: f32 = 0.9;

/// Tolerance-aware float comparison.
#[must_use]
pub fn approx_eq(a: f32, b: f32) -> bool {
    (a - b).abs() < FLOAT_TOLERANCE
}

/// A value addressed by an index inside a snapshot list.
pub trait IndexedValue: Copy {
    /// Position key of this value within its list.
    fn index(&self) -> u32;

    /// The tracked float value.
    fn value(&self) -> f32;

    /// Same index and a tolerance-equal value.
    fn same_as(&self, other: &Self) -> bool {
        self.index() == other.index() && approx_eq(self.value(), other.value())
    }
}

/// Health of a single monster body part.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PartState {
    /// Part index
    pub index: u32,
    /// Current health
    pub health: f32,
}

impl PartState {
    /// Create a new part state.
    #[must_use]
    pub fn new(index: u32, health: f32) -> Self {
        Self { index, health }
    }
}

impl IndexedValue for PartState {
    fn index(&self) -> u32 {
        self.index
    }

    fn value(&self) -> f32 {
        self.health
    }
}

/// Buildup of a single status ailment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AilmentState {
    /// Ailment index
    pub index: u32,
    /// Current buildup
    pub buildup: f32,
}

impl AilmentState {
    /// Create a new ailment state.
    #[must_use]
    pub fn new(index: u32, buildup: f32) -> Self {
        Self { index, buildup }
    }
}

impl IndexedValue for AilmentState {
    fn index(&self) -> u32 {
        self.index
    }

    fn value(&self) -> f32 {
        self.buildup
    }
}

/// Full or partial state of one entity.
///
/// A full snapshot lists every part and ailment; a diff lists only the
/// entries that changed since the last accepted snapshot for the same `id`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EntitySnapshot {
    /// Stable entity identity
    pub id: String,
    /// Body part health values
    pub parts: Vec<PartState>,
    /// Status ailment buildup values
    pub ailments: Vec<AilmentState>,
}

impl EntitySnapshot {
    /// Create an empty snapshot for the given entity.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parts: Vec::new(),
            ailments: Vec::new(),
        }
    }

    /// Append a part.
    #[must_use]
    pub fn with_part(mut self, index: u32, health: f32) -> Self {
        self.parts.push(PartState::new(index, health));
        self
    }

    /// Append an ailment.
    #[must_use]
    pub fn with_ailment(mut self, index: u32, buildup: f32) -> Self {
        self.ailments.push(AilmentState::new(index, buildup));
        self
    }

    /// Look up a part by index.
    #[must_use]
    pub fn part(&self, index: u32) -> Option<&PartState> {
        self.parts.iter().find(|p| p.index == index)
    }

    /// Look up an ailment by index.
    #[must_use]
    pub fn ailment(&self, index: u32) -> Option<&AilmentState> {
        self.ailments.iter().find(|a| a.index == index)
    }

    /// True if the snapshot carries neither parts nor ailments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty() && self.ailments.is_empty()
    }

    /// Change-detection equality: same id, same list shapes, and every
    /// float within [`FLOAT_TOLERANCE`].
    #[must_use]
    pub fn approx_eq(&self, other: &Self) -> bool {
        self.id == other.id
            && lists_match(&self.parts, &other.parts)
            && lists_match(&self.ailments, &other.ailments)
    }
}

fn lists_match<T: IndexedValue>(a: &[T], b: &[T]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_as(y))
}
