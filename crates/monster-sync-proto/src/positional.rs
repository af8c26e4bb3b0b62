//! Positional array encoding for entity snapshots.
//!
//! An entity is written as `[id, parts, ailments]` where `parts` and
//! `ailments` are arrays of `[index, value]` pairs. Floats are rounded to two
//! decimals before encoding; peers never need more precision and the shorter
//! literals shrink every frame.
//!
//! Used as a serde `with` module on `Vec<EntitySnapshot>` fields.

use monster_sync_core::{AilmentState, EntitySnapshot, PartState};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

type WireEntry = (u32, f32);

#[derive(Serialize, Deserialize)]
struct WireEntity(String, Vec<WireEntry>, Vec<WireEntry>);

/// Round to two decimal places.
#[must_use]
pub fn round2(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}

impl From<&EntitySnapshot> for WireEntity {
    fn from(s: &EntitySnapshot) -> Self {
        Self(
            s.id.clone(),
            s.parts.iter().map(|p| (p.index, round2(p.health))).collect(),
            s.ailments.iter().map(|a| (a.index, round2(a.buildup))).collect(),
        )
    }
}

impl From<WireEntity> for EntitySnapshot {
    fn from(WireEntity(id, parts, ailments): WireEntity) -> Self {
        Self {
            id,
            parts: parts.into_iter().map(|(i, h)| PartState::new(i, h)).collect(),
            ailments: ailments
                .into_iter()
                .map(|(i, b)| AilmentState::new(i, b))
                .collect(),
        }
    }
}

/// Serialize a list of snapshots positionally.
///
/// # Errors
///
/// Propagates serializer errors.
pub fn serialize<S: Serializer>(entities: &[EntitySnapshot], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(entities.iter().map(WireEntity::from))
}

/// Deserialize a positionally encoded list of snapshots.
///
/// # Errors
///
/// Fails if any entity is not a three-element array of the expected shape.
pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<EntitySnapshot>, D::Error> {
    let wire = Vec::<WireEntity>::deserialize(deserializer)?;
    Ok(wire.into_iter().map(EntitySnapshot::from).collect())
}

/// Encode a single snapshot as positional JSON text.
///
/// # Errors
///
/// Returns error if serialization fails.
pub fn to_json(entity: &EntitySnapshot) -> Result<String, serde_json::Error> {
    serde_json::to_string(&WireEntity::from(entity))
}

/// Decode a single snapshot from positional JSON text.
///
/// # Errors
///
/// Returns error if the text is not `[id, parts, ailments]`.
pub fn from_json(text: &str) -> Result<EntitySnapshot, serde_json::Error> {
    serde_json::from_str::<WireEntity>(text).map(EntitySnapshot::from)
}
