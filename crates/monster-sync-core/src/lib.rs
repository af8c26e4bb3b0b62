//! # Monster-Sync Core
//!
//! Entity model and change-tracking primitives shared by the leader and peer
//! sides of a sync session.
//!
//! This crate provides:
//! - Entity snapshots (per-part health, per-ailment buildup) with
//!   tolerance-aware equality
//! - A stateful diff engine producing minimal index-aligned deltas
//! - Pluggable merge policies used to fold partial snapshots into a mirror

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod diff;
pub mod merge;
pub mod model;

pub use diff::DiffEngine;
pub use merge::{merge_indexed, IndexMerge, MergePolicy};
pub use model::{approx_eq, AilmentState, EntitySnapshot, IndexedValue, PartState, FLOAT_TOLERANCE};
