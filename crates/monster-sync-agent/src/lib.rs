//! # Monster-Sync Agent
//!
//! Keeps several game clients' view of a shared monster consistent through a
//! relay server. One client (the leader) pushes, the others (peers) poll a
//! local mirror.
//!
//! ## Architecture
//!
//! - [`SyncCoordinator`]: session lifecycle state machine and the host-facing
//!   handle
//! - [`OperationScheduler`]: runs the coordinator's asynchronous entry actions
//!   one at a time, cancelling the previous one first
//! - [`PushEngine`]: change detection, diffing and throttled sending
//! - [`PollEngine`]: merges inbound pushes into the mirror the host borrows
//!
//! ## Example
//!
//! ```no_run
//! # async fn run() -> anyhow::Result<()> {
//! use monster_sync_agent::{SyncConfig, SyncCoordinator, SyncMode};
//!
//! let coordinator = SyncCoordinator::from_config(&SyncConfig::from_env()?)?;
//! coordinator.set_session_id("c3@uTKeQR3Mp");
//! coordinator.set_mode(SyncMode::Poll);
//!
//! for (id, monster) in coordinator.borrow().iter() {
//!     println!("{id}: {} parts", monster.parts.len());
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod coordinator;
pub mod poll;
pub mod push;
pub mod scheduler;

pub use config::{PushConfig, SyncConfig, DEFAULT_SERVER_URL};
pub use coordinator::{State, SyncCoordinator, SyncMode, Trigger};
pub use poll::{Borrow, Mirror, PollEngine};
pub use push::{PushEngine, SendFailedHook};
pub use scheduler::{OperationScheduler, ScheduledAction};
