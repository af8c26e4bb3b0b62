//! # Monster-Sync Protocol
//!
//! Wire protocol definitions and endpoint scheme for session sync.
//!
//! ## Messages
//!
//! - `Push`: Batched entity snapshots or diffs from the session leader
//! - `SetSession` / `SetName` / `LeaveSession`: Session membership
//! - `ServerMsg` / `SessionState`: Server-originated notices and roster state
//!
//! Frames are JSON text objects with a `type` discriminator. Entities use a
//! compact positional encoding, see [`positional`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod endpoint;
pub mod messages;
pub mod positional;

pub use endpoint::{EndpointError, Endpoints};
pub use messages::{
    MessageError, NoticeLevel, PushSnapshots, ServerNotice, SessionMessage, SessionState,
    SetName, SetSession, REQUIRED_VERSION,
};
