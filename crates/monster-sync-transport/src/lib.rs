//! # Monster-Sync Transport
//!
//! One logical duplex connection to the sync server, plus the HTTP version
//! probe that gates it.
//!
//! ## Layers
//!
//! - [`Connector`]: opens a raw link (WebSocket in production, in-memory in
//!   tests) and exposes it as a frame sink and a frame stream
//! - [`TransportClient`]: bounded connect-retry, framed send, background
//!   receive loop and idempotent close on top of any connector
//! - [`VersionFetcher`]: remote protocol version lookup
//!
//! `TransportClient` is not internally synchronized; owners share it behind
//! a single async mutex ([`SharedTransport`]).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod connector;
pub mod memory;
pub mod version;

pub use client::{RetryPolicy, SharedTransport, TransportClient, TransportError, TransportEvent};
pub use connector::{Connector, FrameSink, FrameStream, Link, WsConnector};
pub use memory::{MemoryConnector, ServerConn, ServerSender};
pub use version::{is_supported, HttpVersionFetcher, VersionError, VersionFetcher};
