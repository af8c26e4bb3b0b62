//! In-process connector.
//!
//! Every successful [`MemoryConnector::connect`] hands the far end of the new
//! link to whoever holds the accept receiver, as a [`ServerConn`]. Useful for
//! embedding hosts that relay frames themselves and for exercising the
//! transport without a network.

use crate::client::TransportError;
use crate::connector::{Connector, Link};
use async_trait::async_trait;
use futures::channel::mpsc as link_channel;
use futures::{SinkExt, StreamExt};
use monster_sync_proto::SessionMessage;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Connector producing in-memory links.
pub struct MemoryConnector {
    endpoint: String,
    accept: mpsc::UnboundedSender<ServerConn>,
    refusing: AtomicBool,
    attempts: AtomicU32,
}

impl MemoryConnector {
    /// Create a connector and the receiver of its server ends.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerConn>) {
        let (accept, incoming) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            endpoint: endpoint.into(),
            accept,
            refusing: AtomicBool::new(false),
            attempts: AtomicU32::new(0),
        });
        (connector, incoming)
    }

    /// Make subsequent connect attempts fail (or succeed again).
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::Release);
    }

    /// Connect attempts made so far, successful or not.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn connect(&self) -> Result<Link, TransportError> {
        self.attempts.fetch_add(1, Ordering::AcqRel);
        if self.refusing.load(Ordering::Acquire) {
            return Err(TransportError::Connect("connection refused".to_string()));
        }

        let (to_server, inbound) = link_channel::unbounded::<String>();
        let (outbound, from_server) = link_channel::unbounded::<Result<String, TransportError>>();

        self.accept
            .send(ServerConn {
                inbound,
                sender: ServerSender { outbound },
            })
            .map_err(|_| TransportError::Connect("no listener".to_string()))?;

        Ok(Link {
            sink: Box::pin(to_server.sink_map_err(|e| TransportError::Send(e.to_string()))),
            stream: Box::pin(from_server),
        })
    }
}

/// Server end of an in-memory link. Dropping it ends the client's stream.
pub struct ServerConn {
    inbound: link_channel::UnboundedReceiver<String>,
    sender: ServerSender,
}

/// Cloneable sending half of a [`ServerConn`].
#[derive(Clone)]
pub struct ServerSender {
    outbound: link_channel::UnboundedSender<Result<String, TransportError>>,
}

impl ServerConn {
    /// Next raw frame from the client, `None` once the client closed.
    pub async fn recv_raw(&mut self) -> Option<String> {
        self.inbound.next().await
    }

    /// Next decodable message from the client. Undecodable frames are skipped.
    pub async fn recv(&mut self) -> Option<SessionMessage> {
        loop {
            let frame = self.recv_raw().await?;
            match SessionMessage::from_json(&frame) {
                Ok(message) => return Some(message),
                Err(e) => tracing::warn!(error = %e, "Server end skipping frame"),
            }
        }
    }

    /// Handle for sending to the client from elsewhere.
    #[must_use]
    pub fn sender(&self) -> ServerSender {
        self.sender.clone()
    }

    /// See [`ServerSender::send_raw`].
    pub fn send_raw(&self, frame: impl Into<String>) -> bool {
        self.sender.send_raw(frame)
    }

    /// See [`ServerSender::send`].
    pub fn send(&self, message: &SessionMessage) -> bool {
        self.sender.send(message)
    }

    /// See [`ServerSender::fail`].
    pub fn fail(&self, error: TransportError) -> bool {
        self.sender.fail(error)
    }
}

impl ServerSender {
    /// Deliver a raw frame to the client. Returns false if the client is gone.
    pub fn send_raw(&self, frame: impl Into<String>) -> bool {
        self.outbound.unbounded_send(Ok(frame.into())).is_ok()
    }

    /// Deliver a message to the client. Returns false if the client is gone.
    pub fn send(&self, message: &SessionMessage) -> bool {
        match message.to_json() {
            Ok(frame) => self.send_raw(frame),
            Err(e) => {
                tracing::warn!(error = %e, "Server end failed to encode message");
                false
            }
        }
    }

    /// Inject a receive error on the client side.
    pub fn fail(&self, error: TransportError) -> bool {
        self.outbound.unbounded_send(Err(error)).is_ok()
    }
}
