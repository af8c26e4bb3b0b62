//! Reconnecting transport client.
//!
//! Owns at most one live link at a time. Incoming frames are decoded on a
//! background task and delivered as [`TransportEvent`]s; a link that dies is
//! reported once via [`TransportEvent::ConnectionError`] and is not redialed
//! here. Reconnect policy belongs to the caller.

use crate::connector::{Connector, FrameSink, FrameStream, Link};
use futures::{SinkExt, StreamExt};
use monster_sync_proto::SessionMessage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Pause after a recoverable receive error.
pub const READ_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on a graceful close handshake.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Client shared between the coordinator and the push loop.
pub type SharedTransport = Arc<tokio::sync::Mutex<TransportClient>>;

/// Connect retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total connect attempts before giving up
    pub max_attempts: u32,
    /// Pause between attempts
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// Notifications from the receive loop.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A decoded message from the server
    Message(SessionMessage),
    /// The link failed and is no longer usable
    ConnectionError(TransportError),
}

/// Transport errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// A single dial attempt failed
    #[error("connect error: {0}")]
    Connect(String),
    /// Every dial attempt failed
    #[error("connection failed after {attempts} attempts")]
    ConnectFailed {
        /// Attempts made
        attempts: u32,
    },
    /// No live link
    #[error("not connected")]
    NotConnected,
    /// Writing a frame failed
    #[error("send error: {0}")]
    Send(String),
    /// Recoverable receive error
    #[error("read error: {0}")]
    Read(String),
    /// The link is gone
    #[error("connection closed: {0}")]
    Closed(String),
    /// Message could not be encoded
    #[error("encode error: {0}")]
    Encode(String),
    /// The caller's token was cancelled
    #[error("operation cancelled")]
    Cancelled,
}

impl TransportError {
    /// Whether the error ends the link.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Read(_))
    }
}

struct ActiveLink {
    sink: FrameSink,
    alive: Arc<AtomicBool>,
    shutdown: CancellationToken,
    receiver: JoinHandle<()>,
}

/// Duplex client over a [`Connector`].
pub struct TransportClient {
    connector: Arc<dyn Connector>,
    retry: RetryPolicy,
    events: mpsc::UnboundedSender<TransportEvent>,
    link: Option<ActiveLink>,
}

impl TransportClient {
    /// Create a disconnected client that reports to `events`.
    #[must_use]
    pub fn new(
        connector: Arc<dyn Connector>,
        retry: RetryPolicy,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        Self {
            connector,
            retry,
            events,
            link: None,
        }
    }

    /// Wrap in the shared handle.
    #[must_use]
    pub fn shared(self) -> SharedTransport {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    /// Address of the underlying connector.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        self.connector.endpoint()
    }

    /// True while a link is open and its receive loop has not failed.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.link
            .as_ref()
            .is_some_and(|l| l.alive.load(Ordering::Acquire))
    }

    /// Ensure a live link.
    ///
    /// Returns `true` if a new link was opened and `false` if one was
    /// already live. Makes at most `max_attempts` dial attempts with
    /// `retry_delay` between them.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectFailed`] when every attempt failed and
    /// [`TransportError::Cancelled`] if `token` fires first.
    pub async fn connect(&mut self, token: &CancellationToken) -> Result<bool, TransportError> {
        if self.is_connected() {
            return Ok(false);
        }
        // Drop a dead link before dialing again.
        self.close().await;

        let max = self.retry.max_attempts;
        for attempt in 1..=max {
            let result = tokio::select! {
                biased;
                () = token.cancelled() => return Err(TransportError::Cancelled),
                result = self.connector.connect() => result,
            };

            match result {
                Ok(link) => {
                    self.attach(link);
                    tracing::info!(endpoint = %self.endpoint(), attempt, "Connected");
                    return Ok(true);
                }
                Err(e) => {
                    tracing::warn!(
                        endpoint = %self.endpoint(),
                        attempt,
                        max_attempts = max,
                        error = %e,
                        "Connection attempt failed"
                    );
                }
            }

            if attempt < max {
                tokio::select! {
                    biased;
                    () = token.cancelled() => return Err(TransportError::Cancelled),
                    () = tokio::time::sleep(self.retry.retry_delay) => {}
                }
            }
        }

        Err(TransportError::ConnectFailed { attempts: max })
    }

    /// Send one message as a text frame.
    ///
    /// # Errors
    ///
    /// Returns error if there is no live link, encoding or writing fails, or
    /// `token` is cancelled first. A failed write marks the link dead.
    pub async fn send(
        &mut self,
        message: &SessionMessage,
        token: &CancellationToken,
    ) -> Result<(), TransportError> {
        let link = match self.link.as_mut() {
            Some(link) if link.alive.load(Ordering::Acquire) => link,
            _ => return Err(TransportError::NotConnected),
        };

        let frame = message
            .to_json()
            .map_err(|e| TransportError::Encode(e.to_string()))?;

        let result = tokio::select! {
            biased;
            () = token.cancelled() => return Err(TransportError::Cancelled),
            result = link.sink.send(frame) => result,
        };

        match &result {
            Ok(()) => tracing::trace!(kind = message.kind(), "Sent message"),
            Err(e) => {
                tracing::warn!(kind = message.kind(), error = %e, "Send failed");
                link.alive.store(false, Ordering::Release);
            }
        }
        result
    }

    /// Close the link if any. Safe to call repeatedly.
    pub async fn close(&mut self) {
        let Some(mut link) = self.link.take() else {
            return;
        };

        link.shutdown.cancel();
        if let Err(e) = (&mut link.receiver).await {
            if e.is_panic() {
                tracing::error!(error = %e, "Receive loop panicked");
            }
        }

        if link.alive.load(Ordering::Acquire) {
            match tokio::time::timeout(CLOSE_TIMEOUT, link.sink.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(error = %e, "Close handshake failed"),
                Err(_) => tracing::debug!("Close handshake timed out"),
            }
        }

        tracing::info!(endpoint = %self.endpoint(), "Disconnected");
    }

    fn attach(&mut self, link: Link) {
        let alive = Arc::new(AtomicBool::new(true));
        let shutdown = CancellationToken::new();
        let receiver = tokio::spawn(receive_loop(
            link.stream,
            self.events.clone(),
            Arc::clone(&alive),
            shutdown.clone(),
        ));

        self.link = Some(ActiveLink {
            sink: link.sink,
            alive,
            shutdown,
            receiver,
        });
    }
}

async fn receive_loop(
    mut stream: FrameStream,
    events: mpsc::UnboundedSender<TransportEvent>,
    alive: Arc<AtomicBool>,
    shutdown: CancellationToken,
) {
    tracing::debug!("Receive loop started");

    loop {
        let item = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            item = stream.next() => item,
        };

        let error = match item {
            Some(Ok(frame)) => {
                match SessionMessage::from_json(&frame) {
                    Ok(message) => {
                        tracing::trace!(kind = message.kind(), "Received message");
                        if events.send(TransportEvent::Message(message)).is_err() {
                            tracing::debug!("Event receiver dropped");
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "Dropping undecodable frame"),
                }
                continue;
            }
            Some(Err(e)) if !e.is_fatal() => {
                tracing::warn!(error = %e, "Receive error, retrying");
                tokio::select! {
                    biased;
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(READ_RETRY_DELAY) => continue,
                }
            }
            Some(Err(e)) => e,
            None => TransportError::Closed("stream ended".to_string()),
        };

        alive.store(false, Ordering::Release);
        tracing::warn!(error = %error, "Connection lost");
        let _ = events.send(TransportEvent::ConnectionError(error));
        break;
    }

    tracing::debug!("Receive loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryConnector;
    use monster_sync_proto::{SessionState, SetName};

    fn client(
        connector: Arc<MemoryConnector>,
        max_attempts: u32,
    ) -> (TransportClient, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let retry = RetryPolicy {
            max_attempts,
            retry_delay: Duration::from_secs(2),
        };
        (TransportClient::new(connector, retry, tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn connect_gives_up_after_exactly_max_attempts() {
        let (connector, _accept) = MemoryConnector::new("mem://refused");
        connector.set_refusing(true);
        let (mut client, _events) = client(Arc::clone(&connector), 3);

        let started = tokio::time::Instant::now();
        let result = client.connect(&CancellationToken::new()).await;

        assert!(matches!(result, Err(TransportError::ConnectFailed { attempts: 3 })));
        assert_eq!(connector.attempts(), 3);
        // Two pauses between three attempts, none after the last.
        assert_eq!(started.elapsed(), Duration::from_secs(4));
        assert!(!client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_connect_stops_retrying() {
        let (connector, _accept) = MemoryConnector::new("mem://refused");
        connector.set_refusing(true);
        let (mut client, _events) = client(Arc::clone(&connector), 10);

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            canceller.cancel();
        });

        let result = client.connect(&token).await;

        assert!(matches!(result, Err(TransportError::Cancelled)));
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test]
    async fn second_connect_reuses_live_link() {
        let (connector, mut accept) = MemoryConnector::new("mem://server");
        let (mut client, _events) = client(Arc::clone(&connector), 1);
        let token = CancellationToken::new();

        assert!(tokio_test::assert_ok!(client.connect(&token).await));
        let _server = accept.recv().await.unwrap();
        assert!(!tokio_test::assert_ok!(client.connect(&token).await));
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test]
    async fn frames_flow_both_ways() {
        let (connector, mut accept) = MemoryConnector::new("mem://server");
        let (mut client, mut events) = client(connector, 1);
        let token = CancellationToken::new();

        client.connect(&token).await.unwrap();
        let mut server = accept.recv().await.unwrap();

        let hello = SessionMessage::from(SetName {
            name: "Hunter".to_string(),
        });
        client.send(&hello, &token).await.unwrap();
        assert_eq!(server.recv().await, Some(hello));

        server.send_raw("not json");
        let state = SessionMessage::SessionState(SessionState {
            players_count: 2,
            leader_connected: true,
        });
        server.send(&state);

        // The undecodable frame is dropped; the next one arrives.
        match events.recv().await {
            Some(TransportEvent::Message(m)) => assert_eq!(m, state),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn recoverable_read_errors_do_not_end_the_link() {
        let (connector, mut accept) = MemoryConnector::new("mem://server");
        let (mut client, mut events) = client(connector, 1);

        client.connect(&CancellationToken::new()).await.unwrap();
        let server = accept.recv().await.unwrap();

        server.fail(TransportError::Read("bad frame".to_string()));
        server.send(&SessionMessage::LeaveSession);

        assert!(matches!(
            events.recv().await,
            Some(TransportEvent::Message(SessionMessage::LeaveSession))
        ));
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn dropped_server_reports_one_connection_error() {
        let (connector, mut accept) = MemoryConnector::new("mem://server");
        let (mut client, mut events) = client(connector, 1);

        client.connect(&CancellationToken::new()).await.unwrap();
        drop(accept.recv().await.unwrap());

        assert!(matches!(
            events.recv().await,
            Some(TransportEvent::ConnectionError(TransportError::Closed(_)))
        ));
        assert!(!client.is_connected());
        assert!(matches!(
            client
                .send(&SessionMessage::LeaveSession, &CancellationToken::new())
                .await,
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_silent() {
        let (connector, mut accept) = MemoryConnector::new("mem://server");
        let (mut client, mut events) = client(connector, 1);

        client.connect(&CancellationToken::new()).await.unwrap();
        let _server = accept.recv().await.unwrap();

        client.close().await;
        client.close().await;

        assert!(!client.is_connected());
        assert!(events.try_recv().is_err());
    }
}
