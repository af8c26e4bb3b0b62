//! Link establishment.
//!
//! A [`Connector`] opens one raw duplex link and hands it back as a boxed
//! sink of outgoing text frames plus a boxed stream of incoming ones. Errors
//! on the stream are already classified: [`TransportError::Read`] is
//! recoverable, anything else ends the link.

use crate::client::TransportError;
use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use monster_sync_proto::Endpoints;
use std::pin::Pin;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

/// Outgoing half of a link.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Incoming half of a link.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// An open duplex link.
pub struct Link {
    /// Text frames to the server
    pub sink: FrameSink,
    /// Text frames from the server
    pub stream: FrameStream,
}

/// Opens links to the sync server.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Address this connector dials, for logging.
    fn endpoint(&self) -> &str;

    /// Open a single link. One call is one attempt.
    async fn connect(&self) -> Result<Link, TransportError>;
}

/// WebSocket connector.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    /// Connector for an explicit `ws://` or `wss://` URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Connector for the WebSocket endpoint of a server.
    #[must_use]
    pub fn from_endpoints(endpoints: &Endpoints) -> Self {
        Self::new(endpoints.websocket())
    }
}

#[async_trait]
impl Connector for WsConnector {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn connect(&self) -> Result<Link, TransportError> {
        let (ws, response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        tracing::debug!(url = %self.url, status = %response.status(), "WebSocket handshake complete");

        let (sink, stream) = ws.split();

        let sink = sink
            .with(|frame: String| future::ready(Ok::<_, WsError>(Message::Text(frame))))
            .sink_map_err(|e| TransportError::Send(e.to_string()));

        let stream = stream.filter_map(|item| future::ready(classify(item)));

        Ok(Link {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

/// Map a raw WebSocket item to a text frame, a classified error, or nothing.
fn classify(item: Result<Message, WsError>) -> Option<Result<String, TransportError>> {
    match item {
        Ok(Message::Text(text)) => Some(Ok(text.to_string())),
        Ok(Message::Binary(data)) => Some(
            String::from_utf8(data.to_vec())
                .map_err(|e| TransportError::Read(format!("binary frame is not UTF-8: {e}"))),
        ),
        Ok(Message::Close(frame)) => {
            let reason = frame.map_or_else(|| "no reason".to_string(), |f| f.reason.to_string());
            Some(Err(TransportError::Closed(format!("closed by server: {reason}"))))
        }
        // tungstenite answers pings on its own
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
        Err(e @ (WsError::Utf8 | WsError::Capacity(_))) => {
            Some(Err(TransportError::Read(e.to_string())))
        }
        Err(e) => Some(Err(TransportError::Closed(e.to_string()))),
    }
}
