//! WebSocket [`Transport`] over tokio-tungstenite.
//!
//! Writes go through a bounded queue drained by a dedicated writer task, so
//! a caller never waits on socket I/O. When the queue is full the
//! connection is closed rather than buffered further.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use chainfeed_core::config::Config;
use chainfeed_core::error::TransportError;
use chainfeed_core::transport::{Connector, Endpoint, Transport};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Dial settings for [`WsTransport`].
#[derive(Debug, Clone)]
pub struct WsConnector {
    pub handshake_timeout: Duration,
    pub queue_capacity: usize,
    pub max_message_size: usize,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(15),
            queue_capacity: 1000,
            max_message_size: 15 * 1024 * 1024,
        }
    }
}

impl WsConnector {
    pub fn from_config(config: &Config) -> Self {
        Self {
            handshake_timeout: config.timeouts.handshake,
            queue_capacity: config.outbound_queue_capacity.max(1),
            max_message_size: config.max_message_size,
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn Transport>, TransportError> {
        let transport = WsTransport::connect(endpoint, self).await?;
        Ok(Arc::new(transport))
    }
}

/// A connected WebSocket.
pub struct WsTransport {
    url: String,
    outbound: mpsc::Sender<Message>,
    inbound: Mutex<SplitStream<WsStream>>,
    closed: Arc<watch::Sender<bool>>,
}

impl WsTransport {
    /// Dial `endpoint`, presenting its headers in the handshake.
    pub async fn connect(
        endpoint: &Endpoint,
        settings: &WsConnector,
    ) -> Result<Self, TransportError> {
        let dial_err = |reason: String| TransportError::Dial {
            url: endpoint.url.clone(),
            reason,
        };

        let mut request = endpoint
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| dial_err(e.to_string()))?;
        for (name, value) in &endpoint.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| dial_err(format!("header {name}: {e}")))?;
            let value =
                HeaderValue::from_str(value).map_err(|e| dial_err(format!("header {name}: {e}")))?;
            request.headers_mut().insert(name, value);
        }

        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(settings.max_message_size);
        ws_config.max_frame_size = Some(settings.max_message_size);

        let dial = tokio_tungstenite::connect_async_with_config(request, Some(ws_config), false);
        let (stream, _) = tokio::time::timeout(settings.handshake_timeout, dial)
            .await
            .map_err(|_| dial_err(format!("handshake timed out after {:?}", settings.handshake_timeout)))?
            .map_err(|e| dial_err(e.to_string()))?;

        let (sink, stream) = stream.split();
        let (outbound, queue) = mpsc::channel(settings.queue_capacity);
        let closed = Arc::new(watch::channel(false).0);

        tokio::spawn(writer_task(sink, queue, closed.clone(), endpoint.url.clone()));

        Ok(Self {
            url: endpoint.url.clone(),
            outbound,
            inbound: Mutex::new(stream),
            closed,
        })
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

#[async_trait]
impl Transport for WsTransport {
    fn send(&self, text: String) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        match self.outbound.try_send(Message::Text(text)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(url = %self.url, "outbound queue full, closing connection");
                self.close();
                Err(TransportError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(TransportError::Closed),
        }
    }

    async fn recv(&self) -> Result<String, TransportError> {
        let mut closed = self.closed.subscribe();
        let mut stream = self.inbound.lock().await;
        loop {
            let msg = tokio::select! {
                _ = signalled(&mut closed) => return Err(TransportError::Closed),
                msg = stream.next() => msg,
            };
            match msg {
                None | Some(Ok(Message::Close(_))) => {
                    self.closed.send_replace(true);
                    return Err(TransportError::Closed);
                }
                Some(Err(e)) => {
                    self.closed.send_replace(true);
                    return Err(classify(e));
                }
                Some(Ok(Message::Text(text))) => return Ok(text),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => return Ok(text),
                    Err(_) => tracing::debug!(url = %self.url, "dropping non-UTF-8 binary frame"),
                },
                // Pings are answered by tungstenite itself.
                Some(Ok(_)) => {}
            }
        }
    }

    fn close(&self) {
        self.closed.send_replace(true);
    }

    fn url(&self) -> &str {
        &self.url
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.closed.send_replace(true);
    }
}

/// Map a read error to the transport taxonomy. Only errors that mean the
/// socket is gone land in the closed family.
fn classify(e: WsError) -> TransportError {
    match e {
        WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Closed,
        WsError::Io(_) | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            TransportError::Reset(e.to_string())
        }
        other => TransportError::WebSocket(other.to_string()),
    }
}

/// Resolves once the flag is `true` (or its sender is gone).
pub(crate) async fn signalled(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn writer_task(
    mut sink: SplitSink<WsStream, Message>,
    mut queue: mpsc::Receiver<Message>,
    closed: Arc<watch::Sender<bool>>,
    url: String,
) {
    let mut closed_rx = closed.subscribe();
    loop {
        tokio::select! {
            _ = signalled(&mut closed_rx) => break,
            msg = queue.recv() => {
                let Some(msg) = msg else { break };
                if let Err(e) = sink.send(msg).await {
                    tracing::debug!(url = %url, error = %e, "WS write failed");
                    closed.send_replace(true);
                    return;
                }
            }
        }
    }
    // Flush what was queued before the close (e.g. a final unsubscribe),
    // then say goodbye. Best effort: the peer may already be gone.
    let flush = async {
        while let Ok(msg) = queue.try_recv() {
            if sink.send(msg).await.is_err() {
                return;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
        let _ = sink.close().await;
    };
    let _ = tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, flush).await;
}

#[cfg(test)]
mod tests {
    use std::io;

    use tokio_tungstenite::tungstenite::error::CapacityError;

    use super::*;

    #[test]
    fn read_errors_are_classified_by_kind() {
        assert!(matches!(classify(WsError::ConnectionClosed), TransportError::Closed));
        assert!(matches!(classify(WsError::AlreadyClosed), TransportError::Closed));

        let reset = classify(WsError::Io(io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(matches!(reset, TransportError::Reset(_)));
        assert!(reset.is_closed());
        let abrupt = classify(WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake));
        assert!(abrupt.is_closed());

        let oversized = classify(WsError::Capacity(CapacityError::TooManyHeaders));
        assert!(matches!(oversized, TransportError::WebSocket(_)));
        assert!(!oversized.is_closed());
    }
}
