//! In-memory transport for handler tests. Every dial hands the test a
//! [`MockPeer`] playing the server side of that connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch, Mutex};

use chainfeed_core::error::TransportError;
use chainfeed_core::transport::{Connector, Endpoint, Transport};

use crate::transport::signalled;

pub(crate) struct MockConnector {
    peers: mpsc::UnboundedSender<MockPeer>,
    pub(crate) refuse: AtomicBool,
}

impl MockConnector {
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            peers,
            refuse: AtomicBool::new(false),
        });
        (connector, rx)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn Transport>, TransportError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Dial {
                url: endpoint.url.clone(),
                reason: "connection refused".into(),
            });
        }
        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        let transport = MockTransport {
            url: endpoint.url.clone(),
            inbound: Mutex::new(inbound),
            outbound,
            closed: watch::channel(false).0,
        };
        let _ = self.peers.send(MockPeer {
            to_client,
            from_client,
            headers: endpoint.headers.clone(),
        });
        Ok(Arc::new(transport))
    }
}

struct MockTransport {
    url: String,
    inbound: Mutex<mpsc::UnboundedReceiver<String>>,
    outbound: mpsc::UnboundedSender<String>,
    closed: watch::Sender<bool>,
}

#[async_trait]
impl Transport for MockTransport {
    fn send(&self, text: String) -> Result<(), TransportError> {
        if *self.closed.borrow() {
            return Err(TransportError::Closed);
        }
        self.outbound.send(text).map_err(|_| TransportError::Closed)
    }

    async fn recv(&self) -> Result<String, TransportError> {
        let mut closed = self.closed.subscribe();
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            _ = signalled(&mut closed) => Err(TransportError::Closed),
            msg = inbound.recv() => msg.ok_or(TransportError::Closed),
        }
    }

    fn close(&self) {
        self.closed.send_replace(true);
    }

    fn url(&self) -> &str {
        &self.url
    }
}

/// Server side of one mock connection.
pub(crate) struct MockPeer {
    to_client: mpsc::UnboundedSender<String>,
    from_client: mpsc::UnboundedReceiver<String>,
    pub(crate) headers: Vec<(String, String)>,
}

impl MockPeer {
    /// Next frame written by the client, parsed.
    pub(crate) async fn next_frame(&mut self) -> Value {
        let text = tokio::time::timeout(Duration::from_secs(5), self.from_client.recv())
            .await
            .expect("client wrote nothing")
            .expect("client side dropped");
        serde_json::from_str(&text).expect("client wrote invalid JSON")
    }

    /// A frame already written by the client, if any.
    pub(crate) fn try_frame(&mut self) -> Option<Value> {
        self.from_client
            .try_recv()
            .ok()
            .map(|text| serde_json::from_str(&text).expect("client wrote invalid JSON"))
    }

    pub(crate) fn send(&self, frame: Value) {
        let _ = self.to_client.send(frame.to_string());
    }

    pub(crate) fn reply(&self, request: &Value, result: Value) {
        self.send(json!({"jsonrpc": "2.0", "id": request["id"], "result": result}));
    }

    pub(crate) fn reply_error(&self, request: &Value, code: i64, message: &str, data: Value) {
        self.send(json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "error": {"code": code, "message": message, "data": data},
        }));
    }

    pub(crate) fn push(&self, subscription: &str, result: Value) {
        self.send(json!({
            "jsonrpc": "2.0",
            "method": "subscribe",
            "params": {"subscription": subscription, "result": result},
        }));
    }

    /// Drop the connection from the server side.
    pub(crate) fn hang_up(self) {}
}
