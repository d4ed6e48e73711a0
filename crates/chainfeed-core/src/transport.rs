//! The `Transport` and `Connector` traits: the duplex text channel a
//! handler multiplexes over, and the dialer that produces it.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TransportError;

/// Where to dial and which headers to present during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl Endpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// A connected duplex channel carrying whole text messages.
///
/// # Thread Safety
/// Implementations must be `Send + Sync`; `send` and `close` may be called
/// from any task while one reader task is parked in `recv`.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Queue one message for writing. Never blocks; fails once the
    /// connection is closed or the outbound queue overflows.
    fn send(&self, text: String) -> Result<(), TransportError>;

    /// Read the next text message. Only one caller at a time.
    async fn recv(&self) -> Result<String, TransportError>;

    /// Close the connection. Idempotent; a parked `recv` returns
    /// [`TransportError::Closed`].
    fn close(&self);

    /// The URL this transport is connected to.
    fn url(&self) -> &str;
}

/// Dials an [`Endpoint`].
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn Transport>, TransportError>;
}
