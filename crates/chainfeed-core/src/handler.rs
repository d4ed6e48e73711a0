//! The `FeedHandler` trait: the caller-facing contract every wire binding
//! implements.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::decode::Callback;
use crate::error::HandlerError;
use crate::feed::{Feed, SubscriptionId};

/// Which endpoint a handler talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    /// WebSocket connection to the cloud API.
    CloudApiWs,
    /// WebSocket connection to a self-hosted gateway.
    GatewayWs,
    /// gRPC connection to a self-hosted gateway.
    GatewayGrpc,
}

impl HandlerKind {
    pub fn is_cloud_api(self) -> bool {
        matches!(self, Self::CloudApiWs)
    }

    pub fn is_gateway(self) -> bool {
        matches!(self, Self::GatewayWs | Self::GatewayGrpc)
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CloudApiWs => write!(f, "cloud-api-ws"),
            Self::GatewayWs => write!(f, "gateway-ws"),
            Self::GatewayGrpc => write!(f, "gateway-grpc"),
        }
    }
}

/// Lifecycle of a handler's connection.
///
/// ```text
/// Disconnected → Connected → Reconnecting → Resubscribing → Connected
///                                 ↓
///                               Failed
/// any → Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Reconnecting,
    Resubscribing,
    /// Reconnection gave up or the connection died with reconnect disabled.
    Failed,
    /// `close` was called.
    Closed,
}

impl ConnectionState {
    /// `true` once the handler can never carry traffic again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Resubscribing => "resubscribing",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Subscribe, request, unsubscribe and close over one logical connection.
///
/// # Thread Safety
/// All methods may be called concurrently from many tasks.
///
/// # Object Safety
/// The trait is object-safe and can be stored as `Arc<dyn FeedHandler>`.
#[async_trait]
pub trait FeedHandler: Send + Sync + 'static {
    fn kind(&self) -> HandlerKind;

    /// Subscribe to `feed`. Returns once the server acknowledged (or
    /// refused) the subscription; notifications then arrive on `callback`
    /// in wire order.
    async fn subscribe(
        &self,
        feed: Feed,
        params: Value,
        callback: Callback,
    ) -> Result<(), HandlerError>;

    /// Send a request and wait for its result.
    async fn request(&self, method: &str, params: Value) -> Result<Value, HandlerError>;

    /// Unsubscribe from `feed`, retrying with backoff. Unsubscribing from a
    /// feed that is not subscribed succeeds without touching the wire.
    async fn unsubscribe_retry(&self, feed: &Feed) -> Result<(), HandlerError>;

    /// Stop the handler. Every later call fails with
    /// [`HandlerError::NotConnected`].
    async fn close(&self) -> Result<(), HandlerError>;

    /// The server-assigned id of the active subscription to `feed`, for
    /// bindings that have one.
    fn subscription_id(&self, _feed: &Feed) -> Option<SubscriptionId> {
        None
    }
}
