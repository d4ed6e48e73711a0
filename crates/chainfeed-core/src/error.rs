//! Transport-level and handler-level error types.

use std::time::Duration;

use thiserror::Error;

use crate::feed::Feed;
use crate::request::RemoteError;

/// Errors raised by a [`Transport`](crate::transport::Transport) or its dialer.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The connection is closed (by either side) and can no longer be used.
    #[error("connection closed")]
    Closed,

    /// Dialing the endpoint failed.
    #[error("failed to dial {url}: {reason}")]
    Dial { url: String, reason: String },

    /// The socket failed underneath an established connection (I/O error,
    /// reset without a closing handshake).
    #[error("connection reset: {0}")]
    Reset(String),

    /// WebSocket protocol error that leaves the socket usable.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// gRPC channel or stream error.
    #[error("gRPC error: {0}")]
    Grpc(String),

    /// The outbound queue overflowed; the connection was closed.
    #[error("outbound queue full, connection closed")]
    QueueFull,
}

impl TransportError {
    /// Returns `true` for the "connection is gone" family of errors that
    /// should trigger a reconnect.
    pub fn is_closed(&self) -> bool {
        match self {
            Self::Closed | Self::QueueFull | Self::Reset(_) => true,
            Self::WebSocket(_) | Self::Grpc(_) | Self::Dial { .. } => false,
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("either a cloud API URL or a gateway URL must be provided")]
    NoEndpoint,

    #[error("either an auth header or an account id and secret must be provided")]
    NoCredentials,

    #[error("invalid endpoint URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to read config {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse config {path}: {reason}")]
    Parse { path: String, reason: String },
}

/// Errors surfaced to callers of a [`FeedHandler`](crate::handler::FeedHandler).
#[derive(Debug, Error)]
pub enum HandlerError {
    /// No transport is attached: not yet connected, reconnecting, or closed.
    #[error("connection not established")]
    NotConnected,

    /// A subscription to this feed is already active or pending.
    #[error("already subscribed to {feed}")]
    AlreadySubscribed { feed: Feed },

    /// The feed is not currently subscribed.
    #[error("feed {feed} not subscribed")]
    NotSubscribed { feed: Feed },

    /// The server answered with a structured error.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// No reply arrived within the wait ceiling.
    #[error("no response for {what} within {after:?}")]
    Timeout { what: String, after: Duration },

    /// A notification payload did not match the feed's shape.
    #[error("failed to decode {feed} notification: {source}")]
    Decode {
        feed: Feed,
        #[source]
        source: serde_json::Error,
    },

    /// The pending operation was dropped without a reply (e.g. the
    /// connection was lost while waiting).
    #[error("no response")]
    NoResponse,

    /// The reply did not have the expected shape.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    /// Reconnection gave up after its elapsed-time ceiling.
    #[error("reconnect failed after {elapsed:?}: {source}")]
    ReconnectFailed {
        elapsed: Duration,
        #[source]
        source: TransportError,
    },

    /// Transport failure not recovered by reconnection.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The feed or method is not available on this handler.
    #[error("{0} is not supported")]
    Unsupported(String),

    /// Caller-supplied parameters were rejected before sending.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// Params could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl HandlerError {
    /// Returns `true` if retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::NoResponse | Self::Transport(_)
        )
    }
}
