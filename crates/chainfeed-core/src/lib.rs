//! chainfeed-core: shared machinery for ChainFeed handlers.
//!
//! # Overview
//!
//! ChainFeed keeps one self-healing connection to a streaming RPC service,
//! multiplexes subscriptions and requests over it, and replays every
//! subscription after a reconnect. This crate holds the parts that do not
//! depend on the wire binding:
//!
//! - [`Transport`] / [`Connector`]: the duplex text channel and its dialer
//! - [`Correlator`]: pending requests keyed by correlation id
//! - [`SubscriptionRegistry`]: feed → subscription with id-based routing
//! - [`FeedHandler`]: the caller-facing contract both bindings implement
//! - [`DecoderRegistry`]: per-feed payload decoding
//! - [`policy`] module: exponential backoff with an elapsed ceiling
//! - [`Config`]: endpoints, credentials, timeouts

pub mod config;
pub mod correlator;
pub mod decode;
pub mod error;
pub mod feed;
pub mod handler;
pub mod models;
pub mod policy;
pub mod registry;
pub mod request;
pub mod transport;

pub use config::{client_version, init_client_version, Config, Timeouts};
pub use correlator::{Correlator, Outcome, PendingReply};
pub use decode::{Callback, DecoderRegistry};
pub use error::{ConfigError, HandlerError, TransportError};
pub use feed::{Feed, SubscriptionId};
pub use handler::{ConnectionState, FeedHandler, HandlerKind};
pub use models::Notification;
pub use registry::{Subscription, SubscriptionRegistry};
pub use request::{Inbound, JsonRpcRequest, RemoteError, RpcId};
pub use transport::{Connector, Endpoint, Transport};
