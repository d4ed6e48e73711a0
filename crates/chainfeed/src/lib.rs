//! chainfeed: subscribe to blockchain feeds and send requests over one
//! self-healing connection.
//!
//! [`Client`] picks the wire binding from the configured endpoint (WebSocket
//! cloud API, WebSocket gateway or gRPC gateway) and exposes typed feed
//! subscriptions ([`feeds`]) and typed requests ([`requests`]) on top of the
//! raw [`FeedHandler`] contract.
//!
//! # Quick start
//! ```rust,no_run
//! use chainfeed::{Client, Config, Feed};
//!
//! # async fn run() -> Result<(), chainfeed::HandlerError> {
//! let client = Client::connect(&Config::cloud_api("wss://api.blxrbdn.com/ws", "AUTH")).await?;
//! let mut txs = client
//!     .subscribe_channel(Feed::NEW_TXS, serde_json::json!({"include": ["tx_hash"]}))
//!     .await?;
//! while let Some(tx) = txs.recv().await {
//!     println!("{tx:?}");
//! }
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod feeds;
pub mod requests;

pub use client::{Client, NotificationReceiver};

pub use chainfeed_core::{
    Callback, Config, ConnectionState, DecoderRegistry, Feed, FeedHandler, HandlerError,
    HandlerKind, Notification, RemoteError, SubscriptionId, Timeouts,
};
pub use chainfeed_grpc::{GrpcHandler, STREAMED_FEEDS};
pub use chainfeed_ws::WsHandler;
