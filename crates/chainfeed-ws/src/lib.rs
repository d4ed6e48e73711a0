//! chainfeed-ws: JSON-RPC over WebSocket feed handler.
//!
//! One [`WsHandler`] owns one connection and a single read loop. When the
//! connection drops it redials with exponential backoff and replays every
//! active subscription under a fresh correlation id.
//!
//! ```no_run
//! use std::sync::Arc;
//! use chainfeed_core::{Callback, Config, Feed, FeedHandler};
//! use chainfeed_ws::WsHandler;
//!
//! # async fn run() -> Result<(), chainfeed_core::HandlerError> {
//! let config = Config::cloud_api("wss://api.example.com/ws", "BASE64TOKEN");
//! let handler = WsHandler::connect(&config).await?;
//! let print: Callback = Arc::new(|n| println!("{n:?}"));
//! handler
//!     .subscribe(Feed::NEW_TXS, serde_json::json!({"include": ["tx_hash"]}), print)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod handler;
mod reconnect;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use handler::WsHandler;
pub use transport::{WsConnector, WsTransport};
