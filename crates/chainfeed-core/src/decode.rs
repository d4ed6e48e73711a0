//! Per-feed payload decoding and the subscriber callback type.
//!
//! Instead of one dispatch routine branching on the feed, each feed kind
//! registers its own decode function. New feeds are added by registering a
//! decoder; feeds without one are delivered as [`Notification::Raw`].

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::HandlerError;
use crate::feed::Feed;
use crate::models::Notification;

/// Subscriber callback. Invoked once per notification, in arrival order,
/// with either the decoded payload or the reason it could not be decoded.
pub type Callback = Arc<dyn Fn(Result<Notification, HandlerError>) + Send + Sync>;

type DecodeFn = Arc<dyn Fn(Value) -> Result<Notification, serde_json::Error> + Send + Sync>;

/// Mapping from feed to decode function.
#[derive(Clone, Default)]
pub struct DecoderRegistry {
    decoders: HashMap<Feed, DecodeFn>,
}

impl DecoderRegistry {
    /// An empty registry: every feed decodes to [`Notification::Raw`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoders for every built-in feed.
    pub fn standard() -> Self {
        let mut reg = Self::new();
        reg.register_typed(Feed::NEW_TXS, Notification::NewTx);
        reg.register_typed(Feed::PENDING_TXS, Notification::NewTx);
        reg.register_typed(Feed::NEW_BLOCKS, Notification::Block);
        reg.register_typed(Feed::BDN_BLOCKS, Notification::Block);
        reg.register_typed(Feed::ETH_ON_BLOCK, Notification::OnBlock);
        reg.register_typed(Feed::TX_STATUS, Notification::TxStatus);
        reg.register_typed(Feed::TX_RECEIPTS, Notification::TxReceipt);
        reg.register_typed(Feed::USER_INTENTS, Notification::Intent);
        reg.register_typed(Feed::USER_INTENT_SOLUTIONS, Notification::IntentSolution);
        reg.register_typed(Feed::QUOTES, Notification::Quote);
        reg
    }

    /// Register (or replace) the decoder for `feed`.
    pub fn register<F>(&mut self, feed: Feed, decode: F)
    where
        F: Fn(Value) -> Result<Notification, serde_json::Error> + Send + Sync + 'static,
    {
        self.decoders.insert(feed, Arc::new(decode));
    }

    /// Register a decoder that deserializes into `T` and wraps it.
    pub fn register_typed<T>(&mut self, feed: Feed, wrap: fn(T) -> Notification)
    where
        T: DeserializeOwned + 'static,
    {
        self.register(feed, move |payload| serde_json::from_value::<T>(payload).map(wrap));
    }

    pub fn contains(&self, feed: &Feed) -> bool {
        self.decoders.contains_key(feed)
    }

    /// Decode a push payload for `feed`.
    pub fn decode(&self, feed: &Feed, payload: Value) -> Result<Notification, HandlerError> {
        match self.decoders.get(feed) {
            Some(decode) => decode(payload).map_err(|source| HandlerError::Decode {
                feed: feed.clone(),
                source,
            }),
            None => Ok(Notification::Raw(payload)),
        }
    }
}

impl std::fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.decoders.keys()).finish()
    }
}
