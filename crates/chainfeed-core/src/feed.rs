//! Feed names and server-assigned subscription ids.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A named class of push notifications (e.g. `"newTxs"`).
///
/// At most one subscription per feed is active on a handler at any time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Feed(Cow<'static, str>);

impl Feed {
    pub const NEW_TXS: Feed = Feed::from_static("newTxs");
    pub const PENDING_TXS: Feed = Feed::from_static("pendingTxs");
    pub const NEW_BLOCKS: Feed = Feed::from_static("newBlocks");
    pub const BDN_BLOCKS: Feed = Feed::from_static("bdnBlocks");
    pub const ETH_ON_BLOCK: Feed = Feed::from_static("ethOnBlock");
    pub const TX_STATUS: Feed = Feed::from_static("transactionStatus");
    pub const TX_RECEIPTS: Feed = Feed::from_static("txReceipts");
    pub const USER_INTENTS: Feed = Feed::from_static("userIntentFeed");
    pub const USER_INTENT_SOLUTIONS: Feed = Feed::from_static("userIntentSolutionsFeed");
    pub const QUOTES: Feed = Feed::from_static("quotesFeed");

    /// Every feed with a built-in decoder.
    pub const BUILTIN: [Feed; 10] = [
        Feed::NEW_TXS,
        Feed::PENDING_TXS,
        Feed::NEW_BLOCKS,
        Feed::BDN_BLOCKS,
        Feed::ETH_ON_BLOCK,
        Feed::TX_STATUS,
        Feed::TX_RECEIPTS,
        Feed::USER_INTENTS,
        Feed::USER_INTENT_SOLUTIONS,
        Feed::QUOTES,
    ];

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Feed {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Feed {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for Feed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A subscription id assigned by the server when it acknowledges a
/// subscribe request. Scoped to one transport connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub String);

impl From<String> for SubscriptionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SubscriptionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
