//! JSON-RPC 2.0 wire envelopes for the WebSocket binding.
//!
//! Outbound:
//! ```text
//! subscribe    {"jsonrpc":"2.0","id":"7","method":"subscribe","params":[feed, feedParams]}
//! request      {"jsonrpc":"2.0","id":"8","method":m,"params":p}
//! unsubscribe  {"jsonrpc":"2.0","id":"9","method":"unsubscribe","params":[subscriptionId]}
//! ```
//! Inbound:
//! ```text
//! reply        {"id":"7","result":...}  |  {"id":"7","error":{"code","message","data"}}
//! push         {"method":"subscribe","params":{"subscription":id,"result":payload}}
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::feed::{Feed, SubscriptionId};

/// Method used both for subscribe requests and for push notifications.
pub const SUBSCRIBE_METHOD: &str = "subscribe";
/// Method used for unsubscribe requests (with no params: unsubscribe all).
pub const UNSUBSCRIBE_METHOD: &str = "unsubscribe";

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// JSON-RPC request ID: string, number, or null.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(u64),
    String(String),
    Null,
}

impl RpcId {
    /// A fresh process-unique correlation id, rendered as a string.
    pub fn fresh() -> Self {
        Self::String(NEXT_ID.fetch_add(1, Ordering::Relaxed).to_string())
    }

    /// Key used to match replies: servers may echo `"7"` or `7`.
    pub fn key(&self) -> String {
        self.to_string()
    }

    /// Extract the correlation key from an inbound `id` field.
    pub fn key_of(value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl fmt::Display for RpcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Null => write!(f, "null"),
        }
    }
}

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RpcId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC 2.0 request with a fresh id.
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id: RpcId::fresh(),
            method: method.into(),
            params: Some(params),
        }
    }

    /// `subscribe` envelope: `params = [feed, feedParams]`.
    pub fn subscribe(feed: &Feed, feed_params: &Value) -> Self {
        Self::new(
            SUBSCRIBE_METHOD,
            Value::Array(vec![Value::String(feed.to_string()), feed_params.clone()]),
        )
    }

    /// `unsubscribe` envelope for one subscription.
    pub fn unsubscribe(subscription: &SubscriptionId) -> Self {
        Self::new(
            UNSUBSCRIBE_METHOD,
            Value::Array(vec![Value::String(subscription.0.clone())]),
        )
    }

    /// `unsubscribe` with no params: drop every subscription on the connection.
    pub fn unsubscribe_all() -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id: RpcId::fresh(),
            method: UNSUBSCRIBE_METHOD.into(),
            params: None,
        }
    }

    /// Same request under a fresh correlation id.
    pub fn with_fresh_id(&self) -> Self {
        Self {
            id: RpcId::fresh(),
            ..self.clone()
        }
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A structured error returned by the server instead of a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            Some(data) => write!(f, "code: {} message: {}, data: {}", self.code, self.message, data),
            None => write!(f, "code: {} message: {}", self.code, self.message),
        }
    }
}

impl std::error::Error for RemoteError {}

/// A classified inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Reply to a request or subscribe, keyed by correlation id.
    Reply {
        id: String,
        outcome: Result<Value, RemoteError>,
    },
    /// Push notification for a server-assigned subscription.
    Notification {
        subscription: SubscriptionId,
        result: Value,
    },
    /// Anything else; dropped by the handler.
    Other,
}

impl Inbound {
    /// Classify an inbound frame. Returns `Err` only for frames that are not
    /// JSON at all.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let mut val: Value = serde_json::from_str(text)?;

        if val.get("method").and_then(Value::as_str) == Some(SUBSCRIBE_METHOD) {
            let Some(params) = val.get_mut("params") else {
                return Ok(Self::Other);
            };
            let Some(subscription) = params.get("subscription").and_then(Value::as_str) else {
                return Ok(Self::Other);
            };
            let subscription = SubscriptionId(subscription.to_string());
            let result = params.get_mut("result").map(Value::take).unwrap_or(Value::Null);
            return Ok(Self::Notification {
                subscription,
                result,
            });
        }

        let Some(id) = val.get("id").and_then(RpcId::key_of) else {
            return Ok(Self::Other);
        };

        if let Some(err) = val.get_mut("error").filter(|e| e.is_object()) {
            let outcome = match serde_json::from_value::<RemoteError>(err.take()) {
                Ok(remote) => Err(remote),
                Err(e) => Err(RemoteError {
                    code: 0,
                    message: format!("malformed error object: {e}"),
                    data: None,
                }),
            };
            return Ok(Self::Reply { id, outcome });
        }

        match val.get_mut("result") {
            Some(result) => Ok(Self::Reply {
                id,
                outcome: Ok(result.take()),
            }),
            None => Ok(Self::Other),
        }
    }
}
