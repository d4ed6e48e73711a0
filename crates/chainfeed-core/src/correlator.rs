//! Correlation of outstanding requests with their asynchronous replies.
//!
//! Each in-flight request or subscribe is registered under its correlation
//! id with a single-use reply slot. The read loop [`dispatch`]es inbound
//! replies into the slot without ever blocking; the caller [`wait`]s on it
//! with a timeout.
//!
//! Every registered id leaves the table exactly once: through `dispatch`,
//! through `evict` on the caller's timeout path, or through `clear` when the
//! connection is lost.
//!
//! [`dispatch`]: Correlator::dispatch
//! [`wait`]: PendingReply::wait

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::HandlerError;
use crate::request::{RemoteError, RpcId};

/// Terminal outcome carried by a reply.
pub type Outcome = Result<Value, RemoteError>;

/// Table of pending operations keyed by correlation id.
#[derive(Debug, Default)]
pub struct Correlator {
    pending: HashMap<String, oneshot::Sender<Outcome>>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending operation under `id`. `what` names the operation
    /// in timeout errors.
    pub fn register(&mut self, id: &RpcId, what: impl Into<String>) -> PendingReply {
        let key = id.key();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(key.clone(), tx);
        PendingReply {
            id: key,
            what: what.into(),
            rx,
        }
    }

    /// Deliver `outcome` to the operation registered under `id` and remove
    /// it. Returns `false` (and does nothing) for unknown ids.
    pub fn dispatch(&mut self, id: &str, outcome: Outcome) -> bool {
        match self.pending.remove(id) {
            Some(tx) => {
                // The waiter may have given up; a late reply is dropped.
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Remove `id` without delivering anything.
    pub fn evict(&mut self, id: &str) -> bool {
        self.pending.remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    /// Drop every pending operation; their waiters observe
    /// [`HandlerError::NoResponse`]. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let n = self.pending.len();
        self.pending.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Caller-side half of a pending operation.
#[derive(Debug)]
pub struct PendingReply {
    id: String,
    what: String,
    rx: oneshot::Receiver<Outcome>,
}

impl PendingReply {
    /// The correlation key this reply is registered under.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the reply.
    ///
    /// On timeout `on_timeout` is called with the correlation key so the
    /// owner of the table can evict the entry (and roll back anything it
    /// reserved for it) before the timeout error is returned.
    pub async fn wait<F>(self, timeout: Duration, on_timeout: F) -> Result<Value, HandlerError>
    where
        F: FnOnce(&str),
    {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(remote))) => Err(HandlerError::Remote(remote)),
            Ok(Err(_)) => Err(HandlerError::NoResponse),
            Err(_) => {
                on_timeout(&self.id);
                Err(HandlerError::Timeout {
                    what: self.what,
                    after: timeout,
                })
            }
        }
    }
}
