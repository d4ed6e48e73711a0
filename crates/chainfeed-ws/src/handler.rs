//! WebSocket [`FeedHandler`]: one connection, one read loop, many callers.
//!
//! The transport, the correlator and the subscription registry sit behind a
//! single mutex. The read loop is the only reader; callers only enqueue
//! writes and park on their own reply slot, so a slow caller never stalls
//! notification delivery.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use chainfeed_core::config::{Config, Timeouts};
use chainfeed_core::correlator::{Correlator, Outcome};
use chainfeed_core::decode::{Callback, DecoderRegistry};
use chainfeed_core::error::{HandlerError, TransportError};
use chainfeed_core::feed::{Feed, SubscriptionId};
use chainfeed_core::handler::{ConnectionState, FeedHandler, HandlerKind};
use chainfeed_core::policy::{retry, Attempt, BackoffConfig, RetryError};
use chainfeed_core::registry::SubscriptionRegistry;
use chainfeed_core::request::{Inbound, JsonRpcRequest};
use chainfeed_core::transport::{Connector, Endpoint, Transport};

use crate::reconnect;
use crate::transport::{signalled, WsConnector};

/// State guarded by the handler's one lock.
pub(crate) struct Shared {
    pub(crate) conn: Option<Arc<dyn Transport>>,
    pub(crate) correlator: Correlator,
    pub(crate) registry: SubscriptionRegistry,
    pub(crate) state: ConnectionState,
    /// Bumped by every successful redial; a replay batch only settles the
    /// state of its own recovery.
    pub(crate) recovery: u64,
}

impl Shared {
    fn live_conn(&self) -> Result<Arc<dyn Transport>, HandlerError> {
        self.conn.clone().ok_or(HandlerError::NotConnected)
    }
}

pub(crate) struct Inner {
    pub(crate) kind: HandlerKind,
    pub(crate) endpoint: Endpoint,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) decoders: DecoderRegistry,
    pub(crate) timeouts: Timeouts,
    pub(crate) reconnect: bool,
    shared: Mutex<Shared>,
    pub(crate) stop: watch::Sender<bool>,
    exited: watch::Sender<bool>,
    read_loop: Mutex<Option<JoinHandle<Result<(), HandlerError>>>>,
}

impl Inner {
    pub(crate) fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Classify one inbound frame and deliver it.
    fn handle_message(&self, text: &str) {
        let inbound = match Inbound::parse(text) {
            Ok(inbound) => inbound,
            Err(e) => {
                tracing::debug!(error = %e, "dropping unparseable frame");
                return;
            }
        };

        match inbound {
            Inbound::Reply { id, outcome } => self.handle_reply(&id, outcome),
            Inbound::Notification {
                subscription,
                result,
            } => {
                let route = self.lock().registry.route(&subscription);
                let Some((feed, callback)) = route else {
                    tracing::debug!(subscription = %subscription, "notification for unknown subscription dropped");
                    return;
                };
                let decoded = self.decoders.decode(&feed, result);
                if let Err(e) = &decoded {
                    tracing::warn!(feed = %feed, error = %e, "failed to decode notification");
                }
                callback(decoded);
            }
            Inbound::Other => tracing::debug!("dropping unrecognized frame"),
        }
    }

    /// Settle a reply. A subscribe acknowledgement confirms its reservation
    /// in the same critical section, so the next push is already routable.
    fn handle_reply(&self, id: &str, outcome: Outcome) {
        let mut shared = self.lock();
        if shared.registry.is_reserved(id) {
            match &outcome {
                Ok(Value::String(subscription_id)) => {
                    shared
                        .registry
                        .confirm(id, SubscriptionId(subscription_id.clone()));
                }
                _ => {
                    shared.registry.release(id);
                }
            }
        }
        if !shared.correlator.dispatch(id, outcome) {
            tracing::debug!(id, "reply for unknown request dropped");
        }
    }
}

/// Evicts a pending entry (and any reservation made under it) when the
/// waiting call finishes, times out, or is dropped.
struct PendingGuard<'a> {
    inner: &'a Inner,
    token: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut shared = self.inner.lock();
        shared.correlator.evict(&self.token);
        shared.registry.release(&self.token);
    }
}

/// JSON-RPC over WebSocket handler with automatic reconnect and
/// resubscribe.
pub struct WsHandler {
    inner: Arc<Inner>,
}

impl WsHandler {
    /// Dial the WebSocket endpoint selected by `config` and start the read
    /// loop.
    pub async fn connect(config: &Config) -> Result<Self, HandlerError> {
        Self::connect_with(
            config,
            Arc::new(WsConnector::from_config(config)),
            DecoderRegistry::standard(),
        )
        .await
    }

    /// Like [`connect`](Self::connect) with an explicit dialer and decoders.
    pub async fn connect_with(
        config: &Config,
        connector: Arc<dyn Connector>,
        decoders: DecoderRegistry,
    ) -> Result<Self, HandlerError> {
        config.validate()?;
        let (kind, _) = config.endpoint()?;
        if kind == HandlerKind::GatewayGrpc {
            return Err(HandlerError::Unsupported(
                "a gRPC endpoint on the WebSocket handler".into(),
            ));
        }
        let endpoint = config.ws_endpoint()?;
        let conn = connector.connect(&endpoint).await?;
        tracing::info!(url = %endpoint.url, kind = %kind, "connected");

        let inner = Arc::new(Inner {
            kind,
            endpoint,
            connector,
            decoders,
            timeouts: config.timeouts.clone(),
            reconnect: config.reconnect,
            shared: Mutex::new(Shared {
                conn: Some(conn),
                correlator: Correlator::new(),
                registry: SubscriptionRegistry::new(),
                state: ConnectionState::Connected,
                recovery: 0,
            }),
            stop: watch::channel(false).0,
            exited: watch::channel(false).0,
            read_loop: Mutex::new(None),
        });

        let handle = tokio::spawn(read_loop(inner.clone()));
        *inner
            .read_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        Ok(Self { inner })
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Wait for the read loop to end. Returns the terminal error when the
    /// connection was lost for good, `Ok` after [`close`](FeedHandler::close).
    /// Only the first caller observes the outcome.
    pub async fn wait(&self) -> Result<(), HandlerError> {
        let handle = self
            .inner
            .read_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match handle {
            Some(handle) => handle.await.unwrap_or_else(|e| {
                tracing::error!(error = %e, "read loop panicked");
                Err(HandlerError::Transport(TransportError::Closed))
            }),
            None => Ok(()),
        }
    }

    fn unsubscribe_once(&self, feed: &Feed) -> Result<(), Attempt<HandlerError>> {
        let mut shared = self.inner.lock();
        let subscription_id = match shared.registry.subscription_id(feed) {
            None => return Ok(()),
            // Subscribe (or replay) still waiting for its acknowledgement.
            Some(None) => {
                return Err(Attempt::Transient(HandlerError::NotSubscribed {
                    feed: feed.clone(),
                }))
            }
            Some(Some(id)) => id.clone(),
        };
        let conn = match shared.conn.clone() {
            Some(conn) => conn,
            None if shared.state.is_terminal() => {
                return Err(Attempt::Permanent(HandlerError::NotConnected))
            }
            None => return Err(Attempt::Transient(HandlerError::NotConnected)),
        };
        let text = JsonRpcRequest::unsubscribe(&subscription_id)
            .to_text()
            .map_err(|e| Attempt::Permanent(e.into()))?;
        conn.send(text)
            .map_err(|e| Attempt::Transient(HandlerError::Transport(e)))?;
        shared.registry.unregister(feed);
        Ok(())
    }
}

#[async_trait]
impl FeedHandler for WsHandler {
    fn kind(&self) -> HandlerKind {
        self.inner.kind
    }

    async fn subscribe(
        &self,
        feed: Feed,
        params: Value,
        callback: Callback,
    ) -> Result<(), HandlerError> {
        let request = JsonRpcRequest::subscribe(&feed, &params);
        let text = request.to_text()?;

        let pending = {
            let mut shared = self.inner.lock();
            let conn = shared.live_conn()?;
            shared.registry.reserve(&feed, &request, callback)?;
            let pending = shared
                .correlator
                .register(&request.id, format!("subscribe to {feed}"));
            if let Err(e) = conn.send(text) {
                shared.correlator.evict(pending.id());
                shared.registry.release(pending.id());
                return Err(e.into());
            }
            pending
        };
        let _guard = PendingGuard {
            inner: &self.inner,
            token: pending.id().to_string(),
        };

        match pending.wait(self.inner.timeouts.request_wait, |_| {}).await? {
            Value::String(_) => Ok(()),
            other => Err(HandlerError::UnexpectedReply(format!(
                "subscribe to {feed} returned {other}"
            ))),
        }
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, HandlerError> {
        let request = JsonRpcRequest::new(method, params);
        let text = request.to_text()?;

        let pending = {
            let mut shared = self.inner.lock();
            let conn = shared.live_conn()?;
            let pending = shared.correlator.register(&request.id, method);
            if let Err(e) = conn.send(text) {
                shared.correlator.evict(pending.id());
                return Err(e.into());
            }
            pending
        };
        let _guard = PendingGuard {
            inner: &self.inner,
            token: pending.id().to_string(),
        };

        pending.wait(self.inner.timeouts.request_wait, |_| {}).await
    }

    async fn unsubscribe_retry(&self, feed: &Feed) -> Result<(), HandlerError> {
        let config = BackoffConfig::bounded(
            self.inner.timeouts.unsubscribe_initial,
            self.inner.timeouts.unsubscribe_ceiling,
        );
        retry(config, "unsubscribe", move || {
            std::future::ready(self.unsubscribe_once(feed))
        })
        .await
        .map_err(RetryError::into_inner)
    }

    async fn close(&self) -> Result<(), HandlerError> {
        let conn = {
            let mut shared = self.inner.lock();
            if shared.state == ConnectionState::Closed {
                return Ok(());
            }
            shared.state = ConnectionState::Closed;
            shared.correlator.clear();
            shared.registry.snapshot_and_clear();
            shared.conn.take()
        };
        self.inner.stop.send_replace(true);

        if let Some(conn) = conn {
            match JsonRpcRequest::unsubscribe_all().to_text() {
                Ok(text) => {
                    if let Err(e) = conn.send(text) {
                        tracing::debug!(error = %e, "unsubscribe-all not sent");
                    }
                }
                Err(e) => tracing::debug!(error = %e, "unsubscribe-all not encoded"),
            }
            conn.close();
        }

        // Some transports cannot be interrupted mid-read; do not wait forever.
        let mut exited = self.inner.exited.subscribe();
        if tokio::time::timeout(self.inner.timeouts.close_wait, signalled(&mut exited))
            .await
            .is_err()
        {
            tracing::debug!("read loop still running after close wait");
        }
        tracing::info!(url = %self.inner.endpoint.url, "closed");
        Ok(())
    }

    fn subscription_id(&self, feed: &Feed) -> Option<SubscriptionId> {
        self.inner
            .lock()
            .registry
            .subscription_id(feed)
            .flatten()
            .cloned()
    }
}

impl Drop for WsHandler {
    fn drop(&mut self) {
        self.inner.stop.send_replace(true);
        if let Some(conn) = self.inner.lock().conn.take() {
            conn.close();
        }
    }
}

/// The single reader. Runs until stopped, or until the connection is lost
/// and cannot be recovered.
async fn read_loop(inner: Arc<Inner>) -> Result<(), HandlerError> {
    let mut stop = inner.stop.subscribe();
    let result = loop {
        let conn = inner.lock().conn.clone();
        let Some(conn) = conn else {
            break Ok(());
        };
        let msg = tokio::select! {
            _ = signalled(&mut stop) => break Ok(()),
            msg = conn.recv() => msg,
        };
        match msg {
            Ok(text) => inner.handle_message(&text),
            Err(_) if inner.is_stopped() => break Ok(()),
            Err(e) if e.is_closed() && inner.reconnect => {
                if let Err(err) = reconnect::recover(&inner, &conn, e).await {
                    break Err(err);
                }
            }
            Err(e) => {
                tracing::error!(url = %inner.endpoint.url, error = %e, "connection lost");
                let mut shared = inner.lock();
                shared.state = ConnectionState::Failed;
                shared.conn = None;
                shared.correlator.clear();
                break Err(HandlerError::Transport(e));
            }
        }
    };
    inner.exited.send_replace(true);
    result
}
