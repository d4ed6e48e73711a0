//! Endpoint selection and the raw subscribe/request surface.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use chainfeed_core::{
    Callback, Config, Feed, FeedHandler, HandlerError, HandlerKind, Notification, SubscriptionId,
};
use chainfeed_grpc::GrpcHandler;
use chainfeed_ws::WsHandler;

/// Receiving end of [`Client::subscribe_channel`].
pub type NotificationReceiver = mpsc::UnboundedReceiver<Result<Notification, HandlerError>>;

/// A connected feed client.
///
/// Cheap to clone; clones share the underlying handler.
#[derive(Clone)]
pub struct Client {
    handler: Arc<dyn FeedHandler>,
    network: String,
}

impl Client {
    /// Validate `config` and connect the handler its endpoint selects.
    pub async fn connect(config: &Config) -> Result<Self, HandlerError> {
        config.validate()?;
        let (kind, url) = config.endpoint()?;
        let handler: Arc<dyn FeedHandler> = match kind {
            HandlerKind::CloudApiWs | HandlerKind::GatewayWs => {
                Arc::new(WsHandler::connect(config).await?)
            }
            HandlerKind::GatewayGrpc => Arc::new(GrpcHandler::connect(config).await?),
        };
        tracing::debug!(%kind, url, network = %config.blockchain_network, "client ready");
        Ok(Self::from_handler(handler, config.blockchain_network.clone()))
    }

    /// Wrap an already connected handler. `network` is the blockchain
    /// network the handler was configured for.
    pub fn from_handler(handler: Arc<dyn FeedHandler>, network: impl Into<String>) -> Self {
        Self {
            handler,
            network: network.into(),
        }
    }

    pub fn kind(&self) -> HandlerKind {
        self.handler.kind()
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn handler(&self) -> &Arc<dyn FeedHandler> {
        &self.handler
    }

    /// Subscribe to any feed with raw params.
    pub async fn subscribe(
        &self,
        feed: Feed,
        params: Value,
        callback: Callback,
    ) -> Result<(), HandlerError> {
        self.handler.subscribe(feed, params, callback).await
    }

    /// Subscribe to any feed and receive its notifications on a channel.
    ///
    /// The channel stays open until the feed is unsubscribed and the handler
    /// is closed; dropping the receiver just discards later notifications.
    pub async fn subscribe_channel(
        &self,
        feed: Feed,
        params: Value,
    ) -> Result<NotificationReceiver, HandlerError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let callback: Callback = Arc::new(move |notification| {
            let _ = tx.send(notification);
        });
        self.handler.subscribe(feed, params, callback).await?;
        Ok(rx)
    }

    /// Send any request with raw params.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, HandlerError> {
        self.handler.request(method, params).await
    }

    pub async fn unsubscribe(&self, feed: &Feed) -> Result<(), HandlerError> {
        self.handler.unsubscribe_retry(feed).await
    }

    pub fn subscription_id(&self, feed: &Feed) -> Option<SubscriptionId> {
        self.handler.subscription_id(feed)
    }

    pub async fn close(&self) -> Result<(), HandlerError> {
        self.handler.close().await
    }

    pub(crate) async fn subscribe_with<P: Serialize>(
        &self,
        feed: Feed,
        params: &P,
        callback: Callback,
    ) -> Result<(), HandlerError> {
        let params = serde_json::to_value(params)?;
        self.handler.subscribe(feed, params, callback).await
    }

    pub(crate) async fn request_with<P: Serialize>(
        &self,
        method: &str,
        params: &P,
    ) -> Result<Value, HandlerError> {
        let params = serde_json::to_value(params)?;
        self.handler.request(method, params).await
    }

    pub(crate) fn require_cloud_api(&self, what: &str) -> Result<(), HandlerError> {
        if self.kind().is_cloud_api() {
            Ok(())
        } else {
            Err(HandlerError::Unsupported(format!(
                "{what} on a {} handler (cloud API only)",
                self.kind()
            )))
        }
    }

    pub(crate) fn require_gateway(&self, what: &str) -> Result<(), HandlerError> {
        if self.kind().is_gateway() {
            Ok(())
        } else {
            Err(HandlerError::Unsupported(format!(
                "{what} on a {} handler (gateway only)",
                self.kind()
            )))
        }
    }

    pub(crate) fn require_kind(&self, kind: HandlerKind, what: &str) -> Result<(), HandlerError> {
        if self.kind() == kind {
            Ok(())
        } else {
            Err(HandlerError::Unsupported(format!(
                "{what} on a {} handler ({kind} only)",
                self.kind()
            )))
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("kind", &self.kind())
            .field("network", &self.network)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! A [`FeedHandler`] that records every call and echoes requests back.

    use std::collections::HashMap;
    use std::sync::{Mutex, PoisonError};

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Call {
        Subscribe(Feed, Value),
        Request(String, Value),
        Unsubscribe(Feed),
        Close,
    }

    pub(crate) struct RecordingHandler {
        kind: HandlerKind,
        pub(crate) calls: Mutex<Vec<Call>>,
        callbacks: Mutex<HashMap<Feed, Callback>>,
        subscription_ids: Mutex<HashMap<Feed, SubscriptionId>>,
    }

    impl RecordingHandler {
        pub(crate) fn new(kind: HandlerKind) -> Arc<Self> {
            Arc::new(Self {
                kind,
                calls: Mutex::new(Vec::new()),
                callbacks: Mutex::new(HashMap::new()),
                subscription_ids: Mutex::new(HashMap::new()),
            })
        }

        pub(crate) fn client(self: &Arc<Self>, network: &str) -> Client {
            Client::from_handler(self.clone(), network)
        }

        pub(crate) fn calls(&self) -> Vec<Call> {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        pub(crate) fn push(&self, feed: &Feed, notification: Notification) {
            let callback = self.callbacks.lock().unwrap().get(feed).cloned();
            callback.expect("feed not subscribed")(Ok(notification));
        }

        fn record(&self, call: Call) {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(call);
        }
    }

    #[async_trait]
    impl FeedHandler for RecordingHandler {
        fn kind(&self) -> HandlerKind {
            self.kind
        }

        async fn subscribe(
            &self,
            feed: Feed,
            params: Value,
            callback: Callback,
        ) -> Result<(), HandlerError> {
            self.record(Call::Subscribe(feed.clone(), params));
            self.subscription_ids
                .lock()
                .unwrap()
                .insert(feed.clone(), SubscriptionId(format!("sub-{feed}")));
            self.callbacks.lock().unwrap().insert(feed, callback);
            Ok(())
        }

        async fn request(&self, method: &str, params: Value) -> Result<Value, HandlerError> {
            self.record(Call::Request(method.to_string(), params.clone()));
            Ok(json!({"method": method, "params": params}))
        }

        async fn unsubscribe_retry(&self, feed: &Feed) -> Result<(), HandlerError> {
            self.record(Call::Unsubscribe(feed.clone()));
            self.subscription_ids.lock().unwrap().remove(feed);
            self.callbacks.lock().unwrap().remove(feed);
            Ok(())
        }

        async fn close(&self) -> Result<(), HandlerError> {
            self.record(Call::Close);
            Ok(())
        }

        fn subscription_id(&self, feed: &Feed) -> Option<SubscriptionId> {
            self.subscription_ids.lock().unwrap().get(feed).cloned()
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::testing::{Call, RecordingHandler};
    use super::*;

    #[tokio::test]
    async fn channel_receives_pushed_notifications() {
        let handler = RecordingHandler::new(HandlerKind::GatewayWs);
        let client = handler.client("Mainnet");

        let mut rx = client
            .subscribe_channel(Feed::NEW_BLOCKS, json!({"include": ["hash"]}))
            .await
            .unwrap();
        handler.push(&Feed::NEW_BLOCKS, Notification::Raw(json!({"hash": "0x1"})));
        handler.push(&Feed::NEW_BLOCKS, Notification::Raw(json!({"hash": "0x2"})));

        for hash in ["0x1", "0x2"] {
            match rx.recv().await.unwrap().unwrap() {
                Notification::Raw(v) => assert_eq!(v["hash"], hash),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn raw_calls_pass_through() {
        let handler = RecordingHandler::new(HandlerKind::CloudApiWs);
        let client = handler.client("Mainnet");

        let reply = client.request("ping", json!({})).await.unwrap();
        assert_eq!(reply["method"], "ping");
        client.unsubscribe(&Feed::NEW_TXS).await.unwrap();
        client.close().await.unwrap();

        assert_eq!(
            handler.calls(),
            vec![
                Call::Request("ping".into(), json!({})),
                Call::Unsubscribe(Feed::NEW_TXS),
                Call::Close,
            ]
        );
    }

    #[tokio::test]
    async fn kind_guards_name_the_handler() {
        let client = RecordingHandler::new(HandlerKind::GatewayGrpc).client("Mainnet");
        assert!(client.require_gateway("quotes").is_ok());
        match client.require_cloud_api("monitor_txs") {
            Err(HandlerError::Unsupported(msg)) => {
                assert!(msg.contains("gateway-grpc"), "{msg}");
                assert!(msg.contains("cloud API only"), "{msg}");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(client
            .require_kind(HandlerKind::GatewayWs, "intent_solutions")
            .is_err());
    }

    #[tokio::test]
    async fn grpc_config_on_missing_gateway_fails_to_connect() {
        let mut config = Config::grpc_gateway("127.0.0.1:1", "dGVzdA==");
        config.timeouts.grpc_dial = std::time::Duration::from_millis(200);
        assert!(Client::connect(&config).await.is_err());
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_dialing() {
        let config = Config::default();
        assert!(matches!(
            Client::connect(&config).await,
            Err(HandlerError::Config(_))
        ));
    }
}
