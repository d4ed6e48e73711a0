//! gRPC [`FeedHandler`]: one server stream and one receive task per feed.
//!
//! The stream itself correlates frames with their subscription, so there is
//! no correlator or subscription id here. Order is preserved within a feed
//! because each feed has exactly one receive task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::future::join_all;
use futures::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::{Code, Status};

use chainfeed_core::config::{Config, Timeouts};
use chainfeed_core::decode::{Callback, DecoderRegistry};
use chainfeed_core::error::HandlerError;
use chainfeed_core::feed::Feed;
use chainfeed_core::handler::{FeedHandler, HandlerKind};
use chainfeed_core::policy::{retry, Attempt, BackoffConfig};

use crate::gateway::{is_permanent, status_error, FrameStream, GatewayApi, TonicGateway};

struct FeedTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// What holds a feed: a stream still being opened, or its receive task.
enum Slot {
    Opening(CancellationToken),
    Running(FeedTask),
}

impl Slot {
    fn is_live(&self) -> bool {
        match self {
            Slot::Opening(_) => true,
            Slot::Running(task) => !task.handle.is_finished(),
        }
    }
}

#[derive(Default)]
struct State {
    closed: bool,
    feeds: HashMap<Feed, Slot>,
}

/// Everything a feed task needs, owned.
struct FeedContext {
    gateway: Arc<dyn GatewayApi>,
    decoders: Arc<DecoderRegistry>,
    feed: Feed,
    params: Value,
    callback: Callback,
    cancel: CancellationToken,
    reconnect: Option<BackoffConfig>,
}

/// Releases an `Opening` slot when its subscribe fails or is dropped.
/// A cancelled token means whoever cancelled it already took the slot.
struct Reservation<'a> {
    handler: &'a GrpcHandler,
    feed: &'a Feed,
    cancel: CancellationToken,
    armed: bool,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.armed || self.cancel.is_cancelled() {
            return;
        }
        let mut state = self.handler.lock();
        if matches!(state.feeds.get(self.feed), Some(Slot::Opening(_))) {
            state.feeds.remove(self.feed);
        }
    }
}

/// gRPC streaming handler for a self-hosted gateway.
///
/// The state lock is never held across an await, so a slow stream open
/// blocks neither requests nor other feeds nor `close`.
pub struct GrpcHandler {
    gateway: Arc<dyn GatewayApi>,
    decoders: Arc<DecoderRegistry>,
    timeouts: Timeouts,
    reconnect: bool,
    root: CancellationToken,
    state: Mutex<State>,
}

impl GrpcHandler {
    /// Dial the gRPC gateway selected by `config`.
    pub async fn connect(config: &Config) -> Result<Self, HandlerError> {
        config.validate()?;
        let gateway = TonicGateway::connect(config).await?;
        Ok(Self::with_gateway(
            config,
            Arc::new(gateway),
            DecoderRegistry::standard(),
        ))
    }

    /// Build a handler over an already connected gateway.
    pub fn with_gateway(
        config: &Config,
        gateway: Arc<dyn GatewayApi>,
        decoders: DecoderRegistry,
    ) -> Self {
        Self {
            gateway,
            decoders: Arc::new(decoders),
            timeouts: config.timeouts.clone(),
            reconnect: config.reconnect,
            root: CancellationToken::new(),
            state: Mutex::new(State::default()),
        }
    }

    /// Number of feeds with a live receive task.
    pub fn active_feeds(&self) -> usize {
        self.lock()
            .feeds
            .values()
            .filter(|slot| matches!(slot, Slot::Running(_)) && slot.is_live())
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Error for a subscribe whose open was cancelled by `close` or
    /// `unsubscribe_retry`.
    fn cancelled_error(&self, feed: &Feed) -> HandlerError {
        cancel_reason(&self.lock(), feed)
    }

    fn reconnect_policy(&self) -> Option<BackoffConfig> {
        self.reconnect.then(|| {
            BackoffConfig::bounded(
                self.timeouts.reconnect_initial,
                self.timeouts.reconnect_ceiling,
            )
        })
    }
}

#[async_trait]
impl FeedHandler for GrpcHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::GatewayGrpc
    }

    async fn subscribe(
        &self,
        feed: Feed,
        params: Value,
        callback: Callback,
    ) -> Result<(), HandlerError> {
        let cancel = self.root.child_token();
        {
            let mut state = self.lock();
            if state.closed {
                return Err(HandlerError::NotConnected);
            }
            // A task that ended on its own (end of stream, fatal error) no
            // longer holds the feed.
            if state.feeds.get(&feed).is_some_and(Slot::is_live) {
                return Err(HandlerError::AlreadySubscribed { feed });
            }
            state
                .feeds
                .insert(feed.clone(), Slot::Opening(cancel.clone()));
        }
        let mut reservation = Reservation {
            handler: self,
            feed: &feed,
            cancel: cancel.clone(),
            armed: true,
        };

        let wait = self.timeouts.request_wait;
        let opened = tokio::select! {
            _ = cancel.cancelled() => None,
            opened = tokio::time::timeout(wait, self.gateway.open_feed(&feed, &params)) => Some(opened),
        };
        let stream = match opened {
            Some(Ok(Ok(stream))) => stream,
            Some(Ok(Err(status))) => return Err(status_error(status)),
            Some(Err(_)) => {
                return Err(HandlerError::Timeout {
                    what: format!("subscribe to {feed}"),
                    after: wait,
                })
            }
            None => return Err(self.cancelled_error(&feed)),
        };

        let mut state = self.lock();
        if cancel.is_cancelled() {
            // Unsubscribed or closed while the open was finishing.
            return Err(cancel_reason(&state, &feed));
        }
        let ctx = FeedContext {
            gateway: self.gateway.clone(),
            decoders: self.decoders.clone(),
            feed: feed.clone(),
            params,
            callback,
            cancel: cancel.clone(),
            reconnect: self.reconnect_policy(),
        };
        let handle = tokio::spawn(receive(ctx, stream));
        state
            .feeds
            .insert(feed.clone(), Slot::Running(FeedTask { cancel, handle }));
        reservation.armed = false;
        tracing::debug!(feed = %feed, "subscribed");
        Ok(())
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, HandlerError> {
        if self.lock().closed {
            return Err(HandlerError::NotConnected);
        }
        let wait = self.timeouts.request_wait;
        let call = self.gateway.call(method, &params);
        tokio::select! {
            _ = self.root.cancelled() => Err(HandlerError::NotConnected),
            reply = tokio::time::timeout(wait, call) => reply
                .map_err(|_| HandlerError::Timeout { what: method.to_string(), after: wait })?
                .map_err(status_error),
        }
    }

    async fn unsubscribe_retry(&self, feed: &Feed) -> Result<(), HandlerError> {
        let slot = self.lock().feeds.remove(feed);
        let FeedTask { cancel, mut handle } = match slot {
            None => return Ok(()),
            Some(Slot::Opening(cancel)) => {
                cancel.cancel();
                return Ok(());
            }
            Some(Slot::Running(task)) => task,
        };
        cancel.cancel();
        let wait = self.timeouts.grpc_unsubscribe_wait;
        if tokio::time::timeout(wait, &mut handle).await.is_err() {
            tracing::warn!(feed = %feed, ?wait, "feed task still running after unsubscribe");
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), HandlerError> {
        let handles: Vec<JoinHandle<()>> = {
            let mut state = self.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            state
                .feeds
                .drain()
                .filter_map(|(_, slot)| match slot {
                    Slot::Running(task) => Some(task.handle),
                    Slot::Opening(_) => None,
                })
                .collect()
        };
        // Also aborts every stream still being opened.
        self.root.cancel();
        for result in join_all(handles).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "feed task panicked");
            }
        }
        tracing::info!("closed");
        Ok(())
    }
}

impl Drop for GrpcHandler {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

fn cancel_reason(state: &State, feed: &Feed) -> HandlerError {
    if state.closed {
        HandlerError::NotConnected
    } else {
        HandlerError::NotSubscribed { feed: feed.clone() }
    }
}

fn is_clean_end(status: &Status) -> bool {
    status.code() == Code::Cancelled
}

/// Pull frames until cancelled or the stream ends, delivering each payload
/// to the callback in order.
async fn receive(ctx: FeedContext, mut stream: FrameStream) {
    loop {
        let frame = tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            frame = stream.next() => frame,
        };
        match frame {
            None => {
                tracing::debug!(feed = %ctx.feed, "feed stream ended");
                break;
            }
            Some(Ok(payloads)) => {
                for payload in payloads {
                    let decoded = ctx.decoders.decode(&ctx.feed, payload);
                    if let Err(e) = &decoded {
                        tracing::warn!(feed = %ctx.feed, error = %e, "failed to decode notification");
                    }
                    (ctx.callback)(decoded);
                }
            }
            Some(Err(status)) if is_clean_end(&status) => break,
            Some(Err(status)) => {
                tracing::warn!(feed = %ctx.feed, error = %status, "feed stream failed");
                match reopen(&ctx, &status).await {
                    Reopen::Stream(fresh) => stream = fresh,
                    Reopen::Cancelled => break,
                    Reopen::Failed(e) => {
                        tracing::error!(feed = %ctx.feed, error = %e, "feed stream lost");
                        (ctx.callback)(Err(e));
                        break;
                    }
                }
            }
        }
    }
}

enum Reopen {
    Stream(FrameStream),
    Cancelled,
    Failed(HandlerError),
}

/// Re-open the feed's stream with its original params under the reconnect
/// backoff.
async fn reopen(ctx: &FeedContext, cause: &Status) -> Reopen {
    let Some(config) = ctx.reconnect.clone() else {
        return Reopen::Failed(status_error(cause.clone()));
    };
    if is_permanent(cause) {
        return Reopen::Failed(status_error(cause.clone()));
    }
    let attempt = retry(config, "reopen feed stream", move || async move {
        ctx.gateway
            .open_feed(&ctx.feed, &ctx.params)
            .await
            .map_err(|status| {
                if is_permanent(&status) {
                    Attempt::Permanent(status)
                } else {
                    Attempt::Transient(status)
                }
            })
    });
    tokio::select! {
        _ = ctx.cancel.cancelled() => Reopen::Cancelled,
        result = attempt => match result {
            Ok(stream) => {
                tracing::info!(feed = %ctx.feed, "feed stream reopened");
                Reopen::Stream(stream)
            }
            Err(e) => Reopen::Failed(status_error(e.into_inner())),
        },
    }
}
