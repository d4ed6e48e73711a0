//! Reconnection controller.
//!
//! ```text
//! Connected → (closed) → Reconnecting → (dial ok) → Resubscribing → Connected
//!                             ↓ ceiling reached
//!                           Failed
//! ```
//!
//! Subscription ids are scoped to one connection, so recovery re-sends
//! every subscribe request under a fresh correlation id instead of
//! resuming anything server-side.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tokio::time::Instant;

use chainfeed_core::correlator::PendingReply;
use chainfeed_core::error::{HandlerError, TransportError};
use chainfeed_core::feed::Feed;
use chainfeed_core::handler::ConnectionState;
use chainfeed_core::policy::{retry, Attempt, BackoffConfig, RetryError};
use chainfeed_core::transport::Transport;

use crate::handler::Inner;
use crate::transport::signalled;

/// Detach the lost connection, redial with backoff, then replay every
/// subscription. Returns `Err` only when the handler must stop.
pub(crate) async fn recover(
    inner: &Arc<Inner>,
    lost: &Arc<dyn Transport>,
    cause: TransportError,
) -> Result<(), HandlerError> {
    let dropped = {
        let mut shared = inner.lock();
        if shared.state == ConnectionState::Closed {
            return Ok(());
        }
        shared.conn = None;
        shared.state = ConnectionState::Reconnecting;
        shared.correlator.clear()
    };
    lost.close();
    tracing::warn!(
        url = %inner.endpoint.url,
        error = %cause,
        dropped,
        "connection lost, reconnecting"
    );

    let started = Instant::now();
    let config = BackoffConfig::bounded(
        inner.timeouts.reconnect_initial,
        inner.timeouts.reconnect_ceiling,
    );
    let dial = retry(config, "reconnect", move || {
        let inner = inner.clone();
        async move {
            inner
                .connector
                .connect(&inner.endpoint)
                .await
                .map_err(Attempt::Transient)
        }
    });

    let mut stop = inner.stop.subscribe();
    let conn = tokio::select! {
        _ = signalled(&mut stop) => return Ok(()),
        dialed = dial => match dialed {
            Ok(conn) => conn,
            Err(e) => {
                let (elapsed, source) = match e {
                    RetryError::Exhausted { last, elapsed, .. } => (elapsed, last),
                    RetryError::Permanent(last) => (started.elapsed(), last),
                };
                tracing::error!(
                    url = %inner.endpoint.url,
                    error = %source,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "reconnect failed, giving up"
                );
                inner.lock().state = ConnectionState::Failed;
                return Err(HandlerError::ReconnectFailed { elapsed, source });
            }
        },
    };

    let (recovery, replays) = {
        let mut shared = inner.lock();
        if shared.state == ConnectionState::Closed {
            conn.close();
            return Ok(());
        }
        shared.conn = Some(conn.clone());
        shared.state = ConnectionState::Resubscribing;
        shared.recovery += 1;
        let recovery = shared.recovery;

        let subs = shared.registry.snapshot_and_clear();
        let mut replays = Vec::with_capacity(subs.len());
        for sub in subs {
            let feed = sub.feed.clone();
            let request = sub.request.with_fresh_id();
            let text = match request.to_text() {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(feed = %feed, error = %e, "failed to resubscribe");
                    continue;
                }
            };
            if let Err(e) = shared.registry.reserve_replay(sub, &request) {
                tracing::warn!(feed = %feed, error = %e, "failed to resubscribe");
                continue;
            }
            let pending = shared
                .correlator
                .register(&request.id, format!("resubscribe to {feed}"));
            if let Err(e) = conn.send(text) {
                shared.correlator.evict(pending.id());
                shared.registry.release(pending.id());
                tracing::warn!(feed = %feed, error = %e, "failed to resubscribe");
                continue;
            }
            replays.push((feed, pending));
        }
        (recovery, replays)
    };

    tracing::info!(
        url = %inner.endpoint.url,
        subscriptions = replays.len(),
        "reconnected"
    );
    tokio::spawn(await_replays(inner.clone(), recovery, replays));
    Ok(())
}

/// Wait for every replayed subscribe to be acknowledged. Failures are
/// logged and skipped; the others are unaffected. Only the batch of the
/// latest recovery moves the handler back to `Connected`.
async fn await_replays(inner: Arc<Inner>, recovery: u64, replays: Vec<(Feed, PendingReply)>) {
    let wait = inner.timeouts.request_wait;
    join_all(replays.into_iter().map(|(feed, pending)| {
        let inner = &inner;
        async move {
            let token = pending.id().to_string();
            match pending.wait(wait, |_| {}).await {
                Ok(Value::String(_)) => {
                    tracing::debug!(feed = %feed, "resubscribed");
                }
                Ok(other) => {
                    tracing::warn!(feed = %feed, result = %other, "failed to resubscribe: unexpected reply");
                }
                // The connection dropped again; the next recovery carries
                // this replay over.
                Err(HandlerError::NoResponse) => {}
                Err(e) => {
                    let mut shared = inner.lock();
                    shared.correlator.evict(&token);
                    shared.registry.release(&token);
                    drop(shared);
                    tracing::warn!(feed = %feed, error = %e, "failed to resubscribe");
                }
            }
        }
    }))
    .await;

    let mut shared = inner.lock();
    if shared.state == ConnectionState::Resubscribing && shared.recovery == recovery {
        shared.state = ConnectionState::Connected;
    }
}
