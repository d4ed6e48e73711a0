//! Subscription registry.
//!
//! Tracks at most one subscription per [`Feed`], first as a provisional
//! reservation while the subscribe request is in flight, then as an active
//! subscription indexed by its server-assigned id so push notifications can
//! be routed. Keeps the original subscribe request so the subscription can
//! be replayed after a reconnect.
//!
//! Reservations are keyed by the subscribe request's correlation id
//! ("token"). The read loop confirms a reservation under the same lock it
//! dispatches the acknowledgement with, so a push that immediately follows
//! the acknowledgement is already routable.

use std::collections::HashMap;

use crate::decode::Callback;
use crate::error::HandlerError;
use crate::feed::{Feed, SubscriptionId};
use crate::request::JsonRpcRequest;

/// An acknowledged subscription.
#[derive(Clone)]
pub struct Subscription {
    pub feed: Feed,
    /// The subscribe request last sent for this feed.
    pub request: JsonRpcRequest,
    pub callback: Callback,
    pub subscription_id: SubscriptionId,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("feed", &self.feed)
            .field("subscription_id", &self.subscription_id)
            .finish_non_exhaustive()
    }
}

enum Slot {
    /// Subscribe sent, waiting for the server. `previous` is set when this
    /// is a replay of a subscription that was active on a lost connection.
    Reserved {
        request: JsonRpcRequest,
        callback: Callback,
        previous: Option<SubscriptionId>,
    },
    Active(Subscription),
}

/// Feed → subscription map with subscription-id and token indices.
#[derive(Default)]
pub struct SubscriptionRegistry {
    feeds: HashMap<Feed, Slot>,
    by_id: HashMap<SubscriptionId, Feed>,
    by_token: HashMap<String, Feed>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `feed` for the subscribe `request`. Fails if the feed is
    /// already reserved or active.
    pub fn reserve(
        &mut self,
        feed: &Feed,
        request: &JsonRpcRequest,
        callback: Callback,
    ) -> Result<(), HandlerError> {
        if self.feeds.contains_key(feed) {
            return Err(HandlerError::AlreadySubscribed { feed: feed.clone() });
        }
        self.by_token.insert(request.id.key(), feed.clone());
        self.feeds.insert(
            feed.clone(),
            Slot::Reserved {
                request: request.clone(),
                callback,
                previous: None,
            },
        );
        Ok(())
    }

    /// Reserve `sub.feed` for replaying `sub` under `request` (a fresh-id
    /// copy of its subscribe request). Unlike a plain reservation, a replay
    /// still pending at the next [`snapshot_and_clear`] is carried over.
    ///
    /// [`snapshot_and_clear`]: SubscriptionRegistry::snapshot_and_clear
    pub fn reserve_replay(
        &mut self,
        sub: Subscription,
        request: &JsonRpcRequest,
    ) -> Result<(), HandlerError> {
        if self.feeds.contains_key(&sub.feed) {
            return Err(HandlerError::AlreadySubscribed { feed: sub.feed });
        }
        self.by_token.insert(request.id.key(), sub.feed.clone());
        self.feeds.insert(
            sub.feed,
            Slot::Reserved {
                request: request.clone(),
                callback: sub.callback,
                previous: Some(sub.subscription_id),
            },
        );
        Ok(())
    }

    /// `true` if `token` belongs to a pending reservation.
    pub fn is_reserved(&self, token: &str) -> bool {
        self.by_token.contains_key(token)
    }

    /// Upgrade the reservation made under `token` to an active
    /// subscription. Returns the feed, or `None` if no reservation is
    /// pending under `token` (rolled back, or cleared by a reconnect).
    pub fn confirm(&mut self, token: &str, subscription_id: SubscriptionId) -> Option<Feed> {
        let feed = self.by_token.remove(token)?;
        let Some(Slot::Reserved {
            request, callback, ..
        }) = self.feeds.remove(&feed)
        else {
            return None;
        };
        self.by_id.insert(subscription_id.clone(), feed.clone());
        self.feeds.insert(
            feed.clone(),
            Slot::Active(Subscription {
                feed: feed.clone(),
                request,
                callback,
                subscription_id,
            }),
        );
        Some(feed)
    }

    /// Roll back the reservation made under `token`. No-op once it was
    /// confirmed or released.
    pub fn release(&mut self, token: &str) -> Option<Feed> {
        let feed = self.by_token.remove(token)?;
        self.feeds.remove(&feed);
        Some(feed)
    }

    /// Look up the feed and callback for an inbound notification.
    pub fn route(&self, subscription_id: &SubscriptionId) -> Option<(Feed, Callback)> {
        let feed = self.by_id.get(subscription_id)?;
        match self.feeds.get(feed) {
            Some(Slot::Active(sub)) => Some((sub.feed.clone(), sub.callback.clone())),
            _ => None,
        }
    }

    /// Remove an active subscription from every index. Pending
    /// reservations are left alone.
    pub fn unregister(&mut self, feed: &Feed) -> Option<Subscription> {
        if !matches!(self.feeds.get(feed), Some(Slot::Active(_))) {
            return None;
        }
        match self.feeds.remove(feed)? {
            Slot::Active(sub) => {
                self.by_id.remove(&sub.subscription_id);
                Some(sub)
            }
            Slot::Reserved { .. } => None,
        }
    }

    /// `true` if the feed is reserved or active.
    pub fn contains(&self, feed: &Feed) -> bool {
        self.feeds.contains_key(feed)
    }

    /// `Some(None)` while the subscribe is pending, `Some(Some(id))` once
    /// active, `None` when not subscribed.
    pub fn subscription_id(&self, feed: &Feed) -> Option<Option<&SubscriptionId>> {
        match self.feeds.get(feed)? {
            Slot::Reserved { .. } => Some(None),
            Slot::Active(sub) => Some(Some(&sub.subscription_id)),
        }
    }

    /// Take every active subscription (and every replay still awaiting its
    /// acknowledgement) and empty the registry, reservations included.
    pub fn snapshot_and_clear(&mut self) -> Vec<Subscription> {
        self.by_id.clear();
        self.by_token.clear();
        let mut subs: Vec<Subscription> = self
            .feeds
            .drain()
            .filter_map(|(feed, slot)| match slot {
                Slot::Active(sub) => Some(sub),
                Slot::Reserved {
                    request,
                    callback,
                    previous: Some(subscription_id),
                } => Some(Subscription {
                    feed,
                    request,
                    callback,
                    subscription_id,
                }),
                Slot::Reserved { previous: None, .. } => None,
            })
            .collect();
        subs.sort_by(|a, b| a.feed.cmp(&b.feed));
        subs
    }

    /// Number of active subscriptions.
    pub fn active_len(&self) -> usize {
        self.by_id.len()
    }

    /// Number of feeds reserved or active.
    pub fn len(&self) -> usize {
        self.feeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::models::Notification;

    fn noop() -> Callback {
        Arc::new(|_| {})
    }

    #[test]
    fn second_reservation_is_rejected() {
        let mut reg = SubscriptionRegistry::new();
        let a = JsonRpcRequest::subscribe(&Feed::NEW_TXS, &json!({}));
        let b = JsonRpcRequest::subscribe(&Feed::NEW_TXS, &json!({}));
        reg.reserve(&Feed::NEW_TXS, &a, noop()).unwrap();
        let err = reg.reserve(&Feed::NEW_TXS, &b, noop()).unwrap_err();
        assert!(matches!(err, HandlerError::AlreadySubscribed { .. }));
        assert!(!reg.is_reserved(&b.id.key()));
    }

    #[test]
    fn confirm_and_route() {
        let mut reg = SubscriptionRegistry::new();
        let req = JsonRpcRequest::subscribe(&Feed::NEW_BLOCKS, &json!({}));

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let cb: Callback = Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        reg.reserve(&Feed::NEW_BLOCKS, &req, cb).unwrap();
        assert_eq!(reg.subscription_id(&Feed::NEW_BLOCKS), Some(None));

        assert_eq!(
            reg.confirm(&req.id.key(), "sub-1".into()),
            Some(Feed::NEW_BLOCKS)
        );
        assert!(!reg.is_reserved(&req.id.key()));

        let (feed, cb) = reg.route(&"sub-1".into()).unwrap();
        assert_eq!(feed, Feed::NEW_BLOCKS);
        cb(Ok(Notification::Raw(json!({}))));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(reg.route(&"sub-2".into()).is_none());
    }

    #[test]
    fn release_only_pending_token() {
        let mut reg = SubscriptionRegistry::new();
        let first = JsonRpcRequest::subscribe(&Feed::QUOTES, &json!({}));
        reg.reserve(&Feed::QUOTES, &first, noop()).unwrap();
        assert!(reg.release("someone-else").is_none());
        assert_eq!(reg.release(&first.id.key()), Some(Feed::QUOTES));
        assert!(!reg.contains(&Feed::QUOTES));

        // A later reservation for the same feed survives a stale release.
        let second = first.with_fresh_id();
        reg.reserve(&Feed::QUOTES, &second, noop()).unwrap();
        assert!(reg.release(&first.id.key()).is_none());
        assert!(reg.contains(&Feed::QUOTES));
    }

    #[test]
    fn confirm_after_clear_is_refused() {
        let mut reg = SubscriptionRegistry::new();
        let req = JsonRpcRequest::subscribe(&Feed::NEW_TXS, &json!({}));
        reg.reserve(&Feed::NEW_TXS, &req, noop()).unwrap();
        assert!(reg.snapshot_and_clear().is_empty());
        assert!(reg.confirm(&req.id.key(), "sub-1".into()).is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn unregister_removes_both_indices() {
        let mut reg = SubscriptionRegistry::new();
        let req = JsonRpcRequest::subscribe(&Feed::PENDING_TXS, &json!({}));
        reg.reserve(&Feed::PENDING_TXS, &req, noop()).unwrap();
        reg.confirm(&req.id.key(), "abc".into());
        let sub = reg.unregister(&Feed::PENDING_TXS).unwrap();
        assert_eq!(sub.subscription_id, SubscriptionId::from("abc"));
        assert!(reg.route(&"abc".into()).is_none());
        assert_eq!(reg.active_len(), 0);
        assert!(reg.is_empty());
    }

    #[test]
    fn unregister_ignores_pending() {
        let mut reg = SubscriptionRegistry::new();
        let req = JsonRpcRequest::subscribe(&Feed::TX_RECEIPTS, &json!({}));
        reg.reserve(&Feed::TX_RECEIPTS, &req, noop()).unwrap();
        assert!(reg.unregister(&Feed::TX_RECEIPTS).is_none());
        assert!(reg.is_reserved(&req.id.key()));
    }

    #[test]
    fn pending_replay_survives_snapshot() {
        let mut reg = SubscriptionRegistry::new();
        let req = JsonRpcRequest::subscribe(&Feed::NEW_BLOCKS, &json!({}));
        reg.reserve(&Feed::NEW_BLOCKS, &req, noop()).unwrap();
        reg.confirm(&req.id.key(), "old".into());

        let mut snapshot = reg.snapshot_and_clear();
        let sub = snapshot.pop().unwrap();
        let replay = sub.request.with_fresh_id();
        reg.reserve_replay(sub, &replay).unwrap();
        assert_eq!(reg.subscription_id(&Feed::NEW_BLOCKS), Some(None));
        assert!(reg.route(&"old".into()).is_none());

        let again = reg.snapshot_and_clear();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].request.id, replay.id);
        assert_eq!(again[0].subscription_id, SubscriptionId::from("old"));
    }

    #[test]
    fn snapshot_takes_only_active() {
        let mut reg = SubscriptionRegistry::new();
        let a = JsonRpcRequest::subscribe(&Feed::NEW_TXS, &json!({"include": ["tx_hash"]}));
        let b = JsonRpcRequest::subscribe(&Feed::NEW_BLOCKS, &json!({}));
        reg.reserve(&Feed::NEW_TXS, &a, noop()).unwrap();
        reg.reserve(&Feed::NEW_BLOCKS, &b, noop()).unwrap();
        reg.confirm(&a.id.key(), "x".into());

        let snapshot = reg.snapshot_and_clear();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].feed, Feed::NEW_TXS);
        assert_eq!(snapshot[0].request.params, a.params);
        assert!(reg.is_empty());
        assert!(!reg.is_reserved(&b.id.key()));
        assert_eq!(reg.active_len(), 0);
    }
}
