//! Typed feed subscriptions.
//!
//! Every `on_*` method fills in the feed's default `include` list when the
//! caller leaves it empty and enforces which handler kinds carry the feed.
//! Signed fields (`hash`, `signature`) must already be signed; they are sent
//! base64-encoded.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::json;

use chainfeed_core::{Callback, Feed, HandlerError};

use crate::client::Client;
use crate::requests::{base64_bytes, require};

fn include_or(include: Vec<String>, default: &[&str]) -> Vec<String> {
    if include.is_empty() {
        default.iter().map(|s| s.to_string()).collect()
    } else {
        include
    }
}

/// `newTxs` params.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NewTxParams {
    /// Defaults to `["tx_hash"]`.
    pub include: Vec<String>,
    /// SQL-like filter expression.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blockchain_network: Option<String>,
    /// DeFi project name for simulated feeds, e.g. `uniswapV2`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

/// `pendingTxs` params.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PendingTxParams {
    /// Defaults to `["tx_hash"]`.
    pub include: Vec<String>,
    /// Also deliver transactions already seen.
    pub duplicates: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blockchain_network: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

/// `newBlocks` / `bdnBlocks` params.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BlockParams {
    pub include: Vec<String>,
}

/// `txReceipts` params.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TxReceiptParams {
    /// Defaults to `["block_hash"]`.
    pub include: Vec<String>,
}

/// `ethOnBlock` params. At least one call is required.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OnBlockParams {
    pub include: Vec<String>,
    #[serde(rename = "call-params")]
    pub call_params: Vec<OnBlockCall>,
}

/// One RPC call evaluated by the server on every new block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OnBlockCall {
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Echoed back in the notification to tell calls apart.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub args: BTreeMap<String, String>,
}

impl OnBlockCall {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            tag: None,
            name: None,
            args: BTreeMap::new(),
        }
    }

    pub fn eth_call(
        to: impl Into<String>,
        gas: impl Into<String>,
        value: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        Self::new("eth_call")
            .arg("to", to)
            .arg("gas", gas)
            .arg("value", value)
            .arg("data", data)
    }

    pub fn get_balance(address: impl Into<String>) -> Self {
        Self::new("eth_getBalance").arg("address", address)
    }

    pub fn get_transaction_count(address: impl Into<String>) -> Self {
        Self::new("eth_getTransactionCount").arg("address", address)
    }

    pub fn get_code(address: impl Into<String>) -> Self {
        Self::new("eth_getCode").arg("address", address)
    }

    pub fn get_storage_at(address: impl Into<String>, pos: impl Into<String>) -> Self {
        Self::new("eth_getStorageAt")
            .arg("address", address)
            .arg("pos", pos)
    }

    pub fn block_number() -> Self {
        Self::new("eth_blockNumber")
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }
}

/// `userIntentFeed` params, pre-signed by the solver.
#[derive(Debug, Clone, Default)]
pub struct IntentsParams {
    pub solver_address: String,
    /// Keccak-256 of the solver address.
    pub hash: Vec<u8>,
    /// Solver's signature over `hash`.
    pub signature: Vec<u8>,
    /// Only intents for this dApp.
    pub dapp_address: Option<String>,
}

/// `userIntentSolutionsFeed` params, pre-signed by the dApp.
#[derive(Debug, Clone, Default)]
pub struct IntentSolutionsParams {
    pub dapp_address: String,
    pub hash: Vec<u8>,
    pub signature: Vec<u8>,
}

/// `quotesFeed` params.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QuotesParams {
    pub dapp_address: String,
}

#[derive(Serialize)]
struct SignedFeedRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    solver_address: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dapp_address: Option<&'a str>,
    #[serde(serialize_with = "base64_bytes")]
    hash: &'a [u8],
    #[serde(serialize_with = "base64_bytes")]
    signature: &'a [u8],
    #[serde(skip_serializing_if = "Option::is_none")]
    filters: Option<String>,
}

impl Client {
    /// Subscribe to transactions as the BDN first sees them.
    pub async fn on_new_txs(
        &self,
        mut params: NewTxParams,
        callback: Callback,
    ) -> Result<(), HandlerError> {
        params.include = include_or(params.include, &["tx_hash"]);
        self.subscribe_with(Feed::NEW_TXS, &params, callback).await
    }

    pub async fn unsubscribe_new_txs(&self) -> Result<(), HandlerError> {
        self.unsubscribe(&Feed::NEW_TXS).await
    }

    /// Subscribe to transactions entering the node's mempool.
    pub async fn on_pending_txs(
        &self,
        mut params: PendingTxParams,
        callback: Callback,
    ) -> Result<(), HandlerError> {
        params.include = include_or(params.include, &["tx_hash"]);
        self.subscribe_with(Feed::PENDING_TXS, &params, callback).await
    }

    pub async fn unsubscribe_pending_txs(&self) -> Result<(), HandlerError> {
        self.unsubscribe(&Feed::PENDING_TXS).await
    }

    pub async fn on_new_blocks(
        &self,
        mut params: BlockParams,
        callback: Callback,
    ) -> Result<(), HandlerError> {
        params.include = include_or(params.include, &["hash", "header"]);
        self.subscribe_with(Feed::NEW_BLOCKS, &params, callback).await
    }

    pub async fn unsubscribe_new_blocks(&self) -> Result<(), HandlerError> {
        self.unsubscribe(&Feed::NEW_BLOCKS).await
    }

    /// Subscribe to blocks as propagated by the BDN, before the node
    /// validates them.
    pub async fn on_bdn_blocks(
        &self,
        mut params: BlockParams,
        callback: Callback,
    ) -> Result<(), HandlerError> {
        params.include = include_or(params.include, &["hash"]);
        self.subscribe_with(Feed::BDN_BLOCKS, &params, callback).await
    }

    pub async fn unsubscribe_bdn_blocks(&self) -> Result<(), HandlerError> {
        self.unsubscribe(&Feed::BDN_BLOCKS).await
    }

    pub async fn on_tx_receipts(
        &self,
        mut params: TxReceiptParams,
        callback: Callback,
    ) -> Result<(), HandlerError> {
        params.include = include_or(params.include, &["block_hash"]);
        self.subscribe_with(Feed::TX_RECEIPTS, &params, callback).await
    }

    pub async fn unsubscribe_tx_receipts(&self) -> Result<(), HandlerError> {
        self.unsubscribe(&Feed::TX_RECEIPTS).await
    }

    /// Evaluate `call_params` against the chain state of every new block.
    pub async fn on_eth_on_block(
        &self,
        params: OnBlockParams,
        callback: Callback,
    ) -> Result<(), HandlerError> {
        if params.call_params.is_empty() {
            return Err(HandlerError::InvalidParams(
                "at least one call param is required".into(),
            ));
        }
        self.subscribe_with(Feed::ETH_ON_BLOCK, &params, callback).await
    }

    pub async fn unsubscribe_eth_on_block(&self) -> Result<(), HandlerError> {
        self.unsubscribe(&Feed::ETH_ON_BLOCK).await
    }

    /// Subscribe to status updates of monitored transactions, then start
    /// monitoring `transactions` (raw, without `0x`) if any are given.
    ///
    /// Cloud API only.
    pub async fn on_tx_status(
        &self,
        transactions: Vec<String>,
        callback: Callback,
    ) -> Result<(), HandlerError> {
        self.require_cloud_api("transaction status feed")?;
        self.subscribe_with(
            Feed::TX_STATUS,
            &json!({"include": ["tx_hash", "status"]}),
            callback,
        )
        .await?;
        if !transactions.is_empty() {
            self.monitor_txs(transactions).await?;
        }
        Ok(())
    }

    pub async fn unsubscribe_tx_status(&self) -> Result<(), HandlerError> {
        self.unsubscribe(&Feed::TX_STATUS).await
    }

    /// Subscribe to user intents. Gateway only.
    pub async fn on_user_intents(
        &self,
        params: IntentsParams,
        callback: Callback,
    ) -> Result<(), HandlerError> {
        self.require_gateway("intents feed")?;
        require("solver address", !params.solver_address.is_empty())?;
        require("hash", !params.hash.is_empty())?;
        require("signature", !params.signature.is_empty())?;
        let request = SignedFeedRequest {
            solver_address: Some(&params.solver_address),
            dapp_address: None,
            hash: &params.hash,
            signature: &params.signature,
            filters: params
                .dapp_address
                .as_deref()
                .filter(|a| !a.is_empty())
                .map(|a| format!("dapp_address = {a}")),
        };
        self.subscribe_with(Feed::USER_INTENTS, &request, callback)
            .await
    }

    pub async fn unsubscribe_user_intents(&self) -> Result<(), HandlerError> {
        self.unsubscribe(&Feed::USER_INTENTS).await
    }

    /// Subscribe to solutions for the dApp's intents. Gateway only.
    pub async fn on_intent_solutions(
        &self,
        params: IntentSolutionsParams,
        callback: Callback,
    ) -> Result<(), HandlerError> {
        self.require_gateway("intent solutions feed")?;
        require("dapp address", !params.dapp_address.is_empty())?;
        require("hash", !params.hash.is_empty())?;
        require("signature", !params.signature.is_empty())?;
        let request = SignedFeedRequest {
            solver_address: None,
            dapp_address: Some(&params.dapp_address),
            hash: &params.hash,
            signature: &params.signature,
            filters: None,
        };
        self.subscribe_with(Feed::USER_INTENT_SOLUTIONS, &request, callback)
            .await
    }

    pub async fn unsubscribe_intent_solutions(&self) -> Result<(), HandlerError> {
        self.unsubscribe(&Feed::USER_INTENT_SOLUTIONS).await
    }

    /// Subscribe to solver quotes for a dApp. Gateway only.
    pub async fn on_quotes(
        &self,
        params: QuotesParams,
        callback: Callback,
    ) -> Result<(), HandlerError> {
        self.require_gateway("quotes feed")?;
        require("dapp address", !params.dapp_address.is_empty())?;
        self.subscribe_with(Feed::QUOTES, &params, callback).await
    }

    pub async fn unsubscribe_quotes(&self) -> Result<(), HandlerError> {
        self.unsubscribe(&Feed::QUOTES).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{json, Value};

    use super::*;
    use crate::client::testing::{Call, RecordingHandler};
    use chainfeed_core::HandlerKind;

    fn ignore() -> Callback {
        Arc::new(|_| {})
    }

    fn subscribed(handler: &RecordingHandler) -> Vec<(Feed, Value)> {
        handler
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Subscribe(feed, params) => Some((feed, params)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn default_includes_are_filled_in() {
        let handler = RecordingHandler::new(HandlerKind::CloudApiWs);
        let client = handler.client("Mainnet");

        client.on_new_txs(NewTxParams::default(), ignore()).await.unwrap();
        client
            .on_pending_txs(PendingTxParams::default(), ignore())
            .await
            .unwrap();
        client.on_new_blocks(BlockParams::default(), ignore()).await.unwrap();
        client.on_bdn_blocks(BlockParams::default(), ignore()).await.unwrap();
        client
            .on_tx_receipts(TxReceiptParams::default(), ignore())
            .await
            .unwrap();

        assert_eq!(
            subscribed(&handler),
            vec![
                (Feed::NEW_TXS, json!({"include": ["tx_hash"]})),
                (
                    Feed::PENDING_TXS,
                    json!({"include": ["tx_hash"], "duplicates": false})
                ),
                (Feed::NEW_BLOCKS, json!({"include": ["hash", "header"]})),
                (Feed::BDN_BLOCKS, json!({"include": ["hash"]})),
                (Feed::TX_RECEIPTS, json!({"include": ["block_hash"]})),
            ]
        );
    }

    #[tokio::test]
    async fn explicit_include_and_filters_are_kept() {
        let handler = RecordingHandler::new(HandlerKind::GatewayGrpc);
        let client = handler.client("Mainnet");

        let params = NewTxParams {
            include: vec!["raw_tx".into()],
            filters: Some("{value} > 1e18".into()),
            ..Default::default()
        };
        client.on_new_txs(params, ignore()).await.unwrap();
        assert_eq!(
            subscribed(&handler),
            vec![(
                Feed::NEW_TXS,
                json!({"include": ["raw_tx"], "filters": "{value} > 1e18"})
            )]
        );
    }

    #[tokio::test]
    async fn eth_on_block_needs_a_call() {
        let handler = RecordingHandler::new(HandlerKind::GatewayWs);
        let client = handler.client("Mainnet");

        let err = client
            .on_eth_on_block(OnBlockParams::default(), ignore())
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::InvalidParams(_)));
        assert!(handler.calls().is_empty());

        let params = OnBlockParams {
            include: vec![],
            call_params: vec![
                OnBlockCall::get_balance("0xabc").name("balance"),
                OnBlockCall::block_number().tag("latest"),
            ],
        };
        client.on_eth_on_block(params, ignore()).await.unwrap();
        assert_eq!(
            subscribed(&handler),
            vec![(
                Feed::ETH_ON_BLOCK,
                json!({
                    "include": [],
                    "call-params": [
                        {"method": "eth_getBalance", "name": "balance", "address": "0xabc"},
                        {"method": "eth_blockNumber", "tag": "latest"},
                    ],
                })
            )]
        );
    }

    #[tokio::test]
    async fn tx_status_is_cloud_api_only() {
        let handler = RecordingHandler::new(HandlerKind::GatewayWs);
        let err = handler
            .client("Mainnet")
            .on_tx_status(vec![], ignore())
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Unsupported(_)));
        assert!(handler.calls().is_empty());
    }

    #[tokio::test]
    async fn tx_status_with_transactions_starts_monitoring() {
        let handler = RecordingHandler::new(HandlerKind::CloudApiWs);
        handler
            .client("Mainnet")
            .on_tx_status(vec!["f86b01".into()], ignore())
            .await
            .unwrap();
        assert_eq!(
            handler.calls(),
            vec![
                Call::Subscribe(Feed::TX_STATUS, json!({"include": ["tx_hash", "status"]})),
                Call::Request(
                    "start_monitor_transaction".into(),
                    json!({
                        "transactions": ["f86b01"],
                        "subscription_id": "sub-transactionStatus",
                    })
                ),
            ]
        );
    }

    #[tokio::test]
    async fn intents_are_signed_and_base64_encoded() {
        let handler = RecordingHandler::new(HandlerKind::GatewayWs);
        let client = handler.client("Mainnet");

        let params = IntentsParams {
            solver_address: "0xsolver".into(),
            hash: vec![1, 2, 3],
            signature: vec![0xff],
            dapp_address: Some("0xdapp".into()),
        };
        client.on_user_intents(params, ignore()).await.unwrap();
        assert_eq!(
            subscribed(&handler),
            vec![(
                Feed::USER_INTENTS,
                json!({
                    "solver_address": "0xsolver",
                    "hash": "AQID",
                    "signature": "/w==",
                    "filters": "dapp_address = 0xdapp",
                })
            )]
        );
    }

    #[tokio::test]
    async fn intent_feeds_require_gateway_and_signature() {
        let cloud = RecordingHandler::new(HandlerKind::CloudApiWs).client("Mainnet");
        let err = cloud
            .on_quotes(
                QuotesParams {
                    dapp_address: "0xdapp".into(),
                },
                ignore(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Unsupported(_)));

        let gateway = RecordingHandler::new(HandlerKind::GatewayGrpc).client("Mainnet");
        let err = gateway
            .on_intent_solutions(
                IntentSolutionsParams {
                    dapp_address: "0xdapp".into(),
                    hash: vec![1],
                    signature: vec![],
                },
                ignore(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::InvalidParams(msg) if msg.contains("signature")));
    }

    #[tokio::test]
    async fn unsubscribe_helpers_target_their_feed() {
        let handler = RecordingHandler::new(HandlerKind::GatewayWs);
        let client = handler.client("Mainnet");
        client.unsubscribe_quotes().await.unwrap();
        client.unsubscribe_eth_on_block().await.unwrap();
        assert_eq!(
            handler.calls(),
            vec![
                Call::Unsubscribe(Feed::QUOTES),
                Call::Unsubscribe(Feed::ETH_ON_BLOCK),
            ]
        );
    }
}
