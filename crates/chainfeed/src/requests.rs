//! Typed requests: transactions, bundles, transaction monitoring and the
//! intent/quote exchange.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Serialize, Serializer};
use serde_json::{json, Value};

use chainfeed_core::config::DEFAULT_NETWORK;
use chainfeed_core::{Feed, HandlerError, HandlerKind};

use crate::client::Client;

pub const BLXR_TX: &str = chainfeed_grpc::BLXR_TX;
pub const BLXR_PRIVATE_TX: &str = "blxr_private_tx";
pub const SUBMIT_BUNDLE: &str = "blxr_submit_bundle";
pub const BSC_BUNDLE_PRICE: &str = "bsc_get_bundle_price";
pub const START_MONITOR_TX: &str = "start_monitor_transaction";
pub const STOP_MONITOR_TX: &str = "stop_monitor_transaction";
pub const SUBMIT_INTENT: &str = "blxr_submit_intent";
pub const SUBMIT_INTENT_SOLUTION: &str = "blxr_submit_intent_solution";
pub const GET_INTENT_SOLUTIONS: &str = "blxr_get_intent_solutions";
pub const SUBMIT_QUOTE: &str = "blxr_submit_quote";

/// Serialize raw bytes as standard base64.
pub(crate) fn base64_bytes<T, S>(bytes: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    T: AsRef<[u8]>,
    S: Serializer,
{
    serializer.serialize_str(&STANDARD.encode(bytes))
}

fn is_false(b: &bool) -> bool {
    !*b
}

pub(crate) fn require(field: &str, present: bool) -> Result<(), HandlerError> {
    if present {
        Ok(())
    } else {
        Err(HandlerError::InvalidParams(format!("{field} is required")))
    }
}

/// `blxr_tx` params.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SendTxParams {
    /// Raw signed transaction, hex without `0x`.
    pub transaction: String,
    /// Defaults to the client's network.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blockchain_network: Option<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub nonce_monitoring: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub validators_only: bool,
    /// Not available on Ethereum Mainnet.
    #[serde(skip_serializing_if = "is_false")]
    pub next_validator: bool,
    /// Milliseconds to wait for the next validator before falling back.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<u32>,
    #[serde(skip_serializing_if = "is_false")]
    pub node_validation: bool,
}

/// `blxr_private_tx` params.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SendPrivateTxParams {
    pub transaction: String,
    /// Seconds to keep the transaction private before it goes public.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
    #[serde(skip_serializing_if = "is_false")]
    pub frontrunning: bool,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub mev_builders: BTreeMap<String, String>,
}

/// Ethereum `blxr_submit_bundle` params.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EthBundleParams {
    #[serde(rename = "transaction")]
    pub transactions: Vec<String>,
    /// Hex block number the bundle targets.
    pub block_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_timestamp: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_timestamp: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reverting_hashes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub frontrunning: bool,
    #[serde(rename = "enable_backrunme", skip_serializing_if = "is_false")]
    pub backrun_me: bool,
    #[serde(
        rename = "backrunme_reward_address",
        skip_serializing_if = "Option::is_none"
    )]
    pub backrun_me_reward_address: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub mev_builders: BTreeMap<String, String>,
}

/// BSC `blxr_submit_bundle` params. The client's network is added on send.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BscBundleParams {
    #[serde(rename = "transaction")]
    pub transactions: Vec<String>,
    pub block_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_timestamp: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_timestamp: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reverting_hashes: Vec<String>,
    pub uuid: String,
    #[serde(skip_serializing_if = "is_false")]
    pub avoid_mixed_bundles: bool,
    pub original_sender_account_id: String,
    pub priority_fee_refund: bool,
    pub refund_recipient: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocks_count: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dropping_tx_hashes: Vec<String>,
    pub end_of_block: bool,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub mev_builders: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct WithNetwork<'a, P> {
    #[serde(flatten)]
    params: &'a P,
    blockchain_network: &'a str,
}

/// `blxr_submit_intent` payload, pre-signed by the dApp.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SubmitIntentParams {
    pub dapp_address: String,
    pub sender_address: String,
    #[serde(serialize_with = "base64_bytes")]
    pub intent: Vec<u8>,
    #[serde(serialize_with = "base64_bytes")]
    pub hash: Vec<u8>,
    #[serde(serialize_with = "base64_bytes")]
    pub signature: Vec<u8>,
}

/// `blxr_submit_intent_solution` payload, pre-signed by the solver.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SubmitIntentSolutionParams {
    pub solver_address: String,
    pub intent_id: String,
    #[serde(serialize_with = "base64_bytes")]
    pub intent_solution: Vec<u8>,
    #[serde(serialize_with = "base64_bytes")]
    pub hash: Vec<u8>,
    #[serde(serialize_with = "base64_bytes")]
    pub signature: Vec<u8>,
}

/// `blxr_get_intent_solutions` query, pre-signed by the dApp or sender.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IntentSolutionsQuery {
    pub dapp_or_sender_address: String,
    pub intent_id: String,
    #[serde(serialize_with = "base64_bytes")]
    pub hash: Vec<u8>,
    #[serde(serialize_with = "base64_bytes")]
    pub signature: Vec<u8>,
}

/// `blxr_submit_quote` payload, pre-signed by the solver.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SubmitQuoteParams {
    pub dapp_address: String,
    pub solver_address: String,
    #[serde(serialize_with = "base64_bytes")]
    pub quote: Vec<u8>,
    #[serde(serialize_with = "base64_bytes")]
    pub hash: Vec<u8>,
    #[serde(serialize_with = "base64_bytes")]
    pub signature: Vec<u8>,
}

impl Client {
    /// Send a signed transaction through the BDN.
    pub async fn send_tx(&self, mut params: SendTxParams) -> Result<Value, HandlerError> {
        let network = params
            .blockchain_network
            .get_or_insert_with(|| self.network().to_string());
        if params.next_validator && network.as_str() == DEFAULT_NETWORK {
            return Err(HandlerError::InvalidParams(
                "next_validator is not supported on Ethereum Mainnet".into(),
            ));
        }
        self.request_with(BLXR_TX, &params).await
    }

    /// Send a transaction to block builders only. Cloud API on Mainnet only.
    pub async fn send_private_tx(&self, params: SendPrivateTxParams) -> Result<Value, HandlerError> {
        if self.network() != DEFAULT_NETWORK {
            return Err(HandlerError::Unsupported(format!(
                "private transactions on {}",
                self.network()
            )));
        }
        self.require_cloud_api("private transactions")?;
        self.request_with(BLXR_PRIVATE_TX, &params).await
    }

    pub async fn send_eth_bundle(&self, params: EthBundleParams) -> Result<Value, HandlerError> {
        self.request_with(SUBMIT_BUNDLE, &params).await
    }

    pub async fn send_bsc_bundle(&self, params: BscBundleParams) -> Result<Value, HandlerError> {
        let request = WithNetwork {
            params: &params,
            blockchain_network: self.network(),
        };
        self.request_with(SUBMIT_BUNDLE, &request).await
    }

    /// Current BSC bundle price.
    pub async fn bsc_bundle_price(&self) -> Result<Value, HandlerError> {
        self.request(BSC_BUNDLE_PRICE, Value::Null).await
    }

    /// Start monitoring raw `transactions` on the active transaction status
    /// subscription. Cloud API only.
    pub async fn monitor_txs(&self, transactions: Vec<String>) -> Result<(), HandlerError> {
        self.require_cloud_api("transaction monitoring")?;
        let subscription = self.tx_status_subscription()?;
        self.request(
            START_MONITOR_TX,
            json!({"transactions": transactions, "subscription_id": subscription}),
        )
        .await?;
        Ok(())
    }

    /// Stop monitoring the given transactions and drop the transaction
    /// status subscription. Cloud API only.
    pub async fn stop_monitoring_txs(
        &self,
        transactions: Vec<String>,
        transaction_hashes: Vec<String>,
    ) -> Result<(), HandlerError> {
        self.require_cloud_api("transaction monitoring")?;
        let subscription = self.tx_status_subscription()?;
        self.request(
            STOP_MONITOR_TX,
            json!({
                "transactions": transactions,
                "transaction_hash": transaction_hashes,
                "subscription_id": subscription,
            }),
        )
        .await?;
        self.unsubscribe(&Feed::TX_STATUS).await
    }

    fn tx_status_subscription(&self) -> Result<String, HandlerError> {
        self.subscription_id(&Feed::TX_STATUS)
            .map(|id| id.0)
            .ok_or(HandlerError::NotSubscribed {
                feed: Feed::TX_STATUS,
            })
    }

    /// Gateway only.
    pub async fn submit_intent(&self, params: SubmitIntentParams) -> Result<Value, HandlerError> {
        self.require_gateway("intent submission")?;
        require("dapp address", !params.dapp_address.is_empty())?;
        require("sender address", !params.sender_address.is_empty())?;
        require("intent", !params.intent.is_empty())?;
        require("hash", !params.hash.is_empty())?;
        require("signature", !params.signature.is_empty())?;
        self.request_with(SUBMIT_INTENT, &params).await
    }

    /// Gateway only.
    pub async fn submit_intent_solution(
        &self,
        params: SubmitIntentSolutionParams,
    ) -> Result<Value, HandlerError> {
        self.require_gateway("intent solution submission")?;
        require("solver address", !params.solver_address.is_empty())?;
        require("intent id", !params.intent_id.is_empty())?;
        require("intent solution", !params.intent_solution.is_empty())?;
        require("hash", !params.hash.is_empty())?;
        require("signature", !params.signature.is_empty())?;
        self.request_with(SUBMIT_INTENT_SOLUTION, &params).await
    }

    /// Solutions submitted so far for one intent. WebSocket gateway only.
    pub async fn intent_solutions(
        &self,
        query: IntentSolutionsQuery,
    ) -> Result<Value, HandlerError> {
        self.require_kind(HandlerKind::GatewayWs, "intent solution lookup")?;
        require("intent id", !query.intent_id.is_empty())?;
        require("dapp or sender address", !query.dapp_or_sender_address.is_empty())?;
        require("hash", !query.hash.is_empty())?;
        require("signature", !query.signature.is_empty())?;
        self.request_with(GET_INTENT_SOLUTIONS, &query).await
    }

    /// Gateway only.
    pub async fn submit_quote(&self, params: SubmitQuoteParams) -> Result<Value, HandlerError> {
        self.require_gateway("quote submission")?;
        require("dapp address", !params.dapp_address.is_empty())?;
        require("solver address", !params.solver_address.is_empty())?;
        require("quote", !params.quote.is_empty())?;
        require("hash", !params.hash.is_empty())?;
        require("signature", !params.signature.is_empty())?;
        self.request_with(SUBMIT_QUOTE, &params).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::client::testing::{Call, RecordingHandler};

    fn last_request(handler: &RecordingHandler) -> (String, Value) {
        match handler.calls().pop() {
            Some(Call::Request(method, params)) => (method, params),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_tx_defaults_network_from_client() {
        let handler = RecordingHandler::new(HandlerKind::GatewayWs);
        let client = handler.client("BSC-Mainnet");

        client
            .send_tx(SendTxParams {
                transaction: "f86b01".into(),
                next_validator: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(
            last_request(&handler),
            (
                "blxr_tx".to_string(),
                json!({
                    "transaction": "f86b01",
                    "blockchain_network": "BSC-Mainnet",
                    "next_validator": true,
                })
            )
        );
    }

    #[tokio::test]
    async fn next_validator_is_rejected_on_mainnet() {
        let handler = RecordingHandler::new(HandlerKind::CloudApiWs);
        let err = handler
            .client("Mainnet")
            .send_tx(SendTxParams {
                transaction: "f86b01".into(),
                next_validator: true,
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::InvalidParams(_)));
        assert!(handler.calls().is_empty());

        // An explicit non-Mainnet network wins over the client's.
        let client = handler.client("Mainnet");
        client
            .send_tx(SendTxParams {
                transaction: "f86b01".into(),
                blockchain_network: Some("BSC-Mainnet".into()),
                next_validator: true,
                ..Default::default()
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn private_tx_needs_cloud_api_on_mainnet() {
        let bsc = RecordingHandler::new(HandlerKind::CloudApiWs).client("BSC-Mainnet");
        assert!(matches!(
            bsc.send_private_tx(SendPrivateTxParams::default()).await,
            Err(HandlerError::Unsupported(_))
        ));

        let gateway = RecordingHandler::new(HandlerKind::GatewayWs).client("Mainnet");
        assert!(matches!(
            gateway.send_private_tx(SendPrivateTxParams::default()).await,
            Err(HandlerError::Unsupported(_))
        ));

        let handler = RecordingHandler::new(HandlerKind::CloudApiWs);
        handler
            .client("Mainnet")
            .send_private_tx(SendPrivateTxParams {
                transaction: "f86b01".into(),
                timeout: Some(30),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(
            last_request(&handler),
            (
                "blxr_private_tx".to_string(),
                json!({"transaction": "f86b01", "timeout": 30})
            )
        );
    }

    #[tokio::test]
    async fn bsc_bundle_carries_network() {
        let handler = RecordingHandler::new(HandlerKind::GatewayWs);
        handler
            .client("BSC-Mainnet")
            .send_bsc_bundle(BscBundleParams {
                transactions: vec!["aa".into(), "bb".into()],
                block_number: "0x10".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let (method, params) = last_request(&handler);
        assert_eq!(method, "blxr_submit_bundle");
        assert_eq!(params["transaction"], json!(["aa", "bb"]));
        assert_eq!(params["block_number"], "0x10");
        assert_eq!(params["blockchain_network"], "BSC-Mainnet");
        assert_eq!(params["end_of_block"], false);
    }

    #[tokio::test]
    async fn eth_bundle_uses_wire_names() {
        let handler = RecordingHandler::new(HandlerKind::CloudApiWs);
        handler
            .client("Mainnet")
            .send_eth_bundle(EthBundleParams {
                transactions: vec!["aa".into()],
                block_number: "0x20".into(),
                backrun_me: true,
                mev_builders: BTreeMap::from([("all".into(), String::new())]),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(
            last_request(&handler).1,
            json!({
                "transaction": ["aa"],
                "block_number": "0x20",
                "enable_backrunme": true,
                "mev_builders": {"all": ""},
            })
        );
    }

    #[tokio::test]
    async fn bundle_price_sends_null_params() {
        let handler = RecordingHandler::new(HandlerKind::GatewayWs);
        handler.client("BSC-Mainnet").bsc_bundle_price().await.unwrap();
        assert_eq!(
            last_request(&handler),
            ("bsc_get_bundle_price".to_string(), Value::Null)
        );
    }

    #[tokio::test]
    async fn monitoring_requires_tx_status_subscription() {
        let handler = RecordingHandler::new(HandlerKind::CloudApiWs);
        let client = handler.client("Mainnet");

        assert!(matches!(
            client.monitor_txs(vec!["aa".into()]).await,
            Err(HandlerError::NotSubscribed { .. })
        ));

        client.on_tx_status(vec![], Arc::new(|_| {})).await.unwrap();
        client.monitor_txs(vec!["aa".into()]).await.unwrap();
        client
            .stop_monitoring_txs(vec!["aa".into()], vec!["0xhash".into()])
            .await
            .unwrap();

        let calls = handler.calls();
        assert_eq!(
            calls[2],
            Call::Request(
                "stop_monitor_transaction".into(),
                json!({
                    "transactions": ["aa"],
                    "transaction_hash": ["0xhash"],
                    "subscription_id": "sub-transactionStatus",
                })
            )
        );
        assert_eq!(calls[3], Call::Unsubscribe(Feed::TX_STATUS));
    }

    #[tokio::test]
    async fn monitoring_is_cloud_api_only() {
        let client = RecordingHandler::new(HandlerKind::GatewayGrpc).client("Mainnet");
        assert!(matches!(
            client.monitor_txs(vec![]).await,
            Err(HandlerError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn quote_bytes_are_base64() {
        let handler = RecordingHandler::new(HandlerKind::GatewayGrpc);
        handler
            .client("Mainnet")
            .submit_quote(SubmitQuoteParams {
                dapp_address: "0xdapp".into(),
                solver_address: "0xsolver".into(),
                quote: b"quote".to_vec(),
                hash: vec![0, 1],
                signature: vec![2],
            })
            .await
            .unwrap();
        assert_eq!(
            last_request(&handler),
            (
                "blxr_submit_quote".to_string(),
                json!({
                    "dapp_address": "0xdapp",
                    "solver_address": "0xsolver",
                    "quote": "cXVvdGU=",
                    "hash": "AAE=",
                    "signature": "Ag==",
                })
            )
        );
    }

    #[tokio::test]
    async fn intent_solution_lookup_is_ws_gateway_only() {
        let query = IntentSolutionsQuery {
            dapp_or_sender_address: "0xdapp".into(),
            intent_id: "c1b0".into(),
            hash: vec![1],
            signature: vec![2],
        };
        let grpc = RecordingHandler::new(HandlerKind::GatewayGrpc).client("Mainnet");
        assert!(matches!(
            grpc.intent_solutions(query.clone()).await,
            Err(HandlerError::Unsupported(_))
        ));

        let handler = RecordingHandler::new(HandlerKind::GatewayWs);
        handler.client("Mainnet").intent_solutions(query).await.unwrap();
        assert_eq!(last_request(&handler).0, "blxr_get_intent_solutions");
    }

    #[tokio::test]
    async fn submissions_validate_before_sending() {
        let handler = RecordingHandler::new(HandlerKind::GatewayWs);
        let client = handler.client("Mainnet");
        let err = client
            .submit_intent_solution(SubmitIntentSolutionParams {
                solver_address: "0xsolver".into(),
                intent_solution: vec![1],
                hash: vec![1],
                signature: vec![1],
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::InvalidParams(msg) if msg.contains("intent id")));

        let cloud = RecordingHandler::new(HandlerKind::CloudApiWs).client("Mainnet");
        assert!(matches!(
            cloud.submit_intent(SubmitIntentParams::default()).await,
            Err(HandlerError::Unsupported(_))
        ));
        assert!(handler.calls().is_empty());
    }
}
