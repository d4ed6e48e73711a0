//! Notification payloads delivered to subscribers.
//!
//! The handlers never look inside these; they are decoded per feed by the
//! [`DecoderRegistry`](crate::decode::DecoderRegistry). Every field is
//! optional on the wire because the server only sends what the subscriber
//! asked for in its `include` list.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A decoded push notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// `newTxs` / `pendingTxs`.
    NewTx(NewTxNotification),
    /// `newBlocks` / `bdnBlocks`.
    Block(BlockNotification),
    /// `ethOnBlock`.
    OnBlock(OnBlockNotification),
    /// `transactionStatus`.
    TxStatus(TxStatusNotification),
    /// `txReceipts`.
    TxReceipt(TxReceiptNotification),
    /// `userIntentFeed`.
    Intent(IntentNotification),
    /// `userIntentSolutionsFeed`.
    IntentSolution(IntentSolutionNotification),
    /// `quotesFeed`.
    Quote(QuoteNotification),
    /// A feed with no registered decoder.
    Raw(Value),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NewTxNotification {
    pub tx_hash: String,
    pub tx_contents: Option<TxContents>,
    pub local_region: bool,
    pub time: String,
    pub raw_tx: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TxContents {
    pub access_list: Vec<Value>,
    pub chain_id: String,
    pub from: String,
    pub gas: String,
    pub gas_price: String,
    pub hash: String,
    pub input: String,
    pub max_fee_per_gas: String,
    pub max_priority_fee_per_gas: String,
    pub nonce: String,
    pub r: String,
    pub s: String,
    pub to: String,
    #[serde(rename = "type")]
    pub tx_type: String,
    pub v: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockNotification {
    pub hash: String,
    pub header: Option<BlockHeader>,
    pub future_validator_info: Vec<FutureValidatorInfo>,
    pub transactions: Vec<BlockTransaction>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BlockHeader {
    pub parent_hash: String,
    pub sha3_uncles: String,
    pub miner: String,
    pub state_root: String,
    pub transactions_root: String,
    pub receipts_root: String,
    pub logs_bloom: String,
    pub difficulty: String,
    pub number: String,
    pub gas_limit: String,
    pub gas_used: String,
    pub timestamp: String,
    pub extra_data: String,
    pub mix_hash: String,
    pub nonce: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FutureValidatorInfo {
    pub block_height: String,
    pub wallet_id: String,
    pub accessible: String,
}

/// A block transaction. The WebSocket binding fills `tx_hash`, the gRPC
/// binding fills `from` and `raw_tx`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BlockTransaction {
    pub tx_hash: String,
    pub from: String,
    pub raw_tx: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OnBlockNotification {
    pub name: String,
    pub response: String,
    pub block_height: String,
    pub tag: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxStatusNotification {
    #[serde(rename = "txHash", alias = "tx_hash")]
    pub tx_hash: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TxReceiptNotification {
    pub block_hash: String,
    pub block_number: String,
    pub contract_address: Option<String>,
    pub cumulative_gas_used: String,
    pub from: String,
    pub gas_used: String,
    pub logs: Vec<ReceiptLog>,
    pub logs_bloom: String,
    pub status: String,
    pub to: String,
    pub transaction_hash: String,
    pub transaction_index: String,
    #[serde(rename = "type")]
    pub tx_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReceiptLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: String,
    pub transaction_hash: String,
    pub transaction_index: String,
    pub block_hash: String,
    pub log_index: String,
    pub removed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntentNotification {
    #[serde(alias = "dappAddress")]
    pub dapp_address: String,
    #[serde(alias = "senderAddress")]
    pub sender_address: String,
    #[serde(alias = "intentID")]
    pub intent_id: String,
    pub intent: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntentSolutionNotification {
    #[serde(alias = "intentID")]
    pub intent_id: String,
    #[serde(alias = "intentSolution")]
    pub intent_solution: String,
    #[serde(alias = "solutionID")]
    pub solution_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuoteNotification {
    pub quote_id: String,
    pub dapp_address: String,
    pub solver_address: String,
    pub quote: String,
    pub timestamp: String,
}
