//! Gateway protobuf messages and their JSON views.
//!
//! Only the messages of the streaming feeds and of `BlxrTx` are declared.
//! Frames are turned into the same JSON shape the WebSocket binding
//! receives, so one [`DecoderRegistry`](chainfeed_core::DecoderRegistry)
//! serves both bindings.

use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Clone, PartialEq, prost::Message)]
pub struct TxsRequest {
    #[prost(string, tag = "1")]
    pub filters: String,
    #[prost(string, repeated, tag = "2")]
    pub includes: Vec<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Tx {
    #[prost(bytes = "vec", tag = "1")]
    pub from: Vec<u8>,
    #[prost(bool, tag = "2")]
    pub local_region: bool,
    #[prost(int64, tag = "3")]
    pub time: i64,
    #[prost(bytes = "vec", tag = "4")]
    pub raw_tx: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TxsReply {
    #[prost(message, repeated, tag = "1")]
    pub tx: Vec<Tx>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct BlocksRequest {
    #[prost(string, repeated, tag = "1")]
    pub includes: Vec<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct BlockHeader {
    #[prost(string, tag = "1")]
    pub parent_hash: String,
    #[prost(string, tag = "2")]
    pub sha3_uncles: String,
    #[prost(string, tag = "3")]
    pub miner: String,
    #[prost(string, tag = "4")]
    pub state_root: String,
    #[prost(string, tag = "5")]
    pub transactions_root: String,
    #[prost(string, tag = "6")]
    pub receipts_root: String,
    #[prost(string, tag = "7")]
    pub logs_bloom: String,
    #[prost(string, tag = "8")]
    pub difficulty: String,
    #[prost(string, tag = "9")]
    pub number: String,
    #[prost(string, tag = "10")]
    pub gas_limit: String,
    #[prost(string, tag = "11")]
    pub gas_used: String,
    #[prost(string, tag = "12")]
    pub timestamp: String,
    #[prost(string, tag = "13")]
    pub extra_data: String,
    #[prost(string, tag = "14")]
    pub mix_hash: String,
    #[prost(string, tag = "15")]
    pub nonce: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct FutureValidatorInfo {
    #[prost(string, tag = "1")]
    pub block_height: String,
    #[prost(string, tag = "2")]
    pub wallet_id: String,
    #[prost(string, tag = "3")]
    pub accessible: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct BlockTransaction {
    #[prost(bytes = "vec", tag = "1")]
    pub from: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub raw_tx: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct BlocksReply {
    #[prost(string, tag = "1")]
    pub hash: String,
    #[prost(message, optional, tag = "2")]
    pub header: Option<BlockHeader>,
    #[prost(message, repeated, tag = "3")]
    pub future_validator_info: Vec<FutureValidatorInfo>,
    #[prost(message, repeated, tag = "4")]
    pub transaction: Vec<BlockTransaction>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct BlxrTxRequest {
    #[prost(string, tag = "1")]
    pub transaction: String,
    #[prost(bool, tag = "2")]
    pub nonce_monitoring: bool,
    #[prost(bool, tag = "3")]
    pub next_validator: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct BlxrTxReply {
    #[prost(string, tag = "1")]
    pub tx_hash: String,
}

/// Subscribe params as the WebSocket binding sends them.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FeedParams {
    include: Vec<String>,
    filters: String,
}

impl TxsRequest {
    pub fn from_params(params: &Value) -> Result<Self, serde_json::Error> {
        let p: FeedParams = serde_json::from_value(params.clone())?;
        Ok(Self {
            filters: p.filters,
            includes: p.include,
        })
    }
}

impl BlocksRequest {
    pub fn from_params(params: &Value) -> Result<Self, serde_json::Error> {
        let p: FeedParams = serde_json::from_value(params.clone())?;
        Ok(Self {
            includes: p.include,
        })
    }
}

impl BlxrTxRequest {
    pub fn from_params(params: &Value) -> Result<Self, serde_json::Error> {
        #[derive(Deserialize)]
        struct SendTx {
            transaction: String,
            #[serde(default)]
            nonce_monitoring: bool,
            #[serde(default)]
            next_validator: bool,
        }
        let p: SendTx = serde_json::from_value(params.clone())?;
        Ok(Self {
            transaction: p.transaction,
            nonce_monitoring: p.nonce_monitoring,
            next_validator: p.next_validator,
        })
    }
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

impl TxsReply {
    /// One notification per transaction, in frame order.
    pub fn into_notifications(self) -> Vec<Value> {
        self.tx
            .into_iter()
            .map(|tx| {
                json!({
                    "txContents": {"from": text(&tx.from)},
                    "localRegion": tx.local_region,
                    "time": tx.time.to_string(),
                    "rawTx": text(&tx.raw_tx),
                })
            })
            .collect()
    }
}

impl BlocksReply {
    pub fn into_notification(self) -> Value {
        let header = self.header.map(|h| {
            json!({
                "parentHash": h.parent_hash,
                "sha3Uncles": h.sha3_uncles,
                "miner": h.miner,
                "stateRoot": h.state_root,
                "transactionsRoot": h.transactions_root,
                "receiptsRoot": h.receipts_root,
                "logsBloom": h.logs_bloom,
                "difficulty": h.difficulty,
                "number": h.number,
                "gasLimit": h.gas_limit,
                "gasUsed": h.gas_used,
                "timestamp": h.timestamp,
                "extraData": h.extra_data,
                "mixHash": h.mix_hash,
                "nonce": h.nonce,
            })
        });
        let validators: Vec<Value> = self
            .future_validator_info
            .into_iter()
            .map(|v| {
                json!({
                    "block_height": v.block_height,
                    "wallet_id": v.wallet_id,
                    "accessible": v.accessible,
                })
            })
            .collect();
        let transactions: Vec<Value> = self
            .transaction
            .into_iter()
            .map(|t| json!({"from": text(&t.from), "rawTx": text(&t.raw_tx)}))
            .collect();
        json!({
            "hash": self.hash,
            "header": header,
            "future_validator_info": validators,
            "transactions": transactions,
        })
    }
}
