//! JSON-RPC envelope and DTOs of the node surface.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Vec<Value>,
    pub id: u64,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
            id,
        }
    }
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorObject>,
    pub id: u64,
}

/// The error member of a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// A transaction as the node reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDto {
    pub hash: String,
    pub size: usize,
    pub version: u8,
    pub nonce: u32,
    pub sender: String,
    #[serde(rename = "sysfee")]
    pub system_fee: String,
    #[serde(rename = "netfee")]
    pub network_fee: String,
    #[serde(rename = "validuntilblock")]
    pub valid_until_block: u32,
    /// Base64 script bytes.
    pub script: String,
    #[serde(default)]
    pub signers: Vec<SignerDto>,
    #[serde(default)]
    pub witnesses: Vec<WitnessDto>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerDto {
    pub account: String,
    pub scopes: String,
    #[serde(rename = "allowedcontracts", default)]
    pub allowed_contracts: Vec<String>,
    #[serde(rename = "allowedgroups", default)]
    pub allowed_groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessDto {
    /// Base64 invocation script.
    pub invocation: String,
    /// Base64 verification script.
    pub verification: String,
}

/// A block as the node reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDto {
    pub hash: String,
    pub size: usize,
    pub version: u32,
    #[serde(rename = "previousblockhash")]
    pub previous_block_hash: String,
    #[serde(rename = "merkleroot")]
    pub merkle_root: String,
    pub time: u64,
    pub nonce: String,
    pub index: u32,
    pub primary: u8,
    #[serde(rename = "nextconsensus")]
    pub next_consensus: String,
    #[serde(default)]
    pub witnesses: Vec<WitnessDto>,
    #[serde(rename = "tx", default)]
    pub transactions: Vec<TransactionDto>,
}

/// A per-height state root with its aggregated witness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRootDto {
    pub version: u8,
    pub index: u32,
    #[serde(rename = "roothash")]
    pub root_hash: String,
    #[serde(default)]
    pub witnesses: Vec<WitnessDto>,
}

/// One stack item of an invocation result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackItemDto {
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(default)]
    pub value: Option<Value>,
}

/// The outcome of a test-VM invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokeResultDto {
    pub script: String,
    pub state: String,
    #[serde(rename = "gasconsumed")]
    pub gas_consumed: String,
    #[serde(default)]
    pub exception: Option<String>,
    #[serde(default)]
    pub stack: Vec<StackItemDto>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_with_error_parses() {
        let response: RpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","error":{"code":-500,"message":"invalid"},"id":1}"#,
        )
        .unwrap();
        assert!(response.result.is_none());
        assert_eq!(response.error.unwrap().code, -500);
    }

    #[test]
    fn block_dto_round_trips() {
        let block = BlockDto {
            hash: "0xabc".into(),
            size: 100,
            version: 0,
            previous_block_hash: "0xdef".into(),
            merkle_root: "0x0".into(),
            time: 1_468_595_301_000,
            nonce: "7".into(),
            index: 3,
            primary: 0,
            next_consensus: "0x1".into(),
            witnesses: vec![WitnessDto {
                invocation: String::new(),
                verification: "EQ==".into(),
            }],
            transactions: Vec::new(),
        };
        let json = serde_json::to_string(&block).unwrap();
        assert_eq!(serde_json::from_str::<BlockDto>(&json).unwrap(), block);
        assert!(json.contains("previousblockhash"));
    }
}
