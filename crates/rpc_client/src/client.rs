//! The client proper: typed methods over a pluggable transport.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};

use neo3_core::{Transaction, UInt256};
use neo3_io::to_bytes;

use crate::models::{
    BlockDto, InvokeResultDto, RpcRequest, RpcResponse, StateRootDto, TransactionDto,
};
use crate::{RpcError, RpcResult};

/// Carries one JSON-RPC exchange; HTTP stays outside this crate.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn send(&self, request: RpcRequest) -> RpcResult<RpcResponse>;
}

/// A typed client over any transport.
pub struct RpcClient<T: RpcTransport> {
    transport: T,
    next_id: AtomicU64,
}

impl<T: RpcTransport> RpcClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            next_id: AtomicU64::new(1),
        }
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> RpcResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let response = self
            .transport
            .send(RpcRequest::new(id, method, params))
            .await?;
        if let Some(error) = response.error {
            return Err(RpcError::Server {
                code: error.code,
                message: error.message,
            });
        }
        response
            .result
            .ok_or_else(|| RpcError::Protocol("response carries neither result nor error".into()))
    }

    fn decode<D: serde::de::DeserializeOwned>(value: Value) -> RpcResult<D> {
        serde_json::from_value(value).map_err(|e| RpcError::Decode(e.to_string()))
    }

    /// Current chain height plus one.
    pub async fn get_block_count(&self) -> RpcResult<u32> {
        Self::decode(self.call("getblockcount", Vec::new()).await?)
    }

    /// A block by hash, verbose form.
    pub async fn get_block_by_hash(&self, hash: &UInt256) -> RpcResult<BlockDto> {
        let params = vec![json!(hash.to_string()), json!(true)];
        Self::decode(self.call("getblock", params).await?)
    }

    /// A block by height, verbose form.
    pub async fn get_block_by_index(&self, index: u32) -> RpcResult<BlockDto> {
        let params = vec![json!(index), json!(true)];
        Self::decode(self.call("getblock", params).await?)
    }

    /// A transaction by hash, verbose form.
    pub async fn get_raw_transaction(&self, hash: &UInt256) -> RpcResult<TransactionDto> {
        let params = vec![json!(hash.to_string()), json!(true)];
        Self::decode(self.call("getrawtransaction", params).await?)
    }

    /// Relays a signed transaction; returns its hash on acceptance.
    pub async fn send_raw_transaction(&self, tx: &Transaction) -> RpcResult<UInt256> {
        let bytes = to_bytes(tx).map_err(|e| RpcError::Decode(e.to_string()))?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        let result = self
            .call("sendrawtransaction", vec![json!(encoded)])
            .await?;
        let hash = result
            .get("hash")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::Protocol("missing hash in relay result".into()))?;
        hash.parse()
            .map_err(|e: neo3_core::CoreError| RpcError::Decode(e.to_string()))
    }

    /// The witnessed state root for a height.
    pub async fn get_state_root(&self, index: u32) -> RpcResult<StateRootDto> {
        Self::decode(self.call("getstateroot", vec![json!(index)]).await?)
    }

    /// Runs a contract method in the node's test VM.
    pub async fn invoke_function(
        &self,
        contract: &str,
        method: &str,
        params: Vec<Value>,
    ) -> RpcResult<InvokeResultDto> {
        let params = vec![json!(contract), json!(method), Value::Array(params)];
        Self::decode(self.call("invokefunction", params).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Echoes canned responses and records requests.
    struct MockTransport {
        responses: Mutex<Vec<Value>>,
        requests: Mutex<Vec<RpcRequest>>,
    }

    impl MockTransport {
        fn with_results(results: Vec<Value>) -> Self {
            Self {
                responses: Mutex::new(results),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RpcTransport for MockTransport {
        async fn send(&self, request: RpcRequest) -> RpcResult<RpcResponse> {
            let id = request.id;
            self.requests.lock().unwrap().push(request);
            let result = self.responses.lock().unwrap().remove(0);
            Ok(RpcResponse {
                jsonrpc: "2.0".into(),
                result: Some(result),
                error: None,
                id,
            })
        }
    }

    #[tokio::test]
    async fn block_count_round_trip() {
        let client = RpcClient::new(MockTransport::with_results(vec![json!(42)]));
        assert_eq!(client.get_block_count().await.unwrap(), 42);
        let requests = client.transport.requests.lock().unwrap();
        assert_eq!(requests[0].method, "getblockcount");
        assert_eq!(requests[0].jsonrpc, "2.0");
    }

    #[tokio::test]
    async fn server_errors_surface_with_code() {
        struct FailingTransport;

        #[async_trait]
        impl RpcTransport for FailingTransport {
            async fn send(&self, request: RpcRequest) -> RpcResult<RpcResponse> {
                Ok(RpcResponse {
                    jsonrpc: "2.0".into(),
                    result: None,
                    error: Some(crate::models::RpcErrorObject {
                        code: -501,
                        message: "already in the memory pool".into(),
                        data: None,
                    }),
                    id: request.id,
                })
            }
        }

        let client = RpcClient::new(FailingTransport);
        let err = client.get_block_count().await.unwrap_err();
        assert!(matches!(err, RpcError::Server { code: -501, .. }));
    }

    #[tokio::test]
    async fn ids_increase_per_call() {
        let client = RpcClient::new(MockTransport::with_results(vec![json!(1), json!(2)]));
        client.get_block_count().await.unwrap();
        client.get_block_count().await.unwrap();
        let requests = client.transport.requests.lock().unwrap();
        assert!(requests[1].id > requests[0].id);
    }
}
