use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::ChainAdapter;
use crate::{
    message::encode_hex,
    types::{CallRequest, ChainEvent, ChainSide, LogFilter},
    Error, Result,
};

/// 通过 JSON-RPC 访问 EVM 链，按顺序在多个节点间回退
pub struct EvmAdapter {
    side: ChainSide,
    urls: Vec<String>,
    client: reqwest::Client,
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    address: Address,
    topics: Vec<B256>,
    data: Bytes,
    block_number: String,
    transaction_hash: B256,
    #[serde(default)]
    log_index: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RpcReceipt {
    logs: Vec<RpcLog>,
}

impl TryFrom<RpcLog> for ChainEvent {
    type Error = Error;

    fn try_from(log: RpcLog) -> Result<Self> {
        Ok(ChainEvent {
            address: log.address,
            topics: log.topics,
            data: log.data,
            block_number: quantity(&log.block_number)?,
            transaction_hash: log.transaction_hash,
            log_index: log.log_index.as_deref().map(quantity).transpose()?.unwrap_or(0),
        })
    }
}

fn quantity(value: &str) -> Result<u64> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    u64::from_str_radix(digits, 16).map_err(|e| Error::Codec(format!("invalid quantity {value}: {e}")))
}

fn quantity_u256(value: &str) -> Result<U256> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    U256::from_str_radix(digits, 16).map_err(|e| Error::Codec(format!("invalid quantity {value}: {e}")))
}

impl EvmAdapter {
    pub fn new(side: ChainSide, urls: Vec<String>, timeout: Duration) -> Result<Self> {
        if urls.is_empty() {
            return Err(Error::Config(format!("no rpc urls configured for {side}")));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build http client: {e}")))?;
        Ok(Self {
            side,
            urls,
            client,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn side(&self) -> ChainSide {
        self.side
    }

    /// 依次尝试每个节点，只有传输层失败才换下一个
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });

        let mut failures = Vec::with_capacity(self.urls.len());
        for url in &self.urls {
            let response = match self.client.post(url).json(&body).send().await {
                Ok(r) if r.status().is_success() => r,
                Ok(r) => {
                    failures.push(format!("{url}: http status {}", r.status()));
                    continue;
                }
                Err(e) => {
                    failures.push(format!("{url}: {e}"));
                    continue;
                }
            };
            let parsed: RpcResponse = match response.json().await {
                Ok(p) => p,
                Err(e) => {
                    failures.push(format!("{url}: invalid response body: {e}"));
                    continue;
                }
            };

            if !failures.is_empty() {
                warn!(chain = %self.side, method, failed = failures.len(), "Rpc request succeeded after fallback");
            }

            if let Some(err) = parsed.error {
                let detail = match err.data {
                    Some(data) => format!("{} (code {}, data {})", err.message, err.code, data),
                    None => format!("{} (code {})", err.message, err.code),
                };
                return Err(match method {
                    "eth_call" | "eth_estimateGas" => Error::Reverted(detail),
                    _ => Error::Chain(format!("{method} failed: {detail}")),
                });
            }
            return Ok(parsed.result.unwrap_or(Value::Null));
        }

        Err(Error::Rpc(format!(
            "{method} failed on every {} rpc url: {}",
            self.side,
            failures.join("; ")
        )))
    }

    async fn request_as<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let value = self.request(method, params).await?;
        serde_json::from_value(value)
            .map_err(|e| Error::Chain(format!("unexpected {method} result: {e}")))
    }

    fn call_object(request: &CallRequest) -> Value {
        let mut object = json!({
            "to": request.to,
            "data": encode_hex(&request.data),
        });
        if let Some(from) = request.from {
            object["from"] = json!(from);
        }
        object
    }
}

#[async_trait]
impl ChainAdapter for EvmAdapter {
    async fn block_number(&self) -> Result<u64> {
        let raw: String = self.request_as("eth_blockNumber", json!([])).await?;
        quantity(&raw)
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<ChainEvent>> {
        let mut query = json!({
            "address": filter.addresses,
            "fromBlock": format!("{:#x}", filter.from_block),
            "toBlock": format!("{:#x}", filter.to_block),
        });
        if let Some(topic0) = filter.topic0 {
            query["topics"] = json!([topic0]);
        }
        debug!(chain = %self.side, from = filter.from_block, to = filter.to_block, "Fetching logs");

        let logs: Vec<RpcLog> = self.request_as("eth_getLogs", json!([query])).await?;
        logs.into_iter().map(ChainEvent::try_from).collect()
    }

    async fn transaction_logs(&self, tx_hash: B256) -> Result<Vec<ChainEvent>> {
        let receipt: Option<RpcReceipt> = self.request_as("eth_getTransactionReceipt", json!([tx_hash])).await?;
        let receipt = receipt.ok_or_else(|| Error::Chain(format!("receipt of {tx_hash} not found")))?;
        receipt.logs.into_iter().map(ChainEvent::try_from).collect()
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        let request = CallRequest { from: None, to, data };
        self.request_as("eth_call", json!([Self::call_object(&request), "latest"]))
            .await
    }

    async fn estimate_gas(&self, request: CallRequest) -> Result<u64> {
        let raw: String = self
            .request_as("eth_estimateGas", json!([Self::call_object(&request)]))
            .await?;
        quantity(&raw)
    }

    async fn transaction_count(&self, address: Address) -> Result<u64> {
        let raw: String = self
            .request_as("eth_getTransactionCount", json!([address, "latest"]))
            .await?;
        quantity(&raw)
    }

    async fn chain_id(&self) -> Result<u64> {
        let raw: String = self.request_as("eth_chainId", json!([])).await?;
        quantity(&raw)
    }

    async fn balance(&self, address: Address) -> Result<U256> {
        let raw: String = self.request_as("eth_getBalance", json!([address, "latest"])).await?;
        quantity_u256(&raw)
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256> {
        self.request_as("eth_sendRawTransaction", json!([encode_hex(&raw)]))
            .await
    }
}
