//! Ethereum JSON-RPC client

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ethereum_types::{Address, H256, U256};
use ethers_core::types::TransactionReceipt;
use ethers_core::utils::to_checksum;
use serde_json::{json, Value};

use crate::chains::ethereum::transaction::MAX_CHAIN_ID;
use crate::errors::{CosignError, Result};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One JSON-RPC round trip
#[async_trait]
pub trait EthRpc: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value>;
}

/// JSON-RPC 2.0 over HTTP POST
pub struct HttpRpc {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl HttpRpc {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = url.into();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(CosignError::Config(format!(
                "RPC URL must be http(s): {}",
                url
            )));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl EthRpc for HttpRpc {
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });
        log::debug!("🌐 {} #{}", method, id);

        let response: Value = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        into_result(response)
    }
}

/// Split a JSON-RPC response envelope into result or error
pub fn into_result(mut response: Value) -> Result<Value> {
    if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
        return Err(CosignError::Rpc {
            code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
            message: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        });
    }
    match response.get_mut("result") {
        Some(result) => Ok(result.take()),
        None => Err(CosignError::Rpc {
            code: 0,
            message: "Response has neither result nor error".to_string(),
        }),
    }
}

/// Parse a `0x`-prefixed hex quantity
pub fn parse_quantity(value: &Value) -> Result<U256> {
    let text = value
        .as_str()
        .ok_or_else(|| CosignError::Protocol(format!("Expected hex quantity, got {}", value)))?;
    let digits = text
        .strip_prefix("0x")
        .filter(|d| !d.is_empty())
        .ok_or_else(|| CosignError::Protocol(format!("Malformed quantity: {}", text)))?;
    U256::from_str_radix(digits, 16)
        .map_err(|_| CosignError::Protocol(format!("Malformed quantity: {}", text)))
}

fn parse_bytes(value: &Value) -> Result<Vec<u8>> {
    let text = value
        .as_str()
        .ok_or_else(|| CosignError::Protocol(format!("Expected hex data, got {}", value)))?;
    hex::decode(text.trim_start_matches("0x"))
        .map_err(|_| CosignError::Protocol(format!("Malformed hex data: {}", text)))
}

fn hex_data(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Typed helpers over an [`EthRpc`]
pub struct EthClient<R: EthRpc> {
    rpc: R,
}

impl<R: EthRpc> EthClient<R> {
    pub fn new(rpc: R) -> Self {
        Self { rpc }
    }

    pub fn rpc(&self) -> &R {
        &self.rpc
    }

    pub async fn chain_id(&self) -> Result<u64> {
        let value = parse_quantity(&self.rpc.request("eth_chainId", json!([])).await?)?;
        if value > U256::from(MAX_CHAIN_ID) {
            return Err(CosignError::Protocol(format!("Chain id {} out of range", value)));
        }
        Ok(value.as_u64())
    }

    pub async fn gas_price(&self) -> Result<U256> {
        parse_quantity(&self.rpc.request("eth_gasPrice", json!([])).await?)
    }

    /// Next nonce for `address`, counting pending transactions
    pub async fn transaction_count(&self, address: Address) -> Result<U256> {
        parse_quantity(
            &self
                .rpc
                .request(
                    "eth_getTransactionCount",
                    json!([to_checksum(&address, None), "pending"]),
                )
                .await?,
        )
    }

    /// Read-only contract call against the latest block
    pub async fn call(&self, to: Address, data: &[u8]) -> Result<Vec<u8>> {
        let result = self
            .rpc
            .request(
                "eth_call",
                json!([{ "to": to_checksum(&to, None), "data": hex_data(data) }, "latest"]),
            )
            .await?;
        parse_bytes(&result)
    }

    pub async fn send_raw_transaction(&self, raw: &[u8]) -> Result<H256> {
        let result = self
            .rpc
            .request("eth_sendRawTransaction", json!([hex_data(raw)]))
            .await?;
        let bytes = parse_bytes(&result)?;
        if bytes.len() != 32 {
            return Err(CosignError::Protocol(format!(
                "Node returned a {}-byte transaction hash",
                bytes.len()
            )));
        }
        Ok(H256::from_slice(&bytes))
    }

    /// `None` while the transaction is pending
    pub async fn transaction_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>> {
        let result = self
            .rpc
            .request("eth_getTransactionReceipt", json!([format!("{:?}", hash)]))
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(result)?))
    }

    /// Poll for a receipt until it appears or `timeout` elapses
    pub async fn wait_for_receipt(
        &self,
        hash: H256,
        timeout: Duration,
        interval: Duration,
    ) -> Result<Option<TransactionReceipt>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(receipt) = self.transaction_receipt(hash).await? {
                return Ok(Some(receipt));
            }
            if tokio::time::Instant::now() + interval > deadline {
                log::warn!("⏳ No receipt for {:?} after {}", hash, humantime::format_duration(timeout));
                return Ok(None);
            }
            tokio::time::sleep(interval).await;
        }
    }
}
