//! Ethereum JSON-RPC chain client.
//!
//! Transactions are signed by the node (`eth_sendTransaction`), so the
//! sender must be an account the endpoint manages.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::domain::{AppError, CallRequest, ChainClient, ChainError, RawLog, RawReceipt, TxHash};

/// Configuration for the RPC client
#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// JSON-RPC client for an Ethereum-compatible node
pub struct RpcChainClient {
    http_client: Client,
    rpc_url: String,
    config: RpcClientConfig,
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<T: Serialize> {
    jsonrpc: &'static str,
    id: u64,
    method: String,
    params: T,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Value,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceiptJson {
    transaction_hash: String,
    block_number: Option<String>,
    /// Absent on pre-Byzantium chains, where a mined receipt means success.
    status: Option<String>,
    gas_used: String,
    #[serde(default)]
    logs: Vec<LogJson>,
}

#[derive(Debug, Deserialize)]
struct LogJson {
    address: String,
    topics: Vec<String>,
    data: String,
}

impl RpcChainClient {
    /// Create a new RPC chain client with custom configuration
    pub fn new(rpc_url: &str, config: RpcClientConfig) -> Result<Self, AppError> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ChainError::Connection(e.to_string()))?;
        info!(rpc_url = %rpc_url, "Created chain client");
        Ok(Self {
            http_client,
            rpc_url: rpc_url.to_string(),
            config,
        })
    }

    /// Create a new RPC chain client with default configuration
    pub fn with_defaults(rpc_url: &str) -> Result<Self, AppError> {
        Self::new(rpc_url, RpcClientConfig::default())
    }

    /// Make an RPC call, retrying connection failures and timeouts.
    ///
    /// Errors reported by the node itself are returned immediately.
    #[instrument(skip(self, params))]
    async fn rpc_call<P: Serialize, R: DeserializeOwned>(&self, method: &str, params: P) -> Result<R, AppError> {
        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_delay).await;
            }
            match self.do_rpc_call(method, &params).await {
                Ok(result) => return Ok(result),
                Err(e @ (ChainError::Connection(_) | ChainError::Timeout(_))) => {
                    warn!(attempt = attempt, error = ?e, method = %method, "RPC call failed");
                    last_error = Some(e);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(last_error
            .unwrap_or_else(|| ChainError::Connection("Unknown error".to_string()))
            .into())
    }

    /// Execute a single RPC call
    async fn do_rpc_call<P: Serialize, R: DeserializeOwned>(&self, method: &str, params: &P) -> Result<R, ChainError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method: method.to_string(),
            params,
        };

        let response = self
            .http_client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ChainError::Timeout(e.to_string())
                } else {
                    ChainError::Connection(e.to_string())
                }
            })?;

        let rpc_response: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| ChainError::Decode(e.to_string()))?;

        if let Some(error) = rpc_response.error {
            return Err(rpc_error(error.code, error.message));
        }

        serde_json::from_value(rpc_response.result).map_err(|e| ChainError::Decode(format!("{method}: {e}")))
    }
}

fn rpc_error(code: i64, message: String) -> ChainError {
    if message.to_ascii_lowercase().contains("insufficient funds") {
        return ChainError::InsufficientFunds;
    }
    ChainError::Rpc { code, message }
}

/// Parses a `0x`-prefixed hex quantity.
fn parse_quantity(raw: &str) -> Result<u64, ChainError> {
    let digits = raw
        .strip_prefix("0x")
        .ok_or_else(|| ChainError::Decode(format!("quantity without 0x prefix: {raw}")))?;
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16).map_err(|e| ChainError::Decode(format!("bad quantity {raw}: {e}")))
}

impl ReceiptJson {
    fn into_raw(self) -> Result<RawReceipt, ChainError> {
        let block_number = match self.block_number.as_deref() {
            Some(raw) => parse_quantity(raw)?,
            None => return Err(ChainError::Decode("receipt without block number".to_string())),
        };
        let success = match self.status.as_deref() {
            Some(raw) => parse_quantity(raw)? == 1,
            None => true,
        };
        Ok(RawReceipt {
            transaction_hash: self.transaction_hash,
            block_number,
            success,
            gas_used: parse_quantity(&self.gas_used)?,
            logs: self
                .logs
                .into_iter()
                .map(|log| RawLog {
                    address: log.address,
                    topics: log.topics,
                    data: log.data,
                })
                .collect(),
        })
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        self.block_number().await.map(|_| ())
    }

    #[instrument(skip(self))]
    async fn block_number(&self) -> Result<u64, AppError> {
        let raw: String = self.rpc_call("eth_blockNumber", Vec::<()>::new()).await?;
        Ok(parse_quantity(&raw)?)
    }

    /// Sent exactly once; a resend could submit the call twice.
    #[instrument(skip(self, request), fields(to = %request.to))]
    async fn send_transaction(&self, request: &CallRequest) -> Result<TxHash, AppError> {
        info!("Submitting transaction");
        let hash: String = self.do_rpc_call("eth_sendTransaction", &json!([request])).await?;
        info!(hash = %hash, "Transaction sent");
        Ok(hash)
    }

    #[instrument(skip(self))]
    async fn get_receipt(&self, hash: &str) -> Result<Option<RawReceipt>, AppError> {
        let receipt: Option<ReceiptJson> = self.rpc_call("eth_getTransactionReceipt", json!([hash])).await?;
        match receipt {
            Some(receipt) if receipt.block_number.is_some() => Ok(Some(receipt.into_raw()?)),
            _ => {
                debug!(hash = %hash, "No receipt yet");
                Ok(None)
            }
        }
    }

    #[instrument(skip(self, request), fields(to = %request.to))]
    async fn call(&self, request: &CallRequest) -> Result<String, AppError> {
        self.rpc_call("eth_call", json!([request, "latest"])).await
    }
}
