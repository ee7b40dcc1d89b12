//! Minimal Bitcoin Core JSON-RPC client.
//!
//! Only `getrawtransaction` is needed. There are no retries here; callers
//! decide what a failure means.

use anyhow::Context;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

pub const SATS_PER_BTC: f64 = 100_000_000.0;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("RPC credentials not configured")]
    Unavailable,
    #[error("RPC rejected credentials (HTTP {0})")]
    Unauthorized(StatusCode),
    #[error("RPC timeout after {0:?}")]
    Timeout(Duration),
    #[error("RPC error {code}: {message}")]
    Remote { code: i64, message: String },
    #[error("RPC transport error: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("RPC HTTP error: {0}")]
    Status(StatusCode),
    #[error("malformed RPC response: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub url: String,
    pub user: String,
    pub password: String,
    pub timeout: Duration,
}

impl RpcConfig {
    pub fn is_configured(&self) -> bool {
        !self.user.trim().is_empty() && !self.password.trim().is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// Decoded transaction as returned by `getrawtransaction <txid> true`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawTransaction {
    pub txid: String,
    #[serde(default)]
    pub vin: Vec<TxInput>,
    #[serde(default)]
    pub vout: Vec<TxOutput>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TxInput {
    /// Absent for coinbase inputs.
    #[serde(default)]
    pub txid: Option<String>,
    #[serde(default)]
    pub vout: Option<u32>,
    #[serde(default)]
    pub coinbase: Option<String>,
}

impl TxInput {
    /// `(txid, index)` of the spent output, if this input spends one.
    pub fn previous_output(&self) -> Option<(&str, usize)> {
        match (&self.txid, self.vout) {
            (Some(txid), Some(index)) if self.coinbase.is_none() => Some((txid.as_str(), index as usize)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TxOutput {
    /// BTC, as the node reports it.
    pub value: f64,
    #[serde(default)]
    pub n: u32,
}

impl TxOutput {
    pub fn value_sats(&self) -> i64 {
        btc_to_sats(self.value)
    }
}

/// Multiply first, round once.
pub fn btc_to_sats(btc: f64) -> i64 {
    (btc * SATS_PER_BTC).round() as i64
}

pub struct BitcoinRpc {
    client: Client,
    config: RpcConfig,
}

impl BitcoinRpc {
    pub fn new(config: RpcConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to build RPC client")?;
        Ok(Self { client, config })
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
        if !self.is_configured() {
            return Err(RpcError::Unavailable);
        }
        let payload = json!({
            "jsonrpc": "2.0",
            "id": method,
            "method": method,
            "params": params,
        });

        let request = self
            .client
            .post(&self.config.url)
            .basic_auth(&self.config.user, Some(&self.config.password))
            .json(&payload)
            .send();
        let response = match tokio::time::timeout(self.config.timeout, request).await {
            Err(_) => return Err(RpcError::Timeout(self.config.timeout)),
            Ok(Err(e)) if e.is_timeout() => return Err(RpcError::Timeout(self.config.timeout)),
            Ok(Err(e)) => return Err(RpcError::Transport(e)),
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(RpcError::Unauthorized(status));
        }
        let body = response.bytes().await.map_err(RpcError::Transport)?;
        debug!(method = method, status = status.as_u16(), bytes = body.len(), "RPC response");
        decode_response(status, &body)
    }

    pub async fn get_raw_transaction(&self, txid: &str) -> Result<RawTransaction, RpcError> {
        self.call("getrawtransaction", json!([txid, true])).await
    }
}

/// Bitcoin Core answers application errors with HTTP 500 and a JSON body,
/// so the body is checked for an `error` object before the status.
fn decode_response<T: DeserializeOwned>(status: StatusCode, body: &[u8]) -> Result<T, RpcError> {
    let parsed: Result<RpcResponse<T>, _> = serde_json::from_slice(body);
    match parsed {
        Ok(RpcResponse { error: Some(err), .. }) => Err(RpcError::Remote {
            code: err.code,
            message: err.message,
        }),
        Ok(RpcResponse { result: Some(result), .. }) if status.is_success() => Ok(result),
        Ok(_) if !status.is_success() => Err(RpcError::Status(status)),
        Ok(_) => Err(RpcError::Malformed("no result in RPC response".to_string())),
        Err(_) if !status.is_success() => Err(RpcError::Status(status)),
        Err(e) => Err(RpcError::Malformed(e.to_string())),
    }
}
