//! Wallet bridge abstraction.
//!
//! A browser wallet exposes a single `request({ method, params })` entry
//! point (EIP-1193). [`WalletBridge`] mirrors that shape so the ledger client
//! can run against any transport; [`JsonRpcBridge`] forwards requests to a
//! node or signer over JSON-RPC/HTTP.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::error::ChainError;

/// An EIP-1193 style request channel to a wallet.
#[async_trait]
pub trait WalletBridge: Send + Sync {
    /// Sends a request and returns its JSON result.
    ///
    /// Provider error objects are classified with [`ChainError::from_rpc`].
    async fn request(&self, method: &str, params: Value) -> Result<Value, ChainError>;
}

/// Wallet bridge backed by a JSON-RPC endpoint with unlocked accounts
/// (a local signer, a dev node, or a wallet's RPC port).
#[derive(Debug)]
pub struct JsonRpcBridge {
    url: String,
    http_client: reqwest::Client,
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

impl JsonRpcBridge {
    /// Creates a bridge for the given endpoint.
    pub fn new(url: impl Into<String>) -> Result<Self, ChainError> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(ChainError::BridgeUnavailable);
        }
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            url,
            http_client,
            next_id: AtomicU64::new(1),
        })
    }

    /// Endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl WalletBridge for JsonRpcBridge {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(method, id, "wallet bridge request");

        let response = self
            .http_client
            .post(&self.url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": params,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChainError::Transport(format!("http {status}: {body}")));
        }

        let payload: RpcResponse = response.json().await?;
        if let Some(error) = payload.error {
            return Err(ChainError::from_rpc(
                error.code,
                &error.message,
                error.data.as_ref(),
            ));
        }
        Ok(payload.result.unwrap_or(Value::Null))
    }
}
