//! Blockchain daemon JSON-RPC client
//!
//! The pool talks to one upstream daemon over its `/json_rpc` endpoint. The
//! `DaemonRpc` trait is the boundary the refresher and share validator
//! depend on, so tests can substitute a canned daemon.

use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// `getblocktemplate` response fields the pool reads.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockTemplateRpc {
    /// Raw template blob, hex encoded
    pub blocktemplate_blob: String,
    /// Network difficulty for the block
    pub difficulty: u64,
    /// Height the template mines at
    pub height: u64,
    /// Offset of the reserved nonce-extension region
    pub reserved_offset: u64,
    /// Hash of the previous block
    #[serde(default)]
    pub prev_hash: String,
    /// Proof-of-work seed hash
    #[serde(default)]
    pub seed_hash: String,
    /// Seed hash of the next epoch
    #[serde(default)]
    pub next_seed_hash: String,
}

/// Asynchronous daemon operations the pool core depends on.
#[async_trait]
pub trait DaemonRpc: Send + Sync {
    /// Fetch a fresh block template mining to `wallet_address`.
    async fn get_block_template(
        &self,
        reserve_size: u64,
        wallet_address: &str,
    ) -> Result<BlockTemplateRpc>;

    /// Current chain height.
    async fn get_block_count(&self) -> Result<u64>;

    /// Block hash at a given height.
    async fn get_block_hash(&self, height: u64) -> Result<String>;

    /// Submit a full block blob.
    async fn submit_block(&self, blob_hex: &str) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<P: Serialize> {
    jsonrpc: &'static str,
    id: &'static str,
    method: &'static str,
    params: P,
}

#[derive(Debug, Deserialize)]
struct JsonRpcEnvelope<R> {
    result: Option<R>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct BlockCountResult {
    count: u64,
}

#[derive(Debug, Serialize)]
struct GetBlockTemplateParams<'a> {
    reserve_size: u64,
    wallet_address: &'a str,
}

/// Reqwest-backed daemon client.
pub struct DaemonClient {
    client: Client,
    url: String,
}

impl DaemonClient {
    /// Create a client for a daemon base URL, e.g. `http://127.0.0.1:18081`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn call<P: Serialize + Sync, R: DeserializeOwned>(
        &self,
        method: &'static str,
        params: P,
    ) -> Result<R> {
        let url = format!("{}/json_rpc", self.url);
        debug!(method, %url, "daemon rpc call");

        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: "0",
            method,
            params,
        };

        let response = self.client.post(&url).json(&request).send().await?;
        if !response.status().is_success() {
            return Err(Error::protocol(format!(
                "daemon returned HTTP {} for {}",
                response.status(),
                method
            )));
        }

        let envelope: JsonRpcEnvelope<R> = response.json().await?;
        if let Some(err) = envelope.error {
            return Err(Error::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        envelope
            .result
            .ok_or_else(|| Error::protocol(format!("daemon reply to {} had no result", method)))
    }
}

#[async_trait]
impl DaemonRpc for DaemonClient {
    async fn get_block_template(
        &self,
        reserve_size: u64,
        wallet_address: &str,
    ) -> Result<BlockTemplateRpc> {
        self.call(
            "getblocktemplate",
            GetBlockTemplateParams {
                reserve_size,
                wallet_address,
            },
        )
        .await
    }

    async fn get_block_count(&self) -> Result<u64> {
        let result: BlockCountResult = self.call("getblockcount", serde_json::json!(null)).await?;
        Ok(result.count)
    }

    async fn get_block_hash(&self, height: u64) -> Result<String> {
        self.call("on_getblockhash", [height]).await
    }

    async fn submit_block(&self, blob_hex: &str) -> Result<()> {
        let _: serde_json::Value = self.call("submitblock", [blob_hex]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: "0",
            method: "getblocktemplate",
            params: GetBlockTemplateParams {
                reserve_size: 8,
                wallet_address: "44addr",
            },
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"getblocktemplate\""));
        assert!(json.contains("\"reserve_size\":8"));
        assert!(json.contains("\"wallet_address\":\"44addr\""));
    }

    #[test]
    fn test_envelope_error_parsing() {
        let json = r#"{"jsonrpc":"2.0","id":"0","error":{"code":-7,"message":"Block not accepted"}}"#;
        let envelope: JsonRpcEnvelope<serde_json::Value> = serde_json::from_str(json).unwrap();
        let err = envelope.error.unwrap();
        assert_eq!(err.code, -7);
        assert_eq!(err.message, "Block not accepted");
    }

    #[test]
    fn test_block_template_parsing() {
        let json = r#"{
            "blocktemplate_blob": "0707e6bdfedc05",
            "difficulty": 61043624293,
            "height": 1561970,
            "reserved_offset": 129,
            "prev_hash": "38f6a41e7f9d2b5c",
            "seed_hash": "aa",
            "next_seed_hash": ""
        }"#;

        let rpc: BlockTemplateRpc = serde_json::from_str(json).unwrap();
        assert_eq!(rpc.height, 1_561_970);
        assert_eq!(rpc.reserved_offset, 129);
        assert_eq!(rpc.difficulty, 61_043_624_293);
    }

    #[test]
    fn test_block_count_result() {
        let json = r#"{"count": 1561971, "status": "OK"}"#;
        let result: BlockCountResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.count, 1_561_971);
    }
}
