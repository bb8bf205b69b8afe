use anyhow::{Context, Result};
use async_trait::async_trait;
use ck_client::Eip1193Provider;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

pub const DEFAULT_RPC_URL: &str = "http://localhost:8545";

/// JSON-RPC over HTTP, exposed through the EIP-1193 `request` surface.
///
/// Reads `CK_RPC_URL` from environment at construction time when no
/// endpoint is given (default: `http://localhost:8545`).
pub struct HttpRpcProvider {
    endpoint: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl Default for HttpRpcProvider {
    fn default() -> Self {
        Self::new(None)
    }
}

impl HttpRpcProvider {
    pub fn new(endpoint: Option<String>) -> Self {
        let endpoint = endpoint
            .or_else(|| std::env::var("CK_RPC_URL").ok())
            .unwrap_or_else(|| DEFAULT_RPC_URL.to_string());
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

// ── JSON-RPC envelope ──

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

fn decode_response(method: &str, body: &str) -> Result<serde_json::Value> {
    let response: JsonRpcResponse =
        serde_json::from_str(body).with_context(|| format!("{method}: malformed JSON-RPC response"))?;

    if let Some(err) = response.error {
        anyhow::bail!("{method}: JSON-RPC error {}: {}", err.code, err.message);
    }

    Ok(response.result.unwrap_or(serde_json::Value::Null))
}

#[async_trait]
impl Eip1193Provider for HttpRpcProvider {
    async fn request(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let body = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("{method} transport"))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            anyhow::bail!("{method} HTTP {status}: {text}");
        }

        decode_response(method, &text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_result_field() {
        let value = decode_response("eth_chainId", r#"{"jsonrpc":"2.0","id":1,"result":"0x7a69"}"#).unwrap();
        assert_eq!(value, serde_json::json!("0x7a69"));
    }

    #[test]
    fn surfaces_rpc_errors() {
        let err = decode_response(
            "fhevm_relayer_metadata",
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"Method not found"}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("-32601"));
    }

    #[test]
    fn rejects_non_json_bodies() {
        assert!(decode_response("eth_chainId", "<html>").is_err());
    }

    #[test]
    fn explicit_endpoint_is_trimmed() {
        let provider = HttpRpcProvider::new(Some("http://node:8545/".to_owned()));
        assert_eq!(provider.endpoint(), "http://node:8545");
    }
}
