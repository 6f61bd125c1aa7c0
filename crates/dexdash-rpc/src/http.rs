use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dexdash_core::RpcError;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::wire::{JsonRpcRequest, JsonRpcResponse};

/// JSON-RPC over HTTP POST.
pub struct RpcHttpClient {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
    next_id: AtomicU64,
}

impl RpcHttpClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::Network(format!("build http client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            timeout,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Issue one call and decode its `result` as `T`.
    #[instrument(skip(self, params), fields(url = %self.url))]
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, &params);

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RpcError::from_status(status.as_u16(), body));
        }

        let envelope: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| RpcError::Decode(format!("{method}: {e}")))?;
        let result = envelope.into_result()?;
        debug!(method, id, "rpc call completed");
        Ok(serde_json::from_value(result)?)
    }

    fn transport_error(&self, e: reqwest::Error) -> RpcError {
        if e.is_timeout() {
            RpcError::Timeout(self.timeout)
        } else {
            RpcError::Network(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn call_decodes_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_partial_json(json!({"jsonrpc": "2.0", "method": "getSlot"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": 1234})),
            )
            .mount(&server)
            .await;

        let client = RpcHttpClient::new(server.uri(), Duration::from_secs(5)).unwrap();
        let slot: u64 = client.call("getSlot", json!([])).await.unwrap();
        assert_eq!(slot, 1234);
    }

    #[tokio::test]
    async fn http_status_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let client = RpcHttpClient::new(server.uri(), Duration::from_secs(5)).unwrap();
        let err = client.call::<u64>("getSlot", json!([])).await.unwrap_err();
        assert!(matches!(err, RpcError::Http { status: 503, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn rpc_error_object_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1,
                "error": {"code": -32601, "message": "Method not found"}
            })))
            .mount(&server)
            .await;

        let client = RpcHttpClient::new(server.uri(), Duration::from_secs(5)).unwrap();
        let err = client.call::<u64>("nope", json!([])).await.unwrap_err();
        assert!(matches!(err, RpcError::Rpc { code: -32601, .. }));
    }

    #[tokio::test]
    async fn slow_endpoint_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": 1}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let client = RpcHttpClient::new(server.uri(), Duration::from_millis(50)).unwrap();
        let err = client.call::<u64>("getSlot", json!([])).await.unwrap_err();
        assert!(matches!(err, RpcError::Timeout(_)));
    }
}
