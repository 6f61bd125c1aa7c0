use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::error::AnalyticsError;
use crate::models::{Candle, Depth, MarketStats, Trade};
use crate::queries::{
    CandleVariables, MarketVariables, Operation, Resolution, TradesVariables, DEPTH, MARKET_STATS,
    PRICE_CANDLES, TRADES,
};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphQlRequest<'a, V> {
    operation_name: &'a str,
    query: &'a str,
    variables: &'a V,
}

#[derive(Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphQlErrorMessage>,
}

#[derive(Deserialize)]
struct GraphQlErrorMessage {
    message: String,
}

pub struct AnalyticsClient {
    client: Client,
    url: String,
}

impl AnalyticsClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, AnalyticsError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AnalyticsError::Network(format!("build http client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Run `operation` and decode `data.<namespace>.<operation>` as `T`.
    #[instrument(skip(self, variables), fields(operation = operation.name))]
    pub async fn execute<T, V>(&self, operation: &Operation, variables: &V) -> Result<T, AnalyticsError>
    where
        T: DeserializeOwned,
        V: Serialize,
    {
        let request = GraphQlRequest {
            operation_name: operation.name,
            query: operation.document,
            variables,
        };
        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AnalyticsError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalyticsError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: GraphQlResponse = response
            .json()
            .await
            .map_err(|e| AnalyticsError::Decode(e.to_string()))?;
        if !envelope.errors.is_empty() {
            return Err(AnalyticsError::GraphQl(
                envelope.errors.into_iter().map(|e| e.message).collect(),
            ));
        }

        let path = format!("data.{}.{}", operation.namespace, operation.name);
        let value = envelope
            .data
            .and_then(|mut data| data.get_mut(operation.namespace).map(Value::take))
            .and_then(|mut ns| ns.get_mut(operation.name).map(Value::take))
            .filter(|v| !v.is_null())
            .ok_or_else(|| AnalyticsError::MissingField(path.clone()))?;

        debug!(%path, "analytics query completed");
        serde_json::from_value(value).map_err(|e| AnalyticsError::Decode(format!("{path}: {e}")))
    }

    pub async fn price_candles(
        &self,
        market: &str,
        resolution: Resolution,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>, AnalyticsError> {
        let vars = CandleVariables {
            market,
            resolution,
            from: from.timestamp(),
            to: to.timestamp(),
        };
        self.execute(&PRICE_CANDLES, &vars).await
    }

    pub async fn trades(&self, market: &str, limit: u32) -> Result<Vec<Trade>, AnalyticsError> {
        self.execute(&TRADES, &TradesVariables { market, limit }).await
    }

    pub async fn market_stats(&self, market: &str) -> Result<MarketStats, AnalyticsError> {
        self.execute(&MARKET_STATS, &MarketVariables { market }).await
    }

    pub async fn depth(&self, market: &str) -> Result<Depth, AnalyticsError> {
        self.execute(&DEPTH, &MarketVariables { market }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> AnalyticsClient {
        AnalyticsClient::new(server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn candles_request_and_unwrap() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "operationName": "priceCandles",
                "variables": {"market": "SOL/USDC", "resolution": "240", "from": 1_700_000_000, "to": 1_700_086_400}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"market": {"priceCandles": [
                    {"time": 1_700_000_000, "open": 1.0, "high": 2.0, "low": 0.5, "close": 1.5, "volume": 10.0}
                ]}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let from = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let to = DateTime::from_timestamp(1_700_086_400, 0).unwrap();
        let candles = client(&server)
            .price_candles("SOL/USDC", Resolution::FourHours, from, to)
            .await
            .unwrap();
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].close, 1.5);
    }

    #[tokio::test]
    async fn request_carries_query_document() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "operationName": "depth",
                "query": DEPTH.document,
                "variables": {"market": "SOL/USDC"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"market": {"depth": {"bids": [{"price": 1.0, "size": 2.0}], "asks": []}}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let depth = client(&server).depth("SOL/USDC").await.unwrap();
        assert_eq!(depth.best_bid().unwrap().size, 2.0);
        assert!(depth.best_ask().is_none());
    }

    #[tokio::test]
    async fn graphql_errors_surface() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": null,
                "errors": [{"message": "unknown market"}]
            })))
            .mount(&server)
            .await;

        let err = client(&server).market_stats("NOPE").await.unwrap_err();
        match err {
            AnalyticsError::GraphQl(messages) => assert_eq!(messages, vec!["unknown market"]),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_operation_field_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"data": {"market": {"trades": null}}})),
            )
            .mount(&server)
            .await;

        let err = client(&server).trades("SOL/USDC", 10).await.unwrap_err();
        match err {
            AnalyticsError::MissingField(path) => assert_eq!(path, "data.market.trades"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn http_failure_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let err = client(&server).trades("SOL/USDC", 10).await.unwrap_err();
        assert!(matches!(err, AnalyticsError::Http { status: 502, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn shape_mismatch_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"market": {"marketStats": {"market": "SOL/USDC"}}}
            })))
            .mount(&server)
            .await;

        let err = client(&server).market_stats("SOL/USDC").await.unwrap_err();
        assert!(matches!(err, AnalyticsError::Decode(_)));
    }
}
