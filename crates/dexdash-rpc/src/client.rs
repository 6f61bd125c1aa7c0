use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use dexdash_core::{
    AccountAddress, AccountInfo, AccountSubscription, Commitment, Endpoint, RpcError,
    RpcTransport, SlotSubscription, SubscriptionId, TransportFactory,
};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::http::RpcHttpClient;
use crate::pubsub::PubsubClient;
use crate::wire::decode_account_value;

/// Transport for a real endpoint: point reads over HTTP, pushes over one
/// shared WebSocket.
pub struct RpcClient {
    endpoint: Endpoint,
    commitment: Commitment,
    http: RpcHttpClient,
    pubsub: PubsubClient,
}

impl RpcClient {
    pub fn new(
        endpoint: Endpoint,
        commitment: Commitment,
        request_timeout: Duration,
        channel_capacity: usize,
    ) -> Result<Self, RpcError> {
        let http = RpcHttpClient::new(endpoint.url.clone(), request_timeout)?;
        let pubsub = PubsubClient::new(endpoint.websocket_url(), request_timeout, channel_capacity);
        Ok(Self {
            endpoint,
            commitment,
            http,
            pubsub,
        })
    }

    pub fn commitment(&self) -> Commitment {
        self.commitment
    }

    fn account_config(&self) -> Value {
        json!({"encoding": "base64", "commitment": self.commitment.as_str()})
    }
}

#[async_trait]
impl RpcTransport for RpcClient {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    #[instrument(skip(self), fields(endpoint = %self.endpoint.name))]
    async fn get_account_info(
        &self,
        address: &AccountAddress,
    ) -> Result<Option<AccountInfo>, RpcError> {
        let params = json!([address.as_str(), self.account_config()]);
        let value: Value = self.http.call("getAccountInfo", params).await?;
        decode_account_value(value)
    }

    async fn get_slot(&self) -> Result<u64, RpcError> {
        let params = json!([{"commitment": self.commitment.as_str()}]);
        self.http.call("getSlot", params).await
    }

    #[instrument(skip(self, transaction), fields(endpoint = %self.endpoint.name, len = transaction.len()))]
    async fn send_transaction(&self, transaction: &[u8]) -> Result<String, RpcError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(transaction);
        let params = json!([
            encoded,
            {"encoding": "base64", "preflightCommitment": self.commitment.as_str()}
        ]);
        let signature: String = self.http.call("sendTransaction", params).await?;
        debug!(%signature, "transaction submitted");
        Ok(signature)
    }

    async fn account_subscribe(
        &self,
        address: &AccountAddress,
    ) -> Result<AccountSubscription, RpcError> {
        let params = json!([address.as_str(), self.account_config()]);
        let (id, updates) = self.pubsub.account_subscribe(params).await?;
        Ok(AccountSubscription { id, updates })
    }

    async fn account_unsubscribe(&self, id: SubscriptionId) -> Result<(), RpcError> {
        self.pubsub.account_unsubscribe(id).await
    }

    async fn slot_subscribe(&self) -> Result<SlotSubscription, RpcError> {
        let (id, updates) = self.pubsub.slot_subscribe().await?;
        Ok(SlotSubscription { id, updates })
    }

    async fn slot_unsubscribe(&self, id: SubscriptionId) -> Result<(), RpcError> {
        self.pubsub.slot_unsubscribe(id).await
    }
}

/// Builds [`RpcClient`]s with shared timeout and queue settings.
#[derive(Clone, Debug)]
pub struct RpcClientFactory {
    request_timeout: Duration,
    channel_capacity: usize,
}

impl RpcClientFactory {
    pub fn new(request_timeout: Duration, channel_capacity: usize) -> Self {
        Self {
            request_timeout,
            channel_capacity,
        }
    }
}

impl TransportFactory for RpcClientFactory {
    fn connect(
        &self,
        endpoint: &Endpoint,
        commitment: Commitment,
    ) -> Result<Arc<dyn RpcTransport>, RpcError> {
        let client = RpcClient::new(
            endpoint.clone(),
            commitment,
            self.request_timeout,
            self.channel_capacity,
        )?;
        Ok(Arc::new(client))
    }
}
