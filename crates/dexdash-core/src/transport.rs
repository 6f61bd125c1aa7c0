use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::account::{AccountInfo, SlotInfo};
use crate::address::AccountAddress;
use crate::endpoint::{Commitment, Endpoint};
use crate::errors::RpcError;

/// Handle for one open push subscription, as assigned by the endpoint.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An open account-change subscription and the stream of pushed values.
/// `None` means the account was closed.
pub struct AccountSubscription {
    pub id: SubscriptionId,
    pub updates: mpsc::Receiver<Option<AccountInfo>>,
}

/// An open slot-change subscription and the stream of pushed slots.
pub struct SlotSubscription {
    pub id: SubscriptionId,
    pub updates: mpsc::Receiver<SlotInfo>,
}

/// Blockchain RPC surface used by connections.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    fn endpoint(&self) -> &Endpoint;

    /// Point read. `Ok(None)` means the account does not exist.
    async fn get_account_info(
        &self,
        address: &AccountAddress,
    ) -> Result<Option<AccountInfo>, RpcError>;

    async fn get_slot(&self) -> Result<u64, RpcError>;

    /// Submit a signed, serialized transaction. Returns its signature.
    async fn send_transaction(&self, transaction: &[u8]) -> Result<String, RpcError>;

    async fn account_subscribe(
        &self,
        address: &AccountAddress,
    ) -> Result<AccountSubscription, RpcError>;

    async fn account_unsubscribe(&self, id: SubscriptionId) -> Result<(), RpcError>;

    async fn slot_subscribe(&self) -> Result<SlotSubscription, RpcError>;

    async fn slot_unsubscribe(&self, id: SubscriptionId) -> Result<(), RpcError>;
}

/// Builds a transport bound to one endpoint.
pub trait TransportFactory: Send + Sync {
    fn connect(
        &self,
        endpoint: &Endpoint,
        commitment: Commitment,
    ) -> Result<Arc<dyn RpcTransport>, RpcError>;
}
