pub mod account;
pub mod address;
pub mod endpoint;
pub mod errors;
pub mod ids;
pub mod transport;

pub use account::{AccountInfo, SlotInfo};
pub use address::AccountAddress;
pub use endpoint::{Commitment, Endpoint, DEFAULT_ENDPOINT_NAME};
pub use errors::RpcError;
pub use ids::{ConnectionId, LeaseId};
pub use transport::{
    AccountSubscription, RpcTransport, SlotSubscription, SubscriptionId, TransportFactory,
};
