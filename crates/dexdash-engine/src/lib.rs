pub mod accounts;
pub mod connection;
pub mod context;
pub mod error;

pub use accounts::{
    AccountCache, AccountLease, AccountSnapshot, AccountWatcher, ObserveOptions, SubscriptionKey,
    DEFAULT_REFRESH_INTERVAL,
};
pub use connection::{Connection, ConnectionContext, CUSTOM_ENDPOINTS_KEY, SELECTED_ENDPOINT_KEY};
pub use context::AppContext;
pub use error::EngineError;
