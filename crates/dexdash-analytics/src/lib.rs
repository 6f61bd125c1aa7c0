//! Client for the market-data GraphQL API.

pub mod client;
pub mod error;
pub mod models;
pub mod poller;
pub mod queries;

pub use client::AnalyticsClient;
pub use error::AnalyticsError;
pub use models::{Candle, Depth, DepthLevel, MarketStats, Side, Trade};
pub use poller::Poller;
pub use queries::{Operation, Resolution};
