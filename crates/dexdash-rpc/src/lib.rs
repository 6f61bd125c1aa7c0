pub mod client;
pub mod http;
pub mod pubsub;
pub mod wire;

pub mod mock;

pub use client::{RpcClient, RpcClientFactory};
pub use http::RpcHttpClient;
pub use mock::{MockTransport, MockTransportFactory};
pub use pubsub::PubsubClient;
