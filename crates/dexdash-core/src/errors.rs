use std::time::Duration;

/// Typed error hierarchy for blockchain RPC operations.
/// Classifies errors as retryable (a later refresh may succeed) or not.
#[derive(Clone, Debug, thiserror::Error)]
pub enum RpcError {
    // Not retryable
    #[error("invalid account address: {0}")]
    InvalidAddress(String),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("decode error: {0}")]
    Decode(String),

    // Retryable
    #[error("http error {status}: {body}")]
    Http { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("connection closed")]
    Closed,
}

impl RpcError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Network(_) | Self::Timeout(_) | Self::Closed => true,
            Self::InvalidAddress(_) | Self::Rpc { .. } | Self::Decode(_) => false,
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::InvalidAddress(_) => "invalid_address",
            Self::Rpc { .. } => "rpc",
            Self::Decode(_) => "decode",
            Self::Http { .. } => "http",
            Self::Network(_) => "network",
            Self::Timeout(_) => "timeout",
            Self::Closed => "closed",
        }
    }

    pub fn from_status(status: u16, body: String) -> Self {
        Self::Http { status, body }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(e: serde_json::Error) -> Self {
        RpcError::Decode(e.to_string())
    }
}
