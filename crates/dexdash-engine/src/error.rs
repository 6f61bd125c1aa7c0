use dexdash_core::RpcError;
use dexdash_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A provider was looked up before it was installed. Programming error.
    #[error("missing context: {0} was not installed")]
    MissingContext(&'static str),

    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),

    #[error("duplicate endpoint: {0}")]
    DuplicateEndpoint(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Fatal errors indicate a wiring bug and must not be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MissingContext(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_missing_context_is_fatal() {
        assert!(EngineError::MissingContext("account cache").is_fatal());
        assert!(!EngineError::UnknownEndpoint("devnet".into()).is_fatal());
        assert!(!EngineError::Rpc(RpcError::Closed).is_fatal());
    }

    #[test]
    fn missing_context_names_provider() {
        let err = EngineError::MissingContext("connection context");
        assert_eq!(err.to_string(), "missing context: connection context was not installed");
    }
}
