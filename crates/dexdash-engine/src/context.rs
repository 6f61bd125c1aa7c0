use crate::accounts::AccountCache;
use crate::connection::ConnectionContext;
use crate::error::EngineError;

/// Root composition handed to features. Providers are installed by the
/// binary at startup; a lookup for one that was never installed is a wiring
/// bug and fails with [`EngineError::MissingContext`].
#[derive(Clone, Default)]
pub struct AppContext {
    connection: Option<ConnectionContext>,
    accounts: Option<AccountCache>,
}

impl AppContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connection(mut self, connection: ConnectionContext) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn with_accounts(mut self, accounts: AccountCache) -> Self {
        self.accounts = Some(accounts);
        self
    }

    pub fn connection(&self) -> Result<&ConnectionContext, EngineError> {
        self.connection
            .as_ref()
            .ok_or(EngineError::MissingContext("connection context"))
    }

    pub fn accounts(&self) -> Result<&AccountCache, EngineError> {
        self.accounts
            .as_ref()
            .ok_or(EngineError::MissingContext("account cache"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use dexdash_core::Commitment;
    use dexdash_rpc::MockTransportFactory;
    use dexdash_store::{Database, LocalStorage};

    #[test]
    fn empty_context_fails_fast() {
        let ctx = AppContext::new();
        let err = ctx.connection().err().unwrap();
        assert!(err.is_fatal());
        assert!(matches!(err, EngineError::MissingContext("connection context")));
        assert!(matches!(
            ctx.accounts().err().unwrap(),
            EngineError::MissingContext("account cache")
        ));
    }

    #[tokio::test]
    async fn installed_providers_resolve() {
        let storage = LocalStorage::new(Database::in_memory().unwrap());
        let connection = ConnectionContext::new(
            storage,
            Arc::new(MockTransportFactory::new()),
            Commitment::Confirmed,
        )
        .await
        .unwrap();
        let ctx = AppContext::new()
            .with_connection(connection)
            .with_accounts(AccountCache::new());

        assert!(ctx.connection().is_ok());
        assert_eq!(ctx.accounts().unwrap().subscription_count(), 0);
    }
}
