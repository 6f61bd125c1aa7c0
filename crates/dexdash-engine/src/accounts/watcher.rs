use std::sync::Arc;

use dexdash_core::{AccountAddress, AccountInfo};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use super::cache::AccountCache;
use super::{AccountSnapshot, ObserveOptions};
use crate::connection::ConnectionContext;

/// Observes one address on whatever connection is currently selected.
///
/// On every endpoint switch the lease on the old connection is released
/// before one is acquired on the new connection, so a watcher never holds
/// more than one key. Dropping the watcher releases its lease.
pub struct AccountWatcher {
    address: AccountAddress,
    updates: watch::Receiver<AccountSnapshot>,
    task: JoinHandle<()>,
}

impl AccountWatcher {
    pub fn spawn(
        cache: AccountCache,
        connections: &ConnectionContext,
        address: AccountAddress,
        options: ObserveOptions,
    ) -> Self {
        let mut connection_rx = connections.subscribe();
        let (tx, updates) = watch::channel(AccountSnapshot::default());
        let followed = address.clone();

        let task = tokio::spawn(async move {
            loop {
                let connection = connection_rx.borrow_and_update().clone();
                let mut lease = cache.acquire(&connection, Some(&followed), options);
                debug!(address = %followed, connection_id = %connection.id(), "watcher attached");
                tx.send_replace(lease.snapshot());

                loop {
                    tokio::select! {
                        switched = connection_rx.changed() => {
                            if switched.is_err() {
                                return;
                            }
                            break;
                        }
                        _ = lease.changed() => {
                            tx.send_replace(lease.snapshot());
                        }
                    }
                }
                lease.release();
            }
        });

        Self {
            address,
            updates,
            task,
        }
    }

    pub fn address(&self) -> &AccountAddress {
        &self.address
    }

    pub fn snapshot(&self) -> AccountSnapshot {
        self.updates.borrow().clone()
    }

    pub fn value(&self) -> Option<Arc<AccountInfo>> {
        self.updates.borrow().value().cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.updates.borrow().is_loaded()
    }

    /// Resolves on the next forwarded snapshot, or never once the watcher's
    /// task has stopped.
    pub async fn changed(&mut self) {
        if self.updates.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// A receiver that has already seen the current snapshot.
    pub fn subscribe(&self) -> watch::Receiver<AccountSnapshot> {
        let mut rx = self.updates.clone();
        rx.borrow_and_update();
        rx
    }
}

impl Drop for AccountWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dexdash_core::{Commitment, RpcTransport, DEFAULT_ENDPOINT_NAME};
    use dexdash_rpc::MockTransportFactory;
    use dexdash_store::{Database, LocalStorage};
    use std::time::Duration;

    use crate::accounts::SubscriptionKey;

    fn info(lamports: u64) -> AccountInfo {
        AccountInfo {
            lamports,
            owner: AccountAddress::from_bytes([8; 32]),
            data: vec![0; 4],
            executable: false,
            rent_epoch: 0,
        }
    }

    async fn settle() {
        for _ in 0..30 {
            tokio::task::yield_now().await;
        }
    }

    async fn context() -> (ConnectionContext, Arc<MockTransportFactory>) {
        let factory = Arc::new(MockTransportFactory::new());
        let storage = LocalStorage::new(Database::in_memory().unwrap());
        let ctx = ConnectionContext::new(storage, factory.clone(), Commitment::Confirmed)
            .await
            .unwrap();
        (ctx, factory)
    }

    fn slow() -> ObserveOptions {
        ObserveOptions::with_refresh_interval(Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn forwards_values_from_current_connection() {
        let (ctx, factory) = context().await;
        let address = AccountAddress::from_bytes([1; 32]);
        let cache = AccountCache::new();
        let watcher = AccountWatcher::spawn(cache, &ctx, address.clone(), slow());
        settle().await;
        assert!(watcher.is_loaded());
        assert!(watcher.value().is_none());

        // The read connection is the first transport built.
        let read = &factory.created()[0];
        read.push(&address, info(5));
        settle().await;
        assert_eq!(watcher.value().unwrap().lamports, 5);
    }

    #[tokio::test]
    async fn consumers_follow_endpoint_switch() {
        let (ctx, factory) = context().await;
        let address = AccountAddress::from_bytes([2; 32]);
        let cache = AccountCache::new();
        let old_key = SubscriptionKey::new(ctx.connection().id().clone(), address.clone());

        let watchers: Vec<_> = (0..3)
            .map(|_| AccountWatcher::spawn(cache.clone(), &ctx, address.clone(), slow()))
            .collect();
        settle().await;
        assert_eq!(cache.ref_count(&old_key), 3);
        let old_read = factory.created()[0].clone();
        // Keep-alive plus the one shared subscription.
        assert_eq!(old_read.account_subscription_count(), 2);

        ctx.set_endpoint("localnet").await.unwrap();
        settle().await;

        let new_key = SubscriptionKey::new(ctx.connection().id().clone(), address.clone());
        assert_eq!(cache.ref_count(&old_key), 0);
        assert_eq!(cache.ref_count(&new_key), 3);
        assert_eq!(cache.subscription_count(), 1);
        assert_eq!(old_read.account_subscription_count(), 0);

        let new_read = factory.created()[2].clone();
        assert_eq!(new_read.endpoint().name, "localnet");
        assert_eq!(new_read.account_subscriptions_for(&address), 1);

        new_read.push(&address, info(9));
        settle().await;
        for watcher in &watchers {
            assert_eq!(watcher.value().unwrap().lamports, 9);
        }
    }

    #[tokio::test]
    async fn repeated_switches_leave_one_entry() {
        let (ctx, _factory) = context().await;
        let address = AccountAddress::from_bytes([3; 32]);
        let cache = AccountCache::new();
        let _watcher = AccountWatcher::spawn(cache.clone(), &ctx, address, slow());
        settle().await;

        for i in 0..6 {
            let name = if i % 2 == 0 { "localnet" } else { DEFAULT_ENDPOINT_NAME };
            ctx.set_endpoint(name).await.unwrap();
            settle().await;
            assert_eq!(cache.subscription_count(), 1);
        }
    }

    #[tokio::test]
    async fn dropping_watcher_releases_lease() {
        let (ctx, factory) = context().await;
        let address = AccountAddress::from_bytes([4; 32]);
        let cache = AccountCache::new();
        let watcher = AccountWatcher::spawn(cache.clone(), &ctx, address.clone(), slow());
        settle().await;
        assert_eq!(cache.subscription_count(), 1);

        drop(watcher);
        settle().await;
        assert_eq!(cache.subscription_count(), 0);
        assert_eq!(factory.created()[0].account_subscriptions_for(&address), 0);
    }
}
