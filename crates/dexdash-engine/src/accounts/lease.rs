use std::sync::Arc;

use dexdash_core::{AccountInfo, LeaseId};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::cache::AccountCache;
use super::{AccountSnapshot, SubscriptionKey};

struct Held {
    cache: AccountCache,
    key: SubscriptionKey,
    generation: u64,
    refresh: JoinHandle<()>,
}

/// One consumer's hold on a cache key.
///
/// Releasing happens exactly once: either through [`release`](Self::release)
/// or when the lease is dropped.
pub struct AccountLease {
    id: LeaseId,
    held: Option<Held>,
    updates: Option<watch::Receiver<AccountSnapshot>>,
}

impl AccountLease {
    pub(crate) fn new(
        id: LeaseId,
        cache: AccountCache,
        key: SubscriptionKey,
        generation: u64,
        updates: watch::Receiver<AccountSnapshot>,
        refresh: JoinHandle<()>,
    ) -> Self {
        Self {
            id,
            held: Some(Held {
                cache,
                key,
                generation,
                refresh,
            }),
            updates: Some(updates),
        }
    }

    /// Lease for a consumer with no address yet.
    pub(crate) fn inert() -> Self {
        Self {
            id: LeaseId::new(),
            held: None,
            updates: None,
        }
    }

    pub fn id(&self) -> &LeaseId {
        &self.id
    }

    pub fn key(&self) -> Option<&SubscriptionKey> {
        self.held.as_ref().map(|h| &h.key)
    }

    /// Generation of the entry this lease joined; zero for inert leases.
    pub fn generation(&self) -> u64 {
        self.held.as_ref().map_or(0, |h| h.generation)
    }

    pub fn snapshot(&self) -> AccountSnapshot {
        self.updates
            .as_ref()
            .map(|rx| rx.borrow().clone())
            .unwrap_or_default()
    }

    pub fn value(&self) -> Option<Arc<AccountInfo>> {
        self.updates
            .as_ref()
            .and_then(|rx| rx.borrow().value().cloned())
    }

    pub fn is_loaded(&self) -> bool {
        self.updates
            .as_ref()
            .is_some_and(|rx| rx.borrow().is_loaded())
    }

    /// A fresh receiver for this key's snapshots. The current snapshot
    /// counts as seen, so its first `changed()` waits for a new one.
    pub fn subscribe(&self) -> watch::Receiver<AccountSnapshot> {
        let mut rx = match &self.updates {
            Some(rx) => rx.clone(),
            None => watch::channel(AccountSnapshot::default()).1,
        };
        rx.borrow_and_update();
        rx
    }

    /// Resolves on the next change to this key's snapshot. Never resolves
    /// for an inert lease.
    pub async fn changed(&mut self) {
        match self.updates.as_mut() {
            Some(rx) => {
                if rx.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
            None => std::future::pending::<()>().await,
        }
    }

    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if let Some(held) = self.held.take() {
            held.refresh.abort();
            held.cache.release(&held.key, held.generation);
        }
    }
}

impl Drop for AccountLease {
    fn drop(&mut self) {
        self.release_once();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use dexdash_core::{AccountAddress, Endpoint};
    use dexdash_rpc::MockTransport;

    use crate::accounts::ObserveOptions;
    use crate::connection::Connection;

    #[tokio::test]
    async fn inert_lease_never_changes() {
        let mut lease = AccountLease::inert();
        assert!(lease.key().is_none());
        assert_eq!(lease.generation(), 0);
        assert!(!lease.snapshot().is_loaded());
        let waited = tokio::time::timeout(Duration::from_millis(20), lease.changed()).await;
        assert!(waited.is_err());
        lease.release();
    }

    #[tokio::test]
    async fn release_and_drop_count_once() {
        let mock = Arc::new(MockTransport::new(Endpoint::default_endpoint()));
        let conn = Connection::new(mock);
        let cache = AccountCache::new();
        let address = AccountAddress::from_bytes([5; 32]);
        let options = ObserveOptions::default();

        let a = cache.acquire(&conn, Some(&address), options);
        let b = cache.acquire(&conn, Some(&address), options);
        let key = a.key().cloned().unwrap();
        assert_eq!(cache.ref_count(&key), 2);

        // `release` consumes the lease, so its drop must not decrement again.
        a.release();
        assert_eq!(cache.ref_count(&key), 1);
        drop(b);
        assert_eq!(cache.ref_count(&key), 0);
    }

    #[tokio::test]
    async fn subscribed_receiver_waits_for_next_change() {
        let mock = Arc::new(MockTransport::new(Endpoint::default_endpoint()));
        let address = AccountAddress::from_bytes([6; 32]);
        let owner = AccountAddress::from_bytes([9; 32]);
        let account = |lamports| AccountInfo {
            lamports,
            owner: owner.clone(),
            data: vec![1],
            executable: false,
            rent_epoch: 0,
        };
        mock.set_account(address.clone(), account(1));
        let conn = Connection::new(mock.clone());
        let cache = AccountCache::new();
        let options = ObserveOptions::with_refresh_interval(Duration::from_secs(3600));

        let mut lease = cache.acquire(&conn, Some(&address), options);
        lease.changed().await;
        // Let the push subscription come up.
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }

        let mut rx = lease.subscribe();
        assert!(!rx.has_changed().unwrap());
        assert_eq!(rx.borrow().value().map(|v| v.lamports), Some(1));

        mock.push(&address, account(2));
        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rx.borrow_and_update().value().map(|v| v.lamports), Some(2));
    }

    #[tokio::test]
    async fn each_lease_has_its_own_id() {
        let a = AccountLease::inert();
        let b = AccountLease::inert();
        assert_ne!(a.id(), b.id());
    }
}
