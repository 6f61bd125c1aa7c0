//! Reference-counted account subscriptions shared between consumers.
//!
//! Consumers [`acquire`](AccountCache::acquire) a lease on an
//! `(connection, address)` key. The first lease on a key opens one push
//! subscription; later leases share it. Every lease also re-reads the account
//! on its own interval. Values are kept in a per-key `watch` channel and only
//! replaced when the incoming account differs in data or balance, so
//! redundant notifications leave the cached `Arc` untouched.

mod cache;
mod lease;
mod watcher;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dexdash_core::{AccountAddress, AccountInfo, ConnectionId};

pub use cache::AccountCache;
pub use lease::AccountLease;
pub use watcher::AccountWatcher;

/// Refresh cadence used when a consumer does not pick one.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Identity shared by all consumers of one account on one connection.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct SubscriptionKey {
    pub connection: ConnectionId,
    pub address: AccountAddress,
}

impl SubscriptionKey {
    pub fn new(connection: ConnectionId, address: AccountAddress) -> Self {
        Self {
            connection,
            address,
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.connection, self.address)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObserveOptions {
    pub refresh_interval: Duration,
}

impl ObserveOptions {
    pub fn with_refresh_interval(refresh_interval: Duration) -> Self {
        Self { refresh_interval }
    }
}

impl Default for ObserveOptions {
    fn default() -> Self {
        Self {
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }
}

/// What a consumer sees for a key: the last value, and whether any read or
/// push has resolved yet. `value` is `None` both before loading and when the
/// account does not exist; `loaded` tells the two apart.
#[derive(Clone, Debug, Default)]
pub struct AccountSnapshot {
    value: Option<Arc<AccountInfo>>,
    loaded: bool,
}

impl AccountSnapshot {
    pub fn value(&self) -> Option<&Arc<AccountInfo>> {
        self.value.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Fold an incoming read or push into the snapshot. Returns whether
    /// anything observable changed; when it returns `false` the held `Arc`
    /// is the same allocation as before.
    pub(crate) fn merge(&mut self, incoming: Option<AccountInfo>) -> bool {
        let first = !self.loaded;
        self.loaded = true;
        let unchanged = match (&self.value, &incoming) {
            (Some(current), Some(next)) => !current.differs_from(next),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return first;
        }
        self.value = incoming.map(Arc::new);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(lamports: u64, data: &[u8]) -> AccountInfo {
        AccountInfo {
            lamports,
            owner: AccountAddress::from_bytes([4; 32]),
            data: data.to_vec(),
            executable: false,
            rent_epoch: 0,
        }
    }

    #[test]
    fn first_merge_loads() {
        let mut snap = AccountSnapshot::default();
        assert!(!snap.is_loaded());
        assert!(snap.merge(Some(info(1, b"a"))));
        assert!(snap.is_loaded());
        assert_eq!(snap.value().unwrap().lamports, 1);
    }

    #[test]
    fn missing_account_still_loads() {
        let mut snap = AccountSnapshot::default();
        assert!(snap.merge(None));
        assert!(snap.is_loaded());
        assert!(snap.value().is_none());
        assert!(!snap.merge(None));
    }

    #[test]
    fn redundant_merge_keeps_allocation() {
        let mut snap = AccountSnapshot::default();
        snap.merge(Some(info(1, b"a")));
        let before = Arc::clone(snap.value().unwrap());

        let mut same = info(1, b"a");
        same.rent_epoch = 99;
        assert!(!snap.merge(Some(same)));
        assert!(Arc::ptr_eq(&before, snap.value().unwrap()));
    }

    #[test]
    fn balance_change_replaces_value() {
        let mut snap = AccountSnapshot::default();
        snap.merge(Some(info(1, b"a")));
        assert!(snap.merge(Some(info(2, b"a"))));
        assert_eq!(snap.value().unwrap().lamports, 2);
    }

    #[test]
    fn account_closing_clears_value() {
        let mut snap = AccountSnapshot::default();
        snap.merge(Some(info(1, b"a")));
        assert!(snap.merge(None));
        assert!(snap.value().is_none());
        assert!(snap.is_loaded());
    }

    #[test]
    fn key_display() {
        let key = SubscriptionKey::new(
            ConnectionId::from_raw("conn_1"),
            AccountAddress::from_bytes([0; 32]),
        );
        assert_eq!(key.to_string(), "conn_1/11111111111111111111111111111111");
    }
}
