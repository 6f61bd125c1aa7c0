use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dexdash_core::{AccountAddress, AccountInfo, LeaseId, RpcTransport};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::lease::AccountLease;
use super::{AccountSnapshot, ObserveOptions, SubscriptionKey};
use crate::connection::Connection;

/// One live push subscription and the leases sharing it.
struct SubscriptionEntry {
    ref_count: usize,
    generation: u64,
    shutdown: Option<oneshot::Sender<()>>,
}

#[derive(Default)]
struct CacheState {
    subscriptions: HashMap<SubscriptionKey, SubscriptionEntry>,
    values: HashMap<SubscriptionKey, watch::Sender<AccountSnapshot>>,
}

struct CacheInner {
    state: Mutex<CacheState>,
    next_generation: AtomicU64,
}

/// Shared account store. Cheap to clone; all clones see the same table.
///
/// Values outlive their subscriptions: releasing the last lease closes the
/// push subscription but keeps the last snapshot, so a later acquire starts
/// from it. Use [`invalidate`](Self::invalidate) to drop one.
#[derive(Clone)]
pub struct AccountCache {
    inner: Arc<CacheInner>,
}

impl AccountCache {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CacheInner {
                state: Mutex::new(CacheState::default()),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Start observing `address` on `connection`.
    ///
    /// Never waits on the network: the returned lease immediately exposes
    /// whatever is cached, and reads and pushes land on it in the background.
    /// An absent address yields an inert lease that never loads.
    /// Must be called from within a Tokio runtime.
    pub fn acquire(
        &self,
        connection: &Connection,
        address: Option<&AccountAddress>,
        options: ObserveOptions,
    ) -> AccountLease {
        let Some(address) = address else {
            return AccountLease::inert();
        };
        let key = SubscriptionKey::new(connection.id().clone(), address.clone());

        let (generation, updates, opened) = {
            let mut state = self.inner.state.lock();
            let updates = state
                .values
                .entry(key.clone())
                .or_insert_with(|| watch::channel(AccountSnapshot::default()).0)
                .subscribe();

            match state.subscriptions.get_mut(&key) {
                Some(entry) => {
                    entry.ref_count += 1;
                    debug!(%key, ref_count = entry.ref_count, "account lease shared");
                    (entry.generation, updates, None)
                }
                None => {
                    let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
                    let (shutdown_tx, shutdown_rx) = oneshot::channel();
                    state.subscriptions.insert(
                        key.clone(),
                        SubscriptionEntry {
                            ref_count: 1,
                            generation,
                            shutdown: Some(shutdown_tx),
                        },
                    );
                    debug!(%key, generation, "account subscription opened");
                    (generation, updates, Some(shutdown_rx))
                }
            }
        };

        let transport = Arc::clone(connection.transport());
        if let Some(shutdown) = opened {
            tokio::spawn(run_subscription(
                self.clone(),
                key.clone(),
                generation,
                Arc::clone(&transport),
                options.refresh_interval,
                shutdown,
            ));
        }
        let refresh = tokio::spawn(run_refresh(
            self.clone(),
            key.clone(),
            generation,
            transport,
            options.refresh_interval,
        ));

        AccountLease::new(LeaseId::new(), self.clone(), key, generation, updates, refresh)
    }

    /// Live leases on `key`.
    pub fn ref_count(&self, key: &SubscriptionKey) -> usize {
        self.inner
            .state
            .lock()
            .subscriptions
            .get(key)
            .map_or(0, |e| e.ref_count)
    }

    /// Keys with an open push subscription.
    pub fn subscription_count(&self) -> usize {
        self.inner.state.lock().subscriptions.len()
    }

    /// Keys with a cached snapshot, live or not.
    pub fn cached_count(&self) -> usize {
        self.inner.state.lock().values.len()
    }

    pub fn peek(&self, key: &SubscriptionKey) -> Option<AccountSnapshot> {
        self.inner
            .state
            .lock()
            .values
            .get(key)
            .map(|tx| tx.borrow().clone())
    }

    /// Drop the cached snapshot for `key`. Refused (returns `false`) while
    /// any lease still holds the key.
    pub fn invalidate(&self, key: &SubscriptionKey) -> bool {
        let mut state = self.inner.state.lock();
        if state.subscriptions.contains_key(key) {
            return false;
        }
        state.values.remove(key).is_some()
    }

    /// Whether the entry opened as `generation` still holds `key`.
    pub(crate) fn is_live(&self, key: &SubscriptionKey, generation: u64) -> bool {
        self.inner
            .state
            .lock()
            .subscriptions
            .get(key)
            .is_some_and(|e| e.generation == generation)
    }

    /// Fold a read or push result into `key`'s snapshot, provided the entry
    /// that produced it is still the live one. Checked under the same lock
    /// that removes entries, so nothing lands after teardown.
    pub(crate) fn apply(
        &self,
        key: &SubscriptionKey,
        generation: u64,
        incoming: Option<AccountInfo>,
    ) -> bool {
        let state = self.inner.state.lock();
        match state.subscriptions.get(key) {
            Some(entry) if entry.generation == generation => {}
            _ => {
                debug!(%key, generation, "dropping update for closed subscription");
                return false;
            }
        }
        let Some(tx) = state.values.get(key) else {
            return false;
        };
        let changed = tx.send_if_modified(|snapshot| snapshot.merge(incoming));
        if changed {
            debug!(%key, generation, "account value updated");
        }
        changed
    }

    /// Called exactly once per acquired lease.
    pub(crate) fn release(&self, key: &SubscriptionKey, generation: u64) {
        let shutdown = {
            let mut state = self.inner.state.lock();
            let Some(entry) = state.subscriptions.get_mut(key) else {
                return;
            };
            if entry.generation != generation {
                return;
            }
            entry.ref_count -= 1;
            if entry.ref_count > 0 {
                debug!(%key, ref_count = entry.ref_count, "account lease released");
                return;
            }
            state
                .subscriptions
                .remove(key)
                .and_then(|mut entry| entry.shutdown.take())
        };
        debug!(%key, generation, "account subscription closing");
        if let Some(tx) = shutdown {
            let _ = tx.send(());
        }
    }
}

impl Default for AccountCache {
    fn default() -> Self {
        Self::new()
    }
}

enum StreamEnd {
    Shutdown,
    Closed,
}

/// Owns the push subscription for one entry until the entry is torn down.
/// A refused subscribe or a closed push stream is retried every `retry`
/// while the entry stays live.
async fn run_subscription(
    cache: AccountCache,
    key: SubscriptionKey,
    generation: u64,
    transport: Arc<dyn RpcTransport>,
    retry: Duration,
    mut shutdown: oneshot::Receiver<()>,
) {
    let retry = retry.max(Duration::from_millis(1));
    loop {
        // Subscribing is not raced against shutdown so that an accepted
        // subscription is always paired with an unsubscribe.
        match transport.account_subscribe(&key.address).await {
            Ok(subscription) => {
                let id = subscription.id;
                debug!(%key, subscription_id = %id, "account subscription live");
                let end = forward_pushes(&cache, &key, generation, subscription.updates, &mut shutdown).await;
                if let Err(e) = transport.account_unsubscribe(id).await {
                    warn!(%key, subscription_id = %id, error = %e, "account unsubscribe failed");
                }
                match end {
                    StreamEnd::Shutdown => break,
                    StreamEnd::Closed => {
                        warn!(%key, subscription_id = %id, ?retry, "account push stream ended, resubscribing");
                    }
                }
            }
            Err(e) => {
                warn!(%key, error = %e, kind = e.error_kind(), ?retry, "account subscribe failed, retrying");
            }
        }

        if !cache.is_live(&key, generation) {
            break;
        }
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            _ = tokio::time::sleep(retry) => {}
        }
    }
    debug!(%key, generation, "account subscription closed");
}

async fn forward_pushes(
    cache: &AccountCache,
    key: &SubscriptionKey,
    generation: u64,
    mut updates: mpsc::Receiver<Option<AccountInfo>>,
    shutdown: &mut oneshot::Receiver<()>,
) -> StreamEnd {
    loop {
        tokio::select! {
            biased;
            _ = &mut *shutdown => return StreamEnd::Shutdown,
            update = updates.recv() => match update {
                Some(value) => {
                    cache.apply(key, generation, value);
                }
                None => return StreamEnd::Closed,
            },
        }
    }
}

/// Per-lease point reads: one right away, then one per `period`.
async fn run_refresh(
    cache: AccountCache,
    key: SubscriptionKey,
    generation: u64,
    transport: Arc<dyn RpcTransport>,
    period: Duration,
) {
    let period = period.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        match transport.get_account_info(&key.address).await {
            Ok(value) => {
                cache.apply(&key, generation, value);
            }
            Err(e) => {
                warn!(%key, error = %e, kind = e.error_kind(), "account read failed");
            }
        }
        ticker.tick().await;
    }
}
