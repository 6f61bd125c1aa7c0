//! In-process transport for exercising connections and caches without a
//! network. Reads come from a seeded account map; pushes are injected by the
//! caller and fanned out to every open subscription on that address.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dexdash_core::{
    AccountAddress, AccountInfo, AccountSubscription, Commitment, Endpoint, RpcError,
    RpcTransport, SlotInfo, SlotSubscription, SubscriptionId, TransportFactory,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;

const MOCK_CHANNEL_CAPACITY: usize = 64;

#[derive(Default)]
struct MockState {
    accounts: HashMap<AccountAddress, AccountInfo>,
    account_subs: HashMap<SubscriptionId, (AccountAddress, mpsc::Sender<Option<AccountInfo>>)>,
    slot_subs: HashMap<SubscriptionId, mpsc::Sender<SlotInfo>>,
    sent: Vec<Vec<u8>>,
}

pub struct MockTransport {
    endpoint: Endpoint,
    state: Mutex<MockState>,
    next_sub: AtomicU64,
    reads: AtomicUsize,
    account_subscribes: AtomicUsize,
    fail_reads: AtomicBool,
    fail_subscribes: AtomicBool,
    read_delay: Mutex<Option<Duration>>,
}

impl MockTransport {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            state: Mutex::new(MockState::default()),
            next_sub: AtomicU64::new(1),
            reads: AtomicUsize::new(0),
            account_subscribes: AtomicUsize::new(0),
            fail_reads: AtomicBool::new(false),
            fail_subscribes: AtomicBool::new(false),
            read_delay: Mutex::new(None),
        }
    }

    /// Seed the value returned by point reads. Does not notify subscribers.
    pub fn set_account(&self, address: AccountAddress, info: AccountInfo) {
        self.state.lock().accounts.insert(address, info);
    }

    pub fn remove_account(&self, address: &AccountAddress) {
        self.state.lock().accounts.remove(address);
    }

    /// Store `info` and push it to every open subscription on `address`.
    /// Returns how many subscriptions accepted it.
    pub fn push(&self, address: &AccountAddress, info: AccountInfo) -> usize {
        let mut state = self.state.lock();
        state.accounts.insert(address.clone(), info.clone());
        fan_out(&state, address, Some(info))
    }

    /// Delete `address` and push the closure to its subscriptions.
    pub fn push_closed(&self, address: &AccountAddress) -> usize {
        let mut state = self.state.lock();
        state.accounts.remove(address);
        fan_out(&state, address, None)
    }

    /// Drop every account push stream, as a lost socket would. The
    /// subscriptions are forgotten without an unsubscribe.
    pub fn drop_account_streams(&self) -> usize {
        let mut state = self.state.lock();
        let dropped = state.account_subs.len();
        state.account_subs.clear();
        dropped
    }

    pub fn push_slot(&self, slot: SlotInfo) -> usize {
        self.state
            .lock()
            .slot_subs
            .values()
            .filter(|tx| tx.try_send(slot).is_ok())
            .count()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_subscribes(&self, fail: bool) {
        self.fail_subscribes.store(fail, Ordering::SeqCst);
    }

    pub fn set_read_delay(&self, delay: Option<Duration>) {
        *self.read_delay.lock() = delay;
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Open account subscriptions, across all addresses.
    pub fn account_subscription_count(&self) -> usize {
        self.state.lock().account_subs.len()
    }

    pub fn account_subscriptions_for(&self, address: &AccountAddress) -> usize {
        self.state
            .lock()
            .account_subs
            .values()
            .filter(|(addr, _)| addr == address)
            .count()
    }

    pub fn slot_subscription_count(&self) -> usize {
        self.state.lock().slot_subs.len()
    }

    /// Account subscriptions ever opened.
    pub fn total_account_subscribes(&self) -> usize {
        self.account_subscribes.load(Ordering::SeqCst)
    }

    pub fn sent_transactions(&self) -> Vec<Vec<u8>> {
        self.state.lock().sent.clone()
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_sub.fetch_add(1, Ordering::SeqCst))
    }
}

fn fan_out(state: &MockState, address: &AccountAddress, value: Option<AccountInfo>) -> usize {
    state
        .account_subs
        .values()
        .filter(|(addr, _)| addr == address)
        .filter(|(_, tx)| tx.try_send(value.clone()).is_ok())
        .count()
}

#[async_trait]
impl RpcTransport for MockTransport {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn get_account_info(
        &self,
        address: &AccountAddress,
    ) -> Result<Option<AccountInfo>, RpcError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let delay = *self.read_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(RpcError::Network("mock read failure".into()));
        }
        Ok(self.state.lock().accounts.get(address).cloned())
    }

    async fn get_slot(&self) -> Result<u64, RpcError> {
        Ok(0)
    }

    async fn send_transaction(&self, transaction: &[u8]) -> Result<String, RpcError> {
        let mut state = self.state.lock();
        state.sent.push(transaction.to_vec());
        Ok(format!("mock-signature-{}", state.sent.len()))
    }

    async fn account_subscribe(
        &self,
        address: &AccountAddress,
    ) -> Result<AccountSubscription, RpcError> {
        if self.fail_subscribes.load(Ordering::SeqCst) {
            return Err(RpcError::Closed);
        }
        let (tx, updates) = mpsc::channel(MOCK_CHANNEL_CAPACITY);
        let id = self.next_id();
        self.state
            .lock()
            .account_subs
            .insert(id, (address.clone(), tx));
        self.account_subscribes.fetch_add(1, Ordering::SeqCst);
        Ok(AccountSubscription { id, updates })
    }

    async fn account_unsubscribe(&self, id: SubscriptionId) -> Result<(), RpcError> {
        self.state.lock().account_subs.remove(&id);
        Ok(())
    }

    async fn slot_subscribe(&self) -> Result<SlotSubscription, RpcError> {
        if self.fail_subscribes.load(Ordering::SeqCst) {
            return Err(RpcError::Closed);
        }
        let (tx, updates) = mpsc::channel(MOCK_CHANNEL_CAPACITY);
        let id = self.next_id();
        self.state.lock().slot_subs.insert(id, tx);
        Ok(SlotSubscription { id, updates })
    }

    async fn slot_unsubscribe(&self, id: SubscriptionId) -> Result<(), RpcError> {
        self.state.lock().slot_subs.remove(&id);
        Ok(())
    }
}

/// Hands out one [`MockTransport`] per `connect` call and keeps them all so
/// tests can inspect what each connection did.
#[derive(Default)]
pub struct MockTransportFactory {
    created: Mutex<Vec<Arc<MockTransport>>>,
    seed: Mutex<HashMap<AccountAddress, AccountInfo>>,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an account into every transport created from now on.
    pub fn seed_account(&self, address: AccountAddress, info: AccountInfo) {
        self.seed.lock().insert(address, info);
    }

    pub fn created(&self) -> Vec<Arc<MockTransport>> {
        self.created.lock().clone()
    }

    pub fn last(&self) -> Option<Arc<MockTransport>> {
        self.created.lock().last().cloned()
    }
}

impl TransportFactory for MockTransportFactory {
    fn connect(
        &self,
        endpoint: &Endpoint,
        _commitment: Commitment,
    ) -> Result<Arc<dyn RpcTransport>, RpcError> {
        let transport = Arc::new(MockTransport::new(endpoint.clone()));
        for (address, info) in self.seed.lock().iter() {
            transport.set_account(address.clone(), info.clone());
        }
        self.created.lock().push(Arc::clone(&transport));
        Ok(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(lamports: u64) -> AccountInfo {
        AccountInfo {
            lamports,
            owner: AccountAddress::from_bytes([9; 32]),
            data: vec![1, 2],
            executable: false,
            rent_epoch: 0,
        }
    }

    #[tokio::test]
    async fn push_reaches_only_matching_subscriptions() {
        let t = MockTransport::new(Endpoint::default_endpoint());
        let a = AccountAddress::from_bytes([1; 32]);
        let b = AccountAddress::from_bytes([2; 32]);
        let mut sub_a = t.account_subscribe(&a).await.unwrap();
        let mut sub_b = t.account_subscribe(&b).await.unwrap();

        assert_eq!(t.push(&a, info(5)), 1);
        assert_eq!(sub_a.updates.recv().await.unwrap().unwrap().lamports, 5);
        assert!(sub_b.updates.try_recv().is_err());
        assert_eq!(t.get_account_info(&a).await.unwrap().unwrap().lamports, 5);
    }

    #[tokio::test]
    async fn closed_account_is_pushed_as_none() {
        let t = MockTransport::new(Endpoint::default_endpoint());
        let a = AccountAddress::from_bytes([1; 32]);
        t.set_account(a.clone(), info(5));
        let mut sub = t.account_subscribe(&a).await.unwrap();

        assert_eq!(t.push_closed(&a), 1);
        assert_eq!(sub.updates.recv().await.unwrap(), None);
        assert!(t.get_account_info(&a).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dropped_streams_end_without_unsubscribe() {
        let t = MockTransport::new(Endpoint::default_endpoint());
        let a = AccountAddress::from_bytes([1; 32]);
        let mut sub = t.account_subscribe(&a).await.unwrap();

        assert_eq!(t.drop_account_streams(), 1);
        assert!(sub.updates.recv().await.is_none());
        assert_eq!(t.account_subscription_count(), 0);
        assert_eq!(t.total_account_subscribes(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_removes_subscription() {
        let t = MockTransport::new(Endpoint::default_endpoint());
        let a = AccountAddress::from_bytes([1; 32]);
        let sub = t.account_subscribe(&a).await.unwrap();
        let slot = t.slot_subscribe().await.unwrap();
        assert_eq!(t.account_subscription_count(), 1);
        assert_eq!(t.slot_subscription_count(), 1);

        t.account_unsubscribe(sub.id).await.unwrap();
        t.slot_unsubscribe(slot.id).await.unwrap();
        assert_eq!(t.account_subscription_count(), 0);
        assert_eq!(t.slot_subscription_count(), 0);
        assert_eq!(t.total_account_subscribes(), 1);
    }

    #[tokio::test]
    async fn failing_reads_are_network_errors() {
        let t = MockTransport::new(Endpoint::default_endpoint());
        t.set_fail_reads(true);
        let err = t
            .get_account_info(&AccountAddress::from_bytes([1; 32]))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(t.read_count(), 1);
    }

    #[test]
    fn factory_records_and_seeds_transports() {
        let factory = MockTransportFactory::new();
        let addr = AccountAddress::from_bytes([3; 32]);
        factory.seed_account(addr.clone(), info(1));
        factory
            .connect(&Endpoint::default_endpoint(), Commitment::Confirmed)
            .unwrap();
        factory
            .connect(&Endpoint::default_endpoint(), Commitment::Confirmed)
            .unwrap();
        assert_eq!(factory.created().len(), 2);
        assert_eq!(
            factory.last().unwrap().state.lock().accounts.get(&addr),
            Some(&info(1))
        );
    }
}
