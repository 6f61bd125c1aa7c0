//! Endpoint selection and the read/send connection pair built for it.

use std::fmt;
use std::sync::Arc;

use dexdash_core::{
    AccountAddress, Commitment, ConnectionId, Endpoint, RpcTransport, SubscriptionId,
    TransportFactory,
};
use dexdash_store::LocalStorage;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::error::EngineError;

/// Local storage key holding the selected endpoint's name.
pub const SELECTED_ENDPOINT_KEY: &str = "selectedEndpoint";
/// Local storage key holding the user-supplied endpoint list.
pub const CUSTOM_ENDPOINTS_KEY: &str = "customEndpoints";

/// A transport bound to one endpoint, with an identity unique to this
/// construction. Cloning shares the transport and keeps the id.
#[derive(Clone)]
pub struct Connection {
    id: ConnectionId,
    transport: Arc<dyn RpcTransport>,
}

impl Connection {
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self {
            id: ConnectionId::new(),
            transport,
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.transport.endpoint()
    }

    pub fn transport(&self) -> &Arc<dyn RpcTransport> {
        &self.transport
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint().name)
            .finish()
    }
}

/// Listeners that keep a connection's push channel from idling out.
/// Neither one is ever read.
struct KeepAlive {
    connection_id: ConnectionId,
    transport: Arc<dyn RpcTransport>,
    account: Option<SubscriptionId>,
    slot: Option<SubscriptionId>,
}

impl KeepAlive {
    async fn register(connection: &Connection) -> Self {
        let transport = Arc::clone(connection.transport());
        let account = match transport.account_subscribe(&AccountAddress::throwaway()).await {
            Ok(sub) => Some(sub.id),
            Err(e) => {
                warn!(connection_id = %connection.id(), error = %e, "keep-alive account listener failed");
                None
            }
        };
        let slot = match transport.slot_subscribe().await {
            Ok(sub) => Some(sub.id),
            Err(e) => {
                warn!(connection_id = %connection.id(), error = %e, "keep-alive slot listener failed");
                None
            }
        };
        debug!(connection_id = %connection.id(), ?account, ?slot, "keep-alive registered");
        Self {
            connection_id: connection.id().clone(),
            transport,
            account,
            slot,
        }
    }

    async fn release(self) {
        if let Some(id) = self.account {
            if let Err(e) = self.transport.account_unsubscribe(id).await {
                warn!(connection_id = %self.connection_id, subscription_id = %id, error = %e, "keep-alive release failed");
            }
        }
        if let Some(id) = self.slot {
            if let Err(e) = self.transport.slot_unsubscribe(id).await {
                warn!(connection_id = %self.connection_id, subscription_id = %id, error = %e, "keep-alive release failed");
            }
        }
        debug!(connection_id = %self.connection_id, "keep-alive released");
    }
}

struct Active {
    endpoint: Endpoint,
    read: Connection,
    send: Connection,
}

struct Inner {
    storage: LocalStorage,
    factory: Arc<dyn TransportFactory>,
    commitment: Commitment,
    customs: RwLock<Vec<Endpoint>>,
    active: RwLock<Active>,
    published: watch::Sender<Connection>,
    // Serializes endpoint switches and owns the active keep-alives.
    keep_alives: Mutex<Vec<KeepAlive>>,
}

/// Supplies the read and send connections for the selected endpoint.
///
/// Connections are replaced, never mutated: every endpoint switch builds a
/// fresh pair with new ids, so anything keyed on the old pair is orphaned and
/// must re-acquire through [`ConnectionContext::subscribe`].
#[derive(Clone)]
pub struct ConnectionContext {
    inner: Arc<Inner>,
}

impl ConnectionContext {
    /// Restore the persisted selection (falling back to the default built-in)
    /// and open its connection pair.
    pub async fn new(
        storage: LocalStorage,
        factory: Arc<dyn TransportFactory>,
        commitment: Commitment,
    ) -> Result<Self, EngineError> {
        let customs: Vec<Endpoint> = load_or_default(&storage, CUSTOM_ENDPOINTS_KEY);
        let selected: Option<String> = load_or_default(&storage, SELECTED_ENDPOINT_KEY);

        let endpoint = selected
            .and_then(|name| {
                let found = find_endpoint(&customs, &name);
                if found.is_none() {
                    warn!(endpoint = %name, "stored endpoint no longer exists, using default");
                }
                found
            })
            .unwrap_or_else(Endpoint::default_endpoint);

        let (read, send) = build_pair(factory.as_ref(), &endpoint, commitment)?;
        let keep_alives = vec![KeepAlive::register(&read).await, KeepAlive::register(&send).await];
        let (published, _) = watch::channel(read.clone());

        info!(endpoint = %endpoint.name, url = %endpoint.url, connection_id = %read.id(), "connection context ready");

        Ok(Self {
            inner: Arc::new(Inner {
                storage,
                factory,
                commitment,
                customs: RwLock::new(customs),
                active: RwLock::new(Active {
                    endpoint,
                    read,
                    send,
                }),
                published,
                keep_alives: Mutex::new(keep_alives),
            }),
        })
    }

    pub fn endpoint(&self) -> Endpoint {
        self.inner.active.read().endpoint.clone()
    }

    /// Built-ins followed by user-supplied endpoints.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        let mut all = Endpoint::builtins();
        all.extend(self.inner.customs.read().iter().cloned());
        all
    }

    /// Connection for reads and subscriptions.
    pub fn connection(&self) -> Connection {
        self.inner.active.read().read.clone()
    }

    /// Connection reserved for transaction submission.
    pub fn send_connection(&self) -> Connection {
        self.inner.active.read().send.clone()
    }

    pub fn commitment(&self) -> Commitment {
        self.inner.commitment
    }

    /// Yields the read connection now and again after every switch.
    pub fn subscribe(&self) -> watch::Receiver<Connection> {
        self.inner.published.subscribe()
    }

    /// Select `name`, persist the choice and replace both connections.
    pub async fn set_endpoint(&self, name: &str) -> Result<Endpoint, EngineError> {
        let mut keep_alives = self.inner.keep_alives.lock().await;

        let endpoint = find_endpoint(&self.inner.customs.read(), name)
            .ok_or_else(|| EngineError::UnknownEndpoint(name.to_string()))?;
        let (read, send) = build_pair(self.inner.factory.as_ref(), &endpoint, self.inner.commitment)?;
        self.inner.storage.set(SELECTED_ENDPOINT_KEY, &endpoint.name)?;
        let fresh = vec![KeepAlive::register(&read).await, KeepAlive::register(&send).await];

        let previous = {
            let mut active = self.inner.active.write();
            let previous = active.read.id().clone();
            *active = Active {
                endpoint: endpoint.clone(),
                read: read.clone(),
                send,
            };
            previous
        };
        self.inner.published.send_replace(read.clone());

        let stale = std::mem::replace(&mut *keep_alives, fresh);
        for keep_alive in stale {
            keep_alive.release().await;
        }

        info!(
            endpoint = %endpoint.name,
            connection_id = %read.id(),
            previous_connection_id = %previous,
            "endpoint switched"
        );
        Ok(endpoint)
    }

    /// Append a user-supplied endpoint to the persisted list.
    pub fn add_custom_endpoint(&self, endpoint: Endpoint) -> Result<Endpoint, EngineError> {
        let name = endpoint.name.trim().to_string();
        if name.is_empty() {
            return Err(EngineError::InvalidEndpoint("name must not be empty".into()));
        }
        let endpoint = Endpoint::custom(name, endpoint.url.trim());
        if !endpoint.has_http_scheme() {
            return Err(EngineError::InvalidEndpoint(format!(
                "{}: url must start with http:// or https://",
                endpoint.url
            )));
        }

        let mut customs = self.inner.customs.write();
        let clash = Endpoint::builtins()
            .iter()
            .chain(customs.iter())
            .any(|e| e.name == endpoint.name || e.url == endpoint.url);
        if clash {
            return Err(EngineError::DuplicateEndpoint(endpoint.name));
        }

        let mut updated = customs.clone();
        updated.push(endpoint.clone());
        self.inner.storage.set(CUSTOM_ENDPOINTS_KEY, &updated)?;
        *customs = updated;

        info!(endpoint = %endpoint.name, url = %endpoint.url, "custom endpoint added");
        Ok(endpoint)
    }

    /// Release the active keep-alive listeners.
    pub async fn shutdown(&self) {
        let stale = std::mem::take(&mut *self.inner.keep_alives.lock().await);
        for keep_alive in stale {
            keep_alive.release().await;
        }
    }
}

fn build_pair(
    factory: &dyn TransportFactory,
    endpoint: &Endpoint,
    commitment: Commitment,
) -> Result<(Connection, Connection), EngineError> {
    let read = Connection::new(factory.connect(endpoint, commitment)?);
    let send = Connection::new(factory.connect(endpoint, commitment)?);
    Ok((read, send))
}

fn find_endpoint(customs: &[Endpoint], name: &str) -> Option<Endpoint> {
    Endpoint::builtins()
        .into_iter()
        .chain(customs.iter().cloned())
        .find(|e| e.name == name)
}

/// Unreadable stored values are treated as absent.
fn load_or_default<T: DeserializeOwned + Default>(storage: &LocalStorage, key: &str) -> T {
    match storage.get(key) {
        Ok(value) => value.unwrap_or_default(),
        Err(e) => {
            warn!(key, error = %e, "ignoring unreadable stored value");
            T::default()
        }
    }
}
