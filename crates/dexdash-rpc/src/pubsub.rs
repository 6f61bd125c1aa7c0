//! JSON-RPC pub/sub over a single WebSocket.
//!
//! One socket is shared by every subscription made through a client. A
//! background task owns the socket, correlates responses with requests by id
//! and routes notifications to per-subscription channels by subscription id.
//! The socket is opened lazily on first use and reopened on the next request
//! after it drops; subscriptions do not survive a drop (their channels close).

use std::collections::HashMap;
use std::time::Duration;

use dexdash_core::{AccountInfo, RpcError, SlotInfo, SubscriptionId};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::wire::{decode_account_value, decode_slot, JsonRpcRequest, JsonRpcResponse};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Where notifications for one subscription go.
enum Route {
    Account(mpsc::Sender<Option<AccountInfo>>),
    Slot(mpsc::Sender<SlotInfo>),
}

impl Route {
    fn unsubscribe_method(&self) -> &'static str {
        match self {
            Route::Account(_) => "accountUnsubscribe",
            Route::Slot(_) => "slotUnsubscribe",
        }
    }
}

enum Action {
    Subscribe(Route),
    Unsubscribe(SubscriptionId),
}

struct PubsubCommand {
    method: &'static str,
    params: Value,
    action: Action,
    response_tx: oneshot::Sender<Result<Value, RpcError>>,
}

struct Pending {
    response_tx: oneshot::Sender<Result<Value, RpcError>>,
    route: Option<Route>,
}

struct PubsubHandle {
    cmd_tx: mpsc::Sender<PubsubCommand>,
    task: JoinHandle<()>,
}

impl Drop for PubsubHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct PubsubClient {
    url: String,
    request_timeout: Duration,
    channel_capacity: usize,
    handle: Mutex<Option<PubsubHandle>>,
}

impl PubsubClient {
    pub fn new(url: impl Into<String>, request_timeout: Duration, channel_capacity: usize) -> Self {
        Self {
            url: url.into(),
            request_timeout,
            channel_capacity: channel_capacity.max(1),
            handle: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether a socket task is currently running.
    pub async fn is_connected(&self) -> bool {
        self.handle
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.cmd_tx.is_closed())
    }

    pub async fn account_subscribe(
        &self,
        params: Value,
    ) -> Result<(SubscriptionId, mpsc::Receiver<Option<AccountInfo>>), RpcError> {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let id = self
            .subscribe("accountSubscribe", params, Route::Account(tx))
            .await?;
        Ok((id, rx))
    }

    pub async fn slot_subscribe(&self) -> Result<(SubscriptionId, mpsc::Receiver<SlotInfo>), RpcError> {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let id = self
            .subscribe("slotSubscribe", Value::Array(Vec::new()), Route::Slot(tx))
            .await?;
        Ok((id, rx))
    }

    pub async fn account_unsubscribe(&self, id: SubscriptionId) -> Result<(), RpcError> {
        self.unsubscribe("accountUnsubscribe", id).await
    }

    pub async fn slot_unsubscribe(&self, id: SubscriptionId) -> Result<(), RpcError> {
        self.unsubscribe("slotUnsubscribe", id).await
    }

    async fn subscribe(
        &self,
        method: &'static str,
        params: Value,
        route: Route,
    ) -> Result<SubscriptionId, RpcError> {
        let cmd_tx = self.connected_sender().await?;
        let result = self
            .request(&cmd_tx, method, params, Action::Subscribe(route))
            .await?;
        let id = result
            .as_u64()
            .ok_or_else(|| RpcError::Decode(format!("{method}: expected numeric id, got {result}")))?;
        debug!(method, subscription_id = id, "subscribed");
        Ok(SubscriptionId(id))
    }

    async fn unsubscribe(&self, method: &'static str, id: SubscriptionId) -> Result<(), RpcError> {
        // A dropped socket already took every subscription with it.
        let cmd_tx = {
            let guard = self.handle.lock().await;
            match guard.as_ref() {
                Some(h) if !h.cmd_tx.is_closed() => h.cmd_tx.clone(),
                _ => return Ok(()),
            }
        };
        let params = Value::Array(vec![Value::from(id.0)]);
        self.request(&cmd_tx, method, params, Action::Unsubscribe(id))
            .await?;
        debug!(method, subscription_id = %id, "unsubscribed");
        Ok(())
    }

    async fn request(
        &self,
        cmd_tx: &mpsc::Sender<PubsubCommand>,
        method: &'static str,
        params: Value,
        action: Action,
    ) -> Result<Value, RpcError> {
        let (response_tx, response_rx) = oneshot::channel();
        cmd_tx
            .send(PubsubCommand {
                method,
                params,
                action,
                response_tx,
            })
            .await
            .map_err(|_| RpcError::Closed)?;

        tokio::time::timeout(self.request_timeout, response_rx)
            .await
            .map_err(|_| RpcError::Timeout(self.request_timeout))?
            .map_err(|_| RpcError::Closed)?
    }

    async fn connected_sender(&self) -> Result<mpsc::Sender<PubsubCommand>, RpcError> {
        let mut guard = self.handle.lock().await;
        if let Some(handle) = guard.as_ref() {
            if !handle.cmd_tx.is_closed() {
                return Ok(handle.cmd_tx.clone());
            }
        }

        let (ws, _) = tokio::time::timeout(self.request_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| RpcError::Timeout(self.request_timeout))?
            .map_err(|e| RpcError::Network(format!("websocket connect {}: {e}", self.url)))?;
        info!(url = %self.url, "pubsub socket opened");

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let task = tokio::spawn(pubsub_loop(ws, cmd_rx, self.url.clone()));
        *guard = Some(PubsubHandle {
            cmd_tx: cmd_tx.clone(),
            task,
        });
        Ok(cmd_tx)
    }
}

async fn pubsub_loop(ws: WsStream, mut cmd_rx: mpsc::Receiver<PubsubCommand>, url: String) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut pending: HashMap<u64, Pending> = HashMap::new();
    let mut routes: HashMap<SubscriptionId, Route> = HashMap::new();
    let mut next_id: u64 = 1;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                let id = next_id;
                next_id += 1;

                // Abandoned subscribes stay until answered so a late ack can
                // still be unsubscribed.
                pending.retain(|_, p| p.route.is_some() || !p.response_tx.is_closed());

                let route = match cmd.action {
                    Action::Subscribe(route) => Some(route),
                    Action::Unsubscribe(sub_id) => {
                        // Stop routing before the server confirms.
                        routes.remove(&sub_id);
                        None
                    }
                };
                let pending_request = Pending { response_tx: cmd.response_tx, route };
                if !send_request(&mut ws_tx, &mut pending, id, cmd.method, &cmd.params, pending_request).await {
                    break;
                }
            }
            msg = ws_rx.next() => {
                let Some(Ok(msg)) = msg else { break };
                let Message::Text(text) = msg else { continue };
                let Ok(val): Result<Value, _> = serde_json::from_str(&text) else {
                    warn!(url = %url, "unparseable pubsub frame");
                    continue;
                };
                if let Some(id) = val.get("id").and_then(Value::as_u64) {
                    let Some((method, sub_id)) = complete_request(&mut pending, &mut routes, id, val) else {
                        continue;
                    };
                    warn!(url = %url, method, subscription_id = %sub_id, "subscribe acknowledged after caller gave up, unsubscribing");
                    let id = next_id;
                    next_id += 1;
                    let (response_tx, _) = oneshot::channel();
                    let params = Value::Array(vec![Value::from(sub_id.0)]);
                    let orphan = Pending { response_tx, route: None };
                    if !send_request(&mut ws_tx, &mut pending, id, method, &params, orphan).await {
                        break;
                    }
                } else if val.get("method").is_some() {
                    route_notification(&routes, val);
                }
            }
        }
    }

    for (_, p) in pending.drain() {
        let _ = p.response_tx.send(Err(RpcError::Closed));
    }
    info!(url = %url, open_subscriptions = routes.len(), "pubsub socket closed");
}

/// Returns `false` once the socket can no longer be written.
async fn send_request(
    ws_tx: &mut WsSink,
    pending: &mut HashMap<u64, Pending>,
    id: u64,
    method: &'static str,
    params: &Value,
    request: Pending,
) -> bool {
    let text = match serde_json::to_string(&JsonRpcRequest::new(id, method, params)) {
        Ok(text) => text,
        Err(e) => {
            let _ = request.response_tx.send(Err(e.into()));
            return true;
        }
    };
    pending.insert(id, request);
    ws_tx.send(Message::Text(text.into())).await.is_ok()
}

/// Resolve request `id`. A subscription nobody is waiting for any more is
/// not routed; its unsubscribe method and id are returned instead.
fn complete_request(
    pending: &mut HashMap<u64, Pending>,
    routes: &mut HashMap<SubscriptionId, Route>,
    id: u64,
    val: Value,
) -> Option<(&'static str, SubscriptionId)> {
    let p = pending.remove(&id)?;
    let result = serde_json::from_value::<JsonRpcResponse>(val)
        .map_err(RpcError::from)
        .and_then(JsonRpcResponse::into_result);

    let subscribed = match (&result, p.route) {
        (Ok(value), Some(route)) => value.as_u64().map(|sub_id| (SubscriptionId(sub_id), route)),
        _ => None,
    };
    let delivered = p.response_tx.send(result).is_ok();
    let (sub_id, route) = subscribed?;
    if delivered {
        routes.insert(sub_id, route);
        None
    } else {
        Some((route.unsubscribe_method(), sub_id))
    }
}

fn route_notification(routes: &HashMap<SubscriptionId, Route>, val: Value) {
    let params = &val["params"];
    let Some(sub_id) = params.get("subscription").and_then(Value::as_u64) else {
        return;
    };
    let Some(route) = routes.get(&SubscriptionId(sub_id)) else {
        debug!(subscription_id = sub_id, "notification for unknown subscription");
        return;
    };
    let result = params["result"].clone();

    let delivered = match route {
        Route::Account(tx) => match decode_account_value(result) {
            Ok(value) => tx.try_send(value).map_err(|e| is_full(&e)),
            Err(e) => {
                warn!(subscription_id = sub_id, error = %e, "bad account notification");
                Ok(())
            }
        },
        Route::Slot(tx) => match decode_slot(result) {
            Ok(slot) => tx.try_send(slot).map_err(|e| is_full(&e)),
            Err(e) => {
                warn!(subscription_id = sub_id, error = %e, "bad slot notification");
                Ok(())
            }
        },
    };

    if let Err(true) = delivered {
        warn!(subscription_id = sub_id, "subscriber queue full, dropping notification");
    }
}

/// Closed receivers are normal (keep-alive listeners never read).
fn is_full<T>(e: &mpsc::error::TrySendError<T>) -> bool {
    matches!(e, mpsc::error::TrySendError::Full(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;

    const OWNER: &str = "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin";

    fn account_value() -> Value {
        json!({
            "data": ["AQID", "base64"],
            "executable": false,
            "lamports": 42,
            "owner": OWNER,
            "rentEpoch": 0
        })
    }

    /// Minimal pub/sub endpoint: answers subscribe/unsubscribe and, right
    /// after an account subscription, pushes `value` for it.
    async fn spawn_fake_endpoint(value: Value) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let mut next_sub = 100u64;
            while let Some(Ok(Message::Text(text))) = ws.next().await {
                let req: Value = serde_json::from_str(&text).unwrap();
                let id = req["id"].clone();
                match req["method"].as_str().unwrap() {
                    "accountSubscribe" | "slotSubscribe" => {
                        next_sub += 1;
                        let reply = json!({"jsonrpc": "2.0", "id": id, "result": next_sub});
                        ws.send(Message::Text(reply.to_string().into())).await.unwrap();
                        if req["method"] == "accountSubscribe" {
                            let note = json!({
                                "jsonrpc": "2.0",
                                "method": "accountNotification",
                                "params": {
                                    "subscription": next_sub,
                                    "result": {
                                        "context": {"slot": 9},
                                        "value": value
                                    }
                                }
                            });
                            ws.send(Message::Text(note.to_string().into())).await.unwrap();
                        }
                    }
                    _ => {
                        let reply = json!({"jsonrpc": "2.0", "id": id, "result": true});
                        ws.send(Message::Text(reply.to_string().into())).await.unwrap();
                    }
                }
            }
        });
        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn subscribe_routes_notifications() {
        let url = spawn_fake_endpoint(account_value()).await;
        let client = PubsubClient::new(url, Duration::from_secs(5), 8);

        let (id, mut rx) = client
            .account_subscribe(json!([OWNER, {"encoding": "base64"}]))
            .await
            .unwrap();
        assert_eq!(id, SubscriptionId(101));

        let info = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(info.lamports, 42);
        assert_eq!(info.data, vec![1, 2, 3]);
        assert!(client.is_connected().await);
    }

    #[tokio::test]
    async fn closed_account_notification_is_delivered() {
        let url = spawn_fake_endpoint(Value::Null).await;
        let client = PubsubClient::new(url, Duration::from_secs(5), 8);

        let (_, mut rx) = client
            .account_subscribe(json!([OWNER, {"encoding": "base64"}]))
            .await
            .unwrap();
        let pushed = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pushed, None);
    }

    #[tokio::test]
    async fn late_subscribe_ack_is_unsubscribed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<Value>();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(Message::Text(text))) = ws.next().await {
                let req: Value = serde_json::from_str(&text).unwrap();
                let _ = seen_tx.send(req.clone());
                let result = if req["method"] == "accountSubscribe" {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    json!(7)
                } else {
                    json!(true)
                };
                let reply = json!({"jsonrpc": "2.0", "id": req["id"], "result": result});
                ws.send(Message::Text(reply.to_string().into())).await.unwrap();
            }
        });

        let client = PubsubClient::new(format!("ws://{addr}"), Duration::from_millis(100), 8);
        let err = client
            .account_subscribe(json!([OWNER, {"encoding": "base64"}]))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Timeout(_)), "got {err:?}");

        let first = seen_rx.recv().await.unwrap();
        assert_eq!(first["method"], "accountSubscribe");
        let cleanup = tokio::time::timeout(Duration::from_secs(5), seen_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cleanup["method"], "accountUnsubscribe");
        assert_eq!(cleanup["params"], json!([7]));
    }

    #[test]
    fn abandoned_subscribe_is_not_routed() {
        let mut pending = HashMap::new();
        let mut routes = HashMap::new();
        let (response_tx, response_rx) = oneshot::channel();
        drop(response_rx);
        let (tx, _rx) = mpsc::channel(1);
        pending.insert(
            3,
            Pending {
                response_tx,
                route: Some(Route::Account(tx)),
            },
        );

        let reply = json!({"jsonrpc": "2.0", "id": 3, "result": 55});
        let orphan = complete_request(&mut pending, &mut routes, 3, reply);
        assert_eq!(orphan, Some(("accountUnsubscribe", SubscriptionId(55))));
        assert!(routes.is_empty());
        assert!(pending.is_empty());
    }

    #[test]
    fn answered_subscribe_is_routed() {
        let mut pending = HashMap::new();
        let mut routes = HashMap::new();
        let (response_tx, mut response_rx) = oneshot::channel();
        let (tx, _rx) = mpsc::channel(1);
        pending.insert(
            4,
            Pending {
                response_tx,
                route: Some(Route::Slot(tx)),
            },
        );

        let reply = json!({"jsonrpc": "2.0", "id": 4, "result": 56});
        assert!(complete_request(&mut pending, &mut routes, 4, reply).is_none());
        assert!(routes.contains_key(&SubscriptionId(56)));
        assert_eq!(response_rx.try_recv().unwrap().unwrap(), json!(56));
    }

    #[tokio::test]
    async fn socket_is_shared_between_subscriptions() {
        let url = spawn_fake_endpoint(account_value()).await;
        let client = PubsubClient::new(url, Duration::from_secs(5), 8);

        let (slot_id, _slots) = client.slot_subscribe().await.unwrap();
        let (acct_id, _accounts) = client
            .account_subscribe(json!([OWNER, {"encoding": "base64"}]))
            .await
            .unwrap();
        // The fake endpoint accepts exactly one socket, so both succeeding
        // proves they went over the same one.
        assert_ne!(slot_id, acct_id);

        client.account_unsubscribe(acct_id).await.unwrap();
        client.slot_unsubscribe(slot_id).await.unwrap();
    }

    #[tokio::test]
    async fn unsubscribe_without_socket_is_noop() {
        let client = PubsubClient::new("ws://127.0.0.1:9", Duration::from_millis(200), 8);
        client.account_unsubscribe(SubscriptionId(5)).await.unwrap();
        assert!(!client.is_connected().await);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = PubsubClient::new(format!("ws://{addr}"), Duration::from_secs(2), 8);
        let err = client.slot_subscribe().await.unwrap_err();
        assert!(matches!(err, RpcError::Network(_)), "got {err:?}");
    }
}
