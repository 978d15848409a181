use anyhow::{Context, Result, bail};
use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use hublink_protocol::{ERROR_KEY, Envelope, TransactionId, UNSUBSCRIBE_SUFFIX};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};

/// Keys the mock hub answers on its own. Every other key is recorded and
/// left for the test to answer through [`MockHub::push`].
pub mod keys {
    /// Replies with the request payload.
    pub const ECHO: &str = "ECHO";
    /// Replies with `HUB:ERROR` and the message `"boom"`.
    pub const FAIL: &str = "FAIL";
    /// Closes the socket.
    pub const CLOSE: &str = "CLOSE";
    /// Subscription pushing `{"seq": n}` for `n` in `0..args.count`.
    pub const TICKER: &str = "TICKER";
}

#[derive(Debug, Clone)]
pub struct HubOptions {
    /// Send the welcome frame as soon as a client connects.
    pub welcome: bool,
    pub welcome_key: String,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            welcome: true,
            welcome_key: hublink_protocol::DEFAULT_WELCOME_KEY.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
enum HubPush {
    Frame(String),
    Disconnect,
}

struct HubState {
    options: HubOptions,
    received: Mutex<Vec<Envelope>>,
    connections: AtomicUsize,
    live: AtomicUsize,
    push: broadcast::Sender<HubPush>,
}

/// A WebSocket hub on a random local port.
pub struct MockHub {
    pub addr: SocketAddr,
    state: Arc<HubState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockHub {
    pub async fn spawn() -> Result<Self> {
        Self::spawn_with(HubOptions::default()).await
    }

    pub async fn spawn_with(options: HubOptions) -> Result<Self> {
        let (push, _) = broadcast::channel(256);
        let state = Arc::new(HubState {
            options,
            received: Mutex::new(Vec::new()),
            connections: AtomicUsize::new(0),
            live: AtomicUsize::new(0),
            push,
        });

        let app = Router::new()
            .route("/ws", get(ws_upgrade))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind mock hub")?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(err) = server.await {
                tracing::warn!("mock hub stopped with error: {err}");
            }
        });

        tracing::debug!(%addr, "mock hub listening");
        Ok(Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    /// WebSocket URL clients should connect to.
    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Every envelope received so far, across all connections.
    pub fn received(&self) -> Vec<Envelope> {
        self.state
            .received
            .lock()
            .map(|frames| frames.clone())
            .unwrap_or_default()
    }

    pub fn received_with_key(&self, key: &str) -> Vec<Envelope> {
        self.received()
            .into_iter()
            .filter(|envelope| envelope.key == key)
            .collect()
    }

    /// Wait until a frame with `key` has arrived and return the first one.
    pub async fn wait_for_frame(&self, key: &str, timeout: Duration) -> Result<Envelope> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(envelope) = self.received_with_key(key).into_iter().next() {
                return Ok(envelope);
            }
            if tokio::time::Instant::now() >= deadline {
                bail!("no {key} frame within {timeout:?}");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Connections accepted since the hub started.
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Connections currently open.
    pub fn live_connections(&self) -> usize {
        self.state.live.load(Ordering::SeqCst)
    }

    /// Wait until exactly `count` connections are open.
    pub async fn wait_for_live(&self, count: usize, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.live_connections() != count {
            if tokio::time::Instant::now() >= deadline {
                bail!(
                    "expected {count} live connections, have {}",
                    self.live_connections()
                );
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(())
    }

    /// Send an envelope to every connected client.
    pub fn push(&self, key: &str, transaction_id: &TransactionId, payload: Value) {
        let frame = json!({
            "key": key,
            "payload": payload,
            "transaction_id": transaction_id,
        });
        self.push_raw(frame.to_string());
    }

    /// Send arbitrary text to every connected client.
    pub fn push_raw(&self, text: impl Into<String>) {
        let _ = self.state.push.send(HubPush::Frame(text.into()));
    }

    /// Close every open socket from the hub side.
    pub fn disconnect_all(&self) {
        let _ = self.state.push.send(HubPush::Disconnect);
    }
}

impl Drop for MockHub {
    fn drop(&mut self) {
        self.disconnect_all();
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<HubState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_session_task(socket, state))
}

async fn ws_session_task(socket: WebSocket, state: Arc<HubState>) {
    state.connections.fetch_add(1, Ordering::SeqCst);
    state.live.fetch_add(1, Ordering::SeqCst);
    if let Err(err) = ws_session_inner(socket, &state).await {
        tracing::debug!("mock hub connection ended with error: {err}");
    }
    state.live.fetch_sub(1, Ordering::SeqCst);
}

async fn ws_session_inner(socket: WebSocket, state: &HubState) -> Result<()> {
    let mut pushes = state.push.subscribe();
    let (mut ws_tx, mut ws_rx) = socket.split();

    if state.options.welcome {
        let welcome = json!({ "key": state.options.welcome_key });
        ws_tx.send(Message::Text(welcome.to_string().into())).await?;
    }

    loop {
        // Pushes queued by the test go out before replies to later requests.
        tokio::select! {
            biased;
            push = pushes.recv() => match push {
                Ok(HubPush::Frame(text)) => ws_tx.send(Message::Text(text.into())).await?,
                Ok(HubPush::Disconnect) | Err(broadcast::error::RecvError::Closed) => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
            },
            message = ws_rx.next() => {
                let Some(message) = message else {
                    break;
                };
                match message? {
                    Message::Text(text) => {
                        let Some(replies) = handle_frame(state, text.as_str()) else {
                            let _ = ws_tx.send(Message::Close(None)).await;
                            break;
                        };
                        for reply in replies {
                            ws_tx.send(Message::Text(reply.to_string().into())).await?;
                        }
                    }
                    Message::Close(_) => break,
                    Message::Ping(v) => ws_tx.send(Message::Pong(v)).await?,
                    Message::Pong(_) | Message::Binary(_) => {}
                }
            }
        }
    }
    Ok(())
}

/// Record one inbound frame and build the hub's replies. `None` closes the
/// socket.
fn handle_frame(state: &HubState, text: &str) -> Option<Vec<Value>> {
    let Ok(envelope) = serde_json::from_str::<Envelope>(text) else {
        tracing::warn!(frame = text, "mock hub received malformed frame");
        return Some(Vec::new());
    };
    if let Ok(mut received) = state.received.lock() {
        received.push(envelope.clone());
    }

    let Envelope {
        key,
        payload,
        transaction_id,
    } = envelope;
    if key.ends_with(UNSUBSCRIBE_SUFFIX) {
        return Some(Vec::new());
    }

    let replies = match key.as_str() {
        keys::ECHO => vec![json!({
            "key": key,
            "payload": payload,
            "transaction_id": transaction_id,
        })],
        keys::FAIL => vec![json!({
            "key": ERROR_KEY,
            "transaction_id": transaction_id,
            "message": "boom",
        })],
        keys::CLOSE => return None,
        keys::TICKER => {
            let count = payload
                .as_ref()
                .and_then(|args| args.get("count"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            (0..count)
                .map(|seq| {
                    json!({
                        "key": key,
                        "payload": { "seq": seq },
                        "transaction_id": transaction_id,
                    })
                })
                .collect()
        }
        _ => Vec::new(),
    };
    Some(replies)
}
