use hublink_protocol::{Codec, Command, Envelope, Inbound, TransactionId, Topic};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::correlation::{Completion, CorrelationTable};
use crate::error::{SessionError, SessionResult};
use crate::lock;
use crate::state::ConnectionState;
use crate::subscriptions::{
    CallbackId, Removal, Subscription, SubscriptionTable, UpdateCallback, UpdateStream,
};
use crate::transport::ws::WsConnector;
use crate::transport::{Connector, TransportCommand, TransportEvent, TransportLink};

/// The `send` / `subscribe` / `connect` / `state` surface over one hub
/// connection.
///
/// Cloning is cheap; every clone drives the same connection and tables.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

pub(crate) struct SessionInner {
    endpoint: String,
    config: ClientConfig,
    codec: Codec,
    connector: Arc<dyn Connector>,
    state: watch::Sender<ConnectionState>,
    welcome: watch::Sender<bool>,
    link: Mutex<Option<ActiveLink>>,
    generation: AtomicU64,
    connected_before: AtomicBool,
    pending: Mutex<CorrelationTable>,
    subscriptions: Mutex<SubscriptionTable>,
}

struct ActiveLink {
    generation: u64,
    commands: mpsc::UnboundedSender<TransportCommand>,
}

impl Session {
    /// Create an idle session. Nothing is opened until [`Session::connect`].
    pub fn new(
        endpoint: impl Into<String>,
        config: ClientConfig,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Closed);
        let (welcome, _) = watch::channel(false);
        let codec = config.codec();
        Self {
            inner: Arc::new(SessionInner {
                endpoint: endpoint.into(),
                config,
                codec,
                connector,
                state,
                welcome,
                link: Mutex::new(None),
                generation: AtomicU64::new(0),
                connected_before: AtomicBool::new(false),
                pending: Mutex::new(CorrelationTable::new()),
                subscriptions: Mutex::new(SubscriptionTable::new()),
            }),
        }
    }

    /// Idle session over the WebSocket transport, pointed at `config.endpoint`.
    pub fn websocket(config: ClientConfig) -> Self {
        let endpoint = config.endpoint.clone();
        Self::new(endpoint, config, Arc::new(WsConnector::new()))
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Construct a transport if none is live.
    ///
    /// Returns once the transport exists, not once it is open: watch
    /// [`Session::state`] or await [`Session::wait_open`] /
    /// [`Session::wait_ready`] before relying on it. A reconnect (any call
    /// after the first transport was built) first waits the configured
    /// reconnect delay.
    pub async fn connect(&self) {
        if self.inner.link_is_live() {
            return;
        }
        if self.inner.connected_before.load(Ordering::Acquire) {
            let delay = self.inner.config.reconnect_delay();
            debug!(endpoint = %self.inner.endpoint, delay_ms = delay.as_millis() as u64, "waiting before reconnect");
            tokio::time::sleep(delay).await;
            if self.inner.link_is_live() {
                return;
            }
        }
        self.inner.open_link();
    }

    /// Ask the transport to close. The state moves to `Closing`, then to
    /// `Closed` when the transport confirms.
    pub fn close(&self) {
        self.inner.close_link();
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Whether the welcome frame has been seen on the current connection.
    pub fn is_ready(&self) -> bool {
        *self.inner.welcome.borrow()
    }

    /// Wait for the transport to open. Fails if it closes first.
    pub async fn wait_open(&self) -> SessionResult<()> {
        let mut state = self.inner.state.subscribe();
        loop {
            match *state.borrow_and_update() {
                ConnectionState::Open => return Ok(()),
                ConnectionState::Closed => return Err(SessionError::Closed),
                ConnectionState::Connecting | ConnectionState::Closing => {}
            }
            state.changed().await.map_err(|_| SessionError::Closed)?;
        }
    }

    /// Wait for the hub's welcome frame on the current connection. Fails if
    /// the connection closes first.
    pub async fn wait_ready(&self) -> SessionResult<()> {
        let mut welcome = self.inner.welcome.subscribe();
        let mut state = self.inner.state.subscribe();
        loop {
            if *welcome.borrow_and_update() {
                return Ok(());
            }
            if *state.borrow_and_update() == ConnectionState::Closed {
                return Err(SessionError::Closed);
            }
            tokio::select! {
                changed = welcome.changed() => changed.map_err(|_| SessionError::Closed)?,
                changed = state.changed() => changed.map_err(|_| SessionError::Closed)?,
            }
        }
    }

    /// Requests still waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        lock(&self.inner.pending).len()
    }

    /// Live subscription ids.
    pub fn active_subscriptions(&self) -> usize {
        lock(&self.inner.subscriptions).len()
    }

    // -----------------------------------------------------------------------
    // Requests
    // -----------------------------------------------------------------------

    /// One-shot request. Resolves with the reply payload (`Null` when the
    /// reply has none) or fails with [`SessionError::Remote`] on `HUB:ERROR`.
    ///
    /// Fails immediately when there is no usable transport. Without a
    /// configured timeout, a request the hub never answers waits until the
    /// connection is discarded.
    pub async fn send(&self, key: &str, payload: Option<Value>) -> SessionResult<Value> {
        let timeout = self.inner.config.request_timeout();
        self.send_inner(key, payload, timeout).await
    }

    /// [`Session::send`] with an explicit timeout, overriding the config.
    pub async fn send_with_timeout(
        &self,
        key: &str,
        payload: Option<Value>,
        timeout: Duration,
    ) -> SessionResult<Value> {
        self.send_inner(key, payload, Some(timeout)).await
    }

    /// Typed request: serialize `request`, deserialize the reply.
    pub async fn send_as<Req, Res>(&self, key: &str, request: &Req) -> SessionResult<Res>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let payload = serde_json::to_value(request).map_err(|source| SessionError::Encode {
            key: key.to_string(),
            source,
        })?;
        let reply = self.send(key, Some(payload)).await?;
        serde_json::from_value(reply).map_err(|source| SessionError::Decode {
            key: key.to_string(),
            source,
        })
    }

    /// Request for a [`Command`] with a fixed key and payload shapes.
    pub async fn request<C: Command>(&self, request: &C::Request) -> SessionResult<C::Response> {
        self.send_as(C::KEY, request).await
    }

    async fn send_inner(
        &self,
        key: &str,
        payload: Option<Value>,
        timeout: Option<Duration>,
    ) -> SessionResult<Value> {
        let transaction_id = TransactionId::generate();
        let text = self
            .inner
            .codec
            .encode(key, payload.as_ref(), &transaction_id)?;

        // Register before writing so a fast reply always finds its entry.
        let reply = lock(&self.inner.pending).register(transaction_id.clone(), key);
        if let Err(err) = self.inner.transmit(text) {
            lock(&self.inner.pending).cancel(&transaction_id);
            return Err(err);
        }
        debug!(key, %transaction_id, "request sent");

        self.await_reply(key, transaction_id, reply, timeout).await
    }

    async fn await_reply(
        &self,
        key: &str,
        transaction_id: TransactionId,
        reply: oneshot::Receiver<Completion>,
        timeout: Option<Duration>,
    ) -> SessionResult<Value> {
        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, reply).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    lock(&self.inner.pending).cancel(&transaction_id);
                    return Err(SessionError::Timeout {
                        key: key.to_string(),
                        transaction_id,
                        timeout_ms: limit.as_millis() as u64,
                    });
                }
            },
            None => reply.await,
        };

        match outcome {
            Ok(Ok(payload)) => Ok(payload.unwrap_or(Value::Null)),
            Ok(Err(message)) => Err(SessionError::Remote(message)),
            Err(_) => Err(SessionError::Disconnected {
                key: key.to_string(),
                transaction_id,
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    /// Push subscription under a fresh transaction id. `args` travels as the
    /// subscribe frame's payload; `on_update` runs for every push frame with
    /// that id, on the connection's dispatch task.
    pub fn subscribe<F>(
        &self,
        key: &str,
        args: Option<Value>,
        on_update: F,
    ) -> SessionResult<Subscription>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.subscribe_callback(key, args, Arc::new(on_update))
    }

    /// Typed subscription: updates that fail to deserialize are logged and
    /// skipped.
    pub fn subscribe_as<A, T, F>(&self, key: &str, args: &A, on_update: F) -> SessionResult<Subscription>
    where
        A: Serialize + ?Sized,
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        let args = serde_json::to_value(args).map_err(|source| SessionError::Encode {
            key: key.to_string(),
            source,
        })?;
        let topic = key.to_string();
        self.subscribe(key, Some(args), move |payload| {
            match serde_json::from_value::<T>(payload.clone()) {
                Ok(update) => on_update(update),
                Err(err) => warn!(key = %topic, error = %err, "dropping undecodable update"),
            }
        })
    }

    /// Subscription for a [`Topic`] with a fixed key and payload shapes.
    pub fn subscribe_topic<T, F>(&self, args: &T::Args, on_update: F) -> SessionResult<Subscription>
    where
        T: Topic,
        T::Update: 'static,
        F: Fn(T::Update) + Send + Sync + 'static,
    {
        self.subscribe_as::<T::Args, T::Update, F>(T::KEY, args, on_update)
    }

    /// Subscription whose updates arrive through a stream. Dropping the
    /// stream unsubscribes.
    pub fn subscribe_stream(&self, key: &str, args: Option<Value>) -> SessionResult<UpdateStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(key, args, move |payload| {
            let _ = tx.send(payload.clone());
        })?;
        Ok(UpdateStream::new(subscription, rx))
    }

    fn subscribe_callback(
        &self,
        key: &str,
        args: Option<Value>,
        callback: UpdateCallback,
    ) -> SessionResult<Subscription> {
        let transaction_id = TransactionId::generate();
        let text = self
            .inner
            .codec
            .encode(key, args.as_ref(), &transaction_id)?;

        let callback_id = lock(&self.inner.subscriptions).add(&transaction_id, key, callback);
        if let Err(err) = self.inner.transmit(text) {
            lock(&self.inner.subscriptions).remove(&transaction_id, callback_id);
            return Err(err);
        }
        debug!(key, %transaction_id, "subscribed");

        Ok(Subscription::new(
            Arc::downgrade(&self.inner),
            key,
            transaction_id,
            callback_id,
        ))
    }

    // -----------------------------------------------------------------------
    // Pool support
    // -----------------------------------------------------------------------

    /// Build a transport right away, without the reconnect delay.
    pub(crate) fn open_now(&self) {
        self.inner.open_link();
    }

    /// Close and discard the transport. Outstanding requests fail with
    /// [`SessionError::Disconnected`].
    pub(crate) fn teardown(&self) {
        let Some(active) = lock(&self.inner.link).take() else {
            return;
        };
        let _ = active.commands.send(TransportCommand::Close);
        // Events still in flight from the discarded transport are ignored.
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        self.inner.welcome.send_replace(false);
        self.inner.state.send_replace(ConnectionState::Closed);
        self.inner.discard_pending();
        debug!(endpoint = %self.inner.endpoint, "session torn down");
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.inner.endpoint)
            .field("state", &self.state())
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl SessionInner {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    fn link_is_live(&self) -> bool {
        lock(&self.link).is_some() && self.state.borrow().accepts_frames()
    }

    fn open_link(self: &Arc<Self>) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.connected_before.store(true, Ordering::Release);

        let TransportLink { commands, events } = self.connector.open(&self.endpoint);
        let previous = lock(&self.link).replace(ActiveLink {
            generation,
            commands,
        });
        if let Some(previous) = previous {
            let _ = previous.commands.send(TransportCommand::Close);
            self.discard_pending();
        }

        self.welcome.send_replace(false);
        self.state.send_replace(ConnectionState::Connecting);
        info!(endpoint = %self.endpoint, generation, "connecting");

        tokio::spawn(drive(Arc::downgrade(self), generation, events));
    }

    fn close_link(&self) {
        let link = lock(&self.link);
        let Some(active) = link.as_ref() else {
            return;
        };
        if !self.state.borrow().accepts_frames() {
            return;
        }
        self.state.send_replace(ConnectionState::Closing);
        if active.commands.send(TransportCommand::Close).is_err() {
            // Transport task is already gone; nothing will confirm the close.
            self.mark_closed(active.generation, Some("transport gone"));
        }
    }

    fn mark_closed(&self, generation: u64, reason: Option<&str>) {
        if !self.is_current(generation) {
            return;
        }
        self.welcome.send_replace(false);
        let previous = self.state.send_replace(ConnectionState::Closed);
        if previous != ConnectionState::Closed {
            info!(endpoint = %self.endpoint, reason = ?reason, "connection closed");
        }
    }

    fn discard_pending(&self) {
        let dropped = lock(&self.pending).clear();
        if dropped > 0 {
            debug!(endpoint = %self.endpoint, dropped, "discarded pending requests");
        }
    }

    /// Hand a frame to the transport, or fail without side effects.
    fn transmit(&self, text: String) -> SessionResult<()> {
        let link = lock(&self.link);
        let Some(active) = link.as_ref() else {
            return Err(SessionError::NoConnection);
        };
        let state = *self.state.borrow();
        if !state.accepts_frames() {
            return Err(SessionError::NotConnected(state));
        }
        active
            .commands
            .send(TransportCommand::Send(text))
            .map_err(|_| SessionError::NotConnected(ConnectionState::Closed))
    }

    fn dispatch(&self, text: &str) {
        if let Some(limit) = self.config.max_frame_bytes {
            if text.len() > limit {
                warn!(endpoint = %self.endpoint, len = text.len(), limit, "dropping oversized frame");
                return;
            }
        }
        let inbound = match self.codec.decode(text) {
            Ok(inbound) => inbound,
            Err(err) => {
                warn!(endpoint = %self.endpoint, error = %err, "dropping malformed frame");
                return;
            }
        };

        match inbound {
            Inbound::Welcome { .. } => {
                debug!(endpoint = %self.endpoint, "welcome received");
                self.welcome.send_replace(true);
            }
            Inbound::Error {
                transaction_id,
                message,
            } => {
                let pending = lock(&self.pending).take(&transaction_id);
                match pending {
                    Some(pending) => {
                        debug!(key = pending.key(), %transaction_id, "request rejected");
                        pending.reject(message);
                    }
                    None if lock(&self.subscriptions).contains(&transaction_id) => {
                        warn!(%transaction_id, message = %message, "hub error for subscription");
                    }
                    None => debug!(%transaction_id, "hub error for unknown transaction"),
                }
            }
            Inbound::Reply(Envelope {
                key,
                payload,
                transaction_id,
            }) => {
                let pending = lock(&self.pending).take(&transaction_id);
                if let Some(pending) = pending {
                    pending.resolve(payload);
                    return;
                }

                let callbacks = lock(&self.subscriptions).snapshot(&transaction_id);
                match callbacks {
                    Some(callbacks) => {
                        let payload = payload.unwrap_or(Value::Null);
                        for callback in callbacks {
                            callback(&payload);
                        }
                    }
                    None => debug!(key = %key, %transaction_id, "no handler for frame"),
                }
            }
            Inbound::Untagged { key, .. } => {
                debug!(key = %key, "ignoring frame without transaction id");
            }
        }
    }

    pub(crate) fn attach_callback(
        &self,
        transaction_id: &TransactionId,
        callback: UpdateCallback,
    ) -> Option<CallbackId> {
        lock(&self.subscriptions).attach(transaction_id, callback)
    }

    pub(crate) fn release_callback(&self, transaction_id: &TransactionId, callback: CallbackId) {
        let removal = lock(&self.subscriptions).remove(transaction_id, callback);
        let Removal::Emptied { key } = removal else {
            return;
        };
        let key = key.as_str();
        let text = match self.codec.encode_unsubscribe(key, transaction_id) {
            Ok(text) => text,
            Err(err) => {
                warn!(key, %transaction_id, error = %err, "failed to encode unsubscribe");
                return;
            }
        };
        match self.transmit(text) {
            Ok(()) => debug!(key, %transaction_id, "unsubscribed"),
            Err(err) => debug!(key, %transaction_id, error = %err, "unsubscribe not sent"),
        }
    }
}

/// Consume one transport's events in order until it closes or is replaced.
async fn drive(
    session: Weak<SessionInner>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = session.upgrade() else {
            return;
        };
        if !inner.is_current(generation) {
            return;
        }
        match event {
            TransportEvent::Open => {
                // Only a connecting session opens; a close requested meanwhile wins.
                let opened = inner.state.send_if_modified(|state| {
                    if *state == ConnectionState::Connecting {
                        *state = ConnectionState::Open;
                        true
                    } else {
                        false
                    }
                });
                if opened {
                    info!(endpoint = %inner.endpoint, generation, "connection open");
                } else {
                    debug!(endpoint = %inner.endpoint, generation, "transport opened after close");
                }
            }
            TransportEvent::Frame(text) => inner.dispatch(&text),
            TransportEvent::Closed { reason } => {
                inner.mark_closed(generation, reason.as_deref());
                return;
            }
        }
    }
    if let Some(inner) = session.upgrade() {
        inner.mark_closed(generation, Some("transport dropped"));
    }
}
