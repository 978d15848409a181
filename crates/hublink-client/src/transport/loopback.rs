use hublink_protocol::Envelope;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};

use super::{Connector, LinkEnds, TransportCommand, TransportEvent, TransportLink};

/// In-memory transport. Every [`Connector::open`] hands the far end of the
/// link to [`LoopbackConnector::accept`], where the caller plays the hub.
pub struct LoopbackConnector {
    incoming_tx: mpsc::UnboundedSender<LoopbackPeer>,
    incoming_rx: Mutex<mpsc::UnboundedReceiver<LoopbackPeer>>,
}

impl LoopbackConnector {
    pub fn new() -> Self {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        Self {
            incoming_tx,
            incoming_rx: Mutex::new(incoming_rx),
        }
    }

    /// Wait for the next transport the session constructs.
    pub async fn accept(&self) -> Option<LoopbackPeer> {
        self.incoming_rx.lock().await.recv().await
    }

    /// Take an already-constructed transport, if any.
    pub fn try_accept(&self) -> Option<LoopbackPeer> {
        self.incoming_rx.try_lock().ok()?.try_recv().ok()
    }
}

impl Default for LoopbackConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for LoopbackConnector {
    fn open(&self, endpoint: &str) -> TransportLink {
        let (link, ends) = super::channel();
        let peer = LoopbackPeer {
            endpoint: endpoint.to_string(),
            ends,
        };
        // The receiver lives as long as the connector.
        let _ = self.incoming_tx.send(peer);
        link
    }
}

/// The hub side of a loopback transport.
#[derive(Debug)]
pub struct LoopbackPeer {
    endpoint: String,
    ends: LinkEnds,
}

impl LoopbackPeer {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Report the transport as open.
    pub fn open(&self) {
        let _ = self.ends.events.send(TransportEvent::Open);
    }

    /// Deliver a raw text frame to the session.
    pub fn push(&self, frame: impl Into<String>) {
        let _ = self.ends.events.send(TransportEvent::Frame(frame.into()));
    }

    pub fn push_json(&self, frame: &Value) {
        self.push(frame.to_string());
    }

    /// Report the transport as closed.
    pub fn close(&self, reason: Option<&str>) {
        let _ = self.ends.events.send(TransportEvent::Closed {
            reason: reason.map(str::to_string),
        });
    }

    /// Next instruction the session gave this transport.
    pub async fn next_command(&mut self) -> Option<TransportCommand> {
        self.ends.commands.recv().await
    }

    pub fn try_next_command(&mut self) -> Option<TransportCommand> {
        self.ends.commands.try_recv().ok()
    }

    /// Next outbound frame. A `Close` command yields `None`.
    pub async fn next_frame(&mut self) -> Option<String> {
        match self.next_command().await? {
            TransportCommand::Send(text) => Some(text),
            TransportCommand::Close => None,
        }
    }

    /// Next outbound frame parsed as an envelope.
    pub async fn next_envelope(&mut self) -> Option<Envelope> {
        let text = self.next_frame().await?;
        serde_json::from_str(&text).ok()
    }
}
