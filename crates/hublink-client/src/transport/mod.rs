//! The seam between the session and the wire.
//!
//! A [`Connector`] turns an endpoint into a [`TransportLink`]: a command
//! sender for outbound frames and an event receiver for open/frame/close
//! notifications. Construction is synchronous; the connection attempt itself
//! runs in the background and reports through [`TransportEvent`]s, which is
//! what lets the session sit in `Connecting` from the instant the link exists.

pub mod loopback;
pub mod ws;

use tokio::sync::mpsc;

/// Notifications from the transport, delivered in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Frame(String),
    Closed { reason: Option<String> },
}

/// Instructions to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCommand {
    Send(String),
    Close,
}

/// The session's end of a transport.
#[derive(Debug)]
pub struct TransportLink {
    pub commands: mpsc::UnboundedSender<TransportCommand>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Builds transports for an endpoint.
pub trait Connector: Send + Sync + 'static {
    /// Construct a transport for `endpoint` without waiting for it to open.
    /// Must be called from within a tokio runtime.
    fn open(&self, endpoint: &str) -> TransportLink;
}

/// The transport's end of a link.
#[derive(Debug)]
pub(crate) struct LinkEnds {
    pub commands: mpsc::UnboundedReceiver<TransportCommand>,
    pub events: mpsc::UnboundedSender<TransportEvent>,
}

pub(crate) fn channel() -> (TransportLink, LinkEnds) {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    (
        TransportLink {
            commands: commands_tx,
            events: events_rx,
        },
        LinkEnds {
            commands: commands_rx,
            events: events_tx,
        },
    )
}
