use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::{Connector, LinkEnds, TransportCommand, TransportEvent, TransportLink};

/// WebSocket transport. Each [`Connector::open`] spawns one task that owns
/// the socket for its whole life.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WsConnector {
    fn open(&self, endpoint: &str) -> TransportLink {
        let (link, ends) = super::channel();
        tokio::spawn(run(endpoint.to_string(), ends));
        link
    }
}

async fn run(endpoint: String, ends: LinkEnds) {
    let LinkEnds {
        mut commands,
        events,
    } = ends;

    // Commands queue up in the channel until the handshake completes.
    let stream = match connect_async(endpoint.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(err) => {
            warn!(endpoint = %endpoint, error = %err, "websocket connect failed");
            let _ = events.send(TransportEvent::Closed {
                reason: Some(err.to_string()),
            });
            return;
        }
    };
    info!(endpoint = %endpoint, "websocket open");
    let _ = events.send(TransportEvent::Open);

    let (mut sink, mut source) = stream.split();

    let reason = loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(TransportCommand::Send(text)) => {
                    if let Err(err) = sink.send(Message::text(text)).await {
                        warn!(endpoint = %endpoint, error = %err, "websocket write failed");
                        break Some(err.to_string());
                    }
                }
                Some(TransportCommand::Close) | None => {
                    debug!(endpoint = %endpoint, "closing websocket");
                    let _ = sink.send(Message::Close(None)).await;
                    break None;
                }
            },
            message = source.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(TransportEvent::Frame(text.as_str().to_owned()));
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => {
                        let _ = events.send(TransportEvent::Frame(text));
                    }
                    Err(_) => warn!(endpoint = %endpoint, len = bytes.len(), "dropping non-utf8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    break frame.map(|f| f.reason.as_str().to_owned()).filter(|r| !r.is_empty());
                }
                // Ping/pong are answered by tungstenite itself.
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(endpoint = %endpoint, error = %err, "websocket read failed");
                    break Some(err.to_string());
                }
                None => break None,
            },
        }
    };

    info!(endpoint = %endpoint, reason = ?reason, "websocket closed");
    let _ = events.send(TransportEvent::Closed { reason });
}
