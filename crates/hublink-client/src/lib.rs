//! Client core for the hub socket protocol.
//!
//! One persistent connection carries many one-shot requests ([`Session::send`])
//! and many push subscriptions ([`Session::subscribe`]). Replies are routed
//! back by transaction id through the [`CorrelationTable`] and the
//! [`SubscriptionTable`]; the connection state is published through a
//! `tokio::sync::watch` channel so consumers can react to drops.

pub mod config;
pub mod correlation;
pub mod error;
pub mod pool;
pub mod session;
pub mod state;
pub mod subscriptions;
pub mod transport;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use config::{ClientConfig, ConfigError};
pub use correlation::CorrelationTable;
pub use error::{SessionError, SessionResult};
pub use pool::{PooledSession, SessionPool};
pub use session::Session;
pub use state::ConnectionState;
pub use subscriptions::{Subscription, SubscriptionTable, UpdateStream};
pub use transport::{Connector, TransportCommand, TransportEvent, TransportLink};
pub use transport::loopback::{LoopbackConnector, LoopbackPeer};
pub use transport::ws::WsConnector;

pub use hublink_protocol::{Command, Envelope, TransactionId, Topic};

/// Tables are only touched for a handful of instructions at a time and never
/// across user callbacks, so a poisoned lock still holds consistent data.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
