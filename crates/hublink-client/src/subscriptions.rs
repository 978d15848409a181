use futures_util::Stream;
use hublink_protocol::TransactionId;
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use crate::session::SessionInner;

/// Callback invoked with the payload of every push frame for a subscription.
pub type UpdateCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Identifies one callback within a subscription entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

/// What happened when a callback was removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removal {
    /// No such id or callback (already removed).
    NotFound,
    /// Callbacks remain for this id.
    Remaining(usize),
    /// The last callback went away and the entry was dropped.
    Emptied { key: String },
}

struct SubscriptionEntry {
    key: String,
    callbacks: Vec<(CallbackId, UpdateCallback)>,
}

/// Transaction id -> ordered callbacks for push frames.
#[derive(Default)]
pub struct SubscriptionTable {
    entries: HashMap<TransactionId, SubscriptionEntry>,
    next_callback: u64,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `callback` to the list for `transaction_id`, creating the entry
    /// if needed.
    pub fn add(
        &mut self,
        transaction_id: &TransactionId,
        key: &str,
        callback: UpdateCallback,
    ) -> CallbackId {
        self.next_callback += 1;
        let id = CallbackId(self.next_callback);
        self.entries
            .entry(transaction_id.clone())
            .or_insert_with(|| SubscriptionEntry {
                key: key.to_string(),
                callbacks: Vec::new(),
            })
            .callbacks
            .push((id, callback));
        id
    }

    /// Append to an existing entry only.
    pub fn attach(
        &mut self,
        transaction_id: &TransactionId,
        callback: UpdateCallback,
    ) -> Option<CallbackId> {
        let key = self.entries.get(transaction_id)?.key.clone();
        Some(self.add(transaction_id, &key, callback))
    }

    pub fn remove(&mut self, transaction_id: &TransactionId, callback: CallbackId) -> Removal {
        let Some(entry) = self.entries.get_mut(transaction_id) else {
            return Removal::NotFound;
        };
        let before = entry.callbacks.len();
        entry.callbacks.retain(|(id, _)| *id != callback);
        if entry.callbacks.len() == before {
            return Removal::NotFound;
        }
        if entry.callbacks.is_empty() {
            let key = self
                .entries
                .remove(transaction_id)
                .map(|entry| entry.key)
                .unwrap_or_default();
            return Removal::Emptied { key };
        }
        Removal::Remaining(entry.callbacks.len())
    }

    /// The callbacks registered for `transaction_id` right now, in
    /// registration order. Dispatch iterates this copy, so callbacks added or
    /// removed while it runs do not change who receives the current frame.
    pub fn snapshot(&self, transaction_id: &TransactionId) -> Option<Vec<UpdateCallback>> {
        self.entries.get(transaction_id).map(|entry| {
            entry
                .callbacks
                .iter()
                .map(|(_, callback)| Arc::clone(callback))
                .collect()
        })
    }

    pub fn contains(&self, transaction_id: &TransactionId) -> bool {
        self.entries.contains_key(transaction_id)
    }

    /// Number of live subscription ids.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Handle to one callback of a live subscription.
///
/// Dropping the handle leaves the callback registered; call
/// [`Subscription::unsubscribe`] to remove it. Unsubscribing is idempotent
/// and safe from inside any callback.
#[must_use = "dropping a Subscription keeps the callback registered; call unsubscribe() to stop updates"]
pub struct Subscription {
    session: Weak<SessionInner>,
    key: String,
    transaction_id: TransactionId,
    callback: CallbackId,
    released: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(
        session: Weak<SessionInner>,
        key: &str,
        transaction_id: TransactionId,
        callback: CallbackId,
    ) -> Self {
        Self {
            session,
            key: key.to_string(),
            transaction_id,
            callback,
            released: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn transaction_id(&self) -> &TransactionId {
        &self.transaction_id
    }

    pub fn is_active(&self) -> bool {
        !self.released.load(Ordering::Acquire)
    }

    /// Register another callback under the same transaction id. No frame is
    /// sent; the new callback receives every later push for this id, after the
    /// callbacks registered before it. Returns `None` once the subscription
    /// entry is gone.
    pub fn attach<F>(&self, on_update: F) -> Option<Subscription>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let session = self.session.upgrade()?;
        let callback = session.attach_callback(&self.transaction_id, Arc::new(on_update))?;
        Some(Subscription::new(
            self.session.clone(),
            &self.key,
            self.transaction_id.clone(),
            callback,
        ))
    }

    /// Remove this callback. When it was the last one for the transaction id,
    /// the hub is told to stop pushing (`<KEY>:UNSUBSCRIBE`).
    pub fn unsubscribe(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(session) = self.session.upgrade() {
            session.release_callback(&self.transaction_id, self.callback);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("transaction_id", &self.transaction_id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Push updates as a [`Stream`]. Unsubscribes when dropped.
#[derive(Debug)]
pub struct UpdateStream {
    subscription: Subscription,
    updates: mpsc::UnboundedReceiver<Value>,
}

impl UpdateStream {
    pub(crate) fn new(subscription: Subscription, updates: mpsc::UnboundedReceiver<Value>) -> Self {
        Self {
            subscription,
            updates,
        }
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }
}

impl Stream for UpdateStream {
    type Item = Value;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Value>> {
        self.get_mut().updates.poll_recv(cx)
    }
}

impl Drop for UpdateStream {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
    }
}
