use hublink_protocol::TransactionId;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::oneshot;

/// Outcome delivered to a waiting request: the reply payload, or the message
/// of a `HUB:ERROR` frame.
pub type Completion = Result<Option<Value>, String>;

/// One outstanding request.
#[derive(Debug)]
pub struct PendingRequest {
    key: String,
    reply: oneshot::Sender<Completion>,
}

impl PendingRequest {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn resolve(self, payload: Option<Value>) {
        // The caller may have stopped waiting; nothing to do then.
        let _ = self.reply.send(Ok(payload));
    }

    pub fn reject(self, message: String) {
        let _ = self.reply.send(Err(message));
    }
}

/// Transaction id -> one-shot reply handler.
///
/// Every entry fires at most once: taking it out of the table and completing
/// it are the same step, so a second frame for the same id finds nothing.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    pending: HashMap<TransactionId, PendingRequest>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        transaction_id: TransactionId,
        key: &str,
    ) -> oneshot::Receiver<Completion> {
        let (reply, rx) = oneshot::channel();
        self.pending.insert(
            transaction_id,
            PendingRequest {
                key: key.to_string(),
                reply,
            },
        );
        rx
    }

    /// Remove the entry for `transaction_id` so the caller can complete it
    /// outside any lock.
    pub fn take(&mut self, transaction_id: &TransactionId) -> Option<PendingRequest> {
        self.pending.remove(transaction_id)
    }

    pub fn resolve(&mut self, transaction_id: &TransactionId, payload: Option<Value>) -> bool {
        match self.take(transaction_id) {
            Some(pending) => {
                pending.resolve(payload);
                true
            }
            None => false,
        }
    }

    pub fn reject(&mut self, transaction_id: &TransactionId, message: String) -> bool {
        match self.take(transaction_id) {
            Some(pending) => {
                pending.reject(message);
                true
            }
            None => false,
        }
    }

    /// Forget an entry without completing it; its waiter sees a closed channel.
    pub fn cancel(&mut self, transaction_id: &TransactionId) -> bool {
        self.take(transaction_id).is_some()
    }

    /// Drop every entry. Returns how many were outstanding.
    pub fn clear(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }

    pub fn contains(&self, transaction_id: &TransactionId) -> bool {
        self.pending.contains_key(transaction_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
