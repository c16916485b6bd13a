use std::collections::VecDeque;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, Notify, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("request queue is full ({0} pending)")]
    Full(usize),
    #[error("request was cancelled while waiting in queue")]
    Cancelled,
}

/// A ticket handed to a caller once its turn in the single-flight queue
/// arrives. Dropping it (or calling `cancel`) releases the upstream slot
/// for the next waiter.
pub struct QueueTicket {
    _permit: OwnedSemaphorePermit,
    pub cancellation: CancellationToken,
}

impl QueueTicket {
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Bounded, strictly single-flight FIFO queue in front of the upstream
/// collaborator: only one request is ever in flight to upstream at a
/// time, every other caller waits its turn, and the queue rejects new
/// admissions past `capacity` pending requests rather than growing
/// unbounded. Mirrors the gateway's per-session `CancellationToken` map —
/// one token per admitted request — but scoped to the whole process since
/// upstream itself (not any one session) is the single-flight resource.
pub struct SingleFlightQueue {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    pending: Mutex<VecDeque<CancellationToken>>,
    notify: Notify,
}

impl SingleFlightQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(1)),
            capacity,
            pending: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    /// Current number of requests admitted to the queue (waiting or
    /// holding the single upstream slot).
    pub async fn depth(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Join the queue. Resolves once this request holds the single
    /// upstream slot, or returns an error immediately if the queue is
    /// already at `capacity`.
    pub async fn acquire(&self) -> Result<QueueTicket, QueueError> {
        {
            let mut pending = self.pending.lock().await;
            if pending.len() >= self.capacity {
                return Err(QueueError::Full(pending.len()));
            }
            let token = CancellationToken::new();
            pending.push_back(token);
        }
        self.notify.notify_waiters();

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore is never closed");

        let token = {
            let mut pending = self.pending.lock().await;
            pending.pop_front().unwrap_or_else(CancellationToken::new)
        };

        debug!(depth = self.depth().await, "request admitted to upstream single-flight slot");
        Ok(QueueTicket { _permit: permit, cancellation: token })
    }

    /// Cancel every request currently queued or in flight — used by a
    /// `/stop` style admin action.
    pub async fn cancel_all(&self) {
        let pending = self.pending.lock().await;
        for token in pending.iter() {
            token.cancel();
        }
        info!(count = pending.len(), "cancelled all queued requests");
    }
}
