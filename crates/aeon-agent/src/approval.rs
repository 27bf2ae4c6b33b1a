//! Approval broker — the handshake between needs-approval tool results
//! and the `/approve` / `/deny` commands.
//!
//! The registry never blocks on approval; it returns a needs-approval
//! result. The agent loop registers a request here, asks the user, and
//! waits on the request's one-shot signal. `/approve` and `/deny`
//! resolve the oldest outstanding request; a timeout counts as denial.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::debug;

struct PendingApproval {
    id: u64,
    description: String,
    tx: oneshot::Sender<bool>,
}

/// FIFO queue of outstanding approval requests.
pub struct ApprovalBroker {
    pending: Mutex<VecDeque<PendingApproval>>,
    counter: AtomicU64,
}

impl ApprovalBroker {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            counter: AtomicU64::new(0),
        }
    }

    /// Register a request; the receiver resolves to the user's decision.
    pub fn request(&self, description: &str) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        debug!(id, description, "approval requested");
        self.pending.lock().unwrap().push_back(PendingApproval {
            id,
            description: description.to_string(),
            tx,
        });
        rx
    }

    /// Resolve the oldest outstanding request. Returns its description,
    /// or `None` when nothing is pending.
    pub fn resolve_oldest(&self, approved: bool) -> Option<String> {
        let pending = self.pending.lock().unwrap().pop_front()?;
        debug!(id = pending.id, approved, "approval resolved");
        // The waiter may have timed out and dropped its receiver.
        let _ = pending.tx.send(approved);
        Some(pending.description)
    }

    /// Drop a request that timed out, so a later `/approve` cannot
    /// resolve a stale entry.
    pub fn discard(&self, description: &str) {
        let mut pending = self.pending.lock().unwrap();
        if let Some(pos) = pending.iter().position(|p| p.description == description) {
            pending.remove(pos);
        }
    }

    /// Number of outstanding requests.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

impl Default for ApprovalBroker {
    fn default() -> Self {
        Self::new()
    }
}
