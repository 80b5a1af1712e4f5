//! Change notification channel for cross-instance synchronization.
//!
//! Every writer broadcasts a `ChangeEvent` after a local write; other
//! engine instances in the process subscribe and mark the matching cache
//! slot stale so their next read reconciles against the store.

use tokio::sync::broadcast;
use uuid::Uuid;

/// Which cached state changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEvent {
    /// XP/coins/streak changed.
    Progression,
    /// The relationship list changed (connect, removal).
    Relationships,
    /// One relationship's tree level or log list changed.
    RelationLogs(Uuid),
}

/// Broadcast fan-out shared by all engine instances in a process.
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    /// Broadcast a change. Having no subscribers is not an error.
    pub fn publish(&self, event: ChangeEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}
