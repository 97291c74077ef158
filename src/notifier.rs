//! Change events for readers of the cache.
//!
//! Every subscriber owns a bounded channel. Publishing never waits: when a
//! subscriber's buffer is full the event is dropped for that subscriber
//! only, and subscribers whose receiver is gone are pruned. Events for one
//! source arrive in the order they were published.

use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::domain::{ContentRecord, SyncRun};
use crate::store::{ChangeKind, RecordChange};

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Inserted(ContentRecord),
    Updated(ContentRecord),
    OrphanFlagged(ContentRecord),
    Removed(ContentRecord),
    /// Sent once per run, including runs that changed nothing or failed.
    SyncCompleted(SyncRun),
}

impl ChangeEvent {
    pub fn source_id(&self) -> i64 {
        match self {
            ChangeEvent::Inserted(r)
            | ChangeEvent::Updated(r)
            | ChangeEvent::OrphanFlagged(r)
            | ChangeEvent::Removed(r) => r.source_id,
            ChangeEvent::SyncCompleted(run) => run.source_id,
        }
    }
}

impl From<RecordChange> for ChangeEvent {
    fn from(change: RecordChange) -> Self {
        match change.kind {
            ChangeKind::Inserted => ChangeEvent::Inserted(change.record),
            ChangeKind::Updated => ChangeEvent::Updated(change.record),
            ChangeKind::OrphanFlagged => ChangeEvent::OrphanFlagged(change.record),
            ChangeKind::Removed => ChangeEvent::Removed(change.record),
        }
    }
}

/// Receiving end handed to a subscriber.
pub struct Subscription {
    rx: mpsc::Receiver<ChangeEvent>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        self.rx.try_recv().ok()
    }
}

struct Subscriber {
    /// `None` receives events for every source.
    source_id: Option<i64>,
    tx: mpsc::Sender<ChangeEvent>,
}

pub struct ChangeNotifier {
    subscribers: Mutex<Vec<Subscriber>>,
    buffer: usize,
}

impl ChangeNotifier {
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            buffer: buffer.max(1),
        }
    }

    /// Subscribe to one source, or to all of them with `None`.
    ///
    /// Only events published after this call are delivered; read the store
    /// for the current state.
    pub fn subscribe(&self, source_id: Option<i64>) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(Subscriber { source_id, tx });
        }
        Subscription { rx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn publish(&self, event: ChangeEvent) {
        let Ok(mut subscribers) = self.subscribers.lock() else {
            return;
        };
        let source_id = event.source_id();

        subscribers.retain(|subscriber| {
            if subscriber.source_id.is_some_and(|id| id != source_id) {
                return !subscriber.tx.is_closed();
            }
            match subscriber.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        "Subscriber buffer full, dropping event for source {}",
                        source_id
                    );
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("Removing closed subscriber");
                    false
                }
            }
        });
    }

    /// Publish per-record changes followed by the run summary.
    pub fn publish_run(&self, changes: Vec<RecordChange>, run: &SyncRun) {
        for change in changes {
            self.publish(change.into());
        }
        self.publish(ChangeEvent::SyncCompleted(run.clone()));
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new(crate::config::NotifierConfig::default().buffer)
    }
}
