//! Keeps one event's participant list current.
//!
//! The bridge subscribes to the change feed once, and on every
//! notification re-fetches the event and its participants in full. The
//! latest snapshot is published on a watch channel; a re-fetch that finds
//! nothing new does not wake anybody.

use std::sync::Arc;

use futures::StreamExt;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::aggregate::Summary;
use crate::feed::{ChangeFeed, FeedError};
use crate::models::{Event, EventId, Participant};
use crate::store::{Store, StoreError};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub event: Event,
    pub participants: Vec<Participant>,
    pub summary: Summary,
}

impl Snapshot {
    pub fn new(event: Event, participants: Vec<Participant>) -> Self {
        let summary = Summary::from_participants(&participants);
        Self {
            event,
            participants,
            summary,
        }
    }
}

/// Fetch the event and its participants. A missing event is `NotFound`.
pub async fn load_snapshot(store: &dyn Store, event_id: &EventId) -> Result<Snapshot, StoreError> {
    let event = store
        .fetch_event(event_id)
        .await?
        .ok_or(StoreError::NotFound)?;
    let participants = store.fetch_participants(event_id).await?;
    Ok(Snapshot::new(event, participants))
}

/// A running bridge. Dropping it unsubscribes.
pub struct SyncHandle {
    event_id: EventId,
    rx: watch::Receiver<Arc<Snapshot>>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Subscribe to `event_id` and load the first snapshot.
    pub async fn spawn(
        store: Arc<dyn Store>,
        feed: Arc<dyn ChangeFeed>,
        event_id: EventId,
    ) -> Result<Self, SyncError> {
        // subscribe before the first fetch so no write falls in between
        let mut changes = feed.subscribe(&event_id).await?;
        let initial = load_snapshot(store.as_ref(), &event_id).await?;
        let (tx, rx) = watch::channel(Arc::new(initial));

        info!("Sync: subscribed to event {}", event_id);
        let id = event_id.clone();
        let task = tokio::spawn(async move {
            while let Some(change) = changes.next().await {
                debug!(
                    "Sync: {:?} of participant {} in event {}, re-fetching",
                    change.event_type, change.row.id, id
                );
                match load_snapshot(store.as_ref(), &id).await {
                    Ok(snapshot) => {
                        let published = tx.send_if_modified(|current| {
                            if **current == snapshot {
                                return false;
                            }
                            *current = Arc::new(snapshot);
                            true
                        });
                        if !published {
                            debug!("Sync: event {} unchanged", id);
                        }
                    }
                    Err(e) => warn!("Sync: re-fetch of event {} failed: {}", id, e),
                }
                if tx.is_closed() {
                    break;
                }
            }
            info!("Sync: stopped for event {}", id);
        });

        Ok(Self { event_id, rx, task })
    }

    pub fn event_id(&self) -> &EventId {
        &self.event_id
    }

    pub fn latest(&self) -> Arc<Snapshot> {
        self.rx.borrow().clone()
    }

    /// Wait for the next published snapshot. `false` once the bridge has stopped.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    pub fn unsubscribe(self) {}
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        debug!("Sync: unsubscribing from event {}", self.event_id);
        self.task.abort();
    }
}
