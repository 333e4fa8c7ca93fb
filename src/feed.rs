//! Participant-row change notifications, scoped to one event.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::{BroadcastStream, ReceiverStream};
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use crate::models::{EventId, Participant};
use crate::store::Store;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub event_type: ChangeKind,
    pub row: Participant,
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed backend error: {0}")]
    Backend(String),
}

/// Notifications for one event. Dropping the stream unsubscribes.
pub type ChangeStream = Pin<Box<dyn Stream<Item = ChangeNotification> + Send>>;

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, event_id: &EventId) -> Result<ChangeStream, FeedError>;
}

/// In-process feed; the memory store publishes into it.
#[derive(Clone, Default)]
pub struct MemoryFeed {
    channels: Arc<DashMap<EventId, broadcast::Sender<ChangeNotification>>>,
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, event_id: &EventId) -> broadcast::Sender<ChangeNotification> {
        self.channels
            .entry(event_id.clone())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Send to current subscribers. Events nobody watches get no channel,
    /// and a channel whose last receiver is gone is dropped here.
    pub fn publish(&self, event_id: &EventId, notification: ChangeNotification) {
        // clone out so the shard lock is released before remove_if
        let Some(tx) = self.channels.get(event_id).map(|tx| tx.clone()) else {
            return;
        };
        if tx.send(notification).is_err() {
            self.channels.remove_if(event_id, |_, tx| tx.receiver_count() == 0);
            debug!("Dropped idle change channel for event {}", event_id);
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn subscriber_count(&self, event_id: &EventId) -> usize {
        self.channels
            .get(event_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl ChangeFeed for MemoryFeed {
    async fn subscribe(&self, event_id: &EventId) -> Result<ChangeStream, FeedError> {
        let rx = self.channel(event_id).subscribe();
        // a lagged receiver just skips ahead; the consumer re-fetches anyway
        let stream = BroadcastStream::new(rx).filter_map(|result| result.ok());
        Ok(Box::pin(stream))
    }
}

/// Derives notifications by polling the participant list.
pub struct PollingFeed {
    store: Arc<dyn Store>,
    interval: Duration,
}

impl PollingFeed {
    pub fn new(store: Arc<dyn Store>, interval: Duration) -> Self {
        Self { store, interval }
    }
}

#[async_trait]
impl ChangeFeed for PollingFeed {
    async fn subscribe(&self, event_id: &EventId) -> Result<ChangeStream, FeedError> {
        let initial = self
            .store
            .fetch_participants(event_id)
            .await
            .map_err(|e| FeedError::Backend(e.to_string()))?;

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let store = self.store.clone();
        let interval = self.interval;
        let event_id = event_id.clone();
        tokio::spawn(async move {
            let mut known = index_rows(initial);
            loop {
                tokio::time::sleep(interval).await;
                if tx.is_closed() {
                    debug!("Feed: poller for {} stopped", event_id);
                    return;
                }
                let rows = match store.fetch_participants(&event_id).await {
                    Ok(rows) => rows,
                    Err(e) => {
                        warn!("Feed: poll for {} failed: {}", event_id, e);
                        continue;
                    }
                };
                for change in diff_rows(&known, &rows) {
                    if tx.send(change).await.is_err() {
                        return;
                    }
                }
                known = index_rows(rows);
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

fn index_rows(rows: Vec<Participant>) -> HashMap<String, Participant> {
    rows.into_iter().map(|p| (p.id.clone(), p)).collect()
}

/// Inserts and updates in `after` order, then deletes.
fn diff_rows(before: &HashMap<String, Participant>, after: &[Participant]) -> Vec<ChangeNotification> {
    let mut out = Vec::new();
    for row in after {
        match before.get(&row.id) {
            None => out.push(ChangeNotification {
                event_type: ChangeKind::Insert,
                row: row.clone(),
            }),
            Some(old) if old != row => out.push(ChangeNotification {
                event_type: ChangeKind::Update,
                row: row.clone(),
            }),
            Some(_) => {}
        }
    }
    let mut gone: Vec<&Participant> = before
        .values()
        .filter(|old| !after.iter().any(|p| p.id == old.id))
        .collect();
    gone.sort_by_key(|p| p.created_at);
    out.extend(gone.into_iter().map(|row| ChangeNotification {
        event_type: ChangeKind::Delete,
        row: row.clone(),
    }));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ParticipantSubmission;
    use crate::slot::TimeSlot;
    use crate::store::MemoryStore;
    use chrono::{NaiveDate, Utc};

    fn participant(id: &str, hour: u8) -> Participant {
        Participant {
            id: id.into(),
            event_id: EventId::from("e1"),
            name: id.to_uppercase(),
            email: None,
            availability: vec![TimeSlot::new(NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(), hour)],
            locked: false,
            auth_token: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_diff_rows() {
        let a = participant("a", 9);
        let b = participant("b", 9);
        let before = index_rows(vec![a.clone(), b.clone()]);

        let after = vec![a.clone(), participant("c", 9)];
        let kinds: Vec<(ChangeKind, String)> = diff_rows(&before, &after)
            .into_iter()
            .map(|c| (c.event_type, c.row.id))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (ChangeKind::Insert, "c".to_string()),
                (ChangeKind::Delete, "b".to_string())
            ]
        );

        let mut moved = b.clone();
        moved.availability = participant("b", 10).availability;
        let changes = diff_rows(&before, &[a.clone(), moved]);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].event_type, ChangeKind::Update);

        assert!(diff_rows(&before, &[a, b]).is_empty());
    }

    #[tokio::test]
    async fn test_memory_feed_is_scoped_per_event() {
        let feed = MemoryFeed::new();
        let mut one = feed.subscribe(&EventId::from("e1")).await.unwrap();
        let mut two = feed.subscribe(&EventId::from("e2")).await.unwrap();
        assert_eq!(feed.subscriber_count(&EventId::from("e1")), 1);

        feed.publish(
            &EventId::from("e1"),
            ChangeNotification {
                event_type: ChangeKind::Insert,
                row: participant("a", 9),
            },
        );

        let got = one.next().await.unwrap();
        assert_eq!(got.row.id, "a");
        let nothing = tokio::time::timeout(Duration::from_millis(50), two.next()).await;
        assert!(nothing.is_err());

        drop(one);
        assert_eq!(feed.subscriber_count(&EventId::from("e1")), 0);
    }

    #[tokio::test]
    async fn test_memory_feed_publish_does_not_grow_channels() {
        let feed = MemoryFeed::new();
        let insert = |id: &str| ChangeNotification {
            event_type: ChangeKind::Insert,
            row: participant(id, 9),
        };

        for i in 0..100 {
            feed.publish(&EventId(format!("unwatched-{i}")), insert("a"));
        }
        assert_eq!(feed.channel_count(), 0);

        let watcher = feed.subscribe(&EventId::from("e1")).await.unwrap();
        assert_eq!(feed.channel_count(), 1);
        drop(watcher);
        feed.publish(&EventId::from("e1"), insert("b"));
        assert_eq!(feed.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_polling_feed_reports_new_rows() {
        let store = Arc::new(MemoryStore::new());
        let event = crate::store::memory::tests::sample_event();
        store.create_event(&event).await.unwrap();

        let feed = PollingFeed::new(store.clone(), Duration::from_millis(20));
        let mut changes = feed.subscribe(&event.id).await.unwrap();

        store
            .upsert_participant(
                &event.id,
                &ParticipantSubmission {
                    name: "Alice".into(),
                    availability: vec![TimeSlot::new(event.start_date, 9)],
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let change = tokio::time::timeout(Duration::from_secs(2), changes.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change.event_type, ChangeKind::Insert);
        assert_eq!(change.row.name, "Alice");
    }
}
