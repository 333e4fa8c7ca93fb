use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{resolve_upsert, Store, StoreError};
use crate::feed::{ChangeKind, ChangeNotification, MemoryFeed};
use crate::models::{new_id, Event, EventId, Participant, ParticipantSubmission, UpsertOutcome};
use crate::slot::normalize;

#[derive(Default)]
struct Tables {
    events: HashMap<EventId, Event>,
    /// Insertion order is creation order.
    participants: Vec<Participant>,
}

/// Single-process store. Attach a [`MemoryFeed`] to get change notifications.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    feed: Option<MemoryFeed>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feed(feed: MemoryFeed) -> Self {
        Self {
            tables: Mutex::default(),
            feed: Some(feed),
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn fetch_event(&self, id: &EventId) -> Result<Option<Event>, StoreError> {
        Ok(self.tables.lock().await.events.get(id).cloned())
    }

    async fn fetch_participants(&self, id: &EventId) -> Result<Vec<Participant>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .participants
            .iter()
            .filter(|p| &p.event_id == id)
            .cloned()
            .collect())
    }

    async fn upsert_participant(
        &self,
        id: &EventId,
        submission: &ParticipantSubmission,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut availability = submission.availability.clone();
        normalize(&mut availability);

        let outcome = {
            let mut tables = self.tables.lock().await;
            if !tables.events.contains_key(id) {
                return Err(StoreError::NotFound);
            }
            let existing = tables
                .participants
                .iter()
                .position(|p| &p.event_id == id && p.name == submission.name);

            match existing {
                Some(idx) => {
                    let row = &mut tables.participants[idx];
                    let (locked, auth_token) = resolve_upsert(Some(&*row), submission)?;
                    row.email = submission.email.clone();
                    row.availability = availability;
                    row.locked = locked;
                    row.auth_token = auth_token;
                    UpsertOutcome {
                        record: row.clone(),
                        is_new: false,
                    }
                }
                None => {
                    let (locked, auth_token) = resolve_upsert(None, submission)?;
                    let row = Participant {
                        id: new_id(),
                        event_id: id.clone(),
                        name: submission.name.clone(),
                        email: submission.email.clone(),
                        availability,
                        locked,
                        auth_token,
                        created_at: Utc::now(),
                    };
                    tables.participants.push(row.clone());
                    UpsertOutcome {
                        record: row,
                        is_new: true,
                    }
                }
            }
        };

        debug!(
            "Store: {} participant '{}' for event {} ({} slots)",
            if outcome.is_new { "inserted" } else { "updated" },
            outcome.record.name,
            id,
            outcome.record.availability.len()
        );
        if let Some(feed) = &self.feed {
            feed.publish(
                id,
                ChangeNotification {
                    event_type: if outcome.is_new {
                        ChangeKind::Insert
                    } else {
                        ChangeKind::Update
                    },
                    row: outcome.record.clone(),
                },
            );
        }
        Ok(outcome)
    }

    async fn create_event(&self, event: &Event) -> Result<Event, StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.events.contains_key(&event.id) {
            return Err(StoreError::Backend(format!("event {} already exists", event.id)));
        }
        tables.events.insert(event.id.clone(), event.clone());
        info!("Store: created event {} '{}'", event.id, event.title);
        Ok(event.clone())
    }
}
