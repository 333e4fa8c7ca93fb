//! Event/participant storage.
//!
//! The store is the system of record. Backends implement [`Store`]; the
//! rest of the crate only ever talks to the trait.

use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::feed::{ChangeFeed, MemoryFeed, PollingFeed};
use crate::models::{
    Event, EventId, Participant, ParticipantSubmission, StoreBackend, StoreConfig, UpsertOutcome,
};

pub mod memory;
pub mod rest;

pub use memory::MemoryStore;
pub use rest::RestStore;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    /// The name exists, is locked, and the password did not match.
    #[error("name is locked")]
    NameLocked,
    #[error("backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait Store: Send + Sync {
    /// `Ok(None)` when no event has this id.
    async fn fetch_event(&self, id: &EventId) -> Result<Option<Event>, StoreError>;

    /// Oldest-created first.
    async fn fetch_participants(&self, id: &EventId) -> Result<Vec<Participant>, StoreError>;

    /// Insert or replace the row keyed on `(event_id, name)` in one step.
    async fn upsert_participant(
        &self,
        id: &EventId,
        submission: &ParticipantSubmission,
    ) -> Result<UpsertOutcome, StoreError>;

    async fn create_event(&self, event: &Event) -> Result<Event, StoreError>;
}

/// A store plus the change feed that matches it.
#[derive(Clone)]
pub struct Backend {
    pub store: Arc<dyn Store>,
    pub feed: Arc<dyn ChangeFeed>,
}

/// Build the configured backend. The memory store publishes its own
/// writes; the REST store is watched by polling.
pub fn connect(config: &StoreConfig) -> anyhow::Result<Backend> {
    match config.backend {
        StoreBackend::Memory => {
            info!("Using in-memory store");
            let feed = MemoryFeed::new();
            Ok(Backend {
                store: Arc::new(MemoryStore::with_feed(feed.clone())),
                feed: Arc::new(feed),
            })
        }
        StoreBackend::Rest => {
            if config.url.trim().is_empty() {
                bail!("store.url is required for the rest backend");
            }
            info!(
                "Using REST store at {} (polling every {}s)",
                config.url, config.poll_interval_secs
            );
            let store: Arc<dyn Store> = Arc::new(RestStore::new(&config.url, &config.api_key)?);
            let feed = PollingFeed::new(
                store.clone(),
                Duration::from_secs(config.poll_interval_secs.max(1)),
            );
            Ok(Backend {
                store,
                feed: Arc::new(feed),
            })
        }
    }
}

/// Decide the row a submission produces given what is stored under its
/// name. Shared by backends that evaluate the lock rule themselves.
pub(crate) fn resolve_upsert(
    existing: Option<&Participant>,
    submission: &ParticipantSubmission,
) -> Result<(bool, Option<String>), StoreError> {
    let Some(existing) = existing else {
        let token = submission.lock.then(|| submission.password.clone()).flatten();
        return Ok((submission.lock, token));
    };
    if existing.locked && existing.auth_token.as_deref() != submission.password.as_deref() {
        return Err(StoreError::NameLocked);
    }
    let locked = existing.locked || submission.lock;
    let token = if submission.lock {
        submission.password.clone()
    } else {
        existing.auth_token.clone()
    };
    Ok((locked, token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn row(locked: bool, token: Option<&str>) -> Participant {
        Participant {
            id: "p1".into(),
            event_id: EventId::from("e1"),
            name: "Alice".into(),
            email: None,
            availability: vec![],
            locked,
            auth_token: token.map(String::from),
            created_at: Utc::now(),
        }
    }

    fn submission(lock: bool, password: Option<&str>) -> ParticipantSubmission {
        ParticipantSubmission {
            name: "Alice".into(),
            lock,
            password: password.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_new_name_takes_lock_from_submission() {
        assert_eq!(
            resolve_upsert(None, &submission(true, Some("pw"))).unwrap(),
            (true, Some("pw".into()))
        );
        assert_eq!(resolve_upsert(None, &submission(false, Some("pw"))).unwrap(), (false, None));
    }

    #[test]
    fn test_locked_name_requires_matching_password() {
        let stored = row(true, Some("pw"));
        assert_eq!(
            resolve_upsert(Some(&stored), &submission(false, Some("nope"))),
            Err(StoreError::NameLocked)
        );
        assert_eq!(
            resolve_upsert(Some(&stored), &submission(false, None)),
            Err(StoreError::NameLocked)
        );
        assert_eq!(
            resolve_upsert(Some(&stored), &submission(false, Some("pw"))).unwrap(),
            (true, Some("pw".into()))
        );
    }

    #[test]
    fn test_connect_requires_url_for_rest() {
        let config = StoreConfig {
            backend: StoreBackend::Rest,
            ..StoreConfig::default()
        };
        assert!(connect(&config).is_err());
        assert!(connect(&StoreConfig::default()).is_ok());
    }

    #[test]
    fn test_unlocked_name_can_be_locked_later() {
        let stored = row(false, None);
        assert_eq!(
            resolve_upsert(Some(&stored), &submission(true, Some("new"))).unwrap(),
            (true, Some("new".into()))
        );
    }
}
