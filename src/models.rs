use std::fmt;
use std::str::FromStr;

use base64::prelude::*;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::gesture::GestureConfig;
use crate::slot::{deserialize_calendar_date, deserialize_slot_list, TimeSlot};

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub grid: GestureConfig,
    #[serde(default)]
    pub push: PushConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
    /// Base URL used when building links in push payloads.
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:3009".into(),
            public_url: String::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Rest,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub url: String,
    pub api_key: String,
    pub poll_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            url: String::new(),
            api_key: String::new(),
            poll_interval_secs: 5,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct PushConfig {
    pub enabled: bool,
    pub app_name: String,
    pub icon: String,
    /// Base64url VAPID application server keys. `VAPID_PUBLIC_KEY` and
    /// `VAPID_PRIVATE_KEY` in the environment take precedence.
    pub vapid_public_key: String,
    pub vapid_private_key: String,
    /// VAPID `sub` claim, a `mailto:` or `https:` contact.
    pub subject: String,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            app_name: "ScheduleTime".into(),
            icon: "/icon.png".into(),
            vapid_public_key: String::new(),
            vapid_private_key: String::new(),
            subject: "mailto:admin@localhost".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VapidKeys {
    pub public_key: String,
    pub private_key: String,
}

impl PushConfig {
    /// Environment first, then the config file. `None` if either half is missing.
    pub fn vapid_keys(&self) -> Option<VapidKeys> {
        let env_pair = (
            std::env::var("VAPID_PUBLIC_KEY").ok(),
            std::env::var("VAPID_PRIVATE_KEY").ok(),
        );
        let (public_key, private_key) = match env_pair {
            (Some(public), Some(private)) => (public, private),
            _ => (self.vapid_public_key.clone(), self.vapid_private_key.clone()),
        };
        let public_key = public_key.trim().to_string();
        let private_key = private_key.trim().to_string();
        if public_key.is_empty() || private_key.is_empty() {
            return None;
        }
        Some(VapidKeys {
            public_key,
            private_key,
        })
    }
}

/// Short URL-safe identifier (22 chars).
pub fn new_id() -> String {
    BASE64_URL_SAFE_NO_PAD.encode(uuid::Uuid::new_v4().as_bytes())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(deserialize_with = "deserialize_calendar_date")]
    pub start_date: NaiveDate,
    #[serde(deserialize_with = "deserialize_calendar_date")]
    pub end_date: NaiveDate,
    /// Non-contiguous candidate days; takes precedence over the range.
    #[serde(default)]
    pub selected_dates: Option<Vec<NaiveDate>>,
    pub start_hour: u8,
    pub end_hour: u8,
    pub timezone: String,
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Grid columns, ascending and unique.
    pub fn candidate_dates(&self) -> Vec<NaiveDate> {
        if let Some(dates) = self.selected_dates.as_ref().filter(|d| !d.is_empty()) {
            let mut dates = dates.clone();
            dates.sort();
            dates.dedup();
            return dates;
        }
        let mut out = Vec::new();
        let mut day = self.start_date;
        while day <= self.end_date {
            out.push(day);
            day += Duration::days(1);
        }
        out
    }

    /// Grid rows, inclusive of `end_hour`.
    pub fn hours(&self) -> Vec<u8> {
        (self.start_hour..=self.end_hour).collect()
    }

    pub fn total_cells(&self) -> usize {
        self.candidate_dates().len() * self.hours().len()
    }
}

/// Organizer input for a new event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvent {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub dates: Vec<NaiveDate>,
    pub start_hour: u8,
    pub end_hour: u8,
    pub timezone: String,
}

impl NewEvent {
    /// Validate and turn the draft into a storable event. The contiguous
    /// range is derived from the earliest and latest selected day.
    pub fn into_event(self, id: EventId, created_at: DateTime<Utc>) -> Result<Event, ValidationError> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        if self.start_hour > self.end_hour || self.end_hour > 23 {
            return Err(ValidationError::InvalidHourRange {
                start: self.start_hour,
                end: self.end_hour,
            });
        }
        if Tz::from_str(&self.timezone).is_err() {
            return Err(ValidationError::UnknownTimezone(self.timezone));
        }
        let mut dates = self.dates;
        dates.sort();
        dates.dedup();
        let (start_date, end_date) = match (dates.first(), dates.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return Err(ValidationError::NoDates),
        };
        let description = self
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        Ok(Event {
            id,
            title,
            description,
            start_date,
            end_date,
            selected_dates: Some(dates),
            start_hour: self.start_hour,
            end_hour: self.end_hour,
            timezone: self.timezone,
            created_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub event_id: EventId,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "deserialize_slot_list")]
    pub availability: Vec<TimeSlot>,
    #[serde(default)]
    pub locked: bool,
    /// Comparison token for locked names. Never serialised back out.
    #[serde(default, skip_serializing)]
    pub auth_token: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Participant {
    pub fn is_available(&self, slot: &TimeSlot) -> bool {
        self.availability.contains(slot)
    }
}

/// What a participant sends when submitting availability.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParticipantSubmission {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    pub availability: Vec<TimeSlot>,
    #[serde(default)]
    pub lock: bool,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertOutcome {
    pub record: Participant,
    pub is_new: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn draft() -> NewEvent {
        NewEvent {
            title: "  Team sync ".into(),
            description: Some("   ".into()),
            dates: vec![d(2025, 6, 3), d(2025, 6, 1), d(2025, 6, 3)],
            start_hour: 9,
            end_hour: 17,
            timezone: "Asia/Taipei".into(),
        }
    }

    #[test]
    fn test_into_event_derives_range() {
        let event = draft().into_event(EventId::from("e1"), Utc::now()).unwrap();
        assert_eq!(event.title, "Team sync");
        assert_eq!(event.description, None);
        assert_eq!(event.start_date, d(2025, 6, 1));
        assert_eq!(event.end_date, d(2025, 6, 3));
        assert_eq!(event.candidate_dates(), vec![d(2025, 6, 1), d(2025, 6, 3)]);
        assert_eq!(event.hours().len(), 9);
        assert_eq!(event.total_cells(), 18);
    }

    #[test]
    fn test_into_event_rejects_bad_input() {
        let mut bad = draft();
        bad.timezone = "Mars/Olympus".into();
        assert!(matches!(
            bad.into_event(EventId::from("e"), Utc::now()),
            Err(ValidationError::UnknownTimezone(_))
        ));

        let mut bad = draft();
        bad.start_hour = 18;
        assert!(matches!(
            bad.into_event(EventId::from("e"), Utc::now()),
            Err(ValidationError::InvalidHourRange { .. })
        ));

        let mut bad = draft();
        bad.dates.clear();
        assert!(matches!(
            bad.into_event(EventId::from("e"), Utc::now()),
            Err(ValidationError::NoDates)
        ));
    }

    #[test]
    fn test_candidate_dates_falls_back_to_range() {
        let mut event = draft().into_event(EventId::from("e"), Utc::now()).unwrap();
        event.selected_dates = None;
        assert_eq!(
            event.candidate_dates(),
            vec![d(2025, 6, 1), d(2025, 6, 2), d(2025, 6, 3)]
        );
    }

    #[test]
    fn test_auth_token_not_serialized() {
        let p = Participant {
            id: "p1".into(),
            event_id: EventId::from("e1"),
            name: "Alice".into(),
            email: None,
            availability: vec![],
            locked: true,
            auth_token: Some("hunter2".into()),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&p).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(json.contains("\"locked\":true"));
    }

    #[test]
    fn test_participant_accepts_encoded_availability() {
        let json = r#"{
            "id": "p1", "event_id": "e1", "name": "Bob", "email": null,
            "availability": "[{\"date\":\"2025-06-01T00:00:00.000Z\",\"hour\":9}]",
            "created_at": "2025-05-30T10:00:00Z"
        }"#;
        let p: Participant = serde_json::from_str(json).unwrap();
        assert_eq!(p.availability, vec![TimeSlot::new(d(2025, 6, 1), 9)]);
        assert!(!p.locked);

        let json = r#"{"id": "p2", "event_id": "e1", "name": "Eve", "availability": null,
            "created_at": "2025-05-30T10:00:00Z"}"#;
        let p: Participant = serde_json::from_str(json).unwrap();
        assert!(p.availability.is_empty());
    }

    #[test]
    fn test_new_id_is_url_safe() {
        let id = new_id();
        assert_eq!(id.len(), 22);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
