use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

/// A single (date, hour) cell of the availability grid.
///
/// Field order matters: the derived `Ord` sorts by date, then hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeSlot {
    #[serde(deserialize_with = "deserialize_calendar_date")]
    pub date: NaiveDate,
    #[serde(deserialize_with = "deserialize_hour")]
    pub hour: u8,
}

impl TimeSlot {
    pub fn new(date: NaiveDate, hour: u8) -> Self {
        Self { date, hour }
    }

    pub fn key(&self) -> SlotKey {
        SlotKey::new(self.date, self.hour)
    }
}

/// Canonical `"<YYYY-MM-DD>-<hour>"` address of a slot.
///
/// This is the join key between pending gesture state, the committed
/// selection and rows coming back from the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotKey(String);

impl SlotKey {
    pub fn new(date: NaiveDate, hour: u8) -> Self {
        Self(format!("{}-{}", date.format("%Y-%m-%d"), hour))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse a key back into its slot. Returns `None` for anything that is
    /// not a valid date followed by an hour in 0..=23.
    pub fn parse(s: &str) -> Option<TimeSlot> {
        let (date, hour) = s.trim().rsplit_once('-')?;
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
        let hour: u8 = hour.parse().ok()?;
        (hour <= 23).then_some(TimeSlot { date, hour })
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&TimeSlot> for SlotKey {
    fn from(slot: &TimeSlot) -> Self {
        slot.key()
    }
}

/// Accepts `2025-06-01` as well as full timestamps such as
/// `2025-06-01T00:00:00.000Z` written by older clients.
pub(crate) fn deserialize_calendar_date<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    let day = raw.get(..10).unwrap_or(&raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").map_err(serde::de::Error::custom)
}

fn deserialize_hour<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let hour = u8::deserialize(deserializer)?;
    if hour > 23 {
        return Err(serde::de::Error::custom(format!(
            "hour {hour} out of range 0..=23"
        )));
    }
    Ok(hour)
}

/// Availability as stored: a JSON array, the same array encoded as a
/// string (older rows), or null.
pub(crate) fn deserialize_slot_list<'de, D>(deserializer: D) -> Result<Vec<TimeSlot>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Stored {
        List(Vec<TimeSlot>),
        Encoded(String),
    }

    match Option::<Stored>::deserialize(deserializer)? {
        None => Ok(Vec::new()),
        Some(Stored::List(slots)) => Ok(slots),
        Some(Stored::Encoded(raw)) => serde_json::from_str(&raw).map_err(serde::de::Error::custom),
    }
}

/// Sort ascending by (date, hour) and drop duplicate keys.
pub fn normalize(slots: &mut Vec<TimeSlot>) {
    slots.sort();
    slots.dedup();
}

/// Parse a comma-separated list of slot keys, e.g. `"2025-06-01-9,2025-06-02-10"`.
pub fn parse_slot_list(s: &str) -> Option<Vec<TimeSlot>> {
    let mut slots = s
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(SlotKey::parse)
        .collect::<Option<Vec<_>>>()?;
    normalize(&mut slots);
    Some(slots)
}
