use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::{Store, StoreError};
use crate::models::{Event, EventId, Participant, ParticipantSubmission, UpsertOutcome};

const PARTICIPANT_COLUMNS: &str = "id,event_id,name,email,availability,locked,created_at";
const NAME_LOCKED: &str = "NAME_LOCKED";
const EVENT_NOT_FOUND: &str = "EVENT_NOT_FOUND";

/// PostgREST-style HTTP backend.
///
/// The lock rule runs inside the `upsert_participant` database function so
/// the comparison token never leaves the database.
pub struct RestStore {
    client: Client,
    base: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<String>,
}

#[derive(Serialize)]
struct UpsertArgs<'a> {
    p_event_id: &'a EventId,
    p_name: &'a str,
    p_email: Option<&'a str>,
    p_availability: &'a [crate::slot::TimeSlot],
    p_lock: bool,
    p_password: Option<&'a str>,
}

impl RestStore {
    pub fn new(url: &str, api_key: &str) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base: format!("{}/rest/v1", url.trim_end_matches('/')),
            api_key: api_key.to_string(),
        })
    }

    fn default_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Ok(val) = HeaderValue::from_str(&self.api_key) {
            headers.insert("apikey", val);
        }
        if let Ok(val) = HeaderValue::from_str(&format!("Bearer {}", self.api_key)) {
            headers.insert(AUTHORIZATION, val);
        }
        headers
    }

    async fn read<T: DeserializeOwned>(resp: Response, what: &str) -> Result<T, StoreError> {
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| StoreError::Backend(format!("failed to read {what} response: {e}")))?;
        debug!("{} response (status {}): {}", what, status, text);

        if !status.is_success() {
            let err: ApiError = serde_json::from_str(&text).unwrap_or(ApiError {
                message: text.clone(),
                code: None,
            });
            if err.message.contains(NAME_LOCKED) {
                return Err(StoreError::NameLocked);
            }
            if err.message.contains(EVENT_NOT_FOUND) {
                return Err(StoreError::NotFound);
            }
            warn!("{} failed (status {}, code {:?}): {}", what, status, err.code, err.message);
            return Err(StoreError::Backend(format!("{what}: {status} {}", err.message)));
        }

        serde_json::from_str(&text)
            .map_err(|e| StoreError::Backend(format!("failed to parse {what} (status {status}): {e}")))
    }
}

fn transport(what: &str, err: reqwest::Error) -> StoreError {
    StoreError::Backend(format!("failed to send {what} request: {err}"))
}

#[async_trait]
impl Store for RestStore {
    async fn fetch_event(&self, id: &EventId) -> Result<Option<Event>, StoreError> {
        let url = format!(
            "{}/events?id=eq.{}&select=*",
            self.base,
            urlencoding::encode(&id.0)
        );
        let resp = self
            .client
            .get(&url)
            .headers(self.default_headers())
            .send()
            .await
            .map_err(|e| transport("event", e))?;
        let rows: Vec<Event> = Self::read(resp, "Event").await?;
        Ok(rows.into_iter().next())
    }

    async fn fetch_participants(&self, id: &EventId) -> Result<Vec<Participant>, StoreError> {
        let url = format!(
            "{}/participants?event_id=eq.{}&select={}&order=created_at.asc",
            self.base,
            urlencoding::encode(&id.0),
            PARTICIPANT_COLUMNS
        );
        let resp = self
            .client
            .get(&url)
            .headers(self.default_headers())
            .send()
            .await
            .map_err(|e| transport("participants", e))?;
        Self::read(resp, "Participants").await
    }

    async fn upsert_participant(
        &self,
        id: &EventId,
        submission: &ParticipantSubmission,
    ) -> Result<UpsertOutcome, StoreError> {
        let url = format!("{}/rpc/upsert_participant", self.base);
        let args = UpsertArgs {
            p_event_id: id,
            p_name: &submission.name,
            p_email: submission.email.as_deref(),
            p_availability: &submission.availability,
            p_lock: submission.lock,
            p_password: submission.password.as_deref(),
        };
        let resp = self
            .client
            .post(&url)
            .headers(self.default_headers())
            .json(&args)
            .send()
            .await
            .map_err(|e| transport("upsert", e))?;
        Self::read(resp, "Upsert").await
    }

    async fn create_event(&self, event: &Event) -> Result<Event, StoreError> {
        let url = format!("{}/events", self.base);
        let resp = self
            .client
            .post(&url)
            .headers(self.default_headers())
            .header("Prefer", "return=representation")
            .json(&json!([event]))
            .send()
            .await
            .map_err(|e| transport("create event", e))?;
        let rows: Vec<Event> = Self::read(resp, "Create event").await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::Backend("create event returned no row".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::TimeSlot;
    use chrono::NaiveDate;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn event_row() -> serde_json::Value {
        json!({
            "id": "evt-1",
            "title": "Team sync",
            "description": null,
            "start_date": "2025-06-01T00:00:00.000Z",
            "end_date": "2025-06-02T00:00:00.000Z",
            "start_hour": 9,
            "end_hour": 10,
            "timezone": "UTC",
            "created_at": "2025-05-30T10:00:00Z"
        })
    }

    fn participant_row(name: &str, availability: serde_json::Value) -> serde_json::Value {
        json!({
            "id": format!("id-{name}"),
            "event_id": "evt-1",
            "name": name,
            "email": null,
            "availability": availability,
            "locked": false,
            "created_at": "2025-05-30T10:00:00Z"
        })
    }

    #[tokio::test]
    async fn test_fetch_event_sends_key_and_parses_timestamps() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/events"))
            .and(query_param("id", "eq.evt-1"))
            .and(header("apikey", "anon"))
            .and(header("authorization", "Bearer anon"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([event_row()])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/events"))
            .and(query_param("id", "eq.missing"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let store = RestStore::new(&server.uri(), "anon").unwrap();
        let event = store.fetch_event(&EventId::from("evt-1")).await.unwrap().unwrap();
        assert_eq!(event.start_date, NaiveDate::from_ymd_opt(2025, 6, 1).unwrap());
        assert_eq!(event.candidate_dates().len(), 2);
        assert!(store.fetch_event(&EventId::from("missing")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fetch_participants_in_creation_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/participants"))
            .and(query_param("event_id", "eq.evt-1"))
            .and(query_param("order", "created_at.asc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                participant_row("Alice", json!([{"date": "2025-06-01", "hour": 9}])),
                participant_row("Bob", json!("[{\"date\":\"2025-06-02T00:00:00.000Z\",\"hour\":10}]")),
            ])))
            .mount(&server)
            .await;

        let store = RestStore::new(&server.uri(), "anon").unwrap();
        let rows = store.fetch_participants(&EventId::from("evt-1")).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "Alice");
        assert_eq!(
            rows[1].availability,
            vec![TimeSlot::new(NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(), 10)]
        );
    }

    #[tokio::test]
    async fn test_upsert_maps_name_locked() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/upsert_participant"))
            .and(body_partial_json(json!({"p_name": "Alice", "p_lock": false})))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "code": "P0001",
                "message": "NAME_LOCKED"
            })))
            .mount(&server)
            .await;

        let store = RestStore::new(&server.uri(), "anon").unwrap();
        let submission = ParticipantSubmission {
            name: "Alice".into(),
            password: Some("wrong".into()),
            ..Default::default()
        };
        let err = store
            .upsert_participant(&EventId::from("evt-1"), &submission)
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::NameLocked);
    }

    #[tokio::test]
    async fn test_upsert_returns_outcome() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/upsert_participant"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "record": participant_row("Alice", json!([{"date": "2025-06-01", "hour": 9}])),
                "is_new": true
            })))
            .mount(&server)
            .await;

        let store = RestStore::new(&server.uri(), "anon").unwrap();
        let outcome = store
            .upsert_participant(
                &EventId::from("evt-1"),
                &ParticipantSubmission {
                    name: "Alice".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(outcome.is_new);
        assert_eq!(outcome.record.availability.len(), 1);
    }

    #[tokio::test]
    async fn test_server_error_is_backend_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/participants"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let store = RestStore::new(&server.uri(), "anon").unwrap();
        let err = store
            .fetch_participants(&EventId::from("evt-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Backend(msg) if msg.contains("upstream down")));
    }

    #[test]
    fn test_upsert_function_claims_name_before_locking_select() {
        let schema = include_str!("../../sql/schema.sql");
        let body = &schema[schema
            .find("function upsert_participant")
            .expect("upsert_participant is defined")..];
        let insert = body
            .find("on conflict (event_id, name) do nothing")
            .expect("insert tolerates a concurrent first submit");
        let lock = body.find("for update").expect("existing row is locked");
        assert!(insert < lock);
        assert!(body.contains("is_new := found"));
        assert!(body.contains(NAME_LOCKED) && body.contains(EVENT_NOT_FOUND));
    }
}
