use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::AppState;
use crate::aggregate::{slot_detail as partition, Summary};
use crate::error::{SubmitError, ValidationError};
use crate::models::{
    new_id, Event, EventId, NewEvent, Participant, ParticipantSubmission, UpsertOutcome,
};
use crate::push::{notify_event, PushPayload, PushSubscription};
use crate::slot::{SlotKey, TimeSlot};
use crate::store::StoreError;
use crate::submit::submit_availability;
use crate::sync::{load_snapshot, SyncError, SyncHandle};

/// JSON error body: `{ "ok": false, "error": CODE, "message": ... }`.
pub(crate) struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "ok": false, "error": self.code, "message": self.message });
        (self.status, Json(body)).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::new(StatusCode::BAD_REQUEST, "INVALID_INPUT", err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", "event not found"),
            StoreError::NameLocked => {
                ApiError::new(StatusCode::FORBIDDEN, "NAME_LOCKED", "this name is locked")
            }
            StoreError::Backend(msg) => {
                warn!("Store failure: {}", msg);
                ApiError::new(StatusCode::BAD_GATEWAY, "REMOTE_FAILURE", "the store is unavailable")
            }
        }
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Validation(e) => e.into(),
            SubmitError::NameLocked => StoreError::NameLocked.into(),
            SubmitError::Remote(e) => e.into(),
        }
    }
}

#[derive(Serialize)]
pub(crate) struct EventResponse {
    event: Event,
    participants: Vec<Participant>,
    #[serde(flatten)]
    summary: Summary,
}

pub(crate) async fn create_event(
    State(state): State<AppState>,
    Json(draft): Json<NewEvent>,
) -> Result<(StatusCode, Json<Event>), ApiError> {
    let event = draft.into_event(EventId(new_id()), Utc::now())?;
    let created = state.store.create_event(&event).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub(crate) async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<EventResponse>, ApiError> {
    let snapshot = load_snapshot(state.store.as_ref(), &EventId(id)).await?;
    Ok(Json(EventResponse {
        event: snapshot.event,
        participants: snapshot.participants,
        summary: snapshot.summary,
    }))
}

pub(crate) async fn submit(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(draft): Json<ParticipantSubmission>,
) -> Result<Json<UpsertOutcome>, ApiError> {
    let event_id = EventId(id);
    let outcome = submit_availability(state.store.as_ref(), &event_id, &draft).await?;

    if state.config.push.enabled {
        let verb = if outcome.is_new { "joined" } else { "updated their availability" };
        let payload = PushPayload::for_event(
            &state.config.push,
            &state.config.server.public_url,
            &event_id,
        )
        .with_body(format!("{} {}", outcome.record.name, verb));
        let registry = state.push.clone();
        let delivery = state.delivery.clone();
        // best effort; never holds up the response
        tokio::spawn(async move {
            notify_event(&registry, delivery.as_ref(), &event_id, &payload).await;
        });
    }

    Ok(Json(outcome))
}

#[derive(Serialize)]
pub(crate) struct SlotDetailResponse {
    slot: TimeSlot,
    key: SlotKey,
    available: Vec<Participant>,
    unavailable: Vec<Participant>,
}

pub(crate) async fn slot_detail(
    State(state): State<AppState>,
    Path((id, key)): Path<(String, String)>,
) -> Result<Json<SlotDetailResponse>, ApiError> {
    let slot = SlotKey::parse(&key).ok_or_else(|| {
        ApiError::new(StatusCode::BAD_REQUEST, "INVALID_INPUT", format!("bad slot key '{key}'"))
    })?;
    let snapshot = load_snapshot(state.store.as_ref(), &EventId(id)).await?;
    let detail = partition(&snapshot.participants, &slot);
    Ok(Json(SlotDetailResponse {
        slot,
        key: slot.key(),
        available: detail.available.into_iter().cloned().collect(),
        unavailable: detail.unavailable.into_iter().cloned().collect(),
    }))
}

/// Server-sent `refresh` events, one per observed change. The sync bridge
/// lives as long as the response stream.
pub(crate) async fn changes(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let handle = SyncHandle::spawn(state.store.clone(), state.feed.clone(), EventId(id))
        .await
        .map_err(|e| match e {
            SyncError::Store(e) => ApiError::from(e),
            SyncError::Feed(e) => {
                ApiError::new(StatusCode::BAD_GATEWAY, "REMOTE_FAILURE", e.to_string())
            }
        })?;
    debug!("SSE client attached to event {}", handle.event_id());

    let events = stream::unfold(handle, |mut handle| async move {
        if !handle.changed().await {
            return None;
        }
        let snapshot = handle.latest();
        let event = SseEvent::default()
            .event("refresh")
            .json_data(&snapshot.summary)
            .unwrap_or_else(|_| SseEvent::default().event("refresh"));
        Some((Ok(event), handle))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

#[derive(Deserialize)]
pub(crate) struct PushRegistration {
    subscription: PushSubscription,
}

pub(crate) async fn register_push(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<PushRegistration>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !body.subscription.is_complete() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "INVALID_INPUT",
            "endpoint and keys are required",
        ));
    }
    let event_id = EventId(id);
    if state.store.fetch_event(&event_id).await?.is_none() {
        return Err(StoreError::NotFound.into());
    }
    let is_new = state.push.register(&event_id, body.subscription);
    Ok(Json(json!({ "ok": true, "new": is_new })))
}

/// The VAPID application server key browsers subscribe with.
pub(crate) async fn push_public_key(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match &state.vapid_public_key {
        Some(key) if state.config.push.enabled => {
            Ok(Json(json!({ "ok": true, "publicKey": key })))
        }
        _ => Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "PUSH_DISABLED",
            "push notifications are not configured",
        )),
    }
}
