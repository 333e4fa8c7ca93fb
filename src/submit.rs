use tracing::{error, info, warn};

use crate::error::{SubmitError, ValidationError};
use crate::models::{Event, EventId, ParticipantSubmission, UpsertOutcome};
use crate::slot::{normalize, TimeSlot};
use crate::store::{Store, StoreError};

fn trimmed(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(String::from)
}

/// Check a draft and return the cleaned-up copy that gets stored.
pub fn validate(draft: &ParticipantSubmission) -> Result<ParticipantSubmission, ValidationError> {
    let name = draft.name.trim();
    if name.is_empty() {
        return Err(ValidationError::MissingName);
    }
    let mut availability = draft.availability.clone();
    normalize(&mut availability);
    if availability.is_empty() {
        return Err(ValidationError::NoSlots);
    }
    let password = trimmed(draft.password.as_deref());
    if draft.lock && password.is_none() {
        return Err(ValidationError::PasswordRequired);
    }
    Ok(ParticipantSubmission {
        name: name.to_string(),
        email: trimmed(draft.email.as_deref()),
        availability,
        lock: draft.lock,
        password,
    })
}

/// Every slot must be one of the event's grid cells.
pub fn check_in_grid(event: &Event, slots: &[TimeSlot]) -> Result<(), ValidationError> {
    let dates = event.candidate_dates();
    let hours = event.start_hour..=event.end_hour;
    match slots
        .iter()
        .find(|s| !hours.contains(&s.hour) || dates.binary_search(&s.date).is_err())
    {
        Some(outside) => Err(ValidationError::SlotOutsideEvent(outside.key())),
        None => Ok(()),
    }
}

/// Whether the submit control should be enabled.
pub fn can_submit(draft: &ParticipantSubmission) -> bool {
    validate(draft).is_ok()
}

/// Validate and write one participant's availability.
///
/// The draft is only borrowed: on any error the caller still holds the
/// participant's selection and can retry.
pub async fn submit_availability(
    store: &dyn Store,
    event_id: &EventId,
    draft: &ParticipantSubmission,
) -> Result<UpsertOutcome, SubmitError> {
    let submission = validate(draft)?;
    let event = store
        .fetch_event(event_id)
        .await?
        .ok_or(StoreError::NotFound)?;
    check_in_grid(&event, &submission.availability)?;

    match store.upsert_participant(event_id, &submission).await {
        Ok(outcome) => {
            info!(
                "Saved availability for '{}' in event {} ({} slots, {})",
                outcome.record.name,
                event_id,
                outcome.record.availability.len(),
                if outcome.is_new { "new" } else { "updated" }
            );
            Ok(outcome)
        }
        Err(e) => {
            let err = SubmitError::from(e);
            match &err {
                SubmitError::NameLocked => {
                    warn!("Name '{}' in event {} is locked", submission.name, event_id)
                }
                other => error!("Failed to save availability for event {}: {}", event_id, other),
            }
            Err(err)
        }
    }
}
