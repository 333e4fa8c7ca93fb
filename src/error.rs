use thiserror::Error;

use crate::slot::SlotKey;
use crate::store::StoreError;

/// Input rejected before any store call is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("name is required")]
    MissingName,
    #[error("select at least one time slot")]
    NoSlots,
    #[error("slot {0} is not part of this event")]
    SlotOutsideEvent(SlotKey),
    #[error("a password is required to lock a name")]
    PasswordRequired,
    #[error("title is required")]
    EmptyTitle,
    #[error("select at least one date")]
    NoDates,
    #[error("invalid hour range {start}..={end}")]
    InvalidHourRange { start: u8, end: u8 },
    #[error("unknown timezone '{0}'")]
    UnknownTimezone(String),
}

/// Failure of an availability submission, as shown to the participant.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("this name is locked; enter the correct password")]
    NameLocked,
    #[error("could not save availability: {0}")]
    Remote(StoreError),
}

impl From<StoreError> for SubmitError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NameLocked => SubmitError::NameLocked,
            other => SubmitError::Remote(other),
        }
    }
}
