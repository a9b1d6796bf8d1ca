//! Error taxonomy for inbound events.
//!
//! Every failure an inbound event can hit maps to one `EventError` variant.
//! The dispatch layer turns it into an `error` event for the originating
//! connection only; nothing is broadcast and no state change is applied.

use uuid::Uuid;

use crate::frame::ErrorCode;
use crate::services::auth::AuthError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error(transparent)]
    Authentication(#[from] AuthError),
    #[error("not a member of room {0}")]
    NotMember(Uuid),
    #[error("only the owner may delete card {0}")]
    NotOwner(Uuid),
    #[error("card not found: {0}")]
    CardNotFound(Uuid),
    #[error("invalid payload: {0}")]
    Validation(String),
    #[error("unknown event: {0}")]
    UnknownEvent(String),
    #[error("dependency failure: {0}")]
    Dependency(#[from] StoreError),
}

impl ErrorCode for EventError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "E_AUTHENTICATION",
            Self::NotMember(_) => "E_NOT_MEMBER",
            Self::NotOwner(_) => "E_NOT_OWNER",
            Self::CardNotFound(_) => "E_CARD_NOT_FOUND",
            Self::Validation(_) => "E_VALIDATION",
            Self::UnknownEvent(_) => "E_UNKNOWN_EVENT",
            Self::Dependency(_) => "E_DEPENDENCY",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Dependency(_))
    }
}
