use chrono::DateTime;
use chrono_tz::Tz;

use crate::calendar::PolicyError;
use crate::model::{BookingId, BookingStatus, ResourceId};

/// Coarse classification a transport maps onto its own status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    PolicyViolation,
    InvalidInput,
    Conflict,
    NotFound,
    Unauthorized,
    InvalidTransition,
    NoSlotsFound,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("slot unavailable: overlaps approved booking {booking}{}", render_suggestions(.suggestions))]
    Conflict {
        booking: BookingId,
        suggestions: Vec<DateTime<Tz>>,
    },
    #[error("resource {0} is not currently bookable")]
    ResourceUnavailable(ResourceId),
    #[error("booking not found: {0}")]
    NotFound(BookingId),
    #[error("resource not found: {0}")]
    ResourceNotFound(ResourceId),
    #[error("unauthorized: {0}")]
    Unauthorized(&'static str),
    #[error("check-in window for booking {0} has expired")]
    CheckInExpired(BookingId),
    #[error("booking {id} is {from}; this action requires {}", render_statuses(.required))]
    InvalidTransition {
        id: BookingId,
        from: BookingStatus,
        required: &'static [BookingStatus],
    },
    #[error("no slots available within the search horizon")]
    NoSlotsFound,
    #[error("internal error")]
    Internal,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Policy(_) => ErrorKind::PolicyViolation,
            EngineError::InvalidInput(_) | EngineError::LimitExceeded(_) => ErrorKind::InvalidInput,
            EngineError::Conflict { .. } | EngineError::ResourceUnavailable(_) => ErrorKind::Conflict,
            EngineError::NotFound(_) | EngineError::ResourceNotFound(_) => ErrorKind::NotFound,
            EngineError::Unauthorized(_) | EngineError::CheckInExpired(_) => ErrorKind::Unauthorized,
            EngineError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            EngineError::NoSlotsFound => ErrorKind::NoSlotsFound,
            EngineError::Internal => ErrorKind::Internal,
        }
    }

    pub(crate) fn invalid_input(msg: impl Into<String>) -> Self {
        EngineError::InvalidInput(msg.into())
    }
}

fn render_suggestions(suggestions: &[DateTime<Tz>]) -> String {
    if suggestions.is_empty() {
        return String::new();
    }
    let slots: Vec<String> = suggestions
        .iter()
        .map(|s| s.format("%a, %d %b %H:%M").to_string())
        .collect();
    format!(". Suggested slots: {}", slots.join("; "))
}

fn render_statuses(statuses: &[BookingStatus]) -> String {
    let names: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
    names.join(" or ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Asia::Kolkata;

    #[test]
    fn conflict_message_lists_local_suggestions() {
        let err = EngineError::Conflict {
            booking: BookingId(7),
            suggestions: vec![
                Kolkata.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap(),
                Kolkata.with_ymd_and_hms(2025, 6, 2, 13, 0, 0).unwrap(),
            ],
        };
        assert_eq!(
            err.to_string(),
            "slot unavailable: overlaps approved booking 7. Suggested slots: Mon, 02 Jun 12:00; Mon, 02 Jun 13:00"
        );
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn transition_message_names_required_state() {
        let err = EngineError::InvalidTransition {
            id: BookingId(3),
            from: BookingStatus::Rejected,
            required: &[BookingStatus::Pending],
        };
        assert_eq!(err.to_string(), "booking 3 is rejected; this action requires pending");
    }

    #[test]
    fn internal_error_hides_detail() {
        assert_eq!(EngineError::Internal.to_string(), "internal error");
        assert_eq!(EngineError::Internal.kind(), ErrorKind::Internal);
    }

    #[test]
    fn expired_check_in_is_an_authorization_failure() {
        assert_eq!(EngineError::CheckInExpired(BookingId(1)).kind(), ErrorKind::Unauthorized);
    }
}
