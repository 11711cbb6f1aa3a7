//! Booking state machine.
//!
//! ```text
//! pending ──approve──▶ approved ──check-in──▶ utilized
//!    │                    │
//!    ├──reject──▶ rejected ├──cancel──▶ cancelled
//!    │                    └──release─▶ released
//!    ├──cancel──▶ cancelled
//!    └──expire──▶ cancelled   (stale pending sweep)
//! ```
//!
//! `rejected`, `cancelled`, `released` and `utilized` are terminal.

use crate::model::{BookingId, BookingStatus};

use super::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Approve,
    Reject,
    Cancel,
    CheckIn,
    Release,
    Expire,
}

impl Transition {
    /// Source states from which this transition is legal.
    pub fn required(self) -> &'static [BookingStatus] {
        match self {
            Transition::Approve | Transition::Reject | Transition::Expire => &[BookingStatus::Pending],
            Transition::Cancel => &[BookingStatus::Pending, BookingStatus::Approved],
            Transition::CheckIn | Transition::Release => &[BookingStatus::Approved],
        }
    }

    pub fn target(self) -> BookingStatus {
        match self {
            Transition::Approve => BookingStatus::Approved,
            Transition::Reject => BookingStatus::Rejected,
            Transition::Cancel | Transition::Expire => BookingStatus::Cancelled,
            Transition::CheckIn => BookingStatus::Utilized,
            Transition::Release => BookingStatus::Released,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Transition::Approve => "approve",
            Transition::Reject => "reject",
            Transition::Cancel => "cancel",
            Transition::CheckIn => "check_in",
            Transition::Release => "release",
            Transition::Expire => "expire",
        }
    }
}

/// Status after applying `transition` to a booking currently in `from`.
pub fn advance(id: BookingId, from: BookingStatus, transition: Transition) -> Result<BookingStatus, EngineError> {
    let legal = match (from, transition) {
        (BookingStatus::Pending, Transition::Approve | Transition::Reject | Transition::Cancel | Transition::Expire) => true,
        (BookingStatus::Approved, Transition::Cancel | Transition::CheckIn | Transition::Release) => true,
        (BookingStatus::Pending, Transition::CheckIn | Transition::Release) => false,
        (BookingStatus::Approved, Transition::Approve | Transition::Reject | Transition::Expire) => false,
        (
            BookingStatus::Rejected
            | BookingStatus::Cancelled
            | BookingStatus::Released
            | BookingStatus::Utilized,
            _,
        ) => false,
    };
    if legal {
        Ok(transition.target())
    } else {
        Err(EngineError::InvalidTransition {
            id,
            from,
            required: transition.required(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_TRANSITIONS: [Transition; 6] = [
        Transition::Approve,
        Transition::Reject,
        Transition::Cancel,
        Transition::CheckIn,
        Transition::Release,
        Transition::Expire,
    ];

    #[test]
    fn legal_moves_reach_their_targets() {
        let id = BookingId(1);
        assert_eq!(advance(id, BookingStatus::Pending, Transition::Approve).unwrap(), BookingStatus::Approved);
        assert_eq!(advance(id, BookingStatus::Pending, Transition::Reject).unwrap(), BookingStatus::Rejected);
        assert_eq!(advance(id, BookingStatus::Pending, Transition::Expire).unwrap(), BookingStatus::Cancelled);
        assert_eq!(advance(id, BookingStatus::Approved, Transition::Cancel).unwrap(), BookingStatus::Cancelled);
        assert_eq!(advance(id, BookingStatus::Approved, Transition::CheckIn).unwrap(), BookingStatus::Utilized);
        assert_eq!(advance(id, BookingStatus::Approved, Transition::Release).unwrap(), BookingStatus::Released);
    }

    #[test]
    fn terminal_states_never_reopen() {
        for from in BookingStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            for t in ALL_TRANSITIONS {
                let err = advance(BookingId(9), from, t).unwrap_err();
                assert!(matches!(err, EngineError::InvalidTransition { .. }), "{from} via {t:?}");
            }
        }
    }

    #[test]
    fn required_states_agree_with_advance() {
        for from in BookingStatus::ALL {
            for t in ALL_TRANSITIONS {
                assert_eq!(
                    advance(BookingId(1), from, t).is_ok(),
                    t.required().contains(&from),
                    "{from} via {t:?}"
                );
            }
        }
    }

    #[test]
    fn approving_twice_names_pending_as_required() {
        match advance(BookingId(4), BookingStatus::Approved, Transition::Approve) {
            Err(EngineError::InvalidTransition { from, required, .. }) => {
                assert_eq!(from, BookingStatus::Approved);
                assert_eq!(required, &[BookingStatus::Pending]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
