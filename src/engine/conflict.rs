use chrono::Duration;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// Half-open overlap: `[a_start, a_end)` and `[b_start, b_end)` intersect.
/// Back-to-back intervals do not overlap.
pub fn overlaps(a_start: Timestamp, a_end: Timestamp, b_start: Timestamp, b_end: Timestamp) -> bool {
    a_start < b_end && b_start < a_end
}

/// First `approved` booking on the resource overlapping `span`.
pub(crate) fn approved_overlap<'a>(rs: &'a ResourceState, span: &Span) -> Option<&'a Booking> {
    rs.overlapping(span)
        .find(|b| b.status == BookingStatus::Approved)
}

/// `pending` bookings overlapping `span`, excluding `exclude`.
pub(crate) fn pending_conflicts(rs: &ResourceState, span: &Span, exclude: BookingId) -> Vec<BookingId> {
    rs.overlapping(span)
        .filter(|b| b.status == BookingStatus::Pending && b.id != exclude)
        .map(|b| b.id)
        .collect()
}

/// Shape checks that need no calendar or store: ordering, future start,
/// size limits.
pub(crate) fn validate_request(req: &BookingRequest, now: Timestamp) -> Result<Span, EngineError> {
    if req.end <= req.start {
        return Err(EngineError::invalid_input("end time must be after start time"));
    }
    if req.start <= now {
        return Err(EngineError::invalid_input("start time must be in the future"));
    }
    if req.end - req.start > Duration::hours(MAX_BOOKING_HOURS) {
        return Err(EngineError::LimitExceeded("booking too long"));
    }
    if req.purpose.trim().len() > MAX_PURPOSE_LEN {
        return Err(EngineError::LimitExceeded("purpose too long"));
    }
    Ok(Span::new(req.start, req.end))
}

pub(crate) fn validate_reason(reason: Option<String>) -> Result<Option<String>, EngineError> {
    let reason = reason
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty());
    if let Some(ref r) = reason
        && r.len() > MAX_REASON_LEN {
            return Err(EngineError::LimitExceeded("reason too long"));
        }
    Ok(reason)
}
