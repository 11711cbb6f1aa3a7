use chrono::Duration;

use crate::calendar::CalendarPolicy;
use crate::limits::MAX_SUGGESTIONS;
use crate::model::*;

use super::{Engine, EngineError};

/// Greedy forward scan for free start times.
///
/// `approved` must be sorted by start and pairwise disjoint. Candidates that
/// break the calendar snap to the next day's opening; candidates blocked by
/// an approved booking jump to that booking's end; free candidates are
/// recorded and the cursor moves on by one hour. The scan stops at `limit`
/// suggestions or once the cursor passes `desired_start + horizon`.
/// A `limit` of zero asks for nothing and gets an empty list.
pub fn suggest_slots(
    policy: &CalendarPolicy,
    approved: &[Span],
    desired_start: Timestamp,
    duration: Duration,
    limit: usize,
    horizon: Duration,
) -> Result<Vec<Timestamp>, EngineError> {
    if duration <= Duration::zero() {
        return Err(EngineError::invalid_input("duration must be positive"));
    }
    if limit == 0 {
        return Ok(Vec::new());
    }
    let cutoff = desired_start + horizon;
    let mut suggestions = Vec::with_capacity(limit);
    let mut candidate = desired_start;
    let mut idx = 0;

    while suggestions.len() < limit && candidate <= cutoff {
        let window = Span::new(candidate, candidate + duration);
        if policy.check_window(&window).is_err() {
            candidate = policy.next_opening(candidate);
            continue;
        }

        while idx < approved.len() && approved[idx].end <= candidate {
            idx += 1;
        }

        if let Some(blocking) = approved.get(idx)
            && blocking.start < window.end {
                candidate = blocking.end;
                continue;
            }

        suggestions.push(candidate);
        candidate += Duration::hours(1);
    }

    if suggestions.is_empty() {
        return Err(EngineError::NoSlotsFound);
    }
    Ok(suggestions)
}

impl Engine {
    /// Alternative start times for `duration` on a resource, from its current
    /// approved bookings.
    pub async fn suggest_slots(
        &self,
        resource_id: ResourceId,
        desired_start: Timestamp,
        duration: Duration,
        limit: usize,
    ) -> Result<Vec<Timestamp>, EngineError> {
        if limit > MAX_SUGGESTIONS {
            return Err(EngineError::LimitExceeded("too many suggestions requested"));
        }
        let rs = self
            .store
            .get_resource(&resource_id)
            .ok_or(EngineError::ResourceNotFound(resource_id))?;
        let guard = rs.read().await;
        let approved = approved_spans_after(&guard, desired_start);
        suggest_slots(
            &self.config.policy,
            &approved,
            desired_start,
            duration,
            limit,
            self.config.horizon,
        )
    }
}

/// Approved spans ending after `after`, ascending by start.
pub(crate) fn approved_spans_after(rs: &ResourceState, after: Timestamp) -> Vec<Span> {
    rs.bookings
        .iter()
        .filter(|b| b.status == BookingStatus::Approved && b.span.end > after)
        .map(|b| b.span)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use chrono_tz::Asia::Kolkata;
    use proptest::prelude::*;

    fn ist(d: u32, h: u32, m: u32) -> Timestamp {
        Kolkata
            .with_ymd_and_hms(2025, 6, d, h, m, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn week() -> Duration {
        Duration::days(7)
    }

    #[test]
    fn zero_limit_is_empty_not_exhausted() {
        let policy = CalendarPolicy::default();
        let got = suggest_slots(&policy, &[], ist(2, 10, 0), Duration::hours(1), 0, week()).unwrap();
        assert!(got.is_empty());
    }

    #[test]
    fn jumps_past_blocking_booking() {
        let policy = CalendarPolicy::default();
        let approved = [Span::new(ist(2, 10, 0), ist(2, 12, 0))];
        let got = suggest_slots(&policy, &approved, ist(2, 10, 30), Duration::hours(1), 4, week()).unwrap();
        assert_eq!(got, vec![ist(2, 12, 0), ist(2, 13, 0), ist(2, 14, 0), ist(2, 15, 0)]);
    }

    #[test]
    fn rolls_over_to_next_working_day() {
        let policy = CalendarPolicy::default();
        let approved = [Span::new(ist(2, 14, 0), ist(2, 17, 0))];
        let got = suggest_slots(&policy, &approved, ist(2, 14, 0), Duration::hours(2), 3, week()).unwrap();
        assert_eq!(got, vec![ist(3, 9, 0), ist(3, 10, 0), ist(3, 11, 0)]);
    }

    #[test]
    fn skips_weekends_and_holidays() {
        let holiday = chrono::NaiveDate::from_ymd_opt(2025, 6, 9).unwrap();
        let policy = CalendarPolicy::default().with_holidays([holiday]);
        // Friday 16:00, two hours wanted: Friday is out, Sat/Sun/Mon (holiday) skipped.
        let got = suggest_slots(&policy, &[], ist(6, 16, 0), Duration::hours(2), 1, week()).unwrap();
        assert_eq!(got, vec![ist(10, 9, 0)]);
    }

    #[test]
    fn squeezes_between_back_to_back_gaps() {
        let policy = CalendarPolicy::default();
        let approved = [
            Span::new(ist(2, 9, 0), ist(2, 10, 0)),
            Span::new(ist(2, 11, 0), ist(2, 12, 0)),
            Span::new(ist(2, 12, 0), ist(2, 16, 0)),
        ];
        let got = suggest_slots(&policy, &approved, ist(2, 9, 0), Duration::hours(1), 2, week()).unwrap();
        assert_eq!(got, vec![ist(2, 10, 0), ist(2, 16, 0)]);
    }

    #[test]
    fn exhausted_horizon_is_no_slots_found() {
        let policy = CalendarPolicy::default();
        // Fully booked for more than a week.
        let approved: Vec<Span> = (2..=12)
            .map(|d| Span::new(ist(d, 9, 0), ist(d, 17, 0)))
            .collect();
        let err = suggest_slots(&policy, &approved, ist(2, 9, 0), Duration::hours(1), 4, week()).unwrap_err();
        assert!(matches!(err, EngineError::NoSlotsFound));
    }

    #[test]
    fn longer_than_working_day_never_fits() {
        let policy = CalendarPolicy::default();
        let err = suggest_slots(&policy, &[], ist(2, 9, 0), Duration::hours(9), 4, week()).unwrap_err();
        assert!(matches!(err, EngineError::NoSlotsFound));
    }

    proptest! {
        #[test]
        fn suggestions_are_valid_free_and_increasing(
            busy in proptest::collection::btree_set((2u32..=13, 9u32..17), 0..30),
            start_day in 2u32..=6,
            start_hour in 9u32..17,
            hours in 1i64..4,
        ) {
            let policy = CalendarPolicy::default();
            let approved: Vec<Span> = busy
                .iter()
                .map(|&(d, h)| Span::new(ist(d, h, 0), ist(d, h, 0) + Duration::hours(1)))
                .collect();
            let duration = Duration::hours(hours);
            let desired = ist(start_day, start_hour, 0);
            if let Ok(got) = suggest_slots(&policy, &approved, desired, duration, 4, week()) {
                prop_assert!(got.len() <= 4);
                for pair in got.windows(2) {
                    prop_assert!(pair[0] < pair[1]);
                }
                for s in &got {
                    let window = Span::new(*s, *s + duration);
                    prop_assert!(policy.check_window(&window).is_ok());
                    prop_assert!(approved.iter().all(|a| !a.overlaps(&window)));
                    prop_assert!(*s >= desired);
                }
            }
        }
    }
}
