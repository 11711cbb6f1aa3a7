//! Organisational calendar: which intervals may be booked at all.
//!
//! Every check converts to the organisation's zone first, so callers may
//! hand in instants from any zone. All functions here are pure given the
//! policy value.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;

use crate::config::ConfigError;
use crate::model::{Span, Timestamp};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("bookings are not allowed on weekends ({0})")]
    Weekend(NaiveDate),
    #[error("bookings are not allowed on public holidays ({0})")]
    Holiday(NaiveDate),
    #[error("start time must be between {open:02}:00 and {close:02}:00")]
    StartOutsideHours { open: u32, close: u32 },
    #[error("end time must be no later than {close:02}:00 on the day the booking starts")]
    EndOutsideHours { close: u32 },
    #[error("bookings must start exactly at the top of the hour")]
    NotHourAligned,
    #[error("booking duration must be a whole number of hours")]
    NotWholeHours,
}

#[derive(Debug, Clone)]
pub struct CalendarPolicy {
    tz: Tz,
    open_hour: u32,
    close_hour: u32,
    holidays: BTreeSet<NaiveDate>,
}

impl Default for CalendarPolicy {
    fn default() -> Self {
        Self {
            tz: chrono_tz::Asia::Kolkata,
            open_hour: 9,
            close_hour: 17,
            holidays: BTreeSet::new(),
        }
    }
}

impl CalendarPolicy {
    /// Working window is `[open_hour:00, close_hour:00]` local time.
    pub fn new(tz: Tz, open_hour: u32, close_hour: u32) -> Result<Self, ConfigError> {
        if open_hour >= close_hour || close_hour > 24 {
            return Err(ConfigError::InvalidHours { open: open_hour, close: close_hour });
        }
        Ok(Self {
            tz,
            open_hour,
            close_hour,
            holidays: BTreeSet::new(),
        })
    }

    pub fn with_holidays(mut self, holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        self.holidays.extend(holidays);
        self
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    pub fn open_hour(&self) -> u32 {
        self.open_hour
    }

    pub fn close_hour(&self) -> u32 {
        self.close_hour
    }

    pub fn holidays(&self) -> &BTreeSet<NaiveDate> {
        &self.holidays
    }

    pub fn local(&self, t: Timestamp) -> DateTime<Tz> {
        t.with_timezone(&self.tz)
    }

    /// Weekday and not a configured holiday (exact date match).
    pub fn check_allowed_date(&self, t: Timestamp) -> Result<(), PolicyError> {
        let date = self.local(t).date_naive();
        if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            return Err(PolicyError::Weekend(date));
        }
        if self.holidays.contains(&date) {
            return Err(PolicyError::Holiday(date));
        }
        Ok(())
    }

    /// Start hour in `[open, close)`, end no later than `close:00:00` on the
    /// same local day. An end of exactly `close:00:00` is allowed.
    pub fn check_working_window(&self, span: &Span) -> Result<(), PolicyError> {
        let start = self.local(span.start);
        if start.hour() < self.open_hour || start.hour() >= self.close_hour {
            return Err(PolicyError::StartOutsideHours {
                open: self.open_hour,
                close: self.close_hour,
            });
        }
        let day_start = start.date_naive().and_time(NaiveTime::MIN);
        let end = self.local(span.end).naive_local();
        if end - day_start > Duration::hours(self.close_hour as i64) {
            return Err(PolicyError::EndOutsideHours {
                close: self.close_hour,
            });
        }
        Ok(())
    }

    /// Working window plus allowed date. This is what the slot suggester honours.
    pub fn check_window(&self, span: &Span) -> Result<(), PolicyError> {
        self.check_working_window(span)?;
        self.check_allowed_date(span.start)
    }

    /// Start on a local hour boundary and a positive whole-hour duration.
    pub fn check_alignment(&self, span: &Span) -> Result<(), PolicyError> {
        let start = self.local(span.start);
        if start.minute() != 0 || start.second() != 0 || start.nanosecond() != 0 {
            return Err(PolicyError::NotHourAligned);
        }
        let duration = span.duration();
        if duration <= Duration::zero()
            || duration.num_seconds() % 3600 != 0
            || duration.subsec_nanos() != 0
        {
            return Err(PolicyError::NotWholeHours);
        }
        Ok(())
    }

    /// Every calendar rule at once.
    pub fn check(&self, span: &Span) -> Result<(), PolicyError> {
        self.check_window(span)?;
        self.check_alignment(span)
    }

    /// Opening time of the local day after `t`.
    pub fn next_opening(&self, t: Timestamp) -> Timestamp {
        let date = self.local(t).date_naive();
        let next = date.succ_opt().unwrap_or(NaiveDate::MAX);
        self.resolve(next.and_time(NaiveTime::MIN) + Duration::hours(self.open_hour as i64))
    }

    /// `t` truncated to the top of its local hour.
    pub fn top_of_hour(&self, t: Timestamp) -> Timestamp {
        let local = self.local(t).naive_local();
        self.resolve(local.date().and_time(NaiveTime::MIN) + Duration::hours(local.hour() as i64))
    }

    pub fn local_hour(&self, t: Timestamp) -> u32 {
        self.local(t).hour()
    }

    fn resolve(&self, naive: NaiveDateTime) -> Timestamp {
        match self.tz.from_local_datetime(&naive) {
            LocalResult::Single(t) | LocalResult::Ambiguous(t, _) => t.with_timezone(&Utc),
            // Inside a DST gap: the wall-clock time does not exist, take the instant after it.
            LocalResult::None => match self.tz.from_local_datetime(&(naive + Duration::hours(1))) {
                LocalResult::Single(t) | LocalResult::Ambiguous(t, _) => t.with_timezone(&Utc),
                LocalResult::None => naive.and_utc(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Asia::Kolkata;

    fn ist(d: u32, h: u32, m: u32, s: u32) -> Timestamp {
        Kolkata
            .with_ymd_and_hms(2025, 6, d, h, m, s)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn span(a: Timestamp, b: Timestamp) -> Span {
        Span::new(a, b)
    }

    #[test]
    fn end_exactly_at_close_is_allowed() {
        let p = CalendarPolicy::default();
        assert_eq!(p.check(&span(ist(2, 16, 0, 0), ist(2, 17, 0, 0))), Ok(()));
    }

    #[test]
    fn end_one_second_past_close_is_rejected() {
        let p = CalendarPolicy::default();
        assert_eq!(
            p.check_working_window(&span(ist(2, 16, 0, 0), ist(2, 17, 0, 1))),
            Err(PolicyError::EndOutsideHours { close: 17 })
        );
    }

    #[test]
    fn start_at_close_or_before_open_is_rejected() {
        let p = CalendarPolicy::default();
        let err = PolicyError::StartOutsideHours { open: 9, close: 17 };
        assert_eq!(p.check_working_window(&span(ist(2, 17, 0, 0), ist(2, 18, 0, 0))), Err(err.clone()));
        assert_eq!(p.check_working_window(&span(ist(2, 8, 0, 0), ist(2, 10, 0, 0))), Err(err));
    }

    #[test]
    fn interval_crossing_midnight_is_rejected() {
        let p = CalendarPolicy::default();
        assert!(matches!(
            p.check_working_window(&span(ist(2, 16, 0, 0), ist(3, 10, 0, 0))),
            Err(PolicyError::EndOutsideHours { .. })
        ));
    }

    #[test]
    fn weekends_and_holidays_are_rejected() {
        let holiday = NaiveDate::from_ymd_opt(2025, 6, 4).unwrap();
        let p = CalendarPolicy::default().with_holidays([holiday]);
        // 2025-06-07 is a Saturday.
        assert_eq!(
            p.check_allowed_date(ist(7, 10, 0, 0)),
            Err(PolicyError::Weekend(NaiveDate::from_ymd_opt(2025, 6, 7).unwrap()))
        );
        assert_eq!(p.check_allowed_date(ist(4, 10, 0, 0)), Err(PolicyError::Holiday(holiday)));
        // Exact date match only.
        assert_eq!(p.check_allowed_date(ist(5, 10, 0, 0)), Ok(()));
    }

    #[test]
    fn alignment_requires_top_of_hour_and_whole_hours() {
        let p = CalendarPolicy::default();
        assert_eq!(
            p.check_alignment(&span(ist(2, 10, 30, 0), ist(2, 11, 30, 0))),
            Err(PolicyError::NotHourAligned)
        );
        assert_eq!(
            p.check_alignment(&span(ist(2, 10, 0, 0), ist(2, 11, 30, 0))),
            Err(PolicyError::NotWholeHours)
        );
        assert_eq!(p.check_alignment(&span(ist(2, 10, 0, 0), ist(2, 12, 0, 0))), Ok(()));
    }

    #[test]
    fn evaluation_happens_in_the_organisation_zone() {
        let p = CalendarPolicy::default();
        // 03:30 UTC is 09:00 IST on a Monday.
        let start = Utc.with_ymd_and_hms(2025, 6, 2, 3, 30, 0).unwrap();
        assert_eq!(p.check(&span(start, start + Duration::hours(1))), Ok(()));
        // 09:00 UTC is 14:30 IST, not on a local hour boundary.
        let start = Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap();
        assert_eq!(
            p.check(&span(start, start + Duration::hours(1))),
            Err(PolicyError::NotHourAligned)
        );
    }

    #[test]
    fn next_opening_is_next_local_morning() {
        let p = CalendarPolicy::default();
        assert_eq!(p.next_opening(ist(2, 16, 0, 0)), ist(3, 9, 0, 0));
        assert_eq!(p.next_opening(ist(2, 23, 30, 0)), ist(3, 9, 0, 0));
        // 20:00 UTC on the 2nd is already 01:30 IST on the 3rd.
        let late_utc = Utc.with_ymd_and_hms(2025, 6, 2, 20, 0, 0).unwrap();
        assert_eq!(p.next_opening(late_utc), ist(4, 9, 0, 0));
    }

    #[test]
    fn top_of_hour_truncates_in_local_time() {
        let p = CalendarPolicy::default();
        assert_eq!(p.top_of_hour(ist(2, 10, 47, 12)), ist(2, 10, 0, 0));
    }

    #[test]
    fn invalid_hour_window_is_a_config_error() {
        assert!(CalendarPolicy::new(Kolkata, 17, 9).is_err());
        assert!(CalendarPolicy::new(Kolkata, 9, 25).is_err());
        assert!(CalendarPolicy::new(Kolkata, 9, 17).is_ok());
    }
}
