//! Update calendar
//!
//! The continuous mode syncs once a day at a fixed local time, but only in
//! the update months (by default the first month of each quarter).

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use std::fmt;

/// Default update months: January, April, July, October
pub const DEFAULT_UPDATE_MONTHS: [u32; 4] = [1, 4, 7, 10];

/// True when `date` falls in one of the update months.
pub fn is_update_window(date: NaiveDate, months: &[u32]) -> bool {
    months.contains(&date.month())
}

/// A calendar month in which scheduled syncs run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct WindowMonth {
    pub year: i32,
    pub month: u32,
}

impl WindowMonth {
    fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    fn next(self) -> Self {
        if self.month == 12 {
            Self { year: self.year + 1, month: 1 }
        } else {
            Self { year: self.year, month: self.month + 1 }
        }
    }

    fn first_day(self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }
}

impl fmt::Display for WindowMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Update months that opened after `last_run` and before `now` without any
/// run in them.
///
/// A month counts as opened once its first trigger time has passed. The
/// month of `last_run` itself already had a run and is never reported.
pub fn missed_windows(
    last_run: NaiveDateTime,
    now: NaiveDateTime,
    months: &[u32],
    at: NaiveTime,
) -> Vec<WindowMonth> {
    let mut missed = Vec::new();
    if now <= last_run {
        return missed;
    }

    let last = WindowMonth::of(now.date());
    let mut cursor = WindowMonth::of(last_run.date()).next();
    while cursor <= last {
        let opened = cursor
            .first_day()
            .map(|d| d.and_time(at) <= now)
            .unwrap_or(false);
        if opened && months.contains(&cursor.month) {
            missed.push(cursor);
        }
        cursor = cursor.next();
    }
    missed
}

/// Fires at most once per calendar day, on the first poll at or after the
/// configured time of day.
#[derive(Debug, Clone)]
pub struct DailyTrigger {
    at: NaiveTime,
    last_fired: Option<NaiveDate>,
}

impl DailyTrigger {
    /// Creates a trigger armed relative to `now`: if today's time has already
    /// passed, the first firing is tomorrow.
    pub fn new(at: NaiveTime, now: NaiveDateTime) -> Self {
        let last_fired = (now.time() >= at).then(|| now.date());
        Self { at, last_fired }
    }

    pub fn at(&self) -> NaiveTime {
        self.at
    }

    /// Returns true when the trigger fires for this poll.
    pub fn poll(&mut self, now: NaiveDateTime) -> bool {
        let today = now.date();
        if now.time() < self.at || self.last_fired == Some(today) {
            return false;
        }
        self.last_fired = Some(today);
        true
    }

    /// Next instant at which `poll` would fire.
    pub fn next_fire(&self, now: NaiveDateTime) -> NaiveDateTime {
        let today = now.date();
        if self.last_fired != Some(today) && now.time() < self.at {
            return today.and_time(self.at);
        }
        if self.last_fired != Some(today) {
            return now;
        }
        today
            .succ_opt()
            .map(|d| d.and_time(self.at))
            .unwrap_or(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn two_am() -> NaiveTime {
        NaiveTime::from_hms_opt(2, 0, 0).unwrap()
    }

    #[test]
    fn test_quarter_months_are_windows() {
        let months = DEFAULT_UPDATE_MONTHS;
        for m in 1..=12 {
            let date = NaiveDate::from_ymd_opt(2025, m, 15).unwrap();
            assert_eq!(is_update_window(date, &months), [1, 4, 7, 10].contains(&m), "month {m}");
        }
        assert!(!is_update_window(NaiveDate::from_ymd_opt(2025, 4, 1).unwrap(), &[]));
    }

    #[test]
    fn test_trigger_fires_once_per_day() {
        let mut trigger = DailyTrigger::new(two_am(), dt("2025-04-01 00:30"));

        assert!(!trigger.poll(dt("2025-04-01 01:59")));
        assert!(trigger.poll(dt("2025-04-01 02:00")));
        assert!(!trigger.poll(dt("2025-04-01 02:01")));
        assert!(!trigger.poll(dt("2025-04-01 23:59")));
        assert!(!trigger.poll(dt("2025-04-02 01:00")));
        assert!(trigger.poll(dt("2025-04-02 02:03")));
    }

    #[test]
    fn test_trigger_started_after_time_waits_for_tomorrow() {
        let now = dt("2025-04-01 10:00");
        let mut trigger = DailyTrigger::new(two_am(), now);

        assert!(!trigger.poll(dt("2025-04-01 10:01")));
        assert_eq!(trigger.next_fire(now), dt("2025-04-02 02:00"));
        assert!(trigger.poll(dt("2025-04-02 02:00")));
    }

    #[test]
    fn test_next_fire_before_time() {
        let now = dt("2025-04-01 01:00");
        let trigger = DailyTrigger::new(two_am(), now);
        assert_eq!(trigger.next_fire(now), dt("2025-04-01 02:00"));
    }

    #[test]
    fn test_missed_windows_across_quarters() {
        let missed = missed_windows(
            dt("2024-12-20 02:00"),
            dt("2025-07-01 03:00"),
            &DEFAULT_UPDATE_MONTHS,
            two_am(),
        );
        let labels: Vec<String> = missed.iter().map(|w| w.to_string()).collect();
        assert_eq!(labels, vec!["2025-01", "2025-04", "2025-07"]);
    }

    #[test]
    fn test_window_not_yet_opened_is_not_missed() {
        let missed = missed_windows(
            dt("2025-05-10 02:00"),
            dt("2025-07-01 01:00"),
            &DEFAULT_UPDATE_MONTHS,
            two_am(),
        );
        assert!(missed.is_empty());
    }

    #[test]
    fn test_run_month_is_never_missed() {
        let missed = missed_windows(
            dt("2025-04-01 02:00"),
            dt("2025-04-28 12:00"),
            &DEFAULT_UPDATE_MONTHS,
            two_am(),
        );
        assert!(missed.is_empty());
        assert!(missed_windows(dt("2025-04-02 00:00"), dt("2025-04-01 00:00"), &[4], two_am()).is_empty());
    }
}
