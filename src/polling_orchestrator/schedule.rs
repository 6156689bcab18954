//! Daily reboot schedule
//!
//! Fires once per local calendar date, during the configured hour.

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;

/// Once-a-day trigger evaluated on every polling iteration
#[derive(Debug, Clone)]
pub struct DailyRebootSchedule {
    hour: Option<u32>,
    tz: Tz,
    last_date: Option<NaiveDate>,
}

impl DailyRebootSchedule {
    /// `hour` in 0..=23 local to `tz`; `None` disables the schedule
    pub fn new(hour: Option<u32>, tz: Tz) -> Self {
        Self {
            hour,
            tz,
            last_date: None,
        }
    }

    /// Local date to reboot for, if the reboot is due at `now`
    pub fn due_date(&self, now: DateTime<Utc>) -> Option<NaiveDate> {
        let hour = self.hour?;
        let local = now.with_timezone(&self.tz);
        let today = local.date_naive();

        if local.hour() == hour && self.last_date != Some(today) {
            Some(today)
        } else {
            None
        }
    }

    pub fn mark_done(&mut self, date: NaiveDate) {
        self.last_date = Some(date);
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.last_date
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Asia::Tokyo;

    #[test]
    fn test_due_during_local_hour() {
        let schedule = DailyRebootSchedule::new(Some(3), Tokyo);

        // 2026-01-09 18:30 UTC = 2026-01-10 03:30 JST
        let now = Utc.with_ymd_and_hms(2026, 1, 9, 18, 30, 0).unwrap();
        assert_eq!(
            schedule.due_date(now),
            NaiveDate::from_ymd_opt(2026, 1, 10)
        );
    }

    #[test]
    fn test_not_due_outside_hour() {
        let schedule = DailyRebootSchedule::new(Some(3), Tokyo);

        // 03:30 UTC = 12:30 JST
        let now = Utc.with_ymd_and_hms(2026, 1, 10, 3, 30, 0).unwrap();
        assert_eq!(schedule.due_date(now), None);
    }

    #[test]
    fn test_fires_once_per_date() {
        let mut schedule = DailyRebootSchedule::new(Some(3), Tokyo);

        let first = Utc.with_ymd_and_hms(2026, 1, 9, 18, 0, 5).unwrap();
        let date = schedule.due_date(first).unwrap();
        schedule.mark_done(date);
        assert_eq!(schedule.last_date(), Some(date));

        let later_same_hour = Utc.with_ymd_and_hms(2026, 1, 9, 18, 59, 0).unwrap();
        assert_eq!(schedule.due_date(later_same_hour), None);

        let next_day = Utc.with_ymd_and_hms(2026, 1, 10, 18, 0, 5).unwrap();
        assert_eq!(
            schedule.due_date(next_day),
            NaiveDate::from_ymd_opt(2026, 1, 11)
        );
    }

    #[test]
    fn test_disabled_schedule_never_fires() {
        let schedule = DailyRebootSchedule::new(None, Tokyo);
        let now = Utc.with_ymd_and_hms(2026, 1, 9, 18, 0, 0).unwrap();
        assert_eq!(schedule.due_date(now), None);
    }
}
