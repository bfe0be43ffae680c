use chrono::{DateTime, Duration, Months, Utc};

use crate::{
    error::{Result, SchedulerError},
    types::{IntervalUnit, Schedule},
};

impl Schedule {
    /// Reject schedules that could never advance.
    pub fn validate(&self) -> Result<()> {
        if self.interval_value == 0 {
            return Err(SchedulerError::InvalidSchedule(
                "interval_value must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// The instant one interval after `from`.
    ///
    /// Month steps keep the day of month where it exists and clamp to the
    /// last day otherwise (Jan 31 + 1 month = Feb 28/29).
    pub fn apply(&self, from: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let n = i64::from(self.interval_value);
        let next = match self.interval_unit {
            IntervalUnit::Minutes => from.checked_add_signed(Duration::minutes(n)),
            IntervalUnit::Hours => from.checked_add_signed(Duration::hours(n)),
            IntervalUnit::Days => from.checked_add_signed(Duration::days(n)),
            IntervalUnit::Weeks => from.checked_add_signed(Duration::weeks(n)),
            IntervalUnit::Months => from.checked_add_months(Months::new(self.interval_value)),
        };
        next.ok_or_else(|| {
            SchedulerError::InvalidSchedule(format!(
                "{} {} after {from} is out of range",
                self.interval_value, self.interval_unit
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn fixed_units() {
        let from = at(2026, 3, 1, 12, 0);
        assert_eq!(
            Schedule::new(15, IntervalUnit::Minutes).apply(from).unwrap(),
            at(2026, 3, 1, 12, 15)
        );
        assert_eq!(
            Schedule::new(36, IntervalUnit::Hours).apply(from).unwrap(),
            at(2026, 3, 3, 0, 0)
        );
        assert_eq!(
            Schedule::new(2, IntervalUnit::Days).apply(from).unwrap(),
            at(2026, 3, 3, 12, 0)
        );
        assert_eq!(
            Schedule::new(1, IntervalUnit::Weeks).apply(from).unwrap(),
            at(2026, 3, 8, 12, 0)
        );
    }

    #[test]
    fn months_clamp_to_month_end() {
        let schedule = Schedule::new(1, IntervalUnit::Months);
        assert_eq!(
            schedule.apply(at(2026, 1, 31, 6, 0)).unwrap(),
            at(2026, 2, 28, 6, 0)
        );
        assert_eq!(
            schedule.apply(at(2026, 4, 15, 6, 0)).unwrap(),
            at(2026, 5, 15, 6, 0)
        );
    }

    #[test]
    fn zero_interval_is_invalid() {
        assert!(Schedule::new(0, IntervalUnit::Days).validate().is_err());
        assert!(Schedule::new(1, IntervalUnit::Days).validate().is_ok());
    }
}
