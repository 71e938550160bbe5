//! Clock and calendar helpers.
//!
//! Every schedule and invoice-date computation in the service goes through
//! this module. Send days above 28 are treated as 28 everywhere so that short
//! months never produce an invalid date; callers never re-derive the cap.

use crate::error::BillingError;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use std::sync::RwLock;

/// Highest day-of-month a cycle can start on.
pub const MAX_SEND_DAY: u32 = 28;

/// Source of "now". Injected so the scheduler and engine can run on a fake clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock in UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        let mut guard = self.now.write().unwrap_or_else(|e| e.into_inner());
        *guard = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.write().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap_or_else(|e| e.into_inner())
    }
}

/// The day a cycle actually starts on for a configured send day.
pub fn effective_send_day(send_day: u32) -> u32 {
    send_day.clamp(1, MAX_SEND_DAY)
}

/// Whether `now` falls on the first day of the client's cycle.
pub fn is_cycle_day(send_day: u32, now: DateTime<Utc>) -> bool {
    now.day() == effective_send_day(send_day)
}

/// Midnight UTC at the start of `date`.
pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::default()))
}

fn ensure_send_day(send_day: u32) -> Result<(), BillingError> {
    if !(1..=31).contains(&send_day) {
        return Err(BillingError::InvalidConfiguration(format!(
            "send day must be within 1..=31 (got {})",
            send_day
        )));
    }
    Ok(())
}

fn ensure_hour(hour: u32) -> Result<(), BillingError> {
    if hour > 23 {
        return Err(BillingError::InvalidConfiguration(format!(
            "hour must be within 0..=23 (got {})",
            hour
        )));
    }
    Ok(())
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

fn date(year: i32, month: u32, day: u32) -> Result<NaiveDate, BillingError> {
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
        BillingError::InvalidConfiguration(format!("no such date {}-{:02}-{:02}", year, month, day))
    })
}

/// Invoice-sent date of the cycle `now` belongs to.
///
/// Up to and including the send day the cycle is this month's; after it the
/// next month's (rolling the year over in December).
pub fn invoice_date_for_cycle(
    send_day: u32,
    now: DateTime<Utc>,
) -> Result<NaiveDate, BillingError> {
    ensure_send_day(send_day)?;
    let day = effective_send_day(send_day);

    if now.day() <= send_day {
        date(now.year(), now.month(), day)
    } else {
        let (year, month) = next_month(now.year(), now.month());
        date(year, month, day)
    }
}

/// First `(day, hour):00` strictly after `after`.
pub fn next_monthly_occurrence(
    send_day: u32,
    hour: u32,
    after: DateTime<Utc>,
) -> Result<DateTime<Utc>, BillingError> {
    ensure_send_day(send_day)?;
    ensure_hour(hour)?;
    let day = effective_send_day(send_day);

    let this_month = start_of_day(date(after.year(), after.month(), day)?)
        + Duration::hours(i64::from(hour));
    if this_month > after {
        return Ok(this_month);
    }

    let (year, month) = next_month(after.year(), after.month());
    Ok(start_of_day(date(year, month, day)?) + Duration::hours(i64::from(hour)))
}

/// First `hour:00` strictly after `after`.
pub fn next_daily_occurrence(hour: u32, after: DateTime<Utc>) -> Result<DateTime<Utc>, BillingError> {
    ensure_hour(hour)?;

    let today = start_of_day(after.date_naive()) + Duration::hours(i64::from(hour));
    if today > after {
        Ok(today)
    } else {
        Ok(today + Duration::days(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn send_day_31_in_february_caps_at_28() {
        let date = invoice_date_for_cycle(31, at(2025, 2, 15, 10)).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2025, 2, 28).unwrap());
    }

    #[test]
    fn on_send_day_cycle_is_current_month() {
        let date = invoice_date_for_cycle(10, at(2025, 6, 10, 23)).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2025, 6, 10).unwrap());
    }

    #[test]
    fn after_send_day_rolls_to_next_month() {
        let date = invoice_date_for_cycle(5, at(2025, 6, 6, 0)).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2025, 7, 5).unwrap());
    }

    #[test]
    fn december_rolls_into_next_year() {
        let date = invoice_date_for_cycle(1, at(2025, 12, 2, 0)).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
    }

    #[test]
    fn invalid_send_day_is_configuration_error() {
        assert!(matches!(
            invoice_date_for_cycle(0, at(2025, 1, 1, 0)),
            Err(BillingError::InvalidConfiguration(_))
        ));
        assert!(invoice_date_for_cycle(32, at(2025, 1, 1, 0)).is_err());
    }

    #[test]
    fn cycle_day_uses_the_cap() {
        assert!(is_cycle_day(30, at(2025, 4, 28, 0)));
        assert!(!is_cycle_day(30, at(2025, 4, 30, 0)));
        assert!(is_cycle_day(15, at(2025, 4, 15, 12)));
    }

    #[test]
    fn monthly_occurrence_is_strictly_after() {
        let fire = next_monthly_occurrence(15, 9, at(2025, 3, 15, 9)).unwrap();
        assert_eq!(fire, at(2025, 4, 15, 9));

        let fire = next_monthly_occurrence(15, 9, at(2025, 3, 15, 8)).unwrap();
        assert_eq!(fire, at(2025, 3, 15, 9));

        let fire = next_monthly_occurrence(31, 9, at(2025, 12, 29, 0)).unwrap();
        assert_eq!(fire, at(2026, 1, 28, 9));
    }

    #[test]
    fn daily_occurrence_rolls_over_midnight() {
        assert_eq!(
            next_daily_occurrence(0, at(2025, 3, 15, 0)).unwrap(),
            at(2025, 3, 16, 0)
        );
        assert_eq!(
            next_daily_occurrence(6, at(2025, 3, 15, 5)).unwrap(),
            at(2025, 3, 15, 6)
        );
        assert!(next_daily_occurrence(24, at(2025, 3, 15, 5)).is_err());
    }

    #[test]
    fn manual_clock_moves_only_when_told() {
        let clock = ManualClock::new(at(2025, 1, 1, 0));
        assert_eq!(clock.now(), at(2025, 1, 1, 0));
        clock.advance(Duration::hours(5));
        assert_eq!(clock.now(), at(2025, 1, 1, 5));
        clock.set(at(2025, 2, 1, 0));
        assert_eq!(clock.now(), at(2025, 2, 1, 0));
    }
}
