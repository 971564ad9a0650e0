use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, TimeZone, Utc, Weekday};
use tracing::debug;

use crate::error::CoreError;
use crate::models::{Interval, IntervalUnit, MonthOccurrence, RecurrenceMode, RecurrenceTemplate};

/// RecurrenceCalculator: pure date arithmetic for recurrence templates.
///
/// Responsibilities:
/// 1. Validate interval values before touching any date
/// 2. Apply intervals in order with month-end clamping
/// 3. Resolve "nth weekday of month" rules
///
/// All operations preserve the time of day of the base date.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecurrenceCalculator;

impl RecurrenceCalculator {
    /// Calculates the next occurrence of `template` after `base`.
    ///
    /// # Arguments
    ///
    /// * `template` - The recurrence template to apply
    /// * `base` - The date to calculate from, usually the previous due date
    ///
    /// # Returns
    ///
    /// The next occurrence, strictly after `base`.
    ///
    /// # Errors
    ///
    /// `InvalidInterval` if any interval value is not positive, `InvalidInput` if the
    /// template has no intervals, `DateOutOfRange` if the result is not representable.
    pub fn next_occurrence(
        template: &RecurrenceTemplate,
        base: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, CoreError> {
        Self::validate_intervals(&template.intervals)?;
        if template.intervals.is_empty() {
            return Err(CoreError::InvalidInput(format!(
                "Recurrence template '{}' has no intervals",
                template.name
            )));
        }

        match template.mode {
            RecurrenceMode::Sequential { day_of_month } => {
                let mut result = base;
                for interval in &template.intervals {
                    result = Self::apply_interval(result, interval, day_of_month)?;
                }
                Ok(result)
            }
            RecurrenceMode::WeekdayOccurrence { weekday, occurrence } => {
                let mut target = base;
                for interval in &template.intervals {
                    target = Self::apply_interval(target, interval, None)?;
                }

                let resolved = Self::nth_weekday_in_month(target, weekday, occurrence)?;
                if resolved > base {
                    return Ok(resolved);
                }

                // Day-based intervals can leave us in the base month before the base day.
                let following = Self::add_months(target, 1, Some(1))?;
                Self::nth_weekday_in_month(following, weekday, occurrence)
            }
        }
    }

    /// Rejects any interval whose value is zero or negative.
    pub fn validate_intervals(intervals: &[Interval]) -> Result<(), CoreError> {
        match intervals.iter().find(|i| !i.is_positive()) {
            Some(bad) => Err(CoreError::InvalidInterval { value: bad.value }),
            None => Ok(()),
        }
    }

    /// Applies one interval to `date`. Month steps honour `day_of_month` when given.
    pub fn apply_interval(
        date: DateTime<Utc>,
        interval: &Interval,
        day_of_month: Option<u8>,
    ) -> Result<DateTime<Utc>, CoreError> {
        if !interval.is_positive() {
            return Err(CoreError::InvalidInterval { value: interval.value });
        }

        let value = interval.value;
        match interval.unit {
            IntervalUnit::Days => date
                .checked_add_signed(Duration::days(i64::from(value)))
                .ok_or(CoreError::DateOutOfRange),
            IntervalUnit::Weeks => date
                .checked_add_signed(Duration::weeks(i64::from(value)))
                .ok_or(CoreError::DateOutOfRange),
            IntervalUnit::Months => Self::add_months(date, value, day_of_month),
            IntervalUnit::Years => {
                let months = (value as u32).checked_mul(12).ok_or(CoreError::DateOutOfRange)?;
                date.checked_add_months(Months::new(months))
                    .ok_or(CoreError::DateOutOfRange)
            }
        }
    }

    /// Adds `months` calendar months, clamping the day to the target month's length.
    ///
    /// The target day is `preferred_day` when set, otherwise the day of `date`.
    /// Negative offsets are supported.
    ///
    /// # Examples
    ///
    /// ```
    /// use cadence_core::recurrence::RecurrenceCalculator;
    /// use chrono::{TimeZone, Utc};
    ///
    /// let jan_31 = Utc.with_ymd_and_hms(2024, 1, 31, 9, 0, 0).unwrap();
    /// let next = RecurrenceCalculator::add_months(jan_31, 1, None).unwrap();
    /// assert_eq!(next, Utc.with_ymd_and_hms(2024, 2, 29, 9, 0, 0).unwrap());
    /// ```
    pub fn add_months(
        date: DateTime<Utc>,
        months: i32,
        preferred_day: Option<u8>,
    ) -> Result<DateTime<Utc>, CoreError> {
        let total = i64::from(date.year()) * 12 + i64::from(date.month0()) + i64::from(months);
        let year = i32::try_from(total.div_euclid(12)).map_err(|_| CoreError::DateOutOfRange)?;
        let month = total.rem_euclid(12) as u32 + 1;

        let last_day = last_day_of_month(year, month)?;
        let target_day = preferred_day.map(u32::from).unwrap_or_else(|| date.day());
        let day = target_day.clamp(1, last_day);

        at_same_time(date, year, month, day)
    }

    /// Resolves the nth (or last) `weekday` in the month containing `date`.
    ///
    /// An nth occurrence that does not exist in the month (e.g. a fifth Monday)
    /// clamps to the last matching weekday.
    pub fn nth_weekday_in_month(
        date: DateTime<Utc>,
        weekday: Weekday,
        occurrence: MonthOccurrence,
    ) -> Result<DateTime<Utc>, CoreError> {
        let n = match occurrence {
            MonthOccurrence::Last => return Self::last_weekday_in_month(date, weekday),
            MonthOccurrence::Nth(n) => u32::from(n.max(1)),
        };

        let first = NaiveDate::from_ymd_opt(date.year(), date.month(), 1).ok_or(CoreError::DateOutOfRange)?;
        let offset = days_until(first.weekday(), weekday);
        let day = 1 + offset + (n - 1) * 7;

        if day > last_day_of_month(date.year(), date.month())? {
            return Self::last_weekday_in_month(date, weekday);
        }
        at_same_time(date, date.year(), date.month(), day)
    }

    pub fn last_weekday_in_month(date: DateTime<Utc>, weekday: Weekday) -> Result<DateTime<Utc>, CoreError> {
        let last_day = last_day_of_month(date.year(), date.month())?;
        let last = NaiveDate::from_ymd_opt(date.year(), date.month(), last_day).ok_or(CoreError::DateOutOfRange)?;
        let back = days_until(weekday, last.weekday());
        at_same_time(date, date.year(), date.month(), last_day - back)
    }
}

/// Days to walk forward from `from` to reach `to` (0..=6).
fn days_until(from: Weekday, to: Weekday) -> u32 {
    (to.num_days_from_sunday() + 7 - from.num_days_from_sunday()) % 7
}

fn last_day_of_month(year: i32, month: u32) -> Result<u32, CoreError> {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .ok_or(CoreError::DateOutOfRange)
}

fn at_same_time(date: DateTime<Utc>, year: i32, month: u32, day: u32) -> Result<DateTime<Utc>, CoreError> {
    let naive = NaiveDate::from_ymd_opt(year, month, day)
        .ok_or(CoreError::DateOutOfRange)?
        .and_time(date.time());
    Ok(Utc.from_utc_datetime(&naive))
}

/// Step function used by bulk generation.
///
/// Only the first interval is used. Returns `from + max_advance` instead of a
/// real occurrence when the intervals are empty, the first value is not positive,
/// or the computed date would not move strictly forward. Callers looping on this
/// function are therefore always guaranteed progress.
///
/// Month steps clamp to the end of the target month.
pub fn advance_from(from: DateTime<Utc>, intervals: &[Interval], max_advance: Duration) -> DateTime<Utc> {
    let fail_open = || from.checked_add_signed(max_advance).unwrap_or(DateTime::<Utc>::MAX_UTC);

    let Some(interval) = intervals.first() else {
        debug!(%from, "no intervals, skipping ahead by max advance");
        return fail_open();
    };
    if !interval.is_positive() {
        debug!(%from, value = interval.value, "non-positive interval, skipping ahead by max advance");
        return fail_open();
    }

    let value = interval.value;
    let next = match interval.unit {
        IntervalUnit::Days => from.checked_add_signed(Duration::days(i64::from(value))),
        IntervalUnit::Weeks => from.checked_add_signed(Duration::weeks(i64::from(value))),
        IntervalUnit::Months => from.checked_add_months(Months::new(value as u32)),
        IntervalUnit::Years => (value as u32)
            .checked_mul(12)
            .and_then(|months| from.checked_add_months(Months::new(months))),
    };

    match next {
        Some(next) if next > from => next,
        _ => fail_open(),
    }
}
