//! Interval-dependent calendar arithmetic.
//!
//! - [`period`] formats the reporting bucket used as a dedup key fragment and digest grouping key
//! - [`expire_by`] computes when a notification may be swept
//! - [`day_label`] renders `Jan 2nd 2006` style digest timestamps

use chrono::{DateTime, Datelike, Months, NaiveTime, TimeZone, Utc};

use crate::error::Result;
use crate::types::TimeInterval;

/// Truncates a timestamp to midnight UTC.
#[must_use]
pub fn truncate_to_day(time: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&time.date_naive().and_time(NaiveTime::MIN))
}

/// Calendar quarter (1-4) of a date.
#[must_use]
pub fn quarter_of<D: Datelike>(date: &D) -> u32 {
    (date.month() - 1) / 3 + 1
}

/// Formats the reporting period containing `date`.
///
/// | interval | format |
/// |---|---|
/// | day | `YYYY-MM-DD` |
/// | week | `YYYY-Www` (ISO week) |
/// | month | `YYYY-MM` |
/// | quarter | `YYYY-Qn` |
/// | year | `YYYY` |
///
/// # Errors
///
/// Returns `AlertError::InvalidAlertTimeInterval` for `hour`.
pub fn period(interval: TimeInterval, date: DateTime<Utc>) -> Result<String> {
    match interval {
        TimeInterval::Day => Ok(date.format("%Y-%m-%d").to_string()),
        TimeInterval::Week => {
            let week = date.iso_week();
            Ok(format!("{}-W{:02}", week.year(), week.week()))
        }
        TimeInterval::Month => Ok(date.format("%Y-%m").to_string()),
        TimeInterval::Quarter => Ok(format!("{}-Q{}", date.year(), quarter_of(&date))),
        TimeInterval::Year => Ok(date.format("%Y").to_string()),
        TimeInterval::Hour => Err(interval.unsupported()),
    }
}

/// Computes the expiration of a notification detected at `now`.
///
/// `now` is truncated to midnight before the interval's retention is added:
/// day +2 months, week +3 months, month +6 months, quarter +1 year, year +3 years.
///
/// # Errors
///
/// Returns `AlertError::InvalidAlertTimeInterval` for any other interval.
pub fn expire_by(interval: TimeInterval, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let months = match interval {
        TimeInterval::Day => 2,
        TimeInterval::Week => 3,
        TimeInterval::Month => 6,
        TimeInterval::Quarter => 12,
        TimeInterval::Year => 36,
        TimeInterval::Hour => return Err(interval.unsupported()),
    };

    truncate_to_day(now)
        .checked_add_months(Months::new(months))
        .ok_or_else(|| interval.unsupported())
}

/// Returns true if a forecast row dated `row_date` belongs to the period in effect at `today`.
///
/// Week- and day-interval alerts are matched on the calendar month, the same as
/// month-interval alerts, because forecast rows are bucketed daily across whole months.
///
/// # Errors
///
/// Returns `AlertError::InvalidAlertTimeInterval` for intervals with no forecast window.
pub fn in_forecast_window(
    interval: TimeInterval,
    row_date: DateTime<Utc>,
    today: DateTime<Utc>,
) -> Result<bool> {
    let same_year = row_date.year() == today.year();
    match interval {
        TimeInterval::Year => Ok(same_year),
        TimeInterval::Quarter => Ok(same_year && quarter_of(&row_date) == quarter_of(&today)),
        TimeInterval::Month | TimeInterval::Week | TimeInterval::Day => {
            Ok(same_year && row_date.month() == today.month())
        }
        TimeInterval::Hour => Err(interval.unsupported()),
    }
}

/// English ordinal suffix for a day of the month.
#[must_use]
pub const fn ordinal_suffix(day: u32) -> &'static str {
    match day % 100 {
        11..=13 => "th",
        _ => match day % 10 {
            1 => "st",
            2 => "nd",
            3 => "rd",
            _ => "th",
        },
    }
}

/// Renders a digest bucket label such as `Jan 2nd 2006`.
#[must_use]
pub fn day_label(date: DateTime<Utc>) -> String {
    format!(
        "{} {}{} {}",
        date.format("%b"),
        date.day(),
        ordinal_suffix(date.day()),
        date.year()
    )
}
