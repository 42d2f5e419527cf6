//! Condition evaluation over query result rows.
//!
//! The evaluator is stateless per invocation. Value and percentage alerts are checked
//! row by row; forecast alerts aggregate every forecast row of the current period into
//! one candidate value. All three converge on [`new_notification`].

use chrono::{DateTime, NaiveDate, TimeDelta, TimeZone, Utc};
use tracing::debug;

use crate::error::{AlertError, Result};
use crate::labels::breakdown_label;
use crate::period::{expire_by, in_forecast_window, period, truncate_to_day};
use crate::query::{Cell, PERCENTAGE_DAILY_RANGE, QueryRequest, QueryResult};
use crate::types::{Alert, Condition, Metric, Notification, TimeInterval};

/// Evaluates alert conditions against query results.
#[derive(Debug, Clone, Copy)]
pub struct Evaluator {
    noise_threshold: f64,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new(5.0)
    }
}

impl Evaluator {
    /// Creates an evaluator suppressing cost changes whose paired usage change is within
    /// `noise_threshold` percent.
    #[must_use]
    pub const fn new(noise_threshold: f64) -> Self {
        Self { noise_threshold }
    }

    /// Produces the notification candidates of `alert` for `result`.
    ///
    /// # Errors
    ///
    /// Returns a cell-interpretation error if a row does not match the request layout.
    pub fn evaluate(
        &self,
        alert: &Alert,
        request: &QueryRequest,
        result: &QueryResult,
        now: DateTime<Utc>,
    ) -> Result<Vec<Notification>> {
        match alert.config.condition {
            Condition::Value => self.evaluate_value(alert, request, &result.rows, now),
            Condition::Percentage => self.evaluate_percentage(alert, request, &result.rows, now),
            Condition::Forecast => Ok(self
                .evaluate_forecast(alert, request, &result.forecast_rows, now)?
                .into_iter()
                .collect()),
        }
    }

    fn evaluate_value(
        &self,
        alert: &Alert,
        request: &QueryRequest,
        rows: &[Vec<Cell>],
        now: DateTime<Utc>,
    ) -> Result<Vec<Notification>> {
        let index = request.metric_index();
        let mut notifications = Vec::new();
        for row in rows {
            let row_time = row_time_detected(alert.config.time_interval, request, row)?;
            let value = numeric_cell(row, index)?;
            if let Some(n) = new_notification(alert, Some(row), value, row_time, now)? {
                notifications.push(n);
            }
        }
        Ok(notifications)
    }

    fn evaluate_percentage(
        &self,
        alert: &Alert,
        request: &QueryRequest,
        rows: &[Vec<Cell>],
        now: DateTime<Utc>,
    ) -> Result<Vec<Notification>> {
        let index = request.comparative_index();
        let today = truncate_to_day(now);
        let mut notifications = Vec::new();

        for row in rows {
            let row_time = row_time_detected(alert.config.time_interval, request, row)?;
            if row_time.is_some_and(|t| is_first_percentage_day(t, today)) {
                continue;
            }

            let pct = comparative_pct(row, index)?;
            if alert.config.metric == Metric::Cost && alert.config.check(pct) {
                let usage_pct = comparative_pct(row, index + 1)?;
                if usage_pct.abs() <= self.noise_threshold {
                    debug!(
                        alert_id = %alert.id,
                        cost_pct = pct,
                        usage_pct,
                        "cost change within usage noise band, skipping"
                    );
                    continue;
                }
            }

            if let Some(n) = new_notification(alert, Some(row), pct, row_time, now)? {
                notifications.push(n);
            }
        }
        Ok(notifications)
    }

    fn evaluate_forecast(
        &self,
        alert: &Alert,
        request: &QueryRequest,
        rows: &[Vec<Cell>],
        now: DateTime<Utc>,
    ) -> Result<Option<Notification>> {
        if rows.is_empty() {
            return Err(AlertError::NoForecastRows);
        }

        let mut total = 0.0;
        for row in rows {
            let row_date = row_timestamp(request, row, true)?;
            if !in_forecast_window(alert.config.time_interval, row_date, now)? {
                continue;
            }

            let last = row.len().saturating_sub(1);
            match row.get(last) {
                None | Some(Cell::Null) => {}
                Some(cell) => {
                    total += cell.as_f64().ok_or_else(|| AlertError::InvalidCell {
                        index: last,
                        reason: "forecast value is not numeric".to_string(),
                    })?;
                }
            }
        }

        new_notification(alert, None, total, None, now)
    }
}

fn numeric_cell(row: &[Cell], index: usize) -> Result<f64> {
    row.get(index)
        .and_then(Cell::as_f64)
        .ok_or_else(|| AlertError::InvalidCell {
            index,
            reason: "expected a numeric metric value".to_string(),
        })
}

fn comparative_pct(row: &[Cell], index: usize) -> Result<f64> {
    match row.get(index) {
        Some(Cell::Comparative(cmp)) => cmp.pct.as_f64().ok_or_else(|| AlertError::InvalidCell {
            index,
            reason: "percentage change is not numeric".to_string(),
        }),
        _ => Err(AlertError::InvalidCell {
            index,
            reason: "expected a comparative value".to_string(),
        }),
    }
}

fn date_part(key: &str, cell: &Cell) -> Result<i64> {
    let value = cell.as_i64().ok_or_else(|| AlertError::InvalidRow {
        reason: format!("{key} column is not an integer"),
    })?;
    let valid = match key {
        "year" => value >= 1,
        "month" => (1..=12).contains(&value),
        "day" => (1..=31).contains(&value),
        other => {
            return Err(AlertError::InvalidRow {
                reason: format!("unsupported date column {other}"),
            });
        }
    };
    if !valid {
        return Err(AlertError::InvalidRow {
            reason: format!("invalid {key} value {value}"),
        });
    }
    Ok(value)
}

/// Reads the bucket date of a row from its `year`/`month`/`day` time columns.
///
/// Missing parts default to 1.
///
/// # Errors
///
/// Returns `AlertError::InvalidRow` if the row is too short, a column is not a date
/// part, or the parts do not form a calendar date.
pub fn row_timestamp(
    request: &QueryRequest,
    row: &[Cell],
    forecast_row: bool,
) -> Result<DateTime<Utc>> {
    let offset = request.time_offset(forecast_row);
    if row.len() < offset + request.cols.len() {
        return Err(AlertError::InvalidRow {
            reason: format!(
                "expected at least {} cells, got {}",
                offset + request.cols.len(),
                row.len()
            ),
        });
    }

    let (mut year, mut month, mut day) = (1, 1, 1);
    for (i, key) in request.cols.iter().enumerate() {
        let value = date_part(key, &row[offset + i])?;
        match key.as_str() {
            "year" => year = value,
            "month" => month = value,
            _ => day = value,
        }
    }

    let date = i32::try_from(year)
        .ok()
        .and_then(|y| {
            NaiveDate::from_ymd_opt(y, u32::try_from(month).ok()?, u32::try_from(day).ok()?)
        })
        .ok_or_else(|| AlertError::InvalidRow {
            reason: format!("{year}-{month}-{day} is not a date"),
        })?;
    Ok(Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN)))
}

/// The bucket date of a row, for daily alerts only.
///
/// # Errors
///
/// Propagates [`row_timestamp`] errors for daily alerts.
pub fn row_time_detected(
    interval: TimeInterval,
    request: &QueryRequest,
    row: &[Cell],
) -> Result<Option<DateTime<Utc>>> {
    if interval == TimeInterval::Day {
        return row_timestamp(request, row, false).map(Some);
    }
    Ok(None)
}

/// Returns true for the baseline row of a daily percentage window.
///
/// The oldest day only exists to compute the first change; a few hours of slack
/// tolerate clock skew around midnight.
#[must_use]
pub fn is_first_percentage_day(row_time: DateTime<Utc>, today: DateTime<Utc>) -> bool {
    today - row_time > TimeDelta::hours(24 * (PERCENTAGE_DAILY_RANGE - 1) + 5)
}

/// Builds a notification if `value` satisfies the alert's condition.
///
/// Daily alerts are detected at the row's bucket date; all others at `now`. Value and
/// percentage alerts with a breakdown dimension record the row's first cell as the
/// breakdown value.
///
/// # Errors
///
/// Returns `AlertError::InvalidAlertTimeInterval` for unsupported intervals and
/// `AlertError::InvalidLabelId` for a malformed breakdown dimension.
pub fn new_notification(
    alert: &Alert,
    row: Option<&[Cell]>,
    value: f64,
    row_time: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<Option<Notification>> {
    let config = &alert.config;
    if !config.check(value) {
        return Ok(None);
    }

    let expire_by = expire_by(config.time_interval, now)?;
    let time_detected = match row_time {
        Some(t) if config.time_interval == TimeInterval::Day => t,
        _ => now,
    };

    let (breakdown, label) = match (config.breakdown(), row) {
        (Some(dimension), Some(row)) if config.condition != Condition::Forecast => {
            let cell = row.first().ok_or_else(|| AlertError::InvalidCell {
                index: 0,
                reason: "missing breakdown value".to_string(),
            })?;
            (Some(cell.to_breakdown(0)?), Some(breakdown_label(dimension)?))
        }
        _ => (None, None),
    };

    Ok(Some(Notification {
        alert_id: alert.id.clone(),
        alert_name: String::new(),
        condition_string: String::new(),
        customer_id: alert.customer_id.clone(),
        recipients: alert.recipients.clone(),
        value,
        period: period(config.time_interval, time_detected)?,
        breakdown,
        breakdown_label: label,
        etag: alert.etag.clone(),
        time_detected,
        time_sent: None,
        expire_by,
    }))
}
