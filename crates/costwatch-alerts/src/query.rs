//! Translation of an alert into an analytics query request, and the shape of its result.
//!
//! Result rows are positional:
//!
//! ```text
//! [breakdown?, time columns..., metric values..., comparative values...]
//! ```
//!
//! Forecast rows carry one extra leading column before the time columns and the
//! forecasted value in their last cell.

use chrono::{DateTime, Months, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::RequestContext;
use crate::error::{AlertError, Result};
use crate::limiter::BreakdownLimiter;
use crate::period::truncate_to_day;
use crate::types::{
    Alert, CalculatedMetricRef, Condition, Config, ConfigFilter, FilterType, Metric, TimeInterval,
};

/// Days of history fetched for daily value alerts (in addition to today).
pub const VALUE_DAILY_RANGE: i64 = 4;

/// Days of history fetched for daily percentage alerts; the oldest day is only a baseline.
pub const PERCENTAGE_DAILY_RANGE: i64 = 5;

/// Accounting adjustment excluded from the basis of percentage alerts.
pub const SUSTAINED_USAGE_CREDIT: &str = "Sustained Usage Discount";

/// Calendar unit of a relative time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    /// Days.
    Day,
    /// ISO weeks.
    Week,
    /// Calendar months.
    Month,
    /// Calendar quarters.
    Quarter,
    /// Calendar years.
    Year,
}

/// The time window a query covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum TimeSettings {
    /// The last `amount` units, optionally including the current one.
    #[serde(rename_all = "camelCase")]
    Last {
        /// Window unit.
        unit: TimeUnit,
        /// Number of units.
        amount: u32,
        /// Whether the current, incomplete unit is part of the window.
        include_current: bool,
    },
    /// The current unit to date.
    Current {
        /// Window unit.
        unit: TimeUnit,
    },
    /// An explicit date range.
    Custom {
        /// Range start (inclusive).
        from: DateTime<Utc>,
        /// Range end (inclusive).
        to: DateTime<Utc>,
    },
}

impl TimeSettings {
    const fn last(unit: TimeUnit, amount: u32) -> Self {
        Self::Last {
            unit,
            amount,
            include_current: true,
        }
    }

    /// Computes the window an alert needs evaluated on `today` (a midnight).
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidAlertTimeInterval` for intervals without a window.
    pub fn for_config(config: &Config, today: DateTime<Utc>) -> Result<Self> {
        let interval = config.time_interval;
        if interval == TimeInterval::Hour {
            return Err(interval.unsupported());
        }

        let settings = match config.condition {
            Condition::Value => match interval {
                TimeInterval::Day => Self::Custom {
                    from: today - TimeDelta::days(VALUE_DAILY_RANGE),
                    to: today,
                },
                TimeInterval::Week => Self::last(TimeUnit::Day, 7),
                TimeInterval::Month => Self::Current {
                    unit: TimeUnit::Month,
                },
                TimeInterval::Quarter => Self::Current {
                    unit: TimeUnit::Quarter,
                },
                _ => Self::Current {
                    unit: TimeUnit::Year,
                },
            },
            Condition::Percentage => match interval {
                TimeInterval::Day => Self::Custom {
                    from: today - TimeDelta::days(PERCENTAGE_DAILY_RANGE),
                    to: today,
                },
                TimeInterval::Week => Self::last(TimeUnit::Week, 2),
                TimeInterval::Month => Self::last(TimeUnit::Month, 2),
                TimeInterval::Quarter => Self::last(TimeUnit::Quarter, 2),
                _ => Self::Custom {
                    from: today
                        .checked_sub_months(Months::new(12))
                        .ok_or_else(|| interval.unsupported())?,
                    to: today,
                },
            },
            Condition::Forecast => match interval {
                TimeInterval::Year => Self::last(TimeUnit::Month, 12),
                _ => Self::last(TimeUnit::Month, 3),
            },
        };
        Ok(settings)
    }
}

/// Operators for filters applied to metric values rather than dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricFilterOperator {
    /// Keeps values outside `[values[0], values[1]]`.
    NotBetween,
}

/// A filter on metric values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricFilter {
    /// Filter operator.
    pub operator: MetricFilterOperator,
    /// Operands.
    pub values: Vec<f64>,
    /// Metric the filter applies to.
    pub metric: Metric,
}

/// Comparative columns requested alongside the metric values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparative {
    /// Period-over-period percentage change.
    Percentage,
}

/// Time columns returned for a bucket granularity.
///
/// # Errors
///
/// Returns `AlertError::InvalidAlertTimeInterval` for `hour`.
pub fn cols_for_interval(interval: TimeInterval) -> Result<Vec<String>> {
    let keys: &[&str] = match interval {
        TimeInterval::Day => &["year", "month", "day"],
        TimeInterval::Week => &["year", "week"],
        TimeInterval::Month => &["year", "month"],
        TimeInterval::Quarter => &["year", "quarter"],
        TimeInterval::Year => &["year"],
        TimeInterval::Hour => return Err(interval.unsupported()),
    };
    Ok(keys.iter().map(|k| (*k).to_string()).collect())
}

/// A structured analytics query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    /// The alert this request evaluates.
    pub alert_id: String,
    /// Customer whose data is queried.
    pub customer_id: String,
    /// Organization scope, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    /// The evaluated metric.
    pub metric: Metric,
    /// Metric value columns returned per row, in order.
    pub metrics: Vec<Metric>,
    /// Extended metric key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_metric: Option<String>,
    /// Calculated metric.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calculated_metric: Option<CalculatedMetricRef>,
    /// Currency of cost values.
    pub currency: String,
    /// Analytics data source.
    pub data_source: String,
    /// Breakdown dimension ids.
    pub rows: Vec<String>,
    /// Time column keys.
    pub cols: Vec<String>,
    /// Bucket granularity.
    pub granularity: TimeInterval,
    /// Dimension filters.
    pub filters: Vec<ConfigFilter>,
    /// Metric value filters.
    #[serde(default)]
    pub metric_filters: Vec<MetricFilter>,
    /// Time window.
    pub time_settings: TimeSettings,
    /// Comparative columns, if requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparative: Option<Comparative>,
    /// Whether forecast rows are requested.
    #[serde(default)]
    pub forecast: bool,
}

impl QueryRequest {
    /// Index of the evaluated metric's value cell.
    #[must_use]
    pub fn metric_index(&self) -> usize {
        self.rows.len() + self.cols.len()
    }

    /// Index of the evaluated metric's comparative cell.
    #[must_use]
    pub fn comparative_index(&self) -> usize {
        self.metric_index() + self.metrics.len()
    }

    /// Index of the first time column.
    #[must_use]
    pub fn time_offset(&self, forecast_row: bool) -> usize {
        self.rows.len() + usize::from(forecast_row)
    }
}

/// Percentage change cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparativeValue {
    /// Percentage change.
    #[serde(default)]
    pub pct: Box<Cell>,
    /// Value in the comparison period.
    #[serde(default)]
    pub val: Box<Cell>,
}

/// A single result cell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    /// Missing value.
    #[default]
    Null,
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// Text value.
    String(String),
    /// Comparative value.
    Comparative(ComparativeValue),
}

impl Cell {
    /// Numeric value of an integer or floating point cell.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer value of an integer cell or a numeric string.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Renders a dimension cell as a breakdown value.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidCell` for comparative cells.
    pub fn to_breakdown(&self, index: usize) -> Result<String> {
        match self {
            Self::Null => Ok(String::new()),
            Self::Int(v) => Ok(v.to_string()),
            Self::Float(v) => Ok(v.to_string()),
            Self::String(s) => Ok(s.clone()),
            Self::Comparative(_) => Err(AlertError::InvalidCell {
                index,
                reason: "comparative cell used as breakdown".to_string(),
            }),
        }
    }
}

/// Rows returned by the query executor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    /// Bucketed metric rows.
    #[serde(default)]
    pub rows: Vec<Vec<Cell>>,
    /// Forecast rows, for forecast requests.
    #[serde(default)]
    pub forecast_rows: Vec<Vec<Cell>>,
}

fn attribution_filter(scope: &[String]) -> ConfigFilter {
    ConfigFilter::new(FilterType::Attribution, "attribution", scope.to_vec())
}

fn sustained_usage_filter() -> ConfigFilter {
    ConfigFilter::new(
        FilterType::Fixed,
        "credit",
        vec![SUSTAINED_USAGE_CREDIT.to_string()],
    )
    .inverse()
}

/// Builds query requests for alerts.
#[derive(Debug)]
pub struct RequestBuilder<'a> {
    limiter: BreakdownLimiter<'a>,
}

impl<'a> RequestBuilder<'a> {
    /// Creates a builder that limits breakdowns with `limiter`.
    #[must_use]
    pub const fn new(limiter: BreakdownLimiter<'a>) -> Self {
        Self { limiter }
    }

    /// Builds the request evaluating `alert` at `now`.
    ///
    /// Returns `None` when the alert's breakdown quota for the current period is used up.
    ///
    /// # Errors
    ///
    /// Returns an error if the interval is unsupported, the breakdown id is malformed,
    /// or the notification store lookup fails.
    pub fn build(
        &self,
        ctx: &RequestContext,
        alert: &Alert,
        now: DateTime<Utc>,
    ) -> Result<Option<QueryRequest>> {
        let config = &alert.config;

        let mut filters = if config.scope.is_empty() {
            config.filters.clone()
        } else {
            vec![attribution_filter(&config.scope)]
        };

        if let Some(dimension) = config.breakdown() {
            let plan = self.limiter.plan(ctx, alert, now)?;
            let Some(filter) = plan.filter(alert, dimension)? else {
                debug!(
                    alert_id = %alert.id,
                    period = %plan.period,
                    "breakdown quota exhausted, nothing to evaluate"
                );
                return Ok(None);
            };
            filters.push(filter);
        }

        let mut metric_filters = Vec::new();
        let mut comparative = None;
        if config.condition == Condition::Percentage {
            filters.push(sustained_usage_filter());
            if let Some(range) = config.ignore_values_range {
                metric_filters.push(MetricFilter {
                    operator: MetricFilterOperator::NotBetween,
                    values: vec![range.lower_bound, range.upper_bound],
                    metric: config.metric,
                });
            }
            comparative = Some(Comparative::Percentage);
        }

        let granularity = if config.condition == Condition::Forecast {
            TimeInterval::Day
        } else {
            config.time_interval
        };

        let metrics = if config.condition == Condition::Percentage && config.metric == Metric::Cost {
            vec![Metric::Cost, Metric::Usage]
        } else {
            vec![config.metric]
        };

        let time_settings = TimeSettings::for_config(config, truncate_to_day(now))?;

        Ok(Some(QueryRequest {
            alert_id: alert.id.clone(),
            customer_id: alert.customer_id.clone(),
            organization: alert.organization.clone(),
            metric: config.metric,
            metrics,
            extended_metric: config.extended_metric.clone(),
            calculated_metric: config.calculated_metric.clone(),
            currency: config.currency.clone(),
            data_source: config.data_source.clone(),
            rows: config.rows.clone(),
            cols: cols_for_interval(granularity)?,
            granularity,
            filters,
            metric_filters,
            time_settings,
            comparative,
            forecast: config.condition == Condition::Forecast,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DocumentNotificationStore, MemoryDocumentStore, NotificationStore};
    use crate::types::{LimitOrder, Notification, Operator};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 15, 13, 30, 0).unwrap()
    }

    fn today() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 15, 0, 0, 0).unwrap()
    }

    fn alert(condition: Condition, interval: TimeInterval) -> Alert {
        let config = Config::new(condition, Operator::GreaterThan, 100.0, Metric::Cost, interval)
            .with_filter(ConfigFilter::new(
                FilterType::Fixed,
                "cloud_provider",
                vec!["google-cloud".to_string()],
            ));
        Alert::builder("spend", "cust-1", config)
            .id("alert-1")
            .recipient("ops@example.com")
            .etag("etag-1")
            .build()
    }

    fn build(store: &dyn NotificationStore, alert: &Alert) -> Option<QueryRequest> {
        let builder = RequestBuilder::new(BreakdownLimiter::new(store, 10));
        builder.build(&RequestContext::new(), alert, now()).unwrap()
    }

    mod time_settings_tests {
        use super::*;
        use test_case::test_case;

        #[test_case(Condition::Value, TimeInterval::Week, TimeSettings::last(TimeUnit::Day, 7) ; "value week")]
        #[test_case(Condition::Value, TimeInterval::Month, TimeSettings::Current { unit: TimeUnit::Month } ; "value month")]
        #[test_case(Condition::Value, TimeInterval::Quarter, TimeSettings::Current { unit: TimeUnit::Quarter } ; "value quarter")]
        #[test_case(Condition::Value, TimeInterval::Year, TimeSettings::Current { unit: TimeUnit::Year } ; "value year")]
        #[test_case(Condition::Percentage, TimeInterval::Week, TimeSettings::last(TimeUnit::Week, 2) ; "percentage week")]
        #[test_case(Condition::Percentage, TimeInterval::Month, TimeSettings::last(TimeUnit::Month, 2) ; "percentage month")]
        #[test_case(Condition::Percentage, TimeInterval::Quarter, TimeSettings::last(TimeUnit::Quarter, 2) ; "percentage quarter")]
        #[test_case(Condition::Forecast, TimeInterval::Day, TimeSettings::last(TimeUnit::Month, 3) ; "forecast day")]
        #[test_case(Condition::Forecast, TimeInterval::Week, TimeSettings::last(TimeUnit::Month, 3) ; "forecast week")]
        #[test_case(Condition::Forecast, TimeInterval::Month, TimeSettings::last(TimeUnit::Month, 3) ; "forecast month")]
        #[test_case(Condition::Forecast, TimeInterval::Quarter, TimeSettings::last(TimeUnit::Month, 3) ; "forecast quarter")]
        #[test_case(Condition::Forecast, TimeInterval::Year, TimeSettings::last(TimeUnit::Month, 12) ; "forecast year")]
        fn relative_windows(condition: Condition, interval: TimeInterval, expected: TimeSettings) {
            let config = alert(condition, interval).config;
            assert_eq!(TimeSettings::for_config(&config, today()).unwrap(), expected);
        }

        #[test]
        fn daily_custom_ranges() {
            let value = alert(Condition::Value, TimeInterval::Day).config;
            assert_eq!(
                TimeSettings::for_config(&value, today()).unwrap(),
                TimeSettings::Custom {
                    from: Utc.with_ymd_and_hms(2024, 5, 11, 0, 0, 0).unwrap(),
                    to: today(),
                }
            );

            let pct = alert(Condition::Percentage, TimeInterval::Day).config;
            assert_eq!(
                TimeSettings::for_config(&pct, today()).unwrap(),
                TimeSettings::Custom {
                    from: Utc.with_ymd_and_hms(2024, 5, 10, 0, 0, 0).unwrap(),
                    to: today(),
                }
            );
        }

        #[test]
        fn yearly_percentage_covers_a_year() {
            let pct = alert(Condition::Percentage, TimeInterval::Year).config;
            assert_eq!(
                TimeSettings::for_config(&pct, today()).unwrap(),
                TimeSettings::Custom {
                    from: Utc.with_ymd_and_hms(2023, 5, 15, 0, 0, 0).unwrap(),
                    to: today(),
                }
            );
        }

        #[test]
        fn hour_is_rejected() {
            let config = alert(Condition::Value, TimeInterval::Hour).config;
            assert!(matches!(
                TimeSettings::for_config(&config, today()),
                Err(AlertError::InvalidAlertTimeInterval { .. })
            ));
        }
    }

    mod builder_tests {
        use super::*;

        fn store() -> DocumentNotificationStore<MemoryDocumentStore> {
            DocumentNotificationStore::new(MemoryDocumentStore::new())
        }

        #[test]
        fn value_request_uses_explicit_filters() {
            let store = store();
            let request = build(&store, &alert(Condition::Value, TimeInterval::Month)).unwrap();
            assert_eq!(request.filters.len(), 1);
            assert_eq!(request.filters[0].key, "cloud_provider");
            assert_eq!(request.cols, vec!["year", "month"]);
            assert_eq!(request.granularity, TimeInterval::Month);
            assert!(request.comparative.is_none());
            assert!(!request.forecast);
            assert_eq!(request.metric_index(), 2);
        }

        #[test]
        fn scope_overrides_filters() {
            let store = store();
            let mut alert = alert(Condition::Value, TimeInterval::Month);
            alert.config.scope = vec!["attr-1".to_string(), "attr-2".to_string()];
            let request = build(&store, &alert).unwrap();
            assert_eq!(request.filters.len(), 1);
            assert_eq!(request.filters[0].id, "attribution:attribution");
            assert_eq!(request.filters[0].filter_type, FilterType::Attribution);
            assert_eq!(request.filters[0].values, vec!["attr-1", "attr-2"]);
        }

        #[test]
        fn percentage_adds_credit_exclusion_and_band() {
            let store = store();
            let mut alert = alert(Condition::Percentage, TimeInterval::Month);
            alert.config.ignore_values_range = Some(crate::types::IgnoreValuesRange {
                lower_bound: -5.0,
                upper_bound: 5.0,
            });
            let request = build(&store, &alert).unwrap();

            let credit = request.filters.last().unwrap();
            assert_eq!(credit.id, "fixed:credit");
            assert!(credit.inverse);
            assert_eq!(credit.values, vec![SUSTAINED_USAGE_CREDIT]);

            assert_eq!(request.metric_filters.len(), 1);
            assert_eq!(request.metric_filters[0].operator, MetricFilterOperator::NotBetween);
            assert_eq!(request.metric_filters[0].values, vec![-5.0, 5.0]);
            assert_eq!(request.comparative, Some(Comparative::Percentage));
            assert_eq!(request.metrics, vec![Metric::Cost, Metric::Usage]);
            assert_eq!(request.comparative_index(), 4);
        }

        #[test]
        fn forecast_buckets_daily() {
            let store = store();
            let request = build(&store, &alert(Condition::Forecast, TimeInterval::Year)).unwrap();
            assert!(request.forecast);
            assert_eq!(request.granularity, TimeInterval::Day);
            assert_eq!(request.cols, vec!["year", "month", "day"]);
            assert_eq!(request.time_offset(true), 1);
        }

        #[test]
        fn breakdown_adds_limited_exclusion() {
            let store = store();
            let mut alert = alert(Condition::Value, TimeInterval::Day);
            alert.config.rows = vec!["fixed:service_description".to_string()];
            alert.config.operator = Operator::LessThan;
            let request = build(&store, &alert).unwrap();

            let breakdown = request.filters.last().unwrap();
            assert_eq!(breakdown.id, "fixed:service_description");
            assert!(breakdown.inverse);
            assert!(breakdown.values.is_empty());
            let limit = breakdown.limit.unwrap();
            assert_eq!(limit.limit, 10);
            assert_eq!(limit.order, LimitOrder::Asc);
            assert_eq!(limit.metric, Metric::Cost);
        }

        #[test]
        fn exhausted_quota_means_nothing_to_evaluate() {
            let store = store();
            let mut alert = alert(Condition::Value, TimeInterval::Month);
            alert.config.rows = vec!["fixed:service_description".to_string()];
            let ctx = RequestContext::new();
            let notifications: Vec<Notification> = (0..10)
                .map(|i| Notification {
                    alert_id: alert.id.clone(),
                    alert_name: String::new(),
                    condition_string: String::new(),
                    customer_id: alert.customer_id.clone(),
                    recipients: alert.recipients.clone(),
                    value: 200.0,
                    period: "2024-05".to_string(),
                    breakdown: Some(format!("service-{i}")),
                    breakdown_label: Some("Service".to_string()),
                    etag: alert.etag.clone(),
                    time_detected: now(),
                    time_sent: None,
                    expire_by: now(),
                })
                .collect();
            store
                .add_detected_notifications(&ctx, &notifications, &alert.etag)
                .unwrap();

            assert!(build(&store, &alert).is_none());
        }
    }

    mod cell_tests {
        use super::*;

        #[test]
        fn cells_deserialize_untagged() {
            let row: Vec<Cell> =
                serde_json::from_str(r#"[null, 3, 2.5, "2024", {"pct": 12.5, "val": 80}]"#).unwrap();
            assert_eq!(row[0], Cell::Null);
            assert_eq!(row[1], Cell::Int(3));
            assert_eq!(row[2], Cell::Float(2.5));
            assert_eq!(row[3], Cell::String("2024".to_string()));
            let Cell::Comparative(cmp) = &row[4] else {
                panic!("expected comparative cell");
            };
            assert_eq!(cmp.pct.as_f64(), Some(12.5));
        }

        #[test]
        fn numeric_coercion() {
            assert_eq!(Cell::Int(4).as_f64(), Some(4.0));
            assert_eq!(Cell::String("4".to_string()).as_f64(), None);
            assert_eq!(Cell::String("07".to_string()).as_i64(), Some(7));
            assert_eq!(Cell::Float(1.0).as_i64(), None);
        }

        #[test]
        fn breakdown_rendering() {
            assert_eq!(Cell::String("Compute".to_string()).to_breakdown(0).unwrap(), "Compute");
            assert_eq!(Cell::Int(42).to_breakdown(0).unwrap(), "42");
            assert_eq!(Cell::Null.to_breakdown(0).unwrap(), "");
        }
    }
}
