//! Core types for the alerting engine.
//!
//! This module provides the persistent and transient records the engine works on:
//! - [`Condition`], [`Operator`], [`TimeInterval`], [`Metric`]: closed enums parsed from stored strings
//! - [`Config`]: what an alert monitors and when it triggers
//! - [`Alert`]: a customer-owned, persistent alert definition
//! - [`Notification`]: a single detected occurrence, deduplicated per period

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AlertError, Result};

macro_rules! string_enum_serde {
    ($ty:ty) => {
        impl TryFrom<String> for $ty {
            type Error = AlertError;

            fn try_from(value: String) -> Result<Self> {
                value.parse()
            }
        }

        impl From<$ty> for String {
            fn from(value: $ty) -> Self {
                value.as_str().to_string()
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }
    };
}

/// The kind of condition an alert evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Condition {
    /// The metric value itself crosses the threshold.
    Value,
    /// The period-over-period percentage change crosses the threshold.
    Percentage,
    /// The forecasted total for the current period crosses the threshold.
    Forecast,
}

impl Condition {
    /// Returns the stored representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Value => "value",
            Self::Percentage => "percentage",
            Self::Forecast => "forecast",
        }
    }

    /// Returns the wording used in condition sentences.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Value => "value",
            Self::Percentage => "percentage change",
            Self::Forecast => "forecast",
        }
    }
}

impl FromStr for Condition {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "value" => Ok(Self::Value),
            "percentage" => Ok(Self::Percentage),
            "forecast" => Ok(Self::Forecast),
            other => Err(AlertError::InvalidCondition {
                value: other.to_string(),
            }),
        }
    }
}

string_enum_serde!(Condition);

/// Comparison operators supported by alert conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Operator {
    /// Greater than (>).
    GreaterThan,
    /// Less than (<).
    LessThan,
}

impl Operator {
    /// Evaluates `value <op> threshold`.
    #[must_use]
    pub fn evaluate(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::GreaterThan => value > threshold,
            Self::LessThan => value < threshold,
        }
    }

    /// Returns the operator as a string symbol.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::GreaterThan => ">",
            Self::LessThan => "<",
        }
    }

    /// Returns the wording used in condition sentences.
    #[must_use]
    pub const fn words(&self) -> &'static str {
        match self {
            Self::GreaterThan => "greater than",
            Self::LessThan => "less than",
        }
    }

    /// The result ordering that surfaces the most significant breakdowns first.
    #[must_use]
    pub const fn limit_order(&self) -> LimitOrder {
        match self {
            Self::GreaterThan => LimitOrder::Desc,
            Self::LessThan => LimitOrder::Asc,
        }
    }
}

impl FromStr for Operator {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            ">" => Ok(Self::GreaterThan),
            "<" => Ok(Self::LessThan),
            other => Err(AlertError::InvalidOperator {
                value: other.to_string(),
            }),
        }
    }
}

string_enum_serde!(Operator);

/// Ordering applied when a breakdown result is limited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitOrder {
    /// Largest values first.
    Desc,
    /// Smallest values first.
    Asc,
}

/// Reporting interval of an alert.
///
/// `Hour` can appear on stored report configurations; every interval-dependent
/// alert operation rejects it with [`AlertError::InvalidAlertTimeInterval`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TimeInterval {
    /// Hourly.
    Hour,
    /// Daily.
    Day,
    /// ISO weekly.
    Week,
    /// Calendar monthly.
    Month,
    /// Calendar quarterly.
    Quarter,
    /// Calendar yearly.
    Year,
}

impl TimeInterval {
    /// Returns the stored representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Quarter => "quarter",
            Self::Year => "year",
        }
    }

    /// Adjective used at the start of condition sentences.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Hour => "Hourly",
            Self::Day => "Daily",
            Self::Week => "Weekly",
            Self::Month => "Monthly",
            Self::Quarter => "Quarterly",
            Self::Year => "Yearly",
        }
    }

    pub(crate) fn unsupported(self) -> AlertError {
        AlertError::InvalidAlertTimeInterval {
            interval: self.as_str().to_string(),
        }
    }
}

impl FromStr for TimeInterval {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hour" => Ok(Self::Hour),
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            "quarter" => Ok(Self::Quarter),
            "year" => Ok(Self::Year),
            other => Err(AlertError::InvalidTimeInterval {
                value: other.to_string(),
            }),
        }
    }
}

string_enum_serde!(TimeInterval);

/// The metric an alert evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Metric {
    /// Billed cost.
    Cost,
    /// Usage quantity.
    Usage,
    /// Savings.
    Savings,
    /// Margin.
    Margin,
    /// A customer-defined calculated metric.
    Custom,
    /// A provider-specific extended metric.
    Extended,
}

impl Metric {
    /// Returns the stored representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cost => "cost",
            Self::Usage => "usage",
            Self::Savings => "savings",
            Self::Margin => "margin",
            Self::Custom => "custom",
            Self::Extended => "extended",
        }
    }
}

impl FromStr for Metric {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cost" => Ok(Self::Cost),
            "usage" => Ok(Self::Usage),
            "savings" => Ok(Self::Savings),
            "margin" => Ok(Self::Margin),
            "custom" => Ok(Self::Custom),
            "extended" => Ok(Self::Extended),
            other => Err(AlertError::InvalidMetric {
                value: other.to_string(),
            }),
        }
    }
}

string_enum_serde!(Metric);

/// The kind of dimension a filter or breakdown refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    /// A fixed billing field, e.g. `service_description`.
    Fixed,
    /// A date part.
    Datetime,
    /// A resource label.
    Label,
    /// A resource tag.
    Tag,
    /// A project label.
    ProjectLabel,
    /// A system label.
    SystemLabel,
    /// A GKE metering field.
    Gke,
    /// A GKE label.
    GkeLabel,
    /// A cost attribution.
    Attribution,
    /// A group of attributions.
    AttributionGroup,
}

impl FilterType {
    /// Returns the stored representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Fixed => "fixed",
            Self::Datetime => "datetime",
            Self::Label => "label",
            Self::Tag => "tag",
            Self::ProjectLabel => "project_label",
            Self::SystemLabel => "system_label",
            Self::Gke => "gke",
            Self::GkeLabel => "gke_label",
            Self::Attribution => "attribution",
            Self::AttributionGroup => "attribution_group",
        }
    }

    /// Dimensions whose key is stored base64-encoded because it comes from raw user data.
    #[must_use]
    pub const fn requires_raw_table(&self) -> bool {
        matches!(
            self,
            Self::Label | Self::Tag | Self::ProjectLabel | Self::SystemLabel | Self::GkeLabel
        )
    }
}

impl FromStr for FilterType {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fixed" => Ok(Self::Fixed),
            "datetime" => Ok(Self::Datetime),
            "label" => Ok(Self::Label),
            "tag" => Ok(Self::Tag),
            "project_label" => Ok(Self::ProjectLabel),
            "system_label" => Ok(Self::SystemLabel),
            "gke" => Ok(Self::Gke),
            "gke_label" => Ok(Self::GkeLabel),
            "attribution" => Ok(Self::Attribution),
            "attribution_group" => Ok(Self::AttributionGroup),
            other => Err(AlertError::InvalidLabelId {
                id: other.to_string(),
                reason: "unknown dimension type".to_string(),
            }),
        }
    }
}

/// Result limiting attached to a breakdown filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterLimit {
    /// Maximum number of breakdown values returned.
    pub limit: usize,
    /// Ordering used to pick which values are returned.
    pub order: LimitOrder,
    /// Metric the ordering is computed on.
    pub metric: Metric,
}

/// A dimension filter on the analytics query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFilter {
    /// Dimension id, `type:key`.
    pub id: String,
    /// Dimension key.
    pub key: String,
    /// Dimension type.
    #[serde(rename = "type")]
    pub filter_type: FilterType,
    /// Values to match.
    #[serde(default)]
    pub values: Vec<String>,
    /// When true the filter excludes `values` instead of selecting them.
    #[serde(default)]
    pub inverse: bool,
    /// Optional result limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<FilterLimit>,
}

impl ConfigFilter {
    /// Creates an inclusive filter.
    #[must_use]
    pub fn new(filter_type: FilterType, key: impl Into<String>, values: Vec<String>) -> Self {
        let key = key.into();
        Self {
            id: format!("{}:{key}", filter_type.as_str()),
            key,
            filter_type,
            values,
            inverse: false,
            limit: None,
        }
    }

    /// Creates a filter over a `type:key` dimension id.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidLabelId` if the id is not of the form `type:key`.
    pub fn for_dimension(id: &str) -> Result<Self> {
        let (filter_type, key) = split_dimension_id(id)?;
        Ok(Self {
            id: id.to_string(),
            key: key.to_string(),
            filter_type,
            values: Vec::new(),
            inverse: false,
            limit: None,
        })
    }

    /// Turns the filter into an exclusion.
    #[must_use]
    pub const fn inverse(mut self) -> Self {
        self.inverse = true;
        self
    }

    /// Attaches a result limit.
    #[must_use]
    pub const fn with_limit(mut self, limit: FilterLimit) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Splits a `type:key` dimension id.
pub(crate) fn split_dimension_id(id: &str) -> Result<(FilterType, &str)> {
    let parts: Vec<&str> = id.split(':').collect();
    if parts.len() != 2 {
        return Err(AlertError::InvalidLabelId {
            id: id.to_string(),
            reason: "expected type:key".to_string(),
        });
    }
    let filter_type = parts[0].parse().map_err(|_| AlertError::InvalidLabelId {
        id: id.to_string(),
        reason: format!("unknown dimension type {}", parts[0]),
    })?;
    Ok((filter_type, parts[1]))
}

/// Band of percentage changes that are considered noise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IgnoreValuesRange {
    /// Lower bound of the band.
    pub lower_bound: f64,
    /// Upper bound of the band.
    pub upper_bound: f64,
}

/// Reference to a customer-defined calculated metric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculatedMetricRef {
    /// Metric id.
    pub id: String,
    /// Display name.
    pub name: String,
}

fn default_data_source() -> String {
    "billing".to_string()
}

/// What an alert monitors and when it triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// The condition kind.
    pub condition: Condition,
    /// The comparison operator.
    pub operator: Operator,
    /// Thresholds; the first one is authoritative.
    pub values: Vec<f64>,
    /// The monitored metric.
    pub metric: Metric,
    /// Key of the extended metric when `metric` is `Extended`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_metric: Option<String>,
    /// Calculated metric when `metric` is `Custom`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calculated_metric: Option<CalculatedMetricRef>,
    /// Reporting interval.
    pub time_interval: TimeInterval,
    /// Breakdown dimensions; only the first one is used.
    #[serde(default)]
    pub rows: Vec<String>,
    /// Explicit dimension filters.
    #[serde(default)]
    pub filters: Vec<ConfigFilter>,
    /// Attribution ids; when non-empty they replace `filters`.
    #[serde(default)]
    pub scope: Vec<String>,
    /// ISO currency code used for cost formatting.
    pub currency: String,
    /// Noise band for percentage alerts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_values_range: Option<IgnoreValuesRange>,
    /// Analytics data source.
    #[serde(default = "default_data_source")]
    pub data_source: String,
}

impl Config {
    /// Creates a config with a single threshold and no filters.
    #[must_use]
    pub fn new(
        condition: Condition,
        operator: Operator,
        threshold: f64,
        metric: Metric,
        time_interval: TimeInterval,
    ) -> Self {
        Self {
            condition,
            operator,
            values: vec![threshold],
            metric,
            extended_metric: None,
            calculated_metric: None,
            time_interval,
            rows: Vec::new(),
            filters: Vec::new(),
            scope: Vec::new(),
            currency: "USD".to_string(),
            ignore_values_range: None,
            data_source: default_data_source(),
        }
    }

    /// Sets the breakdown dimension.
    #[must_use]
    pub fn with_breakdown(mut self, dimension: impl Into<String>) -> Self {
        self.rows = vec![dimension.into()];
        self
    }

    /// Adds an explicit filter.
    #[must_use]
    pub fn with_filter(mut self, filter: ConfigFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Sets the attribution scope.
    #[must_use]
    pub fn with_scope(mut self, scope: Vec<String>) -> Self {
        self.scope = scope;
        self
    }

    /// Sets the currency.
    #[must_use]
    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    /// Sets the percentage noise band.
    #[must_use]
    pub const fn with_ignore_range(mut self, lower_bound: f64, upper_bound: f64) -> Self {
        self.ignore_values_range = Some(IgnoreValuesRange {
            lower_bound,
            upper_bound,
        });
        self
    }

    /// The authoritative threshold.
    #[must_use]
    pub fn threshold(&self) -> Option<f64> {
        self.values.first().copied()
    }

    /// The breakdown dimension, if any.
    #[must_use]
    pub fn breakdown(&self) -> Option<&str> {
        self.rows.first().map(String::as_str)
    }

    /// Returns true if `value` satisfies the condition.
    #[must_use]
    pub fn check(&self, value: f64) -> bool {
        self.threshold()
            .is_some_and(|threshold| self.operator.evaluate(value, threshold))
    }
}

const fn default_true() -> bool {
    true
}

/// A persistent, customer-owned alert definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    /// Document id; filled from the store key on read.
    #[serde(default)]
    pub id: String,
    /// Display name.
    pub name: String,
    /// Owning customer.
    pub customer_id: String,
    /// What to monitor.
    pub config: Config,
    /// Digest recipients.
    pub recipients: Vec<String>,
    /// Version token of the triggering configuration.
    pub etag: String,
    /// Owning organization, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    /// Creation time.
    pub time_created: DateTime<Utc>,
    /// Last modification time.
    pub time_modified: DateTime<Utc>,
    /// Last time a digest included this alert.
    #[serde(default)]
    pub time_last_alerted: Option<DateTime<Utc>>,
    /// False while the alert is still being set up.
    #[serde(default = "default_true")]
    pub is_valid: bool,
}

impl Alert {
    /// Creates a new alert builder.
    pub fn builder(
        name: impl Into<String>,
        customer_id: impl Into<String>,
        config: Config,
    ) -> AlertBuilder {
        AlertBuilder::new(name, customer_id, config)
    }

    /// An invalid alert untouched for longer than `grace` is garbage.
    #[must_use]
    pub fn is_dangling(&self, now: DateTime<Utc>, grace: TimeDelta) -> bool {
        !self.is_valid && self.time_modified < now - grace
    }

    /// Returns true if the only recipient is `noreply`.
    #[must_use]
    pub fn only_noreply(&self, noreply: &str) -> bool {
        self.recipients.len() == 1 && self.recipients[0] == noreply
    }

    /// Checks that the alert is complete enough to evaluate.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidAlert` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| AlertError::InvalidAlert {
            id: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.config.values.is_empty() {
            return Err(invalid("alert config values is empty"));
        }
        if self.config.scope.is_empty() && self.config.filters.is_empty() {
            return Err(invalid("alert config scope and filters are empty"));
        }
        if let Some(dimension) = self.config.breakdown() {
            let prefix = dimension.split(':').next().unwrap_or_default();
            if matches!(
                prefix.parse::<FilterType>(),
                Ok(FilterType::Gke | FilterType::GkeLabel)
            ) {
                return Err(invalid(
                    "alert config rows contains gke dimension, which isn't supported",
                ));
            }
        }
        if self.name.is_empty() {
            return Err(invalid("alert name is empty"));
        }
        if self.recipients.is_empty() {
            return Err(invalid("alert recipients is empty"));
        }
        if self.etag.is_empty() {
            return Err(invalid("etag is empty"));
        }
        if self.customer_id.is_empty() {
            return Err(invalid("customer is empty"));
        }
        Ok(())
    }
}

/// Builder for creating [`Alert`] instances.
#[derive(Debug)]
pub struct AlertBuilder {
    id: Option<String>,
    name: String,
    customer_id: String,
    config: Config,
    recipients: Vec<String>,
    etag: Option<String>,
    is_valid: bool,
    time_modified: Option<DateTime<Utc>>,
}

impl AlertBuilder {
    fn new(name: impl Into<String>, customer_id: impl Into<String>, config: Config) -> Self {
        Self {
            id: None,
            name: name.into(),
            customer_id: customer_id.into(),
            config,
            recipients: Vec::new(),
            etag: None,
            is_valid: true,
            time_modified: None,
        }
    }

    /// Sets the alert id (a random one is generated otherwise).
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Adds a recipient.
    #[must_use]
    pub fn recipient(mut self, email: impl Into<String>) -> Self {
        self.recipients.push(email.into());
        self
    }

    /// Sets the etag (a random one is generated otherwise).
    #[must_use]
    pub fn etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    /// Sets the validity flag.
    #[must_use]
    pub const fn valid(mut self, is_valid: bool) -> Self {
        self.is_valid = is_valid;
        self
    }

    /// Sets the modification time.
    #[must_use]
    pub const fn modified_at(mut self, time: DateTime<Utc>) -> Self {
        self.time_modified = Some(time);
        self
    }

    /// Builds the [`Alert`].
    #[must_use]
    pub fn build(self) -> Alert {
        let now = Utc::now();
        Alert {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            name: self.name,
            customer_id: self.customer_id,
            config: self.config,
            recipients: self.recipients,
            etag: self.etag.unwrap_or_else(|| Uuid::new_v4().simple().to_string()),
            organization: None,
            time_created: now,
            time_modified: self.time_modified.unwrap_or(now),
            time_last_alerted: None,
            is_valid: self.is_valid,
        }
    }
}

/// A detected occurrence of an alert's condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// The alert that fired.
    pub alert_id: String,
    /// Alert name at detection time.
    #[serde(default)]
    pub alert_name: String,
    /// Condition sentence at detection time.
    #[serde(default)]
    pub condition_string: String,
    /// Owning customer.
    pub customer_id: String,
    /// Recipients at detection time.
    #[serde(default)]
    pub recipients: Vec<String>,
    /// Detected value (metric, percentage or forecast total).
    pub value: f64,
    /// Reporting bucket, formatted per interval.
    pub period: String,
    /// Breakdown value, when the alert has a breakdown dimension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<String>,
    /// Human label of the breakdown dimension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakdown_label: Option<String>,
    /// Alert etag at detection time.
    pub etag: String,
    /// When the condition was detected.
    pub time_detected: DateTime<Utc>,
    /// When a digest included this notification.
    #[serde(default)]
    pub time_sent: Option<DateTime<Utc>>,
    /// When the retention sweep may delete this record.
    pub expire_by: DateTime<Utc>,
}

impl Notification {
    /// The deduplication key: alert, period and (encoded) breakdown value.
    ///
    /// The breakdown uses the URL-safe alphabet so the key never contains `/`.
    #[must_use]
    pub fn identity_key(&self) -> String {
        match &self.breakdown {
            Some(breakdown) => format!(
                "{}_{}_{}",
                self.alert_id,
                self.period,
                base64::engine::general_purpose::URL_SAFE.encode(breakdown)
            ),
            None => format!("{}_{}", self.alert_id, self.period),
        }
    }

    /// Returns true once a digest has included this notification.
    #[must_use]
    pub const fn is_sent(&self) -> bool {
        self.time_sent.is_some()
    }
}
