//! External collaborators of the engine.
//!
//! This module provides the traits the engine calls out through, plus simple
//! implementations that log instead of delivering:
//! - [`QueryExecutor`]: runs analytics queries
//! - [`AccessChecker`]: per-customer entitlement gate
//! - [`WebhookDispatcher`]: `AlertConditionSatisfied` events
//! - [`MailTransport`]: digest email delivery
//! - [`Clock`]: the current time

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::context::RequestContext;
use crate::digest::EmailBody;
use crate::error::{AlertError, Result};
use crate::query::{QueryRequest, QueryResult};
use crate::types::{Alert, Config, Notification};

/// Source of the current time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that can be set by hand.
#[derive(Debug)]
pub struct FixedClock {
    now: RwLock<DateTime<Utc>>,
}

impl FixedClock {
    /// Creates a clock stopped at `now`.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    /// Moves the clock to `now`.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.write() = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

/// Runs structured analytics queries.
pub trait QueryExecutor: Send + Sync + fmt::Debug {
    /// Executes `request`.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Query` if the query fails.
    fn execute(&self, ctx: &RequestContext, request: &QueryRequest) -> Result<QueryResult>;
}

/// A [`QueryExecutor`] answering from canned results keyed by alert id.
#[derive(Debug, Default)]
pub struct StaticQueryExecutor {
    results: RwLock<HashMap<String, QueryResult>>,
    requests: RwLock<Vec<QueryRequest>>,
}

impl StaticQueryExecutor {
    /// Creates an executor with no results.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the result returned for `alert_id`.
    pub fn insert(&self, alert_id: impl Into<String>, result: QueryResult) {
        self.results.write().insert(alert_id.into(), result);
    }

    /// Requests executed so far.
    #[must_use]
    pub fn requests(&self) -> Vec<QueryRequest> {
        self.requests.read().clone()
    }
}

impl QueryExecutor for StaticQueryExecutor {
    fn execute(&self, ctx: &RequestContext, request: &QueryRequest) -> Result<QueryResult> {
        ctx.check()?;
        self.requests.write().push(request.clone());
        self.results
            .read()
            .get(&request.alert_id)
            .cloned()
            .ok_or_else(|| AlertError::Query {
                reason: format!("no result for alert {}", request.alert_id),
            })
    }
}

/// Outcome of an entitlement check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    /// The customer may use alerts.
    Granted,
    /// The customer may not use alerts; the work is skipped.
    Denied {
        /// Why access was denied.
        reason: String,
    },
}

impl Access {
    /// Returns true if access was granted.
    #[must_use]
    pub const fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// Per-customer entitlement gate.
pub trait AccessChecker: Send + Sync + fmt::Debug {
    /// Checks whether `customer_id` may use alerts.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Access` if the check itself fails.
    fn check(&self, ctx: &RequestContext, customer_id: &str) -> Result<Access>;
}

/// Grants access to every customer.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessChecker for AllowAll {
    fn check(&self, ctx: &RequestContext, _customer_id: &str) -> Result<Access> {
        ctx.check()?;
        Ok(Access::Granted)
    }
}

/// Kinds of webhook events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// An alert's condition was detected.
    AlertConditionSatisfied,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlertConditionSatisfied => write!(f, "alert.condition.satisfied"),
        }
    }
}

/// Public view of an alert included in webhook payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertView {
    /// Alert id.
    pub id: String,
    /// Alert name.
    pub name: String,
    /// Creation time (unix seconds).
    pub create_time: i64,
    /// Last modification time (unix seconds).
    pub update_time: i64,
    /// Last digest time (unix seconds).
    pub last_alerted: Option<i64>,
    /// Digest recipients.
    pub recipients: Vec<String>,
    /// Alert configuration.
    pub config: Config,
}

impl From<&Alert> for AlertView {
    fn from(alert: &Alert) -> Self {
        Self {
            id: alert.id.clone(),
            name: alert.name.clone(),
            create_time: alert.time_created.timestamp(),
            update_time: alert.time_modified.timestamp(),
            last_alerted: alert.time_last_alerted.map(|t| t.timestamp()),
            recipients: alert.recipients.clone(),
            config: alert.config.clone(),
        }
    }
}

/// Payload of an `AlertConditionSatisfied` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertNotificationPayload {
    /// The alert that fired.
    pub alert: AlertView,
    /// Breakdown value, if any.
    pub breakdown: Option<String>,
    /// Breakdown label, if any.
    pub breakdown_label: Option<String>,
    /// Alert etag at detection time.
    pub etag: String,
    /// Detection time.
    pub time_detected: DateTime<Utc>,
    /// Digest time, if already sent.
    pub time_sent: Option<DateTime<Utc>>,
    /// Matched period.
    pub period: String,
    /// Detected value.
    pub value: f64,
}

impl AlertNotificationPayload {
    /// Builds the payload for a detection of `alert`.
    #[must_use]
    pub fn new(notification: &Notification, alert: &Alert) -> Self {
        Self {
            alert: AlertView::from(alert),
            breakdown: notification.breakdown.clone(),
            breakdown_label: notification.breakdown_label.clone(),
            etag: notification.etag.clone(),
            time_detected: notification.time_detected,
            time_sent: notification.time_sent,
            period: notification.period.clone(),
            value: notification.value,
        }
    }
}

/// A webhook event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    /// Event kind.
    pub kind: EventKind,
    /// Customer the event belongs to.
    pub customer_id: String,
    /// Alert the event is about.
    pub alert_id: String,
    /// Event payload.
    pub payload: AlertNotificationPayload,
}

impl WebhookEvent {
    /// Builds the `AlertConditionSatisfied` event for a newly recorded notification.
    #[must_use]
    pub fn condition_satisfied(notification: &Notification, alert: &Alert) -> Self {
        Self {
            kind: EventKind::AlertConditionSatisfied,
            customer_id: notification.customer_id.clone(),
            alert_id: notification.alert_id.clone(),
            payload: AlertNotificationPayload::new(notification, alert),
        }
    }
}

/// Delivers webhook events.
pub trait WebhookDispatcher: Send + Sync + fmt::Debug {
    /// Dispatches an event.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Dispatch` if the event cannot be delivered.
    fn dispatch(&self, ctx: &RequestContext, event: &WebhookEvent) -> Result<()>;
}

/// A [`WebhookDispatcher`] that logs events instead of delivering them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogWebhookDispatcher;

impl WebhookDispatcher for LogWebhookDispatcher {
    fn dispatch(&self, ctx: &RequestContext, event: &WebhookEvent) -> Result<()> {
        ctx.check()?;
        let payload = serde_json::to_string(&event.payload)?;
        info!(
            kind = %event.kind,
            customer_id = %event.customer_id,
            alert_id = %event.alert_id,
            "would dispatch webhook event"
        );
        debug!(payload = %payload, "webhook payload");
        Ok(())
    }
}

/// One digest message for one recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestEmail {
    /// Recipient address.
    pub recipient: String,
    /// Customer the digest belongs to.
    pub customer_id: String,
    /// One body per alert, in delivery order.
    pub notifications: Vec<EmailBody>,
}

/// Delivers digest mail.
pub trait MailTransport: Send + Sync + fmt::Debug {
    /// Sends one digest message.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Mail` if delivery fails.
    fn send(&self, ctx: &RequestContext, email: &DigestEmail) -> Result<()>;
}

/// A [`MailTransport`] that logs messages instead of delivering them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailTransport;

impl MailTransport for LogMailTransport {
    fn send(&self, ctx: &RequestContext, email: &DigestEmail) -> Result<()> {
        ctx.check()?;
        info!(
            recipient = %email.recipient,
            customer_id = %email.customer_id,
            alerts = email.notifications.len(),
            "would send digest email"
        );
        for body in &email.notifications {
            debug!(name = %body.name, condition = %body.condition, "digest section");
        }
        Ok(())
    }
}
