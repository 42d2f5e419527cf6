//! Digest compilation.
//!
//! Pending notifications of one customer are grouped per alert into an
//! [`EmailBody`], fanned out to every recipient of the alert, and handed to a
//! [`MailTransport`] as one [`DigestEmail`] per recipient.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::channels::{Clock, DigestEmail, MailTransport};
use crate::config::EngineConfig;
use crate::context::RequestContext;
use crate::error::Result;
use crate::format::{condition_sentence, format_value};
use crate::labels::breakdown_label;
use crate::period::day_label;
use crate::store::{AlertStore, NotificationStore};
use crate::types::{Alert, Notification, Operator, TimeInterval};

/// Bucket size at which a body gets a top/bottom hits hint.
const TOP_HITS: usize = 10;

/// One breakdown value inside a timestamp bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailBodyItem {
    /// Breakdown value, or `N/A`.
    pub label: String,
    /// Formatted detected value.
    pub value: String,
    #[serde(skip)]
    sort_value: f64,
}

/// Notifications of one alert sharing a timestamp label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampData {
    /// `"Jan 2nd 2006"` for daily alerts, empty otherwise.
    pub timestamp: String,
    /// Breakdown items, when the alert has a breakdown dimension.
    pub items: Vec<EmailBodyItem>,
    /// Formatted value of a daily alert without breakdown.
    pub value: Option<String>,
    #[serde(skip)]
    sort_value: DateTime<Utc>,
}

/// The digest section of one alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailBody {
    /// Human label of the breakdown dimension.
    pub breakdown_label: Option<String>,
    /// Condition sentence.
    pub condition: String,
    /// Timestamp buckets, oldest first.
    pub notifications_data: Vec<TimestampData>,
    /// Set on the last body of each recipient's message.
    pub last_alert_in_email: bool,
    /// Alert name.
    pub name: String,
    /// `(below are the top 10 hits)` style hint.
    pub top_hits: Option<String>,
    /// Formatted value of a non-daily alert without breakdown.
    pub value: Option<String>,
}

impl EmailBody {
    fn new(alert: &Alert, condition: String, breakdown_label: Option<String>) -> Self {
        Self {
            breakdown_label,
            condition,
            notifications_data: Vec::new(),
            last_alert_in_email: false,
            name: alert.name.clone(),
            top_hits: None,
            value: None,
        }
    }

    fn add(
        &mut self,
        buckets: &mut BTreeMap<String, TimestampData>,
        interval: TimeInterval,
        notification: &Notification,
        formatted: String,
    ) {
        if self.breakdown_label.is_none() && interval != TimeInterval::Day {
            self.value = Some(formatted);
            return;
        }

        let timestamp = if interval == TimeInterval::Day {
            day_label(notification.time_detected)
        } else {
            String::new()
        };
        let bucket = buckets
            .entry(timestamp.clone())
            .or_insert_with(|| TimestampData {
                timestamp,
                items: Vec::new(),
                value: None,
                sort_value: notification.time_detected,
            });
        bucket.sort_value = bucket.sort_value.min(notification.time_detected);

        if self.breakdown_label.is_none() {
            bucket.value = Some(formatted);
        } else {
            bucket.items.push(EmailBodyItem {
                label: notification
                    .breakdown
                    .clone()
                    .unwrap_or_else(|| "N/A".to_string()),
                value: formatted,
                sort_value: notification.value,
            });
        }
    }

    fn finish(&mut self, operator: Operator, buckets: BTreeMap<String, TimestampData>) {
        self.notifications_data = buckets.into_values().collect();

        if self
            .notifications_data
            .iter()
            .any(|data| data.items.len() >= TOP_HITS)
        {
            self.top_hits = Some(match operator {
                Operator::GreaterThan => "(below are the top 10 hits)".to_string(),
                Operator::LessThan => "(below are the bottom 10 hits)".to_string(),
            });
        }

        for data in &mut self.notifications_data {
            match operator {
                Operator::GreaterThan => data
                    .items
                    .sort_by(|a, b| b.sort_value.total_cmp(&a.sort_value)),
                Operator::LessThan => data
                    .items
                    .sort_by(|a, b| a.sort_value.total_cmp(&b.sort_value)),
            }
        }

        self.notifications_data
            .sort_by(|a, b| a.sort_value.cmp(&b.sort_value));
    }

    fn is_empty(&self) -> bool {
        self.value.is_none() && self.notifications_data.is_empty()
    }
}

/// Email bodies per recipient address.
pub type RecipientsBodyMap = BTreeMap<String, Vec<EmailBody>>;

/// Outcome of one customer's digest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DigestReport {
    /// Alerts that contributed a body.
    pub alerts_included: usize,
    /// Notifications stamped as sent.
    pub notifications_sent: usize,
    /// Messages accepted by the transport.
    pub emails_sent: usize,
    /// Messages the transport rejected.
    pub emails_failed: usize,
    /// Recipients outside the allowed domains.
    pub recipients_skipped: usize,
}

/// Compiles and sends digests.
#[derive(Debug, Clone, Copy)]
pub struct DigestBuilder<'a> {
    notifications: &'a dyn NotificationStore,
    alerts: &'a dyn AlertStore,
    clock: &'a dyn Clock,
    config: &'a EngineConfig,
}

impl<'a> DigestBuilder<'a> {
    /// Creates a digest builder.
    #[must_use]
    pub const fn new(
        notifications: &'a dyn NotificationStore,
        alerts: &'a dyn AlertStore,
        clock: &'a dyn Clock,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            notifications,
            alerts,
            clock,
            config,
        }
    }

    /// Builds the bodies for every recipient of `customer_id`'s pending notifications.
    ///
    /// Each included notification is stamped as sent. Per-alert failures are logged
    /// and skip that alert.
    ///
    /// # Errors
    ///
    /// Returns an error if the pending notifications cannot be read or the
    /// context is cancelled before any of them is stamped. A later cancellation
    /// stops at the next alert and keeps the bodies already built.
    pub fn build_for_customer(
        &self,
        ctx: &RequestContext,
        customer_id: &str,
    ) -> Result<RecipientsBodyMap> {
        self.collect(ctx, customer_id, &mut DigestReport::default())
    }

    /// Builds the digest of `customer_id` and sends one message per recipient.
    ///
    /// Transport failures are logged and counted; they never stop other recipients.
    ///
    /// # Errors
    ///
    /// Returns an error if the digest cannot be built.
    pub fn send_for_customer(
        &self,
        ctx: &RequestContext,
        customer_id: &str,
        transport: &dyn MailTransport,
    ) -> Result<DigestReport> {
        let mut report = DigestReport::default();
        let recipients = self.collect(ctx, customer_id, &mut report)?;

        for (recipient, notifications) in recipients {
            if !self.config.recipient_allowed(&recipient) {
                info!(recipient = %recipient, customer_id = %customer_id, "digest recipient outside allowed domains, skipping");
                report.recipients_skipped += 1;
                continue;
            }

            let email = DigestEmail {
                recipient,
                customer_id: customer_id.to_string(),
                notifications,
            };
            match transport.send(ctx, &email) {
                Ok(()) => report.emails_sent += 1,
                Err(e) => {
                    error!(recipient = %email.recipient, customer_id = %customer_id, error = %e, "failed to send digest email");
                    report.emails_failed += 1;
                }
            }
        }

        Ok(report)
    }

    fn collect(
        &self,
        ctx: &RequestContext,
        customer_id: &str,
        report: &mut DigestReport,
    ) -> Result<RecipientsBodyMap> {
        ctx.check()?;
        let pending = self
            .notifications
            .get_alert_detected_notifications(ctx, customer_id)?;
        let mut recipients = RecipientsBodyMap::new();

        for (alert_id, notifications) in pending {
            // Bodies already built hold notifications stamped as sent; they must still go out.
            if ctx.is_cancelled() {
                warn!(customer_id = %customer_id, alerts_included = report.alerts_included, "digest cancelled, sending the bodies built so far");
                break;
            }

            let alert = match self.alerts.get_alert(ctx, &alert_id) {
                Ok(alert) => alert,
                Err(e) => {
                    error!(alert_id = %alert_id, error = %e, "failed to read alert for digest");
                    continue;
                }
            };

            let (body, targets, sent) = match self.alert_body(ctx, &alert, &notifications) {
                Ok(Some(built)) => built,
                Ok(None) => continue,
                Err(e) => {
                    error!(alert_id = %alert_id, error = %e, "failed to build alert email body");
                    continue;
                }
            };

            report.alerts_included += 1;
            report.notifications_sent += sent;
            for recipient in targets {
                recipients.entry(recipient).or_default().push(body.clone());
            }

            if let Err(e) = self
                .alerts
                .update_alert_notified(ctx, &alert_id, self.clock.now())
            {
                error!(alert_id = %alert_id, error = %e, "failed to update alert notified time");
            }
        }

        for bodies in recipients.values_mut() {
            if let Some(last) = bodies.last_mut() {
                last.last_alert_in_email = true;
            }
        }

        Ok(recipients)
    }

    /// Builds one alert's body, returning it with its recipients and the number
    /// of notifications stamped as sent.
    fn alert_body(
        &self,
        ctx: &RequestContext,
        alert: &Alert,
        notifications: &[Notification],
    ) -> Result<Option<(EmailBody, Vec<String>, usize)>> {
        let Some(first) = notifications.iter().find(|n| n.etag == alert.etag) else {
            debug!(alert_id = %alert.id, "no pending notifications match the alert etag");
            return Ok(None);
        };
        let targets = if first.recipients.is_empty() {
            alert.recipients.clone()
        } else {
            first.recipients.clone()
        };

        let label = alert.config.breakdown().map(breakdown_label).transpose()?;
        let condition = condition_sentence(alert, &self.config.extended_metric_labels);
        let mut body = EmailBody::new(alert, condition, label);
        let mut buckets = BTreeMap::new();
        let mut sent = 0;

        for notification in notifications {
            if notification.etag != alert.etag {
                warn!(alert_id = %alert.id, period = %notification.period, "notification etag does not match alert etag");
                continue;
            }
            if let Err(e) =
                self.notifications
                    .mark_sent(ctx, &notification.identity_key(), self.clock.now())
            {
                error!(alert_id = %alert.id, period = %notification.period, error = %e, "failed to update notification time sent");
                continue;
            }
            sent += 1;
            let formatted = format_value(&alert.config, notification.value);
            body.add(&mut buckets, alert.config.time_interval, notification, formatted);
        }

        body.finish(alert.config.operator, buckets);
        if body.is_empty() {
            return Ok(None);
        }
        Ok(Some((body, targets, sent)))
    }
}
