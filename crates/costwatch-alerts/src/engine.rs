//! Alert engine for refreshing alerts and sending digests.
//!
//! The [`AlertEngine`] is the main entry point. It wires the request builder,
//! breakdown limiter, evaluator, notification store and digest builder to the
//! external collaborators, and executes queued [`Task`]s.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::channels::{
    Access, AccessChecker, AllowAll, Clock, LogMailTransport, LogWebhookDispatcher, MailTransport,
    QueryExecutor, SystemClock, WebhookDispatcher, WebhookEvent,
};
use crate::config::EngineConfig;
use crate::context::RequestContext;
use crate::digest::{DigestBuilder, DigestReport};
use crate::error::Result;
use crate::evaluator::Evaluator;
use crate::format::condition_sentence;
use crate::limiter::BreakdownLimiter;
use crate::query::RequestBuilder;
use crate::queue::{Task, TaskQueue};
use crate::store::{AlertStore, NotificationStore};

/// Why a refresh did not evaluate its alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The customer is not entitled to alerts.
    AccessDenied {
        /// Reason given by the access checker.
        reason: String,
    },
    /// The alert's only recipient is the no-reply address.
    NoReplyOnly,
    /// The breakdown quota of the current period is used up.
    QuotaExhausted,
}

/// The result of refreshing one alert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// The refreshed alert.
    pub alert_id: String,
    /// Set when the alert was not evaluated.
    pub skipped: Option<SkipReason>,
    /// Notifications produced by the evaluator.
    pub detected: usize,
    /// Notifications written to the store.
    pub added: usize,
    /// Webhook events delivered.
    pub webhooks_sent: usize,
    /// Webhook events that failed.
    pub webhook_failures: usize,
}

impl RefreshReport {
    fn skipped(alert_id: &str, reason: SkipReason) -> Self {
        Self {
            alert_id: alert_id.to_string(),
            skipped: Some(reason),
            ..Self::default()
        }
    }
}

/// The result of a refresh fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleReport {
    /// Alerts seen after garbage collection.
    pub alerts_listed: usize,
    /// Tasks enqueued.
    pub enqueued: usize,
    /// Alerts skipped because their customer has no access.
    pub denied: usize,
    /// Alerts skipped because of an access check or enqueue failure.
    pub failed: usize,
}

/// The result of running one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// A refresh ran.
    Refreshed(RefreshReport),
    /// A digest ran.
    Digested(DigestReport),
}

/// Refreshes alerts and sends digests against pluggable collaborators.
#[derive(Debug)]
pub struct AlertEngine {
    config: EngineConfig,
    evaluator: Evaluator,
    alerts: Arc<dyn AlertStore>,
    notifications: Arc<dyn NotificationStore>,
    executor: Arc<dyn QueryExecutor>,
    queue: Arc<dyn TaskQueue>,
    access: Arc<dyn AccessChecker>,
    webhooks: Arc<dyn WebhookDispatcher>,
    mail: Arc<dyn MailTransport>,
    clock: Arc<dyn Clock>,
}

impl AlertEngine {
    /// Creates a new engine builder over the required collaborators.
    pub fn builder(
        alerts: Arc<dyn AlertStore>,
        notifications: Arc<dyn NotificationStore>,
        executor: Arc<dyn QueryExecutor>,
        queue: Arc<dyn TaskQueue>,
    ) -> AlertEngineBuilder {
        AlertEngineBuilder {
            config: EngineConfig::default(),
            alerts,
            notifications,
            executor,
            queue,
            access: Arc::new(AllowAll),
            webhooks: Arc::new(LogWebhookDispatcher),
            mail: Arc::new(LogMailTransport),
            clock: Arc::new(SystemClock),
        }
    }

    /// The engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ============ Refresh ============

    /// Lists every alert and enqueues one refresh task per alert whose customer
    /// has access.
    ///
    /// Dangling alerts are deleted while listing. Access is checked once per
    /// customer; a failed check is logged and not cached.
    ///
    /// # Errors
    ///
    /// Returns an error if the alerts cannot be listed.
    pub fn refresh_all(&self, ctx: &RequestContext) -> Result<ScheduleReport> {
        let now = self.clock.now();
        let alerts = self
            .alerts
            .list_alerts(ctx, now, self.config.dangling_grace())?;

        let mut report = ScheduleReport {
            alerts_listed: alerts.len(),
            ..ScheduleReport::default()
        };
        let mut access: HashMap<String, bool> = HashMap::new();

        for alert in &alerts {
            let granted = if let Some(granted) = access.get(&alert.customer_id) {
                *granted
            } else {
                match self.access.check(ctx, &alert.customer_id) {
                    Ok(result) => {
                        let granted = result.is_granted();
                        access.insert(alert.customer_id.clone(), granted);
                        granted
                    }
                    Err(e) => {
                        error!(customer_id = %alert.customer_id, error = %e, "failed to check alerts access");
                        report.failed += 1;
                        continue;
                    }
                }
            };

            if !granted {
                info!(customer_id = %alert.customer_id, alert_id = %alert.id, "customer does not have access to alerts");
                report.denied += 1;
                continue;
            }

            match self.queue.enqueue(ctx, Task::refresh(&alert.id)) {
                Ok(()) => report.enqueued += 1,
                Err(e) => {
                    error!(alert_id = %alert.id, error = %e, "failed to enqueue refresh task");
                    report.failed += 1;
                }
            }
        }

        debug!(
            alerts = report.alerts_listed,
            enqueued = report.enqueued,
            denied = report.denied,
            "refresh fan-out complete"
        );

        Ok(report)
    }

    /// Evaluates one alert and records what it detects.
    ///
    /// Newly added notifications are dispatched as webhook events; dispatch
    /// failures are logged and counted.
    ///
    /// # Errors
    ///
    /// Returns an error if the alert is missing or invalid, or if building,
    /// executing, evaluating or storing fails.
    pub fn refresh_alert(&self, ctx: &RequestContext, alert_id: &str) -> Result<RefreshReport> {
        let alert = self.alerts.get_alert(ctx, alert_id)?;

        let access = self.access.check(ctx, &alert.customer_id)?;
        if let Access::Denied { reason } = access {
            info!(customer_id = %alert.customer_id, alert_id = %alert_id, reason = %reason, "customer does not have access to alerts");
            return Ok(RefreshReport::skipped(alert_id, SkipReason::AccessDenied { reason }));
        }

        alert.validate()?;

        if let Some(noreply) = &self.config.noreply_recipient {
            if alert.only_noreply(noreply) {
                debug!(alert_id = %alert_id, "alert only notifies the no-reply address, skipping");
                return Ok(RefreshReport::skipped(alert_id, SkipReason::NoReplyOnly));
            }
        }

        let now = self.clock.now();
        let limiter = BreakdownLimiter::new(self.notifications.as_ref(), self.config.breakdown_limit);
        let Some(request) = RequestBuilder::new(limiter).build(ctx, &alert, now)? else {
            return Ok(RefreshReport::skipped(alert_id, SkipReason::QuotaExhausted));
        };

        let result = self.executor.execute(ctx, &request)?;
        let mut detected = self.evaluator.evaluate(&alert, &request, &result, now)?;

        let mut report = RefreshReport {
            alert_id: alert_id.to_string(),
            detected: detected.len(),
            ..RefreshReport::default()
        };
        if detected.is_empty() {
            debug!(alert_id = %alert_id, "condition not met");
            return Ok(report);
        }

        let condition = condition_sentence(&alert, &self.config.extended_metric_labels);
        for notification in &mut detected {
            notification.alert_name.clone_from(&alert.name);
            notification.condition_string.clone_from(&condition);
        }

        let added = self
            .notifications
            .add_detected_notifications(ctx, &detected, &alert.etag)?;
        report.added = added.len();

        for notification in &added {
            let event = WebhookEvent::condition_satisfied(notification, &alert);
            match self.webhooks.dispatch(ctx, &event) {
                Ok(()) => report.webhooks_sent += 1,
                Err(e) => {
                    warn!(alert_id = %alert_id, event = %event.kind, error = %e, "failed to dispatch webhook event");
                    report.webhook_failures += 1;
                }
            }
        }

        info!(
            alert_id = %alert_id,
            customer_id = %alert.customer_id,
            detected = report.detected,
            added = report.added,
            "alert refreshed"
        );

        Ok(report)
    }

    // ============ Digest ============

    /// Enqueues one digest task per customer with pending notifications.
    ///
    /// Enqueue failures are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the pending customers cannot be read.
    pub fn schedule_digests(&self, ctx: &RequestContext) -> Result<usize> {
        let mut enqueued = 0;
        for customer_id in self.notifications.get_customers_with_pending(ctx)? {
            match self.queue.enqueue(ctx, Task::digest(&customer_id)) {
                Ok(()) => enqueued += 1,
                Err(e) => {
                    error!(customer_id = %customer_id, error = %e, "failed to enqueue digest task");
                }
            }
        }
        Ok(enqueued)
    }

    /// Builds and sends the digest of one customer.
    ///
    /// A customer without access keeps its notifications pending.
    ///
    /// # Errors
    ///
    /// Returns an error if the access check fails or the pending notifications
    /// cannot be read.
    pub fn send_digest(&self, ctx: &RequestContext, customer_id: &str) -> Result<DigestReport> {
        if let Access::Denied { reason } = self.access.check(ctx, customer_id)? {
            info!(customer_id = %customer_id, reason = %reason, "customer does not have access to alerts, digest skipped");
            return Ok(DigestReport::default());
        }

        let report = DigestBuilder::new(
            self.notifications.as_ref(),
            self.alerts.as_ref(),
            self.clock.as_ref(),
            &self.config,
        )
        .send_for_customer(ctx, customer_id, self.mail.as_ref())?;

        info!(
            customer_id = %customer_id,
            alerts = report.alerts_included,
            emails_sent = report.emails_sent,
            emails_failed = report.emails_failed,
            "digest sent"
        );

        Ok(report)
    }

    /// Executes a queued task.
    ///
    /// # Errors
    ///
    /// Returns the task's error; the caller decides whether to re-enqueue it.
    pub fn run_task(&self, ctx: &RequestContext, task: &Task) -> Result<TaskOutcome> {
        ctx.check()?;
        match task {
            Task::RefreshAlert { alert_id } => {
                self.refresh_alert(ctx, alert_id).map(TaskOutcome::Refreshed)
            }
            Task::SendDigest { customer_id } => {
                self.send_digest(ctx, customer_id).map(TaskOutcome::Digested)
            }
        }
    }
}

/// Builder for creating an [`AlertEngine`].
#[derive(Debug)]
pub struct AlertEngineBuilder {
    config: EngineConfig,
    alerts: Arc<dyn AlertStore>,
    notifications: Arc<dyn NotificationStore>,
    executor: Arc<dyn QueryExecutor>,
    queue: Arc<dyn TaskQueue>,
    access: Arc<dyn AccessChecker>,
    webhooks: Arc<dyn WebhookDispatcher>,
    mail: Arc<dyn MailTransport>,
    clock: Arc<dyn Clock>,
}

impl AlertEngineBuilder {
    /// Sets the engine configuration.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the entitlement checker.
    #[must_use]
    pub fn access(mut self, access: Arc<dyn AccessChecker>) -> Self {
        self.access = access;
        self
    }

    /// Sets the webhook dispatcher.
    #[must_use]
    pub fn webhooks(mut self, webhooks: Arc<dyn WebhookDispatcher>) -> Self {
        self.webhooks = webhooks;
        self
    }

    /// Sets the mail transport.
    #[must_use]
    pub fn mail(mut self, mail: Arc<dyn MailTransport>) -> Self {
        self.mail = mail;
        self
    }

    /// Sets the clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Builds the engine.
    #[must_use]
    pub fn build(self) -> AlertEngine {
        AlertEngine {
            evaluator: Evaluator::new(self.config.percentage_noise_threshold),
            config: self.config,
            alerts: self.alerts,
            notifications: self.notifications,
            executor: self.executor,
            queue: self.queue,
            access: self.access,
            webhooks: self.webhooks,
            mail: self.mail,
            clock: self.clock,
        }
    }
}
