//! Engine configuration.

use std::collections::HashMap;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

/// Configuration for the alert engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of new breakdown values notified per alert and period.
    pub breakdown_limit: usize,
    /// Usage percentage change at or below which a cost percentage alert is treated as noise.
    pub percentage_noise_threshold: f64,
    /// Alerts whose only recipient is this address are not evaluated.
    pub noreply_recipient: Option<String>,
    /// How long an invalid alert may stay unmodified before it is deleted (in seconds).
    pub dangling_alert_grace_secs: u64,
    /// When set, digest mail is only delivered to addresses in these domains.
    pub allowed_recipient_domains: Option<Vec<String>>,
    /// Display labels of extended metrics, keyed by metric key.
    pub extended_metric_labels: HashMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            breakdown_limit: 10,
            percentage_noise_threshold: 5.0,
            noreply_recipient: Some("no-reply@costwatch.dev".to_string()),
            dangling_alert_grace_secs: 24 * 3600,
            allowed_recipient_domains: None,
            extended_metric_labels: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Sets the per-period breakdown cap.
    #[must_use]
    pub const fn with_breakdown_limit(mut self, limit: usize) -> Self {
        self.breakdown_limit = limit;
        self
    }

    /// Sets the usage noise threshold for cost percentage alerts.
    #[must_use]
    pub const fn with_noise_threshold(mut self, threshold: f64) -> Self {
        self.percentage_noise_threshold = threshold;
        self
    }

    /// Sets (or clears) the no-reply address.
    #[must_use]
    pub fn with_noreply_recipient(mut self, recipient: Option<String>) -> Self {
        self.noreply_recipient = recipient;
        self
    }

    /// Restricts digest delivery to the given recipient domains.
    #[must_use]
    pub fn with_allowed_domains(mut self, domains: Vec<String>) -> Self {
        self.allowed_recipient_domains = Some(domains);
        self
    }

    /// Adds a display label for an extended metric.
    #[must_use]
    pub fn with_extended_metric_label(
        mut self,
        key: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        self.extended_metric_labels.insert(key.into(), label.into());
        self
    }

    /// Grace period for invalid alerts.
    #[must_use]
    pub fn dangling_grace(&self) -> TimeDelta {
        i64::try_from(self.dangling_alert_grace_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX)
    }

    /// Returns true if digest mail may be delivered to `recipient`.
    #[must_use]
    pub fn recipient_allowed(&self, recipient: &str) -> bool {
        let Some(domains) = &self.allowed_recipient_domains else {
            return true;
        };
        recipient
            .rsplit_once('@')
            .is_some_and(|(_, domain)| domains.iter().any(|d| d.eq_ignore_ascii_case(domain)))
    }
}
