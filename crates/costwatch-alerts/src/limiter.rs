//! Per-period breakdown limiting.
//!
//! An alert with a breakdown dimension surfaces at most `limit` new breakdown values
//! per period and etag. Values already recorded are excluded from the next query so
//! the same value is never notified twice within one period.

use chrono::{DateTime, Utc};

use crate::context::RequestContext;
use crate::error::Result;
use crate::period::period;
use crate::store::NotificationStore;
use crate::types::{Alert, ConfigFilter, FilterLimit, TimeInterval};

/// Remaining breakdown budget of an alert for the current period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakdownPlan {
    /// The current period.
    pub period: String,
    /// Breakdown values already recorded this period.
    pub excluded: Vec<String>,
    /// How many new breakdown values may still be notified.
    pub quota: usize,
}

impl BreakdownPlan {
    /// Returns true if no further breakdown values may be notified.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.quota == 0
    }

    /// Builds the exclusion filter over `dimension`, or `None` once the quota is used up.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidLabelId` if `dimension` is not a `type:key` id.
    pub fn filter(&self, alert: &Alert, dimension: &str) -> Result<Option<ConfigFilter>> {
        if self.is_exhausted() {
            return Ok(None);
        }

        let mut filter = ConfigFilter::for_dimension(dimension)?
            .inverse()
            .with_limit(FilterLimit {
                limit: self.quota,
                order: alert.config.operator.limit_order(),
                metric: alert.config.metric,
            });
        filter.values.clone_from(&self.excluded);
        Ok(Some(filter))
    }
}

/// Computes breakdown plans from previously detected notifications.
#[derive(Debug, Clone, Copy)]
pub struct BreakdownLimiter<'a> {
    store: &'a dyn NotificationStore,
    limit: usize,
}

impl<'a> BreakdownLimiter<'a> {
    /// Creates a limiter capping new breakdown values at `limit` per period.
    #[must_use]
    pub const fn new(store: &'a dyn NotificationStore, limit: usize) -> Self {
        Self { store, limit }
    }

    /// Plans the breakdown budget of `alert` for the period containing `now`.
    ///
    /// Daily alerts always get the full budget; their notifications do not carry
    /// over between days.
    ///
    /// # Errors
    ///
    /// Returns an error if the interval is unsupported or the store lookup fails.
    pub fn plan(
        &self,
        ctx: &RequestContext,
        alert: &Alert,
        now: DateTime<Utc>,
    ) -> Result<BreakdownPlan> {
        let period = period(alert.config.time_interval, now)?;

        if alert.config.time_interval == TimeInterval::Day {
            return Ok(BreakdownPlan {
                period,
                excluded: Vec::new(),
                quota: self.limit,
            });
        }

        let detected = self
            .store
            .get_detected_breakdowns(ctx, &alert.etag, &alert.id, &period)?;

        Ok(BreakdownPlan {
            quota: self.limit.saturating_sub(detected.unsent),
            excluded: detected.values,
            period,
        })
    }
}
