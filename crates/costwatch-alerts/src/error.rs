//! Error types for the costwatch-alerts crate.

use thiserror::Error;

/// Errors that can occur while evaluating alerts and delivering notifications.
#[derive(Debug, Error)]
pub enum AlertError {
    /// The stored alert failed validation and cannot be evaluated.
    #[error("invalid alert {id}: {reason}")]
    InvalidAlert {
        /// The alert ID.
        id: String,
        /// The reason the alert is invalid.
        reason: String,
    },

    /// Unknown condition kind.
    #[error("invalid condition: {value}")]
    InvalidCondition {
        /// The rejected value.
        value: String,
    },

    /// Unknown comparison operator.
    #[error("invalid operator: {value}")]
    InvalidOperator {
        /// The rejected value.
        value: String,
    },

    /// Unknown metric.
    #[error("invalid metric: {value}")]
    InvalidMetric {
        /// The rejected value.
        value: String,
    },

    /// A time interval string could not be parsed.
    #[error("invalid time interval: {value}")]
    InvalidTimeInterval {
        /// The rejected value.
        value: String,
    },

    /// The alert's time interval is not supported by an interval-dependent operation.
    #[error("invalid alert time interval: {interval}")]
    InvalidAlertTimeInterval {
        /// The interval that was rejected.
        interval: String,
    },

    /// A result cell had an unexpected type.
    #[error("invalid table cell at index {index}: {reason}")]
    InvalidCell {
        /// Column index of the cell.
        index: usize,
        /// What was wrong with it.
        reason: String,
    },

    /// A result row could not be interpreted.
    #[error("invalid row: {reason}")]
    InvalidRow {
        /// What was wrong with it.
        reason: String,
    },

    /// Forecast evaluation was given no rows.
    #[error("no forecast rows")]
    NoForecastRows,

    /// A breakdown dimension id could not be resolved to a label.
    #[error("invalid label id {id}: {reason}")]
    InvalidLabelId {
        /// The dimension id.
        id: String,
        /// The reason resolution failed.
        reason: String,
    },

    /// A document was not found.
    #[error("{collection}/{key} not found")]
    NotFound {
        /// The collection searched.
        collection: String,
        /// The missing key.
        key: String,
    },

    /// A transaction could not commit.
    #[error("transaction conflict on {key}")]
    TransactionConflict {
        /// The contended key.
        key: String,
    },

    /// Document store failure.
    #[error("store error: {reason}")]
    Store {
        /// The reason the store failed.
        reason: String,
    },

    /// The analytics query executor failed.
    #[error("query failed: {reason}")]
    Query {
        /// The reason the query failed.
        reason: String,
    },

    /// The entitlement checker failed.
    #[error("access check failed: {reason}")]
    Access {
        /// The reason the check failed.
        reason: String,
    },

    /// Webhook dispatch failed.
    #[error("webhook dispatch failed: {reason}")]
    Dispatch {
        /// The reason dispatch failed.
        reason: String,
    },

    /// Mail delivery failed.
    #[error("mail delivery failed: {reason}")]
    Mail {
        /// The reason delivery failed.
        reason: String,
    },

    /// The task queue rejected a task.
    #[error("queue error: {reason}")]
    Queue {
        /// The reason the queue failed.
        reason: String,
    },

    /// The caller cancelled the operation or its deadline passed.
    #[error("operation cancelled")]
    Cancelled,

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),
}

impl AlertError {
    /// Returns true for errors describing a malformed alert configuration.
    ///
    /// These are surfaced to the caller and never retried.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidAlert { .. }
                | Self::InvalidCondition { .. }
                | Self::InvalidOperator { .. }
                | Self::InvalidMetric { .. }
                | Self::InvalidTimeInterval { .. }
        )
    }

    /// Returns true for contract violations between the query executor and the evaluator.
    #[must_use]
    pub const fn is_cell_interpretation(&self) -> bool {
        matches!(
            self,
            Self::InvalidCell { .. }
                | Self::InvalidRow { .. }
                | Self::InvalidAlertTimeInterval { .. }
                | Self::NoForecastRows
                | Self::InvalidLabelId { .. }
        )
    }
}

impl From<serde_json::Error> for AlertError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// Result type for alert operations.
pub type Result<T> = std::result::Result<T, AlertError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_invalid_alert() {
        let err = AlertError::InvalidAlert {
            id: "a1".to_string(),
            reason: "etag is empty".to_string(),
        };
        assert_eq!(err.to_string(), "invalid alert a1: etag is empty");
    }

    #[test]
    fn error_display_invalid_cell() {
        let err = AlertError::InvalidCell {
            index: 3,
            reason: "expected number".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid table cell at index 3: expected number"
        );
    }

    #[test]
    fn error_display_interval() {
        let err = AlertError::InvalidAlertTimeInterval {
            interval: "hour".to_string(),
        };
        assert_eq!(err.to_string(), "invalid alert time interval: hour");
    }

    #[test]
    fn error_display_no_forecast_rows() {
        assert_eq!(AlertError::NoForecastRows.to_string(), "no forecast rows");
    }

    #[test]
    fn error_display_not_found() {
        let err = AlertError::NotFound {
            collection: "alerts".to_string(),
            key: "x".to_string(),
        };
        assert_eq!(err.to_string(), "alerts/x not found");
    }

    #[test]
    fn taxonomy_classification() {
        assert!(AlertError::InvalidOperator {
            value: ">=".to_string()
        }
        .is_validation());
        assert!(AlertError::NoForecastRows.is_cell_interpretation());
        assert!(!AlertError::Cancelled.is_validation());
        assert!(!AlertError::Store {
            reason: "down".to_string()
        }
        .is_cell_interpretation());
    }

    #[test]
    fn error_from_serde_json() {
        let json_err = serde_json::from_str::<String>("invalid json");
        assert!(json_err.is_err());
        let alert_err: AlertError = json_err.unwrap_err().into();
        assert!(matches!(alert_err, AlertError::SerializationError(_)));
    }
}
