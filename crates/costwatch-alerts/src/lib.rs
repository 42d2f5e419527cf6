//! Cost and usage alert evaluation for Costwatch.
//!
//! `costwatch-alerts` turns customer-defined alert configurations into
//! analytics queries, checks the result rows against the alert's condition,
//! records deduplicated notifications, and later compiles them into digest
//! emails and webhook events.
//!
//! # Features
//!
//! - **Three conditions**: absolute value, percentage change against the previous
//!   period, and end-of-period forecast
//! - **Breakdown limiting**: at most ten new breakdown values per alert and period
//! - **Exactly-once notifications**: transactional inserts keyed by alert, period and
//!   breakdown value, safe under at-least-once task delivery
//! - **Digests**: one email per recipient grouping every pending notification
//! - **Pluggable collaborators**: query executor, document store, task queue, mail
//!   transport, webhook dispatcher and entitlement checker are traits
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use costwatch_alerts::{
//!     Alert, AlertEngine, AlertStore, Cell, Condition, Config, DocumentAlertStore,
//!     DocumentNotificationStore, MemoryDocumentStore, MemoryTaskQueue, Metric, Operator,
//!     QueryResult, RequestContext, StaticQueryExecutor, TimeInterval,
//! };
//!
//! let alerts = Arc::new(DocumentAlertStore::new(MemoryDocumentStore::new()));
//! let notifications = Arc::new(DocumentNotificationStore::new(MemoryDocumentStore::new()));
//! let executor = Arc::new(StaticQueryExecutor::new());
//! let engine = AlertEngine::builder(
//!     alerts.clone(),
//!     notifications,
//!     executor.clone(),
//!     Arc::new(MemoryTaskQueue::new()),
//! )
//! .build();
//!
//! // Yearly cost above $100 for one attribution
//! let config = Config::new(
//!     Condition::Value,
//!     Operator::GreaterThan,
//!     100.0,
//!     Metric::Cost,
//!     TimeInterval::Year,
//! )
//! .with_scope(vec!["attr-1".to_string()]);
//! let alert = Alert::builder("yearly spend", "cust-1", config)
//!     .id("a1")
//!     .recipient("ops@example.com")
//!     .etag("v1")
//!     .build();
//!
//! let ctx = RequestContext::new();
//! alerts.put_alert(&ctx, &alert)?;
//!
//! executor.insert(
//!     "a1",
//!     QueryResult {
//!         rows: vec![vec![Cell::String("2024".to_string()), Cell::Float(250.0)]],
//!         forecast_rows: Vec::new(),
//!     },
//! );
//!
//! let report = engine.refresh_alert(&ctx, "a1")?;
//! assert_eq!(report.added, 1);
//! # Ok::<(), costwatch_alerts::AlertError>(())
//! ```
//!
//! # Task fan-out
//!
//! [`AlertEngine::refresh_all`] and [`AlertEngine::schedule_digests`] only enqueue
//! [`Task`]s; a worker drains the queue and calls [`AlertEngine::run_task`]. Every
//! task may run more than once.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod channels;
pub mod config;
pub mod context;
pub mod digest;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod format;
pub mod labels;
pub mod limiter;
pub mod period;
pub mod query;
pub mod queue;
pub mod store;
pub mod types;

// Re-export main types at crate root
pub use channels::{
    Access, AccessChecker, AllowAll, Clock, DigestEmail, EventKind, FixedClock,
    LogMailTransport, LogWebhookDispatcher, MailTransport, QueryExecutor, StaticQueryExecutor,
    SystemClock, WebhookDispatcher, WebhookEvent,
};
pub use config::EngineConfig;
pub use context::RequestContext;
pub use digest::{DigestBuilder, DigestReport, EmailBody, RecipientsBodyMap};
pub use engine::{
    AlertEngine, AlertEngineBuilder, RefreshReport, ScheduleReport, SkipReason, TaskOutcome,
};
pub use error::{AlertError, Result};
pub use evaluator::Evaluator;
pub use limiter::{BreakdownLimiter, BreakdownPlan};
pub use query::{Cell, QueryRequest, QueryResult, RequestBuilder, TimeSettings};
pub use queue::{MemoryTaskQueue, Task, TaskQueue};
pub use store::{
    AlertStore, DocumentAlertStore, DocumentNotificationStore, DocumentStore,
    MemoryDocumentStore, NotificationStore,
};
pub use types::{Alert, Condition, Config, Metric, Notification, Operator, TimeInterval};
