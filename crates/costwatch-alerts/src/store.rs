//! Document storage and the notification/alert stores built on it.
//!
//! This module provides:
//! - [`DocumentStore`]: point reads and writes, filtered collection queries and a
//!   single-document read-modify-write transaction
//! - [`MemoryDocumentStore`]: a lock-based implementation with JSON snapshot persistence
//! - [`NotificationStore`] / [`AlertStore`]: the engine's view of persisted records,
//!   implemented over any [`DocumentStore`]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::Path;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::context::RequestContext;
use crate::error::{AlertError, Result};
use crate::types::{Alert, Condition, Metric, Notification, Operator, TimeInterval};

/// Collection holding alert definitions.
pub const ALERTS: &str = "alerts";

/// Collection holding detected notifications.
pub const NOTIFICATIONS: &str = "notifications";

/// A predicate on a top-level document field. Missing fields read as `null`.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldFilter {
    /// Field equals the value.
    Eq(String, Value),
    /// Field equals one of the values.
    In(String, Vec<Value>),
    /// Field is null or missing.
    IsNull(String),
    /// Field is present and not null.
    NotNull(String),
}

impl FieldFilter {
    /// Equality on a string field.
    #[must_use]
    pub fn eq(field: &str, value: impl Into<String>) -> Self {
        Self::Eq(field.to_string(), Value::String(value.into()))
    }

    /// Returns true if `doc` satisfies the predicate.
    #[must_use]
    pub fn matches(&self, doc: &Value) -> bool {
        let field = |name: &str| doc.get(name).unwrap_or(&Value::Null);
        match self {
            Self::Eq(name, value) => field(name) == value,
            Self::In(name, values) => values.contains(field(name)),
            Self::IsNull(name) => field(name).is_null(),
            Self::NotNull(name) => !field(name).is_null(),
        }
    }
}

/// Outcome of a transaction body.
#[derive(Debug, Clone, PartialEq)]
pub enum TxWrite {
    /// Leave the document as it is.
    Keep,
    /// Replace (or create) the document.
    Put(Value),
}

/// Transaction body: sees the current document and decides what to write.
pub type TxFn<'a> = dyn FnMut(Option<&Value>) -> Result<TxWrite> + 'a;

/// A keyed JSON document store.
pub trait DocumentStore: Send + Sync + fmt::Debug {
    /// Reads a document.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable or the context is cancelled.
    fn get(&self, ctx: &RequestContext, collection: &str, key: &str) -> Result<Option<Value>>;

    /// Writes a document, replacing any existing one.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails or the context is cancelled.
    fn put(&self, ctx: &RequestContext, collection: &str, key: &str, doc: Value) -> Result<()>;

    /// Deletes a document, returning whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails or the context is cancelled.
    fn delete(&self, ctx: &RequestContext, collection: &str, key: &str) -> Result<bool>;

    /// Returns `(key, document)` pairs matching every filter, ordered by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the context is cancelled.
    fn query(
        &self,
        ctx: &RequestContext,
        collection: &str,
        filters: &[FieldFilter],
    ) -> Result<Vec<(String, Value)>>;

    /// Runs a read-modify-write transaction on one document.
    ///
    /// Returns true if the body asked for a write and it was committed. If the body
    /// fails or the context is cancelled before commit, the document keeps its prior state.
    ///
    /// # Errors
    ///
    /// Returns the body's error, `AlertError::Cancelled`, or a store failure.
    fn transaction(
        &self,
        ctx: &RequestContext,
        collection: &str,
        key: &str,
        body: &mut TxFn<'_>,
    ) -> Result<bool>;
}

type Collections = HashMap<String, BTreeMap<String, Value>>;

/// In-memory [`DocumentStore`].
///
/// Transactions hold the store's write lock for their whole body, which serializes
/// concurrent transactions on the same key.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<Collections>,
}

impl MemoryDocumentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a store from a JSON snapshot written by [`save_snapshot`](Self::save_snapshot).
    ///
    /// A missing file yields an empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid snapshot.
    pub fn load_snapshot(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "no snapshot, starting empty");
            return Ok(Self::new());
        }
        let contents = std::fs::read_to_string(path).map_err(|e| AlertError::Store {
            reason: format!("failed to read {}: {e}", path.display()),
        })?;
        let collections: Collections = serde_json::from_str(&contents)?;
        info!(
            path = %path.display(),
            collections = collections.len(),
            "loaded document snapshot"
        );
        Ok(Self {
            collections: RwLock::new(collections),
        })
    }

    /// Writes every collection to a JSON snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(&*self.collections.read())?;
        std::fs::write(path, json).map_err(|e| AlertError::Store {
            reason: format!("failed to write {}: {e}", path.display()),
        })
    }

    /// Number of documents in a collection.
    #[must_use]
    pub fn len(&self, collection: &str) -> usize {
        self.collections.read().get(collection).map_or(0, BTreeMap::len)
    }

    /// Returns true if the collection holds no documents.
    #[must_use]
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn get(&self, ctx: &RequestContext, collection: &str, key: &str) -> Result<Option<Value>> {
        ctx.check()?;
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|docs| docs.get(key))
            .cloned())
    }

    fn put(&self, ctx: &RequestContext, collection: &str, key: &str, doc: Value) -> Result<()> {
        ctx.check()?;
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), doc);
        Ok(())
    }

    fn delete(&self, ctx: &RequestContext, collection: &str, key: &str) -> Result<bool> {
        ctx.check()?;
        Ok(self
            .collections
            .write()
            .get_mut(collection)
            .is_some_and(|docs| docs.remove(key).is_some()))
    }

    fn query(
        &self,
        ctx: &RequestContext,
        collection: &str,
        filters: &[FieldFilter],
    ) -> Result<Vec<(String, Value)>> {
        ctx.check()?;
        let collections = self.collections.read();
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(docs
            .iter()
            .filter(|(_, doc)| filters.iter().all(|f| f.matches(doc)))
            .map(|(k, doc)| (k.clone(), doc.clone()))
            .collect())
    }

    fn transaction(
        &self,
        ctx: &RequestContext,
        collection: &str,
        key: &str,
        body: &mut TxFn<'_>,
    ) -> Result<bool> {
        ctx.check()?;
        let mut collections = self.collections.write();
        let current = collections.get(collection).and_then(|docs| docs.get(key));

        let write = body(current)?;
        ctx.check()?;

        match write {
            TxWrite::Keep => Ok(false),
            TxWrite::Put(doc) => {
                collections
                    .entry(collection.to_string())
                    .or_default()
                    .insert(key.to_string(), doc);
                Ok(true)
            }
        }
    }
}

/// Breakdown values already recorded for an alert, etag and period.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectedBreakdowns {
    /// Every recorded breakdown value.
    pub values: Vec<String>,
    /// How many of those records are not yet sent.
    pub unsent: usize,
}

/// Persistence of detected notifications.
pub trait NotificationStore: Send + Sync + fmt::Debug {
    /// Records a detection unless an identical, already-sent one exists.
    ///
    /// Returns true if the notification was written. An existing record at the same
    /// identity key is left untouched when it carries `alert_etag` and has been sent;
    /// otherwise it is superseded.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    fn add_detected(
        &self,
        ctx: &RequestContext,
        notification: &Notification,
        alert_etag: &str,
    ) -> Result<bool>;

    /// Records a batch of detections, one transaction each, returning those written.
    ///
    /// # Errors
    ///
    /// Stops at and returns the first transaction failure.
    fn add_detected_notifications(
        &self,
        ctx: &RequestContext,
        notifications: &[Notification],
        alert_etag: &str,
    ) -> Result<Vec<Notification>> {
        let mut added = Vec::new();
        for notification in notifications {
            if self.add_detected(ctx, notification, alert_etag)? {
                added.push(notification.clone());
            }
        }
        Ok(added)
    }

    /// Breakdown values recorded for `(etag, alert_id, period)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn get_detected_breakdowns(
        &self,
        ctx: &RequestContext,
        etag: &str,
        alert_id: &str,
        period: &str,
    ) -> Result<DetectedBreakdowns>;

    /// A customer's unsent notifications, grouped by alert id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn get_alert_detected_notifications(
        &self,
        ctx: &RequestContext,
        customer_id: &str,
    ) -> Result<BTreeMap<String, Vec<Notification>>>;

    /// Customers with at least one unsent notification, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn get_customers_with_pending(&self, ctx: &RequestContext) -> Result<Vec<String>>;

    /// Stamps `time_sent` on the notification at `key`.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::NotFound` if no such notification exists.
    fn mark_sent(&self, ctx: &RequestContext, key: &str, at: DateTime<Utc>) -> Result<()>;
}

/// Persistence of alert definitions, as read by the engine.
pub trait AlertStore: Send + Sync + fmt::Debug {
    /// Reads an alert.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::NotFound` if the alert does not exist.
    fn get_alert(&self, ctx: &RequestContext, id: &str) -> Result<Alert>;

    /// Lists all alerts, deleting dangling ones instead of returning them.
    ///
    /// # Errors
    ///
    /// Returns an error if the query or a delete fails.
    fn list_alerts(
        &self,
        ctx: &RequestContext,
        now: DateTime<Utc>,
        grace: TimeDelta,
    ) -> Result<Vec<Alert>>;

    /// Records that a digest included the alert at `at`.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::NotFound` if the alert does not exist.
    fn update_alert_notified(&self, ctx: &RequestContext, id: &str, at: DateTime<Utc>)
    -> Result<()>;

    /// Writes an alert under its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn put_alert(&self, ctx: &RequestContext, alert: &Alert) -> Result<()>;
}

fn decode<T: serde::de::DeserializeOwned>(doc: Value) -> Result<T> {
    Ok(serde_json::from_value(doc)?)
}

/// [`NotificationStore`] over a [`DocumentStore`].
#[derive(Debug)]
pub struct DocumentNotificationStore<S> {
    docs: S,
}

impl<S: DocumentStore> DocumentNotificationStore<S> {
    /// Wraps a document store.
    pub const fn new(docs: S) -> Self {
        Self { docs }
    }

    /// The underlying document store.
    pub const fn documents(&self) -> &S {
        &self.docs
    }

    fn pending(
        &self,
        ctx: &RequestContext,
        mut filters: Vec<FieldFilter>,
    ) -> Result<Vec<Notification>> {
        filters.push(FieldFilter::IsNull("timeSent".to_string()));
        self.docs
            .query(ctx, NOTIFICATIONS, &filters)?
            .into_iter()
            .map(|(_, doc)| decode(doc))
            .collect()
    }
}

impl<S: DocumentStore> NotificationStore for DocumentNotificationStore<S> {
    fn add_detected(
        &self,
        ctx: &RequestContext,
        notification: &Notification,
        alert_etag: &str,
    ) -> Result<bool> {
        let key = notification.identity_key();
        let doc = serde_json::to_value(notification)?;

        let added = self.docs.transaction(ctx, NOTIFICATIONS, &key, &mut |existing| {
            if let Some(existing) = existing {
                let existing: Notification = decode(existing.clone())?;
                if existing.etag == alert_etag && existing.is_sent() {
                    return Ok(TxWrite::Keep);
                }
            }
            Ok(TxWrite::Put(doc.clone()))
        })?;

        debug!(key = %key, added, "recorded detection");
        Ok(added)
    }

    fn get_detected_breakdowns(
        &self,
        ctx: &RequestContext,
        etag: &str,
        alert_id: &str,
        period: &str,
    ) -> Result<DetectedBreakdowns> {
        let filters = [
            FieldFilter::eq("etag", etag),
            FieldFilter::eq("alertId", alert_id),
            FieldFilter::eq("period", period),
        ];

        let mut detected = DetectedBreakdowns::default();
        for (_, doc) in self.docs.query(ctx, NOTIFICATIONS, &filters)? {
            let notification: Notification = decode(doc)?;
            if !notification.is_sent() {
                detected.unsent += 1;
            }
            if let Some(breakdown) = notification.breakdown {
                detected.values.push(breakdown);
            }
        }
        Ok(detected)
    }

    fn get_alert_detected_notifications(
        &self,
        ctx: &RequestContext,
        customer_id: &str,
    ) -> Result<BTreeMap<String, Vec<Notification>>> {
        let mut by_alert: BTreeMap<String, Vec<Notification>> = BTreeMap::new();
        for notification in self.pending(ctx, vec![FieldFilter::eq("customerId", customer_id)])? {
            by_alert
                .entry(notification.alert_id.clone())
                .or_default()
                .push(notification);
        }
        Ok(by_alert)
    }

    fn get_customers_with_pending(&self, ctx: &RequestContext) -> Result<Vec<String>> {
        let customers: BTreeSet<String> = self
            .pending(ctx, Vec::new())?
            .into_iter()
            .map(|n| n.customer_id)
            .collect();
        Ok(customers.into_iter().collect())
    }

    fn mark_sent(&self, ctx: &RequestContext, key: &str, at: DateTime<Utc>) -> Result<()> {
        self.docs.transaction(ctx, NOTIFICATIONS, key, &mut |existing| {
            let Some(existing) = existing else {
                return Err(AlertError::NotFound {
                    collection: NOTIFICATIONS.to_string(),
                    key: key.to_string(),
                });
            };
            let mut notification: Notification = decode(existing.clone())?;
            notification.time_sent = Some(at);
            Ok(TxWrite::Put(serde_json::to_value(&notification)?))
        })?;
        Ok(())
    }
}

/// [`AlertStore`] over a [`DocumentStore`].
#[derive(Debug)]
pub struct DocumentAlertStore<S> {
    docs: S,
}

impl<S: DocumentStore> DocumentAlertStore<S> {
    /// Wraps a document store.
    pub const fn new(docs: S) -> Self {
        Self { docs }
    }

    /// The underlying document store.
    pub const fn documents(&self) -> &S {
        &self.docs
    }
}

/// Parses the enum-valued config fields so a bad stored value surfaces as its typed error.
fn check_config_fields(doc: &Value) -> Result<()> {
    let Some(config) = doc.get("config") else {
        return Ok(());
    };
    let field = |name: &str| config.get(name).and_then(Value::as_str);
    if let Some(condition) = field("condition") {
        condition.parse::<Condition>()?;
    }
    if let Some(operator) = field("operator") {
        operator.parse::<Operator>()?;
    }
    if let Some(interval) = field("timeInterval") {
        interval.parse::<TimeInterval>()?;
    }
    if let Some(metric) = field("metric") {
        metric.parse::<Metric>()?;
    }
    Ok(())
}

fn alert_from_doc(key: &str, doc: Value) -> Result<Alert> {
    check_config_fields(&doc)?;
    let mut alert: Alert = serde_json::from_value(doc).map_err(|e| AlertError::InvalidAlert {
        id: key.to_string(),
        reason: e.to_string(),
    })?;
    alert.id = key.to_string();
    Ok(alert)
}

impl<S: DocumentStore> AlertStore for DocumentAlertStore<S> {
    fn get_alert(&self, ctx: &RequestContext, id: &str) -> Result<Alert> {
        let doc = self
            .docs
            .get(ctx, ALERTS, id)?
            .ok_or_else(|| AlertError::NotFound {
                collection: ALERTS.to_string(),
                key: id.to_string(),
            })?;
        alert_from_doc(id, doc)
    }

    fn list_alerts(
        &self,
        ctx: &RequestContext,
        now: DateTime<Utc>,
        grace: TimeDelta,
    ) -> Result<Vec<Alert>> {
        let mut alerts = Vec::new();
        for (key, doc) in self.docs.query(ctx, ALERTS, &[])? {
            let alert = match alert_from_doc(&key, doc) {
                Ok(alert) => alert,
                Err(e) => {
                    warn!(alert_id = %key, error = %e, "skipping undecodable alert");
                    continue;
                }
            };
            if alert.is_dangling(now, grace) {
                info!(alert_id = %alert.id, "deleting dangling alert");
                self.docs.delete(ctx, ALERTS, &alert.id)?;
                continue;
            }
            alerts.push(alert);
        }
        Ok(alerts)
    }

    fn update_alert_notified(
        &self,
        ctx: &RequestContext,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.docs.transaction(ctx, ALERTS, id, &mut |existing| {
            let Some(existing) = existing else {
                return Err(AlertError::NotFound {
                    collection: ALERTS.to_string(),
                    key: id.to_string(),
                });
            };
            let mut alert: Alert = decode(existing.clone())?;
            alert.time_last_alerted = Some(at);
            Ok(TxWrite::Put(serde_json::to_value(&alert)?))
        })?;
        Ok(())
    }

    fn put_alert(&self, ctx: &RequestContext, alert: &Alert) -> Result<()> {
        self.docs
            .put(ctx, ALERTS, &alert.id, serde_json::to_value(alert)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Condition, Config, Metric, Operator, TimeInterval};
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 15, 9, 0, 0).unwrap()
    }

    fn notification(etag: &str, breakdown: Option<&str>) -> Notification {
        Notification {
            alert_id: "alert-1".to_string(),
            alert_name: "spend".to_string(),
            condition_string: String::new(),
            customer_id: "cust-1".to_string(),
            recipients: vec!["ops@example.com".to_string()],
            value: 101.0,
            period: "2024-05".to_string(),
            breakdown: breakdown.map(str::to_string),
            breakdown_label: breakdown.map(|_| "Service".to_string()),
            etag: etag.to_string(),
            time_detected: now(),
            time_sent: None,
            expire_by: now(),
        }
    }

    fn store() -> DocumentNotificationStore<MemoryDocumentStore> {
        DocumentNotificationStore::new(MemoryDocumentStore::new())
    }

    mod document_tests {
        use super::*;

        #[test]
        fn filters_treat_missing_as_null() {
            let doc = json!({"a": "x", "b": null});
            assert!(FieldFilter::eq("a", "x").matches(&doc));
            assert!(FieldFilter::IsNull("b".to_string()).matches(&doc));
            assert!(FieldFilter::IsNull("c".to_string()).matches(&doc));
            assert!(FieldFilter::NotNull("a".to_string()).matches(&doc));
            assert!(FieldFilter::In("a".to_string(), vec![json!("y"), json!("x")]).matches(&doc));
        }

        #[test]
        fn failed_body_leaves_prior_state() {
            let docs = MemoryDocumentStore::new();
            let ctx = RequestContext::new();
            docs.put(&ctx, "c", "k", json!({"v": 1})).unwrap();

            let result = docs.transaction(&ctx, "c", "k", &mut |_| {
                Err(AlertError::Store {
                    reason: "boom".to_string(),
                })
            });
            assert!(result.is_err());
            assert_eq!(docs.get(&ctx, "c", "k").unwrap(), Some(json!({"v": 1})));
        }

        #[test]
        fn cancelled_transaction_does_not_commit() {
            let docs = MemoryDocumentStore::new();
            let ctx = RequestContext::new();
            docs.put(&ctx, "c", "k", json!({"v": 1})).unwrap();

            let cancel = ctx.clone();
            let result = docs.transaction(&ctx, "c", "k", &mut |_| {
                cancel.cancel();
                Ok(TxWrite::Put(json!({"v": 2})))
            });
            assert!(matches!(result, Err(AlertError::Cancelled)));
            assert_eq!(
                docs.get(&RequestContext::new(), "c", "k").unwrap(),
                Some(json!({"v": 1}))
            );
        }

        #[test]
        fn snapshot_round_trip() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("state.json");
            let ctx = RequestContext::new();

            let docs = MemoryDocumentStore::new();
            docs.put(&ctx, ALERTS, "a1", json!({"name": "x"})).unwrap();
            docs.put(&ctx, NOTIFICATIONS, "n1", json!({"value": 3})).unwrap();
            docs.save_snapshot(&path).unwrap();

            let loaded = MemoryDocumentStore::load_snapshot(&path).unwrap();
            assert_eq!(loaded.len(ALERTS), 1);
            assert_eq!(loaded.get(&ctx, NOTIFICATIONS, "n1").unwrap(), Some(json!({"value": 3})));
        }

        #[test]
        fn missing_snapshot_is_empty() {
            let dir = tempfile::tempdir().unwrap();
            let loaded = MemoryDocumentStore::load_snapshot(dir.path().join("nope.json")).unwrap();
            assert!(loaded.is_empty(ALERTS));
        }
    }

    mod notification_store_tests {
        use super::*;

        #[test]
        fn first_detection_is_added() {
            let store = store();
            let ctx = RequestContext::new();
            assert!(store.add_detected(&ctx, &notification("e1", None), "e1").unwrap());
            assert_eq!(store.documents().len(NOTIFICATIONS), 1);
        }

        #[test]
        fn sent_detection_with_same_etag_is_kept() {
            let store = store();
            let ctx = RequestContext::new();
            let n = notification("e1", Some("Compute"));
            assert!(store.add_detected(&ctx, &n, "e1").unwrap());
            store.mark_sent(&ctx, &n.identity_key(), now()).unwrap();
            let before = store
                .documents()
                .get(&ctx, NOTIFICATIONS, &n.identity_key())
                .unwrap();

            let mut again = n.clone();
            again.value = 500.0;
            assert!(!store.add_detected(&ctx, &again, "e1").unwrap());
            assert!(!store.add_detected(&ctx, &again, "e1").unwrap());

            let after = store
                .documents()
                .get(&ctx, NOTIFICATIONS, &n.identity_key())
                .unwrap();
            assert_eq!(before, after);
        }

        #[test]
        fn concurrent_detections_share_one_document() {
            let store = store();
            let ctx = RequestContext::new();
            let n = notification("e1", Some("Compute"));

            std::thread::scope(|s| {
                let workers: Vec<_> = (0..8)
                    .map(|_| s.spawn(|| store.add_detected(&ctx, &n, "e1").unwrap()))
                    .collect();
                for worker in workers {
                    assert!(worker.join().unwrap());
                }
            });
            assert_eq!(store.documents().len(NOTIFICATIONS), 1);

            store.mark_sent(&ctx, &n.identity_key(), now()).unwrap();
            let added: Vec<bool> = std::thread::scope(|s| {
                let workers: Vec<_> = (0..8)
                    .map(|_| s.spawn(|| store.add_detected(&ctx, &n, "e1").unwrap()))
                    .collect();
                workers.into_iter().map(|w| w.join().unwrap()).collect()
            });
            assert!(added.iter().all(|added| !added));
            assert_eq!(store.documents().len(NOTIFICATIONS), 1);
            assert!(store.get_customers_with_pending(&ctx).unwrap().is_empty());
        }

        #[test]
        fn unsent_detection_is_overwritten() {
            let store = store();
            let ctx = RequestContext::new();
            let n = notification("e1", None);
            assert!(store.add_detected(&ctx, &n, "e1").unwrap());
            let mut again = n.clone();
            again.value = 250.0;
            assert!(store.add_detected(&ctx, &again, "e1").unwrap());

            let pending = store.get_alert_detected_notifications(&ctx, "cust-1").unwrap();
            assert!((pending["alert-1"][0].value - 250.0).abs() < f64::EPSILON);
        }

        #[test]
        fn stale_etag_is_superseded() {
            let store = store();
            let ctx = RequestContext::new();
            let old = notification("old", None);
            store.add_detected(&ctx, &old, "old").unwrap();
            store.mark_sent(&ctx, &old.identity_key(), now()).unwrap();

            let fresh = notification("new", None);
            assert!(store.add_detected(&ctx, &fresh, "new").unwrap());
            let pending = store.get_alert_detected_notifications(&ctx, "cust-1").unwrap();
            assert_eq!(pending["alert-1"][0].etag, "new");
        }

        #[test]
        fn batch_returns_only_added() {
            let store = store();
            let ctx = RequestContext::new();
            let a = notification("e1", Some("a"));
            let b = notification("e1", Some("b"));
            store.add_detected(&ctx, &a, "e1").unwrap();
            store.mark_sent(&ctx, &a.identity_key(), now()).unwrap();

            let added = store
                .add_detected_notifications(&ctx, &[a, b.clone()], "e1")
                .unwrap();
            assert_eq!(added, vec![b]);
        }

        #[test]
        fn pending_queries() {
            let store = store();
            let ctx = RequestContext::new();
            let a = notification("e1", Some("a"));
            let mut other = notification("e1", None);
            other.customer_id = "cust-2".to_string();
            other.alert_id = "alert-9".to_string();
            store.add_detected(&ctx, &a, "e1").unwrap();
            store.add_detected(&ctx, &other, "e1").unwrap();

            assert_eq!(
                store.get_customers_with_pending(&ctx).unwrap(),
                vec!["cust-1", "cust-2"]
            );

            store.mark_sent(&ctx, &a.identity_key(), now()).unwrap();
            assert_eq!(store.get_customers_with_pending(&ctx).unwrap(), vec!["cust-2"]);
            assert!(store.get_alert_detected_notifications(&ctx, "cust-1").unwrap().is_empty());
        }

        #[test]
        fn mark_sent_missing_fails() {
            let store = store();
            assert!(matches!(
                store.mark_sent(&RequestContext::new(), "nope", now()),
                Err(AlertError::NotFound { .. })
            ));
        }
    }

    mod alert_store_tests {
        use super::*;

        fn alert(id: &str) -> Alert {
            let config = Config::new(
                Condition::Value,
                Operator::GreaterThan,
                1.0,
                Metric::Cost,
                TimeInterval::Month,
            );
            Alert::builder("a", "cust-1", config)
                .id(id)
                .recipient("ops@example.com")
                .modified_at(now() - TimeDelta::hours(48))
                .build()
        }

        #[test]
        fn list_deletes_dangling() {
            let store = DocumentAlertStore::new(MemoryDocumentStore::new());
            let ctx = RequestContext::new();
            store.put_alert(&ctx, &alert("live")).unwrap();
            let mut draft = alert("draft");
            draft.is_valid = false;
            store.put_alert(&ctx, &draft).unwrap();

            let listed = store.list_alerts(&ctx, now(), TimeDelta::hours(24)).unwrap();
            assert_eq!(listed.len(), 1);
            assert_eq!(listed[0].id, "live");
            assert!(matches!(
                store.get_alert(&ctx, "draft"),
                Err(AlertError::NotFound { .. })
            ));
        }

        #[test]
        fn undecodable_alert_is_skipped() {
            let store = DocumentAlertStore::new(MemoryDocumentStore::new());
            let ctx = RequestContext::new();
            store.put_alert(&ctx, &alert("good")).unwrap();
            let mut doc = serde_json::to_value(alert("bad")).unwrap();
            doc["config"]["condition"] = json!("bogus");
            store.documents().put(&ctx, ALERTS, "bad", doc).unwrap();

            let listed = store.list_alerts(&ctx, now(), TimeDelta::hours(24)).unwrap();
            assert_eq!(listed.len(), 1);
            assert_eq!(listed[0].id, "good");

            let err = store.get_alert(&ctx, "bad").unwrap_err();
            assert!(matches!(err, AlertError::InvalidCondition { ref value } if value == "bogus"));
            assert!(err.is_validation());
        }

        #[test]
        fn malformed_alert_fields_are_validation_errors() {
            let store = DocumentAlertStore::new(MemoryDocumentStore::new());
            let ctx = RequestContext::new();

            let mut doc = serde_json::to_value(alert("op")).unwrap();
            doc["config"]["operator"] = json!(">=");
            store.documents().put(&ctx, ALERTS, "op", doc).unwrap();
            assert!(matches!(
                store.get_alert(&ctx, "op"),
                Err(AlertError::InvalidOperator { .. })
            ));

            let mut doc = serde_json::to_value(alert("nameless")).unwrap();
            doc.as_object_mut().unwrap().remove("name");
            store.documents().put(&ctx, ALERTS, "nameless", doc).unwrap();
            let err = store.get_alert(&ctx, "nameless").unwrap_err();
            assert!(matches!(err, AlertError::InvalidAlert { ref id, .. } if id == "nameless"));
            assert!(err.is_validation());
        }

        #[test]
        fn update_notified_sets_time() {
            let store = DocumentAlertStore::new(MemoryDocumentStore::new());
            let ctx = RequestContext::new();
            store.put_alert(&ctx, &alert("a1")).unwrap();
            store.update_alert_notified(&ctx, "a1", now()).unwrap();
            assert_eq!(store.get_alert(&ctx, "a1").unwrap().time_last_alerted, Some(now()));
            assert!(store.update_alert_notified(&ctx, "missing", now()).is_err());
        }
    }
}
