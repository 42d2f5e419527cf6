//! Local snapshot state and fixture loading.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use costwatch_alerts::{
    Alert, AlertStore, DocumentAlertStore, DocumentNotificationStore, EngineConfig,
    MemoryDocumentStore, QueryResult, RequestContext,
};
use tracing::info;
use uuid::Uuid;

const ALERTS_FILE: &str = "alerts.json";
const NOTIFICATIONS_FILE: &str = "notifications.json";

/// Alert and notification stores backed by snapshot files in one directory.
#[derive(Debug)]
pub struct State {
    dir: PathBuf,
    /// Alert definitions.
    pub alerts: Arc<DocumentAlertStore<MemoryDocumentStore>>,
    /// Detected notifications.
    pub notifications: Arc<DocumentNotificationStore<MemoryDocumentStore>>,
}

impl State {
    /// Loads both snapshots from `dir`; missing files start empty.
    ///
    /// # Errors
    ///
    /// Returns an error if a snapshot exists but cannot be read.
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let alerts = MemoryDocumentStore::load_snapshot(dir.join(ALERTS_FILE))
            .with_context(|| format!("loading alerts from {}", dir.display()))?;
        let notifications = MemoryDocumentStore::load_snapshot(dir.join(NOTIFICATIONS_FILE))
            .with_context(|| format!("loading notifications from {}", dir.display()))?;
        Ok(Self {
            dir,
            alerts: Arc::new(DocumentAlertStore::new(alerts)),
            notifications: Arc::new(DocumentNotificationStore::new(notifications)),
        })
    }

    /// Writes both snapshots, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or a snapshot cannot be written.
    pub fn save(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating {}", self.dir.display()))?;
        self.alerts
            .documents()
            .save_snapshot(self.dir.join(ALERTS_FILE))?;
        self.notifications
            .documents()
            .save_snapshot(self.dir.join(NOTIFICATIONS_FILE))?;
        info!(dir = %self.dir.display(), "saved state");
        Ok(())
    }

    /// Imports alerts from a JSON array, generating missing ids and etags.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is unreadable or an alert cannot be stored.
    pub fn import_alerts(&self, ctx: &RequestContext, path: &Path) -> Result<Vec<String>> {
        let mut alerts: Vec<Alert> = read_json(path)?;
        let mut ids = Vec::with_capacity(alerts.len());
        for alert in &mut alerts {
            if alert.id.is_empty() {
                alert.id = Uuid::new_v4().to_string();
            }
            if alert.etag.is_empty() {
                alert.etag = Uuid::new_v4().simple().to_string();
            }
            self.alerts
                .put_alert(ctx, alert)
                .with_context(|| format!("storing alert {}", alert.id))?;
            ids.push(alert.id.clone());
        }
        Ok(ids)
    }
}

/// Reads the engine configuration, or the defaults when no file is given.
///
/// # Errors
///
/// Returns an error if the file is unreadable or invalid.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    path.map_or_else(|| Ok(EngineConfig::default()), read_json)
}

/// Reads canned query results keyed by alert id.
///
/// # Errors
///
/// Returns an error if the file is unreadable or invalid.
pub fn load_results(path: &Path) -> Result<HashMap<String, QueryResult>> {
    read_json(path)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
}
