//! Backend registry.
//!
//! The registry exclusively owns all backend records. Callers get cloned
//! snapshots and re-resolve per call, so nothing acts on stale state after a
//! catalog refresh. Writers take a per-record lock; the outer lock guards
//! only the map shape, so discovery of one backend never blocks calls to
//! another.

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use crossbridge_openapi::OperationDescriptor;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Liveness of an `OpenAPI` backend. Transitions only through discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenApiStatus {
    Unknown,
    Probing,
    Online,
    Offline,
}

/// Liveness of a tool backend. Transitions only through discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Unknown,
    Probing,
    Running,
    Stopped,
    Error,
}

/// One schema-described tool advertised by a tool backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Value,
}

/// An `OpenAPI`-described HTTP service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenApiBackend {
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub spec_url: String,
    /// Fingerprint of the last successfully loaded spec; gates catalog rebuilds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub operations: BTreeMap<String, OperationDescriptor>,
    pub status: OpenApiStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

/// A tool-protocol service, started/stopped by an external supervisor.
///
/// The bridge never spawns the process; it only probes and calls the
/// endpoint the supervisor exposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolBackend {
    pub id: String,
    pub name: String,
    pub endpoint_url: String,
    /// Supervisor launch command; stable identity key across restarts.
    #[serde(default)]
    pub launch_command: String,
    #[serde(default)]
    pub tools: BTreeMap<String, ToolSpec>,
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_health_check: Option<DateTime<Utc>>,
}

/// The two backend kinds the bridge knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    OpenApi,
    Tool,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::OpenApi => write!(f, "openapi"),
            BackendKind::Tool => write!(f, "tool"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openapi" => Ok(BackendKind::OpenApi),
            "tool" | "mcp" => Ok(BackendKind::Tool),
            other => Err(format!("unknown backend kind '{other}'")),
        }
    }
}

/// A registered backend of either kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BackendRecord {
    #[serde(rename = "openapi")]
    OpenApi(OpenApiBackend),
    #[serde(rename = "tool")]
    Tool(ToolBackend),
}

impl BackendRecord {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            BackendRecord::OpenApi(b) => &b.id,
            BackendRecord::Tool(b) => &b.id,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            BackendRecord::OpenApi(b) => &b.name,
            BackendRecord::Tool(b) => &b.name,
        }
    }

    #[must_use]
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendRecord::OpenApi(_) => BackendKind::OpenApi,
            BackendRecord::Tool(_) => BackendKind::Tool,
        }
    }

    /// Stable identity key used to preserve ids across restarts: base URL
    /// for `OpenAPI` backends, launch command (endpoint URL as fallback) for
    /// tool backends.
    #[must_use]
    pub fn stable_key(&self) -> &str {
        match self {
            BackendRecord::OpenApi(b) => &b.base_url,
            BackendRecord::Tool(b) => {
                if b.launch_command.is_empty() {
                    &b.endpoint_url
                } else {
                    &b.launch_command
                }
            }
        }
    }

    /// Whether the router may attempt calls against this backend.
    #[must_use]
    pub fn is_available(&self) -> bool {
        match self {
            BackendRecord::OpenApi(b) => b.status == OpenApiStatus::Online,
            BackendRecord::Tool(b) => b.status == ToolStatus::Running,
        }
    }

    /// Human-readable status label for listings and error messages.
    #[must_use]
    pub fn status_label(&self) -> &'static str {
        match self {
            BackendRecord::OpenApi(b) => match b.status {
                OpenApiStatus::Unknown => "unknown",
                OpenApiStatus::Probing => "probing",
                OpenApiStatus::Online => "online",
                OpenApiStatus::Offline => "offline",
            },
            BackendRecord::Tool(b) => match b.status {
                ToolStatus::Unknown => "unknown",
                ToolStatus::Probing => "probing",
                ToolStatus::Running => "running",
                ToolStatus::Stopped => "stopped",
                ToolStatus::Error => "error",
            },
        }
    }

    /// Reset liveness to the provisional post-restart state. A persisted
    /// snapshot is never trusted as authoritative liveness.
    pub fn mark_provisional(&mut self) {
        match self {
            BackendRecord::OpenApi(b) => b.status = OpenApiStatus::Unknown,
            BackendRecord::Tool(b) => b.status = ToolStatus::Stopped,
        }
    }
}

/// Concurrent backend registry with per-record locking and JSON snapshots.
pub struct Registry {
    records: RwLock<HashMap<String, Arc<RwLock<BackendRecord>>>>,
    /// Ids removed during this process lifetime; never handed out again.
    retired: RwLock<HashSet<String>>,
    snapshot_path: Option<PathBuf>,
    snapshot_lock: tokio::sync::Mutex<()>,
}

impl Registry {
    #[must_use]
    pub fn new(snapshot_path: Option<PathBuf>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            retired: RwLock::new(HashSet::new()),
            snapshot_path,
            snapshot_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Generate a fresh backend id, e.g. `openapi_3fa4b1c2`.
    #[must_use]
    pub fn generate_id(&self, kind: BackendKind) -> String {
        loop {
            let suffix = uuid::Uuid::new_v4().simple().to_string();
            let id = format!("{kind}_{}", &suffix[..8]);
            let taken = self.records.read().contains_key(&id) || self.retired.read().contains(&id);
            if !taken {
                return id;
            }
        }
    }

    /// Insert or replace a record by id.
    pub fn upsert(&self, record: BackendRecord) {
        let id = record.id().to_string();
        let mut map = self.records.write();
        match map.get(&id) {
            Some(slot) => *slot.write() = record,
            None => {
                map.insert(id, Arc::new(RwLock::new(record)));
            }
        }
    }

    /// Fetch a cloned snapshot of one record.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<BackendRecord> {
        let slot = self.records.read().get(id).cloned()?;
        let record = slot.read().clone();
        Some(record)
    }

    /// List cloned snapshots, optionally filtered by kind.
    #[must_use]
    pub fn list(&self, kind: Option<BackendKind>) -> Vec<BackendRecord> {
        let slots: Vec<Arc<RwLock<BackendRecord>>> =
            self.records.read().values().cloned().collect();
        let mut out: Vec<BackendRecord> = slots
            .iter()
            .map(|slot| slot.read().clone())
            .filter(|r| kind.is_none_or(|k| r.kind() == k))
            .collect();
        out.sort_by(|a, b| a.id().cmp(b.id()));
        out
    }

    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.records.read().keys().cloned().collect()
    }

    /// Explicitly deregister a backend. Discovery never calls this; a dead
    /// backend is marked offline/stopped, not deleted.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.records.write().remove(id).is_some();
        if removed {
            self.retired.write().insert(id.to_string());
        }
        removed
    }

    /// Find an existing backend by kind + stable key (id continuity across
    /// restarts and re-registration).
    #[must_use]
    pub fn find_by_stable_key(&self, kind: BackendKind, key: &str) -> Option<String> {
        let slots: Vec<Arc<RwLock<BackendRecord>>> =
            self.records.read().values().cloned().collect();
        slots.iter().find_map(|slot| {
            let record = slot.read();
            (record.kind() == kind && record.stable_key() == key).then(|| record.id().to_string())
        })
    }

    /// Mutate one record in place under its write lock. Returns false if the
    /// id is unknown.
    pub fn update<F>(&self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut BackendRecord),
    {
        let Some(slot) = self.records.read().get(id).cloned() else {
            return false;
        };
        f(&mut slot.write());
        true
    }

    /// Load the persisted snapshot, if any, as provisional state.
    ///
    /// Statuses are reset (`unknown` for `OpenAPI` backends, `stopped` for
    /// tool backends) pending the first fresh probe.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot file exists but cannot be read or
    /// parsed.
    pub fn load_snapshot(&self) -> anyhow::Result<usize> {
        let Some(path) = &self.snapshot_path else {
            return Ok(0);
        };
        if !path.exists() {
            return Ok(0);
        }

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read snapshot {}", path.display()))?;
        let stored: BTreeMap<String, BackendRecord> = serde_json::from_str(&raw)
            .with_context(|| format!("parse snapshot {}", path.display()))?;

        let count = stored.len();
        for (_, mut record) in stored {
            record.mark_provisional();
            self.upsert(record);
        }
        tracing::info!(backends = count, path = %path.display(), "loaded registry snapshot");
        Ok(count)
    }

    /// Persist all records as one flat keyed JSON document.
    ///
    /// The write goes to a temp file first and is renamed into place under an
    /// exclusive lock, so two concurrent snapshot writes cannot interleave.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the filesystem write fails.
    pub async fn save_snapshot(&self) -> anyhow::Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        let _guard = self.snapshot_lock.lock().await;

        let records: BTreeMap<String, BackendRecord> = self
            .list(None)
            .into_iter()
            .map(|r| (r.id().to_string(), r))
            .collect();
        let serialized = serde_json::to_string_pretty(&records)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create data dir {}", parent.display()))?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serialized)
            .with_context(|| format!("write snapshot {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("rename snapshot into {}", path.display()))?;
        Ok(())
    }
}
