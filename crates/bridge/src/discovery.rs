//! Periodic backend discovery.
//!
//! One engine owns all liveness transitions: it probes every registered
//! backend on an interval (or on demand), refreshes operation/tool catalogs,
//! and persists a registry snapshot after each cycle. Registration handlers
//! call into it for the initial synchronous probe, so a freshly registered
//! backend comes back with a settled status.

use crate::mcp::client;
use crate::registry::{
    BackendKind, BackendRecord, OpenApiBackend, OpenApiStatus, Registry, ToolBackend, ToolSpec,
    ToolStatus,
};
use crate::transport::Transport;
use chrono::{DateTime, Utc};
use crossbridge_openapi::SpecLoader;
use futures::StreamExt as _;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Probes run concurrently, but bounded; a pathological registry must not
/// open hundreds of sockets at once.
const PROBE_CONCURRENCY: usize = 8;

pub struct DiscoveryEngine {
    registry: Arc<Registry>,
    loader: SpecLoader,
    transport: Arc<dyn Transport>,
    interval: Duration,
    /// How long a previously live backend keeps its status through probe
    /// failures before being marked offline/stopped.
    offline_grace: Duration,
    trigger: Notify,
}

impl DiscoveryEngine {
    #[must_use]
    pub fn new(
        registry: Arc<Registry>,
        transport: Arc<dyn Transport>,
        probe_timeout: Duration,
        interval: Duration,
        offline_grace: Duration,
    ) -> Self {
        Self {
            registry,
            loader: SpecLoader::new(probe_timeout),
            transport,
            interval,
            offline_grace,
            trigger: Notify::new(),
        }
    }

    /// Register (or re-register) an `OpenAPI` backend and probe it once.
    /// Returns the backend id.
    ///
    /// Re-registration under the same base URL keeps the existing id, so
    /// callers holding old ids stay valid.
    pub async fn register_openapi(
        &self,
        name: String,
        base_url: String,
        spec_url: Option<String>,
    ) -> String {
        let base_url = base_url.trim_end_matches('/').to_string();
        let spec_url = spec_url.unwrap_or_else(|| format!("{base_url}/openapi.json"));
        let id = self
            .registry
            .find_by_stable_key(BackendKind::OpenApi, &base_url)
            .unwrap_or_else(|| self.registry.generate_id(BackendKind::OpenApi));

        let existing = self.registry.get(&id);
        let record = BackendRecord::OpenApi(OpenApiBackend {
            id: id.clone(),
            name,
            base_url,
            spec_url,
            fingerprint: None,
            operations: match existing {
                Some(BackendRecord::OpenApi(prev)) => prev.operations,
                _ => BTreeMap::new(),
            },
            status: OpenApiStatus::Unknown,
            last_seen: None,
        });
        self.registry.upsert(record);
        self.probe(&id).await;
        self.persist().await;
        id
    }

    /// Register (or re-register) a tool backend and probe it once. Returns
    /// the backend id.
    pub async fn register_tool(
        &self,
        name: String,
        endpoint_url: String,
        launch_command: String,
    ) -> String {
        let key = if launch_command.is_empty() {
            endpoint_url.clone()
        } else {
            launch_command.clone()
        };
        let id = self
            .registry
            .find_by_stable_key(BackendKind::Tool, &key)
            .unwrap_or_else(|| self.registry.generate_id(BackendKind::Tool));

        let existing = self.registry.get(&id);
        let record = BackendRecord::Tool(ToolBackend {
            id: id.clone(),
            name,
            endpoint_url,
            launch_command,
            tools: match existing {
                Some(BackendRecord::Tool(prev)) => prev.tools,
                _ => BTreeMap::new(),
            },
            status: ToolStatus::Unknown,
            last_health_check: None,
        });
        self.registry.upsert(record);
        self.probe(&id).await;
        self.persist().await;
        id
    }

    /// Probe every registered backend, bounded fan-out, then snapshot.
    pub async fn run_cycle(&self) {
        let ids = self.registry.ids();
        let count = ids.len();
        futures::stream::iter(ids)
            .map(|id| async move { self.probe(&id).await })
            .buffer_unordered(PROBE_CONCURRENCY)
            .collect::<Vec<()>>()
            .await;
        self.persist().await;
        tracing::debug!(backends = count, "discovery cycle complete");
    }

    /// Wake the background loop for an immediate cycle.
    pub fn request_cycle(&self) {
        self.trigger.notify_one();
    }

    /// Background loop: fixed interval, pre-emptable by [`Self::request_cycle`].
    pub async fn run(self: Arc<Self>) {
        loop {
            tokio::select! {
                () = tokio::time::sleep(self.interval) => {}
                () = self.trigger.notified() => {}
            }
            self.run_cycle().await;
        }
    }

    async fn probe(&self, id: &str) {
        let Some(record) = self.registry.get(id) else {
            return;
        };
        match record {
            BackendRecord::OpenApi(backend) => self.probe_openapi(backend).await,
            BackendRecord::Tool(backend) => self.probe_tool(backend).await,
        }
    }

    async fn probe_openapi(&self, backend: OpenApiBackend) {
        // Probing is entered from Unknown only; a backend with a settled
        // status keeps it while the probe is in flight, so routine cycles
        // never make a healthy backend refuse calls.
        self.registry.update(&backend.id, |r| {
            if let BackendRecord::OpenApi(b) = r {
                if b.status == OpenApiStatus::Unknown {
                    b.status = OpenApiStatus::Probing;
                }
            }
        });

        match self.loader.load(&backend.spec_url).await {
            Ok(catalog) => {
                let changed = backend.fingerprint.as_deref() != Some(catalog.fingerprint.as_str());
                if changed {
                    tracing::info!(
                        backend = %backend.id,
                        operations = catalog.operations.len(),
                        skipped = catalog.skipped_missing_id,
                        fingerprint = %catalog.fingerprint,
                        "operation catalog rebuilt"
                    );
                }
                self.registry.update(&backend.id, |r| {
                    if let BackendRecord::OpenApi(b) = r {
                        if changed {
                            b.operations = catalog.operations.clone();
                            b.fingerprint = Some(catalog.fingerprint.clone());
                        }
                        b.status = OpenApiStatus::Online;
                        b.last_seen = Some(Utc::now());
                    }
                });
            }
            Err(err) => {
                let within_grace = !past_grace(backend.last_seen, self.offline_grace);
                let status = if within_grace && backend.status == OpenApiStatus::Online {
                    OpenApiStatus::Online
                } else {
                    OpenApiStatus::Offline
                };
                tracing::warn!(
                    backend = %backend.id,
                    spec_url = %backend.spec_url,
                    error = %err,
                    status = ?status,
                    "spec probe failed"
                );
                self.registry.update(&backend.id, |r| {
                    if let BackendRecord::OpenApi(b) = r {
                        b.status = status;
                    }
                });
            }
        }
    }

    async fn probe_tool(&self, backend: ToolBackend) {
        self.registry.update(&backend.id, |r| {
            if let BackendRecord::Tool(b) = r {
                if b.status == ToolStatus::Unknown {
                    b.status = ToolStatus::Probing;
                }
            }
        });

        let outcome = async {
            client::initialize(self.transport.as_ref(), &backend.endpoint_url).await?;
            client::list_tools(self.transport.as_ref(), &backend.endpoint_url).await
        }
        .await;

        match outcome {
            Ok(tools) => {
                let catalog: BTreeMap<String, ToolSpec> = tools
                    .into_iter()
                    .map(|tool| {
                        (
                            tool.name.to_string(),
                            ToolSpec {
                                description: tool.description.as_ref().map(ToString::to_string),
                                input_schema: serde_json::Value::Object(
                                    tool.input_schema.as_ref().clone(),
                                ),
                            },
                        )
                    })
                    .collect();
                self.registry.update(&backend.id, |r| {
                    if let BackendRecord::Tool(b) = r {
                        b.tools = catalog.clone();
                        b.status = ToolStatus::Running;
                        b.last_health_check = Some(Utc::now());
                    }
                });
            }
            Err(err) => {
                // A reachable endpoint that answers garbage is an error, not
                // a stopped process.
                let within_grace = !past_grace(backend.last_health_check, self.offline_grace);
                let status = match &err {
                    client::McpClientError::Transport(_)
                        if within_grace && backend.status == ToolStatus::Running =>
                    {
                        ToolStatus::Running
                    }
                    client::McpClientError::Transport(_) => ToolStatus::Stopped,
                    _ => ToolStatus::Error,
                };
                tracing::warn!(
                    backend = %backend.id,
                    endpoint = %backend.endpoint_url,
                    error = %err,
                    status = ?status,
                    "tool probe failed"
                );
                // `last_health_check` stays at the last success so the grace
                // window can expire.
                self.registry.update(&backend.id, |r| {
                    if let BackendRecord::Tool(b) = r {
                        b.status = status;
                    }
                });
            }
        }
    }

    async fn persist(&self) {
        if let Err(err) = self.registry.save_snapshot().await {
            tracing::error!(error = %err, "registry snapshot failed");
        }
    }
}

/// True when the last success is absent or older than the grace window.
fn past_grace(last_ok: Option<DateTime<Utc>>, grace: Duration) -> bool {
    match last_ok {
        None => true,
        Some(at) => {
            let elapsed = Utc::now().signed_duration_since(at);
            elapsed.to_std().map_or(true, |e| e > grace)
        }
    }
}
