//! HTTP surface: admin API, proxy front, and the tool-server mount.

use crate::config::BackendSeed;
use crate::discovery::DiscoveryEngine;
use crate::envelope::{CallEnvelope, ErrorKind, ResultEnvelope};
use crate::registry::{BackendKind, BackendRecord, Registry};
use crate::router::CallRouter;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub router: Arc<CallRouter>,
    pub discovery: Arc<DiscoveryEngine>,
    pub started_at: DateTime<Utc>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(banner))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/discover", post(discover))
        .route("/backends", get(list_backends).post(register_backend))
        .route(
            "/backends/{backend_id}",
            get(get_backend).delete(remove_backend),
        )
        .route("/backends/{backend_id}/tools", get(backend_tools))
        .route("/proxy/{kind}/{backend_id}/{operation}", post(proxy_call))
        .route("/mcp/{backend_id}", post(crate::mcp::server::post_message))
        .with_state(state)
}

async fn banner() -> Json<Value> {
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "backends": "/backends",
            "discover": "/discover",
            "proxy": "/proxy/{kind}/{backend_id}/{operation}",
            "toolServer": "/mcp/{backend_id}",
            "stats": "/stats",
        }
    }))
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn stats(State(state): State<AppState>) -> Json<Value> {
    let records = state.registry.list(None);
    let mut by_status: BTreeMap<String, usize> = BTreeMap::new();
    let mut openapi = 0usize;
    let mut tools = 0usize;
    let mut operations = 0usize;
    for record in &records {
        *by_status.entry(record.status_label().to_string()).or_default() += 1;
        match record {
            BackendRecord::OpenApi(b) => {
                openapi += 1;
                operations += b.operations.len();
            }
            BackendRecord::Tool(b) => {
                tools += 1;
                operations += b.tools.len();
            }
        }
    }
    let uptime = Utc::now()
        .signed_duration_since(state.started_at)
        .num_seconds();
    Json(json!({
        "backends": {
            "total": records.len(),
            "openapi": openapi,
            "tool": tools,
            "byStatus": by_status,
        },
        "bridgedOperations": operations,
        "uptimeSecs": uptime,
    }))
}

async fn discover(State(state): State<AppState>) -> Json<Value> {
    state.discovery.run_cycle().await;
    let records = state.registry.list(None);
    let available = records.iter().filter(|r| r.is_available()).count();
    Json(json!({
        "probed": records.len(),
        "available": available,
    }))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(rename = "kind")]
    kind: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BackendSummary {
    id: String,
    #[serde(rename = "type")]
    kind: BackendKind,
    name: String,
    status: &'static str,
    operations: usize,
}

fn summarize(record: &BackendRecord) -> BackendSummary {
    BackendSummary {
        id: record.id().to_string(),
        kind: record.kind(),
        name: record.name().to_string(),
        status: record.status_label(),
        operations: match record {
            BackendRecord::OpenApi(b) => b.operations.len(),
            BackendRecord::Tool(b) => b.tools.len(),
        },
    }
}

async fn list_backends(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Response {
    let kind = match query.kind.as_deref().map(str::parse::<BackendKind>) {
        None => None,
        Some(Ok(kind)) => Some(kind),
        Some(Err(message)) => return (StatusCode::BAD_REQUEST, message).into_response(),
    };
    let summaries: Vec<BackendSummary> =
        state.registry.list(kind).iter().map(summarize).collect();
    Json(summaries).into_response()
}

async fn register_backend(
    State(state): State<AppState>,
    Json(seed): Json<BackendSeed>,
) -> Response {
    let id = match seed {
        BackendSeed::OpenApi {
            name,
            base_url,
            spec_url,
        } => {
            state
                .discovery
                .register_openapi(name, base_url, spec_url)
                .await
        }
        BackendSeed::Tool {
            name,
            endpoint_url,
            launch_command,
        } => {
            state
                .discovery
                .register_tool(name, endpoint_url, launch_command)
                .await
        }
    };
    match state.registry.get(&id) {
        Some(record) => (StatusCode::CREATED, Json(record)).into_response(),
        None => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn get_backend(
    State(state): State<AppState>,
    Path(backend_id): Path<String>,
) -> Response {
    match state.registry.get(&backend_id) {
        Some(record) => Json(record).into_response(),
        None => not_found(&backend_id),
    }
}

async fn remove_backend(
    State(state): State<AppState>,
    Path(backend_id): Path<String>,
) -> Response {
    if state.registry.remove(&backend_id) {
        if let Err(err) = state.registry.save_snapshot().await {
            tracing::error!(error = %err, "registry snapshot failed");
        }
        StatusCode::NO_CONTENT.into_response()
    } else {
        not_found(&backend_id)
    }
}

async fn backend_tools(
    State(state): State<AppState>,
    Path(backend_id): Path<String>,
) -> Response {
    match state.registry.get(&backend_id) {
        Some(record) => Json(crate::mcp::server::backend_tools(&record)).into_response(),
        None => not_found(&backend_id),
    }
}

/// Proxy request body; every field optional so `{}` (or no meaningful body)
/// is a valid zero-argument call.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProxyBody {
    #[serde(default)]
    path_params: Map<String, Value>,
    #[serde(default)]
    query_params: Map<String, Value>,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
}

async fn proxy_call(
    State(state): State<AppState>,
    Path((kind, backend_id, operation)): Path<(String, String, String)>,
    body: Option<Json<ProxyBody>>,
) -> Response {
    let Ok(kind) = kind.parse::<BackendKind>() else {
        return (StatusCode::NOT_FOUND, format!("unknown backend kind '{kind}'")).into_response();
    };
    // A mismatched kind segment is treated the same as an unknown backend.
    if state
        .registry
        .get(&backend_id)
        .is_some_and(|record| record.kind() != kind)
    {
        return not_found(&backend_id);
    }

    let Json(proxy) = body.unwrap_or_default();
    let envelope = CallEnvelope {
        backend_id,
        operation,
        path_params: proxy.path_params,
        query_params: proxy.query_params,
        body: proxy.body,
        headers: proxy.headers,
    };
    let outcome = state.router.route(envelope).await;
    (front_status(&outcome), Json(outcome)).into_response()
}

/// Map a routing outcome onto the front's HTTP status.
fn front_status(outcome: &ResultEnvelope) -> StatusCode {
    if outcome.success {
        return outcome
            .status_code
            .and_then(|code| StatusCode::from_u16(code).ok())
            .unwrap_or(StatusCode::OK);
    }
    let Some(error) = &outcome.error else {
        return StatusCode::INTERNAL_SERVER_ERROR;
    };
    match error.kind {
        ErrorKind::BackendNotFound | ErrorKind::OperationNotFound => StatusCode::NOT_FOUND,
        ErrorKind::MissingPathParam => StatusCode::BAD_REQUEST,
        ErrorKind::BackendUnavailable | ErrorKind::UpstreamTransport => StatusCode::BAD_GATEWAY,
        ErrorKind::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::UpstreamNonSuccess => error
            .upstream_status
            .and_then(|code| StatusCode::from_u16(code).ok())
            .unwrap_or(StatusCode::BAD_GATEWAY),
    }
}

fn not_found(backend_id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        format!("no backend registered with id '{backend_id}'"),
    )
        .into_response()
}
