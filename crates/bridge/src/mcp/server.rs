//! Inbound tool-server surface: `POST /mcp/{backend_id}`.
//!
//! Every registered backend, `OpenAPI` ones included, is reachable here as a
//! plain tool server. `OpenAPI` operations surface as tools whose arguments
//! are grouped into `pathParams` / `queryParams` / `body`.

use crate::envelope::CallEnvelope;
use crate::http::AppState;
use crate::registry::BackendRecord;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use crossbridge_openapi::build_tool;
use rmcp::model::{
    CallToolResult, ClientJsonRpcMessage, ClientRequest, Content, ErrorCode, Implementation,
    InitializeResult, JsonObject, ProtocolVersion, RequestId, ServerCapabilities, ServerResult,
    Tool,
};
use serde_json::Value;
use std::sync::Arc;

pub(crate) async fn post_message(
    State(state): State<AppState>,
    Path(backend_id): Path<String>,
    Json(message): Json<ClientJsonRpcMessage>,
) -> Response {
    let Some(record) = state.registry.get(&backend_id) else {
        return (
            StatusCode::NOT_FOUND,
            format!("no backend registered with id '{backend_id}'"),
        )
            .into_response();
    };

    let request = match message {
        ClientJsonRpcMessage::Request(request) => request,
        ClientJsonRpcMessage::Notification(_) => {
            return StatusCode::ACCEPTED.into_response();
        }
        other => {
            tracing::debug!(backend = %backend_id, "dropping unsupported message: {other:?}");
            return StatusCode::ACCEPTED.into_response();
        }
    };

    let id = request.id;
    let reply = match request.request {
        ClientRequest::InitializeRequest(_) => {
            super::jsonrpc_response(id, ServerResult::InitializeResult(initialize_result(&record)))
        }
        ClientRequest::ListToolsRequest(_) => super::jsonrpc_response(
            id,
            ServerResult::ListToolsResult(rmcp::model::ListToolsResult {
                tools: backend_tools(&record),
                ..Default::default()
            }),
        ),
        ClientRequest::CallToolRequest(call) => {
            let arguments = call
                .params
                .arguments
                .map_or(Value::Null, Value::Object);
            call_tool(&state, &record, id, &call.params.name, arguments).await
        }
        other => super::jsonrpc_error(
            id,
            ErrorCode::METHOD_NOT_FOUND,
            format!("unsupported method: {other:?}"),
        ),
    };

    Json(reply).into_response()
}

fn initialize_result(record: &BackendRecord) -> InitializeResult {
    InitializeResult {
        protocol_version: ProtocolVersion::default(),
        capabilities: ServerCapabilities::builder().enable_tools().build(),
        server_info: Implementation::from_build_env(),
        instructions: Some(format!(
            "Bridged {} backend '{}'",
            record.kind(),
            record.name()
        )),
    }
}

/// The tool surface a backend exposes over this endpoint.
pub(crate) fn backend_tools(record: &BackendRecord) -> Vec<Tool> {
    match record {
        BackendRecord::OpenApi(backend) => backend
            .operations
            .values()
            .map(|op| {
                let descriptor = build_tool(op);
                let schema = descriptor
                    .input_schema
                    .as_object()
                    .cloned()
                    .unwrap_or_default();
                Tool::new(descriptor.name, descriptor.description, Arc::new(schema))
            })
            .collect(),
        BackendRecord::Tool(backend) => backend
            .tools
            .iter()
            .map(|(name, spec)| {
                let schema = spec.input_schema.as_object().cloned().unwrap_or_default();
                Tool::new(
                    name.clone(),
                    spec.description.clone().unwrap_or_default(),
                    Arc::new(schema),
                )
            })
            .collect(),
    }
}

async fn call_tool(
    state: &AppState,
    record: &BackendRecord,
    id: RequestId,
    name: &str,
    arguments: Value,
) -> rmcp::model::ServerJsonRpcMessage {
    let envelope = match record {
        BackendRecord::OpenApi(_) => openapi_envelope(record.id(), name, &arguments),
        BackendRecord::Tool(_) => CallEnvelope {
            backend_id: record.id().to_string(),
            operation: name.to_string(),
            body: Some(arguments),
            ..CallEnvelope::default()
        },
    };

    let outcome = state.router.route(envelope).await;

    // Pre-flight failures map to protocol errors; failures of an attempted
    // call travel in-band as an error result.
    if let Some(error) = &outcome.error {
        if error.kind.is_local() {
            return super::jsonrpc_error(id, ErrorCode::INVALID_PARAMS, error.message.clone());
        }
    }

    let structured = match serde_json::to_value(&outcome) {
        Ok(value) => value,
        Err(e) => {
            return super::jsonrpc_error(
                id,
                ErrorCode::INTERNAL_ERROR,
                format!("encode result: {e}"),
            );
        }
    };
    let text = outcome
        .error
        .as_ref()
        .map_or_else(|| structured.to_string(), |error| error.message.clone());

    super::jsonrpc_response(
        id,
        ServerResult::CallToolResult(CallToolResult {
            content: vec![Content::text(text)],
            structured_content: Some(structured),
            is_error: Some(!outcome.success),
            meta: None,
        }),
    )
}

/// Regroup tool-call arguments into the proxy envelope shape.
fn openapi_envelope(backend_id: &str, operation: &str, arguments: &Value) -> CallEnvelope {
    let group = |key: &str| -> serde_json::Map<String, Value> {
        arguments
            .get(key)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_else(JsonObject::new)
    };
    CallEnvelope {
        backend_id: backend_id.to_string(),
        operation: operation.to_string(),
        path_params: group("pathParams"),
        query_params: group("queryParams"),
        body: arguments.get("body").cloned(),
        headers: std::collections::BTreeMap::new(),
    }
}
