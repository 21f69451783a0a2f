//! Uniform call routing.
//!
//! [`CallRouter::route`] takes a [`CallEnvelope`] and always hands back a
//! [`ResultEnvelope`]. Local failures (unknown backend, unavailable backend,
//! unknown operation, missing path parameter) are decided from registry state
//! alone and never touch the network.

use crate::envelope::{CallEnvelope, ErrorKind, ResultEnvelope};
use crate::mcp::client::{self, McpClientError};
use crate::registry::{BackendRecord, OpenApiBackend, Registry, ToolBackend};
use crate::transport::{HttpCall, Transport, TransportError};
use crossbridge_openapi::OperationDescriptor;
use rmcp::model::JsonObject;
use serde_json::Value;
use std::sync::Arc;

pub struct CallRouter {
    registry: Arc<Registry>,
    transport: Arc<dyn Transport>,
}

impl CallRouter {
    #[must_use]
    pub fn new(registry: Arc<Registry>, transport: Arc<dyn Transport>) -> Self {
        Self {
            registry,
            transport,
        }
    }

    /// Route one call to its backend and normalize the outcome.
    pub async fn route(&self, envelope: CallEnvelope) -> ResultEnvelope {
        let Some(record) = self.registry.get(&envelope.backend_id) else {
            return ResultEnvelope::failure(
                ErrorKind::BackendNotFound,
                format!("no backend registered with id '{}'", envelope.backend_id),
            );
        };

        if !record.is_available() {
            return ResultEnvelope::failure(
                ErrorKind::BackendUnavailable,
                format!(
                    "backend '{}' is {}; call refused",
                    envelope.backend_id,
                    record.status_label()
                ),
            );
        }

        match record {
            BackendRecord::OpenApi(backend) => self.route_openapi(&backend, &envelope).await,
            BackendRecord::Tool(backend) => self.route_tool(&backend, &envelope).await,
        }
    }

    async fn route_openapi(
        &self,
        backend: &OpenApiBackend,
        envelope: &CallEnvelope,
    ) -> ResultEnvelope {
        let Some(op) = backend.operations.get(&envelope.operation) else {
            return ResultEnvelope::failure(
                ErrorKind::OperationNotFound,
                format!(
                    "backend '{}' has no operation '{}'",
                    backend.id, envelope.operation
                ),
            );
        };

        let path = match substitute_path(op, envelope) {
            Ok(path) => path,
            Err(missing) => {
                return ResultEnvelope::failure(
                    ErrorKind::MissingPathParam,
                    format!(
                        "operation '{}' requires path parameter '{missing}'",
                        envelope.operation
                    ),
                );
            }
        };

        let url = format!("{}{path}", backend.base_url.trim_end_matches('/'));
        let mut call = HttpCall::new(op.method.clone(), url);
        call.query = envelope
            .query_params
            .iter()
            .map(|(name, value)| (name.clone(), render_param(value)))
            .collect();
        call.headers = envelope.headers.clone();
        call.body = envelope.body.clone();

        tracing::debug!(
            backend = %backend.id,
            operation = %envelope.operation,
            method = %op.method,
            url = %call.url,
            "proxying operation call"
        );

        let reply = match self.transport.send(call).await {
            Ok(reply) => reply,
            Err(err) => return transport_failure(&err),
        };

        let data = reply.body_json();
        if (200..300).contains(&reply.status) {
            ResultEnvelope::ok(Some(reply.status), Some(data))
        } else {
            let mut out = ResultEnvelope::upstream_failure(
                ErrorKind::UpstreamNonSuccess,
                format!("upstream answered HTTP {}", reply.status),
                Some(reply.status),
            );
            out.data = Some(data);
            out
        }
    }

    async fn route_tool(&self, backend: &ToolBackend, envelope: &CallEnvelope) -> ResultEnvelope {
        if !backend.tools.contains_key(&envelope.operation) {
            return ResultEnvelope::failure(
                ErrorKind::OperationNotFound,
                format!(
                    "backend '{}' advertises no tool '{}'",
                    backend.id, envelope.operation
                ),
            );
        }

        let arguments = tool_arguments(envelope.body.clone());
        tracing::debug!(
            backend = %backend.id,
            tool = %envelope.operation,
            "proxying tool call"
        );

        let result = match client::call_tool(
            self.transport.as_ref(),
            &backend.endpoint_url,
            &envelope.operation,
            arguments,
        )
        .await
        {
            Ok(result) => result,
            Err(err) => return tool_call_failure(&err),
        };

        let text = result
            .content
            .iter()
            .filter_map(|c| c.raw.as_text().map(|t| t.text.clone()))
            .collect::<Vec<_>>()
            .join("\n");
        let data = result
            .structured_content
            .clone()
            .or_else(|| (!text.is_empty()).then(|| Value::String(text.clone())));

        if result.is_error == Some(true) {
            let message = if text.is_empty() {
                "tool reported an error".to_string()
            } else {
                text
            };
            let mut out =
                ResultEnvelope::upstream_failure(ErrorKind::UpstreamNonSuccess, message, None);
            out.data = data;
            out
        } else {
            ResultEnvelope::ok(None, data)
        }
    }
}

/// Fill `{name}` placeholders from the envelope's path parameters.
///
/// The template itself is authoritative: every `{...}` in it needs a value,
/// whether or not the document declared a matching parameter. Nothing with an
/// unfilled placeholder ever goes upstream.
fn substitute_path(op: &OperationDescriptor, envelope: &CallEnvelope) -> Result<String, String> {
    let mut path = String::with_capacity(op.path.len());
    let mut rest = op.path.as_str();
    while let Some(start) = rest.find('{') {
        path.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            return Err(after.to_string());
        };
        let name = &after[..end];
        let Some(value) = envelope.path_params.get(name) else {
            return Err(name.to_string());
        };
        path.push_str(&render_param(value));
        rest = &after[end + 1..];
    }
    path.push_str(rest);
    Ok(path)
}

/// Render a JSON value as a URL path/query token. Strings go bare, the rest
/// keep their JSON rendering.
fn render_param(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn tool_arguments(body: Option<Value>) -> Option<JsonObject> {
    match body {
        Some(Value::Object(map)) => Some(map),
        None | Some(Value::Null) => None,
        Some(other) => {
            let mut map = JsonObject::new();
            map.insert("value".to_string(), other);
            Some(map)
        }
    }
}

fn transport_failure(err: &TransportError) -> ResultEnvelope {
    match err {
        TransportError::Timeout { .. } => {
            ResultEnvelope::failure(ErrorKind::UpstreamTimeout, err.to_string())
        }
        TransportError::Transport { .. } | TransportError::BadUrl { .. } => {
            ResultEnvelope::failure(ErrorKind::UpstreamTransport, err.to_string())
        }
    }
}

fn tool_call_failure(err: &McpClientError) -> ResultEnvelope {
    match err {
        McpClientError::Transport(inner) => transport_failure(inner),
        McpClientError::Protocol(_) => {
            ResultEnvelope::failure(ErrorKind::UpstreamTransport, err.to_string())
        }
        McpClientError::HttpStatus { status, .. } => ResultEnvelope::upstream_failure(
            ErrorKind::UpstreamNonSuccess,
            err.to_string(),
            Some(*status),
        ),
        McpClientError::Upstream { .. } => {
            ResultEnvelope::upstream_failure(ErrorKind::UpstreamNonSuccess, err.to_string(), None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{OpenApiStatus, ToolSpec, ToolStatus};
    use crate::transport::HttpReply;
    use async_trait::async_trait;
    use chrono::Utc;
    use crossbridge_openapi::{ParameterDescriptor, ParameterLocation};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::{BTreeMap, VecDeque};

    /// Scripted transport that records every outbound call.
    struct FakeTransport {
        calls: Mutex<Vec<HttpCall>>,
        replies: Mutex<VecDeque<Result<HttpReply, TransportError>>>,
    }

    impl FakeTransport {
        fn new(replies: Vec<Result<HttpReply, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                replies: Mutex::new(replies.into()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().len()
        }

        fn json_reply(status: u16, body: Value) -> Result<HttpReply, TransportError> {
            Ok(HttpReply {
                status,
                content_type: Some("application/json".to_string()),
                body: body.to_string().into_bytes(),
            })
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn send(&self, call: HttpCall) -> Result<HttpReply, TransportError> {
            self.calls.lock().push(call.clone());
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| panic!("unscripted call to {}", call.url))
        }
    }

    fn pet_operation() -> OperationDescriptor {
        OperationDescriptor {
            operation_id: "getPet".to_string(),
            path: "/pets/{petId}".to_string(),
            method: "GET".to_string(),
            description: "Fetch one pet".to_string(),
            parameters: vec![
                ParameterDescriptor {
                    name: "petId".to_string(),
                    location: ParameterLocation::Path,
                    required: true,
                    schema: json!({"type": "integer"}),
                },
                ParameterDescriptor {
                    name: "verbose".to_string(),
                    location: ParameterLocation::Query,
                    required: false,
                    schema: json!({"type": "boolean"}),
                },
            ],
            request_body_schema: None,
        }
    }

    fn openapi_record(status: OpenApiStatus) -> BackendRecord {
        BackendRecord::OpenApi(OpenApiBackend {
            id: "openapi_aaaa0001".to_string(),
            name: "petstore".to_string(),
            base_url: "http://pets.local:8000/".to_string(),
            spec_url: "http://pets.local:8000/openapi.json".to_string(),
            fingerprint: None,
            operations: BTreeMap::from([("getPet".to_string(), pet_operation())]),
            status,
            last_seen: Some(Utc::now()),
        })
    }

    fn tool_record(status: ToolStatus) -> BackendRecord {
        BackendRecord::Tool(ToolBackend {
            id: "tool_bbbb0001".to_string(),
            name: "files".to_string(),
            endpoint_url: "http://127.0.0.1:9301/mcp".to_string(),
            launch_command: "uvx files-server".to_string(),
            tools: BTreeMap::from([(
                "read_file".to_string(),
                ToolSpec {
                    description: None,
                    input_schema: json!({"type": "object"}),
                },
            )]),
            status,
            last_health_check: None,
        })
    }

    fn router_with(
        records: Vec<BackendRecord>,
        transport: Arc<FakeTransport>,
    ) -> (CallRouter, Arc<Registry>) {
        let registry = Arc::new(Registry::new(None));
        for record in records {
            registry.upsert(record);
        }
        (
            CallRouter::new(registry.clone(), transport),
            registry,
        )
    }

    fn envelope(backend_id: &str, operation: &str) -> CallEnvelope {
        CallEnvelope {
            backend_id: backend_id.to_string(),
            operation: operation.to_string(),
            ..CallEnvelope::default()
        }
    }

    #[tokio::test]
    async fn unknown_backend_fails_without_network() {
        let transport = FakeTransport::new(vec![]);
        let (router, _) = router_with(vec![], transport.clone());

        let out = router.route(envelope("openapi_missing", "getPet")).await;
        assert!(!out.success);
        assert_eq!(out.error.unwrap().kind, ErrorKind::BackendNotFound);
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn unavailable_backend_fails_without_network() {
        let transport = FakeTransport::new(vec![]);
        let (router, _) =
            router_with(vec![openapi_record(OpenApiStatus::Offline)], transport.clone());

        let out = router.route(envelope("openapi_aaaa0001", "getPet")).await;
        let error = out.error.unwrap();
        assert_eq!(error.kind, ErrorKind::BackendUnavailable);
        assert!(error.message.contains("offline"));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn missing_path_param_fails_without_network() {
        let transport = FakeTransport::new(vec![]);
        let (router, _) =
            router_with(vec![openapi_record(OpenApiStatus::Online)], transport.clone());

        let out = router.route(envelope("openapi_aaaa0001", "getPet")).await;
        let error = out.error.unwrap();
        assert_eq!(error.kind, ErrorKind::MissingPathParam);
        assert!(error.message.contains("petId"));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn undeclared_template_placeholder_still_requires_a_value() {
        // Template names a param the document never declared.
        let undeclared = OperationDescriptor {
            operation_id: "getItem".to_string(),
            path: "/items/{id}".to_string(),
            method: "GET".to_string(),
            description: "Fetch one item".to_string(),
            parameters: vec![],
            request_body_schema: None,
        };
        let mut record = openapi_record(OpenApiStatus::Online);
        let BackendRecord::OpenApi(backend) = &mut record else {
            unreachable!()
        };
        backend.operations.insert("getItem".to_string(), undeclared);

        let transport = FakeTransport::new(vec![FakeTransport::json_reply(
            200,
            json!({"ok": true}),
        )]);
        let (router, _) = router_with(vec![record], transport.clone());

        let out = router.route(envelope("openapi_aaaa0001", "getItem")).await;
        let error = out.error.unwrap();
        assert_eq!(error.kind, ErrorKind::MissingPathParam);
        assert!(error.message.contains("id"));
        assert_eq!(transport.call_count(), 0);

        let mut call = envelope("openapi_aaaa0001", "getItem");
        call.path_params.insert("id".to_string(), json!(7));
        let out = router.route(call).await;
        assert!(out.success);
        assert_eq!(
            transport.calls.lock()[0].url,
            "http://pets.local:8000/items/7"
        );
    }

    #[tokio::test]
    async fn openapi_call_substitutes_path_and_query() {
        let transport = FakeTransport::new(vec![FakeTransport::json_reply(
            200,
            json!({"id": 42, "name": "rex"}),
        )]);
        let (router, _) =
            router_with(vec![openapi_record(OpenApiStatus::Online)], transport.clone());

        let mut call = envelope("openapi_aaaa0001", "getPet");
        call.path_params.insert("petId".to_string(), json!(42));
        call.query_params.insert("verbose".to_string(), json!(true));

        let out = router.route(call).await;
        assert!(out.success);
        assert_eq!(out.status_code, Some(200));
        assert_eq!(out.data.unwrap()["name"], "rex");

        let calls = transport.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].method, "GET");
        // No double slash even though the base URL has a trailing one.
        assert_eq!(calls[0].url, "http://pets.local:8000/pets/42");
        assert_eq!(calls[0].query, vec![("verbose".to_string(), "true".to_string())]);
    }

    #[tokio::test]
    async fn upstream_non_success_mirrors_status_and_body() {
        let transport = FakeTransport::new(vec![FakeTransport::json_reply(
            404,
            json!({"detail": "no such pet"}),
        )]);
        let (router, _) = router_with(vec![openapi_record(OpenApiStatus::Online)], transport);

        let mut call = envelope("openapi_aaaa0001", "getPet");
        call.path_params.insert("petId".to_string(), json!(7));

        let out = router.route(call).await;
        assert!(!out.success);
        assert_eq!(out.status_code, Some(404));
        assert_eq!(out.data.unwrap()["detail"], "no such pet");
        let error = out.error.unwrap();
        assert_eq!(error.kind, ErrorKind::UpstreamNonSuccess);
        assert_eq!(error.upstream_status, Some(404));
    }

    #[tokio::test]
    async fn upstream_timeout_is_distinguished() {
        let transport = FakeTransport::new(vec![Err(TransportError::Timeout {
            url: "http://pets.local:8000/pets/7".to_string(),
        })]);
        let (router, _) = router_with(vec![openapi_record(OpenApiStatus::Online)], transport);

        let mut call = envelope("openapi_aaaa0001", "getPet");
        call.path_params.insert("petId".to_string(), json!(7));

        let out = router.route(call).await;
        assert_eq!(out.error.unwrap().kind, ErrorKind::UpstreamTimeout);
    }

    #[tokio::test]
    async fn stopped_tool_backend_fails_without_network() {
        let transport = FakeTransport::new(vec![]);
        let (router, _) = router_with(vec![tool_record(ToolStatus::Stopped)], transport.clone());

        let mut call = envelope("tool_bbbb0001", "read_file");
        call.body = Some(json!({"path": "/etc/hosts"}));

        let out = router.route(call).await;
        let error = out.error.unwrap();
        assert_eq!(error.kind, ErrorKind::BackendUnavailable);
        assert!(error.message.contains("stopped"));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn unknown_tool_name_fails_without_network() {
        let transport = FakeTransport::new(vec![]);
        let (router, _) = router_with(vec![tool_record(ToolStatus::Running)], transport.clone());

        let out = router.route(envelope("tool_bbbb0001", "write_file")).await;
        assert_eq!(out.error.unwrap().kind, ErrorKind::OperationNotFound);
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn tool_call_round_trips_through_jsonrpc() {
        let transport = FakeTransport::new(vec![FakeTransport::json_reply(
            200,
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {
                    "content": [{"type": "text", "text": "file contents"}],
                    "isError": false
                }
            }),
        )]);
        let (router, _) = router_with(vec![tool_record(ToolStatus::Running)], transport.clone());

        let mut call = envelope("tool_bbbb0001", "read_file");
        call.body = Some(json!({"path": "/etc/hosts"}));

        let out = router.route(call).await;
        assert!(out.success);
        assert_eq!(out.data, Some(json!("file contents")));

        let calls = transport.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].url, "http://127.0.0.1:9301/mcp");
        let sent = calls[0].body.as_ref().unwrap();
        assert_eq!(sent["method"], "tools/call");
        assert_eq!(sent["params"]["name"], "read_file");
        assert_eq!(sent["params"]["arguments"]["path"], "/etc/hosts");
    }

    #[tokio::test]
    async fn tool_error_result_becomes_upstream_failure() {
        let transport = FakeTransport::new(vec![FakeTransport::json_reply(
            200,
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": {"code": -32603, "message": "disk on fire"}
            }),
        )]);
        let (router, _) = router_with(vec![tool_record(ToolStatus::Running)], transport);

        let mut call = envelope("tool_bbbb0001", "read_file");
        call.body = Some(json!({"path": "/etc/hosts"}));

        let out = router.route(call).await;
        let error = out.error.unwrap();
        assert_eq!(error.kind, ErrorKind::UpstreamNonSuccess);
        assert!(error.message.contains("disk on fire"));
    }
}
