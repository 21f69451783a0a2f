//! Single-shot JSON-RPC client for tool backends.
//!
//! Every exchange is one stateless POST: build the request message, send it
//! through the [`Transport`] seam, and read one response back. Endpoints that
//! frame the response as a one-event SSE stream are accepted too.

use crate::transport::{HttpCall, HttpReply, Transport, TransportError};
use rmcp::model::{
    CallToolRequest, CallToolRequestMethod, CallToolRequestParam, CallToolResult,
    ClientCapabilities, ClientJsonRpcMessage, ClientRequest, Extensions, Implementation,
    InitializeRequest, InitializeResult, InitializeResultMethod, JsonObject, JsonRpcRequest,
    JsonRpcVersion2_0, ListToolsRequest, ListToolsRequestMethod, ProtocolVersion, RequestId,
    ServerJsonRpcMessage, ServerResult, Tool,
};
use std::borrow::Cow;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum McpClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("tool endpoint {endpoint} answered HTTP {status}")]
    HttpStatus { endpoint: String, status: u16 },
    #[error("malformed tool-protocol response: {0}")]
    Protocol(String),
    #[error("tool backend error {code}: {message}")]
    Upstream { code: i32, message: String },
}

fn request_message(request: ClientRequest) -> ClientJsonRpcMessage {
    ClientJsonRpcMessage::Request(JsonRpcRequest {
        jsonrpc: JsonRpcVersion2_0,
        id: RequestId::Number(1),
        request,
    })
}

/// POST one message and decode the single response.
async fn post_message(
    transport: &dyn Transport,
    endpoint: &str,
    message: ClientJsonRpcMessage,
) -> Result<ServerResult, McpClientError> {
    let body = serde_json::to_value(&message)
        .map_err(|e| McpClientError::Protocol(format!("encode request: {e}")))?;

    let mut call = HttpCall::new("POST", endpoint);
    call.headers.insert(
        "accept".to_string(),
        "application/json, text/event-stream".to_string(),
    );
    call.body = Some(body);

    let reply = transport.send(call).await?;
    if !(200..300).contains(&reply.status) {
        return Err(McpClientError::HttpStatus {
            endpoint: endpoint.to_string(),
            status: reply.status,
        });
    }
    read_single_response(&reply)
}

/// Decode one `ServerJsonRpcMessage` from a plain-JSON or SSE-framed body.
fn read_single_response(reply: &HttpReply) -> Result<ServerResult, McpClientError> {
    let text = std::str::from_utf8(&reply.body)
        .map_err(|_| McpClientError::Protocol("non-UTF-8 response body".to_string()))?;

    let is_sse = reply
        .content_type
        .as_deref()
        .is_some_and(|ct| ct.contains("text/event-stream"));
    let payload = if is_sse {
        text.lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(str::trim)
            .find(|data| !data.is_empty())
            .ok_or_else(|| McpClientError::Protocol("empty event stream".to_string()))?
    } else {
        text
    };

    let message: ServerJsonRpcMessage = serde_json::from_str(payload)
        .map_err(|e| McpClientError::Protocol(format!("decode response: {e}")))?;
    match message {
        ServerJsonRpcMessage::Response(r) => Ok(r.result),
        ServerJsonRpcMessage::Error(e) => Err(McpClientError::Upstream {
            code: e.error.code.0,
            message: e.error.message.to_string(),
        }),
        other => Err(McpClientError::Protocol(format!(
            "unexpected message: {other:?}"
        ))),
    }
}

/// `initialize` against a tool backend. Success doubles as the health check.
pub async fn initialize(
    transport: &dyn Transport,
    endpoint: &str,
) -> Result<InitializeResult, McpClientError> {
    let message = request_message(ClientRequest::InitializeRequest(InitializeRequest {
        method: InitializeResultMethod,
        params: rmcp::model::InitializeRequestParam {
            protocol_version: ProtocolVersion::default(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation::from_build_env(),
            meta: None,
        },
        extensions: Extensions::default(),
    }));
    match post_message(transport, endpoint, message).await? {
        ServerResult::InitializeResult(r) => Ok(r),
        other => Err(McpClientError::Protocol(format!(
            "initialize returned {other:?}"
        ))),
    }
}

/// `tools/list` against a tool backend.
pub async fn list_tools(
    transport: &dyn Transport,
    endpoint: &str,
) -> Result<Vec<Tool>, McpClientError> {
    let message = request_message(ClientRequest::ListToolsRequest(ListToolsRequest {
        method: ListToolsRequestMethod,
        params: None,
        extensions: Extensions::default(),
    }));
    match post_message(transport, endpoint, message).await? {
        ServerResult::ListToolsResult(r) => Ok(r.tools),
        other => Err(McpClientError::Protocol(format!(
            "tools/list returned {other:?}"
        ))),
    }
}

/// `tools/call` against a tool backend.
pub async fn call_tool(
    transport: &dyn Transport,
    endpoint: &str,
    name: &str,
    arguments: Option<JsonObject>,
) -> Result<CallToolResult, McpClientError> {
    let message = request_message(ClientRequest::CallToolRequest(CallToolRequest {
        method: CallToolRequestMethod,
        params: CallToolRequestParam {
            name: Cow::Owned(name.to_string()),
            arguments,
            meta: None,
            task: None,
        },
        extensions: Extensions::default(),
    }));
    match post_message(transport, endpoint, message).await? {
        ServerResult::CallToolResult(r) => Ok(r),
        other => Err(McpClientError::Protocol(format!(
            "tools/call returned {other:?}"
        ))),
    }
}
