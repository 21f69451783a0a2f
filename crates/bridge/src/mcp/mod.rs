//! Tool-protocol (MCP) plumbing, both directions.
//!
//! [`client`] speaks single-shot JSON-RPC-over-HTTP to tool backends;
//! [`server`] exposes each registered backend as a tool server at
//! `POST /mcp/{backend_id}`.

use rmcp::model::{
    ErrorCode, ErrorData, JsonRpcError, JsonRpcResponse, JsonRpcVersion2_0, RequestId,
    ServerJsonRpcMessage, ServerResult,
};

pub mod client;
pub mod server;

pub(crate) fn jsonrpc_response(id: RequestId, result: ServerResult) -> ServerJsonRpcMessage {
    ServerJsonRpcMessage::Response(JsonRpcResponse {
        jsonrpc: JsonRpcVersion2_0,
        id,
        result,
    })
}

pub(crate) fn jsonrpc_error(
    id: RequestId,
    code: ErrorCode,
    message: impl Into<String>,
) -> ServerJsonRpcMessage {
    ServerJsonRpcMessage::Error(JsonRpcError {
        jsonrpc: JsonRpcVersion2_0,
        id,
        error: ErrorData::new(code, message.into(), None),
    })
}
