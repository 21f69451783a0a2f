//! Normalized request/response envelopes.
//!
//! Both bridge directions (HTTP-style proxy and the tool-protocol transport)
//! speak these shapes internally. Failure is a first-class value: the router
//! always returns a [`ResultEnvelope`], never an error, so callers need no
//! exception handling to consume it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// An inbound call, addressed to one backend + operation/tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEnvelope {
    pub backend_id: String,
    /// `operationId` for OpenAPI backends, tool name for tool backends.
    pub operation: String,
    #[serde(default)]
    pub path_params: Map<String, Value>,
    #[serde(default)]
    pub query_params: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Error taxonomy, split by where the failure happens.
///
/// The first four are local and fast: they are decided before any network
/// traffic. The upstream kinds describe an attempted call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    BackendNotFound,
    BackendUnavailable,
    OperationNotFound,
    MissingPathParam,
    UpstreamTimeout,
    UpstreamTransport,
    UpstreamNonSuccess,
}

impl ErrorKind {
    /// Whether this kind is decided without touching the network.
    #[must_use]
    pub fn is_local(self) -> bool {
        matches!(
            self,
            ErrorKind::BackendNotFound
                | ErrorKind::BackendUnavailable
                | ErrorKind::OperationNotFound
                | ErrorKind::MissingPathParam
        )
    }
}

/// A normalized call failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_status: Option<u16>,
}

/// The uniform call outcome. `error` is present iff `success` is false.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEnvelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CallError>,
}

impl ResultEnvelope {
    #[must_use]
    pub fn ok(status_code: Option<u16>, data: Option<Value>) -> Self {
        Self {
            success: true,
            status_code,
            data,
            error: None,
        }
    }

    #[must_use]
    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            status_code: None,
            data: None,
            error: Some(CallError {
                kind,
                message: message.into(),
                upstream_status: None,
            }),
        }
    }

    #[must_use]
    pub fn upstream_failure(
        kind: ErrorKind,
        message: impl Into<String>,
        upstream_status: Option<u16>,
    ) -> Self {
        Self {
            success: false,
            status_code: upstream_status,
            data: None,
            error: Some(CallError {
                kind,
                message: message.into(),
                upstream_status,
            }),
        }
    }
}
