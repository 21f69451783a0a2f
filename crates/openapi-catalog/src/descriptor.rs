//! Operation → tool descriptor translation.
//!
//! A [`ToolDescriptor`] is the tool-protocol face of one `OpenAPI` operation.
//! The translation is a pure function and one-to-one: every descriptor traces
//! back to exactly one operation, and a call constructed strictly from the
//! descriptor's input schema always carries everything the router needs to
//! rebuild the HTTP request (no hidden inputs).

use crate::loader::{OperationCatalog, OperationDescriptor, ParameterLocation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// A protocol-neutral, schema-described callable unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Equal to the source `operationId`; unique per backend.
    pub name: String,
    pub description: String,
    /// Object schema with at most three top-level fields: `pathParams`,
    /// `queryParams` and `body`, each present iff the operation declares them.
    pub input_schema: Value,
}

/// Translate one operation into its tool descriptor.
#[must_use]
pub fn build_tool(op: &OperationDescriptor) -> ToolDescriptor {
    let mut properties = Map::new();
    let mut required: Vec<Value> = Vec::new();

    let path_params = group_schema(op, ParameterLocation::Path);
    if let Some(schema) = path_params {
        properties.insert("pathParams".to_string(), schema);
        // Path params are always required, so the group is too.
        required.push(json!("pathParams"));
    }

    if let Some(schema) = group_schema(op, ParameterLocation::Query) {
        properties.insert("queryParams".to_string(), schema);
    }

    if let Some(body) = &op.request_body_schema {
        properties.insert("body".to_string(), body.clone());
    }

    let mut input_schema = json!({
        "type": "object",
        "properties": Value::Object(properties),
    });
    if !required.is_empty() {
        input_schema["required"] = Value::Array(required);
    }

    ToolDescriptor {
        name: op.operation_id.clone(),
        description: op.description.clone(),
        input_schema,
    }
}

/// Translate a whole catalog, one descriptor per operation.
///
/// Uniqueness is already guaranteed by catalog construction (duplicate
/// `operationId`s fail the load), so this cannot produce colliding names.
#[must_use]
pub fn build_tools(catalog: &OperationCatalog) -> Vec<ToolDescriptor> {
    catalog.operations.values().map(build_tool).collect()
}

fn group_schema(op: &OperationDescriptor, location: ParameterLocation) -> Option<Value> {
    let mut properties = Map::new();
    let mut required: Vec<Value> = Vec::new();

    for param in op.parameters.iter().filter(|p| p.location == location) {
        properties.insert(param.name.clone(), param.schema.clone());
        if param.required {
            required.push(json!(param.name));
        }
    }

    if properties.is_empty() {
        return None;
    }

    let mut schema = json!({
        "type": "object",
        "properties": Value::Object(properties),
    });
    if !required.is_empty() {
        schema["required"] = Value::Array(required);
    }
    Some(schema)
}
