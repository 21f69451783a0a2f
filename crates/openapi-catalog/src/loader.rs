//! Spec loading and operation catalog construction.
//!
//! The loader fetches an `OpenAPI` document (URL or file), fingerprints the
//! raw bytes, parses it, resolves all references transitively, and walks
//! `paths` into an [`OperationCatalog`] keyed by `operationId`. Catalogs are
//! immutable once built; callers rebuild wholesale when the fingerprint
//! changes.

use crate::error::{CatalogError, Result};
use crate::resolver::{DocId, RefResolver};
use openapiv3::{OpenAPI, Operation, Parameter, ParameterSchemaOrContent, ReferenceOr};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;

/// Where a declared parameter travels in the upstream HTTP request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterLocation {
    Path,
    Query,
    Header,
}

/// One declared parameter of an operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterDescriptor {
    pub name: String,
    pub location: ParameterLocation,
    pub required: bool,
    /// JSON schema for the parameter value (documentation only; not enforced).
    pub schema: Value,
}

/// The bridge's protocol-neutral view of one `OpenAPI` operation.
///
/// Immutable once built. The set of descriptors for a backend is replaced
/// wholesale when the source document's fingerprint changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationDescriptor {
    pub operation_id: String,
    /// Path template as declared, e.g. `/pets/{petId}`.
    pub path: String,
    /// Uppercase HTTP method, e.g. `GET`.
    pub method: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ParameterDescriptor>,
    /// Present iff the operation declares a request body. The schema is
    /// surfaced for documentation; the bridge forwards bodies verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body_schema: Option<Value>,
}

impl OperationDescriptor {
    #[must_use]
    pub fn path_param_names(&self) -> Vec<&str> {
        self.parameters
            .iter()
            .filter(|p| p.location == ParameterLocation::Path)
            .map(|p| p.name.as_str())
            .collect()
    }

    #[must_use]
    pub fn has_query_params(&self) -> bool {
        self.parameters
            .iter()
            .any(|p| p.location == ParameterLocation::Query)
    }
}

/// A fully dereferenced operation catalog for one spec document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationCatalog {
    /// `sha256:<hex>` over the raw document bytes. Gates downstream rebuilds.
    pub fingerprint: String,
    pub operations: BTreeMap<String, OperationDescriptor>,
    /// Operations skipped because they carry no `operationId`.
    #[serde(default)]
    pub skipped_missing_id: usize,
}

/// Loads `OpenAPI` documents and builds operation catalogs.
#[derive(Debug, Clone)]
pub struct SpecLoader {
    client: Client,
    fetch_timeout: Duration,
}

impl SpecLoader {
    #[must_use]
    pub fn new(fetch_timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            fetch_timeout,
        }
    }

    /// Compute the catalog fingerprint for a raw document.
    #[must_use]
    pub fn fingerprint(raw: &str) -> String {
        format!("sha256:{}", hex::encode(Sha256::digest(raw.as_bytes())))
    }

    /// Fetch, parse and fully dereference a spec into an operation catalog.
    ///
    /// # Errors
    ///
    /// Returns `SpecUnreachable` if the document cannot be fetched,
    /// `SpecInvalid` if it cannot be parsed or a reference cannot be
    /// resolved, and `DuplicateToolName` if two operations share an
    /// `operationId`.
    pub async fn load(&self, location: &str) -> Result<OperationCatalog> {
        let raw = self.fetch(location).await?;
        self.build(location, &raw).await
    }

    /// Build a catalog from already-fetched document content.
    ///
    /// # Errors
    ///
    /// Same as [`Self::load`], minus the fetch.
    pub async fn build(&self, location: &str, raw: &str) -> Result<OperationCatalog> {
        // JSON is a valid YAML subset, so one parser covers both formats.
        let spec: OpenAPI = serde_yaml::from_str(raw)
            .map_err(|e| CatalogError::invalid(location, format!("parse failed: {e}")))?;

        let root = DocId::parse(location)?;
        let resolver = RefResolver::new(root, &spec, &self.client)?;

        let mut operations: BTreeMap<String, OperationDescriptor> = BTreeMap::new();
        let mut skipped_missing_id = 0usize;

        for (path, item_ref) in &spec.paths.paths {
            let (item_doc, item) = resolver.path_item(resolver.root(), item_ref).await?;

            let methods: [(&str, Option<&Operation>); 5] = [
                ("GET", item.get.as_ref()),
                ("PUT", item.put.as_ref()),
                ("POST", item.post.as_ref()),
                ("DELETE", item.delete.as_ref()),
                ("PATCH", item.patch.as_ref()),
            ];

            for (method, op) in methods {
                let Some(op) = op else { continue };

                let Some(op_id) = op.operation_id.clone().filter(|id| !id.is_empty()) else {
                    // OpenAPI does not guarantee an operationId per path/method
                    // pair, and tool identity needs a stable unique name.
                    tracing::warn!(%path, %method, "operation has no operationId; skipping");
                    skipped_missing_id += 1;
                    continue;
                };

                let descriptor = self
                    .build_operation(&resolver, &item_doc, path, method, op, &item.parameters)
                    .await?;

                if let Some(existing) = operations.get(&op_id) {
                    return Err(CatalogError::DuplicateToolName {
                        name: op_id,
                        first: format!("{} {}", existing.method, existing.path),
                        second: format!("{method} {path}"),
                    });
                }
                operations.insert(op_id, descriptor);
            }
        }

        Ok(OperationCatalog {
            fingerprint: Self::fingerprint(raw),
            operations,
            skipped_missing_id,
        })
    }

    async fn fetch(&self, location: &str) -> Result<String> {
        if location.starts_with("http://") || location.starts_with("https://") {
            tracing::debug!(spec = %location, "fetching OpenAPI spec");
            let resp = self
                .client
                .get(location)
                .timeout(self.fetch_timeout)
                .send()
                .await
                .map_err(|e| CatalogError::unreachable(location, e.to_string()))?;

            let status = resp.status();
            if !status.is_success() {
                return Err(CatalogError::unreachable(
                    location,
                    format!("HTTP {status}"),
                ));
            }
            resp.text()
                .await
                .map_err(|e| CatalogError::unreachable(location, e.to_string()))
        } else {
            tracing::debug!(spec = %location, "reading OpenAPI spec from file");
            tokio::fs::read_to_string(location)
                .await
                .map_err(|e| CatalogError::unreachable(location, e.to_string()))
        }
    }

    async fn build_operation(
        &self,
        resolver: &RefResolver<'_>,
        item_doc: &DocId,
        path: &str,
        method: &str,
        op: &Operation,
        item_params: &[ReferenceOr<Parameter>],
    ) -> Result<OperationDescriptor> {
        let mut parameters: Vec<ParameterDescriptor> = Vec::new();

        // Path-item parameters apply to every operation under the path;
        // operation-level declarations with the same name+location override.
        for node in item_params.iter().chain(op.parameters.iter()) {
            let (param_doc, param) = resolver.parameter(item_doc, node).await?;
            let Some(descriptor) = self
                .describe_parameter(resolver, &param_doc, &param)
                .await?
            else {
                tracing::warn!(%path, %method, "unsupported parameter location; skipping parameter");
                continue;
            };

            parameters.retain(|p| {
                !(p.name == descriptor.name && p.location == descriptor.location)
            });
            parameters.push(descriptor);
        }

        let request_body_schema = match &op.request_body {
            Some(body_ref) => {
                let (body_doc, body) = resolver.request_body(item_doc, body_ref).await?;
                Some(self.body_schema(resolver, &body_doc, &body).await?)
            }
            None => None,
        };

        let description = op
            .summary
            .clone()
            .or_else(|| op.description.clone())
            .unwrap_or_else(|| format!("Calls {method} {path}"));

        Ok(OperationDescriptor {
            operation_id: op.operation_id.clone().unwrap_or_default(),
            path: path.to_string(),
            method: method.to_string(),
            description,
            parameters,
            request_body_schema,
        })
    }

    async fn describe_parameter(
        &self,
        resolver: &RefResolver<'_>,
        doc: &DocId,
        param: &Parameter,
    ) -> Result<Option<ParameterDescriptor>> {
        let (data, location, required) = match param {
            // Path params are required regardless of what the document says.
            Parameter::Path { parameter_data, .. } => {
                (parameter_data, ParameterLocation::Path, true)
            }
            Parameter::Query { parameter_data, .. } => (
                parameter_data,
                ParameterLocation::Query,
                parameter_data.required,
            ),
            Parameter::Header { parameter_data, .. } => (
                parameter_data,
                ParameterLocation::Header,
                parameter_data.required,
            ),
            Parameter::Cookie { .. } => return Ok(None),
        };

        let schema = match &data.format {
            ParameterSchemaOrContent::Schema(schema_ref) => {
                let (_, schema) = resolver.schema(doc, schema_ref).await?;
                serde_json::to_value(&schema).unwrap_or_else(|_| json!({}))
            }
            ParameterSchemaOrContent::Content(_) => json!({}),
        };

        Ok(Some(ParameterDescriptor {
            name: data.name.clone(),
            location,
            required,
            schema,
        }))
    }

    async fn body_schema(
        &self,
        resolver: &RefResolver<'_>,
        doc: &DocId,
        body: &openapiv3::RequestBody,
    ) -> Result<Value> {
        let json_media = body.content.get("application/json").or_else(|| {
            body.content.iter().find_map(|(k, v)| {
                let lower = k.to_ascii_lowercase();
                (lower.contains("json")).then_some(v)
            })
        });

        let Some(media) = json_media else {
            // Non-JSON body: surface an opaque object schema.
            return Ok(json!({ "type": "object" }));
        };
        let Some(schema_ref) = media.schema.as_ref() else {
            return Ok(json!({ "type": "object" }));
        };

        let (_, schema) = resolver.schema(doc, schema_ref).await?;
        Ok(serde_json::to_value(&schema).unwrap_or_else(|_| json!({ "type": "object" })))
    }
}
