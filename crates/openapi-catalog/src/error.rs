//! Error types for `crossbridge-openapi`.

use thiserror::Error;

/// Main error type for catalog construction.
///
/// `SpecUnreachable` and `SpecInvalid` are non-fatal to a bridge as a whole:
/// callers mark the affected backend offline and move on.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// The spec document could not be fetched (network, timeout, missing file).
    #[error("spec unreachable at '{location}': {message}")]
    SpecUnreachable { location: String, message: String },

    /// The spec document was fetched but is malformed or contains an
    /// unresolvable reference.
    #[error("invalid spec at '{location}': {message}")]
    SpecInvalid { location: String, message: String },

    /// Two operations within one document map to the same `operationId`.
    ///
    /// Surfaced at catalog-build time; no partial catalog is published.
    #[error("duplicate tool name '{name}' ({first} and {second})")]
    DuplicateToolName {
        name: String,
        first: String,
        second: String,
    },

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CatalogError {
    pub(crate) fn invalid(location: impl Into<String>, message: impl Into<String>) -> Self {
        CatalogError::SpecInvalid {
            location: location.into(),
            message: message.into(),
        }
    }

    pub(crate) fn unreachable(location: impl Into<String>, message: impl Into<String>) -> Self {
        CatalogError::SpecUnreachable {
            location: location.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for catalog operations.
pub type Result<T> = std::result::Result<T, CatalogError>;
