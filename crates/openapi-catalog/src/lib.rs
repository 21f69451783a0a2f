//! OpenAPI catalog tooling for crossbridge.
//!
//! This crate turns an `OpenAPI` document into a self-contained operation
//! catalog and translates each operation into a protocol-neutral tool
//! descriptor. It knows nothing about backend registries or call routing;
//! the bridge crate builds on top of it.

pub mod descriptor;
pub mod error;
pub mod loader;
pub mod resolver;

pub use descriptor::{ToolDescriptor, build_tool, build_tools};
pub use error::{CatalogError, Result};
pub use loader::{
    OperationCatalog, OperationDescriptor, ParameterDescriptor, ParameterLocation, SpecLoader,
};
