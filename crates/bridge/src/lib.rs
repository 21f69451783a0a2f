//! crossbridge: a bidirectional bridge between `OpenAPI` HTTP services and
//! tool-protocol backends.
//!
//! Either side can invoke operations on the other: `OpenAPI` operations are
//! translated into callable tool descriptors, and tool invocations are
//! exposed as proxyable HTTP-style calls. Backends are discovered and
//! health-tracked independently; one misbehaving backend never affects calls
//! to another.

pub mod config;
pub mod discovery;
pub mod envelope;
pub mod http;
pub mod mcp;
pub mod registry;
pub mod router;
pub mod transport;
