//! Movies Relay Connectors
//!
//! Adapters for downstream services.
//! Implements the execution layer's `RegistryPort` over HTTP.

#![warn(clippy::all)]

// Public modules
pub mod registry_rest;

// Re-exports
pub use registry_rest::{RegistryRestClient, RegistryRestError, DEFAULT_REGISTRY_URL};
