//! Shared building blocks for the vigil node agent: the node configuration
//! store and the record types that flow into storage.

pub mod config;
pub mod types;
