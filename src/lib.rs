//! Library crate for wheelspin-back, exposing modules for binaries and integration tests.

/// Environment-sourced runtime configuration.
pub mod config;
/// Durable store interfaces and backends.
pub mod dao;
/// Wire-format payloads.
pub mod dto;
/// Crate-wide error types.
pub mod error;
/// Broadcast, debounce, diff, validation, and cleanup services.
pub mod services;
/// Shared state and the composition root.
pub mod state;
