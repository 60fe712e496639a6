//! Durable store collaborator interfaces and the in-memory backend.

/// TTL-aware in-memory store used by tests and degraded mode.
pub mod memory;
/// Store abstraction layer and key helpers.
pub mod store;
