/// Broadcast orchestration and retrying emission.
pub mod broadcaster;
/// Per-room cleanup of expired state.
pub mod cleanup;
/// Debounce/coalescing gate in front of the broadcaster.
pub mod debounce;
/// Pure snapshot differ.
pub mod diff;
/// Structural snapshot validation.
pub mod validation;
