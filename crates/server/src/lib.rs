//! HTTP adapter over the scheduling engine.
//!
//! Exposed as a library so the router can be driven directly in tests; the
//! binary in `main.rs` adds config, restore-on-start and shutdown handling.

pub mod api;
pub mod router;
pub mod state;

pub use router::build_router;
pub use state::AppState;
