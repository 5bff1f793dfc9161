//! Compass Server - HTTP surface for the Compass agent

pub mod server;

pub use server::{build_router, start, ApiError, AppState, ServerHandle};
