//! HTTP server for the dockyard submission builder.
//!
//! Exposes the scheduler control surface and serves compressed build logs.

pub mod error;
pub mod routes;
pub mod state;

pub use state::AppState;
