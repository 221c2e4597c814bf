//! HTTP surface — thin axum handlers over the engine, gateway, and dispatcher.

pub mod routes;
pub mod ws;

pub use routes::{AppState, flow_routes};
