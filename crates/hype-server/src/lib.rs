//! # hype-server
//!
//! The Hype relay as a network service: configuration, the axum WebSocket
//! endpoint and Prometheus metrics. The `hype` binary is a thin wrapper
//! around [`handlers::run_server`].

pub mod config;
pub mod handlers;
pub mod metrics;

pub use config::Config;
pub use handlers::{run_server, serve, AppState};
