//! StockEasy Server - HTTP surface for the restock agent
//!
//! Wires the policy store, payment orchestrator and restock service from
//! configuration and exposes them over axum.

pub mod api;
pub mod config;
pub mod shutdown;
pub mod state;

pub use api::{create_router, AppError, CreateSessionRequest, RestockResponse};
pub use config::ServerConfig;
pub use shutdown::serve_with_grace;
pub use state::AppState;
