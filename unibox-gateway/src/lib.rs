//! HTTP/WebSocket gateway for unibox
//!
//! Wires the delivery pipeline together behind an axum router: job
//! submission and polling, scheduling, webhook intake, offline sync,
//! and the real-time event stream.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod server;
pub mod state;
pub mod ws;

pub use server::{build_router, run_server};
pub use state::AppState;
