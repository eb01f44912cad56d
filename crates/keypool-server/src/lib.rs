//! # Keypool Server
//!
//! HTTP surface for the keypool dispatcher:
//! - `POST /v1/complete` dispatches a conversation across the key pool
//! - `GET /health` and `GET /` for liveness checks
//! - `GET /stats` and `GET /metrics` for observability

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bootstrap;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod server;
pub mod state;

#[cfg(test)]
mod test_support;

pub use bootstrap::{build_state, build_state_with_backend, logging_config};
pub use error::{ApiError, ServerError};
pub use routes::create_router;
pub use server::Server;
pub use state::AppState;
