//! CityPulse API crate - axum HTTP surface for the chat service.
//!
//! Exposes session-id minting, the chat turn endpoint and a health check.
//! Pipeline errors are mapped to JSON bodies in [`error`].

pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
