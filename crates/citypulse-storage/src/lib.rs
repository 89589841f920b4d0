//! CityPulse Storage crate - SQLite persistence for conversation sessions.
//!
//! Provides a WAL-mode SQLite database with migrations and the session
//! repository: append-only message history, budgeted trimming, session-id
//! minting and the retention sweep.

pub mod db;
pub mod migrations;
pub mod session_store;

pub use db::Database;
pub use session_store::{generate_session_id, SessionRepository};
