//! # starcoder-server
//!
//! HTTP surface for starcoder.rs: `POST /v1/<family>/generate` runs one
//! generation through the shared [`RequestService`](starcoder_runtime::RequestService)
//! and answers `{"text": ...}`; failures come back as plain-text 400s.
//! `GET /health` reports the loaded model's shape.

pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod server;
pub mod state;

pub use config::ServerArgs;
pub use error::ServerError;
pub use server::{create_router, run_server};
pub use state::{AppState, ServerConfig};
