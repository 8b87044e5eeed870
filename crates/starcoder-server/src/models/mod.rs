//! JSON request/response types.

pub mod generate;
pub mod health;

pub use generate::{GenerateRequest, GenerateResponse};
pub use health::{HealthResponse, ModelInfo};
