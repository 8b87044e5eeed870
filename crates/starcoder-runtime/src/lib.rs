//! # starcoder-runtime
//!
//! Request-level execution for starcoder.rs: the autoregressive decode driver,
//! the end-of-sequence stop policy, the shared [`Model`], the transport-agnostic
//! [`RequestService`], and generation telemetry (evaluation vs. sampling time).

pub mod driver;
pub mod model;
pub mod service;
pub mod stop;
pub mod telemetry;

pub use driver::{token_budget, DriverConfig, Generation, GenerationDriver, WARMUP_TOKENS};
pub use model::{Model, Session};
pub use service::{GenerationRequest, GenerationResponse, RequestService};
pub use stop::{StopPolicy, END_OF_TEXT};
pub use telemetry::{
    GenerationStats, GenerationTimer, NoopTelemetry, RecordingTelemetry, StopReason,
    TelemetryHook, TracingTelemetry,
};
