// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod config;
pub mod domain;
pub mod engine;
pub mod history;
pub mod metrics;
pub mod telemetry;

// Core ranking pipeline
pub mod comparator;
pub mod corpus;
pub mod labels;
pub mod rules;
pub mod scoring;
pub mod text;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::config::EngineConfig;
pub use crate::domain::{CandidateResult, Level, ResultStatus, ShortlistRequest};
pub use crate::engine::{ShortlistEngine, ShortlistOutcome};
