//! Parametric crop-insurance monitoring and lifecycle engine
//!
//! This crate provides the core of the Agrisa platform:
//! - Ingests satellite and weather measurements over farm boundaries
//! - Evaluates boolean trigger expressions against the timeseries
//! - Synthesizes payout claims with caps and duplicate suppression
//! - Drives policies through enrollment, payment, monitoring, cancel,
//!   dispute, renewal and archival
//! - Reacts to cache key expirations for lifecycle choreography

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod cache;
pub mod cancel_flow;
pub mod claims;
pub mod documents;
pub mod domain;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod expiration;
pub mod fetch;
pub mod lifecycle;
pub mod notify;
pub mod providers;
pub mod registry;
pub mod renewal;
pub mod risk;
pub mod scheduler;
pub mod store;
pub mod workers;

pub use engine::{Engine, EngineOptions};
pub use error::{EngineError, EngineResult};
pub use evaluator::{EvaluationOutcome, TriggerEvaluator, TriggeredCondition};
pub use fetch::{FetchConfig, FetchPipeline, FetchReport, FetchRequest};
pub use lifecycle::{PolicyLifecycle, Registration};
pub use scheduler::{JobEnvelope, JobPayload, JobRunner, PolicyScheduler};
pub use store::{MemoryStore, SledStore, Stores};
pub use workers::WorkerManager;
