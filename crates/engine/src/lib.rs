//! Request lifecycle and aggregation for the NMCK pricing system.
//!
//! This crate provides:
//! - The request status state machine
//! - The aggregation orchestrator (fetch, filter, compute, replace)
//! - The analog-matching seam with a deterministic mock matcher
//! - [`NmckService`], the operations callers trigger

pub mod lifecycle;
pub mod orchestrator;
pub mod matcher;
pub mod service;

pub use lifecycle::Trigger;
pub use matcher::{AnalogMatcher, MockMatcher};
pub use orchestrator::Aggregator;
pub use service::{CreateOutcome, NmckService, RequestDetail};
