//! Core types and configuration for the NMCK pricing system.
//!
//! This crate provides shared types used across all other crates:
//! - Procurement requests, analogs, prices and sources
//! - The aggregated result record
//! - Configuration structures
//! - Common error types

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;
