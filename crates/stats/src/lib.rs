//! Price statistics for the NMCK pricing system.
//!
//! This crate handles:
//! - Nearest-rank percentiles and the median rule
//! - The P10-P90 outlier window
//! - The aggregated price summary (extrema, mean, spreads, recommendation)
//! - Per-source breakdown of admitted prices
//! - Quality advisories on a finished result
//!
//! Everything here is pure computation; nothing touches storage.

pub mod percentile;
pub mod outlier;
pub mod summary;
pub mod breakdown;
pub mod advisory;

pub use advisory::{assess, Advisory};
pub use breakdown::{breakdown, distinct_sources, SourceSummary};
pub use outlier::{OutlierFilter, Partition, PercentileWindow};
pub use summary::{PriceSummary, StatisticsEngine};
