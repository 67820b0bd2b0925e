//! Aggregation orchestrator.
//!
//! Reads the admitted prices of one request, validates them, runs the
//! statistics engine and replaces the stored result. The `Aggregated`
//! transition is checked and applied in the same write.

use nmck_core::config::AggregationConfig;
use nmck_core::{AggregatedResult, Error, PriceObservation, RequestId, Result};
use nmck_stats::StatisticsEngine;
use nmck_store::{Replaced, ResultStore};

use crate::lifecycle::{next_status, Trigger};
use tracing::{debug, warn};

/// Check the observations of one request before they reach the engine.
pub fn validate_observations(observations: &[PriceObservation]) -> Result<()> {
    let Some(first) = observations.first() else {
        return Ok(());
    };
    for obs in observations {
        if !(obs.amount.is_finite() && obs.amount >= 0.0) {
            return Err(Error::data(format!(
                "price {} has invalid amount {}",
                obs.price_id, obs.amount
            )));
        }
        if obs.currency != first.currency {
            return Err(Error::data(format!(
                "price {} is in {}, expected {}",
                obs.price_id, obs.currency, first.currency
            )));
        }
    }
    Ok(())
}

/// Runs aggregation against a result store.
pub struct Aggregator {
    engine: StatisticsEngine,
    write_retries: u32,
}

impl Aggregator {
    /// Create an aggregator from configuration.
    pub fn new(config: &AggregationConfig) -> Self {
        Self {
            engine: StatisticsEngine::new(config),
            write_retries: config.write_retries,
        }
    }

    /// Compute a result from already-fetched observations.
    pub fn compute(&self, request_id: RequestId, observations: &[PriceObservation]) -> Result<AggregatedResult> {
        if observations.is_empty() {
            return Err(Error::insufficient_data(format!(
                "request {request_id} has no admitted prices"
            )));
        }
        validate_observations(observations)?;

        let amounts: Vec<f64> = observations.iter().map(|o| o.amount).collect();
        let summary = self.engine.compute(&amounts)?;
        Ok(summary.into_result(request_id))
    }

    /// Aggregate a request, replace its stored result and move it to
    /// `calculated`.
    ///
    /// The status is checked inside the write, so an approved request is
    /// rejected even if it was approved after the caller last looked.
    /// `InsufficientData` leaves any previous result and status in place.
    /// Store lock contention is retried up to the configured number of
    /// times; the replace is idempotent, so a retry cannot double-apply.
    pub fn aggregate<S: ResultStore>(&self, store: &S, request_id: RequestId) -> Result<Replaced> {
        let mut attempt = 0;
        loop {
            let advance = |from| next_status(from, Trigger::Aggregated);
            match store.replace_result_with(request_id, advance, |obs| self.compute(request_id, obs)) {
                Err(Error::ConcurrentWrite(msg)) if attempt < self.write_retries => {
                    attempt += 1;
                    warn!(request_id = %request_id, attempt, %msg, "aggregation write contended, retrying");
                }
                Err(err) if err.is_insufficient_data() => {
                    warn!(request_id = %request_id, "aggregation skipped: {err}");
                    return Err(err);
                }
                Ok(replaced) => {
                    debug!(request_id = %request_id, attempts = attempt + 1, "aggregation finished");
                    return Ok(replaced);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(&AggregationConfig::default())
    }
}
