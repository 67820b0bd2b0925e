//! Pricing service: the operations callers trigger.
//!
//! Wraps the aggregation orchestrator with the request lifecycle: creating a
//! request and pricing it, recalculating, approving and unapproving.

use nmck_core::{
    AggregatedResult, AnalogWithPrices, Characteristic, Config, Error, PriceId, Request,
    RequestDraft, RequestId, RequestStatus, Result, Source,
};
use nmck_stats::{assess, breakdown, distinct_sources, Advisory, SourceSummary};
use nmck_store::Store;
use serde::Serialize;
use tracing::{info, warn};

use crate::lifecycle::{next_status, status_without_result, trigger_for_target, Trigger};
use crate::matcher::{AnalogMatcher, MockMatcher};
use crate::orchestrator::Aggregator;

/// Outcome of creating and pricing a request.
#[derive(Debug, Clone, Serialize)]
pub struct CreateOutcome {
    pub request_id: RequestId,
    pub status: RequestStatus,
    /// `None` when no admitted prices were found.
    pub result: Option<AggregatedResult>,
}

/// Everything shown for a single request.
#[derive(Debug, Clone, Serialize)]
pub struct RequestDetail {
    pub request: Request,
    pub characteristics: Vec<Characteristic>,
    pub analogs: Vec<AnalogWithPrices>,
    pub result: Option<AggregatedResult>,
    pub by_source: Vec<SourceSummary>,
    pub advisories: Vec<Advisory>,
}

/// Request lifecycle plus aggregation over a store and a matcher.
pub struct NmckService<S, M = MockMatcher> {
    store: S,
    matcher: M,
    aggregator: Aggregator,
    config: Config,
}

impl<S: Store, M: AnalogMatcher> NmckService<S, M> {
    /// Create a service.
    pub fn new(store: S, matcher: M, config: Config) -> Self {
        let aggregator = Aggregator::new(&config.aggregation);
        Self {
            store,
            matcher,
            aggregator,
            config,
        }
    }

    /// Underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Configuration the service was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Create a draft, or overwrite an existing one. Status stays `draft`.
    pub fn save_draft(&self, draft: &RequestDraft, existing: Option<RequestId>) -> Result<Request> {
        let request = match existing {
            Some(id) => {
                let current = self.store.request(id)?;
                next_status(current.status, Trigger::SaveDraft)?;
                self.store.reset_draft(id, draft)?
            }
            None => self.store.insert_request(draft)?,
        };
        info!(request_id = %request.id, "saved draft");
        Ok(request)
    }

    /// Create (or reuse a draft), match analogs, aggregate and move the
    /// request out of `draft`.
    ///
    /// With no admitted prices the outcome carries no result and the status
    /// follows the configured insufficient-data policy.
    pub fn create_and_aggregate(&self, draft: &RequestDraft, existing_draft: Option<RequestId>) -> Result<CreateOutcome> {
        let request = self.save_draft(draft, existing_draft)?;
        let characteristics = self.store.characteristics(request.id)?;
        let sources = self.sources_for(&request)?;

        let matched = self
            .matcher
            .match_analogs(&request, &characteristics, &sources)?;
        let stored = self.store.insert_analogs(request.id, &matched)?;
        info!(
            request_id = %request.id,
            analogs = stored.len(),
            sources = sources.len(),
            "matched analogs"
        );

        let (status, result) = self.aggregate_and_advance(&request)?;
        Ok(CreateOutcome {
            request_id: request.id,
            status,
            result,
        })
    }

    /// Re-run aggregation over the current prices.
    ///
    /// Rejected for approved requests, including one approved while the
    /// aggregation was waiting for the write lock. With no admitted prices the previous
    /// result stays and `InsufficientData` is returned.
    pub fn recalculate(&self, id: RequestId) -> Result<AggregatedResult> {
        let request = self.store.request(id)?;
        match self.aggregate_and_advance(&request)? {
            (_, Some(result)) => Ok(result),
            (_, None) => Err(Error::insufficient_data(format!(
                "request {id} has no admitted prices"
            ))),
        }
    }

    /// Apply an explicit status change.
    pub fn set_status(&self, id: RequestId, target: RequestStatus) -> Result<Request> {
        let request = self.store.request(id)?;
        let Some(trigger) = trigger_for_target(request.status, target)? else {
            return Ok(request);
        };
        let next = next_status(request.status, trigger)?;
        if next != request.status {
            self.store.update_status(id, request.status, next)?;
            info!(request_id = %id, from = %request.status, to = %next, %trigger, "status changed");
        }
        self.store.request(id)
    }

    /// Accept the current result as final.
    pub fn approve(&self, id: RequestId) -> Result<Request> {
        self.set_status(id, RequestStatus::Approved)
    }

    /// Withdraw approval; the result is kept.
    pub fn unapprove(&self, id: RequestId) -> Result<Request> {
        self.set_status(id, RequestStatus::Calculated)
    }

    /// Flag or unflag a price. Takes effect on the next recalculation.
    pub fn set_price_excluded(&self, price_id: PriceId, excluded: bool) -> Result<()> {
        self.store.set_price_excluded(price_id, excluded)
    }

    /// Requests, newest first, optionally narrowed to one status.
    pub fn list_requests(&self, status: Option<RequestStatus>) -> Result<Vec<Request>> {
        self.store.list_requests(status)
    }

    /// Delete a request with its analogs, prices and result.
    pub fn delete_request(&self, id: RequestId) -> Result<()> {
        self.store.delete_request(id)
    }

    /// Request with its analogs, stored result, breakdown and advisories.
    ///
    /// `result` is the snapshot from the last aggregation, while `by_source`
    /// and the advisories' source count reflect the currently admitted
    /// prices. They differ after a price is excluded or re-admitted until the
    /// next recalculation.
    pub fn request_detail(&self, id: RequestId) -> Result<RequestDetail> {
        let request = self.store.request(id)?;
        let characteristics = self.store.characteristics(id)?;
        let analogs = self.store.analogs(id)?;
        let result = self.store.aggregated_result(id)?;
        let admitted = self.store.admitted_prices(id)?;

        let advisories = result
            .as_ref()
            .map(|r| assess(r, distinct_sources(&admitted), &self.config.advisory))
            .unwrap_or_default();

        Ok(RequestDetail {
            request,
            characteristics,
            analogs,
            result,
            by_source: breakdown(&admitted),
            advisories,
        })
    }

    /// Active sources, narrowed to the request's selection when it has one.
    fn sources_for(&self, request: &Request) -> Result<Vec<Source>> {
        let active = self.store.active_sources()?;
        if request.source_ids.is_empty() {
            return Ok(active);
        }
        Ok(active
            .into_iter()
            .filter(|s| request.source_ids.contains(&s.id))
            .collect())
    }

    fn aggregate_and_advance(&self, request: &Request) -> Result<(RequestStatus, Option<AggregatedResult>)> {
        match self.aggregator.aggregate(&self.store, request.id) {
            Ok(replaced) => {
                if replaced.status != replaced.from {
                    info!(request_id = %request.id, from = %replaced.from, to = %replaced.status, "status changed");
                }
                Ok((replaced.status, Some(replaced.result)))
            }
            Err(err) if err.is_insufficient_data() => {
                let next = status_without_result(request.status, self.config.lifecycle.insufficient_data);
                self.advance(request, next)?;
                warn!(request_id = %request.id, status = %next, "no admitted prices; result not written");
                Ok((next, None))
            }
            Err(err) => Err(err),
        }
    }

    fn advance(&self, request: &Request, next: RequestStatus) -> Result<()> {
        if next != request.status {
            self.store.update_status(request.id, request.status, next)?;
            info!(request_id = %request.id, from = %request.status, to = %next, "status changed");
        }
        Ok(())
    }
}
