//! Storage boundary for the NMCK pricing system.
//!
//! This crate provides:
//! - Repository traits for requests, sources, analogs/prices and results
//! - A SQLite implementation with a transactional result replace
//!
//! Callers depend on the traits; [`SqliteStore`] implements all of them.

pub mod schema;
pub mod sqlite;

use nmck_core::{
    AggregatedResult, AnalogWithPrices, Characteristic, MatchedAnalog, PriceId, PriceObservation,
    Request, RequestDraft, RequestId, RequestStatus, Result, Source, SourceId,
};

pub use sqlite::SqliteStore;

/// Price-collection channels.
pub trait SourceRepository {
    /// Insert a source or update the one with the same name.
    fn upsert_source(&self, name: &str, kind: &str, is_active: bool) -> Result<Source>;

    /// Toggle whether a source is used for new price collection.
    fn set_source_active(&self, id: SourceId, is_active: bool) -> Result<()>;

    /// Sources currently marked active, ordered by id.
    fn active_sources(&self) -> Result<Vec<Source>>;
}

/// Requests and their characteristics.
pub trait RequestRepository {
    /// Store a new request in `draft` status.
    fn insert_request(&self, draft: &RequestDraft) -> Result<Request>;

    /// Overwrite a draft's fields and characteristics and drop its analogs,
    /// prices and result. Rejected if the request is no longer a draft.
    fn reset_draft(&self, id: RequestId, draft: &RequestDraft) -> Result<Request>;

    /// Fetch one request; `NotFound` if it does not exist.
    fn request(&self, id: RequestId) -> Result<Request>;

    /// Requests, newest first, optionally filtered by status.
    fn list_requests(&self, status: Option<RequestStatus>) -> Result<Vec<Request>>;

    fn characteristics(&self, id: RequestId) -> Result<Vec<Characteristic>>;

    /// Compare-and-set the status. `ConcurrentWrite` if the stored status is
    /// no longer `expected`.
    fn update_status(&self, id: RequestId, expected: RequestStatus, next: RequestStatus) -> Result<()>;

    /// Delete a request and everything it owns.
    fn delete_request(&self, id: RequestId) -> Result<()>;
}

/// Analogs and their observed prices.
pub trait PriceStore {
    /// Store matched analogs with their prices under a request.
    fn insert_analogs(&self, request_id: RequestId, analogs: &[MatchedAnalog]) -> Result<Vec<AnalogWithPrices>>;

    /// All analogs of a request with all of their prices (excluded included).
    fn analogs(&self, request_id: RequestId) -> Result<Vec<AnalogWithPrices>>;

    /// Non-excluded prices of a request's analogs.
    fn admitted_prices(&self, request_id: RequestId) -> Result<Vec<PriceObservation>>;

    /// Set or clear a price's exclusion flag.
    fn set_price_excluded(&self, price_id: PriceId, excluded: bool) -> Result<()>;
}

/// A result written by [`ResultStore::replace_result_with`].
#[derive(Debug, Clone, PartialEq)]
pub struct Replaced {
    pub result: AggregatedResult,
    /// Status the request had when the write transaction started.
    pub from: RequestStatus,
    /// Status the request was left in.
    pub status: RequestStatus,
}

/// The one-per-request aggregated result.
pub trait ResultStore {
    fn aggregated_result(&self, request_id: RequestId) -> Result<Option<AggregatedResult>>;

    /// Replace the request's only result within one write transaction.
    ///
    /// The current status is read inside the transaction and passed to
    /// `advance`, which returns the status to leave the request in or
    /// rejects the write. The admitted prices are then handed to `compute`
    /// and its output stored together with the status change.
    ///
    /// If `advance` or `compute` fails nothing is written: the previous
    /// result and status stay.
    fn replace_result_with<A, F>(&self, request_id: RequestId, advance: A, compute: F) -> Result<Replaced>
    where
        A: FnOnce(RequestStatus) -> Result<RequestStatus>,
        F: FnOnce(&[PriceObservation]) -> Result<AggregatedResult>;
}

/// Everything the pricing service needs from storage.
pub trait Store: SourceRepository + RequestRepository + PriceStore + ResultStore {}

impl<T> Store for T where T: SourceRepository + RequestRepository + PriceStore + ResultStore {}
