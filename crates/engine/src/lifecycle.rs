//! Request status state machine.
//!
//! ```text
//!   SaveDraft                Aggregated                Approve
//!   ┌──────┐   ┌────────────────────────────┐   ┌─────────────────┐
//!   ▼      │   │                            ▼   │                 ▼
//!  draft ──┴───┘                       calculated ◄──────────── approved
//!                                       ▲      │     Unapprove
//!                                       └──────┘
//!                                      Aggregated
//! ```
//!
//! There is no terminal state: `approved` can always be reverted. A rejected
//! transition leaves the status untouched and is reported to the caller.

use nmck_core::config::InsufficientDataPolicy;
use nmck_core::{Error, RequestStatus, Result};
use std::fmt;

/// Events that move a request between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// A draft was saved; status does not change.
    SaveDraft,
    /// An aggregation run produced a result.
    Aggregated,
    /// The user accepted the result as final.
    Approve,
    /// The user withdrew approval; the result is kept as-is.
    Unapprove,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Trigger::SaveDraft => "save_draft",
            Trigger::Aggregated => "aggregated",
            Trigger::Approve => "approve",
            Trigger::Unapprove => "unapprove",
        };
        f.write_str(name)
    }
}

/// Status reached by applying `trigger` in `current`.
pub fn next_status(current: RequestStatus, trigger: Trigger) -> Result<RequestStatus> {
    use RequestStatus::*;

    match (current, trigger) {
        (Draft, Trigger::SaveDraft) => Ok(Draft),
        (Draft | Calculated, Trigger::Aggregated) => Ok(Calculated),
        (Calculated, Trigger::Approve) => Ok(Approved),
        (Approved, Trigger::Unapprove) => Ok(Calculated),
        (from, Trigger::SaveDraft) => Err(Error::transition_rejected(from, Draft)),
        (from, Trigger::Aggregated) => Err(Error::transition_rejected(from, Calculated)),
        (from, Trigger::Approve) => Err(Error::transition_rejected(from, Approved)),
        (from, Trigger::Unapprove) => Err(Error::transition_rejected(from, Calculated)),
    }
}

/// Trigger behind an explicit status change, or `None` for a no-op.
///
/// `draft -> calculated` is only reachable by aggregating, so it is rejected
/// here.
pub fn trigger_for_target(current: RequestStatus, target: RequestStatus) -> Result<Option<Trigger>> {
    use RequestStatus::*;

    match (current, target) {
        (Draft, Draft) => Ok(Some(Trigger::SaveDraft)),
        (Calculated, Calculated) => Ok(None),
        (Calculated, Approved) => Ok(Some(Trigger::Approve)),
        (Approved, Calculated) => Ok(Some(Trigger::Unapprove)),
        (from, to) => Err(Error::transition_rejected(from, to)),
    }
}

/// Status after an aggregation run that found no admitted prices.
pub fn status_without_result(current: RequestStatus, policy: InsufficientDataPolicy) -> RequestStatus {
    match (current, policy) {
        (RequestStatus::Draft, InsufficientDataPolicy::MarkCalculated) => RequestStatus::Calculated,
        (status, _) => status,
    }
}
