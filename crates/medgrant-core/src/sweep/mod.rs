//! Expiration sweep for timed-out approvals.
//!
//! The sweep enforces time-bound validity independent of any user action:
//! an approval that was never answered, and an accepted approval whose
//! window has lapsed, are both transitioned to `TIMED_OUT` by a scheduled
//! scan. The sweep shares no in-memory state with the lifecycle service;
//! all coordination goes through the store's conditional updates, so it is
//! idempotent and safe to run concurrently with request traffic and with a
//! manually triggered run.
//!
//! # Passes
//!
//! - **Unaccepted timeouts**: rows with `is_request_accepted = false`
//!   outside the terminal set whose window has lapsed.
//! - **Accepted-and-expired**: rows with `is_request_accepted = true` not
//!   yet `COMPLETED` whose window has lapsed. These are revoked to
//!   `TIMED_OUT`, not marked completed.
//!
//! The passes are independent and order-insensitive: a sweep that fails
//! between them leaves nothing corrupted and is simply resumed by the next
//! tick. A malformed row is logged and skipped without aborting its batch.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::store::{ApprovalStore, StoreError, SweepCandidate};

/// Errors that can occur during a sweep run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SweepError {
    /// Storage layer failure; the run is retried on the next tick.
    #[error("sweep store error: {0}")]
    Store(#[from] StoreError),
}

/// Outcome of one sweep run, for operational visibility.
///
/// Running the sweep twice with no intervening writes yields an empty
/// second report: every transition is a conditional update on a pre-state
/// the first run already consumed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Ids transitioned by the unaccepted-timeouts pass.
    pub timed_out_unaccepted: Vec<String>,
    /// Ids transitioned by the accepted-and-expired pass.
    pub timed_out_accepted: Vec<String>,
}

impl SweepReport {
    /// Total number of approvals revoked by this run.
    #[must_use]
    pub fn revoked_count(&self) -> u64 {
        (self.timed_out_unaccepted.len() + self.timed_out_accepted.len()) as u64
    }

    /// All approval ids revoked by this run.
    #[must_use]
    pub fn revoked_approval_ids(&self) -> Vec<String> {
        self.timed_out_unaccepted
            .iter()
            .chain(self.timed_out_accepted.iter())
            .cloned()
            .collect()
    }

    /// Whether this run transitioned nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timed_out_unaccepted.is_empty() && self.timed_out_accepted.is_empty()
    }
}

/// Scan-and-transition executor for expired approvals.
///
/// The sweeper is a pure function of "now" and store contents; scheduling
/// lives with the caller, which passes the tick's timestamp in.
pub struct ExpirationSweeper {
    store: Arc<ApprovalStore>,
}

impl ExpirationSweeper {
    /// Creates a sweeper over the given store.
    #[must_use]
    pub fn new(store: Arc<ApprovalStore>) -> Self {
        Self { store }
    }

    /// Runs both sweep passes at the given instant.
    ///
    /// Each pass collects its expired candidates and applies one bulk
    /// conditional update over them; a row that left the pass's pre-state
    /// between scan and update is left alone, so the sweep never clobbers
    /// a concurrent accept or reject.
    ///
    /// # Errors
    ///
    /// Returns a [`SweepError`] if a scan or a batch update fails. No
    /// partial run corrupts invariants: the passes are independent, and a
    /// failed run is resumed by the next tick.
    pub fn run_once(&self, now_ms: u64) -> Result<SweepReport, SweepError> {
        let unaccepted = self.store.sweep_candidates_unaccepted()?;
        let expired = expired_ids(&unaccepted, now_ms);
        let timed_out_unaccepted = self.store.time_out_unaccepted(&expired, now_ms)?;

        let accepted = self.store.sweep_candidates_accepted()?;
        let expired = expired_ids(&accepted, now_ms);
        let timed_out_accepted = self.store.time_out_accepted(&expired, now_ms)?;

        let report = SweepReport {
            timed_out_unaccepted,
            timed_out_accepted,
        };

        if report.is_empty() {
            debug!(now_ms, "expiration sweep found nothing to transition");
        } else {
            info!(
                now_ms,
                unaccepted = report.timed_out_unaccepted.len(),
                accepted = report.timed_out_accepted.len(),
                "expiration sweep revoked timed-out approvals"
            );
        }

        Ok(report)
    }
}

/// Filters candidates down to the ids whose window lapsed before `now_ms`.
///
/// A row whose stored timestamp or duration cannot be interpreted is
/// logged and skipped; the rest of the batch proceeds.
fn expired_ids(candidates: &[SweepCandidate], now_ms: u64) -> Vec<String> {
    let mut expired = Vec::new();

    for candidate in candidates {
        let (Ok(created_at_ms), Ok(duration_ms)) = (
            u64::try_from(candidate.created_at_ms),
            u64::try_from(candidate.duration_ms),
        ) else {
            warn!(
                approval_id = %candidate.id,
                created_at_ms = candidate.created_at_ms,
                duration_ms = candidate.duration_ms,
                "skipping approval with malformed timing columns"
            );
            continue;
        };

        let Some(expires_at_ms) = created_at_ms.checked_add(duration_ms) else {
            warn!(
                approval_id = %candidate.id,
                created_at_ms,
                duration_ms,
                "skipping approval whose expiry overflows"
            );
            continue;
        };

        if now_ms > expires_at_ms {
            expired.push(candidate.id.clone());
        }
    }

    expired
}
