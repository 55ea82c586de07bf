//! Scheduled expiration sweeping.
//!
//! The sweeper is a background, timer-driven task independent of request
//! traffic: it may overlap any number of concurrent lifecycle operations,
//! and all coordination goes through the store's conditional updates. A
//! tick that fails is logged and retried on the next tick; the sweep
//! passes are independent, so partial execution is safe to resume.
//!
//! After the store transitions commit, newly timed-out *accepted*
//! approvals get a best-effort on-chain revoke so chain access does not
//! outlive the off-chain record. Revoke failures are logged and not
//! retried here; the store remains the system of record, and outstanding
//! revokes can be re-derived from timed-out rows that carry a grant tx.

use std::sync::Arc;
use std::time::Duration;

use medgrant_core::clock::Clock;
use medgrant_core::ledger::LedgerBridge;
use medgrant_core::store::ApprovalStore;
use medgrant_core::sweep::{ExpirationSweeper, SweepError, SweepReport};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::state::SharedState;

/// Runs one sweep and dispatches revokes for the accepted rows it revoked.
///
/// This is the single sweep path: the scheduled task and the manual
/// trigger both call it, so their semantics are identical. Pass `None`
/// for the ledger when no bridge is wired; the store transitions still
/// apply.
///
/// # Errors
///
/// Returns a [`SweepError`] if a scan or batch update fails. Revoke
/// dispatch failures do not fail the sweep.
pub async fn sweep_and_revoke(
    sweeper: &ExpirationSweeper,
    store: &ApprovalStore,
    ledger: Option<&dyn LedgerBridge>,
    timeout_ms: u64,
    now_ms: u64,
) -> Result<SweepReport, SweepError> {
    let report = sweeper.run_once(now_ms)?;

    if let Some(ledger) = ledger {
        for approval_id in &report.timed_out_accepted {
            dispatch_revoke(store, ledger, approval_id, timeout_ms).await;
        }
    } else if !report.timed_out_accepted.is_empty() {
        debug!(
            count = report.timed_out_accepted.len(),
            "no ledger bridge wired; on-chain revokes left to the embedding service"
        );
    }

    Ok(report)
}

async fn dispatch_revoke(
    store: &ApprovalStore,
    ledger: &dyn LedgerBridge,
    approval_id: &str,
    timeout_ms: u64,
) {
    let approval = match store.get(approval_id) {
        Ok(Some(approval)) => approval,
        Ok(None) => {
            warn!(approval_id = %approval_id, "revoked approval disappeared before revoke dispatch");
            return;
        },
        Err(e) => {
            warn!(approval_id = %approval_id, error = %e, "failed to load approval for revoke dispatch");
            return;
        },
    };

    let dispatch = tokio::time::timeout(
        Duration::from_millis(timeout_ms),
        ledger.dispatch_revoke(
            &approval.practitioner_address,
            &approval.patient_id,
            approval.record_id,
        ),
    )
    .await;

    match dispatch {
        Ok(Ok(receipt)) => {
            debug!(
                approval_id = %approval_id,
                tx_hash = %receipt.tx_hash,
                "dispatched on-chain revoke for timed-out approval"
            );
        },
        Ok(Err(e)) => {
            warn!(
                approval_id = %approval_id,
                error = %e,
                "on-chain revoke dispatch failed"
            );
        },
        Err(_) => {
            warn!(
                approval_id = %approval_id,
                timeout_ms,
                "on-chain revoke dispatch timed out"
            );
        },
    }
}

/// Spawns the scheduled sweeper task.
///
/// Ticks at `interval`, checks the shutdown flag, and runs the shared
/// sweep-and-revoke path with the injected clock's "now".
pub fn spawn_sweeper(
    state: SharedState,
    store: Arc<ApprovalStore>,
    ledger: Option<Arc<dyn LedgerBridge>>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    timeout_ms: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let sweeper = ExpirationSweeper::new(Arc::clone(&store));
        let mut ticker = tokio::time::interval(interval);
        info!(interval_secs = interval.as_secs(), "expiration sweeper started");

        loop {
            ticker.tick().await;

            if state.is_shutdown_requested() {
                info!("expiration sweeper shutting down");
                break;
            }

            let now_ms = clock.now_ms();
            let result = sweep_and_revoke(
                &sweeper,
                &store,
                ledger.as_deref(),
                timeout_ms,
                now_ms,
            )
            .await;

            match result {
                Ok(report) if report.is_empty() => {},
                Ok(report) => {
                    info!(
                        revoked_count = report.revoked_count(),
                        "scheduled sweep revoked timed-out approvals"
                    );
                },
                Err(e) => {
                    // Retried on the next tick; the passes are independent
                    // and resume safely.
                    warn!(error = %e, "scheduled sweep failed");
                },
            }
        }
    })
}
