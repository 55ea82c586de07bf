//! Approval lifecycle orchestration.
//!
//! One logical operation per inbound call, no internal parallelism: the
//! service validates, consults the practitioner directory, coordinates the
//! store and the on-chain ledger, and surfaces the engine's typed errors.
//! The transport layer owns mapping those errors to status codes.
//!
//! # Create ordering
//!
//! `create_approval` is insert-then-dispatch-then-confirm. The store insert
//! and the ledger dispatch hit two systems with no shared transaction; if
//! the dispatch fails or times out after the row is inserted, the row is
//! terminalized before the error returns. An approval that looks active
//! but confers no on-chain access must never be left behind.

use std::sync::Arc;
use std::time::Duration;

use medgrant_core::approval::validator::{self, CreateApprovalRequest};
use medgrant_core::approval::{Approval, ApprovalError, ApprovalStatus, ConflictGuard};
use medgrant_core::clock::Clock;
use medgrant_core::config::EngineConfig;
use medgrant_core::directory::{PractitionerDirectory, PractitionerRecord};
use medgrant_core::ledger::LedgerBridge;
use medgrant_core::store::{ApprovalStore, StoreError};
use medgrant_core::sweep::{ExpirationSweeper, SweepError, SweepReport};
use tokio::time::timeout;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::sweeper;

/// The approval lifecycle service.
///
/// Holds the store, the conflict guard, and the two external
/// collaborators. Every collaborator call carries the configured timeout;
/// the state machine never advances on an unconfirmed precondition.
pub struct ApprovalLifecycleService {
    store: Arc<ApprovalStore>,
    conflict: ConflictGuard,
    directory: Arc<dyn PractitionerDirectory>,
    ledger: Arc<dyn LedgerBridge>,
    sweeper: ExpirationSweeper,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl ApprovalLifecycleService {
    /// Creates a new lifecycle service.
    #[must_use]
    pub fn new(
        store: Arc<ApprovalStore>,
        directory: Arc<dyn PractitionerDirectory>,
        ledger: Arc<dyn LedgerBridge>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            conflict: ConflictGuard::new(Arc::clone(&store)),
            sweeper: ExpirationSweeper::new(Arc::clone(&store)),
            store,
            directory,
            ledger,
            clock,
            config,
        }
    }

    /// Creates a new approval and dispatches its on-chain grant.
    ///
    /// Flow: validate the request shape, confirm practitioner eligibility
    /// (resolving the ledger address), check for an active conflict,
    /// insert at `CREATED`, dispatch the grant, then record the
    /// transaction hash. A dispatch failure terminalizes the inserted row
    /// before the error is returned.
    ///
    /// # Errors
    ///
    /// `RecordIdRequired` / `InvalidDuration` for a malformed request,
    /// `NotAValidPractitioner` when the directory cannot confirm
    /// eligibility, `ApprovalAlreadyExists` when the tuple already holds a
    /// non-terminal approval, and `LedgerDispatchFailed` when the on-chain
    /// dispatch fails after compensation.
    pub async fn create_approval(
        &self,
        request: CreateApprovalRequest,
    ) -> Result<Approval, ApprovalError> {
        let validated = validator::validate(&request, self.config.default_duration_ms)?;
        let practitioner = self.resolve_practitioner(&request.practitioner_id).await?;

        if self.conflict.has_active_approval(
            &request.patient_id,
            &practitioner.ledger_address,
            validated.record_id,
        )? {
            return Err(ApprovalError::ApprovalAlreadyExists {
                patient_id: request.patient_id,
                practitioner_address: practitioner.ledger_address,
                record_id: validated.record_id,
            });
        }

        let now_ms = self.clock.now_ms();
        let approval = Approval::new(
            Uuid::new_v4().to_string(),
            request.patient_id,
            practitioner.ledger_address,
            validated.record_id,
            request.access_level,
            validated.duration_ms,
            now_ms,
        );

        // The insert is the authoritative conflict check: two concurrent
        // creates both pass the guard above, the unique index lets exactly
        // one of them through.
        match self.store.insert(&approval) {
            Ok(()) => {},
            Err(StoreError::ActiveGrantExists {
                patient_id,
                practitioner_address,
                record_id,
            }) => {
                return Err(ApprovalError::ApprovalAlreadyExists {
                    patient_id,
                    practitioner_address,
                    record_id,
                });
            },
            Err(e) => return Err(e.into()),
        }

        let dispatch = timeout(
            self.collaborator_timeout(),
            self.ledger.dispatch_grant(
                &approval.practitioner_address,
                &approval.patient_id,
                approval.record_id,
                approval.duration_ms,
            ),
        )
        .await;

        let receipt = match dispatch {
            Ok(Ok(receipt)) => receipt,
            Ok(Err(e)) => return Err(self.compensate_failed_dispatch(&approval, e.to_string())),
            Err(_) => {
                return Err(self.compensate_failed_dispatch(
                    &approval,
                    "ledger grant dispatch timed out".to_string(),
                ));
            },
        };

        let confirmed_at_ms = self.clock.now_ms();
        if !self
            .store
            .record_grant_tx(&approval.id, &receipt.tx_hash, confirmed_at_ms)?
        {
            // The row left CREATED between dispatch and confirm (e.g. an
            // aggressive sweep on a very short duration). The grant stands
            // on-chain; the next revoke reconciliation covers it.
            warn!(
                approval_id = %approval.id,
                tx_hash = %receipt.tx_hash,
                "approval left CREATED before its grant tx was recorded"
            );
        }

        info!(
            approval_id = %approval.id,
            patient_id = %approval.patient_id,
            practitioner_address = %approval.practitioner_address,
            access_level = approval.access_level.as_str(),
            tx_hash = %receipt.tx_hash,
            "approval created and grant dispatched"
        );

        match self.store.get(&approval.id)? {
            Some(stored) => Ok(stored),
            None => Ok(approval),
        }
    }

    /// Accepts a pending approval on behalf of its practitioner.
    ///
    /// The transition is refused when the approval has logically expired,
    /// even if the sweep has not yet written the terminal status.
    ///
    /// # Errors
    ///
    /// `NotAValidPractitioner` when the caller cannot be resolved,
    /// `ApprovalNotFound` when no approval with this id exists for the
    /// caller, `ApprovalNotPending` when it is no longer awaiting a
    /// response or has expired.
    pub async fn accept_approval(
        &self,
        approval_id: &str,
        practitioner_id: &str,
    ) -> Result<Approval, ApprovalError> {
        self.respond(approval_id, practitioner_id, Response::Accept)
            .await
    }

    /// Rejects a pending approval on behalf of its practitioner.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Self::accept_approval`].
    pub async fn reject_approval(
        &self,
        approval_id: &str,
        practitioner_id: &str,
    ) -> Result<Approval, ApprovalError> {
        self.respond(approval_id, practitioner_id, Response::Reject)
            .await
    }

    /// Lists a patient's approvals, newest first, optionally filtered by
    /// status. `page` is 1-based; `limit` is clamped to the configured
    /// page cap.
    ///
    /// # Errors
    ///
    /// Returns a store error if the query fails.
    pub fn list_approvals_for_patient(
        &self,
        patient_id: &str,
        status: Option<ApprovalStatus>,
        page: u64,
        limit: u64,
    ) -> Result<Vec<Approval>, ApprovalError> {
        let (limit, offset) = self.page_window(page, limit);
        Ok(self
            .store
            .list_for_patient(patient_id, status, limit, offset)?)
    }

    /// Lists a practitioner's approvals by application id, newest first.
    ///
    /// # Errors
    ///
    /// `NotAValidPractitioner` when the caller cannot be resolved, or a
    /// store error if the query fails.
    pub async fn list_approvals_for_practitioner(
        &self,
        practitioner_id: &str,
        status: Option<ApprovalStatus>,
        page: u64,
        limit: u64,
    ) -> Result<Vec<Approval>, ApprovalError> {
        let practitioner = self.resolve_practitioner(practitioner_id).await?;
        let (limit, offset) = self.page_window(page, limit);
        Ok(self.store.list_for_practitioner(
            &practitioner.ledger_address,
            status,
            limit,
            offset,
        )?)
    }

    /// Runs the expiration sweep immediately, with the same semantics as
    /// the scheduled run.
    ///
    /// # Errors
    ///
    /// Returns a [`SweepError`] if a scan or batch update fails.
    pub async fn run_sweep_now(&self) -> Result<SweepReport, SweepError> {
        sweeper::sweep_and_revoke(
            &self.sweeper,
            &self.store,
            Some(self.ledger.as_ref()),
            self.config.collaborator_timeout_ms,
            self.clock.now_ms(),
        )
        .await
    }

    async fn respond(
        &self,
        approval_id: &str,
        practitioner_id: &str,
        response: Response,
    ) -> Result<Approval, ApprovalError> {
        let practitioner = self.resolve_practitioner(practitioner_id).await?;

        let approval =
            self.store
                .get(approval_id)?
                .ok_or_else(|| ApprovalError::ApprovalNotFound {
                    approval_id: approval_id.to_string(),
                })?;

        if approval.practitioner_address != practitioner.ledger_address {
            // Not this practitioner's approval; do not leak its existence.
            return Err(ApprovalError::ApprovalNotFound {
                approval_id: approval_id.to_string(),
            });
        }

        let now_ms = self.clock.now_ms();
        if approval.is_expired_at(now_ms) {
            // Logically expired even if the sweep has not run yet.
            return Err(ApprovalError::ApprovalNotPending {
                approval_id: approval_id.to_string(),
                status: "EXPIRED".to_string(),
            });
        }
        if approval.status != ApprovalStatus::Created {
            return Err(ApprovalError::ApprovalNotPending {
                approval_id: approval_id.to_string(),
                status: approval.status.as_str().to_string(),
            });
        }

        let changed = match response {
            Response::Accept => {
                self.store
                    .accept(approval_id, &practitioner.ledger_address, now_ms)?
            },
            Response::Reject => {
                self.store
                    .reject(approval_id, &practitioner.ledger_address, now_ms)?
            },
        };

        if !changed {
            // Lost the race against a concurrent response or the sweep;
            // the conditional update guarantees exactly one writer won.
            return Err(match self.store.get(approval_id)? {
                None => ApprovalError::ApprovalNotFound {
                    approval_id: approval_id.to_string(),
                },
                Some(current) => ApprovalError::ApprovalNotPending {
                    approval_id: approval_id.to_string(),
                    status: current.status.as_str().to_string(),
                },
            });
        }

        info!(
            approval_id = %approval_id,
            practitioner_address = %practitioner.ledger_address,
            response = response.as_str(),
            "approval response recorded"
        );

        self.store
            .get(approval_id)?
            .ok_or_else(|| ApprovalError::ApprovalNotFound {
                approval_id: approval_id.to_string(),
            })
    }

    /// Resolves and checks a practitioner with the directory.
    ///
    /// A negative answer, a directory error, and a timeout are all the
    /// same failure: the practitioner is not valid.
    async fn resolve_practitioner(
        &self,
        practitioner_id: &str,
    ) -> Result<PractitionerRecord, ApprovalError> {
        let lookup = timeout(
            self.collaborator_timeout(),
            self.directory
                .eligible_practitioner(practitioner_id, &self.config.required_role),
        )
        .await;

        match lookup {
            Ok(Ok(Some(record))) => Ok(record),
            Ok(Ok(None)) => Err(ApprovalError::NotAValidPractitioner {
                practitioner_id: practitioner_id.to_string(),
            }),
            Ok(Err(e)) => {
                warn!(
                    practitioner_id = %practitioner_id,
                    error = %e,
                    "practitioner directory lookup failed"
                );
                Err(ApprovalError::NotAValidPractitioner {
                    practitioner_id: practitioner_id.to_string(),
                })
            },
            Err(_) => {
                warn!(
                    practitioner_id = %practitioner_id,
                    timeout_ms = self.config.collaborator_timeout_ms,
                    "practitioner directory lookup timed out"
                );
                Err(ApprovalError::NotAValidPractitioner {
                    practitioner_id: practitioner_id.to_string(),
                })
            },
        }
    }

    /// Terminalizes a freshly inserted row after a failed ledger dispatch
    /// and builds the error the caller receives.
    fn compensate_failed_dispatch(&self, approval: &Approval, reason: String) -> ApprovalError {
        let now_ms = self.clock.now_ms();
        match self.store.compensate_create(&approval.id, now_ms) {
            Ok(true) => {
                warn!(
                    approval_id = %approval.id,
                    reason = %reason,
                    "ledger grant dispatch failed; approval terminalized"
                );
            },
            Ok(false) => {
                error!(
                    approval_id = %approval.id,
                    reason = %reason,
                    "compensation found no CREATED row; approval state needs manual reconciliation"
                );
            },
            Err(e) => {
                // A grant may now exist in one system but not the other.
                error!(
                    approval_id = %approval.id,
                    reason = %reason,
                    error = %e,
                    "compensation failed after ledger dispatch failure; manual reconciliation required"
                );
            },
        }

        ApprovalError::LedgerDispatchFailed {
            approval_id: approval.id.clone(),
            reason,
        }
    }

    fn collaborator_timeout(&self) -> Duration {
        Duration::from_millis(self.config.collaborator_timeout_ms)
    }

    fn page_window(&self, page: u64, limit: u64) -> (u64, u64) {
        let limit = limit.clamp(1, self.config.max_page_size);
        let offset = page.max(1).saturating_sub(1).saturating_mul(limit);
        (limit, offset)
    }
}

#[derive(Clone, Copy)]
enum Response {
    Accept,
    Reject,
}

impl Response {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Reject => "reject",
        }
    }
}
