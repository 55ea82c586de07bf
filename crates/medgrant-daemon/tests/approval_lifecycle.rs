//! Lifecycle integration tests for the approval service.
//!
//! Exercises the create/accept/reject operations end-to-end against an
//! in-memory store with mock directory and ledger collaborators:
//!
//! - request-shape validation never persists a row
//! - the at-most-one-active-grant invariant holds under concurrent creates
//! - a failed or timed-out ledger dispatch leaves no active row behind
//! - responses are refused on expired or already-answered approvals

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use medgrant_core::approval::validator::CreateApprovalRequest;
use medgrant_core::approval::{AccessLevel, ApprovalError, ApprovalStatus, DEFAULT_DURATION_MS};
use medgrant_core::clock::Clock;
use medgrant_core::config::EngineConfig;
use medgrant_core::directory::{DirectoryError, PractitionerDirectory, PractitionerRecord};
use medgrant_core::ledger::{GrantReceipt, LedgerBridge, LedgerError, RevokeReceipt};
use medgrant_core::store::ApprovalStore;
use medgrant_daemon::service::ApprovalLifecycleService;

// =============================================================================
// Test doubles
// =============================================================================

/// Clock that only moves when a test tells it to.
struct ManualClock(AtomicU64);

impl ManualClock {
    fn new(now_ms: u64) -> Arc<Self> {
        Arc::new(Self(AtomicU64::new(now_ms)))
    }

    fn set(&self, now_ms: u64) {
        self.0.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Directory with a fixed roster, plus failure and hang switches.
#[derive(Default)]
struct StaticDirectory {
    roster: HashMap<String, String>,
    fail: AtomicBool,
    hang: AtomicBool,
}

impl StaticDirectory {
    fn with_practitioner(id: &str, address: &str) -> Arc<Self> {
        let mut roster = HashMap::new();
        roster.insert(id.to_string(), address.to_string());
        Arc::new(Self {
            roster,
            ..Self::default()
        })
    }
}

#[async_trait]
impl PractitionerDirectory for StaticDirectory {
    async fn eligible_practitioner(
        &self,
        practitioner_id: &str,
        _role: &str,
    ) -> Result<Option<PractitionerRecord>, DirectoryError> {
        if self.hang.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(DirectoryError::Unavailable("directory offline".to_string()));
        }
        Ok(self
            .roster
            .get(practitioner_id)
            .map(|address| PractitionerRecord {
                practitioner_id: practitioner_id.to_string(),
                ledger_address: address.clone(),
            }))
    }
}

/// Ledger that records dispatches, with failure and hang switches.
#[derive(Default)]
struct RecordingLedger {
    fail_grants: AtomicBool,
    hang_grants: AtomicBool,
    grants: std::sync::Mutex<Vec<String>>,
    revokes: std::sync::Mutex<Vec<String>>,
    sequence: AtomicU64,
}

#[async_trait]
impl LedgerBridge for RecordingLedger {
    async fn dispatch_grant(
        &self,
        practitioner_address: &str,
        _patient_chain_id: &str,
        _record_id: Option<i64>,
        _duration_ms: u64,
    ) -> Result<GrantReceipt, LedgerError> {
        if self.hang_grants.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        if self.fail_grants.load(Ordering::SeqCst) {
            return Err(LedgerError::Rejected("node refused the grant".to_string()));
        }
        self.grants
            .lock()
            .unwrap()
            .push(practitioner_address.to_string());
        let n = self.sequence.fetch_add(1, Ordering::SeqCst);
        Ok(GrantReceipt {
            tx_hash: format!("0xgrant{n}"),
        })
    }

    async fn dispatch_revoke(
        &self,
        practitioner_address: &str,
        _patient_chain_id: &str,
        _record_id: Option<i64>,
    ) -> Result<RevokeReceipt, LedgerError> {
        self.revokes
            .lock()
            .unwrap()
            .push(practitioner_address.to_string());
        let n = self.sequence.fetch_add(1, Ordering::SeqCst);
        Ok(RevokeReceipt {
            tx_hash: format!("0xrevoke{n}"),
        })
    }
}

struct Harness {
    service: Arc<ApprovalLifecycleService>,
    store: Arc<ApprovalStore>,
    clock: Arc<ManualClock>,
    directory: Arc<StaticDirectory>,
    ledger: Arc<RecordingLedger>,
}

fn harness() -> Harness {
    let store = Arc::new(ApprovalStore::in_memory().unwrap());
    let clock = ManualClock::new(1_000_000);
    let directory = StaticDirectory::with_practitioner("prac-1", "0xcafe");
    let ledger = Arc::new(RecordingLedger::default());

    let mut config = EngineConfig::default();
    config.collaborator_timeout_ms = 50;

    let service = Arc::new(ApprovalLifecycleService::new(
        Arc::clone(&store),
        Arc::clone(&directory) as Arc<dyn PractitionerDirectory>,
        Arc::clone(&ledger) as Arc<dyn LedgerBridge>,
        Arc::clone(&clock) as Arc<dyn Clock>,
        config,
    ));

    Harness {
        service,
        store,
        clock,
        directory,
        ledger,
    }
}

fn read_request(patient_id: &str) -> CreateApprovalRequest {
    CreateApprovalRequest {
        patient_id: patient_id.to_string(),
        practitioner_id: "prac-1".to_string(),
        access_level: AccessLevel::Read,
        record_id: None,
        duration_ms: None,
    }
}

// =============================================================================
// Creation
// =============================================================================

#[tokio::test]
async fn create_read_approval_dispatches_grant_and_records_tx() {
    let h = harness();

    let approval = h.service.create_approval(read_request("patient-1")).await.unwrap();

    assert_eq!(approval.status, ApprovalStatus::Created);
    assert_eq!(approval.patient_id, "patient-1");
    assert_eq!(approval.practitioner_address, "0xcafe");
    assert_eq!(approval.record_id, None);
    assert!(!approval.is_request_accepted);
    assert_eq!(approval.ledger_tx_hash.as_deref(), Some("0xgrant0"));
    assert_eq!(h.ledger.grants.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn omitted_duration_defaults_to_one_day() {
    let h = harness();

    let approval = h.service.create_approval(read_request("patient-1")).await.unwrap();

    assert_eq!(approval.duration_ms, DEFAULT_DURATION_MS);
}

#[tokio::test]
async fn write_without_record_id_fails_and_persists_nothing() {
    let h = harness();
    let mut request = read_request("patient-1");
    request.access_level = AccessLevel::Write;

    let err = h.service.create_approval(request).await.unwrap_err();

    assert!(matches!(err, ApprovalError::RecordIdRequired { .. }));
    let rows = h
        .service
        .list_approvals_for_patient("patient-1", None, 1, 10)
        .unwrap();
    assert!(rows.is_empty());
    assert!(h.ledger.grants.lock().unwrap().is_empty());
}

#[tokio::test]
async fn write_with_record_id_is_scoped_to_that_record() {
    let h = harness();
    let mut request = read_request("patient-1");
    request.access_level = AccessLevel::Write;
    request.record_id = Some(42);

    let approval = h.service.create_approval(request).await.unwrap();

    assert_eq!(approval.record_id, Some(42));
    assert_eq!(approval.access_level, AccessLevel::Write);
}

#[tokio::test]
async fn unknown_practitioner_is_rejected() {
    let h = harness();
    let mut request = read_request("patient-1");
    request.practitioner_id = "prac-unknown".to_string();

    let err = h.service.create_approval(request).await.unwrap_err();
    assert!(matches!(err, ApprovalError::NotAValidPractitioner { .. }));
}

#[tokio::test]
async fn directory_failure_is_treated_as_ineligibility() {
    let h = harness();
    h.directory.fail.store(true, Ordering::SeqCst);

    let err = h.service.create_approval(read_request("patient-1")).await.unwrap_err();
    assert!(matches!(err, ApprovalError::NotAValidPractitioner { .. }));
}

#[tokio::test]
async fn directory_timeout_is_treated_as_ineligibility() {
    let h = harness();
    h.directory.hang.store(true, Ordering::SeqCst);

    let err = h.service.create_approval(read_request("patient-1")).await.unwrap_err();
    assert!(matches!(err, ApprovalError::NotAValidPractitioner { .. }));
}

// =============================================================================
// Conflict detection
// =============================================================================

#[tokio::test]
async fn second_create_for_the_same_tuple_conflicts() {
    let h = harness();
    h.service.create_approval(read_request("patient-1")).await.unwrap();

    let err = h.service.create_approval(read_request("patient-1")).await.unwrap_err();
    assert!(matches!(err, ApprovalError::ApprovalAlreadyExists { .. }));
}

#[tokio::test]
async fn concurrent_creates_yield_exactly_one_active_row() {
    let h = harness();

    let first = tokio::spawn({
        let service = Arc::clone(&h.service);
        async move { service.create_approval(read_request("patient-1")).await }
    });
    let second = tokio::spawn({
        let service = Arc::clone(&h.service);
        async move { service.create_approval(read_request("patient-1")).await }
    });

    let outcomes = [first.await.unwrap(), second.await.unwrap()];
    let successes = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one concurrent create must win");
    assert!(outcomes.iter().any(|r| matches!(
        r,
        Err(ApprovalError::ApprovalAlreadyExists { .. })
    )));

    let active = h
        .store
        .active_count_for_tuple("patient-1", "0xcafe", None)
        .unwrap();
    assert_eq!(active, 1);
}

#[tokio::test]
async fn distinct_records_can_hold_grants_simultaneously() {
    let h = harness();
    for record_id in [1, 2] {
        let mut request = read_request("patient-1");
        request.access_level = AccessLevel::Write;
        request.record_id = Some(record_id);
        h.service.create_approval(request).await.unwrap();
    }
}

// =============================================================================
// Ledger dispatch compensation
// =============================================================================

#[tokio::test]
async fn failed_dispatch_compensates_the_inserted_row() {
    let h = harness();
    h.ledger.fail_grants.store(true, Ordering::SeqCst);

    let err = h.service.create_approval(read_request("patient-1")).await.unwrap_err();

    let ApprovalError::LedgerDispatchFailed { approval_id, .. } = err else {
        panic!("expected LedgerDispatchFailed, got {err:?}");
    };

    // The row is terminalized, not deleted: audit trail survives, tuple is
    // freed.
    let row = h.store.get(&approval_id).unwrap().unwrap();
    assert_eq!(row.status, ApprovalStatus::Rejected);
    let active = h
        .store
        .active_count_for_tuple("patient-1", "0xcafe", None)
        .unwrap();
    assert_eq!(active, 0);

    // A retry after the ledger recovers succeeds.
    h.ledger.fail_grants.store(false, Ordering::SeqCst);
    h.service.create_approval(read_request("patient-1")).await.unwrap();
}

#[tokio::test]
async fn dispatch_timeout_compensates_the_inserted_row() {
    let h = harness();
    h.ledger.hang_grants.store(true, Ordering::SeqCst);

    let err = h.service.create_approval(read_request("patient-1")).await.unwrap_err();

    assert!(matches!(err, ApprovalError::LedgerDispatchFailed { .. }));
    let active = h
        .store
        .active_count_for_tuple("patient-1", "0xcafe", None)
        .unwrap();
    assert_eq!(active, 0);
}

// =============================================================================
// Accept / reject
// =============================================================================

#[tokio::test]
async fn accept_transitions_a_pending_approval() {
    let h = harness();
    let approval = h.service.create_approval(read_request("patient-1")).await.unwrap();

    h.clock.set(1_000_500);
    let accepted = h
        .service
        .accept_approval(&approval.id, "prac-1")
        .await
        .unwrap();

    assert_eq!(accepted.status, ApprovalStatus::Accepted);
    assert!(accepted.is_request_accepted);
    assert_eq!(accepted.updated_at_ms, 1_000_500);
}

#[tokio::test]
async fn accept_is_refused_once_already_answered() {
    let h = harness();
    let approval = h.service.create_approval(read_request("patient-1")).await.unwrap();
    h.service.accept_approval(&approval.id, "prac-1").await.unwrap();

    let err = h
        .service
        .accept_approval(&approval.id, "prac-1")
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::ApprovalNotPending { .. }));
}

#[tokio::test]
async fn reject_transitions_a_pending_approval() {
    let h = harness();
    let approval = h.service.create_approval(read_request("patient-1")).await.unwrap();

    let rejected = h
        .service
        .reject_approval(&approval.id, "prac-1")
        .await
        .unwrap();

    assert_eq!(rejected.status, ApprovalStatus::Rejected);
    assert!(!rejected.is_request_accepted);

    let err = h
        .service
        .accept_approval(&approval.id, "prac-1")
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::ApprovalNotPending { .. }));
}

#[tokio::test]
async fn foreign_practitioner_cannot_see_the_approval() {
    let h = harness();
    let approval = h.service.create_approval(read_request("patient-1")).await.unwrap();

    // Register a second practitioner so resolution succeeds but ownership
    // does not match.
    let directory = StaticDirectory::with_practitioner("prac-2", "0xbeef");
    let mut config = EngineConfig::default();
    config.collaborator_timeout_ms = 50;
    let other_service = ApprovalLifecycleService::new(
        Arc::clone(&h.store),
        directory as Arc<dyn PractitionerDirectory>,
        Arc::clone(&h.ledger) as Arc<dyn LedgerBridge>,
        Arc::clone(&h.clock) as Arc<dyn Clock>,
        config,
    );

    let err = other_service
        .accept_approval(&approval.id, "prac-2")
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::ApprovalNotFound { .. }));
}

#[tokio::test]
async fn unknown_approval_id_is_not_found() {
    let h = harness();
    let err = h
        .service
        .accept_approval("apv-missing", "prac-1")
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::ApprovalNotFound { .. }));
}

#[tokio::test]
async fn accept_is_refused_after_logical_expiry_even_before_the_sweep() {
    let h = harness();
    let mut request = read_request("patient-1");
    request.duration_ms = Some(1_000);
    let approval = h.service.create_approval(request).await.unwrap();

    // Past the window, but no sweep has run: the stored status is still
    // CREATED and must not be honored.
    h.clock.set(1_002_000);
    let err = h
        .service
        .accept_approval(&approval.id, "prac-1")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ApprovalError::ApprovalNotPending { ref status, .. } if status == "EXPIRED"
    ));
    assert_eq!(
        h.store.get(&approval.id).unwrap().unwrap().status,
        ApprovalStatus::Created
    );
}

// =============================================================================
// Listing
// =============================================================================

#[tokio::test]
async fn listing_pages_through_a_patients_approvals() {
    let h = harness();

    for record_id in 1..=3 {
        let mut request = read_request("patient-1");
        request.access_level = AccessLevel::Write;
        request.record_id = Some(record_id);
        h.clock.set(1_000_000 + record_id as u64);
        h.service.create_approval(request).await.unwrap();
    }

    let first_page = h
        .service
        .list_approvals_for_patient("patient-1", None, 1, 2)
        .unwrap();
    assert_eq!(first_page.len(), 2);
    assert_eq!(first_page[0].record_id, Some(3));

    let second_page = h
        .service
        .list_approvals_for_patient("patient-1", None, 2, 2)
        .unwrap();
    assert_eq!(second_page.len(), 1);
    assert_eq!(second_page[0].record_id, Some(1));

    // Zero limit is clamped up rather than returning everything.
    let clamped = h
        .service
        .list_approvals_for_patient("patient-1", None, 1, 0)
        .unwrap();
    assert_eq!(clamped.len(), 1);
}

#[tokio::test]
async fn listing_filters_by_status_and_resolves_practitioners() {
    let h = harness();
    let approval = h.service.create_approval(read_request("patient-1")).await.unwrap();
    h.service.accept_approval(&approval.id, "prac-1").await.unwrap();

    let accepted = h
        .service
        .list_approvals_for_practitioner("prac-1", Some(ApprovalStatus::Accepted), 1, 10)
        .await
        .unwrap();
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].id, approval.id);

    let created = h
        .service
        .list_approvals_for_practitioner("prac-1", Some(ApprovalStatus::Created), 1, 10)
        .await
        .unwrap();
    assert!(created.is_empty());

    let err = h
        .service
        .list_approvals_for_practitioner("prac-unknown", None, 1, 10)
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::NotAValidPractitioner { .. }));
}
