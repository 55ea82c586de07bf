//! Approval-specific error types.

use thiserror::Error;

use crate::store::StoreError;

/// Errors that can occur during approval lifecycle operations.
///
/// This is the closed taxonomy the engine surfaces to its callers; the
/// transport layer owns the mapping to status codes. Every variant is a
/// final answer; the engine never retries on the caller's behalf.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ApprovalError {
    /// Write or full access was requested without naming a record.
    #[error("access level {access_level} requires a record id")]
    RecordIdRequired {
        /// The access level that was requested.
        access_level: String,
    },

    /// The requested duration is not a positive number of milliseconds.
    #[error("invalid approval duration: {duration_ms} ms")]
    InvalidDuration {
        /// The rejected duration value.
        duration_ms: i64,
    },

    /// The practitioner is unknown, ineligible for the required role, or
    /// the directory could not confirm eligibility in time.
    #[error("practitioner {practitioner_id} is not a valid practitioner")]
    NotAValidPractitioner {
        /// The practitioner application id that failed the check.
        practitioner_id: String,
    },

    /// A non-terminal approval already exists for this tuple.
    #[error(
        "an active approval already exists for patient {patient_id} and practitioner {practitioner_address}"
    )]
    ApprovalAlreadyExists {
        /// The granting patient.
        patient_id: String,
        /// The practitioner's ledger address.
        practitioner_address: String,
        /// The record the grant is scoped to, if any.
        record_id: Option<i64>,
    },

    /// The on-chain grant dispatch failed; the stored row has been
    /// compensated.
    #[error("ledger grant dispatch failed for approval {approval_id}: {reason}")]
    LedgerDispatchFailed {
        /// The approval whose dispatch failed.
        approval_id: String,
        /// The underlying failure description.
        reason: String,
    },

    /// No approval with this id exists for the caller.
    #[error("approval not found: {approval_id}")]
    ApprovalNotFound {
        /// The approval id that was not found.
        approval_id: String,
    },

    /// The approval is no longer awaiting a response: it was already
    /// answered, already swept, or has logically expired.
    #[error("approval {approval_id} is not pending (status: {status})")]
    ApprovalNotPending {
        /// The approval id.
        approval_id: String,
        /// The status that blocked the transition.
        status: String,
    },

    /// Unknown stored status value.
    #[error("invalid approval status: {value}")]
    InvalidStatus {
        /// The invalid value encountered.
        value: String,
    },

    /// Unknown access level value.
    #[error("invalid access level: {value}")]
    InvalidAccessLevel {
        /// The invalid value encountered.
        value: String,
    },

    /// Storage layer failure.
    #[error("approval store error: {0}")]
    Store(#[from] StoreError),
}
