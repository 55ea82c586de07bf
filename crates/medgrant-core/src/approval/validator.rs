//! Request-shape validation for approval creation.
//!
//! Pure functions of their input: no store access, no clock. The conflict
//! check and the storage-level uniqueness constraint are separate concerns.

use super::error::ApprovalError;
use super::state::AccessLevel;

/// A create request as received from the inbound surface, before
/// validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateApprovalRequest {
    /// The granting patient.
    pub patient_id: String,
    /// The practitioner's application id (resolved to a ledger address by
    /// the directory).
    pub practitioner_id: String,
    /// Requested access level.
    pub access_level: AccessLevel,
    /// Record to scope the grant to. Required for write/full, ignored for
    /// read.
    pub record_id: Option<i64>,
    /// Requested validity window in milliseconds. Defaults to one day.
    pub duration_ms: Option<i64>,
}

/// The validated, normalized shape of a create request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedCreate {
    /// Record id, present iff the access level requires one.
    pub record_id: Option<i64>,
    /// Effective duration in milliseconds.
    pub duration_ms: u64,
}

/// Validates a create request and normalizes its optional fields.
///
/// Rules:
/// - `write`/`full` access without a record id fails with
///   [`ApprovalError::RecordIdRequired`];
/// - a record id on a `read` request is ignored (read grants are
///   whole-patient scoped);
/// - a provided duration must be positive, otherwise
///   [`ApprovalError::InvalidDuration`]; an absent duration falls back to
///   `default_duration_ms` (one day, [`super::DEFAULT_DURATION_MS`],
///   unless configured otherwise).
///
/// # Errors
///
/// Returns the validation failure; nothing is persisted on any path.
#[allow(clippy::cast_sign_loss)] // positive by the guard above the cast
pub fn validate(
    request: &CreateApprovalRequest,
    default_duration_ms: u64,
) -> Result<ValidatedCreate, ApprovalError> {
    let record_id = if request.access_level.requires_record_id() {
        match request.record_id {
            Some(id) => Some(id),
            None => {
                return Err(ApprovalError::RecordIdRequired {
                    access_level: request.access_level.as_str().to_string(),
                });
            },
        }
    } else {
        None
    };

    let duration_ms = match request.duration_ms {
        None => default_duration_ms,
        Some(ms) if ms > 0 => ms as u64,
        Some(ms) => return Err(ApprovalError::InvalidDuration { duration_ms: ms }),
    };

    Ok(ValidatedCreate {
        record_id,
        duration_ms,
    })
}
