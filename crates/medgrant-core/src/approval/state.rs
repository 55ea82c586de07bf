//! Approval entity and status/access-level enums.

use serde::{Deserialize, Serialize};

use super::error::ApprovalError;

/// Default approval duration when the request does not specify one: one day.
pub const DEFAULT_DURATION_MS: u64 = 86_400_000;

/// Access level granted by an approval.
///
/// `Write` and `Full` name a specific record and therefore require a record
/// id; `Read` is whole-patient scoped and carries none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    /// View-only access to the patient's records.
    Read,
    /// Modify access to a specific record.
    Write,
    /// Full access to a specific record.
    Full,
}

impl AccessLevel {
    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Full => "full",
        }
    }

    /// Parses an access level from its canonical string form.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::InvalidAccessLevel`] for unknown values.
    pub fn parse(value: &str) -> Result<Self, ApprovalError> {
        match value {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "full" => Ok(Self::Full),
            other => Err(ApprovalError::InvalidAccessLevel {
                value: other.to_string(),
            }),
        }
    }

    /// Whether this access level must name a specific record.
    #[must_use]
    pub const fn requires_record_id(self) -> bool {
        matches!(self, Self::Write | Self::Full)
    }
}

/// Lifecycle status of an approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApprovalStatus {
    /// Requested by the patient, awaiting the practitioner's response.
    Created,
    /// Accepted by the practitioner; access is live until expiry.
    Accepted,
    /// Declined by the practitioner.
    Rejected,
    /// Terminal: the grant ran to completion.
    Completed,
    /// Terminal: the grant expired without completing.
    TimedOut,
}

impl ApprovalStatus {
    /// Returns the canonical string representation (the stored form).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Accepted => "ACCEPTED",
            Self::Rejected => "REJECTED",
            Self::Completed => "COMPLETED",
            Self::TimedOut => "TIMED_OUT",
        }
    }

    /// Parses a status from its stored string form.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::InvalidStatus`] for unknown values.
    pub fn parse(value: &str) -> Result<Self, ApprovalError> {
        match value {
            "CREATED" => Ok(Self::Created),
            "ACCEPTED" => Ok(Self::Accepted),
            "REJECTED" => Ok(Self::Rejected),
            "COMPLETED" => Ok(Self::Completed),
            "TIMED_OUT" => Ok(Self::TimedOut),
            other => Err(ApprovalError::InvalidStatus {
                value: other.to_string(),
            }),
        }
    }

    /// Whether this status is terminal (no further transitions permitted).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::TimedOut)
    }

    /// Whether this status blocks a new grant for the same tuple.
    ///
    /// Only `CREATED` and `ACCEPTED` hold the uniqueness slot; `REJECTED`
    /// frees it while remaining sweepable.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Created | Self::Accepted)
    }
}

/// A single time-bound access grant from a patient to a practitioner.
///
/// `id`, `patient_id`, `practitioner_address`, `record_id`, `access_level`,
/// `duration_ms`, and `created_at_ms` are immutable after creation; only
/// `status`, `is_request_accepted`, `ledger_tx_hash`, and `updated_at_ms`
/// change over the lifecycle, and always through a conditional update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    /// Opaque unique identifier, assigned at creation.
    pub id: String,

    /// Identifier of the granting patient.
    pub patient_id: String,

    /// Resolved ledger address of the practitioner (not the application id).
    pub practitioner_address: String,

    /// Record the grant is scoped to. Present iff the access level requires
    /// one.
    pub record_id: Option<i64>,

    /// Granted access level.
    pub access_level: AccessLevel,

    /// Validity window in milliseconds, anchored at `created_at_ms`.
    pub duration_ms: u64,

    /// Current lifecycle status.
    pub status: ApprovalStatus,

    /// True only while the status is `ACCEPTED` and the window has not
    /// lapsed.
    pub is_request_accepted: bool,

    /// Transaction hash of the confirmed on-chain grant dispatch, once
    /// recorded.
    pub ledger_tx_hash: Option<String>,

    /// Creation time in milliseconds since the Unix epoch. Expiration
    /// anchor.
    pub created_at_ms: u64,

    /// Last status write in milliseconds since the Unix epoch.
    pub updated_at_ms: u64,
}

impl Approval {
    /// Creates a new approval in the `CREATED` state.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        patient_id: impl Into<String>,
        practitioner_address: impl Into<String>,
        record_id: Option<i64>,
        access_level: AccessLevel,
        duration_ms: u64,
        created_at_ms: u64,
    ) -> Self {
        Self {
            id: id.into(),
            patient_id: patient_id.into(),
            practitioner_address: practitioner_address.into(),
            record_id,
            access_level,
            duration_ms,
            status: ApprovalStatus::Created,
            is_request_accepted: false,
            ledger_tx_hash: None,
            created_at_ms,
            updated_at_ms: created_at_ms,
        }
    }

    /// The instant this approval's window lapses, or `None` if the
    /// arithmetic overflows.
    #[must_use]
    pub const fn expires_at_ms(&self) -> Option<u64> {
        self.created_at_ms.checked_add(self.duration_ms)
    }

    /// Whether the approval is logically expired at `now_ms`.
    ///
    /// Holds regardless of the stored status: the sweep is
    /// eventually-consistent, and callers must not honor an expired
    /// approval while it waits to be swept.
    #[must_use]
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        self.expires_at_ms().is_some_and(|expires| now_ms > expires)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approval(duration_ms: u64) -> Approval {
        Approval::new(
            "apv-1",
            "patient-1",
            "0xabc",
            None,
            AccessLevel::Read,
            duration_ms,
            1_000,
        )
    }

    #[test]
    fn status_round_trips_through_stored_form() {
        for status in [
            ApprovalStatus::Created,
            ApprovalStatus::Accepted,
            ApprovalStatus::Rejected,
            ApprovalStatus::Completed,
            ApprovalStatus::TimedOut,
        ] {
            assert_eq!(ApprovalStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(ApprovalStatus::parse("PENDING").is_err());
    }

    #[test]
    fn access_level_round_trips_and_flags_record_requirement() {
        for level in [AccessLevel::Read, AccessLevel::Write, AccessLevel::Full] {
            assert_eq!(AccessLevel::parse(level.as_str()).unwrap(), level);
        }
        assert!(!AccessLevel::Read.requires_record_id());
        assert!(AccessLevel::Write.requires_record_id());
        assert!(AccessLevel::Full.requires_record_id());
        assert!(AccessLevel::parse("admin").is_err());
    }

    #[test]
    fn terminal_and_active_sets_are_disjoint() {
        assert!(ApprovalStatus::Completed.is_terminal());
        assert!(ApprovalStatus::TimedOut.is_terminal());
        assert!(!ApprovalStatus::Rejected.is_terminal());
        assert!(ApprovalStatus::Created.is_active());
        assert!(ApprovalStatus::Accepted.is_active());
        assert!(!ApprovalStatus::Rejected.is_active());
        assert!(!ApprovalStatus::TimedOut.is_active());
    }

    #[test]
    fn expiry_is_exclusive_of_the_boundary() {
        let a = approval(500);
        assert_eq!(a.expires_at_ms(), Some(1_500));
        assert!(!a.is_expired_at(1_500));
        assert!(a.is_expired_at(1_501));
    }

    #[test]
    fn overflowing_window_never_expires() {
        let a = approval(u64::MAX);
        assert_eq!(a.expires_at_ms(), None);
        assert!(!a.is_expired_at(u64::MAX));
    }

    #[test]
    fn new_approval_starts_created_and_unaccepted() {
        let a = approval(DEFAULT_DURATION_MS);
        assert_eq!(a.status, ApprovalStatus::Created);
        assert!(!a.is_request_accepted);
        assert!(a.ledger_tx_hash.is_none());
        assert_eq!(a.updated_at_ms, a.created_at_ms);
    }
}
