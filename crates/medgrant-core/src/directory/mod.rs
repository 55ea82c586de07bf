//! Practitioner directory collaborator.
//!
//! The directory is an external service; the engine only depends on this
//! seam. A negative answer, an error, and a timeout are all treated
//! identically by the lifecycle service: the practitioner is not valid, and
//! the state machine never advances on an unconfirmed precondition.

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during directory lookups.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DirectoryError {
    /// The directory could not be reached.
    #[error("directory unavailable: {0}")]
    Unavailable(String),

    /// The directory answered with something the client could not decode.
    #[error("invalid directory response: {0}")]
    InvalidResponse(String),
}

/// An eligible practitioner as resolved by the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PractitionerRecord {
    /// The practitioner's application id.
    pub practitioner_id: String,
    /// The practitioner's resolved ledger address, the identity stored on
    /// approvals.
    pub ledger_address: String,
}

/// Read-only client for the practitioner directory service.
#[async_trait]
pub trait PractitionerDirectory: Send + Sync {
    /// Resolves a practitioner and confirms eligibility for the required
    /// role.
    ///
    /// Returns `Ok(None)` when the practitioner is unknown or ineligible.
    ///
    /// # Errors
    ///
    /// Returns a [`DirectoryError`] if the lookup itself fails; callers
    /// treat that the same as ineligibility.
    async fn eligible_practitioner(
        &self,
        practitioner_id: &str,
        role: &str,
    ) -> Result<Option<PractitionerRecord>, DirectoryError>;
}
