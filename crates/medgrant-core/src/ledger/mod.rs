//! On-chain ledger collaborator.
//!
//! The distributed ledger is the system that actually enforces access; the
//! engine treats it as an opaque, write-only collaborator behind this seam.
//! Dispatches return receipts as proof of the external effect; the wire
//! format of the transaction is owned by the implementation.

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during ledger dispatch.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LedgerError {
    /// The ledger node rejected the transaction.
    #[error("ledger rejected the transaction: {0}")]
    Rejected(String),

    /// The ledger node could not be reached.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Proof that a grant transaction was dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantReceipt {
    /// Hash of the dispatched grant transaction.
    pub tx_hash: String,
}

/// Proof that a revoke transaction was dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokeReceipt {
    /// Hash of the dispatched revoke transaction.
    pub tx_hash: String,
}

/// Write-only dispatcher for on-chain grant and revoke operations.
#[async_trait]
pub trait LedgerBridge: Send + Sync {
    /// Dispatches the on-chain grant for a practitioner address.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] if the dispatch fails; the caller must
    /// compensate the stored row before surfacing the failure.
    async fn dispatch_grant(
        &self,
        practitioner_address: &str,
        patient_chain_id: &str,
        record_id: Option<i64>,
        duration_ms: u64,
    ) -> Result<GrantReceipt, LedgerError>;

    /// Dispatches the on-chain revoke for a practitioner address.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] if the dispatch fails.
    async fn dispatch_revoke(
        &self,
        practitioner_address: &str,
        patient_chain_id: &str,
        record_id: Option<i64>,
    ) -> Result<RevokeReceipt, LedgerError>;
}
