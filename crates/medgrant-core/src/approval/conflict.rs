//! Active-grant conflict detection.

use std::sync::Arc;

use crate::store::{ApprovalStore, StoreError};

/// Checks whether a `(patient, practitioner, record)` tuple already holds a
/// non-terminal approval.
///
/// This is the fast-path check run before insert. It is advisory under
/// concurrency: two creates can both pass it, so the store's partial unique
/// index over the active tuple is the authoritative enforcement, and the
/// insert maps its constraint violation to the same conflict answer.
#[derive(Clone)]
pub struct ConflictGuard {
    store: Arc<ApprovalStore>,
}

impl ConflictGuard {
    /// Creates a guard over the given store.
    #[must_use]
    pub fn new(store: Arc<ApprovalStore>) -> Self {
        Self { store }
    }

    /// Returns `true` if an approval with status `CREATED` or `ACCEPTED`
    /// exists for the tuple.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the lookup fails.
    pub fn has_active_approval(
        &self,
        patient_id: &str,
        practitioner_address: &str,
        record_id: Option<i64>,
    ) -> Result<bool, StoreError> {
        let count =
            self.store
                .active_count_for_tuple(patient_id, practitioner_address, record_id)?;
        Ok(count > 0)
    }
}
