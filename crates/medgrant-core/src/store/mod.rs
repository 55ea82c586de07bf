//! `SQLite`-backed approval storage.
//!
//! This module uses `SQLite` with WAL mode for the underlying storage. The
//! [`ApprovalStore`] is the sole shared mutable resource of the engine: all
//! cross-operation coordination goes through its conditional-update
//! primitives, so there is no separate lock manager.
//!
//! Two storage-level guarantees back the engine's invariants:
//!
//! - a **partial unique index** over the active tuple
//!   `(patient_id, practitioner_address, record_id)` closes the
//!   read-then-insert race between concurrent creates; the application-level
//!   conflict check alone is insufficient under concurrency;
//! - every status write is a **conditional update** keyed on the expected
//!   prior status, so a terminal state can never be reverted and a sweep can
//!   never clobber a concurrent accept.

// SQLite returns i64 for row IDs and counts, but the stored values are
// always non-negative. Mutex poisoning indicates a panic in another thread,
// which is unrecoverable.
#![allow(
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation,
    clippy::missing_panics_doc
)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, params, params_from_iter};
use thiserror::Error;

use crate::approval::{AccessLevel, Approval, ApprovalStatus};

/// Schema executed on every open. `COALESCE` in the unique index maps the
/// whole-patient (NULL record) scope onto a concrete slot; SQLite treats
/// bare NULLs as distinct in unique indexes.
const SCHEMA_SQL: &str = r"
    PRAGMA journal_mode = WAL;

    CREATE TABLE IF NOT EXISTS approvals (
        id                   TEXT PRIMARY KEY,
        patient_id           TEXT NOT NULL,
        practitioner_address TEXT NOT NULL,
        record_id            INTEGER,
        access_level         TEXT NOT NULL,
        duration_ms          INTEGER NOT NULL,
        status               TEXT NOT NULL,
        is_request_accepted  INTEGER NOT NULL DEFAULT 0,
        ledger_tx_hash       TEXT,
        created_at_ms        INTEGER NOT NULL,
        updated_at_ms        INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_approvals_patient
        ON approvals(patient_id, status);
    CREATE INDEX IF NOT EXISTS idx_approvals_practitioner
        ON approvals(practitioner_address, status);
    CREATE INDEX IF NOT EXISTS idx_approvals_tuple
        ON approvals(patient_id, practitioner_address, record_id, status);

    CREATE UNIQUE INDEX IF NOT EXISTS idx_approvals_active_grant
        ON approvals(patient_id, practitioner_address, COALESCE(record_id, -1))
        WHERE status IN ('CREATED', 'ACCEPTED');
";

/// Errors that can occur during approval store operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Database error from `SQLite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The active-grant uniqueness constraint rejected an insert.
    #[error(
        "an active approval already exists for patient {patient_id} and practitioner {practitioner_address}"
    )]
    ActiveGrantExists {
        /// The granting patient.
        patient_id: String,
        /// The practitioner's ledger address.
        practitioner_address: String,
        /// The record the grant is scoped to, if any.
        record_id: Option<i64>,
    },
}

/// A row projection used by the expiration sweep.
///
/// Timestamps and durations are carried as raw `i64` column values; the
/// sweep performs the checked conversion per row so one malformed row
/// cannot abort a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepCandidate {
    /// Approval id.
    pub id: String,
    /// The granting patient.
    pub patient_id: String,
    /// The practitioner's ledger address.
    pub practitioner_address: String,
    /// The record the grant is scoped to, if any.
    pub record_id: Option<i64>,
    /// Raw `created_at_ms` column value.
    pub created_at_ms: i64,
    /// Raw `duration_ms` column value.
    pub duration_ms: i64,
}

/// The durable approval table.
///
/// WAL mode allows concurrent reads while writes are in progress. Rows are
/// never physically deleted; terminal rows are retained as an audit trail.
pub struct ApprovalStore {
    conn: Arc<Mutex<Connection>>,
}

impl ApprovalStore {
    /// Opens or creates an approval store at the specified path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Self::initialize_connection(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Creates an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_connection(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn initialize_connection(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    /// Inserts a new approval row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ActiveGrantExists`] if a non-terminal approval
    /// already holds the `(patient, practitioner, record)` tuple. This is
    /// the authoritative conflict enforcement, closing the race two
    /// concurrent creates would otherwise win together.
    pub fn insert(&self, approval: &Approval) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();

        let result = conn.execute(
            "INSERT INTO approvals (
                 id, patient_id, practitioner_address, record_id, access_level,
                 duration_ms, status, is_request_accepted, ledger_tx_hash,
                 created_at_ms, updated_at_ms
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                approval.id,
                approval.patient_id,
                approval.practitioner_address,
                approval.record_id,
                approval.access_level.as_str(),
                approval.duration_ms,
                approval.status.as_str(),
                approval.is_request_accepted,
                approval.ledger_tx_hash,
                approval.created_at_ms,
                approval.updated_at_ms,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::ActiveGrantExists {
                    patient_id: approval.patient_id.clone(),
                    practitioner_address: approval.practitioner_address.clone(),
                    record_id: approval.record_id,
                })
            },
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Reads an approval by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get(&self, approval_id: &str) -> Result<Option<Approval>, StoreError> {
        let conn = self.conn.lock().unwrap();

        let approval = conn
            .query_row(
                &format!("SELECT {APPROVAL_COLUMNS} FROM approvals WHERE id = ?1"),
                params![approval_id],
                row_to_approval,
            )
            .optional()?;

        Ok(approval)
    }

    /// Counts non-terminal approvals for a `(patient, practitioner, record)`
    /// tuple.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn active_count_for_tuple(
        &self,
        patient_id: &str,
        practitioner_address: &str,
        record_id: Option<i64>,
    ) -> Result<u64, StoreError> {
        let conn = self.conn.lock().unwrap();

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM approvals
             WHERE patient_id = ?1
               AND practitioner_address = ?2
               AND COALESCE(record_id, -1) = COALESCE(?3, -1)
               AND status IN ('CREATED', 'ACCEPTED')",
            params![patient_id, practitioner_address, record_id],
            |row| row.get(0),
        )?;

        Ok(count as u64)
    }

    /// Conditionally transitions `CREATED -> ACCEPTED` for the named
    /// practitioner.
    ///
    /// Returns `true` if the row was transitioned, `false` if it no longer
    /// matched the expected pre-state (already answered, already swept, or
    /// owned by a different practitioner).
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn accept(
        &self,
        approval_id: &str,
        practitioner_address: &str,
        now_ms: u64,
    ) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();

        let changed = conn.execute(
            "UPDATE approvals
             SET status = 'ACCEPTED', is_request_accepted = 1, updated_at_ms = ?3
             WHERE id = ?1 AND practitioner_address = ?2 AND status = 'CREATED'",
            params![approval_id, practitioner_address, now_ms],
        )?;

        Ok(changed == 1)
    }

    /// Conditionally transitions `CREATED -> REJECTED` for the named
    /// practitioner.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn reject(
        &self,
        approval_id: &str,
        practitioner_address: &str,
        now_ms: u64,
    ) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();

        let changed = conn.execute(
            "UPDATE approvals
             SET status = 'REJECTED', is_request_accepted = 0, updated_at_ms = ?3
             WHERE id = ?1 AND practitioner_address = ?2 AND status = 'CREATED'",
            params![approval_id, practitioner_address, now_ms],
        )?;

        Ok(changed == 1)
    }

    /// Records the confirmed on-chain grant transaction for a freshly
    /// created approval.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn record_grant_tx(
        &self,
        approval_id: &str,
        tx_hash: &str,
        now_ms: u64,
    ) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();

        let changed = conn.execute(
            "UPDATE approvals
             SET ledger_tx_hash = ?2, updated_at_ms = ?3
             WHERE id = ?1 AND status = 'CREATED'",
            params![approval_id, tx_hash, now_ms],
        )?;

        Ok(changed == 1)
    }

    /// Compensation for a failed ledger dispatch: conditionally
    /// terminalizes a freshly inserted row via `CREATED -> REJECTED`.
    ///
    /// The row is kept (audit trail) but leaves the non-terminal set, so
    /// the uniqueness tuple is freed immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn compensate_create(&self, approval_id: &str, now_ms: u64) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();

        let changed = conn.execute(
            "UPDATE approvals
             SET status = 'REJECTED', is_request_accepted = 0, updated_at_ms = ?2
             WHERE id = ?1 AND status = 'CREATED'",
            params![approval_id, now_ms],
        )?;

        Ok(changed == 1)
    }

    /// Conditionally transitions `ACCEPTED -> COMPLETED`.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn complete(&self, approval_id: &str, now_ms: u64) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();

        let changed = conn.execute(
            "UPDATE approvals
             SET status = 'COMPLETED', is_request_accepted = 0, updated_at_ms = ?2
             WHERE id = ?1 AND status = 'ACCEPTED'",
            params![approval_id, now_ms],
        )?;

        Ok(changed == 1)
    }

    /// Lists a patient's approvals, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_for_patient(
        &self,
        patient_id: &str,
        status: Option<ApprovalStatus>,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Approval>, StoreError> {
        self.list_by("patient_id", patient_id, status, limit, offset)
    }

    /// Lists a practitioner's approvals by ledger address, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_for_practitioner(
        &self,
        practitioner_address: &str,
        status: Option<ApprovalStatus>,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Approval>, StoreError> {
        self.list_by(
            "practitioner_address",
            practitioner_address,
            status,
            limit,
            offset,
        )
    }

    fn list_by(
        &self,
        key_column: &str,
        key: &str,
        status: Option<ApprovalStatus>,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Approval>, StoreError> {
        let conn = self.conn.lock().unwrap();

        let approvals = match status {
            Some(status) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {APPROVAL_COLUMNS} FROM approvals
                     WHERE {key_column} = ?1 AND status = ?2
                     ORDER BY created_at_ms DESC, id DESC
                     LIMIT ?3 OFFSET ?4"
                ))?;
                let rows = stmt
                    .query_map(params![key, status.as_str(), limit, offset], row_to_approval)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            },
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {APPROVAL_COLUMNS} FROM approvals
                     WHERE {key_column} = ?1
                     ORDER BY created_at_ms DESC, id DESC
                     LIMIT ?2 OFFSET ?3"
                ))?;
                let rows = stmt
                    .query_map(params![key, limit, offset], row_to_approval)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            },
        };

        Ok(approvals)
    }

    /// Scans rows eligible for the unaccepted-timeout sweep pass:
    /// `is_request_accepted = 0` and status outside the terminal set.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn sweep_candidates_unaccepted(&self) -> Result<Vec<SweepCandidate>, StoreError> {
        self.sweep_candidates(
            "is_request_accepted = 0 AND status NOT IN ('TIMED_OUT', 'COMPLETED')",
        )
    }

    /// Scans rows eligible for the accepted-and-expired sweep pass:
    /// `is_request_accepted = 1` and status not `COMPLETED`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn sweep_candidates_accepted(&self) -> Result<Vec<SweepCandidate>, StoreError> {
        self.sweep_candidates("is_request_accepted = 1 AND status != 'COMPLETED'")
    }

    fn sweep_candidates(&self, predicate: &str) -> Result<Vec<SweepCandidate>, StoreError> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(&format!(
            "SELECT id, patient_id, practitioner_address, record_id, created_at_ms, duration_ms
             FROM approvals
             WHERE {predicate}
             ORDER BY created_at_ms ASC"
        ))?;

        let candidates = stmt
            .query_map([], |row| {
                Ok(SweepCandidate {
                    id: row.get(0)?,
                    patient_id: row.get(1)?,
                    practitioner_address: row.get(2)?,
                    record_id: row.get(3)?,
                    created_at_ms: row.get(4)?,
                    duration_ms: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(candidates)
    }

    /// Bulk-transitions expired unaccepted rows to `TIMED_OUT`.
    ///
    /// One conditional UPDATE over the collected ids, keyed on the pass's
    /// pre-state; a row that was accepted between scan and update no longer
    /// matches and is left alone. Returns the ids actually transitioned.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub fn time_out_unaccepted(
        &self,
        approval_ids: &[String],
        now_ms: u64,
    ) -> Result<Vec<String>, StoreError> {
        self.time_out_batch(
            approval_ids,
            "is_request_accepted = 0 AND status NOT IN ('TIMED_OUT', 'COMPLETED')",
            now_ms,
        )
    }

    /// Bulk-transitions expired accepted rows to `TIMED_OUT`, clearing the
    /// acceptance flag.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub fn time_out_accepted(
        &self,
        approval_ids: &[String],
        now_ms: u64,
    ) -> Result<Vec<String>, StoreError> {
        self.time_out_batch(
            approval_ids,
            "is_request_accepted = 1 AND status != 'COMPLETED'",
            now_ms,
        )
    }

    fn time_out_batch(
        &self,
        approval_ids: &[String],
        prestate: &str,
        now_ms: u64,
    ) -> Result<Vec<String>, StoreError> {
        if approval_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let in_list = placeholders(approval_ids.len(), 1);
        let id_values = approval_ids
            .iter()
            .map(|id| Value::Text(id.clone()))
            .collect::<Vec<_>>();

        // Re-filter inside the transaction so the returned ids are exactly
        // the rows the bulk update will touch.
        let confirmed: Vec<String> = {
            let mut stmt = tx.prepare(&format!(
                "SELECT id FROM approvals WHERE id IN ({in_list}) AND {prestate}"
            ))?;
            let rows = stmt
                .query_map(params_from_iter(id_values.iter()), |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        if confirmed.is_empty() {
            tx.commit()?;
            return Ok(confirmed);
        }

        let confirmed_list = placeholders(confirmed.len(), 2);
        let mut update_values = vec![Value::Integer(now_ms as i64)];
        update_values.extend(confirmed.iter().map(|id| Value::Text(id.clone())));

        tx.execute(
            &format!(
                "UPDATE approvals
                 SET status = 'TIMED_OUT', is_request_accepted = 0, updated_at_ms = ?1
                 WHERE id IN ({confirmed_list}) AND {prestate}"
            ),
            params_from_iter(update_values.iter()),
        )?;

        tx.commit()?;
        Ok(confirmed)
    }
}

/// Column list shared by every `SELECT` that materializes an [`Approval`].
const APPROVAL_COLUMNS: &str = "id, patient_id, practitioner_address, record_id, access_level, \
     duration_ms, status, is_request_accepted, ledger_tx_hash, created_at_ms, updated_at_ms";

fn row_to_approval(row: &Row<'_>) -> rusqlite::Result<Approval> {
    let access_level_raw: String = row.get(4)?;
    let access_level = AccessLevel::parse(&access_level_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let status_raw: String = row.get(6)?;
    let status = ApprovalStatus::parse(&status_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Approval {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        practitioner_address: row.get(2)?,
        record_id: row.get(3)?,
        access_level,
        duration_ms: row.get::<_, i64>(5)? as u64,
        status,
        is_request_accepted: row.get(7)?,
        ledger_tx_hash: row.get(8)?,
        created_at_ms: row.get::<_, i64>(9)? as u64,
        updated_at_ms: row.get::<_, i64>(10)? as u64,
    })
}

/// Builds `?N,?N+1,...` placeholder lists for `IN` clauses.
fn placeholders(count: usize, start: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}
