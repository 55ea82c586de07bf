//! Approval entity and lifecycle state machine.
//!
//! An approval is a single time-bound access grant from a patient to a
//! practitioner, scoped to an access level and (for write/full access) a
//! specific record.
//!
//! # State Machine
//!
//! ```text
//! create --> CREATED
//!            |
//!            +--accept--> ACCEPTED --sweep--> TIMED_OUT
//!            |                     \--------> COMPLETED
//!            +--reject--> REJECTED --sweep--> TIMED_OUT
//!            |
//!            +--sweep---> TIMED_OUT
//! ```
//!
//! `TIMED_OUT` and `COMPLETED` are terminal: no further writes to status or
//! acceptance are permitted. `REJECTED` no longer blocks new grants for the
//! same tuple but is still swept to `TIMED_OUT` once its window lapses.
//!
//! # Key Concepts
//!
//! - **Approval**: a time-bounded grant of `read`, `write`, or `full` access
//! - **At-most-one**: only one non-terminal approval per
//!   `(patient, practitioner, record)` tuple at any time
//! - **Logical expiry**: `now > created_at + duration` expires an approval
//!   even before the sweep has written a terminal status

mod conflict;
mod error;
mod state;
pub mod validator;

pub use conflict::ConflictGuard;
pub use error::ApprovalError;
pub use state::{AccessLevel, Approval, ApprovalStatus, DEFAULT_DURATION_MS};
