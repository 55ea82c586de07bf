//! medgrant-core - Approval Lifecycle Engine Library
//!
//! This library implements the core of the medgrant access-grant system:
//! patients issue fine-grained, time-bound, revocable approvals that let a
//! named practitioner view or modify specific medical records. Every approval
//! carries a duration after which it must stop being honored, whether or not
//! the practitioner ever acted on it.
//!
//! # Key Invariants
//!
//! - **At-most-one active grant**: for a given `(patient, practitioner,
//!   record)` tuple there is never more than one approval in a non-terminal
//!   state. Enforced at the storage layer by a partial unique index, not just
//!   by the application-level conflict check.
//! - **Monotonic terminal state**: once an approval reaches `TimedOut` or
//!   `Completed`, no operation reverts it. Every status write is a
//!   conditional update keyed on the expected prior status.
//! - **Logical expiry**: `now > created_at + duration` makes an approval
//!   expired even before the sweep has transitioned its stored status.
//!
//! # Modules
//!
//! - [`approval`]: the `Approval` entity, its state machine, request
//!   validation, and conflict detection
//! - [`store`]: `SQLite`-backed durable approval table with conditional
//!   update primitives
//! - [`sweep`]: the expiration sweep passes that transition timed-out
//!   approvals, independent of request traffic
//! - [`directory`]: practitioner directory collaborator trait
//! - [`ledger`]: on-chain grant/revoke dispatch collaborator trait
//! - [`clock`]: injectable time source so sweep and lifecycle logic are pure
//!   functions of "now"
//! - [`config`]: engine configuration with TOML loading and validation

pub mod approval;
pub mod clock;
pub mod config;
pub mod directory;
pub mod ledger;
pub mod store;
pub mod sweep;
