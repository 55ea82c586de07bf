//! medgrant-daemon - Approval Lifecycle Service Daemon Library
//!
//! This library wires the medgrant-core engine into a running service: the
//! lifecycle operations the transport layer invokes, the timer-driven
//! background sweeper that enforces expiration independent of request
//! traffic, and the shared runtime state. The transport itself (HTTP,
//! auth, serialization) lives outside this crate.
//!
//! # Modules
//!
//! - [`service`]: the approval lifecycle operations: create, accept,
//!   reject, list, and the manually-triggerable sweep
//! - [`sweeper`]: the scheduled expiration sweep task and the shared
//!   sweep-and-revoke path
//! - [`state`]: shared daemon state with a shutdown flag

pub mod service;
pub mod state;
pub mod sweeper;
