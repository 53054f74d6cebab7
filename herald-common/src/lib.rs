//! Shared plumbing for the herald crates: log initialisation, the
//! `internal!`/`outgoing!`/`incoming!` span macros, and audit events for
//! the delivery lifecycle.

pub mod audit;
pub mod logging;

pub use tracing;
