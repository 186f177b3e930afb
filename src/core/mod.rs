//! Core logic: output decoding, parsing, desired state, reconciliation, audit.
//!
//! - [`decode`]: UTF-16/UTF-8 tool output normalization
//! - [`parse`]: `wsl.exe` and `netsh.exe` output parsers
//! - [`model`]: port, instance and rule types
//! - [`desired`]: desired state with conflict resolution
//! - [`Reconciler`]: diff and apply, keeping the registry current
//! - [`audit`]: registry versus live state, orphan cleanup

pub mod audit;
pub mod decode;
pub mod desired;
pub mod model;
pub mod parse;
pub mod reconcile;

pub use audit::{AuditReport, CleanupReport};
pub use desired::{build_desired_state, configured_ports, ConflictPolicy, DesiredState};
pub use reconcile::{LiveState, ReconcileReport, ReconcileScope, Reconciler};
