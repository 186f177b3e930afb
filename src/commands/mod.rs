//! CLI command handlers.
//!
//! - `run`: the reconciliation service loop
//! - `validate`: configuration and firewall coverage check
//! - `audit`: registry versus live state, optional orphan cleanup
//! - `logic`: pure helpers (unit-testable)

mod audit;
mod logic;
mod run;
mod validate;

pub use audit::audit;
pub use logic::ExitStatus;
pub use run::run;
pub use validate::validate;
