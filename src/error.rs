//! Unified error type for the reconciliation engine.
//!
//! `EngineError` is returned by every discovery, mutation and registry
//! operation. It serializes as `{ "kind": "...", "message": "..." }` so cycle
//! and audit reports can be rendered as JSON with the failure category intact.

use serde::ser::SerializeStruct;

/// Engine-level error.
///
/// Each variant maps to a distinct failure domain with its own cycle-level
/// consequence (see the variant docs).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The instance manager could not be queried. Aborts the current cycle.
    #[error("{0}")]
    Discovery(String),

    /// One instance's address could not be resolved. Skips that instance only.
    #[error("instance {instance}: {message}")]
    AddressResolution { instance: String, message: String },

    /// Adding, updating or removing a forwarding or firewall rule failed.
    #[error("{0}")]
    Mutation(String),

    /// The ownership registry could not be read or written.
    #[error("{0}")]
    Registry(String),

    /// Invalid or unreadable configuration.
    #[error("{0}")]
    Config(String),
}

impl EngineError {
    /// Returns the error kind as a string matching the variant name.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Discovery(_) => "Discovery",
            EngineError::AddressResolution { .. } => "AddressResolution",
            EngineError::Mutation(_) => "Mutation",
            EngineError::Registry(_) => "Registry",
            EngineError::Config(_) => "Config",
        }
    }

    pub fn address(instance: &str, message: impl Into<String>) -> Self {
        EngineError::AddressResolution {
            instance: instance.to_string(),
            message: message.into(),
        }
    }

    /// Wrap a registry-layer failure.
    pub fn registry(err: impl std::fmt::Display) -> Self {
        EngineError::Registry(err.to_string())
    }
}

/// Custom Serialize: produces `{ "kind": "Variant", "message": "..." }`.
impl serde::Serialize for EngineError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut s = serializer.serialize_struct("EngineError", 2)?;
        s.serialize_field("kind", self.kind())?;
        s.serialize_field("message", &self.to_string())?;
        s.end()
    }
}

// ---- From implementations for ergonomic error conversion ----

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Registry(format!("{err:#}"))
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        EngineError::Registry(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}
