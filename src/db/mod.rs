//! SQLite persistence layer for the ownership registry.
//!
//! Uses `rusqlite` with bundled SQLite. Handles:
//! - Forwarding rules the engine installed (keyed by listen port)
//! - Firewall rules the engine created (keyed by rule name)
//!
//! Every write is a single autocommit statement with `synchronous=FULL`, so a
//! record is on disk before the call returns.

mod registry;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use rusqlite::Connection;
use serde::Serialize;

use crate::config;
use crate::core::model::FirewallMode;

/// Manages the registry database.
pub struct Database {
    conn: Mutex<Connection>,
}

/// A forwarding rule this engine installed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForwardingRecord {
    pub listen_port: u16,
    pub listen_address: String,
    pub connect_address: String,
    pub connect_port: u16,
    pub instance: String,
    pub comment: String,
    pub registered_at: i64,
}

/// A firewall rule this engine created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FirewallRecord {
    pub rule_name: String,
    pub port: u16,
    pub mode: FirewallMode,
    pub instance: String,
    pub registered_at: i64,
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS forwarding_rules (
        listen_port INTEGER PRIMARY KEY,
        listen_address TEXT NOT NULL DEFAULT '0.0.0.0',
        connect_address TEXT NOT NULL,
        connect_port INTEGER NOT NULL,
        instance TEXT NOT NULL,
        comment TEXT NOT NULL DEFAULT '',
        registered_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS firewall_rules (
        rule_name TEXT PRIMARY KEY,
        port INTEGER NOT NULL,
        mode TEXT NOT NULL,
        instance TEXT NOT NULL,
        registered_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_firewall_port ON firewall_rules(port);
";

impl Database {
    /// Open or create the registry at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating registry directory {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("opening registry {}", path.display()))?;

        // WAL plus FULL sync: each committed write survives a crash or power loss.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")?;
        Self::init(conn)
    }

    /// Open a throwaway registry (tests and dry runs).
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("registry connection lock poisoned"))
    }
}

/// Default registry location: `%ProgramData%\wsl-portmapper\registry.db`,
/// or the working directory when `ProgramData` is unset.
pub fn default_registry_path() -> PathBuf {
    std::env::var_os("ProgramData")
        .map(PathBuf::from)
        .map(|base| base.join(config::REGISTRY_DIR_NAME))
        .unwrap_or_default()
        .join(config::REGISTRY_FILE_NAME)
}

/// Current Unix timestamp in seconds.
pub fn chrono_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub fn open_memory_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    pub fn make_forwarding(port: u16, address: &str, connect_port: u16, instance: &str) -> ForwardingRecord {
        ForwardingRecord {
            listen_port: port,
            listen_address: "0.0.0.0".into(),
            connect_address: address.into(),
            connect_port,
            instance: instance.into(),
            comment: String::new(),
            registered_at: 1_700_000_000,
        }
    }

    pub fn make_firewall(port: u16, instance: &str, mode: FirewallMode) -> FirewallRecord {
        FirewallRecord {
            rule_name: crate::core::model::firewall_rule_name(port, instance),
            port,
            mode,
            instance: instance.into(),
            registered_at: 1_700_000_000,
        }
    }

    #[test]
    fn test_open_creates_schema_idempotently() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("registry.db");
        Database::open(&path).unwrap();
        // Re-opening an existing registry must not fail on CREATE TABLE.
        let db = Database::open(&path).unwrap();
        assert!(db.list_forwarding_records().unwrap().is_empty());
        assert!(path.exists());
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.db");
        {
            let db = Database::open(&path).unwrap();
            db.record_forwarding(&make_forwarding(2201, "172.20.1.5", 22, "Ubuntu"))
                .unwrap();
            db.record_firewall(&make_firewall(2201, "Ubuntu", FirewallMode::Local))
                .unwrap();
        }

        let db = Database::open(&path).unwrap();
        let forwarding = db.list_forwarding_records().unwrap();
        assert_eq!(forwarding.len(), 1);
        assert_eq!(forwarding[0].connect_address, "172.20.1.5");
        let firewall = db.list_firewall_records().unwrap();
        assert_eq!(firewall.len(), 1);
        assert_eq!(firewall[0].mode, FirewallMode::Local);
    }

    #[test]
    fn test_default_registry_path_file_name() {
        let path = default_registry_path();
        assert_eq!(path.file_name().unwrap(), config::REGISTRY_FILE_NAME);
    }
}
