//! Ownership registry table CRUD operations.

use anyhow::Result;
use rusqlite::{params, OptionalExtension};

use super::{Database, FirewallRecord, ForwardingRecord};
use crate::core::model::FirewallMode;

impl Database {
    /// Record (or replace) the forwarding rule installed on `entry.listen_port`.
    pub fn record_forwarding(&self, entry: &ForwardingRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO forwarding_rules
                (listen_port, listen_address, connect_address, connect_port, instance, comment, registered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.listen_port,
                entry.listen_address,
                entry.connect_address,
                entry.connect_port,
                entry.instance,
                entry.comment,
                entry.registered_at,
            ],
        )?;
        tracing::debug!(
            "Registered forwarding {} -> {}:{} ({})",
            entry.listen_port,
            entry.connect_address,
            entry.connect_port,
            entry.instance
        );
        Ok(())
    }

    /// Delete the forwarding record for `port`. Returns whether one existed.
    pub fn remove_forwarding_record(&self, port: u16) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM forwarding_rules WHERE listen_port = ?1",
            params![port],
        )?;
        if deleted == 0 {
            tracing::debug!("No forwarding record for port {port}");
        }
        Ok(deleted > 0)
    }

    pub fn forwarding_record(&self, port: u16) -> Result<Option<ForwardingRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT listen_port, listen_address, connect_address, connect_port, instance, comment, registered_at
             FROM forwarding_rules WHERE listen_port = ?1",
        )?;
        Ok(stmt.query_row(params![port], map_forwarding_row).optional()?)
    }

    /// All forwarding records, ordered by port.
    pub fn list_forwarding_records(&self) -> Result<Vec<ForwardingRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT listen_port, listen_address, connect_address, connect_port, instance, comment, registered_at
             FROM forwarding_rules ORDER BY listen_port",
        )?;
        let rows = stmt.query_map([], map_forwarding_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Record (or replace) a firewall rule by name.
    pub fn record_firewall(&self, entry: &FirewallRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO firewall_rules (rule_name, port, mode, instance, registered_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.rule_name,
                entry.port,
                entry.mode.as_str(),
                entry.instance,
                entry.registered_at,
            ],
        )?;
        tracing::debug!("Registered firewall rule '{}'", entry.rule_name);
        Ok(())
    }

    /// Delete the firewall record named `name`. Returns whether one existed.
    pub fn remove_firewall_record(&self, name: &str) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM firewall_rules WHERE rule_name = ?1",
            params![name],
        )?;
        Ok(deleted > 0)
    }

    /// All firewall records, ordered by name.
    pub fn list_firewall_records(&self) -> Result<Vec<FirewallRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT rule_name, port, mode, instance, registered_at
             FROM firewall_rules ORDER BY rule_name",
        )?;
        let rows = stmt.query_map([], map_firewall_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }
}

fn map_forwarding_row(row: &rusqlite::Row) -> rusqlite::Result<ForwardingRecord> {
    Ok(ForwardingRecord {
        listen_port: row.get(0)?,
        listen_address: row.get(1)?,
        connect_address: row.get(2)?,
        connect_port: row.get(3)?,
        instance: row.get(4)?,
        comment: row.get(5)?,
        registered_at: row.get(6)?,
    })
}

fn map_firewall_row(row: &rusqlite::Row) -> rusqlite::Result<FirewallRecord> {
    Ok(FirewallRecord {
        rule_name: row.get(0)?,
        port: row.get(1)?,
        mode: FirewallMode::from_stored(&row.get::<_, String>(2)?),
        instance: row.get(3)?,
        registered_at: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::super::tests::{make_firewall, make_forwarding, open_memory_db};
    use super::*;

    #[test]
    fn test_record_and_list_forwarding() {
        let db = open_memory_db();
        let entry = make_forwarding(2201, "172.20.1.5", 22, "Ubuntu");

        db.record_forwarding(&entry).unwrap();

        let records = db.list_forwarding_records().unwrap();
        assert_eq!(records, vec![entry.clone()]);
        assert_eq!(db.forwarding_record(2201).unwrap(), Some(entry));
        assert_eq!(db.forwarding_record(2202).unwrap(), None);
    }

    #[test]
    fn test_remove_forwarding_record() {
        let db = open_memory_db();
        db.record_forwarding(&make_forwarding(8080, "10.0.0.5", 8080, "A"))
            .unwrap();
        db.record_forwarding(&make_forwarding(9090, "10.0.0.5", 9090, "A"))
            .unwrap();

        assert!(db.remove_forwarding_record(8080).unwrap());
        assert!(!db.remove_forwarding_record(8080).unwrap());

        let ports: Vec<u16> = db
            .list_forwarding_records()
            .unwrap()
            .iter()
            .map(|r| r.listen_port)
            .collect();
        assert_eq!(ports, vec![9090]);
    }

    #[test]
    fn test_record_forwarding_upsert_by_port() {
        let db = open_memory_db();
        db.record_forwarding(&make_forwarding(8080, "10.0.0.5", 8080, "A"))
            .unwrap();
        db.record_forwarding(&make_forwarding(8080, "10.0.0.9", 80, "B"))
            .unwrap();

        let records = db.list_forwarding_records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].connect_address, "10.0.0.9");
        assert_eq!(records[0].connect_port, 80);
        assert_eq!(records[0].instance, "B");
    }

    #[test]
    fn test_forwarding_records_ordered_by_port() {
        let db = open_memory_db();
        for port in [9000, 22, 443] {
            db.record_forwarding(&make_forwarding(port, "10.0.0.1", port, "A"))
                .unwrap();
        }
        let ports: Vec<u16> = db
            .list_forwarding_records()
            .unwrap()
            .iter()
            .map(|r| r.listen_port)
            .collect();
        assert_eq!(ports, vec![22, 443, 9000]);
    }

    #[test]
    fn test_record_and_remove_firewall() {
        let db = open_memory_db();
        let ubuntu = make_firewall(2201, "Ubuntu", FirewallMode::Local);
        let debian = make_firewall(2201, "Debian", FirewallMode::Any);
        db.record_firewall(&ubuntu).unwrap();
        db.record_firewall(&debian).unwrap();
        db.record_firewall(&make_firewall(80, "Ubuntu", FirewallMode::Any))
            .unwrap();

        assert_eq!(db.list_firewall_records().unwrap().len(), 3);

        assert!(db.remove_firewall_record(&ubuntu.rule_name).unwrap());
        let remaining: Vec<FirewallRecord> = db
            .list_firewall_records()
            .unwrap()
            .into_iter()
            .filter(|r| r.port == 2201)
            .collect();
        assert_eq!(remaining, vec![debian]);
        assert!(!db.remove_firewall_record(&ubuntu.rule_name).unwrap());
    }

    #[test]
    fn test_firewall_mode_persisted() {
        let db = open_memory_db();
        db.record_firewall(&make_firewall(443, "A", FirewallMode::Any))
            .unwrap();
        db.record_firewall(&make_firewall(443, "A", FirewallMode::Local))
            .unwrap();

        let records = db.list_firewall_records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].mode, FirewallMode::Local);
    }
}
