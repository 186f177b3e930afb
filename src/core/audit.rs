//! Registry audit and orphan cleanup.
//!
//! [`audit`] compares the ownership registry with live host state and never
//! mutates anything. [`cleanup`] deletes orphaned registry entries only; it
//! does not touch live forwarding or firewall rules.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use serde::Serialize;

use super::model::{is_engine_rule_name, ForwardingRule};
use crate::db::{Database, FirewallRecord, ForwardingRecord};

/// A registered forwarding rule whose live counterpart points somewhere else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriftedForwarding {
    pub record: ForwardingRecord,
    pub live: ForwardingRule,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub consistent_forwarding: Vec<ForwardingRecord>,
    /// Registered, but nothing listens on the port any more.
    pub orphaned_forwarding: Vec<ForwardingRecord>,
    pub drifted_forwarding: Vec<DriftedForwarding>,
    /// Live rules in managed scope that the registry does not know about.
    pub unregistered_forwarding: Vec<ForwardingRule>,
    pub consistent_firewall: Vec<FirewallRecord>,
    pub orphaned_firewall: Vec<FirewallRecord>,
    /// Live rules carrying the engine's name prefix with no record.
    pub unregistered_firewall: Vec<String>,
    /// False when the firewall listing could not be read; firewall
    /// classification was skipped.
    pub firewall_checked: bool,
}

impl AuditReport {
    pub fn orphan_count(&self) -> usize {
        self.orphaned_forwarding.len() + self.orphaned_firewall.len()
    }

    pub fn is_clean(&self) -> bool {
        self.orphan_count() == 0
            && self.drifted_forwarding.is_empty()
            && self.unregistered_forwarding.is_empty()
            && self.unregistered_firewall.is_empty()
    }
}

/// What [`cleanup`] removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub forwarding_removed: Vec<u16>,
    pub firewall_removed: Vec<String>,
}

/// Classify registry entries against live state.
///
/// `managed_ports` limits which unregistered live forwarding rules are
/// reported; `None` reports every live rule without a record.
pub fn audit(
    registry: &Database,
    live_forwarding: &BTreeMap<u16, ForwardingRule>,
    live_firewall: Option<&BTreeSet<String>>,
    managed_ports: Option<&BTreeSet<u16>>,
) -> Result<AuditReport> {
    let forwarding = registry.list_forwarding_records()?;
    let firewall = registry.list_firewall_records()?;
    let mut report = AuditReport {
        firewall_checked: live_firewall.is_some(),
        ..Default::default()
    };

    let registered_ports: BTreeSet<u16> = forwarding.iter().map(|r| r.listen_port).collect();
    for record in forwarding {
        match live_forwarding.get(&record.listen_port) {
            None => report.orphaned_forwarding.push(record),
            Some(live)
                if live.target_address == record.connect_address
                    && live.internal_port == record.connect_port =>
            {
                report.consistent_forwarding.push(record)
            }
            Some(live) => report.drifted_forwarding.push(DriftedForwarding {
                record,
                live: live.clone(),
            }),
        }
    }
    report.unregistered_forwarding = live_forwarding
        .iter()
        .filter(|(port, _)| !registered_ports.contains(*port))
        .filter(|(port, _)| managed_ports.map_or(true, |scope| scope.contains(*port)))
        .map(|(_, rule)| rule.clone())
        .collect();

    if let Some(live_names) = live_firewall {
        let registered_names: BTreeSet<&str> = firewall.iter().map(|r| r.rule_name.as_str()).collect();
        report.unregistered_firewall = live_names
            .iter()
            .filter(|name| is_engine_rule_name(name) && !registered_names.contains(name.as_str()))
            .cloned()
            .collect();
        for record in firewall {
            if live_names.contains(&record.rule_name) {
                report.consistent_firewall.push(record);
            } else {
                report.orphaned_firewall.push(record);
            }
        }
    } else {
        tracing::warn!("Firewall rules unavailable; firewall records not audited");
        report.consistent_firewall = firewall;
    }

    tracing::info!(
        "Audit: {} consistent, {} orphaned, {} drifted, {} unregistered",
        report.consistent_forwarding.len() + report.consistent_firewall.len(),
        report.orphan_count(),
        report.drifted_forwarding.len(),
        report.unregistered_forwarding.len() + report.unregistered_firewall.len()
    );
    Ok(report)
}

/// Delete the orphaned registry entries named by `report`.
pub fn cleanup(registry: &Database, report: &AuditReport) -> Result<CleanupReport> {
    let mut cleaned = CleanupReport::default();
    for record in &report.orphaned_forwarding {
        if registry.remove_forwarding_record(record.listen_port)? {
            tracing::info!("Removed orphaned registry entry for port {}", record.listen_port);
            cleaned.forwarding_removed.push(record.listen_port);
        }
    }
    for record in &report.orphaned_firewall {
        if registry.remove_firewall_record(&record.rule_name)? {
            tracing::info!("Removed orphaned registry entry for firewall rule '{}'", record.rule_name);
            cleaned.firewall_removed.push(record.rule_name.clone());
        }
    }
    Ok(cleaned)
}
