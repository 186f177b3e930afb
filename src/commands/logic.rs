//! Pure functions behind the CLI command handlers.
//!
//! These take plain parameters (no host, no registry file) and can be
//! unit-tested without touching the system.

use std::collections::{BTreeMap, BTreeSet};

use crate::core::audit::AuditReport;
use crate::core::desired::ConflictPolicy;
use crate::core::parse::InstalledFirewallRule;
use crate::host::manual_port_allow_command;

/// Process exit status for `validate` and `audit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Ok = 0,
    Error = 1,
    Warnings = 2,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Combine two results; an error outranks warnings, warnings outrank ok.
    pub fn worst(self, other: ExitStatus) -> ExitStatus {
        let rank = |s: ExitStatus| match s {
            ExitStatus::Ok => 0,
            ExitStatus::Warnings => 1,
            ExitStatus::Error => 2,
        };
        if rank(other) > rank(self) {
            other
        } else {
            self
        }
    }
}

/// Configured ports that no enabled inbound rule allows, ascending.
pub fn uncovered_ports(ports: &BTreeSet<u16>, rules: &[InstalledFirewallRule]) -> Vec<u16> {
    ports
        .iter()
        .copied()
        .filter(|port| !rules.iter().any(|r| r.enabled && r.local_ports.covers(*port)))
        .collect()
}

/// Human-readable lines for the potential-conflict preview.
pub fn conflict_lines(conflicts: &BTreeMap<u16, Vec<String>>, policy: ConflictPolicy) -> Vec<String> {
    let mut lines = Vec::new();
    for (port, instances) in conflicts {
        lines.push(format!("  Port {port}: {}", instances.join(", ")));
        let (label, winner) = match policy {
            ConflictPolicy::FirstListed => ("First", instances.first()),
            ConflictPolicy::LastListed => ("Last", instances.last()),
        };
        if let Some(winner) = winner {
            lines.push(format!(
                "    -> {label} instance ({winner}) will win, others ignored at runtime"
            ));
        }
    }
    lines
}

/// Suggested commands for ports the firewall does not allow.
pub fn firewall_suggestions(ports: &[u16]) -> Vec<String> {
    ports.iter().map(|p| manual_port_allow_command(*p)).collect()
}

/// Text rendering of an audit report.
pub fn audit_lines(report: &AuditReport) -> Vec<String> {
    let mut lines = Vec::new();
    lines.push(format!(
        "Forwarding: {} consistent, {} orphaned, {} drifted, {} unregistered",
        report.consistent_forwarding.len(),
        report.orphaned_forwarding.len(),
        report.drifted_forwarding.len(),
        report.unregistered_forwarding.len()
    ));
    for record in &report.orphaned_forwarding {
        lines.push(format!(
            "  orphaned   port {} -> {}:{} ({})",
            record.listen_port, record.connect_address, record.connect_port, record.instance
        ));
    }
    for drift in &report.drifted_forwarding {
        lines.push(format!(
            "  drifted    port {}: registered {}:{}, installed {}:{}",
            drift.record.listen_port,
            drift.record.connect_address,
            drift.record.connect_port,
            drift.live.target_address,
            drift.live.internal_port
        ));
    }
    for rule in &report.unregistered_forwarding {
        lines.push(format!("  unregistered port {}", rule.describe()));
    }

    if report.firewall_checked {
        lines.push(format!(
            "Firewall: {} consistent, {} orphaned, {} unregistered",
            report.consistent_firewall.len(),
            report.orphaned_firewall.len(),
            report.unregistered_firewall.len()
        ));
        for record in &report.orphaned_firewall {
            lines.push(format!("  orphaned   '{}'", record.rule_name));
        }
        for name in &report.unregistered_firewall {
            lines.push(format!("  unregistered '{name}'"));
        }
    } else {
        lines.push("Firewall: not checked (rule listing unavailable)".to_string());
    }
    lines
}
