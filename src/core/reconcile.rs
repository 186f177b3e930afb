//! Diff desired against live state and apply the minimal set of mutations.
//!
//! Forwarding rules are processed first, in ascending port order, then
//! firewall rules. Every operation is attempted independently: one failing
//! port is reported and the rest of the cycle continues. A mutation only
//! counts as done once its registry write has succeeded.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::desired::{Conflict, DesiredState};
use super::model::{FirewallRule, ForwardingRule};
use crate::db::{chrono_timestamp, Database, FirewallRecord, ForwardingRecord};
use crate::error::EngineError;
use crate::host::{manual_firewall_add_command, manual_firewall_remove_command, NetworkTools};

/// Installed state read at the start of a cycle.
#[derive(Debug, Clone, Default)]
pub struct LiveState {
    pub forwarding: BTreeMap<u16, ForwardingRule>,
    /// `None` when the firewall listing could not be read; the registry then
    /// stands in for "installed".
    pub firewall_names: Option<BTreeSet<String>>,
}

/// Which live ports the engine may touch this cycle.
#[derive(Debug, Clone, Default)]
pub struct ReconcileScope {
    /// Ports in configuration plus ports the registry says we own.
    pub managed_ports: BTreeSet<u16>,
    /// Ports frozen this cycle (instance address could not be resolved).
    pub held_ports: BTreeSet<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Add,
    Update,
    Remove,
    AddFirewall,
    RemoveFirewall,
    Registry,
}

/// One operation that did not complete.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failure {
    pub operation: Operation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_name: Option<String>,
    pub error: EngineError,
    /// Manual command that achieves what the engine could not.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForwardingUpdate {
    pub previous: ForwardingRule,
    pub current: ForwardingRule,
}

/// An instance left out of this cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedInstance {
    pub instance: String,
    pub error: EngineError,
}

/// Outcome of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub added: Vec<ForwardingRule>,
    pub updated: Vec<ForwardingUpdate>,
    pub removed: Vec<ForwardingRule>,
    pub firewall_added: Vec<FirewallRule>,
    pub firewall_removed: Vec<FirewallRule>,
    pub conflicts: Vec<Conflict>,
    pub skipped_instances: Vec<SkippedInstance>,
    pub failures: Vec<Failure>,
}

impl ReconcileReport {
    /// Live-state mutations that completed (registry included).
    pub fn mutation_count(&self) -> usize {
        self.added.len()
            + self.updated.len()
            + self.removed.len()
            + self.firewall_added.len()
            + self.firewall_removed.len()
    }

    pub fn is_in_sync(&self) -> bool {
        self.mutation_count() == 0 && self.failures.is_empty()
    }

    fn fail(&mut self, operation: Operation, port: Option<u16>, error: EngineError) {
        self.failures.push(Failure {
            operation,
            port,
            rule_name: None,
            error,
            remediation: None,
        });
    }
}

/// Applies desired state through [`NetworkTools`] and keeps the registry current.
pub struct Reconciler<'a, N: NetworkTools + ?Sized> {
    tools: &'a N,
    registry: &'a Database,
}

impl<'a, N: NetworkTools + ?Sized> Reconciler<'a, N> {
    pub fn new(tools: &'a N, registry: &'a Database) -> Self {
        Self { tools, registry }
    }

    pub async fn reconcile(
        &self,
        desired: &DesiredState,
        live: &LiveState,
        scope: &ReconcileScope,
    ) -> ReconcileReport {
        let mut report = ReconcileReport {
            conflicts: desired.conflicts.clone(),
            ..Default::default()
        };

        // Ports whose forwarding could not be established this cycle get no
        // new firewall rule either.
        let mut failed_ports = BTreeSet::new();

        for (port, wanted) in &desired.forwarding {
            let ok = match live.forwarding.get(port) {
                None => self.add(wanted, &mut report).await,
                Some(current) if !current.same_target(wanted) => {
                    self.update(current, wanted, &mut report).await
                }
                Some(current) => {
                    self.refresh_record(current, wanted, &mut report);
                    true
                }
            };
            if !ok {
                failed_ports.insert(*port);
            }
        }

        for (port, current) in &live.forwarding {
            if desired.forwarding.contains_key(port) || !scope.managed_ports.contains(port) {
                continue;
            }
            if scope.held_ports.contains(port) {
                tracing::info!("Holding port {port}: owning instance could not be resolved this cycle");
                continue;
            }
            self.remove(current, &mut report).await;
        }

        self.reconcile_firewall(desired, live, scope, &failed_ports, &mut report)
            .await;

        if report.is_in_sync() {
            tracing::info!("All port mappings are in sync");
        }
        report
    }

    async fn add(&self, wanted: &ForwardingRule, report: &mut ReconcileReport) -> bool {
        let port = wanted.external_port;
        tracing::info!("Adding port {}", wanted.describe());
        if let Err(e) = self.tools.add_forwarding_rule(wanted).await {
            tracing::warn!("Error adding port mapping {port}: {e}");
            report.fail(Operation::Add, Some(port), e);
            return false;
        }
        if let Err(e) = self.registry.record_forwarding(&forwarding_record(wanted)) {
            tracing::error!("Port {port} forwarded but not registered: {e:#}");
            report.fail(Operation::Add, Some(port), EngineError::registry(format!("{e:#}")));
            return false;
        }
        tracing::info!("Port {} now forwarded to {}:{}", port, wanted.target_address, wanted.internal_port);
        report.added.push(wanted.clone());
        true
    }

    /// Remove-then-add; portproxy has no atomic update.
    async fn update(
        &self,
        current: &ForwardingRule,
        wanted: &ForwardingRule,
        report: &mut ReconcileReport,
    ) -> bool {
        let port = wanted.external_port;
        tracing::info!(
            "Updating port {port}: {}:{} -> {}:{}",
            current.target_address,
            current.internal_port,
            wanted.target_address,
            wanted.internal_port
        );
        if let Err(e) = self.tools.remove_forwarding_rule(current).await {
            tracing::warn!("Error removing stale mapping for port {port}: {e}");
            report.fail(Operation::Update, Some(port), e);
            return false;
        }
        if let Err(e) = self.tools.add_forwarding_rule(wanted).await {
            tracing::warn!("Port {port} removed but re-adding failed: {e}");
            report.fail(Operation::Update, Some(port), e);
            // The old rule is gone; its record must go too.
            if let Err(e) = self.registry.remove_forwarding_record(port) {
                report.fail(Operation::Registry, Some(port), EngineError::registry(format!("{e:#}")));
            }
            return false;
        }
        if let Err(e) = self.registry.record_forwarding(&forwarding_record(wanted)) {
            tracing::error!("Port {port} updated but not registered: {e:#}");
            report.fail(Operation::Update, Some(port), EngineError::registry(format!("{e:#}")));
            return false;
        }
        tracing::info!("Port {} now forwarded to {}:{}", port, wanted.target_address, wanted.internal_port);
        report.updated.push(ForwardingUpdate {
            previous: current.clone(),
            current: wanted.clone(),
        });
        true
    }

    async fn remove(&self, current: &ForwardingRule, report: &mut ReconcileReport) {
        let port = current.external_port;
        tracing::info!("Removing port {port} (no running instance claims it)");
        if let Err(e) = self.tools.remove_forwarding_rule(current).await {
            tracing::warn!("Error removing port mapping {port}: {e}");
            report.fail(Operation::Remove, Some(port), e);
            return;
        }
        if let Err(e) = self.registry.remove_forwarding_record(port) {
            tracing::error!("Port {port} removed but registry not updated: {e:#}");
            report.fail(Operation::Remove, Some(port), EngineError::registry(format!("{e:#}")));
            return;
        }
        tracing::info!("Port {port} mapping removed");
        report.removed.push(current.clone());
    }

    /// Rewrite our record when an in-sync rule changed owner or comment.
    ///
    /// A live rule with no record is registered only when it is exactly what
    /// the engine would install (same listen address); anything else is left
    /// for audit to report.
    fn refresh_record(&self, current: &ForwardingRule, wanted: &ForwardingRule, report: &mut ReconcileReport) {
        let port = wanted.external_port;
        let existing = match self.registry.forwarding_record(port) {
            Ok(existing) => existing,
            Err(e) => {
                report.fail(Operation::Registry, Some(port), EngineError::registry(format!("{e:#}")));
                return;
            }
        };
        let fresh = forwarding_record(wanted);
        let Some(existing) = existing else {
            if current.listen_address != wanted.listen_address {
                return;
            }
            tracing::info!("Registering in-sync rule for port {port}");
            if let Err(e) = self.registry.record_forwarding(&fresh) {
                report.fail(Operation::Registry, Some(port), EngineError::registry(format!("{e:#}")));
            }
            return;
        };
        if existing.instance != fresh.instance
            || existing.connect_address != fresh.connect_address
            || existing.connect_port != fresh.connect_port
            || existing.comment != fresh.comment
        {
            tracing::debug!("Refreshing registry record for port {port}");
            if let Err(e) = self.registry.record_forwarding(&fresh) {
                report.fail(Operation::Registry, Some(port), EngineError::registry(format!("{e:#}")));
            }
        }
    }

    /// Create missing desired firewall rules and remove registered rules that are
    /// no longer desired. A mode change removes and re-creates the rule.
    async fn reconcile_firewall(
        &self,
        desired: &DesiredState,
        live: &LiveState,
        scope: &ReconcileScope,
        failed_ports: &BTreeSet<u16>,
        report: &mut ReconcileReport,
    ) {
        let registered: BTreeMap<String, FirewallRecord> = match self.registry.list_firewall_records() {
            Ok(records) => records.into_iter().map(|r| (r.rule_name.clone(), r)).collect(),
            Err(e) => {
                tracing::error!("Skipping firewall reconciliation, registry unreadable: {e:#}");
                report.fail(Operation::Registry, None, EngineError::registry(format!("{e:#}")));
                return;
            }
        };
        let is_installed = |name: &str| match &live.firewall_names {
            Some(names) => names.contains(name),
            None => registered.contains_key(name),
        };

        let mut removed_now = BTreeSet::new();
        for record in registered.values() {
            let still_wanted = desired
                .firewall
                .get(&record.rule_name)
                .is_some_and(|w| w.mode == record.mode);
            if still_wanted {
                continue;
            }
            if scope.held_ports.contains(&record.port) && !desired.forwarding.contains_key(&record.port) {
                tracing::info!(
                    "Holding firewall rule '{}': owning instance could not be resolved this cycle",
                    record.rule_name
                );
                continue;
            }
            let rule = FirewallRule {
                name: record.rule_name.clone(),
                port: record.port,
                mode: record.mode,
                owner_instance: record.instance.clone(),
            };
            let installed = is_installed(rule.name.as_str());
            if installed {
                tracing::info!("Removing firewall rule '{}'", rule.name);
                if let Err(e) = self.tools.remove_firewall_rule(&rule).await {
                    tracing::warn!("Failed to remove firewall rule '{}': {e}", rule.name);
                    report.failures.push(Failure {
                        operation: Operation::RemoveFirewall,
                        port: Some(rule.port),
                        remediation: Some(manual_firewall_remove_command(&rule)),
                        rule_name: Some(rule.name),
                        error: e,
                    });
                    continue;
                }
            }
            if let Err(e) = self.registry.remove_firewall_record(&rule.name) {
                report.failures.push(Failure {
                    operation: Operation::RemoveFirewall,
                    port: Some(rule.port),
                    rule_name: Some(rule.name),
                    error: EngineError::registry(format!("{e:#}")),
                    remediation: None,
                });
                continue;
            }
            removed_now.insert(rule.name.clone());
            if installed {
                report.firewall_removed.push(rule);
            } else {
                tracing::debug!("Dropped record for firewall rule '{}' (already gone)", rule.name);
            }
        }

        for wanted in desired.firewall.values() {
            if failed_ports.contains(&wanted.port) {
                continue;
            }
            if is_installed(wanted.name.as_str()) && !removed_now.contains(&wanted.name) {
                if !registered.contains_key(&wanted.name) {
                    tracing::info!("Registering existing firewall rule '{}'", wanted.name);
                    if let Err(e) = self.registry.record_firewall(&firewall_record(wanted)) {
                        report.failures.push(Failure {
                            operation: Operation::Registry,
                            port: Some(wanted.port),
                            rule_name: Some(wanted.name.clone()),
                            error: EngineError::registry(format!("{e:#}")),
                            remediation: None,
                        });
                    }
                }
                continue;
            }
            tracing::info!("Creating firewall rule '{}'", wanted.name);
            if let Err(e) = self.tools.add_firewall_rule(wanted).await {
                let remediation = manual_firewall_add_command(wanted);
                tracing::warn!(
                    "Failed to create firewall rule '{}': {e}. Run manually: {remediation}",
                    wanted.name
                );
                report.failures.push(Failure {
                    operation: Operation::AddFirewall,
                    port: Some(wanted.port),
                    rule_name: Some(wanted.name.clone()),
                    error: e,
                    remediation: Some(remediation),
                });
                continue;
            }
            if let Err(e) = self.registry.record_firewall(&firewall_record(wanted)) {
                report.failures.push(Failure {
                    operation: Operation::AddFirewall,
                    port: Some(wanted.port),
                    rule_name: Some(wanted.name.clone()),
                    error: EngineError::registry(format!("{e:#}")),
                    remediation: None,
                });
                continue;
            }
            report.firewall_added.push(wanted.clone());
        }
    }
}

fn forwarding_record(rule: &ForwardingRule) -> ForwardingRecord {
    ForwardingRecord {
        listen_port: rule.external_port,
        listen_address: rule.listen_address.clone(),
        connect_address: rule.target_address.clone(),
        connect_port: rule.internal_port,
        instance: rule.owner_instance.clone().unwrap_or_default(),
        comment: rule.comment.clone(),
        registered_at: chrono_timestamp(),
    }
}

fn firewall_record(rule: &FirewallRule) -> FirewallRecord {
    FirewallRecord {
        rule_name: rule.name.clone(),
        port: rule.port,
        mode: rule.mode,
        instance: rule.owner_instance.clone(),
        registered_at: chrono_timestamp(),
    }
}
