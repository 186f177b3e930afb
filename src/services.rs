//! Reconciliation cycle and service loop.
//!
//! `run_cycle` performs one pass: discover running instances, resolve their
//! addresses, read live state, build desired state and reconcile. The
//! `ServiceLoop` repeats it every `check_interval_seconds`, reloading settings
//! before each cycle and observing shutdown only between cycles.

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::watch;

use crate::core::desired::{build_desired_state, configured_ports};
use crate::core::parse::firewall_rule_names;
use crate::core::reconcile::{LiveState, ReconcileReport, ReconcileScope, Reconciler, SkippedInstance};
use crate::db::Database;
use crate::error::EngineError;
use crate::host::{InstanceDiscovery, NetworkTools, WindowsHost};
use crate::settings::{AddressFailurePolicy, Settings};

/// Everything one cycle needs, passed explicitly.
pub struct CycleContext<'a, H: ?Sized> {
    pub host: &'a H,
    pub registry: &'a Database,
    pub settings: &'a Settings,
}

/// Run one reconciliation cycle.
///
/// Fails only when running instances or the live forwarding table cannot be
/// read; every per-instance and per-port problem lands in the report.
pub async fn run_cycle<H>(ctx: &CycleContext<'_, H>) -> Result<ReconcileReport, EngineError>
where
    H: InstanceDiscovery + NetworkTools + ?Sized,
{
    let settings = ctx.settings;
    let running = ctx.host.list_running_instances().await?;

    let mut addresses: BTreeMap<String, Ipv4Addr> = BTreeMap::new();
    let mut held_ports = BTreeSet::new();
    let mut skipped = Vec::new();
    for instance in &settings.instances {
        if !running.contains(&instance.name) || addresses.contains_key(&instance.name) {
            continue;
        }
        match ctx.host.resolve_instance_address(&instance.name).await {
            Ok(address) => {
                addresses.insert(instance.name.clone(), address);
            }
            Err(e) => {
                tracing::warn!("Failed to get IP for instance {}: {e}", instance.name);
                if settings.address_failure == AddressFailurePolicy::HoldPorts {
                    held_ports.extend(instance.ports.iter().map(|p| p.external_port));
                }
                skipped.push(SkippedInstance {
                    instance: instance.name.clone(),
                    error: e,
                });
            }
        }
    }

    let forwarding = ctx.host.list_forwarding_rules().await?;
    let firewall_names = match ctx.host.list_firewall_rules().await {
        Ok(rules) => Some(firewall_rule_names(&rules)),
        Err(e) => {
            tracing::warn!("Firewall rules unavailable this cycle: {e}");
            None
        }
    };
    log_current_state(settings, &addresses);

    let desired = build_desired_state(&settings.instances, &addresses, settings.conflict_policy);

    let mut managed_ports = configured_ports(&settings.instances);
    match ctx.registry.list_forwarding_records() {
        Ok(records) => managed_ports.extend(records.iter().map(|r| r.listen_port)),
        Err(e) => tracing::warn!("Registry unreadable, managing configured ports only: {e:#}"),
    }
    let scope = ReconcileScope {
        managed_ports,
        held_ports,
    };
    let live = LiveState {
        forwarding,
        firewall_names,
    };

    let mut report = Reconciler::new(ctx.host, ctx.registry)
        .reconcile(&desired, &live, &scope)
        .await;
    report.skipped_instances = skipped;
    Ok(report)
}

fn log_current_state(settings: &Settings, addresses: &BTreeMap<String, Ipv4Addr>) {
    if addresses.is_empty() {
        tracing::info!("No configured WSL2 instances currently running");
        return;
    }
    let names: Vec<&str> = addresses.keys().map(String::as_str).collect();
    tracing::info!("Running WSL2 instances: {}", names.join(", "));
    for instance in &settings.instances {
        let Some(address) = addresses.get(&instance.name) else {
            continue;
        };
        for spec in &instance.ports {
            tracing::debug!(
                "  {}: {} -> {}:{}",
                instance.name,
                spec.external_port,
                address,
                spec.effective_internal_port()
            );
        }
    }
}

/// Summarize a cycle report in the log.
pub fn log_report(report: &ReconcileReport) {
    for failure in &report.failures {
        match &failure.remediation {
            Some(command) => tracing::warn!("{:?} failed: {} (manual fix: {command})", failure.operation, failure.error),
            None => tracing::warn!("{:?} failed: {}", failure.operation, failure.error),
        }
    }
    if report.is_in_sync() {
        return;
    }
    tracing::info!(
        "Cycle complete: {} added, {} updated, {} removed, {} firewall rules created, {} firewall rules removed, {} failures",
        report.added.len(),
        report.updated.len(),
        report.removed.len(),
        report.firewall_added.len(),
        report.firewall_removed.len(),
        report.failures.len()
    );
}

/// Repeats [`run_cycle`] until shutdown is requested.
pub struct ServiceLoop {
    config_path: PathBuf,
    registry: Database,
    settings: Settings,
}

impl ServiceLoop {
    /// Load the initial settings; a bad file here is fatal.
    pub fn new(config_path: &Path, registry: Database) -> Result<Self, EngineError> {
        let settings = Settings::load(config_path)?;
        Ok(Self {
            config_path: config_path.to_path_buf(),
            registry,
            settings,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Re-read the settings file. On failure the previous settings stay in
    /// effect; returns whether the settings changed.
    pub fn reload_settings(&mut self) -> bool {
        match Settings::load(&self.config_path) {
            Ok(settings) if settings != self.settings => {
                tracing::info!("Configuration reloaded from {}", self.config_path.display());
                self.settings = settings;
                true
            }
            Ok(_) => false,
            Err(e) => {
                tracing::warn!("Failed to reload configuration: {e}. Using previous configuration");
                false
            }
        }
    }

    /// One cycle against `host` with the current settings.
    pub async fn cycle<H>(&self, host: &H) -> Option<ReconcileReport>
    where
        H: InstanceDiscovery + NetworkTools + ?Sized,
    {
        let ctx = CycleContext {
            host,
            registry: &self.registry,
            settings: &self.settings,
        };
        match run_cycle(&ctx).await {
            Ok(report) => {
                log_report(&report);
                Some(report)
            }
            Err(e) => {
                tracing::error!("Cycle aborted, retrying next interval: {e}");
                None
            }
        }
    }

    /// Run against the Windows host until `shutdown` flips to `true`.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("Config file: {}", self.config_path.display());
        tracing::info!("Check interval: {} seconds", self.settings.check_interval_seconds);
        tracing::info!("Configured instances: {}", self.settings.instances.len());

        let mut first = true;
        loop {
            if !first {
                self.reload_settings();
            }
            first = false;

            let host = WindowsHost::new(self.settings.command_timeout());
            self.cycle(&host).await;

            tracing::debug!("Waiting {} seconds...", self.settings.check_interval_seconds);
            if wait_for_next_cycle(self.settings.check_interval(), &mut shutdown).await {
                tracing::info!("Received shutdown signal. Exiting gracefully");
                break;
            }
        }
    }
}

/// Sleep for `interval`, returning early with `true` when shutdown is requested.
pub async fn wait_for_next_cycle(interval: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(interval) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}
