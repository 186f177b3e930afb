//! `audit`: compare the ownership registry with installed rules.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::cli::AuditArgs;
use crate::config;
use crate::core::audit::{audit as audit_registry, cleanup, AuditReport, CleanupReport};
use crate::core::desired::configured_ports;
use crate::core::parse::firewall_rule_names;
use crate::db::Database;
use crate::host::{NetworkTools, WindowsHost};
use crate::settings::Settings;

use super::logic::{audit_lines, ExitStatus};

#[derive(Debug, Serialize)]
struct AuditOutput<'a> {
    audit: &'a AuditReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    cleanup: Option<&'a CleanupReport>,
}

pub async fn audit(args: &AuditArgs) -> Result<ExitStatus> {
    let (managed, timeout) = match &args.config {
        Some(path) => {
            let settings = Settings::load(path)?;
            (Some(configured_ports(&settings.instances)), settings.command_timeout())
        }
        None => (None, Duration::from_secs(config::DEFAULT_COMMAND_TIMEOUT_SECS)),
    };
    let registry_path = args.registry.path();
    let registry = Database::open(&registry_path)
        .with_context(|| format!("opening ownership registry {}", registry_path.display()))?;
    let host = WindowsHost::new(timeout);

    let (report, cleaned) = audit_with(&host, &registry, managed.as_ref(), args.cleanup).await?;

    if args.json {
        let output = AuditOutput {
            audit: &report,
            cleanup: cleaned.as_ref(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        for line in audit_lines(&report) {
            println!("{line}");
        }
        if let Some(cleaned) = &cleaned {
            println!(
                "Cleanup: removed {} forwarding and {} firewall registry entries",
                cleaned.forwarding_removed.len(),
                cleaned.firewall_removed.len()
            );
        }
    }

    Ok(if report.is_clean() || (cleaned.is_some() && only_orphans(&report)) {
        ExitStatus::Ok
    } else {
        ExitStatus::Warnings
    })
}

/// Read live state through `tools`, audit, and optionally clean up.
async fn audit_with<N: NetworkTools + ?Sized>(
    tools: &N,
    registry: &Database,
    managed: Option<&BTreeSet<u16>>,
    run_cleanup: bool,
) -> Result<(AuditReport, Option<CleanupReport>)> {
    let live_forwarding = tools.list_forwarding_rules().await?;
    let live_firewall = match tools.list_firewall_rules().await {
        Ok(rules) => Some(firewall_rule_names(&rules)),
        Err(e) => {
            tracing::warn!("Firewall rules unavailable: {e}");
            None
        }
    };
    let report = audit_registry(registry, &live_forwarding, live_firewall.as_ref(), managed)?;
    let cleaned = if run_cleanup {
        Some(cleanup(registry, &report)?)
    } else {
        None
    };
    Ok((report, cleaned))
}

fn only_orphans(report: &AuditReport) -> bool {
    report.drifted_forwarding.is_empty()
        && report.unregistered_forwarding.is_empty()
        && report.unregistered_firewall.is_empty()
}
