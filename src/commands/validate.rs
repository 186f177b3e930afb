//! `validate`: check a configuration file and firewall coverage, then exit.

use crate::cli::ValidateArgs;
use crate::core::desired::{configured_ports, potential_conflicts};
use crate::host::{NetworkTools, WindowsHost};
use crate::settings::Settings;

use super::logic::{conflict_lines, firewall_suggestions, uncovered_ports, ExitStatus};

pub async fn validate(args: &ValidateArgs) -> ExitStatus {
    println!("WSL2 Port Mapper - Configuration Validation");
    println!("Config file: {}\n", args.config.display());

    let settings = match Settings::load(&args.config) {
        Ok(settings) => settings,
        Err(e) => {
            println!("ERROR: {e}");
            return ExitStatus::Error;
        }
    };
    println!("OK: configuration syntax and structure are valid");
    println!("OK: check interval {} seconds", settings.check_interval_seconds);
    println!(
        "OK: {} configured instances, {} port mappings\n",
        settings.instances.len(),
        settings.port_count()
    );

    let mut status = ExitStatus::Ok;
    let conflicts = potential_conflicts(&settings.instances);
    if conflicts.is_empty() {
        println!("OK: no external port conflicts detected");
    } else {
        status = ExitStatus::Warnings;
        println!("WARNING: potential external port conflicts (if instances run simultaneously):");
        for line in conflict_lines(&conflicts, settings.conflict_policy) {
            println!("{line}");
        }
        println!("  Conflicts are allowed when the instances do not run at the same time.");
    }

    let host = WindowsHost::new(settings.command_timeout());
    status = status.worst(check_firewall(&host, &settings).await);

    println!();
    match status {
        ExitStatus::Ok => println!("Configuration is valid and ready for use"),
        ExitStatus::Warnings => println!("Configuration is valid but has warnings"),
        ExitStatus::Error => println!("Configuration has errors that must be fixed"),
    }
    status
}

/// Report configured ports that no enabled inbound firewall rule allows.
async fn check_firewall<N: NetworkTools + ?Sized>(tools: &N, settings: &Settings) -> ExitStatus {
    let ports = configured_ports(&settings.instances);
    println!("\nChecking Windows Firewall rules...");
    if ports.is_empty() {
        println!("OK: no ports to check");
        return ExitStatus::Ok;
    }

    let rules = match tools.list_firewall_rules().await {
        Ok(rules) => rules,
        Err(e) => {
            println!("WARNING: unable to check firewall rules: {e}");
            println!("  Please verify firewall rules manually");
            return ExitStatus::Warnings;
        }
    };

    let blocked = uncovered_ports(&ports, &rules);
    if blocked.is_empty() {
        println!("OK: all configured ports are allowed by Windows Firewall");
        return ExitStatus::Ok;
    }
    println!("WARNING: {} port(s) may be blocked by Windows Firewall:", blocked.len());
    for port in &blocked {
        println!("  - Port {port} (TCP)");
    }
    println!("\nSuggested commands to allow these ports:");
    for command in firewall_suggestions(&blocked) {
        println!("  {command}");
    }
    ExitStatus::Warnings
}
