//! Host integration: instance discovery and network-rule tooling.
//!
//! - [`InstanceDiscovery`]: which WSL instances run and their addresses
//! - [`NetworkTools`]: portproxy forwarding rules and advfirewall rules
//! - [`WindowsHost`]: both, backed by `wsl.exe` and `netsh.exe`
//!
//! Implementations own invocation; parsing lives in [`crate::core::parse`].

mod netsh;
pub mod runner;
mod wsl;

#[cfg(test)]
pub(crate) mod fake;

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::model::{FirewallRule, ForwardingRule};
use crate::core::parse::InstalledFirewallRule;
use crate::error::EngineError;

pub use runner::CommandRunner;

/// Instance-manager queries. Errors are `Discovery` / `AddressResolution`.
#[async_trait]
pub trait InstanceDiscovery {
    async fn list_running_instances(&self) -> Result<BTreeSet<String>, EngineError>;

    async fn resolve_instance_address(&self, name: &str) -> Result<Ipv4Addr, EngineError>;
}

/// Forwarding and firewall rule operations. Mutation errors are `Mutation`.
///
/// Listing failures are reported as `Discovery`: without the live table the
/// cycle cannot be diffed.
#[async_trait]
pub trait NetworkTools {
    async fn list_forwarding_rules(&self) -> Result<BTreeMap<u16, ForwardingRule>, EngineError>;

    async fn add_forwarding_rule(&self, rule: &ForwardingRule) -> Result<(), EngineError>;

    /// Remove the rule listening on `rule.listen_address:rule.external_port`.
    async fn remove_forwarding_rule(&self, rule: &ForwardingRule) -> Result<(), EngineError>;

    async fn list_firewall_rules(&self) -> Result<Vec<InstalledFirewallRule>, EngineError>;

    async fn add_firewall_rule(&self, rule: &FirewallRule) -> Result<(), EngineError>;

    async fn remove_firewall_rule(&self, rule: &FirewallRule) -> Result<(), EngineError>;
}

/// Production host: `wsl.exe` for discovery, `netsh.exe` for rules.
#[derive(Debug, Clone)]
pub struct WindowsHost {
    runner: CommandRunner,
}

impl WindowsHost {
    pub fn new(timeout: Duration) -> Self {
        Self {
            runner: CommandRunner::new(timeout),
        }
    }
}

/// Equivalent manual command for a firewall rule the engine failed to create.
pub fn manual_firewall_add_command(rule: &FirewallRule) -> String {
    netsh::firewall_add_args(rule)
        .iter()
        .map(|arg| quote_arg(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Equivalent manual command for a firewall rule the engine failed to remove.
pub fn manual_firewall_remove_command(rule: &FirewallRule) -> String {
    netsh::firewall_remove_args(rule)
        .iter()
        .map(|arg| quote_arg(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Suggested command to allow an uncovered port (used by `validate`).
pub fn manual_port_allow_command(port: u16) -> String {
    format!(
        "netsh advfirewall firewall add rule name=\"WSL2 Port {port}\" dir=in action=allow protocol=TCP localport={port}"
    )
}

fn quote_arg(arg: &str) -> String {
    match arg.split_once('=') {
        Some((key, value)) if value.contains(' ') => format!("{key}=\"{value}\""),
        _ => arg.to_string(),
    }
}
