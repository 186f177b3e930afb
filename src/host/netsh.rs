//! `netsh.exe` portproxy and advfirewall operations.

use std::collections::BTreeMap;

use async_trait::async_trait;

use super::{NetworkTools, WindowsHost};
use crate::core::model::{FirewallRule, ForwardingRule};
use crate::core::parse::{parse_firewall_rules, parse_forwarding_table, InstalledFirewallRule};
use crate::error::EngineError;

const NETSH: &str = "netsh";

pub(super) fn forwarding_add_args(rule: &ForwardingRule) -> Vec<String> {
    vec![
        NETSH.into(),
        "interface".into(),
        "portproxy".into(),
        "add".into(),
        "v4tov4".into(),
        format!("listenport={}", rule.external_port),
        format!("listenaddress={}", rule.listen_address),
        format!("connectport={}", rule.internal_port),
        format!("connectaddress={}", rule.target_address),
    ]
}

/// Always includes `listenaddress`; netsh silently ignores deletes whose
/// listen address does not match the installed entry.
pub(super) fn forwarding_remove_args(rule: &ForwardingRule) -> Vec<String> {
    vec![
        NETSH.into(),
        "interface".into(),
        "portproxy".into(),
        "delete".into(),
        "v4tov4".into(),
        format!("listenport={}", rule.external_port),
        format!("listenaddress={}", rule.listen_address),
    ]
}

pub(super) fn firewall_add_args(rule: &FirewallRule) -> Vec<String> {
    let mut args = vec![
        NETSH.into(),
        "advfirewall".into(),
        "firewall".into(),
        "add".into(),
        "rule".into(),
        format!("name={}", rule.name),
        "dir=in".into(),
        "action=allow".into(),
        "protocol=TCP".into(),
        format!("localport={}", rule.port),
    ];
    if let Some(remote) = rule.mode.remote_ip() {
        args.push(format!("remoteip={remote}"));
    }
    args
}

pub(super) fn firewall_remove_args(rule: &FirewallRule) -> Vec<String> {
    vec![
        NETSH.into(),
        "advfirewall".into(),
        "firewall".into(),
        "delete".into(),
        "rule".into(),
        format!("name={}", rule.name),
        "protocol=TCP".into(),
        format!("localport={}", rule.port),
    ]
}

impl WindowsHost {
    async fn netsh(&self, argv: &[String]) -> Result<String, EngineError> {
        let args: Vec<&str> = argv[1..].iter().map(String::as_str).collect();
        self.runner
            .run(&argv[0], &args)
            .await
            .map(|output| output.stdout)
            .map_err(|e| EngineError::Mutation(e.to_string()))
    }
}

#[async_trait]
impl NetworkTools for WindowsHost {
    async fn list_forwarding_rules(&self) -> Result<BTreeMap<u16, ForwardingRule>, EngineError> {
        let output = self
            .runner
            .run(NETSH, &["interface", "portproxy", "show", "v4tov4"])
            .await
            .map_err(|e| EngineError::Discovery(format!("failed to read portproxy table: {e}")))?;
        Ok(parse_forwarding_table(&output.stdout))
    }

    async fn add_forwarding_rule(&self, rule: &ForwardingRule) -> Result<(), EngineError> {
        self.netsh(&forwarding_add_args(rule)).await.map(|_| ())
    }

    async fn remove_forwarding_rule(&self, rule: &ForwardingRule) -> Result<(), EngineError> {
        self.netsh(&forwarding_remove_args(rule)).await.map(|_| ())
    }

    async fn list_firewall_rules(&self) -> Result<Vec<InstalledFirewallRule>, EngineError> {
        let output = self
            .runner
            .run(
                NETSH,
                &["advfirewall", "firewall", "show", "rule", "name=all", "dir=in"],
            )
            .await
            .map_err(|e| EngineError::Discovery(format!("failed to read firewall rules: {e}")))?;
        Ok(parse_firewall_rules(&output.stdout))
    }

    async fn add_firewall_rule(&self, rule: &FirewallRule) -> Result<(), EngineError> {
        self.netsh(&firewall_add_args(rule)).await.map(|_| ())
    }

    async fn remove_firewall_rule(&self, rule: &FirewallRule) -> Result<(), EngineError> {
        self.netsh(&firewall_remove_args(rule)).await.map(|_| ())
    }
}
