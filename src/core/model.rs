//! Configuration and state types shared by the builder, reconciler and audit.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::config;

/// How (and whether) an inbound firewall allow-rule is created for a port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FirewallMode {
    /// No firewall automation for this port.
    #[default]
    None,
    /// Allow inbound traffic from the local subnet only.
    #[serde(alias = "local-subnet", alias = "localsubnet")]
    Local,
    /// Allow inbound traffic from any source.
    Any,
}

impl FirewallMode {
    /// Value passed to `netsh advfirewall ... remoteip=`.
    pub fn remote_ip(self) -> Option<&'static str> {
        match self {
            FirewallMode::None => None,
            FirewallMode::Local => Some("localsubnet"),
            FirewallMode::Any => Some("any"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FirewallMode::None => "none",
            FirewallMode::Local => "local",
            FirewallMode::Any => "any",
        }
    }

    /// Inverse of [`FirewallMode::as_str`]; unknown values map to `None`.
    pub fn from_stored(value: &str) -> Self {
        match value {
            "local" => FirewallMode::Local,
            "any" => FirewallMode::Any,
            _ => FirewallMode::None,
        }
    }
}

/// One port mapping requested in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    /// Host-facing listen port (the forwarding key).
    #[serde(rename = "port")]
    pub external_port: u16,
    /// Port inside the instance. `None` or `0` means "same as external".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_port: Option<u16>,
    #[serde(default, rename = "firewall")]
    pub firewall_mode: FirewallMode,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub comment: String,
}

impl PortSpec {
    pub fn new(external_port: u16) -> Self {
        Self {
            external_port,
            internal_port: None,
            firewall_mode: FirewallMode::None,
            comment: String::new(),
        }
    }

    pub fn mapped_to(mut self, internal_port: u16) -> Self {
        self.internal_port = Some(internal_port);
        self
    }

    pub fn with_firewall(mut self, mode: FirewallMode) -> Self {
        self.firewall_mode = mode;
        self
    }

    /// Effective connect port, defaulting to the external port.
    pub fn effective_internal_port(&self) -> u16 {
        match self.internal_port {
            Some(p) if p != 0 => p,
            _ => self.external_port,
        }
    }
}

/// One named WSL instance and the ports it wants forwarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub comment: String,
    #[serde(default)]
    pub ports: Vec<PortSpec>,
}

impl InstanceSpec {
    pub fn new(name: &str, ports: Vec<PortSpec>) -> Self {
        Self {
            name: name.to_string(),
            comment: String::new(),
            ports,
        }
    }
}

/// A host-level TCP forwarding rule, as installed or as desired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForwardingRule {
    pub listen_address: String,
    pub external_port: u16,
    pub internal_port: u16,
    pub target_address: String,
    /// Set on desired rules; live rules carry no owner.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_instance: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub comment: String,
}

impl ForwardingRule {
    /// A rule as read back from the host table.
    pub fn live(listen_address: &str, external_port: u16, target_address: &str, internal_port: u16) -> Self {
        Self {
            listen_address: listen_address.to_string(),
            external_port,
            internal_port,
            target_address: target_address.to_string(),
            owner_instance: None,
            comment: String::new(),
        }
    }

    /// A rule the engine wants installed for `instance`.
    pub fn desired(instance: &str, spec: &PortSpec, address: Ipv4Addr) -> Self {
        Self {
            listen_address: config::DEFAULT_LISTEN_ADDRESS.to_string(),
            external_port: spec.external_port,
            internal_port: spec.effective_internal_port(),
            target_address: address.to_string(),
            owner_instance: Some(instance.to_string()),
            comment: spec.comment.clone(),
        }
    }

    /// True when both rules send traffic to the same place.
    pub fn same_target(&self, other: &ForwardingRule) -> bool {
        self.target_address == other.target_address && self.internal_port == other.internal_port
    }

    /// `port -> address:port` for log lines.
    pub fn describe(&self) -> String {
        if self.external_port == self.internal_port {
            format!("{} -> {}:{}", self.external_port, self.target_address, self.internal_port)
        } else {
            format!(
                "{} -> {}:{} (external:{} -> internal:{})",
                self.external_port,
                self.target_address,
                self.internal_port,
                self.external_port,
                self.internal_port
            )
        }
    }
}

/// An inbound allow-rule for one forwarded port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FirewallRule {
    pub name: String,
    pub port: u16,
    pub mode: FirewallMode,
    pub owner_instance: String,
}

impl FirewallRule {
    pub fn new(port: u16, instance: &str, mode: FirewallMode) -> Self {
        Self {
            name: firewall_rule_name(port, instance),
            port,
            mode,
            owner_instance: instance.to_string(),
        }
    }
}

/// Deterministic firewall rule name for `port` owned by `instance`.
pub fn firewall_rule_name(port: u16, instance: &str) -> String {
    format!("{} {port} ({instance})", config::FIREWALL_RULE_PREFIX)
}

/// True when `name` follows the engine's firewall naming convention.
pub fn is_engine_rule_name(name: &str) -> bool {
    name.starts_with(config::FIREWALL_RULE_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_port_defaults_to_external() {
        assert_eq!(PortSpec::new(8080).effective_internal_port(), 8080);
        assert_eq!(PortSpec::new(2201).mapped_to(22).effective_internal_port(), 22);
        assert_eq!(PortSpec::new(8080).mapped_to(0).effective_internal_port(), 8080);
    }

    #[test]
    fn test_port_spec_deserializes_original_keys() {
        let spec: PortSpec =
            serde_json::from_str(r#"{"port": 2201, "internal_port": 22, "firewall": "local", "comment": "ssh"}"#)
                .unwrap();
        assert_eq!(spec.external_port, 2201);
        assert_eq!(spec.effective_internal_port(), 22);
        assert_eq!(spec.firewall_mode, FirewallMode::Local);
        assert_eq!(spec.comment, "ssh");
    }

    #[test]
    fn test_firewall_mode_aliases_and_default() {
        let spec: PortSpec = serde_json::from_str(r#"{"port": 80}"#).unwrap();
        assert_eq!(spec.firewall_mode, FirewallMode::None);
        let mode: FirewallMode = serde_json::from_str(r#""local-subnet""#).unwrap();
        assert_eq!(mode, FirewallMode::Local);
        assert!(serde_json::from_str::<FirewallMode>(r#""public""#).is_err());
    }

    #[test]
    fn test_firewall_mode_stored_round_trip() {
        for mode in [FirewallMode::None, FirewallMode::Local, FirewallMode::Any] {
            assert_eq!(FirewallMode::from_stored(mode.as_str()), mode);
        }
        assert_eq!(FirewallMode::Local.remote_ip(), Some("localsubnet"));
        assert_eq!(FirewallMode::None.remote_ip(), None);
    }

    #[test]
    fn test_out_of_range_port_is_rejected_by_serde() {
        assert!(serde_json::from_str::<PortSpec>(r#"{"port": 70000}"#).is_err());
        assert!(serde_json::from_str::<PortSpec>(r#"{"port": -1}"#).is_err());
    }

    #[test]
    fn test_firewall_rule_name_is_deterministic() {
        let a = FirewallRule::new(2201, "Ubuntu", FirewallMode::Local);
        let b = FirewallRule::new(2201, "Ubuntu", FirewallMode::Any);
        assert_eq!(a.name, "WSL2 PortMapper 2201 (Ubuntu)");
        assert_eq!(a.name, b.name);
        assert_ne!(a.name, firewall_rule_name(2201, "Debian"));
        assert!(is_engine_rule_name(&a.name));
        assert!(!is_engine_rule_name("Remote Desktop - User Mode (TCP-In)"));
    }

    #[test]
    fn test_desired_rule_carries_owner_and_effective_ports() {
        let spec = PortSpec::new(2201).mapped_to(22);
        let rule = ForwardingRule::desired("Ubuntu", &spec, Ipv4Addr::new(172, 20, 1, 5));
        assert_eq!(rule.listen_address, "0.0.0.0");
        assert_eq!(rule.internal_port, 22);
        assert_eq!(rule.target_address, "172.20.1.5");
        assert_eq!(rule.owner_instance.as_deref(), Some("Ubuntu"));

        let live = ForwardingRule::live("0.0.0.0", 2201, "172.20.1.5", 22);
        assert!(rule.same_target(&live));
        assert!(!rule.same_target(&ForwardingRule::live("0.0.0.0", 2201, "172.20.1.6", 22)));
    }

    #[test]
    fn test_describe_shows_mapping_only_when_ports_differ() {
        let same = ForwardingRule::live("0.0.0.0", 8080, "10.0.0.5", 8080);
        assert_eq!(same.describe(), "8080 -> 10.0.0.5:8080");
        let mapped = ForwardingRule::live("0.0.0.0", 2201, "10.0.0.5", 22);
        assert!(mapped.describe().contains("external:2201 -> internal:22"));
    }
}
