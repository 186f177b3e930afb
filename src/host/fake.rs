//! In-memory host used by reconciler, audit and service tests.

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{InstanceDiscovery, NetworkTools};
use crate::core::model::{FirewallRule, ForwardingRule};
use crate::core::parse::{InstalledFirewallRule, LocalPorts};
use crate::error::EngineError;

/// A mutation the engine issued against the fake host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    AddForwarding { port: u16, target: String, internal: u16 },
    RemoveForwarding { port: u16, listen_address: String },
    AddFirewall(String),
    RemoveFirewall(String),
}

#[derive(Default)]
pub struct FakeHost {
    pub instances: Mutex<BTreeMap<String, Result<Ipv4Addr, String>>>,
    pub forwarding: Mutex<BTreeMap<u16, ForwardingRule>>,
    pub firewall: Mutex<BTreeMap<String, FirewallRule>>,
    pub calls: Mutex<Vec<Call>>,
    pub discovery_down: Mutex<bool>,
    pub firewall_listing_down: Mutex<bool>,
    pub fail_add_ports: Mutex<BTreeSet<u16>>,
    pub fail_remove_ports: Mutex<BTreeSet<u16>>,
    pub fail_firewall: Mutex<bool>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run_instance(&self, name: &str, ip: [u8; 4]) {
        self.instances
            .lock()
            .unwrap()
            .insert(name.to_string(), Ok(Ipv4Addr::from(ip)));
    }

    pub fn run_unresolvable(&self, name: &str) {
        self.instances
            .lock()
            .unwrap()
            .insert(name.to_string(), Err("hostname -I returned nothing".into()));
    }

    pub fn stop_instance(&self, name: &str) {
        self.instances.lock().unwrap().remove(name);
    }

    /// Install a forwarding rule as if someone ran netsh by hand.
    pub fn install(&self, port: u16, target: &str, internal: u16) {
        self.forwarding
            .lock()
            .unwrap()
            .insert(port, ForwardingRule::live("0.0.0.0", port, target, internal));
    }

    pub fn install_firewall(&self, rule: FirewallRule) {
        self.firewall.lock().unwrap().insert(rule.name.clone(), rule);
    }

    pub fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    pub fn live(&self) -> BTreeMap<u16, ForwardingRule> {
        self.forwarding.lock().unwrap().clone()
    }

    pub fn firewall_names(&self) -> BTreeSet<String> {
        self.firewall.lock().unwrap().keys().cloned().collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl InstanceDiscovery for FakeHost {
    async fn list_running_instances(&self) -> Result<BTreeSet<String>, EngineError> {
        if *self.discovery_down.lock().unwrap() {
            return Err(EngineError::Discovery("wsl.exe not found".into()));
        }
        Ok(self.instances.lock().unwrap().keys().cloned().collect())
    }

    async fn resolve_instance_address(&self, name: &str) -> Result<Ipv4Addr, EngineError> {
        match self.instances.lock().unwrap().get(name) {
            Some(Ok(ip)) => Ok(*ip),
            Some(Err(message)) => Err(EngineError::address(name, message.clone())),
            None => Err(EngineError::address(name, "not running")),
        }
    }
}

#[async_trait]
impl NetworkTools for FakeHost {
    async fn list_forwarding_rules(&self) -> Result<BTreeMap<u16, ForwardingRule>, EngineError> {
        Ok(self.live())
    }

    async fn add_forwarding_rule(&self, rule: &ForwardingRule) -> Result<(), EngineError> {
        if self.fail_add_ports.lock().unwrap().contains(&rule.external_port) {
            return Err(EngineError::Mutation(format!(
                "netsh add failed for port {}",
                rule.external_port
            )));
        }
        self.record(Call::AddForwarding {
            port: rule.external_port,
            target: rule.target_address.clone(),
            internal: rule.internal_port,
        });
        self.install(rule.external_port, &rule.target_address, rule.internal_port);
        Ok(())
    }

    async fn remove_forwarding_rule(&self, rule: &ForwardingRule) -> Result<(), EngineError> {
        if self.fail_remove_ports.lock().unwrap().contains(&rule.external_port) {
            return Err(EngineError::Mutation(format!(
                "netsh delete failed for port {}",
                rule.external_port
            )));
        }
        self.record(Call::RemoveForwarding {
            port: rule.external_port,
            listen_address: rule.listen_address.clone(),
        });
        self.forwarding.lock().unwrap().remove(&rule.external_port);
        Ok(())
    }

    async fn list_firewall_rules(&self) -> Result<Vec<InstalledFirewallRule>, EngineError> {
        if *self.firewall_listing_down.lock().unwrap() {
            return Err(EngineError::Discovery("advfirewall unavailable".into()));
        }
        Ok(self
            .firewall
            .lock()
            .unwrap()
            .values()
            .map(|rule| InstalledFirewallRule {
                name: rule.name.clone(),
                enabled: true,
                local_ports: LocalPorts::Ranges(vec![(rule.port, rule.port)]),
            })
            .collect())
    }

    async fn add_firewall_rule(&self, rule: &FirewallRule) -> Result<(), EngineError> {
        if *self.fail_firewall.lock().unwrap() {
            return Err(EngineError::Mutation("access denied".into()));
        }
        self.record(Call::AddFirewall(rule.name.clone()));
        self.install_firewall(rule.clone());
        Ok(())
    }

    async fn remove_firewall_rule(&self, rule: &FirewallRule) -> Result<(), EngineError> {
        if *self.fail_firewall.lock().unwrap() {
            return Err(EngineError::Mutation("access denied".into()));
        }
        self.record(Call::RemoveFirewall(rule.name.clone()));
        self.firewall.lock().unwrap().remove(&rule.name);
        Ok(())
    }
}
