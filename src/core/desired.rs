//! Desired-state computation with deterministic conflict resolution.
//!
//! Pure functions over configuration and the runtime instance map; no I/O.

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use super::model::{FirewallMode, FirewallRule, ForwardingRule, InstanceSpec};

/// How two running instances claiming one external port are resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// The instance listed first in configuration keeps the port.
    #[default]
    FirstListed,
    /// A later-listed instance displaces the earlier claim.
    LastListed,
}

/// One dropped port claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    pub port: u16,
    pub winning_instance: String,
    pub losing_instance: String,
}

/// Target state for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DesiredState {
    pub forwarding: BTreeMap<u16, ForwardingRule>,
    pub firewall: BTreeMap<String, FirewallRule>,
    pub conflicts: Vec<Conflict>,
}

/// Build the desired forwarding and firewall state.
///
/// `running` maps instance name to its resolved address; instances absent
/// from it are skipped.
pub fn build_desired_state(
    instances: &[InstanceSpec],
    running: &BTreeMap<String, Ipv4Addr>,
    policy: ConflictPolicy,
) -> DesiredState {
    let mut forwarding: BTreeMap<u16, ForwardingRule> = BTreeMap::new();
    let mut modes: BTreeMap<u16, FirewallMode> = BTreeMap::new();
    let mut conflicts = Vec::new();

    for instance in instances {
        let Some(address) = running.get(&instance.name) else {
            continue;
        };

        for spec in &instance.ports {
            let port = spec.external_port;
            if let Some(existing) = forwarding.get(&port) {
                let current_owner = existing.owner_instance.clone().unwrap_or_default();
                if current_owner == instance.name {
                    tracing::debug!("Instance '{}' lists port {port} more than once, keeping the first", instance.name);
                    continue;
                }
                match policy {
                    ConflictPolicy::FirstListed => {
                        tracing::warn!(
                            "Instance '{}' port {port} conflicts with '{current_owner}', ignoring",
                            instance.name
                        );
                        conflicts.push(Conflict {
                            port,
                            winning_instance: current_owner,
                            losing_instance: instance.name.clone(),
                        });
                        continue;
                    }
                    ConflictPolicy::LastListed => {
                        tracing::warn!(
                            "Instance '{}' port {port} displaces '{current_owner}'",
                            instance.name
                        );
                        conflicts.push(Conflict {
                            port,
                            winning_instance: instance.name.clone(),
                            losing_instance: current_owner,
                        });
                    }
                }
            }

            forwarding.insert(port, ForwardingRule::desired(&instance.name, spec, *address));
            modes.insert(port, spec.firewall_mode);
        }
    }

    let firewall = forwarding
        .iter()
        .filter_map(|(port, rule)| {
            let mode = modes.get(port).copied().unwrap_or_default();
            let owner = rule.owner_instance.as_deref()?;
            (mode != FirewallMode::None).then(|| FirewallRule::new(*port, owner, mode))
        })
        .map(|rule| (rule.name.clone(), rule))
        .collect();

    DesiredState {
        forwarding,
        firewall,
        conflicts,
    }
}

/// Every external port mentioned in configuration: the engine's managed scope.
pub fn configured_ports(instances: &[InstanceSpec]) -> BTreeSet<u16> {
    instances
        .iter()
        .flat_map(|i| i.ports.iter().map(|p| p.external_port))
        .collect()
}

/// Ports listed by more than one instance, with the instances in config order.
///
/// A static preview for `validate`; whether a runtime conflict happens
/// depends on which instances run at the same time.
pub fn potential_conflicts(instances: &[InstanceSpec]) -> BTreeMap<u16, Vec<String>> {
    let mut by_port: BTreeMap<u16, Vec<String>> = BTreeMap::new();
    for instance in instances {
        for spec in &instance.ports {
            let names = by_port.entry(spec.external_port).or_default();
            if names.last() != Some(&instance.name) {
                names.push(instance.name.clone());
            }
        }
    }
    by_port.retain(|_, names| names.len() > 1);
    by_port
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::PortSpec;

    fn running(pairs: &[(&str, [u8; 4])]) -> BTreeMap<String, Ipv4Addr> {
        pairs
            .iter()
            .map(|(name, ip)| (name.to_string(), Ipv4Addr::from(*ip)))
            .collect()
    }

    #[test]
    fn test_first_listed_instance_wins_conflict() {
        let instances = vec![
            InstanceSpec::new("A", vec![PortSpec::new(2201).mapped_to(22)]),
            InstanceSpec::new("B", vec![PortSpec::new(2201).mapped_to(22)]),
        ];
        let live = running(&[("A", [10, 0, 0, 1]), ("B", [10, 0, 0, 2])]);

        let desired = build_desired_state(&instances, &live, ConflictPolicy::FirstListed);

        assert_eq!(desired.forwarding.len(), 1);
        let rule = &desired.forwarding[&2201];
        assert_eq!(rule.owner_instance.as_deref(), Some("A"));
        assert_eq!(rule.target_address, "10.0.0.1");
        assert_eq!(
            desired.conflicts,
            vec![Conflict {
                port: 2201,
                winning_instance: "A".into(),
                losing_instance: "B".into(),
            }]
        );
    }

    #[test]
    fn test_last_listed_policy_displaces_earlier_claim() {
        let instances = vec![
            InstanceSpec::new("A", vec![PortSpec::new(80).with_firewall(FirewallMode::Any)]),
            InstanceSpec::new("B", vec![PortSpec::new(80)]),
        ];
        let live = running(&[("A", [10, 0, 0, 1]), ("B", [10, 0, 0, 2])]);

        let desired = build_desired_state(&instances, &live, ConflictPolicy::LastListed);

        assert_eq!(desired.forwarding[&80].owner_instance.as_deref(), Some("B"));
        assert_eq!(desired.conflicts[0].winning_instance, "B");
        assert_eq!(desired.conflicts[0].losing_instance, "A");
        // B asked for no firewall rule, so A's rule must not survive the takeover.
        assert!(desired.firewall.is_empty());
    }

    #[test]
    fn test_shared_port_without_simultaneous_run_is_not_a_conflict() {
        let instances = vec![
            InstanceSpec::new("dev", vec![PortSpec::new(8080)]),
            InstanceSpec::new("staging", vec![PortSpec::new(8080)]),
        ];
        let live = running(&[("staging", [10, 0, 0, 7])]);

        let desired = build_desired_state(&instances, &live, ConflictPolicy::FirstListed);

        assert!(desired.conflicts.is_empty());
        assert_eq!(desired.forwarding[&8080].owner_instance.as_deref(), Some("staging"));
    }

    #[test]
    fn test_stopped_instances_are_skipped() {
        let instances = vec![InstanceSpec::new("A", vec![PortSpec::new(22)])];
        let desired = build_desired_state(&instances, &BTreeMap::new(), ConflictPolicy::FirstListed);
        assert_eq!(desired, DesiredState::default());
    }

    #[test]
    fn test_each_port_claimed_by_earliest_requesting_instance() {
        let instances = vec![
            InstanceSpec::new("A", vec![PortSpec::new(1), PortSpec::new(2)]),
            InstanceSpec::new("B", vec![PortSpec::new(2), PortSpec::new(3)]),
            InstanceSpec::new("C", vec![PortSpec::new(1), PortSpec::new(3), PortSpec::new(4)]),
        ];
        let live = running(&[("A", [10, 0, 0, 1]), ("B", [10, 0, 0, 2]), ("C", [10, 0, 0, 3])]);

        let desired = build_desired_state(&instances, &live, ConflictPolicy::FirstListed);

        let owners: Vec<(u16, &str)> = desired
            .forwarding
            .iter()
            .map(|(p, r)| (*p, r.owner_instance.as_deref().unwrap()))
            .collect();
        assert_eq!(owners, vec![(1, "A"), (2, "A"), (3, "B"), (4, "C")]);
        assert_eq!(desired.conflicts.len(), 3);
        for conflict in &desired.conflicts {
            assert_ne!(conflict.winning_instance, conflict.losing_instance);
            assert_eq!(
                desired.forwarding[&conflict.port].owner_instance.as_deref(),
                Some(conflict.winning_instance.as_str())
            );
        }
    }

    #[test]
    fn test_firewall_rules_only_for_claimed_ports_with_mode() {
        let instances = vec![
            InstanceSpec::new(
                "A",
                vec![
                    PortSpec::new(2201).mapped_to(22).with_firewall(FirewallMode::Local),
                    PortSpec::new(8080),
                ],
            ),
            InstanceSpec::new("B", vec![PortSpec::new(2201).with_firewall(FirewallMode::Any)]),
        ];
        let live = running(&[("A", [10, 0, 0, 1]), ("B", [10, 0, 0, 2])]);

        let desired = build_desired_state(&instances, &live, ConflictPolicy::FirstListed);

        assert_eq!(desired.firewall.len(), 1);
        let rule = &desired.firewall["WSL2 PortMapper 2201 (A)"];
        assert_eq!(rule.port, 2201);
        assert_eq!(rule.mode, FirewallMode::Local);
    }

    #[test]
    fn test_port_listed_twice_by_one_instance_is_not_a_conflict() {
        let instances = vec![InstanceSpec::new(
            "A",
            vec![PortSpec::new(80).mapped_to(8080), PortSpec::new(80).mapped_to(9090)],
        )];
        let live = running(&[("A", [10, 0, 0, 1])]);

        let desired = build_desired_state(&instances, &live, ConflictPolicy::LastListed);

        assert!(desired.conflicts.is_empty());
        assert_eq!(desired.forwarding[&80].internal_port, 8080);
        assert!(potential_conflicts(&instances).is_empty());
    }

    #[test]
    fn test_configured_ports_and_potential_conflicts() {
        let instances = vec![
            InstanceSpec::new("A", vec![PortSpec::new(22), PortSpec::new(80)]),
            InstanceSpec::new("B", vec![PortSpec::new(80), PortSpec::new(443)]),
        ];
        assert_eq!(
            configured_ports(&instances).into_iter().collect::<Vec<_>>(),
            vec![22, 80, 443]
        );
        let conflicts = potential_conflicts(&instances);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[&80], vec!["A".to_string(), "B".to_string()]);
    }
}
