//! Parsers for normalized tool output: running instances, instance addresses,
//! the portproxy v4tov4 table, and the advfirewall rule listing.
//!
//! All parsers are tolerant: unexpected lines are skipped rather than treated
//! as errors because the output layout varies across Windows builds.

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use serde::Serialize;

use super::decode::output_lines;
use super::model::ForwardingRule;

/// Names listed by `wsl --list --running --quiet`.
///
/// Lines are distribution names; a leading `*` default marker (present on
/// some builds even with `--quiet`) is dropped.
pub fn parse_running_instances(text: &str) -> BTreeSet<String> {
    output_lines(text)
        .map(|line| line.trim_start_matches('*').trim())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Message wsl.exe prints (with a non-zero exit status) when nothing is running.
pub fn reports_no_running_instances(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower.contains("no running distributions") || lower.contains("there are no running")
}

/// First address from `hostname -I`, validated as a dotted quad.
pub fn parse_instance_address(text: &str) -> Result<Ipv4Addr, String> {
    let first = text
        .split_whitespace()
        .next()
        .ok_or_else(|| "no address returned".to_string())?;
    first
        .parse::<Ipv4Addr>()
        .map_err(|_| format!("invalid IP address format: {first}"))
}

/// Rules from `netsh interface portproxy show v4tov4`.
///
/// Format: `0.0.0.0         2201        172.20.1.5      22`. Header and
/// separator lines fail the numeric port check and are skipped. When the
/// table lists one port twice (different listen addresses) the first row wins.
pub fn parse_forwarding_table(text: &str) -> BTreeMap<u16, ForwardingRule> {
    let mut rules = BTreeMap::new();
    for line in output_lines(text) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 4 {
            continue;
        }
        let (Ok(listen_port), Ok(connect_port)) = (fields[1].parse::<u16>(), fields[3].parse::<u16>()) else {
            continue;
        };
        if rules.contains_key(&listen_port) {
            tracing::debug!("Duplicate portproxy entry for port {listen_port} ignored: {line}");
            continue;
        }
        rules.insert(
            listen_port,
            ForwardingRule::live(fields[0], listen_port, fields[2], connect_port),
        );
    }
    rules
}

/// `LocalPort:` value of a firewall rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum LocalPorts {
    Any,
    /// Inclusive ranges; a single port is `(p, p)`.
    Ranges(Vec<(u16, u16)>),
}

impl LocalPorts {
    pub fn covers(&self, port: u16) -> bool {
        match self {
            LocalPorts::Any => true,
            LocalPorts::Ranges(ranges) => ranges.iter().any(|(lo, hi)| (*lo..=*hi).contains(&port)),
        }
    }
}

/// One rule block from `netsh advfirewall firewall show rule`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledFirewallRule {
    pub name: String,
    pub enabled: bool,
    pub local_ports: LocalPorts,
}

/// Parse the advfirewall listing into rule blocks.
///
/// A block starts at `Rule Name:`. Rules without a `LocalPort:` line (ICMP,
/// program rules) get an empty range list and so cover nothing.
pub fn parse_firewall_rules(text: &str) -> Vec<InstalledFirewallRule> {
    let mut rules: Vec<InstalledFirewallRule> = Vec::new();
    for line in output_lines(text) {
        if let Some(name) = field_value(line, "Rule Name:") {
            if name.is_empty() {
                continue;
            }
            rules.push(InstalledFirewallRule {
                name: name.to_string(),
                enabled: false,
                local_ports: LocalPorts::Ranges(Vec::new()),
            });
            continue;
        }
        let Some(current) = rules.last_mut() else {
            continue;
        };
        if let Some(value) = field_value(line, "Enabled:") {
            current.enabled = value.eq_ignore_ascii_case("yes");
        } else if let Some(value) = field_value(line, "LocalPort:") {
            current.local_ports = parse_local_ports(value);
        }
    }
    rules
}

/// Unique rule names, for audit.
pub fn firewall_rule_names(rules: &[InstalledFirewallRule]) -> BTreeSet<String> {
    rules.iter().map(|r| r.name.clone()).collect()
}

/// `Any`, `22`, `80,443`, `8000-8100`, or any mix. Unparseable parts are ignored.
pub fn parse_local_ports(value: &str) -> LocalPorts {
    if value.eq_ignore_ascii_case("any") {
        return LocalPorts::Any;
    }
    let ranges = value
        .split(',')
        .map(str::trim)
        .filter_map(|part| match part.split_once('-') {
            Some((lo, hi)) => {
                let lo = lo.trim().parse::<u16>().ok()?;
                let hi = hi.trim().parse::<u16>().ok()?;
                (lo <= hi).then_some((lo, hi))
            }
            None => part.parse::<u16>().ok().map(|p| (p, p)),
        })
        .collect();
    LocalPorts::Ranges(ranges)
}

fn field_value<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    line.strip_prefix(label).map(str::trim)
}
