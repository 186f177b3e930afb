//! Centralized runtime constants for the port mapper.
//!
//! Bounds, defaults, and naming conventions are collected here so they can be
//! found and adjusted in a single place rather than scattered across modules.

/// Smallest accepted `check_interval_seconds`.
pub const MIN_CHECK_INTERVAL_SECS: u64 = 1;

/// Largest accepted `check_interval_seconds` (one hour).
pub const MAX_CHECK_INTERVAL_SECS: u64 = 3600;

/// Timeout applied to every wsl.exe / netsh.exe invocation when the config omits one (seconds).
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;

/// Largest accepted `command_timeout_seconds`.
pub const MAX_COMMAND_TIMEOUT_SECS: u64 = 600;

/// Listen address used for every forwarding rule the engine installs.
pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0";

/// Prefix of every firewall rule name the engine creates.
/// Audit uses it to recognize engine-style rules that are missing from the registry.
pub const FIREWALL_RULE_PREFIX: &str = "WSL2 PortMapper";

/// Directory (under `%ProgramData%`) holding the ownership registry.
pub const REGISTRY_DIR_NAME: &str = "wsl-portmapper";

/// File name of the ownership registry database.
pub const REGISTRY_FILE_NAME: &str = "registry.db";

/// Number of leading bytes inspected when sniffing for BOM-less UTF-16 output.
pub const UTF16_SNIFF_BYTES: usize = 20;

/// Default tracing filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "wsl_portmapper=info";

/// Tracing filter used with `--verbose` when `RUST_LOG` is unset.
pub const VERBOSE_LOG_FILTER: &str = "wsl_portmapper=debug";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_bounds_are_ordered() {
        const _: () = assert!(MIN_CHECK_INTERVAL_SECS > 0);
        const _: () = assert!(MIN_CHECK_INTERVAL_SECS < MAX_CHECK_INTERVAL_SECS);
        const _: () = assert!(DEFAULT_COMMAND_TIMEOUT_SECS <= MAX_COMMAND_TIMEOUT_SECS);
        const _: () = assert!(UTF16_SNIFF_BYTES % 2 == 0);
    }

    #[test]
    fn test_default_listen_address_parses() {
        let addr: std::net::Ipv4Addr = DEFAULT_LISTEN_ADDRESS.parse().unwrap();
        assert!(addr.is_unspecified());
    }
}
