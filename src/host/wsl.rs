//! `wsl.exe` discovery.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use async_trait::async_trait;

use super::runner::RunError;
use super::{InstanceDiscovery, WindowsHost};
use crate::core::parse::{parse_instance_address, parse_running_instances, reports_no_running_instances};
use crate::error::EngineError;

const WSL: &str = "wsl.exe";

#[async_trait]
impl InstanceDiscovery for WindowsHost {
    async fn list_running_instances(&self) -> Result<BTreeSet<String>, EngineError> {
        match self.runner.run(WSL, &["--list", "--running", "--quiet"]).await {
            Ok(output) => Ok(parse_running_instances(&output.stdout)),
            // wsl.exe exits non-zero when nothing is running.
            Err(RunError::Failed { message, .. }) if reports_no_running_instances(&message) => {
                Ok(BTreeSet::new())
            }
            Err(e) => Err(EngineError::Discovery(format!(
                "failed to list running WSL instances: {e}"
            ))),
        }
    }

    async fn resolve_instance_address(&self, name: &str) -> Result<Ipv4Addr, EngineError> {
        let output = self
            .runner
            .run(WSL, &["-d", name, "--", "hostname", "-I"])
            .await
            .map_err(|e| EngineError::address(name, e.to_string()))?;
        parse_instance_address(&output.stdout).map_err(|message| EngineError::address(name, message))
    }
}
