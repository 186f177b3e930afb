use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "wsl-portmapper",
    version,
    about = "Keep Windows port forwarding and firewall rules in sync with running WSL2 instances"
)]
pub struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reconcile every check interval until interrupted
    Run(RunArgs),
    /// Validate a configuration file and check firewall coverage, then exit
    Validate(ValidateArgs),
    /// Compare the ownership registry with installed rules
    Audit(AuditArgs),
}

#[derive(Args, Debug)]
pub struct RegistryArgs {
    /// Ownership registry database (default: %ProgramData%\wsl-portmapper\registry.db)
    #[arg(long)]
    pub registry: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Configuration file (JSON)
    pub config: PathBuf,

    #[command(flatten)]
    pub registry: RegistryArgs,
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Configuration file (JSON)
    pub config: PathBuf,
}

#[derive(Args, Debug)]
pub struct AuditArgs {
    /// Limit unregistered-rule reporting to ports this configuration manages
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Delete orphaned registry entries (never touches installed rules)
    #[arg(long)]
    pub cleanup: bool,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub registry: RegistryArgs,
}

impl RegistryArgs {
    pub fn path(&self) -> PathBuf {
        self.registry
            .clone()
            .unwrap_or_else(crate::db::default_registry_path)
    }
}
