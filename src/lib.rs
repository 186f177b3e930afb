mod cli;
mod commands;
pub mod config;
pub mod core;
pub mod db;
pub mod error;
pub mod host;
pub mod services;
pub mod settings;

use std::process::ExitCode;

use clap::Parser;

use cli::{Cli, Commands};
use commands::ExitStatus;

pub fn run() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("PANIC in wsl-portmapper: {info}");
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        config::VERBOSE_LOG_FILTER
    } else {
        config::DEFAULT_LOG_FILTER
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Failed to start async runtime: {e}");
            return ExitCode::from(ExitStatus::Error.code());
        }
    };

    let status = runtime.block_on(async {
        match &cli.cmd {
            Commands::Run(args) => commands::run(args).await.map(|()| ExitStatus::Ok),
            Commands::Validate(args) => Ok(commands::validate(args).await),
            Commands::Audit(args) => commands::audit(args).await,
        }
    });

    match status {
        Ok(status) => ExitCode::from(status.code()),
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(ExitStatus::Error.code())
        }
    }
}
