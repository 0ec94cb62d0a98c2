//! Astro CLI
//!
//! Runs one application lifecycle command against the cluster.

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use astro_cli::Cli;
use astro_common::telemetry::{init_telemetry, TelemetryConfig, DEFAULT_FILTER};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            let code = e
                .downcast_ref::<astro_cli::Error>()
                .map(astro_cli::Error::exit_code)
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        anyhow::bail!("failed to install rustls crypto provider: {e:?}");
    }

    let config = cli.load_config().context("failed to load configuration")?;

    let _telemetry = init_telemetry(TelemetryConfig {
        service_name: "astro-cli".to_string(),
        json: cli.log_json || config.log.json,
        default_filter: config
            .log
            .level
            .clone()
            .unwrap_or_else(|| DEFAULT_FILTER.to_string()),
        file: config.log.file.clone(),
        rotation: config.log.rotation,
    })?;

    cli.run(config).await?;
    Ok(())
}
