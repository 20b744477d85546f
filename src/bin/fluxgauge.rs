use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use fluxgauge::cli::{Cli, Command, init_tracing};
use fluxgauge::service;
use fluxgauge_adapter_influx::InfluxClientFactory;
use fluxgauge_domain::FluxgaugeConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config_path = cli.config_path();
    let config = FluxgaugeConfig::load_from_path(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;
    info!(
        path = %config_path.display(),
        connections = config.connections.len(),
        "Config loaded"
    );

    let factory = Arc::new(InfluxClientFactory::new(config.runtime.query_timeout()));

    match cli.command() {
        Command::Check => {
            let reports = service::check(&config, factory).await;
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
        Command::Run { print_updates } => {
            let sink = print_updates.then(service::stdout_sink);
            service::run(config, factory, sink, async {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    warn!(error = %err, "Failed to listen for ctrl-c");
                }
                info!("Shutdown requested");
            })
            .await?;
        }
    }

    Ok(())
}
