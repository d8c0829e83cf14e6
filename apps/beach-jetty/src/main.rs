use anyhow::Result;
use clap::Parser;
use tracing::info;

use beach_jetty::{cli, server, telemetry, Cli, Commands, ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing()?;

    let cli = Cli::parse();
    if let Some(Commands::Watch(args)) = cli.command {
        return cli::run_watch(args).await;
    }

    let config = ServerConfig::try_from(cli.server)?;
    telemetry::init_metrics(config.metrics_addr)?;
    info!(
        listen_addr = %config.listen_addr,
        relay_types = ?config.relay_types.iter().collect::<Vec<_>>(),
        "starting beach-jetty signaling server"
    );

    server::run(config).await
}
