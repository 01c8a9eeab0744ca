use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use relay_chat::{
    cli::{Cli, Command},
    client,
    config::RelayConfig,
    relay::Relay,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Relay(args) => {
            let config = RelayConfig::from(args);
            let relay = Relay::bind(&config).await?;
            let addr = relay.local_addr()?;
            info!("relay listening on {}", addr);
            info!(origin = %config.allowed_origin, "cors origin allowed");
            if let Err(err) = relay.run_until_ctrl_c().await {
                warn!("relay exited with error: {err:?}");
                return Err(err);
            }
        }
        Command::Client(args) => client::run(args).await?,
    }

    Ok(())
}
