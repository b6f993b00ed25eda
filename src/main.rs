use anyhow::Result;
use clap::Parser;
use gatekeep::config::{Cli, Config};
use gatekeep::server::Server;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::from_env()
        .and_then(|config| config.apply_cli(cli))
        .map_err(|e| anyhow::anyhow!("failed to load configuration: {e}"))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("gatekeep={},tower_http=debug", config.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting gatekeep");
    tracing::info!(
        bind_addr = %config.bind_addr,
        redis = config.redis_url.is_some(),
        fail_open = config.fail_open,
        "configuration loaded"
    );

    let server = Server::new(config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to create server: {e}"))?;

    server
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("server error: {e}"))?;

    Ok(())
}
