use clap::Parser;
use dotenv::dotenv;
use tracing_subscriber::EnvFilter;

use ua_catalog::cli::{self, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("🔥 {:#}", e);
        return Err(e);
    }
    Ok(())
}
