use anyhow::Result;
use clap::Parser;
use tracing::warn;

use chat_broker::{cli::Cli, session};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // Stdout carries the delivery lines, so logs go to stderr.
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    if let Err(err) = session::run(cli).await {
        warn!("chat broker exited with error: {err:?}");
        return Err(err);
    }

    Ok(())
}
