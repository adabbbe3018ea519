use clap::Parser;
use log::info;

use playlist_downloader::commands::{self, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    info!("Starting playlist-downloader {}", env!("CARGO_PKG_VERSION"));

    commands::execute(cli).await?;
    Ok(())
}
