use std::path::PathBuf;

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::errors::{AppError, Result};
use crate::pipeline::{select_positions, select_tracks, Pipeline};
use crate::progress::RunReport;

const TOKEN_ENV: &str = "SPOTIFY_ACCESS_TOKEN";

/// Download a Spotify playlist as local audio files.
#[derive(Parser, Debug)]
#[command(name = "playlist-downloader", version)]
pub struct Cli {
    /// Config file (JSON). Defaults to the per-user config directory.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Spotify bearer token. Falls back to $SPOTIFY_ACCESS_TOKEN.
    #[arg(long, global = true)]
    pub token: Option<String>,

    /// Enable debug logging
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the current user's playlists
    Playlists,

    /// Show the tracks of a playlist
    Tracks {
        /// Playlist URL, URI or id
        playlist: String,
    },

    /// Download tracks of a playlist
    Download {
        /// Playlist URL, URI or id
        playlist: String,

        /// Track numbers as shown by `tracks`, e.g. "1,3,5", or "all"
        #[arg(long, default_value = "all", conflicts_with = "ids")]
        select: String,

        /// Track ids to download instead of positions
        #[arg(long, value_delimiter = ',')]
        ids: Vec<String>,

        /// Number of parallel downloads
        #[arg(long)]
        concurrency: Option<usize>,

        /// Output directory
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Manage the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write the default configuration
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
}

pub async fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Config { action } => handle_config(action, cli.config),
        Command::Playlists => {
            let config = AppConfig::load(cli.config.as_deref())?;
            let pipeline = Pipeline::from_config(&config, resolve_token(cli.token)?)?;
            handle_playlists(&pipeline).await
        }
        Command::Tracks { playlist } => {
            let config = AppConfig::load(cli.config.as_deref())?;
            let pipeline = Pipeline::from_config(&config, resolve_token(cli.token)?)?;
            handle_tracks(&pipeline, &playlist).await
        }
        Command::Download {
            playlist,
            select,
            ids,
            concurrency,
            output,
        } => {
            let mut config = AppConfig::load(cli.config.as_deref())?;
            if let Some(output) = output {
                config.export.download_path = output;
            }
            if let Some(concurrency) = concurrency {
                config.scheduler.max_concurrent_downloads = concurrency;
            }
            config.validate()?;

            let pipeline = Pipeline::from_config(&config, resolve_token(cli.token)?)?;
            let report = handle_download(&pipeline, &playlist, &select, &ids).await?;
            println!("{}", report);
            Ok(())
        }
    }
}

fn resolve_token(flag: Option<String>) -> Result<String> {
    flag.or_else(|| std::env::var(TOKEN_ENV).ok())
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::Unauthorized(format!("no access token; pass --token or set {}", TOKEN_ENV)))
}

fn handle_config(action: ConfigAction, path: Option<PathBuf>) -> Result<()> {
    match action {
        ConfigAction::Init { force } => {
            let target = match &path {
                Some(path) => path.clone(),
                None => AppConfig::get_config_path()?,
            };
            if target.exists() && !force {
                return Err(AppError::Validation(format!(
                    "{} already exists; use --force to overwrite",
                    target.display()
                )));
            }
            let written = AppConfig::default().save(Some(&target))?;
            println!("Wrote {}", written.display());
        }
        ConfigAction::Show => {
            let config = AppConfig::load(path.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }
    Ok(())
}

async fn handle_playlists(pipeline: &Pipeline) -> Result<()> {
    let playlists = pipeline.list_playlists().await?;
    if playlists.is_empty() {
        println!("No playlists found.");
    }
    for (i, playlist) in playlists.iter().enumerate() {
        println!("{:>3}. {} ({} tracks) [{}]", i + 1, playlist.name, playlist.track_count, playlist.id);
    }
    Ok(())
}

async fn handle_tracks(pipeline: &Pipeline, playlist: &str) -> Result<()> {
    let tracks = pipeline.load_playlist(playlist).await?;
    for (i, track) in tracks.iter().enumerate() {
        println!(
            "{:>3}. {} - {} ({}:{:02}) [{}]",
            i + 1,
            track.title,
            track.artist,
            track.duration_seconds / 60,
            track.duration_seconds % 60,
            track.id
        );
    }
    println!("{} tracks", tracks.len());
    Ok(())
}

async fn handle_download(pipeline: &Pipeline, playlist: &str, select: &str, ids: &[String]) -> Result<RunReport> {
    let tracks = pipeline.load_playlist(playlist).await?;
    let ids = if ids.is_empty() {
        select_positions(&tracks, select)?
    } else {
        ids.to_vec()
    };
    let selected = select_tracks(&tracks, &ids)?;

    let cancel = CancellationToken::new();
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Interrupted; finishing in-flight work and cancelling the rest");
                cancel.cancel();
            }
        }
    });

    let bar = ProgressBar::new(selected.len() as u64);
    if let Ok(style) = ProgressStyle::default_bar().template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}") {
        bar.set_style(style.progress_chars("█▓░"));
    }

    let result = pipeline
        .submit(selected, cancel)
        .wait_with_progress(|snapshot| {
            bar.set_position(snapshot.completed as u64);
            bar.set_message(format!("{}% ({} active)", snapshot.percentage, snapshot.active));
        })
        .await;

    bar.finish_and_clear();
    watcher.abort();
    result
}
