use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::api::spotify::{parse_playlist_ref, SpotifyClient};
use crate::api::{CatalogFetcher, CatalogSource, PlaylistSummary, Track};
use crate::config::AppConfig;
use crate::downloader::exporter::YtDlpExporter;
use crate::downloader::manager::{DownloadScheduler, RunHandle, SchedulerSettings};
use crate::downloader::AudioExporter;
use crate::errors::{AppError, Result};
use crate::matcher::TrackMatcher;
use crate::search::ytdlp::YtDlpSearchIndex;
use crate::search::{CandidateSearcher, SearchIndex};

/// Front-end entry point: list, load, select and submit.
pub struct Pipeline {
    fetcher: CatalogFetcher,
    scheduler: Arc<DownloadScheduler>,
    concurrency: usize,
}

impl Pipeline {
    pub fn new(fetcher: CatalogFetcher, scheduler: Arc<DownloadScheduler>, concurrency: usize) -> Self {
        Self {
            fetcher,
            scheduler,
            concurrency: concurrency.max(1),
        }
    }

    /// Wires arbitrary catalog, search and export backends with the configured policies.
    pub fn with_backends(
        config: &AppConfig,
        catalog: Arc<dyn CatalogSource>,
        index: Arc<dyn SearchIndex>,
        exporter: Arc<dyn AudioExporter>,
    ) -> Self {
        let searcher = Arc::new(CandidateSearcher::new(index, &config.search));
        let matcher = Arc::new(TrackMatcher::new(config.matching.clone()));
        let scheduler = DownloadScheduler::new(searcher, matcher, exporter, SchedulerSettings::from_config(config));

        Self::new(
            CatalogFetcher::new(catalog, &config.catalog),
            Arc::new(scheduler),
            config.scheduler.max_concurrent_downloads,
        )
    }

    /// Spotify catalog, yt-dlp search and yt-dlp/ffmpeg export.
    pub fn from_config(config: &AppConfig, access_token: String) -> Result<Self> {
        let catalog = Arc::new(SpotifyClient::new(config, access_token)?);
        let index = Arc::new(YtDlpSearchIndex::new(config.export.ytdlp_path.clone()).with_proxy(config.proxy.clone()));
        let exporter = Arc::new(YtDlpExporter::from_config(config));
        Ok(Self::with_backends(config, catalog, index, exporter))
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Accepts a playlist URL, URI or bare id.
    pub async fn load_playlist(&self, playlist_ref: &str) -> Result<Vec<Track>> {
        let playlist_id = parse_playlist_ref(playlist_ref)?;
        self.fetcher.fetch_all(&playlist_id).await
    }

    pub async fn list_playlists(&self) -> Result<Vec<PlaylistSummary>> {
        self.fetcher.list_playlists().await
    }

    pub fn submit(&self, tracks: Vec<Track>, cancel: CancellationToken) -> RunHandle {
        self.scheduler.run(tracks, self.concurrency, cancel)
    }

    /// Loads the playlist and submits the tracks named in `selection` (all when empty).
    /// Catalog failures surface here, before any job is scheduled.
    pub async fn download_playlist(
        &self,
        playlist_ref: &str,
        selection: &[String],
        cancel: CancellationToken,
    ) -> Result<RunHandle> {
        let tracks = self.load_playlist(playlist_ref).await?;
        let selected = select_tracks(&tracks, selection)?;
        Ok(self.submit(selected, cancel))
    }
}

/// Keeps catalog order. An empty selection keeps everything; an unknown id is an error.
pub fn select_tracks(tracks: &[Track], ids: &[String]) -> Result<Vec<Track>> {
    if ids.is_empty() {
        return Ok(tracks.to_vec());
    }

    let known: HashSet<&str> = tracks.iter().map(|t| t.id.as_str()).collect();
    let unknown: Vec<&str> = ids
        .iter()
        .map(String::as_str)
        .filter(|id| !known.contains(id))
        .collect();
    if !unknown.is_empty() {
        return Err(AppError::Validation(format!(
            "track id(s) not in playlist: {}",
            unknown.join(", ")
        )));
    }

    let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
    Ok(tracks
        .iter()
        .filter(|t| wanted.contains(t.id.as_str()))
        .cloned()
        .collect())
}

/// Parses a 1-based position list such as `"1,3,5"`, or `"all"`, into track ids.
pub fn select_positions(tracks: &[Track], input: &str) -> Result<Vec<String>> {
    let input = input.trim();
    if input.eq_ignore_ascii_case("all") {
        return Ok(tracks.iter().map(|t| t.id.clone()).collect());
    }

    let mut ids = Vec::new();
    for part in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let position: usize = part
            .parse()
            .map_err(|_| AppError::Validation(format!("'{}' is not a track number", part)))?;
        let track = position
            .checked_sub(1)
            .and_then(|i| tracks.get(i))
            .ok_or_else(|| AppError::Validation(format!("track number {} is out of range 1-{}", position, tracks.len())))?;
        ids.push(track.id.clone());
    }

    if ids.is_empty() {
        return Err(AppError::Validation("no tracks selected".to_string()));
    }
    Ok(ids)
}
