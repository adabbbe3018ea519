pub mod spotify;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::CatalogConfig;
use crate::errors::{AppError, Result};
use crate::http::backoff_delay;

/// One catalog track. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub duration_seconds: u32,
}

impl Track {
    pub fn display_name(&self) -> String {
        format!("{} - {}", self.title, self.artist)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistSummary {
    pub id: String,
    pub name: String,
    pub track_count: u32,
}

/// One page of a paginated catalog listing. `next_offset` is `None` on the last page.
#[derive(Debug, Clone)]
pub struct CatalogPage<T> {
    pub items: Vec<T>,
    pub next_offset: Option<u32>,
}

/// Remote catalog, one page at a time.
///
/// Implementations map transport failures to [`AppError::CatalogUnavailable`] (retried by the
/// fetcher) and credential failures to [`AppError::Unauthorized`] (never retried).
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch_tracks_page(&self, playlist_id: &str, offset: u32, limit: u32) -> Result<CatalogPage<Track>>;

    async fn fetch_playlists_page(&self, _offset: u32, _limit: u32) -> Result<CatalogPage<PlaylistSummary>> {
        Ok(CatalogPage { items: Vec::new(), next_offset: None })
    }
}

pub struct CatalogFetcher {
    source: Arc<dyn CatalogSource>,
    page_size: u32,
    max_retries: u32,
    retry_base_delay_ms: u64,
}

impl CatalogFetcher {
    pub fn new(source: Arc<dyn CatalogSource>, config: &CatalogConfig) -> Self {
        Self {
            source,
            page_size: config.page_size.clamp(1, 100),
            max_retries: config.max_retries,
            retry_base_delay_ms: config.retry_base_delay_ms,
        }
    }

    /// Retrieves every track of a playlist in catalog order.
    pub async fn fetch_all(&self, playlist_id: &str) -> Result<Vec<Track>> {
        log::info!("Fetching playlist {} (page size {})", playlist_id, self.page_size);
        let source = self.source.clone();
        let tracks = self
            .collect_pages(|offset, limit| {
                let source = source.clone();
                let playlist_id = playlist_id.to_string();
                async move { source.fetch_tracks_page(&playlist_id, offset, limit).await }
            })
            .await?;
        log::info!("Fetched {} tracks from playlist {}", tracks.len(), playlist_id);
        Ok(tracks)
    }

    /// Retrieves the current user's playlists.
    pub async fn list_playlists(&self) -> Result<Vec<PlaylistSummary>> {
        let source = self.source.clone();
        self.collect_pages(|offset, limit| {
            let source = source.clone();
            async move { source.fetch_playlists_page(offset, limit).await }
        })
        .await
    }

    async fn collect_pages<T, F, Fut>(&self, fetch: F) -> Result<Vec<T>>
    where
        F: Fn(u32, u32) -> Fut,
        Fut: Future<Output = Result<CatalogPage<T>>>,
    {
        let mut items = Vec::new();
        let mut cursor = Some(0u32);

        while let Some(offset) = cursor {
            let page = self.fetch_page_with_retry(&fetch, offset).await?;
            if let Some(next) = page.next_offset {
                if next <= offset {
                    return Err(AppError::CatalogUnavailable(format!(
                        "pagination did not advance past offset {}",
                        offset
                    )));
                }
            }
            log::debug!("Page at offset {} returned {} items", offset, page.items.len());
            items.extend(page.items);
            cursor = page.next_offset;
        }

        Ok(items)
    }

    // A retried page re-requests the same offset, so nothing is dropped or duplicated.
    async fn fetch_page_with_retry<T, F, Fut>(&self, fetch: &F, offset: u32) -> Result<CatalogPage<T>>
    where
        F: Fn(u32, u32) -> Fut,
        Fut: Future<Output = Result<CatalogPage<T>>>,
    {
        let mut attempt = 0;
        loop {
            match fetch(offset, self.page_size).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = backoff_delay(self.retry_base_delay_ms, attempt);
                    log::warn!(
                        "Catalog page at offset {} failed ({}), retry {}/{} in {:?}",
                        offset, e, attempt, self.max_retries, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(AppError::CatalogUnavailable(msg)) => return Err(AppError::CatalogUnavailable(msg)),
                Err(e) if e.is_transient() => {
                    return Err(AppError::CatalogUnavailable(e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }
    }
}
