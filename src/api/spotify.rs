use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use url::Url;

use crate::api::{CatalogPage, CatalogSource, PlaylistSummary, Track};
use crate::config::AppConfig;
use crate::errors::{AppError, Result};

/// The Web API caps `/me/playlists` pages at 50 entries.
const PLAYLISTS_PAGE_LIMIT: u32 = 50;

/// Spotify Web API catalog. The bearer token is supplied by the caller and never refreshed here.
pub struct SpotifyClient {
    client: Client,
    api_base: Url,
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct Paging<T> {
    items: Vec<T>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    track: Option<SpotifyTrack>,
}

#[derive(Debug, Deserialize)]
struct SpotifyTrack {
    id: Option<String>,
    name: String,
    duration_ms: u64,
    #[serde(default)]
    artists: Vec<NamedObject>,
    album: Option<NamedObject>,
}

#[derive(Debug, Deserialize)]
struct NamedObject {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SpotifyPlaylist {
    id: String,
    name: String,
    tracks: Option<TrackTotal>,
}

#[derive(Debug, Deserialize)]
struct TrackTotal {
    total: u32,
}

impl SpotifyClient {
    pub fn new(config: &AppConfig, access_token: String) -> Result<Self> {
        let client = crate::http::build_client(config.catalog.timeout_secs, config.proxy.as_deref())?;
        let mut api_base = Url::parse(&config.catalog.api_base)
            .map_err(|e| AppError::Validation(format!("Invalid catalog api_base: {}", e)))?;
        // Url::join drops the last path segment unless it ends with '/'
        if !api_base.path().ends_with('/') {
            api_base.set_path(&format!("{}/", api_base.path()));
        }

        Ok(Self {
            client,
            api_base,
            access_token,
        })
    }

    fn endpoint(&self, path: &str, offset: u32, limit: u32) -> Result<Url> {
        let mut url = self
            .api_base
            .join(path)
            .map_err(|e| AppError::Validation(format!("Invalid catalog path {}: {}", path, e)))?;
        url.query_pairs_mut()
            .append_pair("offset", &offset.to_string())
            .append_pair("limit", &limit.to_string());
        Ok(url)
    }

    async fn get_page<T: serde::de::DeserializeOwned>(&self, url: Url, context: &str) -> Result<Paging<T>> {
        log::debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| AppError::CatalogUnavailable(format!("{}: {}", context, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, context, &body));
        }

        response
            .json::<Paging<T>>()
            .await
            .map_err(|e| AppError::CatalogUnavailable(format!("{}: invalid response: {}", context, e)))
    }
}

#[async_trait]
impl CatalogSource for SpotifyClient {
    async fn fetch_tracks_page(&self, playlist_id: &str, offset: u32, limit: u32) -> Result<CatalogPage<Track>> {
        let url = self.endpoint(&format!("playlists/{}/tracks", playlist_id), offset, limit)?;
        let paging: Paging<PlaylistItem> = self.get_page(url, playlist_id).await?;
        Ok(convert_tracks_page(paging, offset))
    }

    async fn fetch_playlists_page(&self, offset: u32, limit: u32) -> Result<CatalogPage<PlaylistSummary>> {
        let url = self.endpoint("me/playlists", offset, limit.min(PLAYLISTS_PAGE_LIMIT))?;
        let paging: Paging<SpotifyPlaylist> = self.get_page(url, "current user playlists").await?;

        let raw_count = paging.items.len() as u32;
        let items = paging
            .items
            .into_iter()
            .map(|playlist| PlaylistSummary {
                id: playlist.id,
                name: playlist.name,
                track_count: playlist.tracks.map(|t| t.total).unwrap_or(0),
            })
            .collect();

        Ok(CatalogPage {
            items,
            next_offset: paging.next.map(|_| offset + raw_count),
        })
    }
}

fn convert_tracks_page(paging: Paging<PlaylistItem>, offset: u32) -> CatalogPage<Track> {
    // The cursor advances by raw item count so null entries never shift later pages.
    let raw_count = paging.items.len() as u32;
    let mut items = Vec::with_capacity(paging.items.len());

    for (index, item) in paging.items.into_iter().enumerate() {
        let Some(track) = item.track else {
            log::warn!("Skipping unavailable playlist entry at position {}", offset as usize + index + 1);
            continue;
        };
        let Some(id) = track.id else {
            log::warn!("Skipping local file entry '{}'", track.name);
            continue;
        };

        items.push(Track {
            id,
            title: track.name,
            artist: track
                .artists
                .into_iter()
                .next()
                .map(|a| a.name)
                .unwrap_or_else(|| "Unknown Artist".to_string()),
            album: track.album.map(|a| a.name).unwrap_or_default(),
            duration_seconds: (track.duration_ms / 1000) as u32,
        });
    }

    CatalogPage {
        items,
        next_offset: paging.next.map(|_| offset + raw_count),
    }
}

fn map_status(status: StatusCode, context: &str, body: &str) -> AppError {
    if status == StatusCode::UNAUTHORIZED {
        AppError::Unauthorized(format!("{}: credentials rejected", context))
    } else if status == StatusCode::BAD_REQUEST || status == StatusCode::FORBIDDEN || status == StatusCode::NOT_FOUND {
        AppError::PlaylistNotFound(context.to_string())
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        AppError::CatalogUnavailable(format!("{}: HTTP {}", context, status))
    } else {
        AppError::CatalogUnavailable(format!("{}: HTTP {} {}", context, status, body))
    }
}

/// Accepts a bare playlist id, a `spotify:playlist:` URI or an open.spotify.com URL.
pub fn parse_playlist_ref(input: &str) -> Result<String> {
    let input = input.trim();

    let url_pattern = regex::Regex::new(r"^https?://open\.spotify\.com/(?:intl-[a-zA-Z-]+/)?playlist/([A-Za-z0-9]+)")
        .map_err(|e| AppError::Validation(e.to_string()))?;
    if let Some(captures) = url_pattern.captures(input) {
        return Ok(captures[1].to_string());
    }

    if let Some(id) = input.strip_prefix("spotify:playlist:") {
        if is_catalog_id(id) {
            return Ok(id.to_string());
        }
    }

    if is_catalog_id(input) {
        return Ok(input.to_string());
    }

    Err(AppError::Validation(format!("Not a playlist id or URL: {}", input)))
}

fn is_catalog_id(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_playlist_ref_forms() {
        assert_eq!(parse_playlist_ref("37i9dQZF1DXcBWIGoYBM5M").unwrap(), "37i9dQZF1DXcBWIGoYBM5M");
        assert_eq!(
            parse_playlist_ref("spotify:playlist:37i9dQZF1DXcBWIGoYBM5M").unwrap(),
            "37i9dQZF1DXcBWIGoYBM5M"
        );
        assert_eq!(
            parse_playlist_ref("https://open.spotify.com/playlist/37i9dQZF1DXcBWIGoYBM5M?si=abc").unwrap(),
            "37i9dQZF1DXcBWIGoYBM5M"
        );
        assert_eq!(
            parse_playlist_ref("https://open.spotify.com/intl-de/playlist/abc123").unwrap(),
            "abc123"
        );
        assert!(matches!(parse_playlist_ref("https://open.spotify.com/track/abc"), Err(AppError::Validation(_))));
        assert!(matches!(parse_playlist_ref(""), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_convert_tracks_page_skips_null_entries_but_advances_by_raw_count() {
        let paging: Paging<PlaylistItem> = serde_json::from_value(json!({
            "items": [
                {"track": {"id": "a", "name": "Shape of You", "duration_ms": 233712,
                           "artists": [{"name": "Ed Sheeran"}, {"name": "Other"}],
                           "album": {"name": "Divide"}}},
                {"track": null},
                {"track": {"id": null, "name": "local.mp3", "duration_ms": 1000, "artists": []}}
            ],
            "next": "https://api.spotify.com/v1/playlists/x/tracks?offset=103&limit=100"
        }))
        .unwrap();

        let page = convert_tracks_page(paging, 100);

        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].artist, "Ed Sheeran");
        assert_eq!(page.items[0].album, "Divide");
        assert_eq!(page.items[0].duration_seconds, 233);
        assert_eq!(page.next_offset, Some(103));
    }

    #[test]
    fn test_convert_last_page_has_no_cursor() {
        let paging: Paging<PlaylistItem> = serde_json::from_value(json!({"items": [], "next": null})).unwrap();
        assert_eq!(convert_tracks_page(paging, 0).next_offset, None);
    }

    #[test]
    fn test_map_status() {
        assert!(matches!(map_status(StatusCode::UNAUTHORIZED, "p", ""), AppError::Unauthorized(_)));
        assert!(matches!(map_status(StatusCode::NOT_FOUND, "p", ""), AppError::PlaylistNotFound(_)));
        assert!(matches!(map_status(StatusCode::BAD_GATEWAY, "p", ""), AppError::CatalogUnavailable(_)));
        assert!(map_status(StatusCode::TOO_MANY_REQUESTS, "p", "").is_transient());
    }

    #[test]
    fn test_endpoint_keeps_api_base_path() {
        let client = SpotifyClient::new(&AppConfig::default(), "token".to_string()).unwrap();
        let url = client.endpoint("playlists/abc/tracks", 100, 100).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.spotify.com/v1/playlists/abc/tracks?offset=100&limit=100"
        );
    }
}
