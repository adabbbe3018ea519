use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::errors::{AppError, Result};

const ENV_PREFIX: &str = "PLDL";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub catalog: CatalogConfig,
    pub search: SearchConfig,
    pub matching: MatchConfig,
    pub scheduler: SchedulerConfig,
    pub export: ExportConfig,
    pub proxy: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CatalogConfig {
    pub api_base: String,
    pub page_size: u32,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SearchConfig {
    pub max_results: usize,
    /// Literal appended to every query to bias results toward studio audio.
    pub query_hint: Option<String>,
    pub cache_ttl_secs: u64,
    pub cache_capacity: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MatchConfig {
    pub duration_tolerance_secs: u32,
    pub strict_score: f32,
    pub strict_no_duration_score: f32,
    pub strict_out_of_tolerance_score: f32,
    pub fallback_score: f32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SchedulerConfig {
    pub max_concurrent_downloads: usize,
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub inter_start_delay_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ExportConfig {
    pub download_path: PathBuf,
    pub preferred_quality: AudioQuality,
    pub preferred_format: AudioFormat,
    pub ytdlp_path: String,
    pub ffmpeg_location: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub enum AudioQuality {
    Low,    // 128 kbps
    Medium, // 192 kbps
    High,   // 256 kbps
    Best,   // 320 kbps
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub enum AudioFormat {
    Mp3,
    M4a,
    Flac,
    Wav,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            catalog: CatalogConfig::default(),
            search: SearchConfig::default(),
            matching: MatchConfig::default(),
            scheduler: SchedulerConfig::default(),
            export: ExportConfig::default(),
            proxy: None,
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.spotify.com/v1".to_string(),
            page_size: 100,
            max_retries: 3,
            retry_base_delay_ms: 500,
            timeout_secs: 30,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: 5,
            query_hint: Some("audio".to_string()),
            cache_ttl_secs: 3600,
            cache_capacity: 1024,
        }
    }
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            duration_tolerance_secs: 5,
            strict_score: 1.0,
            strict_no_duration_score: 0.9,
            strict_out_of_tolerance_score: 0.75,
            fallback_score: 0.3,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 3,
            max_attempts: 3,
            retry_base_delay_ms: 1000,
            inter_start_delay_ms: 1000,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            download_path: dirs::audio_dir()
                .map(|dir| dir.join("SpotifyDownloads"))
                .unwrap_or_else(|| PathBuf::from("./SpotifyDownloads")),
            preferred_quality: AudioQuality::Medium,
            preferred_format: AudioFormat::Mp3,
            ytdlp_path: "yt-dlp".to_string(),
            ffmpeg_location: None,
        }
    }
}

impl AppConfig {
    /// Loads defaults, then the JSON file at `path` (or the default location), then
    /// `PLDL_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::get_config_path()?,
        };

        let config: AppConfig = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(
                config::File::from(config_path.as_path())
                    .format(config::FileFormat::Json)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        log::debug!("Configuration resolved from {:?}", config_path);
        Ok(config)
    }

    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::get_config_path()?,
        };

        if let Some(config_dir) = config_path.parent() {
            if !config_dir.as_os_str().is_empty() && !config_dir.exists() {
                std::fs::create_dir_all(config_dir)?;
            }
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(config_path)
    }

    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| AppError::Config(config::ConfigError::Message("Could not find config directory".to_string())))?;

        Ok(config_dir.join("playlist-downloader").join("config.json"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.scheduler.max_concurrent_downloads == 0 {
            return Err(AppError::Validation("scheduler.max_concurrent_downloads must be at least 1".to_string()));
        }
        if self.scheduler.max_attempts == 0 {
            return Err(AppError::Validation("scheduler.max_attempts must be at least 1".to_string()));
        }
        if self.catalog.page_size == 0 {
            return Err(AppError::Validation("catalog.page_size must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn get_quality_bitrate(&self) -> u32 {
        self.export.preferred_quality.bitrate()
    }

    pub fn get_format_extension(&self) -> &'static str {
        self.export.preferred_format.extension()
    }
}

impl AudioQuality {
    pub fn bitrate(&self) -> u32 {
        match self {
            AudioQuality::Low => 128,
            AudioQuality::Medium => 192,
            AudioQuality::High => 256,
            AudioQuality::Best => 320,
        }
    }
}

impl AudioFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::M4a => "m4a",
            AudioFormat::Flac => "flac",
            AudioFormat::Wav => "wav",
        }
    }
}
