use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::{AppConfig, AudioFormat};
use crate::downloader::AudioExporter;
use crate::errors::{AppError, Result};
use crate::search::Candidate;
use crate::utils::{ensure_dir_exists, sanitize_filename};

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "flac", "wav", "opus", "ogg", "webm", "aac"];

/// stderr fragments that mark a failure as a network problem rather than a bad source.
const TRANSIENT_MARKERS: &[&str] = &[
    "http error 5",
    "http error 429",
    "timed out",
    "connection reset",
    "temporary failure",
    "unable to download webpage",
    "remote end closed",
    "network is unreachable",
];

/// Fetches the candidate's audio with yt-dlp and transcodes it through ffmpeg.
///
/// Each export runs in a private scratch directory inside the output directory and
/// the result is moved into place, so a failed export never leaves a partial file
/// under the final name.
pub struct YtDlpExporter {
    ytdlp_path: String,
    ffmpeg_location: Option<PathBuf>,
    proxy: Option<String>,
    output_dir: PathBuf,
    format: AudioFormat,
    bitrate: u32,
}

impl YtDlpExporter {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            ytdlp_path: config.export.ytdlp_path.clone(),
            ffmpeg_location: config.export.ffmpeg_location.clone(),
            proxy: config.proxy.clone(),
            output_dir: config.export.download_path.clone(),
            format: config.export.preferred_format,
            bitrate: config.get_quality_bitrate(),
        }
    }

    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    fn build_args(&self, source_url: &str, scratch_dir: &Path) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "--no-playlist".into(),
            "--no-warnings".into(),
            "--extract-audio".into(),
            "--audio-format".into(),
            self.format.extension().into(),
            "--audio-quality".into(),
            format!("{}K", self.bitrate),
            "--output".into(),
            scratch_dir.join("audio.%(ext)s").to_string_lossy().into_owned(),
        ];

        if let Some(ffmpeg) = &self.ffmpeg_location {
            args.push("--ffmpeg-location".into());
            args.push(ffmpeg.to_string_lossy().into_owned());
        }
        if let Some(proxy) = &self.proxy {
            args.push("--proxy".into());
            args.push(proxy.clone());
        }

        args.push("--".into());
        args.push(source_url.to_string());
        args
    }
}

#[async_trait]
impl AudioExporter for YtDlpExporter {
    async fn export(&self, candidate: &Candidate, destination_name: &str) -> Result<PathBuf> {
        ensure_dir_exists(&self.output_dir).await?;

        let extension = self.format.extension();
        let destination = self
            .output_dir
            .join(format!("{}.{}", sanitize_filename(destination_name), extension));

        let scratch = tempfile::Builder::new()
            .prefix(".pldl-")
            .tempdir_in(&self.output_dir)?;

        let args = self.build_args(&candidate.source_url, scratch.path());
        log::debug!("Running {} {:?}", self.ytdlp_path, args);

        let output = Command::new(&self.ytdlp_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AppError::Export(format!("failed to start {}: {}", self.ytdlp_path, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&stderr, &output.status.to_string()));
        }

        let exported = find_exported_file(scratch.path(), extension)
            .await?
            .ok_or_else(|| AppError::Export(format!("yt-dlp produced no audio file for {}", candidate.source_url)))?;

        replace_file(&exported, &destination).await?;
        log::debug!("Exported {} -> {:?}", candidate.source_url, destination);
        Ok(destination)
    }

    fn name(&self) -> &str {
        "yt-dlp"
    }
}

fn classify_failure(stderr: &str, status: &str) -> AppError {
    let lowered = stderr.to_lowercase();
    let detail = stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or(status)
        .to_string();

    if TRANSIENT_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        AppError::DownloadUnavailable(detail)
    } else {
        AppError::Export(detail)
    }
}

/// Prefers a file with the requested extension, then any audio file.
async fn find_exported_file(dir: &Path, extension: &str) -> Result<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut fallback = None;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some(ext) if ext == extension => return Ok(Some(path)),
            Some(ext) if AUDIO_EXTENSIONS.contains(&ext) => fallback = Some(path),
            _ => {}
        }
    }

    Ok(fallback)
}

/// Moves `from` onto `to`, replacing whatever is already there.
async fn replace_file(from: &Path, to: &Path) -> Result<()> {
    if tokio::fs::try_exists(to).await? {
        tokio::fs::remove_file(to).await?;
    }
    tokio::fs::rename(from, to).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn exporter(dir: &Path) -> YtDlpExporter {
        YtDlpExporter::from_config(&AppConfig::default()).with_output_dir(dir)
    }

    #[test]
    fn test_classify_transport_failures_as_retryable() {
        let err = classify_failure("ERROR: Unable to download webpage: HTTP Error 503: Service Unavailable\n", "exit 1");
        assert!(matches!(err, AppError::DownloadUnavailable(_)));
        assert!(err.is_transient());

        let err = classify_failure("ERROR: [youtube] abc: Read timed out.", "exit 1");
        assert!(matches!(err, AppError::DownloadUnavailable(_)));
    }

    #[test]
    fn test_classify_other_failures_as_export_errors() {
        let err = classify_failure("ERROR: Postprocessing: ffprobe and ffmpeg not found\n", "exit 1");
        assert!(matches!(err, AppError::Export(ref msg) if msg.contains("ffmpeg not found")));
        assert!(!err.is_transient());

        let err = classify_failure("", "exit status: 2");
        assert!(matches!(err, AppError::Export(ref msg) if msg == "exit status: 2"));
    }

    #[test]
    fn test_build_args_ends_with_source_url() {
        let dir = TempDir::new().unwrap();
        let mut exporter = exporter(dir.path());
        exporter.proxy = Some("http://127.0.0.1:8080".into());
        let args = exporter.build_args("https://www.youtube.com/watch?v=-abc", dir.path());

        assert_eq!(&args[args.len() - 2..], ["--", "https://www.youtube.com/watch?v=-abc"]);
        assert!(args.windows(2).any(|w| w[0] == "--audio-quality" && w[1] == "192K"));
        assert!(args.windows(2).any(|w| w[0] == "--audio-format" && w[1] == "mp3"));
        assert!(args.windows(2).any(|w| w[0] == "--proxy" && w[1] == "http://127.0.0.1:8080"));
    }

    #[tokio::test]
    async fn test_find_exported_file_prefers_requested_extension() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("audio.webm"), b"x").unwrap();
        std::fs::write(dir.path().join("audio.mp3"), b"x").unwrap();
        std::fs::write(dir.path().join("audio.jpg"), b"x").unwrap();

        let found = find_exported_file(dir.path(), "mp3").await.unwrap();
        assert_eq!(found, Some(dir.path().join("audio.mp3")));

        let found = find_exported_file(dir.path(), "flac").await.unwrap();
        assert_eq!(found, Some(dir.path().join("audio.webm")));
    }

    #[tokio::test]
    async fn test_replace_file_overwrites_existing_destination() {
        let dir = TempDir::new().unwrap();
        let destination = dir.path().join("Song - Band.mp3");
        std::fs::write(&destination, b"old").unwrap();

        for content in ["first", "second"] {
            let staged = dir.path().join("staged.mp3");
            std::fs::write(&staged, content).unwrap();
            replace_file(&staged, &destination).await.unwrap();
            assert!(!staged.exists());
        }

        assert_eq!(std::fs::read_to_string(&destination).unwrap(), "second");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_missing_binary_is_export_error_and_leaves_no_scratch() {
        let dir = TempDir::new().unwrap();
        let mut exporter = exporter(dir.path());
        exporter.ytdlp_path = "/nonexistent/yt-dlp-binary".into();
        let candidate = Candidate {
            source_url: "https://www.youtube.com/watch?v=abc".into(),
            display_title: "Band - Song".into(),
            duration_seconds: None,
        };

        let result = exporter.export(&candidate, "Song - Band").await;

        assert!(matches!(result, Err(AppError::Export(_))));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
