use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use crate::errors::{AppError, Result};
use crate::search::{Candidate, SearchIndex};

/// yt-dlp backed search over the video host's `ytsearch` extractor.
pub struct YtDlpSearchIndex {
    ytdlp_path: String,
    proxy: Option<String>,
}

/// The subset of a flat-playlist entry we read.
#[derive(Debug, Deserialize)]
struct SearchEntry {
    id: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
    webpage_url: Option<String>,
    url: Option<String>,
}

impl YtDlpSearchIndex {
    pub fn new(ytdlp_path: impl Into<String>) -> Self {
        Self {
            ytdlp_path: ytdlp_path.into(),
            proxy: None,
        }
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    fn build_args(&self, query: &str, limit: usize) -> Vec<String> {
        let mut args: Vec<String> = [
            "--dump-json",
            "--flat-playlist",
            "--no-warnings",
            "--ignore-errors",
            "--socket-timeout",
            "10",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        if let Some(proxy) = &self.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }

        args.push(format!("ytsearch{}:{}", limit, query));
        args
    }
}

#[async_trait]
impl SearchIndex for YtDlpSearchIndex {
    async fn query(&self, query: &str, limit: usize) -> Result<Vec<Candidate>> {
        let args = self.build_args(query, limit);
        log::debug!("Running {} {:?}", self.ytdlp_path, args);

        let output = Command::new(&self.ytdlp_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AppError::SearchUnavailable(format!("failed to start {}: {}", self.ytdlp_path, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::SearchUnavailable(format!(
                "yt-dlp search exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(parse_search_output(&String::from_utf8_lossy(&output.stdout)))
    }

    fn name(&self) -> &str {
        "yt-dlp"
    }
}

/// One JSON document per line; unparseable or incomplete lines are skipped.
fn parse_search_output(stdout: &str) -> Vec<Candidate> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match serde_json::from_str::<SearchEntry>(line) {
            Ok(entry) => entry_to_candidate(entry),
            Err(e) => {
                log::warn!("Skipping unparseable search result line: {}", e);
                None
            }
        })
        .collect()
}

fn entry_to_candidate(entry: SearchEntry) -> Option<Candidate> {
    let source_url = entry
        .webpage_url
        .or(entry.url)
        .or_else(|| entry.id.map(|id| format!("https://www.youtube.com/watch?v={}", id)))?;

    Some(Candidate {
        source_url,
        display_title: entry.title?,
        duration_seconds: entry
            .duration
            .filter(|d| d.is_finite() && *d >= 0.0)
            .map(|d| d.round() as u32),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search_output() {
        let stdout = r#"
{"id": "JGwWNGJdvx8", "title": "Ed Sheeran - Shape of You (Official Music Video)", "duration": 263.0, "url": "https://www.youtube.com/watch?v=JGwWNGJdvx8"}
not json
{"id": "abc", "title": "Shape of You (Audio)", "duration": null}
{"id": "untitled"}
"#;
        let candidates = parse_search_output(stdout);

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].source_url, "https://www.youtube.com/watch?v=JGwWNGJdvx8");
        assert_eq!(candidates[0].duration_seconds, Some(263));
        assert_eq!(candidates[1].source_url, "https://www.youtube.com/watch?v=abc");
        assert_eq!(candidates[1].duration_seconds, None);
    }

    #[test]
    fn test_parse_empty_output() {
        assert!(parse_search_output("").is_empty());
    }

    #[test]
    fn test_build_args_puts_query_last() {
        let index = YtDlpSearchIndex::new("yt-dlp").with_proxy(Some("socks5://127.0.0.1:1080".into()));
        let args = index.build_args("shape of you ed sheeran audio", 5);
        assert_eq!(args.last().unwrap(), "ytsearch5:shape of you ed sheeran audio");
        assert!(args.windows(2).any(|w| w[0] == "--proxy" && w[1] == "socks5://127.0.0.1:1080"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_search_unavailable() {
        let index = YtDlpSearchIndex::new("/nonexistent/yt-dlp-binary");
        assert!(matches!(index.query("x", 1).await, Err(AppError::SearchUnavailable(_))));
    }
}
