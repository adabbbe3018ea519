pub mod exporter;
pub mod manager;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::api::Track;
use crate::errors::{AppError, JobError, Result};
use crate::search::Candidate;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Searching,
    Matching,
    Downloading,
    Completed,
    Failed,
    Skipped,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Skipped)
    }

    /// Searching, Matching or Downloading.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Searching | JobStatus::Matching | JobStatus::Downloading)
    }

    /// Forward-only state machine. Failed is reachable from any non-terminal state,
    /// Skipped only once a job is active, Completed only from Downloading.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (_, JobStatus::Failed) => true,
            (from, JobStatus::Skipped) => from.is_active(),
            (JobStatus::Queued, JobStatus::Searching) => true,
            (JobStatus::Searching, JobStatus::Matching) => true,
            (JobStatus::Matching, JobStatus::Downloading) => true,
            (JobStatus::Downloading, JobStatus::Completed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            JobStatus::Queued => "Queued",
            JobStatus::Searching => "Searching",
            JobStatus::Matching => "Matching",
            JobStatus::Downloading => "Downloading",
            JobStatus::Completed => "Completed",
            JobStatus::Failed => "Failed",
            JobStatus::Skipped => "Skipped",
        };
        f.write_str(label)
    }
}

/// Per-track unit of work, owned by the worker processing it.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub index: usize,
    pub track: Track,
    pub attempt_count: u32,
    pub status: JobStatus,
    pub last_error: Option<JobError>,
    pub match_score: Option<f32>,
    pub output_path: Option<PathBuf>,
    pub history: Vec<JobStatus>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl DownloadJob {
    pub fn new(index: usize, track: Track) -> Self {
        Self {
            index,
            track,
            attempt_count: 0,
            status: JobStatus::Queued,
            last_error: None,
            match_score: None,
            output_path: None,
            history: vec![JobStatus::Queued],
            started_at: None,
        }
    }

    pub fn advance(&mut self, next: JobStatus) -> Result<JobStatus> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::Internal(format!(
                "illegal job transition {} -> {} for track {}",
                self.status, next, self.track.id
            )));
        }

        let previous = self.status;
        if previous == JobStatus::Queued && next.is_active() {
            self.attempt_count = 1;
            self.started_at = Some(chrono::Utc::now());
        }
        self.status = next;
        self.history.push(next);
        Ok(previous)
    }

    /// Terminal failure. Any recorded error is replaced by `error`.
    pub fn fail(&mut self, error: &AppError) {
        self.last_error = Some(error.into());
        let next = match error {
            AppError::NoMatch(_) if self.status.is_active() => JobStatus::Skipped,
            _ => JobStatus::Failed,
        };
        if let Err(e) = self.advance(next) {
            log::error!("{}", e);
        }
    }
}

/// Materializes a matched candidate as a local audio file.
#[async_trait::async_trait]
pub trait AudioExporter: Send + Sync {
    /// Returns the path written. An existing file with the same name is replaced.
    async fn export(&self, candidate: &Candidate, destination_name: &str) -> Result<PathBuf>;

    fn name(&self) -> &str;
}
