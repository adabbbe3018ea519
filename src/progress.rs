use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::api::Track;
use crate::downloader::{DownloadJob, JobStatus};
use crate::errors::{AppError, JobError};

/// Overall progress of a run. Emitted once per terminal job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub completed: usize,
    pub total: usize,
    /// `floor(completed / total * 100)`, 100 for an empty run.
    pub percentage: u8,
    /// Jobs currently searching, matching or downloading.
    pub active: usize,
}

impl ProgressSnapshot {
    pub fn new(completed: usize, total: usize, active: usize) -> Self {
        let percentage = if total == 0 {
            100
        } else {
            (completed.min(total) * 100 / total) as u8
        };
        Self { completed, total, percentage, active }
    }

    pub fn is_final(&self) -> bool {
        self.completed == self.total
    }
}

/// Terminal outcome of one job, kept after the job itself is discarded.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub index: usize,
    pub track: Track,
    pub status: JobStatus,
    pub attempt_count: u32,
    pub error: Option<JobError>,
    pub output_path: Option<PathBuf>,
    pub match_score: Option<f32>,
    pub history: Vec<JobStatus>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
}

impl From<DownloadJob> for JobReport {
    fn from(job: DownloadJob) -> Self {
        Self {
            index: job.index,
            track: job.track,
            status: job.status,
            attempt_count: job.attempt_count,
            error: job.last_error,
            output_path: job.output_path,
            match_score: job.match_score,
            history: job.history,
            started_at: job.started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Worker to reporter messages.
#[derive(Debug, Clone)]
pub enum JobEvent {
    Transition {
        index: usize,
        track_id: String,
        from: JobStatus,
        to: JobStatus,
        attempt: u32,
    },
    Finished(JobReport),
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    /// One entry per submitted track, in submission order.
    pub jobs: Vec<JobReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|job| job.status == status).count()
    }

    pub fn success_count(&self) -> usize {
        self.count(JobStatus::Completed)
    }

    pub fn total(&self) -> usize {
        self.jobs.len()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for job in &self.jobs {
            write!(f, "{:>4}. {:<10} {}", job.index + 1, job.status.to_string(), job.track.display_name())?;
            match (&job.error, &job.output_path) {
                (Some(error), _) => write!(f, " ({})", error)?,
                (None, Some(path)) => write!(f, " -> {}", path.display())?,
                (None, None) => {}
            }
            writeln!(f)?;
        }
        write!(
            f,
            "{}/{} completed ({} skipped, {} failed)",
            self.success_count(),
            self.total(),
            self.count(JobStatus::Skipped),
            self.count(JobStatus::Failed)
        )
    }
}

/// Single consumer of job events. Owns the completed counter, so snapshots are
/// totally ordered without locking.
pub struct ProgressReporter {
    run_id: String,
    tracks: Vec<Track>,
    reports: Vec<Option<JobReport>>,
    completed: usize,
    active: Arc<AtomicUsize>,
    started_at: DateTime<Utc>,
}

impl ProgressReporter {
    pub fn new(run_id: impl Into<String>, tracks: &[Track], active: Arc<AtomicUsize>) -> Self {
        Self {
            run_id: run_id.into(),
            tracks: tracks.to_vec(),
            reports: vec![None; tracks.len()],
            completed: 0,
            active,
            started_at: Utc::now(),
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot::new(self.completed, self.tracks.len(), self.active.load(Ordering::SeqCst))
    }

    /// Records a terminal job. Returns `None` for an unknown or already recorded index.
    pub fn record(&mut self, report: JobReport) -> Option<ProgressSnapshot> {
        let slot = self.reports.get_mut(report.index)?;
        if slot.is_some() {
            log::warn!("[{}] duplicate terminal report for job {}", self.run_id, report.index);
            return None;
        }

        log_terminal(&self.run_id, &report);
        *slot = Some(report);
        self.completed += 1;
        Some(self.snapshot())
    }

    /// Drains `events` until every sender is gone, forwarding one snapshot per terminal job.
    pub async fn consume(
        mut self,
        mut events: UnboundedReceiver<JobEvent>,
        snapshots: UnboundedSender<ProgressSnapshot>,
    ) -> RunReport {
        if self.tracks.is_empty() {
            let _ = snapshots.send(self.snapshot());
        }

        while let Some(event) = events.recv().await {
            match event {
                JobEvent::Transition { index, track_id, from, to, attempt } => {
                    log::debug!(
                        "[{}] job {} ({}) {} -> {} (attempt {})",
                        self.run_id, index, track_id, from, to, attempt
                    );
                }
                JobEvent::Finished(report) => {
                    if let Some(snapshot) = self.record(report) {
                        let _ = snapshots.send(snapshot);
                    }
                }
            }
        }

        // A worker that died mid-job still owes a terminal status.
        let missing: Vec<usize> = self
            .reports
            .iter()
            .enumerate()
            .filter(|(_, report)| report.is_none())
            .map(|(index, _)| index)
            .collect();
        for index in missing {
            let mut job = DownloadJob::new(index, self.tracks[index].clone());
            job.fail(&AppError::Internal("worker terminated before reporting".to_string()));
            if let Some(snapshot) = self.record(job.into()) {
                let _ = snapshots.send(snapshot);
            }
        }

        self.finish()
    }

    pub fn finish(self) -> RunReport {
        let jobs = self
            .reports
            .into_iter()
            .zip(self.tracks)
            .enumerate()
            .map(|(index, (report, track))| {
                report.unwrap_or_else(|| {
                    let mut job = DownloadJob::new(index, track);
                    job.fail(&AppError::Internal("no terminal status recorded".to_string()));
                    job.into()
                })
            })
            .collect();

        RunReport {
            run_id: self.run_id,
            jobs,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

fn log_terminal(run_id: &str, report: &JobReport) {
    let track = &report.track;
    match report.status {
        JobStatus::Completed => log::info!(
            "[{}] {} '{}' completed after {} attempt(s)",
            run_id,
            track.id,
            track.display_name(),
            report.attempt_count
        ),
        JobStatus::Skipped => log::warn!(
            "[{}] {} '{}' skipped after {} attempt(s): {}",
            run_id,
            track.id,
            track.display_name(),
            report.attempt_count,
            report.error.as_ref().map(|e| e.to_string()).unwrap_or_default()
        ),
        _ => log::error!(
            "[{}] {} '{}' failed after {} attempt(s): {}",
            run_id,
            track.id,
            track.display_name(),
            report.attempt_count,
            report.error.as_ref().map(|e| e.to_string()).unwrap_or_default()
        ),
    }
}
