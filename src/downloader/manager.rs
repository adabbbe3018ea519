use std::collections::VecDeque;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::Track;
use crate::config::AppConfig;
use crate::downloader::{AudioExporter, DownloadJob, JobStatus};
use crate::errors::{AppError, Result};
use crate::http::backoff_delay;
use crate::matcher::TrackMatcher;
use crate::progress::{JobEvent, JobReport, ProgressReporter, ProgressSnapshot, RunReport};
use crate::search::CandidateSearcher;
use crate::utils::{generate_run_id, sanitize_track_filename};

type JobQueue = Arc<Mutex<VecDeque<(usize, Track)>>>;

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Job-wide budget shared by the search and download stages.
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
    /// Pause a worker takes before starting each job after its first.
    pub inter_start_delay: Duration,
    pub max_results: usize,
}

impl SchedulerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_attempts: config.scheduler.max_attempts.max(1),
            retry_base_delay: Duration::from_millis(config.scheduler.retry_base_delay_ms),
            inter_start_delay: Duration::from_millis(config.scheduler.inter_start_delay_ms),
            max_results: config.search.max_results,
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// A run in flight: the progress stream plus the eventual report.
pub struct RunHandle {
    run_id: String,
    progress: mpsc::UnboundedReceiver<ProgressSnapshot>,
    report: JoinHandle<RunReport>,
}

impl RunHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Next snapshot, or `None` once the run's final snapshot has been delivered.
    pub async fn next_progress(&mut self) -> Option<ProgressSnapshot> {
        self.progress.recv().await
    }

    /// Feeds every remaining snapshot to `on_progress`, then returns the report.
    pub async fn wait_with_progress<F>(mut self, mut on_progress: F) -> Result<RunReport>
    where
        F: FnMut(&ProgressSnapshot),
    {
        while let Some(snapshot) = self.progress.recv().await {
            on_progress(&snapshot);
        }
        self.report
            .await
            .map_err(|e| AppError::Internal(format!("run {} aborted: {}", self.run_id, e)))
    }

    pub async fn wait(self) -> Result<RunReport> {
        self.wait_with_progress(|_| {}).await
    }
}

/// Bounded worker pool driving each track through search, match and export.
pub struct DownloadScheduler {
    searcher: Arc<CandidateSearcher>,
    matcher: Arc<TrackMatcher>,
    exporter: Arc<dyn AudioExporter>,
    settings: SchedulerSettings,
}

impl DownloadScheduler {
    pub fn new(
        searcher: Arc<CandidateSearcher>,
        matcher: Arc<TrackMatcher>,
        exporter: Arc<dyn AudioExporter>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            searcher,
            matcher,
            exporter,
            settings,
        }
    }

    /// Starts `concurrency` workers over `tracks`. Every track ends with exactly one
    /// terminal status in the returned report, in submission order.
    pub fn run(self: &Arc<Self>, tracks: Vec<Track>, concurrency: usize, cancel: CancellationToken) -> RunHandle {
        let run_id = generate_run_id();
        let worker_count = concurrency.max(1).min(tracks.len().max(1));
        log::info!(
            "[{}] scheduling {} track(s) on {} worker(s) via {}",
            run_id,
            tracks.len(),
            worker_count,
            self.exporter.name()
        );

        let active = Arc::new(AtomicUsize::new(0));
        let reporter = ProgressReporter::new(run_id.clone(), &tracks, active.clone());
        let queue: JobQueue = Arc::new(Mutex::new(tracks.into_iter().enumerate().collect()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();

        let workers: Vec<JoinHandle<()>> = (0..worker_count)
            .map(|worker_id| {
                let scheduler = Arc::clone(self);
                let queue = queue.clone();
                let events = events_tx.clone();
                let active = active.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { scheduler.worker(worker_id, queue, events, active, cancel).await })
            })
            .collect();
        drop(events_tx);

        let report = tokio::spawn(async move {
            let (report, results) = tokio::join!(
                reporter.consume(events_rx, progress_tx),
                futures::future::join_all(workers)
            );
            for result in results {
                if let Err(e) = result {
                    log::error!("Download worker terminated abnormally: {}", e);
                }
            }
            report
        });

        RunHandle {
            run_id,
            progress: progress_rx,
            report,
        }
    }

    async fn worker(
        &self,
        worker_id: usize,
        queue: JobQueue,
        events: mpsc::UnboundedSender<JobEvent>,
        active: Arc<AtomicUsize>,
        cancel: CancellationToken,
    ) {
        let mut first = true;
        loop {
            let next = queue.lock().await.pop_front();
            let (index, track) = match next {
                Some(item) => item,
                None => break,
            };

            if !first && !cancel.is_cancelled() && !self.settings.inter_start_delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.settings.inter_start_delay) => {}
                }
            }
            first = false;

            let report = self.process(index, track, &events, &active, &cancel).await;
            if events.send(JobEvent::Finished(report)).is_err() {
                log::warn!("Worker {} lost its progress sink", worker_id);
                break;
            }
        }
        log::debug!("Worker {} idle, exiting", worker_id);
    }

    async fn process(
        &self,
        index: usize,
        track: Track,
        events: &mpsc::UnboundedSender<JobEvent>,
        active: &AtomicUsize,
        cancel: &CancellationToken,
    ) -> JobReport {
        let mut job = DownloadJob::new(index, track);
        if cancel.is_cancelled() {
            job.fail(&AppError::Cancelled);
            return job.into();
        }

        active.fetch_add(1, Ordering::SeqCst);
        match self.drive(&mut job, events, cancel).await {
            Ok(path) => {
                job.output_path = Some(path);
                if let Err(e) = job.advance(JobStatus::Completed) {
                    job.fail(&e);
                }
            }
            Err(e) => job.fail(&e),
        }
        active.fetch_sub(1, Ordering::SeqCst);
        job.into()
    }

    async fn drive(
        &self,
        job: &mut DownloadJob,
        events: &mpsc::UnboundedSender<JobEvent>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let track = job.track.clone();

        self.enter(job, JobStatus::Searching, events, cancel)?;
        let max_results = self.settings.max_results;
        let candidates = self
            .with_retry(job, cancel, || self.searcher.search(&track, max_results))
            .await?;

        self.enter(job, JobStatus::Matching, events, cancel)?;
        let matched = self.matcher.match_track(&track, &candidates);
        job.match_score = Some(matched.score);
        let candidate = matched.candidate.ok_or_else(|| {
            AppError::NoMatch(format!("no candidates for '{}'", track.display_name()))
        })?;

        self.enter(job, JobStatus::Downloading, events, cancel)?;
        let destination = sanitize_track_filename(&track.title, &track.artist);
        self.with_retry(job, cancel, || self.exporter.export(&candidate, &destination))
            .await
    }

    /// Cancellation is observed at every stage boundary.
    fn enter(
        &self,
        job: &mut DownloadJob,
        stage: JobStatus,
        events: &mpsc::UnboundedSender<JobEvent>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        let from = job.advance(stage)?;
        let _ = events.send(JobEvent::Transition {
            index: job.index,
            track_id: job.track.id.clone(),
            from,
            to: stage,
            attempt: job.attempt_count,
        });
        Ok(())
    }

    /// Repeats `operation` on transient errors while the job's attempt budget lasts.
    async fn with_retry<T, F, Fut>(&self, job: &mut DownloadJob, cancel: &CancellationToken, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        loop {
            let result = tokio::select! {
                biased;
                result = operation() => result,
                _ = cancel.cancelled() => Err(AppError::Cancelled),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && job.attempt_count < self.settings.max_attempts => {
                    let delay = backoff_delay(self.settings.retry_base_delay.as_millis() as u64, job.attempt_count);
                    log::warn!(
                        "{} '{}' attempt {}/{} failed during {}: {}; retrying in {:?}",
                        job.track.id,
                        job.track.display_name(),
                        job.attempt_count,
                        self.settings.max_attempts,
                        job.status,
                        e,
                        delay
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(AppError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    job.attempt_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::sample_track;
    use crate::config::SearchConfig;
    use crate::errors::ErrorKind;
    use crate::search::testing::{candidate, FakeIndex};
    use crate::search::Candidate;
    use async_trait::async_trait;

    /// Exporter that fails with queued errors first, then succeeds.
    #[derive(Default)]
    struct FakeExporter {
        failures: std::sync::Mutex<Vec<AppError>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AudioExporter for FakeExporter {
        async fn export(&self, _candidate: &Candidate, destination_name: &str) -> Result<PathBuf> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut failures = self.failures.lock().unwrap();
            if !failures.is_empty() {
                return Err(failures.remove(0));
            }
            Ok(PathBuf::from(format!("/music/{}.mp3", destination_name)))
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    fn settings() -> SchedulerSettings {
        SchedulerSettings {
            max_attempts: 3,
            retry_base_delay: Duration::from_millis(1),
            inter_start_delay: Duration::ZERO,
            max_results: 5,
        }
    }

    fn scheduler(index: FakeIndex, exporter: Arc<FakeExporter>) -> Arc<DownloadScheduler> {
        let searcher = CandidateSearcher::new(Arc::new(index), &SearchConfig::default());
        Arc::new(DownloadScheduler::new(
            Arc::new(searcher),
            Arc::new(TrackMatcher::default()),
            exporter,
            settings(),
        ))
    }

    fn index_for_all() -> FakeIndex {
        FakeIndex::default().with_response("song", vec![candidate("Artist - Song", None)])
    }

    #[tokio::test]
    async fn test_search_retry_shares_attempt_budget() {
        let index = index_for_all().failing_with(vec![AppError::SearchUnavailable("timeout".into())]);
        let exporter = Arc::new(FakeExporter::default());
        exporter
            .failures
            .lock()
            .unwrap()
            .push(AppError::DownloadUnavailable("reset".into()));

        let report = scheduler(index, exporter.clone())
            .run(vec![sample_track(1)], 1, CancellationToken::new())
            .wait()
            .await
            .unwrap();

        assert_eq!(report.jobs[0].status, JobStatus::Completed);
        assert_eq!(report.jobs[0].attempt_count, 3);
        assert_eq!(exporter.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_fail_with_last_error() {
        let exporter = Arc::new(FakeExporter::default());
        *exporter.failures.lock().unwrap() = vec![
            AppError::DownloadUnavailable("one".into()),
            AppError::DownloadUnavailable("two".into()),
            AppError::DownloadUnavailable("three".into()),
            AppError::DownloadUnavailable("four".into()),
        ];

        let report = scheduler(index_for_all(), exporter.clone())
            .run(vec![sample_track(1)], 1, CancellationToken::new())
            .wait()
            .await
            .unwrap();

        let job = &report.jobs[0];
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempt_count, 3);
        let error = job.error.as_ref().unwrap();
        assert_eq!(error.kind, ErrorKind::DownloadUnavailable);
        assert!(error.message.contains("three"));
        assert_eq!(exporter.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_export_error_is_not_retried() {
        let exporter = Arc::new(FakeExporter::default());
        exporter.failures.lock().unwrap().push(AppError::Export("unsupported codec".into()));

        let report = scheduler(index_for_all(), exporter.clone())
            .run(vec![sample_track(1), sample_track(2)], 2, CancellationToken::new())
            .wait()
            .await
            .unwrap();

        assert_eq!(exporter.calls.load(Ordering::SeqCst), 2);
        assert_eq!(report.count(JobStatus::Failed), 1);
        assert_eq!(report.count(JobStatus::Completed), 1);
    }

    #[tokio::test]
    async fn test_no_candidates_is_skipped() {
        let exporter = Arc::new(FakeExporter::default());
        let report = scheduler(FakeIndex::default(), exporter.clone())
            .run(vec![sample_track(1)], 1, CancellationToken::new())
            .wait()
            .await
            .unwrap();

        let job = &report.jobs[0];
        assert_eq!(job.status, JobStatus::Skipped);
        assert_eq!(job.error.as_ref().unwrap().kind, ErrorKind::NoMatch);
        assert_eq!(
            job.history,
            vec![JobStatus::Queued, JobStatus::Searching, JobStatus::Matching, JobStatus::Skipped]
        );
        assert_eq!(exporter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_pre_cancelled_run_fails_every_job() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let exporter = Arc::new(FakeExporter::default());

        let handle = scheduler(index_for_all(), exporter.clone()).run((0..4).map(sample_track).collect(), 2, cancel);
        let mut snapshots = Vec::new();
        let report = handle.wait_with_progress(|s| snapshots.push(*s)).await.unwrap();

        assert!(report
            .jobs
            .iter()
            .all(|j| j.status == JobStatus::Failed && j.error.as_ref().unwrap().kind == ErrorKind::Cancelled));
        assert_eq!(exporter.calls.load(Ordering::SeqCst), 0);
        assert_eq!(snapshots.last().map(|s| s.completed), Some(4));
    }

    #[tokio::test]
    async fn test_output_path_uses_title_and_artist() {
        let exporter = Arc::new(FakeExporter::default());
        let mut track = sample_track(1);
        track.title = "What/Ever".into();

        let report = scheduler(
            FakeIndex::default().with_response("what ever", vec![candidate("x", None)]),
            exporter,
        )
        .run(vec![track], 1, CancellationToken::new())
        .wait()
        .await
        .unwrap();

        assert_eq!(
            report.jobs[0].output_path,
            Some(PathBuf::from("/music/What_Ever - Artist 1.mp3"))
        );
    }

    #[tokio::test]
    async fn test_empty_run_reports_nothing() {
        let exporter = Arc::new(FakeExporter::default());
        let handle = scheduler(index_for_all(), exporter).run(Vec::new(), 3, CancellationToken::new());
        let mut snapshots = Vec::new();
        let report = handle.wait_with_progress(|s| snapshots.push(*s)).await.unwrap();

        assert!(report.jobs.is_empty());
        assert_eq!(snapshots, vec![ProgressSnapshot::new(0, 0, 0)]);
    }
}
