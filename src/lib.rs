pub mod api;
pub mod commands;
pub mod config;
pub mod downloader;
pub mod errors;
pub mod http;
pub mod matcher;
pub mod pipeline;
pub mod progress;
pub mod search;
pub mod utils;

pub use api::{CatalogFetcher, CatalogSource, PlaylistSummary, Track};
pub use config::AppConfig;
pub use downloader::manager::{DownloadScheduler, RunHandle, SchedulerSettings};
pub use downloader::{AudioExporter, JobStatus};
pub use errors::{AppError, ErrorKind, Result};
pub use matcher::{MatchKind, MatchResult, TrackMatcher};
pub use pipeline::Pipeline;
pub use progress::{JobReport, ProgressSnapshot, RunReport};
pub use search::{Candidate, CandidateSearcher, SearchIndex};
