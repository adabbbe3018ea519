pub mod ytdlp;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use serde::{Deserialize, Serialize};

use crate::api::Track;
use crate::config::SearchConfig;
use crate::errors::Result;
use crate::matcher::normalize;

/// A search hit considered as the audio source for a track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub source_url: String,
    pub display_title: String,
    pub duration_seconds: Option<u32>,
}

/// External search index. Results come back in the index's own relevance order.
///
/// An empty result set is `Ok(vec![])`; only transport or protocol failures are errors.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn query(&self, query: &str, limit: usize) -> Result<Vec<Candidate>>;

    fn name(&self) -> &str;
}

pub struct CandidateSearcher {
    index: Arc<dyn SearchIndex>,
    query_hint: Option<String>,
    cache: Cache<String, Arc<Vec<Candidate>>>,
}

impl CandidateSearcher {
    pub fn new(index: Arc<dyn SearchIndex>, config: &SearchConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.cache_capacity)
            .time_to_live(Duration::from_secs(config.cache_ttl_secs))
            .build();

        Self {
            index,
            query_hint: config
                .query_hint
                .as_ref()
                .map(|hint| hint.trim().to_string())
                .filter(|hint| !hint.is_empty()),
            cache,
        }
    }

    pub fn build_query(&self, track: &Track) -> String {
        let mut parts = vec![normalize(&track.title), normalize(&track.artist)];
        if let Some(hint) = &self.query_hint {
            parts.push(hint.clone());
        }
        parts.retain(|part| !part.is_empty());
        parts.join(" ")
    }

    /// Returns up to `max_results` candidates without re-ranking them.
    pub async fn search(&self, track: &Track, max_results: usize) -> Result<Vec<Candidate>> {
        if max_results == 0 {
            return Ok(Vec::new());
        }

        let query = self.build_query(track);
        let cache_key = format!("{}|{}", query, max_results);
        if let Some(cached) = self.cache.get(&cache_key).await {
            log::debug!("Search cache hit for '{}'", query);
            return Ok(cached.as_ref().clone());
        }

        log::debug!("Searching {} for '{}' (limit {})", self.index.name(), query, max_results);
        let mut candidates = self.index.query(&query, max_results).await?;
        candidates.truncate(max_results);
        log::debug!("{} candidates for '{}'", candidates.len(), query);

        self.cache.insert(cache_key, Arc::new(candidates.clone())).await;
        Ok(candidates)
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use crate::errors::AppError;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Canned search index keyed by query substring.
    #[derive(Default)]
    pub struct FakeIndex {
        responses: Mutex<HashMap<String, Vec<Candidate>>>,
        failures: Mutex<Vec<AppError>>,
        pub queries: Mutex<Vec<String>>,
    }

    impl FakeIndex {
        pub fn with_response(self, query_contains: &str, candidates: Vec<Candidate>) -> Self {
            self.responses.lock().unwrap().insert(query_contains.to_string(), candidates);
            self
        }

        pub fn failing_with(self, errors: Vec<AppError>) -> Self {
            *self.failures.lock().unwrap() = errors;
            self
        }
    }

    #[async_trait]
    impl SearchIndex for FakeIndex {
        async fn query(&self, query: &str, limit: usize) -> Result<Vec<Candidate>> {
            self.queries.lock().unwrap().push(query.to_string());
            {
                let mut failures = self.failures.lock().unwrap();
                if !failures.is_empty() {
                    return Err(failures.remove(0));
                }
            }
            let responses = self.responses.lock().unwrap();
            let mut hits = responses
                .iter()
                .find(|(pattern, _)| query.contains(pattern.as_str()))
                .map(|(_, candidates)| candidates.clone())
                .unwrap_or_default();
            hits.truncate(limit);
            Ok(hits)
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    pub fn candidate(title: &str, duration: Option<u32>) -> Candidate {
        Candidate {
            source_url: format!("https://www.youtube.com/watch?v={}", title.len()),
            display_title: title.to_string(),
            duration_seconds: duration,
        }
    }
}
