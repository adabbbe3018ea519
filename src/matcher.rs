use serde::{Deserialize, Serialize};

use crate::api::Track;
use crate::config::MatchConfig;
use crate::search::Candidate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchKind {
    /// Candidate title contains both the track title and the artist.
    Strict,
    /// No strict candidate; the top-ranked result was taken.
    Fallback,
    /// Nothing to choose from.
    Unmatched,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub track: Track,
    pub candidate: Option<Candidate>,
    pub score: f32,
    pub kind: MatchKind,
}

/// Lowercases, drops apostrophes, turns other punctuation into spaces and collapses whitespace.
pub fn normalize(text: &str) -> String {
    let mut cleaned = String::with_capacity(text.len());
    for c in text.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            cleaned.push(c);
        } else if !matches!(c, '\'' | '\u{2019}' | '`') {
            cleaned.push(' ');
        }
    }
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Both arguments must already be normalized. An empty title or artist never matches.
pub fn is_strict_match(candidate_title: &str, title: &str, artist: &str) -> bool {
    !title.is_empty()
        && !artist.is_empty()
        && candidate_title.contains(title)
        && candidate_title.contains(artist)
}

pub struct TrackMatcher {
    config: MatchConfig,
}

impl TrackMatcher {
    pub fn new(config: MatchConfig) -> Self {
        Self { config }
    }

    /// Two-tier selection: strict matches (preferring the duration window, then rank),
    /// otherwise the top-ranked candidate at reduced confidence.
    pub fn match_track(&self, track: &Track, candidates: &[Candidate]) -> MatchResult {
        let title = normalize(&track.title);
        let artist = normalize(&track.artist);

        let strict: Vec<&Candidate> = candidates
            .iter()
            .filter(|c| is_strict_match(&normalize(&c.display_title), &title, &artist))
            .collect();

        let (candidate, score, kind) = if let Some(best) = strict
            .iter()
            .find(|c| self.within_tolerance(track, c) == Some(true))
        {
            (Some(*best), self.config.strict_score, MatchKind::Strict)
        } else if let Some(first) = strict.first() {
            let score = match self.within_tolerance(track, first) {
                Some(_) => self.config.strict_out_of_tolerance_score,
                None => self.config.strict_no_duration_score,
            };
            (Some(*first), score, MatchKind::Strict)
        } else if let Some(top) = candidates.first() {
            (Some(top), self.config.fallback_score, MatchKind::Fallback)
        } else {
            (None, 0.0, MatchKind::Unmatched)
        };

        log::debug!(
            "Matched '{}' -> {:?} ({:?}, score {:.2}, {} strict of {})",
            track.display_name(),
            candidate.map(|c| c.display_title.as_str()),
            kind,
            score,
            strict.len(),
            candidates.len()
        );

        MatchResult {
            track: track.clone(),
            candidate: candidate.cloned(),
            score,
            kind,
        }
    }

    /// `None` when either side lacks a duration.
    fn within_tolerance(&self, track: &Track, candidate: &Candidate) -> Option<bool> {
        let candidate_secs = candidate.duration_seconds?;
        if track.duration_seconds == 0 {
            return None;
        }
        Some(candidate_secs.abs_diff(track.duration_seconds) <= self.config.duration_tolerance_secs)
    }
}

impl Default for TrackMatcher {
    fn default() -> Self {
        Self::new(MatchConfig::default())
    }
}
