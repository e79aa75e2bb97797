// THEORY:
// The `tracker` module gives the matcher memory. A single frame's match is a noisy
// observation; what a caregiver cares about is whether the subject keeps showing up.
//
// Key architectural principles:
// 1.  **Bounded history**: the most recent matches are kept newest-first in a
//     fixed-capacity `VecDeque`. Old matches fall off the back, so memory use is
//     constant no matter how long a session runs.
// 2.  **Streaks**: `consecutive_matches` counts uninterrupted matching frames. Any
//     frame that produces no match (quick reject or no qualifying tile) breaks the
//     streak.
// 3.  **Rolling confidence**: `average_confidence` is always the mean of exactly the
//     retained history, recomputed on every push.
// 4.  **Counters**: `MatcherStats` is a cheap, copyable snapshot of how much work the
//     matcher has done, for logging and for the runner's final report.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::matcher::MatchResult;

/// How many matches the rolling history retains.
pub const MATCH_HISTORY_SIZE: usize = 20;

/// Observable rolling state of one matcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatcherState {
    pub is_active: bool,
    pub last_match: Option<MatchResult>,
    /// Newest first, at most `MATCH_HISTORY_SIZE` entries.
    pub match_history: VecDeque<MatchResult>,
    pub consecutive_matches: u32,
    pub average_confidence: f64,
}

impl Default for MatcherState {
    fn default() -> Self {
        Self {
            is_active: false,
            last_match: None,
            match_history: VecDeque::with_capacity(MATCH_HISTORY_SIZE),
            consecutive_matches: 0,
            average_confidence: 0.0,
        }
    }
}

impl MatcherState {
    /// Records a match: extends the streak and pushes it onto the history.
    pub fn record_match(&mut self, result: MatchResult) {
        self.consecutive_matches += 1;
        self.match_history.push_front(result.clone());
        self.match_history.truncate(MATCH_HISTORY_SIZE);
        self.average_confidence = self
            .match_history
            .iter()
            .map(|m| m.confidence)
            .sum::<f64>()
            / self.match_history.len() as f64;
        self.last_match = Some(result);
    }

    /// Records a frame without a match.
    pub fn record_miss(&mut self) {
        self.consecutive_matches = 0;
    }

    /// Forgets every match while keeping the active flag.
    pub fn clear(&mut self) {
        self.last_match = None;
        self.match_history.clear();
        self.consecutive_matches = 0;
        self.average_confidence = 0.0;
    }
}

/// Work counters of one matcher since it was created or last reset.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatcherStats {
    pub frames_processed: u64,
    pub frames_rejected: u64,
    pub tiles_scanned: u64,
    pub tiles_skipped: u64,
    pub matches_found: u64,
    pub consecutive_matches: u32,
    pub average_confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::comparator::MatchBreakdown;
    use chrono::Utc;

    fn result(confidence: f64) -> MatchResult {
        MatchResult {
            id: format!("match-{confidence}"),
            timestamp: Utc::now(),
            confidence,
            breakdown: MatchBreakdown::default(),
            snapshot: None,
            region: None,
            processing_time_ms: 1.0,
        }
    }

    #[test]
    fn history_is_newest_first_and_capped() {
        let mut state = MatcherState::default();
        for i in 0..25 {
            state.record_match(result(i as f64));
        }
        assert_eq!(state.match_history.len(), MATCH_HISTORY_SIZE);
        assert_eq!(state.match_history.front().unwrap().confidence, 24.0);
        assert_eq!(state.match_history.back().unwrap().confidence, 5.0);
        // mean of 5..=24
        assert!((state.average_confidence - 14.5).abs() < 1e-9);
        assert_eq!(state.consecutive_matches, 25);
    }

    #[test]
    fn a_miss_breaks_the_streak_but_keeps_history() {
        let mut state = MatcherState::default();
        state.record_match(result(80.0));
        state.record_match(result(60.0));
        state.record_miss();
        assert_eq!(state.consecutive_matches, 0);
        assert_eq!(state.match_history.len(), 2);
        assert_eq!(state.last_match.as_ref().unwrap().confidence, 60.0);
        assert!((state.average_confidence - 70.0).abs() < 1e-9);
    }

    #[test]
    fn clear_keeps_the_active_flag() {
        let mut state = MatcherState {
            is_active: true,
            ..MatcherState::default()
        };
        state.record_match(result(90.0));
        state.clear();
        assert!(state.is_active);
        assert!(state.last_match.is_none());
        assert!(state.match_history.is_empty());
        assert_eq!(state.average_confidence, 0.0);
    }
}
