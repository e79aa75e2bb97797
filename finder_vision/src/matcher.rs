// THEORY:
// The `matcher` module is the top-level, per-session API of the engine. A
// `RealtimeMatcher` holds one installed fingerprint and is fed camera frames one at
// a time. For every frame it decides whether the subject is plausibly visible and,
// if so, where.
//
// The per-frame pipeline runs in stages, cheapest first:
// 1.  **Gate**: an inactive or unconfigured matcher does nothing.
// 2.  **Motion**: the frame is diffed against the previous one on the scan grid,
//     producing a mask of cells that changed.
// 3.  **Lighting**: a slow moving average of the illumination drift between the
//     fingerprint and the scene is applied to a working copy of the frame.
// 4.  **Baseline**: the frame is remembered for the next motion diff. The very first
//     frame after installing a fingerprint only establishes this baseline.
// 5.  **Quick reject**: a coarse whole-frame score. Most frames in a real feed contain
//     nothing of interest and stop here.
// 6.  **Region scan**: overlapping 2x2-cell tiles are fingerprinted on a reduced
//     budget and compared with the installed fingerprint. Tiles that did not move are
//     skipped when motion priority is on.
// 7.  **Report**: the best qualifying tile becomes a `MatchResult`, which feeds the
//     rolling `MatcherState`.
//
// The matcher is synchronous and owns all of its buffers. Callers that search for
// several subjects at once create one matcher per subject (see `search`).

use crate::core_modules::comparator::{ComparisonWeights, MatchBreakdown, breakdown, quick_compare};
use crate::core_modules::encoding::encoding::encode_png_data_url;
use crate::core_modules::fingerprint::{FeatureBudget, FingerprintFeatures, VisualFingerprint};
use crate::core_modules::frame::{Frame, FrameView, MatchRegion, PixelRect};
use crate::core_modules::grid_manager::{GridManager, MotionMask};
use crate::core_modules::lighting::LightingAdapter;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

// Re-export key data structures for the public API.
pub use crate::core_modules::tracker::{MATCH_HISTORY_SIZE, MatcherState, MatcherStats};

/// How much effort the region scan spends on each tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProcessingMode {
    Fast,
    #[default]
    Balanced,
    Accurate,
}

impl ProcessingMode {
    /// Extraction budget for a tile's quick fingerprint.
    ///
    /// The edge grid always follows the installed fingerprint so edge signatures stay
    /// comparable.
    pub fn tile_budget(&self, edge_grid_size: u32) -> FeatureBudget {
        let (histogram_buckets, dominant_colors) = match self {
            ProcessingMode::Fast => (8, 2),
            ProcessingMode::Balanced => (16, 3),
            ProcessingMode::Accurate => (27, 4),
        };
        FeatureBudget {
            histogram_buckets,
            dominant_colors,
            edge_grid_size,
        }
    }
}

/// Configuration for a `RealtimeMatcher`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MatcherSettings {
    /// Confidence at which a match should notify someone.
    pub min_confidence_for_alert: f64,
    /// Confidence at which a match is reported at all and gets a snapshot.
    pub min_confidence_for_record: f64,
    /// 0-100. Below 50 scores are boosted, above 50 they are scaled down.
    pub color_sensitivity: f64,
    /// 0-100. Tiles whose size ratio differs by more than this many points lose the
    /// size factor.
    pub size_tolerance: f64,
    pub scan_grid_size: u32,
    pub processing_mode: ProcessingMode,
    pub adaptive_lighting: bool,
    pub motion_priority: bool,
}

impl Default for MatcherSettings {
    fn default() -> Self {
        Self {
            min_confidence_for_alert: 60.0,
            min_confidence_for_record: 40.0,
            color_sensitivity: 50.0,
            size_tolerance: 30.0,
            scan_grid_size: 4,
            processing_mode: ProcessingMode::Balanced,
            adaptive_lighting: true,
            motion_priority: true,
        }
    }
}

impl MatcherSettings {
    /// Rescales a raw score by the sensitivity dial, clamped to 0-100.
    pub fn adjust_for_sensitivity(&self, raw: f64) -> f64 {
        let factor = (100.0 - self.color_sensitivity) / 50.0;
        let adjusted = if factor > 1.0 {
            (raw * factor).min(100.0)
        } else {
            raw * factor
        };
        adjusted.clamp(0.0, 100.0).round()
    }
}

/// Human-readable confidence band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConfidenceTier {
    Unlikely,
    Weak,
    Possible,
    Good,
    Excellent,
}

impl ConfidenceTier {
    pub fn from_confidence(confidence: f64) -> Self {
        match confidence {
            c if c >= 85.0 => ConfidenceTier::Excellent,
            c if c >= 70.0 => ConfidenceTier::Good,
            c if c >= 55.0 => ConfidenceTier::Possible,
            c if c >= 40.0 => ConfidenceTier::Weak,
            _ => ConfidenceTier::Unlikely,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConfidenceTier::Excellent => "Excellent match",
            ConfidenceTier::Good => "Good match",
            ConfidenceTier::Possible => "Possible match",
            ConfidenceTier::Weak => "Weak match",
            ConfidenceTier::Unlikely => "Unlikely",
        }
    }
}

/// One frame's positive match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub confidence: f64,
    pub breakdown: MatchBreakdown,
    /// PNG data URL of the frame, only when the match clears the record threshold.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<MatchRegion>,
    pub processing_time_ms: f64,
}

impl MatchResult {
    pub fn tier(&self) -> ConfidenceTier {
        ConfidenceTier::from_confidence(self.confidence)
    }
}

/// The best tile of one region scan.
struct TileMatch {
    rect: PixelRect,
    confidence: f64,
    breakdown: MatchBreakdown,
}

/// The stateful per-session matching engine.
#[derive(Debug, Default)]
pub struct RealtimeMatcher {
    settings: MatcherSettings,
    weights: ComparisonWeights,
    fingerprint: Option<VisualFingerprint>,
    state: MatcherState,
    stats: MatcherStats,
    previous_frame: Option<Frame>,
    motion_mask: Option<MotionMask>,
    lighting: LightingAdapter,
}

impl RealtimeMatcher {
    pub fn new(settings: MatcherSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    /// An active matcher with `fingerprint` already installed.
    pub fn with_fingerprint(settings: MatcherSettings, fingerprint: VisualFingerprint) -> Self {
        let mut matcher = Self::new(settings);
        matcher.set_fingerprint(Some(fingerprint));
        matcher.set_active(true);
        matcher
    }

    pub fn set_active(&mut self, active: bool) {
        if self.state.is_active != active {
            debug!(active, "Matcher activation changed");
        }
        self.state.is_active = active;
    }

    /// Installs (or removes) the subject fingerprint, dropping all rolling state.
    pub fn set_fingerprint(&mut self, fingerprint: Option<VisualFingerprint>) {
        match &fingerprint {
            Some(fp) => info!(id = %fp.id, subject = %fp.name, "Installed fingerprint"),
            None => info!("Cleared fingerprint"),
        }
        self.fingerprint = fingerprint;
        self.clear_history();
    }

    /// Forgets matches, frame history and lighting, keeping the fingerprint and settings.
    pub fn reset(&mut self) {
        self.clear_history();
        self.stats = MatcherStats::default();
        debug!("Matcher reset");
    }

    pub fn update_settings(&mut self, settings: MatcherSettings) {
        if settings.scan_grid_size != self.settings.scan_grid_size {
            self.motion_mask = None;
        }
        if !settings.adaptive_lighting {
            self.lighting.reset();
        }
        self.settings = settings;
    }

    /// Overrides the default factor weights used by the region scan.
    pub fn set_weights(&mut self, weights: ComparisonWeights) {
        self.weights = weights;
    }

    pub fn state(&self) -> &MatcherState {
        &self.state
    }

    pub fn stats(&self) -> MatcherStats {
        MatcherStats {
            consecutive_matches: self.state.consecutive_matches,
            average_confidence: self.state.average_confidence,
            ..self.stats
        }
    }

    pub fn fingerprint(&self) -> Option<&VisualFingerprint> {
        self.fingerprint.as_ref()
    }

    pub fn settings(&self) -> &MatcherSettings {
        &self.settings
    }

    /// Whether the last match is strong enough to notify someone.
    pub fn should_alert(&self) -> bool {
        self.state
            .last_match
            .as_ref()
            .is_some_and(|m| m.confidence >= self.settings.min_confidence_for_alert)
    }

    /// Whether the last match is strong enough to keep.
    pub fn should_record(&self) -> bool {
        self.state
            .last_match
            .as_ref()
            .is_some_and(|m| m.confidence >= self.settings.min_confidence_for_record)
    }

    fn clear_history(&mut self) {
        self.state.clear();
        self.previous_frame = None;
        self.motion_mask = None;
        self.lighting.reset();
    }

    /// Runs the full matching pipeline on one RGBA frame.
    ///
    /// Returns `None` when the matcher is idle, when the frame only establishes the
    /// motion baseline, and when no region clears the record threshold.
    pub fn process_frame(&mut self, frame: &FrameView<'_>) -> Option<MatchResult> {
        if !self.state.is_active || frame.is_empty() {
            return None;
        }
        let fingerprint = self.fingerprint.as_ref()?;
        let started = Instant::now();
        self.stats.frames_processed += 1;

        let grid = GridManager::new(frame.width(), frame.height(), self.settings.scan_grid_size);

        // Stage 1: Motion
        if self.settings.motion_priority {
            self.motion_mask = self
                .previous_frame
                .as_ref()
                .and_then(|previous| grid.motion_mask(&previous.view(), frame));
        }

        // Stage 2: Lighting
        let adjusted = if self.settings.adaptive_lighting {
            self.lighting.update(&fingerprint.features.average_color, frame);
            Some(self.lighting.apply(frame))
        } else {
            None
        };
        let working = adjusted.as_ref().map(Frame::view).unwrap_or(*frame);

        // Stage 3: Baseline
        let is_baseline = match self.previous_frame.as_mut() {
            Some(previous) => {
                previous.copy_from(frame);
                false
            }
            None => {
                self.previous_frame = Some(frame.to_frame());
                true
            }
        };
        if is_baseline {
            debug!(
                width = frame.width(),
                height = frame.height(),
                "Stored baseline frame"
            );
            return None;
        }

        // Stage 4: Quick reject
        let quick_score = quick_compare(fingerprint, &working);
        let reject_below = self.settings.min_confidence_for_record / 2.0;
        if quick_score < reject_below {
            self.stats.frames_rejected += 1;
            self.state.record_miss();
            trace!(quick_score, reject_below, "Frame rejected by quick compare");
            return None;
        }

        // Stage 5: Region scan
        let mask = if self.settings.motion_priority {
            self.motion_mask.as_ref()
        } else {
            None
        };
        let best = scan_tiles(
            &grid,
            mask,
            &working,
            fingerprint,
            &self.settings,
            &self.weights,
            &mut self.stats,
        );

        // Stage 6: Report
        let Some(best) = best else {
            self.state.record_miss();
            debug!(quick_score, "No region cleared the record threshold");
            return None;
        };

        let snapshot = if best.confidence >= self.settings.min_confidence_for_record {
            match encode_png_data_url(frame) {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!(error = %e, "Failed to encode match snapshot");
                    None
                }
            }
        } else {
            None
        };

        let result = MatchResult {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            confidence: best.confidence,
            breakdown: best.breakdown.rounded(),
            snapshot,
            region: Some(MatchRegion::from(best.rect)),
            processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
        };

        self.stats.matches_found += 1;
        self.state.record_match(result.clone());
        info!(
            confidence = result.confidence,
            tier = result.tier().label(),
            x = best.rect.x,
            y = best.rect.y,
            consecutive = self.state.consecutive_matches,
            "Subject match"
        );
        Some(result)
    }
}

/// Scores every eligible tile and returns the best one that clears the record threshold.
fn scan_tiles(
    grid: &GridManager,
    mask: Option<&MotionMask>,
    working: &FrameView<'_>,
    fingerprint: &VisualFingerprint,
    settings: &MatcherSettings,
    weights: &ComparisonWeights,
    stats: &mut MatcherStats,
) -> Option<TileMatch> {
    let skip_still = settings.motion_priority && mask.is_some();
    let edge_grid = fingerprint.features.edge_grid_size().unwrap_or(0);
    let budget = settings.processing_mode.tile_budget(edge_grid);
    let mut best: Option<TileMatch> = None;

    for tile in grid.tiles(mask) {
        if skip_still && !tile.has_motion {
            stats.tiles_skipped += 1;
            continue;
        }
        if tile.rect.area() == 0 {
            continue;
        }
        stats.tiles_scanned += 1;

        let region = working.sub_region(tile.rect);
        let features = FingerprintFeatures::extract(&region.view(), &budget);
        let mut factors = breakdown(&features, &fingerprint.features);
        let size_gap =
            (features.estimated_size_ratio - fingerprint.features.estimated_size_ratio).abs();
        if size_gap * 100.0 > settings.size_tolerance {
            factors.size_match = 0.0;
        }

        let raw = factors.overall(weights);
        let confidence = settings.adjust_for_sensitivity(raw);
        trace!(x = tile.rect.x, y = tile.rect.y, raw, confidence, "Scored tile");

        let clears = confidence >= settings.min_confidence_for_record;
        let improves = best.as_ref().is_none_or(|b| confidence > b.confidence);
        if clears && improves {
            best = Some(TileMatch {
                rect: tile.rect,
                confidence,
                breakdown: factors,
            });
        }
    }
    best
}
