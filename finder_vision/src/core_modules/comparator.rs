// THEORY:
// The `comparator` scores how alike two fingerprints are. It combines four
// independent factors, each on a 0-100 scale, into one weighted confidence:
//
// - colorMatch (histogram): for every bucket of the first histogram, the best
//   matching bucket in the second, scored by color closeness times share
//   closeness, weighted by the bucket's own share. A simplified, asymmetric
//   Earth-Mover-style similarity.
// - dominantMatch: for every dominant color of the first fingerprint, its closest
//   dominant color in the second under the perceptual distance.
// - edgeMatch: one minus the mean absolute difference of the edge signatures.
//   Signatures from different grid sizes are not comparable and score zero.
// - sizeMatch: how close the estimated foreground ratios are.
//
// `quick_compare` is a separate, much cheaper score that looks only at average and
// dominant colors of a raw frame. It exists to reject frames early and is never
// reported as a confidence.

use crate::core_modules::extractors::{ColorBucket, average_color, extract_dominant_colors};
use crate::core_modules::fingerprint::{FingerprintFeatures, VisualFingerprint};
use crate::core_modules::frame::FrameView;
use crate::core_modules::pixel::pixel::Rgb;
use crate::core_modules::smart_pixel::smart_pixel::{color_distance, perceptual_color_distance};
use serde::{Deserialize, Serialize};

/// Normalizer for `color_distance` in histogram matching (~ the maximum distance).
const HISTOGRAM_DISTANCE_SCALE: f64 = 442.0;
/// Normalizer for `perceptual_color_distance` in dominant-color matching.
const DOMINANT_DISTANCE_SCALE: f64 = 500.0;
/// Quick compare: perceptual average-color distance per point of similarity.
const QUICK_AVERAGE_DIVISOR: f64 = 5.0;
/// Quick compare: Euclidean dominant-color distance per point of similarity.
const QUICK_DOMINANT_DIVISOR: f64 = 2.55;
/// Quick compare looks at this many dominant colors.
const QUICK_DOMINANT_COUNT: usize = 3;
const QUICK_AVERAGE_WEIGHT: f64 = 0.4;
const QUICK_DOMINANT_WEIGHT: f64 = 0.6;

/// Relative weight of each factor in the overall score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparisonWeights {
    pub color: f64,
    pub dominant: f64,
    pub edge: f64,
    pub size: f64,
}

impl Default for ComparisonWeights {
    fn default() -> Self {
        Self {
            color: 0.40,
            dominant: 0.35,
            edge: 0.15,
            size: 0.10,
        }
    }
}

/// Per-factor similarity scores, each 0-100.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchBreakdown {
    pub color_match: f64,
    pub dominant_match: f64,
    pub edge_match: f64,
    pub size_match: f64,
}

impl MatchBreakdown {
    /// Weighted sum of the factors, rounded and clamped to 0-100.
    pub fn overall(&self, weights: &ComparisonWeights) -> f64 {
        let total = weights.color * self.color_match
            + weights.dominant * self.dominant_match
            + weights.edge * self.edge_match
            + weights.size * self.size_match;
        total.round().clamp(0.0, 100.0)
    }

    /// Each factor rounded to a whole number, for reporting.
    pub fn rounded(&self) -> MatchBreakdown {
        MatchBreakdown {
            color_match: self.color_match.round(),
            dominant_match: self.dominant_match.round(),
            edge_match: self.edge_match.round(),
            size_match: self.size_match.round(),
        }
    }
}

/// The outcome of comparing two fingerprints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub overall: f64,
    pub breakdown: MatchBreakdown,
}

/// Compares two fingerprints with the given factor weights.
pub fn compare_fingerprints(
    a: &VisualFingerprint,
    b: &VisualFingerprint,
    weights: &ComparisonWeights,
) -> Comparison {
    compare_features(&a.features, &b.features, weights)
}

/// Compares two feature sets with the given factor weights.
pub fn compare_features(
    a: &FingerprintFeatures,
    b: &FingerprintFeatures,
    weights: &ComparisonWeights,
) -> Comparison {
    let breakdown = breakdown(a, b);
    Comparison {
        overall: breakdown.overall(weights),
        breakdown,
    }
}

/// Computes the four factor scores without combining them.
pub fn breakdown(a: &FingerprintFeatures, b: &FingerprintFeatures) -> MatchBreakdown {
    MatchBreakdown {
        color_match: histogram_similarity(&a.histogram, &b.histogram),
        dominant_match: dominant_similarity(&a.dominant_colors, &b.dominant_colors),
        edge_match: edge_similarity(&a.edge_signature, &b.edge_signature),
        size_match: size_similarity(a.estimated_size_ratio, b.estimated_size_ratio),
    }
}

/// Percentage-weighted best-bucket similarity of `a` against `b` (0-100).
pub fn histogram_similarity(a: &[ColorBucket], b: &[ColorBucket]) -> f64 {
    let total_mass: f64 = a.iter().map(|bucket| bucket.percentage).sum();
    if total_mass <= 0.0 || b.is_empty() {
        return 0.0;
    }

    let weighted: f64 = a
        .iter()
        .map(|bucket| {
            let best = b
                .iter()
                .map(|other| {
                    let distance = color_distance(&bucket.color, &other.color);
                    let closeness = 1.0 - distance / HISTOGRAM_DISTANCE_SCALE;
                    let share = 1.0 - (bucket.percentage - other.percentage).abs() / 100.0;
                    closeness.max(0.0) * share.max(0.0)
                })
                .fold(0.0f64, f64::max);
            best * bucket.percentage
        })
        .sum();

    (weighted / total_mass * 100.0).clamp(0.0, 100.0)
}

/// Mean best perceptual match of each color of `a` among the colors of `b` (0-100).
pub fn dominant_similarity(a: &[Rgb], b: &[Rgb]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let total: f64 = a
        .iter()
        .map(|color| {
            b.iter()
                .map(|other| {
                    (1.0 - perceptual_color_distance(color, other) / DOMINANT_DISTANCE_SCALE)
                        .max(0.0)
                })
                .fold(0.0f64, f64::max)
        })
        .sum();
    (total / a.len() as f64 * 100.0).clamp(0.0, 100.0)
}

/// `100 - mean |a_i - b_i|`, or 0 when the signatures are empty or differ in length.
pub fn edge_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mean_difference =
        a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum::<f64>() / a.len() as f64;
    (100.0 - mean_difference).clamp(0.0, 100.0)
}

/// `max(0, 100 - |a - b| * 200)`.
pub fn size_similarity(a: f64, b: f64) -> f64 {
    (100.0 - (a - b).abs() * 200.0).clamp(0.0, 100.0)
}

/// A cheap pre-filter score of how plausible it is that `frame` contains the subject.
///
/// Combines average-color similarity (40%) with how well the fingerprint's top three
/// dominant colors are represented among three colors clustered fresh from the
/// frame (60%). Only meant for rejecting frames, never as a final confidence.
pub fn quick_compare(fingerprint: &VisualFingerprint, frame: &FrameView<'_>) -> f64 {
    let features = &fingerprint.features;

    let frame_average = average_color(frame);
    let average_distance = perceptual_color_distance(&features.average_color, &frame_average);
    let average_score = (100.0 - average_distance / QUICK_AVERAGE_DIVISOR).clamp(0.0, 100.0);

    let frame_dominant = extract_dominant_colors(frame, QUICK_DOMINANT_COUNT);
    let reference: Vec<&Rgb> = features
        .dominant_colors
        .iter()
        .take(QUICK_DOMINANT_COUNT)
        .collect();
    let dominant_score = if reference.is_empty() {
        0.0
    } else {
        reference
            .iter()
            .map(|color| {
                frame_dominant
                    .iter()
                    .map(|other| {
                        (100.0 - color_distance(color, other) / QUICK_DOMINANT_DIVISOR)
                            .clamp(0.0, 100.0)
                    })
                    .fold(0.0f64, f64::max)
            })
            .sum::<f64>()
            / reference.len() as f64
    };

    (QUICK_AVERAGE_WEIGHT * average_score + QUICK_DOMINANT_WEIGHT * dominant_score)
        .clamp(0.0, 100.0)
}
