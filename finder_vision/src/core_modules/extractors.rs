// THEORY:
// The `extractors` module turns a frame of pixels into the individual measurements
// that make up a visual fingerprint. Each extractor is a stateless function over a
// `FrameView`; none of them know about fingerprints, comparisons or history.
//
// The extractors and the question each one answers:
// - `extract_histogram`: which coarse colors cover how much of the image?
// - `extract_dominant_colors`: what are the k most representative colors (k-means)?
// - `average_color` / `color_variance`: what is the mean color and how spread out
//   are the pixels around it?
// - `extract_edge_signature`: where is the image "busy"? A per-cell gradient energy
//   map normalized by its own maximum, so it describes shape and texture rather
//   than absolute contrast.
// - `estimate_size_ratio`: how much of the image differs from the background color
//   guessed from its corners?
//
// Degenerate-input policy: pixels with alpha below 128 never count, though the size
// ratio still divides by every pixel. A region with no valid pixels yields neutral
// defaults (gray average, empty histogram, zeroed edge signature, size ratio 0). No
// extractor produces NaN or panics.

use crate::core_modules::frame::{FrameView, PixelRect};
use crate::core_modules::pixel::pixel::{NEUTRAL_GRAY, Pixel, Rgb};
use crate::core_modules::smart_pixel::smart_pixel::color_distance;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// K-means runs exactly this many assign/update rounds.
pub const KMEANS_ITERATIONS: usize = 10;
/// Dominant-color extraction looks at every Nth pixel.
pub const KMEANS_SAMPLE_STRIDE: usize = 4;
/// Edge signature cells look at every Nth pixel along both axes.
pub const EDGE_SAMPLE_STRIDE: u32 = 2;
/// A pixel further than this from the estimated background counts as foreground.
pub const FOREGROUND_DISTANCE_THRESHOLD: f64 = 50.0;
/// Upper bound on the corner patch size used for background estimation.
pub const MAX_CORNER_PATCH: u32 = 10;

/// One cell of a quantized color histogram.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorBucket {
    /// The average color of the pixels that fell into this cell.
    pub color: Rgb,
    /// The number of pixels in this cell.
    pub count: u64,
    /// `count` as a percentage of all valid pixels analyzed.
    pub percentage: f64,
}

/// Number of quantization levels per channel for a given bucket budget.
pub fn quantization_levels(bucket_budget: usize) -> u32 {
    if bucket_budget == 0 {
        return 1;
    }
    let mut levels = (bucket_budget as f64).cbrt().ceil() as u32;
    // cbrt of a perfect cube can land a hair above the integer.
    if levels > 1 && ((levels - 1) as usize).pow(3) >= bucket_budget {
        levels -= 1;
    }
    levels.max(1)
}

/// Maps a color onto its histogram cell key for `levels` steps per channel.
#[inline]
pub fn quantize_key(color: &Rgb, levels: u32) -> u32 {
    let level = |channel: u8| (channel as u32 * levels) / 256;
    (level(color.r) * levels + level(color.g)) * levels + level(color.b)
}

#[derive(Default)]
struct BucketAccumulator {
    sum: [u64; 3],
    count: u64,
}

/// Builds a quantized color histogram, sorted by descending pixel count and
/// truncated to `bucket_budget` buckets.
pub fn extract_histogram(frame: &FrameView<'_>, bucket_budget: usize) -> Vec<ColorBucket> {
    if bucket_budget == 0 {
        return Vec::new();
    }
    let levels = quantization_levels(bucket_budget);
    let mut cells: HashMap<u32, BucketAccumulator> = HashMap::new();
    let mut total_valid = 0u64;

    for pixel in frame.pixels().filter(Pixel::is_valid) {
        total_valid += 1;
        let cell = cells.entry(quantize_key(&pixel.rgb(), levels)).or_default();
        cell.sum[0] += pixel.red as u64;
        cell.sum[1] += pixel.green as u64;
        cell.sum[2] += pixel.blue as u64;
        cell.count += 1;
    }

    if total_valid == 0 {
        return Vec::new();
    }

    let mut buckets: Vec<(u32, ColorBucket)> = cells
        .into_iter()
        .map(|(key, cell)| {
            let count = cell.count as f64;
            let bucket = ColorBucket {
                color: Rgb::from_f64(
                    cell.sum[0] as f64 / count,
                    cell.sum[1] as f64 / count,
                    cell.sum[2] as f64 / count,
                ),
                count: cell.count,
                percentage: cell.count as f64 / total_valid as f64 * 100.0,
            };
            (key, bucket)
        })
        .collect();

    // Key as tie-breaker keeps the output independent of HashMap iteration order.
    buckets.sort_by(|a, b| b.1.count.cmp(&a.1.count).then(a.0.cmp(&b.0)));
    buckets.truncate(bucket_budget);
    buckets.into_iter().map(|(_, bucket)| bucket).collect()
}

/// Mean color of the valid pixels, or neutral gray when there are none.
pub fn average_color(frame: &FrameView<'_>) -> Rgb {
    average_color_sampled(frame, 1)
}

/// Mean color over every `stride`-th pixel.
pub fn average_color_sampled(frame: &FrameView<'_>, stride: usize) -> Rgb {
    let mut sum = [0u64; 3];
    let mut count = 0u64;
    for pixel in frame.pixels().step_by(stride.max(1)).filter(Pixel::is_valid) {
        sum[0] += pixel.red as u64;
        sum[1] += pixel.green as u64;
        sum[2] += pixel.blue as u64;
        count += 1;
    }
    if count == 0 {
        return NEUTRAL_GRAY;
    }
    let n = count as f64;
    Rgb::from_f64(sum[0] as f64 / n, sum[1] as f64 / n, sum[2] as f64 / n)
}

/// Mean `color_distance` of the valid pixels from `mean`. Zero without valid pixels.
pub fn color_variance(frame: &FrameView<'_>, mean: &Rgb) -> f64 {
    let mut total = 0.0;
    let mut count = 0u64;
    for pixel in frame.pixels().filter(Pixel::is_valid) {
        total += color_distance(&pixel.rgb(), mean);
        count += 1;
    }
    if count == 0 { 0.0 } else { total / count as f64 }
}

/// Samples every `KMEANS_SAMPLE_STRIDE`-th pixel and clusters the valid ones.
pub fn extract_dominant_colors(frame: &FrameView<'_>, k: usize) -> Vec<Rgb> {
    let samples: Vec<Rgb> = frame
        .pixels()
        .step_by(KMEANS_SAMPLE_STRIDE)
        .filter(Pixel::is_valid)
        .map(|pixel| pixel.rgb())
        .collect();
    kmeans(&samples, k, KMEANS_ITERATIONS)
}

/// Plain Lloyd's k-means over RGB samples.
///
/// - Centroids start at evenly spaced samples (`samples[i * n / k]`).
/// - Each round assigns every sample to its nearest centroid by `color_distance`
///   (first centroid wins ties) and moves each centroid to its cluster mean.
/// - A centroid whose cluster is empty keeps its previous value. It is neither
///   dropped nor reseeded, so the output always has exactly `k` entries.
/// - Without samples every centroid is neutral gray.
pub fn kmeans(samples: &[Rgb], k: usize, iterations: usize) -> Vec<Rgb> {
    if k == 0 {
        return Vec::new();
    }
    if samples.is_empty() {
        return vec![NEUTRAL_GRAY; k];
    }

    let n = samples.len();
    let mut centroids: Vec<[f64; 3]> = (0..k)
        .map(|i| samples[(i * n / k).min(n - 1)].channels_f64())
        .collect();

    for _ in 0..iterations {
        let mut sums = vec![[0.0f64; 3]; k];
        let mut counts = vec![0usize; k];

        for sample in samples {
            let nearest = nearest_centroid(sample, &centroids);
            let [r, g, b] = sample.channels_f64();
            sums[nearest][0] += r;
            sums[nearest][1] += g;
            sums[nearest][2] += b;
            counts[nearest] += 1;
        }

        for (centroid, (sum, count)) in centroids.iter_mut().zip(sums.iter().zip(&counts)) {
            if *count > 0 {
                let n = *count as f64;
                *centroid = [sum[0] / n, sum[1] / n, sum[2] / n];
            }
        }
    }

    centroids
        .into_iter()
        .map(|[r, g, b]| Rgb::from_f64(r, g, b))
        .collect()
}

fn nearest_centroid(sample: &Rgb, centroids: &[[f64; 3]]) -> usize {
    let [r, g, b] = sample.channels_f64();
    let mut best_index = 0;
    let mut best_distance = f64::INFINITY;
    for (index, centroid) in centroids.iter().enumerate() {
        let dr = r - centroid[0];
        let dg = g - centroid[1];
        let db = b - centroid[2];
        let distance = (dr * dr + dg * dg + db * db).sqrt();
        if distance < best_distance {
            best_distance = distance;
            best_index = index;
        }
    }
    best_index
}

/// Splits `length` pixels into `cells` contiguous spans that cover every pixel.
#[inline]
pub fn cell_span(length: u32, cells: u32, index: u32) -> (u32, u32) {
    let start = (index as u64 * length as u64 / cells as u64) as u32;
    let end = ((index as u64 + 1) * length as u64 / cells as u64) as u32;
    (start, end)
}

/// Per-cell gradient energy on a `grid_size` x `grid_size` grid, normalized to 0-100.
///
/// Always returns exactly `grid_size^2` values.
pub fn extract_edge_signature(frame: &FrameView<'_>, grid_size: u32) -> Vec<f64> {
    let cells = grid_size as usize * grid_size as usize;
    let mut signature = vec![0.0; cells];
    if cells == 0 || frame.is_empty() {
        return signature;
    }

    for cell_y in 0..grid_size {
        let (y0, y1) = cell_span(frame.height(), grid_size, cell_y);
        for cell_x in 0..grid_size {
            let (x0, x1) = cell_span(frame.width(), grid_size, cell_x);
            let rect = PixelRect::new(x0, y0, x1 - x0, y1 - y0);
            signature[(cell_y * grid_size + cell_x) as usize] = cell_gradient_energy(frame, rect);
        }
    }

    let max = signature.iter().copied().fold(0.0f64, f64::max);
    if max > 0.0 {
        for value in signature.iter_mut() {
            *value = (*value / max * 100.0).clamp(0.0, 100.0);
        }
    }
    signature
}

fn channel_delta(a: &Pixel, b: &Pixel) -> f64 {
    (a.red as f64 - b.red as f64).abs()
        + (a.green as f64 - b.green as f64).abs()
        + (a.blue as f64 - b.blue as f64).abs()
}

/// Mean forward-difference gradient magnitude over every other pixel of `rect`.
fn cell_gradient_energy(frame: &FrameView<'_>, rect: PixelRect) -> f64 {
    let mut total = 0.0;
    let mut samples = 0u64;

    for y in (rect.y..rect.y + rect.height).step_by(EDGE_SAMPLE_STRIDE as usize) {
        for x in (rect.x..rect.x + rect.width).step_by(EDGE_SAMPLE_STRIDE as usize) {
            let here = frame.pixel(x, y);
            if !here.is_valid() {
                continue;
            }
            let horizontal = if x + 1 < frame.width() {
                channel_delta(&frame.pixel(x + 1, y), &here)
            } else {
                0.0
            };
            let vertical = if y + 1 < frame.height() {
                channel_delta(&frame.pixel(x, y + 1), &here)
            } else {
                0.0
            };
            total += (horizontal * horizontal + vertical * vertical).sqrt();
            samples += 1;
        }
    }

    if samples == 0 { 0.0 } else { total / samples as f64 }
}

/// Fraction of all pixels that are valid and differ from the corner-estimated background.
///
/// Transparent pixels stay in the denominator and never count as foreground.
///
/// The background color is the mean of four corner patches, each
/// `min(10, width/10, height/10)` pixels square (at least 1). Always in [0, 1].
pub fn estimate_size_ratio(frame: &FrameView<'_>) -> f64 {
    if frame.is_empty() {
        return 0.0;
    }
    let (width, height) = (frame.width(), frame.height());
    let patch = MAX_CORNER_PATCH.min(width / 10).min(height / 10).max(1);
    let corners = [
        PixelRect::new(0, 0, patch, patch),
        PixelRect::new(width - patch, 0, patch, patch),
        PixelRect::new(0, height - patch, patch, patch),
        PixelRect::new(width - patch, height - patch, patch, patch),
    ];

    let mut sum = [0u64; 3];
    let mut count = 0u64;
    for corner in corners {
        for y in corner.y..corner.y + corner.height {
            for x in corner.x..corner.x + corner.width {
                let pixel = frame.pixel(x, y);
                if pixel.is_valid() {
                    sum[0] += pixel.red as u64;
                    sum[1] += pixel.green as u64;
                    sum[2] += pixel.blue as u64;
                    count += 1;
                }
            }
        }
    }
    if count == 0 {
        return 0.0;
    }
    let n = count as f64;
    let background = Rgb::from_f64(sum[0] as f64 / n, sum[1] as f64 / n, sum[2] as f64 / n);

    let foreground = frame
        .pixels()
        .filter(Pixel::is_valid)
        .filter(|pixel| color_distance(&pixel.rgb(), &background) > FOREGROUND_DISTANCE_THRESHOLD)
        .count();
    (foreground as f64 / frame.pixel_count() as f64).clamp(0.0, 1.0)
}
