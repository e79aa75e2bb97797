// THEORY:
// The `fingerprint` module is the builder layer. It runs every extractor over a
// reference image and packages the measurements into a `VisualFingerprint`, the
// compact description of a search subject that the rest of the system stores,
// ships around as JSON and installs into matchers.
//
// Key architectural principles:
// 1.  **Features vs. identity**: the measurements live in `FingerprintFeatures`,
//     which the comparator works on. `VisualFingerprint` adds identity (id, name,
//     creation time) and display thumbnails. The region scan builds throwaway
//     features for every tile without paying for ids or thumbnails.
// 2.  **Bounded cost**: reference images are rescaled to at most
//     `max_dimension` pixels per side before extraction.
// 3.  **Merging**: several reference photos of the same subject collapse into one
//     fingerprint by averaging each property (see `merge_fingerprints`).
// 4.  **Immutability**: a fingerprint is never modified after it is built. Merging
//     produces a new one.

use crate::core_modules::encoding::encoding::{
    decode_image, encode_thumbnail, load_image, rgba_to_image,
};
use crate::core_modules::extractors::{
    ColorBucket, average_color, color_variance, estimate_size_ratio, extract_dominant_colors,
    extract_edge_signature, extract_histogram, quantization_levels, quantize_key,
};
use crate::core_modules::frame::FrameView;
use crate::core_modules::pixel::pixel::Rgb;
use crate::core_modules::smart_pixel::smart_pixel::color_distance;
use crate::error::{VisionError, VisionResult};
use chrono::{DateTime, Utc};
use image::DynamicImage;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;
use uuid::Uuid;

/// Merged fingerprints keep at most this many reference thumbnails.
pub const MAX_REFERENCE_IMAGES: usize = 5;
/// Dominant colors closer than this are agglomerated when merging.
pub const MERGE_CLUSTER_DISTANCE: f64 = 50.0;

/// The extraction budgets for one fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureBudget {
    pub histogram_buckets: usize,
    pub dominant_colors: usize,
    pub edge_grid_size: u32,
}

/// Tunable options for building a fingerprint from a reference image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FingerprintOptions {
    pub histogram_buckets: usize,
    pub dominant_color_count: usize,
    pub edge_grid_size: u32,
    /// Reference images are downscaled to fit this many pixels per side.
    pub max_dimension: u32,
    /// The longest side of the stored display thumbnail.
    pub thumbnail_size: u32,
    pub include_thumbnail: bool,
}

impl Default for FingerprintOptions {
    fn default() -> Self {
        Self {
            histogram_buckets: 64,
            dominant_color_count: 5,
            edge_grid_size: 8,
            max_dimension: 256,
            thumbnail_size: 64,
            include_thumbnail: true,
        }
    }
}

impl FingerprintOptions {
    pub fn budget(&self) -> FeatureBudget {
        FeatureBudget {
            histogram_buckets: self.histogram_buckets,
            dominant_colors: self.dominant_color_count,
            edge_grid_size: self.edge_grid_size,
        }
    }
}

fn default_histogram_buckets() -> usize {
    FingerprintOptions::default().histogram_buckets
}

/// The measurable part of a fingerprint: everything the comparator looks at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FingerprintFeatures {
    /// The bucket budget the histogram was extracted with. Merging quantizes and
    /// truncates with it, so it must survive even when fewer buckets were filled.
    #[serde(default = "default_histogram_buckets")]
    pub histogram_buckets: usize,
    pub histogram: Vec<ColorBucket>,
    pub dominant_colors: Vec<Rgb>,
    pub average_color: Rgb,
    pub color_variance: f64,
    pub estimated_size_ratio: f64,
    pub edge_signature: Vec<f64>,
}

impl FingerprintFeatures {
    /// Runs every extractor over `frame` with the given budgets.
    pub fn extract(frame: &FrameView<'_>, budget: &FeatureBudget) -> Self {
        let average_color = average_color(frame);
        Self {
            histogram_buckets: budget.histogram_buckets,
            histogram: extract_histogram(frame, budget.histogram_buckets),
            dominant_colors: extract_dominant_colors(frame, budget.dominant_colors),
            color_variance: color_variance(frame, &average_color),
            average_color,
            estimated_size_ratio: estimate_size_ratio(frame),
            edge_signature: extract_edge_signature(frame, budget.edge_grid_size),
        }
    }

    /// The edge grid size these features were extracted with, if the signature is square.
    pub fn edge_grid_size(&self) -> Option<u32> {
        let len = self.edge_signature.len();
        let side = (len as f64).sqrt().round() as usize;
        (side * side == len).then_some(side as u32)
    }
}

/// The compact multi-factor visual description of a search subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualFingerprint {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub features: FingerprintFeatures,
    /// Encoded display thumbnails. Informational only, never compared.
    pub reference_images: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl VisualFingerprint {
    /// Packages already-extracted features under a fresh identity.
    pub fn from_features(name: impl Into<String>, features: FingerprintFeatures) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            features,
            reference_images: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn to_json(&self) -> VisionResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> VisionResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Builds a fingerprint from a decoded reference image.
///
/// The image is downscaled to fit `options.max_dimension` before any extractor runs.
pub fn generate_fingerprint(
    image: &DynamicImage,
    name: &str,
    options: &FingerprintOptions,
) -> VisionResult<VisualFingerprint> {
    let max = options.max_dimension.max(1);
    let working = if image.width() > max || image.height() > max {
        image.resize(max, max, FilterType::Triangle)
    } else {
        image.clone()
    };
    let rgba = working.to_rgba8();
    let view = FrameView::new(rgba.width(), rgba.height(), rgba.as_raw())?;

    let features = FingerprintFeatures::extract(&view, &options.budget());
    let mut fingerprint = VisualFingerprint::from_features(name, features);
    if options.include_thumbnail {
        fingerprint
            .reference_images
            .push(encode_thumbnail(&working, options.thumbnail_size)?);
    }

    debug!(
        id = %fingerprint.id,
        subject = name,
        width = rgba.width(),
        height = rgba.height(),
        buckets = fingerprint.features.histogram.len(),
        "Generated fingerprint"
    );
    Ok(fingerprint)
}

/// Builds a fingerprint from a raw RGBA reference buffer.
pub fn generate_fingerprint_from_frame(
    frame: &FrameView<'_>,
    name: &str,
    options: &FingerprintOptions,
) -> VisionResult<VisualFingerprint> {
    generate_fingerprint(&rgba_to_image(frame)?, name, options)
}

/// Builds a fingerprint from an encoded image (PNG, JPEG, ...) held in memory.
pub fn generate_fingerprint_from_encoded(
    bytes: &[u8],
    name: &str,
    options: &FingerprintOptions,
) -> VisionResult<VisualFingerprint> {
    generate_fingerprint(&decode_image(bytes)?, name, options)
}

/// Builds a fingerprint from an image file.
pub fn generate_fingerprint_from_path(
    path: impl AsRef<Path>,
    name: &str,
    options: &FingerprintOptions,
) -> VisionResult<VisualFingerprint> {
    generate_fingerprint(&load_image(path)?, name, options)
}

/// Combines several fingerprints of the same subject into one.
///
/// - An empty list is a caller mistake and fails with [`VisionError::NoInput`].
/// - A single fingerprint is returned unchanged.
/// - Otherwise each property is averaged across the inputs. Histograms are unioned
///   by quantized color, dominant colors are re-clustered, scalar properties and
///   edge cells are arithmetic means, and thumbnails are concatenated (capped at 5).
pub fn merge_fingerprints(fingerprints: &[VisualFingerprint]) -> VisionResult<VisualFingerprint> {
    let (first, rest) = fingerprints.split_first().ok_or(VisionError::NoInput)?;
    if rest.is_empty() {
        return Ok(first.clone());
    }

    let features: Vec<&FingerprintFeatures> = fingerprints.iter().map(|fp| &fp.features).collect();
    let count = fingerprints.len() as f64;
    let mean = |value: fn(&FingerprintFeatures) -> f64| {
        features.iter().map(|&f| value(f)).sum::<f64>() / count
    };

    let average_color = Rgb::from_f64(
        mean(|f| f.average_color.r as f64),
        mean(|f| f.average_color.g as f64),
        mean(|f| f.average_color.b as f64),
    );

    let merged = FingerprintFeatures {
        histogram_buckets: first.features.histogram_buckets,
        histogram: merge_histograms(&features),
        dominant_colors: merge_dominant_colors(&features),
        average_color,
        color_variance: mean(|f| f.color_variance),
        estimated_size_ratio: mean(|f| f.estimated_size_ratio).clamp(0.0, 1.0),
        edge_signature: merge_edge_signatures(&features),
    };

    let mut fingerprint = VisualFingerprint::from_features(first.name.clone(), merged);
    fingerprint.reference_images = fingerprints
        .iter()
        .flat_map(|fp| fp.reference_images.iter().cloned())
        .take(MAX_REFERENCE_IMAGES)
        .collect();

    debug!(
        id = %fingerprint.id,
        inputs = fingerprints.len(),
        "Merged fingerprints"
    );
    Ok(fingerprint)
}

/// Unions histograms by quantized color key, averaging over all inputs.
///
/// Keys and the output length both come from the first input's extraction budget,
/// so inputs extracted with the same options never land on a coarser grid.
fn merge_histograms(features: &[&FingerprintFeatures]) -> Vec<ColorBucket> {
    let budget = features.first().map_or(0, |f| f.histogram_buckets);
    if budget == 0 {
        return Vec::new();
    }
    let levels = quantization_levels(budget);
    let inputs = features.len() as f64;

    struct Union {
        color_sum: [f64; 3],
        count: f64,
        percentage: f64,
    }
    let mut union: HashMap<u32, Union> = HashMap::new();

    for bucket in features.iter().flat_map(|f| f.histogram.iter()) {
        let entry = union
            .entry(quantize_key(&bucket.color, levels))
            .or_insert(Union {
                color_sum: [0.0; 3],
                count: 0.0,
                percentage: 0.0,
            });
        let weight = bucket.count.max(1) as f64;
        let [r, g, b] = bucket.color.channels_f64();
        entry.color_sum[0] += r * weight;
        entry.color_sum[1] += g * weight;
        entry.color_sum[2] += b * weight;
        entry.count += bucket.count as f64;
        entry.percentage += bucket.percentage;
    }

    let mut merged: Vec<(u32, ColorBucket)> = union
        .into_iter()
        .map(|(key, u)| {
            let weight_total = u.count.max(1.0);
            let bucket = ColorBucket {
                color: Rgb::from_f64(
                    u.color_sum[0] / weight_total,
                    u.color_sum[1] / weight_total,
                    u.color_sum[2] / weight_total,
                ),
                count: (u.count / inputs).round() as u64,
                percentage: u.percentage / inputs,
            };
            (key, bucket)
        })
        .collect();

    merged.sort_by(|a, b| {
        b.1.percentage
            .total_cmp(&a.1.percentage)
            .then(b.1.count.cmp(&a.1.count))
            .then(a.0.cmp(&b.0))
    });
    merged.truncate(budget);
    merged.into_iter().map(|(_, bucket)| bucket).collect()
}

/// Agglomerates the union of all dominant colors and keeps the most populous
/// clusters. The result has as many entries as the first input had.
fn merge_dominant_colors(features: &[&FingerprintFeatures]) -> Vec<Rgb> {
    let k = features.first().map(|f| f.dominant_colors.len()).unwrap_or(0);
    if k == 0 {
        return Vec::new();
    }

    struct Cluster {
        center: Rgb,
        sum: [f64; 3],
        members: usize,
    }
    let mut clusters: Vec<Cluster> = Vec::new();

    for color in features.iter().flat_map(|f| f.dominant_colors.iter()) {
        let [r, g, b] = color.channels_f64();
        match clusters
            .iter_mut()
            .find(|c| color_distance(&c.center, color) < MERGE_CLUSTER_DISTANCE)
        {
            Some(cluster) => {
                cluster.sum[0] += r;
                cluster.sum[1] += g;
                cluster.sum[2] += b;
                cluster.members += 1;
                let n = cluster.members as f64;
                cluster.center =
                    Rgb::from_f64(cluster.sum[0] / n, cluster.sum[1] / n, cluster.sum[2] / n);
            }
            None => clusters.push(Cluster {
                center: *color,
                sum: [r, g, b],
                members: 1,
            }),
        }
    }

    // Stable sort keeps first-seen order among equally populous clusters.
    clusters.sort_by(|a, b| b.members.cmp(&a.members));
    clusters
        .iter()
        .map(|c| c.center)
        .cycle()
        .take(k)
        .collect()
}

/// Cell-wise mean of the edge signatures. Inputs extracted on different grids
/// cannot be averaged, in which case the first input's signature is kept.
fn merge_edge_signatures(features: &[&FingerprintFeatures]) -> Vec<f64> {
    let Some(first) = features.first() else {
        return Vec::new();
    };
    let len = first.edge_signature.len();
    if features.iter().any(|f| f.edge_signature.len() != len) {
        return first.edge_signature.clone();
    }
    let inputs = features.len() as f64;
    (0..len)
        .map(|i| features.iter().map(|f| f.edge_signature[i]).sum::<f64>() / inputs)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::frame::{Frame, PixelRect};

    fn solid(rgba: [u8; 4]) -> VisualFingerprint {
        let frame = Frame::filled(40, 40, rgba);
        generate_fingerprint_from_frame(&frame.view(), "solid", &FingerprintOptions::default())
            .expect("fingerprint")
    }

    #[test]
    fn solid_image_fingerprint_is_well_formed() {
        let fp = solid([255, 165, 0, 255]);
        let features = &fp.features;
        assert_eq!(features.average_color, Rgb::new(255, 165, 0));
        assert_eq!(features.histogram.len(), 1);
        assert_eq!(features.dominant_colors, vec![Rgb::new(255, 165, 0); 5]);
        assert_eq!(features.edge_signature, vec![0.0; 64]);
        assert_eq!(features.edge_grid_size(), Some(8));
        assert_eq!(features.color_variance, 0.0);
        assert_eq!(features.estimated_size_ratio, 0.0);
        assert_eq!(fp.reference_images.len(), 1);
        assert_eq!(fp.name, "solid");
    }

    #[test]
    fn large_references_are_downscaled_before_extraction() {
        let mut frame = Frame::filled(600, 300, [20, 40, 60, 255]);
        frame.fill_rect(PixelRect::new(0, 0, 300, 300), [200, 40, 60, 255]);
        let fp = generate_fingerprint_from_frame(
            &frame.view(),
            "wide",
            &FingerprintOptions::default(),
        )
        .expect("fingerprint");
        let total: u64 = fp.features.histogram.iter().map(|b| b.count).sum();
        assert_eq!(total, 256 * 128);
    }

    #[test]
    fn thumbnails_can_be_skipped() {
        let frame = Frame::filled(10, 10, [1, 2, 3, 255]);
        let options = FingerprintOptions {
            include_thumbnail: false,
            ..Default::default()
        };
        let fp = generate_fingerprint_from_frame(&frame.view(), "bare", &options).unwrap();
        assert!(fp.reference_images.is_empty());
    }

    #[test]
    fn undecodable_bytes_are_an_error() {
        let result = generate_fingerprint_from_encoded(
            b"\x00\x01\x02",
            "broken",
            &FingerprintOptions::default(),
        );
        assert!(matches!(result, Err(VisionError::Image(_))));
    }

    #[test]
    fn merging_nothing_is_an_error() {
        assert!(matches!(merge_fingerprints(&[]), Err(VisionError::NoInput)));
    }

    #[test]
    fn merging_one_fingerprint_is_identity() {
        let fp = solid([10, 200, 30, 255]);
        let merged = merge_fingerprints(std::slice::from_ref(&fp)).unwrap();
        assert_eq!(merged, fp);
    }

    #[test]
    fn merging_averages_the_average_color() {
        let black = solid([0, 0, 0, 255]);
        let light = solid([200, 200, 200, 255]);
        let merged = merge_fingerprints(&[black, light]).unwrap();
        assert_eq!(merged.features.average_color, Rgb::new(100, 100, 100));
    }

    #[test]
    fn merging_unions_histograms_and_keeps_the_budget() {
        let red = solid([255, 0, 0, 255]);
        let blue = solid([0, 0, 255, 255]);
        let merged = merge_fingerprints(&[red, blue]).unwrap();
        let histogram = &merged.features.histogram;
        assert_eq!(merged.features.histogram_buckets, 64);
        assert_eq!(histogram.len(), 2);
        let colors: Vec<Rgb> = histogram.iter().map(|b| b.color).collect();
        assert!(colors.contains(&Rgb::new(255, 0, 0)));
        assert!(colors.contains(&Rgb::new(0, 0, 255)));
        assert!(histogram.iter().all(|b| (b.percentage - 50.0).abs() < 1e-9));
        assert!(histogram.iter().all(|b| b.count == 800));

        let mut both = Frame::filled(40, 40, [255, 0, 0, 255]);
        both.fill_rect(PixelRect::new(0, 0, 20, 40), [0, 0, 255, 255]);
        let mixed = generate_fingerprint_from_frame(
            &both.view(),
            "mixed",
            &FingerprintOptions::default(),
        )
        .unwrap();
        let merged = merge_fingerprints(&[mixed, solid([0, 0, 255, 255])]).unwrap();
        let histogram = &merged.features.histogram;
        assert_eq!(histogram.len(), 2);
        assert_eq!(histogram[0].color, Rgb::new(0, 0, 255));
        assert!((histogram[0].percentage - 75.0).abs() < 1e-9);
        assert!((histogram[1].percentage - 25.0).abs() < 1e-9);
    }

    #[test]
    fn merging_with_an_identical_copy_keeps_the_histogram() {
        let mut frame = Frame::filled(40, 40, [150, 40, 40, 255]);
        frame.fill_rect(PixelRect::new(0, 0, 40, 10), [200, 40, 40, 255]);
        let two_tone = generate_fingerprint_from_frame(
            &frame.view(),
            "two-tone",
            &FingerprintOptions::default(),
        )
        .unwrap();
        assert_eq!(two_tone.features.histogram.len(), 2);

        let merged = merge_fingerprints(&[two_tone.clone(), two_tone.clone()]).unwrap();
        assert_eq!(merged.features.histogram, two_tone.features.histogram);
    }

    #[test]
    fn histogram_budget_defaults_when_missing_from_json() {
        let fp = solid([255, 165, 0, 255]);
        let mut value: serde_json::Value = serde_json::from_str(&fp.to_json().unwrap()).unwrap();
        value
            .as_object_mut()
            .unwrap()
            .remove("histogramBuckets")
            .expect("budget serialized");
        let back: VisualFingerprint = serde_json::from_value(value).unwrap();
        assert_eq!(back.features.histogram_buckets, 64);
    }

    #[test]
    fn merging_reclusters_dominant_colors_to_k() {
        let red = solid([250, 0, 0, 255]);
        let near_red = solid([240, 10, 10, 255]);
        let blue = solid([0, 0, 255, 255]);
        let merged = merge_fingerprints(&[red, near_red, blue]).unwrap();
        let dominant = &merged.features.dominant_colors;
        assert_eq!(dominant.len(), 5);
        assert_eq!(dominant[0], Rgb::new(245, 5, 5));
        assert_eq!(dominant[1], Rgb::new(0, 0, 255));
    }

    #[test]
    fn merging_averages_edges_and_caps_thumbnails() {
        let inputs: Vec<VisualFingerprint> =
            (0..7).map(|i| solid([i * 30, 0, 0, 255])).collect();
        let merged = merge_fingerprints(&inputs).unwrap();
        assert_eq!(merged.reference_images.len(), MAX_REFERENCE_IMAGES);
        assert_eq!(merged.features.edge_signature, vec![0.0; 64]);
        assert_ne!(merged.id, inputs[0].id);
    }

    #[test]
    fn mismatched_edge_grids_keep_the_first_signature() {
        let a = solid([0, 0, 0, 255]);
        let mut b = solid([0, 0, 0, 255]);
        b.features.edge_signature = vec![50.0; 16];
        let merged = merge_fingerprints(&[a.clone(), b]).unwrap();
        assert_eq!(merged.features.edge_signature, a.features.edge_signature);
    }

    #[test]
    fn fingerprints_survive_json() {
        let fp = solid([255, 165, 0, 255]);
        let json = fp.to_json().unwrap();
        assert!(json.contains("\"dominantColors\""));
        assert!(json.contains("\"edgeSignature\""));
        assert!(json.contains("\"createdAt\""));
        let back = VisualFingerprint::from_json(&json).unwrap();
        assert_eq!(back, fp);
    }
}
