// THEORY:
// This file is the main entry point for the `finder_vision` library crate.
// It defines the public API exposed to consumers such as the match runner binary
// or a service that feeds camera frames.
//
// The primary exports are the fingerprint builder (`generate_fingerprint`,
// `merge_fingerprints`), the comparator (`compare_fingerprints`, `quick_compare`)
// and the per-session `RealtimeMatcher` with its settings and results. The
// `MultiSubjectSearch` coordinator runs one matcher per subject on tokio tasks.
// The analysis internals live in `core_modules` and stay reachable for callers
// that need a single extractor.

pub mod core_modules;
pub mod error;
pub mod matcher;
pub mod search;

pub use core_modules::comparator::{
    ComparisonWeights, MatchBreakdown, compare_fingerprints, quick_compare,
};
pub use core_modules::fingerprint::{
    FingerprintOptions, VisualFingerprint, generate_fingerprint, generate_fingerprint_from_encoded,
    generate_fingerprint_from_frame, generate_fingerprint_from_path, merge_fingerprints,
};
pub use core_modules::frame::{Frame, FrameView, MatchRegion};
pub use core_modules::pixel::pixel::Rgb;
pub use error::{VisionError, VisionResult};
pub use matcher::{
    ConfidenceTier, MatchResult, MatcherSettings, MatcherState, MatcherStats, ProcessingMode,
    RealtimeMatcher,
};
pub use search::{MultiSubjectSearch, SubjectReport};
