use finder_vision::core_modules::encoding::encoding::{decode_png_data_url, encode_png_data_url};
use finder_vision::core_modules::frame::PixelRect;
use finder_vision::{
    ComparisonWeights, ConfidenceTier, FingerprintOptions, Frame, MatcherSettings,
    RealtimeMatcher, VisualFingerprint, compare_fingerprints, generate_fingerprint_from_encoded,
    generate_fingerprint_from_frame,
};

const ORANGE: [u8; 4] = [255, 165, 0, 255];
const GRAY: [u8; 4] = [128, 128, 128, 255];
const BLUE: [u8; 4] = [0, 0, 255, 255];

fn solid_fingerprint(name: &str, rgba: [u8; 4]) -> VisualFingerprint {
    let reference = Frame::filled(100, 100, rgba);
    generate_fingerprint_from_frame(&reference.view(), name, &FingerprintOptions::default())
        .expect("fingerprint")
}

fn steady_settings() -> MatcherSettings {
    MatcherSettings {
        motion_priority: false,
        adaptive_lighting: false,
        ..MatcherSettings::default()
    }
}

#[test]
fn finds_an_orange_subject_in_one_tile() {
    let mut matcher = RealtimeMatcher::with_fingerprint(
        MatcherSettings::default(),
        solid_fingerprint("cat", ORANGE),
    );

    let baseline = Frame::filled(100, 100, GRAY);
    assert!(matcher.process_frame(&baseline.view()).is_none());

    let mut frame = baseline.clone();
    frame.fill_rect(PixelRect::new(0, 0, 50, 50), ORANGE);
    let result = matcher.process_frame(&frame.view()).expect("match");

    assert!(result.confidence >= 60.0, "confidence {}", result.confidence);
    assert!(result.confidence <= 100.0);
    let region = result.region.expect("region");
    assert!(region.contains(25.0, 25.0));
    assert!(region.center_x <= 50.0 && region.center_y <= 50.0);
    assert!(matcher.should_alert());
    assert!(matcher.should_record());

    let snapshot = result.snapshot.as_deref().expect("snapshot");
    let decoded = decode_png_data_url(snapshot).expect("decodable snapshot");
    assert_eq!((decoded.width(), decoded.height()), (100, 100));
}

#[test]
fn red_and_blue_subjects_do_not_match() {
    let red = solid_fingerprint("red", [255, 0, 0, 255]);
    let blue = solid_fingerprint("blue", BLUE);
    let comparison = compare_fingerprints(&red, &blue, &ComparisonWeights::default());
    assert!(comparison.overall < 40.0, "overall {}", comparison.overall);
    assert_eq!(ConfidenceTier::from_confidence(comparison.overall), ConfidenceTier::Unlikely);
}

#[test]
fn consecutive_matches_count_up_and_reset_on_a_miss() {
    let mut matcher =
        RealtimeMatcher::with_fingerprint(steady_settings(), solid_fingerprint("cat", ORANGE));
    let orange = Frame::filled(100, 100, ORANGE);
    let blue = Frame::filled(100, 100, BLUE);

    assert!(matcher.process_frame(&orange.view()).is_none());
    for expected in 1..=3 {
        assert!(matcher.process_frame(&orange.view()).is_some());
        assert_eq!(matcher.state().consecutive_matches, expected);
    }

    assert!(matcher.process_frame(&blue.view()).is_none());
    assert_eq!(matcher.state().consecutive_matches, 0);
    assert_eq!(matcher.state().match_history.len(), 3);
    assert!(matcher.state().last_match.is_some());
    assert_eq!(matcher.stats().frames_rejected, 1);
}

#[test]
fn history_is_capped_and_averaged() {
    let mut matcher =
        RealtimeMatcher::with_fingerprint(steady_settings(), solid_fingerprint("cat", ORANGE));
    let orange = Frame::filled(60, 60, ORANGE);

    matcher.process_frame(&orange.view());
    for _ in 0..25 {
        matcher.process_frame(&orange.view()).expect("match");
    }

    let state = matcher.state();
    assert_eq!(state.match_history.len(), 20);
    assert_eq!(state.consecutive_matches, 25);
    let mean = state.match_history.iter().map(|m| m.confidence).sum::<f64>() / 20.0;
    assert!((state.average_confidence - mean).abs() < 1e-9);
    assert_eq!(
        state.match_history.front().map(|m| &m.id),
        state.last_match.as_ref().map(|m| &m.id)
    );
}

#[test]
fn idle_matchers_never_report() {
    let frame = Frame::filled(50, 50, ORANGE);

    let mut inactive = RealtimeMatcher::new(MatcherSettings::default());
    inactive.set_fingerprint(Some(solid_fingerprint("cat", ORANGE)));
    assert!(inactive.process_frame(&frame.view()).is_none());
    assert!(inactive.process_frame(&frame.view()).is_none());

    let mut unconfigured = RealtimeMatcher::new(MatcherSettings::default());
    unconfigured.set_active(true);
    assert!(unconfigured.process_frame(&frame.view()).is_none());
    assert!(unconfigured.process_frame(&frame.view()).is_none());
    assert_eq!(unconfigured.stats().frames_processed, 0);
}

#[test]
fn installing_a_fingerprint_or_resetting_clears_history() {
    let mut matcher =
        RealtimeMatcher::with_fingerprint(steady_settings(), solid_fingerprint("cat", ORANGE));
    let orange = Frame::filled(40, 40, ORANGE);
    matcher.process_frame(&orange.view());
    matcher.process_frame(&orange.view()).expect("match");

    matcher.reset();
    assert!(matcher.state().last_match.is_none());
    assert!(matcher.state().is_active);
    // The next frame is a fresh baseline again.
    assert!(matcher.process_frame(&orange.view()).is_none());
    assert!(matcher.process_frame(&orange.view()).is_some());

    matcher.set_fingerprint(Some(solid_fingerprint("dog", BLUE)));
    assert!(matcher.state().match_history.is_empty());
    assert_eq!(matcher.state().consecutive_matches, 0);
}

#[test]
fn fingerprints_from_encoded_images_match_raw_ones() {
    let mut frame = Frame::filled(80, 60, GRAY);
    frame.fill_rect(PixelRect::new(20, 15, 40, 30), ORANGE);

    let url = encode_png_data_url(&frame.view()).expect("png");
    let png = decode_png_data_url(&url).expect("decode");
    let mut bytes = std::io::Cursor::new(Vec::new());
    png.write_to(&mut bytes, image::ImageFormat::Png).expect("write");

    let options = FingerprintOptions::default();
    let from_bytes =
        generate_fingerprint_from_encoded(bytes.get_ref(), "cat", &options).expect("encoded");
    let from_frame = generate_fingerprint_from_frame(&frame.view(), "cat", &options).expect("raw");

    assert_eq!(from_bytes.features, from_frame.features);
    assert!(generate_fingerprint_from_encoded(b"nope", "cat", &options).is_err());
}

#[test]
fn match_results_serialize_in_camel_case() {
    let mut matcher =
        RealtimeMatcher::with_fingerprint(steady_settings(), solid_fingerprint("cat", ORANGE));
    let orange = Frame::filled(40, 40, ORANGE);
    matcher.process_frame(&orange.view());
    let result = matcher.process_frame(&orange.view()).expect("match");

    let json = serde_json::to_value(&result).expect("json");
    assert!(json.get("processingTimeMs").is_some());
    assert!(json["breakdown"].get("colorMatch").is_some());
    assert!(json["region"].get("centerX").is_some());

    let state = serde_json::to_value(matcher.state()).expect("json");
    assert_eq!(state["consecutiveMatches"], 1);
    assert_eq!(state["isActive"], true);
}
