// The match runner: builds fingerprints from reference images on disk and replays a
// sequence of frame images through the engine, printing one JSON line per frame.
//
// Usage:
//   finder_vision <reference-image>... --frames <frame-image>...
//                 [--settings <settings.json>] [--separate] [--snapshots]
//
// By default all reference images are merged into one subject. With `--separate`
// every reference image is searched as its own subject.

use anyhow::{Context, Result, bail};
use finder_vision::core_modules::encoding::encoding::load_image;
use finder_vision::{
    FingerprintOptions, FrameView, MatcherSettings, MultiSubjectSearch, generate_fingerprint,
    merge_fingerprints,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default)]
struct Args {
    references: Vec<PathBuf>,
    frames: Vec<PathBuf>,
    settings: Option<PathBuf>,
    separate: bool,
    snapshots: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args::default();
    let mut in_frames = false;
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--frames" => in_frames = true,
            "--settings" => {
                let path = iter.next().context("--settings needs a file path")?;
                args.settings = Some(PathBuf::from(path));
            }
            "--separate" => args.separate = true,
            "--snapshots" => args.snapshots = true,
            flag if flag.starts_with("--") => bail!("unknown flag {flag}"),
            path if in_frames => args.frames.push(PathBuf::from(path)),
            path => args.references.push(PathBuf::from(path)),
        }
    }
    if args.references.is_empty() || args.frames.is_empty() {
        bail!(
            "usage: finder_vision <reference-image>... --frames <frame-image>... \
             [--settings <settings.json>] [--separate] [--snapshots]"
        );
    }
    Ok(args)
}

fn load_settings(path: Option<&Path>) -> Result<MatcherSettings> {
    let Some(path) = path else {
        return Ok(MatcherSettings::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read settings {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid settings {}", path.display()))
}

fn subject_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "subject".to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = parse_args()?;
    let settings = load_settings(args.settings.as_deref())?;
    let options = FingerprintOptions::default();

    let mut fingerprints = Vec::with_capacity(args.references.len());
    for path in &args.references {
        let image = load_image(path)
            .with_context(|| format!("failed to load reference {}", path.display()))?;
        fingerprints.push(generate_fingerprint(&image, &subject_name(path), &options)?);
    }
    if !args.separate {
        fingerprints = vec![merge_fingerprints(&fingerprints)?];
    }

    let mut search = MultiSubjectSearch::new(settings);
    let subject_ids: Vec<String> = fingerprints
        .into_iter()
        .map(|fp| search.add_subject(fp))
        .collect();
    info!(
        subjects = subject_ids.len(),
        frames = args.frames.len(),
        "Starting match run"
    );

    for path in &args.frames {
        let image = match load_image(path) {
            Ok(image) => image.to_rgba8(),
            Err(e) => {
                warn!(frame = %path.display(), error = %e, "Skipping unreadable frame");
                continue;
            }
        };
        let view = FrameView::new(image.width(), image.height(), image.as_raw())?;
        let mut reports = search.process_frame(&view).await?;
        if !args.snapshots {
            for report in &mut reports {
                if let Some(result) = report.result.as_mut() {
                    result.snapshot = None;
                }
            }
        }
        println!(
            "{}",
            json!({ "frame": path.display().to_string(), "subjects": reports })
        );
    }

    for id in &subject_ids {
        let stats = search.stats(id).await?;
        println!("{}", json!({ "subjectId": id, "stats": stats }));
    }
    search.shutdown().await;
    Ok(())
}
