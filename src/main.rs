//! Lumawarp demo binary.
//!
//! Runs the stabilize → warp → anchor pipeline against a built-in synthetic
//! landmark source and a logging render sink. No camera or GUI here; real
//! applications plug in their own detector and renderer.

use clap::Parser;
use glam::Vec3;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use lumawarp::landmark::{index, LandmarkSet, LandmarkSource, LANDMARK_COUNT};
use lumawarp::overlay::{OverlayAnchor, OverlayKind};
use lumawarp::session::RenderSink;
use lumawarp::stabilize::StabilizerMode;
use lumawarp::{Config, SessionCoordinator};

/// Lumawarp - Real-time face-slimming mesh warp demo
#[derive(Parser, Debug)]
#[command(name = "lumawarp", version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of frames to simulate
    #[arg(short, long, default_value_t = 300)]
    frames: u64,

    /// Stabilization mode (overrides config): ema, deadzone, decimate, lock-average
    #[arg(short, long)]
    mode: Option<String>,

    /// Slimming strength (overrides config)
    #[arg(short, long)]
    strength: Option<f32>,

    /// Simulate subject loss for this many frames mid-run
    #[arg(long, default_value_t = 0)]
    drop_frames: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Synthetic face drifting in a slow circle with per-frame jitter.
struct SyntheticFace {
    jitter_seed: u32,
}

impl SyntheticFace {
    fn new() -> Self {
        Self { jitter_seed: 0x2545_f491 }
    }

    // xorshift, good enough for demo jitter
    fn jitter(&mut self) -> f32 {
        let mut x = self.jitter_seed;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.jitter_seed = x;
        (x as f32 / u32::MAX as f32 - 0.5) * 0.004
    }
}

impl LandmarkSource for SyntheticFace {
    fn detect(&mut self, frame_index: u64, _timestamp: Duration) -> Option<Vec<LandmarkSet>> {
        let t = frame_index as f32 * 0.02;
        let cx = 0.5 + 0.05 * t.cos();
        let cy = 0.5 + 0.03 * t.sin();

        let mut points = Vec::with_capacity(LANDMARK_COUNT);
        for i in 0..LANDMARK_COUNT {
            let spread = (i % 37) as f32 / 37.0 - 0.5;
            points.push(Vec3::new(
                cx + spread * 0.2 + self.jitter(),
                cy + ((i % 53) as f32 / 53.0 - 0.5) * 0.25 + self.jitter(),
                0.01,
            ));
        }
        points[index::CHIN] = Vec3::new(cx + self.jitter(), cy + 0.2, 0.01);
        points[index::NOSE_TIP] = Vec3::new(cx + self.jitter(), cy, 0.02);
        points[index::LEFT_JAW] = Vec3::new(cx - 0.15, cy + 0.1, 0.01);
        points[index::RIGHT_JAW] = Vec3::new(cx + 0.15, cy + 0.1, 0.01);

        Some(vec![LandmarkSet::new(points).expect("synthetic set is full topology")])
    }
}

/// Render collaborator that just logs what it receives.
#[derive(Default)]
struct LoggingSink {
    frames: u64,
    overlays: u64,
    max_deflection: f32,
    rest: Vec<Vec3>,
}

impl RenderSink for LoggingSink {
    fn submit_mesh(&mut self, positions: &[Vec3], _topology: &[u32]) {
        self.frames += 1;
        if self.rest.len() == positions.len() {
            let deflection = positions
                .iter()
                .zip(&self.rest)
                .map(|(a, b)| (*a - *b).length())
                .fold(0.0f32, f32::max);
            self.max_deflection = self.max_deflection.max(deflection);
        }
    }

    fn submit_overlay(&mut self, subject: usize, kind: OverlayKind, anchor: &OverlayAnchor) {
        self.overlays += 1;
        debug!(
            subject,
            kind = kind.as_str(),
            x = anchor.position.x,
            y = anchor.position.y,
            scale = anchor.scale,
            "overlay anchor"
        );
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(log_level.into())
                .from_env_lossy(),
        )
        .init();

    info!("Starting {} v{}", lumawarp::NAME, lumawarp::VERSION);

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };
    if let Some(mode) = &args.mode {
        config.stabilizer.mode = StabilizerMode::from_str(mode);
    }
    if let Some(strength) = args.strength {
        config.warp.slim_strength = strength;
    }
    config.validate()?;

    info!(
        mode = config.stabilizer.mode.as_str(),
        strength = config.warp.slim_strength,
        subjects = config.session.max_subjects,
        "session configured"
    );

    let mut session = SessionCoordinator::new(config)?;
    session.start();

    let mut source = SyntheticFace::new();
    let mut sink = LoggingSink {
        rest: session.base_mesh().rest_positions().to_vec(),
        ..LoggingSink::default()
    };

    // Drop a window of frames in the middle to exercise the loss machinery
    let drop_start = args.frames / 2;
    let drop_end = drop_start + args.drop_frames;

    for frame in 0..args.frames {
        let now = Duration::from_millis(frame * 33);
        let detection = if args.drop_frames > 0 && (drop_start..drop_end).contains(&frame) {
            Some(Vec::new())
        } else {
            source.detect(frame, now)
        };

        let report = session.advance(detection, now, &mut sink)?;
        if frame % 60 == 0 {
            info!(
                frame,
                phase = %report.phase,
                warped = report.warped_subjects,
                gated = report.gated,
                "tick"
            );
        }
    }

    info!(
        frames = sink.frames,
        overlays = sink.overlays,
        max_deflection = sink.max_deflection,
        final_phase = %session.phase(),
        "session complete"
    );

    Ok(())
}
