//! Temporal landmark stabilization.
//!
//! Converts raw, noisy per-frame landmark sets into smooth ones via a
//! pluggable strategy. All per-subject state lives in an explicit
//! [`StabilizationState`] owned by the caller's subject slot; the
//! [`Stabilizer`] itself is stateless configuration.

use std::time::Duration;

use crate::config::StabilizerConfig;
use crate::error::TrackError;
use crate::landmark::LandmarkSet;

/// Which stabilization strategy to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StabilizerMode {
    /// Exponential moving average toward raw
    Ema,
    /// Freeze below a displacement threshold, partial-follow above it
    Deadzone,
    /// Adopt raw only every Kth frame / every D milliseconds
    Decimate,
    /// Freeze to the mean of N accumulated samples on an explicit trigger
    LockAverage,
}

impl StabilizerMode {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "deadzone" | "dead_zone" => Self::Deadzone,
            "decimate" | "decimation" => Self::Decimate,
            "lock-average" | "lock_average" | "lockaverage" => Self::LockAverage,
            _ => Self::Ema,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ema => "ema",
            Self::Deadzone => "deadzone",
            Self::Decimate => "decimate",
            Self::LockAverage => "lock-average",
        }
    }

    pub const ALL: [StabilizerMode; 4] =
        [Self::Ema, Self::Deadzone, Self::Decimate, Self::LockAverage];
}

/// Lock-and-average progression.
#[derive(Debug, Clone, PartialEq)]
enum LockPhase {
    /// No lock requested; raw passes through
    Inactive,
    /// Trigger received; accumulating raw samples, warping suspended
    Settling(Vec<LandmarkSet>),
    /// Holding the averaged pose
    Frozen,
}

/// Per-subject stabilization state. Created on first detection of a slot,
/// reset explicitly on subject loss or camera switch, dropped at session end.
#[derive(Debug, Clone)]
pub struct StabilizationState {
    stable: LandmarkSet,
    frames_since_adopt: u32,
    last_adopt: Duration,
    lock: LockPhase,
}

impl StabilizationState {
    /// First frame for a subject adopts raw directly.
    pub fn adopt(raw: LandmarkSet, now: Duration) -> Self {
        Self {
            stable: raw,
            frames_since_adopt: 0,
            last_adopt: now,
            lock: LockPhase::Inactive,
        }
    }

    /// The current stabilized set.
    pub fn stable(&self) -> &LandmarkSet {
        &self.stable
    }

    /// True while lock-average samples are being accumulated; the caller
    /// suspends warping for this subject until settling completes.
    pub fn is_settling(&self) -> bool {
        matches!(self.lock, LockPhase::Settling(_))
    }

    /// True while holding an averaged frozen pose.
    pub fn is_frozen(&self) -> bool {
        self.lock == LockPhase::Frozen
    }
}

/// Strategy-dispatched landmark stabilizer.
pub struct Stabilizer {
    config: StabilizerConfig,
}

impl Stabilizer {
    pub fn new(config: StabilizerConfig) -> Self {
        Self { config }
    }

    pub fn mode(&self) -> StabilizerMode {
        self.config.mode
    }

    /// Advance one frame of raw input through the active strategy.
    ///
    /// A topology mismatch leaves `state` untouched and fails with
    /// `InvalidTopology`; the caller must reset that subject's slot.
    pub fn apply(
        &self,
        state: &mut StabilizationState,
        raw: &LandmarkSet,
        now: Duration,
    ) -> Result<(), TrackError> {
        if raw.len() != state.stable.len() {
            return Err(TrackError::InvalidTopology {
                expected: state.stable.len(),
                actual: raw.len(),
            });
        }

        match self.config.mode {
            StabilizerMode::Ema => self.apply_ema(state, raw),
            StabilizerMode::Deadzone => self.apply_deadzone(state, raw),
            StabilizerMode::Decimate => self.apply_decimate(state, raw, now),
            StabilizerMode::LockAverage => self.apply_lock_average(state, raw),
        }

        Ok(())
    }

    /// Request a lock-and-average freeze. Takes effect on the next
    /// `apply` calls; a no-op outside lock-average mode.
    pub fn begin_lock(&self, state: &mut StabilizationState) {
        if self.config.mode == StabilizerMode::LockAverage {
            state.lock = LockPhase::Settling(Vec::with_capacity(self.config.lock_samples as usize));
        }
    }

    fn apply_ema(&self, state: &mut StabilizationState, raw: &LandmarkSet) {
        let alpha = self.config.alpha;
        for (stable, raw) in state.stable.points_mut().iter_mut().zip(raw.iter()) {
            *stable += (*raw - *stable) * alpha;
        }
    }

    fn apply_deadzone(&self, state: &mut StabilizationState, raw: &LandmarkSet) {
        let disp_sq = state
            .stable
            .reference_displacement_sq(raw, self.config.reference_resolution);
        let threshold_sq = self.config.threshold * self.config.threshold;

        if disp_sq <= threshold_sq {
            // Below threshold: freeze
            return;
        }

        let rate = self.config.follow_rate;
        for (stable, raw) in state.stable.points_mut().iter_mut().zip(raw.iter()) {
            *stable += (*raw - *stable) * rate;
        }
    }

    fn apply_decimate(&self, state: &mut StabilizationState, raw: &LandmarkSet, now: Duration) {
        state.frames_since_adopt += 1;

        let frame_due = state.frames_since_adopt >= self.config.decimate_frames;
        let time_due = self.config.decimate_millis > 0
            && now.saturating_sub(state.last_adopt)
                >= Duration::from_millis(self.config.decimate_millis);

        if frame_due || time_due {
            state.stable = raw.clone();
            state.frames_since_adopt = 0;
            state.last_adopt = now;
        }
        // Otherwise reuse the previous stabilized set unchanged
    }

    fn apply_lock_average(&self, state: &mut StabilizationState, raw: &LandmarkSet) {
        match &mut state.lock {
            LockPhase::Inactive => {
                state.stable = raw.clone();
            }
            LockPhase::Settling(samples) => {
                samples.push(raw.clone());
                if samples.len() >= self.config.lock_samples as usize {
                    state.stable = mean_of(samples);
                    state.lock = LockPhase::Frozen;
                    tracing::debug!(samples = self.config.lock_samples, "lock pose frozen");
                }
            }
            LockPhase::Frozen => {
                let disp_sq = state
                    .stable
                    .reference_displacement_sq(raw, self.config.reference_resolution);
                let break_sq =
                    self.config.lock_break_threshold * self.config.lock_break_threshold;
                if disp_sq > break_sq {
                    tracing::debug!("lock pose broken by movement");
                    state.lock = LockPhase::Inactive;
                    state.stable = raw.clone();
                }
            }
        }
    }
}

/// Per-coordinate arithmetic mean of a non-empty sample buffer.
fn mean_of(samples: &[LandmarkSet]) -> LandmarkSet {
    let mut mean = samples[0].clone();
    for set in &samples[1..] {
        for (acc, p) in mean.points_mut().iter_mut().zip(set.iter()) {
            *acc += *p;
        }
    }
    let inv = 1.0 / samples.len() as f32;
    for p in mean.points_mut() {
        *p *= inv;
    }
    mean
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmark::{LANDMARK_COUNT, REFERENCE_INDICES};
    use glam::Vec3;

    fn uniform_set(v: f32) -> LandmarkSet {
        LandmarkSet::new(vec![Vec3::splat(v); LANDMARK_COUNT]).unwrap()
    }

    fn config(mode: StabilizerMode) -> StabilizerConfig {
        StabilizerConfig {
            mode,
            ..StabilizerConfig::default()
        }
    }

    fn tick(n: u64) -> Duration {
        Duration::from_millis(n * 33)
    }

    #[test]
    fn ema_converges_monotonically_to_constant_input() {
        let stabilizer = Stabilizer::new(config(StabilizerMode::Ema));
        let mut state = StabilizationState::adopt(uniform_set(0.0), tick(0));
        let raw = uniform_set(1.0);

        let alpha = 0.3f32;
        let epsilon = 1e-3f32;
        let bound = (epsilon.ln() / (1.0 - alpha).ln()).ceil() as u64;

        let mut prev_err = 1.0f32;
        for frame in 1..=bound {
            stabilizer.apply(&mut state, &raw, tick(frame)).unwrap();
            let err = (1.0 - state.stable().get(0).x).abs();
            assert!(err < prev_err, "error should shrink every frame: {err} >= {prev_err}");
            prev_err = err;
        }
        assert!(prev_err <= epsilon, "not converged after {bound} frames: {prev_err}");
    }

    #[test]
    fn deadzone_freezes_below_threshold() {
        let stabilizer = Stabilizer::new(config(StabilizerMode::Deadzone));
        let adopted = uniform_set(0.5);
        let mut state = StabilizationState::adopt(adopted.clone(), tick(0));

        // 1px of jitter at 720p reference is well under the 2px threshold
        for frame in 1..50u64 {
            let jitter = if frame % 2 == 0 { 1.0 / 720.0 } else { -1.0 / 720.0 };
            let raw = uniform_set(0.5 + jitter);
            stabilizer.apply(&mut state, &raw, tick(frame)).unwrap();
            assert_eq!(
                state.stable(),
                &adopted,
                "stabilized output moved under sub-threshold jitter (frame {frame})"
            );
        }
    }

    #[test]
    fn deadzone_follows_above_threshold() {
        let stabilizer = Stabilizer::new(config(StabilizerMode::Deadzone));
        let mut state = StabilizationState::adopt(uniform_set(0.5), tick(0));

        // 36px displacement at 720p reference
        let raw = uniform_set(0.55);
        stabilizer.apply(&mut state, &raw, tick(1)).unwrap();

        let moved = state.stable().get(0).x;
        let expected = 0.5 + (0.55 - 0.5) * 0.35;
        assert!((moved - expected).abs() < 1e-6, "partial follow: {moved} vs {expected}");
    }

    #[test]
    fn decimate_reuses_between_adoptions() {
        let stabilizer = Stabilizer::new(config(StabilizerMode::Decimate));
        let mut state = StabilizationState::adopt(uniform_set(0.1), tick(0));

        // decimate_frames defaults to 3: frames 1 and 2 reuse, frame 3 adopts
        stabilizer.apply(&mut state, &uniform_set(0.2), tick(1)).unwrap();
        assert_eq!(state.stable().get(0).x, 0.1);
        stabilizer.apply(&mut state, &uniform_set(0.3), tick(2)).unwrap();
        assert_eq!(state.stable().get(0).x, 0.1);
        stabilizer.apply(&mut state, &uniform_set(0.4), tick(3)).unwrap();
        assert_eq!(state.stable().get(0).x, 0.4);
        stabilizer.apply(&mut state, &uniform_set(0.5), tick(4)).unwrap();
        assert_eq!(state.stable().get(0).x, 0.4);
    }

    #[test]
    fn decimate_adopts_on_elapsed_time() {
        let mut cfg = config(StabilizerMode::Decimate);
        cfg.decimate_frames = 1000;
        cfg.decimate_millis = 100;
        let stabilizer = Stabilizer::new(cfg);
        let mut state = StabilizationState::adopt(uniform_set(0.1), Duration::ZERO);

        stabilizer
            .apply(&mut state, &uniform_set(0.2), Duration::from_millis(50))
            .unwrap();
        assert_eq!(state.stable().get(0).x, 0.1, "50ms: too early");
        stabilizer
            .apply(&mut state, &uniform_set(0.3), Duration::from_millis(120))
            .unwrap();
        assert_eq!(state.stable().get(0).x, 0.3, "120ms: time gate due");
    }

    #[test]
    fn lock_average_freezes_exact_mean() {
        let mut cfg = config(StabilizerMode::LockAverage);
        cfg.lock_samples = 4;
        let stabilizer = Stabilizer::new(cfg);
        let mut state = StabilizationState::adopt(uniform_set(0.0), tick(0));

        stabilizer.begin_lock(&mut state);
        let values = [0.1f32, 0.2, 0.3, 0.4];
        for (i, v) in values.iter().enumerate() {
            assert!(state.is_settling(), "sample {i} should still be settling");
            stabilizer
                .apply(&mut state, &uniform_set(*v), tick(i as u64 + 1))
                .unwrap();
        }

        assert!(state.is_frozen());
        let mean = values.iter().sum::<f32>() / values.len() as f32;
        assert!(
            (state.stable().get(0).x - mean).abs() < 1e-6,
            "frozen pose should be the exact sample mean"
        );

        // Small movement keeps the frozen pose
        stabilizer.apply(&mut state, &uniform_set(mean + 0.001), tick(9)).unwrap();
        assert!(state.is_frozen());
        assert!((state.stable().get(0).x - mean).abs() < 1e-6);
    }

    #[test]
    fn lock_average_breaks_on_large_movement() {
        let mut cfg = config(StabilizerMode::LockAverage);
        cfg.lock_samples = 2;
        let stabilizer = Stabilizer::new(cfg);
        let mut state = StabilizationState::adopt(uniform_set(0.5), tick(0));

        stabilizer.begin_lock(&mut state);
        stabilizer.apply(&mut state, &uniform_set(0.5), tick(1)).unwrap();
        stabilizer.apply(&mut state, &uniform_set(0.5), tick(2)).unwrap();
        assert!(state.is_frozen());

        // 72px at the 720p reference blows past the 24px break threshold
        stabilizer.apply(&mut state, &uniform_set(0.6), tick(3)).unwrap();
        assert!(!state.is_frozen(), "large movement should break the lock");
        assert_eq!(state.stable().get(0).x, 0.6, "break re-adopts raw");
    }

    #[test]
    fn mode_round_trips_through_strings() {
        for mode in StabilizerMode::ALL {
            assert_eq!(StabilizerMode::from_str(mode.as_str()), mode);
        }
        assert_eq!(StabilizerMode::from_str("lock_average"), StabilizerMode::LockAverage);
        assert_eq!(StabilizerMode::from_str("unknown"), StabilizerMode::Ema);
    }

    #[test]
    fn reference_subset_drives_deadzone_not_other_points() {
        let stabilizer = Stabilizer::new(config(StabilizerMode::Deadzone));
        let adopted = uniform_set(0.5);
        let mut state = StabilizationState::adopt(adopted.clone(), tick(0));

        // Move a non-reference landmark far; the reference subset is
        // unchanged so the aggregate stays below threshold and everything
        // freezes, the far-moved point included.
        let mut raw = adopted.clone();
        let non_reference = (0..LANDMARK_COUNT)
            .find(|i| !REFERENCE_INDICES.contains(i))
            .unwrap();
        raw.points_mut()[non_reference].x = 0.9;

        stabilizer.apply(&mut state, &raw, tick(1)).unwrap();
        assert_eq!(state.stable(), &adopted);
    }
}
