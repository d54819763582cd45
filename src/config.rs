//! Configuration parsing and management for Lumawarp

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, LumawarpError};
use crate::stabilize::StabilizerMode;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub warp: WarpConfig,
    pub stabilizer: StabilizerConfig,
    pub mesh: MeshConfig,
    pub overlay: OverlayConfig,
    pub session: SessionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            warp: WarpConfig::default(),
            stabilizer: StabilizerConfig::default(),
            mesh: MeshConfig::default(),
            overlay: OverlayConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, LumawarpError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::ReadFile(format!("{}: {}", path.as_ref().display(), e)))?;

        Self::from_toml(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(s: &str) -> Result<Self, LumawarpError> {
        toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()).into())
    }

    /// Load configuration from default paths
    pub fn load() -> Result<Self, LumawarpError> {
        let paths = [
            PathBuf::from("lumawarp.toml"),
            PathBuf::from("config/default.toml"),
        ];

        for path in &paths {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), LumawarpError> {
        if !(0.0..=1.0).contains(&self.warp.slim_strength) {
            return Err(ConfigError::InvalidValue {
                field: "warp.slim_strength".to_string(),
                message: "Strength must be between 0.0 and 1.0".to_string(),
            }
            .into());
        }

        if self.warp.radius_scale <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "warp.radius_scale".to_string(),
                message: "Radius scale must be greater than 0".to_string(),
            }
            .into());
        }

        if !(0.0..=1.0).contains(&self.stabilizer.alpha) || self.stabilizer.alpha == 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "stabilizer.alpha".to_string(),
                message: "Alpha must be in (0.0, 1.0]".to_string(),
            }
            .into());
        }

        if !(0.0..=1.0).contains(&self.stabilizer.follow_rate) || self.stabilizer.follow_rate == 0.0
        {
            return Err(ConfigError::InvalidValue {
                field: "stabilizer.follow_rate".to_string(),
                message: "Follow rate must be in (0.0, 1.0]".to_string(),
            }
            .into());
        }

        if self.stabilizer.reference_resolution <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "stabilizer.reference_resolution".to_string(),
                message: "Reference resolution must be greater than 0".to_string(),
            }
            .into());
        }

        if self.stabilizer.decimate_frames == 0 {
            return Err(ConfigError::InvalidValue {
                field: "stabilizer.decimate_frames".to_string(),
                message: "Decimation interval must be at least 1 frame".to_string(),
            }
            .into());
        }

        if self.stabilizer.lock_samples == 0 {
            return Err(ConfigError::InvalidValue {
                field: "stabilizer.lock_samples".to_string(),
                message: "Lock sample count must be at least 1".to_string(),
            }
            .into());
        }

        if self.mesh.cols == 0 || self.mesh.rows == 0 {
            return Err(ConfigError::InvalidValue {
                field: "mesh.cols/mesh.rows".to_string(),
                message: "Mesh grid must have at least one cell per axis".to_string(),
            }
            .into());
        }

        if self.mesh.frustum_height <= 0.0 || self.mesh.aspect <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "mesh.frustum_height/mesh.aspect".to_string(),
                message: "Viewport extents must be greater than 0".to_string(),
            }
            .into());
        }

        if self.session.max_subjects == 0 {
            return Err(ConfigError::InvalidValue {
                field: "session.max_subjects".to_string(),
                message: "At least one subject slot is required".to_string(),
            }
            .into());
        }

        if self.session.pipeline_every_n == 0 {
            return Err(ConfigError::InvalidValue {
                field: "session.pipeline_every_n".to_string(),
                message: "Pipeline gate must be at least 1".to_string(),
            }
            .into());
        }

        Ok(())
    }
}

/// Mesh warp tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarpConfig {
    /// Slimming strength (0.0 = off, 1.0 = maximum)
    pub slim_strength: f32,
    /// Warp radius as a multiple of the jaw-corner span
    pub radius_scale: f32,
}

impl Default for WarpConfig {
    fn default() -> Self {
        Self {
            slim_strength: 0.3,
            radius_scale: 1.5,
        }
    }
}

/// Landmark stabilizer tuning. Each mode reads only its own parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilizerConfig {
    /// Active stabilization strategy
    pub mode: StabilizerMode,
    /// EMA blend factor, (0.0, 1.0]
    pub alpha: f32,
    /// Deadzone freeze threshold, in pixels at `reference_resolution`
    pub threshold: f32,
    /// Deadzone partial-follow rate once the threshold is exceeded, (0.0, 1.0]
    pub follow_rate: f32,
    /// Resolution (pixels) that `threshold` and `lock_break_threshold` are
    /// expressed against
    pub reference_resolution: f32,
    /// Decimation: adopt raw every Nth frame
    pub decimate_frames: u32,
    /// Decimation: also adopt raw once this many milliseconds have elapsed
    /// since the last adoption (0 = frame-count gating only)
    pub decimate_millis: u64,
    /// Lock-average: number of consecutive raw sets to accumulate
    pub lock_samples: u32,
    /// Lock-average: break the frozen pose when reference displacement
    /// exceeds this many pixels at `reference_resolution`
    pub lock_break_threshold: f32,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            mode: StabilizerMode::Ema,
            alpha: 0.3,
            threshold: 2.0,
            follow_rate: 0.35,
            reference_resolution: 720.0,
            decimate_frames: 3,
            decimate_millis: 0,
            lock_samples: 5,
            lock_break_threshold: 24.0,
        }
    }
}

/// Base mesh geometry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Grid cells along x
    pub cols: u32,
    /// Grid cells along y
    pub rows: u32,
    /// Orthographic frustum height in working units
    pub frustum_height: f32,
    /// Viewport width / height
    pub aspect: f32,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            cols: 64,
            rows: 64,
            frustum_height: 2.0,
            aspect: 16.0 / 9.0,
        }
    }
}

/// Overlay enable flags
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Soft face highlight
    pub highlight: bool,
    /// Cosmetic lip outline
    pub outline: bool,
    /// Nose prop
    pub prop: bool,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            highlight: false,
            outline: false,
            prop: false,
        }
    }
}

/// Mirror behavior for the rendered scene
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MirrorMode {
    /// Mirror when the front camera is active
    Auto,
    On,
    Off,
}

impl MirrorMode {
    /// Resolve to a concrete flip for the current camera facing.
    pub fn resolve(self, front_camera: bool) -> bool {
        match self {
            MirrorMode::Auto => front_camera,
            MirrorMode::On => true,
            MirrorMode::Off => false,
        }
    }
}

/// What to do with stabilization state when all subjects vanish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "policy")]
pub enum GracePolicy {
    /// Drop state on the first empty frame
    Reset,
    /// Keep the last stable pose for a bounded number of empty frames
    Hold { frames: u32 },
}

/// Session orchestration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum simultaneously tracked subjects
    pub max_subjects: usize,
    /// Mirror behavior
    pub mirror: MirrorMode,
    /// Whether the active camera is front-facing (drives MirrorMode::Auto)
    pub front_camera: bool,
    /// Run the full pipeline only every Nth tick; gated ticks resubmit the
    /// held output. Independent of the stabilizer's own decimation mode.
    pub pipeline_every_n: u32,
    /// Subject-loss grace policy
    pub grace: GracePolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_subjects: 1,
            mirror: MirrorMode::Auto,
            front_camera: true,
            pipeline_every_n: 1,
            grace: GracePolicy::Reset,
        }
    }
}
