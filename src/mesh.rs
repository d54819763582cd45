//! Base mesh generation and localized radial warping.
//!
//! The warp displaces grid vertices around the chin toward the nose with a
//! Gaussian falloff, producing the slimming effect. Warps compose additively
//! onto one shared working buffer so multiple subjects can deform the same
//! mesh in a single frame.

use glam::{Vec2, Vec3};

use crate::config::WarpConfig;
use crate::error::TrackError;
use crate::landmark::{index, LandmarkSet};

/// Scales configured strength into displacement force.
pub const FORCE_SCALE: f32 = 0.15;
/// Gaussian sigma as a fraction of the warp radius.
const FALLOFF_WIDTH: f32 = 0.4;
/// Vertical displacement damping relative to horizontal.
const VERTICAL_DAMP: f32 = 0.5;
/// Below this strength the warp is skipped entirely.
const MIN_STRENGTH: f32 = 0.01;
/// Jaw spans below this working-space width are degenerate.
const MIN_JAW_SPAN: f32 = 1e-4;

/// Orthographic working-space extents and the normalized-to-working mapping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn from_frustum(frustum_height: f32, aspect: f32) -> Self {
        Self {
            width: frustum_height * aspect,
            height: frustum_height,
        }
    }

    /// Map a normalized [0,1] landmark into centered working coordinates,
    /// flipping horizontally when the scene is mirrored. Detector y grows
    /// downward; working y grows upward.
    pub fn to_working(&self, lm: Vec3, mirrored: bool) -> Vec2 {
        let flip = if mirrored { -1.0 } else { 1.0 };
        Vec2::new(
            (lm.x - 0.5) * self.width * flip,
            -(lm.y - 0.5) * self.height,
        )
    }

    /// Working-space depth for a landmark's relative z.
    pub fn to_working_depth(&self, lm: Vec3) -> f32 {
        -lm.z * self.width * 0.5
    }
}

/// Immutable rest geometry: a centered grid plane plus triangle topology.
/// Generated once at session init.
#[derive(Debug, Clone)]
pub struct BaseMesh {
    viewport: Viewport,
    cols: u32,
    rows: u32,
    rest: Vec<Vec3>,
    indices: Vec<u32>,
}

impl BaseMesh {
    /// Build a `cols`×`rows`-cell grid spanning the viewport, row-major
    /// from the top-left corner.
    pub fn grid(cols: u32, rows: u32, viewport: Viewport) -> Self {
        let mut rest = Vec::with_capacity(((cols + 1) * (rows + 1)) as usize);
        for r in 0..=rows {
            let ty = r as f32 / rows as f32;
            let y = (0.5 - ty) * viewport.height;
            for c in 0..=cols {
                let tx = c as f32 / cols as f32;
                let x = (tx - 0.5) * viewport.width;
                rest.push(Vec3::new(x, y, 0.0));
            }
        }

        let stride = cols + 1;
        let mut indices = Vec::with_capacity((cols * rows * 6) as usize);
        for r in 0..rows {
            for c in 0..cols {
                let a = r * stride + c;
                let b = a + 1;
                let d = a + stride;
                let e = d + 1;
                indices.extend_from_slice(&[a, d, b, b, d, e]);
            }
        }

        Self {
            viewport,
            cols,
            rows,
            rest,
            indices,
        }
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn rest_positions(&self) -> &[Vec3] {
        &self.rest
    }

    pub fn topology(&self) -> &[u32] {
        &self.indices
    }

    pub fn vertex_count(&self) -> usize {
        self.rest.len()
    }

    pub fn grid_size(&self) -> (u32, u32) {
        (self.cols, self.rows)
    }
}

/// Mutable per-frame vertex buffer. Always reset from the base mesh before
/// warping; never carried forward deformed, or the mesh drifts unboundedly.
#[derive(Debug, Clone)]
pub struct WorkingMesh {
    positions: Vec<Vec3>,
}

impl WorkingMesh {
    pub fn new(base: &BaseMesh) -> Self {
        Self {
            positions: base.rest_positions().to_vec(),
        }
    }

    /// Copy rest positions over the whole buffer.
    pub fn reset_to(&mut self, base: &BaseMesh) {
        self.positions.copy_from_slice(base.rest_positions());
    }

    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    pub fn positions_mut(&mut self) -> &mut [Vec3] {
        &mut self.positions
    }
}

/// Applies the per-subject slimming warp onto a shared working buffer.
pub struct WarpEngine {
    config: WarpConfig,
}

impl WarpEngine {
    pub fn new(config: WarpConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WarpConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: WarpConfig) {
        self.config = config;
    }

    /// Warp one subject's region of the working mesh, additively.
    ///
    /// A pure function of its inputs: identical landmark sets, parameters,
    /// and incoming buffer contents produce bit-identical output.
    pub fn warp_subject(
        &self,
        mesh: &mut WorkingMesh,
        viewport: Viewport,
        landmarks: &LandmarkSet,
        mirrored: bool,
        subject: usize,
    ) -> Result<(), TrackError> {
        if self.config.slim_strength <= MIN_STRENGTH {
            return Ok(());
        }

        let chin = viewport.to_working(landmarks.get(index::CHIN), mirrored);
        let left_jaw = viewport.to_working(landmarks.get(index::LEFT_JAW), mirrored);
        let right_jaw = viewport.to_working(landmarks.get(index::RIGHT_JAW), mirrored);
        let nose = viewport.to_working(landmarks.get(index::NOSE_TIP), mirrored);

        let span = (left_jaw.x - right_jaw.x).abs();
        if span < MIN_JAW_SPAN {
            return Err(TrackError::DegenerateGeometry { subject, span });
        }

        let radius = span * self.config.radius_scale;
        let radius_sq = radius * radius;
        let force = self.config.slim_strength * FORCE_SCALE;
        let sigma = radius * FALLOFF_WIDTH;
        let inv_two_sigma_sq = 1.0 / (2.0 * sigma * sigma);

        for v in mesh.positions_mut() {
            let dx = v.x - chin.x;
            let dy = v.y - chin.y;

            // Axis-aligned box reject before the squared-distance test
            if dx.abs() > radius || dy.abs() > radius {
                continue;
            }

            let dist_sq = dx * dx + dy * dy;
            if dist_sq >= radius_sq {
                continue;
            }

            let factor = (-dist_sq * inv_two_sigma_sq).exp();
            v.x += (nose.x - v.x) * factor * force;
            v.y += (nose.y - v.y) * factor * force * VERTICAL_DAMP;
        }

        Ok(())
    }
}
