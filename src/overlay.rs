//! Overlay anchor resolution.
//!
//! Computes placement transforms for auxiliary visuals (soft highlight,
//! cosmetic lip outline, nose prop) from stabilized landmarks. Overlay
//! elements are not children of the mesh transform, so when the scene is
//! mirrored the resolver inverts the horizontal coordinate itself instead
//! of inheriting the mesh's flip. Keep it that way: coupling the two has
//! broken mirroring more than once.

use glam::Vec3;

use crate::config::OverlayConfig;
use crate::landmark::{index, LandmarkSet};
use crate::mesh::Viewport;

/// The auxiliary overlay elements a subject can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayKind {
    /// Soft face-sized glow
    Highlight,
    /// Cosmetic lip outline
    Outline,
    /// Nose prop
    Prop,
}

impl OverlayKind {
    pub const ALL: [OverlayKind; 3] = [Self::Highlight, Self::Outline, Self::Prop];

    /// Designated anchor landmark for this overlay.
    pub fn anchor_index(&self) -> usize {
        match self {
            Self::Highlight => index::NOSE_TIP,
            Self::Outline => index::UPPER_LIP,
            Self::Prop => index::NOSE_TIP,
        }
    }

    /// Fixed per-kind multiplier applied to the jaw-corner span.
    pub fn scale_multiplier(&self) -> f32 {
        match self {
            Self::Highlight => 1.0,
            Self::Outline => 0.5,
            Self::Prop => 0.25,
        }
    }

    /// Depth offset keeping the overlay in front of the mesh plane.
    fn depth_bias(&self) -> f32 {
        match self {
            Self::Highlight => 0.0,
            Self::Outline => 0.01,
            Self::Prop => 0.05,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Highlight => "highlight",
            Self::Outline => "outline",
            Self::Prop => "prop",
        }
    }

    fn enabled(&self, config: &OverlayConfig) -> bool {
        match self {
            Self::Highlight => config.highlight,
            Self::Outline => config.outline,
            Self::Prop => config.prop,
        }
    }
}

/// Ephemeral per-subject per-frame placement transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayAnchor {
    /// Working-space position
    pub position: Vec3,
    /// Uniform scale in working units
    pub scale: f32,
    /// Roll around the view axis, radians
    pub orientation: f32,
}

/// Resolves overlay placement from stabilized landmarks.
pub struct AnchorResolver {
    viewport: Viewport,
}

impl AnchorResolver {
    pub fn new(viewport: Viewport) -> Self {
        Self { viewport }
    }

    /// Resolve one overlay's anchor for one subject.
    pub fn resolve(
        &self,
        kind: OverlayKind,
        landmarks: &LandmarkSet,
        mirrored: bool,
    ) -> OverlayAnchor {
        let lm = landmarks.get(kind.anchor_index());
        let working = self.viewport.to_working(lm, false);

        // Independent horizontal inversion: applied here, never via the
        // mesh transform.
        let flip = if mirrored { -1.0 } else { 1.0 };
        let position = Vec3::new(
            working.x * flip,
            working.y,
            self.viewport.to_working_depth(lm) + kind.depth_bias(),
        );

        let left_jaw = self.viewport.to_working(landmarks.get(index::LEFT_JAW), false);
        let right_jaw = self.viewport.to_working(landmarks.get(index::RIGHT_JAW), false);
        let jaw_span = left_jaw.distance(right_jaw);
        let scale = jaw_span * kind.scale_multiplier();

        // Roll of the jaw line; a mirrored scene reverses apparent roll
        let orientation =
            (right_jaw.y - left_jaw.y).atan2(right_jaw.x - left_jaw.x) * flip;

        OverlayAnchor {
            position,
            scale,
            orientation,
        }
    }

    /// Resolve every overlay enabled by configuration.
    pub fn resolve_enabled(
        &self,
        config: &OverlayConfig,
        landmarks: &LandmarkSet,
        mirrored: bool,
    ) -> Vec<(OverlayKind, OverlayAnchor)> {
        OverlayKind::ALL
            .iter()
            .filter(|kind| kind.enabled(config))
            .map(|&kind| (kind, self.resolve(kind, landmarks, mirrored)))
            .collect()
    }
}
