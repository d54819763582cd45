//! Landmark data model and detector contract.
//!
//! The external detector reports 468 points per face in normalized [0,1]
//! coordinates (z = relative depth). Indices carry fixed semantic meaning
//! defined by the detector topology and must never be reinterpreted.

use glam::Vec3;
use std::time::Duration;

use crate::error::TrackError;

/// Fixed point count of the detector's face topology.
pub const LANDMARK_COUNT: usize = 468;

/// Semantic indices into a [`LandmarkSet`]. These are detector topology
/// facts, not tunables.
pub mod index {
    /// Bottom of the chin.
    pub const CHIN: usize = 152;
    /// Tip of the nose.
    pub const NOSE_TIP: usize = 1;
    /// Left jaw corner.
    pub const LEFT_JAW: usize = 132;
    /// Right jaw corner.
    pub const RIGHT_JAW: usize = 361;
    /// Leftmost cheek bound.
    pub const LEFT_CHEEK: usize = 234;
    /// Rightmost cheek bound.
    pub const RIGHT_CHEEK: usize = 454;
    /// Center of the upper lip.
    pub const UPPER_LIP: usize = 13;

    /// Closed ring of lip-contour indices (first repeated last).
    pub const LIP_RING: [usize; 21] = [
        61, 185, 40, 39, 37, 0, 267, 269, 270, 409, 291, 375, 321, 405, 314, 17, 84, 181, 91,
        146, 61,
    ];
}

/// Fixed reference subset used for aggregate displacement measurements
/// (deadzone freeze tests, lock break tests). Chosen to span the face.
pub const REFERENCE_INDICES: [usize; 6] = [
    index::CHIN,
    index::NOSE_TIP,
    index::LEFT_JAW,
    index::RIGHT_JAW,
    index::LEFT_CHEEK,
    index::RIGHT_CHEEK,
];

/// One subject's landmark set for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkSet {
    points: Vec<Vec3>,
}

impl LandmarkSet {
    /// Wrap detector output, validating the point count against the fixed
    /// topology.
    pub fn new(points: Vec<Vec3>) -> Result<Self, TrackError> {
        if points.len() != LANDMARK_COUNT {
            return Err(TrackError::InvalidTopology {
                expected: LANDMARK_COUNT,
                actual: points.len(),
            });
        }
        Ok(Self { points })
    }

    /// All points at the topology origin. Useful as a neutral starting set.
    pub fn zeroed() -> Self {
        Self {
            points: vec![Vec3::ZERO; LANDMARK_COUNT],
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, i: usize) -> Vec3 {
        self.points[i]
    }

    pub fn points(&self) -> &[Vec3] {
        &self.points
    }

    pub fn points_mut(&mut self) -> &mut [Vec3] {
        &mut self.points
    }

    pub fn iter(&self) -> impl Iterator<Item = &Vec3> {
        self.points.iter()
    }

    /// Mean squared displacement to `other` over the reference subset,
    /// with x/y scaled to `reference_resolution` pixels. Squared on
    /// purpose: threshold tests compare against squared thresholds.
    pub fn reference_displacement_sq(&self, other: &LandmarkSet, reference_resolution: f32) -> f32 {
        let mut sum = 0.0f32;
        for &i in &REFERENCE_INDICES {
            let a = self.points[i];
            let b = other.points[i];
            let dx = (a.x - b.x) * reference_resolution;
            let dy = (a.y - b.y) * reference_resolution;
            sum += dx * dx + dy * dy;
        }
        sum / REFERENCE_INDICES.len() as f32
    }
}

/// Contract for the external landmark detector.
///
/// `None` means the detector produced no result this tick (it may run
/// asynchronously relative to frame cadence); the pipeline then reuses the
/// previous stabilized state and never blocks. `Some(vec![])` means the
/// detector ran and saw no subject.
pub trait LandmarkSource {
    fn detect(&mut self, frame_index: u64, timestamp: Duration) -> Option<Vec<LandmarkSet>>;
}
