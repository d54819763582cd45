//! Per-frame orchestration and the tracking state machine.
//!
//! The coordinator owns all mutable pipeline state (subject slots, working
//! mesh) and drives one tick at a time: stabilize → reset mesh to rest →
//! warp additively per subject → resolve overlay anchors → hand everything
//! to the render collaborator. Single-threaded; nothing here blocks on the
//! detector.

use glam::Vec3;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{Config, GracePolicy};
use crate::error::{LumawarpError, TrackError};
use crate::landmark::LandmarkSet;
use crate::mesh::{BaseMesh, Viewport, WarpEngine, WorkingMesh};
use crate::overlay::{AnchorResolver, OverlayAnchor, OverlayKind};
use crate::stabilize::{StabilizationState, Stabilizer};

/// The session's tracking state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingPhase {
    /// Session created, `start` not yet called
    Uninitialized,
    /// Running, no subject seen yet
    WaitingForSubject,
    /// At least one subject actively tracked
    Tracking,
    /// All subjects vanished; grace policy decides what happens next
    SubjectLost,
}

impl TrackingPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::WaitingForSubject => "waiting_for_subject",
            Self::Tracking => "tracking",
            Self::SubjectLost => "subject_lost",
        }
    }
}

impl std::fmt::Display for TrackingPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Render collaborator contract. Receives geometry and overlay transforms;
/// performs no warp logic of its own.
pub trait RenderSink {
    fn submit_mesh(&mut self, positions: &[Vec3], topology: &[u32]);
    fn submit_overlay(&mut self, subject: usize, kind: OverlayKind, anchor: &OverlayAnchor);
}

/// Summary of one `advance` call
#[derive(Debug)]
pub struct FrameReport {
    pub phase: TrackingPhase,
    /// Subjects whose warp was applied this frame
    pub warped_subjects: usize,
    /// Subjects dropped by the `max_subjects` cap
    pub dropped_subjects: usize,
    /// True when the pipeline gate resubmitted the held output
    pub gated: bool,
    /// Non-fatal conditions hit during the frame
    pub warnings: Vec<TrackError>,
}

/// One tracked subject's slot. State persists across partial detector
/// dropouts; only `reset` or grace-policy expiry clears it.
#[derive(Debug, Default)]
struct SubjectSlot {
    state: Option<StabilizationState>,
}

/// Orchestrates the stabilize → warp → anchor pipeline.
pub struct SessionCoordinator {
    config: Config,
    base: BaseMesh,
    working: WorkingMesh,
    stabilizer: Stabilizer,
    engine: WarpEngine,
    resolver: AnchorResolver,
    phase: TrackingPhase,
    slots: Vec<SubjectSlot>,
    frame_index: u64,
    lost_frames: u32,
    held_anchors: Vec<(usize, OverlayKind, OverlayAnchor)>,
}

impl SessionCoordinator {
    pub fn new(config: Config) -> Result<Self, LumawarpError> {
        config.validate()?;

        let viewport = Viewport::from_frustum(config.mesh.frustum_height, config.mesh.aspect);
        let base = BaseMesh::grid(config.mesh.cols, config.mesh.rows, viewport);
        let working = WorkingMesh::new(&base);
        let stabilizer = Stabilizer::new(config.stabilizer.clone());
        let engine = WarpEngine::new(config.warp.clone());
        let resolver = AnchorResolver::new(viewport);

        let mut slots = Vec::with_capacity(config.session.max_subjects);
        slots.resize_with(config.session.max_subjects, SubjectSlot::default);

        Ok(Self {
            config,
            base,
            working,
            stabilizer,
            engine,
            resolver,
            phase: TrackingPhase::Uninitialized,
            slots,
            frame_index: 0,
            lost_frames: 0,
            held_anchors: Vec::new(),
        })
    }

    /// Begin the session: Uninitialized → WaitingForSubject.
    pub fn start(&mut self) {
        self.set_phase(TrackingPhase::WaitingForSubject);
        self.frame_index = 0;
        self.lost_frames = 0;
    }

    pub fn phase(&self) -> TrackingPhase {
        self.phase
    }

    pub fn base_mesh(&self) -> &BaseMesh {
        &self.base
    }

    pub fn mesh_positions(&self) -> &[Vec3] {
        self.working.positions()
    }

    /// Clear one subject slot's stabilization state. Safe between frames.
    pub fn reset_slot(&mut self, slot: usize) {
        if let Some(s) = self.slots.get_mut(slot) {
            s.state = None;
        }
    }

    /// Clear every subject slot.
    pub fn reset_all(&mut self) {
        for slot in &mut self.slots {
            slot.state = None;
        }
    }

    /// Switch camera facing. Stabilization restarts from scratch since the
    /// landmark frame of reference just flipped.
    pub fn set_front_camera(&mut self, front: bool) {
        if self.config.session.front_camera != front {
            self.config.session.front_camera = front;
            self.reset_all();
            debug!(front, "camera switched, stabilization reset");
        }
    }

    /// Trigger lock-and-average settling on every active subject.
    pub fn begin_lock(&mut self) {
        for slot in &mut self.slots {
            if let Some(state) = &mut slot.state {
                self.stabilizer.begin_lock(state);
            }
        }
    }

    /// Run one tick of the pipeline.
    ///
    /// `detection` is `None` when the detector produced nothing this tick
    /// (it may run asynchronously); the previous stabilized state is reused
    /// and the loop never blocks. `Some(vec![])` means the detector ran and
    /// saw nobody, which drives the loss state machine.
    pub fn advance(
        &mut self,
        detection: Option<Vec<LandmarkSet>>,
        now: Duration,
        sink: &mut dyn RenderSink,
    ) -> Result<FrameReport, LumawarpError> {
        if self.phase == TrackingPhase::Uninitialized {
            self.start();
        }

        let tick = self.frame_index;
        self.frame_index += 1;

        // Whole-pipeline decimation gate, orthogonal to the stabilizer's
        // own decimate mode: gated ticks resubmit the held output.
        let every_n = self.config.session.pipeline_every_n as u64;
        if every_n > 1 && tick % every_n != 0 {
            self.submit(sink);
            return Ok(FrameReport {
                phase: self.phase,
                warped_subjects: 0,
                dropped_subjects: 0,
                gated: true,
                warnings: Vec::new(),
            });
        }

        let mut warnings = Vec::new();
        let mut dropped = 0usize;

        match detection {
            Some(sets) if !sets.is_empty() => {
                let max = self.config.session.max_subjects;
                let mut sets = sets;
                if sets.len() > max {
                    dropped = sets.len() - max;
                    warn!(detected = sets.len(), max, "subject overflow, dropping excess");
                    warnings.push(TrackError::SubjectOverflow {
                        detected: sets.len(),
                        max,
                    });
                    sets.truncate(max);
                }

                self.lost_frames = 0;
                if self.phase != TrackingPhase::Tracking {
                    self.set_phase(TrackingPhase::Tracking);
                }

                for (i, raw) in sets.iter().enumerate() {
                    match &mut self.slots[i].state {
                        Some(state) => {
                            if let Err(e) = self.stabilizer.apply(state, raw, now) {
                                warn!(slot = i, error = %e, "stabilization failed, resetting slot");
                                warnings.push(e);
                                self.slots[i].state = None;
                            }
                        }
                        None => {
                            // First detection for this slot adopts raw
                            self.slots[i].state =
                                Some(StabilizationState::adopt(raw.clone(), now));
                        }
                    }
                }
            }
            Some(_) => {
                // Detector ran and saw no subject
                self.on_all_subjects_lost();
            }
            None => {
                // No detector result this tick: reuse previous stabilized
                // state for every slot, nothing else changes
            }
        }

        let warped = self.rebuild_frame(&mut warnings);
        self.submit(sink);

        Ok(FrameReport {
            phase: self.phase,
            warped_subjects: warped,
            dropped_subjects: dropped,
            gated: false,
            warnings,
        })
    }

    fn on_all_subjects_lost(&mut self) {
        match self.phase {
            TrackingPhase::Tracking | TrackingPhase::SubjectLost => {
                if self.phase == TrackingPhase::Tracking {
                    self.set_phase(TrackingPhase::SubjectLost);
                }
                self.lost_frames += 1;

                let expired = match self.config.session.grace {
                    GracePolicy::Reset => true,
                    GracePolicy::Hold { frames } => self.lost_frames > frames,
                };
                if expired {
                    self.reset_all();
                    self.set_phase(TrackingPhase::WaitingForSubject);
                }
                // Otherwise slots keep their last stable pose for this frame
            }
            _ => {}
        }
    }

    /// Reset the working buffer to rest and re-apply every active subject's
    /// warp. Returns the number of subjects warped.
    fn rebuild_frame(&mut self, warnings: &mut Vec<TrackError>) -> usize {
        let mirrored = self
            .config
            .session
            .mirror
            .resolve(self.config.session.front_camera);

        // Hard invariant: rest copy first, every frame, before any warp
        self.working.reset_to(&self.base);
        self.held_anchors.clear();

        let mut warped = 0usize;
        for (i, slot) in self.slots.iter().enumerate() {
            let Some(state) = &slot.state else { continue };

            // Lock-average settling suspends warping for the subject
            if !state.is_settling() {
                match self.engine.warp_subject(
                    &mut self.working,
                    self.base.viewport(),
                    state.stable(),
                    mirrored,
                    i,
                ) {
                    Ok(()) => warped += 1,
                    Err(e) => {
                        debug!(slot = i, error = %e, "skipping warp for subject");
                        warnings.push(e);
                    }
                }
            }

            for (kind, anchor) in
                self.resolver
                    .resolve_enabled(&self.config.overlay, state.stable(), mirrored)
            {
                self.held_anchors.push((i, kind, anchor));
            }
        }
        warped
    }

    fn submit(&mut self, sink: &mut dyn RenderSink) {
        sink.submit_mesh(self.working.positions(), self.base.topology());
        for (subject, kind, anchor) in &self.held_anchors {
            sink.submit_overlay(*subject, *kind, anchor);
        }
    }

    fn set_phase(&mut self, phase: TrackingPhase) {
        if self.phase != phase {
            info!(from = %self.phase, to = %phase, "tracking phase changed");
            self.phase = phase;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmark::{index, LANDMARK_COUNT};

    /// Sink that records what the coordinator hands over.
    #[derive(Default)]
    struct CollectingSink {
        positions: Vec<Vec3>,
        overlays: Vec<(usize, OverlayKind, OverlayAnchor)>,
        mesh_submissions: usize,
    }

    impl RenderSink for CollectingSink {
        fn submit_mesh(&mut self, positions: &[Vec3], _topology: &[u32]) {
            self.positions = positions.to_vec();
            self.mesh_submissions += 1;
        }

        fn submit_overlay(&mut self, subject: usize, kind: OverlayKind, anchor: &OverlayAnchor) {
            self.overlays.push((subject, kind, *anchor));
        }
    }

    fn face_at(x: f32) -> LandmarkSet {
        let mut points = vec![Vec3::new(x, 0.5, 0.0); LANDMARK_COUNT];
        points[index::CHIN] = Vec3::new(x, 0.9, 0.0);
        points[index::NOSE_TIP] = Vec3::new(x, 0.5, 0.0);
        points[index::LEFT_JAW] = Vec3::new(x - 0.2, 0.6, 0.0);
        points[index::RIGHT_JAW] = Vec3::new(x + 0.2, 0.6, 0.0);
        LandmarkSet::new(points).unwrap()
    }

    fn coordinator(config: Config) -> SessionCoordinator {
        let mut session = SessionCoordinator::new(config).unwrap();
        session.start();
        session
    }

    fn tick(n: u64) -> Duration {
        Duration::from_millis(n * 33)
    }

    #[test]
    fn starts_waiting_then_tracks_on_first_detection() {
        let mut session = SessionCoordinator::new(Config::default()).unwrap();
        assert_eq!(session.phase(), TrackingPhase::Uninitialized);
        session.start();
        assert_eq!(session.phase(), TrackingPhase::WaitingForSubject);

        let mut sink = CollectingSink::default();
        let report = session
            .advance(Some(vec![face_at(0.5)]), tick(0), &mut sink)
            .unwrap();
        assert_eq!(report.phase, TrackingPhase::Tracking);
        assert_eq!(report.warped_subjects, 1);
        assert_ne!(sink.positions, session.base_mesh().rest_positions());
    }

    #[test]
    fn empty_frame_with_reset_policy_reverts_immediately() {
        let mut session = coordinator(Config::default());
        let mut sink = CollectingSink::default();

        session.advance(Some(vec![face_at(0.5)]), tick(0), &mut sink).unwrap();
        let report = session.advance(Some(vec![]), tick(1), &mut sink).unwrap();

        assert_eq!(report.phase, TrackingPhase::WaitingForSubject);
        assert_eq!(sink.positions, session.base_mesh().rest_positions());
        assert!(sink.overlays.is_empty());
    }

    #[test]
    fn hold_policy_keeps_pose_for_bounded_frames() {
        let mut config = Config::default();
        config.session.grace = GracePolicy::Hold { frames: 3 };
        let mut session = coordinator(config);
        let mut sink = CollectingSink::default();

        session.advance(Some(vec![face_at(0.5)]), tick(0), &mut sink).unwrap();
        let warped = sink.positions.clone();

        for n in 1..=3u64 {
            let report = session.advance(Some(vec![]), tick(n), &mut sink).unwrap();
            assert_eq!(report.phase, TrackingPhase::SubjectLost, "frame {n}");
            assert_eq!(sink.positions, warped, "held pose should not change (frame {n})");
        }

        let report = session.advance(Some(vec![]), tick(4), &mut sink).unwrap();
        assert_eq!(report.phase, TrackingPhase::WaitingForSubject);
        assert_eq!(sink.positions, session.base_mesh().rest_positions());
    }

    #[test]
    fn recovering_during_grace_returns_to_tracking() {
        let mut config = Config::default();
        config.session.grace = GracePolicy::Hold { frames: 10 };
        let mut session = coordinator(config);
        let mut sink = CollectingSink::default();

        session.advance(Some(vec![face_at(0.5)]), tick(0), &mut sink).unwrap();
        session.advance(Some(vec![]), tick(1), &mut sink).unwrap();
        assert_eq!(session.phase(), TrackingPhase::SubjectLost);

        let report = session
            .advance(Some(vec![face_at(0.5)]), tick(2), &mut sink)
            .unwrap();
        assert_eq!(report.phase, TrackingPhase::Tracking);
    }

    #[test]
    fn overflow_drops_excess_and_frame_succeeds() {
        let mut session = coordinator(Config::default()); // max_subjects = 1
        let mut sink = CollectingSink::default();

        let report = session
            .advance(Some(vec![face_at(0.3), face_at(0.7)]), tick(0), &mut sink)
            .unwrap();
        assert_eq!(report.dropped_subjects, 1);
        assert_eq!(report.warped_subjects, 1);
        assert!(matches!(
            report.warnings.as_slice(),
            [TrackError::SubjectOverflow { detected: 2, max: 1 }]
        ));
    }

    #[test]
    fn missing_detector_result_holds_last_pose() {
        let mut session = coordinator(Config::default());
        let mut sink = CollectingSink::default();

        session.advance(Some(vec![face_at(0.5)]), tick(0), &mut sink).unwrap();
        let warped = sink.positions.clone();

        let report = session.advance(None, tick(1), &mut sink).unwrap();
        assert_eq!(report.phase, TrackingPhase::Tracking, "no result is not loss");
        assert_eq!(report.warped_subjects, 1);
        assert_eq!(sink.positions, warped);
    }

    #[test]
    fn pipeline_gate_resubmits_held_output() {
        let mut config = Config::default();
        config.session.pipeline_every_n = 2;
        let mut session = coordinator(config);
        let mut sink = CollectingSink::default();

        let r0 = session.advance(Some(vec![face_at(0.5)]), tick(0), &mut sink).unwrap();
        assert!(!r0.gated);
        let warped = sink.positions.clone();

        // Gated tick: detection ignored, held buffer resubmitted
        let r1 = session
            .advance(Some(vec![face_at(0.9)]), tick(1), &mut sink)
            .unwrap();
        assert!(r1.gated);
        assert_eq!(sink.positions, warped);
        assert_eq!(sink.mesh_submissions, 2);

        let r2 = session.advance(Some(vec![face_at(0.5)]), tick(2), &mut sink).unwrap();
        assert!(!r2.gated);
    }

    #[test]
    fn overlays_follow_enabled_config_and_subject() {
        let mut config = Config::default();
        config.overlay.prop = true;
        config.overlay.outline = true;
        let mut session = coordinator(config);
        let mut sink = CollectingSink::default();

        session.advance(Some(vec![face_at(0.5)]), tick(0), &mut sink).unwrap();
        assert_eq!(sink.overlays.len(), 2);
        assert!(sink.overlays.iter().all(|(subject, _, _)| *subject == 0));
    }

    #[test]
    fn lock_settling_suspends_warp_but_keeps_overlays() {
        let mut config = Config::default();
        config.stabilizer.mode = crate::stabilize::StabilizerMode::LockAverage;
        config.stabilizer.lock_samples = 3;
        config.overlay.prop = true;
        let mut session = coordinator(config);
        let mut sink = CollectingSink::default();

        session.advance(Some(vec![face_at(0.5)]), tick(0), &mut sink).unwrap();
        session.begin_lock();

        let report = session
            .advance(Some(vec![face_at(0.5)]), tick(1), &mut sink)
            .unwrap();
        assert_eq!(report.warped_subjects, 0, "settling subject must not be warped");
        assert_eq!(sink.positions, session.base_mesh().rest_positions());
        assert!(!sink.overlays.is_empty(), "overlays keep tracking while settling");
    }

    #[test]
    fn reset_slot_readopts_on_next_detection() {
        let mut session = coordinator(Config::default());
        let mut sink = CollectingSink::default();

        session.advance(Some(vec![face_at(0.5)]), tick(0), &mut sink).unwrap();
        session.reset_slot(0);

        // EMA state was dropped, so this detection adopts raw directly
        let report = session
            .advance(Some(vec![face_at(0.2)]), tick(1), &mut sink)
            .unwrap();
        assert_eq!(report.phase, TrackingPhase::Tracking);
        assert_eq!(report.warped_subjects, 1);
    }
}
