//! Lumawarp - Real-time Face-Slimming Mesh Warp
//!
//! A modular Rust pipeline for live camera overlays that:
//! - Stabilizes noisy per-frame facial landmarks (EMA, deadzone,
//!   decimation, or lock-and-average strategies)
//! - Applies a localized radial slimming warp to a dense video mesh,
//!   additively for multiple subjects
//! - Anchors auxiliary overlays (highlight, lip outline, nose prop) with
//!   mirror handling independent of the mesh transform
//!
//! Landmark detection and rasterization are external collaborators; see
//! [`landmark::LandmarkSource`] and [`session::RenderSink`].

pub mod config;
pub mod error;
pub mod landmark;
pub mod mesh;
pub mod overlay;
pub mod session;
pub mod stabilize;

pub use config::Config;
pub use error::{LumawarpError, Result};
pub use session::{FrameReport, SessionCoordinator, TrackingPhase};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
