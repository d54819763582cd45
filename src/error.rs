//! Error types for Lumawarp

use thiserror::Error;

/// Main error type for Lumawarp
#[derive(Error, Debug)]
pub enum LumawarpError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Tracking error: {0}")]
    Track(#[from] TrackError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadFile(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid configuration value: {field} - {message}")]
    InvalidValue { field: String, message: String },
}

/// Landmark-pipeline errors. All of these are recoverable within the
/// current frame; the worst case is rendering the unwarped rest mesh.
#[derive(Error, Debug)]
pub enum TrackError {
    /// The detector delivered a landmark set whose point count does not
    /// match the fixed topology. The affected subject's stabilization
    /// state must be reset by the caller.
    #[error("Invalid landmark topology: expected {expected} points, got {actual}")]
    InvalidTopology { expected: usize, actual: usize },

    /// More subjects detected than `max_subjects`; the excess is dropped
    /// in detector order and the frame still succeeds.
    #[error("Subject overflow: {detected} detected, keeping first {max}")]
    SubjectOverflow { detected: usize, max: usize },

    /// Near-zero jaw-corner span; warping this subject would divide by
    /// zero, so it is skipped for the frame.
    #[error("Degenerate face geometry for subject {subject}: jaw span {span}")]
    DegenerateGeometry { subject: usize, span: f32 },
}

/// Result type alias for Lumawarp operations
pub type Result<T> = std::result::Result<T, LumawarpError>;
