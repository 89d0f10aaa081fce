use std::path::PathBuf;

use thiserror::Error;

// ---------------------------------------------------------------------------
// EngineError – every failure the quantification engine can report
// ---------------------------------------------------------------------------

/// Failures raised by the quantification engine.
///
/// Per-frame variants (`NoCorrespondence`, `UnreadableArtifact`,
/// `InvalidFlowFormat`) are recovered by the pipeline, which skips the frame.
/// The remaining variants end a run.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("lookup table not found at {0}")]
    MissingLookupTable(PathBuf),

    #[error("invalid flow file {path}: {reason}")]
    InvalidFlowFormat { path: PathBuf, reason: String },

    #[error("no flow field corresponds to {0}")]
    NoCorrespondence(String),

    #[error("unreadable artifact {path}: {reason}")]
    UnreadableArtifact { path: PathBuf, reason: String },

    #[error("insufficient frames: {available} usable, {required} required")]
    InsufficientFrames { available: usize, required: usize },

    #[error("degenerate lookup table: {0}")]
    DegenerateLookupTable(String),

    #[error("no temperature reproduces radiance {radiance:e} at {wavelength_m:e} m")]
    NonPhysicalRadiance { wavelength_m: f64, radiance: f64 },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EngineError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn unreadable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        EngineError::UnreadableArtifact {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the pipeline may skip the offending frame and carry on.
    pub fn is_frame_local(&self) -> bool {
        matches!(
            self,
            EngineError::NoCorrespondence(_)
                | EngineError::UnreadableArtifact { .. }
                | EngineError::InvalidFlowFormat { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
