use std::path::PathBuf;

use pursuit_core::RenderError;

#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("cannot read configuration {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigurationError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Failure reported by a tracker backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
    #[error("tracker not connected")]
    NotConnected,
    #[error("tracker link lost: {0}")]
    LinkLost(String),
    #[error("tracker rejected {operation}: {reason}")]
    Rejected {
        operation: &'static str,
        reason: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ExperimentError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("no valid trial order found after {attempts} shuffle attempts")]
    PlanGeneration { attempts: u32 },

    #[error("persisted trial order does not match the configured catalog: {0}")]
    PlanMismatch(String),

    #[error("calibration aborted by the experimenter")]
    CalibrationAborted,

    #[error("gaze tracker disconnected during {context}: {source}")]
    HardwareDisconnected {
        context: String,
        source: TrackerError,
    },

    #[error("recording pairing violated: {operation} for trial {trial} while {state}")]
    RecordingPairingViolation {
        operation: &'static str,
        trial: usize,
        state: String,
    },

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ExperimentError {
    pub(crate) fn disconnected(context: impl Into<String>, source: TrackerError) -> Self {
        Self::HardwareDisconnected {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Everything except an aborted calibration ends the run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::CalibrationAborted)
    }
}

pub type Result<T, E = ExperimentError> = std::result::Result<T, E>;
