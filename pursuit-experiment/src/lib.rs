pub mod config;
pub mod controller;
pub mod error;
pub mod gaze;
pub mod input;
pub mod log;
pub mod participant;
pub mod plan;
pub mod runner;

pub use config::{
    Configuration, Controls, Counterbalance, ExperimentSettings, TrackerSettings, TrialCatalog,
    TutorialSettings,
};
pub use controller::{TrialController, TrialRecord, TrialStatus};
pub use error::{ConfigurationError, ExperimentError, Result, TrackerError};
pub use gaze::{
    CalibrationResult, DummyTracker, GazeSession, Marker, MarkerEvent, SessionStatus, Tracker,
};
pub use input::{AutoAdvance, Input, InputContext, InputSource};
pub use log::{JsonlLog, ResultLogs};
pub use participant::{Demographics, ParticipantContext};
pub use plan::TrialPlan;
pub use runner::{ExperimentRunner, RunStage, RunSummary, RunnerStatus};
