pub mod geometry;
pub mod motion;
pub mod phase;
pub mod stimulus;
pub mod trial;

pub use geometry::{MonitorGeometry, Point};
pub use motion::TargetMotion;
pub use phase::{PrePursuit, TrialPhase};
pub use pursuit_timing::FrameTick;
pub use stimulus::{
    CueSettings, DirectionCue, RenderError, Rgba, Scene, StimulusRenderer, StimulusSettings,
    TargetDrawing, TargetSettings, TextSettings,
};
pub use trial::{
    CompletionStatus, FrameSummary, ParseNameError, PhaseTimestamps, TargetSample, TargetType,
    Trajectory, TrialOutcome, TrialSpec,
};
