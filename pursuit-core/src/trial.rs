use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::phase::TrialPhase;

/// How the pursuit target behaves while it travels along its trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    /// Smooth, continuous motion.
    MovingCircle,
    /// Stationary between jumps, producing a fixation/saccade pattern.
    JumpingCircle,
    /// Continuous field motion with an element flicking behind and ahead of it.
    BackAndForthArray,
}

impl TargetType {
    pub const ALL: [TargetType; 3] = [
        TargetType::MovingCircle,
        TargetType::JumpingCircle,
        TargetType::BackAndForthArray,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MovingCircle => "moving_circle",
            Self::JumpingCircle => "jumping_circle",
            Self::BackAndForthArray => "back_and_forth_array",
        }
    }

    /// Verb phrase used in participant instructions.
    pub fn movement_text(&self) -> &'static str {
        match self {
            Self::MovingCircle => "moves consistently",
            Self::JumpingCircle => "jumps",
            Self::BackAndForthArray => "jumps back and forth, while moving",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trajectory {
    HorRight,
    HorLeft,
    VerUp,
    VerDown,
    DiagUpRight,
    DiagUpLeft,
    DiagDownRight,
    DiagDownLeft,
    CirClock,
    CirCounter,
}

impl Trajectory {
    pub const ALL: [Trajectory; 10] = [
        Trajectory::HorRight,
        Trajectory::HorLeft,
        Trajectory::VerUp,
        Trajectory::VerDown,
        Trajectory::DiagUpRight,
        Trajectory::DiagUpLeft,
        Trajectory::DiagDownRight,
        Trajectory::DiagDownLeft,
        Trajectory::CirClock,
        Trajectory::CirCounter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HorRight => "hor_right",
            Self::HorLeft => "hor_left",
            Self::VerUp => "ver_up",
            Self::VerDown => "ver_down",
            Self::DiagUpRight => "diag_up_right",
            Self::DiagUpLeft => "diag_up_left",
            Self::DiagDownRight => "diag_down_right",
            Self::DiagDownLeft => "diag_down_left",
            Self::CirClock => "cir_clock",
            Self::CirCounter => "cir_counter",
        }
    }

    pub fn is_circular(&self) -> bool {
        matches!(self, Self::CirClock | Self::CirCounter)
    }

    /// Per-axis direction of a straight trajectory (y points up). Diagonals
    /// move both axes at full speed. `None` for circular trajectories.
    pub fn axis_step(&self) -> Option<(f64, f64)> {
        Some(match self {
            Self::HorRight => (1.0, 0.0),
            Self::HorLeft => (-1.0, 0.0),
            Self::VerUp => (0.0, 1.0),
            Self::VerDown => (0.0, -1.0),
            Self::DiagUpRight => (1.0, 1.0),
            Self::DiagUpLeft => (-1.0, 1.0),
            Self::DiagDownRight => (1.0, -1.0),
            Self::DiagDownLeft => (-1.0, -1.0),
            Self::CirClock | Self::CirCounter => return None,
        })
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::HorRight => "horizontally to the right",
            Self::HorLeft => "horizontally to the left",
            Self::VerUp => "vertically upwards",
            Self::VerDown => "vertically downwards",
            Self::DiagUpRight => "diagonally upwards to the right",
            Self::DiagUpLeft => "diagonally upwards to the left",
            Self::DiagDownRight => "diagonally downwards to the right",
            Self::DiagDownLeft => "diagonally downwards to the left",
            Self::CirClock => "in a clockwise circle",
            Self::CirCounter => "in a counterclockwise circle",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseNameError {
    kind: &'static str,
    value: String,
}

impl FromStr for TargetType {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseNameError {
                kind: "target type",
                value: s.to_string(),
            })
    }
}

impl FromStr for Trajectory {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseNameError {
                kind: "trajectory",
                value: s.to_string(),
            })
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Trajectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One cell of the trial catalog. Immutable once a plan has been generated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrialSpec {
    pub target_type: TargetType,
    pub speed_deg_s: f64,
    pub trajectory: Trajectory,
    pub repetition: u32,
}

impl TrialSpec {
    /// Total-order key; speeds compare by bit pattern, which is exact for
    /// values copied out of the configuration.
    pub fn key(&self) -> (TargetType, u64, Trajectory, u32) {
        (
            self.target_type,
            self.speed_deg_s.to_bits(),
            self.trajectory,
            self.repetition,
        )
    }

    pub fn instruction_text(&self) -> String {
        format!(
            "Fixate on the target as it {} {}.",
            self.target_type.movement_text(),
            self.trajectory.description()
        )
    }
}

impl fmt::Display for TrialSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} at {} deg/s (rep {})",
            self.target_type, self.trajectory, self.speed_deg_s, self.repetition
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Success,
    /// Experimenter pressed the quit key.
    Quit,
    /// A fatal error interrupted the trial.
    Aborted,
}

/// Achieved presentation timestamps (ns on the experiment clock) of the
/// frames that opened each phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PhaseTimestamps {
    pub fixation_acquired: Option<u64>,
    pub cue_shown: Option<u64>,
    pub cue_removed: Option<u64>,
    pub pursuit_start: Option<u64>,
    pub pursuit_end: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrameSummary {
    pub rendered: u64,
    pub pursuit: u64,
    pub dropped: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialOutcome {
    pub trial_index: usize,
    pub spec: TrialSpec,
    pub tutorial: bool,
    pub timestamps: PhaseTimestamps,
    pub recalibrated: bool,
    pub recalibrations: u32,
    pub status: CompletionStatus,
    pub ended_in: TrialPhase,
    pub frames: FrameSummary,
}

impl TrialOutcome {
    pub fn is_success(&self) -> bool {
        self.status == CompletionStatus::Success
    }
}

/// Target position on one rendered pursuit frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetSample {
    pub trial_index: usize,
    pub frame: u64,
    pub timestamp_ns: u64,
    pub trial_time_ns: u64,
    pub x: f32,
    pub y: f32,
}
