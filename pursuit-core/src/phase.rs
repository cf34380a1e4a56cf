use serde::{Deserialize, Serialize};

/// Phases a single trial walks through. `Recalibrate` remembers where it was
/// entered from so the trial resumes exactly there.
#[derive(Copy, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialPhase {
    AwaitFixation,
    ShowDirectionCue,
    AwaitSpaceRemovesCue,
    AwaitSpaceStartsTrial,
    PursuitRunning,
    TrialComplete,
    Recalibrate { from: PrePursuit },
}

/// The phases recalibration may interrupt.
#[derive(Copy, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrePursuit {
    AwaitFixation,
    ShowDirectionCue,
    AwaitSpaceRemovesCue,
    AwaitSpaceStartsTrial,
}

impl Default for TrialPhase {
    fn default() -> Self {
        TrialPhase::AwaitFixation
    }
}

impl TrialPhase {
    /// Whether the advance key moves this phase forward.
    pub fn awaits_advance(&self) -> bool {
        matches!(self, Self::AwaitSpaceRemovesCue | Self::AwaitSpaceStartsTrial)
    }

    pub fn allows_recalibration(&self) -> bool {
        self.pre_pursuit().is_some()
    }

    pub fn pre_pursuit(&self) -> Option<PrePursuit> {
        PrePursuit::try_from(*self).ok()
    }

    pub fn is_pursuit(&self) -> bool {
        matches!(self, Self::PursuitRunning)
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::TrialComplete)
    }

    /// Forward successor in the fixed protocol.
    pub fn next(&self) -> Option<Self> {
        use TrialPhase::*;
        Some(match self {
            AwaitFixation => ShowDirectionCue,
            ShowDirectionCue => AwaitSpaceRemovesCue,
            AwaitSpaceRemovesCue => AwaitSpaceStartsTrial,
            AwaitSpaceStartsTrial => PursuitRunning,
            PursuitRunning => TrialComplete,
            TrialComplete => return None,
            Recalibrate { from } => TrialPhase::from(*from),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::AwaitFixation => "await_fixation",
            Self::ShowDirectionCue => "show_direction_cue",
            Self::AwaitSpaceRemovesCue => "await_space_removes_cue",
            Self::AwaitSpaceStartsTrial => "await_space_starts_trial",
            Self::PursuitRunning => "pursuit_running",
            Self::TrialComplete => "trial_complete",
            Self::Recalibrate { .. } => "recalibrate",
        }
    }
}

impl From<PrePursuit> for TrialPhase {
    fn from(p: PrePursuit) -> Self {
        match p {
            PrePursuit::AwaitFixation => TrialPhase::AwaitFixation,
            PrePursuit::ShowDirectionCue => TrialPhase::ShowDirectionCue,
            PrePursuit::AwaitSpaceRemovesCue => TrialPhase::AwaitSpaceRemovesCue,
            PrePursuit::AwaitSpaceStartsTrial => TrialPhase::AwaitSpaceStartsTrial,
        }
    }
}

impl TryFrom<TrialPhase> for PrePursuit {
    type Error = TrialPhase;

    fn try_from(phase: TrialPhase) -> Result<Self, Self::Error> {
        match phase {
            TrialPhase::AwaitFixation => Ok(PrePursuit::AwaitFixation),
            TrialPhase::ShowDirectionCue => Ok(PrePursuit::ShowDirectionCue),
            TrialPhase::AwaitSpaceRemovesCue => Ok(PrePursuit::AwaitSpaceRemovesCue),
            TrialPhase::AwaitSpaceStartsTrial => Ok(PrePursuit::AwaitSpaceStartsTrial),
            other => Err(other),
        }
    }
}
