use std::path::Path;

use pursuit_core::{MonitorGeometry, StimulusSettings, TargetType, Trajectory, TrialSpec};
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::input::Input;

/// Cartesian product the trial plan is drawn from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialCatalog {
    pub target_types: Vec<TargetType>,
    pub target_speeds: Vec<f64>,
    pub target_trajectories: Vec<Trajectory>,
    pub repetitions: u32,
}

impl Default for TrialCatalog {
    fn default() -> Self {
        Self {
            target_types: TargetType::ALL.to_vec(),
            target_speeds: vec![5.0, 10.0],
            target_trajectories: Trajectory::ALL.to_vec(),
            repetitions: 1,
        }
    }
}

impl TrialCatalog {
    /// Every cell of catalog × repetitions, grouped by repetition then speed.
    pub fn cells(&self) -> Vec<TrialSpec> {
        let mut out = Vec::with_capacity(self.len());
        for repetition in 0..self.repetitions {
            for &speed in &self.target_speeds {
                out.extend(self.speed_block(speed, repetition));
            }
        }
        out
    }

    /// Cells sharing one speed within one repetition.
    pub fn speed_block(&self, speed_deg_s: f64, repetition: u32) -> Vec<TrialSpec> {
        let mut out = Vec::with_capacity(self.target_trajectories.len() * self.target_types.len());
        for &trajectory in &self.target_trajectories {
            for &target_type in &self.target_types {
                out.push(TrialSpec {
                    target_type,
                    speed_deg_s,
                    trajectory,
                    repetition,
                });
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.target_types.len()
            * self.target_speeds.len()
            * self.target_trajectories.len()
            * self.repetitions as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Counterbalance {
    /// Shuffle within per-speed blocks instead of across the whole plan.
    pub block_by_speed: bool,
    pub no_immediate_trajectory_repeat: bool,
    pub max_shuffle_attempts: u32,
}

impl Default for Counterbalance {
    fn default() -> Self {
        Self {
            block_by_speed: true,
            no_immediate_trajectory_repeat: true,
            max_shuffle_attempts: 1000,
        }
    }
}

/// The practice trial run before the plan, with the text shown per phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TutorialSettings {
    pub enabled: bool,
    pub target_type: TargetType,
    pub speed_deg_s: f64,
    pub trajectory: Trajectory,
    pub fixation_text: String,
    pub cue_text: String,
    pub cue_removed_text: String,
    pub pursuit_text: String,
}

impl Default for TutorialSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            target_type: TargetType::MovingCircle,
            speed_deg_s: 2.0,
            trajectory: Trajectory::HorRight,
            fixation_text: "Look at the circle. Each trial starts with you fixating it.".into(),
            cue_text: "The arrow shows where the circle will move. Press space to remove it."
                .into(),
            cue_removed_text: "Keep looking at the circle and press space to start.".into(),
            pursuit_text: "Follow the circle with your eyes.".into(),
        }
    }
}

impl TutorialSettings {
    pub fn spec(&self) -> TrialSpec {
        TrialSpec {
            target_type: self.target_type,
            speed_deg_s: self.speed_deg_s,
            trajectory: self.trajectory,
            repetition: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSettings {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub trials: TrialCatalog,
    #[serde(default)]
    pub counterbalance: Counterbalance,
    #[serde(default)]
    pub tutorial: TutorialSettings,
    /// Fixed seed for reproducible trial orders.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_name() -> String {
    "smooth_pursuit".into()
}

impl Default for ExperimentSettings {
    fn default() -> Self {
        Self {
            name: default_name(),
            trials: TrialCatalog::default(),
            counterbalance: Counterbalance::default(),
            tutorial: TutorialSettings::default(),
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    pub dummy_mode: bool,
    pub host_address: String,
    pub sampling_rate_hz: u32,
    pub calibration_type: String,
    /// Gaze must stay within the tolerance this long before the cue appears.
    pub fixation_dwell_ms: u64,
    pub fixation_tolerance_px: f32,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            dummy_mode: false,
            host_address: "100.1.1.1".into(),
            sampling_rate_hz: 1000,
            calibration_type: "HV9".into(),
            fixation_dwell_ms: 300,
            fixation_tolerance_px: 60.0,
        }
    }
}

/// Lower-case key names as reported by the window layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Controls {
    pub advance: String,
    pub quit: String,
    pub recalibrate: String,
}

impl Default for Controls {
    fn default() -> Self {
        Self {
            advance: "space".into(),
            quit: "escape".into(),
            recalibrate: "c".into(),
        }
    }
}

impl Controls {
    pub fn input_for(&self, key: &str) -> Option<Input> {
        let key = key.to_ascii_lowercase();
        if key == self.quit {
            Some(Input::Quit)
        } else if key == self.recalibrate {
            Some(Input::Recalibrate)
        } else if key == self.advance {
            Some(Input::Advance)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub experiment: ExperimentSettings,
    #[serde(default)]
    pub monitor: MonitorGeometry,
    #[serde(default)]
    pub tracker: TrackerSettings,
    #[serde(default)]
    pub stimuli: StimulusSettings,
    #[serde(default)]
    pub controls: Controls,
}

impl Configuration {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json_str(&text)?;
        tracing::info!(
            path = %path.display(),
            trials = config.experiment.trials.len(),
            dummy = config.tracker.dummy_mode,
            "configuration loaded"
        );
        Ok(config)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigurationError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        use ConfigurationError as E;

        let catalog = &self.experiment.trials;
        if catalog.target_types.is_empty() {
            return Err(E::invalid("experiment.trials.target_types", "empty"));
        }
        if catalog.target_trajectories.is_empty() {
            return Err(E::invalid("experiment.trials.target_trajectories", "empty"));
        }
        if catalog.target_speeds.is_empty() {
            return Err(E::invalid("experiment.trials.target_speeds", "empty"));
        }
        if let Some(bad) = catalog
            .target_speeds
            .iter()
            .find(|s| !s.is_finite() || **s <= 0.0)
        {
            return Err(E::invalid(
                "experiment.trials.target_speeds",
                format!("speed {bad} must be positive"),
            ));
        }
        if catalog.repetitions == 0 {
            return Err(E::invalid("experiment.trials.repetitions", "must be at least 1"));
        }
        if self.experiment.counterbalance.max_shuffle_attempts == 0 {
            return Err(E::invalid(
                "experiment.counterbalance.max_shuffle_attempts",
                "must be at least 1",
            ));
        }
        let tutorial = &self.experiment.tutorial;
        if tutorial.enabled && !(tutorial.speed_deg_s.is_finite() && tutorial.speed_deg_s > 0.0) {
            return Err(E::invalid("experiment.tutorial.speed_deg_s", "must be positive"));
        }

        let m = &self.monitor;
        if !(m.width_cm > 0.0 && m.height_cm > 0.0 && m.distance_cm > 0.0) {
            return Err(E::invalid("monitor", "width, height and distance must be positive"));
        }
        if m.resolution[0] == 0 || m.resolution[1] == 0 {
            return Err(E::invalid("monitor.resolution", "must be non-zero"));
        }
        if !(m.refresh_rate_hz.is_finite() && m.refresh_rate_hz > 0.0) {
            return Err(E::invalid("monitor.refresh_rate_hz", "must be positive"));
        }

        let t = &self.stimuli.target;
        if !(t.jumps_per_second > 0.0) {
            return Err(E::invalid("stimuli.target.jumps_per_second", "must be positive"));
        }
        if !(t.max_seconds > 0.0) {
            return Err(E::invalid("stimuli.target.max_seconds", "must be positive"));
        }
        if !(t.moving_distance_deg > 0.0) {
            return Err(E::invalid("stimuli.target.moving_distance_deg", "must be positive"));
        }

        if self.tracker.sampling_rate_hz == 0 {
            return Err(E::invalid("tracker.sampling_rate_hz", "must be non-zero"));
        }

        let c = &self.controls;
        let keys = [&c.advance, &c.quit, &c.recalibrate];
        if keys.iter().any(|k| k.is_empty()) {
            return Err(E::invalid("controls", "key names must not be empty"));
        }
        if c.advance == c.quit || c.advance == c.recalibrate || c.quit == c.recalibrate {
            return Err(E::invalid("controls", "advance, quit and recalibrate keys must differ"));
        }
        if keys.iter().any(|k| **k != k.to_ascii_lowercase()) {
            return Err(E::invalid("controls", "key names must be lower case"));
        }
        Ok(())
    }
}
