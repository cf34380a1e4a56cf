#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pursuit_core::{FrameTick, Point, RenderError, Scene, StimulusRenderer, TargetType, Trajectory};
use pursuit_experiment::{
    CalibrationResult, Configuration, Demographics, ParticipantContext, Tracker, TrackerError,
    TrialCatalog,
};
use pursuit_timing::{ManualTimer, Timer};

/// Shared view of every backend call, in order.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| *e == entry).count()
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter_map(|e| e.strip_prefix("msg ").map(str::to_string))
            .collect()
    }
}

/// Scriptable tracker that records calls instead of talking to hardware.
pub struct RecordingTracker {
    log: CallLog,
    connected: bool,
    link_up: bool,
    calibrations: VecDeque<CalibrationResult>,
    starts: usize,
    lose_link_on_start: Option<usize>,
    fail_start_on: Option<usize>,
}

impl RecordingTracker {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            connected: false,
            link_up: true,
            calibrations: VecDeque::new(),
            starts: 0,
            lose_link_on_start: None,
            fail_start_on: None,
        }
    }

    /// Results handed out by successive `calibrate` calls; once exhausted
    /// every calibration completes.
    pub fn with_calibrations(mut self, results: &[CalibrationResult]) -> Self {
        self.calibrations = results.iter().copied().collect();
        self
    }

    /// The link drops right after the `n`-th recording segment opens.
    pub fn losing_link_on_start(mut self, n: usize) -> Self {
        self.lose_link_on_start = Some(n);
        self
    }

    /// The `n`-th recording segment never opens: the link drops during the
    /// start command.
    pub fn failing_start(mut self, n: usize) -> Self {
        self.fail_start_on = Some(n);
        self
    }

    fn link(&self, operation: &'static str) -> Result<(), TrackerError> {
        if !self.connected {
            return Err(TrackerError::NotConnected);
        }
        if !self.link_up {
            return Err(TrackerError::LinkLost(format!("{operation} after link loss")));
        }
        Ok(())
    }
}

impl Tracker for RecordingTracker {
    fn connect(&mut self) -> Result<(), TrackerError> {
        self.log.push("connect");
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected && self.link_up
    }

    fn open_data_file(&mut self, host_name: &str) -> Result<(), TrackerError> {
        self.log.push(format!("open_data_file {host_name}"));
        self.link("open_data_file")
    }

    fn send_command(&mut self, command: &str) -> Result<(), TrackerError> {
        self.log.push(format!("cmd {command}"));
        self.link("send_command")
    }

    fn calibrate(&mut self) -> Result<CalibrationResult, TrackerError> {
        self.log.push("calibrate");
        self.link("calibrate")?;
        Ok(self
            .calibrations
            .pop_front()
            .unwrap_or(CalibrationResult::Completed))
    }

    fn start_recording(&mut self) -> Result<(), TrackerError> {
        self.log.push("start_recording");
        self.link("start_recording")?;
        self.starts += 1;
        if self.fail_start_on == Some(self.starts) {
            self.link_up = false;
            return Err(TrackerError::LinkLost("start_recording refused".into()));
        }
        if self.lose_link_on_start == Some(self.starts) {
            self.link_up = false;
        }
        Ok(())
    }

    fn stop_recording(&mut self) -> Result<(), TrackerError> {
        self.log.push("stop_recording");
        self.link("stop_recording")
    }

    fn send_message(&mut self, message: &str) -> Result<(), TrackerError> {
        self.link("send_message")?;
        self.log.push(format!("msg {message}"));
        Ok(())
    }

    fn latest_gaze(&mut self) -> Option<Point> {
        None
    }

    fn close_data_file(&mut self) -> Result<(), TrackerError> {
        self.log.push("close_data_file");
        self.link("close_data_file")
    }

    fn receive_data_file(&mut self, destination: &Path) -> Result<(), TrackerError> {
        self.log.push("receive_data_file");
        self.link("receive_data_file")?;
        std::fs::write(destination, b"recorded").map_err(|e| TrackerError::Rejected {
            operation: "receive_data_file",
            reason: e.to_string(),
        })
    }

    fn disconnect(&mut self) {
        self.log.push("disconnect");
        self.connected = false;
    }

    fn is_dummy(&self) -> bool {
        true
    }
}

/// Presents instantly and advances the shared clock by one 60 Hz refresh.
pub struct FakeRenderer {
    pub timer: ManualTimer,
    pub frames: u64,
    pub scenes_with_cue: u64,
}

impl FakeRenderer {
    pub fn new(timer: ManualTimer) -> Self {
        Self {
            timer,
            frames: 0,
            scenes_with_cue: 0,
        }
    }
}

impl StimulusRenderer for FakeRenderer {
    fn present(&mut self, scene: &Scene<'_>) -> Result<FrameTick, RenderError> {
        let period = Duration::from_nanos(16_666_667);
        self.timer.advance(period);
        self.frames += 1;
        if scene.cue.is_some() {
            self.scenes_with_cue += 1;
        }
        Ok(FrameTick {
            index: self.frames,
            timestamp_ns: self.timer.now(),
            interval_ns: period.as_nanos() as u64,
            dropped: 0,
        })
    }
}

/// Small fast catalog: 20 deg of travel at 20 deg/s is one second per trial.
pub fn config(types: &[TargetType], speeds: &[f64], trajectories: &[Trajectory]) -> Configuration {
    let mut config = Configuration::default();
    config.tracker.dummy_mode = true;
    config.experiment.seed = Some(11);
    config.experiment.tutorial.enabled = false;
    config.experiment.trials = TrialCatalog {
        target_types: types.to_vec(),
        target_speeds: speeds.to_vec(),
        target_trajectories: trajectories.to_vec(),
        repetitions: 1,
    };
    config.experiment.counterbalance.no_immediate_trajectory_repeat = trajectories.len() > 1;
    config
}

pub fn participant(dir: &Path) -> ParticipantContext {
    ParticipantContext::new("p01", dir, Demographics::default())
}
