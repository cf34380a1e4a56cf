use std::collections::VecDeque;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use pursuit_core::Point;

use crate::config::TrackerSettings;
use crate::error::{ExperimentError, Result, TrackerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationResult {
    Completed,
    Aborted,
}

/// Vendor seam. Every call is expected to return within a frame except
/// `calibrate`, which blocks for the experimenter-driven routine.
pub trait Tracker {
    fn connect(&mut self) -> Result<(), TrackerError>;
    fn is_connected(&self) -> bool;
    fn open_data_file(&mut self, host_name: &str) -> Result<(), TrackerError>;
    fn send_command(&mut self, command: &str) -> Result<(), TrackerError>;
    fn calibrate(&mut self) -> Result<CalibrationResult, TrackerError>;
    fn start_recording(&mut self) -> Result<(), TrackerError>;
    fn stop_recording(&mut self) -> Result<(), TrackerError>;
    fn send_message(&mut self, message: &str) -> Result<(), TrackerError>;
    /// Most recent gaze position in centred, y-up screen pixels.
    fn latest_gaze(&mut self) -> Option<Point>;
    fn close_data_file(&mut self) -> Result<(), TrackerError>;
    /// Copies the host-side data file to `destination`.
    fn receive_data_file(&mut self, destination: &Path) -> Result<(), TrackerError>;
    fn disconnect(&mut self);

    /// Backends without hardware skip gaze-contingent checks.
    fn is_dummy(&self) -> bool {
        false
    }
}

/// No-hardware backend. Commands succeed, messages are kept in memory and
/// written out as a plain-text log when the data file is received.
#[derive(Debug)]
pub struct DummyTracker {
    connected: bool,
    recording: bool,
    host_name: Option<String>,
    started: Instant,
    lines: Vec<String>,
}

impl DummyTracker {
    pub fn new() -> Self {
        Self {
            connected: false,
            recording: false,
            host_name: None,
            started: Instant::now(),
            lines: Vec::new(),
        }
    }

    fn stamp(&self) -> u128 {
        self.started.elapsed().as_millis()
    }

    fn push(&mut self, kind: &str, text: &str) {
        let line = format!("{kind}\t{}\t{text}", self.stamp());
        self.lines.push(line);
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

impl Default for DummyTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Tracker for DummyTracker {
    fn connect(&mut self) -> Result<(), TrackerError> {
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn open_data_file(&mut self, host_name: &str) -> Result<(), TrackerError> {
        self.host_name = Some(host_name.to_string());
        Ok(())
    }

    fn send_command(&mut self, command: &str) -> Result<(), TrackerError> {
        self.push("CMD", command);
        Ok(())
    }

    fn calibrate(&mut self) -> Result<CalibrationResult, TrackerError> {
        Ok(CalibrationResult::Completed)
    }

    fn start_recording(&mut self) -> Result<(), TrackerError> {
        self.recording = true;
        self.push("START", "");
        Ok(())
    }

    fn stop_recording(&mut self) -> Result<(), TrackerError> {
        self.recording = false;
        self.push("END", "");
        Ok(())
    }

    fn send_message(&mut self, message: &str) -> Result<(), TrackerError> {
        self.push("MSG", message);
        Ok(())
    }

    fn latest_gaze(&mut self) -> Option<Point> {
        None
    }

    fn close_data_file(&mut self) -> Result<(), TrackerError> {
        Ok(())
    }

    fn receive_data_file(&mut self, destination: &Path) -> Result<(), TrackerError> {
        let write = || -> std::io::Result<()> {
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(destination)?;
            writeln!(
                file,
                "** DUMMY MODE RECORDING {}",
                self.host_name.as_deref().unwrap_or("-")
            )?;
            for line in &self.lines {
                writeln!(file, "{line}")?;
            }
            file.sync_all()
        };
        write().map_err(|e| TrackerError::Rejected {
            operation: "receive_data_file",
            reason: e.to_string(),
        })
    }

    fn disconnect(&mut self) {
        self.connected = false;
        self.recording = false;
    }

    fn is_dummy(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Disconnected,
    /// Linked but never successfully calibrated.
    Connected,
    Calibrated,
    Recording,
    /// Calibrated and idle between recording segments.
    Paused,
}

/// Event annotations written into the gaze stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    TrialId,
    FixationAcquired,
    CueShown,
    CueRemoved,
    RecalibrationStart,
    RecalibrationEnd,
    TargetOnset,
    TargetOffset,
    TrialResult { ok: bool },
    TrialAborted,
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TrialId => f.write_str("TRIALID"),
            Self::FixationAcquired => f.write_str("FIXATION_ACQUIRED"),
            Self::CueShown => f.write_str("CUE_SHOWN"),
            Self::CueRemoved => f.write_str("CUE_REMOVED"),
            Self::RecalibrationStart => f.write_str("RECALIBRATION_START"),
            Self::RecalibrationEnd => f.write_str("RECALIBRATION_END"),
            Self::TargetOnset => f.write_str("TARGET_ONSET"),
            Self::TargetOffset => f.write_str("TARGET_OFFSET"),
            Self::TrialResult { ok } => write!(f, "TRIAL_RESULT {}", if *ok { 0 } else { -1 }),
            Self::TrialAborted => f.write_str("TRIAL_ABORTED"),
        }
    }
}

/// A marker bound to its trial and the frame timestamp it describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerEvent {
    pub trial: usize,
    pub marker: Marker,
    pub timestamp_ns: u64,
}

impl fmt::Display for MarkerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.marker {
            Marker::TrialId => write!(f, "TRIALID {}", self.trial),
            marker => write!(
                f,
                "{}: {} t={:.3}",
                self.trial,
                marker,
                self.timestamp_ns as f64 / 1e6
            ),
        }
    }
}

/// Exclusive owner of the tracker link. Enforces one recording segment per
/// trial and keeps markers ordered with the segment they belong to.
pub struct GazeSession<B: Tracker> {
    backend: B,
    settings: TrackerSettings,
    host_file: String,
    destination: PathBuf,
    screen: (u32, u32),
    status: SessionStatus,
    calibrated: bool,
    recording_trial: Option<usize>,
    pending: VecDeque<MarkerEvent>,
    finalized: bool,
}

impl<B: Tracker> GazeSession<B> {
    /// `host_file` is the data file name on the tracker host (at most eight
    /// characters before the extension), `destination` where it is copied
    /// on finalize.
    pub fn new(
        backend: B,
        settings: TrackerSettings,
        host_file: impl Into<String>,
        destination: impl Into<PathBuf>,
        screen: (u32, u32),
    ) -> Self {
        Self {
            backend,
            settings,
            host_file: host_file.into(),
            destination: destination.into(),
            screen,
            status: SessionStatus::Disconnected,
            calibrated: false,
            recording_trial: None,
            pending: VecDeque::new(),
            finalized: false,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    pub fn is_recording(&self) -> bool {
        self.recording_trial.is_some()
    }

    pub fn recording_trial(&self) -> Option<usize> {
        self.recording_trial
    }

    pub fn is_dummy(&self) -> bool {
        self.backend.is_dummy()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn pending_markers(&self) -> usize {
        self.pending.len()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    /// Opens the link, the host data file, and pushes tracker settings.
    /// Does nothing when already connected.
    pub fn connect(&mut self) -> Result<()> {
        if self.status != SessionStatus::Disconnected {
            return Ok(());
        }
        self.backend
            .connect()
            .map_err(|e| ExperimentError::disconnected("connect", e))?;
        self.status = if self.calibrated {
            SessionStatus::Paused
        } else {
            SessionStatus::Connected
        };
        self.finalized = false;

        let (w, h) = self.screen;
        let commands = [
            format!("sample_rate {}", self.settings.sampling_rate_hz),
            format!("calibration_type = {}", self.settings.calibration_type),
            format!(
                "screen_pixel_coords = 0 0 {} {}",
                w.saturating_sub(1),
                h.saturating_sub(1)
            ),
        ];
        let configure = |backend: &mut B| -> Result<(), TrackerError> {
            backend.open_data_file(&self.host_file)?;
            for command in &commands {
                backend.send_command(command)?;
            }
            backend.send_message(&format!(
                "DISPLAY_COORDS 0 0 {} {}",
                w.saturating_sub(1),
                h.saturating_sub(1)
            ))
        };
        if let Err(e) = configure(&mut self.backend) {
            self.backend.disconnect();
            self.status = SessionStatus::Disconnected;
            return Err(ExperimentError::disconnected("tracker setup", e));
        }
        tracing::info!(
            host_file = %self.host_file,
            dummy = self.is_dummy(),
            "gaze tracker connected"
        );
        Ok(())
    }

    /// Always succeeds. An open segment is closed first on a best-effort
    /// basis.
    pub fn disconnect(&mut self) {
        if self.status == SessionStatus::Disconnected {
            return;
        }
        if let Some(trial) = self.recording_trial.take() {
            if let Err(e) = self.backend.stop_recording() {
                tracing::warn!(trial, error = %e, "stop on disconnect failed");
            }
        }
        self.backend.disconnect();
        self.status = SessionStatus::Disconnected;
        tracing::info!("gaze tracker disconnected");
    }

    /// Runs the blocking vendor calibration. An abort leaves the status as
    /// it was.
    pub fn calibrate(&mut self) -> Result<()> {
        if let Some(trial) = self.recording_trial {
            return Err(ExperimentError::RecordingPairingViolation {
                operation: "calibrate",
                trial,
                state: "recording".into(),
            });
        }
        self.ensure_connected("calibration")?;
        self.pump()?;
        match self.backend.calibrate() {
            Ok(CalibrationResult::Completed) => {
                self.calibrated = true;
                self.status = SessionStatus::Calibrated;
                tracing::info!("calibration completed");
                Ok(())
            }
            Ok(CalibrationResult::Aborted) => {
                tracing::warn!(status = ?self.status, "calibration aborted");
                Err(ExperimentError::CalibrationAborted)
            }
            Err(e) => Err(ExperimentError::disconnected("calibration", e)),
        }
    }

    /// Opens the recording segment of `trial`. Pending markers are delivered
    /// first so they land before the segment starts.
    pub fn start_recording(&mut self, trial: usize) -> Result<()> {
        if let Some(open) = self.recording_trial {
            return Err(ExperimentError::RecordingPairingViolation {
                operation: "start_recording",
                trial,
                state: format!("trial {open} is recording"),
            });
        }
        self.ensure_connected("start_recording")?;
        self.pump()?;
        self.backend
            .start_recording()
            .map_err(|e| ExperimentError::disconnected("start_recording", e))?;
        self.recording_trial = Some(trial);
        self.status = SessionStatus::Recording;
        tracing::debug!(trial, "recording started");
        Ok(())
    }

    /// Closes the segment of `trial`; pending markers are delivered before
    /// the segment ends.
    pub fn stop_recording(&mut self, trial: usize) -> Result<()> {
        if self.recording_trial != Some(trial) {
            let state = match self.recording_trial {
                Some(open) => format!("trial {open} is recording"),
                None => "not recording".into(),
            };
            return Err(ExperimentError::RecordingPairingViolation {
                operation: "stop_recording",
                trial,
                state,
            });
        }
        let flushed = self.pump();
        let stopped = self.backend.stop_recording();
        self.recording_trial = None;
        self.status = SessionStatus::Paused;
        flushed?;
        stopped.map_err(|e| ExperimentError::disconnected("stop_recording", e))?;
        tracing::debug!(trial, "recording stopped");
        Ok(())
    }

    /// Queues a marker; delivered by the next `pump`.
    pub fn mark(&mut self, trial: usize, marker: Marker, timestamp_ns: u64) {
        self.pending.push_back(MarkerEvent {
            trial,
            marker,
            timestamp_ns,
        });
    }

    /// Delivers queued markers in order. Called once per frame.
    pub fn pump(&mut self) -> Result<()> {
        if self.status == SessionStatus::Disconnected {
            return Ok(());
        }
        while let Some(event) = self.pending.front() {
            let text = event.to_string();
            self.backend
                .send_message(&text)
                .map_err(|e| ExperimentError::disconnected("marker delivery", e))?;
            self.pending.pop_front();
        }
        Ok(())
    }

    /// Fails when the link dropped since the last call.
    pub fn ensure_connected(&self, context: &str) -> Result<()> {
        if self.status == SessionStatus::Disconnected {
            return Err(ExperimentError::disconnected(context, TrackerError::NotConnected));
        }
        if !self.backend.is_connected() {
            return Err(ExperimentError::disconnected(
                context,
                TrackerError::LinkLost("tracker stopped responding".into()),
            ));
        }
        Ok(())
    }

    pub fn latest_gaze(&mut self) -> Option<Point> {
        self.backend.latest_gaze()
    }

    /// Closes any open segment, closes and retrieves the data file, then
    /// disconnects. Runs once; later calls return `Ok(())`. Every step is
    /// attempted even when an earlier one fails; the first failure is
    /// returned. `timestamp_ns` stamps the abort markers of an open segment.
    pub fn finalize(&mut self, timestamp_ns: u64) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;
        if self.status == SessionStatus::Disconnected {
            return Ok(());
        }

        let mut first_error: Option<ExperimentError> = None;
        let mut keep = |r: Result<()>| {
            if let Err(e) = r {
                tracing::warn!(error = %e, "finalize step failed");
                first_error.get_or_insert(e);
            }
        };

        if let Some(trial) = self.recording_trial {
            self.mark(trial, Marker::TrialAborted, timestamp_ns);
            self.mark(trial, Marker::TrialResult { ok: false }, timestamp_ns);
            keep(self.stop_recording(trial));
        }
        keep(self.pump());
        keep(
            self.backend
                .close_data_file()
                .map_err(|e| ExperimentError::disconnected("close_data_file", e)),
        );
        keep(
            self.backend
                .receive_data_file(&self.destination)
                .map_err(|e| ExperimentError::disconnected("receive_data_file", e)),
        );
        self.disconnect();

        tracing::info!(destination = %self.destination.display(), "gaze session finalized");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
