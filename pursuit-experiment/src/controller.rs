use std::time::Duration;

use pursuit_core::{
    CompletionStatus, DirectionCue, FrameSummary, FrameTick, PhaseTimestamps, PrePursuit, Scene,
    StimulusRenderer, TargetMotion, TargetSample, TrialOutcome, TrialPhase, TrialSpec,
};
use pursuit_timing::Timer;

use crate::config::{Configuration, TutorialSettings};
use crate::error::{ExperimentError, Result};
use crate::gaze::{GazeSession, Marker, Tracker};
use crate::input::Input;

const ADVANCE_HINT: &str = "\n\nFixate the target, press space to make the text disappear, and press space again to start the trial.";

/// Everything a finished trial leaves behind.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialRecord {
    pub outcome: TrialOutcome,
    pub trace: Vec<TargetSample>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrialStatus {
    Running,
    Finished(TrialRecord),
}

#[derive(Debug, Clone)]
enum Prompts {
    Trial { instruction: String },
    Tutorial(TutorialSettings),
}

impl Prompts {
    fn for_phase(&self, phase: TrialPhase) -> Option<&str> {
        match self {
            Prompts::Trial { instruction } => match phase {
                TrialPhase::ShowDirectionCue | TrialPhase::AwaitSpaceRemovesCue => {
                    Some(instruction.as_str())
                }
                _ => None,
            },
            Prompts::Tutorial(t) => match phase {
                TrialPhase::AwaitFixation => Some(t.fixation_text.as_str()),
                TrialPhase::ShowDirectionCue | TrialPhase::AwaitSpaceRemovesCue => {
                    Some(t.cue_text.as_str())
                }
                TrialPhase::AwaitSpaceStartsTrial => Some(t.cue_removed_text.as_str()),
                TrialPhase::PursuitRunning => Some(t.pursuit_text.as_str()),
                _ => None,
            },
        }
    }
}

/// Drives one trial through its phases, one rendered frame per `tick`.
pub struct TrialController<T: Timer> {
    trial_index: usize,
    spec: TrialSpec,
    tutorial: bool,
    prompts: Prompts,
    motion: TargetMotion,
    final_hold: Duration,
    fixation_dwell: Duration,
    fixation_tolerance_px: f32,
    timer: T,

    phase: TrialPhase,
    timestamps: PhaseTimestamps,
    recalibrated: bool,
    recalibrations: u32,
    frames: FrameSummary,
    trace: Vec<TargetSample>,

    fixation_since: Option<u64>,
    cue_presented: bool,
    cue_removed_pending: bool,
    pursuit_anchor: Option<u64>,
    finished: Option<CompletionStatus>,
}

impl<T: Timer> TrialController<T> {
    pub fn new(trial_index: usize, spec: TrialSpec, config: &Configuration, timer: T) -> Self {
        let prompts = Prompts::Trial {
            instruction: format!("{}{ADVANCE_HINT}", spec.instruction_text()),
        };
        Self::build(trial_index, spec, false, prompts, config, timer)
    }

    /// The practice trial, numbered 0.
    pub fn tutorial(config: &Configuration, timer: T) -> Self {
        let tutorial = config.experiment.tutorial.clone();
        let spec = tutorial.spec();
        Self::build(0, spec, true, Prompts::Tutorial(tutorial), config, timer)
    }

    fn build(
        trial_index: usize,
        spec: TrialSpec,
        tutorial: bool,
        prompts: Prompts,
        config: &Configuration,
        timer: T,
    ) -> Self {
        let motion = TargetMotion::new(&spec, &config.monitor, &config.stimuli.target);
        Self {
            trial_index,
            spec,
            tutorial,
            prompts,
            motion,
            final_hold: Duration::from_millis(config.stimuli.target.final_fixation_ms),
            fixation_dwell: Duration::from_millis(config.tracker.fixation_dwell_ms),
            fixation_tolerance_px: config.tracker.fixation_tolerance_px,
            timer,
            phase: TrialPhase::AwaitFixation,
            timestamps: PhaseTimestamps::default(),
            recalibrated: false,
            recalibrations: 0,
            frames: FrameSummary::default(),
            trace: Vec::new(),
            fixation_since: None,
            cue_presented: false,
            cue_removed_pending: false,
            pursuit_anchor: None,
            finished: None,
        }
    }

    pub fn trial_index(&self) -> usize {
        self.trial_index
    }

    pub fn spec(&self) -> &TrialSpec {
        &self.spec
    }

    pub fn is_tutorial(&self) -> bool {
        self.tutorial
    }

    pub fn phase(&self) -> TrialPhase {
        self.phase
    }

    pub fn motion(&self) -> &TargetMotion {
        &self.motion
    }

    pub fn timestamps(&self) -> &PhaseTimestamps {
        &self.timestamps
    }

    pub fn recalibrated(&self) -> bool {
        self.recalibrated
    }

    /// Advances the trial by one frame: automatic transitions (skipped on a
    /// frame carrying recalibrate or quit), inputs in arrival order, pursuit
    /// bookkeeping, then exactly one presented frame unless the trial ended
    /// on this tick.
    pub fn tick<B, R>(
        &mut self,
        inputs: &[Input],
        session: &mut GazeSession<B>,
        renderer: &mut R,
    ) -> Result<TrialStatus>
    where
        B: Tracker,
        R: StimulusRenderer + ?Sized,
    {
        if let Some(status) = self.finished {
            return Ok(TrialStatus::Finished(self.record(status)));
        }

        // recalibrate and quit act on the phase the experimenter saw, so the
        // automatic transitions wait for the next frame
        let interrupted = inputs
            .iter()
            .any(|i| matches!(i, Input::Recalibrate | Input::Quit));
        if !interrupted {
            if self.phase == TrialPhase::ShowDirectionCue && self.cue_presented {
                self.phase = TrialPhase::AwaitSpaceRemovesCue;
            }
            if self.phase == TrialPhase::AwaitFixation {
                self.check_fixation(session);
            }
        }

        let mut advanced = false;
        for &input in inputs {
            if input == Input::Advance {
                // one phase step per frame, repeats are dropped
                if advanced {
                    continue;
                }
                advanced = self.phase.awaits_advance();
            }
            if self.handle_input(input, session)? {
                let status = self.finished.unwrap_or(CompletionStatus::Quit);
                return Ok(TrialStatus::Finished(self.record(status)));
            }
        }

        if self.phase.is_pursuit() {
            session.ensure_connected("pursuit")?;
            if let Some(anchor) = self.pursuit_anchor {
                if self.timer.elapsed(anchor) >= self.motion.duration() + self.final_hold {
                    self.complete(session)?;
                    return Ok(TrialStatus::Finished(self.record(CompletionStatus::Success)));
                }
            }
        }

        self.present(session, renderer)?;
        session.pump()?;
        Ok(TrialStatus::Running)
    }

    /// Applies one input. Returns `true` when the input ended the trial.
    pub fn handle_input<B: Tracker>(
        &mut self,
        input: Input,
        session: &mut GazeSession<B>,
    ) -> Result<bool> {
        match input {
            Input::Quit => {
                self.quit(session)?;
                Ok(true)
            }
            Input::Recalibrate => {
                match self.phase.pre_pursuit() {
                    Some(from) => self.recalibrate(from, session)?,
                    None => tracing::debug!(
                        trial = self.trial_index,
                        phase = self.phase.name(),
                        "recalibration ignored"
                    ),
                }
                Ok(false)
            }
            Input::Advance => {
                match self.phase {
                    TrialPhase::AwaitSpaceRemovesCue => {
                        self.phase = TrialPhase::AwaitSpaceStartsTrial;
                        self.cue_removed_pending = true;
                    }
                    TrialPhase::AwaitSpaceStartsTrial => self.start_pursuit(session)?,
                    _ => {}
                }
                Ok(false)
            }
        }
    }

    /// Outcome for a trial cut short by a fatal error.
    pub fn abort_record(&mut self) -> TrialRecord {
        self.finished = Some(CompletionStatus::Aborted);
        self.record(CompletionStatus::Aborted)
    }

    fn check_fixation<B: Tracker>(&mut self, session: &mut GazeSession<B>) {
        let now = self.timer.now();
        let acquired = if session.is_dummy() {
            true
        } else {
            let start = self.motion.start();
            match session.latest_gaze() {
                Some(gaze) if gaze.distance(start) <= self.fixation_tolerance_px => {
                    let since = *self.fixation_since.get_or_insert(now);
                    Duration::from_nanos(now.saturating_sub(since)) >= self.fixation_dwell
                }
                _ => {
                    self.fixation_since = None;
                    false
                }
            }
        };
        if acquired {
            self.fixation_since = None;
            self.timestamps.fixation_acquired = Some(now);
            session.mark(self.trial_index, Marker::FixationAcquired, now);
            self.phase = TrialPhase::ShowDirectionCue;
            tracing::debug!(trial = self.trial_index, "fixation acquired");
        }
    }

    fn recalibrate<B: Tracker>(
        &mut self,
        from: PrePursuit,
        session: &mut GazeSession<B>,
    ) -> Result<()> {
        self.phase = TrialPhase::Recalibrate { from };
        session.mark(self.trial_index, Marker::RecalibrationStart, self.timer.now());
        let result = session.calibrate();
        session.mark(self.trial_index, Marker::RecalibrationEnd, self.timer.now());
        match result {
            Ok(()) => {
                self.recalibrated = true;
                self.recalibrations += 1;
                tracing::info!(trial = self.trial_index, ?from, "recalibrated");
            }
            Err(ExperimentError::CalibrationAborted) => {
                tracing::warn!(trial = self.trial_index, ?from, "recalibration aborted, resuming");
            }
            Err(e) => return Err(e),
        }
        match from {
            PrePursuit::AwaitFixation => self.fixation_since = None,
            PrePursuit::ShowDirectionCue => self.cue_presented = false,
            _ => {}
        }
        self.phase = TrialPhase::from(from);
        Ok(())
    }

    fn start_pursuit<B: Tracker>(&mut self, session: &mut GazeSession<B>) -> Result<()> {
        if !session.is_calibrated() {
            tracing::warn!(trial = self.trial_index, "tracker not calibrated, press recalibrate first");
            return Ok(());
        }
        session.mark(self.trial_index, Marker::TrialId, self.timer.now());
        session.start_recording(self.trial_index)?;
        self.phase = TrialPhase::PursuitRunning;
        tracing::debug!(trial = self.trial_index, spec = %self.spec, "pursuit started");
        Ok(())
    }

    fn complete<B: Tracker>(&mut self, session: &mut GazeSession<B>) -> Result<()> {
        let offset = self.timestamps.pursuit_end.unwrap_or_else(|| self.timer.now());
        session.mark(self.trial_index, Marker::TargetOffset, offset);
        session.stop_recording(self.trial_index)?;
        session.mark(self.trial_index, Marker::TrialResult { ok: true }, self.timer.now());
        session.pump()?;
        self.phase = TrialPhase::TrialComplete;
        self.finished = Some(CompletionStatus::Success);
        tracing::info!(
            trial = self.trial_index,
            frames = self.frames.pursuit,
            dropped = self.frames.dropped,
            "trial complete"
        );
        Ok(())
    }

    fn quit<B: Tracker>(&mut self, session: &mut GazeSession<B>) -> Result<()> {
        let now = self.timer.now();
        if session.recording_trial() == Some(self.trial_index) {
            session.mark(self.trial_index, Marker::TrialAborted, now);
            session.stop_recording(self.trial_index)?;
            session.mark(self.trial_index, Marker::TrialResult { ok: false }, now);
        }
        session.pump()?;
        self.finished = Some(CompletionStatus::Quit);
        tracing::info!(trial = self.trial_index, phase = self.phase.name(), "quit requested");
        Ok(())
    }

    fn present<B, R>(&mut self, session: &mut GazeSession<B>, renderer: &mut R) -> Result<()>
    where
        B: Tracker,
        R: StimulusRenderer + ?Sized,
    {
        let elapsed = if self.phase.is_pursuit() {
            let anchor = *self.pursuit_anchor.get_or_insert_with(|| self.timer.now());
            self.timer.elapsed(anchor)
        } else {
            Duration::ZERO
        };

        let tick = {
            let mut scene = Scene::blank().with_target(self.motion.drawing_at(elapsed));
            if matches!(
                self.phase,
                TrialPhase::ShowDirectionCue | TrialPhase::AwaitSpaceRemovesCue
            ) {
                scene = scene.with_cue(DirectionCue {
                    origin: self.motion.path_position(Duration::ZERO),
                    trajectory: self.spec.trajectory,
                });
            }
            if let Some(text) = self.prompts.for_phase(self.phase) {
                scene = scene.with_text(text);
            }
            renderer.present(&scene)?
        };
        self.after_present(tick, elapsed, session);
        Ok(())
    }

    fn after_present<B: Tracker>(
        &mut self,
        tick: FrameTick,
        elapsed: Duration,
        session: &mut GazeSession<B>,
    ) {
        let ts = tick.timestamp_ns;
        self.frames.rendered += 1;
        self.frames.dropped += u64::from(tick.dropped);

        match self.phase {
            TrialPhase::ShowDirectionCue if !self.cue_presented => {
                self.cue_presented = true;
                self.timestamps.cue_shown = Some(ts);
                session.mark(self.trial_index, Marker::CueShown, ts);
            }
            TrialPhase::AwaitSpaceStartsTrial if self.cue_removed_pending => {
                self.cue_removed_pending = false;
                self.timestamps.cue_removed = Some(ts);
                session.mark(self.trial_index, Marker::CueRemoved, ts);
            }
            TrialPhase::PursuitRunning => {
                if self.timestamps.pursuit_start.is_none() {
                    self.timestamps.pursuit_start = Some(ts);
                    session.mark(self.trial_index, Marker::TargetOnset, ts);
                }
                if tick.dropped > 0 {
                    tracing::warn!(
                        trial = self.trial_index,
                        frame = tick.index,
                        dropped = tick.dropped,
                        "dropped frames during pursuit"
                    );
                }
                let position = self.motion.position_at(elapsed);
                self.trace.push(TargetSample {
                    trial_index: self.trial_index,
                    frame: tick.index,
                    timestamp_ns: ts,
                    trial_time_ns: elapsed.as_nanos() as u64,
                    x: position.x,
                    y: position.y,
                });
                self.frames.pursuit += 1;
                self.timestamps.pursuit_end = Some(ts);
            }
            _ => {}
        }
    }

    fn record(&mut self, status: CompletionStatus) -> TrialRecord {
        TrialRecord {
            outcome: TrialOutcome {
                trial_index: self.trial_index,
                spec: self.spec,
                tutorial: self.tutorial,
                timestamps: self.timestamps,
                recalibrated: self.recalibrated,
                recalibrations: self.recalibrations,
                status,
                ended_in: self.phase,
                frames: self.frames,
            },
            trace: std::mem::take(&mut self.trace),
        }
    }
}
