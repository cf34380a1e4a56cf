use std::collections::VecDeque;

use pursuit_core::{CompletionStatus, StimulusRenderer, TrialPhase};
use pursuit_timing::Timer;

use crate::config::Configuration;
use crate::controller::{TrialController, TrialRecord, TrialStatus};
use crate::error::{ExperimentError, Result};
use crate::gaze::{GazeSession, Tracker};
use crate::input::{Input, InputContext, InputSource};
use crate::log::ResultLogs;
use crate::participant::ParticipantContext;
use crate::plan::TrialPlan;

const TUTORIAL_INDEX: usize = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Setup,
    Calibration,
    Tutorial,
    Trials,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunSummary {
    pub participant_id: String,
    pub planned: usize,
    /// Trials run to completion in this session, tutorial excluded.
    pub completed: usize,
    /// Trials already completed by an earlier session.
    pub resumed: usize,
    pub recalibrated: usize,
    pub dropped_frames: u64,
    pub quit: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerStatus {
    Running,
    Finished(RunSummary),
}

/// Owns the gaze session and result logs for one participant and walks
/// the tutorial and the trial plan, one controller at a time.
pub struct ExperimentRunner<B: Tracker, T: Timer> {
    config: Configuration,
    participant: ParticipantContext,
    plan: TrialPlan,
    session: GazeSession<B>,
    logs: ResultLogs,
    timer: T,
    queue: VecDeque<usize>,
    current: Option<TrialController<T>>,
    stage: RunStage,
    frame: u64,
    summary: RunSummary,
}

impl<B: Tracker, T: Timer> ExperimentRunner<B, T> {
    /// Creates or reopens the participant directory, writes participant
    /// info, and generates or reloads the persisted trial order.
    pub fn prepare(
        config: Configuration,
        mut participant: ParticipantContext,
        backend: B,
        timer: T,
        resume: bool,
    ) -> Result<Self> {
        participant.prepare(resume)?;
        if resume && participant.info_path().exists() {
            participant.load_demographics()?;
        } else {
            participant.write_info(&config.experiment.name)?;
        }
        let experiment = &config.experiment;
        let plan = TrialPlan::generate_or_resume(
            &experiment.trials,
            &experiment.counterbalance,
            experiment.seed,
            participant.trial_order_path(),
        )?;
        Self::new(config, participant, plan, backend, timer)
    }

    /// Runner over an explicit plan. Trials already logged as successful in
    /// the participant's outcome file are skipped.
    pub fn new(
        config: Configuration,
        participant: ParticipantContext,
        plan: TrialPlan,
        backend: B,
        timer: T,
    ) -> Result<Self> {
        let done = ResultLogs::completed_trials(participant.outcomes_path())?;
        let mut queue = VecDeque::with_capacity(plan.len() + 1);
        if config.experiment.tutorial.enabled && !done.contains(&TUTORIAL_INDEX) {
            queue.push_back(TUTORIAL_INDEX);
        }
        queue.extend(plan.iter().map(|(i, _)| i).filter(|i| !done.contains(i)));

        let resumed = done.iter().filter(|&&i| i != TUTORIAL_INDEX && i <= plan.len()).count();
        if resumed > 0 {
            tracing::info!(resumed, remaining = queue.len(), "skipping completed trials");
        }

        let destination = participant.tracker_data_path(backend.is_dummy());
        let screen = (config.monitor.width_px(), config.monitor.height_px());
        let session = GazeSession::new(
            backend,
            config.tracker.clone(),
            format!("{}.EDF", participant.id),
            destination,
            screen,
        );
        let logs = ResultLogs::open(participant.outcomes_path(), participant.trace_path())?;
        let summary = RunSummary {
            participant_id: participant.id.clone(),
            planned: plan.len(),
            resumed,
            ..RunSummary::default()
        };

        Ok(Self {
            config,
            participant,
            plan,
            session,
            logs,
            timer,
            queue,
            current: None,
            stage: RunStage::Setup,
            frame: 0,
            summary,
        })
    }

    pub fn stage(&self) -> RunStage {
        self.stage
    }

    pub fn plan(&self) -> &TrialPlan {
        &self.plan
    }

    pub fn participant(&self) -> &ParticipantContext {
        &self.participant
    }

    pub fn session(&self) -> &GazeSession<B> {
        &self.session
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Trials still to run, the current one included.
    pub fn remaining(&self) -> usize {
        self.queue.len() + usize::from(self.current.is_some())
    }

    pub fn input_context(&self) -> InputContext {
        let (trial_index, tutorial, phase) = match &self.current {
            Some(c) => (c.trial_index(), c.is_tutorial(), c.phase()),
            None => (TUTORIAL_INDEX, false, TrialPhase::TrialComplete),
        };
        InputContext {
            trial_index,
            tutorial,
            phase,
            frame: self.frame,
        }
    }

    /// Connects the tracker and runs the initial calibration. An aborted
    /// calibration is not fatal; trials refuse to start until a
    /// recalibration succeeds.
    pub fn start(&mut self) -> Result<()> {
        if self.stage != RunStage::Setup {
            return Ok(());
        }
        if let Err(e) = self.session.connect() {
            return Err(self.fail(e));
        }
        self.stage = RunStage::Calibration;
        match self.session.calibrate() {
            Ok(()) => {}
            Err(ExperimentError::CalibrationAborted) => {
                tracing::warn!("initial calibration aborted; recalibrate before the first trial");
            }
            Err(e) => return Err(self.fail(e)),
        }
        tracing::info!(
            participant = %self.participant.id,
            trials = self.queue.len(),
            "experiment started"
        );
        if let Err(e) = self.next_trial() {
            return Err(self.fail(e));
        }
        Ok(())
    }

    /// One frame of the run. Finished records are persisted before the next
    /// trial begins. A fatal error logs the interrupted trial as aborted and
    /// finalizes the tracker before it is returned.
    pub fn tick<R>(&mut self, inputs: &[Input], renderer: &mut R) -> Result<RunnerStatus>
    where
        R: StimulusRenderer + ?Sized,
    {
        if self.stage == RunStage::Setup {
            self.start()?;
        }
        if self.stage == RunStage::Finished {
            return Ok(RunnerStatus::Finished(self.summary.clone()));
        }

        let Some(controller) = self.current.as_mut() else {
            return self.finish().map(RunnerStatus::Finished);
        };
        let record = match controller.tick(inputs, &mut self.session, renderer) {
            Ok(TrialStatus::Running) => {
                self.frame += 1;
                return Ok(RunnerStatus::Running);
            }
            Ok(TrialStatus::Finished(record)) => record,
            Err(e) => return Err(self.fail(e)),
        };
        self.current = None;

        if let Err(e) = self.persist(&record) {
            return Err(self.fail(e));
        }
        if record.outcome.status == CompletionStatus::Quit {
            self.summary.quit = true;
            return self.finish().map(RunnerStatus::Finished);
        }
        if let Err(e) = self.next_trial() {
            return Err(self.fail(e));
        }
        if self.current.is_none() {
            return self.finish().map(RunnerStatus::Finished);
        }
        Ok(RunnerStatus::Running)
    }

    /// Drives the whole run, polling `input` once per frame.
    pub fn run<I, R>(&mut self, input: &mut I, renderer: &mut R) -> Result<RunSummary>
    where
        I: InputSource + ?Sized,
        R: StimulusRenderer + ?Sized,
    {
        self.start()?;
        loop {
            let ctx = self.input_context();
            let inputs = input.poll(&ctx);
            if let RunnerStatus::Finished(summary) = self.tick(&inputs, renderer)? {
                return Ok(summary);
            }
        }
    }

    /// Closes the tracker session. Safe to call more than once. Finalize is
    /// attempted even when the interrupted trial cannot be logged; the first
    /// failure is returned.
    pub fn finish(&mut self) -> Result<RunSummary> {
        let persisted = match self.current.take() {
            Some(mut controller) => {
                let record = controller.abort_record();
                self.persist(&record)
            }
            None => Ok(()),
        };
        if let Err(e) = &persisted {
            tracing::error!(error = %e, "could not persist the interrupted trial");
        }
        self.stage = RunStage::Finished;
        let finalized = self.session.finalize(self.timer.now());
        persisted?;
        finalized?;
        tracing::info!(
            participant = %self.summary.participant_id,
            completed = self.summary.completed,
            planned = self.summary.planned,
            quit = self.summary.quit,
            dropped_frames = self.summary.dropped_frames,
            "experiment finished"
        );
        Ok(self.summary.clone())
    }

    fn next_trial(&mut self) -> Result<()> {
        let Some(index) = self.queue.pop_front() else {
            self.current = None;
            return Ok(());
        };
        let controller = if index == TUTORIAL_INDEX {
            self.stage = RunStage::Tutorial;
            TrialController::tutorial(&self.config, self.timer.clone())
        } else {
            self.stage = RunStage::Trials;
            let spec = self.plan.get(index).copied().ok_or_else(|| {
                ExperimentError::PlanMismatch(format!("no trial {index} in a plan of {}", self.plan.len()))
            })?;
            TrialController::new(index, spec, &self.config, self.timer.clone())
        };
        tracing::info!(
            trial = index,
            of = self.plan.len(),
            spec = %controller.spec(),
            tutorial = controller.is_tutorial(),
            "trial loaded"
        );
        self.current = Some(controller);
        Ok(())
    }

    fn persist(&mut self, record: &TrialRecord) -> Result<()> {
        self.logs.record(&record.outcome, &record.trace)?;
        let outcome = &record.outcome;
        self.summary.dropped_frames += outcome.frames.dropped;
        if outcome.is_success() && !outcome.tutorial {
            self.summary.completed += 1;
            if outcome.recalibrated {
                self.summary.recalibrated += 1;
            }
        }
        Ok(())
    }

    /// Best-effort cleanup after a fatal error. The original error wins over
    /// anything that fails here.
    fn fail(&mut self, error: ExperimentError) -> ExperimentError {
        tracing::error!(error = %error, stage = ?self.stage, "experiment aborted");
        if let Some(mut controller) = self.current.take() {
            let record = controller.abort_record();
            if let Err(e) = self.persist(&record) {
                tracing::warn!(error = %e, "could not persist aborted trial");
            }
        }
        if let Err(e) = self.session.finalize(self.timer.now()) {
            tracing::warn!(error = %e, "finalize after failure");
        }
        self.stage = RunStage::Finished;
        error
    }
}
