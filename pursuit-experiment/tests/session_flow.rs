mod common;

use std::collections::BTreeSet;

use common::{CallLog, FakeRenderer, RecordingTracker, config, participant};
use pursuit_core::{CompletionStatus, TargetSample, TargetType, Trajectory, TrialOutcome, TrialPhase};
use pursuit_experiment::{
    AutoAdvance, CalibrationResult, DummyTracker, ExperimentError, ExperimentRunner, Input, InputContext,
    InputSource, JsonlLog, ResultLogs, RunStage, TrialPlan,
};
use pursuit_timing::ManualTimer;

fn outcomes(dir: &std::path::Path) -> Vec<TrialOutcome> {
    JsonlLog::read_all(participant(dir).outcomes_path()).unwrap()
}

/// start/stop entries must alternate, beginning with a start.
fn assert_paired(log: &CallLog) {
    let segments: Vec<String> = log
        .entries()
        .into_iter()
        .filter(|e| e == "start_recording" || e == "stop_recording")
        .collect();
    assert_eq!(segments.len() % 2, 0, "unpaired segments: {segments:?}");
    for pair in segments.chunks(2) {
        assert_eq!(pair, ["start_recording", "stop_recording"]);
    }
}

#[test]
fn dummy_run_completes_every_trial() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(
        &[TargetType::MovingCircle, TargetType::JumpingCircle],
        &[10.0, 20.0],
        &[Trajectory::HorRight],
    );
    let log = CallLog::default();
    let timer = ManualTimer::new();
    let mut renderer = FakeRenderer::new(timer.clone());
    let mut runner = ExperimentRunner::prepare(
        config,
        participant(dir.path()),
        RecordingTracker::new(log.clone()),
        timer,
        false,
    )
    .unwrap();

    let summary = runner.run(&mut AutoAdvance::new(1), &mut renderer).unwrap();
    assert_eq!(summary.planned, 4);
    assert_eq!(summary.completed, 4);
    assert!(!summary.quit);
    assert_eq!(runner.stage(), RunStage::Finished);
    assert!(runner.session().is_finalized());

    let rows = outcomes(dir.path());
    assert_eq!(rows.len(), 4);
    assert!(rows.iter().all(|o| o.is_success() && !o.recalibrated));
    assert_eq!(
        rows.iter().map(|o| o.trial_index).collect::<Vec<_>>(),
        vec![1, 2, 3, 4]
    );

    // speed blocks keep their configured order
    let plan = TrialPlan::load(participant(dir.path()).trial_order_path()).unwrap();
    assert_eq!(plan.len(), 4);
    assert!(plan.trials()[..2].iter().all(|t| t.speed_deg_s == 10.0));

    assert_paired(&log);
    assert_eq!(log.count("start_recording"), 4);
    let entries = log.entries();
    for trial in 1..=4 {
        let id = entries.iter().position(|e| *e == format!("msg TRIALID {trial}")).unwrap();
        let start = entries[id..].iter().position(|e| e == "start_recording");
        assert_eq!(start, Some(1), "TRIALID {trial} must directly precede its segment");
    }
    let results = log
        .messages()
        .into_iter()
        .filter(|m| m.contains("TRIAL_RESULT 0"))
        .count();
    assert_eq!(results, 4);
    assert!(log.position("close_data_file") > log.position("stop_recording"));
    assert_eq!(log.entries().last().map(String::as_str), Some("disconnect"));

    let trace: Vec<pursuit_core::TargetSample> =
        JsonlLog::read_all(participant(dir.path()).trace_path()).unwrap();
    let traced: BTreeSet<usize> = trace.iter().map(|s| s.trial_index).collect();
    assert_eq!(traced, BTreeSet::from([1, 2, 3, 4]));
}

#[test]
fn recalibration_before_pursuit_marks_the_trial() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&[TargetType::MovingCircle], &[20.0], &[Trajectory::VerUp]);
    let log = CallLog::default();
    let timer = ManualTimer::new();
    let mut renderer = FakeRenderer::new(timer.clone());
    let mut runner = ExperimentRunner::prepare(
        config,
        participant(dir.path()),
        RecordingTracker::new(log.clone()),
        timer,
        false,
    )
    .unwrap();

    let mut auto = AutoAdvance::new(1);
    let mut pressed = false;
    let mut input = |ctx: &InputContext| {
        if ctx.phase == TrialPhase::AwaitSpaceStartsTrial && !pressed {
            pressed = true;
            return vec![Input::Recalibrate];
        }
        auto.poll(ctx)
    };
    runner.run(&mut input, &mut renderer).unwrap();

    let rows = outcomes(dir.path());
    assert_eq!(rows.len(), 1);
    assert!(rows[0].is_success());
    assert!(rows[0].recalibrated);
    assert_eq!(rows[0].recalibrations, 1);
    assert_eq!(log.count("calibrate"), 2);

    let entries = log.entries();
    let marker = entries
        .iter()
        .position(|e| e.starts_with("msg 1: RECALIBRATION_START"))
        .unwrap();
    let second_calibration = entries
        .iter()
        .enumerate()
        .filter(|(_, e)| *e == "calibrate")
        .map(|(i, _)| i)
        .nth(1)
        .unwrap();
    assert!(marker < second_calibration);
    assert!(second_calibration < log.position("start_recording").unwrap());
}

#[test]
fn recalibration_is_accepted_from_every_pre_pursuit_phase() {
    let phases = [
        TrialPhase::AwaitFixation,
        TrialPhase::ShowDirectionCue,
        TrialPhase::AwaitSpaceRemovesCue,
        TrialPhase::AwaitSpaceStartsTrial,
    ];
    for phase in phases {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&[TargetType::JumpingCircle], &[20.0], &[Trajectory::HorLeft]);
        let log = CallLog::default();
        let timer = ManualTimer::new();
        let mut renderer = FakeRenderer::new(timer.clone());
        let mut runner = ExperimentRunner::prepare(
            config,
            participant(dir.path()),
            RecordingTracker::new(log.clone()),
            timer,
            false,
        )
        .unwrap();

        let mut auto = AutoAdvance::new(1);
        let mut pressed = false;
        let mut input = |ctx: &InputContext| {
            if ctx.phase == phase && !pressed {
                pressed = true;
                return vec![Input::Recalibrate];
            }
            auto.poll(ctx)
        };
        runner.run(&mut input, &mut renderer).unwrap();

        let rows = outcomes(dir.path());
        assert!(rows[0].is_success(), "{phase:?}");
        assert!(rows[0].recalibrated, "{phase:?}");
        assert_eq!(log.count("calibrate"), 2, "{phase:?}");
        assert_paired(&log);

        // the trial went back to the phase the key was pressed in
        let messages = log.messages();
        let at = |marker: &str| {
            messages
                .iter()
                .position(|m| m.starts_with(&format!("1: {marker}")))
                .unwrap_or_else(|| panic!("{marker} missing for {phase:?}"))
        };
        let recalibration = at("RECALIBRATION_END");
        match phase {
            TrialPhase::AwaitFixation => {
                assert!(at("RECALIBRATION_START") < at("FIXATION_ACQUIRED"));
            }
            TrialPhase::ShowDirectionCue => {
                assert!(at("FIXATION_ACQUIRED") < at("RECALIBRATION_START"));
                let cue_after = messages[recalibration..]
                    .iter()
                    .any(|m| m.starts_with("1: CUE_SHOWN"));
                assert!(cue_after, "cue not shown again after recalibration");
                assert!(recalibration < at("CUE_REMOVED"));
            }
            TrialPhase::AwaitSpaceRemovesCue => {
                assert!(at("CUE_SHOWN") < at("RECALIBRATION_START"));
                assert!(recalibration < at("CUE_REMOVED"));
            }
            _ => {
                assert!(at("CUE_REMOVED") < at("RECALIBRATION_START"));
                assert!(recalibration < at("TARGET_ONSET"));
            }
        }
    }
}

#[test]
fn recalibration_is_ignored_during_pursuit() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&[TargetType::MovingCircle], &[20.0], &[Trajectory::HorRight]);
    let log = CallLog::default();
    let timer = ManualTimer::new();
    let mut renderer = FakeRenderer::new(timer.clone());
    let mut runner = ExperimentRunner::prepare(
        config,
        participant(dir.path()),
        RecordingTracker::new(log.clone()),
        timer,
        false,
    )
    .unwrap();

    let mut auto = AutoAdvance::new(1);
    let mut input = |ctx: &InputContext| {
        if ctx.phase.is_pursuit() {
            vec![Input::Recalibrate]
        } else {
            auto.poll(ctx)
        }
    };
    runner.run(&mut input, &mut renderer).unwrap();

    let rows = outcomes(dir.path());
    assert!(rows[0].is_success());
    assert!(!rows[0].recalibrated);
    assert_eq!(log.count("calibrate"), 1);
}

#[test]
fn aborted_recalibration_keeps_the_trial_going() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&[TargetType::MovingCircle], &[20.0], &[Trajectory::HorRight]);
    let log = CallLog::default();
    let timer = ManualTimer::new();
    let mut renderer = FakeRenderer::new(timer.clone());
    let tracker = RecordingTracker::new(log.clone())
        .with_calibrations(&[CalibrationResult::Completed, CalibrationResult::Aborted]);
    let mut runner =
        ExperimentRunner::prepare(config, participant(dir.path()), tracker, timer, false).unwrap();

    let mut auto = AutoAdvance::new(1);
    let mut pressed = false;
    let mut input = |ctx: &InputContext| {
        if ctx.phase == TrialPhase::AwaitSpaceRemovesCue && !pressed {
            pressed = true;
            return vec![Input::Recalibrate];
        }
        auto.poll(ctx)
    };
    runner.run(&mut input, &mut renderer).unwrap();

    let rows = outcomes(dir.path());
    assert!(rows[0].is_success());
    assert!(!rows[0].recalibrated);
    assert_eq!(rows[0].recalibrations, 0);
    assert!(log.messages().iter().any(|m| m.starts_with("1: RECALIBRATION_END")));
}

#[test]
fn trial_waits_for_a_successful_calibration() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&[TargetType::MovingCircle], &[20.0], &[Trajectory::HorRight]);
    let log = CallLog::default();
    let timer = ManualTimer::new();
    let mut renderer = FakeRenderer::new(timer.clone());
    let tracker =
        RecordingTracker::new(log.clone()).with_calibrations(&[CalibrationResult::Aborted]);
    let mut runner =
        ExperimentRunner::prepare(config, participant(dir.path()), tracker, timer, false).unwrap();

    let mut polls_waiting = 0;
    let mut input = |ctx: &InputContext| match ctx.phase {
        TrialPhase::AwaitSpaceRemovesCue => vec![Input::Advance],
        TrialPhase::AwaitSpaceStartsTrial => {
            polls_waiting += 1;
            match polls_waiting {
                1 | 2 => vec![Input::Advance],
                3 => vec![Input::Recalibrate],
                _ => vec![Input::Advance],
            }
        }
        _ => Vec::new(),
    };
    runner.run(&mut input, &mut renderer).unwrap();

    assert!(polls_waiting >= 4);
    assert_eq!(log.count("calibrate"), 2);
    let entries = log.entries();
    let second_calibration = entries.iter().rposition(|e| e == "calibrate").unwrap();
    assert!(second_calibration < log.position("start_recording").unwrap());
    assert!(outcomes(dir.path())[0].recalibrated);
}

#[test]
fn repeated_advance_opens_one_segment_per_trial() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(
        &[TargetType::MovingCircle, TargetType::BackAndForthArray],
        &[20.0],
        &[Trajectory::HorRight, Trajectory::CirCounter],
    );
    let log = CallLog::default();
    let timer = ManualTimer::new();
    let mut renderer = FakeRenderer::new(timer.clone());
    let mut runner = ExperimentRunner::prepare(
        config,
        participant(dir.path()),
        RecordingTracker::new(log.clone()),
        timer,
        false,
    )
    .unwrap();

    let mut input = |_: &InputContext| vec![Input::Advance, Input::Advance, Input::Advance];
    let summary = runner.run(&mut input, &mut renderer).unwrap();
    assert_eq!(summary.completed, 4);
    assert_eq!(log.count("start_recording"), 4);
    assert_paired(&log);
    assert!(
        outcomes(dir.path())
            .iter()
            .all(|o| o.timestamps.cue_removed < o.timestamps.pursuit_start)
    );
}

#[test]
fn quit_during_pursuit_stops_recording_before_finalize() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&[TargetType::MovingCircle], &[20.0], &[Trajectory::DiagUpRight]);
    let log = CallLog::default();
    let timer = ManualTimer::new();
    let mut renderer = FakeRenderer::new(timer.clone());
    let mut runner = ExperimentRunner::prepare(
        config,
        participant(dir.path()),
        RecordingTracker::new(log.clone()),
        timer,
        false,
    )
    .unwrap();

    let mut auto = AutoAdvance::new(1);
    let mut pursuit_frames = 0;
    let mut input = |ctx: &InputContext| {
        if ctx.phase.is_pursuit() {
            pursuit_frames += 1;
            if pursuit_frames > 5 {
                return vec![Input::Quit];
            }
        }
        auto.poll(ctx)
    };
    let summary = runner.run(&mut input, &mut renderer).unwrap();
    assert!(summary.quit);
    assert_eq!(summary.completed, 0);

    let rows = outcomes(dir.path());
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, CompletionStatus::Quit);
    assert_eq!(rows[0].ended_in, TrialPhase::PursuitRunning);

    assert_paired(&log);
    assert!(log.position("stop_recording") < log.position("close_data_file"));
    let messages = log.messages();
    assert!(messages.iter().any(|m| m.starts_with("1: TRIAL_ABORTED")));
    assert!(messages.iter().any(|m| m.starts_with("1: TRIAL_RESULT -1")));
}

#[test]
fn link_loss_during_pursuit_aborts_and_finalizes() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&[TargetType::MovingCircle], &[20.0, 10.0], &[Trajectory::VerDown]);
    let log = CallLog::default();
    let timer = ManualTimer::new();
    let mut renderer = FakeRenderer::new(timer.clone());
    let tracker = RecordingTracker::new(log.clone()).losing_link_on_start(1);
    let mut runner =
        ExperimentRunner::prepare(config, participant(dir.path()), tracker, timer, false).unwrap();

    let err = runner.run(&mut AutoAdvance::new(1), &mut renderer).unwrap_err();
    assert!(
        matches!(err, ExperimentError::HardwareDisconnected { .. }),
        "unexpected error {err:?}"
    );
    assert!(err.is_fatal());
    assert_eq!(runner.stage(), RunStage::Finished);
    assert!(runner.session().is_finalized());
    assert!(!runner.session().is_recording());

    let entries = log.entries();
    let start = log.position("start_recording").unwrap();
    let stop = log.position("stop_recording").unwrap();
    let close = log.position("close_data_file").unwrap();
    assert!(start < stop && stop < close);
    assert_eq!(entries.last().map(String::as_str), Some("disconnect"));

    let rows = outcomes(dir.path());
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, CompletionStatus::Aborted);
    assert_eq!(rows[0].ended_in, TrialPhase::PursuitRunning);
}

#[test]
fn failed_segment_start_aborts_before_pursuit() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&[TargetType::MovingCircle], &[20.0, 10.0], &[Trajectory::HorLeft]);
    let log = CallLog::default();
    let timer = ManualTimer::new();
    let mut renderer = FakeRenderer::new(timer.clone());
    let tracker = RecordingTracker::new(log.clone()).failing_start(1);
    let mut runner =
        ExperimentRunner::prepare(config, participant(dir.path()), tracker, timer, false).unwrap();

    let err = runner.run(&mut AutoAdvance::new(1), &mut renderer).unwrap_err();
    assert!(
        matches!(err, ExperimentError::HardwareDisconnected { .. }),
        "unexpected error {err:?}"
    );
    assert!(runner.session().is_finalized());
    assert!(!runner.session().is_recording());

    let rows = outcomes(dir.path());
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, CompletionStatus::Aborted);
    assert_eq!(rows[0].ended_in, TrialPhase::AwaitSpaceStartsTrial);
    let trace: Vec<TargetSample> =
        JsonlLog::read_all(participant(dir.path()).trace_path()).unwrap();
    assert!(trace.is_empty());

    assert!(!log.messages().iter().any(|m| m.contains("TARGET_ONSET")));
    assert_eq!(log.count("start_recording"), 1);
    assert_eq!(log.count("stop_recording"), 0);
    assert!(log.position("close_data_file").is_some());
    assert_eq!(log.entries().last().map(String::as_str), Some("disconnect"));
}

#[cfg(target_os = "linux")]
#[test]
fn finish_finalizes_even_when_the_interrupted_trial_cannot_be_logged() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&[TargetType::MovingCircle], &[20.0], &[Trajectory::HorRight]);
    let p = participant(dir.path());
    p.prepare(false).unwrap();
    std::os::unix::fs::symlink("/dev/full", p.trace_path()).unwrap();

    let plan = TrialPlan::generate(
        &config.experiment.trials,
        &config.experiment.counterbalance,
        config.experiment.seed,
    )
    .unwrap();
    let log = CallLog::default();
    let timer = ManualTimer::new();
    let mut renderer = FakeRenderer::new(timer.clone());
    let mut runner =
        ExperimentRunner::new(config, p, plan, RecordingTracker::new(log.clone()), timer).unwrap();
    runner.start().unwrap();
    let mut auto = AutoAdvance::new(1);
    let mut pursuit_frames = 0;
    while pursuit_frames < 5 {
        let ctx = runner.input_context();
        if ctx.phase.is_pursuit() {
            pursuit_frames += 1;
        }
        runner.tick(&auto.poll(&ctx), &mut renderer).unwrap();
    }
    assert!(runner.session().is_recording());

    let err = runner.finish().unwrap_err();
    assert!(matches!(err, ExperimentError::Io { .. }), "unexpected error {err:?}");
    assert_eq!(runner.stage(), RunStage::Finished);
    assert!(runner.session().is_finalized());
    assert!(log.position("close_data_file").is_some());
    assert_eq!(log.entries().last().map(String::as_str), Some("disconnect"));
}

#[test]
fn resumed_session_keeps_the_earlier_gaze_recording() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(
        &[TargetType::MovingCircle, TargetType::JumpingCircle],
        &[20.0],
        &[Trajectory::HorRight, Trajectory::VerUp],
    );

    let timer = ManualTimer::new();
    let mut renderer = FakeRenderer::new(timer.clone());
    let mut runner = ExperimentRunner::prepare(
        config.clone(),
        participant(dir.path()),
        DummyTracker::new(),
        timer,
        false,
    )
    .unwrap();
    let mut auto = AutoAdvance::new(1);
    let mut input = |ctx: &InputContext| {
        if ctx.trial_index == 3 {
            vec![Input::Quit]
        } else {
            auto.poll(ctx)
        }
    };
    assert!(runner.run(&mut input, &mut renderer).unwrap().quit);
    drop(runner);

    let first = participant(dir.path()).session_data_path(true, 1);
    let second = participant(dir.path()).session_data_path(true, 2);
    let before = std::fs::read_to_string(&first).unwrap();
    assert!(before.contains("TRIALID 1"));
    assert!(!second.exists());

    let timer = ManualTimer::new();
    let mut renderer = FakeRenderer::new(timer.clone());
    let mut runner = ExperimentRunner::prepare(
        config,
        participant(dir.path()),
        DummyTracker::new(),
        timer,
        true,
    )
    .unwrap();
    let summary = runner.run(&mut AutoAdvance::new(1), &mut renderer).unwrap();
    assert_eq!(summary.completed, 2);

    assert_eq!(std::fs::read_to_string(&first).unwrap(), before);
    let resumed = std::fs::read_to_string(&second).unwrap();
    assert!(resumed.contains("TRIALID 3"));
    assert!(!resumed.contains("TRIALID 1"));
}

#[test]
fn resumed_session_skips_completed_trials() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(
        &[TargetType::MovingCircle, TargetType::JumpingCircle],
        &[20.0],
        &[Trajectory::HorRight, Trajectory::VerUp],
    );

    let first_log = CallLog::default();
    let timer = ManualTimer::new();
    let mut renderer = FakeRenderer::new(timer.clone());
    let mut runner = ExperimentRunner::prepare(
        config.clone(),
        participant(dir.path()),
        RecordingTracker::new(first_log.clone()),
        timer,
        false,
    )
    .unwrap();
    let order = runner.plan().clone();
    let mut auto = AutoAdvance::new(1);
    let mut input = |ctx: &InputContext| {
        if ctx.trial_index == 3 {
            vec![Input::Quit]
        } else {
            auto.poll(ctx)
        }
    };
    let summary = runner.run(&mut input, &mut renderer).unwrap();
    assert!(summary.quit);
    assert_eq!(summary.completed, 2);
    drop(runner);

    // a fresh start must not clobber the existing participant
    assert!(
        ExperimentRunner::prepare(
            config.clone(),
            participant(dir.path()),
            RecordingTracker::new(CallLog::default()),
            ManualTimer::new(),
            false,
        )
        .is_err()
    );

    let second_log = CallLog::default();
    let timer = ManualTimer::new();
    let mut renderer = FakeRenderer::new(timer.clone());
    let mut runner = ExperimentRunner::prepare(
        config,
        participant(dir.path()),
        RecordingTracker::new(second_log.clone()),
        timer,
        true,
    )
    .unwrap();
    assert_eq!(runner.plan(), &order);
    assert_eq!(runner.remaining(), 2);

    let summary = runner.run(&mut AutoAdvance::new(1), &mut renderer).unwrap();
    assert_eq!(summary.resumed, 2);
    assert_eq!(summary.completed, 2);
    assert!(second_log.messages().contains(&"TRIALID 3".to_string()));
    assert!(!second_log.messages().contains(&"TRIALID 1".to_string()));

    let done = ResultLogs::completed_trials(participant(dir.path()).outcomes_path()).unwrap();
    assert_eq!(done, BTreeSet::from([1, 2, 3, 4]));
}

#[test]
fn tampered_trial_order_is_rejected_on_resume() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&[TargetType::MovingCircle], &[20.0], &[Trajectory::HorRight]);
    let p = participant(dir.path());
    p.prepare(false).unwrap();
    std::fs::write(
        p.trial_order_path(),
        "{\"trial_index\":1,\"target_type\":\"jumping_circle\",\"speed_deg_s\":20.0,\"trajectory\":\"hor_right\",\"repetition\":0}\n",
    )
    .unwrap();

    let result = ExperimentRunner::prepare(
        config,
        participant(dir.path()),
        RecordingTracker::new(CallLog::default()),
        ManualTimer::new(),
        true,
    );
    assert!(matches!(result, Err(ExperimentError::PlanMismatch(_))));
}

#[test]
fn tutorial_runs_first_and_is_not_counted() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(&[TargetType::MovingCircle], &[20.0], &[Trajectory::HorRight]);
    config.experiment.tutorial.enabled = true;
    config.experiment.tutorial.speed_deg_s = 20.0;
    let timer = ManualTimer::new();
    let mut renderer = FakeRenderer::new(timer.clone());
    let mut runner = ExperimentRunner::prepare(
        config,
        participant(dir.path()),
        RecordingTracker::new(CallLog::default()),
        timer,
        false,
    )
    .unwrap();
    assert_eq!(runner.remaining(), 2);
    runner.start().unwrap();
    assert_eq!(runner.stage(), RunStage::Tutorial);
    assert!(runner.input_context().tutorial);

    let summary = runner.run(&mut AutoAdvance::new(1), &mut renderer).unwrap();
    assert_eq!(summary.completed, 1);
    let rows = outcomes(dir.path());
    assert_eq!(rows.len(), 2);
    assert!(rows[0].tutorial && rows[0].trial_index == 0);
    assert!(!rows[1].tutorial && rows[1].trial_index == 1);
}
