use std::path::PathBuf;
use std::time::SystemTime;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use pursuit_core::{TargetType, Trajectory, TrialSpec};
use pursuit_experiment::{
    AutoAdvance, Configuration, DummyTracker, ExperimentError, ExperimentRunner, GazeSession,
    ParticipantContext, RunSummary, TrialPlan,
};
use pursuit_render::OffscreenRenderer;
use pursuit_timing::{HighPrecisionTimer, ManualTimer, Timer};
use tracing::{info, warn};

mod app;
mod intake;

use app::App;

#[derive(Parser, Debug)]
#[command(name = "smooth-pursuit", about = "Smooth-pursuit eye-tracking experiment")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Experiment settings (JSON); built-in defaults when the file is absent
    #[arg(long, global = true, default_value = "settings.json")]
    config: PathBuf,

    /// Root directory for per-participant output
    #[arg(long, global = true, default_value = "data")]
    data_dir: PathBuf,

    /// Run without tracker hardware
    #[arg(long, global = true)]
    dummy: bool,

    /// Render offscreen on a simulated display clock and advance phases
    /// automatically
    #[arg(long, global = true)]
    headless: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the tutorial and the full trial plan (default)
    Run(RunArgs),
    /// Connect to the tracker and run a calibration only
    Calibrate,
    /// Present a single chosen trial
    Showcase(ShowcaseArgs),
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Participant id; generated when omitted
    #[arg(long)]
    participant: Option<String>,

    /// Continue an interrupted session of `--participant`
    #[arg(long, requires = "participant")]
    resume: bool,

    /// Fixed seed for the trial order
    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    age: Option<u32>,

    #[arg(long)]
    sex: Option<String>,

    #[arg(long)]
    eye_color: Option<String>,

    #[arg(long)]
    eye_condition: Option<String>,
}

#[derive(Args, Debug)]
struct ShowcaseArgs {
    #[arg(long, default_value = "moving_circle")]
    target_type: TargetType,

    #[arg(long, default_value = "hor_right")]
    trajectory: Trajectory,

    /// deg/s
    #[arg(long, default_value_t = 10.0)]
    speed: f64,

    /// Run the tutorial trial first
    #[arg(long)]
    tutorial: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "smooth_pursuit=info,pursuit_experiment=info".into()),
        )
        .init();

    let mut config = if cli.config.exists() {
        Configuration::load(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?
    } else {
        warn!(path = %cli.config.display(), "settings file not found, using defaults");
        Configuration::default()
    };
    if cli.dummy {
        config.tracker.dummy_mode = true;
    }
    if !config.tracker.dummy_mode {
        bail!(
            "no tracker driver is built into this binary; set tracker.dummy_mode or pass --dummy"
        );
    }

    match cli.command.unwrap_or_else(|| Command::Run(RunArgs::default())) {
        Command::Calibrate => calibrate(&config),
        Command::Run(args) => {
            if let Some(seed) = args.seed {
                config.experiment.seed = Some(seed);
            }
            config.validate().context("invalid settings")?;
            let id = args
                .participant
                .clone()
                .unwrap_or_else(|| intake::participant_id(SystemTime::now()));
            let demographics =
                intake::demographics(args.age, args.sex, args.eye_color, args.eye_condition);
            let participant = ParticipantContext::new(id, &cli.data_dir, demographics);
            info!(participant = %participant.id, resume = args.resume, "participant intake");

            let summary = if cli.headless {
                let timer = ManualTimer::new();
                let runner = ExperimentRunner::prepare(
                    config.clone(),
                    participant,
                    DummyTracker::new(),
                    timer.clone(),
                    args.resume,
                )?;
                run_headless(runner, &config, timer)?
            } else {
                let timer = HighPrecisionTimer::new();
                let runner = ExperimentRunner::prepare(
                    config.clone(),
                    participant,
                    DummyTracker::new(),
                    timer.clone(),
                    args.resume,
                )?;
                App::new(runner, config, timer).run()?
            };
            report(&summary);
            Ok(())
        }
        Command::Showcase(args) => {
            config.experiment.tutorial.enabled = args.tutorial;
            config.validate().context("invalid settings")?;
            let spec = TrialSpec {
                target_type: args.target_type,
                speed_deg_s: args.speed,
                trajectory: args.trajectory,
                repetition: 0,
            };
            let participant = ParticipantContext::new(
                intake::participant_id(SystemTime::now()),
                cli.data_dir.join("showcase"),
                Default::default(),
            );
            participant.prepare(false)?;
            info!(%spec, participant = %participant.id, "showcase");

            let plan = TrialPlan::single(spec);
            let summary = if cli.headless {
                let timer = ManualTimer::new();
                let runner = ExperimentRunner::new(
                    config.clone(),
                    participant,
                    plan,
                    DummyTracker::new(),
                    timer.clone(),
                )?;
                run_headless(runner, &config, timer)?
            } else {
                let timer = HighPrecisionTimer::new();
                let runner = ExperimentRunner::new(
                    config.clone(),
                    participant,
                    plan,
                    DummyTracker::new(),
                    timer.clone(),
                )?;
                App::new(runner, config, timer).run()?
            };
            report(&summary);
            Ok(())
        }
    }
}

fn run_headless<T: Timer>(
    mut runner: ExperimentRunner<DummyTracker, T>,
    config: &Configuration,
    timer: T,
) -> Result<RunSummary> {
    let [w, h] = config.monitor.resolution;
    let mut renderer =
        OffscreenRenderer::new(w, h, &config.stimuli, config.monitor.refresh_rate_hz, timer)?;
    let summary = runner.run(&mut AutoAdvance::default(), &mut renderer)?;
    app::log_frame_stats(&renderer.stats());
    Ok(summary)
}

fn calibrate(config: &Configuration) -> Result<()> {
    let monitor = &config.monitor;
    let mut session = GazeSession::new(
        DummyTracker::new(),
        config.tracker.clone(),
        "calib.EDF",
        PathBuf::new(),
        (monitor.width_px(), monitor.height_px()),
    );
    session.connect()?;
    let result = session.calibrate();
    session.disconnect();
    match result {
        Ok(()) => {
            info!("calibration completed");
            Ok(())
        }
        Err(ExperimentError::CalibrationAborted) => {
            warn!("calibration aborted");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn report(summary: &RunSummary) {
    info!(
        participant = %summary.participant_id,
        completed = summary.completed,
        resumed = summary.resumed,
        planned = summary.planned,
        recalibrated = summary.recalibrated,
        dropped_frames = summary.dropped_frames,
        quit = summary.quit,
        "session summary"
    );
    if summary.quit {
        println!(
            "Session for {} stopped early after {} of {} trials.",
            summary.participant_id,
            summary.completed + summary.resumed,
            summary.planned
        );
    } else {
        println!(
            "Session for {} finished: {} of {} trials. Thank you!",
            summary.participant_id,
            summary.completed + summary.resumed,
            summary.planned
        );
    }
}
