use std::sync::Arc;

use anyhow::{Result, anyhow};
use pixels::{Pixels, SurfaceTexture};
use pursuit_core::{FrameTick, RenderError, Scene, StimulusRenderer};
use pursuit_experiment::{
    Configuration, ExperimentRunner, Input, RunSummary, RunnerStatus, Tracker,
};
use pursuit_render::SkiaRenderer;
use pursuit_timing::{FrameClock, FrameTimingStats, HighPrecisionTimer, Timer};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::Key,
    window::{Fullscreen, Window, WindowId},
};

/// Fullscreen pixels surface fed by the software rasterizer. The timestamp
/// of a frame is taken right after the swap returns.
struct WindowPresenter {
    pixels: Pixels<'static>,
    skia: SkiaRenderer,
    clock: FrameClock,
    timer: HighPrecisionTimer,
}

impl WindowPresenter {
    fn resize(&mut self, size: PhysicalSize<u32>) -> Result<()> {
        self.pixels.resize_surface(size.width, size.height)?;
        self.pixels.resize_buffer(size.width, size.height)?;
        self.skia.resize(size.width, size.height)?;
        Ok(())
    }
}

impl StimulusRenderer for WindowPresenter {
    fn present(&mut self, scene: &Scene<'_>) -> Result<FrameTick, RenderError> {
        self.skia.draw(scene);
        self.skia.copy_to(self.pixels.frame_mut())?;
        self.pixels
            .render()
            .map_err(|e| RenderError::Present(e.to_string()))?;
        Ok(self.clock.tick(self.timer.now()))
    }
}

/// Lower-case key name as used in the `controls` settings.
fn key_name(event: &KeyEvent) -> Option<String> {
    match &event.logical_key {
        Key::Named(named) => Some(format!("{named:?}").to_ascii_lowercase()),
        Key::Character(c) => Some(c.as_str().to_lowercase()),
        _ => None,
    }
}

pub struct App<B: Tracker> {
    runner: ExperimentRunner<B, HighPrecisionTimer>,
    config: Configuration,
    timer: HighPrecisionTimer,
    window: Option<Arc<Window>>,
    presenter: Option<WindowPresenter>,
    inputs: Vec<Input>,
    outcome: Option<Result<RunSummary>>,
}

impl<B: Tracker> App<B> {
    pub fn new(
        runner: ExperimentRunner<B, HighPrecisionTimer>,
        config: Configuration,
        timer: HighPrecisionTimer,
    ) -> Self {
        Self {
            runner,
            config,
            timer,
            window: None,
            presenter: None,
            inputs: Vec::new(),
            outcome: None,
        }
    }

    /// Runs the event loop until the experiment finishes, is quit, or the
    /// window is closed.
    pub fn run(mut self) -> Result<RunSummary> {
        let event_loop = EventLoop::new()?;
        event_loop.run_app(&mut self)?;
        if let Some(presenter) = &self.presenter {
            log_frame_stats(&presenter.clock.stats());
        }
        match self.outcome.take() {
            Some(outcome) => outcome,
            None => Ok(self.runner.finish()?),
        }
    }

    fn create_window_and_surface(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let monitor = event_loop
            .primary_monitor()
            .or_else(|| event_loop.available_monitors().next())
            .ok_or_else(|| anyhow!("no monitor available"))?;

        let configured_hz = self.config.monitor.refresh_rate_hz;
        let refresh_hz = match monitor.refresh_rate_millihertz() {
            Some(mhz) => {
                let hz = f64::from(mhz) / 1000.0;
                if (hz - configured_hz).abs() > 1.0 {
                    tracing::warn!(display = hz, configured = configured_hz, "refresh rate mismatch");
                }
                hz
            }
            None => configured_hz,
        };

        let attributes = Window::default_attributes()
            .with_title(self.config.experiment.name.clone())
            .with_fullscreen(Some(Fullscreen::Borderless(Some(monitor))))
            .with_resizable(false);
        let window = Arc::new(event_loop.create_window(attributes)?);
        let size = window.inner_size();

        let [w, h] = self.config.monitor.resolution;
        if (size.width, size.height) != (w, h) {
            tracing::warn!(
                window = %format!("{}x{}", size.width, size.height),
                configured = %format!("{w}x{h}"),
                "window size differs from configured resolution"
            );
        }
        tracing::info!(
            width = size.width,
            height = size.height,
            scale = window.scale_factor(),
            refresh_hz,
            "display ready"
        );

        let surface = SurfaceTexture::new(size.width, size.height, window.clone());
        let pixels = Pixels::new(size.width, size.height, surface)?;
        let skia = SkiaRenderer::new(size.width, size.height, &self.config.stimuli)?;
        self.presenter = Some(WindowPresenter {
            pixels,
            skia,
            clock: FrameClock::new(refresh_hz),
            timer: self.timer.clone(),
        });

        window.set_cursor_visible(false);
        window.request_redraw();
        self.window = Some(window);
        Ok(())
    }

    fn frame(&mut self, event_loop: &ActiveEventLoop) {
        let Some(presenter) = self.presenter.as_mut() else {
            return;
        };
        let inputs = std::mem::take(&mut self.inputs);
        match self.runner.tick(&inputs, presenter) {
            Ok(RunnerStatus::Running) => {
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            Ok(RunnerStatus::Finished(summary)) => self.exit(event_loop, Ok(summary)),
            Err(e) => self.exit(event_loop, Err(e.into())),
        }
    }

    fn handle_key(&mut self, event: &KeyEvent) {
        if event.repeat {
            return;
        }
        let Some(name) = key_name(event) else {
            return;
        };
        match self.config.controls.input_for(&name) {
            Some(input) => self.inputs.push(input),
            None => tracing::trace!(key = %name, "unmapped key"),
        }
    }

    fn handle_resize(&mut self, size: PhysicalSize<u32>) {
        if let Some(presenter) = &mut self.presenter {
            if let Err(e) = presenter.resize(size) {
                tracing::error!(error = %e, "failed to resize surface");
            }
        }
        tracing::info!(width = size.width, height = size.height, "display resized");
    }

    fn exit(&mut self, event_loop: &ActiveEventLoop, outcome: Result<RunSummary>) {
        if let Some(window) = &self.window {
            window.set_cursor_visible(true);
        }
        self.outcome.get_or_insert(outcome);
        event_loop.exit();
    }
}

impl<B: Tracker> ApplicationHandler for App<B> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.create_window_and_surface(event_loop) {
                if let Err(finish) = self.runner.finish() {
                    tracing::error!(error = %finish, "finalize after display failure");
                }
                self.exit(event_loop, Err(e.context("failed to open the stimulus window")));
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        if self.outcome.is_some() {
            return;
        }
        match event {
            WindowEvent::CloseRequested => {
                tracing::warn!("window closed, ending the session");
                let outcome = self.runner.finish().map_err(Into::into);
                self.exit(event_loop, outcome);
            }
            WindowEvent::RedrawRequested => self.frame(event_loop),
            WindowEvent::KeyboardInput { event, .. } if event.state.is_pressed() => {
                self.handle_key(&event);
            }
            WindowEvent::Resized(size) => self.handle_resize(size),
            WindowEvent::ScaleFactorChanged { .. } => {
                if let Some(window) = &self.window {
                    self.handle_resize(window.inner_size());
                }
            }
            _ => {}
        }
    }
}

pub fn log_frame_stats(stats: &FrameTimingStats) {
    tracing::info!(
        frames = stats.frames,
        dropped = stats.dropped_frames,
        mean_ms = stats.average_frame_time_ns / 1e6,
        jitter_ms = stats.jitter_ns / 1e6,
        fps = stats.effective_fps,
        "frame timing"
    );
}
