use pursuit_core::{FrameTick, RenderError, Scene, StimulusRenderer, StimulusSettings};
use pursuit_timing::{FrameClock, FrameTimingStats, Timer};
use tiny_skia::Pixmap;

use crate::render::SkiaRenderer;

/// `StimulusRenderer` without a display: scenes are rasterized into memory
/// and frame timestamps come from `timer`. With pacing enabled each frame
/// waits for the next refresh deadline, which with a manual timer simply
/// advances the clock by one period.
pub struct OffscreenRenderer<T: Timer> {
    skia: SkiaRenderer,
    timer: T,
    clock: FrameClock,
    paced: bool,
}

impl<T: Timer> OffscreenRenderer<T> {
    pub fn new(
        width: u32,
        height: u32,
        settings: &StimulusSettings,
        refresh_rate_hz: f64,
        timer: T,
    ) -> Result<Self, RenderError> {
        Ok(Self {
            skia: SkiaRenderer::new(width, height, settings)?,
            timer,
            clock: FrameClock::new(refresh_rate_hz),
            paced: true,
        })
    }

    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    pub fn last_frame(&self) -> &Pixmap {
        self.skia.canvas()
    }

    pub fn stats(&self) -> FrameTimingStats {
        self.clock.stats()
    }
}

impl<T: Timer> StimulusRenderer for OffscreenRenderer<T> {
    fn present(&mut self, scene: &Scene<'_>) -> Result<FrameTick, RenderError> {
        self.skia.draw(scene);
        if self.paced {
            let wait = if self.clock.frames() == 0 {
                self.clock.nominal_period()
            } else {
                self.clock.time_to_next(self.timer.now())
            };
            self.timer.sleep(wait);
        }
        Ok(self.clock.tick(self.timer.now()))
    }
}
