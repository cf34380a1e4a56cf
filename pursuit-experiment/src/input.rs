use pursuit_core::TrialPhase;

/// Experimenter/participant commands, already mapped from raw keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Input {
    Advance,
    Quit,
    Recalibrate,
}

/// What an input source can see when it is polled once per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputContext {
    pub trial_index: usize,
    pub tutorial: bool,
    pub phase: TrialPhase,
    /// Frames presented by the runner so far.
    pub frame: u64,
}

pub trait InputSource {
    /// Inputs that arrived since the previous poll, in arrival order.
    fn poll(&mut self, ctx: &InputContext) -> Vec<Input>;
}

impl<F> InputSource for F
where
    F: FnMut(&InputContext) -> Vec<Input>,
{
    fn poll(&mut self, ctx: &InputContext) -> Vec<Input> {
        self(ctx)
    }
}

/// Presses advance after a phase that waits for it has been shown for
/// `delay_frames`. Used for headless runs.
#[derive(Debug, Clone)]
pub struct AutoAdvance {
    delay_frames: u64,
    waiting: Option<(usize, TrialPhase, u64)>,
}

impl AutoAdvance {
    pub fn new(delay_frames: u64) -> Self {
        Self {
            delay_frames,
            waiting: None,
        }
    }
}

impl Default for AutoAdvance {
    fn default() -> Self {
        Self::new(1)
    }
}

impl InputSource for AutoAdvance {
    fn poll(&mut self, ctx: &InputContext) -> Vec<Input> {
        if !ctx.phase.awaits_advance() {
            self.waiting = None;
            return Vec::new();
        }
        match self.waiting {
            Some((trial, phase, since)) if trial == ctx.trial_index && phase == ctx.phase => {
                if ctx.frame.saturating_sub(since) >= self.delay_frames {
                    self.waiting = None;
                    vec![Input::Advance]
                } else {
                    Vec::new()
                }
            }
            _ => {
                self.waiting = Some((ctx.trial_index, ctx.phase, ctx.frame));
                if self.delay_frames == 0 {
                    self.waiting = None;
                    vec![Input::Advance]
                } else {
                    Vec::new()
                }
            }
        }
    }
}
