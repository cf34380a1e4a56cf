pub mod frame;
pub mod timer;

pub use frame::{FrameClock, FrameTick, FrameTimingStats};
pub use timer::{HighPrecisionTimer, ManualTimer, Timer};
