use std::time::Duration;

/// Achieved presentation time of one rendered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameTick {
    pub index: u64,
    pub timestamp_ns: u64,
    /// Time since the previous presented frame, 0 for the first one.
    pub interval_ns: u64,
    /// Refresh periods missed between this frame and the previous one.
    pub dropped: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameTimingStats {
    pub average_frame_time_ns: f64,
    pub jitter_ns: f64,
    pub min_frame_time_ns: f64,
    pub max_frame_time_ns: f64,
    pub effective_fps: f64,
    pub frames: u64,
    pub dropped_frames: u64,
}

/// Turns achieved presentation timestamps into `FrameTick`s and keeps a
/// rolling window of frame intervals for the end-of-run timing report.
#[derive(Debug, Clone)]
pub struct FrameClock {
    nominal_ns: u64,
    last_ns: Option<u64>,
    next_index: u64,
    dropped_total: u64,
    intervals: Vec<Duration>,
    max_samples: usize,
}

impl FrameClock {
    pub fn new(refresh_rate_hz: f64) -> Self {
        let nominal_ns = if refresh_rate_hz > 0.0 {
            (1e9 / refresh_rate_hz).round() as u64
        } else {
            0
        };
        Self {
            nominal_ns,
            last_ns: None,
            next_index: 0,
            dropped_total: 0,
            intervals: Vec::with_capacity(1000),
            max_samples: 1000,
        }
    }

    pub fn nominal_period(&self) -> Duration {
        Duration::from_nanos(self.nominal_ns)
    }

    /// Registers a frame presented at `timestamp_ns`.
    pub fn tick(&mut self, timestamp_ns: u64) -> FrameTick {
        let interval_ns = self
            .last_ns
            .map_or(0, |last| timestamp_ns.saturating_sub(last));
        let dropped = self.missed_periods(interval_ns);

        if self.last_ns.is_some() {
            if self.intervals.len() >= self.max_samples {
                self.intervals.remove(0);
            }
            self.intervals.push(Duration::from_nanos(interval_ns));
        }
        if dropped > 0 {
            tracing::debug!(
                frame = self.next_index,
                interval_ms = interval_ns as f64 / 1e6,
                dropped,
                "frame deadline missed"
            );
        }

        let tick = FrameTick {
            index: self.next_index,
            timestamp_ns,
            interval_ns,
            dropped,
        };
        self.last_ns = Some(timestamp_ns);
        self.next_index += 1;
        self.dropped_total += u64::from(dropped);
        tick
    }

    fn missed_periods(&self, interval_ns: u64) -> u32 {
        if self.nominal_ns == 0 || interval_ns * 2 <= self.nominal_ns * 3 {
            return 0;
        }
        let periods = (interval_ns as f64 / self.nominal_ns as f64).round() as u32;
        periods.saturating_sub(1).max(1)
    }

    /// Time until the next refresh deadline measured from `now_ns`.
    pub fn time_to_next(&self, now_ns: u64) -> Duration {
        match self.last_ns {
            Some(last) => {
                Duration::from_nanos((last + self.nominal_ns).saturating_sub(now_ns))
            }
            None => Duration::ZERO,
        }
    }

    pub fn frames(&self) -> u64 {
        self.next_index
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_total
    }

    pub fn stats(&self) -> FrameTimingStats {
        let times: Vec<f64> = self
            .intervals
            .iter()
            .map(|d| d.as_nanos() as f64)
            .collect();
        if times.is_empty() {
            return FrameTimingStats {
                average_frame_time_ns: 0.0,
                jitter_ns: 0.0,
                min_frame_time_ns: 0.0,
                max_frame_time_ns: 0.0,
                effective_fps: 0.0,
                frames: self.next_index,
                dropped_frames: self.dropped_total,
            };
        }
        let avg = times.iter().sum::<f64>() / times.len() as f64;
        let var = times.iter().map(|x| (x - avg).powi(2)).sum::<f64>() / times.len() as f64;
        let min = times.iter().copied().fold(f64::INFINITY, f64::min);
        let max = times.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        FrameTimingStats {
            average_frame_time_ns: avg,
            jitter_ns: var.sqrt(),
            min_frame_time_ns: min,
            max_frame_time_ns: max,
            effective_fps: if avg > 0.0 { 1e9 / avg } else { 0.0 },
            frames: self.next_index,
            dropped_frames: self.dropped_total,
        }
    }
}
