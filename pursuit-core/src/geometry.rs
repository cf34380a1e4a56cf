use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Screen position in pixels, origin at the screen centre, y pointing up.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: Point) -> f32 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn offset(&self, dx: f32, dy: f32) -> Point {
        Point::new(self.x + dx, self.y + dy)
    }
}

/// Physical monitor set-up used to convert visual angle into pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorGeometry {
    pub width_cm: f64,
    pub height_cm: f64,
    pub resolution: [u32; 2],
    pub distance_cm: f64,
    pub refresh_rate_hz: f64,
}

impl Default for MonitorGeometry {
    fn default() -> Self {
        Self {
            width_cm: 53.0,
            height_cm: 30.0,
            resolution: [1920, 1080],
            distance_cm: 60.0,
            refresh_rate_hz: 60.0,
        }
    }
}

impl MonitorGeometry {
    pub fn width_px(&self) -> u32 {
        self.resolution[0]
    }

    pub fn height_px(&self) -> u32 {
        self.resolution[1]
    }

    /// Visual angle subtended by half the screen height.
    fn half_height_deg(&self) -> f64 {
        (0.5 * self.height_cm).atan2(self.distance_cm).to_degrees()
    }

    pub fn deg_to_px(&self, deg: f64) -> f64 {
        deg / self.half_height_deg() * (0.5 * f64::from(self.height_px()))
    }

    pub fn px_to_deg(&self, px: f64) -> f64 {
        px / (0.5 * f64::from(self.height_px())) * self.half_height_deg()
    }

    pub fn frame_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.refresh_rate_hz)
    }
}
