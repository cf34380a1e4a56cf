use std::path::PathBuf;

use pursuit_timing::FrameTick;
use serde::{Deserialize, Serialize};

use crate::geometry::Point;
use crate::trial::Trajectory;

pub type Rgba = [u8; 4];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetSettings {
    pub radius_px: f32,
    pub fill_color: Rgba,
    pub line_color: Rgba,
    /// Radius of the single flicking element of a back-and-forth array.
    pub element_radius_px: f32,
    /// Path length of linear trajectories, diameter of circular ones.
    pub moving_distance_deg: f64,
    pub max_seconds: f64,
    pub jumps_per_second: f64,
    /// How long the target stays at its end position while still recording.
    pub final_fixation_ms: u64,
}

impl Default for TargetSettings {
    fn default() -> Self {
        Self {
            radius_px: 15.0,
            fill_color: [255, 255, 255, 255],
            line_color: [255, 255, 255, 255],
            element_radius_px: 15.0,
            moving_distance_deg: 20.0,
            max_seconds: 10.0,
            jumps_per_second: 4.0,
            final_fixation_ms: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CueSettings {
    pub length_px: f32,
    pub line_width: f32,
    /// Gap between the target centre and the arrow tail.
    pub offset_px: f32,
    pub color: Rgba,
}

impl Default for CueSettings {
    fn default() -> Self {
        Self {
            length_px: 100.0,
            line_width: 4.0,
            offset_px: 50.0,
            color: [255, 255, 255, 255],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextSettings {
    pub size_px: f32,
    pub color: Rgba,
    /// TrueType/OpenType font; text is skipped when unset or unreadable.
    pub font_path: Option<PathBuf>,
    /// Vertical offset of instruction text from the screen centre (y up).
    pub y_px: f32,
}

impl Default for TextSettings {
    fn default() -> Self {
        Self {
            size_px: 32.0,
            color: [255, 255, 255, 255],
            font_path: None,
            y_px: 300.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StimulusSettings {
    pub background: Rgba,
    pub target: TargetSettings,
    pub cue: CueSettings,
    pub text: TextSettings,
}

impl Default for StimulusSettings {
    fn default() -> Self {
        Self {
            background: [128, 128, 128, 255],
            target: TargetSettings::default(),
            cue: CueSettings::default(),
            text: TextSettings::default(),
        }
    }
}

/// What the target looks like on one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TargetDrawing {
    Circle { center: Point },
    /// Back-and-forth array: the invisible field and its one visible element.
    Element { field: Point, center: Point },
}

impl TargetDrawing {
    /// Where the eye should be: the visible disc.
    pub fn center(&self) -> Point {
        match self {
            Self::Circle { center } | Self::Element { center, .. } => *center,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionCue {
    pub origin: Point,
    pub trajectory: Trajectory,
}

/// Everything drawn on one frame. Renderers draw the background, then the
/// target, cue and text when present.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Scene<'a> {
    pub target: Option<TargetDrawing>,
    pub cue: Option<DirectionCue>,
    pub text: Option<&'a str>,
}

impl<'a> Scene<'a> {
    pub fn blank() -> Self {
        Self::default()
    }

    pub fn with_target(mut self, target: TargetDrawing) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_cue(mut self, cue: DirectionCue) -> Self {
        self.cue = Some(cue);
        self
    }

    pub fn with_text(mut self, text: &'a str) -> Self {
        self.text = Some(text);
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("render surface unavailable: {0}")]
    Surface(String),
    #[error("frame presentation failed: {0}")]
    Present(String),
}

/// Display capability consumed by the trial controller. `present` blocks
/// until the frame is shown and reports when that actually happened.
pub trait StimulusRenderer {
    fn present(&mut self, scene: &Scene<'_>) -> Result<FrameTick, RenderError>;
}
