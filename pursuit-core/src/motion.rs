use std::f64::consts::TAU;
use std::time::Duration;

use crate::geometry::{MonitorGeometry, Point};
use crate::stimulus::{TargetDrawing, TargetSettings};
use crate::trial::{TargetType, Trajectory, TrialSpec};

/// Pure kinematics of one trial's target: every position is a function of
/// the time elapsed since pursuit onset, so no frame state is carried.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetMotion {
    target_type: TargetType,
    trajectory: Trajectory,
    half_distance_px: f64,
    speed_px_s: f64,
    duration: Duration,
    jump_period: Option<Duration>,
    field_diameter_px: f64,
}

impl TargetMotion {
    pub fn new(spec: &TrialSpec, geometry: &MonitorGeometry, target: &TargetSettings) -> Self {
        let distance_px = geometry.deg_to_px(target.moving_distance_deg);
        let speed_px_s = geometry.deg_to_px(spec.speed_deg_s);
        let path_px = if spec.trajectory.is_circular() {
            // one revolution of radius distance/2
            TAU * distance_px * 0.5
        } else {
            distance_px
        };
        let seconds = if speed_px_s > 0.0 {
            (path_px / speed_px_s).min(target.max_seconds)
        } else {
            0.0
        };
        let duration = if seconds.is_finite() && seconds > 0.0 {
            Duration::from_secs_f64(seconds)
        } else {
            Duration::ZERO
        };
        let jump_period = (target.jumps_per_second > 0.0)
            .then(|| Duration::from_secs_f64(1.0 / target.jumps_per_second));

        Self {
            target_type: spec.target_type,
            trajectory: spec.trajectory,
            half_distance_px: distance_px * 0.5,
            speed_px_s,
            duration,
            jump_period,
            field_diameter_px: f64::from(target.radius_px) * 2.0,
        }
    }

    /// Scheduled motion time, excluding the final fixation hold.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Continuous position along the trajectory, clamped to the motion window.
    pub fn path_position(&self, elapsed: Duration) -> Point {
        let t = elapsed.min(self.duration).as_secs_f64();
        let travelled = self.speed_px_s * t;
        let half = self.half_distance_px;
        match self.trajectory.axis_step() {
            Some((dx, dy)) => {
                let s = travelled - half;
                Point::new((dx * s) as f32, (dy * s) as f32)
            }
            None => {
                let theta = if half > 0.0 { travelled / half } else { 0.0 };
                let (sin, cos) = theta.sin_cos();
                match self.trajectory {
                    Trajectory::CirClock => Point::new((-half * cos) as f32, (half * sin) as f32),
                    _ => Point::new((half * cos) as f32, (half * sin) as f32),
                }
            }
        }
    }

    /// Direction of motion at `elapsed`. Diagonals keep their per-axis
    /// components at full magnitude, circles use the unit tangent.
    fn heading(&self, elapsed: Duration) -> (f64, f64) {
        match self.trajectory.axis_step() {
            Some(step) => step,
            None => {
                let t = elapsed.min(self.duration).as_secs_f64();
                let half = self.half_distance_px;
                let theta = if half > 0.0 { self.speed_px_s * t / half } else { 0.0 };
                let (sin, cos) = theta.sin_cos();
                match self.trajectory {
                    Trajectory::CirClock => (sin, cos),
                    _ => (-sin, cos),
                }
            }
        }
    }

    /// Start of the most recent jump, or `elapsed` itself for targets that
    /// never jump. Past the motion window this is the end of motion, which
    /// is the final update shown before the hold.
    fn last_jump(&self, elapsed: Duration) -> (u64, Duration) {
        if elapsed >= self.duration {
            let jumps = self.jump_index(self.duration);
            return (jumps, self.duration);
        }
        match self.jump_period {
            Some(period) => {
                let k = self.jump_index(elapsed);
                (k, period * k as u32)
            }
            None => (0, elapsed),
        }
    }

    fn jump_index(&self, elapsed: Duration) -> u64 {
        match self.jump_period {
            Some(period) if !period.is_zero() => {
                (elapsed.as_nanos() / period.as_nanos()) as u64
            }
            _ => 0,
        }
    }

    pub fn drawing_at(&self, elapsed: Duration) -> TargetDrawing {
        match self.target_type {
            TargetType::MovingCircle => TargetDrawing::Circle {
                center: self.path_position(elapsed),
            },
            TargetType::JumpingCircle => {
                let (_, at) = self.last_jump(elapsed);
                TargetDrawing::Circle {
                    center: self.path_position(at),
                }
            }
            TargetType::BackAndForthArray => {
                let field = self.path_position(elapsed);
                let (k, at) = self.last_jump(elapsed);
                let (hx, hy) = self.heading(at);
                // even jumps sit behind the field, odd jumps ahead of it
                let sign = if k % 2 == 0 { -1.0 } else { 1.0 };
                let d = self.field_diameter_px * sign;
                TargetDrawing::Element {
                    field,
                    center: field.offset((hx * d) as f32, (hy * d) as f32),
                }
            }
        }
    }

    /// Visible target position at `elapsed`.
    pub fn position_at(&self, elapsed: Duration) -> Point {
        self.drawing_at(elapsed).center()
    }

    pub fn start(&self) -> Point {
        self.position_at(Duration::ZERO)
    }

    pub fn end(&self) -> Point {
        self.position_at(self.duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(target_type: TargetType, trajectory: Trajectory, speed: f64) -> TrialSpec {
        TrialSpec {
            target_type,
            speed_deg_s: speed,
            trajectory,
            repetition: 0,
        }
    }

    fn motion(target_type: TargetType, trajectory: Trajectory, speed: f64) -> TargetMotion {
        TargetMotion::new(
            &spec(target_type, trajectory, speed),
            &MonitorGeometry::default(),
            &TargetSettings::default(),
        )
    }

    fn close(a: Point, b: Point) -> bool {
        a.distance(b) < 0.05
    }

    #[test]
    fn linear_motion_spans_the_configured_distance() {
        let m = motion(TargetType::MovingCircle, Trajectory::HorRight, 10.0);
        let half = MonitorGeometry::default().deg_to_px(20.0) as f32 * 0.5;
        assert!((m.duration().as_secs_f64() - 2.0).abs() < 1e-6);
        assert!(close(m.start(), Point::new(-half, 0.0)));
        assert!(close(m.end(), Point::new(half, 0.0)));
        assert!(close(m.position_at(Duration::from_secs(1)), Point::ORIGIN));
        // clamped after the motion window
        assert_eq!(m.position_at(Duration::from_secs(5)), m.end());
    }

    #[test]
    fn slow_targets_are_capped_at_max_seconds() {
        let m = motion(TargetType::MovingCircle, Trajectory::VerDown, 1.0);
        assert_eq!(m.duration(), Duration::from_secs(10));
        // half the distance covered in the capped window
        assert!(close(m.end(), Point::ORIGIN));
    }

    #[test]
    fn diagonals_move_both_axes_at_full_speed() {
        let m = motion(TargetType::MovingCircle, Trajectory::DiagUpLeft, 10.0);
        let s = m.start();
        assert!(s.x > 0.0 && s.y < 0.0);
        assert!((s.x + s.y).abs() < 1e-3);
        let e = m.end();
        assert!(close(e, Point::new(-s.x, -s.y)));
    }

    #[test]
    fn circles_start_on_the_horizontal_axis_and_turn_the_right_way() {
        let half = MonitorGeometry::default().deg_to_px(20.0) as f32 * 0.5;
        let cw = motion(TargetType::MovingCircle, Trajectory::CirClock, 10.0);
        assert!(close(cw.start(), Point::new(-half, 0.0)));
        let quarter = cw.duration() / 4;
        assert!(close(cw.position_at(quarter), Point::new(0.0, half)));
        assert!(close(cw.end(), cw.start()));

        let ccw = motion(TargetType::MovingCircle, Trajectory::CirCounter, 10.0);
        assert!(close(ccw.start(), Point::new(half, 0.0)));
        assert!(close(ccw.position_at(ccw.duration() / 4), Point::new(0.0, half)));
    }

    #[test]
    fn jumping_target_holds_between_jumps() {
        let m = motion(TargetType::JumpingCircle, Trajectory::HorLeft, 10.0);
        let a = m.position_at(Duration::from_millis(10));
        let b = m.position_at(Duration::from_millis(240));
        assert_eq!(a, m.start());
        assert_eq!(a, b);
        let c = m.position_at(Duration::from_millis(260));
        assert!(c.x < a.x);
        assert_eq!(m.position_at(m.duration()), m.path_position(m.duration()));
    }

    #[test]
    fn back_and_forth_element_alternates_around_the_field() {
        let m = motion(TargetType::BackAndForthArray, Trajectory::HorRight, 10.0);
        let diameter = TargetSettings::default().radius_px * 2.0;
        match m.drawing_at(Duration::from_millis(100)) {
            TargetDrawing::Element { field, center } => {
                assert!((center.x - (field.x - diameter)).abs() < 1e-3);
            }
            other => panic!("unexpected drawing {other:?}"),
        }
        match m.drawing_at(Duration::from_millis(300)) {
            TargetDrawing::Element { field, center } => {
                assert!((center.x - (field.x + diameter)).abs() < 1e-3);
            }
            other => panic!("unexpected drawing {other:?}"),
        }
    }
}
