use crate::color::Rgb;
use crate::config::PointerConfig;
use crate::vec2::Vec2;
use std::collections::VecDeque;

pub const MOUSE_ID: i64 = -1;

/// Raw input position in surface pixels (y down) with its timestamp.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointerSample {
    pub position: Vec2,
    pub timestamp_ms: f64,
}

/// Movement produced by one sub-point of a drag.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Stroke {
    pub texcoord: Vec2,
    pub delta: Vec2,
    /// `min(|velocity| * velocity_boost, 1)` at the time of the sub-point.
    pub boost: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Pointer {
    pub id: i64,
    pub texcoord: Vec2,
    pub prev_texcoord: Vec2,
    pub delta: Vec2,
    /// Smoothed speed in pixels per second.
    pub velocity: Vec2,
    pub down: bool,
    pub moved: bool,
    pub color: Rgb,
    history: VecDeque<PointerSample>,
}

fn surface_aspect((width, height): (u32, u32)) -> f32 {
    width.max(1) as f32 / height.max(1) as f32
}

/// Pixel position to texture coordinate, flipping y so that 0 is the bottom.
pub fn texcoord(position: Vec2, (width, height): (u32, u32)) -> Vec2 {
    Vec2::new(
        position.x / width.max(1) as f32,
        1.0 - position.y / height.max(1) as f32,
    )
}

/// Scales a texture-space delta so equal screen distances give equal
/// deltas on both axes.
pub fn correct_delta(delta: Vec2, aspect: f32) -> Vec2 {
    let mut out = delta;
    if aspect < 1.0 {
        out.x *= aspect;
    }
    if aspect > 1.0 {
        out.y /= aspect;
    }
    out
}

fn raw_velocity(history: &VecDeque<PointerSample>, now_ms: f64) -> Vec2 {
    let (Some(oldest), Some(newest)) = (history.front(), history.back()) else {
        return Vec2::zero();
    };
    if history.len() < 2 {
        return Vec2::zero();
    }
    let dt = ((now_ms - oldest.timestamp_ms) / 1000.0) as f32;
    if dt <= 0.0 {
        return Vec2::zero();
    }
    newest.position.sub(oldest.position).scale(1.0 / dt)
}

impl Pointer {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            texcoord: Vec2::zero(),
            prev_texcoord: Vec2::zero(),
            delta: Vec2::zero(),
            velocity: Vec2::zero(),
            down: false,
            moved: false,
            color: Rgb::default(),
            history: VecDeque::new(),
        }
    }

    pub fn history(&self) -> impl Iterator<Item = &PointerSample> {
        self.history.iter()
    }

    pub fn boost(&self, velocity_boost: f32) -> f32 {
        (self.velocity.length() * velocity_boost).min(1.0)
    }

    pub fn press(
        &mut self,
        id: i64,
        position: Vec2,
        surface: (u32, u32),
        timestamp_ms: f64,
        color: Rgb,
    ) {
        self.id = id;
        self.down = true;
        self.moved = false;
        self.texcoord = texcoord(position, surface);
        self.prev_texcoord = self.texcoord;
        self.delta = Vec2::zero();
        self.velocity = Vec2::zero();
        self.color = color;
        self.history.clear();
        self.history.push_back(PointerSample {
            position,
            timestamp_ms,
        });
    }

    /// Moves the pointer to `position`, splitting fast motion into evenly
    /// spaced sub-points. Returns one stroke per sub-point that moved.
    pub fn drag(
        &mut self,
        position: Vec2,
        surface: (u32, u32),
        timestamp_ms: f64,
        config: &PointerConfig,
    ) -> Vec<Stroke> {
        let targets: Vec<Vec2> = match self.history.back() {
            Some(last)
                if self.history.len() >= 2
                    && last.position.sub(position).length() >= config.min_distance =>
            {
                let from = last.position;
                let steps = config.interpolation_steps.max(1);
                (1..=steps)
                    .map(|i| from.lerp(position, i as f32 / steps as f32))
                    .collect()
            }
            _ => vec![position],
        };

        let aspect = surface_aspect(surface);
        let mut strokes = Vec::new();
        for target in targets {
            self.history.push_back(PointerSample {
                position: target,
                timestamp_ms,
            });
            while self.history.len() > config.max_points {
                self.history.pop_front();
            }
            let raw = raw_velocity(&self.history, timestamp_ms);
            self.velocity = self
                .velocity
                .add(raw.sub(self.velocity).scale(config.velocity_smoothing));

            self.prev_texcoord = self.texcoord;
            self.texcoord = texcoord(target, surface);
            self.delta = correct_delta(self.texcoord.sub(self.prev_texcoord), aspect);
            if !self.delta.is_zero() {
                self.moved = true;
                strokes.push(Stroke {
                    texcoord: self.texcoord,
                    delta: self.delta,
                    boost: self.boost(config.velocity_boost),
                });
            }
        }
        strokes
    }

    pub fn release(&mut self) {
        self.down = false;
        self.velocity = Vec2::zero();
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f32, b: f32, tol: f32) {
        assert!(
            (a - b).abs() <= tol,
            "expected {a} to be within {tol} of {b}"
        );
    }

    const SURFACE: (u32, u32) = (1000, 500);

    #[test]
    fn texcoord_flips_y() {
        let uv = texcoord(Vec2::new(250.0, 100.0), SURFACE);
        assert_close(uv.x, 0.25, 1e-6);
        assert_close(uv.y, 0.8, 1e-6);
    }

    #[test]
    fn delta_correction_by_orientation() {
        let d = Vec2::new(0.1, 0.1);
        assert_eq!(correct_delta(d, 2.0), Vec2::new(0.1, 0.05));
        assert_eq!(correct_delta(d, 0.5), Vec2::new(0.05, 0.1));
        assert_eq!(correct_delta(d, 1.0), d);
    }

    #[test]
    fn press_resets_state() {
        let mut pointer = Pointer::new(MOUSE_ID);
        pointer.velocity = Vec2::new(5.0, 5.0);
        pointer.press(3, Vec2::new(500.0, 250.0), SURFACE, 10.0, Rgb::gray(0.1));
        assert!(pointer.down && !pointer.moved);
        assert_eq!(pointer.id, 3);
        assert_eq!(pointer.texcoord, pointer.prev_texcoord);
        assert_eq!(pointer.velocity, Vec2::zero());
        assert_eq!(pointer.history().count(), 1);
    }

    #[test]
    fn slow_move_is_a_single_stroke() {
        let config = PointerConfig::default();
        let mut pointer = Pointer::new(MOUSE_ID);
        pointer.press(MOUSE_ID, Vec2::new(100.0, 100.0), SURFACE, 0.0, Rgb::default());
        let strokes = pointer.drag(Vec2::new(110.0, 100.0), SURFACE, 16.0, &config);
        assert_eq!(strokes.len(), 1);
        assert!(pointer.moved);
        // Raw velocity 10px / 16ms, smoothed from zero.
        assert_close(pointer.velocity.x, 625.0 * 0.3, 1e-2);
        assert_close(strokes[0].delta.x, 0.01, 1e-6);
        assert_close(strokes[0].delta.y, 0.0, 1e-6);
    }

    #[test]
    fn fast_move_is_interpolated() {
        let config = PointerConfig::default();
        let mut pointer = Pointer::new(MOUSE_ID);
        pointer.press(MOUSE_ID, Vec2::new(0.0, 0.0), SURFACE, 0.0, Rgb::default());
        pointer.drag(Vec2::new(2.0, 0.0), SURFACE, 10.0, &config);
        let strokes = pointer.drag(Vec2::new(102.0, 0.0), SURFACE, 20.0, &config);
        assert_eq!(strokes.len(), config.interpolation_steps);
        let last = strokes.last().unwrap();
        assert_close(last.texcoord.x, 0.102, 1e-6);
        assert_close(strokes[0].texcoord.x, 0.022, 1e-6);
        assert_eq!(pointer.history().count(), config.max_points);
    }

    #[test]
    fn stationary_move_does_not_stroke() {
        let config = PointerConfig::default();
        let mut pointer = Pointer::new(MOUSE_ID);
        pointer.press(MOUSE_ID, Vec2::new(40.0, 40.0), SURFACE, 0.0, Rgb::default());
        assert!(pointer.drag(Vec2::new(40.0, 40.0), SURFACE, 5.0, &config).is_empty());
        assert!(!pointer.moved);
    }

    #[test]
    fn boost_saturates() {
        let mut pointer = Pointer::new(MOUSE_ID);
        pointer.velocity = Vec2::new(3000.0, 4000.0);
        assert_close(pointer.boost(0.0001), 0.5, 1e-6);
        pointer.velocity = Vec2::new(30_000.0, 0.0);
        assert_eq!(pointer.boost(0.0001), 1.0);
    }

    #[test]
    fn release_keeps_position() {
        let mut pointer = Pointer::new(MOUSE_ID);
        pointer.press(MOUSE_ID, Vec2::new(10.0, 10.0), SURFACE, 0.0, Rgb::default());
        let at = pointer.texcoord;
        pointer.release();
        assert!(!pointer.down);
        assert_eq!(pointer.texcoord, at);
        assert_eq!(pointer.history().count(), 0);
    }
}
