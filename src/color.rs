use crate::config::ColorMode;
use rand::Rng;
use serde::{Deserialize, Serialize};

const MONOCHROME_LEVEL: f32 = 200.0 / 255.0 * 0.02;
const COLORFUL_INTENSITY: f32 = 0.15;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Rgb {
    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    pub const fn gray(level: f32) -> Self {
        Self::new(level, level, level)
    }

    pub fn scale(self, s: f32) -> Self {
        Self::new(self.r * s, self.g * s, self.b * s)
    }

    /// 0..=255 channel values to 0..=1.
    pub fn normalized(self) -> Self {
        self.scale(1.0 / 255.0)
    }

    pub fn to_array(self) -> [f32; 3] {
        [self.r, self.g, self.b]
    }
}

/// `h`, `s`, `v` in 0..=1.
pub fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb {
    let i = (h * 6.0).floor();
    let f = h * 6.0 - i;
    let p = v * (1.0 - s);
    let q = v * (1.0 - f * s);
    let t = v * (1.0 - (1.0 - f) * s);
    match (i as i32).rem_euclid(6) {
        0 => Rgb::new(v, t, p),
        1 => Rgb::new(q, v, p),
        2 => Rgb::new(p, v, t),
        3 => Rgb::new(p, q, v),
        4 => Rgb::new(t, p, v),
        _ => Rgb::new(v, p, q),
    }
}

pub fn generate_color(mode: ColorMode, rng: &mut impl Rng) -> Rgb {
    match mode {
        ColorMode::Monochrome => Rgb::gray(MONOCHROME_LEVEL),
        ColorMode::Colorful => hsv_to_rgb(rng.gen::<f32>(), 1.0, 1.0).scale(COLORFUL_INTENSITY),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn assert_close(a: f32, b: f32, tol: f32) {
        assert!(
            (a - b).abs() <= tol,
            "expected {a} to be within {tol} of {b}"
        );
    }

    #[test]
    fn hsv_primaries() {
        assert_eq!(hsv_to_rgb(0.0, 1.0, 1.0), Rgb::new(1.0, 0.0, 0.0));
        let green = hsv_to_rgb(1.0 / 3.0, 1.0, 1.0);
        assert_close(green.r, 0.0, 1e-5);
        assert_close(green.g, 1.0, 1e-5);
        let gray = hsv_to_rgb(0.7, 0.0, 0.5);
        assert_eq!(gray, Rgb::gray(0.5));
    }

    #[test]
    fn monochrome_tint_is_constant() {
        let mut rng = SmallRng::seed_from_u64(1);
        let a = generate_color(ColorMode::Monochrome, &mut rng);
        let b = generate_color(ColorMode::Monochrome, &mut rng);
        assert_eq!(a, b);
        assert_close(a.r, 0.015_686, 1e-5);
    }

    #[test]
    fn colorful_tint_is_bounded() {
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..32 {
            let c = generate_color(ColorMode::Colorful, &mut rng);
            let max = c.r.max(c.g).max(c.b);
            assert_close(max, COLORFUL_INTENSITY, 1e-5);
            assert!(c.r >= 0.0 && c.g >= 0.0 && c.b >= 0.0);
        }
    }
}
