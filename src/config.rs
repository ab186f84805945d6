use crate::color::Rgb;
use crate::display::Backdrop;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const PRESSURE_ITERATIONS: usize = 20;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorMode {
    /// Constant near-black tint.
    #[default]
    Monochrome,
    /// Random-hue tints, re-rolled every `1 / color_update_speed` seconds.
    Colorful,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointerConfig {
    pub max_points: usize,
    pub velocity_smoothing: f32,
    pub interpolation_steps: usize,
    pub min_distance: f32,
    pub velocity_boost: f32,
}

impl Default for PointerConfig {
    fn default() -> Self {
        Self {
            max_points: 5,
            velocity_smoothing: 0.3,
            interpolation_steps: 5,
            min_distance: 5.0,
            velocity_boost: 0.0001,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub sim_resolution: u32,
    pub dye_resolution: u32,
    pub low_end_dye_resolution: u32,
    pub capture_resolution: u32,
    pub density_dissipation: f32,
    pub velocity_dissipation: f32,
    pub splat_radius: f32,
    pub splat_force: f32,
    pub gradient_top: Rgb,
    pub gradient_bottom: Rgb,
    pub back_color: Rgb,
    /// Leave uncovered pixels transparent instead of filling with `back_color`.
    pub transparent: bool,
    pub draw_gradient: bool,
    pub color_mode: ColorMode,
    pub color_update_speed: f32,
    pub paused: bool,
    pub seed: Option<u64>,
    pub pointer: PointerConfig,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            sim_resolution: 128,
            dye_resolution: 256,
            low_end_dye_resolution: 512,
            capture_resolution: 512,
            density_dissipation: 5.0,
            velocity_dissipation: 2.0,
            splat_radius: 0.4,
            splat_force: 2000.0,
            gradient_top: Rgb::new(246.0, 173.0, 169.0),
            gradient_bottom: Rgb::new(231.0, 74.0, 87.0),
            back_color: Rgb::new(179.0, 173.0, 169.0),
            transparent: true,
            draw_gradient: false,
            color_mode: ColorMode::Monochrome,
            color_update_speed: 10.0,
            paused: false,
            seed: None,
            pointer: PointerConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] ron::error::SpannedError),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl SolverConfig {
    pub fn from_ron_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = ron::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ron_str(&text)
    }

    pub fn to_ron_string(&self) -> Result<String, ron::Error> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
    }

    /// What to draw under the dye, with colors scaled to 0..=1.
    pub fn backdrop(&self) -> Option<Backdrop> {
        if self.draw_gradient {
            Some(Backdrop::Gradient {
                top: self.gradient_top.normalized(),
                bottom: self.gradient_bottom.normalized(),
            })
        } else if !self.transparent {
            Some(Backdrop::Solid(self.back_color.normalized()))
        } else {
            None
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_owned()));
        if self.sim_resolution == 0
            || self.dye_resolution == 0
            || self.low_end_dye_resolution == 0
            || self.capture_resolution == 0
        {
            return invalid("resolutions must be > 0");
        }
        if !(self.density_dissipation >= 0.0 && self.velocity_dissipation >= 0.0) {
            return invalid("dissipation must be >= 0");
        }
        if !(self.splat_force >= 0.0) {
            return invalid("splat_force must be >= 0");
        }
        if !(self.splat_radius > 0.0) {
            return invalid("splat_radius must be > 0");
        }
        if !(self.color_update_speed >= 0.0) {
            return invalid("color_update_speed must be >= 0");
        }
        let pointer = &self.pointer;
        if pointer.max_points < 2 {
            return invalid("pointer.max_points must be >= 2");
        }
        if !(pointer.velocity_smoothing > 0.0 && pointer.velocity_smoothing <= 1.0) {
            return invalid("pointer.velocity_smoothing must be in (0, 1]");
        }
        if pointer.interpolation_steps == 0 {
            return invalid("pointer.interpolation_steps must be > 0");
        }
        if !(pointer.min_distance >= 0.0 && pointer.velocity_boost >= 0.0) {
            return invalid("pointer distances and boost must be >= 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = SolverConfig::from_ron_str("()").unwrap();
        assert_eq!(config, SolverConfig::default());
    }

    #[test]
    fn partial_document_overrides_fields() {
        let config = SolverConfig::from_ron_str(
            "(dye_resolution: 1024, color_mode: Colorful, seed: Some(9), pointer: (max_points: 8))",
        )
        .unwrap();
        assert_eq!(config.dye_resolution, 1024);
        assert_eq!(config.color_mode, ColorMode::Colorful);
        assert_eq!(config.seed, Some(9));
        assert_eq!(config.pointer.max_points, 8);
        assert_eq!(config.pointer.interpolation_steps, 5);
        assert_eq!(config.sim_resolution, 128);
    }

    #[test]
    fn round_trips_through_ron() {
        let text = SolverConfig::default().to_ron_string().unwrap();
        assert_eq!(SolverConfig::from_ron_str(&text).unwrap(), SolverConfig::default());
    }

    #[test]
    fn backdrop_selection() {
        assert_eq!(SolverConfig::default().backdrop(), None);
        let opaque = SolverConfig {
            transparent: false,
            ..SolverConfig::default()
        };
        assert_eq!(
            opaque.backdrop(),
            Some(Backdrop::Solid(Rgb::new(179.0, 173.0, 169.0).normalized()))
        );
        let gradient = SolverConfig {
            draw_gradient: true,
            ..opaque
        };
        assert!(matches!(gradient.backdrop(), Some(Backdrop::Gradient { .. })));
    }

    #[test]
    fn rejects_invalid_values() {
        for doc in [
            "(sim_resolution: 0)",
            "(splat_radius: 0.0)",
            "(density_dissipation: -1.0)",
            "(pointer: (max_points: 1))",
            "(pointer: (velocity_smoothing: 1.5))",
            "(pointer: (interpolation_steps: 0))",
        ] {
            let err = SolverConfig::from_ron_str(doc).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{doc}: {err}");
        }
    }

    #[test]
    fn malformed_document_is_parse_error() {
        let err = SolverConfig::from_ron_str("(sim_resolution: \"big\")").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
