//! Fragment programs of the solver, executed on the CPU.
//!
//! Each [`KernelSource`] is compiled through the program cache into a
//! [`Kernel`] handle; the handle records which keyword variant was built.
//! Kernel bodies write every texel of their target from the inputs.

use crate::program::{CompileError, Keywords, Material, ProgramCompiler};
use crate::texture::Texture;
use std::collections::HashMap;

pub const MANUAL_FILTERING: &str = "MANUAL_FILTERING";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KernelSource {
    Copy,
    Clear,
    Color,
    Splat,
    Advection,
    Divergence,
    Pressure,
    GradientSubtract,
    Display,
}

impl KernelSource {
    pub fn name(self) -> &'static str {
        match self {
            KernelSource::Copy => "copy",
            KernelSource::Clear => "clear",
            KernelSource::Color => "color",
            KernelSource::Splat => "splat",
            KernelSource::Advection => "advection",
            KernelSource::Divergence => "divergence",
            KernelSource::Pressure => "pressure",
            KernelSource::GradientSubtract => "gradient_subtract",
            KernelSource::Display => "display",
        }
    }

    fn keywords(self) -> &'static [&'static str] {
        match self {
            KernelSource::Advection => &[MANUAL_FILTERING],
            _ => &[],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kernel {
    Copy,
    Clear,
    Color,
    Splat,
    Advection { manual_filtering: bool },
    Divergence,
    Pressure,
    GradientSubtract,
    Display,
}

#[derive(Debug, Default)]
pub struct KernelCompiler;

impl ProgramCompiler for KernelCompiler {
    type Source = KernelSource;
    type Program = Kernel;

    fn compile(
        &mut self,
        source: &KernelSource,
        keywords: &Keywords,
    ) -> Result<Kernel, CompileError> {
        let known = source.keywords();
        if let Some(unknown) = keywords.iter().find(|kw| !known.iter().any(|k| k == kw)) {
            return Err(CompileError::UnknownKeyword {
                program: source.name().to_owned(),
                keyword: unknown.to_owned(),
            });
        }
        let defines = keywords.iter().collect::<Vec<_>>().join(" ");
        log::debug!("compiled {} [{}]", source.name(), defines);
        Ok(match source {
            KernelSource::Copy => Kernel::Copy,
            KernelSource::Clear => Kernel::Clear,
            KernelSource::Color => Kernel::Color,
            KernelSource::Splat => Kernel::Splat,
            KernelSource::Advection => Kernel::Advection {
                manual_filtering: keywords.contains(MANUAL_FILTERING),
            },
            KernelSource::Divergence => Kernel::Divergence,
            KernelSource::Pressure => Kernel::Pressure,
            KernelSource::GradientSubtract => Kernel::GradientSubtract,
            KernelSource::Display => Kernel::Display,
        })
    }
}

/// Program cache for every kernel source plus the last program each stage
/// resolved successfully.
#[derive(Default)]
pub struct KernelLibrary {
    compiler: KernelCompiler,
    materials: HashMap<KernelSource, Material<KernelCompiler>>,
    last_good: HashMap<KernelSource, Kernel>,
}

impl KernelLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves the `keywords` variant of `source`. A variant that fails to
    /// compile leaves the stage on its previous program, or none.
    pub fn get(&mut self, source: KernelSource, keywords: &Keywords) -> Option<Kernel> {
        let material = self
            .materials
            .entry(source)
            .or_insert_with(|| Material::new(source));
        match material.program(&mut self.compiler, keywords) {
            Ok(kernel) => {
                self.last_good.insert(source, kernel);
                Some(kernel)
            }
            Err(_) => self.last_good.get(&source).copied(),
        }
    }

    pub fn plain(&mut self, source: KernelSource) -> Option<Kernel> {
        self.get(source, &Keywords::none())
    }

    pub fn variant_count(&self, source: KernelSource) -> usize {
        self.materials.get(&source).map_or(0, Material::variant_count)
    }
}

fn lerp4(a: [f32; 4], b: [f32; 4], t: f32) -> [f32; 4] {
    [
        a[0] + (b[0] - a[0]) * t,
        a[1] + (b[1] - a[1]) * t,
        a[2] + (b[2] - a[2]) * t,
        a[3] + (b[3] - a[3]) * t,
    ]
}

/// Bilinear sample assembled from four texel-center lookups, for contexts
/// where the texture's own filter is nearest.
pub fn bilerp(tex: &Texture, uv: (f32, f32)) -> [f32; 4] {
    let (tx, ty) = tex.texel_size();
    let st = (uv.0 / tx - 0.5, uv.1 / ty - 0.5);
    let iuv = (st.0.floor(), st.1.floor());
    let fuv = (st.0 - iuv.0, st.1 - iuv.1);
    let at = |dx: f32, dy: f32| tex.sample(((iuv.0 + dx + 0.5) * tx, (iuv.1 + dy + 0.5) * ty));
    let a = at(0.0, 0.0);
    let b = at(1.0, 0.0);
    let c = at(0.0, 1.0);
    let d = at(1.0, 1.0);
    lerp4(lerp4(a, b, fuv.0), lerp4(c, d, fuv.0), fuv.1)
}

pub fn copy(target: &mut Texture, source: &Texture) {
    target.render(|frag| source.sample(frag.uv));
}

pub fn clear(target: &mut Texture, source: &Texture, value: f32) {
    target.render(|frag| source.sample(frag.uv).map(|c| c * value));
}

/// Vertical gradient from `bottom` (uv.y = 0) to `top` (uv.y = 1).
pub fn color(target: &mut Texture, top: [f32; 3], bottom: [f32; 3]) {
    target.render(|frag| {
        let t = frag.uv.1;
        let mix = |i: usize| bottom[i] + (top[i] - bottom[i]) * t;
        [mix(0), mix(1), mix(2), 1.0]
    });
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SplatParams {
    pub point: (f32, f32),
    pub value: [f32; 3],
    pub radius: f32,
    pub aspect: f32,
}

pub fn splat(target: &mut Texture, base: &Texture, params: &SplatParams) {
    target.render(|frag| {
        let px = (frag.uv.0 - params.point.0) * params.aspect;
        let py = frag.uv.1 - params.point.1;
        let weight = (-(px * px + py * py) / params.radius).exp();
        let b = base.sample(frag.uv);
        [
            b[0] + weight * params.value[0],
            b[1] + weight * params.value[1],
            b[2] + weight * params.value[2],
            1.0,
        ]
    });
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AdvectParams {
    pub dt: f32,
    pub dissipation: f32,
    pub manual_filtering: bool,
}

/// Semi-Lagrangian backtrace of `source` along `velocity`.
pub fn advect(target: &mut Texture, velocity: &Texture, source: &Texture, params: &AdvectParams) {
    let (tx, ty) = velocity.texel_size();
    let lookup = |tex: &Texture, uv: (f32, f32)| {
        if params.manual_filtering {
            bilerp(tex, uv)
        } else {
            tex.sample(uv)
        }
    };
    let decay = 1.0 + params.dissipation * params.dt;
    target.render(|frag| {
        let v = lookup(velocity, frag.uv);
        let coord = (
            frag.uv.0 - params.dt * v[0] * tx,
            frag.uv.1 - params.dt * v[1] * ty,
        );
        lookup(source, coord).map(|c| c / decay)
    });
}

/// Central-difference divergence; missing neighbours at the domain edge
/// mirror the center velocity so the boundary acts as a solid wall.
pub fn divergence(target: &mut Texture, velocity: &Texture) {
    let (w, h) = (velocity.width(), velocity.height());
    target.render(|frag| {
        let (x, y) = (frag.x, frag.y);
        let c = velocity.fetch(x, y);
        let l = if x == 0 { -c[0] } else { velocity.fetch(x - 1, y)[0] };
        let r = if x + 1 == w { -c[0] } else { velocity.fetch(x + 1, y)[0] };
        let b = if y == 0 { -c[1] } else { velocity.fetch(x, y - 1)[1] };
        let t = if y + 1 == h { -c[1] } else { velocity.fetch(x, y + 1)[1] };
        [0.5 * (r - l + t - b), 0.0, 0.0, 1.0]
    });
}

fn neighbours(tex: &Texture, x: usize, y: usize) -> (f32, f32, f32, f32) {
    let (x, y) = (x as i32, y as i32);
    (
        tex.fetch_clamped(x - 1, y)[0],
        tex.fetch_clamped(x + 1, y)[0],
        tex.fetch_clamped(x, y - 1)[0],
        tex.fetch_clamped(x, y + 1)[0],
    )
}

/// One Jacobi iteration of the pressure Poisson equation.
pub fn pressure(target: &mut Texture, pressure: &Texture, divergence: &Texture) {
    target.render(|frag| {
        let (l, r, b, t) = neighbours(pressure, frag.x, frag.y);
        let div = divergence.fetch(frag.x, frag.y)[0];
        [(l + r + b + t - div) * 0.25, 0.0, 0.0, 1.0]
    });
}

pub fn gradient_subtract(target: &mut Texture, pressure: &Texture, velocity: &Texture) {
    target.render(|frag| {
        let (l, r, b, t) = neighbours(pressure, frag.x, frag.y);
        let v = velocity.fetch(frag.x, frag.y);
        [v[0] - (r - l), v[1] - (t - b), 0.0, 1.0]
    });
}

/// Dye color with coverage equal to its brightest channel.
pub fn display(target: &mut Texture, dye: &Texture) {
    target.render_blended(|frag| {
        let c = dye.sample(frag.uv);
        let a = c[0].max(c[1]).max(c[2]);
        [c[0], c[1], c[2], a]
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::texture::{Filter, TextureFormat};

    fn assert_close(a: f32, b: f32, tol: f32) {
        assert!(
            (a - b).abs() <= tol,
            "expected {a} to be within {tol} of {b}"
        );
    }

    #[test]
    fn advection_accepts_manual_filtering_only() {
        let mut library = KernelLibrary::new();
        let manual = Keywords::none().with(MANUAL_FILTERING);
        assert_eq!(
            library.get(KernelSource::Advection, &manual),
            Some(Kernel::Advection { manual_filtering: true })
        );
        assert_eq!(library.plain(KernelSource::Divergence), Some(Kernel::Divergence));
        assert_eq!(library.get(KernelSource::Divergence, &manual), Some(Kernel::Divergence));
        assert_eq!(library.variant_count(KernelSource::Divergence), 2);
    }

    #[test]
    fn failed_variant_without_history_resolves_to_none() {
        let mut library = KernelLibrary::new();
        let bogus = Keywords::none().with("SHADING");
        assert_eq!(library.get(KernelSource::Display, &bogus), None);
        let mut compiler = KernelCompiler;
        let err = compiler.compile(&KernelSource::Display, &bogus).unwrap_err();
        assert_eq!(
            err,
            CompileError::UnknownKeyword {
                program: "display".into(),
                keyword: "SHADING".into()
            }
        );
    }

    #[test]
    fn divergence_mirrors_at_walls() {
        let velocity = Texture::from_fn(3, 3, TextureFormat::Rg16F, Filter::Nearest, |_, _| {
            [1.0, 0.0, 0.0, 0.0]
        });
        let mut div = Texture::try_new(3, 3, TextureFormat::R16F, Filter::Nearest).unwrap();
        divergence(&mut div, &velocity);
        // Uniform flow into the left wall: L = -1, R = 1.
        assert_close(div.fetch(0, 1)[0], 0.5 * (1.0 - -1.0), 1e-6);
        assert_close(div.fetch(1, 1)[0], 0.0, 1e-6);
        assert_close(div.fetch(2, 1)[0], 0.5 * (-1.0 - 1.0), 1e-6);

        let vertical = Texture::from_fn(2, 2, TextureFormat::Rg16F, Filter::Nearest, |_, _| {
            [0.0, 2.0, 0.0, 0.0]
        });
        let mut div = Texture::try_new(2, 2, TextureFormat::R16F, Filter::Nearest).unwrap();
        divergence(&mut div, &vertical);
        assert_close(div.fetch(0, 0)[0], 0.5 * (2.0 - -2.0), 1e-6);
        assert_close(div.fetch(0, 1)[0], 0.5 * (-2.0 - 2.0), 1e-6);
    }

    #[test]
    fn pressure_iteration_uses_clamped_neighbours() {
        let p = Texture::from_fn(2, 1, TextureFormat::R16F, Filter::Nearest, |x, _| {
            [x as f32 + 1.0, 0.0, 0.0, 0.0]
        });
        let div = Texture::from_fn(2, 1, TextureFormat::R16F, Filter::Nearest, |_, _| {
            [0.4, 0.0, 0.0, 0.0]
        });
        let mut out = Texture::try_new(2, 1, TextureFormat::R16F, Filter::Nearest).unwrap();
        pressure(&mut out, &p, &div);
        // (L=1, R=2, B=1, T=1) at x = 0.
        assert_close(out.fetch(0, 0)[0], (1.0 + 2.0 + 1.0 + 1.0 - 0.4) * 0.25, 1e-6);
    }

    #[test]
    fn gradient_subtract_removes_pressure_slope() {
        let p = Texture::from_fn(4, 4, TextureFormat::R16F, Filter::Nearest, |x, y| {
            [x as f32 * 0.5 + y as f32, 0.0, 0.0, 0.0]
        });
        let v = Texture::from_fn(4, 4, TextureFormat::Rg16F, Filter::Nearest, |_, _| {
            [3.0, 3.0, 0.0, 0.0]
        });
        let mut out = Texture::try_new(4, 4, TextureFormat::Rg16F, Filter::Nearest).unwrap();
        gradient_subtract(&mut out, &p, &v);
        assert_eq!(out.fetch(1, 1), [2.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn manual_filtering_matches_hardware_linear() {
        let f = |x: usize, y: usize| [(x * 3 + y) as f32 * 0.1, (x as f32).sin(), 0.0, 0.0];
        let linear = Texture::from_fn(6, 5, TextureFormat::Rg16F, Filter::Linear, f);
        let nearest = Texture::from_fn(6, 5, TextureFormat::Rg16F, Filter::Nearest, f);
        for uv in [(0.31, 0.47), (0.05, 0.9), (0.77, 0.12), (1.2, -0.3)] {
            let hw = linear.sample(uv);
            let manual = bilerp(&nearest, uv);
            assert_close(manual[0], hw[0], 1e-4);
            assert_close(manual[1], hw[1], 1e-4);
        }
    }

    #[test]
    fn advection_with_zero_velocity_only_decays() {
        let velocity = Texture::try_new(4, 4, TextureFormat::Rg16F, Filter::Linear).unwrap();
        let source = Texture::from_fn(4, 4, TextureFormat::Rgba16F, Filter::Linear, |x, _| {
            [x as f32, 1.0, 0.0, 1.0]
        });
        let mut out = Texture::try_new(4, 4, TextureFormat::Rgba16F, Filter::Linear).unwrap();
        let params = AdvectParams {
            dt: 0.1,
            dissipation: 5.0,
            manual_filtering: false,
        };
        advect(&mut out, &velocity, &source, &params);
        assert_close(out.fetch(2, 0)[0], 2.0 / 1.5, 1e-5);
        assert_close(out.fetch(2, 0)[1], 1.0 / 1.5, 1e-5);
    }

    #[test]
    fn splat_peaks_at_point_and_respects_aspect() {
        let base = Texture::try_new(32, 16, TextureFormat::Rgba16F, Filter::Linear).unwrap();
        let mut out = base.clone();
        let params = SplatParams {
            point: (0.5, 0.5),
            value: [1.0, 0.5, 0.0],
            radius: 0.01,
            aspect: 2.0,
        };
        splat(&mut out, &base, &params);
        let center = out.fetch(15, 7);
        let (u, v) = out.grid().texel_center(15, 7);
        let d2 = ((u - 0.5) * 2.0).powi(2) + (v - 0.5).powi(2);
        assert_close(center[0], (-d2 / 0.01).exp(), 1e-5);
        assert_close(center[1], 0.5 * (-d2 / 0.01).exp(), 1e-5);
        assert_eq!(center[3], 1.0);
        // Same uv distance weighs less along x once scaled by the aspect.
        let along_x = out.fetch(19, 7)[0];
        let along_y = out.fetch(15, 9)[0];
        assert!(along_x < along_y);
    }

    #[test]
    fn display_coverage_is_brightest_channel() {
        let dye = Texture::from_fn(2, 2, TextureFormat::Rgba16F, Filter::Linear, |_, _| {
            [0.2, 0.6, 0.1, 1.0]
        });
        let mut frame = Texture::try_new(2, 2, TextureFormat::Rgba32F, Filter::Nearest).unwrap();
        frame.fill([0.0, 0.0, 1.0, 1.0]);
        display(&mut frame, &dye);
        let px = frame.fetch(0, 0);
        assert_close(px[0], 0.2, 1e-6);
        assert_close(px[1], 0.6, 1e-6);
        assert_close(px[2], 0.1 + 1.0 * 0.4, 1e-6);
        assert_close(px[3], 0.6 + 1.0 * 0.4, 1e-6);
    }
}
