use crate::caps::FormatSet;
use crate::color::Rgb;
use crate::config::PRESSURE_ITERATIONS;
use crate::error::EngineError;
use crate::field::Field;
use crate::kernel::{self, AdvectParams, Kernel, KernelLibrary, KernelSource, SplatParams};
use crate::program::Keywords;
use crate::texture::{Filter, Texture, TextureFormat};
use crate::vec2::Vec2;

/// Grid sizes and storage formats for one allocation of the fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldLayout {
    pub sim: (usize, usize),
    pub dye: (usize, usize),
    pub formats: FormatSet,
    pub linear_filtering: bool,
    /// Largest texture side the rendering context accepts.
    pub max_texture_size: usize,
}

impl FieldLayout {
    fn check_size(&self) -> Result<(), EngineError> {
        for (width, height) in [self.sim, self.dye] {
            if width > self.max_texture_size || height > self.max_texture_size {
                return Err(EngineError::TooLarge {
                    width,
                    height,
                    max: self.max_texture_size,
                });
            }
        }
        Ok(())
    }

    /// Filter for the advected fields; divergence and pressure are always
    /// fetched texel by texel.
    pub fn filter(&self) -> Filter {
        if self.linear_filtering {
            Filter::Linear
        } else {
            Filter::Nearest
        }
    }
}

#[derive(Clone, Debug)]
pub struct FluidFields {
    pub velocity: Field,
    pub dye: Field,
    pub divergence: Texture,
    pub pressure: Field,
}

fn alloc_field(
    (width, height): (usize, usize),
    format: TextureFormat,
    filter: Filter,
) -> Result<Field, EngineError> {
    Field::try_new(width, height, format, filter).map_err(|source| EngineError::Allocation {
        width,
        height,
        source,
    })
}

fn resample_field(
    field: &Field,
    (width, height): (usize, usize),
    library: &mut KernelLibrary,
) -> Result<Field, EngineError> {
    field
        .resampled(width, height, library)
        .map_err(|source| EngineError::Allocation {
            width,
            height,
            source,
        })
}

fn alloc_texture(
    (width, height): (usize, usize),
    format: TextureFormat,
) -> Result<Texture, EngineError> {
    Texture::try_new(width, height, format, Filter::Nearest).map_err(|source| {
        EngineError::Allocation {
            width,
            height,
            source,
        }
    })
}

impl FluidFields {
    pub fn allocate(layout: &FieldLayout) -> Result<Self, EngineError> {
        layout.check_size()?;
        let filter = layout.filter();
        Ok(Self {
            velocity: alloc_field(layout.sim, layout.formats.rg, filter)?,
            dye: alloc_field(layout.dye, layout.formats.rgba, filter)?,
            divergence: alloc_texture(layout.sim, layout.formats.r)?,
            pressure: alloc_field(layout.sim, layout.formats.r, Filter::Nearest)?,
        })
    }

    pub fn sim_dims(&self) -> (usize, usize) {
        self.velocity.dims()
    }

    pub fn dye_dims(&self) -> (usize, usize) {
        self.dye.dims()
    }

    /// Resamples every field whose size differs from `layout`. Nothing is
    /// replaced unless all new allocations succeed. Returns whether any
    /// field changed.
    pub fn resize(
        &mut self,
        layout: &FieldLayout,
        library: &mut KernelLibrary,
    ) -> Result<bool, EngineError> {
        let sim_changed = self.sim_dims() != layout.sim;
        let dye_changed = self.dye_dims() != layout.dye;
        if !sim_changed && !dye_changed {
            return Ok(false);
        }
        layout.check_size()?;
        let dye = if dye_changed {
            Some(resample_field(&self.dye, layout.dye, library)?)
        } else {
            None
        };
        let sim = if sim_changed {
            Some((
                resample_field(&self.velocity, layout.sim, library)?,
                alloc_texture(layout.sim, layout.formats.r)?,
                resample_field(&self.pressure, layout.sim, library)?,
            ))
        } else {
            None
        };
        if let Some(dye) = dye {
            self.dye = dye;
        }
        if let Some((velocity, divergence, pressure)) = sim {
            self.velocity = velocity;
            self.divergence = divergence;
            self.pressure = pressure;
        }
        Ok(true)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepParams {
    pub dt: f32,
    pub velocity_dissipation: f32,
    pub density_dissipation: f32,
}

pub fn compute_divergence(fields: &mut FluidFields, library: &mut KernelLibrary) {
    if library.plain(KernelSource::Divergence).is_none() {
        return;
    }
    kernel::divergence(&mut fields.divergence, fields.velocity.read());
}

pub fn clear_pressure(fields: &mut FluidFields, library: &mut KernelLibrary) {
    if library.plain(KernelSource::Clear).is_none() {
        return;
    }
    let (read, write) = fields.pressure.split();
    kernel::clear(write, read, 0.0);
    fields.pressure.swap();
}

pub fn solve_pressure(fields: &mut FluidFields, library: &mut KernelLibrary, iterations: usize) {
    if library.plain(KernelSource::Pressure).is_none() {
        return;
    }
    for _ in 0..iterations {
        let (read, write) = fields.pressure.split();
        kernel::pressure(write, read, &fields.divergence);
        fields.pressure.swap();
    }
}

pub fn subtract_gradient(fields: &mut FluidFields, library: &mut KernelLibrary) {
    if library.plain(KernelSource::GradientSubtract).is_none() {
        return;
    }
    let (read, write) = fields.velocity.split();
    kernel::gradient_subtract(write, fields.pressure.read(), read);
    fields.velocity.swap();
}

fn advection_params(
    library: &mut KernelLibrary,
    keywords: &Keywords,
    dt: f32,
    dissipation: f32,
) -> Option<AdvectParams> {
    match library.get(KernelSource::Advection, keywords)? {
        Kernel::Advection { manual_filtering } => Some(AdvectParams {
            dt,
            dissipation,
            manual_filtering,
        }),
        _ => None,
    }
}

pub fn advect_velocity(
    fields: &mut FluidFields,
    library: &mut KernelLibrary,
    keywords: &Keywords,
    dt: f32,
    dissipation: f32,
) {
    let Some(params) = advection_params(library, keywords, dt, dissipation) else {
        return;
    };
    let (read, write) = fields.velocity.split();
    kernel::advect(write, read, read, &params);
    fields.velocity.swap();
}

pub fn advect_dye(
    fields: &mut FluidFields,
    library: &mut KernelLibrary,
    keywords: &Keywords,
    dt: f32,
    dissipation: f32,
) {
    let Some(params) = advection_params(library, keywords, dt, dissipation) else {
        return;
    };
    let (read, write) = fields.dye.split();
    kernel::advect(write, fields.velocity.read(), read, &params);
    fields.dye.swap();
}

/// One frame of the solver: project the velocity onto its divergence-free
/// part, then advect velocity and dye.
pub fn step(
    fields: &mut FluidFields,
    library: &mut KernelLibrary,
    advection_keywords: &Keywords,
    params: &StepParams,
) {
    compute_divergence(fields, library);
    clear_pressure(fields, library);
    solve_pressure(fields, library, PRESSURE_ITERATIONS);
    subtract_gradient(fields, library);
    advect_velocity(
        fields,
        library,
        advection_keywords,
        params.dt,
        params.velocity_dissipation,
    );
    advect_dye(
        fields,
        library,
        advection_keywords,
        params.dt,
        params.density_dissipation,
    );
}

/// Gaussian impulse into velocity and dye. `point` is a texture coordinate,
/// `force` a velocity in texels per second.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Splat {
    pub point: Vec2,
    pub force: Vec2,
    pub color: Rgb,
    pub radius: f32,
}

/// Widens a splat radius on landscape surfaces so splats stay round in
/// screen space.
pub fn correct_radius(radius: f32, aspect: f32) -> f32 {
    if aspect > 1.0 {
        radius * aspect
    } else {
        radius
    }
}

pub fn apply_splat(
    fields: &mut FluidFields,
    library: &mut KernelLibrary,
    splat: &Splat,
    aspect: f32,
) {
    if library.plain(KernelSource::Splat).is_none() {
        return;
    }
    let mut params = SplatParams {
        point: (splat.point.x, splat.point.y),
        value: [splat.force.x, splat.force.y, 0.0],
        radius: splat.radius,
        aspect,
    };
    let (read, write) = fields.velocity.split();
    kernel::splat(write, read, &params);
    fields.velocity.swap();

    params.value = splat.color.to_array();
    let (read, write) = fields.dye.split();
    kernel::splat(write, read, &params);
    fields.dye.swap();
}

/// Mean absolute residual of the pressure Poisson equation
/// `(L + R + B + T - 4p) - div`, with clamped neighbours.
pub fn pressure_residual(pressure: &Texture, divergence: &Texture) -> f32 {
    let (w, h) = (pressure.width(), pressure.height());
    let mut total = 0.0_f64;
    for y in 0..h as i32 {
        for x in 0..w as i32 {
            let p = pressure.fetch_clamped(x, y)[0];
            let sum = pressure.fetch_clamped(x - 1, y)[0]
                + pressure.fetch_clamped(x + 1, y)[0]
                + pressure.fetch_clamped(x, y - 1)[0]
                + pressure.fetch_clamped(x, y + 1)[0];
            let div = divergence.fetch_clamped(x, y)[0];
            total += f64::from((sum - 4.0 * p - div).abs());
        }
    }
    (total / (w * h) as f64) as f32
}
