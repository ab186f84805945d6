//! Property tests for the stable-fluids solver stages.
//!
//! - Jacobi iterations never increase the pressure residual
//! - Advecting dye through a divergence-free flow never creates dye
//! - Random splats followed by full steps keep every field finite

use std::f32::consts::PI;

use proptest::prelude::*;
use smoke_sim::{
    advect_dye, apply_splat, clear_pressure, compute_divergence, pressure_residual,
    solve_pressure, step, Capabilities, FieldLayout, FluidFields, FormatSet, KernelLibrary,
    Keywords, Rgb, SolverConfig, Splat, StepParams, Vec2, MANUAL_FILTERING, PRESSURE_ITERATIONS,
};

const DT: f32 = 1.0 / 60.0;
const ADVECTION_FRAMES: usize = 8;

fn layout(width: usize, height: usize) -> FieldLayout {
    FieldLayout {
        sim: (width, height),
        dye: (width, height),
        formats: FormatSet::select(&Capabilities::full()).unwrap(),
        linear_filtering: true,
        max_texture_size: usize::MAX,
    }
}

/// Grid size plus one random value per velocity component.
fn velocity_grid() -> impl Strategy<Value = (usize, usize, Vec<f32>)> {
    (4usize..12, 4usize..12).prop_flat_map(|(w, h)| {
        (
            Just(w),
            Just(h),
            prop::collection::vec(-1.0f32..1.0, w * h * 2),
        )
    })
}

fn dye_grid() -> impl Strategy<Value = (usize, Vec<f32>)> {
    (12usize..24).prop_flat_map(|n| (Just(n), prop::collection::vec(0.0f32..1.0, n * n * 4)))
}

/// Velocity of the stream function `amp * sin(pi x) sin(pi y)`, in texels
/// per second.
fn fill_stream_velocity(fields: &mut FluidFields, amp: f32) {
    let (w, h) = fields.sim_dims();
    let velocity = fields.velocity.read_mut();
    for y in 0..h {
        for x in 0..w {
            let u = (x as f32 + 0.5) / w as f32;
            let v = (y as f32 + 0.5) / h as f32;
            let vx = amp * PI * (PI * u).sin() * (PI * v).cos();
            let vy = -amp * PI * (PI * u).cos() * (PI * v).sin();
            velocity.set(x, y, [vx, vy, 0.0, 0.0]);
        }
    }
}

fn all_finite(fields: &FluidFields) -> bool {
    let textures = [
        fields.velocity.read(),
        fields.dye.read(),
        fields.pressure.read(),
        &fields.divergence,
    ];
    textures.iter().all(|tex| {
        (0..tex.height()).all(|y| {
            (0..tex.width()).all(|x| tex.fetch(x, y).iter().all(|c| c.is_finite()))
        })
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Each Jacobi iteration maps the residual r to (sum of neighbours of r) / 4,
    /// which cannot grow its L1 norm.
    #[test]
    fn pressure_residual_never_increases((w, h, values) in velocity_grid()) {
        let mut fields = FluidFields::allocate(&layout(w, h)).unwrap();
        for y in 0..h {
            for x in 0..w {
                let i = (y * w + x) * 2;
                fields
                    .velocity
                    .read_mut()
                    .set(x, y, [values[i], values[i + 1], 0.0, 0.0]);
            }
        }
        let mut kernels = KernelLibrary::new();
        compute_divergence(&mut fields, &mut kernels);
        clear_pressure(&mut fields, &mut kernels);

        let mut residuals = vec![pressure_residual(fields.pressure.read(), &fields.divergence)];
        for _ in 0..PRESSURE_ITERATIONS {
            solve_pressure(&mut fields, &mut kernels, 1);
            residuals.push(pressure_residual(fields.pressure.read(), &fields.divergence));
        }
        prop_assume!(residuals[0] > 1e-3);

        for (n, pair) in residuals.windows(2).enumerate() {
            prop_assert!(
                pair[1] <= pair[0] * (1.0 + 1e-4) + 1e-6,
                "residual grew at iteration {}: {} -> {}", n + 1, pair[0], pair[1]
            );
        }
        prop_assert!(
            residuals[PRESSURE_ITERATIONS] < residuals[0],
            "no progress after {} iterations: {:?}", PRESSURE_ITERATIONS, residuals
        );
    }

    /// Dye is only ever lost: advection through a divergence-free flow plus
    /// dissipation never raises any channel's total.
    #[test]
    fn dye_total_never_grows(
        (n, values) in dye_grid(),
        amp in 0.0f32..4.0,
        manual in any::<bool>(),
    ) {
        let mut fields = FluidFields::allocate(&layout(n, n)).unwrap();
        fill_stream_velocity(&mut fields, amp);
        for y in 0..n {
            for x in 0..n {
                let i = (y * n + x) * 4;
                fields.dye.read_mut().set(
                    x,
                    y,
                    [values[i], values[i + 1], values[i + 2], values[i + 3]],
                );
            }
        }
        let keywords = if manual {
            Keywords::none().with(MANUAL_FILTERING)
        } else {
            Keywords::none()
        };
        let dissipation = SolverConfig::default().density_dissipation;
        let mut kernels = KernelLibrary::new();

        for frame in 0..ADVECTION_FRAMES {
            let before: Vec<f32> = (0..4).map(|c| fields.dye.read().channel_sum(c)).collect();
            advect_dye(&mut fields, &mut kernels, &keywords, DT, dissipation);
            for (c, total) in before.iter().enumerate() {
                let after = fields.dye.read().channel_sum(c);
                prop_assert!(
                    after <= *total,
                    "channel {} grew in frame {}: {} -> {}", c, frame, total, after
                );
            }
        }
    }

    #[test]
    fn splats_and_steps_stay_finite(
        px in 0.0f32..1.0,
        py in 0.0f32..1.0,
        fx in -3000.0f32..3000.0,
        fy in -3000.0f32..3000.0,
        radius in 0.0005f32..0.05,
    ) {
        let mut fields = FluidFields::allocate(&layout(16, 12)).unwrap();
        let mut kernels = KernelLibrary::new();
        let config = SolverConfig::default();
        let splat = Splat {
            point: Vec2::new(px, py),
            force: Vec2::new(fx, fy),
            color: Rgb::gray(0.5),
            radius,
        };
        let params = StepParams {
            dt: DT,
            velocity_dissipation: config.velocity_dissipation,
            density_dissipation: config.density_dissipation,
        };
        for _ in 0..3 {
            apply_splat(&mut fields, &mut kernels, &splat, 16.0 / 12.0);
            step(&mut fields, &mut kernels, &Keywords::none(), &params);
        }
        prop_assert!(all_finite(&fields));
        prop_assert!(fields.dye.read().channel_sum(0) > 0.0);
    }
}
