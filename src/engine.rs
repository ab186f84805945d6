use crate::capture;
use crate::caps::{is_mobile, resolution_for, Capabilities, FormatSet};
use crate::clock::{CancelToken, FrameClock};
use crate::color::{generate_color, Rgb};
use crate::config::{ColorMode, SolverConfig};
use crate::display::{composite, Frame};
use crate::error::EngineError;
use crate::input::{InputEvent, InputQueue, Key};
use crate::kernel::{KernelLibrary, MANUAL_FILTERING};
use crate::program::Keywords;
use crate::solver::{self, correct_radius, FieldLayout, FluidFields, Splat, StepParams};
use crate::surface::Surface;
use crate::vec2::Vec2;
use log::{debug, info, warn};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

const BURST_MIN: usize = 5;
const BURST_MAX: usize = 24;
const BURST_COLOR_GAIN: f32 = 10.0;
const BURST_FORCE: f32 = 1000.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tick {
    Continue,
    Stopped,
}

/// Everything that exists only between `start` and `stop`.
struct Runtime {
    fields: FluidFields,
    layout: FieldLayout,
    surface_size: (u32, u32),
    dye_resolution: u32,
    kernels: KernelLibrary,
    advection_keywords: Keywords,
    input: InputQueue,
    clock: FrameClock,
    token: CancelToken,
    rng: SmallRng,
    paused: bool,
    color_timer: f32,
    frame: Option<Frame>,
}

fn aspect_of((width, height): (u32, u32)) -> f32 {
    width.max(1) as f32 / height.max(1) as f32
}

impl Runtime {
    fn new(
        caps: &Capabilities,
        size: (u32, u32),
        user_agent: &str,
        config: &SolverConfig,
        now_ms: f64,
    ) -> Result<Self, EngineError> {
        let formats = FormatSet::select(caps)?;
        let low_end = is_mobile(user_agent) || !caps.linear_filtering;
        let dye_resolution = if low_end {
            config.low_end_dye_resolution
        } else {
            config.dye_resolution
        };
        let advection_keywords = if caps.linear_filtering {
            Keywords::none()
        } else {
            Keywords::none().with(MANUAL_FILTERING)
        };
        let layout = FieldLayout {
            sim: resolution_for(config.sim_resolution, size.0, size.1),
            dye: resolution_for(dye_resolution, size.0, size.1),
            formats,
            linear_filtering: caps.linear_filtering,
            max_texture_size: caps.max_texture_size,
        };
        let fields = FluidFields::allocate(&layout)?;
        let rng = match config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        info!(
            "fields allocated: sim {:?}, dye {:?}, formats {}/{}/{}{}",
            layout.sim,
            layout.dye,
            formats.rgba.name(),
            formats.rg.name(),
            formats.r.name(),
            if low_end { " (low-end)" } else { "" }
        );
        Ok(Self {
            fields,
            layout,
            surface_size: size,
            dye_resolution,
            kernels: KernelLibrary::new(),
            advection_keywords,
            input: InputQueue::new(),
            clock: FrameClock::new(now_ms),
            token: CancelToken::new(),
            rng,
            paused: config.paused,
            color_timer: 0.0,
            frame: None,
        })
    }

    fn tint(&mut self, config: &SolverConfig) -> Rgb {
        generate_color(config.color_mode, &mut self.rng)
    }

    fn resize(&mut self, size: (u32, u32), config: &SolverConfig) {
        if size == self.surface_size {
            return;
        }
        let layout = FieldLayout {
            sim: resolution_for(config.sim_resolution, size.0, size.1),
            dye: resolution_for(self.dye_resolution, size.0, size.1),
            ..self.layout
        };
        match self.fields.resize(&layout, &mut self.kernels) {
            Ok(changed) => {
                if changed {
                    debug!(
                        "resized to {}x{}: sim {:?}, dye {:?}",
                        size.0, size.1, layout.sim, layout.dye
                    );
                }
                self.layout = layout;
                self.surface_size = size;
            }
            Err(err) => warn!("{err}; keeping {:?} fields", self.layout.sim),
        }
    }

    fn update_colors(&mut self, dt: f32, config: &SolverConfig) {
        if config.color_mode != ColorMode::Colorful {
            return;
        }
        self.color_timer += dt * config.color_update_speed;
        if self.color_timer >= 1.0 {
            self.color_timer = self.color_timer.fract();
            let mode = config.color_mode;
            let rng = &mut self.rng;
            self.input.retint(|| generate_color(mode, rng));
        }
    }

    fn apply_inputs(&mut self, config: &SolverConfig) {
        let drained = self.input.drain();
        let aspect = aspect_of(self.surface_size);
        let base_radius = correct_radius(config.splat_radius / 100.0, aspect);
        for count in drained.bursts {
            self.burst(count, base_radius, aspect, config);
        }
        for pending in drained.splats {
            let splat = Splat {
                point: pending.texcoord,
                force: pending.delta.scale(config.splat_force * (1.0 + pending.boost)),
                color: pending.color,
                radius: base_radius * (1.0 + pending.boost / 2.0),
            };
            solver::apply_splat(&mut self.fields, &mut self.kernels, &splat, aspect);
        }
    }

    fn burst(&mut self, count: usize, radius: f32, aspect: f32, config: &SolverConfig) {
        for _ in 0..count {
            let color = self.tint(config).scale(BURST_COLOR_GAIN);
            let point = Vec2::new(self.rng.gen(), self.rng.gen());
            let force = Vec2::new(
                BURST_FORCE * (self.rng.gen::<f32>() - 0.5),
                BURST_FORCE * (self.rng.gen::<f32>() - 0.5),
            );
            let splat = Splat {
                point,
                force,
                color,
                radius,
            };
            solver::apply_splat(&mut self.fields, &mut self.kernels, &splat, aspect);
        }
    }

    fn step(&mut self, dt: f32, config: &SolverConfig) {
        let params = StepParams {
            dt,
            velocity_dissipation: config.velocity_dissipation,
            density_dissipation: config.density_dissipation,
        };
        solver::step(
            &mut self.fields,
            &mut self.kernels,
            &self.advection_keywords,
            &params,
        );
    }

    /// Composites into the reusable frame, reallocating it when the surface
    /// size changed.
    fn render(&mut self, size: (u32, u32), config: &SolverConfig) -> Option<&Frame> {
        let dims = (size.0.max(1) as usize, size.1.max(1) as usize);
        if self.frame.as_ref().map(Frame::dims) != Some(dims) {
            match Frame::try_new(dims.0, dims.1) {
                Ok(frame) => self.frame = Some(frame),
                Err(err) => {
                    warn!("failed to allocate {}x{} frame: {err}", dims.0, dims.1);
                    return None;
                }
            }
        }
        let frame = self.frame.as_mut()?;
        composite(
            frame,
            self.fields.dye.read(),
            config.backdrop(),
            &mut self.kernels,
        );
        Some(&*frame)
    }
}

/// The simulation: owns its surface and configuration, and the fields and
/// input state while running.
pub struct Engine<S: Surface> {
    surface: S,
    config: SolverConfig,
    runtime: Option<Runtime>,
}

impl<S: Surface> Engine<S> {
    pub fn new(surface: S, config: SolverConfig) -> Self {
        Self {
            surface,
            config,
            runtime: None,
        }
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.runtime.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.runtime.as_ref().map_or(false, |rt| rt.paused)
    }

    pub fn fields(&self) -> Option<&FluidFields> {
        self.runtime.as_ref().map(|rt| &rt.fields)
    }

    pub fn input(&self) -> Option<&InputQueue> {
        self.runtime.as_ref().map(|rt| &rt.input)
    }

    pub fn layout(&self) -> Option<&FieldLayout> {
        self.runtime.as_ref().map(|rt| &rt.layout)
    }

    pub fn token(&self) -> Option<CancelToken> {
        self.runtime.as_ref().map(|rt| rt.token.clone())
    }

    /// Acquires the surface and allocates the fields. On failure the surface
    /// is left as it was found.
    pub fn start(&mut self, now_ms: f64) -> Result<CancelToken, EngineError> {
        if self.runtime.is_some() || self.surface.is_initialized() {
            return Err(EngineError::AlreadyInitialized);
        }
        let caps = self.surface.acquire()?;
        let runtime = Runtime::new(
            &caps,
            self.surface.size(),
            self.surface.user_agent(),
            &self.config,
            now_ms,
        );
        let runtime = match runtime {
            Ok(runtime) => runtime,
            Err(err) => {
                self.surface.release();
                return Err(err);
            }
        };
        let token = runtime.token.clone();
        self.runtime = Some(runtime);
        self.surface.set_initialized(true);
        info!("simulation started");
        Ok(token)
    }

    /// Cancels the frame token and releases the surface. Safe to call more
    /// than once.
    pub fn stop(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };
        runtime.token.cancel();
        self.surface.set_initialized(false);
        self.surface.release();
        info!("simulation stopped");
    }

    /// Advances one frame. `now_ms` is a monotonic timestamp in
    /// milliseconds.
    pub fn tick(&mut self, now_ms: f64) -> Tick {
        let cancelled = match &self.runtime {
            None => return Tick::Stopped,
            Some(rt) => rt.token.is_cancelled(),
        };
        if cancelled {
            self.stop();
            return Tick::Stopped;
        }
        let size = self.surface.size();
        let Self {
            surface,
            config,
            runtime,
        } = self;
        let Some(rt) = runtime.as_mut() else {
            return Tick::Stopped;
        };

        let dt = rt.clock.advance(now_ms);
        rt.resize(size, config);
        rt.update_colors(dt, config);
        rt.apply_inputs(config);
        if !rt.paused {
            rt.step(dt, config);
        }
        if let Some(frame) = rt.render(size, config) {
            if let Err(err) = surface.present(frame) {
                warn!("present failed: {err:#}");
            }
        }
        Tick::Continue
    }

    /// Routes host input. Effects on the fields are deferred to the next
    /// `tick`.
    pub fn handle_event(&mut self, event: InputEvent, timestamp_ms: f64) {
        let size = self.surface.size();
        let Self {
            config, runtime, ..
        } = self;
        let Some(rt) = runtime.as_mut() else {
            return;
        };
        if rt.token.is_cancelled() {
            return;
        }
        let mode = config.color_mode;
        match event {
            InputEvent::MouseDown { position } => {
                let color = rt.tint(config);
                rt.input.mouse_down(position, size, timestamp_ms, color);
            }
            InputEvent::MouseMove { position } => {
                let rng = &mut rt.rng;
                rt.input.mouse_move(position, size, timestamp_ms, &config.pointer, || {
                    generate_color(mode, rng)
                });
            }
            InputEvent::MouseUp | InputEvent::MouseLeave => rt.input.mouse_up(),
            InputEvent::TouchStart(touches) => {
                let rng = &mut rt.rng;
                rt.input
                    .touch_start(&touches, size, timestamp_ms, || generate_color(mode, rng));
            }
            InputEvent::TouchMove(touches) => {
                rt.input
                    .touch_move(&touches, size, timestamp_ms, &config.pointer);
            }
            InputEvent::TouchEnd(ids) => rt.input.touch_end(&ids),
            InputEvent::Key(Key::Pause) => {
                rt.paused = !rt.paused;
                info!("{}", if rt.paused { "paused" } else { "resumed" });
            }
            InputEvent::Key(Key::Burst) => {
                let count = rt.rng.gen_range(BURST_MIN..=BURST_MAX);
                rt.input.request_burst(count);
            }
        }
    }

    /// Queues `count` random splats for the next frame.
    pub fn request_burst(&mut self, count: usize) {
        if let Some(rt) = self.runtime.as_mut() {
            rt.input.request_burst(count);
        }
    }

    /// Renders the dye alone at `capture_resolution`.
    pub fn capture(&mut self) -> Option<Frame> {
        let (width, height) = self.surface.size();
        let dims = resolution_for(self.config.capture_resolution, width, height);
        let rt = self.runtime.as_mut()?;
        match capture::capture(rt.fields.dye.read(), dims, &mut rt.kernels) {
            Ok(frame) => Some(frame),
            Err(err) => {
                warn!("failed to allocate {}x{} capture: {err}", dims.0, dims.1);
                None
            }
        }
    }
}

impl<S: Surface> Drop for Engine<S> {
    fn drop(&mut self) {
        self.stop();
    }
}
