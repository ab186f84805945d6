mod capture;
mod caps;
mod clock;
mod color;
mod config;
mod display;
mod engine;
mod error;
mod field;
mod grid;
mod input;
mod kernel;
mod pointer;
mod program;
mod render;
mod solver;
mod surface;
mod texture;
mod vec2;

pub use capture::{capture, next_capture_path, save_png};
pub use caps::{is_mobile, resolution_for, Capabilities, FormatSet};
pub use clock::{CancelToken, FrameClock, MAX_FRAME_DT};
pub use color::{generate_color, hsv_to_rgb, Rgb};
pub use config::{ColorMode, ConfigError, PointerConfig, SolverConfig, PRESSURE_ITERATIONS};
pub use display::{composite, Backdrop, Frame};
pub use engine::{Engine, Tick};
pub use error::EngineError;
pub use field::Field;
pub use grid::Grid2;
pub use input::{Drained, InputEvent, InputQueue, Key, PendingSplat, TouchPoint};
pub use kernel::{
    AdvectParams, Kernel, KernelCompiler, KernelLibrary, KernelSource, SplatParams,
    MANUAL_FILTERING,
};
pub use pointer::{correct_delta, texcoord, Pointer, PointerSample, Stroke, MOUSE_ID};
pub use program::{CompileError, Keywords, Material, ProgramCompiler};
pub use render::{
    ShaderSource, ShadercCompiler, VulkanPresenter, WindowSurface, FULLSCREEN_VERT, PRESENT_FRAG,
    SRGB_TARGET,
};
pub use solver::{
    advect_dye, advect_velocity, apply_splat, clear_pressure, compute_divergence, correct_radius,
    pressure_residual, solve_pressure, step, subtract_gradient, FieldLayout, FluidFields, Splat,
    StepParams,
};
pub use surface::{HeadlessSurface, Surface};
pub use texture::{Filter, Fragment, Texture, TextureFormat};
pub use vec2::Vec2;
