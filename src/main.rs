use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use smoke_sim::{
    next_capture_path, save_png, Engine, InputEvent, Key, SolverConfig, TouchPoint, Vec2,
    WindowSurface,
};
use winit::{
    event::{
        ElementState, Event, KeyboardInput, MouseButton, Touch, TouchPhase, VirtualKeyCode,
        WindowEvent,
    },
    event_loop::{ControlFlow, EventLoop},
    window::WindowBuilder,
};

#[derive(Debug, Parser)]
#[command(name = "smoke-sim", about = "Pointer-driven colored smoke")]
struct Args {
    /// RON file with solver settings; missing fields keep their defaults.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Directory that `C` writes PNG captures to.
    #[arg(long, default_value = ".")]
    capture_dir: PathBuf,
    /// Print the effective configuration as RON and exit.
    #[arg(long)]
    print_config: bool,
}

enum KeyAction {
    Input(Key),
    Capture,
    Restart,
    Quit,
}

fn key_action(key: VirtualKeyCode) -> Option<KeyAction> {
    match key {
        VirtualKeyCode::P => Some(KeyAction::Input(Key::Pause)),
        VirtualKeyCode::Space => Some(KeyAction::Input(Key::Burst)),
        VirtualKeyCode::C => Some(KeyAction::Capture),
        VirtualKeyCode::R => Some(KeyAction::Restart),
        VirtualKeyCode::Escape => Some(KeyAction::Quit),
        _ => None,
    }
}

fn touch_event(touch: Touch) -> InputEvent {
    let point = TouchPoint {
        id: touch.id,
        position: Vec2::new(touch.location.x as f32, touch.location.y as f32),
    };
    match touch.phase {
        TouchPhase::Started => InputEvent::TouchStart(vec![point]),
        TouchPhase::Moved => InputEvent::TouchMove(vec![point]),
        TouchPhase::Ended | TouchPhase::Cancelled => InputEvent::TouchEnd(vec![touch.id]),
    }
}

fn save_capture(engine: &mut Engine<WindowSurface>, dir: &Path) {
    let Some(frame) = engine.capture() else {
        log::warn!("nothing to capture");
        return;
    };
    let path = next_capture_path(dir);
    match save_png(&frame, &path) {
        Ok(()) => log::info!("saved {}", path.display()),
        Err(err) => log::error!("capture failed: {err:#}"),
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => SolverConfig::load(path)?,
        None => SolverConfig::default(),
    };
    if args.print_config {
        println!("{}", config.to_ron_string()?);
        return Ok(());
    }

    let event_loop = EventLoop::new();
    let window = WindowBuilder::new()
        .with_title("smoke-sim")
        .with_inner_size(winit::dpi::LogicalSize::new(960.0, 720.0))
        .with_transparent(true)
        .build(&event_loop)?;
    let started = Instant::now();
    let now_ms = move || started.elapsed().as_secs_f64() * 1000.0;
    let mut engine = Engine::new(WindowSurface::new(window), config);
    engine.start(now_ms())?;
    let mut cursor = Vec2::zero();

    event_loop.run(move |event, _, control_flow| {
        *control_flow = ControlFlow::Poll;
        match event {
            Event::WindowEvent { event, .. } => match event {
                WindowEvent::CloseRequested => *control_flow = ControlFlow::Exit,
                WindowEvent::CursorMoved { position, .. } => {
                    cursor = Vec2::new(position.x as f32, position.y as f32);
                    engine.handle_event(InputEvent::MouseMove { position: cursor }, now_ms());
                }
                WindowEvent::MouseInput {
                    state,
                    button: MouseButton::Left,
                    ..
                } => {
                    let event = match state {
                        ElementState::Pressed => InputEvent::MouseDown { position: cursor },
                        ElementState::Released => InputEvent::MouseUp,
                    };
                    engine.handle_event(event, now_ms());
                }
                WindowEvent::CursorLeft { .. } => {
                    engine.handle_event(InputEvent::MouseLeave, now_ms());
                }
                WindowEvent::Touch(touch) => engine.handle_event(touch_event(touch), now_ms()),
                WindowEvent::KeyboardInput {
                    input:
                        KeyboardInput {
                            state: ElementState::Pressed,
                            virtual_keycode: Some(key),
                            ..
                        },
                    ..
                } => match key_action(key) {
                    Some(KeyAction::Input(key)) => {
                        engine.handle_event(InputEvent::Key(key), now_ms());
                    }
                    Some(KeyAction::Capture) => save_capture(&mut engine, &args.capture_dir),
                    Some(KeyAction::Restart) => {
                        engine.stop();
                        if let Err(err) = engine.start(now_ms()) {
                            log::error!("restart failed: {err}");
                            *control_flow = ControlFlow::Exit;
                        }
                    }
                    Some(KeyAction::Quit) => *control_flow = ControlFlow::Exit,
                    None => {}
                },
                _ => {}
            },
            Event::MainEventsCleared => engine.surface().window().request_redraw(),
            Event::RedrawRequested(_) => {
                engine.tick(now_ms());
            }
            Event::LoopDestroyed => engine.stop(),
            _ => {}
        }
    });
}
