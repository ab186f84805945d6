mod config;
mod vulkan;

pub use vulkan::{
    ShaderSource, ShadercCompiler, VulkanPresenter, FULLSCREEN_VERT, PRESENT_FRAG, SRGB_TARGET,
};

use anyhow::anyhow;
use winit::window::Window;

use crate::caps::Capabilities;
use crate::display::Frame;
use crate::error::EngineError;
use crate::surface::Surface;

/// A winit window presented through Vulkan. The presenter only exists
/// between `acquire` and `release`.
pub struct WindowSurface {
    window: Window,
    presenter: Option<VulkanPresenter>,
    initialized: bool,
}

impl WindowSurface {
    pub fn new(window: Window) -> Self {
        Self {
            window,
            presenter: None,
            initialized: false,
        }
    }

    pub fn window(&self) -> &Window {
        &self.window
    }
}

impl Surface for WindowSurface {
    fn size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    fn acquire(&mut self) -> Result<Capabilities, EngineError> {
        let presenter = match self.presenter.take() {
            Some(presenter) => presenter,
            None => VulkanPresenter::new(&self.window)
                .map_err(|err| EngineError::Unsupported(format!("{err:#}")))?,
        };
        let caps = presenter.capabilities();
        self.presenter = Some(presenter);
        Ok(caps)
    }

    fn user_agent(&self) -> &str {
        std::env::consts::OS
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn set_initialized(&mut self, initialized: bool) {
        self.initialized = initialized;
    }

    fn present(&mut self, frame: &Frame) -> anyhow::Result<()> {
        let size = self.size();
        self.presenter
            .as_mut()
            .ok_or_else(|| anyhow!("present without a rendering context"))?
            .present(frame, size)
    }

    fn release(&mut self) {
        if self.presenter.take().is_some() {
            log::info!("released rendering context");
        }
    }
}
