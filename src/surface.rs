use crate::caps::Capabilities;
use crate::display::Frame;
use crate::error::EngineError;

/// Where frames go. The engine owns one for its whole lifetime and
/// acquires the rendering context only while running.
pub trait Surface {
    /// Current size in physical pixels.
    fn size(&self) -> (u32, u32);

    fn acquire(&mut self) -> Result<Capabilities, EngineError>;

    fn user_agent(&self) -> &str;

    fn is_initialized(&self) -> bool;

    fn set_initialized(&mut self, initialized: bool);

    fn present(&mut self, frame: &Frame) -> anyhow::Result<()>;

    fn release(&mut self);
}

/// In-memory surface for tests and offline runs.
#[derive(Clone, Debug)]
pub struct HeadlessSurface {
    size: (u32, u32),
    capabilities: Option<Capabilities>,
    user_agent: String,
    initialized: bool,
    acquired: bool,
    presented: usize,
    failed_presents: usize,
    releases: usize,
    last_frame: Option<Frame>,
}

impl HeadlessSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: (width, height),
            capabilities: Some(Capabilities::full()),
            user_agent: String::from("headless"),
            initialized: false,
            acquired: false,
            presented: 0,
            failed_presents: 0,
            releases: 0,
            last_frame: None,
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    /// Every `acquire` fails as if no rendering context were available.
    pub fn without_context(mut self) -> Self {
        self.capabilities = None;
        self
    }

    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = user_agent.to_owned();
        self
    }

    /// The next `count` presents fail as a lost device would.
    pub fn fail_presents(&mut self, count: usize) {
        self.failed_presents = count;
    }

    pub fn set_size(&mut self, width: u32, height: u32) {
        self.size = (width, height);
    }

    pub fn is_acquired(&self) -> bool {
        self.acquired
    }

    pub fn presented(&self) -> usize {
        self.presented
    }

    pub fn releases(&self) -> usize {
        self.releases
    }

    pub fn last_frame(&self) -> Option<&Frame> {
        self.last_frame.as_ref()
    }
}

impl Surface for HeadlessSurface {
    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn acquire(&mut self) -> Result<Capabilities, EngineError> {
        let caps = self
            .capabilities
            .clone()
            .ok_or_else(|| EngineError::Unsupported("no rendering context".into()))?;
        self.acquired = true;
        Ok(caps)
    }

    fn user_agent(&self) -> &str {
        &self.user_agent
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn set_initialized(&mut self, initialized: bool) {
        self.initialized = initialized;
    }

    fn present(&mut self, frame: &Frame) -> anyhow::Result<()> {
        anyhow::ensure!(self.acquired, "present without a rendering context");
        if self.failed_presents > 0 {
            self.failed_presents -= 1;
            anyhow::bail!("device lost");
        }
        self.presented += 1;
        self.last_frame = Some(frame.clone());
        Ok(())
    }

    fn release(&mut self) {
        if self.acquired {
            self.acquired = false;
            self.releases += 1;
        }
    }
}
