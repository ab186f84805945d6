use crate::display::{composite, Frame};
use crate::kernel::KernelLibrary;
use crate::texture::Texture;
use anyhow::Context;
use std::collections::TryReserveError;
use std::path::{Path, PathBuf};

/// Renders the dye alone into an offscreen frame of `size`.
pub fn capture(
    dye: &Texture,
    (width, height): (usize, usize),
    library: &mut KernelLibrary,
) -> Result<Frame, TryReserveError> {
    let mut frame = Frame::try_new(width, height)?;
    composite(&mut frame, dye, None, library);
    Ok(frame)
}

pub fn save_png(frame: &Frame, path: &Path) -> anyhow::Result<()> {
    let (width, height) = frame.dims();
    let img = image::RgbaImage::from_raw(width as u32, height as u32, frame.to_rgba8_top_down())
        .context("frame buffer does not match its dimensions")?;
    img.save(path)
        .with_context(|| format!("failed to write {}", path.display()))
}

/// First `fluid-N.png` in `dir` that does not exist yet.
pub fn next_capture_path(dir: &Path) -> PathBuf {
    (0..)
        .map(|n| dir.join(format!("fluid-{n}.png")))
        .find(|path| !path.exists())
        .unwrap_or_else(|| dir.join("fluid.png"))
}
