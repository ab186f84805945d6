use crate::color::Rgb;
use crate::kernel::{self, KernelLibrary, KernelSource};
use crate::texture::{Filter, Texture, TextureFormat};
use std::collections::TryReserveError;

/// Premultiplied RGBA image, bottom row first.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    target: Texture,
}

impl Frame {
    pub fn try_new(width: usize, height: usize) -> Result<Self, TryReserveError> {
        Ok(Self {
            target: Texture::try_new(width, height, TextureFormat::Rgba32F, Filter::Nearest)?,
        })
    }

    pub fn width(&self) -> usize {
        self.target.width()
    }

    pub fn height(&self) -> usize {
        self.target.height()
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.width(), self.height())
    }

    pub fn pixel(&self, x: usize, y: usize) -> [f32; 4] {
        self.target.fetch(x, y)
    }

    pub fn texture(&self) -> &Texture {
        &self.target
    }

    pub fn texture_mut(&mut self) -> &mut Texture {
        &mut self.target
    }

    pub fn clear(&mut self) {
        self.target.fill([0.0; 4]);
    }

    /// 8-bit RGBA in storage order (bottom row first).
    pub fn to_rgba8(&self) -> Vec<u8> {
        self.rows_rgba8((0..self.height()).collect())
    }

    /// 8-bit RGBA with the top row first, as image files expect.
    pub fn to_rgba8_top_down(&self) -> Vec<u8> {
        self.rows_rgba8((0..self.height()).rev().collect())
    }

    fn rows_rgba8(&self, rows: Vec<usize>) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.width() * self.height() * 4);
        for y in rows {
            for x in 0..self.width() {
                out.extend(self.pixel(x, y).map(to_unorm8));
            }
        }
        out
    }

    /// Fraction of pixels with non-zero coverage.
    pub fn coverage(&self) -> f32 {
        let (w, h) = self.dims();
        let covered = (0..h)
            .flat_map(|y| (0..w).map(move |x| (x, y)))
            .filter(|&(x, y)| self.pixel(x, y)[3] > 0.0)
            .count();
        covered as f32 / (w * h) as f32
    }
}

fn to_unorm8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Opaque layer drawn under the dye.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Backdrop {
    Solid(Rgb),
    Gradient { top: Rgb, bottom: Rgb },
}

/// Clears `frame` to transparent, draws the backdrop if any, then blends
/// the dye over it.
pub fn composite(
    frame: &mut Frame,
    dye: &Texture,
    backdrop: Option<Backdrop>,
    library: &mut KernelLibrary,
) {
    frame.clear();
    if let Some(backdrop) = backdrop {
        let (top, bottom) = match backdrop {
            Backdrop::Solid(color) => (color, color),
            Backdrop::Gradient { top, bottom } => (top, bottom),
        };
        if library.plain(KernelSource::Color).is_some() {
            kernel::color(frame.texture_mut(), top.to_array(), bottom.to_array());
        }
    }
    if library.plain(KernelSource::Display).is_some() {
        kernel::display(frame.texture_mut(), dye);
    }
}
