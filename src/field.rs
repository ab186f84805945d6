use crate::kernel::{self, KernelLibrary, KernelSource};
use crate::texture::{Filter, Texture, TextureFormat};
use std::collections::TryReserveError;

/// Ping-pong pair of textures. Passes read `read()` and write `write()`;
/// `swap()` publishes what was just written.
#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    textures: [Texture; 2],
    read: usize,
}

impl Field {
    pub fn try_new(
        width: usize,
        height: usize,
        format: TextureFormat,
        filter: Filter,
    ) -> Result<Self, TryReserveError> {
        let front = Texture::try_new(width, height, format, filter)?;
        let back = Texture::try_new(width, height, format, filter)?;
        Ok(Self {
            textures: [front, back],
            read: 0,
        })
    }

    pub fn width(&self) -> usize {
        self.read().width()
    }

    pub fn height(&self) -> usize {
        self.read().height()
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.width(), self.height())
    }

    pub fn texel_size(&self) -> (f32, f32) {
        self.read().texel_size()
    }

    pub fn format(&self) -> TextureFormat {
        self.read().format()
    }

    pub fn filter(&self) -> Filter {
        self.read().filter()
    }

    pub fn read(&self) -> &Texture {
        &self.textures[self.read]
    }

    pub fn read_mut(&mut self) -> &mut Texture {
        &mut self.textures[self.read]
    }

    pub fn write(&mut self) -> &mut Texture {
        &mut self.textures[1 - self.read]
    }

    pub fn swap(&mut self) {
        self.read = 1 - self.read;
    }

    /// Borrows both halves at once for a pass that reads its own field.
    pub fn split(&mut self) -> (&Texture, &mut Texture) {
        let (first, second) = self.textures.split_at_mut(1);
        if self.read == 0 {
            (&first[0], &mut second[0])
        } else {
            (&second[0], &mut first[0])
        }
    }

    /// New field of the given size whose `read` is `self.read()` copied
    /// through the copy kernel and whose `write` is blank. Without a copy
    /// kernel both halves are blank.
    pub fn resampled(
        &self,
        width: usize,
        height: usize,
        library: &mut KernelLibrary,
    ) -> Result<Self, TryReserveError> {
        let mut field = Self::try_new(width, height, self.format(), self.filter())?;
        if library.plain(KernelSource::Copy).is_some() {
            kernel::copy(field.read_mut(), self.read());
        }
        Ok(field)
    }
}
