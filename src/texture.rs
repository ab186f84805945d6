use crate::grid::Grid2;
use rayon::prelude::*;
use std::collections::TryReserveError;
use std::sync::OnceLock;

const PAR_THRESHOLD_DEFAULT: usize = 65_536;
const PAR_MIN_WORK_PER_THREAD: usize = 2048;

fn parallel_threshold() -> usize {
    static THRESHOLD: OnceLock<usize> = OnceLock::new();
    *THRESHOLD.get_or_init(|| {
        std::env::var("SMOKE_PAR_THRESHOLD")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(PAR_THRESHOLD_DEFAULT)
    })
}

fn should_parallel(len: usize) -> bool {
    if len < parallel_threshold() {
        return false;
    }
    let threads = rayon::current_num_threads().max(1);
    len / threads >= PAR_MIN_WORK_PER_THREAD
}

/// Storage layout of a render target. Half-float formats are preferred;
/// `Rgba32F` is the last resort when no half-float target is renderable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    R16F,
    Rg16F,
    Rgba16F,
    Rgba32F,
}

impl TextureFormat {
    pub fn channels(self) -> usize {
        match self {
            TextureFormat::R16F => 1,
            TextureFormat::Rg16F => 2,
            TextureFormat::Rgba16F | TextureFormat::Rgba32F => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TextureFormat::R16F => "R16F",
            TextureFormat::Rg16F => "RG16F",
            TextureFormat::Rgba16F => "RGBA16F",
            TextureFormat::Rgba32F => "RGBA32F",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Filter {
    Nearest,
    Linear,
}

/// Per-texel input of a fragment pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Fragment {
    pub x: usize,
    pub y: usize,
    pub uv: (f32, f32),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Texture {
    grid: Grid2,
    format: TextureFormat,
    filter: Filter,
    data: Vec<f32>,
}

impl Texture {
    pub fn try_new(
        width: usize,
        height: usize,
        format: TextureFormat,
        filter: Filter,
    ) -> Result<Self, TryReserveError> {
        let grid = Grid2::new(width, height);
        // Overflow becomes a capacity error from `try_reserve_exact`.
        let len = width
            .checked_mul(height)
            .and_then(|texels| texels.checked_mul(format.channels()))
            .unwrap_or(usize::MAX);
        let mut data = Vec::new();
        data.try_reserve_exact(len)?;
        data.resize(len, 0.0);
        Ok(Self {
            grid,
            format,
            filter,
            data,
        })
    }

    pub fn from_fn(
        width: usize,
        height: usize,
        format: TextureFormat,
        filter: Filter,
        f: impl Fn(usize, usize) -> [f32; 4],
    ) -> Self {
        let grid = Grid2::new(width, height);
        let channels = format.channels();
        let mut data = Vec::with_capacity(grid.size() * channels);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&f(x, y)[..channels]);
            }
        }
        Self {
            grid,
            format,
            filter,
            data,
        }
    }

    pub fn grid(&self) -> Grid2 {
        self.grid
    }

    pub fn width(&self) -> usize {
        self.grid.width()
    }

    pub fn height(&self) -> usize {
        self.grid.height()
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn filter(&self) -> Filter {
        self.filter
    }

    pub fn texel_size(&self) -> (f32, f32) {
        self.grid.texel_size()
    }

    pub fn fetch(&self, x: usize, y: usize) -> [f32; 4] {
        let channels = self.format.channels();
        let start = self.grid.idx(x, y) * channels;
        let mut out = [0.0, 0.0, 0.0, 1.0];
        out[..channels].copy_from_slice(&self.data[start..start + channels]);
        out
    }

    pub fn fetch_clamped(&self, x: i32, y: i32) -> [f32; 4] {
        let (cx, cy) = self.grid.clamp_coord(x, y);
        self.fetch(cx, cy)
    }

    pub fn set(&mut self, x: usize, y: usize, value: [f32; 4]) {
        let channels = self.format.channels();
        let start = self.grid.idx(x, y) * channels;
        self.data[start..start + channels].copy_from_slice(&value[..channels]);
    }

    pub fn sample(&self, uv: (f32, f32)) -> [f32; 4] {
        match self.filter {
            Filter::Nearest => self.sample_nearest(uv),
            Filter::Linear => self.sample_linear(uv),
        }
    }

    pub fn sample_nearest(&self, uv: (f32, f32)) -> [f32; 4] {
        let x = (uv.0 * self.width() as f32).floor() as i32;
        let y = (uv.1 * self.height() as f32).floor() as i32;
        self.fetch_clamped(x, y)
    }

    pub fn sample_linear(&self, uv: (f32, f32)) -> [f32; 4] {
        let gx = uv.0 * self.width() as f32 - 0.5;
        let gy = uv.1 * self.height() as f32 - 0.5;
        let x0 = gx.floor() as i32;
        let y0 = gy.floor() as i32;
        let sx = gx - x0 as f32;
        let sy = gy - y0 as f32;
        let v00 = self.fetch_clamped(x0, y0);
        let v10 = self.fetch_clamped(x0 + 1, y0);
        let v01 = self.fetch_clamped(x0, y0 + 1);
        let v11 = self.fetch_clamped(x0 + 1, y0 + 1);
        let mut out = [0.0; 4];
        for c in 0..4 {
            let vx0 = v00[c] + (v10[c] - v00[c]) * sx;
            let vx1 = v01[c] + (v11[c] - v01[c]) * sx;
            out[c] = vx0 + (vx1 - vx0) * sy;
        }
        out
    }

    /// Runs `f` once per texel and stores the channels this format keeps.
    pub fn render(&mut self, f: impl Fn(Fragment) -> [f32; 4] + Sync) {
        let grid = self.grid;
        let channels = self.format.channels();
        let row_len = grid.width() * channels;
        let shade_row = |y: usize, row: &mut [f32]| {
            for x in 0..grid.width() {
                let value = f(Fragment {
                    x,
                    y,
                    uv: grid.texel_center(x, y),
                });
                row[x * channels..(x + 1) * channels].copy_from_slice(&value[..channels]);
            }
        };
        if should_parallel(self.data.len()) {
            self.data
                .par_chunks_mut(row_len)
                .enumerate()
                .for_each(|(y, row)| shade_row(y, row));
        } else {
            for (y, row) in self.data.chunks_mut(row_len).enumerate() {
                shade_row(y, row);
            }
        }
    }

    /// Like [`Texture::render`], composited over the current contents with
    /// premultiplied-alpha blending (`ONE, ONE_MINUS_SRC_ALPHA`).
    pub fn render_blended(&mut self, f: impl Fn(Fragment) -> [f32; 4] + Sync) {
        let grid = self.grid;
        let channels = self.format.channels();
        assert_eq!(channels, 4, "blending needs an RGBA target");
        let row_len = grid.width() * channels;
        let blend_row = |y: usize, row: &mut [f32]| {
            for x in 0..grid.width() {
                let src = f(Fragment {
                    x,
                    y,
                    uv: grid.texel_center(x, y),
                });
                let dst = &mut row[x * 4..(x + 1) * 4];
                let keep = 1.0 - src[3];
                for c in 0..4 {
                    dst[c] = src[c] + dst[c] * keep;
                }
            }
        };
        if should_parallel(self.data.len()) {
            self.data
                .par_chunks_mut(row_len)
                .enumerate()
                .for_each(|(y, row)| blend_row(y, row));
        } else {
            for (y, row) in self.data.chunks_mut(row_len).enumerate() {
                blend_row(y, row);
            }
        }
    }

    pub fn fill(&mut self, value: [f32; 4]) {
        let channels = self.format.channels();
        for texel in self.data.chunks_mut(channels) {
            texel.copy_from_slice(&value[..channels]);
        }
    }

    pub fn channel_sum(&self, channel: usize) -> f32 {
        self.channel_values(channel).sum()
    }

    pub fn channel_mean_abs(&self, channel: usize) -> f32 {
        let total: f32 = self.channel_values(channel).map(f32::abs).sum();
        total / self.grid.size() as f32
    }

    pub fn channel_max_abs(&self, channel: usize) -> f32 {
        self.channel_values(channel)
            .map(f32::abs)
            .fold(0.0_f32, f32::max)
    }

    fn channel_values(&self, channel: usize) -> impl Iterator<Item = f32> + '_ {
        let channels = self.format.channels();
        assert!(channel < channels, "channel {channel} not stored in {}", self.format.name());
        self.data.iter().skip(channel).step_by(channels).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f32, b: f32, tol: f32) {
        assert!(
            (a - b).abs() <= tol,
            "expected {a} to be within {tol} of {b}"
        );
    }

    #[test]
    fn oversized_texture_is_an_error() {
        let wide = Texture::try_new(usize::MAX / 2, 4, TextureFormat::R16F, Filter::Nearest);
        assert!(wide.is_err());
        let square = Texture::try_new(1 << 40, 1 << 40, TextureFormat::Rgba32F, Filter::Linear);
        assert!(square.is_err());
    }

    #[test]
    fn fetch_pads_missing_channels() {
        let tex = Texture::from_fn(2, 2, TextureFormat::R16F, Filter::Nearest, |x, y| {
            [(x + y * 2) as f32, 9.0, 9.0, 9.0]
        });
        assert_eq!(tex.fetch(1, 1), [3.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn sample_linear_matches_texel_center() {
        let tex = Texture::from_fn(4, 4, TextureFormat::Rg16F, Filter::Linear, |x, y| {
            [x as f32, y as f32, 0.0, 0.0]
        });
        let uv = tex.grid().texel_center(2, 1);
        let value = tex.sample(uv);
        assert_close(value[0], 2.0, 1e-5);
        assert_close(value[1], 1.0, 1e-5);
    }

    #[test]
    fn sample_linear_interpolates_between_centers() {
        let tex = Texture::from_fn(2, 1, TextureFormat::R16F, Filter::Linear, |x, _| {
            [x as f32 * 10.0, 0.0, 0.0, 0.0]
        });
        assert_close(tex.sample((0.5, 0.5))[0], 5.0, 1e-5);
    }

    #[test]
    fn sample_clamps_to_edge() {
        let tex = Texture::from_fn(3, 1, TextureFormat::R16F, Filter::Linear, |x, _| {
            [x as f32, 0.0, 0.0, 0.0]
        });
        assert_close(tex.sample((-1.0, 0.5))[0], 0.0, 1e-6);
        assert_close(tex.sample((2.0, 0.5))[0], 2.0, 1e-6);
    }

    #[test]
    fn sample_nearest_picks_containing_texel() {
        let tex = Texture::from_fn(4, 1, TextureFormat::R16F, Filter::Nearest, |x, _| {
            [x as f32, 0.0, 0.0, 0.0]
        });
        assert_eq!(tex.sample((0.3, 0.5))[0], 1.0);
        assert_eq!(tex.sample((0.99, 0.5))[0], 3.0);
    }

    #[test]
    fn render_writes_stored_channels_only() {
        let mut tex = Texture::try_new(3, 2, TextureFormat::Rg16F, Filter::Nearest).unwrap();
        tex.render(|frag| [frag.x as f32, frag.y as f32, 7.0, 7.0]);
        assert_eq!(tex.fetch(2, 1), [2.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn channel_reductions() {
        let tex = Texture::from_fn(2, 2, TextureFormat::Rg16F, Filter::Nearest, |x, y| {
            [x as f32 - 1.0, y as f32, 0.0, 0.0]
        });
        assert_close(tex.channel_sum(0), -2.0, 1e-6);
        assert_close(tex.channel_mean_abs(0), 0.5, 1e-6);
        assert_close(tex.channel_max_abs(1), 1.0, 1e-6);
    }
}
