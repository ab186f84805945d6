use crate::error::EngineError;
use crate::texture::TextureFormat;

/// What the rendering context reported at acquisition time.
#[derive(Clone, Debug, PartialEq)]
pub struct Capabilities {
    pub renderable: Vec<TextureFormat>,
    pub linear_filtering: bool,
    pub max_texture_size: usize,
}

impl Capabilities {
    pub fn full() -> Self {
        Self {
            renderable: vec![
                TextureFormat::R16F,
                TextureFormat::Rg16F,
                TextureFormat::Rgba16F,
                TextureFormat::Rgba32F,
            ],
            linear_filtering: true,
            max_texture_size: 16384,
        }
    }

    pub fn supports(&self, format: TextureFormat) -> bool {
        self.renderable.contains(&format)
    }
}

/// Storage format chosen for each channel-count role.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FormatSet {
    pub rgba: TextureFormat,
    pub rg: TextureFormat,
    pub r: TextureFormat,
}

impl FormatSet {
    pub fn select(caps: &Capabilities) -> Result<Self, EngineError> {
        Ok(Self {
            rgba: supported_or_wider(TextureFormat::Rgba16F, caps)?,
            rg: supported_or_wider(TextureFormat::Rg16F, caps)?,
            r: supported_or_wider(TextureFormat::R16F, caps)?,
        })
    }
}

fn wider(format: TextureFormat) -> Option<TextureFormat> {
    match format {
        TextureFormat::R16F => Some(TextureFormat::Rg16F),
        TextureFormat::Rg16F => Some(TextureFormat::Rgba16F),
        TextureFormat::Rgba16F => Some(TextureFormat::Rgba32F),
        TextureFormat::Rgba32F => None,
    }
}

fn supported_or_wider(
    preferred: TextureFormat,
    caps: &Capabilities,
) -> Result<TextureFormat, EngineError> {
    let mut candidate = Some(preferred);
    while let Some(format) = candidate {
        if caps.supports(format) {
            if format != preferred {
                log::debug!("{} not renderable, using {}", preferred.name(), format.name());
            }
            return Ok(format);
        }
        candidate = wider(format);
    }
    Err(EngineError::Unsupported(format!(
        "no renderable format for {} targets",
        preferred.name()
    )))
}

pub fn is_mobile(user_agent: &str) -> bool {
    let ua = user_agent.to_ascii_lowercase();
    ua.contains("mobi") || ua.contains("android")
}

/// Grid dimensions for a target resolution on a `width` x `height` surface:
/// the short axis gets `target`, the long axis `target * aspect`.
pub fn resolution_for(target: u32, width: u32, height: u32) -> (usize, usize) {
    let width = width.max(1) as f32;
    let height = height.max(1) as f32;
    let mut aspect = width / height;
    if aspect < 1.0 {
        aspect = 1.0 / aspect;
    }
    let min = (target as f32).round().max(1.0) as usize;
    let max = (target as f32 * aspect).round().max(1.0) as usize;
    if width > height {
        (max, min)
    } else {
        (min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(formats: &[TextureFormat]) -> Capabilities {
        Capabilities {
            renderable: formats.to_vec(),
            ..Capabilities::full()
        }
    }

    #[test]
    fn prefers_half_float_formats() {
        let set = FormatSet::select(&Capabilities::full()).unwrap();
        assert_eq!(set.rgba, TextureFormat::Rgba16F);
        assert_eq!(set.rg, TextureFormat::Rg16F);
        assert_eq!(set.r, TextureFormat::R16F);
    }

    #[test]
    fn falls_back_to_wider_formats() {
        let set = FormatSet::select(&caps(&[TextureFormat::Rgba16F])).unwrap();
        assert_eq!(set.rg, TextureFormat::Rgba16F);
        assert_eq!(set.r, TextureFormat::Rgba16F);

        let set =
            FormatSet::select(&caps(&[TextureFormat::Rg16F, TextureFormat::Rgba32F])).unwrap();
        assert_eq!(set.rgba, TextureFormat::Rgba32F);
        assert_eq!(set.rg, TextureFormat::Rg16F);
        assert_eq!(set.r, TextureFormat::Rg16F);
    }

    #[test]
    fn missing_formats_are_unsupported() {
        let err = FormatSet::select(&caps(&[TextureFormat::R16F])).unwrap_err();
        assert!(matches!(err, EngineError::Unsupported(_)));
    }

    #[test]
    fn mobile_user_agents() {
        assert!(is_mobile("Mozilla/5.0 (iPhone) Mobile/15E148"));
        assert!(is_mobile("Mozilla/5.0 (Linux; ANDROID 14)"));
        assert!(!is_mobile("Mozilla/5.0 (X11; Linux x86_64)"));
    }

    #[test]
    fn resolution_follows_long_axis() {
        assert_eq!(resolution_for(128, 1920, 1080), (228, 128));
        assert_eq!(resolution_for(128, 1080, 1920), (128, 228));
        assert_eq!(resolution_for(256, 800, 800), (256, 256));
    }
}
