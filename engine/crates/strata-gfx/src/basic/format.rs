/// 纹理、顶点属性和交换链共用的格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Format {
    #[default]
    Undefined,
    Rg8,
    Rg32,
    Rgb8,
    Rgb32,
    Rgba8,
    Rgba32,
    Depth16,
    Depth24Stencil8,
    Depth32,
    Depth32Stencil8,

    // 交换链协商使用的呈现格式
    Bgra8Srgb,
    Rgba8Srgb,
    Bgra8Unorm,
}

impl Format {
    /// 单个 texel（或者单个顶点属性）占用的字节数
    pub fn bytes_per_texel(self) -> u32 {
        match self {
            Format::Undefined => 0,
            Format::Rg8 => 2,
            Format::Rg32 => 8,
            Format::Rgb8 => 3,
            Format::Rgb32 => 12,
            Format::Rgba8 => 4,
            Format::Rgba32 => 16,
            Format::Depth16 => 2,
            Format::Depth24Stencil8 => 4,
            Format::Depth32 => 4,
            Format::Depth32Stencil8 => 8,
            Format::Bgra8Srgb | Format::Rgba8Srgb | Format::Bgra8Unorm => 4,
        }
    }

    #[inline]
    pub fn is_depth(self) -> bool {
        matches!(self, Format::Depth16 | Format::Depth24Stencil8 | Format::Depth32 | Format::Depth32Stencil8)
    }

    #[inline]
    pub fn has_stencil(self) -> bool {
        matches!(self, Format::Depth24Stencil8 | Format::Depth32Stencil8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_formats() {
        assert!(Format::Depth32.is_depth());
        assert!(!Format::Depth32.has_stencil());
        assert!(Format::Depth24Stencil8.has_stencil());
        assert!(!Format::Rgba8.is_depth());
        assert_eq!(Format::Rgb32.bytes_per_texel(), 12);
    }
}
