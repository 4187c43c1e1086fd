use crate::{basic::format::Format, resources::handles::SwapChainHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureUsage {
    Sampled,
    ColorAttachment,
    DepthStencilAttachment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureDimension {
    D1,
    #[default]
    D2,
    D3,
}

/// texture 的逻辑状态
///
/// 每个状态在 backend 中对应一组 (stage, access, layout)，
/// 状态之间的转换通过 `transition_texture` 录制为 barrier。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureState {
    /// 内容未定义，转出这个状态时会丢弃原有内容
    #[default]
    Undefined,
    UploadDestination,
    ShaderRead,
    RenderTarget,
    Present,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureInfo {
    pub usage: TextureUsage,
    pub dimension: TextureDimension,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub format: Format,
    pub mip_levels: u32,
}

impl TextureInfo {
    /// 单层 mip 的 2D 纹理
    pub fn new_2d(usage: TextureUsage, format: Format, width: u32, height: u32) -> Self {
        Self {
            usage,
            dimension: TextureDimension::D2,
            width,
            height,
            depth: 1,
            format,
            mip_levels: 1,
        }
    }

    /// base mip 的字节数
    pub fn base_level_size(&self) -> u64 {
        self.width as u64 * self.height.max(1) as u64 * self.depth.max(1) as u64 * self.format.bytes_per_texel() as u64
    }
}

/// texture 的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureKind {
    /// 自己持有显存
    Allocated,
    /// 由交换链持有，不能单独销毁
    SwapChainImage { swap_chain: SwapChainHandle },
}

/// device 表中的 texture 表项
pub struct GfxTexture<N> {
    pub(crate) info: TextureInfo,
    pub(crate) kind: TextureKind,
    pub(crate) state: TextureState,
    pub(crate) native: N,
}

// getters
impl<N> GfxTexture<N> {
    #[inline]
    pub fn info(&self) -> &TextureInfo {
        &self.info
    }

    #[inline]
    pub fn kind(&self) -> TextureKind {
        self.kind
    }

    /// 最近一次录制的 transition 之后的逻辑状态
    #[inline]
    pub fn state(&self) -> TextureState {
        self.state
    }

    #[inline]
    pub fn native(&self) -> &N {
        &self.native
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_level_size_uses_format_size() {
        let info = TextureInfo::new_2d(TextureUsage::Sampled, Format::Rgba8, 4, 2);
        assert_eq!(info.base_level_size(), 32);

        let info = TextureInfo {
            dimension: TextureDimension::D1,
            height: 0,
            ..TextureInfo::new_2d(TextureUsage::Sampled, Format::Rg32, 16, 1)
        };
        assert_eq!(info.base_level_size(), 128);
    }
}
