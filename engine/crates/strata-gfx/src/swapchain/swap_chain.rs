use crate::{
    backend::DeviceBackend,
    basic::{
        error::{GfxError, GfxResult},
        format::Format,
    },
    resources::handles::TextureHandle,
    swapchain::surface::{PresentMode, SurfaceCapabilities, SwapChainConfig},
};

/// 按优先级排列的呈现格式
pub const FORMAT_PREFERENCE: [Format; 4] = [Format::Bgra8Srgb, Format::Rgba8Srgb, Format::Bgra8Unorm, Format::Rgba8];

/// 创建交换链的参数
pub struct SwapChainInfo<S> {
    /// backend 用来创建 surface 的来源，例如窗口的 raw handle
    pub surface: S,
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
    /// 负责呈现的 queue
    pub present_queue: usize,
}

// 协商
pub fn choose_format(capabilities: &SurfaceCapabilities) -> GfxResult<Format> {
    FORMAT_PREFERENCE
        .iter()
        .copied()
        .find(|format| capabilities.formats.contains(format))
        .ok_or_else(|| {
            GfxError::Initialization(format!(
                "surface supports none of the presentation formats {:?} (offered {:?})",
                FORMAT_PREFERENCE, capabilities.formats
            ))
        })
}

pub fn choose_extent(capabilities: &SurfaceCapabilities, width: u32, height: u32) -> (u32, u32) {
    let (min_w, min_h) = capabilities.min_extent;
    let (max_w, max_h) = capabilities.max_extent;
    (width.max(min_w).min(max_w), height.max(min_h).min(max_h))
}

pub fn choose_present_mode(capabilities: &SurfaceCapabilities, vsync: bool) -> PresentMode {
    let preferred = if vsync { PresentMode::Mailbox } else { PresentMode::Immediate };
    if capabilities.present_modes.contains(&preferred) { preferred } else { PresentMode::Fifo }
}

pub fn choose_image_count(capabilities: &SurfaceCapabilities) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 { count.min(capabilities.max_image_count) } else { count }
}

/// 根据 surface 能力和请求的尺寸得到完整的交换链参数
pub fn negotiate(
    capabilities: &SurfaceCapabilities,
    width: u32,
    height: u32,
    vsync: bool,
    present_family: u32,
) -> GfxResult<SwapChainConfig> {
    let format = choose_format(capabilities)?;
    let (width, height) = choose_extent(capabilities, width, height);
    Ok(SwapChainConfig {
        format,
        width,
        height,
        present_mode: choose_present_mode(capabilities, vsync),
        image_count: choose_image_count(capabilities),
        present_family,
    })
}

/// device 表中的交换链表项
pub struct GfxSwapChain<D: DeviceBackend> {
    pub(crate) surface: D::Surface,
    /// 在 resize 中会被替换，只有在 destroy 时为 None
    pub(crate) native: Option<D::SwapChain>,
    pub(crate) images: Vec<TextureHandle>,
    pub(crate) current_image: u32,
    pub(crate) config: SwapChainConfig,
    pub(crate) vsync: bool,
    pub(crate) present_queue: usize,
    /// 专门用于 acquire 的 fence
    pub(crate) acquire_fence: D::Fence,
}

// getters
impl<D: DeviceBackend> GfxSwapChain<D> {
    #[inline]
    pub fn images(&self) -> &[TextureHandle] {
        &self.images
    }

    #[inline]
    pub fn current_image_index(&self) -> u32 {
        self.current_image
    }

    #[inline]
    pub fn current_image(&self) -> Option<TextureHandle> {
        self.images.get(self.current_image as usize).copied()
    }

    #[inline]
    pub fn format(&self) -> Format {
        self.config.format
    }

    #[inline]
    pub fn extent(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    #[inline]
    pub fn present_mode(&self) -> PresentMode {
        self.config.present_mode
    }

    #[inline]
    pub fn vsync(&self) -> bool {
        self.vsync
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> SurfaceCapabilities {
        SurfaceCapabilities {
            min_image_count: 2,
            max_image_count: 3,
            min_extent: (64, 64),
            max_extent: (1920, 1080),
            formats: vec![Format::Rgba8, Format::Bgra8Unorm],
            present_modes: vec![PresentMode::Fifo, PresentMode::Immediate],
            present_supported: true,
        }
    }

    #[test]
    fn extent_is_clamped() {
        let caps = caps();
        assert_eq!(choose_extent(&caps, 4000, 10), (1920, 64));
        assert_eq!(choose_extent(&caps, 800, 600), (800, 600));
    }

    #[test]
    fn format_follows_preference_order() {
        let mut caps = caps();
        assert_eq!(choose_format(&caps), Ok(Format::Bgra8Unorm));

        caps.formats.push(Format::Rgba8Srgb);
        assert_eq!(choose_format(&caps), Ok(Format::Rgba8Srgb));

        caps.formats = vec![Format::Rgba32];
        assert!(matches!(choose_format(&caps), Err(GfxError::Initialization(_))));
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        let mut caps = caps();
        assert_eq!(choose_present_mode(&caps, false), PresentMode::Immediate);
        assert_eq!(choose_present_mode(&caps, true), PresentMode::Fifo);

        caps.present_modes = vec![PresentMode::Mailbox, PresentMode::Fifo];
        assert_eq!(choose_present_mode(&caps, true), PresentMode::Mailbox);
        assert_eq!(choose_present_mode(&caps, false), PresentMode::Fifo);
    }

    #[test]
    fn image_count_is_capped_only_when_max_is_set() {
        let mut caps = caps();
        caps.min_image_count = 3;
        assert_eq!(choose_image_count(&caps), 3);

        caps.max_image_count = 0;
        assert_eq!(choose_image_count(&caps), 4);
    }
}
