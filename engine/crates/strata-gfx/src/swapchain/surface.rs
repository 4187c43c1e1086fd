use crate::basic::format::Format;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresentMode {
    Immediate,
    Mailbox,
    Fifo,
    FifoRelaxed,
}

/// surface 支持的参数范围
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceCapabilities {
    pub min_image_count: u32,
    /// 0 表示没有上限
    pub max_image_count: u32,
    pub min_extent: (u32, u32),
    pub max_extent: (u32, u32),
    pub formats: Vec<Format>,
    pub present_modes: Vec<PresentMode>,
    /// 用于呈现的 queue 是否支持这个 surface
    pub present_supported: bool,
}

impl Default for SurfaceCapabilities {
    fn default() -> Self {
        Self {
            min_image_count: 2,
            max_image_count: 0,
            min_extent: (1, 1),
            max_extent: (16384, 16384),
            formats: vec![Format::Bgra8Srgb, Format::Bgra8Unorm],
            present_modes: vec![PresentMode::Fifo],
            present_supported: true,
        }
    }
}

/// 协商之后的交换链参数，交给 backend 创建 native 交换链
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapChainConfig {
    pub format: Format,
    pub width: u32,
    pub height: u32,
    pub present_mode: PresentMode,
    pub image_count: u32,
    pub present_family: u32,
}
