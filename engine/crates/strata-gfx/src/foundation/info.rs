use raw_window_handle::RawDisplayHandle;

use crate::basic::flags::{DeviceFlags, QueueFlags};

/// 创建 context 时的参数
#[derive(Debug, Clone)]
pub struct AppInfo {
    /// 会传给驱动，出现在调试工具中
    pub app_name: String,
    /// 开启 validation layer 和 debug messenger
    pub enable_validation: bool,
    /// 需要呈现到窗口时提供，用于启用对应的 surface extension
    pub display: Option<RawDisplayHandle>,
}

impl Default for AppInfo {
    fn default() -> Self {
        Self {
            app_name: "strata".to_string(),
            enable_validation: cfg!(debug_assertions),
            display: None,
        }
    }
}

impl AppInfo {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            ..Default::default()
        }
    }
}

/// device 唯一的 descriptor pool 的容量，创建之后不会增长
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorPoolSizes {
    pub max_sets: u32,
    pub storage_buffers: u32,
    pub uniform_buffers: u32,
    pub textures: u32,
}

impl Default for DescriptorPoolSizes {
    fn default() -> Self {
        Self {
            max_sets: 1024,
            storage_buffers: 1024,
            uniform_buffers: 1024,
            textures: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub flags: DeviceFlags,
    /// 每一项请求一个 queue，queue index 即数组下标
    pub queues: Vec<QueueFlags>,
    pub descriptor_pool: DescriptorPoolSizes,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            flags: DeviceFlags::PREFER_DISCRETE,
            queues: vec![QueueFlags::GRAPHICS],
            descriptor_pool: DescriptorPoolSizes::default(),
        }
    }
}
