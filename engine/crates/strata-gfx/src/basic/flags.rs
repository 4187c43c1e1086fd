bitflags::bitflags! {
    /// 创建 device 时对 adapter 的偏好
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DeviceFlags: u32 {
        const PREFER_INTEGRATED = 1 << 0;
        const PREFER_DISCRETE = 1 << 1;
    }
}

bitflags::bitflags! {
    /// queue 的能力
    ///
    /// 请求一个 queue 时，被选中的 queue family 必须包含请求的全部能力。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct QueueFlags: u32 {
        const GRAPHICS = 1 << 0;
        const COMPUTE = 1 << 1;
        const TRANSFER = 1 << 2;
    }
}

bitflags::bitflags! {
    /// 资源对哪些 shader stage 可见
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ShaderStages: u32 {
        const VERTEX = 1 << 0;
        const FRAGMENT = 1 << 1;
        const COMPUTE = 1 << 2;

        const ALL_GRAPHICS = Self::VERTEX.bits() | Self::FRAGMENT.bits();
    }
}

/// adapter 的物理类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterKind {
    Discrete,
    Integrated,
    Virtual,
    Cpu,
    Other,
}

impl AdapterKind {
    /// flags 里偏好的类型，同时设置两个偏好时 discrete 优先
    pub fn preferred_by(flags: DeviceFlags) -> Option<Self> {
        if flags.contains(DeviceFlags::PREFER_DISCRETE) {
            Some(Self::Discrete)
        } else if flags.contains(DeviceFlags::PREFER_INTEGRATED) {
            Some(Self::Integrated)
        } else {
            None
        }
    }
}
