use std::fmt;

use slotmap::{Key, new_key_type};

new_key_type! {
    /// context 中 device 表的 key，同时也是对外的 device handle
    pub struct DeviceHandle;
}

/// handle 的类别，用于错误信息
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Device,
    Buffer,
    Texture,
    Sampler,
    Pipeline,
    DescriptorSet,
    CommandList,
    Fence,
    Semaphore,
    SwapChain,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandleKind::Device => "device",
            HandleKind::Buffer => "buffer",
            HandleKind::Texture => "texture",
            HandleKind::Sampler => "sampler",
            HandleKind::Pipeline => "pipeline",
            HandleKind::DescriptorSet => "descriptor set",
            HandleKind::CommandList => "command list",
            HandleKind::Fence => "fence",
            HandleKind::Semaphore => "semaphore",
            HandleKind::SwapChain => "swap chain",
        };
        f.write_str(name)
    }
}

/// 所有资源 handle 的公共接口
///
/// handle 由 `(device, key)` 组成，key 是 slotmap 的代际 key：
/// slot 会被复用，但旧 handle 的 generation 对不上，查找时只会得到"不存在"。
pub trait ResourceHandle: Copy + Eq + fmt::Debug {
    type Key: Key;
    const KIND: HandleKind;

    fn from_parts(device: DeviceHandle, key: Self::Key) -> Self;
    fn device(&self) -> DeviceHandle;
    fn key(&self) -> Self::Key;
}

macro_rules! define_resource_handle {
    ($(#[$meta:meta])* $handle:ident, $key:ident, $kind:expr) => {
        new_key_type! {
            pub struct $key;
        }

        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub struct $handle {
            pub(crate) device: DeviceHandle,
            pub(crate) key: $key,
        }

        impl ResourceHandle for $handle {
            type Key = $key;
            const KIND: HandleKind = $kind;

            #[inline]
            fn from_parts(device: DeviceHandle, key: $key) -> Self {
                Self { device, key }
            }
            #[inline]
            fn device(&self) -> DeviceHandle {
                self.device
            }
            #[inline]
            fn key(&self) -> $key {
                self.key
            }
        }
    };
}

define_resource_handle!(
    /// GPU buffer
    BufferHandle,
    InnerBufferKey,
    HandleKind::Buffer
);
define_resource_handle!(
    /// GPU texture，包括交换链的 image
    TextureHandle,
    InnerTextureKey,
    HandleKind::Texture
);
define_resource_handle!(SamplerHandle, InnerSamplerKey, HandleKind::Sampler);
define_resource_handle!(
    /// compute 或者 graphics pipeline
    PipelineHandle,
    InnerPipelineKey,
    HandleKind::Pipeline
);
define_resource_handle!(DescriptorSetHandle, InnerDescriptorSetKey, HandleKind::DescriptorSet);
define_resource_handle!(CommandListHandle, InnerCommandListKey, HandleKind::CommandList);
define_resource_handle!(
    /// 一次性的 fence，被 `wait_on_fence` 消费
    FenceHandle,
    InnerFenceKey,
    HandleKind::Fence
);
define_resource_handle!(
    /// 一次性的 semaphore，被下一次 submit 或者 present 消费
    SemaphoreHandle,
    InnerSemaphoreKey,
    HandleKind::Semaphore
);
define_resource_handle!(SwapChainHandle, InnerSwapChainKey, HandleKind::SwapChain);

/// 将 `ResourceHandle::device` 暴露为普通方法，调用方不需要引入 trait
macro_rules! impl_device_getter {
    ($($handle:ident),*) => {
        $(
            impl $handle {
                #[inline]
                pub fn device(&self) -> DeviceHandle {
                    self.device
                }
            }
        )*
    };
}

impl_device_getter!(
    BufferHandle,
    TextureHandle,
    SamplerHandle,
    PipelineHandle,
    DescriptorSetHandle,
    CommandListHandle,
    FenceHandle,
    SemaphoreHandle,
    SwapChainHandle
);
