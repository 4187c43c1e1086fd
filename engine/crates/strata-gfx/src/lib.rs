//! Strata 的 GFX 层
//!
//! 在应用的渲染代码和 GPU 驱动之间提供一层硬件抽象：按 device 划分的资源 handle 表，
//! command list 的录制状态机与提交同步，descriptor set layout 的去重缓存，以及交换链。
//!
//! 所有状态都挂在显式的 [`GfxContext`] 上，通过 [`backend`] 中的 trait 访问驱动：
//! [`backend::vulkan::VulkanBackend`] 基于 ash，[`backend::headless::HeadlessBackend`]
//! 在 CPU 上模拟，不需要 GPU。

pub mod backend;
pub mod basic;
pub mod commands;
pub mod descriptors;
pub mod foundation;
pub mod pipelines;
pub mod resources;
pub mod swapchain;

pub use backend::{DeviceBackend, GfxBackend};
pub use basic::{
    error::{ErrorSink, GfxError, GfxResult},
    flags::{AdapterKind, DeviceFlags, QueueFlags, ShaderStages},
    format::Format,
};
pub use commands::{
    command_list::{CommandListState, IndexType, RenderPassInfo, Scissor, Viewport},
    submit::{SubmitInfo, SubmitSignals},
};
pub use descriptors::{
    descriptor_set::{DescriptorBindingInfo, DescriptorSetInfo, DescriptorType, DescriptorWrite},
    layout_cache::DescriptorSetLayoutId,
};
pub use foundation::{
    adapter::{AdapterInfo, AdapterLimits, QueueFamilyInfo, QueueSlot},
    context::GfxContext,
    device::GfxDevice,
    info::{AppInfo, DescriptorPoolSizes, DeviceInfo},
};
pub use pipelines::pipeline::{
    ComputePipelineInfo, GraphicsPipelineInfo, PipelineConstantBlock, PipelineKind, VertexAttribute,
};
pub use resources::{
    buffer::{BufferInfo, BufferType},
    handles::{
        BufferHandle, CommandListHandle, DescriptorSetHandle, DeviceHandle, FenceHandle, HandleKind, PipelineHandle,
        SamplerHandle, SemaphoreHandle, SwapChainHandle, TextureHandle,
    },
    sampler::{SamplerAddressMode, SamplerFilter, SamplerInfo},
    texture::{TextureDimension, TextureInfo, TextureKind, TextureState, TextureUsage},
};
pub use swapchain::{
    surface::{PresentMode, SurfaceCapabilities, SwapChainConfig},
    swap_chain::SwapChainInfo,
};
