//! 前端与 native 驱动之间的接缝
//!
//! [`GfxBackend`] 负责 instance 级别的工作，[`DeviceBackend`] 负责 device 上的 native 对象。
//! 前端（handle 表、状态机、同步）只通过这两个 trait 访问驱动，全部静态分发。

pub mod headless;
pub mod vulkan;

use crate::{
    basic::{
        error::{ErrorSink, GfxResult},
        flags::ShaderStages,
    },
    commands::command_list::{IndexType, NativeRenderPass, Scissor, Viewport},
    descriptors::descriptor_set::{DescriptorBindingInfo, DescriptorSetInfo, DescriptorType},
    foundation::{
        adapter::{AdapterInfo, QueueSlot},
        info::{AppInfo, DescriptorPoolSizes},
    },
    pipelines::pipeline::PipelineSource,
    resources::{
        buffer::BufferInfo,
        sampler::SamplerInfo,
        texture::{TextureInfo, TextureState},
    },
    swapchain::surface::{SurfaceCapabilities, SwapChainConfig},
};

pub trait GfxBackend: Sized {
    type Device: DeviceBackend;
    /// backend 自己的配置，例如 headless 的虚拟 adapter 列表
    type Config: Default;

    fn new(app_info: &AppInfo, config: Self::Config, sink: ErrorSink) -> GfxResult<Self>;

    fn adapters(&self) -> &[AdapterInfo];

    fn create_device(
        &mut self,
        adapter_index: usize,
        queues: &[QueueSlot],
        pool_sizes: &DescriptorPoolSizes,
    ) -> GfxResult<Self::Device>;
}

/// device 级别的 native 操作
///
/// 参数的合法性（状态机、类型匹配、handle 有效性）已经由前端检查过，
/// backend 只负责翻译成驱动调用。
pub trait DeviceBackend: Sized {
    type Buffer;
    type Texture;
    type Sampler;
    type DescriptorSetLayout;
    type DescriptorSet;
    type Pipeline;
    type CommandBuffer;
    type Fence;
    type Semaphore;
    type Surface;
    type SwapChain;
    /// 应用用来描述 surface 的来源
    type SurfaceSource;

    // 资源
    fn create_buffer(&mut self, info: &BufferInfo) -> GfxResult<Self::Buffer>;
    fn destroy_buffer(&mut self, buffer: Self::Buffer);
    fn map_buffer<'a>(&mut self, buffer: &'a mut Self::Buffer) -> GfxResult<&'a mut [u8]>;
    fn unmap_buffer(&mut self, buffer: &mut Self::Buffer);

    fn create_texture(&mut self, info: &TextureInfo) -> GfxResult<Self::Texture>;
    fn destroy_texture(&mut self, texture: Self::Texture);
    fn create_sampler(&mut self, info: &SamplerInfo) -> GfxResult<Self::Sampler>;
    fn destroy_sampler(&mut self, sampler: Self::Sampler);

    // descriptor
    fn create_descriptor_set_layout(&mut self, info: &DescriptorSetInfo) -> GfxResult<Self::DescriptorSetLayout>;
    fn destroy_descriptor_set_layout(&mut self, layout: Self::DescriptorSetLayout);
    fn create_descriptor_set(
        &mut self,
        layout: &Self::DescriptorSetLayout,
        bindings: &[DescriptorBindingInfo],
    ) -> GfxResult<Self::DescriptorSet>;
    fn destroy_descriptor_set(&mut self, set: Self::DescriptorSet);
    fn write_buffer_descriptor(
        &mut self,
        set: &mut Self::DescriptorSet,
        slot: u32,
        ty: DescriptorType,
        buffer: &Self::Buffer,
    );
    fn write_texture_descriptor(
        &mut self,
        set: &mut Self::DescriptorSet,
        slot: u32,
        texture: &Self::Texture,
        sampler: &Self::Sampler,
    );

    // pipeline
    fn create_pipeline(
        &mut self,
        source: PipelineSource<'_>,
        set_layouts: &[&Self::DescriptorSetLayout],
    ) -> GfxResult<Self::Pipeline>;
    fn destroy_pipeline(&mut self, pipeline: Self::Pipeline);

    // command buffer
    fn create_command_buffer(&mut self, queue: &QueueSlot) -> GfxResult<Self::CommandBuffer>;
    fn destroy_command_buffer(&mut self, cmd: Self::CommandBuffer);
    fn begin_command_buffer(&mut self, cmd: &mut Self::CommandBuffer) -> GfxResult<()>;
    fn end_command_buffer(&mut self, cmd: &mut Self::CommandBuffer) -> GfxResult<()>;
    fn reset_command_buffer(&mut self, cmd: &mut Self::CommandBuffer) -> GfxResult<()>;

    fn cmd_bind_pipeline(&mut self, cmd: &mut Self::CommandBuffer, pipeline: &Self::Pipeline);
    fn cmd_bind_descriptor_sets(
        &mut self,
        cmd: &mut Self::CommandBuffer,
        pipeline: &Self::Pipeline,
        first_set: u32,
        sets: &[&Self::DescriptorSet],
    );
    fn cmd_push_constants(
        &mut self,
        cmd: &mut Self::CommandBuffer,
        pipeline: &Self::Pipeline,
        stages: ShaderStages,
        offset: u32,
        data: &[u8],
    );
    fn cmd_dispatch(&mut self, cmd: &mut Self::CommandBuffer, group_count: [u32; 3]);
    fn cmd_begin_render_pass(&mut self, cmd: &mut Self::CommandBuffer, pass: &NativeRenderPass<'_, Self::Texture>);
    fn cmd_end_render_pass(&mut self, cmd: &mut Self::CommandBuffer);
    fn cmd_set_viewport(&mut self, cmd: &mut Self::CommandBuffer, viewport: &Viewport);
    fn cmd_set_scissor(&mut self, cmd: &mut Self::CommandBuffer, scissor: &Scissor);
    fn cmd_bind_vertex_buffers(&mut self, cmd: &mut Self::CommandBuffer, first_binding: u32, buffers: &[&Self::Buffer]);
    fn cmd_bind_index_buffer(&mut self, cmd: &mut Self::CommandBuffer, buffer: &Self::Buffer, index_type: IndexType);
    fn cmd_draw(
        &mut self,
        cmd: &mut Self::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );
    fn cmd_draw_indexed(
        &mut self,
        cmd: &mut Self::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
    fn cmd_transition_texture(
        &mut self,
        cmd: &mut Self::CommandBuffer,
        texture: &Self::Texture,
        old: TextureState,
        new: TextureState,
    );
    fn cmd_copy_buffer_to_texture(
        &mut self,
        cmd: &mut Self::CommandBuffer,
        buffer: &Self::Buffer,
        texture: &Self::Texture,
        info: &TextureInfo,
    );

    // 同步
    fn create_fence(&mut self) -> GfxResult<Self::Fence>;
    fn destroy_fence(&mut self, fence: Self::Fence);
    fn fence_signaled(&mut self, fence: &Self::Fence) -> GfxResult<bool>;
    fn wait_fence(&mut self, fence: &Self::Fence) -> GfxResult<()>;
    fn create_semaphore(&mut self) -> GfxResult<Self::Semaphore>;
    fn destroy_semaphore(&mut self, semaphore: Self::Semaphore);
    fn submit(
        &mut self,
        queue: &QueueSlot,
        cmd: &Self::CommandBuffer,
        wait: Option<&Self::Semaphore>,
        signal: Option<&Self::Semaphore>,
        fence: &Self::Fence,
    ) -> GfxResult<()>;
    fn wait_idle(&mut self) -> GfxResult<()>;

    // 呈现
    fn create_surface(&mut self, source: &Self::SurfaceSource) -> GfxResult<Self::Surface>;
    fn destroy_surface(&mut self, surface: Self::Surface);
    fn surface_capabilities(&mut self, surface: &Self::Surface, queue: &QueueSlot) -> GfxResult<SurfaceCapabilities>;
    /// 返回 native 交换链以及它的 image，image 按下标排列
    fn create_swap_chain(
        &mut self,
        surface: &Self::Surface,
        config: &SwapChainConfig,
    ) -> GfxResult<(Self::SwapChain, Vec<Self::Texture>)>;
    fn destroy_swap_chain(&mut self, swap_chain: Self::SwapChain);
    /// 获取下一张 image，阻塞到 fence signal 为止，返回前 fence 已被重置
    fn acquire_next_image(&mut self, swap_chain: &mut Self::SwapChain, fence: &Self::Fence) -> GfxResult<u32>;
    fn present(
        &mut self,
        queue: &QueueSlot,
        swap_chain: &Self::SwapChain,
        image_index: u32,
        wait: Option<&Self::Semaphore>,
    ) -> GfxResult<()>;
}
