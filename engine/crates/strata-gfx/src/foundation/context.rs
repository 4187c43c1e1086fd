use slotmap::SlotMap;

use crate::{
    backend::{DeviceBackend, GfxBackend},
    basic::{
        error::{ErrorSink, GfxError, GfxResult},
        flags::ShaderStages,
    },
    commands::{
        command_list::{GfxCommandList, IndexType, RenderPassInfo, Scissor, Viewport},
        submit::{SubmitInfo, SubmitSignals},
    },
    descriptors::descriptor_set::{DescriptorSetInfo, GfxDescriptorSet},
    foundation::{
        adapter::{AdapterInfo, select_adapter},
        device::GfxDevice,
        info::{AppInfo, DeviceInfo},
    },
    pipelines::pipeline::{ComputePipelineInfo, GfxPipeline, GraphicsPipelineInfo},
    resources::{
        buffer::{BufferInfo, GfxBuffer},
        handles::{
            BufferHandle, CommandListHandle, DescriptorSetHandle, DeviceHandle, FenceHandle, HandleKind,
            PipelineHandle, SamplerHandle, SemaphoreHandle, SwapChainHandle, TextureHandle,
        },
        sampler::{GfxSampler, SamplerInfo},
        texture::{GfxTexture, TextureInfo, TextureState},
    },
    swapchain::swap_chain::{GfxSwapChain, SwapChainInfo},
};

type Device<B> = GfxDevice<<B as GfxBackend>::Device>;
type Native<B> = <B as GfxBackend>::Device;

/// GFX 层的入口
///
/// 持有 backend instance 和全部 device。创建即初始化，drop 即关闭：
/// device 按创建的逆序销毁，然后才销毁 backend。
///
/// 所有操作都按 handle 路由到所属的 device；失败的操作会经过 [`Self::report`]，
/// 写一条 error 日志并调用用户注册的回调，然后把错误原样返回。
pub struct GfxContext<B: GfxBackend> {
    devices: SlotMap<DeviceHandle, Device<B>>,
    creation_order: Vec<DeviceHandle>,
    sink: ErrorSink,
    backend: B,
}

// 创建与销毁
impl<B: GfxBackend> GfxContext<B> {
    pub fn new(app_info: &AppInfo) -> GfxResult<Self> {
        Self::with_config(app_info, B::Config::default())
    }

    pub fn with_config(app_info: &AppInfo, config: B::Config) -> GfxResult<Self> {
        let sink = ErrorSink::default();
        let backend = B::new(app_info, config, sink.clone()).inspect_err(|err| log::error!("{err}"))?;
        log::info!("gfx context created for {}", app_info.app_name);
        Ok(Self {
            devices: SlotMap::with_key(),
            creation_order: Vec::new(),
            sink,
            backend,
        })
    }

    /// 选择得分最高的 adapter 并打开 device
    pub fn create_device(&mut self, info: &DeviceInfo) -> GfxResult<DeviceHandle> {
        let result = self.create_device_inner(info);
        self.check(result)
    }

    fn create_device_inner(&mut self, info: &DeviceInfo) -> GfxResult<DeviceHandle> {
        if info.queues.is_empty() {
            return Err(GfxError::protocol("a device needs at least one queue"));
        }
        let adapters = self.backend.adapters();
        let index = select_adapter(adapters, info.flags, &info.queues)
            .ok_or_else(|| GfxError::Initialization("no adapter satisfies the requested queues".to_string()))?;
        let adapter = adapters[index].clone();
        let queues = adapter
            .map_queues(&info.queues)
            .ok_or_else(|| GfxError::Initialization("failed to map requested queues".to_string()))?;

        let native = self.backend.create_device(index, &queues, &info.descriptor_pool)?;
        let handle = self.devices.insert_with_key(|handle| GfxDevice::new(handle, adapter, queues, native));
        self.creation_order.push(handle);
        Ok(handle)
    }

    /// 销毁 device，它创建的所有 handle 随之失效
    pub fn destroy_device(&mut self, device: DeviceHandle) -> GfxResult<()> {
        let result = self
            .devices
            .remove(device)
            .map(drop)
            .ok_or(GfxError::invalid(HandleKind::Device));
        self.creation_order.retain(|handle| *handle != device);
        self.check(result)
    }
}

impl<B: GfxBackend> Drop for GfxContext<B> {
    fn drop(&mut self) {
        log::info!("Destroying GfxContext");
        while let Some(handle) = self.creation_order.pop() {
            self.devices.remove(handle);
        }
    }
}

// getters
impl<B: GfxBackend> GfxContext<B> {
    #[inline]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[inline]
    pub fn adapters(&self) -> &[AdapterInfo] {
        self.backend.adapters()
    }

    #[inline]
    pub fn device(&self, device: DeviceHandle) -> Option<&Device<B>> {
        self.devices.get(device)
    }

    /// 直接访问 device，绕过错误回调
    #[inline]
    pub fn device_mut(&mut self, device: DeviceHandle) -> Option<&mut Device<B>> {
        self.devices.get_mut(device)
    }

    #[inline]
    pub fn get_buffer(&self, buffer: BufferHandle) -> Option<&GfxBuffer<<Native<B> as DeviceBackend>::Buffer>> {
        self.device(buffer.device())?.buffer(buffer)
    }

    #[inline]
    pub fn get_texture(&self, texture: TextureHandle) -> Option<&GfxTexture<<Native<B> as DeviceBackend>::Texture>> {
        self.device(texture.device())?.texture(texture)
    }

    #[inline]
    pub fn get_sampler(&self, sampler: SamplerHandle) -> Option<&GfxSampler<<Native<B> as DeviceBackend>::Sampler>> {
        self.device(sampler.device())?.sampler(sampler)
    }

    #[inline]
    pub fn get_pipeline(
        &self,
        pipeline: PipelineHandle,
    ) -> Option<&GfxPipeline<<Native<B> as DeviceBackend>::Pipeline>> {
        self.device(pipeline.device())?.pipeline(pipeline)
    }

    #[inline]
    pub fn get_descriptor_set(
        &self,
        set: DescriptorSetHandle,
    ) -> Option<&GfxDescriptorSet<<Native<B> as DeviceBackend>::DescriptorSet>> {
        self.device(set.device())?.descriptor_set(set)
    }

    #[inline]
    pub fn get_command_list(
        &self,
        cmd: CommandListHandle,
    ) -> Option<&GfxCommandList<<Native<B> as DeviceBackend>::CommandBuffer>> {
        self.device(cmd.device())?.command_list(cmd)
    }

    #[inline]
    pub fn get_swap_chain(&self, swap_chain: SwapChainHandle) -> Option<&GfxSwapChain<Native<B>>> {
        self.device(swap_chain.device())?.swap_chain(swap_chain)
    }
}

// 错误
impl<B: GfxBackend> GfxContext<B> {
    /// 注册错误回调，API 错误和驱动的诊断信息都会转发给它
    pub fn set_error_callback(&mut self, callback: impl FnMut(&str) + Send + 'static) {
        self.sink.set_callback(Some(Box::new(callback)));
    }

    pub fn clear_error_callback(&mut self) {
        self.sink.set_callback(None);
    }

    /// 写 error 日志并调用回调
    pub fn report(&self, err: &GfxError) {
        self.sink.report(err);
    }

    #[inline]
    fn check<T>(&self, result: GfxResult<T>) -> GfxResult<T> {
        if let Err(err) = &result {
            self.sink.report(err);
        }
        result
    }

    /// 找到 handle 所属的 device 执行操作，失败时报告错误
    fn with_device<'a, T>(
        &'a mut self,
        device: DeviceHandle,
        op: impl FnOnce(&'a mut Device<B>) -> GfxResult<T>,
    ) -> GfxResult<T> {
        let Self { devices, sink, .. } = self;
        let result = match devices.get_mut(device) {
            Some(device) => op(device),
            None => Err(GfxError::invalid(HandleKind::Device)),
        };
        if let Err(err) = &result {
            sink.report(err);
        }
        result
    }
}

// 资源
impl<B: GfxBackend> GfxContext<B> {
    pub fn create_buffer(&mut self, device: DeviceHandle, info: &BufferInfo) -> GfxResult<BufferHandle> {
        self.with_device(device, |d| d.create_buffer(info))
    }

    pub fn destroy_buffer(&mut self, buffer: BufferHandle) -> GfxResult<()> {
        self.with_device(buffer.device(), |d| d.destroy_buffer(buffer))
    }

    pub fn map_buffer(&mut self, buffer: BufferHandle) -> GfxResult<&mut [u8]> {
        self.with_device(buffer.device(), |d| d.map_buffer(buffer))
    }

    pub fn unmap_buffer(&mut self, buffer: BufferHandle) -> GfxResult<()> {
        self.with_device(buffer.device(), |d| d.unmap_buffer(buffer))
    }

    pub fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> GfxResult<()> {
        self.with_device(buffer.device(), |d| d.write_buffer(buffer, offset, data))
    }

    pub fn read_buffer(&mut self, buffer: BufferHandle, offset: u64, len: u64) -> GfxResult<Vec<u8>> {
        self.with_device(buffer.device(), |d| d.read_buffer(buffer, offset, len))
    }

    #[inline]
    pub fn write_buffer_pod<T: bytemuck::Pod>(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        data: &[T],
    ) -> GfxResult<()> {
        self.write_buffer(buffer, offset, bytemuck::cast_slice(data))
    }

    /// 从 `offset` 开始读取 `count` 个 `T`，不要求对齐
    pub fn read_buffer_pod<T: bytemuck::Pod>(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        count: usize,
    ) -> GfxResult<Vec<T>> {
        let stride = size_of::<T>();
        let len = count
            .checked_mul(stride)
            .filter(|_| stride > 0)
            .ok_or_else(|| GfxError::protocol(format!("read_buffer_pod: cannot read {count} x {stride} byte(s)")));
        let len = self.check(len)? as u64;
        let bytes = self.read_buffer(buffer, offset, len)?;
        Ok(bytes.chunks_exact(stride).map(bytemuck::pod_read_unaligned).collect())
    }

    pub fn create_texture(&mut self, device: DeviceHandle, info: &TextureInfo) -> GfxResult<TextureHandle> {
        self.with_device(device, |d| d.create_texture(info))
    }

    pub fn destroy_texture(&mut self, texture: TextureHandle) -> GfxResult<()> {
        self.with_device(texture.device(), |d| d.destroy_texture(texture))
    }

    pub fn create_sampler(&mut self, device: DeviceHandle, info: &SamplerInfo) -> GfxResult<SamplerHandle> {
        self.with_device(device, |d| d.create_sampler(info))
    }

    pub fn destroy_sampler(&mut self, sampler: SamplerHandle) -> GfxResult<()> {
        self.with_device(sampler.device(), |d| d.destroy_sampler(sampler))
    }

    pub fn create_compute_pipeline(
        &mut self,
        device: DeviceHandle,
        info: &ComputePipelineInfo,
    ) -> GfxResult<PipelineHandle> {
        self.with_device(device, |d| d.create_compute_pipeline(info))
    }

    pub fn create_graphics_pipeline(
        &mut self,
        device: DeviceHandle,
        info: &GraphicsPipelineInfo,
    ) -> GfxResult<PipelineHandle> {
        self.with_device(device, |d| d.create_graphics_pipeline(info))
    }

    pub fn destroy_pipeline(&mut self, pipeline: PipelineHandle) -> GfxResult<()> {
        self.with_device(pipeline.device(), |d| d.destroy_pipeline(pipeline))
    }

    pub fn create_descriptor_set(
        &mut self,
        device: DeviceHandle,
        info: &DescriptorSetInfo,
    ) -> GfxResult<DescriptorSetHandle> {
        self.with_device(device, |d| d.create_descriptor_set(info))
    }

    pub fn create_descriptor_set_from_pipeline(
        &mut self,
        pipeline: PipelineHandle,
        set_index: u32,
    ) -> GfxResult<DescriptorSetHandle> {
        self.with_device(pipeline.device(), |d| d.create_descriptor_set_from_pipeline(pipeline, set_index))
    }

    pub fn destroy_descriptor_set(&mut self, set: DescriptorSetHandle) -> GfxResult<()> {
        self.with_device(set.device(), |d| d.destroy_descriptor_set(set))
    }

    pub fn bind_buffer_to_descriptor_set(
        &mut self,
        set: DescriptorSetHandle,
        slot: u32,
        buffer: BufferHandle,
    ) -> GfxResult<()> {
        self.with_device(set.device(), |d| d.bind_buffer_to_descriptor_set(set, slot, buffer))
    }

    pub fn bind_texture_to_descriptor_set(
        &mut self,
        set: DescriptorSetHandle,
        slot: u32,
        texture: TextureHandle,
        sampler: SamplerHandle,
    ) -> GfxResult<()> {
        self.with_device(set.device(), |d| d.bind_texture_to_descriptor_set(set, slot, texture, sampler))
    }
}

// command list
impl<B: GfxBackend> GfxContext<B> {
    pub fn create_command_list(&mut self, device: DeviceHandle, queue_index: usize) -> GfxResult<CommandListHandle> {
        self.with_device(device, |d| d.create_command_list(queue_index))
    }

    pub fn destroy_command_list(&mut self, cmd: CommandListHandle) -> GfxResult<()> {
        self.with_device(cmd.device(), |d| d.destroy_command_list(cmd))
    }

    pub fn reset_command_list(&mut self, cmd: CommandListHandle) -> GfxResult<()> {
        self.with_device(cmd.device(), |d| d.reset_command_list(cmd))
    }

    pub fn begin_command_list(&mut self, cmd: CommandListHandle) -> GfxResult<()> {
        self.with_device(cmd.device(), |d| d.begin_command_list(cmd))
    }

    pub fn end_command_list(&mut self, cmd: CommandListHandle) -> GfxResult<()> {
        self.with_device(cmd.device(), |d| d.end_command_list(cmd))
    }

    pub fn begin_render_pass(&mut self, cmd: CommandListHandle, info: &RenderPassInfo) -> GfxResult<()> {
        self.with_device(cmd.device(), |d| d.begin_render_pass(cmd, info))
    }

    pub fn end_render_pass(&mut self, cmd: CommandListHandle) -> GfxResult<()> {
        self.with_device(cmd.device(), |d| d.end_render_pass(cmd))
    }

    pub fn set_viewport(&mut self, cmd: CommandListHandle, viewport: &Viewport) -> GfxResult<()> {
        self.with_device(cmd.device(), |d| d.set_viewport(cmd, viewport))
    }

    pub fn set_scissor(&mut self, cmd: CommandListHandle, scissor: &Scissor) -> GfxResult<()> {
        self.with_device(cmd.device(), |d| d.set_scissor(cmd, scissor))
    }

    pub fn bind_pipeline(&mut self, cmd: CommandListHandle, pipeline: PipelineHandle) -> GfxResult<()> {
        self.with_device(cmd.device(), |d| d.bind_pipeline(cmd, pipeline))
    }

    pub fn bind_descriptor_sets(
        &mut self,
        cmd: CommandListHandle,
        first_set: u32,
        sets: &[DescriptorSetHandle],
    ) -> GfxResult<()> {
        self.with_device(cmd.device(), |d| d.bind_descriptor_sets(cmd, first_set, sets))
    }

    pub fn bind_descriptor_set(
        &mut self,
        cmd: CommandListHandle,
        set_index: u32,
        set: DescriptorSetHandle,
    ) -> GfxResult<()> {
        self.with_device(cmd.device(), |d| d.bind_descriptor_set(cmd, set_index, set))
    }

    pub fn set_constants(
        &mut self,
        cmd: CommandListHandle,
        stages: ShaderStages,
        offset: u32,
        size: u32,
        data: &[u8],
    ) -> GfxResult<()> {
        self.with_device(cmd.device(), |d| d.set_constants(cmd, stages, offset, size, data))
    }

    pub fn dispatch(&mut self, cmd: CommandListHandle, x: u32, y: u32, z: u32) -> GfxResult<()> {
        self.with_device(cmd.device(), |d| d.dispatch(cmd, x, y, z))
    }

    pub fn bind_index_buffer(
        &mut self,
        cmd: CommandListHandle,
        buffer: BufferHandle,
        index_type: IndexType,
    ) -> GfxResult<()> {
        self.with_device(cmd.device(), |d| d.bind_index_buffer(cmd, buffer, index_type))
    }

    pub fn bind_vertex_buffer(&mut self, cmd: CommandListHandle, buffer: BufferHandle) -> GfxResult<()> {
        self.with_device(cmd.device(), |d| d.bind_vertex_buffer(cmd, buffer))
    }

    pub fn bind_vertex_buffers(
        &mut self,
        cmd: CommandListHandle,
        first_binding: u32,
        buffers: &[BufferHandle],
    ) -> GfxResult<()> {
        self.with_device(cmd.device(), |d| d.bind_vertex_buffers(cmd, first_binding, buffers))
    }

    pub fn draw(
        &mut self,
        cmd: CommandListHandle,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> GfxResult<()> {
        self.with_device(cmd.device(), |d| d.draw(cmd, vertex_count, instance_count, first_vertex, first_instance))
    }

    pub fn draw_indexed(
        &mut self,
        cmd: CommandListHandle,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> GfxResult<()> {
        self.with_device(cmd.device(), |d| {
            d.draw_indexed(cmd, index_count, instance_count, first_index, vertex_offset, first_instance)
        })
    }

    pub fn transition_texture(
        &mut self,
        cmd: CommandListHandle,
        texture: TextureHandle,
        old: TextureState,
        new: TextureState,
    ) -> GfxResult<()> {
        self.with_device(cmd.device(), |d| d.transition_texture(cmd, texture, old, new))
    }

    pub fn copy_buffer_to_texture(
        &mut self,
        cmd: CommandListHandle,
        buffer: BufferHandle,
        texture: TextureHandle,
    ) -> GfxResult<()> {
        self.with_device(cmd.device(), |d| d.copy_buffer_to_texture(cmd, buffer, texture))
    }
}

// 同步
impl<B: GfxBackend> GfxContext<B> {
    pub fn submit_command_list(
        &mut self,
        info: &SubmitInfo,
        wants_fence: bool,
        wants_semaphore: bool,
    ) -> GfxResult<SubmitSignals> {
        self.with_device(info.command_list.device(), |d| d.submit(info, wants_fence, wants_semaphore))
    }

    /// 阻塞等待，fence 被消费，再次等待同一个 fence 会得到 InvalidHandle
    pub fn wait_on_fence(&mut self, fence: FenceHandle) -> GfxResult<()> {
        self.with_device(fence.device(), |d| d.wait_on_fence(fence))
    }

    pub fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle) -> GfxResult<()> {
        self.with_device(semaphore.device(), |d| d.destroy_semaphore(semaphore))
    }

    pub fn wait_idle(&mut self, device: DeviceHandle) -> GfxResult<()> {
        self.with_device(device, |d| d.wait_idle())
    }
}

// 交换链
impl<B: GfxBackend> GfxContext<B> {
    pub fn create_swap_chain(
        &mut self,
        device: DeviceHandle,
        info: &SwapChainInfo<<Native<B> as DeviceBackend>::SurfaceSource>,
    ) -> GfxResult<SwapChainHandle> {
        self.with_device(device, |d| d.create_swap_chain(info))
    }

    pub fn destroy_swap_chain(&mut self, swap_chain: SwapChainHandle) -> GfxResult<()> {
        self.with_device(swap_chain.device(), |d| d.destroy_swap_chain(swap_chain))
    }

    pub fn resize_swap_chain(&mut self, swap_chain: SwapChainHandle, width: u32, height: u32) -> GfxResult<()> {
        self.with_device(swap_chain.device(), |d| d.resize_swap_chain(swap_chain, width, height))
    }

    /// 当前 image 对应的 texture
    pub fn get_swap_chain_image(&mut self, swap_chain: SwapChainHandle) -> GfxResult<TextureHandle> {
        self.with_device(swap_chain.device(), |d| d.swap_chain_image(swap_chain))
    }

    pub fn acquire_next_image_index(&mut self, swap_chain: SwapChainHandle) -> GfxResult<u32> {
        self.with_device(swap_chain.device(), |d| d.acquire_next_image_index(swap_chain))
    }

    pub fn present_swap_chain(
        &mut self,
        swap_chain: SwapChainHandle,
        queue_index: usize,
        wait_semaphore: Option<SemaphoreHandle>,
    ) -> GfxResult<()> {
        self.with_device(swap_chain.device(), |d| d.present_swap_chain(swap_chain, queue_index, wait_semaphore))
    }
}
