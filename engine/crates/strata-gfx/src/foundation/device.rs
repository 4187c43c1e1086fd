use itertools::Itertools;

use crate::{
    backend::DeviceBackend,
    basic::{
        error::{GfxError, GfxResult},
        flags::ShaderStages,
    },
    commands::{
        command_list::{
            CommandListState, GfxCommandList, IndexType, NativeRenderPass, RenderPassInfo, Scissor, Viewport,
        },
        submit::{SubmitInfo, SubmitSignals},
        tracker::{PendingDestroy, SubmissionTracker},
    },
    descriptors::{
        descriptor_set::{DescriptorSetInfo, DescriptorType, DescriptorWrite, GfxDescriptorSet},
        layout_cache::{DescriptorSetLayoutCache, DescriptorSetLayoutId},
    },
    foundation::adapter::{AdapterInfo, QueueSlot},
    pipelines::pipeline::{
        ComputePipelineInfo, GfxPipeline, GraphicsPipelineInfo, PipelineConstantBlock, PipelineKind, PipelineSource,
    },
    resources::{
        buffer::{BufferInfo, BufferType, GfxBuffer},
        handles::{
            BufferHandle, CommandListHandle, DescriptorSetHandle, DeviceHandle, FenceHandle, HandleKind,
            PipelineHandle, SamplerHandle, SemaphoreHandle, SwapChainHandle, TextureHandle,
        },
        sampler::{GfxSampler, SamplerInfo},
        table::ResourceTable,
        texture::{GfxTexture, TextureInfo, TextureKind, TextureState, TextureUsage},
    },
    swapchain::{
        surface::SwapChainConfig,
        swap_chain::{GfxSwapChain, SwapChainInfo, negotiate},
    },
};

/// 一个打开的 device，以及它创建的全部资源
///
/// 所有资源都存放在 handle 表中，对外只暴露 handle。
/// 销毁资源时 handle 立即失效，native 对象交给 [`SubmissionTracker`]，
/// 等销毁之前的提交全部完成后再释放。
pub struct GfxDevice<D: DeviceBackend> {
    handle: DeviceHandle,
    adapter: AdapterInfo,
    queues: Vec<QueueSlot>,

    buffers: ResourceTable<BufferHandle, GfxBuffer<D::Buffer>>,
    textures: ResourceTable<TextureHandle, GfxTexture<D::Texture>>,
    samplers: ResourceTable<SamplerHandle, GfxSampler<D::Sampler>>,
    pipelines: ResourceTable<PipelineHandle, GfxPipeline<D::Pipeline>>,
    descriptor_sets: ResourceTable<DescriptorSetHandle, GfxDescriptorSet<D::DescriptorSet>>,
    command_lists: ResourceTable<CommandListHandle, GfxCommandList<D::CommandBuffer>>,
    /// fence handle 只记录对应提交的 serial，native fence 由 tracker 持有
    fences: ResourceTable<FenceHandle, u64>,
    semaphores: ResourceTable<SemaphoreHandle, D::Semaphore>,
    swap_chains: ResourceTable<SwapChainHandle, GfxSwapChain<D>>,

    layout_cache: DescriptorSetLayoutCache<D::DescriptorSetLayout>,
    tracker: SubmissionTracker<D>,

    backend: D,
}

// 创建与销毁
impl<D: DeviceBackend> GfxDevice<D> {
    pub(crate) fn new(handle: DeviceHandle, adapter: AdapterInfo, queues: Vec<QueueSlot>, backend: D) -> Self {
        log::info!("device created on adapter {} with {} queue(s)", adapter.name, queues.len());
        Self {
            handle,
            adapter,
            queues,
            buffers: ResourceTable::new(handle),
            textures: ResourceTable::new(handle),
            samplers: ResourceTable::new(handle),
            pipelines: ResourceTable::new(handle),
            descriptor_sets: ResourceTable::new(handle),
            command_lists: ResourceTable::new(handle),
            fences: ResourceTable::new(handle),
            semaphores: ResourceTable::new(handle),
            swap_chains: ResourceTable::new(handle),
            layout_cache: DescriptorSetLayoutCache::default(),
            tracker: SubmissionTracker::default(),
            backend,
        }
    }
}

impl<D: DeviceBackend> Drop for GfxDevice<D> {
    fn drop(&mut self) {
        log::info!("Destroying GfxDevice on adapter {}", self.adapter.name);
        let Self {
            buffers,
            textures,
            samplers,
            pipelines,
            descriptor_sets,
            command_lists,
            fences,
            semaphores,
            swap_chains,
            layout_cache,
            tracker,
            backend,
            ..
        } = self;

        if let Err(err) = backend.wait_idle() {
            log::error!("wait idle failed while destroying device: {err}");
        }
        tracker.release_all(backend);

        for (_, cmd) in command_lists.drain() {
            backend.destroy_command_buffer(cmd.native);
        }
        for (_, set) in descriptor_sets.drain() {
            backend.destroy_descriptor_set(set.native);
        }
        for (_, pipeline) in pipelines.drain() {
            backend.destroy_pipeline(pipeline.native);
        }
        for layout in layout_cache.drain() {
            backend.destroy_descriptor_set_layout(layout);
        }
        for (_, sampler) in samplers.drain() {
            backend.destroy_sampler(sampler.native);
        }
        // 交换链的 image 也在 texture 表中，需要先于交换链销毁
        for (_, texture) in textures.drain() {
            backend.destroy_texture(texture.native);
        }
        for (_, swap_chain) in swap_chains.drain() {
            if let Some(native) = swap_chain.native {
                backend.destroy_swap_chain(native);
            }
            backend.destroy_fence(swap_chain.acquire_fence);
            backend.destroy_surface(swap_chain.surface);
        }
        for (_, mut buffer) in buffers.drain() {
            if buffer.mapped {
                backend.unmap_buffer(&mut buffer.native);
            }
            backend.destroy_buffer(buffer.native);
        }
        for (_, semaphore) in semaphores.drain() {
            backend.destroy_semaphore(semaphore);
        }
        fences.drain().for_each(drop);
    }
}

// getters
impl<D: DeviceBackend> GfxDevice<D> {
    #[inline]
    pub fn handle(&self) -> DeviceHandle {
        self.handle
    }

    #[inline]
    pub fn adapter(&self) -> &AdapterInfo {
        &self.adapter
    }

    #[inline]
    pub fn queues(&self) -> &[QueueSlot] {
        &self.queues
    }

    #[inline]
    pub fn backend(&self) -> &D {
        &self.backend
    }

    #[inline]
    pub fn backend_mut(&mut self) -> &mut D {
        &mut self.backend
    }

    #[inline]
    pub fn buffer(&self, handle: BufferHandle) -> Option<&GfxBuffer<D::Buffer>> {
        self.buffers.get(handle)
    }

    #[inline]
    pub fn texture(&self, handle: TextureHandle) -> Option<&GfxTexture<D::Texture>> {
        self.textures.get(handle)
    }

    #[inline]
    pub fn sampler(&self, handle: SamplerHandle) -> Option<&GfxSampler<D::Sampler>> {
        self.samplers.get(handle)
    }

    #[inline]
    pub fn pipeline(&self, handle: PipelineHandle) -> Option<&GfxPipeline<D::Pipeline>> {
        self.pipelines.get(handle)
    }

    #[inline]
    pub fn descriptor_set(&self, handle: DescriptorSetHandle) -> Option<&GfxDescriptorSet<D::DescriptorSet>> {
        self.descriptor_sets.get(handle)
    }

    #[inline]
    pub fn command_list(&self, handle: CommandListHandle) -> Option<&GfxCommandList<D::CommandBuffer>> {
        self.command_lists.get(handle)
    }

    #[inline]
    pub fn swap_chain(&self, handle: SwapChainHandle) -> Option<&GfxSwapChain<D>> {
        self.swap_chains.get(handle)
    }

    #[inline]
    pub fn has_fence(&self, handle: FenceHandle) -> bool {
        self.fences.contains(handle)
    }

    #[inline]
    pub fn has_semaphore(&self, handle: SemaphoreHandle) -> bool {
        self.semaphores.contains(handle)
    }

    #[inline]
    pub fn layout_cache(&self) -> &DescriptorSetLayoutCache<D::DescriptorSetLayout> {
        &self.layout_cache
    }

    #[inline]
    pub fn tracker(&self) -> &SubmissionTracker<D> {
        &self.tracker
    }

    fn queue(&self, index: usize) -> GfxResult<QueueSlot> {
        self.queues
            .get(index)
            .copied()
            .ok_or_else(|| GfxError::protocol(format!("queue index {index} out of range ({})", self.queues.len())))
    }
}

// buffer
impl<D: DeviceBackend> GfxDevice<D> {
    pub fn create_buffer(&mut self, info: &BufferInfo) -> GfxResult<BufferHandle> {
        if info.size == 0 {
            return Err(GfxError::creation("buffer", "size must be non-zero"));
        }
        let native = self.backend.create_buffer(info)?;
        Ok(self.buffers.insert(GfxBuffer {
            info: info.clone(),
            mapped: false,
            native,
        }))
    }

    pub fn destroy_buffer(&mut self, handle: BufferHandle) -> GfxResult<()> {
        let mut buffer = self.buffers.remove(handle).ok_or(GfxError::invalid(HandleKind::Buffer))?;
        if buffer.mapped {
            log::warn!("buffer destroyed while mapped");
            self.backend.unmap_buffer(&mut buffer.native);
        }
        self.defer(PendingDestroy::Buffer(buffer.native));
        Ok(())
    }

    /// 映射整个 buffer，之后必须调用 [`Self::unmap_buffer`]
    pub fn map_buffer(&mut self, handle: BufferHandle) -> GfxResult<&mut [u8]> {
        let Self { backend, buffers, .. } = self;
        let buffer = buffers.require_mut(handle)?;
        if buffer.mapped {
            return Err(GfxError::protocol("map_buffer: buffer is already mapped"));
        }
        let data = backend.map_buffer(&mut buffer.native)?;
        buffer.mapped = true;
        Ok(data)
    }

    pub fn unmap_buffer(&mut self, handle: BufferHandle) -> GfxResult<()> {
        let buffer = self.buffers.require_mut(handle)?;
        if !buffer.mapped {
            return Err(GfxError::protocol("unmap_buffer: buffer is not mapped"));
        }
        self.backend.unmap_buffer(&mut buffer.native);
        buffer.mapped = false;
        Ok(())
    }

    /// map、拷贝、unmap
    pub fn write_buffer(&mut self, handle: BufferHandle, offset: u64, data: &[u8]) -> GfxResult<()> {
        let Self { backend, buffers, .. } = self;
        let buffer = buffers.require_mut(handle)?;
        let range = Self::checked_range(buffer, offset, data.len() as u64, "write_buffer")?;
        let mapped = backend.map_buffer(&mut buffer.native)?;
        mapped[range].copy_from_slice(data);
        backend.unmap_buffer(&mut buffer.native);
        Ok(())
    }

    pub fn read_buffer(&mut self, handle: BufferHandle, offset: u64, len: u64) -> GfxResult<Vec<u8>> {
        let Self { backend, buffers, .. } = self;
        let buffer = buffers.require_mut(handle)?;
        let range = Self::checked_range(buffer, offset, len, "read_buffer")?;
        let mapped = backend.map_buffer(&mut buffer.native)?;
        let data = mapped[range].to_vec();
        backend.unmap_buffer(&mut buffer.native);
        Ok(data)
    }

    fn checked_range(
        buffer: &GfxBuffer<D::Buffer>,
        offset: u64,
        len: u64,
        op: &str,
    ) -> GfxResult<std::ops::Range<usize>> {
        if buffer.mapped {
            return Err(GfxError::protocol(format!("{op}: buffer is currently mapped")));
        }
        match offset.checked_add(len) {
            Some(end) if end <= buffer.info.size => Ok(offset as usize..end as usize),
            _ => Err(GfxError::protocol(format!(
                "{op}: range {offset}+{len} exceeds buffer size {}",
                buffer.info.size
            ))),
        }
    }
}

// texture 与 sampler
impl<D: DeviceBackend> GfxDevice<D> {
    pub fn create_texture(&mut self, info: &TextureInfo) -> GfxResult<TextureHandle> {
        if info.width == 0 || info.height == 0 || info.depth == 0 || info.mip_levels == 0 {
            return Err(GfxError::creation("texture", "extent and mip count must be non-zero"));
        }
        if info.format.bytes_per_texel() == 0 {
            return Err(GfxError::creation("texture", "format is undefined"));
        }
        if (info.usage == TextureUsage::DepthStencilAttachment) != info.format.is_depth() {
            return Err(GfxError::creation(
                "texture",
                format!("usage {:?} does not match format {:?}", info.usage, info.format),
            ));
        }
        let native = self.backend.create_texture(info)?;
        Ok(self.textures.insert(GfxTexture {
            info: info.clone(),
            kind: TextureKind::Allocated,
            state: TextureState::Undefined,
            native,
        }))
    }

    /// 交换链的 image 不能单独销毁
    pub fn destroy_texture(&mut self, handle: TextureHandle) -> GfxResult<()> {
        if let TextureKind::SwapChainImage { .. } = self.textures.require(handle)?.kind {
            return Err(GfxError::protocol("destroy_texture: swap chain images are owned by their swap chain"));
        }
        if let Some(texture) = self.textures.remove(handle) {
            self.defer(PendingDestroy::Texture(texture.native));
        }
        Ok(())
    }

    pub fn create_sampler(&mut self, info: &SamplerInfo) -> GfxResult<SamplerHandle> {
        let native = self.backend.create_sampler(info)?;
        Ok(self.samplers.insert(GfxSampler { info: *info, native }))
    }

    pub fn destroy_sampler(&mut self, handle: SamplerHandle) -> GfxResult<()> {
        let sampler = self.samplers.remove(handle).ok_or(GfxError::invalid(HandleKind::Sampler))?;
        self.defer(PendingDestroy::Sampler(sampler.native));
        Ok(())
    }
}

// pipeline 与 descriptor
impl<D: DeviceBackend> GfxDevice<D> {
    pub fn create_compute_pipeline(&mut self, info: &ComputePipelineInfo) -> GfxResult<PipelineHandle> {
        if info.shader_code.is_empty() {
            return Err(GfxError::creation("compute pipeline", "empty shader code"));
        }
        self.create_pipeline(PipelineSource::Compute(info), PipelineKind::Compute)
    }

    pub fn create_graphics_pipeline(&mut self, info: &GraphicsPipelineInfo) -> GfxResult<PipelineHandle> {
        if info.vertex_code.is_empty() || info.fragment_code.is_empty() {
            return Err(GfxError::creation("graphics pipeline", "empty shader code"));
        }
        if info.depth_test && info.depth_format.is_none() {
            return Err(GfxError::creation("graphics pipeline", "depth test requires a depth format"));
        }
        let kind = PipelineKind::Graphics {
            vertex_attributes: info.vertex_attributes.clone(),
            color_formats: info.color_formats.clone(),
            depth_format: info.depth_format,
            depth_test: info.depth_test,
        };
        self.create_pipeline(PipelineSource::Graphics(info), kind)
    }

    fn create_pipeline(&mut self, source: PipelineSource<'_>, kind: PipelineKind) -> GfxResult<PipelineHandle> {
        if let Some(block) = source.constant_block() {
            Self::check_constant_block(&block)?;
        }

        let set_layouts = source
            .descriptor_sets()
            .iter()
            .map(|info| self.get_or_create_layout(info))
            .collect::<GfxResult<Vec<_>>>()?;

        let native_layouts = set_layouts
            .iter()
            .filter_map(|id| self.layout_cache.get(*id).map(|layout| layout.native()))
            .collect_vec();
        let constant_block = source.constant_block();
        let native = self.backend.create_pipeline(source, &native_layouts)?;

        log::info!(
            "{} pipeline created with {} descriptor set(s)",
            if kind.is_compute() { "compute" } else { "graphics" },
            set_layouts.len()
        );
        Ok(self.pipelines.insert(GfxPipeline {
            kind,
            set_layouts,
            constant_block,
            native,
        }))
    }

    fn check_constant_block(block: &PipelineConstantBlock) -> GfxResult<()> {
        if block.size == 0 || block.size % 4 != 0 {
            return Err(GfxError::creation(
                "pipeline",
                format!("constant block size {} is not a multiple of 4", block.size),
            ));
        }
        if block.stages.is_empty() {
            return Err(GfxError::creation("pipeline", "constant block has no shader stage"));
        }
        Ok(())
    }

    pub fn destroy_pipeline(&mut self, handle: PipelineHandle) -> GfxResult<()> {
        let pipeline = self.pipelines.remove(handle).ok_or(GfxError::invalid(HandleKind::Pipeline))?;
        self.defer(PendingDestroy::Pipeline(pipeline.native));
        Ok(())
    }

    /// 经由 layout cache 得到 layout id，未命中时创建 native layout
    pub fn get_or_create_layout(&mut self, info: &DescriptorSetInfo) -> GfxResult<DescriptorSetLayoutId> {
        let Self {
            layout_cache, backend, ..
        } = self;
        layout_cache.get_or_create(info, |info| backend.create_descriptor_set_layout(info))
    }

    pub fn create_descriptor_set(&mut self, info: &DescriptorSetInfo) -> GfxResult<DescriptorSetHandle> {
        let layout = self.get_or_create_layout(info)?;
        self.allocate_descriptor_set(layout)
    }

    /// 按 pipeline 第 `set_index` 个 set 的 layout 创建 descriptor set
    pub fn create_descriptor_set_from_pipeline(
        &mut self,
        pipeline: PipelineHandle,
        set_index: u32,
    ) -> GfxResult<DescriptorSetHandle> {
        let pipeline = self.pipelines.require(pipeline)?;
        let layout = pipeline.set_layouts.get(set_index as usize).copied().ok_or_else(|| {
            GfxError::protocol(format!(
                "pipeline has {} descriptor set(s), requested set {set_index}",
                pipeline.set_layouts.len()
            ))
        })?;
        self.allocate_descriptor_set(layout)
    }

    fn allocate_descriptor_set(&mut self, layout: DescriptorSetLayoutId) -> GfxResult<DescriptorSetHandle> {
        let cached = self
            .layout_cache
            .get(layout)
            .ok_or_else(|| GfxError::protocol(format!("unknown descriptor set layout {layout:?}")))?;
        let native = self.backend.create_descriptor_set(cached.native(), cached.bindings())?;
        let bindings = cached.bindings().to_vec();
        let slots = vec![None; bindings.len()];
        Ok(self.descriptor_sets.insert(GfxDescriptorSet {
            layout,
            bindings,
            slots,
            native,
        }))
    }

    pub fn destroy_descriptor_set(&mut self, handle: DescriptorSetHandle) -> GfxResult<()> {
        let set = self
            .descriptor_sets
            .remove(handle)
            .ok_or(GfxError::invalid(HandleKind::DescriptorSet))?;
        self.defer(PendingDestroy::DescriptorSet(set.native));
        Ok(())
    }

    /// uniform buffer 只能绑定到 uniform binding，storage buffer 只能绑定到 storage binding
    pub fn bind_buffer_to_descriptor_set(
        &mut self,
        set: DescriptorSetHandle,
        slot: u32,
        buffer: BufferHandle,
    ) -> GfxResult<()> {
        let Self {
            backend,
            descriptor_sets,
            buffers,
            ..
        } = self;
        let set = descriptor_sets.require_mut(set)?;
        let buffer_entry = buffers.require(buffer)?;
        let binding = set
            .bindings
            .get(slot as usize)
            .ok_or_else(|| slot_out_of_range(slot, set.bindings.len()))?;
        let compatible = matches!(
            (binding.ty, buffer_entry.info.ty),
            (DescriptorType::StorageBuffer, BufferType::Storage) | (DescriptorType::UniformBuffer, BufferType::Uniform)
        );
        if !compatible {
            return Err(GfxError::protocol(format!(
                "cannot bind a {:?} buffer to a {:?} descriptor",
                buffer_entry.info.ty, binding.ty
            )));
        }
        backend.write_buffer_descriptor(&mut set.native, slot, binding.ty, &buffer_entry.native);
        set.slots[slot as usize] = Some(DescriptorWrite::Buffer(buffer));
        Ok(())
    }

    pub fn bind_texture_to_descriptor_set(
        &mut self,
        set: DescriptorSetHandle,
        slot: u32,
        texture: TextureHandle,
        sampler: SamplerHandle,
    ) -> GfxResult<()> {
        let Self {
            backend,
            descriptor_sets,
            textures,
            samplers,
            ..
        } = self;
        let set = descriptor_sets.require_mut(set)?;
        let texture_entry = textures.require(texture)?;
        let sampler_entry = samplers.require(sampler)?;
        let binding = set
            .bindings
            .get(slot as usize)
            .ok_or_else(|| slot_out_of_range(slot, set.bindings.len()))?;
        if binding.ty != DescriptorType::Texture {
            return Err(GfxError::protocol(format!("cannot bind a texture to a {:?} descriptor", binding.ty)));
        }
        backend.write_texture_descriptor(&mut set.native, slot, &texture_entry.native, &sampler_entry.native);
        set.slots[slot as usize] = Some(DescriptorWrite::Texture { texture, sampler });
        Ok(())
    }
}

fn slot_out_of_range(slot: u32, len: usize) -> GfxError {
    GfxError::protocol(format!("descriptor slot {slot} out of range ({len})"))
}

// command list 的生命周期
impl<D: DeviceBackend> GfxDevice<D> {
    pub fn create_command_list(&mut self, queue_index: usize) -> GfxResult<CommandListHandle> {
        let queue = self.queue(queue_index)?;
        let native = self.backend.create_command_buffer(&queue)?;
        Ok(self.command_lists.insert(GfxCommandList::new(queue_index, native)))
    }

    pub fn destroy_command_list(&mut self, handle: CommandListHandle) -> GfxResult<()> {
        let cmd = self
            .command_lists
            .remove(handle)
            .ok_or(GfxError::invalid(HandleKind::CommandList))?;
        self.defer(PendingDestroy::CommandBuffer(cmd.native));
        Ok(())
    }

    /// 回到 Initial，要求上一次提交已经完成
    pub fn reset_command_list(&mut self, handle: CommandListHandle) -> GfxResult<()> {
        self.check_not_in_flight(handle, "reset")?;
        let Self {
            backend, command_lists, ..
        } = self;
        let cmd = command_lists.require_mut(handle)?;
        backend.reset_command_buffer(&mut cmd.native)?;
        cmd.on_reset();
        Ok(())
    }

    pub fn begin_command_list(&mut self, handle: CommandListHandle) -> GfxResult<()> {
        self.command_lists.require(handle)?.check_begin()?;
        self.check_not_in_flight(handle, "begin")?;
        let Self {
            backend, command_lists, ..
        } = self;
        let cmd = command_lists.require_mut(handle)?;
        backend.begin_command_buffer(&mut cmd.native)?;
        cmd.on_begin();
        Ok(())
    }

    pub fn end_command_list(&mut self, handle: CommandListHandle) -> GfxResult<()> {
        let Self {
            backend, command_lists, ..
        } = self;
        let cmd = command_lists.require_mut(handle)?;
        cmd.check_end()?;
        backend.end_command_buffer(&mut cmd.native)?;
        cmd.on_end();
        Ok(())
    }

    fn check_not_in_flight(&mut self, handle: CommandListHandle, op: &str) -> GfxResult<()> {
        let last_submission = self.command_lists.require(handle)?.last_submission;
        if last_submission == 0 {
            return Ok(());
        }
        self.tracker.retire(&mut self.backend)?;
        if !self.tracker.is_retired(last_submission) {
            return Err(GfxError::protocol(format!(
                "{op}: command list is still in flight (submission #{last_submission})"
            )));
        }
        Ok(())
    }
}

// 录制
impl<D: DeviceBackend> GfxDevice<D> {
    pub fn bind_pipeline(&mut self, cmd: CommandListHandle, pipeline: PipelineHandle) -> GfxResult<()> {
        let Self {
            backend,
            command_lists,
            pipelines,
            ..
        } = self;
        let cmd = command_lists.require_mut(cmd)?;
        cmd.check_recording("bind_pipeline")?;
        let pipeline_entry = pipelines.require(pipeline)?;
        backend.cmd_bind_pipeline(&mut cmd.native, &pipeline_entry.native);
        cmd.bound_pipeline = Some(pipeline);
        Ok(())
    }

    /// 第 i 个 set 必须和 pipeline 第 `first_set + i` 个 layout 一致
    pub fn bind_descriptor_sets(
        &mut self,
        cmd: CommandListHandle,
        first_set: u32,
        sets: &[DescriptorSetHandle],
    ) -> GfxResult<()> {
        let Self {
            backend,
            command_lists,
            pipelines,
            descriptor_sets,
            ..
        } = self;
        let cmd = command_lists.require_mut(cmd)?;
        cmd.check_recording("bind_descriptor_sets")?;
        let pipeline = pipelines.require(cmd.require_pipeline("bind_descriptor_sets")?)?;

        let mut native_sets = Vec::with_capacity(sets.len());
        for (i, set) in sets.iter().enumerate() {
            let set_index = first_set as usize + i;
            let set_entry = descriptor_sets.require(*set)?;
            match pipeline.set_layouts.get(set_index) {
                Some(layout) if *layout == set_entry.layout => native_sets.push(&set_entry.native),
                Some(layout) => {
                    return Err(GfxError::protocol(format!(
                        "descriptor set layout {:?} does not match pipeline layout {:?} at set {set_index}",
                        set_entry.layout, layout
                    )));
                }
                None => {
                    return Err(GfxError::protocol(format!(
                        "pipeline has {} descriptor set(s), cannot bind set {set_index}",
                        pipeline.set_layouts.len()
                    )));
                }
            }
        }
        backend.cmd_bind_descriptor_sets(&mut cmd.native, &pipeline.native, first_set, &native_sets);
        Ok(())
    }

    #[inline]
    pub fn bind_descriptor_set(
        &mut self,
        cmd: CommandListHandle,
        set_index: u32,
        set: DescriptorSetHandle,
    ) -> GfxResult<()> {
        self.bind_descriptor_sets(cmd, set_index, std::slice::from_ref(&set))
    }

    /// 写 push constant，范围必须落在 pipeline 的 constant block 内
    pub fn set_constants(
        &mut self,
        cmd: CommandListHandle,
        stages: ShaderStages,
        offset: u32,
        size: u32,
        data: &[u8],
    ) -> GfxResult<()> {
        let Self {
            backend,
            command_lists,
            pipelines,
            ..
        } = self;
        let cmd = command_lists.require_mut(cmd)?;
        cmd.check_recording("set_constants")?;
        let pipeline = pipelines.require(cmd.require_pipeline("set_constants")?)?;
        let block = pipeline
            .constant_block
            .ok_or_else(|| GfxError::protocol("set_constants: pipeline has no constant block"))?;
        if data.len() != size as usize {
            return Err(GfxError::protocol(format!(
                "set_constants: data is {} bytes, size is {size}",
                data.len()
            )));
        }
        if offset.checked_add(size).is_none_or(|end| end > block.size) {
            return Err(GfxError::protocol(format!(
                "set_constants: range {offset}+{size} exceeds constant block size {}",
                block.size
            )));
        }
        if !block.stages.contains(stages) {
            return Err(GfxError::protocol(format!(
                "set_constants: stages {stages:?} not visible to constant block ({:?})",
                block.stages
            )));
        }
        backend.cmd_push_constants(&mut cmd.native, &pipeline.native, stages, offset, data);
        Ok(())
    }

    pub fn dispatch(&mut self, cmd: CommandListHandle, x: u32, y: u32, z: u32) -> GfxResult<()> {
        let Self {
            backend,
            command_lists,
            pipelines,
            ..
        } = self;
        let cmd = command_lists.require_mut(cmd)?;
        cmd.check_recording("dispatch")?;
        if cmd.in_render_pass {
            return Err(GfxError::protocol("dispatch: not allowed inside a render pass"));
        }
        let pipeline = pipelines.require(cmd.require_pipeline("dispatch")?)?;
        if !pipeline.kind.is_compute() {
            return Err(GfxError::protocol("dispatch: bound pipeline is not a compute pipeline"));
        }
        backend.cmd_dispatch(&mut cmd.native, [x, y, z]);
        Ok(())
    }

    /// 开始 dynamic rendering，所有 attachment 必须尺寸一致并且处于 RenderTarget 状态
    pub fn begin_render_pass(&mut self, cmd: CommandListHandle, info: &RenderPassInfo) -> GfxResult<()> {
        let Self {
            backend,
            command_lists,
            textures,
            ..
        } = self;
        let cmd = command_lists.require_mut(cmd)?;
        cmd.check_recording("begin_render_pass")?;
        if cmd.in_render_pass {
            return Err(GfxError::protocol("begin_render_pass: render passes cannot nest"));
        }
        if info.color_attachments.is_empty() && info.depth_attachment.is_none() {
            return Err(GfxError::protocol("begin_render_pass: no attachments"));
        }

        let mut extent = None;
        let color_attachments = info
            .color_attachments
            .iter()
            .map(|handle| Self::check_attachment(textures, *handle, TextureUsage::ColorAttachment, &mut extent))
            .collect::<GfxResult<Vec<_>>>()?;
        let depth_attachment = info
            .depth_attachment
            .map(|handle| Self::check_attachment(textures, handle, TextureUsage::DepthStencilAttachment, &mut extent))
            .transpose()?;
        let extent = extent.unwrap_or_default();

        backend.cmd_begin_render_pass(
            &mut cmd.native,
            &NativeRenderPass {
                color_attachments,
                depth_attachment,
                clear_color: info.clear_color,
                extent,
            },
        );
        cmd.in_render_pass = true;
        Ok(())
    }

    fn check_attachment<'t>(
        textures: &'t ResourceTable<TextureHandle, GfxTexture<D::Texture>>,
        handle: TextureHandle,
        expected: TextureUsage,
        extent: &mut Option<(u32, u32)>,
    ) -> GfxResult<&'t D::Texture> {
        let texture = textures.require(handle)?;
        if texture.info.usage != expected {
            return Err(GfxError::protocol(format!(
                "begin_render_pass: texture with usage {:?} used as {:?}",
                texture.info.usage, expected
            )));
        }
        if texture.state != TextureState::RenderTarget {
            return Err(GfxError::protocol(format!(
                "begin_render_pass: attachment is in state {:?}, expected RenderTarget",
                texture.state
            )));
        }
        let size = (texture.info.width, texture.info.height);
        if *extent.get_or_insert(size) != size {
            return Err(GfxError::protocol("begin_render_pass: attachments differ in size"));
        }
        Ok(&texture.native)
    }

    pub fn end_render_pass(&mut self, cmd: CommandListHandle) -> GfxResult<()> {
        let Self {
            backend, command_lists, ..
        } = self;
        let cmd = command_lists.require_mut(cmd)?;
        cmd.check_recording("end_render_pass")?;
        if !cmd.in_render_pass {
            return Err(GfxError::protocol("end_render_pass: no render pass is open"));
        }
        backend.cmd_end_render_pass(&mut cmd.native);
        cmd.in_render_pass = false;
        Ok(())
    }

    pub fn set_viewport(&mut self, cmd: CommandListHandle, viewport: &Viewport) -> GfxResult<()> {
        let Self {
            backend, command_lists, ..
        } = self;
        let cmd = command_lists.require_mut(cmd)?;
        cmd.check_recording("set_viewport")?;
        backend.cmd_set_viewport(&mut cmd.native, viewport);
        Ok(())
    }

    pub fn set_scissor(&mut self, cmd: CommandListHandle, scissor: &Scissor) -> GfxResult<()> {
        let Self {
            backend, command_lists, ..
        } = self;
        let cmd = command_lists.require_mut(cmd)?;
        cmd.check_recording("set_scissor")?;
        backend.cmd_set_scissor(&mut cmd.native, scissor);
        Ok(())
    }

    pub fn bind_vertex_buffers(
        &mut self,
        cmd: CommandListHandle,
        first_binding: u32,
        buffers: &[BufferHandle],
    ) -> GfxResult<()> {
        let Self {
            backend,
            command_lists,
            buffers: buffer_table,
            ..
        } = self;
        let cmd = command_lists.require_mut(cmd)?;
        cmd.check_recording("bind_vertex_buffers")?;
        let natives = buffers
            .iter()
            .map(|handle| {
                let buffer = buffer_table.require(*handle)?;
                if buffer.info.ty != BufferType::Vertex {
                    return Err(GfxError::protocol(format!(
                        "bind_vertex_buffers: {:?} buffer is not a vertex buffer",
                        buffer.info.ty
                    )));
                }
                Ok(&buffer.native)
            })
            .collect::<GfxResult<Vec<_>>>()?;
        backend.cmd_bind_vertex_buffers(&mut cmd.native, first_binding, &natives);
        Ok(())
    }

    #[inline]
    pub fn bind_vertex_buffer(&mut self, cmd: CommandListHandle, buffer: BufferHandle) -> GfxResult<()> {
        self.bind_vertex_buffers(cmd, 0, std::slice::from_ref(&buffer))
    }

    pub fn bind_index_buffer(
        &mut self,
        cmd: CommandListHandle,
        buffer: BufferHandle,
        index_type: IndexType,
    ) -> GfxResult<()> {
        let Self {
            backend,
            command_lists,
            buffers,
            ..
        } = self;
        let cmd = command_lists.require_mut(cmd)?;
        cmd.check_recording("bind_index_buffer")?;
        let buffer = buffers.require(buffer)?;
        if buffer.info.ty != BufferType::Index {
            return Err(GfxError::protocol(format!(
                "bind_index_buffer: {:?} buffer is not an index buffer",
                buffer.info.ty
            )));
        }
        backend.cmd_bind_index_buffer(&mut cmd.native, &buffer.native, index_type);
        Ok(())
    }

    pub fn draw(
        &mut self,
        cmd: CommandListHandle,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> GfxResult<()> {
        self.check_draw(cmd, "draw")?;
        let Self {
            backend, command_lists, ..
        } = self;
        let cmd = command_lists.require_mut(cmd)?;
        backend.cmd_draw(&mut cmd.native, vertex_count, instance_count, first_vertex, first_instance);
        Ok(())
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
        self.check_draw(cmd, "draw_indexed")?;
        let Self {
            backend, command_lists, ..
        } = self;
        let cmd = command_lists.require_mut(cmd)?;
        backend.cmd_draw_indexed(
            &mut cmd.native,
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        );
        Ok(())
    }

    fn check_draw(&self, cmd: CommandListHandle, op: &str) -> GfxResult<()> {
        let cmd = self.command_lists.require(cmd)?;
        cmd.check_recording(op)?;
        let pipeline = self.pipelines.require(cmd.require_pipeline(op)?)?;
        if !pipeline.kind.is_graphics() {
            return Err(GfxError::protocol(format!("{op}: bound pipeline is not a graphics pipeline")));
        }
        if !cmd.in_render_pass {
            return Err(GfxError::protocol(format!("{op}: must be recorded inside a render pass")));
        }
        Ok(())
    }

    /// 录制 barrier，并把 `new` 记为 texture 的逻辑状态
    pub fn transition_texture(
        &mut self,
        cmd: CommandListHandle,
        texture: TextureHandle,
        old: TextureState,
        new: TextureState,
    ) -> GfxResult<()> {
        let Self {
            backend,
            command_lists,
            textures,
            ..
        } = self;
        let cmd = command_lists.require_mut(cmd)?;
        cmd.check_recording("transition_texture")?;
        if cmd.in_render_pass {
            return Err(GfxError::protocol("transition_texture: not allowed inside a render pass"));
        }
        let texture = textures.require_mut(texture)?;
        if old != TextureState::Undefined && old != texture.state {
            log::warn!(
                "transition_texture: declared old state {:?} but texture was last transitioned to {:?}",
                old,
                texture.state
            );
        }
        backend.cmd_transition_texture(&mut cmd.native, &texture.native, old, new);
        texture.state = new;
        Ok(())
    }

    /// 把 upload buffer 的内容拷贝到 texture 的 base mip，texture 需要处于 UploadDestination
    pub fn copy_buffer_to_texture(
        &mut self,
        cmd: CommandListHandle,
        buffer: BufferHandle,
        texture: TextureHandle,
    ) -> GfxResult<()> {
        let Self {
            backend,
            command_lists,
            buffers,
            textures,
            ..
        } = self;
        let cmd = command_lists.require_mut(cmd)?;
        cmd.check_recording("copy_buffer_to_texture")?;
        if cmd.in_render_pass {
            return Err(GfxError::protocol("copy_buffer_to_texture: not allowed inside a render pass"));
        }
        let buffer = buffers.require(buffer)?;
        let texture = textures.require(texture)?;
        if buffer.info.ty != BufferType::Upload {
            return Err(GfxError::protocol(format!(
                "copy_buffer_to_texture: source is a {:?} buffer, expected Upload",
                buffer.info.ty
            )));
        }
        let needed = texture.info.base_level_size();
        if buffer.info.size < needed {
            return Err(GfxError::protocol(format!(
                "copy_buffer_to_texture: buffer holds {} bytes, texture needs {needed}",
                buffer.info.size
            )));
        }
        if texture.state != TextureState::UploadDestination {
            return Err(GfxError::protocol(format!(
                "copy_buffer_to_texture: texture is in state {:?}, expected UploadDestination",
                texture.state
            )));
        }
        backend.cmd_copy_buffer_to_texture(&mut cmd.native, &buffer.native, &texture.native, &texture.info);
        Ok(())
    }
}

// 提交与同步
impl<D: DeviceBackend> GfxDevice<D> {
    /// 提交一个 Recorded 状态的 command list
    ///
    /// 内部总会创建一个 fence 跟踪这次提交；`wants_fence` 只决定是否返回可等待的 handle。
    pub fn submit(&mut self, info: &SubmitInfo, wants_fence: bool, wants_semaphore: bool) -> GfxResult<SubmitSignals> {
        let Self {
            backend,
            queues,
            command_lists,
            fences,
            semaphores,
            tracker,
            ..
        } = self;
        let cmd = command_lists.require_mut(info.command_list)?;
        if cmd.state != CommandListState::Recorded {
            return Err(GfxError::protocol(format!("submit: command list is {:?}, not recorded", cmd.state)));
        }
        let wait = match info.wait_semaphore {
            Some(handle) => Some(semaphores.require(handle)?),
            None => None,
        };
        let queue = queues[cmd.queue_index];

        let fence = backend.create_fence()?;
        let signal = if wants_semaphore {
            match backend.create_semaphore() {
                Ok(semaphore) => Some(semaphore),
                Err(err) => {
                    backend.destroy_fence(fence);
                    return Err(err);
                }
            }
        } else {
            None
        };
        if let Err(err) = backend.submit(&queue, &cmd.native, wait, signal.as_ref(), &fence) {
            backend.destroy_fence(fence);
            if let Some(semaphore) = signal {
                backend.destroy_semaphore(semaphore);
            }
            return Err(err);
        }

        let serial = tracker.push(fence);
        cmd.last_submission = serial;
        if let Some(native) = info.wait_semaphore.and_then(|handle| semaphores.remove(handle)) {
            tracker.defer_until(serial, PendingDestroy::Semaphore(native));
        }

        let signals = SubmitSignals {
            fence: wants_fence.then(|| fences.insert(serial)),
            semaphore: signal.map(|semaphore| semaphores.insert(semaphore)),
        };
        if let Err(err) = tracker.retire(backend) {
            log::warn!("failed to poll submissions after submit: {err}");
        }
        Ok(signals)
    }

    /// 阻塞直到 fence 对应的提交完成，fence 随之失效
    pub fn wait_on_fence(&mut self, fence: FenceHandle) -> GfxResult<()> {
        let serial = self.fences.remove(fence).ok_or(GfxError::invalid(HandleKind::Fence))?;
        self.tracker.wait(&mut self.backend, serial)
    }

    /// 未被消费的 semaphore 可以显式销毁
    pub fn destroy_semaphore(&mut self, semaphore: SemaphoreHandle) -> GfxResult<()> {
        let native = self
            .semaphores
            .remove(semaphore)
            .ok_or(GfxError::invalid(HandleKind::Semaphore))?;
        self.defer(PendingDestroy::Semaphore(native));
        Ok(())
    }

    /// 不阻塞地回收已完成的提交
    #[inline]
    pub fn retire(&mut self) -> GfxResult<()> {
        self.tracker.retire(&mut self.backend)
    }

    pub fn wait_idle(&mut self) -> GfxResult<()> {
        self.tracker.wait_idle(&mut self.backend)
    }

    fn defer(&mut self, object: PendingDestroy<D>) {
        self.tracker.defer(object);
        if let Err(err) = self.tracker.retire(&mut self.backend) {
            log::warn!("failed to poll submissions: {err}");
        }
    }
}

// 交换链
impl<D: DeviceBackend> GfxDevice<D> {
    pub fn create_swap_chain(&mut self, info: &SwapChainInfo<D::SurfaceSource>) -> GfxResult<SwapChainHandle> {
        let queue = self.queue(info.present_queue)?;
        let surface = self.backend.create_surface(&info.surface)?;
        let built = Self::build_swap_chain(&mut self.backend, &surface, &queue, info.width, info.height, info.vsync);
        let (native, images, config) = match built {
            Ok(built) => built,
            Err(err) => {
                self.backend.destroy_surface(surface);
                return Err(err);
            }
        };
        let acquire_fence = match self.backend.create_fence() {
            Ok(fence) => fence,
            Err(err) => {
                for image in images {
                    self.backend.destroy_texture(image);
                }
                self.backend.destroy_swap_chain(native);
                self.backend.destroy_surface(surface);
                return Err(err);
            }
        };

        log::info!(
            "swap chain created: {:?} {}x{} {:?}, {} images",
            config.format,
            config.width,
            config.height,
            config.present_mode,
            images.len()
        );
        let handle = self.swap_chains.insert(GfxSwapChain {
            surface,
            native: Some(native),
            images: Vec::new(),
            current_image: 0,
            config,
            vsync: info.vsync,
            present_queue: info.present_queue,
            acquire_fence,
        });
        self.adopt_swap_chain_images(handle, images);
        if let Err(err) = self.acquire_next_image_index(handle) {
            // handle 还没有交给调用方，直接销毁
            self.discard_swap_chain(handle);
            return Err(err);
        }
        Ok(handle)
    }

    /// 等待 device 空闲，销毁旧的 image 与 native 交换链，在同一个 surface 上重建
    pub fn resize_swap_chain(&mut self, handle: SwapChainHandle, width: u32, height: u32) -> GfxResult<()> {
        self.swap_chains.require(handle)?;
        self.wait_idle()?;
        self.release_swap_chain_images(handle);

        let Self {
            backend,
            swap_chains,
            queues,
            ..
        } = self;
        let swap_chain = swap_chains.require_mut(handle)?;
        if let Some(native) = swap_chain.native.take() {
            backend.destroy_swap_chain(native);
        }
        let queue = queues[swap_chain.present_queue];
        let (native, images, config) =
            Self::build_swap_chain(backend, &swap_chain.surface, &queue, width, height, swap_chain.vsync)?;
        log::info!("swap chain resized to {}x{}", config.width, config.height);
        swap_chain.native = Some(native);
        swap_chain.config = config;

        self.adopt_swap_chain_images(handle, images);
        self.acquire_next_image_index(handle)?;
        Ok(())
    }

    pub fn destroy_swap_chain(&mut self, handle: SwapChainHandle) -> GfxResult<()> {
        self.swap_chains.require(handle)?;
        self.wait_idle()?;
        self.discard_swap_chain(handle);
        Ok(())
    }

    /// 释放 image、native 交换链、acquire fence 和 surface
    fn discard_swap_chain(&mut self, handle: SwapChainHandle) {
        self.release_swap_chain_images(handle);
        if let Some(swap_chain) = self.swap_chains.remove(handle) {
            if let Some(native) = swap_chain.native {
                self.backend.destroy_swap_chain(native);
            }
            self.backend.destroy_fence(swap_chain.acquire_fence);
            self.backend.destroy_surface(swap_chain.surface);
        }
    }

    /// 当前 image 对应的 texture
    pub fn swap_chain_image(&self, handle: SwapChainHandle) -> GfxResult<TextureHandle> {
        let swap_chain = self.swap_chains.require(handle)?;
        swap_chain
            .current_image()
            .ok_or_else(|| GfxError::protocol("swap chain has no acquired image"))
    }

    /// 阻塞在专用 fence 上，直到下一张 image 可用
    pub fn acquire_next_image_index(&mut self, handle: SwapChainHandle) -> GfxResult<u32> {
        let Self {
            backend, swap_chains, ..
        } = self;
        let swap_chain = swap_chains.require_mut(handle)?;
        let native = swap_chain
            .native
            .as_mut()
            .ok_or_else(|| GfxError::protocol("swap chain has no native swap object"))?;
        let index = backend.acquire_next_image(native, &swap_chain.acquire_fence)?;
        swap_chain.current_image = index;
        Ok(index)
    }

    /// 呈现当前 image，随后立即获取下一张
    pub fn present_swap_chain(
        &mut self,
        handle: SwapChainHandle,
        queue_index: usize,
        wait_semaphore: Option<SemaphoreHandle>,
    ) -> GfxResult<()> {
        let queue = self.queue(queue_index)?;
        let Self {
            backend,
            swap_chains,
            semaphores,
            tracker,
            ..
        } = self;
        let swap_chain = swap_chains.require(handle)?;
        let wait = match wait_semaphore {
            Some(semaphore) => Some(semaphores.require(semaphore)?),
            None => None,
        };
        let native = swap_chain
            .native
            .as_ref()
            .ok_or_else(|| GfxError::protocol("swap chain has no native swap object"))?;
        backend.present(&queue, native, swap_chain.current_image, wait)?;

        // present 没有 fence，等下一次提交完成时再释放
        if let Some(native) = wait_semaphore.and_then(|semaphore| semaphores.remove(semaphore)) {
            tracker.defer_until(tracker.next_serial(), PendingDestroy::Semaphore(native));
        }
        self.acquire_next_image_index(handle)?;
        Ok(())
    }

    fn build_swap_chain(
        backend: &mut D,
        surface: &D::Surface,
        queue: &QueueSlot,
        width: u32,
        height: u32,
        vsync: bool,
    ) -> GfxResult<(D::SwapChain, Vec<D::Texture>, SwapChainConfig)> {
        let capabilities = backend.surface_capabilities(surface, queue)?;
        if !capabilities.present_supported {
            return Err(GfxError::Initialization(format!(
                "queue family {} cannot present to this surface",
                queue.family
            )));
        }
        let config = negotiate(&capabilities, width, height, vsync, queue.family)?;
        let (native, images) = backend.create_swap_chain(surface, &config)?;
        Ok((native, images, config))
    }

    fn adopt_swap_chain_images(&mut self, handle: SwapChainHandle, images: Vec<D::Texture>) {
        let Some(swap_chain) = self.swap_chains.get_mut(handle) else {
            return;
        };
        let info = TextureInfo::new_2d(
            TextureUsage::ColorAttachment,
            swap_chain.config.format,
            swap_chain.config.width,
            swap_chain.config.height,
        );
        swap_chain.images = images
            .into_iter()
            .map(|native| {
                self.textures.insert(GfxTexture {
                    info: info.clone(),
                    kind: TextureKind::SwapChainImage { swap_chain: handle },
                    state: TextureState::Undefined,
                    native,
                })
            })
            .collect();
        swap_chain.current_image = 0;
    }

    /// 调用前 device 必须已经空闲
    fn release_swap_chain_images(&mut self, handle: SwapChainHandle) {
        let Some(swap_chain) = self.swap_chains.get_mut(handle) else {
            return;
        };
        for image in swap_chain.images.drain(..) {
            if let Some(texture) = self.textures.remove(image) {
                self.backend.destroy_texture(texture.native);
            }
        }
    }
}
