//! 纯 CPU 的 backend
//!
//! buffer 和 texture 是内存中的字节数组；command buffer 记录命令，在 submit 时依次回放：
//! 拷贝会真正执行，dispatch 会调用为该 shader 注册的 CPU kernel（没有注册时什么也不做，
//! 相当于恒等 shader）。fence 在 submit 时立即 signal。surface 的能力由调用方描述。
//!
//! 用于测试和没有 GPU 的环境，descriptor pool 的容量限制和真实 device 一致。

use std::{
    cell::{Cell, RefCell, RefMut},
    collections::HashMap,
    rc::Rc,
};

use crate::{
    backend::{DeviceBackend, GfxBackend},
    basic::{
        error::{ErrorSink, GfxError, GfxResult},
        flags::{AdapterKind, QueueFlags, ShaderStages},
    },
    commands::command_list::{IndexType, NativeRenderPass, Scissor, Viewport},
    descriptors::descriptor_set::{DescriptorBindingInfo, DescriptorSetInfo, DescriptorType},
    foundation::{
        adapter::{AdapterInfo, AdapterLimits, QueueFamilyInfo, QueueSlot},
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

type Memory = Rc<RefCell<Vec<u8>>>;

/// descriptor set 中某个 slot 指向的内存
#[derive(Clone)]
pub enum HeadlessBinding {
    Buffer(Memory),
    Texture(Memory),
}

type BoundSet = Option<Vec<Option<HeadlessBinding>>>;

/// kernel 执行时能看到的状态：group 数量、绑定的 descriptor set、push constant
pub struct HeadlessDispatch<'a> {
    group_count: [u32; 3],
    sets: &'a [BoundSet],
    constants: &'a [u8],
}

impl<'a> HeadlessDispatch<'a> {
    #[inline]
    pub fn group_count(&self) -> [u32; 3] {
        self.group_count
    }

    #[inline]
    pub fn constants(&self) -> &'a [u8] {
        self.constants
    }

    /// 第 `set` 个 descriptor set 第 `binding` 个 slot 中的 buffer
    ///
    /// 同一个 buffer 绑定在多个 slot 时，不能同时持有两个返回值。
    pub fn buffer(&self, set: usize, binding: usize) -> Option<RefMut<'a, Vec<u8>>> {
        match self.sets.get(set)?.as_ref()?.get(binding)?.as_ref()? {
            HeadlessBinding::Buffer(memory) => Some(memory.borrow_mut()),
            HeadlessBinding::Texture(_) => None,
        }
    }
}

pub type HeadlessKernel = Rc<dyn Fn(&HeadlessDispatch<'_>)>;

pub struct HeadlessConfig {
    pub adapters: Vec<AdapterInfo>,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        let all = QueueFlags::GRAPHICS | QueueFlags::COMPUTE | QueueFlags::TRANSFER;
        Self {
            adapters: vec![AdapterInfo {
                name: "Strata Headless Adapter".to_string(),
                kind: AdapterKind::Cpu,
                limits: AdapterLimits {
                    max_image_dimension_2d: 16384,
                    max_per_set_sampled_images: 1024,
                    max_per_set_uniform_buffers: 64,
                    max_bound_descriptor_sets: 8,
                },
                queue_families: vec![
                    QueueFamilyInfo {
                        flags: all,
                        queue_count: 4,
                    },
                    QueueFamilyInfo {
                        flags: QueueFlags::COMPUTE | QueueFlags::TRANSFER,
                        queue_count: 2,
                    },
                    QueueFamilyInfo {
                        flags: QueueFlags::TRANSFER,
                        queue_count: 1,
                    },
                ],
            }],
        }
    }
}

pub struct HeadlessBackend {
    adapters: Vec<AdapterInfo>,
    sink: ErrorSink,
}

impl GfxBackend for HeadlessBackend {
    type Device = HeadlessDevice;
    type Config = HeadlessConfig;

    fn new(app_info: &AppInfo, config: HeadlessConfig, sink: ErrorSink) -> GfxResult<Self> {
        log::info!("headless backend for {} with {} adapter(s)", app_info.app_name, config.adapters.len());
        Ok(Self {
            adapters: config.adapters,
            sink,
        })
    }

    fn adapters(&self) -> &[AdapterInfo] {
        &self.adapters
    }

    fn create_device(
        &mut self,
        adapter_index: usize,
        queues: &[QueueSlot],
        pool_sizes: &DescriptorPoolSizes,
    ) -> GfxResult<HeadlessDevice> {
        if adapter_index >= self.adapters.len() {
            return Err(GfxError::Initialization(format!("no headless adapter #{adapter_index}")));
        }
        Ok(HeadlessDevice {
            queues: queues.to_vec(),
            pool_capacity: *pool_sizes,
            pool_used: PoolUsage::default(),
            kernels: HashMap::new(),
            stats: HeadlessStats::default(),
            sink: self.sink.clone(),
        })
    }
}

/// 存活对象的数量与执行过的命令数量，用于观察前端的生命周期管理
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeadlessStats {
    pub buffers: usize,
    pub textures: usize,
    pub samplers: usize,
    pub descriptor_set_layouts: usize,
    pub descriptor_sets: usize,
    pub pipelines: usize,
    pub command_buffers: usize,
    pub fences: usize,
    pub semaphores: usize,
    pub surfaces: usize,
    pub swap_chains: usize,

    pub submissions: usize,
    pub dispatches: usize,
    pub draws: usize,
    pub copies: usize,
    pub barriers: usize,
    pub presents: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct PoolUsage {
    sets: u32,
    storage_buffers: u32,
    uniform_buffers: u32,
    textures: u32,
}

impl PoolUsage {
    fn of(bindings: &[DescriptorBindingInfo]) -> Self {
        let mut usage = Self {
            sets: 1,
            ..Default::default()
        };
        for binding in bindings {
            match binding.ty {
                DescriptorType::StorageBuffer => usage.storage_buffers += binding.count,
                DescriptorType::UniformBuffer => usage.uniform_buffers += binding.count,
                DescriptorType::Texture => usage.textures += binding.count,
            }
        }
        usage
    }

    fn fits(&self, extra: &Self, capacity: &DescriptorPoolSizes) -> bool {
        self.sets + extra.sets <= capacity.max_sets
            && self.storage_buffers + extra.storage_buffers <= capacity.storage_buffers
            && self.uniform_buffers + extra.uniform_buffers <= capacity.uniform_buffers
            && self.textures + extra.textures <= capacity.textures
    }

    fn add(&mut self, other: &Self) {
        self.sets += other.sets;
        self.storage_buffers += other.storage_buffers;
        self.uniform_buffers += other.uniform_buffers;
        self.textures += other.textures;
    }

    fn sub(&mut self, other: &Self) {
        self.sets -= other.sets;
        self.storage_buffers -= other.storage_buffers;
        self.uniform_buffers -= other.uniform_buffers;
        self.textures -= other.textures;
    }
}

pub struct HeadlessBuffer {
    memory: Memory,
    /// map 期间的副本，unmap 时写回
    mapped: Vec<u8>,
}

impl HeadlessBuffer {
    /// 当前内容（不包含尚未 unmap 的写入）
    pub fn contents(&self) -> Vec<u8> {
        self.memory.borrow().clone()
    }
}

pub struct HeadlessTexture {
    memory: Memory,
}

impl HeadlessTexture {
    pub fn contents(&self) -> Vec<u8> {
        self.memory.borrow().clone()
    }
}

pub struct HeadlessSampler {
    pub info: SamplerInfo,
}

pub struct HeadlessDescriptorSetLayout {
    pub bindings: Vec<DescriptorBindingInfo>,
}

pub struct HeadlessDescriptorSet {
    slots: Vec<Option<HeadlessBinding>>,
    usage: PoolUsage,
}

pub struct HeadlessPipeline {
    kernel: Option<HeadlessKernel>,
}

enum HeadlessCommand {
    Dispatch {
        kernel: Option<HeadlessKernel>,
        group_count: [u32; 3],
        sets: Vec<BoundSet>,
        constants: Vec<u8>,
    },
    CopyBufferToTexture {
        src: Memory,
        dst: Memory,
        len: usize,
    },
    Draw,
    /// 从 `Undefined` 转换时内容被丢弃，回放时清零
    Barrier {
        discard: Option<Memory>,
    },
}

pub struct HeadlessCommandBuffer {
    family: u32,
    commands: Vec<HeadlessCommand>,
    kernel: Option<HeadlessKernel>,
    bound_sets: Vec<BoundSet>,
    constants: Vec<u8>,
}

impl HeadlessCommandBuffer {
    fn clear(&mut self) {
        self.commands.clear();
        self.kernel = None;
        self.bound_sets.clear();
        self.constants.clear();
    }

    #[inline]
    pub fn command_count(&self) -> usize {
        self.commands.len()
    }
}

pub struct HeadlessFence {
    signaled: Cell<bool>,
}

pub struct HeadlessSemaphore {
    signaled: Cell<bool>,
}

/// 交给 `create_swap_chain` 的 surface 描述，同时也是 native surface
#[derive(Debug, Clone, Default)]
pub struct HeadlessSurface {
    pub capabilities: SurfaceCapabilities,
    /// 窗口已经消失：交换链仍然可以创建，但获取 image 会失败
    pub lost: bool,
}

pub struct HeadlessSwapChain {
    image_count: u32,
    acquired: Option<u32>,
    lost: bool,
}

pub struct HeadlessDevice {
    queues: Vec<QueueSlot>,
    pool_capacity: DescriptorPoolSizes,
    pool_used: PoolUsage,
    kernels: HashMap<Vec<u8>, HeadlessKernel>,
    stats: HeadlessStats,
    sink: ErrorSink,
}

// tools
impl HeadlessDevice {
    /// 为某段 shader 代码注册 CPU 实现，之后用这段代码创建的 compute pipeline 会执行它
    pub fn register_kernel(
        &mut self,
        shader_code: impl Into<Vec<u8>>,
        kernel: impl Fn(&HeadlessDispatch<'_>) + 'static,
    ) {
        self.kernels.insert(shader_code.into(), Rc::new(kernel));
    }

    #[inline]
    pub fn stats(&self) -> HeadlessStats {
        self.stats
    }

    #[inline]
    pub fn queues(&self) -> &[QueueSlot] {
        &self.queues
    }

    fn replay(&mut self, cmd: &HeadlessCommandBuffer) {
        for command in &cmd.commands {
            match command {
                HeadlessCommand::Dispatch {
                    kernel,
                    group_count,
                    sets,
                    constants,
                } => {
                    self.stats.dispatches += 1;
                    if let Some(kernel) = kernel {
                        kernel(&HeadlessDispatch {
                            group_count: *group_count,
                            sets,
                            constants,
                        });
                    }
                }
                HeadlessCommand::CopyBufferToTexture { src, dst, len } => {
                    self.stats.copies += 1;
                    let src = src.borrow();
                    let mut dst = dst.borrow_mut();
                    let len = (*len).min(src.len()).min(dst.len());
                    dst[..len].copy_from_slice(&src[..len]);
                }
                HeadlessCommand::Draw => self.stats.draws += 1,
                HeadlessCommand::Barrier { discard } => {
                    self.stats.barriers += 1;
                    if let Some(memory) = discard {
                        memory.borrow_mut().fill(0);
                    }
                }
            }
        }
    }
}

impl DeviceBackend for HeadlessDevice {
    type Buffer = HeadlessBuffer;
    type Texture = HeadlessTexture;
    type Sampler = HeadlessSampler;
    type DescriptorSetLayout = HeadlessDescriptorSetLayout;
    type DescriptorSet = HeadlessDescriptorSet;
    type Pipeline = HeadlessPipeline;
    type CommandBuffer = HeadlessCommandBuffer;
    type Fence = HeadlessFence;
    type Semaphore = HeadlessSemaphore;
    type Surface = HeadlessSurface;
    type SwapChain = HeadlessSwapChain;
    type SurfaceSource = HeadlessSurface;

    fn create_buffer(&mut self, info: &BufferInfo) -> GfxResult<HeadlessBuffer> {
        self.stats.buffers += 1;
        Ok(HeadlessBuffer {
            memory: Rc::new(RefCell::new(vec![0; info.size as usize])),
            mapped: Vec::new(),
        })
    }

    fn destroy_buffer(&mut self, _buffer: HeadlessBuffer) {
        self.stats.buffers -= 1;
    }

    fn map_buffer<'a>(&mut self, buffer: &'a mut HeadlessBuffer) -> GfxResult<&'a mut [u8]> {
        buffer.mapped = buffer.memory.borrow().clone();
        Ok(&mut buffer.mapped)
    }

    fn unmap_buffer(&mut self, buffer: &mut HeadlessBuffer) {
        let mapped = std::mem::take(&mut buffer.mapped);
        if mapped.len() == buffer.memory.borrow().len() {
            *buffer.memory.borrow_mut() = mapped;
        }
    }

    fn create_texture(&mut self, info: &TextureInfo) -> GfxResult<HeadlessTexture> {
        self.stats.textures += 1;
        Ok(HeadlessTexture {
            memory: Rc::new(RefCell::new(vec![0; info.base_level_size() as usize])),
        })
    }

    fn destroy_texture(&mut self, _texture: HeadlessTexture) {
        self.stats.textures -= 1;
    }

    fn create_sampler(&mut self, info: &SamplerInfo) -> GfxResult<HeadlessSampler> {
        self.stats.samplers += 1;
        Ok(HeadlessSampler { info: *info })
    }

    fn destroy_sampler(&mut self, _sampler: HeadlessSampler) {
        self.stats.samplers -= 1;
    }

    fn create_descriptor_set_layout(&mut self, info: &DescriptorSetInfo) -> GfxResult<HeadlessDescriptorSetLayout> {
        self.stats.descriptor_set_layouts += 1;
        Ok(HeadlessDescriptorSetLayout {
            bindings: info.bindings.clone(),
        })
    }

    fn destroy_descriptor_set_layout(&mut self, _layout: HeadlessDescriptorSetLayout) {
        self.stats.descriptor_set_layouts -= 1;
    }

    fn create_descriptor_set(
        &mut self,
        _layout: &HeadlessDescriptorSetLayout,
        bindings: &[DescriptorBindingInfo],
    ) -> GfxResult<HeadlessDescriptorSet> {
        let usage = PoolUsage::of(bindings);
        if !self.pool_used.fits(&usage, &self.pool_capacity) {
            return Err(GfxError::creation("descriptor set", "descriptor pool exhausted"));
        }
        self.pool_used.add(&usage);
        self.stats.descriptor_sets += 1;
        Ok(HeadlessDescriptorSet {
            slots: vec![None; bindings.len()],
            usage,
        })
    }

    fn destroy_descriptor_set(&mut self, set: HeadlessDescriptorSet) {
        self.pool_used.sub(&set.usage);
        self.stats.descriptor_sets -= 1;
    }

    fn write_buffer_descriptor(
        &mut self,
        set: &mut HeadlessDescriptorSet,
        slot: u32,
        _ty: DescriptorType,
        buffer: &HeadlessBuffer,
    ) {
        if let Some(entry) = set.slots.get_mut(slot as usize) {
            *entry = Some(HeadlessBinding::Buffer(buffer.memory.clone()));
        }
    }

    fn write_texture_descriptor(
        &mut self,
        set: &mut HeadlessDescriptorSet,
        slot: u32,
        texture: &HeadlessTexture,
        _sampler: &HeadlessSampler,
    ) {
        if let Some(entry) = set.slots.get_mut(slot as usize) {
            *entry = Some(HeadlessBinding::Texture(texture.memory.clone()));
        }
    }

    fn create_pipeline(
        &mut self,
        source: PipelineSource<'_>,
        _set_layouts: &[&HeadlessDescriptorSetLayout],
    ) -> GfxResult<HeadlessPipeline> {
        let kernel = match source {
            PipelineSource::Compute(info) => self.kernels.get(&info.shader_code).cloned(),
            PipelineSource::Graphics(_) => None,
        };
        self.stats.pipelines += 1;
        Ok(HeadlessPipeline { kernel })
    }

    fn destroy_pipeline(&mut self, _pipeline: HeadlessPipeline) {
        self.stats.pipelines -= 1;
    }

    fn create_command_buffer(&mut self, queue: &QueueSlot) -> GfxResult<HeadlessCommandBuffer> {
        self.stats.command_buffers += 1;
        Ok(HeadlessCommandBuffer {
            family: queue.family,
            commands: Vec::new(),
            kernel: None,
            bound_sets: Vec::new(),
            constants: Vec::new(),
        })
    }

    fn destroy_command_buffer(&mut self, _cmd: HeadlessCommandBuffer) {
        self.stats.command_buffers -= 1;
    }

    fn begin_command_buffer(&mut self, cmd: &mut HeadlessCommandBuffer) -> GfxResult<()> {
        cmd.clear();
        Ok(())
    }

    fn end_command_buffer(&mut self, _cmd: &mut HeadlessCommandBuffer) -> GfxResult<()> {
        Ok(())
    }

    fn reset_command_buffer(&mut self, cmd: &mut HeadlessCommandBuffer) -> GfxResult<()> {
        cmd.clear();
        Ok(())
    }

    fn cmd_bind_pipeline(&mut self, cmd: &mut HeadlessCommandBuffer, pipeline: &HeadlessPipeline) {
        cmd.kernel = pipeline.kernel.clone();
    }

    fn cmd_bind_descriptor_sets(
        &mut self,
        cmd: &mut HeadlessCommandBuffer,
        _pipeline: &HeadlessPipeline,
        first_set: u32,
        sets: &[&HeadlessDescriptorSet],
    ) {
        let first_set = first_set as usize;
        if cmd.bound_sets.len() < first_set + sets.len() {
            cmd.bound_sets.resize(first_set + sets.len(), None);
        }
        for (i, set) in sets.iter().enumerate() {
            cmd.bound_sets[first_set + i] = Some(set.slots.clone());
        }
    }

    fn cmd_push_constants(
        &mut self,
        cmd: &mut HeadlessCommandBuffer,
        _pipeline: &HeadlessPipeline,
        _stages: ShaderStages,
        offset: u32,
        data: &[u8],
    ) {
        let offset = offset as usize;
        if cmd.constants.len() < offset + data.len() {
            cmd.constants.resize(offset + data.len(), 0);
        }
        cmd.constants[offset..offset + data.len()].copy_from_slice(data);
    }

    fn cmd_dispatch(&mut self, cmd: &mut HeadlessCommandBuffer, group_count: [u32; 3]) {
        let command = HeadlessCommand::Dispatch {
            kernel: cmd.kernel.clone(),
            group_count,
            sets: cmd.bound_sets.clone(),
            constants: cmd.constants.clone(),
        };
        cmd.commands.push(command);
    }

    fn cmd_begin_render_pass(
        &mut self,
        _cmd: &mut HeadlessCommandBuffer,
        _pass: &NativeRenderPass<'_, HeadlessTexture>,
    ) {
    }

    fn cmd_end_render_pass(&mut self, _cmd: &mut HeadlessCommandBuffer) {}

    fn cmd_set_viewport(&mut self, _cmd: &mut HeadlessCommandBuffer, _viewport: &Viewport) {}

    fn cmd_set_scissor(&mut self, _cmd: &mut HeadlessCommandBuffer, _scissor: &Scissor) {}

    fn cmd_bind_vertex_buffers(
        &mut self,
        _cmd: &mut HeadlessCommandBuffer,
        _first: u32,
        _buffers: &[&HeadlessBuffer],
    ) {
    }

    fn cmd_bind_index_buffer(&mut self, _cmd: &mut HeadlessCommandBuffer, _buffer: &HeadlessBuffer, _ty: IndexType) {}

    fn cmd_draw(
        &mut self,
        cmd: &mut HeadlessCommandBuffer,
        _vertices: u32,
        _instances: u32,
        _first: u32,
        _first_instance: u32,
    ) {
        cmd.commands.push(HeadlessCommand::Draw);
    }

    fn cmd_draw_indexed(
        &mut self,
        cmd: &mut HeadlessCommandBuffer,
        _indices: u32,
        _instances: u32,
        _first_index: u32,
        _vertex_offset: i32,
        _first_instance: u32,
    ) {
        cmd.commands.push(HeadlessCommand::Draw);
    }

    fn cmd_transition_texture(
        &mut self,
        cmd: &mut HeadlessCommandBuffer,
        texture: &HeadlessTexture,
        old: TextureState,
        _new: TextureState,
    ) {
        let discard = (old == TextureState::Undefined).then(|| texture.memory.clone());
        cmd.commands.push(HeadlessCommand::Barrier { discard });
    }

    fn cmd_copy_buffer_to_texture(
        &mut self,
        cmd: &mut HeadlessCommandBuffer,
        buffer: &HeadlessBuffer,
        texture: &HeadlessTexture,
        info: &TextureInfo,
    ) {
        cmd.commands.push(HeadlessCommand::CopyBufferToTexture {
            src: buffer.memory.clone(),
            dst: texture.memory.clone(),
            len: info.base_level_size() as usize,
        });
    }

    fn create_fence(&mut self) -> GfxResult<HeadlessFence> {
        self.stats.fences += 1;
        Ok(HeadlessFence {
            signaled: Cell::new(false),
        })
    }

    fn destroy_fence(&mut self, _fence: HeadlessFence) {
        self.stats.fences -= 1;
    }

    fn fence_signaled(&mut self, fence: &HeadlessFence) -> GfxResult<bool> {
        Ok(fence.signaled.get())
    }

    fn wait_fence(&mut self, fence: &HeadlessFence) -> GfxResult<()> {
        if fence.signaled.get() {
            Ok(())
        } else {
            // 没有任何东西会 signal 它，等待会永远阻塞
            Err(GfxError::protocol("waiting on a fence that was never submitted"))
        }
    }

    fn create_semaphore(&mut self) -> GfxResult<HeadlessSemaphore> {
        self.stats.semaphores += 1;
        Ok(HeadlessSemaphore {
            signaled: Cell::new(false),
        })
    }

    fn destroy_semaphore(&mut self, _semaphore: HeadlessSemaphore) {
        self.stats.semaphores -= 1;
    }

    fn submit(
        &mut self,
        queue: &QueueSlot,
        cmd: &HeadlessCommandBuffer,
        wait: Option<&HeadlessSemaphore>,
        signal: Option<&HeadlessSemaphore>,
        fence: &HeadlessFence,
    ) -> GfxResult<()> {
        if queue.family != cmd.family {
            return Err(GfxError::protocol(format!(
                "command buffer of family {} submitted to family {}",
                cmd.family, queue.family
            )));
        }
        if let Some(wait) = wait {
            if !wait.signaled.replace(false) {
                let msg = "submission waits on a semaphore that nothing signals";
                log::warn!("{msg}");
                self.sink.forward(msg);
            }
        }
        self.replay(cmd);
        self.stats.submissions += 1;
        if let Some(signal) = signal {
            signal.signaled.set(true);
        }
        fence.signaled.set(true);
        Ok(())
    }

    fn wait_idle(&mut self) -> GfxResult<()> {
        Ok(())
    }

    fn create_surface(&mut self, source: &HeadlessSurface) -> GfxResult<HeadlessSurface> {
        self.stats.surfaces += 1;
        Ok(source.clone())
    }

    fn destroy_surface(&mut self, _surface: HeadlessSurface) {
        self.stats.surfaces -= 1;
    }

    fn surface_capabilities(
        &mut self,
        surface: &HeadlessSurface,
        _queue: &QueueSlot,
    ) -> GfxResult<SurfaceCapabilities> {
        Ok(surface.capabilities.clone())
    }

    fn create_swap_chain(
        &mut self,
        surface: &HeadlessSurface,
        config: &SwapChainConfig,
    ) -> GfxResult<(HeadlessSwapChain, Vec<HeadlessTexture>)> {
        let image_size = config.width as usize * config.height as usize * config.format.bytes_per_texel() as usize;
        let images = (0..config.image_count)
            .map(|_| HeadlessTexture {
                memory: Rc::new(RefCell::new(vec![0; image_size])),
            })
            .collect::<Vec<_>>();
        self.stats.textures += images.len();
        self.stats.swap_chains += 1;
        Ok((
            HeadlessSwapChain {
                image_count: config.image_count,
                acquired: None,
                lost: surface.lost,
            },
            images,
        ))
    }

    fn destroy_swap_chain(&mut self, _swap_chain: HeadlessSwapChain) {
        self.stats.swap_chains -= 1;
    }

    fn acquire_next_image(&mut self, swap_chain: &mut HeadlessSwapChain, _fence: &HeadlessFence) -> GfxResult<u32> {
        if swap_chain.lost {
            return Err(GfxError::Device("acquire swap chain image: surface lost".to_string()));
        }
        let next = swap_chain.acquired.map_or(0, |index| (index + 1) % swap_chain.image_count.max(1));
        swap_chain.acquired = Some(next);
        Ok(next)
    }

    fn present(
        &mut self,
        _queue: &QueueSlot,
        swap_chain: &HeadlessSwapChain,
        image_index: u32,
        wait: Option<&HeadlessSemaphore>,
    ) -> GfxResult<()> {
        if swap_chain.acquired != Some(image_index) {
            return Err(GfxError::protocol(format!("presenting image {image_index} which was not acquired")));
        }
        if let Some(wait) = wait {
            wait.signaled.set(false);
        }
        self.stats.presents += 1;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_device(pool_sizes: DescriptorPoolSizes) -> HeadlessDevice {
    let mut backend = HeadlessBackend {
        adapters: HeadlessConfig::default().adapters,
        sink: ErrorSink::default(),
    };
    let queue = QueueSlot {
        family: 0,
        index: 0,
        flags: QueueFlags::GRAPHICS | QueueFlags::COMPUTE | QueueFlags::TRANSFER,
    };
    match backend.create_device(0, &[queue], &pool_sizes) {
        Ok(device) => device,
        Err(err) => panic!("headless device: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{pipelines::pipeline::ComputePipelineInfo, resources::buffer::BufferType};

    fn storage_set() -> DescriptorSetInfo {
        DescriptorSetInfo::new([DescriptorBindingInfo::new(DescriptorType::StorageBuffer, ShaderStages::COMPUTE)])
    }

    #[test]
    fn map_writes_land_on_unmap() {
        let mut device = test_device(DescriptorPoolSizes::default());
        let mut buffer = device.create_buffer(&BufferInfo::new(BufferType::Storage, 4)).unwrap();
        device.map_buffer(&mut buffer).unwrap().copy_from_slice(&[1, 2, 3, 4]);
        assert_eq!(buffer.contents(), vec![0; 4]);
        device.unmap_buffer(&mut buffer);
        assert_eq!(buffer.contents(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn registered_kernel_runs_at_submit() {
        let mut device = test_device(DescriptorPoolSizes::default());
        device.register_kernel(b"double".to_vec(), |dispatch| {
            if let Some(mut data) = dispatch.buffer(0, 0) {
                data.iter_mut().for_each(|b| *b *= 2);
            }
        });

        let info = ComputePipelineInfo {
            shader_code: b"double".to_vec(),
            descriptor_sets: vec![storage_set()],
            constant_block: None,
        };
        let layout = device.create_descriptor_set_layout(&info.descriptor_sets[0]).unwrap();
        let pipeline = device.create_pipeline(PipelineSource::Compute(&info), &[&layout]).unwrap();
        let mut set = device.create_descriptor_set(&layout, &info.descriptor_sets[0].bindings).unwrap();

        let mut buffer = device.create_buffer(&BufferInfo::new(BufferType::Storage, 3)).unwrap();
        device.map_buffer(&mut buffer).unwrap().copy_from_slice(&[1, 2, 3]);
        device.unmap_buffer(&mut buffer);
        device.write_buffer_descriptor(&mut set, 0, DescriptorType::StorageBuffer, &buffer);

        let queue = device.queues()[0];
        let mut cmd = device.create_command_buffer(&queue).unwrap();
        device.begin_command_buffer(&mut cmd).unwrap();
        device.cmd_bind_pipeline(&mut cmd, &pipeline);
        device.cmd_bind_descriptor_sets(&mut cmd, &pipeline, 0, &[&set]);
        device.cmd_dispatch(&mut cmd, [1, 1, 1]);
        device.end_command_buffer(&mut cmd).unwrap();

        // 录制时不执行
        assert_eq!(buffer.contents(), vec![1, 2, 3]);

        let fence = device.create_fence().unwrap();
        device.submit(&queue, &cmd, None, None, &fence).unwrap();
        assert!(device.fence_signaled(&fence).unwrap());
        assert_eq!(buffer.contents(), vec![2, 4, 6]);
        assert_eq!(device.stats().dispatches, 1);
    }

    #[test]
    fn descriptor_pool_capacity_is_enforced_and_released() {
        let mut device = test_device(DescriptorPoolSizes {
            max_sets: 2,
            ..Default::default()
        });
        let info = storage_set();
        let layout = device.create_descriptor_set_layout(&info).unwrap();
        let a = device.create_descriptor_set(&layout, &info.bindings).unwrap();
        let _b = device.create_descriptor_set(&layout, &info.bindings).unwrap();
        assert!(matches!(
            device.create_descriptor_set(&layout, &info.bindings),
            Err(GfxError::CreationFailed { .. })
        ));

        device.destroy_descriptor_set(a);
        assert!(device.create_descriptor_set(&layout, &info.bindings).is_ok());
    }

    #[test]
    fn copy_to_texture_replays_bytes() {
        let mut device = test_device(DescriptorPoolSizes::default());
        let info = TextureInfo::new_2d(crate::TextureUsage::Sampled, crate::Format::Rgba8, 1, 1);
        let texture = device.create_texture(&info).unwrap();
        let mut buffer = device.create_buffer(&BufferInfo::new(BufferType::Upload, 4)).unwrap();
        device.map_buffer(&mut buffer).unwrap().copy_from_slice(&[9, 8, 7, 6]);
        device.unmap_buffer(&mut buffer);

        let queue = device.queues()[0];
        let mut cmd = device.create_command_buffer(&queue).unwrap();
        device.begin_command_buffer(&mut cmd).unwrap();
        device.cmd_transition_texture(&mut cmd, &texture, TextureState::Undefined, TextureState::UploadDestination);
        device.cmd_copy_buffer_to_texture(&mut cmd, &buffer, &texture, &info);
        device.end_command_buffer(&mut cmd).unwrap();
        assert_eq!(cmd.command_count(), 2);

        let fence = device.create_fence().unwrap();
        device.submit(&queue, &cmd, None, None, &fence).unwrap();
        assert_eq!(texture.contents(), vec![9, 8, 7, 6]);
    }

    #[test]
    fn undefined_transition_discards_on_submit() {
        let mut device = test_device(DescriptorPoolSizes::default());
        let info = TextureInfo::new_2d(crate::TextureUsage::Sampled, crate::Format::Rgba8, 1, 1);
        let texture = device.create_texture(&info).unwrap();

        let queue = device.queues()[0];
        let mut cmd = device.create_command_buffer(&queue).unwrap();
        device.begin_command_buffer(&mut cmd).unwrap();
        device.cmd_transition_texture(&mut cmd, &texture, TextureState::Undefined, TextureState::ShaderRead);
        device.end_command_buffer(&mut cmd).unwrap();

        // 录制之后写入的内容在提交之前保持不变
        texture.memory.borrow_mut().copy_from_slice(&[1, 2, 3, 4]);
        assert_eq!(texture.contents(), vec![1, 2, 3, 4]);

        let fence = device.create_fence().unwrap();
        device.submit(&queue, &cmd, None, None, &fence).unwrap();
        assert_eq!(texture.contents(), vec![0; 4]);
        assert_eq!(device.stats().barriers, 1);
    }

    #[test]
    fn unsubmitted_fence_cannot_be_waited() {
        let mut device = test_device(DescriptorPoolSizes::default());
        let fence = device.create_fence().unwrap();
        assert!(!device.fence_signaled(&fence).unwrap());
        assert!(matches!(device.wait_fence(&fence), Err(GfxError::ProtocolViolation(_))));
    }

    #[test]
    fn swap_chain_images_cycle() {
        let mut device = test_device(DescriptorPoolSizes::default());
        let surface = device.create_surface(&HeadlessSurface::default()).unwrap();
        let config = SwapChainConfig {
            format: crate::Format::Bgra8Srgb,
            width: 4,
            height: 4,
            present_mode: crate::PresentMode::Fifo,
            image_count: 3,
            present_family: 0,
        };
        let (mut swap_chain, images) = device.create_swap_chain(&surface, &config).unwrap();
        assert_eq!(images.len(), 3);

        let fence = device.create_fence().unwrap();
        let order = (0..4)
            .map(|_| device.acquire_next_image(&mut swap_chain, &fence).unwrap())
            .collect::<Vec<_>>();
        assert_eq!(order, vec![0, 1, 2, 0]);

        let queue = device.queues()[0];
        assert!(device.present(&queue, &swap_chain, 1, None).is_err());
        device.present(&queue, &swap_chain, 0, None).unwrap();
        assert_eq!(device.stats().presents, 1);
    }
}
