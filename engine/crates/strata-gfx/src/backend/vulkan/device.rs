use std::{collections::HashMap, ffi::CStr};

use ash::vk;
use itertools::Itertools;
use vk_mem::Alloc;

use crate::{
    backend::{
        DeviceBackend,
        vulkan::{
            barrier::{image_barrier, state_mask},
            convert::{
                aspect_of, creation_err, device_err, spirv_words, vk_address_mode, vk_buffer_usage, vk_descriptor_type,
                vk_filter, vk_format, vk_image_type, vk_image_usage, vk_index_type, vk_shader_stages,
            },
            instance::VulkanInstance,
            swapchain::{VulkanSurface, VulkanSurfaceSource, VulkanSwapChain},
        },
    },
    basic::{
        error::{GfxError, GfxResult},
        flags::ShaderStages,
    },
    commands::command_list::{IndexType, NativeRenderPass, Scissor, Viewport},
    descriptors::descriptor_set::{DescriptorBindingInfo, DescriptorSetInfo, DescriptorType},
    foundation::{adapter::QueueSlot, info::DescriptorPoolSizes},
    pipelines::pipeline::{ComputePipelineInfo, GraphicsPipelineInfo, PipelineSource, vertex_layout},
    resources::{
        buffer::BufferInfo,
        sampler::SamplerInfo,
        texture::{TextureInfo, TextureState, TextureUsage},
    },
    swapchain::surface::{SurfaceCapabilities, SwapChainConfig},
};

const SHADER_ENTRY: &CStr = c"main";

pub struct VulkanBuffer {
    pub(crate) handle: vk::Buffer,
    pub(crate) allocation: vk_mem::Allocation,
    pub(crate) size: vk::DeviceSize,
}

pub struct VulkanTexture {
    pub(crate) image: vk::Image,
    pub(crate) view: vk::ImageView,
    /// 交换链的 image 不是手动分配的，没有 allocation
    pub(crate) allocation: Option<vk_mem::Allocation>,
    pub(crate) extent: vk::Extent3D,
    pub(crate) aspect: vk::ImageAspectFlags,
    pub(crate) usage: TextureUsage,
    pub(crate) mip_levels: u32,
}

pub struct VulkanSampler {
    pub(crate) handle: vk::Sampler,
}

pub struct VulkanDescriptorSetLayout {
    pub(crate) handle: vk::DescriptorSetLayout,
}

pub struct VulkanDescriptorSet {
    pub(crate) handle: vk::DescriptorSet,
}

pub struct VulkanPipeline {
    pub(crate) handle: vk::Pipeline,
    pub(crate) layout: vk::PipelineLayout,
    pub(crate) bind_point: vk::PipelineBindPoint,
}

pub struct VulkanCommandBuffer {
    pub(crate) handle: vk::CommandBuffer,
    pub(crate) pool: vk::CommandPool,
}

pub struct VulkanFence {
    pub(crate) handle: vk::Fence,
}

pub struct VulkanSemaphore {
    pub(crate) handle: vk::Semaphore,
}

/// 一个 Vulkan device 以及它拥有的全部共享对象
///
/// 每个 queue family 一个 command pool，整个 device 共用一个 descriptor pool。
pub struct VulkanDevice {
    pub(crate) entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) pdevice: vk::PhysicalDevice,
    pub(crate) device: ash::Device,

    pub(crate) surface_fn: ash::khr::surface::Instance,
    pub(crate) swapchain_fn: ash::khr::swapchain::Device,

    /// 必须在 device 之前销毁
    allocator: Option<vk_mem::Allocator>,

    queues: HashMap<(u32, u32), vk::Queue>,
    command_pools: HashMap<u32, vk::CommandPool>,
    descriptor_pool: vk::DescriptorPool,
}

// 创建与销毁
impl VulkanDevice {
    pub fn new(
        instance: &VulkanInstance,
        pdevice: vk::PhysicalDevice,
        queue_slots: &[QueueSlot],
        pool_sizes: &DescriptorPoolSizes,
    ) -> GfxResult<Self> {
        let ash_instance = instance.ash_instance();

        // 每个 family 需要的 queue 数量
        let mut queue_counts: HashMap<u32, u32> = HashMap::new();
        for slot in queue_slots {
            let count = queue_counts.entry(slot.family).or_default();
            *count = (*count).max(slot.index + 1);
        }
        let priorities = vec![1.0f32; queue_counts.values().copied().max().unwrap_or(1) as usize];
        let queue_cis = queue_counts
            .iter()
            .sorted_by_key(|(family, _)| **family)
            .map(|(family, count)| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(*family)
                    .queue_priorities(&priorities[..*count as usize])
            })
            .collect_vec();

        let device_exts = [ash::khr::swapchain::NAME];
        let supported_exts = unsafe { ash_instance.enumerate_device_extension_properties(pdevice) }
            .map_err(|err| GfxError::Initialization(format!("failed to enumerate device extensions: {err}")))?;
        let device_exts = device_exts
            .iter()
            .filter(|ext| {
                supported_exts
                    .iter()
                    .any(|props| props.extension_name_as_c_str().is_ok_and(|name| name == **ext))
            })
            .map(|ext| ext.as_ptr())
            .collect_vec();
        let exts_str = device_exts.iter().map(|ext| format!("\n\t{:?}", unsafe { CStr::from_ptr(*ext) })).join("");
        log::info!("device exts: {}", exts_str);

        // dynamic rendering 和 synchronization2 都是 1.3 的核心功能
        let mut features13 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);
        let device_ci = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_cis)
            .enabled_extension_names(&device_exts)
            .push_next(&mut features13);

        let device = unsafe { ash_instance.create_device(pdevice, &device_ci, None) }
            .map_err(|err| GfxError::Initialization(format!("failed to create vk device: {err}")))?;

        let queues = queue_slots
            .iter()
            .map(|slot| ((slot.family, slot.index), unsafe { device.get_device_queue(slot.family, slot.index) }))
            .collect();

        let mut vk_device = Self {
            entry: instance.entry().clone(),
            instance: ash_instance.clone(),
            pdevice,
            surface_fn: ash::khr::surface::Instance::new(instance.entry(), ash_instance),
            swapchain_fn: ash::khr::swapchain::Device::new(ash_instance, &device),
            device,
            allocator: None,
            queues,
            command_pools: HashMap::new(),
            descriptor_pool: vk::DescriptorPool::null(),
        };
        // 失败时通过 Drop 释放已经创建的部分
        vk_device.init_allocator()?;
        vk_device.init_command_pools(queue_counts.keys().copied())?;
        vk_device.init_descriptor_pool(pool_sizes)?;

        Ok(vk_device)
    }

    /// vma 需要引用 instance 和 device，因此在 device 创建完成之后再初始化
    fn init_allocator(&mut self) -> GfxResult<()> {
        let mut vma_ci = vk_mem::AllocatorCreateInfo::new(&self.instance, &self.device, self.pdevice);
        vma_ci.vulkan_api_version = vk::API_VERSION_1_3;
        let allocator = unsafe { vk_mem::Allocator::new(vma_ci) }.map_err(creation_err("memory allocator"))?;
        self.allocator = Some(allocator);
        Ok(())
    }

    fn init_command_pools(&mut self, families: impl Iterator<Item = u32>) -> GfxResult<()> {
        for family in families {
            let pool_ci = vk::CommandPoolCreateInfo::default()
                .queue_family_index(family)
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
            let pool =
                unsafe { self.device.create_command_pool(&pool_ci, None) }.map_err(creation_err("command pool"))?;
            self.command_pools.insert(family, pool);
        }
        Ok(())
    }

    fn init_descriptor_pool(&mut self, sizes: &DescriptorPoolSizes) -> GfxResult<()> {
        let pool_sizes = [
            (vk::DescriptorType::STORAGE_BUFFER, sizes.storage_buffers),
            (vk::DescriptorType::UNIFORM_BUFFER, sizes.uniform_buffers),
            (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, sizes.textures),
        ]
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .map(|(ty, descriptor_count)| vk::DescriptorPoolSize { ty, descriptor_count })
        .collect_vec();

        let pool_ci = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(sizes.max_sets)
            .pool_sizes(&pool_sizes);
        self.descriptor_pool =
            unsafe { self.device.create_descriptor_pool(&pool_ci, None) }.map_err(creation_err("descriptor pool"))?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("destroying vk device");
        unsafe {
            if let Err(err) = self.device.device_wait_idle() {
                log::error!("device wait idle before destruction failed: {err}");
            }
            if self.descriptor_pool != vk::DescriptorPool::null() {
                self.device.destroy_descriptor_pool(self.descriptor_pool, None);
            }
            for (_, pool) in self.command_pools.drain() {
                self.device.destroy_command_pool(pool, None);
            }
            drop(self.allocator.take());
            self.device.destroy_device(None);
        }
    }
}

// tools
impl VulkanDevice {
    #[inline]
    fn allocator(&self) -> GfxResult<&vk_mem::Allocator> {
        self.allocator
            .as_ref()
            .ok_or_else(|| GfxError::Initialization("memory allocator is not initialized".to_string()))
    }

    #[inline]
    pub(crate) fn vk_queue(&self, slot: &QueueSlot) -> GfxResult<vk::Queue> {
        self.queues
            .get(&(slot.family, slot.index))
            .copied()
            .ok_or_else(|| GfxError::protocol(format!("queue {}:{} was not created", slot.family, slot.index)))
    }

    fn create_shader_module(&self, code: &[u8]) -> GfxResult<vk::ShaderModule> {
        let words = spirv_words(code)?;
        let shader_module_ci = vk::ShaderModuleCreateInfo::default().code(&words);
        unsafe { self.device.create_shader_module(&shader_module_ci, None) }.map_err(creation_err("shader module"))
    }

    fn create_pipeline_layout(
        &self,
        source: &PipelineSource<'_>,
        set_layouts: &[&VulkanDescriptorSetLayout],
    ) -> GfxResult<vk::PipelineLayout> {
        let set_layouts = set_layouts.iter().map(|layout| layout.handle).collect_vec();
        let push_constant_ranges = source
            .constant_block()
            .map(|block| vk::PushConstantRange {
                stage_flags: vk_shader_stages(block.stages),
                offset: 0,
                size: block.size,
            })
            .into_iter()
            .collect_vec();
        let layout_ci = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constant_ranges);
        unsafe { self.device.create_pipeline_layout(&layout_ci, None) }.map_err(creation_err("pipeline layout"))
    }

    fn create_compute_pipeline(
        &self,
        info: &ComputePipelineInfo,
        layout: vk::PipelineLayout,
    ) -> GfxResult<vk::Pipeline> {
        let module = self.create_shader_module(&info.shader_code)?;
        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(SHADER_ENTRY);
        let pipeline_ci = vk::ComputePipelineCreateInfo::default().stage(stage).layout(layout);
        let result = unsafe {
            self.device
                .create_compute_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&pipeline_ci), None)
        };
        unsafe { self.device.destroy_shader_module(module, None) };

        let pipelines = result.map_err(|(_, err)| GfxError::creation("compute pipeline", err))?;
        pipelines.first().copied().ok_or_else(|| GfxError::creation("compute pipeline", "driver returned no pipeline"))
    }

    fn create_graphics_pipeline(
        &self,
        info: &GraphicsPipelineInfo,
        layout: vk::PipelineLayout,
    ) -> GfxResult<vk::Pipeline> {
        let vertex_module = self.create_shader_module(&info.vertex_code)?;
        let fragment_module = match self.create_shader_module(&info.fragment_code) {
            Ok(module) => module,
            Err(err) => {
                unsafe { self.device.destroy_shader_module(vertex_module, None) };
                return Err(err);
            }
        };
        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex_module)
                .name(SHADER_ENTRY),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment_module)
                .name(SHADER_ENTRY),
        ];

        // 所有属性紧密排列在 binding 0
        let (offsets, stride) = vertex_layout(&info.vertex_attributes);
        let vertex_bindings = if info.vertex_attributes.is_empty() {
            Vec::new()
        } else {
            vec![vk::VertexInputBindingDescription {
                binding: 0,
                stride,
                input_rate: vk::VertexInputRate::VERTEX,
            }]
        };
        let vertex_attributes = info
            .vertex_attributes
            .iter()
            .zip(offsets)
            .enumerate()
            .map(|(location, (attribute, offset))| vk::VertexInputAttributeDescription {
                location: location as u32,
                binding: 0,
                format: vk_format(attribute.format),
                offset,
            })
            .collect_vec();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&vertex_attributes);

        let input_assembly =
            vk::PipelineInputAssemblyStateCreateInfo::default().topology(vk::PrimitiveTopology::TRIANGLE_LIST);
        // viewport 和 scissor 都是 dynamic state，这里只需要数量
        let viewport_state = vk::PipelineViewportStateCreateInfo::default().viewport_count(1).scissor_count(1);
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);
        let multisample =
            vk::PipelineMultisampleStateCreateInfo::default().rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(info.depth_test)
            .depth_write_enable(info.depth_test)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL);
        let blend_attachments = info
            .color_formats
            .iter()
            .map(|_| {
                vk::PipelineColorBlendAttachmentState::default()
                    .blend_enable(false)
                    .color_write_mask(vk::ColorComponentFlags::RGBA)
            })
            .collect_vec();
        let color_blend = vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let color_formats = info.color_formats.iter().map(|format| vk_format(*format)).collect_vec();
        let depth_format = info.depth_format.map_or(vk::Format::UNDEFINED, vk_format);
        let stencil_format = match info.depth_format {
            Some(format) if format.has_stencil() => vk_format(format),
            _ => vk::Format::UNDEFINED,
        };
        let mut rendering_ci = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(depth_format)
            .stencil_attachment_format(stencil_format);

        let pipeline_ci = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .push_next(&mut rendering_ci);

        let result = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&pipeline_ci), None)
        };
        unsafe {
            self.device.destroy_shader_module(vertex_module, None);
            self.device.destroy_shader_module(fragment_module, None);
        }

        let pipelines = result.map_err(|(_, err)| GfxError::creation("graphics pipeline", err))?;
        pipelines.first().copied().ok_or_else(|| GfxError::creation("graphics pipeline", "driver returned no pipeline"))
    }

    /// 为一个 image 创建覆盖全部 mip 的 view
    pub(crate) fn create_image_view(
        &self,
        image: vk::Image,
        view_type: vk::ImageViewType,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
        mip_levels: u32,
    ) -> GfxResult<vk::ImageView> {
        let view_ci = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(view_type)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: mip_levels.max(1),
                base_array_layer: 0,
                layer_count: 1,
            });
        unsafe { self.device.create_image_view(&view_ci, None) }.map_err(creation_err("image view"))
    }
}

impl DeviceBackend for VulkanDevice {
    type Buffer = VulkanBuffer;
    type Texture = VulkanTexture;
    type Sampler = VulkanSampler;
    type DescriptorSetLayout = VulkanDescriptorSetLayout;
    type DescriptorSet = VulkanDescriptorSet;
    type Pipeline = VulkanPipeline;
    type CommandBuffer = VulkanCommandBuffer;
    type Fence = VulkanFence;
    type Semaphore = VulkanSemaphore;
    type Surface = VulkanSurface;
    type SwapChain = VulkanSwapChain;
    type SurfaceSource = VulkanSurfaceSource;

    fn create_buffer(&mut self, info: &BufferInfo) -> GfxResult<VulkanBuffer> {
        let buffer_ci = vk::BufferCreateInfo::default()
            .size(info.size)
            .usage(vk_buffer_usage(info.ty))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        // 所有 buffer 都允许 map，优先使用 device memory
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM,
            ..Default::default()
        };
        let (handle, allocation) =
            unsafe { self.allocator()?.create_buffer(&buffer_ci, &alloc_ci) }.map_err(creation_err("buffer"))?;
        Ok(VulkanBuffer {
            handle,
            allocation,
            size: info.size,
        })
    }

    fn destroy_buffer(&mut self, mut buffer: VulkanBuffer) {
        if let Some(allocator) = self.allocator.as_ref() {
            unsafe { allocator.destroy_buffer(buffer.handle, &mut buffer.allocation) };
        }
    }

    fn map_buffer<'a>(&mut self, buffer: &'a mut VulkanBuffer) -> GfxResult<&'a mut [u8]> {
        let allocator = self.allocator()?;
        let ptr = unsafe { allocator.map_memory(&mut buffer.allocation) }.map_err(device_err("map buffer"))?;
        unsafe {
            if let Err(err) = allocator.invalidate_allocation(&buffer.allocation, 0, vk::WHOLE_SIZE) {
                log::warn!("invalidate mapped buffer failed: {err}");
            }
            Ok(std::slice::from_raw_parts_mut(ptr, buffer.size as usize))
        }
    }

    fn unmap_buffer(&mut self, buffer: &mut VulkanBuffer) {
        let Some(allocator) = self.allocator.as_ref() else {
            return;
        };
        unsafe {
            if let Err(err) = allocator.flush_allocation(&buffer.allocation, 0, vk::WHOLE_SIZE) {
                log::warn!("flush mapped buffer failed: {err}");
            }
            allocator.unmap_memory(&mut buffer.allocation);
        }
    }

    fn create_texture(&mut self, info: &TextureInfo) -> GfxResult<VulkanTexture> {
        let format = vk_format(info.format);
        let (image_type, view_type) = vk_image_type(info.dimension);
        let extent = vk::Extent3D {
            width: info.width,
            height: info.height.max(1),
            depth: info.depth.max(1),
        };
        let image_ci = vk::ImageCreateInfo::default()
            .image_type(image_type)
            .format(format)
            .extent(extent)
            .mip_levels(info.mip_levels.max(1))
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk_image_usage(info.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };
        let allocator = self.allocator()?;
        let (image, mut allocation) =
            unsafe { allocator.create_image(&image_ci, &alloc_ci) }.map_err(creation_err("texture"))?;

        let aspect = aspect_of(info.format);
        let view = match self.create_image_view(image, view_type, format, aspect, info.mip_levels) {
            Ok(view) => view,
            Err(err) => {
                unsafe { allocator.destroy_image(image, &mut allocation) };
                return Err(err);
            }
        };

        Ok(VulkanTexture {
            image,
            view,
            allocation: Some(allocation),
            extent,
            aspect,
            usage: info.usage,
            mip_levels: info.mip_levels.max(1),
        })
    }

    fn destroy_texture(&mut self, texture: VulkanTexture) {
        unsafe { self.device.destroy_image_view(texture.view, None) };
        if let (Some(mut allocation), Some(allocator)) = (texture.allocation, self.allocator.as_ref()) {
            unsafe { allocator.destroy_image(texture.image, &mut allocation) };
        }
    }

    fn create_sampler(&mut self, info: &SamplerInfo) -> GfxResult<VulkanSampler> {
        let (filter, mipmap_mode) = vk_filter(info.filter);
        let address_mode = vk_address_mode(info.address_mode);
        let sampler_ci = vk::SamplerCreateInfo::default()
            .mag_filter(filter)
            .min_filter(filter)
            .mipmap_mode(mipmap_mode)
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .max_lod(vk::LOD_CLAMP_NONE);
        let handle = unsafe { self.device.create_sampler(&sampler_ci, None) }.map_err(creation_err("sampler"))?;
        Ok(VulkanSampler { handle })
    }

    fn destroy_sampler(&mut self, sampler: VulkanSampler) {
        unsafe { self.device.destroy_sampler(sampler.handle, None) };
    }

    fn create_descriptor_set_layout(&mut self, info: &DescriptorSetInfo) -> GfxResult<VulkanDescriptorSetLayout> {
        let bindings = info
            .bindings
            .iter()
            .enumerate()
            .map(|(slot, binding)| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(slot as u32)
                    .descriptor_type(vk_descriptor_type(binding.ty))
                    .descriptor_count(binding.count)
                    .stage_flags(vk_shader_stages(binding.stages))
            })
            .collect_vec();
        let layout_ci = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let handle = unsafe { self.device.create_descriptor_set_layout(&layout_ci, None) }
            .map_err(creation_err("descriptor set layout"))?;
        Ok(VulkanDescriptorSetLayout { handle })
    }

    fn destroy_descriptor_set_layout(&mut self, layout: VulkanDescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(layout.handle, None) };
    }

    fn create_descriptor_set(
        &mut self,
        layout: &VulkanDescriptorSetLayout,
        _bindings: &[DescriptorBindingInfo],
    ) -> GfxResult<VulkanDescriptorSet> {
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.descriptor_pool)
            .set_layouts(std::slice::from_ref(&layout.handle));
        let sets = unsafe { self.device.allocate_descriptor_sets(&alloc_info) }.map_err(|err| match err {
            vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL => {
                GfxError::creation("descriptor set", "descriptor pool exhausted")
            }
            err => GfxError::creation("descriptor set", err),
        })?;
        let handle = sets
            .first()
            .copied()
            .ok_or_else(|| GfxError::creation("descriptor set", "driver returned no set"))?;
        Ok(VulkanDescriptorSet { handle })
    }

    fn destroy_descriptor_set(&mut self, set: VulkanDescriptorSet) {
        if let Err(err) = unsafe { self.device.free_descriptor_sets(self.descriptor_pool, &[set.handle]) } {
            log::error!("free descriptor set failed: {err}");
        }
    }

    fn write_buffer_descriptor(
        &mut self,
        set: &mut VulkanDescriptorSet,
        slot: u32,
        ty: DescriptorType,
        buffer: &VulkanBuffer,
    ) {
        let buffer_info = vk::DescriptorBufferInfo {
            buffer: buffer.handle,
            offset: 0,
            range: vk::WHOLE_SIZE,
        };
        let write = vk::WriteDescriptorSet::default()
            .dst_set(set.handle)
            .dst_binding(slot)
            .descriptor_type(vk_descriptor_type(ty))
            .buffer_info(std::slice::from_ref(&buffer_info));
        unsafe { self.device.update_descriptor_sets(std::slice::from_ref(&write), &[]) };
    }

    fn write_texture_descriptor(
        &mut self,
        set: &mut VulkanDescriptorSet,
        slot: u32,
        texture: &VulkanTexture,
        sampler: &VulkanSampler,
    ) {
        let image_info = vk::DescriptorImageInfo {
            sampler: sampler.handle,
            image_view: texture.view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        };
        let write = vk::WriteDescriptorSet::default()
            .dst_set(set.handle)
            .dst_binding(slot)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(std::slice::from_ref(&image_info));
        unsafe { self.device.update_descriptor_sets(std::slice::from_ref(&write), &[]) };
    }

    fn create_pipeline(
        &mut self,
        source: PipelineSource<'_>,
        set_layouts: &[&VulkanDescriptorSetLayout],
    ) -> GfxResult<VulkanPipeline> {
        let layout = self.create_pipeline_layout(&source, set_layouts)?;
        let (result, bind_point) = match source {
            PipelineSource::Compute(info) => {
                (self.create_compute_pipeline(info, layout), vk::PipelineBindPoint::COMPUTE)
            }
            PipelineSource::Graphics(info) => {
                (self.create_graphics_pipeline(info, layout), vk::PipelineBindPoint::GRAPHICS)
            }
        };
        match result {
            Ok(handle) => Ok(VulkanPipeline {
                handle,
                layout,
                bind_point,
            }),
            Err(err) => {
                unsafe { self.device.destroy_pipeline_layout(layout, None) };
                Err(err)
            }
        }
    }

    fn destroy_pipeline(&mut self, pipeline: VulkanPipeline) {
        unsafe {
            self.device.destroy_pipeline(pipeline.handle, None);
            self.device.destroy_pipeline_layout(pipeline.layout, None);
        }
    }

    fn create_command_buffer(&mut self, queue: &QueueSlot) -> GfxResult<VulkanCommandBuffer> {
        let pool = self
            .command_pools
            .get(&queue.family)
            .copied()
            .ok_or_else(|| GfxError::protocol(format!("no command pool for queue family {}", queue.family)))?;
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers =
            unsafe { self.device.allocate_command_buffers(&alloc_info) }.map_err(creation_err("command buffer"))?;
        let handle = buffers
            .first()
            .copied()
            .ok_or_else(|| GfxError::creation("command buffer", "driver returned no command buffer"))?;
        Ok(VulkanCommandBuffer { handle, pool })
    }

    fn destroy_command_buffer(&mut self, cmd: VulkanCommandBuffer) {
        unsafe { self.device.free_command_buffers(cmd.pool, &[cmd.handle]) };
    }

    fn begin_command_buffer(&mut self, cmd: &mut VulkanCommandBuffer) -> GfxResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::default();
        unsafe { self.device.begin_command_buffer(cmd.handle, &begin_info) }.map_err(device_err("begin command buffer"))
    }

    fn end_command_buffer(&mut self, cmd: &mut VulkanCommandBuffer) -> GfxResult<()> {
        unsafe { self.device.end_command_buffer(cmd.handle) }.map_err(device_err("end command buffer"))
    }

    fn reset_command_buffer(&mut self, cmd: &mut VulkanCommandBuffer) -> GfxResult<()> {
        unsafe { self.device.reset_command_buffer(cmd.handle, vk::CommandBufferResetFlags::empty()) }
            .map_err(device_err("reset command buffer"))
    }

    fn cmd_bind_pipeline(&mut self, cmd: &mut VulkanCommandBuffer, pipeline: &VulkanPipeline) {
        unsafe { self.device.cmd_bind_pipeline(cmd.handle, pipeline.bind_point, pipeline.handle) };
    }

    fn cmd_bind_descriptor_sets(
        &mut self,
        cmd: &mut VulkanCommandBuffer,
        pipeline: &VulkanPipeline,
        first_set: u32,
        sets: &[&VulkanDescriptorSet],
    ) {
        let sets = sets.iter().map(|set| set.handle).collect_vec();
        unsafe {
            self.device
                .cmd_bind_descriptor_sets(cmd.handle, pipeline.bind_point, pipeline.layout, first_set, &sets, &[])
        };
    }

    fn cmd_push_constants(
        &mut self,
        cmd: &mut VulkanCommandBuffer,
        pipeline: &VulkanPipeline,
        stages: ShaderStages,
        offset: u32,
        data: &[u8],
    ) {
        unsafe {
            self.device
                .cmd_push_constants(cmd.handle, pipeline.layout, vk_shader_stages(stages), offset, data)
        };
    }

    fn cmd_dispatch(&mut self, cmd: &mut VulkanCommandBuffer, group_count: [u32; 3]) {
        unsafe { self.device.cmd_dispatch(cmd.handle, group_count[0], group_count[1], group_count[2]) };
    }

    fn cmd_begin_render_pass(&mut self, cmd: &mut VulkanCommandBuffer, pass: &NativeRenderPass<'_, VulkanTexture>) {
        let color_attachments = pass
            .color_attachments
            .iter()
            .map(|texture| {
                vk::RenderingAttachmentInfo::default()
                    .image_view(texture.view)
                    .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .load_op(vk::AttachmentLoadOp::CLEAR)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .clear_value(vk::ClearValue {
                        color: vk::ClearColorValue {
                            float32: pass.clear_color,
                        },
                    })
            })
            .collect_vec();
        let depth_attachment = pass.depth_attachment.map(|texture| {
            vk::RenderingAttachmentInfo::default()
                .image_view(texture.view)
                .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .clear_value(vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
                })
        });

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D {
                    width: pass.extent.0,
                    height: pass.extent.1,
                },
            })
            .layer_count(1)
            .color_attachments(&color_attachments);
        if let Some(depth_attachment) = depth_attachment.as_ref() {
            rendering_info = rendering_info.depth_attachment(depth_attachment);
        }
        unsafe { self.device.cmd_begin_rendering(cmd.handle, &rendering_info) };
    }

    fn cmd_end_render_pass(&mut self, cmd: &mut VulkanCommandBuffer) {
        unsafe { self.device.cmd_end_rendering(cmd.handle) };
    }

    fn cmd_set_viewport(&mut self, cmd: &mut VulkanCommandBuffer, viewport: &Viewport) {
        let viewport = vk::Viewport {
            x: viewport.x,
            y: viewport.y,
            width: viewport.width,
            height: viewport.height,
            min_depth: viewport.min_depth,
            max_depth: viewport.max_depth,
        };
        unsafe { self.device.cmd_set_viewport(cmd.handle, 0, std::slice::from_ref(&viewport)) };
    }

    fn cmd_set_scissor(&mut self, cmd: &mut VulkanCommandBuffer, scissor: &Scissor) {
        let rect = vk::Rect2D {
            offset: vk::Offset2D {
                x: scissor.x,
                y: scissor.y,
            },
            extent: vk::Extent2D {
                width: scissor.width,
                height: scissor.height,
            },
        };
        unsafe { self.device.cmd_set_scissor(cmd.handle, 0, std::slice::from_ref(&rect)) };
    }

    fn cmd_bind_vertex_buffers(
        &mut self,
        cmd: &mut VulkanCommandBuffer,
        first_binding: u32,
        buffers: &[&VulkanBuffer],
    ) {
        let handles = buffers.iter().map(|buffer| buffer.handle).collect_vec();
        let offsets = vec![0; handles.len()];
        unsafe { self.device.cmd_bind_vertex_buffers(cmd.handle, first_binding, &handles, &offsets) };
    }

    fn cmd_bind_index_buffer(&mut self, cmd: &mut VulkanCommandBuffer, buffer: &VulkanBuffer, index_type: IndexType) {
        unsafe {
            self.device
                .cmd_bind_index_buffer(cmd.handle, buffer.handle, 0, vk_index_type(index_type))
        };
    }

    fn cmd_draw(
        &mut self,
        cmd: &mut VulkanCommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        unsafe {
            self.device
                .cmd_draw(cmd.handle, vertex_count, instance_count, first_vertex, first_instance)
        };
    }

    fn cmd_draw_indexed(
        &mut self,
        cmd: &mut VulkanCommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.cmd_draw_indexed(
                cmd.handle,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            )
        };
    }

    fn cmd_transition_texture(
        &mut self,
        cmd: &mut VulkanCommandBuffer,
        texture: &VulkanTexture,
        old: TextureState,
        new: TextureState,
    ) {
        let barrier = image_barrier(
            texture.image,
            texture.aspect,
            texture.mip_levels,
            state_mask(old, texture.usage),
            state_mask(new, texture.usage),
        );
        let dependency_info = vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&barrier));
        unsafe { self.device.cmd_pipeline_barrier2(cmd.handle, &dependency_info) };
    }

    fn cmd_copy_buffer_to_texture(
        &mut self,
        cmd: &mut VulkanCommandBuffer,
        buffer: &VulkanBuffer,
        texture: &VulkanTexture,
        _info: &TextureInfo,
    ) {
        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: texture.aspect,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D::default(),
            image_extent: texture.extent,
        };
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                cmd.handle,
                buffer.handle,
                texture.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&region),
            )
        };
    }

    fn create_fence(&mut self) -> GfxResult<VulkanFence> {
        let handle =
            unsafe { self.device.create_fence(&vk::FenceCreateInfo::default(), None) }.map_err(creation_err("fence"))?;
        Ok(VulkanFence { handle })
    }

    fn destroy_fence(&mut self, fence: VulkanFence) {
        unsafe { self.device.destroy_fence(fence.handle, None) };
    }

    fn fence_signaled(&mut self, fence: &VulkanFence) -> GfxResult<bool> {
        unsafe { self.device.get_fence_status(fence.handle) }.map_err(device_err("query fence"))
    }

    fn wait_fence(&mut self, fence: &VulkanFence) -> GfxResult<()> {
        unsafe { self.device.wait_for_fences(std::slice::from_ref(&fence.handle), true, u64::MAX) }
            .map_err(device_err("wait fence"))
    }

    fn create_semaphore(&mut self) -> GfxResult<VulkanSemaphore> {
        let handle = unsafe { self.device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }
            .map_err(creation_err("semaphore"))?;
        Ok(VulkanSemaphore { handle })
    }

    fn destroy_semaphore(&mut self, semaphore: VulkanSemaphore) {
        unsafe { self.device.destroy_semaphore(semaphore.handle, None) };
    }

    fn submit(
        &mut self,
        queue: &QueueSlot,
        cmd: &VulkanCommandBuffer,
        wait: Option<&VulkanSemaphore>,
        signal: Option<&VulkanSemaphore>,
        fence: &VulkanFence,
    ) -> GfxResult<()> {
        let vk_queue = self.vk_queue(queue)?;
        let cmd_infos = [vk::CommandBufferSubmitInfo::default().command_buffer(cmd.handle)];
        let wait_infos = wait
            .map(|semaphore| {
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(semaphore.handle)
                    .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            })
            .into_iter()
            .collect_vec();
        let signal_infos = signal
            .map(|semaphore| {
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(semaphore.handle)
                    .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            })
            .into_iter()
            .collect_vec();
        let submit_info = vk::SubmitInfo2::default()
            .command_buffer_infos(&cmd_infos)
            .wait_semaphore_infos(&wait_infos)
            .signal_semaphore_infos(&signal_infos);
        unsafe { self.device.queue_submit2(vk_queue, std::slice::from_ref(&submit_info), fence.handle) }
            .map_err(device_err("queue submit"))
    }

    fn wait_idle(&mut self) -> GfxResult<()> {
        unsafe { self.device.device_wait_idle() }.map_err(device_err("device wait idle"))
    }

    fn create_surface(&mut self, source: &VulkanSurfaceSource) -> GfxResult<VulkanSurface> {
        self.create_vk_surface(source)
    }

    fn destroy_surface(&mut self, surface: VulkanSurface) {
        unsafe { self.surface_fn.destroy_surface(surface.handle, None) };
    }

    fn surface_capabilities(&mut self, surface: &VulkanSurface, queue: &QueueSlot) -> GfxResult<SurfaceCapabilities> {
        self.query_surface_capabilities(surface, queue.family)
    }

    fn create_swap_chain(
        &mut self,
        surface: &VulkanSurface,
        config: &SwapChainConfig,
    ) -> GfxResult<(VulkanSwapChain, Vec<VulkanTexture>)> {
        self.create_vk_swap_chain(surface, config)
    }

    fn destroy_swap_chain(&mut self, swap_chain: VulkanSwapChain) {
        unsafe { self.swapchain_fn.destroy_swapchain(swap_chain.handle, None) };
    }

    fn acquire_next_image(&mut self, swap_chain: &mut VulkanSwapChain, fence: &VulkanFence) -> GfxResult<u32> {
        let (image_index, suboptimal) = unsafe {
            self.swapchain_fn
                .acquire_next_image(swap_chain.handle, u64::MAX, vk::Semaphore::null(), fence.handle)
        }
        .map_err(device_err("acquire swap chain image"))?;
        if suboptimal {
            log::debug!("swap chain image {image_index} is suboptimal");
        }
        unsafe {
            self.device
                .wait_for_fences(std::slice::from_ref(&fence.handle), true, u64::MAX)
                .map_err(device_err("wait acquire fence"))?;
            self.device
                .reset_fences(std::slice::from_ref(&fence.handle))
                .map_err(device_err("reset acquire fence"))?;
        }
        Ok(image_index)
    }

    fn present(
        &mut self,
        queue: &QueueSlot,
        swap_chain: &VulkanSwapChain,
        image_index: u32,
        wait: Option<&VulkanSemaphore>,
    ) -> GfxResult<()> {
        let vk_queue = self.vk_queue(queue)?;
        let wait_semaphores = wait.map(|semaphore| semaphore.handle).into_iter().collect_vec();
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .image_indices(&image_indices)
            .swapchains(std::slice::from_ref(&swap_chain.handle));
        let suboptimal =
            unsafe { self.swapchain_fn.queue_present(vk_queue, &present_info) }.map_err(device_err("present"))?;
        if suboptimal {
            log::debug!("presented to a suboptimal swap chain");
        }
        Ok(())
    }
}
