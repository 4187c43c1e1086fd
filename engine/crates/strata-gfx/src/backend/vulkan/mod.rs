//! 基于 ash 的 Vulkan 1.3 backend
//!
//! 使用 dynamic rendering 和 synchronization2，显存由 vk-mem 管理。

mod barrier;
mod convert;
mod debug_messenger;
mod device;
mod instance;
mod swapchain;

use std::ffi::c_void;

use ash::vk;
use itertools::Itertools;

pub use device::{
    VulkanBuffer, VulkanCommandBuffer, VulkanDescriptorSet, VulkanDescriptorSetLayout, VulkanDevice, VulkanFence,
    VulkanPipeline, VulkanSampler, VulkanSemaphore, VulkanTexture,
};
pub use swapchain::{VulkanSurface, VulkanSurfaceSource, VulkanSwapChain};

use crate::{
    backend::{
        GfxBackend,
        vulkan::{
            convert::{adapter_kind_from_vk, queue_flags_from_vk},
            debug_messenger::VulkanDebugMsger,
            instance::VulkanInstance,
        },
    },
    basic::error::{ErrorSink, GfxError, GfxResult},
    foundation::{
        adapter::{AdapterInfo, AdapterLimits, QueueFamilyInfo, QueueSlot},
        info::{AppInfo, DescriptorPoolSizes},
    },
};

pub struct VulkanBackend {
    instance: Option<VulkanInstance>,
    debug_msger: Option<VulkanDebugMsger>,
    /// debug messenger 的 user data 指向这里，地址在 backend 的整个生命周期内不变
    _sink: Box<ErrorSink>,

    pdevices: Vec<vk::PhysicalDevice>,
    adapters: Vec<AdapterInfo>,
}

impl GfxBackend for VulkanBackend {
    type Device = VulkanDevice;
    type Config = ();

    fn new(app_info: &AppInfo, _config: (), sink: ErrorSink) -> GfxResult<Self> {
        let sink = Box::new(sink);
        let user_data = &*sink as *const ErrorSink as *mut c_void;

        let instance = VulkanInstance::new(app_info, user_data)?;
        let debug_msger = if instance.validation_enabled() {
            match VulkanDebugMsger::new(instance.entry(), instance.ash_instance(), user_data) {
                Ok(msger) => Some(msger),
                Err(err) => {
                    instance.destroy();
                    return Err(err);
                }
            }
        } else {
            None
        };

        let mut backend = Self {
            instance: Some(instance),
            debug_msger,
            _sink: sink,
            pdevices: Vec::new(),
            adapters: Vec::new(),
        };
        // 失败时通过 Drop 销毁 instance
        backend.enumerate_adapters()?;
        Ok(backend)
    }

    fn adapters(&self) -> &[AdapterInfo] {
        &self.adapters
    }

    fn create_device(
        &mut self,
        adapter_index: usize,
        queues: &[QueueSlot],
        pool_sizes: &DescriptorPoolSizes,
    ) -> GfxResult<VulkanDevice> {
        let pdevice = self
            .pdevices
            .get(adapter_index)
            .copied()
            .ok_or_else(|| GfxError::Initialization(format!("no vulkan adapter #{adapter_index}")))?;
        let name = self.adapters.get(adapter_index).map_or("", |adapter| adapter.name.as_str());
        log::info!("creating vk device on {}", name);
        VulkanDevice::new(self.instance()?, pdevice, queues, pool_sizes)
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        if let Some(debug_msger) = self.debug_msger.take() {
            debug_msger.destroy();
        }
        if let Some(instance) = self.instance.take() {
            instance.destroy();
        }
    }
}

// tools
impl VulkanBackend {
    fn instance(&self) -> GfxResult<&VulkanInstance> {
        self.instance
            .as_ref()
            .ok_or_else(|| GfxError::Initialization("vk instance is destroyed".to_string()))
    }

    fn enumerate_adapters(&mut self) -> GfxResult<()> {
        let ash_instance = self.instance()?.ash_instance().clone();
        let pdevices = unsafe { ash_instance.enumerate_physical_devices() }
            .map_err(|err| GfxError::Initialization(format!("failed to enumerate physical devices: {err}")))?;

        self.adapters = pdevices
            .iter()
            .map(|pdevice| {
                let props = unsafe { ash_instance.get_physical_device_properties(*pdevice) };
                let name = props
                    .device_name_as_c_str()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                log::info!("found gpu: {:?}", name);

                let queue_families = unsafe { ash_instance.get_physical_device_queue_family_properties(*pdevice) }
                    .iter()
                    .map(|family| QueueFamilyInfo {
                        flags: queue_flags_from_vk(family.queue_flags),
                        queue_count: family.queue_count,
                    })
                    .collect_vec();
                log::debug!("queue families of {}:\n{:#?}", name, queue_families);

                AdapterInfo {
                    name,
                    kind: adapter_kind_from_vk(props.device_type),
                    limits: AdapterLimits {
                        max_image_dimension_2d: props.limits.max_image_dimension2_d,
                        max_per_set_sampled_images: props.limits.max_descriptor_set_sampled_images,
                        max_per_set_uniform_buffers: props.limits.max_descriptor_set_uniform_buffers,
                        max_bound_descriptor_sets: props.limits.max_bound_descriptor_sets,
                    },
                    queue_families,
                }
            })
            .collect();
        self.pdevices = pdevices;
        Ok(())
    }
}
