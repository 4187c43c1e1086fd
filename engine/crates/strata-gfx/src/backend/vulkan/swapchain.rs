use ash::vk;
use itertools::Itertools;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::{
    backend::vulkan::{
        convert::{creation_err, device_err, format_from_vk, present_mode_from_vk, vk_format, vk_present_mode},
        device::{VulkanDevice, VulkanTexture},
    },
    basic::error::GfxResult,
    resources::texture::TextureUsage,
    swapchain::surface::{SurfaceCapabilities, SwapChainConfig},
};

/// 创建 surface 所需的窗口句柄
///
/// 句柄必须在 surface 销毁之前保持有效。
#[derive(Debug, Clone, Copy)]
pub struct VulkanSurfaceSource {
    pub display: RawDisplayHandle,
    pub window: RawWindowHandle,
}

pub struct VulkanSurface {
    pub(crate) handle: vk::SurfaceKHR,
}

pub struct VulkanSwapChain {
    pub(crate) handle: vk::SwapchainKHR,
}

impl VulkanDevice {
    pub(crate) fn create_vk_surface(&self, source: &VulkanSurfaceSource) -> GfxResult<VulkanSurface> {
        let handle = unsafe {
            ash_window::create_surface(&self.entry, &self.instance, source.display, source.window, None)
        }
        .map_err(creation_err("surface"))?;
        log::info!("surface created");
        Ok(VulkanSurface { handle })
    }

    pub(crate) fn query_surface_capabilities(
        &self,
        surface: &VulkanSurface,
        present_family: u32,
    ) -> GfxResult<SurfaceCapabilities> {
        unsafe {
            let present_supported = self
                .surface_fn
                .get_physical_device_surface_support(self.pdevice, present_family, surface.handle)
                .map_err(device_err("query surface support"))?;
            let capabilities = self
                .surface_fn
                .get_physical_device_surface_capabilities(self.pdevice, surface.handle)
                .map_err(device_err("query surface capabilities"))?;
            let formats = self
                .surface_fn
                .get_physical_device_surface_formats(self.pdevice, surface.handle)
                .map_err(device_err("query surface formats"))?
                .iter()
                .filter(|format| format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
                .filter_map(|format| format_from_vk(format.format))
                .collect_vec();
            let present_modes = self
                .surface_fn
                .get_physical_device_surface_present_modes(self.pdevice, surface.handle)
                .map_err(device_err("query surface present modes"))?
                .into_iter()
                .filter_map(present_mode_from_vk)
                .collect_vec();

            Ok(SurfaceCapabilities {
                min_image_count: capabilities.min_image_count,
                max_image_count: capabilities.max_image_count,
                min_extent: (capabilities.min_image_extent.width, capabilities.min_image_extent.height),
                max_extent: (capabilities.max_image_extent.width, capabilities.max_image_extent.height),
                formats,
                present_modes,
                present_supported,
            })
        }
    }

    pub(crate) fn create_vk_swap_chain(
        &self,
        surface: &VulkanSurface,
        config: &SwapChainConfig,
    ) -> GfxResult<(VulkanSwapChain, Vec<VulkanTexture>)> {
        let capabilities = unsafe {
            self.surface_fn
                .get_physical_device_surface_capabilities(self.pdevice, surface.handle)
        }
        .map_err(device_err("query surface capabilities"))?;

        let format = vk_format(config.format);
        let extent = vk::Extent2D {
            width: config.width,
            height: config.height,
        };
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.handle)
            .min_image_count(config.image_count)
            .image_format(format)
            .image_color_space(vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(vk_present_mode(config.present_mode))
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .clipped(true);

        let handle =
            unsafe { self.swapchain_fn.create_swapchain(&create_info, None) }.map_err(creation_err("swap chain"))?;
        let images = match unsafe { self.swapchain_fn.get_swapchain_images(handle) } {
            Ok(images) => images,
            Err(err) => {
                unsafe { self.swapchain_fn.destroy_swapchain(handle, None) };
                return Err(creation_err("swap chain")(err));
            }
        };

        // 这里的 image 并非手动创建的，只需要创建 view
        let mut textures: Vec<VulkanTexture> = Vec::with_capacity(images.len());
        for image in images {
            let view = match self.create_image_view(
                image,
                vk::ImageViewType::TYPE_2D,
                format,
                vk::ImageAspectFlags::COLOR,
                1,
            ) {
                Ok(view) => view,
                Err(err) => {
                    unsafe {
                        for texture in textures.drain(..) {
                            self.device.destroy_image_view(texture.view, None);
                        }
                        self.swapchain_fn.destroy_swapchain(handle, None);
                    }
                    return Err(err);
                }
            };
            textures.push(VulkanTexture {
                image,
                view,
                allocation: None,
                extent: vk::Extent3D {
                    width: config.width,
                    height: config.height,
                    depth: 1,
                },
                aspect: vk::ImageAspectFlags::COLOR,
                usage: TextureUsage::ColorAttachment,
                mip_levels: 1,
            });
        }

        log::info!(
            "swap chain created: {}x{} {:?} {:?}, {} images",
            config.width,
            config.height,
            config.format,
            config.present_mode,
            textures.len()
        );
        Ok((VulkanSwapChain { handle }, textures))
    }
}
