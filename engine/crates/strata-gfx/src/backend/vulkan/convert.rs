//! 前端类型到 Vulkan 类型的映射，全部是穷尽的 `match`

use std::io::Cursor;

use ash::vk;

use crate::{
    basic::{
        error::{GfxError, GfxResult},
        flags::{AdapterKind, QueueFlags, ShaderStages},
        format::Format,
    },
    commands::command_list::IndexType,
    descriptors::descriptor_set::DescriptorType,
    resources::{
        buffer::BufferType,
        sampler::{SamplerAddressMode, SamplerFilter},
        texture::{TextureDimension, TextureUsage},
    },
    swapchain::surface::PresentMode,
};

pub fn vk_format(format: Format) -> vk::Format {
    match format {
        Format::Undefined => vk::Format::UNDEFINED,
        Format::Rg8 => vk::Format::R8G8_UNORM,
        Format::Rg32 => vk::Format::R32G32_SFLOAT,
        Format::Rgb8 => vk::Format::R8G8B8_UNORM,
        Format::Rgb32 => vk::Format::R32G32B32_SFLOAT,
        Format::Rgba8 => vk::Format::R8G8B8A8_UNORM,
        Format::Rgba32 => vk::Format::R32G32B32A32_SFLOAT,
        Format::Depth16 => vk::Format::D16_UNORM,
        Format::Depth24Stencil8 => vk::Format::D24_UNORM_S8_UINT,
        Format::Depth32 => vk::Format::D32_SFLOAT,
        Format::Depth32Stencil8 => vk::Format::D32_SFLOAT_S8_UINT,
        Format::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
        Format::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
        Format::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
    }
}

/// surface 报告的格式中，只关心能表达的那几个
pub fn format_from_vk(format: vk::Format) -> Option<Format> {
    match format {
        vk::Format::B8G8R8A8_SRGB => Some(Format::Bgra8Srgb),
        vk::Format::R8G8B8A8_SRGB => Some(Format::Rgba8Srgb),
        vk::Format::B8G8R8A8_UNORM => Some(Format::Bgra8Unorm),
        vk::Format::R8G8B8A8_UNORM => Some(Format::Rgba8),
        _ => None,
    }
}

pub fn aspect_of(format: Format) -> vk::ImageAspectFlags {
    if format.has_stencil() {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else if format.is_depth() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

pub fn vk_buffer_usage(ty: BufferType) -> vk::BufferUsageFlags {
    match ty {
        BufferType::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
        BufferType::Index => vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
        BufferType::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
        BufferType::Storage => {
            vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::TRANSFER_SRC
                | vk::BufferUsageFlags::TRANSFER_DST
        }
        BufferType::Upload => vk::BufferUsageFlags::TRANSFER_SRC,
    }
}

pub fn vk_image_usage(usage: TextureUsage) -> vk::ImageUsageFlags {
    match usage {
        TextureUsage::Sampled => vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
        TextureUsage::ColorAttachment => {
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST
        }
        TextureUsage::DepthStencilAttachment => {
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED
        }
    }
}

pub fn vk_image_type(dimension: TextureDimension) -> (vk::ImageType, vk::ImageViewType) {
    match dimension {
        TextureDimension::D1 => (vk::ImageType::TYPE_1D, vk::ImageViewType::TYPE_1D),
        TextureDimension::D2 => (vk::ImageType::TYPE_2D, vk::ImageViewType::TYPE_2D),
        TextureDimension::D3 => (vk::ImageType::TYPE_3D, vk::ImageViewType::TYPE_3D),
    }
}

pub fn vk_descriptor_type(ty: DescriptorType) -> vk::DescriptorType {
    match ty {
        DescriptorType::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        DescriptorType::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorType::Texture => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    }
}

pub fn vk_shader_stages(stages: ShaderStages) -> vk::ShaderStageFlags {
    let mut flags = vk::ShaderStageFlags::empty();
    if stages.contains(ShaderStages::VERTEX) {
        flags |= vk::ShaderStageFlags::VERTEX;
    }
    if stages.contains(ShaderStages::FRAGMENT) {
        flags |= vk::ShaderStageFlags::FRAGMENT;
    }
    if stages.contains(ShaderStages::COMPUTE) {
        flags |= vk::ShaderStageFlags::COMPUTE;
    }
    flags
}

pub fn queue_flags_from_vk(flags: vk::QueueFlags) -> QueueFlags {
    let mut result = QueueFlags::empty();
    if flags.contains(vk::QueueFlags::GRAPHICS) {
        result |= QueueFlags::GRAPHICS;
    }
    if flags.contains(vk::QueueFlags::COMPUTE) {
        result |= QueueFlags::COMPUTE;
    }
    // graphics 和 compute queue 隐式支持 transfer
    if flags.intersects(vk::QueueFlags::TRANSFER | vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE) {
        result |= QueueFlags::TRANSFER;
    }
    result
}

pub fn adapter_kind_from_vk(ty: vk::PhysicalDeviceType) -> AdapterKind {
    match ty {
        vk::PhysicalDeviceType::DISCRETE_GPU => AdapterKind::Discrete,
        vk::PhysicalDeviceType::INTEGRATED_GPU => AdapterKind::Integrated,
        vk::PhysicalDeviceType::VIRTUAL_GPU => AdapterKind::Virtual,
        vk::PhysicalDeviceType::CPU => AdapterKind::Cpu,
        _ => AdapterKind::Other,
    }
}

pub fn vk_present_mode(mode: PresentMode) -> vk::PresentModeKHR {
    match mode {
        PresentMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
        PresentMode::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentMode::Fifo => vk::PresentModeKHR::FIFO,
        PresentMode::FifoRelaxed => vk::PresentModeKHR::FIFO_RELAXED,
    }
}

pub fn present_mode_from_vk(mode: vk::PresentModeKHR) -> Option<PresentMode> {
    match mode {
        vk::PresentModeKHR::IMMEDIATE => Some(PresentMode::Immediate),
        vk::PresentModeKHR::MAILBOX => Some(PresentMode::Mailbox),
        vk::PresentModeKHR::FIFO => Some(PresentMode::Fifo),
        vk::PresentModeKHR::FIFO_RELAXED => Some(PresentMode::FifoRelaxed),
        _ => None,
    }
}

pub fn vk_index_type(ty: IndexType) -> vk::IndexType {
    match ty {
        IndexType::U16 => vk::IndexType::UINT16,
        IndexType::U32 => vk::IndexType::UINT32,
    }
}

pub fn vk_filter(filter: SamplerFilter) -> (vk::Filter, vk::SamplerMipmapMode) {
    match filter {
        SamplerFilter::Linear => (vk::Filter::LINEAR, vk::SamplerMipmapMode::LINEAR),
        SamplerFilter::Nearest => (vk::Filter::NEAREST, vk::SamplerMipmapMode::NEAREST),
    }
}

pub fn vk_address_mode(mode: SamplerAddressMode) -> vk::SamplerAddressMode {
    match mode {
        SamplerAddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
        SamplerAddressMode::Clamp => vk::SamplerAddressMode::CLAMP_TO_EDGE,
    }
}

/// 把 `vk::Result` 包装成创建失败
pub fn creation_err(what: &'static str) -> impl FnOnce(vk::Result) -> GfxError {
    move |err| GfxError::creation(what, err)
}

/// 提交、等待、呈现时的驱动错误
pub fn device_err(op: &'static str) -> impl FnOnce(vk::Result) -> GfxError {
    move |err| GfxError::Device(format!("{op}: {err}"))
}

/// SPIR-V 字节码转换为 u32 words，长度必须是 4 的倍数且 magic number 正确
pub fn spirv_words(code: &[u8]) -> GfxResult<Vec<u32>> {
    ash::util::read_spv(&mut Cursor::new(code)).map_err(|err| GfxError::creation("shader module", err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presentable_formats_round_trip() {
        for format in [Format::Bgra8Srgb, Format::Rgba8Srgb, Format::Bgra8Unorm] {
            assert_eq!(format_from_vk(vk_format(format)), Some(format));
        }
        assert_eq!(format_from_vk(vk::Format::R16G16B16A16_SFLOAT), None);
    }

    #[test]
    fn depth_formats_get_depth_aspect() {
        assert_eq!(aspect_of(Format::Depth32), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            aspect_of(Format::Depth24Stencil8),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(aspect_of(Format::Rgba8), vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn compute_family_implies_transfer() {
        assert_eq!(queue_flags_from_vk(vk::QueueFlags::COMPUTE), QueueFlags::COMPUTE | QueueFlags::TRANSFER);
        assert_eq!(queue_flags_from_vk(vk::QueueFlags::SPARSE_BINDING), QueueFlags::empty());
    }

    #[test]
    fn malformed_spirv_is_a_creation_failure() {
        assert!(matches!(
            spirv_words(b"noop\0"),
            Err(GfxError::CreationFailed { what: "shader module", .. })
        ));

        let mut code = 0x0723_0203u32.to_le_bytes().to_vec();
        code.extend_from_slice(&1u32.to_le_bytes());
        assert_eq!(spirv_words(&code).unwrap(), vec![0x0723_0203, 1]);
    }
}
