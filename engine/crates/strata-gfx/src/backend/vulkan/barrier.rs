use ash::vk;

use crate::resources::texture::{TextureState, TextureUsage};

/// texture 状态在 barrier 中对应的 stage、access 和 layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateMask {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
    pub layout: vk::ImageLayout,
}

/// 每个状态都必须有对应的映射，新增状态时这里会编译失败
pub fn state_mask(state: TextureState, usage: TextureUsage) -> StateMask {
    match state {
        TextureState::Undefined => StateMask {
            stage: vk::PipelineStageFlags2::TOP_OF_PIPE,
            access: vk::AccessFlags2::NONE,
            layout: vk::ImageLayout::UNDEFINED,
        },
        TextureState::UploadDestination => StateMask {
            stage: vk::PipelineStageFlags2::COPY,
            access: vk::AccessFlags2::TRANSFER_WRITE,
            layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        },
        TextureState::ShaderRead => StateMask {
            stage: vk::PipelineStageFlags2::FRAGMENT_SHADER | vk::PipelineStageFlags2::COMPUTE_SHADER,
            access: vk::AccessFlags2::SHADER_READ,
            layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        },
        TextureState::RenderTarget => match usage {
            TextureUsage::DepthStencilAttachment => StateMask {
                stage: vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
                access: vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
                layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            },
            TextureUsage::Sampled | TextureUsage::ColorAttachment => StateMask {
                stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                access: vk::AccessFlags2::COLOR_ATTACHMENT_READ | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            },
        },
        TextureState::Present => StateMask {
            stage: vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
            access: vk::AccessFlags2::NONE,
            layout: vk::ImageLayout::PRESENT_SRC_KHR,
        },
    }
}

/// 单个 image、全部 mip 的 layout 转换
pub fn image_barrier(
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    mip_levels: u32,
    src: StateMask,
    dst: StateMask,
) -> vk::ImageMemoryBarrier2<'static> {
    vk::ImageMemoryBarrier2::default()
        .src_stage_mask(src.stage)
        .src_access_mask(src.access)
        .dst_stage_mask(dst.stage)
        .dst_access_mask(dst.access)
        .old_layout(src.layout)
        .new_layout(dst.layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: mip_levels.max(1),
            base_array_layer: 0,
            layer_count: 1,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_target_layout_follows_usage() {
        let color = state_mask(TextureState::RenderTarget, TextureUsage::ColorAttachment);
        let depth = state_mask(TextureState::RenderTarget, TextureUsage::DepthStencilAttachment);
        assert_eq!(color.layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(depth.layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
    }

    #[test]
    fn undefined_discards_contents() {
        let mask = state_mask(TextureState::Undefined, TextureUsage::Sampled);
        assert_eq!(mask.layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(mask.access, vk::AccessFlags2::NONE);
    }
}
