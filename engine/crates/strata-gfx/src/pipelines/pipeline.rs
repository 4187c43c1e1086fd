use crate::{
    basic::{flags::ShaderStages, format::Format},
    descriptors::{descriptor_set::DescriptorSetInfo, layout_cache::DescriptorSetLayoutId},
};

/// push constant 块，偏移从 0 开始
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConstantBlock {
    pub size: u32,
    pub stages: ShaderStages,
}

/// 顶点属性，按声明顺序紧密排列在 binding 0 中
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexAttribute {
    pub name: String,
    pub format: Format,
}

impl VertexAttribute {
    pub fn new(name: impl Into<String>, format: Format) -> Self {
        Self {
            name: name.into(),
            format,
        }
    }
}

/// 顶点属性在 binding 0 中的字节偏移，以及整个顶点的 stride
pub fn vertex_layout(attributes: &[VertexAttribute]) -> (Vec<u32>, u32) {
    let mut offsets = Vec::with_capacity(attributes.len());
    let mut stride = 0;
    for attribute in attributes {
        offsets.push(stride);
        stride += attribute.format.bytes_per_texel();
    }
    (offsets, stride)
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ComputePipelineInfo {
    /// SPIR-V 字节码，入口为 `main`
    pub shader_code: Vec<u8>,
    pub descriptor_sets: Vec<DescriptorSetInfo>,
    pub constant_block: Option<PipelineConstantBlock>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphicsPipelineInfo {
    pub vertex_code: Vec<u8>,
    pub fragment_code: Vec<u8>,
    pub vertex_attributes: Vec<VertexAttribute>,
    pub descriptor_sets: Vec<DescriptorSetInfo>,
    pub constant_block: Option<PipelineConstantBlock>,
    pub color_formats: Vec<Format>,
    pub depth_format: Option<Format>,
    pub depth_test: bool,
}

impl Default for GraphicsPipelineInfo {
    fn default() -> Self {
        Self {
            vertex_code: Vec::new(),
            fragment_code: Vec::new(),
            vertex_attributes: Vec::new(),
            descriptor_sets: Vec::new(),
            constant_block: None,
            color_formats: vec![Format::Bgra8Srgb],
            depth_format: None,
            depth_test: false,
        }
    }
}

/// pipeline 的种类，graphics 额外携带顶点与 attachment 信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineKind {
    Compute,
    Graphics {
        vertex_attributes: Vec<VertexAttribute>,
        color_formats: Vec<Format>,
        depth_format: Option<Format>,
        depth_test: bool,
    },
}

impl PipelineKind {
    #[inline]
    pub fn is_compute(&self) -> bool {
        matches!(self, PipelineKind::Compute)
    }

    #[inline]
    pub fn is_graphics(&self) -> bool {
        matches!(self, PipelineKind::Graphics { .. })
    }
}

/// 交给 backend 构建 native pipeline 的全部信息
pub enum PipelineSource<'a> {
    Compute(&'a ComputePipelineInfo),
    Graphics(&'a GraphicsPipelineInfo),
}

impl PipelineSource<'_> {
    pub fn constant_block(&self) -> Option<PipelineConstantBlock> {
        match self {
            PipelineSource::Compute(info) => info.constant_block,
            PipelineSource::Graphics(info) => info.constant_block,
        }
    }

    pub fn descriptor_sets(&self) -> &[DescriptorSetInfo] {
        match self {
            PipelineSource::Compute(info) => &info.descriptor_sets,
            PipelineSource::Graphics(info) => &info.descriptor_sets,
        }
    }
}

/// device 表中的 pipeline 表项
pub struct GfxPipeline<N> {
    pub(crate) kind: PipelineKind,
    pub(crate) set_layouts: Vec<DescriptorSetLayoutId>,
    pub(crate) constant_block: Option<PipelineConstantBlock>,
    pub(crate) native: N,
}

// getters
impl<N> GfxPipeline<N> {
    #[inline]
    pub fn kind(&self) -> &PipelineKind {
        &self.kind
    }

    /// 第 i 个 descriptor set 的 layout
    #[inline]
    pub fn set_layouts(&self) -> &[DescriptorSetLayoutId] {
        &self.set_layouts
    }

    #[inline]
    pub fn constant_block(&self) -> Option<PipelineConstantBlock> {
        self.constant_block
    }

    #[inline]
    pub fn native(&self) -> &N {
        &self.native
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_are_packed_in_declaration_order() {
        let attributes = [
            VertexAttribute::new("position", Format::Rgb32),
            VertexAttribute::new("uv", Format::Rg32),
            VertexAttribute::new("color", Format::Rgba8),
        ];
        let (offsets, stride) = vertex_layout(&attributes);
        assert_eq!(offsets, vec![0, 12, 20]);
        assert_eq!(stride, 24);
    }
}
