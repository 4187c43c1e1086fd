use crate::{
    basic::flags::ShaderStages,
    descriptors::layout_cache::DescriptorSetLayoutId,
    resources::handles::{BufferHandle, SamplerHandle, TextureHandle},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    StorageBuffer,
    UniformBuffer,
    /// 纹理和采样器组合在一个 binding 中
    Texture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBindingInfo {
    pub ty: DescriptorType,
    pub count: u32,
    pub stages: ShaderStages,
}

impl DescriptorBindingInfo {
    #[inline]
    pub fn new(ty: DescriptorType, stages: ShaderStages) -> Self {
        Self { ty, count: 1, stages }
    }
}

/// 一个 descriptor set 的布局：binding i 即数组下标 i
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DescriptorSetInfo {
    pub bindings: Vec<DescriptorBindingInfo>,
}

impl DescriptorSetInfo {
    pub fn new(bindings: impl IntoIterator<Item = DescriptorBindingInfo>) -> Self {
        Self {
            bindings: bindings.into_iter().collect(),
        }
    }
}

/// 已经写入 descriptor set 某个 slot 的资源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorWrite {
    Buffer(BufferHandle),
    Texture { texture: TextureHandle, sampler: SamplerHandle },
}

/// device 表中的 descriptor set 表项
pub struct GfxDescriptorSet<N> {
    pub(crate) layout: DescriptorSetLayoutId,
    pub(crate) bindings: Vec<DescriptorBindingInfo>,
    pub(crate) slots: Vec<Option<DescriptorWrite>>,
    pub(crate) native: N,
}

// getters
impl<N> GfxDescriptorSet<N> {
    #[inline]
    pub fn layout(&self) -> DescriptorSetLayoutId {
        self.layout
    }

    #[inline]
    pub fn bindings(&self) -> &[DescriptorBindingInfo] {
        &self.bindings
    }

    /// slot 当前写入的资源，没有写过则为 None
    #[inline]
    pub fn slot(&self, slot: u32) -> Option<DescriptorWrite> {
        self.slots.get(slot as usize).copied().flatten()
    }

    #[inline]
    pub fn native(&self) -> &N {
        &self.native
    }
}
