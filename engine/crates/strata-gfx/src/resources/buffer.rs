/// buffer 的用途，决定了它可以绑定到哪里
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferType {
    Vertex,
    Index,
    Uniform,
    Storage,
    /// CPU 写入，作为 copy 的源
    Upload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferInfo {
    pub ty: BufferType,
    /// 字节数
    pub size: u64,
}

impl BufferInfo {
    #[inline]
    pub fn new(ty: BufferType, size: u64) -> Self {
        Self { ty, size }
    }
}

/// device 表中的 buffer 表项
pub struct GfxBuffer<N> {
    pub(crate) info: BufferInfo,
    pub(crate) mapped: bool,
    pub(crate) native: N,
}

// getters
impl<N> GfxBuffer<N> {
    #[inline]
    pub fn info(&self) -> &BufferInfo {
        &self.info
    }

    #[inline]
    pub fn ty(&self) -> BufferType {
        self.info.ty
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.info.size
    }

    #[inline]
    pub fn is_mapped(&self) -> bool {
        self.mapped
    }

    #[inline]
    pub fn native(&self) -> &N {
        &self.native
    }
}
