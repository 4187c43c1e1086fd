#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SamplerAddressMode {
    #[default]
    Repeat,
    Clamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SamplerFilter {
    #[default]
    Linear,
    Nearest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SamplerInfo {
    pub address_mode: SamplerAddressMode,
    pub filter: SamplerFilter,
}

pub struct GfxSampler<N> {
    pub(crate) info: SamplerInfo,
    pub(crate) native: N,
}

impl<N> GfxSampler<N> {
    #[inline]
    pub fn info(&self) -> &SamplerInfo {
        &self.info
    }

    #[inline]
    pub fn native(&self) -> &N {
        &self.native
    }
}
