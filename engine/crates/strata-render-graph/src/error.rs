use strata_gfx::GfxError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderGraphError {
    /// 依赖关系成环，`passes` 是无法排序的 pass（按注册顺序）
    #[error("render graph has a dependency cycle between passes {passes:?}")]
    Cycle { passes: Vec<String> },

    #[error("render graph must be compiled before execution")]
    NotCompiled,

    /// pass 在录制时遇到的 GFX 错误
    #[error(transparent)]
    Gfx(#[from] GfxError),
}
