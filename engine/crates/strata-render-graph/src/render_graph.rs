use indexmap::{IndexMap, map::Entry};
use strata_gfx::{CommandListHandle, GfxBackend, GfxContext};

use crate::{error::RenderGraphError, graph, pass::RenderGraphPass};

/// pass 按名字注册，编译后得到执行顺序
///
/// 任何修改（添加 pass、重名覆盖）都会让图回到未编译状态，`execute` 之前需要重新 `compile`。
pub struct RenderGraph<B: GfxBackend> {
    passes: IndexMap<String, RenderGraphPass<B>>,
    /// 编译后的执行顺序，pass 的注册下标
    order: Vec<usize>,
    compiled: bool,
    extent: (u32, u32),
}

impl<B: GfxBackend> Default for RenderGraph<B> {
    fn default() -> Self {
        Self {
            passes: IndexMap::new(),
            order: Vec::new(),
            compiled: false,
            extent: (0, 0),
        }
    }
}

// 创建与编译
impl<B: GfxBackend> RenderGraph<B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一个空 pass
    ///
    /// 同名 pass 已经存在时，新 pass 替换旧 pass，但保留旧 pass 的注册位置。
    pub fn add_pass(&mut self, name: impl Into<String>) -> &mut RenderGraphPass<B> {
        self.compiled = false;
        let name = name.into();
        match self.passes.entry(name.clone()) {
            Entry::Occupied(mut entry) => {
                log::warn!("render graph pass \"{name}\" registered twice, replacing the earlier one");
                entry.insert(RenderGraphPass::new(name));
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(RenderGraphPass::new(name)),
        }
    }

    /// 拓扑排序，然后按执行顺序调用每个 pass 的 build 回调
    ///
    /// 出现环时返回 [`RenderGraphError::Cycle`]，图保持未编译状态，不会调用任何 build 回调。
    pub fn compile(&mut self, width: u32, height: u32) -> Result<(), RenderGraphError> {
        self.compiled = false;
        self.order.clear();

        let (reads, writes): (Vec<_>, Vec<_>) = self
            .passes
            .values()
            .map(|pass| (pass.reads().to_vec(), pass.writes().to_vec()))
            .unzip();
        let order = graph::analyze(&reads, &writes).topological_sort().map_err(|remaining| {
            let passes = remaining
                .into_iter()
                .filter_map(|index| self.passes.get_index(index).map(|(name, _)| name.clone()))
                .collect::<Vec<_>>();
            log::error!("render graph has a cycle between {passes:?}");
            RenderGraphError::Cycle { passes }
        })?;

        for &index in &order {
            if let Some((_, pass)) = self.passes.get_index_mut(index) {
                pass.build(width, height);
            }
        }
        log::info!("render graph compiled for {width}x{height}: {} pass(es)", order.len());
        self.order = order;
        self.extent = (width, height);
        self.compiled = true;
        Ok(())
    }

    /// 目标尺寸变化，重新编译
    #[inline]
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), RenderGraphError> {
        self.compile(width, height)
    }

    /// 按编译后的顺序把 `cmd` 交给每个 pass 录制，遇到第一个错误即停止
    pub fn execute(&mut self, ctx: &mut GfxContext<B>, cmd: CommandListHandle) -> Result<(), RenderGraphError> {
        if !self.compiled {
            return Err(RenderGraphError::NotCompiled);
        }
        for &index in &self.order {
            if let Some((name, pass)) = self.passes.get_index_mut(index) {
                log::debug!("executing render graph pass \"{name}\"");
                pass.execute(ctx, cmd)?;
            }
        }
        Ok(())
    }
}

// getters
impl<B: GfxBackend> RenderGraph<B> {
    #[inline]
    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    #[inline]
    pub fn extent(&self) -> (u32, u32) {
        self.extent
    }

    #[inline]
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    #[inline]
    pub fn pass(&self, name: &str) -> Option<&RenderGraphPass<B>> {
        self.passes.get(name)
    }

    /// 编译后的 pass 名字，未编译时为空
    pub fn execution_order(&self) -> Vec<&str> {
        self.order
            .iter()
            .filter_map(|index| self.passes.get_index(*index).map(|(name, _)| name.as_str()))
            .collect()
    }
}
