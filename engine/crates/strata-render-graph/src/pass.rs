//! Pass 定义
//!
//! pass 声明它读写的 texture，并注册两个回调：
//! build 在拓扑变化（编译、resize）时调用一次，execute 每帧调用一次。

use strata_gfx::{CommandListHandle, GfxBackend, GfxContext, GfxResult, TextureHandle};

/// 参数为目标尺寸 `(width, height)`
pub type BuildCallback = Box<dyn FnMut(u32, u32)>;

/// 向共享的 command list 录制这个 pass 的命令
pub type ExecuteCallback<B> = Box<dyn FnMut(&mut GfxContext<B>, CommandListHandle) -> GfxResult<()>>;

pub struct RenderGraphPass<B: GfxBackend> {
    name: String,
    reads: Vec<TextureHandle>,
    writes: Vec<TextureHandle>,
    on_build: Option<BuildCallback>,
    on_execute: Option<ExecuteCallback<B>>,
}

// 创建与声明
impl<B: GfxBackend> RenderGraphPass<B> {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            reads: Vec::new(),
            writes: Vec::new(),
            on_build: None,
            on_execute: None,
        }
    }

    /// 声明读取，执行时排在所有写入这个 texture 的 pass 之后
    pub fn read(&mut self, texture: TextureHandle) -> &mut Self {
        if !self.reads.contains(&texture) {
            self.reads.push(texture);
        }
        self
    }

    pub fn write(&mut self, texture: TextureHandle) -> &mut Self {
        if !self.writes.contains(&texture) {
            self.writes.push(texture);
        }
        self
    }

    pub fn on_build(&mut self, callback: impl FnMut(u32, u32) + 'static) -> &mut Self {
        self.on_build = Some(Box::new(callback));
        self
    }

    /// pass 需要自己把不属于它的 attachment 转换到正确的状态
    pub fn on_execute(
        &mut self,
        callback: impl FnMut(&mut GfxContext<B>, CommandListHandle) -> GfxResult<()> + 'static,
    ) -> &mut Self {
        self.on_execute = Some(Box::new(callback));
        self
    }
}

// getters
impl<B: GfxBackend> RenderGraphPass<B> {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn reads(&self) -> &[TextureHandle] {
        &self.reads
    }

    #[inline]
    pub fn writes(&self) -> &[TextureHandle] {
        &self.writes
    }
}

// tools
impl<B: GfxBackend> RenderGraphPass<B> {
    pub(crate) fn build(&mut self, width: u32, height: u32) {
        if let Some(callback) = self.on_build.as_mut() {
            callback(width, height);
        }
    }

    pub(crate) fn execute(&mut self, ctx: &mut GfxContext<B>, cmd: CommandListHandle) -> GfxResult<()> {
        match self.on_execute.as_mut() {
            Some(callback) => callback(ctx, cmd),
            None => Ok(()),
        }
    }
}
