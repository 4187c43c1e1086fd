use crate::{
    basic::error::{GfxError, GfxResult},
    resources::handles::{PipelineHandle, TextureHandle},
};

/// command list 的录制状态
///
/// `Initial → Recording → Recorded`，`begin` 也可以从 Recorded 重新开始，`reset` 回到 Initial。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandListState {
    #[default]
    Initial,
    Recording,
    Recorded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    U16,
    U32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scissor {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// dynamic rendering 的参数
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPassInfo {
    pub color_attachments: Vec<TextureHandle>,
    pub depth_attachment: Option<TextureHandle>,
    pub clear_color: [f32; 4],
}

impl Default for RenderPassInfo {
    fn default() -> Self {
        Self {
            color_attachments: Vec::new(),
            depth_attachment: None,
            clear_color: [1.0; 4],
        }
    }
}

/// 交给 backend 的 render pass，handle 已经解析为 native texture
pub struct NativeRenderPass<'a, T> {
    pub color_attachments: Vec<&'a T>,
    pub depth_attachment: Option<&'a T>,
    pub clear_color: [f32; 4],
    pub extent: (u32, u32),
}

/// device 表中的 command list 表项
pub struct GfxCommandList<N> {
    pub(crate) queue_index: usize,
    pub(crate) state: CommandListState,
    pub(crate) bound_pipeline: Option<PipelineHandle>,
    pub(crate) in_render_pass: bool,
    /// 最近一次提交的 serial，0 表示从未提交
    pub(crate) last_submission: u64,
    pub(crate) native: N,
}

impl<N> GfxCommandList<N> {
    pub(crate) fn new(queue_index: usize, native: N) -> Self {
        Self {
            queue_index,
            state: CommandListState::Initial,
            bound_pipeline: None,
            in_render_pass: false,
            last_submission: 0,
            native,
        }
    }
}

// getters
impl<N> GfxCommandList<N> {
    #[inline]
    pub fn state(&self) -> CommandListState {
        self.state
    }

    #[inline]
    pub fn queue_index(&self) -> usize {
        self.queue_index
    }

    #[inline]
    pub fn bound_pipeline(&self) -> Option<PipelineHandle> {
        self.bound_pipeline
    }

    #[inline]
    pub fn in_render_pass(&self) -> bool {
        self.in_render_pass
    }

    #[inline]
    pub fn native(&self) -> &N {
        &self.native
    }
}

// 状态机
impl<N> GfxCommandList<N> {
    pub(crate) fn check_begin(&self) -> GfxResult<()> {
        match self.state {
            CommandListState::Initial | CommandListState::Recorded => Ok(()),
            CommandListState::Recording => Err(GfxError::protocol("begin: command list is already recording")),
        }
    }

    pub(crate) fn check_end(&self) -> GfxResult<()> {
        if self.state != CommandListState::Recording {
            return Err(GfxError::protocol(format!("end: command list is {:?}, not recording", self.state)));
        }
        if self.in_render_pass {
            return Err(GfxError::protocol("end: render pass still open"));
        }
        Ok(())
    }

    /// 所有录制操作的前置条件
    pub(crate) fn check_recording(&self, op: &str) -> GfxResult<()> {
        if self.state != CommandListState::Recording {
            return Err(GfxError::protocol(format!("{op}: command list is {:?}, not recording", self.state)));
        }
        Ok(())
    }

    pub(crate) fn require_pipeline(&self, op: &str) -> GfxResult<PipelineHandle> {
        self.bound_pipeline.ok_or_else(|| GfxError::protocol(format!("{op}: no pipeline bound")))
    }

    pub(crate) fn on_begin(&mut self) {
        self.state = CommandListState::Recording;
        self.bound_pipeline = None;
        self.in_render_pass = false;
    }

    pub(crate) fn on_end(&mut self) {
        self.state = CommandListState::Recorded;
    }

    pub(crate) fn on_reset(&mut self) {
        self.state = CommandListState::Initial;
        self.bound_pipeline = None;
        self.in_render_pass = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_transitions() {
        let mut cmd = GfxCommandList::new(0, ());
        assert!(cmd.check_end().is_err());
        assert!(cmd.check_recording("dispatch").is_err());

        cmd.check_begin().unwrap();
        cmd.on_begin();
        assert!(cmd.check_begin().is_err());
        cmd.check_recording("dispatch").unwrap();

        cmd.check_end().unwrap();
        cmd.on_end();
        assert_eq!(cmd.state(), CommandListState::Recorded);
        assert!(cmd.check_end().is_err());

        // Recorded 可以直接重新 begin
        cmd.check_begin().unwrap();
        cmd.on_begin();
        cmd.on_reset();
        assert_eq!(cmd.state(), CommandListState::Initial);
    }

    #[test]
    fn open_render_pass_blocks_end() {
        let mut cmd = GfxCommandList::new(0, ());
        cmd.on_begin();
        cmd.in_render_pass = true;
        assert!(matches!(cmd.check_end(), Err(GfxError::ProtocolViolation(_))));
        cmd.on_reset();
        assert!(!cmd.in_render_pass());
    }
}
