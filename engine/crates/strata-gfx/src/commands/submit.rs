use crate::resources::handles::{CommandListHandle, FenceHandle, SemaphoreHandle};

/// 一次提交
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitInfo {
    pub command_list: CommandListHandle,
    /// 提交在 GPU 上开始前需要等待的 semaphore，会被这次提交消费
    pub wait_semaphore: Option<SemaphoreHandle>,
}

impl SubmitInfo {
    #[inline]
    pub fn new(command_list: CommandListHandle) -> Self {
        Self {
            command_list,
            wait_semaphore: None,
        }
    }

    #[inline]
    pub fn wait(mut self, semaphore: SemaphoreHandle) -> Self {
        self.wait_semaphore = Some(semaphore);
        self
    }
}

/// 提交产生的同步对象
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubmitSignals {
    pub fence: Option<FenceHandle>,
    pub semaphore: Option<SemaphoreHandle>,
}
