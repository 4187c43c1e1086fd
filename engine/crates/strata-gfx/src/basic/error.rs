use std::sync::{Arc, Mutex};

use crate::resources::handles::HandleKind;

/// GFX 层所有可恢复错误的集合
///
/// 表格缺项（例如 texture state 到 native barrier 参数的映射）不在这里：
/// 那些映射都是穷尽的 `match`，缺项直接编译失败。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GfxError {
    /// handle 已经被销毁、从未存在，或者属于另一个 device
    #[error("invalid {kind} handle")]
    InvalidHandle { kind: HandleKind },

    /// 调用顺序或者状态不对，例如在 Initial 状态下 end 一个 command list
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// native 对象创建失败、显存分配失败、descriptor pool 耗尽
    #[error("failed to create {what}: {reason}")]
    CreationFailed { what: &'static str, reason: String },

    /// 找不到合适的 adapter、surface 没有可用格式、loader 加载失败
    #[error("initialization failed: {0}")]
    Initialization(String),

    /// 驱动在提交、等待或者呈现时返回的错误，例如 device lost
    #[error("device error: {0}")]
    Device(String),
}

pub type GfxResult<T> = Result<T, GfxError>;

impl GfxError {
    #[inline]
    pub fn invalid(kind: HandleKind) -> Self {
        Self::InvalidHandle { kind }
    }

    #[inline]
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }

    #[inline]
    pub fn creation(what: &'static str, reason: impl ToString) -> Self {
        Self::CreationFailed {
            what,
            reason: reason.to_string(),
        }
    }
}

/// 用户注册的错误回调
pub type ErrorCallback = Box<dyn FnMut(&str) + Send>;

/// 错误的汇聚点
///
/// context 上的每个失败操作，以及 Vulkan debug messenger 转发来的诊断信息，都会经过这里。
/// 可以 clone，clone 之间共享同一个回调。
#[derive(Clone, Default)]
pub struct ErrorSink {
    callback: Arc<Mutex<Option<ErrorCallback>>>,
}

impl ErrorSink {
    pub fn set_callback(&self, callback: Option<ErrorCallback>) {
        match self.callback.lock() {
            Ok(mut guard) => *guard = callback,
            Err(poisoned) => *poisoned.into_inner() = callback,
        }
    }

    /// 记录一个 API 错误：写日志，然后交给用户回调
    pub fn report(&self, err: &GfxError) {
        log::error!("{err}");
        self.forward(&err.to_string());
    }

    /// 只转发给用户回调，不写日志（调用方已经按自己的等级写过了）
    pub fn forward(&self, msg: &str) {
        let mut guard = match self.callback.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(callback) = guard.as_mut() {
            callback(msg);
        }
    }
}

impl std::fmt::Debug for ErrorSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorSink").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_reaches_callback() {
        let sink = ErrorSink::default();
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let seen_cb = seen.clone();
        sink.set_callback(Some(Box::new(move |msg| seen_cb.lock().unwrap().push(msg.to_string()))));

        sink.report(&GfxError::invalid(HandleKind::Buffer));
        sink.forward("native message");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], "invalid buffer handle");
        assert_eq!(seen[1], "native message");
    }

    #[test]
    fn report_without_callback_is_fine() {
        ErrorSink::default().report(&GfxError::protocol("nothing listens"));
    }
}
