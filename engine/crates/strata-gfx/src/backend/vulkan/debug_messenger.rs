use std::ffi::{CStr, c_void};

use ash::vk;

use crate::basic::error::{ErrorSink, GfxResult};

use super::convert::creation_err;

/// validation layer 的消息出口
///
/// warning 和 error 写日志，error 额外转发给 context 的错误回调。
pub struct VulkanDebugMsger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl VulkanDebugMsger {
    /// `user_data` 必须指向一个 [`ErrorSink`]，并且比 messenger 活得更久
    pub fn new(entry: &ash::Entry, instance: &ash::Instance, user_data: *mut c_void) -> GfxResult<Self> {
        let loader = ash::ext::debug_utils::Instance::new(entry, instance);
        let create_info = Self::debug_utils_messenger_ci(user_data);
        let messenger = unsafe { loader.create_debug_utils_messenger(&create_info, None) }
            .map_err(creation_err("debug messenger"))?;

        Ok(Self { loader, messenger })
    }

    pub fn destroy(self) {
        log::info!("destroying debug messenger");
        unsafe {
            self.loader.destroy_debug_utils_messenger(self.messenger, None);
        }
    }

    /// 用于创建 debug messenger 的结构体
    pub fn debug_utils_messenger_ci(user_data: *mut c_void) -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
        vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(vk_debug_callback))
            .user_data(user_data)
    }
}

/// validation layer 的消息是 json，其中 MainMessage 字段带有换行，需要单独输出
fn format_message(msg: &str) -> String {
    let mut json_value = serde_json::from_str::<serde_json::Value>(msg);
    let Some(obj) = json_value.as_mut().ok().and_then(|v| v.as_object_mut()) else {
        return msg.to_string();
    };
    let main_msg = obj.remove("MainMessage");
    let main_msg = main_msg.as_ref().and_then(|v| v.as_str()).unwrap_or_default();
    let rest = serde_json::to_string_pretty(obj).unwrap_or_else(|_| msg.to_string());
    format!("{rest}\n{main_msg}")
}

/// debug messenger 的回调函数
/// # Safety
/// `user_data` 为空或者指向一个存活的 [`ErrorSink`]
unsafe extern "system" fn vk_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    user_data: *mut c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }
    let callback_data = unsafe { *p_callback_data };
    let msg = if callback_data.p_message.is_null() {
        std::borrow::Cow::from("")
    } else {
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };

    let format_msg = format!("[{:?}]\n{}\n", message_type, format_message(msg.as_ref()));

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("{}", format_msg);
            if !user_data.is_null() {
                let sink = unsafe { &*(user_data as *const ErrorSink) };
                sink.forward(msg.as_ref());
            }
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::warn!("{}", format_msg),
        _ => log::info!("{}", format_msg),
    };

    // 只有 layer developer 才需要返回 True
    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_message_is_split_out() {
        let formatted = format_message(r#"{"MessageID": 7, "MainMessage": "line one\nline two"}"#);
        assert!(formatted.ends_with("line one\nline two"));
        assert!(formatted.contains("\"MessageID\": 7"));
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(format_message("not json"), "not json");
    }
}
