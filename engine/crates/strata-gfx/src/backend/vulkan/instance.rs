use std::{
    collections::HashSet,
    ffi::{CStr, CString, c_char, c_void},
};

use ash::vk;
use itertools::Itertools;

use crate::{
    backend::vulkan::debug_messenger::VulkanDebugMsger,
    basic::error::{GfxError, GfxResult},
    foundation::info::AppInfo,
};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

pub struct VulkanInstance {
    pub(crate) entry: ash::Entry,
    /// 仅仅是函数指针以及一个裸的 handle，可以随意 clone，生命周期由 backend 手动控制
    pub(crate) ash_instance: ash::Instance,
    pub(crate) validation: bool,
}

// 创建与销毁
impl VulkanInstance {
    /// 设置所需的 layers 和 extensions，创建 vk instance
    ///
    /// `debug_user_data` 会交给创建 instance 期间使用的 debug messenger。
    pub fn new(app_info: &AppInfo, debug_user_data: *mut c_void) -> GfxResult<Self> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|err| GfxError::Initialization(format!("failed to load vulkan loader: {err}")))?;

        let app_name = CString::new(app_info.app_name.as_str())
            .map_err(|_| GfxError::Initialization("app name contains a nul byte".to_string()))?;
        let vk_app_info = vk::ApplicationInfo::default()
            .api_version(vk::API_VERSION_1_3) // 版本过低时，有些函数无法正确加载
            .application_name(app_name.as_c_str())
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"strata")
            .engine_version(vk::make_api_version(0, 1, 0, 0));

        let validation = app_info.enable_validation && Self::layer_supported(&entry, VALIDATION_LAYER)?;
        if app_info.enable_validation && !validation {
            log::warn!("validation layer requested but not installed, continuing without it");
        }

        let enabled_extensions = Self::get_extensions(&entry, app_info, validation)?;
        let enabled_extensions_str = enabled_extensions
            .iter()
            .map(|ext| format!("\n\t{:?}", unsafe { CStr::from_ptr(*ext) }))
            .join("");
        log::info!("instance extensions: {}", enabled_extensions_str);

        let enabled_layers = if validation { vec![VALIDATION_LAYER.as_ptr()] } else { Vec::new() };

        let mut instance_ci = vk::InstanceCreateInfo::default()
            .application_info(&vk_app_info)
            .enabled_extension_names(&enabled_extensions)
            .enabled_layer_names(&enabled_layers);

        // instance 创建和销毁期间的消息也需要 debug messenger
        let mut debug_utils_messenger_ci = VulkanDebugMsger::debug_utils_messenger_ci(debug_user_data);
        if validation {
            instance_ci = instance_ci.push_next(&mut debug_utils_messenger_ci);
        }

        let ash_instance = unsafe { entry.create_instance(&instance_ci, None) }
            .map_err(|err| GfxError::Initialization(format!("failed to create vk instance: {err}")))?;

        Ok(Self {
            entry,
            ash_instance,
            validation,
        })
    }

    pub fn destroy(self) {
        log::info!("destroying vk instance");
        unsafe {
            self.ash_instance.destroy_instance(None);
        }
    }
}

// getters
impl VulkanInstance {
    #[inline]
    pub fn ash_instance(&self) -> &ash::Instance {
        &self.ash_instance
    }

    #[inline]
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    #[inline]
    pub fn validation_enabled(&self) -> bool {
        self.validation
    }
}

// 构造过程
impl VulkanInstance {
    fn layer_supported(entry: &ash::Entry, layer: &CStr) -> GfxResult<bool> {
        let all_layer_props = unsafe { entry.enumerate_instance_layer_properties() }
            .map_err(|err| GfxError::Initialization(format!("failed to enumerate instance layers: {err}")))?;
        Ok(all_layer_props
            .iter()
            .any(|props| props.layer_name_as_c_str().is_ok_and(|name| name == layer)))
    }

    /// instance 所需的，且受支持的 extension
    fn get_extensions(entry: &ash::Entry, app_info: &AppInfo, validation: bool) -> GfxResult<Vec<*const c_char>> {
        let all_ext_props = unsafe { entry.enumerate_instance_extension_properties(None) }
            .map_err(|err| GfxError::Initialization(format!("failed to enumerate instance extensions: {err}")))?;
        let supported = |ext: &CStr| {
            all_ext_props
                .iter()
                .any(|props| props.extension_name_as_c_str().is_ok_and(|name| name == ext))
        };

        let mut required: Vec<&'static CStr> = Vec::new();
        if let Some(display) = app_info.display {
            let window_exts = ash_window::enumerate_required_extensions(display)
                .map_err(|err| GfxError::Initialization(format!("unsupported display: {err}")))?;
            required.extend(window_exts.iter().map(|ext| unsafe { CStr::from_ptr(*ext) }));
        }

        let mut enabled: HashSet<&'static CStr> = HashSet::new();
        for ext in required {
            if !supported(ext) {
                return Err(GfxError::Initialization(format!("required instance extension {ext:?} is missing")));
            }
            enabled.insert(ext);
        }

        // 提供 debug messenger，validation layer 自身也会实现这个 extension
        if validation {
            enabled.insert(vk::EXT_DEBUG_UTILS_NAME);
        }

        Ok(enabled.iter().map(|ext| ext.as_ptr()).collect_vec())
    }
}
