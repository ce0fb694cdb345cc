// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_void, CStr, CString};

use anyhow::{anyhow, Context, Result};
#[cfg(debug_assertions)]
use ash::ext::debug_utils as ext_debug;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use raw_window_handle::RawDisplayHandle;
use tracing::{debug, error, info, warn};

#[cfg(debug_assertions)]
type DebugState = vk::DebugUtilsMessengerEXT;
#[cfg(not(debug_assertions))]
type DebugState = ();

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RenderPath {
    Core13, // Vulkan 1.3 core dynamic rendering + sync2
    KhrExt, // Vulkan 1.2 + VK_KHR_dynamic_rendering + VK_KHR_synchronization2
}

/// Instance, device and the single graphics queue every other module borrows.
pub(crate) struct GpuContext {
    pub entry: Entry,
    pub instance: Instance,
    pub phys: vk::PhysicalDevice,
    pub device: ash::Device,
    pub queue: vk::Queue,
    pub queue_family: u32,
    pub path: RenderPath,
    pub device_name: String,
    /// Extension entry points, present only on the KHR path.
    khr: Option<KhrCommands>,
    debug: DebugState,
}

struct KhrCommands {
    rendering: ash::khr::dynamic_rendering::Device,
    sync2: ash::khr::synchronization2::Device,
}

#[cfg(debug_assertions)]
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("[vulkan] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("[vulkan] {msg}");
    } else {
        debug!("[vulkan] {msg}");
    }
    vk::FALSE
}

#[cfg(debug_assertions)]
unsafe fn create_debug_messenger(entry: &Entry, instance: &Instance) -> Result<DebugState> {
    let loader = ext_debug::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    loader
        .create_debug_utils_messenger(&ci, None)
        .context("create_debug_utils_messenger")
}

#[cfg(not(debug_assertions))]
unsafe fn create_debug_messenger(_entry: &Entry, _instance: &Instance) -> Result<DebugState> {
    Ok(())
}

#[cfg(debug_assertions)]
unsafe fn destroy_debug_messenger(entry: &Entry, instance: &Instance, dbg: DebugState) {
    let loader = ext_debug::Instance::new(entry, instance);
    loader.destroy_debug_utils_messenger(dbg, None);
}

#[cfg(not(debug_assertions))]
unsafe fn destroy_debug_messenger(_entry: &Entry, _instance: &Instance, _dbg: DebugState) {}

unsafe fn has_layer(entry: &Entry, name: &CStr) -> bool {
    entry
        .enumerate_instance_layer_properties()
        .unwrap_or_default()
        .iter()
        .any(|l| CStr::from_ptr(l.layer_name.as_ptr()) == name)
}

/// `display` is `None` for headless runs; no WSI extensions are enabled then.
unsafe fn create_instance(entry: &Entry, display: Option<RawDisplayHandle>) -> Result<Instance> {
    let app = CString::new("prism")?;
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app.as_ptr(),
        application_version: 0,
        p_engine_name: app.as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_3,
        ..Default::default()
    };

    let mut exts: Vec<*const i8> = match display {
        Some(dh) => ash_window::enumerate_required_extensions(dh)
            .context("enumerate_required_extensions")?
            .to_vec(),
        None => Vec::new(),
    };
    if cfg!(debug_assertions) {
        exts.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    let validation = CString::new("VK_LAYER_KHRONOS_validation")?;
    let layers: Vec<*const i8> = if cfg!(debug_assertions) && has_layer(entry, &validation) {
        vec![validation.as_ptr()]
    } else {
        if cfg!(debug_assertions) {
            warn!("validation layer not installed; running without it");
        }
        Vec::new()
    };

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: exts.len() as u32,
        pp_enabled_extension_names: exts.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };
    entry
        .create_instance(&create_info, None)
        .context("create_instance")
}

pub(crate) unsafe fn device_name(instance: &Instance, phys: vk::PhysicalDevice) -> String {
    let props = instance.get_physical_device_properties(phys);
    CStr::from_ptr(props.device_name.as_ptr())
        .to_string_lossy()
        .into_owned()
}

/// Discrete GPUs first, then integrated, then anything else.
fn device_rank(kind: vk::PhysicalDeviceType) -> u32 {
    match kind {
        vk::PhysicalDeviceType::DISCRETE_GPU => 0,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
        _ => 3,
    }
}

unsafe fn graphics_family(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    present: Option<(&surface::Instance, vk::SurfaceKHR)>,
) -> Option<u32> {
    let qprops = instance.get_physical_device_queue_family_properties(phys);
    qprops.iter().enumerate().find_map(|(i, q)| {
        let graphics = q.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let presents = match present {
            Some((surf_i, surface)) => surf_i
                .get_physical_device_surface_support(phys, i as u32, surface)
                .unwrap_or(false),
            None => true,
        };
        (graphics && presents).then_some(i as u32)
    })
}

/// Picks the device named `wanted` when given (an unknown name is an error),
/// otherwise the best ranked device with a usable graphics queue.
unsafe fn pick_device_and_queue(
    instance: &Instance,
    present: Option<(&surface::Instance, vk::SurfaceKHR)>,
    wanted: Option<&str>,
) -> Result<(vk::PhysicalDevice, u32)> {
    let mut candidates = Vec::new();
    for phys in instance.enumerate_physical_devices()? {
        let name = device_name(instance, phys);
        let kind = instance.get_physical_device_properties(phys).device_type;
        info!("physical device: {name} ({kind:?})");
        if let Some(family) = graphics_family(instance, phys, present) {
            candidates.push((phys, family, name, kind));
        }
    }

    if let Some(wanted) = wanted {
        return candidates
            .into_iter()
            .find(|(_, _, name, _)| name == wanted)
            .map(|(phys, family, _, _)| (phys, family))
            .ok_or_else(|| anyhow!("physical device {wanted:?} not found or cannot render"));
    }

    candidates.sort_by_key(|(_, _, _, kind)| device_rank(*kind));
    candidates
        .into_iter()
        .next()
        .map(|(phys, family, _, _)| (phys, family))
        .ok_or_else(|| anyhow!("no suitable physical device/queue family"))
}

unsafe fn create_device(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    queue_family: u32,
    want_swapchain: bool,
) -> Result<(ash::Device, vk::Queue, RenderPath)> {
    // STRICT ORDER (feature pNext chain):
    // Core 1.3 path: feats13 -> chained after feats12 -> chained after feats2
    // KHR path:      feats_sync2_khr -> feats_dr_khr -> feats12 -> feats2
    // DO NOT MIX core 1.3 structs with KHR equivalents in the same chain.
    let priorities = [1.0_f32];
    let qinfo = vk::DeviceQueueCreateInfo {
        s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
        queue_family_index: queue_family,
        queue_count: 1,
        p_queue_priorities: priorities.as_ptr(),
        ..Default::default()
    };

    let ext_props = instance
        .enumerate_device_extension_properties(phys)
        .context("enumerate_device_extension_properties")?;
    let has = |name: &CStr| -> bool {
        ext_props
            .iter()
            .any(|e| CStr::from_ptr(e.extension_name.as_ptr()) == name)
    };

    let mut device_exts: Vec<*const i8> = Vec::new();
    if want_swapchain {
        device_exts.push(swapchain::NAME.as_ptr());
    }

    let mut feats12 = vk::PhysicalDeviceVulkan12Features {
        s_type: vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_2_FEATURES,
        ..Default::default()
    };
    let mut feats13 = vk::PhysicalDeviceVulkan13Features {
        s_type: vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_3_FEATURES,
        ..Default::default()
    };
    let mut feats_sync2_khr = vk::PhysicalDeviceSynchronization2FeaturesKHR {
        s_type: vk::StructureType::PHYSICAL_DEVICE_SYNCHRONIZATION_2_FEATURES_KHR,
        ..Default::default()
    };
    let mut feats_dr_khr = vk::PhysicalDeviceDynamicRenderingFeaturesKHR {
        s_type: vk::StructureType::PHYSICAL_DEVICE_DYNAMIC_RENDERING_FEATURES_KHR,
        ..Default::default()
    };
    let mut feats2 = vk::PhysicalDeviceFeatures2 {
        s_type: vk::StructureType::PHYSICAL_DEVICE_FEATURES_2,
        ..Default::default()
    };

    let dev_api = instance.get_physical_device_properties(phys).api_version;
    let (maj, min) = (vk::api_version_major(dev_api), vk::api_version_minor(dev_api));

    let path = if maj > 1 || (maj == 1 && min >= 3) {
        feats13.synchronization2 = vk::TRUE;
        feats13.dynamic_rendering = vk::TRUE;
        feats12.p_next = (&mut feats13) as *mut _ as *mut c_void;
        feats2.p_next = (&mut feats12) as *mut _ as *mut c_void;
        RenderPath::Core13
    } else if has(ash::khr::synchronization2::NAME) && has(ash::khr::dynamic_rendering::NAME) {
        device_exts.push(ash::khr::synchronization2::NAME.as_ptr());
        device_exts.push(ash::khr::dynamic_rendering::NAME.as_ptr());
        feats_sync2_khr.synchronization2 = vk::TRUE;
        feats_dr_khr.dynamic_rendering = vk::TRUE;
        feats_sync2_khr.p_next = (&mut feats_dr_khr) as *mut _ as *mut c_void;
        feats12.p_next = (&mut feats_sync2_khr) as *mut _ as *mut c_void;
        feats2.p_next = (&mut feats12) as *mut _ as *mut c_void;
        RenderPath::KhrExt
    } else {
        return Err(anyhow!(
            "dynamic rendering not available on this device; no render-pass fallback"
        ));
    };

    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        p_next: (&mut feats2) as *mut _ as *const c_void,
        queue_create_info_count: 1,
        p_queue_create_infos: &qinfo,
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        ..Default::default()
    };
    let device = instance
        .create_device(phys, &dinfo, None)
        .context("create_device")?;
    let queue = device.get_device_queue(queue_family, 0);
    Ok((device, queue, path))
}

/// What the instance must be able to present to.
pub(crate) enum Target {
    Window {
        display: RawDisplayHandle,
        window: raw_window_handle::RawWindowHandle,
    },
    Offscreen,
}

impl GpuContext {
    /// STRICT ORDER:
    /// 1) VkInstance (platform WSI only when there is a window)
    /// 2) VkSurfaceKHR from THIS instance
    /// 3) physical device + queue family checked AGAINST THIS SURFACE
    /// 4) VkDevice
    ///
    /// Returns the surface (null for offscreen) alongside the context.
    pub unsafe fn new(
        target: Target,
        wanted_device: Option<&str>,
    ) -> Result<(Self, Option<(surface::Instance, vk::SurfaceKHR)>)> {
        let entry = Entry::linked();
        let display = match &target {
            Target::Window { display, .. } => Some(*display),
            Target::Offscreen => None,
        };
        let instance = create_instance(&entry, display)?;
        let debug = create_debug_messenger(&entry, &instance)?;

        let surface = match target {
            Target::Window { display, window } => {
                let loader = surface::Instance::new(&entry, &instance);
                let surface = ash_window::create_surface(&entry, &instance, display, window, None)
                    .context("ash_window::create_surface")?;
                Some((loader, surface))
            }
            Target::Offscreen => None,
        };

        let present = surface.as_ref().map(|(l, s)| (l, *s));
        let (phys, queue_family) = pick_device_and_queue(&instance, present, wanted_device)?;
        let (device, queue, path) =
            create_device(&instance, phys, queue_family, surface.is_some())?;
        let device_name = device_name(&instance, phys);
        let khr = (path == RenderPath::KhrExt).then(|| KhrCommands {
            rendering: ash::khr::dynamic_rendering::Device::new(&instance, &device),
            sync2: ash::khr::synchronization2::Device::new(&instance, &device),
        });
        info!("using {device_name} (queue family {queue_family}, {path:?})");

        Ok((
            Self {
                entry,
                instance,
                phys,
                device,
                queue,
                queue_family,
                path,
                device_name,
                khr,
                debug,
            },
            surface,
        ))
    }

    pub unsafe fn cmd_pipeline_barrier2(&self, cmd: vk::CommandBuffer, dep: &vk::DependencyInfo) {
        match &self.khr {
            Some(k) => k.sync2.cmd_pipeline_barrier2(cmd, dep),
            None => self.device.cmd_pipeline_barrier2(cmd, dep),
        }
    }

    pub unsafe fn cmd_begin_rendering(&self, cmd: vk::CommandBuffer, info: &vk::RenderingInfo) {
        match &self.khr {
            Some(k) => k.rendering.cmd_begin_rendering(cmd, info),
            None => self.device.cmd_begin_rendering(cmd, info),
        }
    }

    pub unsafe fn cmd_end_rendering(&self, cmd: vk::CommandBuffer) {
        match &self.khr {
            Some(k) => k.rendering.cmd_end_rendering(cmd),
            None => self.device.cmd_end_rendering(cmd),
        }
    }

    pub unsafe fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        self.instance.get_physical_device_memory_properties(self.phys)
    }

    /// Everything created from the device must already be gone.
    pub unsafe fn destroy_device(&mut self) {
        self.device.destroy_device(None);
    }

    /// Debug messenger, then instance. The surface must already be gone.
    pub unsafe fn destroy_instance(&mut self) {
        destroy_debug_messenger(&self.entry, &self.instance, self.debug);
        self.instance.destroy_instance(None);
    }
}
