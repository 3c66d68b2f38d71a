//! Bringing up a device with no window attached.
//!
//! Loads the Vulkan loader at runtime, creates an instance and a logical device
//! on the first physical device with a graphics queue, and keeps one queue and
//! one command pool around for everything else in this crate.
use crate::{
    AllocationError, Device, Queue, ThinHandle,
    command_buffer::CommandPool,
    format::{self, Format},
    vk,
};
use alloc::vec::Vec;
use ash::ext::debug_utils;
use core::ffi::{CStr, c_char, c_void};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Where validation messages end up, by severity. Informational chatter stays
/// out of the way at `debug` and below.
fn validation_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> log::Level {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::Level::Error
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::Level::Warn
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::Level::Debug
    } else {
        log::Level::Trace
    }
}

unsafe extern "system" fn forward_validation_message(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let message = data
        .as_ref()
        .and_then(|data| data.message_as_c_str())
        .unwrap_or(c"(no message)");
    log::log!(
        target: "vulkan",
        validation_level(severity),
        "{types:?} {}",
        message.to_string_lossy()
    );
    // Never abort the call that triggered the message.
    vk::FALSE
}

/// A debug messenger and the extension functions needed to destroy it.
struct Messenger {
    functions: debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
}
impl Messenger {
    /// Forward every message from the validation layer to `log`.
    unsafe fn create(entry: &ash::Entry, instance: &ash::Instance) -> Result<Self, vk::Result> {
        let functions = debug_utils::Instance::new(entry, instance);
        let info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(forward_validation_message));
        let handle = functions.create_debug_utils_messenger(&info, None)?;
        Ok(Self { functions, handle })
    }
    unsafe fn destroy(self) {
        self.functions
            .destroy_debug_utils_messenger(self.handle, None);
    }
}

/// Destroy the messenger, if any, then the instance.
unsafe fn destroy_instance(instance: &ash::Instance, messenger: Option<Messenger>) {
    if let Some(messenger) = messenger {
        messenger.destroy();
    }
    instance.destroy_instance(None);
}

/// How to set up a [`HeadlessContext`].
#[derive(Clone, Copy, Debug)]
pub struct ContextConfig<'a> {
    /// Reported to the driver in the application info.
    pub application_name: &'a CStr,
    /// Enable the Khronos validation layer if it is installed, and forward its
    /// messages to `log` under the `vulkan` target. A missing layer is logged,
    /// not an error.
    pub validation: bool,
}
impl Default for ContextConfig<'_> {
    fn default() -> Self {
        Self {
            application_name: c"vkheadless",
            validation: cfg!(debug_assertions),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("failed to load the vulkan loader: {0}")]
    Loading(#[from] ash::LoadingError),
    #[error("no physical device has a graphics queue")]
    NoDevice,
    #[error("the device handed back a null queue")]
    NullQueue,
    #[error("vulkan call failed: {0}")]
    Vulkan(#[from] vk::Result),
    #[error(transparent)]
    Allocation(#[from] AllocationError),
}

/// An instance, a logical device, one graphics queue, and a command pool on
/// that queue's family. Must be [destroyed](Self::destroy) explicitly, after
/// everything created from it.
pub struct HeadlessContext {
    // Keeps the loader alive for as long as the function pointers are.
    _entry: ash::Entry,
    instance: ash::Instance,
    messenger: Option<Messenger>,
    physical_device: vk::PhysicalDevice,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    device: ash::Device,
    queue_family: u32,
    queue: Queue,
    pool: CommandPool,
}

struct PickedDevice {
    physical_device: vk::PhysicalDevice,
    queue_family: u32,
    portability: bool,
}

impl HeadlessContext {
    /// Load Vulkan and set everything up. Anything created before a failure is
    /// destroyed before returning.
    pub unsafe fn new(config: &ContextConfig) -> Result<Self, ContextError> {
        let entry = ash::Entry::load()?;
        let (instance, forward_messages) = Self::create_instance(&entry, config)?;
        let messenger = if forward_messages {
            match Messenger::create(&entry, &instance) {
                Ok(messenger) => Some(messenger),
                Err(err) => {
                    instance.destroy_instance(None);
                    return Err(err.into());
                }
            }
        } else {
            None
        };
        let picked = match Self::pick_device(&instance) {
            Ok(picked) => picked,
            Err(err) => {
                destroy_instance(&instance, messenger);
                return Err(err);
            }
        };
        let device = match Self::create_device(&instance, &picked) {
            Ok(device) => device,
            Err(err) => {
                destroy_instance(&instance, messenger);
                return Err(err);
            }
        };
        let memory_properties =
            instance.get_physical_device_memory_properties(picked.physical_device);
        let parts = Queue::from_handle(device.get_device_queue(picked.queue_family, 0))
            .ok_or(ContextError::NullQueue)
            .and_then(|queue| {
                let pool = Device::from_ash(&device, &memory_properties).create_command_pool(
                    &vk::CommandPoolCreateInfo::default()
                        .queue_family_index(picked.queue_family)
                        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER),
                )?;
                Ok((queue, pool))
            });
        let (queue, pool) = match parts {
            Ok(parts) => parts,
            Err(err) => {
                device.destroy_device(None);
                destroy_instance(&instance, messenger);
                return Err(err);
            }
        };
        Ok(Self {
            _entry: entry,
            instance,
            messenger,
            physical_device: picked.physical_device,
            memory_properties,
            device,
            queue_family: picked.queue_family,
            queue,
            pool,
        })
    }
    /// The instance, and whether `VK_EXT_debug_utils` was enabled on it.
    unsafe fn create_instance(
        entry: &ash::Entry,
        config: &ContextConfig,
    ) -> Result<(ash::Instance, bool), ContextError> {
        let available = entry.enumerate_instance_extension_properties(None)?;
        let has = |name: &CStr| {
            available
                .iter()
                .any(|ext| ext.extension_name_as_c_str() == Ok(name))
        };
        let mut extensions: Vec<*const c_char> = Vec::new();
        // Needed to see MoltenVK and friends at all.
        let has_portability = has(ash::khr::portability_enumeration::NAME);
        if has_portability {
            extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());
        }
        let forward_messages = config.validation && has(debug_utils::NAME);
        if forward_messages {
            extensions.push(debug_utils::NAME.as_ptr());
        } else if config.validation {
            log::warn!("{:?} is missing, validation messages won't be logged", debug_utils::NAME);
        }
        let flags = if has_portability {
            vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR
        } else {
            vk::InstanceCreateFlags::empty()
        };
        let mut layers = Vec::new();
        if config.validation {
            let available = entry
                .enumerate_instance_layer_properties()?
                .iter()
                .any(|layer| layer.layer_name_as_c_str() == Ok(VALIDATION_LAYER));
            if available {
                layers.push(VALIDATION_LAYER.as_ptr());
            } else {
                log::warn!("validation requested but {VALIDATION_LAYER:?} isn't installed");
            }
        }
        let application = vk::ApplicationInfo::default()
            .application_name(config.application_name)
            .engine_name(c"vkheadless")
            .api_version(vk::API_VERSION_1_0);
        let instance = entry.create_instance(
            &vk::InstanceCreateInfo::default()
                .application_info(&application)
                .enabled_extension_names(&extensions)
                .enabled_layer_names(&layers)
                .flags(flags),
            None,
        )?;
        Ok((instance, forward_messages))
    }
    unsafe fn pick_device(instance: &ash::Instance) -> Result<PickedDevice, ContextError> {
        let picked = instance
            .enumerate_physical_devices()?
            .into_iter()
            .find_map(|physical_device| {
                let queue_family = instance
                    .get_physical_device_queue_family_properties(physical_device)
                    .iter()
                    .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))?
                    as u32;
                // A device whose extensions can't be listed is no use to us.
                let portability = instance
                    .enumerate_device_extension_properties(physical_device)
                    .ok()?
                    .iter()
                    .any(|ext| {
                        ext.extension_name_as_c_str() == Ok(ash::khr::portability_subset::NAME)
                    });
                Some(PickedDevice {
                    physical_device,
                    queue_family,
                    portability,
                })
            })
            .ok_or(ContextError::NoDevice)?;
        let properties = instance.get_physical_device_properties(picked.physical_device);
        log::info!(
            "using {:?}, queue family {}",
            properties.device_name_as_c_str().unwrap_or(c"<unnamed>"),
            picked.queue_family
        );
        Ok(picked)
    }
    unsafe fn create_device(
        instance: &ash::Instance,
        picked: &PickedDevice,
    ) -> Result<ash::Device, ContextError> {
        // With portability enumeration on, portability_subset *must* be enabled
        // wherever it is advertised.
        let extensions: &[*const c_char] = if picked.portability {
            &[ash::khr::portability_subset::NAME.as_ptr()]
        } else {
            &[]
        };
        Ok(instance.create_device(
            picked.physical_device,
            &vk::DeviceCreateInfo::default()
                .queue_create_infos(&[vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(picked.queue_family)
                    .queue_priorities(&[1.0])])
                .enabled_extension_names(extensions),
            None,
        )?)
    }
    /// The device, alongside unique access to the queue and command pool.
    pub fn split(&mut self) -> (Device<'_>, &mut Queue, &mut CommandPool) {
        let Self {
            device,
            memory_properties,
            queue,
            pool,
            ..
        } = self;
        (Device::from_ash(device, memory_properties), queue, pool)
    }
    pub fn device(&self) -> Device<'_> {
        Device::from_ash(&self.device, &self.memory_properties)
    }
    /// The raw device, for the pipeline setup this crate doesn't cover.
    pub fn ash_device(&self) -> &ash::Device {
        &self.device
    }
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }
    /// The most precise depth format the device can render to.
    pub fn depth_format(&self) -> Option<Format> {
        format::select_depth_format(format::DEPTH_CANDIDATES, |format| unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, format)
        })
    }
    /// Whether `format` can be rendered to as a color attachment with optimal
    /// tiling.
    pub fn supports_color_attachment(&self, format: Format) -> bool {
        unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, format.vk())
        }
        .optimal_tiling_features
        .contains(vk::FormatFeatureFlags::COLOR_ATTACHMENT)
    }
    /// Wait for the device to go idle, then destroy the pool, device,
    /// messenger, and instance. Everything created from the device must be
    /// gone already.
    pub unsafe fn destroy(self) {
        if let Err(err) = self.device.device_wait_idle() {
            log::warn!("waiting for idle before teardown failed: {err}");
        }
        self.device.destroy_command_pool(self.pool.into_handle(), None);
        self.device.destroy_device(None);
        destroy_instance(&self.instance, self.messenger);
    }
    /// Whether validation messages are being forwarded to `log`.
    pub fn forwards_validation(&self) -> bool {
        self.messenger.is_some()
    }
}
