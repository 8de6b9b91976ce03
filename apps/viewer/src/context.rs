use crate::window_surface;
use anyhow::{anyhow, Context as _, Result};
use ember::prelude::{Capability, Format};
use log::{debug, info, warn};
use spark::{vk, Builder, Device, DeviceExtensions, Instance, InstanceExtensions, Loader};
use std::ffi::CStr;
use std::os::raw::c_void;
use std::slice;
use std::sync::Arc;
use winit::window::Window;

unsafe extern "system" fn debug_messenger(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_types: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _: *mut c_void,
) -> vk::Bool32 {
    if let Some(data) = p_callback_data.as_ref() {
        let message = CStr::from_ptr(data.p_message);
        warn!("{}, {}: {:?}", message_severity, message_types, message);
    }
    vk::FALSE
}

/// Attaches a description to raw Vulkan errors during startup.
pub trait VkResultExt<T> {
    fn or_fail(self, what: &str) -> Result<T>;
}

impl<T> VkResultExt<T> for spark::Result<T> {
    fn or_fail(self, what: &str) -> Result<T> {
        self.map_err(|err| anyhow!("failed to {}: {}", what, err))
    }
}

pub trait DeviceExt {
    unsafe fn get_buffer_device_address_helper(&self, buffer: vk::Buffer) -> vk::DeviceAddress;
}

impl DeviceExt for Device {
    unsafe fn get_buffer_device_address_helper(&self, buffer: vk::Buffer) -> vk::DeviceAddress {
        let info = vk::BufferDeviceAddressInfo {
            buffer: Some(buffer),
            ..Default::default()
        };
        self.get_buffer_device_address(&info)
    }
}

trait PhysicalDeviceMemoryPropertiesExt {
    fn types(&self) -> &[vk::MemoryType];
    fn heaps(&self) -> &[vk::MemoryHeap];
}

impl PhysicalDeviceMemoryPropertiesExt for vk::PhysicalDeviceMemoryProperties {
    fn types(&self) -> &[vk::MemoryType] {
        &self.memory_types[..self.memory_type_count as usize]
    }
    fn heaps(&self) -> &[vk::MemoryHeap] {
        &self.memory_heaps[..self.memory_heap_count as usize]
    }
}

pub fn vk_format(format: Format) -> vk::Format {
    match format {
        Format::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        Format::Rgba32Uint => vk::Format::R32G32B32A32_UINT,
        Format::Rg32Float => vk::Format::R32G32_SFLOAT,
        Format::R32Float => vk::Format::R32_SFLOAT,
        Format::R32Uint => vk::Format::R32_UINT,
    }
}

const STORAGE_FORMATS: [Format; 5] = [
    Format::Rgba32Float,
    Format::Rgba32Uint,
    Format::Rg32Float,
    Format::R32Float,
    Format::R32Uint,
];

/// What the physical device offers, before dependent features are resolved.
#[derive(Debug, Clone, Copy, Default)]
struct DeviceSupport {
    buffer_device_address: bool,
    acceleration_structure: bool,
    ray_tracing_pipeline: bool,
    storage_formats: bool,
    presentation: bool,
}

impl DeviceSupport {
    // ray tracing pipelines are only usable on top of acceleration structures
    fn capabilities(&self) -> Vec<Capability> {
        let acceleration_structure = self.acceleration_structure && self.buffer_device_address;
        let ray_tracing_pipeline = self.ray_tracing_pipeline && acceleration_structure;
        [
            (Capability::BufferDeviceAddress, self.buffer_device_address),
            (Capability::AccelerationStructure, acceleration_structure),
            (Capability::RayTracingPipeline, ray_tracing_pipeline),
            (Capability::StorageImageFormats, self.storage_formats),
            (Capability::Presentation, self.presentation),
        ]
        .iter()
        .filter(|(_, supported)| *supported)
        .map(|(capability, _)| *capability)
        .collect()
    }
}

pub struct ContextParams {
    pub version: vk::Version,
    pub is_debug: bool,
}

impl Default for ContextParams {
    fn default() -> Self {
        Self {
            version: vk::Version::from_raw_parts(1, 2, 0),
            is_debug: false,
        }
    }
}

pub struct RayTracingProperties {
    pub shader_group_handle_size: u32,
    pub shader_group_base_alignment: u32,
    pub shader_group_handle_alignment: u32,
    pub min_scratch_offset_alignment: u32,
}

pub struct Context {
    pub instance: Instance,
    pub debug_utils_messenger: Option<vk::DebugUtilsMessengerEXT>,
    pub surface: vk::SurfaceKHR,
    pub physical_device: vk::PhysicalDevice,
    pub physical_device_properties: vk::PhysicalDeviceProperties,
    pub physical_device_memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub ray_tracing_properties: RayTracingProperties,
    pub capabilities: Vec<Capability>,
    pub queue_family_index: u32,
    pub queue: vk::Queue,
    pub device: Device,
}

pub type SharedContext = Arc<Context>;

impl Context {
    pub fn new(window: &Window, params: &ContextParams) -> Result<SharedContext> {
        let instance = {
            let loader = Loader::new().map_err(|err| anyhow!("failed to load Vulkan: {:?}", err))?;
            let instance_version = unsafe { loader.enumerate_instance_version() }.or_fail("query instance version")?;
            info!(
                "loading instance version {} ({} supported)",
                params.version, instance_version
            );
            if instance_version < params.version {
                return Err(anyhow!(
                    "requested instance version {} is greater than the available version {}",
                    params.version,
                    instance_version
                ));
            }

            let mut extensions = InstanceExtensions::new(params.version);
            window_surface::enable_extensions(window, &mut extensions)?;
            if params.is_debug {
                extensions.enable_ext_debug_utils();
            }
            let extension_names = extensions.to_name_vec();
            for &name in extension_names.iter() {
                debug!("loading instance extension {:?}", name);
            }

            let app_name = CStr::from_bytes_with_nul(b"ember\0").context("application name")?;
            let app_info = vk::ApplicationInfo::builder()
                .p_application_name(Some(app_name))
                .api_version(params.version);

            let extension_name_ptrs: Vec<_> = extension_names.iter().map(|s| s.as_ptr()).collect();
            let instance_create_info = vk::InstanceCreateInfo::builder()
                .p_application_info(Some(&app_info))
                .pp_enabled_extension_names(&extension_name_ptrs);
            unsafe { loader.create_instance(&instance_create_info, None) }
                .map_err(|err| anyhow!("failed to create instance: {:?}", err))?
        };

        let debug_utils_messenger = if params.is_debug {
            let create_info = vk::DebugUtilsMessengerCreateInfoEXT {
                message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
                message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                pfn_user_callback: Some(debug_messenger),
                ..Default::default()
            };
            Some(unsafe { instance.create_debug_utils_messenger_ext(&create_info, None) }.or_fail("create debug messenger")?)
        } else {
            None
        };

        let surface = window_surface::create(&instance, window).or_fail("create window surface")?;

        let physical_device = {
            let physical_devices =
                unsafe { instance.enumerate_physical_devices_to_vec() }.or_fail("enumerate physical devices")?;
            for physical_device in &physical_devices {
                let props = unsafe { instance.get_physical_device_properties(*physical_device) };
                info!("physical device ({}): {:?}", props.device_type, unsafe {
                    CStr::from_ptr(props.device_name.as_ptr())
                });
            }
            *physical_devices.first().ok_or_else(|| anyhow!("no physical device found"))?
        };
        let physical_device_properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let device_version = physical_device_properties.api_version;
        if device_version < params.version {
            return Err(anyhow!(
                "requested device version {} is greater than the available version {}",
                params.version,
                device_version
            ));
        }

        let ray_tracing_properties = {
            let mut rtpp = vk::PhysicalDeviceRayTracingPipelinePropertiesKHR::default();
            let mut asp = vk::PhysicalDeviceAccelerationStructurePropertiesKHR::default();
            let mut properties2 = vk::PhysicalDeviceProperties2::builder()
                .insert_next(&mut rtpp)
                .insert_next(&mut asp);
            unsafe { instance.get_physical_device_properties2(physical_device, properties2.as_mut()) };
            RayTracingProperties {
                shader_group_handle_size: rtpp.shader_group_handle_size,
                shader_group_base_alignment: rtpp.shader_group_base_alignment,
                shader_group_handle_alignment: rtpp.shader_group_handle_alignment,
                min_scratch_offset_alignment: asp.min_acceleration_structure_scratch_offset_alignment,
            }
        };

        let physical_device_memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };
        for (i, mt) in physical_device_memory_properties.types().iter().enumerate() {
            debug!("memory type {}: {}, heap {}", i, mt.property_flags, mt.heap_index);
        }
        for (i, mh) in physical_device_memory_properties.heaps().iter().enumerate() {
            debug!("heap {}: {} bytes {}", i, mh.size, mh.flags);
        }

        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties_to_vec(physical_device) };
        let compute_families: Vec<u32> = queue_families
            .iter()
            .enumerate()
            .filter(|(_, info)| info.queue_flags.contains(vk::QueueFlags::COMPUTE))
            .map(|(index, _)| index as u32)
            .collect();
        let presenting_family = compute_families.iter().copied().find(|&index| {
            unsafe { instance.get_physical_device_surface_support_khr(physical_device, index, surface) }
                .unwrap_or(false)
        });
        let queue_family_index = presenting_family
            .or_else(|| compute_families.first().copied())
            .ok_or_else(|| anyhow!("no compute queue family found"))?;

        let available_extensions = {
            let extension_properties =
                unsafe { instance.enumerate_device_extension_properties_to_vec(physical_device, None) }
                    .or_fail("enumerate device extensions")?;
            DeviceExtensions::from_properties(params.version, &extension_properties)
        };

        let mut buffer_device_address_features = vk::PhysicalDeviceBufferDeviceAddressFeatures::default();
        let mut acceleration_structure_features = vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default();
        let mut ray_tracing_pipeline_features = vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default();
        {
            let mut features2 = vk::PhysicalDeviceFeatures2::builder()
                .insert_next(&mut buffer_device_address_features)
                .insert_next(&mut acceleration_structure_features)
                .insert_next(&mut ray_tracing_pipeline_features);
            unsafe { instance.get_physical_device_features2(physical_device, features2.as_mut()) };
        }

        let support = DeviceSupport {
            buffer_device_address: buffer_device_address_features.buffer_device_address.as_bool(),
            acceleration_structure: available_extensions.supports_khr_acceleration_structure()
                && acceleration_structure_features.acceleration_structure.as_bool(),
            ray_tracing_pipeline: available_extensions.supports_khr_ray_tracing_pipeline()
                && ray_tracing_pipeline_features.ray_tracing_pipeline.as_bool(),
            storage_formats: STORAGE_FORMATS.iter().all(|&format| {
                let props =
                    unsafe { instance.get_physical_device_format_properties(physical_device, vk_format(format)) };
                props
                    .optimal_tiling_features
                    .contains(vk::FormatFeatureFlags::STORAGE_IMAGE)
            }),
            presentation: presenting_family.is_some() && available_extensions.supports_khr_swapchain(),
        };
        let capabilities = support.capabilities();
        let has_buffer_device_address = capabilities.contains(&Capability::BufferDeviceAddress);
        let has_acceleration_structure = capabilities.contains(&Capability::AccelerationStructure);
        let has_ray_tracing_pipeline = capabilities.contains(&Capability::RayTracingPipeline);
        let has_presentation = capabilities.contains(&Capability::Presentation);
        info!("device capabilities: {:?}", capabilities);

        let device = {
            let queue_priorities = [1.0];
            let device_queue_create_info = vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(queue_family_index)
                .p_queue_priorities(&queue_priorities);

            let mut extensions = DeviceExtensions::new(params.version);
            if has_presentation {
                extensions.enable_khr_swapchain();
            }
            if has_acceleration_structure {
                extensions.enable_khr_acceleration_structure();
            }
            if has_ray_tracing_pipeline {
                extensions.enable_khr_ray_tracing_pipeline();
            }
            let extension_names = extensions.to_name_vec();
            for &name in extension_names.iter() {
                debug!("loading device extension {:?}", name);
            }

            let enabled_features = vk::PhysicalDeviceFeatures::default();
            let mut buffer_device_address_features =
                vk::PhysicalDeviceBufferDeviceAddressFeatures::builder().buffer_device_address(has_buffer_device_address);
            let mut acceleration_structure_features = vk::PhysicalDeviceAccelerationStructureFeaturesKHR::builder()
                .acceleration_structure(has_acceleration_structure);
            let mut ray_tracing_pipeline_features =
                vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::builder().ray_tracing_pipeline(has_ray_tracing_pipeline);

            let extension_name_ptrs: Vec<_> = extension_names.iter().map(|s| s.as_ptr()).collect();
            let device_create_info = vk::DeviceCreateInfo::builder()
                .p_queue_create_infos(slice::from_ref(&device_queue_create_info))
                .pp_enabled_extension_names(&extension_name_ptrs)
                .p_enabled_features(Some(&enabled_features))
                .insert_next(&mut buffer_device_address_features)
                .insert_next(&mut acceleration_structure_features)
                .insert_next(&mut ray_tracing_pipeline_features);

            unsafe { instance.create_device(physical_device, &device_create_info, None, params.version) }
                .map_err(|err| anyhow!("failed to create device: {:?}", err))?
        };

        let queue = unsafe { device.get_device_queue(queue_family_index, 0) };

        Ok(Arc::new(Self {
            instance,
            debug_utils_messenger,
            surface,
            physical_device,
            physical_device_properties,
            physical_device_memory_properties,
            ray_tracing_properties,
            capabilities,
            queue_family_index,
            queue,
            device,
        }))
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn get_memory_type_index(&self, type_filter: u32, property_flags: vk::MemoryPropertyFlags) -> Option<u32> {
        for (i, mt) in self.physical_device_memory_properties.types().iter().enumerate() {
            let i = i as u32;
            if (type_filter & (1 << i)) != 0 && mt.property_flags.contains(property_flags) {
                return Some(i);
            }
        }
        None
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_device(None);
            self.instance.destroy_surface_khr(Some(self.surface), None);
            if self.debug_utils_messenger.is_some() {
                self.instance
                    .destroy_debug_utils_messenger_ext(self.debug_utils_messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_support_reports_every_capability() {
        let support = DeviceSupport {
            buffer_device_address: true,
            acceleration_structure: true,
            ray_tracing_pipeline: true,
            storage_formats: true,
            presentation: true,
        };
        assert_eq!(support.capabilities().len(), 5);
    }

    #[test]
    fn ray_tracing_depends_on_acceleration_structures() {
        let support = DeviceSupport {
            buffer_device_address: true,
            ray_tracing_pipeline: true,
            storage_formats: true,
            ..Default::default()
        };
        assert_eq!(
            support.capabilities(),
            vec![Capability::BufferDeviceAddress, Capability::StorageImageFormats]
        );
    }

    #[test]
    fn acceleration_structures_need_device_addresses() {
        let support = DeviceSupport {
            acceleration_structure: true,
            ray_tracing_pipeline: true,
            ..Default::default()
        };
        assert!(support.capabilities().is_empty());
    }
}
