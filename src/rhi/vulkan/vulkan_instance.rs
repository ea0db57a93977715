#![allow(unsafe_code)]

//! Instance and logical-device bring-up.

use std::ffi;
use std::os::raw;
use std::sync::Arc;

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr;
use ash::vk;
use log::{debug, info, warn};

use crate::rhi::rhi_enums::DeviceCreationError;
use crate::rhi::rhi_structs::DeviceProperties;
use crate::rhi::vulkan::vulkan_device::{QueueFamilies, RawDevice, VulkanDevice};
use crate::settings::DeviceCreationDescription;
use crate::shader::ShaderRegistry;

unsafe extern "system" fn vulkan_debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_types: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut raw::c_void,
) -> vk::Bool32 {
    let message = ffi::CStr::from_ptr((*callback_data).p_message);

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("[vulkan] {:?}", message);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("[vulkan] {:?}", message);
    } else {
        debug!("[vulkan] {:?}", message);
    }

    vk::FALSE
}

fn validation_layer_names() -> Vec<ffi::CString> {
    if cfg!(debug_assertions) {
        vec![ffi::CString::new("VK_LAYER_KHRONOS_validation").unwrap()]
    } else {
        Vec::new()
    }
}

const RAY_TRACING_EXTENSIONS: [&str; 3] = [
    "VK_KHR_acceleration_structure",
    "VK_KHR_ray_tracing_pipeline",
    "VK_KHR_deferred_host_operations",
];

struct SelectedDevice {
    physical_device: vk::PhysicalDevice,
    queue_families: QueueFamilies,
    supports_ray_tracing: bool,
}

fn score_device(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Option<(SelectedDevice, u32)> {
    let properties = unsafe { instance.get_physical_device_properties(physical_device) };
    let queue_family_properties =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    let mut graphics = None;
    let mut compute = None;
    let mut transfer = None;

    for (index, family) in queue_family_properties.iter().enumerate() {
        let index = index as u32;

        if graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            graphics = Some(index);
        }
        if compute.is_none() && family.queue_flags.contains(vk::QueueFlags::COMPUTE) {
            compute = Some(index);
        }
        if transfer.is_none() && family.queue_flags.contains(vk::QueueFlags::TRANSFER) {
            transfer = Some(index);
        }
    }

    let graphics = graphics?;
    let compute = compute.unwrap_or(graphics);
    let transfer = transfer.unwrap_or(graphics);

    let extensions = unsafe { instance.enumerate_device_extension_properties(physical_device) }.ok()?;
    let extension_names: Vec<String> = extensions
        .iter()
        .map(|extension| {
            unsafe { ffi::CStr::from_ptr(extension.extension_name.as_ptr()) }
                .to_string_lossy()
                .into_owned()
        })
        .collect();

    let supports_ray_tracing = RAY_TRACING_EXTENSIONS
        .iter()
        .all(|required| extension_names.iter().any(|name| name == required));

    let mut score = match properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 100,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 50,
        _ => 10,
    };
    if supports_ray_tracing {
        score += 25;
    }

    Some((
        SelectedDevice {
            physical_device,
            queue_families: QueueFamilies {
                graphics,
                compute,
                transfer,
            },
            supports_ray_tracing,
        },
        score,
    ))
}

fn device_properties(
    instance: &ash::Instance,
    selected: &SelectedDevice,
) -> DeviceProperties {
    let mut ray_tracing_properties = vk::PhysicalDeviceRayTracingPipelinePropertiesKHR::default();
    let mut properties2 =
        vk::PhysicalDeviceProperties2::builder().push_next(&mut ray_tracing_properties);

    unsafe {
        instance.get_physical_device_properties2(selected.physical_device, &mut properties2);
    }

    let properties = properties2.properties;

    let device_name = unsafe { ffi::CStr::from_ptr(properties.device_name.as_ptr()) }
        .to_string_lossy()
        .into_owned();

    DeviceProperties {
        device_name,
        max_color_attachments: properties.limits.max_color_attachments,
        max_bound_descriptor_sets: properties.limits.max_bound_descriptor_sets,
        max_bindless_descriptors: 4096,
        supports_ray_tracing: selected.supports_ray_tracing,
        shader_group_handle_size: ray_tracing_properties.shader_group_handle_size,
        shader_group_handle_alignment: ray_tracing_properties.shader_group_handle_alignment.max(1),
        shader_group_base_alignment: ray_tracing_properties.shader_group_base_alignment.max(1),
    }
}

/// Creates the Vulkan device described by `description`.
pub fn create_vulkan_device(
    description: &DeviceCreationDescription,
    registry: Arc<ShaderRegistry>,
) -> Result<Arc<VulkanDevice>, DeviceCreationError> {
    description.validate().map_err(|_| DeviceCreationError::ApiMismatch)?;

    let entry = ash::Entry::linked();

    let application_name = ffi::CString::new(description.application_name.as_str())
        .map_err(|_| DeviceCreationError::InitializationFailed("invalid application name".to_owned()))?;
    let engine_name = ffi::CString::new(description.engine_name.as_str())
        .map_err(|_| DeviceCreationError::InitializationFailed("invalid engine name".to_owned()))?;

    let application_info = vk::ApplicationInfo::builder()
        .application_name(&application_name)
        .application_version(vk::make_api_version(
            0,
            description.application_version.major,
            description.application_version.minor,
            description.application_version.patch,
        ))
        .engine_name(&engine_name)
        .engine_version(vk::make_api_version(
            0,
            description.engine_version.major,
            description.engine_version.minor,
            description.engine_version.patch,
        ))
        .api_version(vk::API_VERSION_1_2);

    let layer_names = validation_layer_names();
    let layer_name_pointers: Vec<*const raw::c_char> = layer_names.iter().map(|name| name.as_ptr()).collect();

    let mut extension_names: Vec<ffi::CString> = Vec::new();
    if cfg!(debug_assertions) {
        extension_names.push(ffi::CString::new("VK_EXT_debug_utils").unwrap());
    }
    if let crate::settings::ApiSpecificConfig::Vulkan(config) = &description.specific_config {
        for extension in &config.instance_extensions {
            extension_names.push(ffi::CString::new(extension.as_str()).unwrap());
        }
    }
    let extension_name_pointers: Vec<*const raw::c_char> =
        extension_names.iter().map(|name| name.as_ptr()).collect();

    let create_info = vk::InstanceCreateInfo::builder()
        .application_info(&application_info)
        .enabled_layer_names(&layer_name_pointers)
        .enabled_extension_names(&extension_name_pointers);

    let instance = unsafe { entry.create_instance(&create_info, None) }
        .map_err(|error| DeviceCreationError::InitializationFailed(format!("{:?}", error)))?;

    let (debug_utils, debug_messenger) = if cfg!(debug_assertions) {
        let debug_utils = DebugUtils::new(&entry, &instance);

        let messenger_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(vulkan_debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&messenger_info, None) }.ok();
        (Some(debug_utils), messenger)
    } else {
        (None, None)
    };

    // Pick the best adapter that can run the engine at all.
    let physical_devices = unsafe { instance.enumerate_physical_devices() }
        .map_err(|error| DeviceCreationError::InitializationFailed(format!("{:?}", error)))?;

    let selected = physical_devices
        .iter()
        .filter_map(|physical_device| score_device(&instance, *physical_device))
        .max_by_key(|(_, score)| *score)
        .map(|(selected, _)| selected)
        .ok_or(DeviceCreationError::NoSuitableDevice)?;

    let properties = device_properties(&instance, &selected);
    info!(
        "selected adapter '{}' (ray tracing: {})",
        properties.device_name, properties.supports_ray_tracing
    );

    // One queue per distinct family.
    let mut family_indices = vec![selected.queue_families.graphics];
    for family in [selected.queue_families.compute, selected.queue_families.transfer].iter() {
        if !family_indices.contains(family) {
            family_indices.push(*family);
        }
    }

    let priorities = [1.0f32];
    let queue_infos: Vec<vk::DeviceQueueCreateInfo> = family_indices
        .iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(*family)
                .queue_priorities(&priorities)
                .build()
        })
        .collect();

    let mut device_extension_names: Vec<ffi::CString> = vec![ffi::CString::new("VK_KHR_swapchain").unwrap()];
    if selected.supports_ray_tracing {
        for extension in RAY_TRACING_EXTENSIONS.iter() {
            device_extension_names.push(ffi::CString::new(*extension).unwrap());
        }
    }
    let device_extension_pointers: Vec<*const raw::c_char> =
        device_extension_names.iter().map(|name| name.as_ptr()).collect();

    let mut indexing_features = vk::PhysicalDeviceDescriptorIndexingFeatures::builder()
        .descriptor_binding_partially_bound(true)
        .descriptor_binding_variable_descriptor_count(true)
        .descriptor_binding_sampled_image_update_after_bind(true)
        .runtime_descriptor_array(true);

    let mut buffer_device_address_features =
        vk::PhysicalDeviceBufferDeviceAddressFeatures::builder().buffer_device_address(true);

    let mut acceleration_structure_features =
        vk::PhysicalDeviceAccelerationStructureFeaturesKHR::builder().acceleration_structure(true);

    let mut ray_tracing_features =
        vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::builder().ray_tracing_pipeline(true);

    let mut device_create_info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_infos)
        .enabled_extension_names(&device_extension_pointers)
        .push_next(&mut indexing_features);

    if selected.supports_ray_tracing {
        device_create_info = device_create_info
            .push_next(&mut buffer_device_address_features)
            .push_next(&mut acceleration_structure_features)
            .push_next(&mut ray_tracing_features);
    }

    let device = unsafe { instance.create_device(selected.physical_device, &device_create_info, None) }
        .map_err(|error| DeviceCreationError::InitializationFailed(format!("{:?}", error)))?;

    let (acceleration_structure_loader, ray_tracing_loader) = if selected.supports_ray_tracing {
        (
            Some(khr::AccelerationStructure::new(&instance, &device)),
            Some(khr::RayTracingPipeline::new(&instance, &device)),
        )
    } else {
        (None, None)
    };

    let raw = Arc::new(RawDevice::new(
        entry,
        instance,
        selected.physical_device,
        device,
        selected.queue_families,
        description.binding_offsets,
        properties,
        debug_utils,
        debug_messenger,
        acceleration_structure_loader,
        ray_tracing_loader,
    ));

    Ok(Arc::new(VulkanDevice::new(raw, registry)))
}
