//! Vulkan instance and device bootstrap.
//!
//! Headless: the engine never creates a surface or swap chain; the
//! backbuffer arrives from outside as a placed or registered image.

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};

use crate::error::GraphicsError;

/// Queue family index and queue handle per queue class.
#[derive(Debug, Clone, Copy)]
pub struct QueueSet {
    /// Graphics (direct) queue.
    pub graphics: (u32, vk::Queue),
    /// Async compute queue; shares the graphics queue when the device has no
    /// dedicated compute family.
    pub compute: (u32, vk::Queue),
    /// Transfer queue; shares the graphics queue when the device has no
    /// dedicated transfer family.
    pub transfer: (u32, vk::Queue),
}

/// Everything bootstrap produces.
pub struct DeviceInit {
    pub entry: ash::Entry,
    pub instance: ash::Instance,
    pub physical_device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub device: ash::Device,
    pub queues: QueueSet,
}

/// Create instance, pick a physical device, create the logical device with
/// the graphics/compute/transfer queues and the features the engine needs
/// (timeline semaphores, synchronization2, buffer device address,
/// update-after-bind descriptor indexing).
pub fn initialize() -> Result<DeviceInit, GraphicsError> {
    let entry = unsafe { ash::Entry::load() }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("failed to load Vulkan library: {e}"))
    })?;

    let app_info = vk::ApplicationInfo::default()
        .application_name(c"vermilion")
        .engine_name(c"vermilion-graphics")
        .api_version(vk::API_VERSION_1_3);
    let instance_info = vk::InstanceCreateInfo::default().application_info(&app_info);
    let instance = unsafe { entry.create_instance(&instance_info, None) }
        .map_err(|e| map_init_error(e, "failed to create Vulkan instance"))?;

    let result: Result<DeviceInit, GraphicsError> = (|| {
        let physical_device = pick_physical_device(&instance)?;
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let families = pick_queue_families(&instance, physical_device)?;

        let priorities = [1.0f32];
        let mut unique_families = vec![families.0];
        for family in [families.1, families.2] {
            if !unique_families.contains(&family) {
                unique_families.push(family);
            }
        }
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
            })
            .collect();

        let mut features12 = vk::PhysicalDeviceVulkan12Features::default()
            .timeline_semaphore(true)
            .buffer_device_address(true)
            .descriptor_indexing(true)
            .runtime_descriptor_array(true)
            .descriptor_binding_partially_bound(true)
            .descriptor_binding_sampled_image_update_after_bind(true)
            .descriptor_binding_storage_image_update_after_bind(true)
            .descriptor_binding_storage_buffer_update_after_bind(true)
            .descriptor_binding_uniform_buffer_update_after_bind(true);
        let mut features13 = vk::PhysicalDeviceVulkan13Features::default().synchronization2(true);

        let device_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .push_next(&mut features12)
            .push_next(&mut features13);
        let device = unsafe { instance.create_device(physical_device, &device_info, None) }
            .map_err(|e| map_init_error(e, "failed to create Vulkan device"))?;

        let queue = |family: u32| unsafe { device.get_device_queue(family, 0) };
        let queues = QueueSet {
            graphics: (families.0, queue(families.0)),
            compute: (families.1, queue(families.1)),
            transfer: (families.2, queue(families.2)),
        };

        let device_name = unsafe {
            std::ffi::CStr::from_ptr(properties.device_name.as_ptr())
                .to_string_lossy()
                .into_owned()
        };
        log::info!(
            "vulkan: {} (graphics family {}, compute family {}, transfer family {})",
            device_name,
            families.0,
            families.1,
            families.2
        );

        Ok(DeviceInit {
            entry: entry.clone(),
            instance: instance.clone(),
            physical_device,
            properties,
            device,
            queues,
        })
    })();

    if result.is_err() {
        unsafe { instance.destroy_instance(None) };
    }
    result
}

/// Create the gpu-allocator instance backing heap commits.
pub fn create_allocator(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
) -> Result<Allocator, GraphicsError> {
    Allocator::new(&AllocatorCreateDesc {
        instance: instance.clone(),
        device,
        physical_device,
        debug_settings: Default::default(),
        buffer_device_address: true,
        allocation_sizes: gpu_allocator::AllocationSizes::default(),
    })
    .map_err(|e| {
        GraphicsError::InitializationFailed(format!("failed to create memory allocator: {e}"))
    })
}

fn pick_physical_device(instance: &ash::Instance) -> Result<vk::PhysicalDevice, GraphicsError> {
    let devices = unsafe { instance.enumerate_physical_devices() }
        .map_err(|e| map_init_error(e, "failed to enumerate physical devices"))?;
    let mut fallback = None;
    for device in devices {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        if properties.api_version < vk::API_VERSION_1_3 {
            continue;
        }
        if properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            return Ok(device);
        }
        fallback.get_or_insert(device);
    }
    fallback.ok_or_else(|| {
        GraphicsError::FeatureNotSupported("no Vulkan 1.3 capable GPU found".to_string())
    })
}

/// Pick (graphics, compute, transfer) queue families, preferring dedicated
/// compute and transfer families where the hardware has them.
fn pick_queue_families(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<(u32, u32, u32), GraphicsError> {
    let families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    let graphics = families
        .iter()
        .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .ok_or_else(|| {
            GraphicsError::FeatureNotSupported("device has no graphics queue".to_string())
        })? as u32;

    let compute = families
        .iter()
        .enumerate()
        .position(|(index, family)| {
            index as u32 != graphics && family.queue_flags.contains(vk::QueueFlags::COMPUTE)
        })
        .map(|index| index as u32)
        .unwrap_or(graphics);

    let transfer = families
        .iter()
        .enumerate()
        .position(|(index, family)| {
            index as u32 != graphics
                && index as u32 != compute
                && family.queue_flags.contains(vk::QueueFlags::TRANSFER)
        })
        .map(|index| index as u32)
        .unwrap_or(graphics);

    Ok((graphics, compute, transfer))
}

fn map_init_error(result: vk::Result, what: &str) -> GraphicsError {
    super::conversion::map_vk_error(result, what)
}
