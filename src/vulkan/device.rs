use ash::{Device, Instance, vk};
use log::{debug, info};
use crate::error::{Result, ShapeletError};
use std::ffi::CStr;

/// A logical device on the first GPU that offers a compute queue and
/// double-precision shader arithmetic.
pub struct VulkanDevice {
    pub physical_device: vk::PhysicalDevice,
    pub device: Device,
    pub compute_queue: vk::Queue,
    pub compute_queue_family_index: u32,
    pub device_properties: vk::PhysicalDeviceProperties,
}

impl std::fmt::Debug for VulkanDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanDevice")
            .field("physical_device", &self.physical_device)
            .field("compute_queue_family_index", &self.compute_queue_family_index)
            .finish()
    }
}

impl VulkanDevice {
    pub fn new(instance: &Instance) -> Result<Self> {
        let physical_devices = unsafe { instance.enumerate_physical_devices() }?;

        let (physical_device, compute_queue_family_index) = physical_devices
            .iter()
            .filter(|&&device| Self::supports_float64(instance, device))
            .find_map(|&device| Self::find_compute_queue_family(instance, device).map(|index| (device, index)))
            .ok_or(ShapeletError::NoGpuFound)?;

        info!("Selected GPU: {}", Self::get_device_name(instance, physical_device));

        let device_properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let limits = &device_properties.limits;
        debug!(
            "   Max compute workgroup count: {}, invocations: {}",
            limits.max_compute_work_group_count[0], limits.max_compute_work_group_invocations
        );
        debug!("   Max storage buffer range: {} MB", limits.max_storage_buffer_range / (1024 * 1024));

        let queue_priorities = [1.0];
        let queue_create_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(compute_queue_family_index)
            .queue_priorities(&queue_priorities);

        let features = vk::PhysicalDeviceFeatures {
            shader_float64: vk::TRUE,
            ..Default::default()
        };

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_features(&features);

        let device = unsafe { instance.create_device(physical_device, &device_create_info, None) }?;
        let compute_queue = unsafe { device.get_device_queue(compute_queue_family_index, 0) };

        Ok(Self {
            physical_device,
            device,
            compute_queue,
            compute_queue_family_index,
            device_properties,
        })
    }

    fn supports_float64(instance: &Instance, device: vk::PhysicalDevice) -> bool {
        let features = unsafe { instance.get_physical_device_features(device) };
        if features.shader_float64 != vk::TRUE {
            debug!("Skipping {}: no shaderFloat64", Self::get_device_name(instance, device));
            return false;
        }
        true
    }

    fn find_compute_queue_family(instance: &Instance, device: vk::PhysicalDevice) -> Option<u32> {
        let queue_family_properties = unsafe { instance.get_physical_device_queue_family_properties(device) };

        queue_family_properties
            .iter()
            .position(|properties| properties.queue_flags.contains(vk::QueueFlags::COMPUTE))
            .map(|index| index as u32)
    }

    fn get_device_name(instance: &Instance, device: vk::PhysicalDevice) -> String {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let device_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
        device_name.to_string_lossy().into_owned()
    }

    /// Largest number of workgroups a single dispatch may request along x.
    pub fn max_workgroup_count(&self) -> u32 {
        self.device_properties.limits.max_compute_work_group_count[0]
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_device(None);
        }
    }
}
