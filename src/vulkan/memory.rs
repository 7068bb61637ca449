use ash::{Device, vk};
use bytemuck::Pod;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc};
use gpu_allocator::{AllocationSizes, MemoryLocation};
use crate::error::{Result, ShapeletError};
use std::sync::{Mutex, MutexGuard};

pub struct VulkanBuffer {
    pub buffer: vk::Buffer,
    pub allocation: Option<Allocation>,
    pub size: u64,
}

/// Host-visible storage buffers backed by `gpu-allocator`.
pub struct VulkanMemoryManager {
    device: Device,
    allocator: Mutex<Allocator>,
}

impl std::fmt::Debug for VulkanMemoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanMemoryManager")
            .field("device", &self.device.handle())
            .finish()
    }
}

impl VulkanMemoryManager {
    pub fn new(instance: &ash::Instance, device: Device, physical_device: vk::PhysicalDevice) -> Result<Self> {
        let debug_settings = gpu_allocator::AllocatorDebugSettings {
            log_leaks_on_shutdown: true,
            ..Default::default()
        };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings,
            buffer_device_address: false,
            allocation_sizes: AllocationSizes::default(),
        })?;

        Ok(Self {
            device,
            allocator: Mutex::new(allocator),
        })
    }

    fn allocator(&self) -> MutexGuard<'_, Allocator> {
        self.allocator.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create a storage buffer of `size` bytes in `memory_location`.
    pub fn create_storage_buffer(&self, size: u64, memory_location: MemoryLocation, name: &str) -> Result<VulkanBuffer> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(vk::BufferUsageFlags::STORAGE_BUFFER)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }?;
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocation = match self.allocator().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: memory_location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e.into());
            }
        };

        let bound = unsafe { self.device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) };
        if let Err(e) = bound {
            let _ = self.allocator().free(allocation);
            unsafe { self.device.destroy_buffer(buffer, None) };
            return Err(e.into());
        }

        Ok(VulkanBuffer {
            buffer,
            allocation: Some(allocation),
            size,
        })
    }

    /// Copy `data` into a host-visible buffer.
    pub fn upload_data<T: Pod>(&self, buffer: &VulkanBuffer, data: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let target = Self::mapped(buffer, bytes.len())?;
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), target, bytes.len()) };
        Ok(())
    }

    /// Copy the start of a host-visible buffer into `data`.
    pub fn device_to_host<T: Pod>(&self, buffer: &VulkanBuffer, data: &mut [T]) -> Result<()> {
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(data);
        let source = Self::mapped(buffer, bytes.len())?;
        unsafe { std::ptr::copy_nonoverlapping(source, bytes.as_mut_ptr(), bytes.len()) };
        Ok(())
    }

    /// Start of the host mapping, after checking that `len` bytes fit.
    fn mapped(buffer: &VulkanBuffer, len: usize) -> Result<*mut u8> {
        if len as u64 > buffer.size {
            return Err(ShapeletError::InvalidInput(format!(
                "{} bytes do not fit a {} byte buffer",
                len, buffer.size
            )));
        }
        buffer
            .allocation
            .as_ref()
            .and_then(|allocation| allocation.mapped_ptr())
            .map(|ptr| ptr.as_ptr() as *mut u8)
            .ok_or(ShapeletError::VulkanError(vk::Result::ERROR_MEMORY_MAP_FAILED))
    }

    pub fn destroy_buffer(&self, buffer: VulkanBuffer) -> Result<()> {
        unsafe {
            self.device.destroy_buffer(buffer.buffer, None);
        }
        if let Some(allocation) = buffer.allocation {
            self.allocator().free(allocation)?;
        }
        Ok(())
    }
}
