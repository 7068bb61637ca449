//! Response distance on the GPU: one compute invocation per test vector.

use ash::vk;
use gpu_allocator::MemoryLocation;
use log::{debug, info};
use std::sync::Mutex;

use super::{DistanceBackend, check_vector_sets};
use crate::error::{Result, ShapeletError};
use crate::vulkan::{VulkanBuffer, VulkanDevice, VulkanInstance, VulkanMemoryManager};

static SHADER_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/min_distance.spv"));

const WORKGROUP_SIZE: u32 = 256;

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct PushConstants {
    num_tests: u32,
    num_refs: u32,
    depth: u32,
}

/// Vulkan compute backend.
///
/// Handles start out null and are filled in as construction proceeds, so a
/// failure half way through releases exactly what was created.
pub struct VulkanBackend {
    command_pool: vk::CommandPool,
    descriptor_pool: vk::DescriptorPool,
    descriptor_set_layout: vk::DescriptorSetLayout,
    descriptor_set: vk::DescriptorSet,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    /// One dispatch at a time: the descriptor set and command pool are shared.
    dispatch_lock: Mutex<()>,
    // drop order: allocator before the device, device before the instance
    memory_manager: VulkanMemoryManager,
    device: VulkanDevice,
    _instance: VulkanInstance,
}

impl std::fmt::Debug for VulkanBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBackend").field("device", &self.device).finish()
    }
}

impl VulkanBackend {
    pub fn new() -> Result<Self> {
        info!("Initialising Vulkan response distance backend");
        let shader_code = spirv_words(SHADER_SPV)?;

        let instance = VulkanInstance::new(false)?;
        let device = VulkanDevice::new(&instance.instance)?;
        let memory_manager =
            VulkanMemoryManager::new(&instance.instance, device.device.clone(), device.physical_device)?;

        let mut backend = Self {
            command_pool: vk::CommandPool::null(),
            descriptor_pool: vk::DescriptorPool::null(),
            descriptor_set_layout: vk::DescriptorSetLayout::null(),
            descriptor_set: vk::DescriptorSet::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            dispatch_lock: Mutex::new(()),
            memory_manager,
            device,
            _instance: instance,
        };
        let vk_device = backend.device.device.clone();

        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(backend.device.compute_queue_family_index);
        backend.command_pool = unsafe { vk_device.create_command_pool(&pool_info, None) }?;

        let bindings: Vec<_> = (0..3)
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::COMPUTE)
            })
            .collect();
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        backend.descriptor_set_layout = unsafe { vk_device.create_descriptor_set_layout(&layout_info, None) }?;

        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_BUFFER,
            descriptor_count: 3,
        }];
        let descriptor_pool_info = vk::DescriptorPoolCreateInfo::default().max_sets(1).pool_sizes(&pool_sizes);
        backend.descriptor_pool = unsafe { vk_device.create_descriptor_pool(&descriptor_pool_info, None) }?;

        let set_layouts = [backend.descriptor_set_layout];
        let allocate_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(backend.descriptor_pool)
            .set_layouts(&set_layouts);
        backend.descriptor_set = unsafe { vk_device.allocate_descriptor_sets(&allocate_info) }?
            .first()
            .copied()
            .ok_or(ShapeletError::VulkanError(vk::Result::ERROR_OUT_OF_POOL_MEMORY))?;

        let push_constant_ranges = [vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .offset(0)
            .size(std::mem::size_of::<PushConstants>() as u32)];
        let pipeline_layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constant_ranges);
        backend.pipeline_layout = unsafe { vk_device.create_pipeline_layout(&pipeline_layout_info, None) }?;

        let module_info = vk::ShaderModuleCreateInfo::default().code(&shader_code);
        let shader_module = unsafe { vk_device.create_shader_module(&module_info, None) }?;
        let stage_info = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(shader_module)
            .name(c"main");
        let pipeline_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage_info)
            .layout(backend.pipeline_layout);
        let pipelines =
            unsafe { vk_device.create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None) };
        unsafe { vk_device.destroy_shader_module(shader_module, None) };
        backend.pipeline = pipelines
            .map_err(ShapeletError::PipelineCreationError)?
            .first()
            .copied()
            .ok_or(ShapeletError::VulkanError(vk::Result::ERROR_INITIALIZATION_FAILED))?;

        Ok(backend)
    }

    fn dispatch(&self, tests: &VulkanBuffer, refs: &VulkanBuffer, out: &VulkanBuffer, pc: PushConstants) -> Result<()> {
        let device = &self.device.device;

        let buffer_infos = [tests, refs, out].map(|b| {
            [vk::DescriptorBufferInfo::default()
                .buffer(b.buffer)
                .offset(0)
                .range(vk::WHOLE_SIZE)]
        });
        let descriptor_writes: Vec<_> = buffer_infos
            .iter()
            .enumerate()
            .map(|(binding, info)| {
                vk::WriteDescriptorSet::default()
                    .dst_set(self.descriptor_set)
                    .dst_binding(binding as u32)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .buffer_info(info)
            })
            .collect();
        unsafe { device.update_descriptor_sets(&descriptor_writes, &[]) };

        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd_buffers = unsafe { device.allocate_command_buffers(&allocate_info) }?;
        let fence = match unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None) } {
            Ok(fence) => fence,
            Err(e) => {
                unsafe { device.free_command_buffers(self.command_pool, &cmd_buffers) };
                return Err(e.into());
            }
        };

        let submitted = self.record_and_submit(&cmd_buffers, fence, pc);

        unsafe {
            device.destroy_fence(fence, None);
            device.free_command_buffers(self.command_pool, &cmd_buffers);
        }
        submitted
    }

    fn record_and_submit(&self, cmd_buffers: &[vk::CommandBuffer], fence: vk::Fence, pc: PushConstants) -> Result<()> {
        let device = &self.device.device;
        let cmd_buffer = cmd_buffers[0];
        let workgroups = pc.num_tests.div_ceil(WORKGROUP_SIZE);
        debug!(
            "Dispatching {} workgroups for {} tests against {} references",
            workgroups, pc.num_tests, pc.num_refs
        );

        unsafe {
            let begin_info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device.begin_command_buffer(cmd_buffer, &begin_info)?;
            device.cmd_bind_pipeline(cmd_buffer, vk::PipelineBindPoint::COMPUTE, self.pipeline);
            device.cmd_bind_descriptor_sets(
                cmd_buffer,
                vk::PipelineBindPoint::COMPUTE,
                self.pipeline_layout,
                0,
                &[self.descriptor_set],
                &[],
            );
            device.cmd_push_constants(
                cmd_buffer,
                self.pipeline_layout,
                vk::ShaderStageFlags::COMPUTE,
                0,
                bytemuck::bytes_of(&pc),
            );
            device.cmd_dispatch(cmd_buffer, workgroups, 1, 1);
            device.end_command_buffer(cmd_buffer)?;

            let submit_info = vk::SubmitInfo::default().command_buffers(cmd_buffers);
            device.queue_submit(self.device.compute_queue, &[submit_info], fence)?;
            device.wait_for_fences(&[fence], true, u64::MAX)?;
        }
        Ok(())
    }
}

impl DistanceBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        "vulkan"
    }

    fn min_distances(&self, refs: &[f64], tests: &[f64], depth: usize) -> Result<Vec<f64>> {
        check_vector_sets(refs, tests, depth)?;
        let num_tests = tests.len() / depth;
        if num_tests == 0 {
            return Ok(Vec::new());
        }
        let too_large = |what: &str| ShapeletError::InvalidInput(format!("{} exceeds the GPU dispatch range", what));
        let pc = PushConstants {
            num_tests: u32::try_from(num_tests).map_err(|_| too_large("test count"))?,
            num_refs: u32::try_from(refs.len() / depth).map_err(|_| too_large("reference count"))?,
            depth: u32::try_from(depth).map_err(|_| too_large("depth"))?,
        };
        if pc.num_tests.div_ceil(WORKGROUP_SIZE) > self.device.max_workgroup_count() {
            return Err(too_large("workgroup count"));
        }

        let _guard = self.dispatch_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let bytes = |len: usize| (len * std::mem::size_of::<f64>()) as u64;

        let mut buffers = Vec::with_capacity(3);
        let result = (|| -> Result<Vec<f64>> {
            buffers.push(self.memory_manager.create_storage_buffer(bytes(tests.len()), MemoryLocation::CpuToGpu, "tests")?);
            buffers.push(self.memory_manager.create_storage_buffer(bytes(refs.len()), MemoryLocation::CpuToGpu, "refs")?);
            buffers.push(self.memory_manager.create_storage_buffer(bytes(num_tests), MemoryLocation::GpuToCpu, "distances")?);
            self.memory_manager.upload_data(&buffers[0], tests)?;
            self.memory_manager.upload_data(&buffers[1], refs)?;

            self.dispatch(&buffers[0], &buffers[1], &buffers[2], pc)?;

            let mut distances = vec![0.0f64; num_tests];
            self.memory_manager.device_to_host(&buffers[2], &mut distances)?;
            Ok(distances)
        })();

        for buffer in buffers {
            self.memory_manager.destroy_buffer(buffer)?;
        }
        result
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        let device = &self.device.device;
        // destroying a null handle is a no-op
        unsafe {
            let _ = device.device_wait_idle();
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            device.destroy_descriptor_pool(self.descriptor_pool, None);
            device.destroy_descriptor_set_layout(self.descriptor_set_layout, None);
            device.destroy_command_pool(self.command_pool, None);
        }
    }
}

/// Reinterpret SPIR-V bytes as words, rejecting the empty placeholder left
/// when no shader compiler was available at build time.
fn spirv_words(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.is_empty() {
        return Err(ShapeletError::ShaderUnavailable(
            "min_distance.spv was not compiled (shaderc missing at build time)".to_string(),
        ));
    }
    if bytes.len() % 4 != 0 {
        return Err(ShapeletError::ShaderUnavailable(format!(
            "SPIR-V length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
