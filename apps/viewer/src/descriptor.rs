use crate::context::*;
use arrayvec::ArrayVec;
use ember::prelude::{align_up, BindingKind, BindingSlot};
use spark::{vk, Builder};
use std::ptr;
use std::slice;

struct UniformDataPool {
    context: SharedContext,
    min_alignment: u32,
    size: u32,
    mem: vk::DeviceMemory,
    mapping: *mut u8,
    buffer: vk::Buffer,
    next_offset: u32,
}

// the mapping is only written through while the owning device state is locked
unsafe impl Send for UniformDataPool {}

impl UniformDataPool {
    fn new(context: &SharedContext, size: u32) -> spark::Result<Self> {
        let min_alignment = context
            .physical_device_properties
            .limits
            .min_uniform_buffer_offset_alignment as u32;
        let size = size.min(context.physical_device_properties.limits.max_uniform_buffer_range);

        let buffer = {
            let buffer_create_info = vk::BufferCreateInfo {
                size: vk::DeviceSize::from(size),
                usage: vk::BufferUsageFlags::UNIFORM_BUFFER,
                ..Default::default()
            };
            unsafe { context.device.create_buffer(&buffer_create_info, None) }?
        };
        let mem_req = unsafe { context.device.get_buffer_memory_requirements(buffer) };

        let mem = {
            let memory_type_index = context
                .get_memory_type_index(
                    mem_req.memory_type_bits,
                    vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                )
                .ok_or(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)?;
            let memory_allocate_info = vk::MemoryAllocateInfo {
                allocation_size: mem_req.size,
                memory_type_index,
                ..Default::default()
            };
            unsafe { context.device.allocate_memory(&memory_allocate_info, None) }?
        };
        unsafe { context.device.bind_buffer_memory(buffer, mem, 0) }?;
        let mapping = unsafe { context.device.map_memory(mem, 0, vk::WHOLE_SIZE, Default::default()) }?;

        Ok(Self {
            context: SharedContext::clone(context),
            min_alignment,
            size,
            mem,
            mapping: mapping as *mut _,
            buffer,
            next_offset: 0,
        })
    }

    fn begin_frame(&mut self) {
        self.next_offset = 0;
    }

    fn write(&mut self, data: &[u8]) -> Option<u32> {
        let base = self.next_offset;
        let end = base + data.len() as u32;
        if end <= self.size {
            unsafe { ptr::copy_nonoverlapping(data.as_ptr(), self.mapping.add(base as usize), data.len()) };
            self.next_offset = align_up(end, self.min_alignment);
            Some(base)
        } else {
            None
        }
    }
}

impl Drop for UniformDataPool {
    fn drop(&mut self) {
        unsafe {
            self.context.device.destroy_buffer(Some(self.buffer), None);
            self.context.device.unmap_memory(self.mem);
            self.context.device.free_memory(Some(self.mem), None);
        }
    }
}

pub fn descriptor_type(kind: BindingKind) -> vk::DescriptorType {
    match kind {
        BindingKind::UniformData { .. } => vk::DescriptorType::UNIFORM_BUFFER,
        BindingKind::AccelerationStructure => vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
        BindingKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        BindingKind::StorageImageRead | BindingKind::StorageImageWrite => vk::DescriptorType::STORAGE_IMAGE,
    }
}

pub fn create_descriptor_set_layout(
    context: &Context,
    bindings: &[BindingSlot],
) -> spark::Result<vk::DescriptorSetLayout> {
    let bindings_vk: Vec<_> = bindings
        .iter()
        .map(|binding| vk::DescriptorSetLayoutBinding {
            binding: binding.slot,
            descriptor_type: descriptor_type(binding.kind),
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::ALL,
            ..Default::default()
        })
        .collect();
    let create_info = vk::DescriptorSetLayoutCreateInfo::builder().p_bindings(&bindings_vk);
    unsafe { context.device.create_descriptor_set_layout(&create_info, None) }
}

pub const MAX_DESCRIPTORS_PER_SET: usize = 16;

pub enum DescriptorData<'a> {
    Uniform(&'a [u8]),
    Accel(vk::AccelerationStructureKHR),
    Buffer(vk::Buffer),
    Image(vk::ImageView),
}

pub struct DescriptorPool {
    context: SharedContext,
    pool: vk::DescriptorPool,
    uniform_data_pool: UniformDataPool,
}

impl DescriptorPool {
    const MAX_SETS_PER_FRAME: u32 = 64;
    const MAX_DESCRIPTORS_PER_FRAME: u32 = 512;
    const UNIFORM_DATA_SIZE: u32 = 64 * 1024;

    pub fn new(context: &SharedContext) -> spark::Result<Self> {
        let mut descriptor_pool_sizes = vec![
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                descriptor_count: Self::MAX_DESCRIPTORS_PER_FRAME,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: Self::MAX_SETS_PER_FRAME,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: Self::MAX_SETS_PER_FRAME,
            },
        ];
        if context.device.extensions.supports_khr_acceleration_structure() {
            descriptor_pool_sizes.push(vk::DescriptorPoolSize {
                ty: vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
                descriptor_count: Self::MAX_SETS_PER_FRAME,
            });
        }
        let descriptor_pool_create_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(Self::MAX_SETS_PER_FRAME)
            .p_pool_sizes(&descriptor_pool_sizes);
        let pool = unsafe {
            context
                .device
                .create_descriptor_pool(&descriptor_pool_create_info, None)
        }?;

        Ok(Self {
            context: SharedContext::clone(context),
            pool,
            uniform_data_pool: UniformDataPool::new(context, Self::UNIFORM_DATA_SIZE)?,
        })
    }

    pub fn begin_frame(&mut self) -> spark::Result<()> {
        unsafe {
            self.context
                .device
                .reset_descriptor_pool(self.pool, vk::DescriptorPoolResetFlags::empty())
        }?;
        self.uniform_data_pool.begin_frame();
        Ok(())
    }

    pub fn create_descriptor_set(
        &mut self,
        layout: vk::DescriptorSetLayout,
        bindings: &[BindingSlot],
        data: &[DescriptorData],
    ) -> spark::Result<vk::DescriptorSet> {
        if data.len() > MAX_DESCRIPTORS_PER_SET || data.len() != bindings.len() {
            return Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY);
        }
        let descriptor_set_allocate_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .p_set_layouts(slice::from_ref(&layout));
        let descriptor_set = unsafe {
            self.context
                .device
                .allocate_descriptor_sets_single(&descriptor_set_allocate_info)
        }?;

        let mut buffer_info = ArrayVec::<_, MAX_DESCRIPTORS_PER_SET>::new();
        let mut image_info = ArrayVec::<_, MAX_DESCRIPTORS_PER_SET>::new();
        let mut acceleration_structures = ArrayVec::<_, MAX_DESCRIPTORS_PER_SET>::new();
        let mut acceleration_structure_writes = ArrayVec::<_, MAX_DESCRIPTORS_PER_SET>::new();

        // fill the info arrays completely before taking pointers into them
        for data in data.iter() {
            match data {
                DescriptorData::Uniform(bytes) => {
                    let offset = self
                        .uniform_data_pool
                        .write(bytes)
                        .ok_or(vk::Result::ERROR_OUT_OF_POOL_MEMORY)?;
                    buffer_info.push(vk::DescriptorBufferInfo {
                        buffer: Some(self.uniform_data_pool.buffer),
                        offset: vk::DeviceSize::from(offset),
                        range: bytes.len() as vk::DeviceSize,
                    });
                }
                DescriptorData::Buffer(buffer) => buffer_info.push(vk::DescriptorBufferInfo {
                    buffer: Some(*buffer),
                    offset: 0,
                    range: vk::WHOLE_SIZE,
                }),
                DescriptorData::Image(image_view) => image_info.push(vk::DescriptorImageInfo {
                    sampler: None,
                    image_view: Some(*image_view),
                    image_layout: vk::ImageLayout::GENERAL,
                }),
                DescriptorData::Accel(accel) => acceleration_structures.push(*accel),
            }
        }
        for accel in acceleration_structures.iter() {
            acceleration_structure_writes.push(vk::WriteDescriptorSetAccelerationStructureKHR {
                acceleration_structure_count: 1,
                p_acceleration_structures: accel,
                ..Default::default()
            });
        }

        let mut writes = ArrayVec::<_, MAX_DESCRIPTORS_PER_SET>::new();
        let (mut next_buffer, mut next_image, mut next_accel) = (0, 0, 0);
        for (binding, data) in bindings.iter().zip(data.iter()) {
            let mut write = vk::WriteDescriptorSet {
                dst_set: Some(descriptor_set),
                dst_binding: binding.slot,
                descriptor_count: 1,
                descriptor_type: descriptor_type(binding.kind),
                ..Default::default()
            };
            match data {
                DescriptorData::Uniform(_) | DescriptorData::Buffer(_) => {
                    write.p_buffer_info = &buffer_info[next_buffer];
                    next_buffer += 1;
                }
                DescriptorData::Image(_) => {
                    write.p_image_info = &image_info[next_image];
                    next_image += 1;
                }
                DescriptorData::Accel(_) => {
                    write.p_next = &acceleration_structure_writes[next_accel] as *const _ as *const _;
                    next_accel += 1;
                }
            }
            writes.push(write);
        }

        unsafe { self.context.device.update_descriptor_sets(&writes, &[]) };

        Ok(descriptor_set)
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.context.device.destroy_descriptor_pool(Some(self.pool), None);
        }
    }
}
