use crate::context::*;
use log::debug;
use spark::{vk, Builder};
use std::ptr::NonNull;

#[derive(Clone, Copy)]
pub struct Alloc {
    pub mem: vk::DeviceMemory,
    pub offset: vk::DeviceSize,
    pub mapping: Option<NonNull<u8>>,
}

struct Chunk {
    context: SharedContext,
    memory_type_index: u32,
    mem: vk::DeviceMemory,
    mapping: Option<NonNull<u8>>,
    size: vk::DeviceSize,
    offset: vk::DeviceSize,
}

// the mapping is only written through while the owning device state is locked
unsafe impl Send for Chunk {}

impl Chunk {
    fn new(
        context: &SharedContext,
        memory_type_index: u32,
        size: vk::DeviceSize,
        host_visible: bool,
    ) -> spark::Result<Self> {
        let mem = {
            let mut memory_allocate_info = vk::MemoryAllocateInfo::builder()
                .allocation_size(size)
                .memory_type_index(memory_type_index);

            let mut flags_info = vk::MemoryAllocateFlagsInfo {
                flags: vk::MemoryAllocateFlagsKHR::DEVICE_ADDRESS_KHR,
                ..Default::default()
            };
            if context.supports(ember::prelude::Capability::BufferDeviceAddress) {
                memory_allocate_info = memory_allocate_info.insert_next(&mut flags_info);
            }

            unsafe { context.device.allocate_memory(&memory_allocate_info, None) }?
        };
        let mapping = if host_visible {
            let ptr = unsafe { context.device.map_memory(mem, 0, vk::WHOLE_SIZE, Default::default()) }?;
            NonNull::new(ptr as *mut u8)
        } else {
            None
        };
        Ok(Self {
            context: SharedContext::clone(context),
            memory_type_index,
            mem,
            mapping,
            size,
            offset: 0,
        })
    }

    fn allocate(&mut self, mem_req: &vk::MemoryRequirements) -> Option<Alloc> {
        let alignment_mask = mem_req.alignment - 1;
        let offset = (self.offset + alignment_mask) & !alignment_mask;
        let next_offset = offset + mem_req.size;
        if next_offset <= self.size {
            self.offset = next_offset;
            Some(Alloc {
                mem: self.mem,
                offset,
                mapping: self
                    .mapping
                    .and_then(|base| NonNull::new(unsafe { base.as_ptr().add(offset as usize) })),
            })
        } else {
            None
        }
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        unsafe {
            if self.mapping.is_some() {
                self.context.device.unmap_memory(self.mem);
            }
            self.context.device.free_memory(Some(self.mem), None);
        }
    }
}

/// Linear allocator over large memory chunks, freed only when dropped.
pub struct Allocator {
    context: SharedContext,
    chunks: Vec<Chunk>,
    chunk_size: vk::DeviceSize,
}

impl Allocator {
    pub fn new(context: &SharedContext, chunk_size: vk::DeviceSize) -> Self {
        Self {
            context: SharedContext::clone(context),
            chunks: Vec::new(),
            chunk_size,
        }
    }

    pub fn allocate(
        &mut self,
        mem_req: &vk::MemoryRequirements,
        memory_property_flags: vk::MemoryPropertyFlags,
    ) -> spark::Result<Alloc> {
        let memory_type_index = self
            .context
            .get_memory_type_index(mem_req.memory_type_bits, memory_property_flags)
            .ok_or(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)?;
        let host_visible = memory_property_flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE);
        for chunk in self.chunks.iter_mut() {
            if chunk.memory_type_index == memory_type_index && chunk.mapping.is_some() == host_visible {
                if let Some(alloc) = chunk.allocate(mem_req) {
                    return Ok(alloc);
                }
            }
        }
        let mut alloc_size = self.chunk_size;
        if alloc_size < mem_req.size {
            alloc_size = mem_req.size.next_power_of_two();
            debug!("allocator: adding large chunk size {} MB", alloc_size / (1024 * 1024));
        }
        let mut chunk = Chunk::new(&self.context, memory_type_index, alloc_size, host_visible)?;
        let alloc = chunk.allocate(mem_req).ok_or(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)?;
        self.chunks.push(chunk);
        Ok(alloc)
    }
}
