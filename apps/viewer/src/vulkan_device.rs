use crate::{allocator::*, command_buffer::*, context::*, descriptor::*, pipeline::*, swapchain::*};
use bytemuck::{Pod, Zeroable};
use ember::prelude::*;
use log::{debug, info, warn};
use slotmap::SlotMap;
use spark::vk;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::{mem, ptr, slice};

// vk::AccelerationStructureInstanceKHR with Pod trait
#[repr(C)]
#[derive(Clone, Copy, Zeroable, Pod)]
struct AccelerationStructureInstance {
    transform: [f32; 12],
    instance_custom_index_and_mask: u32,
    instance_shader_binding_table_record_offset_and_flags: u32,
    acceleration_structure_reference: u64,
}

#[derive(Clone, Copy)]
struct BufferEntry {
    buffer: vk::Buffer,
}

#[derive(Clone, Copy)]
struct ImageEntry {
    desc: ImageDesc,
    image: vk::Image,
    view: vk::ImageView,
}

#[derive(Clone, Copy)]
struct AccelEntry {
    accel: vk::AccelerationStructureKHR,
    buffer: vk::Buffer,
    address: vk::DeviceAddress,
}

#[derive(Clone, Copy)]
struct ShaderBindingTable {
    buffer: vk::Buffer,
    raygen: vk::StridedDeviceAddressRegionKHR,
    miss: vk::StridedDeviceAddressRegionKHR,
    hit: vk::StridedDeviceAddressRegionKHR,
}

#[derive(Clone, Copy)]
struct ProgramEntry {
    desc: ProgramDesc,
    set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    shader_binding_table: Option<ShaderBindingTable>,
}

struct Frame {
    cmd: vk::CommandBuffer,
    swap_image_index: Option<u32>,
    status: SurfaceStatus,
}

fn creation_error(what: &'static str) -> impl FnOnce(vk::Result) -> Error {
    move |err| Error::ResourceCreation {
        what,
        reason: err.to_string(),
    }
}

fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn color_subresource_layers() -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level: 0,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn clear_color_value(value: ClearValue) -> vk::ClearColorValue {
    match value {
        ClearValue::Float(float32) => vk::ClearColorValue { float32 },
        ClearValue::Uint(uint32) => vk::ClearColorValue { uint32 },
    }
}

fn image_barrier(
    image: vk::Image,
    src_access_mask: vk::AccessFlags,
    dst_access_mask: vk::AccessFlags,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> vk::ImageMemoryBarrier {
    vk::ImageMemoryBarrier {
        src_access_mask,
        dst_access_mask,
        old_layout,
        new_layout,
        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        image: Some(image),
        subresource_range: color_subresource_range(),
        ..Default::default()
    }
}

fn global_barrier(context: &Context, cmd: vk::CommandBuffer) {
    let memory_barrier = vk::MemoryBarrier {
        src_access_mask: vk::AccessFlags::MEMORY_WRITE,
        dst_access_mask: vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
        ..Default::default()
    };
    unsafe {
        context.device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::DependencyFlags::empty(),
            slice::from_ref(&memory_barrier),
            &[],
            &[],
        )
    };
}

struct DeviceState {
    context: SharedContext,
    frame: Option<Frame>,
    programs: SlotMap<ProgramId, ProgramEntry>,
    accels: SlotMap<AccelId, AccelEntry>,
    images: SlotMap<ImageId, ImageEntry>,
    buffers: SlotMap<BufferId, BufferEntry>,
    descriptor_pool: DescriptorPool,
    swapchain: Swapchain,
    command_buffers: CommandBufferPool,
    allocator: Allocator,
}

impl DeviceState {
    fn device_address_usage(&self) -> vk::BufferUsageFlags {
        if self.context.supports(Capability::BufferDeviceAddress) {
            vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS_KHR
        } else {
            vk::BufferUsageFlags::empty()
        }
    }

    fn create_vk_buffer(
        &mut self,
        size: usize,
        usage: vk::BufferUsageFlags,
        min_alignment: vk::DeviceSize,
        contents: Option<&[u8]>,
    ) -> spark::Result<vk::Buffer> {
        let device = &self.context.device;
        let buffer_create_info = vk::BufferCreateInfo {
            size: size.max(mem::size_of::<u32>()) as vk::DeviceSize,
            usage,
            ..Default::default()
        };
        let buffer = unsafe { device.create_buffer(&buffer_create_info, None) }?;

        let mut mem_req = unsafe { device.get_buffer_memory_requirements(buffer) };
        mem_req.alignment = mem_req.alignment.max(min_alignment);
        let memory_property_flags = if contents.is_some() {
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
        } else {
            vk::MemoryPropertyFlags::DEVICE_LOCAL
        };
        let bound = self
            .allocator
            .allocate(&mem_req, memory_property_flags)
            .and_then(|alloc| unsafe { device.bind_buffer_memory(buffer, alloc.mem, alloc.offset) }.map(|_| alloc));
        let alloc = match bound {
            Ok(alloc) => alloc,
            Err(err) => {
                unsafe { device.destroy_buffer(Some(buffer), None) };
                return Err(err);
            }
        };

        if let Some(contents) = contents {
            let mapping = alloc.mapping.ok_or(vk::Result::ERROR_MEMORY_MAP_FAILED)?;
            let len = contents.len().min(size);
            unsafe { ptr::copy_nonoverlapping(contents.as_ptr(), mapping.as_ptr(), len) };
        }
        Ok(buffer)
    }

    fn buffer_address(&self, buffer: vk::Buffer) -> vk::DeviceAddress {
        unsafe { self.context.device.get_buffer_device_address_helper(buffer) }
    }

    fn build_accel(
        &mut self,
        ty: vk::AccelerationStructureTypeKHR,
        geometry: &vk::AccelerationStructureGeometryKHR,
        primitive_count: u32,
    ) -> spark::Result<AccelEntry> {
        let sizes = {
            let build_info = vk::AccelerationStructureBuildGeometryInfoKHR {
                ty,
                flags: vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE,
                mode: vk::BuildAccelerationStructureModeKHR::BUILD,
                geometry_count: 1,
                p_geometries: geometry,
                ..Default::default()
            };
            let mut sizes = vk::AccelerationStructureBuildSizesInfoKHR::default();
            unsafe {
                self.context.device.get_acceleration_structure_build_sizes_khr(
                    vk::AccelerationStructureBuildTypeKHR::DEVICE,
                    &build_info,
                    Some(slice::from_ref(&primitive_count)),
                    &mut sizes,
                )
            };
            sizes
        };
        debug!(
            "{} accel: {} bytes, {} bytes scratch",
            ty, sizes.acceleration_structure_size, sizes.build_scratch_size
        );

        let address_usage = self.device_address_usage();
        let buffer = self.create_vk_buffer(
            sizes.acceleration_structure_size as usize,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR | address_usage,
            0,
            None,
        )?;
        let accel = {
            let create_info = vk::AccelerationStructureCreateInfoKHR {
                buffer: Some(buffer),
                size: sizes.acceleration_structure_size,
                ty,
                ..Default::default()
            };
            unsafe { self.context.device.create_acceleration_structure_khr(&create_info, None) }?
        };

        let scratch_alignment = vk::DeviceSize::from(self.context.ray_tracing_properties.min_scratch_offset_alignment);
        let scratch_buffer = self.create_vk_buffer(
            sizes.build_scratch_size as usize,
            vk::BufferUsageFlags::STORAGE_BUFFER | address_usage,
            scratch_alignment,
            None,
        )?;
        let scratch_address = self.buffer_address(scratch_buffer);

        let context = &self.context;
        let built = self.command_buffers.run_setup(|cmd| {
            let build_info = vk::AccelerationStructureBuildGeometryInfoKHR {
                ty,
                flags: vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE,
                mode: vk::BuildAccelerationStructureModeKHR::BUILD,
                dst_acceleration_structure: Some(accel),
                geometry_count: 1,
                p_geometries: geometry,
                scratch_data: vk::DeviceOrHostAddressKHR {
                    device_address: scratch_address,
                },
                ..Default::default()
            };
            let build_range_info = vk::AccelerationStructureBuildRangeInfoKHR {
                primitive_count,
                primitive_offset: 0,
                first_vertex: 0,
                transform_offset: 0,
            };
            unsafe {
                context
                    .device
                    .cmd_build_acceleration_structures_khr(cmd, slice::from_ref(&build_info), &[&build_range_info])
            };
        });
        unsafe { self.context.device.destroy_buffer(Some(scratch_buffer), None) };
        if let Err(err) = built {
            unsafe {
                self.context.device.destroy_acceleration_structure_khr(Some(accel), None);
                self.context.device.destroy_buffer(Some(buffer), None);
            }
            return Err(err);
        }

        let address = {
            let info = vk::AccelerationStructureDeviceAddressInfoKHR {
                acceleration_structure: Some(accel),
                ..Default::default()
            };
            unsafe { self.context.device.get_acceleration_structure_device_address_khr(&info) }
        };
        Ok(AccelEntry { accel, buffer, address })
    }

    fn create_shader_binding_table(&mut self, pipeline: vk::Pipeline) -> spark::Result<ShaderBindingTable> {
        let properties = &self.context.ray_tracing_properties;
        let layout = ShaderBindingTableLayout::new(properties);
        let handle_size = properties.shader_group_handle_size;
        let base_alignment = vk::DeviceSize::from(properties.shader_group_base_alignment);

        let handles = get_shader_group_handles(&self.context, pipeline)?;
        let table = layout.write(handle_size, &handles);
        let usage = vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR | self.device_address_usage();
        let buffer = self.create_vk_buffer(table.len(), usage, base_alignment, Some(&table))?;
        let base_address = self.buffer_address(buffer);

        Ok(ShaderBindingTable {
            buffer,
            raygen: layout.raygen.strided(base_address),
            miss: layout.miss.strided(base_address),
            hit: layout.hit.strided(base_address),
        })
    }

    fn destroy_program_entry(&self, entry: &ProgramEntry) {
        let device = &self.context.device;
        unsafe {
            if let Some(table) = entry.shader_binding_table {
                device.destroy_buffer(Some(table.buffer), None);
            }
            device.destroy_pipeline(Some(entry.pipeline), None);
            device.destroy_pipeline_layout(Some(entry.pipeline_layout), None);
            device.destroy_descriptor_set_layout(Some(entry.set_layout), None);
        }
    }

    fn create_program(&mut self, desc: &ProgramDesc, loader: &ShaderLoader) -> Result<ProgramEntry> {
        let set_layout = create_descriptor_set_layout(&self.context, desc.bindings)
            .map_err(creation_error("descriptor set layout"))?;
        let pipeline_layout = match create_pipeline_layout(&self.context, set_layout) {
            Ok(pipeline_layout) => pipeline_layout,
            Err(err) => {
                unsafe { self.context.device.destroy_descriptor_set_layout(Some(set_layout), None) };
                return Err(creation_error("pipeline layout")(err));
            }
        };
        let cleanup_layouts = |context: &Context| unsafe {
            context.device.destroy_pipeline_layout(Some(pipeline_layout), None);
            context.device.destroy_descriptor_set_layout(Some(set_layout), None);
        };

        let pipeline = if desc.program.is_ray_tracing() {
            create_ray_tracing_pipeline(&self.context, loader, pipeline_layout)
        } else {
            create_compute_pipeline(&self.context, loader, desc.program, pipeline_layout)
        };
        let pipeline = match pipeline {
            Ok(pipeline) => pipeline,
            Err(reason) => {
                cleanup_layouts(&self.context);
                return Err(Error::ProgramResolution {
                    program: desc.program,
                    reason,
                });
            }
        };

        let shader_binding_table = if desc.program.is_ray_tracing() {
            match self.create_shader_binding_table(pipeline) {
                Ok(table) => Some(table),
                Err(err) => {
                    unsafe { self.context.device.destroy_pipeline(Some(pipeline), None) };
                    cleanup_layouts(&self.context);
                    return Err(creation_error("shader binding table")(err));
                }
            }
        } else {
            None
        };

        Ok(ProgramEntry {
            desc: *desc,
            set_layout,
            pipeline_layout,
            pipeline,
            shader_binding_table,
        })
    }

    fn frame_cmd(&self) -> Result<vk::CommandBuffer> {
        self.frame
            .as_ref()
            .map(|frame| frame.cmd)
            .ok_or_else(|| Error::Submit("no frame is being recorded".to_owned()))
    }

    fn image(&self, id: ImageId) -> Result<ImageEntry> {
        self.images.get(id).copied().ok_or(Error::UnknownResource("image"))
    }

    fn descriptor_data<'a>(&self, bound: &BoundSet<'a>) -> Result<Vec<DescriptorData<'a>>> {
        bound
            .entries()
            .iter()
            .map(|entry| match entry.resource {
                BoundResource::Uniform(bytes) => Ok(DescriptorData::Uniform(bytes)),
                BoundResource::Accel(id) => self
                    .accels
                    .get(id)
                    .map(|accel| DescriptorData::Accel(accel.accel))
                    .ok_or(Error::UnknownResource("acceleration structure")),
                BoundResource::Buffer(id) => self
                    .buffers
                    .get(id)
                    .map(|buffer| DescriptorData::Buffer(buffer.buffer))
                    .ok_or(Error::UnknownResource("buffer")),
                BoundResource::Image(id) => self.image(id).map(|image| DescriptorData::Image(image.view)),
            })
            .collect()
    }

    /// Validates the entries and binds the pipeline with a freshly written descriptor set.
    fn bind_program(
        &mut self,
        pass: &'static str,
        id: ProgramId,
        entries: &[BindingEntry],
        bind_point: vk::PipelineBindPoint,
    ) -> Result<(vk::CommandBuffer, ProgramEntry)> {
        let cmd = self.frame_cmd()?;
        let program = *self.programs.get(id).ok_or(Error::UnknownResource("program"))?;
        let expects_ray_tracing = bind_point == vk::PipelineBindPoint::RAY_TRACING_KHR;
        if program.desc.program.is_ray_tracing() != expects_ray_tracing {
            return Err(Error::ProgramResolution {
                program: program.desc.program,
                reason: format!("cannot be run by pass {}", pass),
            });
        }

        let bound = bind_resources(pass, program.desc.bindings, entries)?;
        let data = self.descriptor_data(&bound)?;
        let descriptor_set = self
            .descriptor_pool
            .create_descriptor_set(program.set_layout, program.desc.bindings, &data)
            .map_err(|err| Error::Submit(format!("{}: descriptor set: {}", pass, err)))?;

        let device = &self.context.device;
        unsafe {
            device.cmd_bind_pipeline(cmd, bind_point, program.pipeline);
            device.cmd_bind_descriptor_sets(
                cmd,
                bind_point,
                program.pipeline_layout,
                0,
                slice::from_ref(&descriptor_set),
                &[],
            );
        }
        Ok((cmd, program))
    }

    /// The swapchain keeps its startup size, so a surface that stops matching it is
    /// only reported. An out of date surface renders the frame without an image.
    fn acquire(&mut self) -> Result<(Option<u32>, SurfaceStatus)> {
        let semaphore = self.command_buffers.image_available_semaphore();
        let result = self
            .swapchain
            .acquire(semaphore)
            .map_err(|err| Error::Acquire(err.to_string()))?;
        Ok(match result {
            SwapchainAcquireResult::Ok(index) => (Some(index), SurfaceStatus::Optimal),
            SwapchainAcquireResult::Suboptimal(index) => (Some(index), SurfaceStatus::Suboptimal),
            SwapchainAcquireResult::OutOfDate => (None, SurfaceStatus::Suboptimal),
        })
    }

    fn record_blit_to_swapchain(&self, cmd: vk::CommandBuffer, source: &ImageEntry, swap_image_index: u32) {
        let device = &self.context.device;
        let swap_image = self.swapchain.get_image(swap_image_index);
        let swap_extent = self.swapchain.get_extent();

        let to_transfer = [
            image_barrier(
                source.image,
                vk::AccessFlags::MEMORY_WRITE,
                vk::AccessFlags::TRANSFER_READ,
                vk::ImageLayout::GENERAL,
                vk::ImageLayout::GENERAL,
            ),
            image_barrier(
                swap_image,
                vk::AccessFlags::empty(),
                vk::AccessFlags::TRANSFER_WRITE,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ),
        ];
        let region = vk::ImageBlit {
            src_subresource: color_subresource_layers(),
            src_offsets: [
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: source.desc.size.x as i32,
                    y: source.desc.size.y as i32,
                    z: 1,
                },
            ],
            dst_subresource: color_subresource_layers(),
            dst_offsets: [
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: swap_extent.width as i32,
                    y: swap_extent.height as i32,
                    z: 1,
                },
            ],
        };
        let to_present = image_barrier(
            swap_image,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::empty(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );
        unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &to_transfer,
            );
            device.cmd_blit_image(
                cmd,
                source.image,
                vk::ImageLayout::GENERAL,
                swap_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                slice::from_ref(&region),
                vk::Filter::NEAREST,
            );
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                slice::from_ref(&to_present),
            );
        }
    }
}

/// Runs the frame on a Vulkan queue with hardware ray tracing.
pub struct VulkanDevice {
    shader_loader: ShaderLoader,
    state: Mutex<DeviceState>,
}

impl VulkanDevice {
    const CHUNK_SIZE: vk::DeviceSize = 128 * 1024 * 1024;

    pub fn new(
        context: &SharedContext,
        window_extent: vk::Extent2D,
        present_mode: PresentMode,
        shader_loader: ShaderLoader,
    ) -> anyhow::Result<Self> {
        let swapchain = Swapchain::new(context, window_extent, present_mode)?;
        let command_buffers = CommandBufferPool::new(context).or_fail("create command buffers")?;
        let descriptor_pool = DescriptorPool::new(context).or_fail("create descriptor pool")?;
        let extent = swapchain.get_extent();
        info!(
            "swapchain: {}x{} {} ({})",
            extent.width,
            extent.height,
            swapchain.get_format(),
            present_mode
        );

        Ok(Self {
            shader_loader,
            state: Mutex::new(DeviceState {
                context: SharedContext::clone(context),
                frame: None,
                programs: SlotMap::with_key(),
                accels: SlotMap::with_key(),
                images: SlotMap::with_key(),
                buffers: SlotMap::with_key(),
                descriptor_pool,
                swapchain,
                command_buffers,
                allocator: Allocator::new(context, Self::CHUNK_SIZE),
            }),
        })
    }

    fn state(&self) -> MutexGuard<DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_idle(state: &DeviceState) {
        if let Err(err) = unsafe { state.context.device.device_wait_idle() } {
            warn!("failed to wait for device idle: {}", err);
        }
    }
}

impl Device for VulkanDevice {
    fn supports(&self, capability: Capability) -> bool {
        self.state().context.supports(capability)
    }

    fn create_buffer(&self, desc: &BufferDesc, contents: &[u8]) -> Result<BufferId> {
        let mut state = self.state();
        let usage = match desc.usage {
            BufferUsage::Storage => vk::BufferUsageFlags::STORAGE_BUFFER,
        } | state.device_address_usage();
        let buffer = state
            .create_vk_buffer(desc.size, usage, 0, Some(contents))
            .map_err(|err| Error::ResourceCreation {
                what: desc.label,
                reason: err.to_string(),
            })?;
        Ok(state.buffers.insert(BufferEntry { buffer }))
    }

    fn destroy_buffer(&self, id: BufferId) {
        let mut state = self.state();
        if let Some(entry) = state.buffers.remove(id) {
            Self::wait_idle(&state);
            unsafe { state.context.device.destroy_buffer(Some(entry.buffer), None) };
        }
    }

    fn create_image(&self, desc: &ImageDesc) -> Result<ImageId> {
        let mut state = self.state();
        let state = &mut *state;
        let device = &state.context.device;
        let error = |err: vk::Result| Error::ResourceCreation {
            what: desc.label,
            reason: err.to_string(),
        };
        let format = vk_format(desc.format);

        let image = {
            let image_create_info = vk::ImageCreateInfo {
                image_type: vk::ImageType::N2D,
                format,
                extent: vk::Extent3D {
                    width: desc.size.x,
                    height: desc.size.y,
                    depth: 1,
                },
                mip_levels: 1,
                array_layers: 1,
                samples: vk::SampleCountFlags::N1,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: vk::ImageUsageFlags::STORAGE
                    | vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST,
                initial_layout: vk::ImageLayout::UNDEFINED,
                ..Default::default()
            };
            unsafe { device.create_image(&image_create_info, None) }.map_err(error)?
        };
        let mem_req = unsafe { device.get_image_memory_requirements(image) };
        let bound = state
            .allocator
            .allocate(&mem_req, vk::MemoryPropertyFlags::DEVICE_LOCAL)
            .and_then(|alloc| unsafe { device.bind_image_memory(image, alloc.mem, alloc.offset) });
        if let Err(err) = bound {
            unsafe { device.destroy_image(Some(image), None) };
            return Err(error(err));
        }

        let view = {
            let image_view_create_info = vk::ImageViewCreateInfo {
                image: Some(image),
                view_type: vk::ImageViewType::N2D,
                format,
                subresource_range: color_subresource_range(),
                ..Default::default()
            };
            match unsafe { device.create_image_view(&image_view_create_info, None) } {
                Ok(view) => view,
                Err(err) => {
                    unsafe { device.destroy_image(Some(image), None) };
                    return Err(error(err));
                }
            }
        };

        // images live in the general layout from creation onwards, zeroed
        let context = &state.context;
        let ready = state.command_buffers.run_setup(|cmd| {
            let to_general = image_barrier(
                image,
                vk::AccessFlags::empty(),
                vk::AccessFlags::TRANSFER_WRITE,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::GENERAL,
            );
            let clear_value = if desc.format.is_float() {
                ClearValue::Float([0.0; 4])
            } else {
                ClearValue::Uint([0; 4])
            };
            unsafe {
                context.device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    slice::from_ref(&to_general),
                );
                context.device.cmd_clear_color_image(
                    cmd,
                    image,
                    vk::ImageLayout::GENERAL,
                    &clear_color_value(clear_value),
                    slice::from_ref(&color_subresource_range()),
                );
            }
        });
        if let Err(err) = ready {
            unsafe {
                device.destroy_image_view(Some(view), None);
                device.destroy_image(Some(image), None);
            }
            return Err(error(err));
        }

        Ok(state.images.insert(ImageEntry {
            desc: *desc,
            image,
            view,
        }))
    }

    fn destroy_image(&self, id: ImageId) {
        let mut state = self.state();
        if let Some(entry) = state.images.remove(id) {
            Self::wait_idle(&state);
            unsafe {
                state.context.device.destroy_image_view(Some(entry.view), None);
                state.context.device.destroy_image(Some(entry.image), None);
            }
        }
    }

    fn build_bottom_level_accel(&self, aabbs: &[AabbData]) -> Result<AccelId> {
        let mut state = self.state();
        let usage = vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR | state.device_address_usage();
        let aabb_bytes: &[u8] = bytemuck::cast_slice(aabbs);
        let aabb_buffer = state
            .create_vk_buffer(aabb_bytes.len(), usage, 0, Some(aabb_bytes))
            .map_err(creation_error("aabb buffer"))?;

        let geometry = vk::AccelerationStructureGeometryKHR {
            geometry_type: vk::GeometryTypeKHR::AABBS,
            geometry: vk::AccelerationStructureGeometryDataKHR {
                aabbs: vk::AccelerationStructureGeometryAabbsDataKHR {
                    data: vk::DeviceOrHostAddressConstKHR {
                        device_address: state.buffer_address(aabb_buffer),
                    },
                    stride: mem::size_of::<AabbData>() as vk::DeviceSize,
                    ..Default::default()
                },
            },
            flags: vk::GeometryFlagsKHR::OPAQUE,
            ..Default::default()
        };
        let entry = state.build_accel(
            vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
            &geometry,
            aabbs.len() as u32,
        );
        unsafe { state.context.device.destroy_buffer(Some(aabb_buffer), None) };

        let entry = entry.map_err(creation_error("bottom level acceleration structure"))?;
        Ok(state.accels.insert(entry))
    }

    fn build_top_level_accel(&self, instances: &[AccelInstance]) -> Result<AccelId> {
        let mut state = self.state();
        let records = instances
            .iter()
            .map(|instance| {
                let bottom_level = state
                    .accels
                    .get(instance.bottom_level)
                    .ok_or(Error::UnknownResource("acceleration structure"))?;
                Ok(AccelerationStructureInstance {
                    transform: instance.transform.into_transform3x4(),
                    instance_custom_index_and_mask: (instance.custom_index & 0x00ff_ffff)
                        | (u32::from(instance.mask) << 24),
                    instance_shader_binding_table_record_offset_and_flags: instance.hit_group_offset & 0x00ff_ffff,
                    acceleration_structure_reference: bottom_level.address,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let usage = vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR | state.device_address_usage();
        let instance_bytes: &[u8] = bytemuck::cast_slice(&records);
        let instance_buffer = state
            .create_vk_buffer(instance_bytes.len(), usage, 16, Some(instance_bytes))
            .map_err(creation_error("instance buffer"))?;

        let geometry = vk::AccelerationStructureGeometryKHR {
            geometry_type: vk::GeometryTypeKHR::INSTANCES,
            geometry: vk::AccelerationStructureGeometryDataKHR {
                instances: vk::AccelerationStructureGeometryInstancesDataKHR {
                    data: vk::DeviceOrHostAddressConstKHR {
                        device_address: state.buffer_address(instance_buffer),
                    },
                    ..Default::default()
                },
            },
            ..Default::default()
        };
        let entry = state.build_accel(
            vk::AccelerationStructureTypeKHR::TOP_LEVEL,
            &geometry,
            records.len() as u32,
        );
        unsafe { state.context.device.destroy_buffer(Some(instance_buffer), None) };

        let entry = entry.map_err(creation_error("top level acceleration structure"))?;
        Ok(state.accels.insert(entry))
    }

    fn destroy_accel(&self, id: AccelId) {
        let mut state = self.state();
        if let Some(entry) = state.accels.remove(id) {
            Self::wait_idle(&state);
            unsafe {
                state
                    .context
                    .device
                    .destroy_acceleration_structure_khr(Some(entry.accel), None);
                state.context.device.destroy_buffer(Some(entry.buffer), None);
            }
        }
    }

    fn create_program(&self, desc: &ProgramDesc) -> Result<ProgramId> {
        let mut state = self.state();
        let entry = state.create_program(desc, &self.shader_loader)?;
        debug!("created program {}", desc.program);
        Ok(state.programs.insert(entry))
    }

    fn destroy_program(&self, id: ProgramId) {
        let mut state = self.state();
        if let Some(entry) = state.programs.remove(id) {
            Self::wait_idle(&state);
            state.destroy_program_entry(&entry);
        }
    }

    fn begin_frame(&self) -> Result<SurfaceStatus> {
        let mut state = self.state();
        if state.frame.is_some() {
            return Err(Error::Submit("previous frame was not presented".to_owned()));
        }
        let (swap_image_index, status) = state.acquire()?;
        let cmd = state
            .command_buffers
            .begin_frame()
            .map_err(|err| Error::Submit(err.to_string()))?;
        state
            .descriptor_pool
            .begin_frame()
            .map_err(|err| Error::Submit(err.to_string()))?;

        // order against everything the previous frame wrote
        global_barrier(&state.context, cmd);
        state.frame = Some(Frame {
            cmd,
            swap_image_index,
            status,
        });
        Ok(status)
    }

    fn clear_image(&self, image: ImageId, value: ClearValue) -> Result<()> {
        let state = self.state();
        let cmd = state.frame_cmd()?;
        let entry = state.image(image)?;
        unsafe {
            state.context.device.cmd_clear_color_image(
                cmd,
                entry.image,
                vk::ImageLayout::GENERAL,
                &clear_color_value(value),
                slice::from_ref(&color_subresource_range()),
            )
        };
        Ok(())
    }

    fn barrier(&self) {
        let state = self.state();
        match state.frame_cmd() {
            Ok(cmd) => global_barrier(&state.context, cmd),
            Err(err) => warn!("barrier ignored: {}", err),
        }
    }

    fn trace_rays(&self, pass: &'static str, program: ProgramId, entries: &[BindingEntry], size: UVec2) -> Result<()> {
        let mut state = self.state();
        let (cmd, program) = state.bind_program(pass, program, entries, vk::PipelineBindPoint::RAY_TRACING_KHR)?;
        let table = program.shader_binding_table.ok_or_else(|| Error::ProgramResolution {
            program: program.desc.program,
            reason: "no shader binding table".to_owned(),
        })?;
        let callable = vk::StridedDeviceAddressRegionKHR::default();
        unsafe {
            state
                .context
                .device
                .cmd_trace_rays_khr(cmd, &table.raygen, &table.miss, &table.hit, &callable, size.x, size.y, 1)
        };
        Ok(())
    }

    fn dispatch(&self, pass: &'static str, program: ProgramId, entries: &[BindingEntry], size: UVec2) -> Result<()> {
        let mut state = self.state();
        let (cmd, _) = state.bind_program(pass, program, entries, vk::PipelineBindPoint::COMPUTE)?;
        let group_count = size.div_round_up(GROUP_SIZE);
        unsafe { state.context.device.cmd_dispatch(cmd, group_count.x, group_count.y, 1) };
        Ok(())
    }

    fn copy_image(&self, src: ImageId, dst: ImageId) -> Result<()> {
        let state = self.state();
        let cmd = state.frame_cmd()?;
        if src == dst {
            return Err(Error::Hazard {
                pass: "copy-image",
                image: format!("{:?}", src),
            });
        }
        let src = state.image(src)?;
        let dst = state.image(dst)?;
        if src.desc.size != dst.desc.size || src.desc.format != dst.desc.format {
            return Err(Error::BindingMismatch {
                pass: "copy-image",
                slot: 1,
                reason: format!("cannot copy {} into {}", src.desc.label, dst.desc.label),
            });
        }
        let region = vk::ImageCopy {
            src_subresource: color_subresource_layers(),
            src_offset: vk::Offset3D::default(),
            dst_subresource: color_subresource_layers(),
            dst_offset: vk::Offset3D::default(),
            extent: vk::Extent3D {
                width: src.desc.size.x,
                height: src.desc.size.y,
                depth: 1,
            },
        };
        unsafe {
            state.context.device.cmd_copy_image(
                cmd,
                src.image,
                vk::ImageLayout::GENERAL,
                dst.image,
                vk::ImageLayout::GENERAL,
                slice::from_ref(&region),
            )
        };
        Ok(())
    }

    fn present(&self, image: ImageId) -> Result<SurfaceStatus> {
        let mut state = self.state();
        let source = state.image(image)?;
        let frame = state
            .frame
            .take()
            .ok_or_else(|| Error::Submit("no frame is being recorded".to_owned()))?;

        if let Some(index) = frame.swap_image_index {
            state.record_blit_to_swapchain(frame.cmd, &source, index);
        }
        let rendering_finished = state
            .command_buffers
            .submit_frame(frame.swap_image_index.is_some())
            .map_err(|err| Error::Submit(err.to_string()))?;
        state
            .command_buffers
            .wait_frame()
            .map_err(|err| Error::Submit(err.to_string()))?;

        let status = match (frame.swap_image_index, rendering_finished) {
            (Some(index), Some(semaphore)) => {
                let presented = state
                    .swapchain
                    .present(index, semaphore)
                    .map_err(|err| Error::Present(err.to_string()))?;
                if presented {
                    frame.status
                } else {
                    SurfaceStatus::Suboptimal
                }
            }
            _ => SurfaceStatus::Suboptimal,
        };
        Ok(status)
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        Self::wait_idle(state);

        let leaked = state.programs.len() + state.accels.len() + state.images.len() + state.buffers.len();
        if leaked != 0 {
            warn!("releasing {} device resources that are still alive", leaked);
        }
        let programs: Vec<ProgramEntry> = state.programs.drain().map(|(_, entry)| entry).collect();
        for entry in programs.iter() {
            state.destroy_program_entry(entry);
        }
        let device = &state.context.device;
        unsafe {
            for (_, entry) in state.accels.drain() {
                device.destroy_acceleration_structure_khr(Some(entry.accel), None);
                device.destroy_buffer(Some(entry.buffer), None);
            }
            for (_, entry) in state.images.drain() {
                device.destroy_image_view(Some(entry.view), None);
                device.destroy_image(Some(entry.image), None);
            }
            for (_, entry) in state.buffers.drain() {
                device.destroy_buffer(Some(entry.buffer), None);
            }
        }
    }
}
