use crate::context::*;
use ember::prelude::{align_up, Program};
use spark::{vk, Builder, Device};
use std::ffi::CStr;
use std::fs::File;
use std::io::{self, Read};
use std::mem;
use std::path::{Path, PathBuf};
use std::slice;

fn read_file_words(path: &Path) -> io::Result<Vec<u32>> {
    let mut file = File::open(path)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    if bytes.len() % 4 != 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "SPIR-V size is not a multiple of 4"));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| u32::from(c[3]) << 24 | u32::from(c[2]) << 16 | u32::from(c[1]) << 8 | u32::from(c[0]))
        .collect())
}

fn shader_entry_name() -> &'static CStr {
    unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") }
}

/// Resolves programs to SPIR-V modules built into a single directory.
pub struct ShaderLoader {
    base_path: PathBuf,
}

impl ShaderLoader {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.base_path.join(name)
    }

    pub fn load(&self, device: &Device, name: &str) -> Result<vk::ShaderModule, String> {
        let path = self.path(name);
        let words = read_file_words(&path).map_err(|err| format!("{}: {}", path.display(), err))?;
        let shader_module_create_info = vk::ShaderModuleCreateInfo {
            code_size: words.len() * mem::size_of::<u32>(),
            p_code: words.as_ptr(),
            ..Default::default()
        };
        unsafe { device.create_shader_module(&shader_module_create_info, None) }
            .map_err(|err| format!("{}: {}", path.display(), err))
    }
}

pub fn compute_shader_name(program: Program) -> String {
    format!("{}.comp.spv", program)
}

pub const RAY_GENERATION_SHADER: &str = "ray-generation.rgen.spv";
pub const SPHERE_INTERSECTION_SHADER: &str = "sphere.rint.spv";
pub const SPHERE_CLOSEST_HIT_SHADER: &str = "sphere.rchit.spv";
pub const SKY_MISS_SHADER: &str = "sky.rmiss.spv";

pub fn create_pipeline_layout(
    context: &Context,
    descriptor_set_layout: vk::DescriptorSetLayout,
) -> spark::Result<vk::PipelineLayout> {
    let pipeline_layout_create_info =
        vk::PipelineLayoutCreateInfo::builder().p_set_layouts(slice::from_ref(&descriptor_set_layout));
    unsafe {
        context
            .device
            .create_pipeline_layout(&pipeline_layout_create_info, None)
    }
}

pub fn create_compute_pipeline(
    context: &Context,
    loader: &ShaderLoader,
    program: Program,
    pipeline_layout: vk::PipelineLayout,
) -> Result<vk::Pipeline, String> {
    let device = &context.device;
    let shader = loader.load(device, &compute_shader_name(program))?;
    let pipeline_create_info = vk::ComputePipelineCreateInfo {
        stage: vk::PipelineShaderStageCreateInfo {
            stage: vk::ShaderStageFlags::COMPUTE,
            module: Some(shader),
            p_name: shader_entry_name().as_ptr(),
            ..Default::default()
        },
        layout: Some(pipeline_layout),
        ..Default::default()
    };
    let pipeline = unsafe { device.create_compute_pipelines_single(None, &pipeline_create_info, None) };
    unsafe { device.destroy_shader_module(Some(shader), None) };
    pipeline.map_err(|err| format!("compute pipeline: {}", err))
}

// stage order of the ray tracing pipeline
const RAYGEN_STAGE: u32 = 0;
const MISS_STAGE: u32 = 1;
const INTERSECTION_STAGE: u32 = 2;
const CLOSEST_HIT_STAGE: u32 = 3;

/// Shader groups are laid out as raygen, miss, hit.
pub const SHADER_GROUP_COUNT: u32 = 3;

pub fn create_ray_tracing_pipeline(
    context: &Context,
    loader: &ShaderLoader,
    pipeline_layout: vk::PipelineLayout,
) -> Result<vk::Pipeline, String> {
    let device = &context.device;
    let stage_shaders = [
        (vk::ShaderStageFlags::RAYGEN_KHR, RAY_GENERATION_SHADER),
        (vk::ShaderStageFlags::MISS_KHR, SKY_MISS_SHADER),
        (vk::ShaderStageFlags::INTERSECTION_KHR, SPHERE_INTERSECTION_SHADER),
        (vk::ShaderStageFlags::CLOSEST_HIT_KHR, SPHERE_CLOSEST_HIT_SHADER),
    ];

    let mut modules = Vec::with_capacity(stage_shaders.len());
    for (_, name) in stage_shaders.iter() {
        match loader.load(device, name) {
            Ok(module) => modules.push(module),
            Err(err) => {
                for module in modules {
                    unsafe { device.destroy_shader_module(Some(module), None) };
                }
                return Err(err);
            }
        }
    }

    let shader_stage_create_info: Vec<_> = stage_shaders
        .iter()
        .zip(modules.iter())
        .map(|((stage, _), module)| vk::PipelineShaderStageCreateInfo {
            stage: *stage,
            module: Some(*module),
            p_name: shader_entry_name().as_ptr(),
            ..Default::default()
        })
        .collect();

    let shader_group_create_info = [
        vk::RayTracingShaderGroupCreateInfoKHR {
            ty: vk::RayTracingShaderGroupTypeKHR::GENERAL,
            general_shader: RAYGEN_STAGE,
            closest_hit_shader: vk::SHADER_UNUSED_KHR,
            any_hit_shader: vk::SHADER_UNUSED_KHR,
            intersection_shader: vk::SHADER_UNUSED_KHR,
            ..Default::default()
        },
        vk::RayTracingShaderGroupCreateInfoKHR {
            ty: vk::RayTracingShaderGroupTypeKHR::GENERAL,
            general_shader: MISS_STAGE,
            closest_hit_shader: vk::SHADER_UNUSED_KHR,
            any_hit_shader: vk::SHADER_UNUSED_KHR,
            intersection_shader: vk::SHADER_UNUSED_KHR,
            ..Default::default()
        },
        vk::RayTracingShaderGroupCreateInfoKHR {
            ty: vk::RayTracingShaderGroupTypeKHR::PROCEDURAL_HIT_GROUP,
            general_shader: vk::SHADER_UNUSED_KHR,
            closest_hit_shader: CLOSEST_HIT_STAGE,
            any_hit_shader: vk::SHADER_UNUSED_KHR,
            intersection_shader: INTERSECTION_STAGE,
            ..Default::default()
        },
    ];

    let pipeline_create_info = vk::RayTracingPipelineCreateInfoKHR::builder()
        .p_stages(&shader_stage_create_info)
        .p_groups(&shader_group_create_info)
        .layout(pipeline_layout)
        .max_pipeline_ray_recursion_depth(1);

    let pipeline = unsafe { device.create_ray_tracing_pipelines_khr_single(None, None, &pipeline_create_info, None) };
    for module in modules {
        unsafe { device.destroy_shader_module(Some(module), None) };
    }
    pipeline.map_err(|err| format!("ray tracing pipeline: {}", err))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderBindingRegion {
    pub offset: u32,
    pub stride: u32,
    pub size: u32,
}

impl ShaderBindingRegion {
    pub fn strided(&self, base_address: vk::DeviceAddress) -> vk::StridedDeviceAddressRegionKHR {
        vk::StridedDeviceAddressRegionKHR {
            device_address: base_address + vk::DeviceAddress::from(self.offset),
            stride: vk::DeviceSize::from(self.stride),
            size: vk::DeviceSize::from(self.size),
        }
    }
}

/// One record each for raygen, miss and the shared procedural hit group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderBindingTableLayout {
    pub raygen: ShaderBindingRegion,
    pub miss: ShaderBindingRegion,
    pub hit: ShaderBindingRegion,
    pub size: u32,
}

impl ShaderBindingTableLayout {
    pub fn new(properties: &RayTracingProperties) -> Self {
        let handle_size = properties.shader_group_handle_size;
        let stride = align_up(handle_size, properties.shader_group_handle_alignment.max(1));
        let base_alignment = properties.shader_group_base_alignment.max(1);

        let mut next_offset = 0;
        let mut next_region = || {
            let offset = align_up(next_offset, base_alignment);
            next_offset = offset + stride;
            ShaderBindingRegion {
                offset,
                stride,
                size: stride,
            }
        };
        let raygen = next_region();
        let miss = next_region();
        let hit = next_region();
        Self {
            raygen,
            miss,
            hit,
            size: next_offset,
        }
    }

    /// Copies the group handles (in raygen, miss, hit order) into table memory.
    pub fn write(&self, handle_size: u32, handles: &[u8]) -> Vec<u8> {
        let handle_size = handle_size as usize;
        let mut table = vec![0u8; self.size as usize];
        for (region, handle) in [self.raygen, self.miss, self.hit]
            .iter()
            .zip(handles.chunks_exact(handle_size))
        {
            let offset = region.offset as usize;
            table[offset..offset + handle_size].copy_from_slice(handle);
        }
        table
    }
}

pub fn get_shader_group_handles(context: &Context, pipeline: vk::Pipeline) -> spark::Result<Vec<u8>> {
    let handle_size = context.ray_tracing_properties.shader_group_handle_size as usize;
    let mut handles = vec![0u8; handle_size * SHADER_GROUP_COUNT as usize];
    unsafe {
        context
            .device
            .get_ray_tracing_shader_group_handles_khr(pipeline, 0, SHADER_GROUP_COUNT, &mut handles)
    }?;
    Ok(handles)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties(handle_size: u32, handle_alignment: u32, base_alignment: u32) -> RayTracingProperties {
        RayTracingProperties {
            shader_group_handle_size: handle_size,
            shader_group_base_alignment: base_alignment,
            shader_group_handle_alignment: handle_alignment,
            min_scratch_offset_alignment: 128,
        }
    }

    #[test]
    fn regions_start_on_base_alignment() {
        let layout = ShaderBindingTableLayout::new(&properties(32, 32, 64));
        assert_eq!(layout.raygen.offset, 0);
        assert_eq!(layout.miss.offset, 64);
        assert_eq!(layout.hit.offset, 128);
        assert_eq!(layout.size, 160);
        for region in [layout.raygen, layout.miss, layout.hit].iter() {
            assert_eq!(region.offset % 64, 0);
            assert_eq!(region.stride, region.size);
        }
    }

    #[test]
    fn stride_rounds_handle_up_to_handle_alignment() {
        let layout = ShaderBindingTableLayout::new(&properties(24, 32, 32));
        assert_eq!(layout.raygen.stride, 32);
        assert_eq!(layout.miss.offset, 32);
    }

    #[test]
    fn handles_are_written_at_region_offsets() {
        let layout = ShaderBindingTableLayout::new(&properties(4, 4, 16));
        let handles = [1u8, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3];
        let table = layout.write(4, &handles);
        assert_eq!(table.len(), 36);
        assert_eq!(&table[0..4], &[1, 1, 1, 1]);
        assert_eq!(&table[4..16], &[0; 12]);
        assert_eq!(&table[16..20], &[2, 2, 2, 2]);
        assert_eq!(&table[32..36], &[3, 3, 3, 3]);
    }

    #[test]
    fn strided_region_offsets_base_address() {
        let region = ShaderBindingRegion {
            offset: 64,
            stride: 32,
            size: 32,
        };
        let strided = region.strided(0x1000);
        assert_eq!(strided.device_address, 0x1040);
        assert_eq!(strided.stride, 32);
        assert_eq!(strided.size, 32);
    }
}
