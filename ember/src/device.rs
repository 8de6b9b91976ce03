use crate::{binding::*, error::*, maths::*};
use bytemuck::{Pod, Zeroable};
use std::sync::Arc;
use strum::{Display, EnumIter, IntoEnumIterator};

slotmap::new_key_type! {
    pub struct BufferId;
    pub struct ImageId;
    pub struct AccelId;
    pub struct ProgramId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "kebab_case")]
pub enum Capability {
    RayTracingPipeline,
    AccelerationStructure,
    BufferDeviceAddress,
    StorageImageFormats,
    Presentation,
}

/// Checked once at startup, a missing capability is a fatal configuration error.
pub fn require_capabilities(device: &dyn Device, capabilities: impl IntoIterator<Item = Capability>) -> Result<()> {
    for capability in capabilities {
        if !device.supports(capability) {
            return Err(Error::MissingCapability(capability));
        }
    }
    Ok(())
}

pub fn require_all_capabilities(device: &dyn Device) -> Result<()> {
    require_capabilities(device, Capability::iter())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Rgba32Float,
    Rgba32Uint,
    Rg32Float,
    R32Float,
    R32Uint,
}

impl Format {
    pub fn is_float(&self) -> bool {
        matches!(self, Format::Rgba32Float | Format::Rg32Float | Format::R32Float)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageDesc {
    pub label: &'static str,
    pub size: UVec2,
    pub format: Format,
}

impl ImageDesc {
    pub fn new(label: &'static str, size: UVec2, format: Format) -> Self {
        Self { label, size, format }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    Storage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDesc {
    pub label: &'static str,
    pub size: usize,
    pub usage: BufferUsage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "kebab_case")]
pub enum Program {
    RayGeneration,
    ForwardProjection,
    GradientSampling,
    GradientSmoothing,
    TemporalAccumulation,
    SpatialFilter,
}

impl Program {
    pub fn is_ray_tracing(&self) -> bool {
        matches!(self, Program::RayGeneration)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ProgramDesc {
    pub program: Program,
    pub bindings: &'static [BindingSlot],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Zeroable, Pod)]
pub struct AabbData {
    pub min: Vec3,
    pub max: Vec3,
}

impl AabbData {
    pub fn unit_cube() -> Self {
        Self {
            min: Vec3::broadcast(-1.0),
            max: Vec3::broadcast(1.0),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AccelInstance {
    pub transform: Scale3Offset3,
    pub custom_index: u32,
    pub mask: u8,
    pub hit_group_offset: u32,
    pub bottom_level: AccelId,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    Float([f32; 4]),
    Uint([u32; 4]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceStatus {
    Optimal,
    Suboptimal,
}

/// Everything the renderer needs from a ray tracing capable device.
///
/// Commands are recorded into a single stream per frame in call order, between
/// `begin_frame` and `present`. `present` blocks until the frame has completed.
pub trait Device: Send + Sync {
    fn supports(&self, capability: Capability) -> bool;

    fn create_buffer(&self, desc: &BufferDesc, contents: &[u8]) -> Result<BufferId>;
    fn destroy_buffer(&self, id: BufferId);

    fn create_image(&self, desc: &ImageDesc) -> Result<ImageId>;
    fn destroy_image(&self, id: ImageId);

    fn build_bottom_level_accel(&self, aabbs: &[AabbData]) -> Result<AccelId>;
    fn build_top_level_accel(&self, instances: &[AccelInstance]) -> Result<AccelId>;
    fn destroy_accel(&self, id: AccelId);

    fn create_program(&self, desc: &ProgramDesc) -> Result<ProgramId>;
    fn destroy_program(&self, id: ProgramId);

    fn begin_frame(&self) -> Result<SurfaceStatus>;
    fn clear_image(&self, image: ImageId, value: ClearValue) -> Result<()>;
    fn barrier(&self);
    fn trace_rays(&self, pass: &'static str, program: ProgramId, entries: &[BindingEntry], size: UVec2)
        -> Result<()>;
    fn dispatch(&self, pass: &'static str, program: ProgramId, entries: &[BindingEntry], size: UVec2) -> Result<()>;
    fn copy_image(&self, src: ImageId, dst: ImageId) -> Result<()>;
    fn present(&self, image: ImageId) -> Result<SurfaceStatus>;
}

pub type SharedDevice = Arc<dyn Device>;
