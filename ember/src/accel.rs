use crate::{device::*, error::*, maths::*, resource::*, scene::*};
use log::info;
use std::mem;

pub const INSTANCE_MASK: u8 = 0xff;

struct SceneLevels {
    // released in reverse order of construction
    top_level: Accel,
    instances: Vec<AccelInstance>,
    material_buffer: Buffer,
    bottom_level: Accel,
}

/// Two-level spatial index where every primitive is an instance of one shared
/// unit sphere.
pub struct SceneAccel {
    device: SharedDevice,
    descriptors: Vec<PrimitiveDescriptor>,
    levels: Option<SceneLevels>,
}

impl SceneAccel {
    pub fn new(device: &SharedDevice) -> Self {
        Self {
            device: SharedDevice::clone(device),
            descriptors: Vec::new(),
            levels: None,
        }
    }

    pub fn add_primitive(&mut self, center: Vec3, albedo: Vec3, radius: f32, kind: MaterialKind, param: f32) {
        self.descriptors
            .push(PrimitiveDescriptor::new(center, radius, albedo, kind, param));
    }

    pub fn add_primitives(&mut self, primitives: &[PrimitiveDescriptor]) {
        for p in primitives {
            self.add_primitive(p.center, p.albedo, p.radius, p.kind, p.param);
        }
    }

    pub fn build(&mut self) -> Result<()> {
        if self.levels.is_some() {
            return Err(Error::SceneAlreadyBuilt);
        }
        if self.descriptors.is_empty() {
            return Err(Error::EmptyScene);
        }
        require_capabilities(
            self.device.as_ref(),
            [Capability::AccelerationStructure, Capability::BufferDeviceAddress]
                .iter()
                .copied(),
        )?;

        let base_geometry = [AabbData::unit_cube()];
        let bottom_level = Accel::new_bottom_level(&self.device, &base_geometry)?;

        let materials: Vec<MaterialData> = self.descriptors.iter().map(MaterialData::from).collect();
        let material_buffer = Buffer::new(
            &self.device,
            BufferDesc {
                label: "materials",
                size: materials.len() * mem::size_of::<MaterialData>(),
                usage: BufferUsage::Storage,
            },
            bytemuck::cast_slice(&materials),
        )?;

        let instances: Vec<AccelInstance> = self
            .descriptors
            .iter()
            .enumerate()
            .map(|(index, desc)| AccelInstance {
                transform: Scale3Offset3::new(desc.radius, desc.center),
                custom_index: index as u32,
                mask: INSTANCE_MASK,
                hit_group_offset: 0,
                bottom_level: bottom_level.id(),
            })
            .collect();
        let top_level = Accel::new_top_level(&self.device, &instances)?;

        info!(
            "built scene: {} instances of 1 base geometry, {} bytes of materials",
            instances.len(),
            material_buffer.desc().size
        );

        self.levels = Some(SceneLevels {
            top_level,
            instances,
            material_buffer,
            bottom_level,
        });
        Ok(())
    }

    fn levels(&self) -> Result<&SceneLevels> {
        self.levels.as_ref().ok_or(Error::SceneNotBuilt)
    }

    pub fn is_built(&self) -> bool {
        self.levels.is_some()
    }

    pub fn top_level(&self) -> Result<AccelId> {
        self.levels().map(|levels| levels.top_level.id())
    }

    pub fn base_geometry(&self) -> Result<AccelId> {
        self.levels().map(|levels| levels.bottom_level.id())
    }

    pub fn material_buffer(&self) -> Result<BufferId> {
        self.levels().map(|levels| levels.material_buffer.id())
    }

    pub fn instance_count(&self) -> u32 {
        self.levels
            .as_ref()
            .map_or(0, |levels| levels.instances.len() as u32)
    }

    pub fn instances(&self) -> &[AccelInstance] {
        self.levels
            .as_ref()
            .map_or(&[][..], |levels| levels.instances.as_slice())
    }

    pub fn descriptors(&self) -> &[PrimitiveDescriptor] {
        &self.descriptors
    }
}
