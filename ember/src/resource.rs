use crate::{device::*, error::*};

/// Owned device image, released through the device exactly once on drop.
pub struct Image {
    device: SharedDevice,
    id: ImageId,
    desc: ImageDesc,
}

impl Image {
    pub fn new(device: &SharedDevice, desc: ImageDesc) -> Result<Self> {
        let id = device.create_image(&desc)?;
        Ok(Self {
            device: SharedDevice::clone(device),
            id,
            desc,
        })
    }

    pub fn id(&self) -> ImageId {
        self.id
    }

    pub fn desc(&self) -> &ImageDesc {
        &self.desc
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        self.device.destroy_image(self.id);
    }
}

pub struct Buffer {
    device: SharedDevice,
    id: BufferId,
    desc: BufferDesc,
}

impl Buffer {
    pub fn new(device: &SharedDevice, desc: BufferDesc, contents: &[u8]) -> Result<Self> {
        let id = device.create_buffer(&desc, contents)?;
        Ok(Self {
            device: SharedDevice::clone(device),
            id,
            desc,
        })
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn desc(&self) -> &BufferDesc {
        &self.desc
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.device.destroy_buffer(self.id);
    }
}

pub struct Accel {
    device: SharedDevice,
    id: AccelId,
}

impl Accel {
    pub fn new_bottom_level(device: &SharedDevice, aabbs: &[AabbData]) -> Result<Self> {
        let id = device.build_bottom_level_accel(aabbs)?;
        Ok(Self {
            device: SharedDevice::clone(device),
            id,
        })
    }

    pub fn new_top_level(device: &SharedDevice, instances: &[AccelInstance]) -> Result<Self> {
        let id = device.build_top_level_accel(instances)?;
        Ok(Self {
            device: SharedDevice::clone(device),
            id,
        })
    }

    pub fn id(&self) -> AccelId {
        self.id
    }
}

impl Drop for Accel {
    fn drop(&mut self) {
        self.device.destroy_accel(self.id);
    }
}

pub struct Pipeline {
    device: SharedDevice,
    id: ProgramId,
}

impl Pipeline {
    pub fn new(device: &SharedDevice, desc: ProgramDesc) -> Result<Self> {
        let id = device.create_program(&desc)?;
        Ok(Self {
            device: SharedDevice::clone(device),
            id,
        })
    }

    pub fn id(&self) -> ProgramId {
        self.id
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.device.destroy_program(self.id);
    }
}
