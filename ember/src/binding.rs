use crate::{device::*, error::*};
use bytemuck::Pod;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    UniformData { size: u32 },
    AccelerationStructure,
    StorageBuffer,
    StorageImageRead,
    StorageImageWrite,
}

impl BindingKind {
    pub fn is_image(&self) -> bool {
        matches!(self, BindingKind::StorageImageRead | BindingKind::StorageImageWrite)
    }

    pub fn is_write(&self) -> bool {
        matches!(self, BindingKind::StorageImageWrite)
    }
}

/// One slot of a pass layout, numbered from zero in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingSlot {
    pub slot: u32,
    pub name: &'static str,
    pub kind: BindingKind,
}

#[derive(Debug, Clone, Copy)]
pub enum BoundResource<'a> {
    Uniform(&'a [u8]),
    Accel(AccelId),
    Buffer(BufferId),
    Image(ImageId),
}

#[derive(Debug, Clone, Copy)]
pub struct BindingEntry<'a> {
    pub slot: u32,
    pub resource: BoundResource<'a>,
    pub kind: BindingKind,
}

/// A table of entries that has been checked against a pass layout.
#[derive(Debug, Clone)]
pub struct BoundSet<'a> {
    pub pass: &'static str,
    entries: Vec<BindingEntry<'a>>,
}

fn mismatch(pass: &'static str, slot: u32, reason: impl Into<String>) -> Error {
    Error::BindingMismatch {
        pass,
        slot,
        reason: reason.into(),
    }
}

/// Validates `(slot, resource, kind)` entries against the layout of a pass and
/// rejects any image bound for both read and write.
pub fn bind_resources<'a>(
    pass: &'static str,
    layout: &[BindingSlot],
    entries: &[BindingEntry<'a>],
) -> Result<BoundSet<'a>> {
    if entries.len() != layout.len() {
        return Err(mismatch(
            pass,
            entries.len() as u32,
            format!("expected {} entries, got {}", layout.len(), entries.len()),
        ));
    }

    let mut bound = Vec::with_capacity(layout.len());
    for binding in layout {
        let entry = entries
            .iter()
            .find(|entry| entry.slot == binding.slot)
            .ok_or_else(|| mismatch(pass, binding.slot, format!("no entry for `{}`", binding.name)))?;
        if entry.kind != binding.kind {
            return Err(mismatch(
                pass,
                binding.slot,
                format!("expected {:?}, got {:?}", binding.kind, entry.kind),
            ));
        }
        let resource_matches = match (binding.kind, entry.resource) {
            (BindingKind::UniformData { size }, BoundResource::Uniform(data)) => data.len() == size as usize,
            (BindingKind::AccelerationStructure, BoundResource::Accel(_)) => true,
            (BindingKind::StorageBuffer, BoundResource::Buffer(_)) => true,
            (BindingKind::StorageImageRead, BoundResource::Image(_)) => true,
            (BindingKind::StorageImageWrite, BoundResource::Image(_)) => true,
            _ => false,
        };
        if !resource_matches {
            return Err(mismatch(
                pass,
                binding.slot,
                format!("resource {:?} does not fit `{}`", entry.resource, binding.name),
            ));
        }
        bound.push(*entry);
    }

    let set = BoundSet { pass, entries: bound };
    for written in set.image_writes() {
        if set.image_reads().any(|read| read == written) {
            return Err(Error::Hazard {
                pass,
                image: format!("{:?}", written),
            });
        }
    }
    Ok(set)
}

impl<'a> BoundSet<'a> {
    pub fn entries(&self) -> &[BindingEntry<'a>] {
        &self.entries
    }

    fn entry(&self, slot: u32) -> Result<&BindingEntry<'a>> {
        self.entries
            .iter()
            .find(|entry| entry.slot == slot)
            .ok_or_else(|| mismatch(self.pass, slot, "slot is not bound"))
    }

    pub fn image(&self, slot: u32) -> Result<ImageId> {
        match self.entry(slot)?.resource {
            BoundResource::Image(id) => Ok(id),
            _ => Err(mismatch(self.pass, slot, "expected an image")),
        }
    }

    pub fn buffer(&self, slot: u32) -> Result<BufferId> {
        match self.entry(slot)?.resource {
            BoundResource::Buffer(id) => Ok(id),
            _ => Err(mismatch(self.pass, slot, "expected a buffer")),
        }
    }

    pub fn accel(&self, slot: u32) -> Result<AccelId> {
        match self.entry(slot)?.resource {
            BoundResource::Accel(id) => Ok(id),
            _ => Err(mismatch(self.pass, slot, "expected an acceleration structure")),
        }
    }

    pub fn uniform<T: Pod>(&self, slot: u32) -> Result<T> {
        match self.entry(slot)?.resource {
            BoundResource::Uniform(data) => bytemuck::try_pod_read_unaligned(data)
                .map_err(|err| mismatch(self.pass, slot, format!("bad uniform data: {:?}", err))),
            _ => Err(mismatch(self.pass, slot, "expected uniform data")),
        }
    }

    pub fn image_reads(&self) -> impl Iterator<Item = ImageId> + '_ {
        self.images_with(BindingKind::StorageImageRead)
    }

    pub fn image_writes(&self) -> impl Iterator<Item = ImageId> + '_ {
        self.images_with(BindingKind::StorageImageWrite)
    }

    fn images_with(&self, kind: BindingKind) -> impl Iterator<Item = ImageId> + '_ {
        self.entries.iter().filter_map(move |entry| match entry.resource {
            BoundResource::Image(id) if entry.kind == kind => Some(id),
            _ => None,
        })
    }
}
