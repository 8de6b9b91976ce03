//! Software implementation of the device interface.
//!
//! Programs run as rayon-parallel loops over the dispatch grid. Commands execute
//! immediately in call order, which trivially satisfies every barrier.

mod geometry;
mod kernels;

pub use self::geometry::{intersect_instance, intersect_sphere, Ray, SphereHit, TopLevel, TraceHit, RAY_T_MIN};
pub use self::kernels::{decode_normal, encode_normal, texel_vec4, Texel};

use self::kernels::*;
use crate::{binding::*, device::*, error::*, maths::*};
use log::{debug, trace};
use slotmap::SlotMap;
use std::{
    collections::HashSet,
    mem,
    sync::{Mutex, MutexGuard, PoisonError},
};

struct ImageData {
    desc: ImageDesc,
    texels: Vec<Texel>,
}

struct BufferData {
    desc: BufferDesc,
    words: Vec<u32>,
}

enum AccelData {
    BottomLevel(Vec<AabbData>),
    TopLevel(TopLevel),
}

struct ProgramData {
    program: Program,
    bindings: &'static [BindingSlot],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    BeginFrame,
    Clear {
        image: ImageId,
    },
    Barrier,
    Dispatch {
        pass: &'static str,
        program: Program,
        reads: Vec<ImageId>,
        writes: Vec<ImageId>,
    },
    Copy {
        src: ImageId,
        dst: ImageId,
    },
    Present {
        image: ImageId,
    },
}

impl Command {
    pub fn pass(&self) -> Option<&'static str> {
        match self {
            Command::Dispatch { pass, .. } => Some(*pass),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifetimeEvent {
    Created(String),
    Released(String),
}

#[derive(Default)]
struct CpuState {
    images: SlotMap<ImageId, ImageData>,
    buffers: SlotMap<BufferId, BufferData>,
    accels: SlotMap<AccelId, AccelData>,
    programs: SlotMap<ProgramId, ProgramData>,
    commands: Vec<Command>,
    lifetime: Vec<LifetimeEvent>,
    presented: Option<(UVec2, Vec<Texel>)>,
    frames_presented: u64,
}

impl Resources for CpuState {
    fn image(&self, id: ImageId) -> Result<ImageView<'_>> {
        let image = self.images.get(id).ok_or(Error::UnknownResource("image"))?;
        Ok(ImageView {
            size: image.desc.size,
            texels: &image.texels,
        })
    }

    fn buffer(&self, id: BufferId) -> Result<&[u32]> {
        let buffer = self.buffers.get(id).ok_or(Error::UnknownResource("buffer"))?;
        Ok(&buffer.words[..buffer.desc.size / 4])
    }

    fn top_level(&self, id: AccelId) -> Result<&TopLevel> {
        match self.accels.get(id) {
            Some(AccelData::TopLevel(top_level)) => Ok(top_level),
            _ => Err(Error::UnknownResource("top level acceleration structure")),
        }
    }
}

impl CpuState {
    fn take_outputs(&mut self, bound: &BoundSet) -> Result<Vec<OutputImage>> {
        let mut outputs = Vec::new();
        for id in bound.image_writes() {
            let image = self.images.get_mut(id).ok_or(Error::UnknownResource("image"))?;
            outputs.push(OutputImage {
                id,
                size: image.desc.size,
                texels: mem::take(&mut image.texels),
            });
        }
        Ok(outputs)
    }

    fn restore_outputs(&mut self, outputs: Vec<OutputImage>) {
        for output in outputs {
            if let Some(image) = self.images.get_mut(output.id) {
                image.texels = output.texels;
            }
        }
    }

    fn run(&mut self, program: ProgramId, pass: &'static str, entries: &[BindingEntry], size: UVec2) -> Result<()> {
        let (kind, bindings) = {
            let data = self.programs.get(program).ok_or(Error::UnknownResource("program"))?;
            (data.program, data.bindings)
        };
        let bound = bind_resources(pass, bindings, entries)?;
        debug!("{}: {} over {}x{}", pass, kind, size.x, size.y);
        self.commands.push(Command::Dispatch {
            pass,
            program: kind,
            reads: bound.image_reads().collect(),
            writes: bound.image_writes().collect(),
        });

        let mut outputs = self.take_outputs(&bound)?;
        let result = run_program(kind, &bound, &*self, &mut outputs, size);
        self.restore_outputs(outputs);
        result
    }
}

/// Headless device that runs every program on the CPU.
pub struct CpuDevice {
    capabilities: HashSet<Capability>,
    surface_status: Mutex<SurfaceStatus>,
    state: Mutex<CpuState>,
}

impl Default for CpuDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuDevice {
    pub fn new() -> Self {
        use strum::IntoEnumIterator;
        Self::with_capabilities(Capability::iter())
    }

    pub fn with_capabilities(capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            capabilities: capabilities.into_iter().collect(),
            surface_status: Mutex::new(SurfaceStatus::Optimal),
            state: Mutex::new(CpuState::default()),
        }
    }

    fn state(&self) -> MutexGuard<CpuState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Status reported by acquire and present from now on.
    pub fn set_surface_status(&self, status: SurfaceStatus) {
        *self.surface_status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    fn surface_status(&self) -> SurfaceStatus {
        *self.surface_status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn read_image(&self, id: ImageId) -> Result<Vec<Texel>> {
        self.state().image(id).map(|view| view.texels.to_vec())
    }

    pub fn read_image_vec4(&self, id: ImageId) -> Result<Vec<Vec4>> {
        self.read_image(id)
            .map(|texels| texels.into_iter().map(texel_vec4).collect())
    }

    pub fn image_size(&self, id: ImageId) -> Result<UVec2> {
        self.state().image(id).map(|view| view.size)
    }

    pub fn trace_ray(&self, accel: AccelId, ray: &Ray) -> Result<Option<TraceHit>> {
        let state = self.state();
        let top_level = state.top_level(accel)?;
        Ok(top_level.trace(ray, f32::MAX, 0xff))
    }

    pub fn presented(&self) -> Option<(UVec2, Vec<Vec4>)> {
        self.state()
            .presented
            .as_ref()
            .map(|(size, texels)| (*size, texels.iter().copied().map(texel_vec4).collect()))
    }

    pub fn frames_presented(&self) -> u64 {
        self.state().frames_presented
    }

    pub fn commands(&self) -> Vec<Command> {
        self.state().commands.clone()
    }

    pub fn take_commands(&self) -> Vec<Command> {
        mem::take(&mut self.state().commands)
    }

    pub fn lifetime_events(&self) -> Vec<LifetimeEvent> {
        self.state().lifetime.clone()
    }

    pub fn live_object_count(&self) -> usize {
        let state = self.state();
        state.images.len() + state.buffers.len() + state.accels.len() + state.programs.len()
    }
}

impl Device for CpuDevice {
    fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    fn create_buffer(&self, desc: &BufferDesc, contents: &[u8]) -> Result<BufferId> {
        if desc.size % 4 != 0 || contents.len() > desc.size {
            return Err(Error::ResourceCreation {
                what: "buffer",
                reason: format!("{} bytes of contents for a {} byte buffer", contents.len(), desc.size),
            });
        }
        let mut words = vec![0u32; desc.size / 4];
        bytemuck::cast_slice_mut::<u32, u8>(&mut words)[..contents.len()].copy_from_slice(contents);
        let mut state = self.state();
        state.lifetime.push(LifetimeEvent::Created(format!("buffer:{}", desc.label)));
        Ok(state.buffers.insert(BufferData { desc: *desc, words }))
    }

    fn destroy_buffer(&self, id: BufferId) {
        let mut state = self.state();
        if let Some(buffer) = state.buffers.remove(id) {
            state
                .lifetime
                .push(LifetimeEvent::Released(format!("buffer:{}", buffer.desc.label)));
        }
    }

    fn create_image(&self, desc: &ImageDesc) -> Result<ImageId> {
        if desc.size.x == 0 || desc.size.y == 0 {
            return Err(Error::ResourceCreation {
                what: "image",
                reason: format!("{} has zero size", desc.label),
            });
        }
        let texels = vec![[0u32; 4]; (desc.size.x * desc.size.y) as usize];
        let mut state = self.state();
        state.lifetime.push(LifetimeEvent::Created(format!("image:{}", desc.label)));
        Ok(state.images.insert(ImageData { desc: *desc, texels }))
    }

    fn destroy_image(&self, id: ImageId) {
        let mut state = self.state();
        if let Some(image) = state.images.remove(id) {
            state
                .lifetime
                .push(LifetimeEvent::Released(format!("image:{}", image.desc.label)));
        }
    }

    fn build_bottom_level_accel(&self, aabbs: &[AabbData]) -> Result<AccelId> {
        if aabbs.is_empty() {
            return Err(Error::ResourceCreation {
                what: "bottom level acceleration structure",
                reason: "no geometry".to_owned(),
            });
        }
        let mut state = self.state();
        state.lifetime.push(LifetimeEvent::Created("accel:bottom-level".to_owned()));
        Ok(state.accels.insert(AccelData::BottomLevel(aabbs.to_vec())))
    }

    fn build_top_level_accel(&self, instances: &[AccelInstance]) -> Result<AccelId> {
        let mut state = self.state();
        let top_level = {
            let accels = &state.accels;
            TopLevel::new(instances, |id| match accels.get(id) {
                Some(AccelData::BottomLevel(aabbs)) => Some(aabbs.clone()),
                _ => None,
            })
        }
        .ok_or_else(|| Error::ResourceCreation {
            what: "top level acceleration structure",
            reason: "instance references an unknown bottom level".to_owned(),
        })?;
        trace!("top level over {} instances", top_level.instance_count());
        state.lifetime.push(LifetimeEvent::Created("accel:top-level".to_owned()));
        Ok(state.accels.insert(AccelData::TopLevel(top_level)))
    }

    fn destroy_accel(&self, id: AccelId) {
        let mut state = self.state();
        if let Some(accel) = state.accels.remove(id) {
            let name = match accel {
                AccelData::BottomLevel(_) => "accel:bottom-level",
                AccelData::TopLevel(_) => "accel:top-level",
            };
            state.lifetime.push(LifetimeEvent::Released(name.to_owned()));
        }
    }

    fn create_program(&self, desc: &ProgramDesc) -> Result<ProgramId> {
        let mut state = self.state();
        state
            .lifetime
            .push(LifetimeEvent::Created(format!("program:{}", desc.program)));
        Ok(state.programs.insert(ProgramData {
            program: desc.program,
            bindings: desc.bindings,
        }))
    }

    fn destroy_program(&self, id: ProgramId) {
        let mut state = self.state();
        if let Some(program) = state.programs.remove(id) {
            state
                .lifetime
                .push(LifetimeEvent::Released(format!("program:{}", program.program)));
        }
    }

    fn begin_frame(&self) -> Result<SurfaceStatus> {
        self.state().commands.push(Command::BeginFrame);
        Ok(self.surface_status())
    }

    fn clear_image(&self, image: ImageId, value: ClearValue) -> Result<()> {
        let mut state = self.state();
        let data = state.images.get_mut(image).ok_or(Error::UnknownResource("image"))?;
        let value = clear_texel(value);
        for texel in data.texels.iter_mut() {
            *texel = value;
        }
        state.commands.push(Command::Clear { image });
        Ok(())
    }

    fn barrier(&self) {
        self.state().commands.push(Command::Barrier);
    }

    fn trace_rays(&self, pass: &'static str, program: ProgramId, entries: &[BindingEntry], size: UVec2) -> Result<()> {
        self.state().run(program, pass, entries, size)
    }

    fn dispatch(&self, pass: &'static str, program: ProgramId, entries: &[BindingEntry], size: UVec2) -> Result<()> {
        self.state().run(program, pass, entries, size)
    }

    fn copy_image(&self, src: ImageId, dst: ImageId) -> Result<()> {
        let mut state = self.state();
        let (desc, texels) = {
            let image = state.images.get(src).ok_or(Error::UnknownResource("image"))?;
            (image.desc, image.texels.clone())
        };
        let target = state.images.get_mut(dst).ok_or(Error::UnknownResource("image"))?;
        if target.desc.size != desc.size || target.desc.format != desc.format {
            return Err(Error::Submit(format!(
                "cannot copy {} into {}",
                desc.label, target.desc.label
            )));
        }
        target.texels = texels;
        state.commands.push(Command::Copy { src, dst });
        Ok(())
    }

    fn present(&self, image: ImageId) -> Result<SurfaceStatus> {
        let mut state = self.state();
        let presented = {
            let data = state.images.get(image).ok_or(Error::UnknownResource("image"))?;
            (data.desc.size, data.texels.clone())
        };
        state.presented = Some(presented);
        state.frames_presented += 1;
        state.commands.push(Command::Present { image });
        drop(state);
        Ok(self.surface_status())
    }
}
