use crate::{
    accel::*, camera::*, device::*, error::*, maths::*, params::*, passes::*, resource::*, settings::*,
};
use log::{debug, info, warn};

/// Two images selected between by index, released second first.
pub struct PingPong {
    second: Image,
    first: Image,
}

impl PingPong {
    fn new(device: &SharedDevice, labels: [&'static str; 2], size: UVec2, format: Format) -> Result<Self> {
        let first = Image::new(device, ImageDesc::new(labels[0], size, format))?;
        let second = Image::new(device, ImageDesc::new(labels[1], size, format))?;
        Ok(Self { second, first })
    }

    pub fn id(&self, index: usize) -> ImageId {
        if index == 0 {
            self.first.id()
        } else {
            self.second.id()
        }
    }
}

pub struct FrameResources {
    // released in reverse order of construction
    filter: PingPong,
    history_length: PingPong,
    history_moments: PingPong,
    history_color: PingPong,
    gradient: PingPong,
    forward_depth: Image,
    forward_seed: Image,
    forward_color: Image,
    prev_seed: Image,
    prev_visibility: Image,
    prev_radiance: Image,
    seed: Image,
    motion: Image,
    visibility: Image,
    radiance: Image,
    size: UVec2,
    stratum_size: UVec2,
}

impl FrameResources {
    pub fn new(device: &SharedDevice, size: UVec2) -> Result<Self> {
        let stratum_size = stratum_size(size);
        let image = |label, format| Image::new(device, ImageDesc::new(label, size, format));

        let radiance = image("radiance", Format::Rgba32Float)?;
        let visibility = image("visibility", Format::Rgba32Uint)?;
        let motion = image("motion", Format::Rgba32Float)?;
        let seed = image("seed", Format::R32Uint)?;
        let prev_radiance = image("prev-radiance", Format::Rgba32Float)?;
        let prev_visibility = image("prev-visibility", Format::Rgba32Uint)?;
        let prev_seed = image("prev-seed", Format::R32Uint)?;
        let forward_color = image("forward-color", Format::Rgba32Float)?;
        let forward_seed = image("forward-seed", Format::R32Uint)?;
        let forward_depth = image("forward-depth", Format::R32Float)?;
        let gradient = PingPong::new(device, ["gradient-0", "gradient-1"], stratum_size, Format::Rgba32Float)?;
        let history_color = PingPong::new(
            device,
            ["history-color-0", "history-color-1"],
            size,
            Format::Rgba32Float,
        )?;
        let history_moments = PingPong::new(
            device,
            ["history-moments-0", "history-moments-1"],
            size,
            Format::Rg32Float,
        )?;
        let history_length = PingPong::new(
            device,
            ["history-length-0", "history-length-1"],
            size,
            Format::R32Float,
        )?;
        let filter = PingPong::new(device, ["filter-a", "filter-b"], size, Format::Rgba32Float)?;

        Ok(Self {
            filter,
            history_length,
            history_moments,
            history_color,
            gradient,
            forward_depth,
            forward_seed,
            forward_color,
            prev_seed,
            prev_visibility,
            prev_radiance,
            seed,
            motion,
            visibility,
            radiance,
            size,
            stratum_size,
        })
    }

    pub fn size(&self) -> UVec2 {
        self.size
    }

    pub fn stratum_size(&self) -> UVec2 {
        self.stratum_size
    }

    pub fn radiance(&self) -> ImageId {
        self.radiance.id()
    }

    pub fn visibility(&self) -> ImageId {
        self.visibility.id()
    }

    pub fn motion(&self) -> ImageId {
        self.motion.id()
    }

    pub fn seed(&self) -> ImageId {
        self.seed.id()
    }

    pub fn prev_radiance(&self) -> ImageId {
        self.prev_radiance.id()
    }

    pub fn prev_visibility(&self) -> ImageId {
        self.prev_visibility.id()
    }

    pub fn prev_seed(&self) -> ImageId {
        self.prev_seed.id()
    }

    pub fn forward_color(&self) -> ImageId {
        self.forward_color.id()
    }

    pub fn forward_seed(&self) -> ImageId {
        self.forward_seed.id()
    }

    pub fn forward_depth(&self) -> ImageId {
        self.forward_depth.id()
    }

    pub fn gradient(&self, index: usize) -> ImageId {
        self.gradient.id(index)
    }

    pub fn history_color(&self, index: usize) -> ImageId {
        self.history_color.id(index)
    }

    pub fn history_moments(&self, index: usize) -> ImageId {
        self.history_moments.id(index)
    }

    pub fn history_length(&self, index: usize) -> ImageId {
        self.history_length.id(index)
    }

    /// Image behind a spatial filter endpoint, where the accumulated result is the
    /// history half written this frame.
    pub fn filter_image(&self, image: FilterImage, history_index: usize) -> ImageId {
        match image.working_index() {
            Some(index) => self.filter.id(index),
            None => self.history_color(history_write(history_index)),
        }
    }
}

struct Pipelines {
    // released in reverse order of construction
    spatial_filter: Pipeline,
    temporal: Pipeline,
    gradient_smoothing: Pipeline,
    gradient_sampling: Pipeline,
    forward_projection: Pipeline,
    ray_generation: Pipeline,
}

impl Pipelines {
    fn new(device: &SharedDevice) -> Result<Self> {
        let pipeline = |program| Pipeline::new(device, program_desc(program));
        let ray_generation = pipeline(Program::RayGeneration)?;
        let forward_projection = pipeline(Program::ForwardProjection)?;
        let gradient_sampling = pipeline(Program::GradientSampling)?;
        let gradient_smoothing = pipeline(Program::GradientSmoothing)?;
        let temporal = pipeline(Program::TemporalAccumulation)?;
        let spatial_filter = pipeline(Program::SpatialFilter)?;
        Ok(Self {
            spatial_filter,
            temporal,
            gradient_smoothing,
            gradient_sampling,
            forward_projection,
            ray_generation,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameState {
    pub frame_number: u32,
    pub history_index: usize,
    pub first_frame: bool,
}

impl Default for FrameState {
    fn default() -> Self {
        Self {
            frame_number: 0,
            history_index: 0,
            first_frame: true,
        }
    }
}

impl FrameState {
    pub fn complete_frame(&mut self) {
        self.history_index = history_write(self.history_index);
        self.frame_number += 1;
        self.first_frame = false;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    pub frame_number: u32,
    pub adaptive_active: bool,
    pub filter_iterations: u32,
    pub output: FilterImage,
    pub output_image: ImageId,
    pub surface_status: SurfaceStatus,
}

pub struct Renderer {
    // released in reverse order of construction
    resources: FrameResources,
    pipelines: Pipelines,
    accel: SceneAccel,
    device: SharedDevice,
    settings: RenderSettings,
    state: FrameState,
    prev_camera: Option<CameraFrame>,
    reported_suboptimal: bool,
}

impl Renderer {
    pub fn new(device: &SharedDevice, accel: SceneAccel, size: UVec2, settings: RenderSettings) -> Result<Self> {
        require_all_capabilities(device.as_ref())?;
        settings.validate()?;
        if !accel.is_built() {
            return Err(Error::SceneNotBuilt);
        }

        let pipelines = Pipelines::new(device)?;
        let resources = FrameResources::new(device, size)?;
        info!(
            "renderer ready: {}x{} with {}x{} gradient strata, {} instances",
            size.x,
            size.y,
            resources.stratum_size.x,
            resources.stratum_size.y,
            accel.instance_count()
        );

        Ok(Self {
            resources,
            pipelines,
            accel,
            device: SharedDevice::clone(device),
            settings,
            state: FrameState::default(),
            prev_camera: None,
            reported_suboptimal: false,
        })
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// Changes take effect from the next call to `render_frame`.
    pub fn settings_mut(&mut self) -> &mut RenderSettings {
        &mut self.settings
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn resources(&self) -> &FrameResources {
        &self.resources
    }

    pub fn accel(&self) -> &SceneAccel {
        &self.accel
    }

    pub fn device(&self) -> &SharedDevice {
        &self.device
    }

    fn note_surface_status(&mut self, status: SurfaceStatus) {
        if status == SurfaceStatus::Suboptimal && !self.reported_suboptimal {
            warn!("surface is suboptimal, frames continue to render");
            self.reported_suboptimal = true;
        }
    }

    pub fn render_frame(&mut self, camera: &Camera) -> Result<FrameReport> {
        let settings = self.settings;
        settings.validate()?;

        let size = self.resources.size;
        let stratum_size = self.resources.stratum_size;
        let frame = camera.frame(size);
        let prev_frame = self.prev_camera.unwrap_or(frame);
        let FrameState {
            frame_number,
            history_index,
            ..
        } = self.state;
        let adaptive_active = settings.adaptive && frame_number > 0;
        let history_in = history_read(history_index);
        let history_out = history_write(history_index);

        let view_proj = frame.view_projection();
        let top_level = self.accel.top_level()?;
        let materials = self.accel.material_buffer()?;
        let device = SharedDevice::clone(&self.device);
        let res = &self.resources;
        let pipelines = &self.pipelines;

        let acquire_status = device.begin_frame()?;
        debug!(
            "frame {}: history {} -> {}, adaptive {}",
            frame_number, history_in, history_out, adaptive_active
        );

        if adaptive_active {
            device.clear_image(res.forward_color(), ClearValue::Float([0.0; 4]))?;
            device.clear_image(res.forward_seed(), ClearValue::Uint([0; 4]))?;
            device.clear_image(
                res.forward_depth(),
                ClearValue::Float([FORWARD_DEPTH_CLEAR, 0.0, 0.0, 0.0]),
            )?;
            device.barrier();

            let params = ForwardProjectParams {
                view_proj,
                prev_inv_view_proj: prev_frame.inverse_view_projection(),
                position: frame.position,
                frame_number,
                size,
                depth_threshold: settings.depth_threshold,
                normal_threshold: settings.normal_threshold,
            };
            let entries = ForwardProjectionLayout::entries(
                &params,
                res.prev_radiance(),
                res.prev_visibility(),
                res.prev_seed(),
                res.forward_color(),
                res.forward_seed(),
                res.forward_depth(),
            );
            device.dispatch("forward-projection", pipelines.forward_projection.id(), &entries, size)?;
            device.barrier();
        }

        {
            let params = RayGenParams {
                view_proj,
                prev_view_proj: prev_frame.view_projection(),
                camera: frame.data(),
                size,
                frame_number,
                max_bounces: settings.max_bounces,
                reuse_seeds: adaptive_active as u32,
                pad: [0; 3],
            };
            let entries = RayGenerationLayout::entries(
                &params,
                top_level,
                materials,
                res.forward_seed(),
                res.forward_depth(),
                res.radiance(),
                res.visibility(),
                res.motion(),
                res.seed(),
            );
            device.trace_rays("ray-generation", pipelines.ray_generation.id(), &entries, size)?;
            device.barrier();
        }

        if adaptive_active {
            let params = GradientSampleParams {
                size,
                stratum_size,
                frame_number,
                gradient_scale: settings.gradient_scale,
                depth_threshold: settings.depth_threshold,
                min_luminance: MIN_GRADIENT_LUMINANCE,
            };
            let entries = GradientSamplingLayout::entries(
                &params,
                res.radiance(),
                res.visibility(),
                res.forward_color(),
                res.forward_depth(),
                res.gradient(GRADIENT_SAMPLE_TARGET),
            );
            device.dispatch("gradient-sampling", pipelines.gradient_sampling.id(), &entries, stratum_size)?;
            device.barrier();

            for iteration in 0..GRADIENT_SMOOTHING_ITERATIONS {
                let (read, write) = gradient_smooth_io(iteration);
                let params = GradientSmoothParams {
                    size,
                    stratum_size,
                    step_size: gradient_step_size(iteration),
                    frame_number,
                    sigma_depth: settings.sigma_depth,
                    sigma_normal: settings.sigma_normal,
                };
                let entries = GradientSmoothingLayout::entries(
                    &params,
                    res.visibility(),
                    res.gradient(read),
                    res.gradient(write),
                );
                device.dispatch(
                    "gradient-smoothing",
                    pipelines.gradient_smoothing.id(),
                    &entries,
                    stratum_size,
                )?;
                device.barrier();
            }
        }

        {
            let params = TemporalParams {
                size,
                stratum_size,
                alpha: settings.alpha,
                moments_alpha: settings.moments_alpha,
                adaptive: adaptive_active as u32,
                antilag_scale: settings.antilag_scale,
                frame_number,
                max_history_length: settings.max_history_length as f32,
                depth_threshold: settings.depth_threshold,
                normal_threshold: settings.normal_threshold,
            };
            let entries = TemporalLayout::entries(
                &params,
                res.radiance(),
                res.visibility(),
                res.motion(),
                res.prev_visibility(),
                res.gradient(gradient_output()),
                res.history_color(history_in),
                res.history_moments(history_in),
                res.history_length(history_in),
                res.history_color(history_out),
                res.history_moments(history_out),
                res.history_length(history_out),
            );
            device.dispatch("temporal-accumulation", pipelines.temporal.id(), &entries, size)?;
            device.barrier();
        }

        for pass in 0..settings.filter_iterations {
            let (read, write) = filter_pass_io(pass);
            let params = SpatialFilterParams {
                size,
                step_size: filter_step_size(pass),
                sigma_luminance: settings.sigma_luminance,
                sigma_depth: settings.sigma_depth,
                sigma_normal: settings.sigma_normal,
                pad: [0; 2],
            };
            let entries = SpatialFilterLayout::entries(
                &params,
                res.visibility(),
                res.filter_image(read, history_index),
                res.filter_image(write, history_index),
            );
            device.dispatch("spatial-filter", pipelines.spatial_filter.id(), &entries, size)?;
            device.barrier();
        }

        let output = filter_output(settings.filter_iterations);
        let output_image = res.filter_image(output, history_index);

        device.copy_image(res.radiance(), res.prev_radiance())?;
        device.copy_image(res.seed(), res.prev_seed())?;
        device.copy_image(res.visibility(), res.prev_visibility())?;
        let present_status = device.present(output_image)?;

        self.note_surface_status(acquire_status);
        self.note_surface_status(present_status);
        self.state.complete_frame();
        self.prev_camera = Some(frame);

        Ok(FrameReport {
            frame_number,
            adaptive_active,
            filter_iterations: settings.filter_iterations,
            output,
            output_image,
            surface_status: present_status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_state_flips_parity_every_frame() {
        let mut state = FrameState::default();
        assert!(state.first_frame);
        for n in 1..=7u32 {
            state.complete_frame();
            assert_eq!(state.frame_number, n);
            assert_eq!(state.history_index, (n % 2) as usize);
            assert!(!state.first_frame);
        }
    }
}
