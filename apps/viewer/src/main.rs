mod allocator;
mod command_buffer;
mod context;
mod descriptor;
mod pipeline;
mod swapchain;
mod vulkan_device;
mod window_surface;

use crate::context::*;
use crate::pipeline::ShaderLoader;
use crate::swapchain::*;
use crate::vulkan_device::VulkanDevice;
use anyhow::{Context as _, Result};
use ember::prelude::*;
use log::{error, info};
use spark::vk;
use std::collections::HashSet;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Instant;
use structopt::StructOpt;
use strum::VariantNames;
use winit::{
    dpi::{LogicalSize, PhysicalSize, Size},
    event::{DeviceEvent, ElementState, Event, KeyboardInput, MouseButton, VirtualKeyCode, WindowEvent},
    event_loop::EventLoop,
    window::{Window, WindowBuilder},
};

#[derive(Debug, StructOpt)]
#[structopt(no_version)]
struct AppParams {
    /// Render width in pixels
    #[structopt(long, default_value = "1200")]
    width: u32,

    /// Render height in pixels
    #[structopt(long, default_value = "675")]
    height: u32,

    /// Seed for the random sphere field
    #[structopt(long, default_value = "0")]
    seed: u64,

    /// Number of a-trous filter passes
    #[structopt(short, long, default_value = "4")]
    iterations: u32,

    /// Temporal blend factor for new samples
    #[structopt(short, long, default_value = "0.1")]
    alpha: f32,

    /// Disable gradient estimation and antilag
    #[structopt(long)]
    no_adaptive: bool,

    /// Strength of the antilag response to temporal gradients
    #[structopt(long, default_value = "1")]
    antilag_scale: f32,

    /// Maximum number of scattering events per path
    #[structopt(short = "b", long, default_value = "4")]
    max_bounces: u32,

    /// Directory containing the compiled SPIR-V programs
    #[structopt(long, parse(from_os_str), default_value = "spv/bin")]
    shader_dir: PathBuf,

    /// Swapchain presentation mode
    #[structopt(long, possible_values = PresentMode::VARIANTS, parse(try_from_str = try_present_mode_from_str), default_value = "fifo")]
    present_mode: PresentMode,

    /// Enable the validation messenger
    #[structopt(long)]
    debug: bool,
}

impl AppParams {
    fn render_settings(&self) -> RenderSettings {
        RenderSettings {
            alpha: self.alpha,
            filter_iterations: self.iterations,
            adaptive: !self.no_adaptive,
            antilag_scale: self.antilag_scale,
            max_bounces: self.max_bounces,
            ..Default::default()
        }
    }
}

fn control_action(key: VirtualKeyCode) -> Option<ControlAction> {
    let action = match key {
        VirtualKeyCode::W => ControlAction::Move(MoveDirection::Forward),
        VirtualKeyCode::S => ControlAction::Move(MoveDirection::Back),
        VirtualKeyCode::A => ControlAction::Move(MoveDirection::Left),
        VirtualKeyCode::D => ControlAction::Move(MoveDirection::Right),
        VirtualKeyCode::E => ControlAction::Move(MoveDirection::Up),
        VirtualKeyCode::Q => ControlAction::Move(MoveDirection::Down),
        VirtualKeyCode::LShift | VirtualKeyCode::RShift => ControlAction::Sprint,
        VirtualKeyCode::R => ControlAction::Reset,
        VirtualKeyCode::Up => ControlAction::AlphaUp,
        VirtualKeyCode::Down => ControlAction::AlphaDown,
        VirtualKeyCode::RBracket => ControlAction::IterationsUp,
        VirtualKeyCode::LBracket => ControlAction::IterationsDown,
        VirtualKeyCode::Tab => ControlAction::ToggleAdaptive,
        VirtualKeyCode::Right => ControlAction::AntilagUp,
        VirtualKeyCode::Left => ControlAction::AntilagDown,
        _ => return None,
    };
    Some(action)
}

fn window_extent(size: PhysicalSize<u32>) -> vk::Extent2D {
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}

struct FrameTimer {
    last_frame: Instant,
    window_start: Instant,
    window_frames: u32,
}

impl FrameTimer {
    const LOG_INTERVAL_SECONDS: f32 = 2.0;

    fn new() -> Self {
        let now = Instant::now();
        Self {
            last_frame: now,
            window_start: now,
            window_frames: 0,
        }
    }

    /// Returns the time since the previous frame.
    fn tick(&mut self, report: Option<&FrameReport>) -> f32 {
        let now = Instant::now();
        let dt = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;

        self.window_frames += 1;
        let elapsed = now.duration_since(self.window_start).as_secs_f32();
        if elapsed >= Self::LOG_INTERVAL_SECONDS {
            if let Some(report) = report {
                info!(
                    "{:.1} fps, frame {}, adaptive {}, {} filter passes",
                    self.window_frames as f32 / elapsed,
                    report.frame_number,
                    report.adaptive_active,
                    report.filter_iterations
                );
            }
            self.window_start = now;
            self.window_frames = 0;
        }
        dt
    }
}

struct App {
    // dropped in declaration order: the renderer releases its resources before the device
    renderer: Renderer,
    device: Arc<VulkanDevice>,
    camera: Camera,
    controller: CameraController,
    held_keys: HashSet<VirtualKeyCode>,
    is_looking: bool,
    timer: FrameTimer,
    last_report: Option<FrameReport>,
    window: Window,
}

impl App {
    fn new(params: &AppParams, window: Window) -> Result<Self> {
        let context_params = ContextParams {
            is_debug: params.debug,
            ..Default::default()
        };
        let context = Context::new(&window, &context_params).context("failed to create Vulkan context")?;

        let device = Arc::new(
            VulkanDevice::new(
                &context,
                window_extent(window.inner_size()),
                params.present_mode,
                ShaderLoader::new(&params.shader_dir),
            )
            .context("failed to create device")?,
        );
        let shared_device: SharedDevice = Arc::clone(&device) as SharedDevice;
        require_all_capabilities(shared_device.as_ref()).context("device cannot run the renderer")?;

        let mut accel = SceneAccel::new(&shared_device);
        accel.add_primitives(&generate_random_scene(params.seed));
        accel.build().context("failed to build scene")?;

        let settings = params.render_settings();
        settings.validate().context("bad command line settings")?;
        let size = UVec2::new(params.width, params.height);
        let renderer = Renderer::new(&shared_device, accel, size, settings).context("failed to create renderer")?;
        info!("rendering at {}x{} with {:?}", size.x, size.y, settings);

        Ok(Self {
            renderer,
            device,
            camera: Camera::default(),
            controller: CameraController::default(),
            held_keys: HashSet::new(),
            is_looking: false,
            timer: FrameTimer::new(),
            last_report: None,
            window,
        })
    }

    fn handle_key(&mut self, key: VirtualKeyCode, state: ElementState) {
        let pressed = state == ElementState::Pressed;
        // ignore auto-repeat so that toggles fire once per press
        let is_repeat = pressed && !self.held_keys.insert(key);
        if !pressed {
            self.held_keys.remove(&key);
        }
        if is_repeat {
            return;
        }
        if let Some(action) = control_action(key) {
            let settings = self.renderer.settings_mut();
            let before = *settings;
            self.controller.handle(action, pressed, &mut self.camera, settings);
            if *settings != before {
                info!(
                    "alpha {:.2}, {} filter passes, adaptive {}, antilag scale {:.2}",
                    settings.alpha, settings.filter_iterations, settings.adaptive, settings.antilag_scale
                );
            }
        }
    }

    fn render(&mut self) -> ember::prelude::Result<()> {
        let size = self.window.inner_size();
        if size.width == 0 || size.height == 0 {
            return Ok(());
        }
        let dt = self.timer.tick(self.last_report.as_ref());
        self.controller.update(&mut self.camera, dt);
        let report = self.renderer.render_frame(&self.camera)?;
        self.last_report = Some(report);
        Ok(())
    }
}

fn run(params: AppParams) -> Result<()> {
    let event_loop = EventLoop::new();
    let window = WindowBuilder::new()
        .with_title("ember")
        .with_inner_size(Size::Logical(LogicalSize::new(
            f64::from(params.width),
            f64::from(params.height),
        )))
        .with_resizable(false)
        .build(&event_loop)
        .context("failed to create window")?;

    let mut app = Some(App::new(&params, window)?);
    event_loop.run(move |event, _target, control_flow| {
        control_flow.set_poll();
        let current = match app.as_mut() {
            Some(current) => current,
            None => return,
        };
        match event {
            Event::WindowEvent { event, .. } => match event {
                WindowEvent::CloseRequested => control_flow.set_exit(),
                WindowEvent::KeyboardInput {
                    input:
                        KeyboardInput {
                            state,
                            virtual_keycode: Some(key),
                            ..
                        },
                    ..
                } => {
                    if key == VirtualKeyCode::Escape {
                        control_flow.set_exit();
                    } else {
                        current.handle_key(key, state);
                    }
                }
                WindowEvent::MouseInput {
                    state,
                    button: MouseButton::Left,
                    ..
                } => current.is_looking = state == ElementState::Pressed,
                _ => {}
            },
            Event::DeviceEvent {
                event: DeviceEvent::MouseMotion { delta: (dx, dy) },
                ..
            } => {
                if current.is_looking {
                    current
                        .controller
                        .look(&mut current.camera, Vec2::new(dx as f32, dy as f32));
                }
            }
            Event::RedrawEventsCleared => {
                if let Err(err) = current.render() {
                    error!("{}", err);
                    control_flow.set_exit_with_code(1);
                }
            }
            Event::LoopDestroyed => {
                app.take();
            }
            _ => {}
        }
    })
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let params = AppParams::from_args();
    if let Err(err) = run(params) {
        error!("{:#}", err);
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn movement_keys_map_to_all_directions() {
        let keys = [
            VirtualKeyCode::W,
            VirtualKeyCode::S,
            VirtualKeyCode::A,
            VirtualKeyCode::D,
            VirtualKeyCode::E,
            VirtualKeyCode::Q,
        ];
        let directions: Vec<_> = keys
            .iter()
            .filter_map(|&key| match control_action(key) {
                Some(ControlAction::Move(direction)) => Some(direction),
                _ => None,
            })
            .collect();
        assert_eq!(
            directions,
            vec![
                MoveDirection::Forward,
                MoveDirection::Back,
                MoveDirection::Left,
                MoveDirection::Right,
                MoveDirection::Up,
                MoveDirection::Down
            ]
        );
    }

    #[test]
    fn tunable_keys_come_in_pairs() {
        assert_eq!(control_action(VirtualKeyCode::Up), Some(ControlAction::AlphaUp));
        assert_eq!(control_action(VirtualKeyCode::Down), Some(ControlAction::AlphaDown));
        assert_eq!(control_action(VirtualKeyCode::RBracket), Some(ControlAction::IterationsUp));
        assert_eq!(control_action(VirtualKeyCode::LBracket), Some(ControlAction::IterationsDown));
        assert_eq!(control_action(VirtualKeyCode::Right), Some(ControlAction::AntilagUp));
        assert_eq!(control_action(VirtualKeyCode::Left), Some(ControlAction::AntilagDown));
        assert_eq!(control_action(VirtualKeyCode::Tab), Some(ControlAction::ToggleAdaptive));
        assert_eq!(control_action(VirtualKeyCode::Escape), None);
    }

    #[test]
    fn command_line_defaults_match_render_defaults() {
        let params = AppParams::from_iter_safe(&["viewer"]).unwrap();
        assert_eq!(params.render_settings(), RenderSettings::default());
        assert_eq!(params.present_mode, PresentMode::Fifo);
        assert_eq!(params.shader_dir, PathBuf::from("spv/bin"));
    }

    #[test]
    fn command_line_overrides_settings() {
        let params = AppParams::from_iter_safe(&["viewer", "--no-adaptive", "-i", "2", "--alpha", "0.5"]).unwrap();
        let settings = params.render_settings();
        assert!(!settings.adaptive);
        assert_eq!(settings.filter_iterations, 2);
        assert_eq!(settings.alpha, 0.5);
    }
}
