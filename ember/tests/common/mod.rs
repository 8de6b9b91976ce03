#![allow(dead_code)]

use ember::{cpu::*, prelude::*};
use std::sync::Arc;

pub fn test_size() -> UVec2 {
    UVec2::new(48, 27)
}
pub const TEST_SEED: u64 = 1;

pub fn cpu_device() -> (Arc<CpuDevice>, SharedDevice) {
    let cpu = Arc::new(CpuDevice::new());
    let device: SharedDevice = cpu.clone();
    (cpu, device)
}

pub fn built_scene(device: &SharedDevice) -> SceneAccel {
    let mut accel = SceneAccel::new(device);
    accel.add_primitives(&generate_random_scene(TEST_SEED));
    accel.build().expect("scene builds");
    accel
}

pub fn renderer_with(settings: RenderSettings) -> (Arc<CpuDevice>, Renderer) {
    let (cpu, device) = cpu_device();
    let accel = built_scene(&device);
    let renderer = Renderer::new(&device, accel, test_size(), settings).expect("renderer builds");
    (cpu, renderer)
}

pub fn renderer() -> (Arc<CpuDevice>, Renderer) {
    renderer_with(RenderSettings::default())
}

pub fn dispatched_passes(commands: &[Command]) -> Vec<&'static str> {
    commands.iter().filter_map(Command::pass).collect()
}

pub fn read_f32(cpu: &CpuDevice, image: ImageId) -> Vec<f32> {
    cpu.read_image_vec4(image)
        .expect("image exists")
        .iter()
        .map(|v| v.x)
        .collect()
}
