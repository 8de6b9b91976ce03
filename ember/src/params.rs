use crate::{camera::CameraData, maths::*};
use bytemuck::{Pod, Zeroable};

/// Side length in pixels of one gradient stratum.
pub const STRATUM_SIZE: u32 = 3;
pub const GRADIENT_SMOOTHING_ITERATIONS: u32 = 3;
pub const GROUP_SIZE: u32 = 8;

pub const MISS_INSTANCE: u32 = u32::MAX;
pub const FORWARD_DEPTH_CLEAR: f32 = f32::MAX;
pub const MIN_GRADIENT_LUMINANCE: f32 = 1.0e-4;

pub fn stratum_size(size: UVec2) -> UVec2 {
    size.div_round_up(STRATUM_SIZE)
}

pub fn pcg_hash(input: u32) -> u32 {
    let state = input.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
    let word = ((state >> ((state >> 28) + 4)) ^ state).wrapping_mul(277_803_737);
    (word >> 22) ^ word
}

/// The pixel of a stratum that is re-shaded for gradient estimation this frame.
///
/// Ray generation and gradient sampling both derive it from this function so
/// they agree without sharing any extra image.
pub fn stratum_representative(cell: UVec2, frame_number: u32, size: UVec2) -> UVec2 {
    let hash = pcg_hash(frame_number ^ pcg_hash(cell.x ^ pcg_hash(cell.y)));
    let offset = hash % (STRATUM_SIZE * STRATUM_SIZE);
    let pixel = UVec2::new(
        cell.x * STRATUM_SIZE + offset % STRATUM_SIZE,
        cell.y * STRATUM_SIZE + offset / STRATUM_SIZE,
    );
    UVec2::new(pixel.x.min(size.x - 1), pixel.y.min(size.y - 1))
}

pub fn initial_seed(pixel: UVec2, size: UVec2, frame_number: u32) -> u32 {
    pcg_hash((pixel.y * size.x + pixel.x) ^ pcg_hash(frame_number))
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Zeroable, Pod)]
pub struct RayGenParams {
    pub view_proj: Mat4,
    pub prev_view_proj: Mat4,
    pub camera: CameraData,
    pub size: UVec2,
    pub frame_number: u32,
    pub max_bounces: u32,
    pub reuse_seeds: u32,
    pub pad: [u32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Zeroable, Pod)]
pub struct ForwardProjectParams {
    pub view_proj: Mat4,
    pub prev_inv_view_proj: Mat4,
    pub position: Vec3,
    pub frame_number: u32,
    pub size: UVec2,
    pub depth_threshold: f32,
    pub normal_threshold: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Zeroable, Pod)]
pub struct GradientSampleParams {
    pub size: UVec2,
    pub stratum_size: UVec2,
    pub frame_number: u32,
    pub gradient_scale: f32,
    pub depth_threshold: f32,
    pub min_luminance: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Zeroable, Pod)]
pub struct GradientSmoothParams {
    pub size: UVec2,
    pub stratum_size: UVec2,
    pub step_size: u32,
    pub frame_number: u32,
    pub sigma_depth: f32,
    pub sigma_normal: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Zeroable, Pod)]
pub struct TemporalParams {
    pub size: UVec2,
    pub stratum_size: UVec2,
    pub alpha: f32,
    pub moments_alpha: f32,
    pub adaptive: u32,
    pub antilag_scale: f32,
    pub frame_number: u32,
    pub max_history_length: f32,
    pub depth_threshold: f32,
    pub normal_threshold: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Zeroable, Pod)]
pub struct SpatialFilterParams {
    pub size: UVec2,
    pub step_size: u32,
    pub sigma_luminance: f32,
    pub sigma_depth: f32,
    pub sigma_normal: f32,
    pub pad: [u32; 2],
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    #[test]
    fn representative_stays_inside_its_cell() {
        let size = UVec2::new(20, 10);
        let strata = stratum_size(size);
        assert_eq!(strata, UVec2::new(7, 4));
        for frame in 0..8 {
            for y in 0..strata.y {
                for x in 0..strata.x {
                    let cell = UVec2::new(x, y);
                    let pixel = stratum_representative(cell, frame, size);
                    assert!(pixel.x < size.x && pixel.y < size.y);
                    assert_eq!(pixel.x / STRATUM_SIZE, x);
                    assert_eq!(pixel.y / STRATUM_SIZE, y);
                }
            }
        }
    }

    #[test]
    fn representative_varies_over_frames() {
        let size = UVec2::new(30, 30);
        let cell = UVec2::new(2, 3);
        let first = stratum_representative(cell, 0, size);
        assert!((1..32).any(|frame| stratum_representative(cell, frame, size) != first));
    }

    #[test]
    fn parameter_blocks_have_no_padding_surprises() {
        assert_eq!(mem::size_of::<RayGenParams>() % 16, 0);
        assert_eq!(mem::size_of::<ForwardProjectParams>() % 16, 0);
        assert_eq!(mem::size_of::<TemporalParams>() % 8, 0);
        assert_eq!(mem::size_of::<SpatialFilterParams>(), 32);
    }
}
