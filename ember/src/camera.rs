use crate::{maths::*, settings::*};
use bytemuck::{Pod, Zeroable};
use std::f32::consts::PI;

pub const MAX_PITCH_DEGREES: f32 = 89.0;

pub fn world_up() -> Vec3 {
    Vec3::unit_y()
}

pub fn radians(degrees: f32) -> f32 {
    degrees * PI / 180.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub vfov_degrees: f32,
    pub defocus_angle_degrees: f32,
    pub focus_distance: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self::look_at(Vec3::new(13.0, 2.0, 3.0), Vec3::zero(), 20.0, 0.6, 10.0)
    }
}

impl Camera {
    pub fn look_at(
        position: Vec3,
        target: Vec3,
        vfov_degrees: f32,
        defocus_angle_degrees: f32,
        focus_distance: f32,
    ) -> Self {
        let dir = (target - position).normalized();
        Self {
            position,
            yaw: dir.x.atan2(-dir.z),
            pitch: dir.y.max(-1.0).min(1.0).asin(),
            vfov_degrees,
            defocus_angle_degrees,
            focus_distance,
        }
    }

    pub fn forward(&self) -> Vec3 {
        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();
        Vec3::new(cos_pitch * sin_yaw, sin_pitch, -cos_pitch * cos_yaw)
    }

    pub fn frame(&self, size: UVec2) -> CameraFrame {
        let forward = self.forward();
        let right = forward.cross(world_up()).normalized();
        let up = right.cross(forward);
        let aspect = size.x as f32 / size.y as f32;
        let half_height = (0.5 * radians(self.vfov_degrees)).tan();
        CameraFrame {
            position: self.position,
            forward,
            right,
            up,
            half_extent: Vec2::new(aspect * half_height, half_height),
            size,
            defocus_radius: self.focus_distance * (0.5 * radians(self.defocus_angle_degrees)).tan(),
            focus_distance: self.focus_distance,
        }
    }
}

/// Camera basis for one frame at a given resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraFrame {
    pub position: Vec3,
    pub forward: Vec3,
    pub right: Vec3,
    pub up: Vec3,
    pub half_extent: Vec2,
    pub size: UVec2,
    pub defocus_radius: f32,
    pub focus_distance: f32,
}

impl CameraFrame {
    pub fn ndc_from_pixel(&self, pixel: Vec2) -> Vec2 {
        Vec2::new(
            2.0 * pixel.x / self.size.x as f32 - 1.0,
            1.0 - 2.0 * pixel.y / self.size.y as f32,
        )
    }

    /// Unnormalized direction through a position in pixel coordinates, with unit
    /// length along the forward axis.
    pub fn ray_direction(&self, pixel: Vec2) -> Vec3 {
        let ndc = self.ndc_from_pixel(pixel);
        self.forward + self.right * (ndc.x * self.half_extent.x) + self.up * (ndc.y * self.half_extent.y)
    }

    /// Maps a world point to clip space as `(x, y, 1, depth)`, so that after the
    /// divide `z` holds reciprocal depth and `w` the linear view depth.
    pub fn view_projection(&self) -> Mat4 {
        let sx = self.right / self.half_extent.x;
        let sy = self.up / self.half_extent.y;
        let f = self.forward;
        let p = self.position;
        Mat4::new(
            Vec4::new(sx.x, sy.x, 0.0, f.x),
            Vec4::new(sx.y, sy.y, 0.0, f.y),
            Vec4::new(sx.z, sy.z, 0.0, f.z),
            Vec4::new(-p.dot(sx), -p.dot(sy), 1.0, -p.dot(f)),
        )
    }

    pub fn inverse_view_projection(&self) -> Mat4 {
        self.view_projection().inversed()
    }

    /// Projects a world point to a pixel position, with its view depth.
    pub fn project(&self, point: Vec3) -> Option<(Vec2, f32)> {
        project_with(&self.view_projection(), self.size, point)
    }

    pub fn data(&self) -> CameraData {
        CameraData {
            position: self.position,
            defocus_radius: self.defocus_radius,
            forward: self.forward,
            focus_distance: self.focus_distance,
            right: self.right,
            half_width: self.half_extent.x,
            up: self.up,
            half_height: self.half_extent.y,
        }
    }
}

pub fn project_with(view_projection: &Mat4, size: UVec2, point: Vec3) -> Option<(Vec2, f32)> {
    let clip = *view_projection * point.into_homogeneous_point();
    if clip.w <= 0.0 {
        return None;
    }
    let ndc = Vec2::new(clip.x / clip.w, clip.y / clip.w);
    let pixel = Vec2::new(
        0.5 * (ndc.x + 1.0) * size.x as f32,
        0.5 * (1.0 - ndc.y) * size.y as f32,
    );
    Some((pixel, clip.w))
}

/// Inverse of `project_with` for a pixel position and view depth.
pub fn unproject_with(inverse_view_projection: &Mat4, size: UVec2, pixel: Vec2, depth: f32) -> Vec3 {
    let ndc = Vec2::new(2.0 * pixel.x / size.x as f32 - 1.0, 1.0 - 2.0 * pixel.y / size.y as f32);
    let h = *inverse_view_projection * Vec4::new(ndc.x, ndc.y, 1.0 / depth, 1.0);
    h.xyz() / h.w
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Zeroable, Pod)]
pub struct CameraData {
    pub position: Vec3,
    pub defocus_radius: f32,
    pub forward: Vec3,
    pub focus_distance: f32,
    pub right: Vec3,
    pub half_width: f32,
    pub up: Vec3,
    pub half_height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveDirection {
    Forward,
    Back,
    Left,
    Right,
    Up,
    Down,
}

const MOVE_DIRECTION_COUNT: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Move(MoveDirection),
    Sprint,
    Reset,
    AlphaUp,
    AlphaDown,
    IterationsUp,
    IterationsDown,
    ToggleAdaptive,
    AntilagUp,
    AntilagDown,
}

pub const ALPHA_STEP: f32 = 0.01;
pub const ANTILAG_STEP: f32 = 0.25;

pub struct CameraController {
    held: [bool; MOVE_DIRECTION_COUNT],
    sprint: bool,
    pub move_speed: f32,
    pub sprint_factor: f32,
    pub look_sensitivity: f32,
}

impl Default for CameraController {
    fn default() -> Self {
        Self {
            held: [false; MOVE_DIRECTION_COUNT],
            sprint: false,
            move_speed: 2.0,
            sprint_factor: 4.0,
            look_sensitivity: radians(0.1),
        }
    }
}

impl CameraController {
    /// Movement and sprint follow key state, everything else fires on press.
    pub fn handle(&mut self, action: ControlAction, pressed: bool, camera: &mut Camera, settings: &mut RenderSettings) {
        match action {
            ControlAction::Move(direction) => self.held[direction as usize] = pressed,
            ControlAction::Sprint => self.sprint = pressed,
            _ if !pressed => {}
            ControlAction::Reset => *camera = Camera::default(),
            ControlAction::AlphaUp => settings.adjust_alpha(ALPHA_STEP),
            ControlAction::AlphaDown => settings.adjust_alpha(-ALPHA_STEP),
            ControlAction::IterationsUp => settings.adjust_filter_iterations(1),
            ControlAction::IterationsDown => settings.adjust_filter_iterations(-1),
            ControlAction::ToggleAdaptive => settings.toggle_adaptive(),
            ControlAction::AntilagUp => settings.adjust_antilag_scale(ANTILAG_STEP),
            ControlAction::AntilagDown => settings.adjust_antilag_scale(-ANTILAG_STEP),
        }
    }

    pub fn look(&self, camera: &mut Camera, delta: Vec2) {
        let max_pitch = radians(MAX_PITCH_DEGREES);
        camera.yaw += delta.x * self.look_sensitivity;
        camera.pitch = (camera.pitch - delta.y * self.look_sensitivity)
            .max(-max_pitch)
            .min(max_pitch);
    }

    pub fn is_moving(&self) -> bool {
        self.held.iter().any(|&held| held)
    }

    pub fn update(&self, camera: &mut Camera, dt: f32) {
        let forward = camera.forward();
        let right = forward.cross(world_up()).normalized();
        let axis = |positive: MoveDirection, negative: MoveDirection| {
            (self.held[positive as usize] as i32 - self.held[negative as usize] as i32) as f32
        };
        let motion = forward * axis(MoveDirection::Forward, MoveDirection::Back)
            + right * axis(MoveDirection::Right, MoveDirection::Left)
            + world_up() * axis(MoveDirection::Up, MoveDirection::Down);
        if motion.mag_sq() > 0.0 {
            let speed = if self.sprint {
                self.move_speed * self.sprint_factor
            } else {
                self.move_speed
            };
            camera.position += motion.normalized() * (speed * dt);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32, eps: f32) -> bool {
        (a - b).abs() < eps
    }

    #[test]
    fn default_camera_looks_at_origin() {
        let camera = Camera::default();
        let expected = (-camera.position).normalized();
        assert!((camera.forward() - expected).mag() < 1.0e-5);
    }

    #[test]
    fn basis_is_orthonormal() {
        let frame = Camera::default().frame(UVec2::new(1200, 675));
        assert!(approx(frame.right.dot(frame.forward), 0.0, 1.0e-5));
        assert!(approx(frame.up.dot(frame.forward), 0.0, 1.0e-5));
        assert!(approx(frame.up.mag(), 1.0, 1.0e-5));
        assert!(frame.up.y > 0.0);
    }

    #[test]
    fn projection_inverts_ray_direction() {
        let frame = Camera::default().frame(UVec2::new(64, 36));
        let pixel = Vec2::new(10.25, 30.75);
        let point = frame.position + frame.ray_direction(pixel) * 7.5;
        let (projected, depth) = frame.project(point).unwrap();
        assert!(approx(projected.x, pixel.x, 1.0e-3));
        assert!(approx(projected.y, pixel.y, 1.0e-3));
        assert!(approx(depth, 7.5, 1.0e-4));

        let back = unproject_with(&frame.inverse_view_projection(), frame.size, pixel, depth);
        assert!((back - point).mag() < 1.0e-3);
    }

    #[test]
    fn points_behind_camera_do_not_project() {
        let frame = Camera::default().frame(UVec2::new(64, 36));
        let behind = frame.position - frame.forward * 2.0;
        assert!(frame.project(behind).is_none());
    }

    #[test]
    fn pitch_is_clamped() {
        let controller = CameraController::default();
        let mut camera = Camera::default();
        controller.look(&mut camera, Vec2::new(0.0, -100_000.0));
        assert!(approx(camera.pitch, radians(MAX_PITCH_DEGREES), 1.0e-5));
        controller.look(&mut camera, Vec2::new(0.0, 100_000.0));
        assert!(approx(camera.pitch, -radians(MAX_PITCH_DEGREES), 1.0e-5));
    }

    #[test]
    fn tunables_fire_on_press_only() {
        let mut controller = CameraController::default();
        let mut camera = Camera::default();
        let mut settings = RenderSettings::default();
        controller.handle(ControlAction::ToggleAdaptive, true, &mut camera, &mut settings);
        controller.handle(ControlAction::ToggleAdaptive, false, &mut camera, &mut settings);
        assert!(!settings.adaptive);
        controller.handle(ControlAction::IterationsUp, true, &mut camera, &mut settings);
        assert_eq!(settings.filter_iterations, 5);
    }

    #[test]
    fn movement_and_reset() {
        let mut controller = CameraController::default();
        let mut camera = Camera::default();
        let mut settings = RenderSettings::default();
        let start = camera.position;
        controller.handle(ControlAction::Move(MoveDirection::Forward), true, &mut camera, &mut settings);
        controller.update(&mut camera, 0.5);
        assert!(approx((camera.position - start).mag(), 1.0, 1.0e-4));

        controller.handle(ControlAction::Sprint, true, &mut camera, &mut settings);
        controller.update(&mut camera, 0.5);
        assert!(approx((camera.position - start).mag(), 5.0, 1.0e-3));

        controller.handle(ControlAction::Move(MoveDirection::Forward), false, &mut camera, &mut settings);
        assert!(!controller.is_moving());
        controller.handle(ControlAction::Reset, true, &mut camera, &mut settings);
        assert_eq!(camera, Camera::default());
    }
}
