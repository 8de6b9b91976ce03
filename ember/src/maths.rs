pub use ultraviolet as uv;

pub type Vec2 = uv::Vec2;
pub type UVec2 = uv::UVec2;

pub type Vec3 = uv::Vec3;
pub type Vec4 = uv::Vec4;

pub type Mat4 = uv::Mat4;

pub trait DivRoundUp {
    fn div_round_up(&self, divisor: u32) -> Self;
}

impl DivRoundUp for u32 {
    fn div_round_up(&self, divisor: u32) -> Self {
        (*self + divisor - 1) / divisor
    }
}

impl DivRoundUp for UVec2 {
    fn div_round_up(&self, divisor: u32) -> Self {
        (*self + Self::broadcast(divisor - 1)) / divisor
    }
}

pub fn align_up(x: u32, alignment: u32) -> u32 {
    (x + alignment - 1) & !(alignment - 1)
}

pub fn component(v: Vec3, axis: usize) -> f32 {
    match axis {
        0 => v.x,
        1 => v.y,
        _ => v.z,
    }
}

pub fn luminance(rgb: Vec3) -> f32 {
    rgb.dot(Vec3::new(0.2126, 0.7152, 0.0722))
}

/// Uniform scale followed by a translation, the only transform a sphere instance needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale3Offset3 {
    pub scale: f32,
    pub offset: Vec3,
}

impl Scale3Offset3 {
    pub fn new(scale: f32, offset: Vec3) -> Self {
        Self { scale, offset }
    }

    pub fn inversed(&self) -> Self {
        // y = a*x + b => x = (y - b)/a
        let scale_rcp = 1.0 / self.scale;
        Self {
            scale: scale_rcp,
            offset: -self.offset * scale_rcp,
        }
    }

    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        p * self.scale + self.offset
    }

    pub fn transform_vector(&self, v: Vec3) -> Vec3 {
        v * self.scale
    }

    /// Row-major 3x4 matrix, as stored in acceleration structure instance records.
    pub fn into_transform3x4(&self) -> [f32; 12] {
        let s = self.scale;
        let o = self.offset;
        [s, 0.0, 0.0, o.x, 0.0, s, 0.0, o.y, 0.0, 0.0, s, o.z]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).mag() < 1.0e-5
    }

    #[test]
    fn div_round_up_covers_partial_tiles() {
        assert_eq!(UVec2::new(1200, 675).div_round_up(8), UVec2::new(150, 85));
        assert_eq!(UVec2::new(9, 3).div_round_up(3), UVec2::new(3, 1));
        assert_eq!(10u32.div_round_up(3), 4);
    }

    #[test]
    fn align_up_rounds_to_power_of_two() {
        assert_eq!(align_up(0, 64), 0);
        assert_eq!(align_up(1, 64), 64);
        assert_eq!(align_up(64, 64), 64);
        assert_eq!(align_up(65, 32), 96);
    }

    #[test]
    fn scale_offset_inverse_round_trips() {
        let t = Scale3Offset3::new(0.2, Vec3::new(3.0, 0.2, -1.5));
        let p = Vec3::new(0.3, -0.7, 0.1);
        assert!(approx(t.inversed().transform_point(t.transform_point(p)), p));
        assert!(approx(t.inversed().transform_vector(t.transform_vector(p)), p));
    }

    #[test]
    fn transform3x4_matches_transform_point() {
        let t = Scale3Offset3::new(2.5, Vec3::new(1.0, 2.0, 3.0));
        let m = t.into_transform3x4();
        let p = Vec3::new(-1.0, 0.5, 4.0);
        let row = |r: usize| m[4 * r] * p.x + m[4 * r + 1] * p.y + m[4 * r + 2] * p.z + m[4 * r + 3];
        assert!(approx(Vec3::new(row(0), row(1), row(2)), t.transform_point(p)));
    }
}
