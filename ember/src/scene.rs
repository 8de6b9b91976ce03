use crate::maths::*;
use bytemuck::{Contiguous, Pod, Zeroable};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use strum::{Display, EnumString, EnumVariantNames};

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Contiguous, Display, EnumString, EnumVariantNames)]
#[strum(serialize_all = "kebab_case")]
pub enum MaterialKind {
    Diffuse,
    Reflective,
    Refractive,
}

/// One sphere of the scene.
///
/// The material parameter is the fuzz amount for reflective materials and the
/// index of refraction for refractive ones.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrimitiveDescriptor {
    pub center: Vec3,
    pub radius: f32,
    pub albedo: Vec3,
    pub kind: MaterialKind,
    pub param: f32,
}

impl PrimitiveDescriptor {
    pub fn new(center: Vec3, radius: f32, albedo: Vec3, kind: MaterialKind, param: f32) -> Self {
        Self {
            center,
            radius,
            albedo,
            kind,
            param,
        }
    }
}

/// Per-instance record of the material side-buffer, indexed by instance id.
#[repr(C)]
#[derive(Debug, Clone, Copy, Zeroable, Pod)]
pub struct MaterialData {
    pub center: Vec3,
    pub radius: f32,
    pub albedo: Vec3,
    pub kind: u32,
    pub param: f32,
    pub pad: [u32; 3],
}

impl From<&PrimitiveDescriptor> for MaterialData {
    fn from(desc: &PrimitiveDescriptor) -> Self {
        Self {
            center: desc.center,
            radius: desc.radius,
            albedo: desc.albedo,
            kind: desc.kind.into_integer(),
            param: desc.param,
            pad: [0; 3],
        }
    }
}

impl MaterialData {
    pub fn material_kind(&self) -> MaterialKind {
        MaterialKind::from_integer(self.kind).unwrap_or(MaterialKind::Diffuse)
    }
}

pub const EXCLUSION_RADIUS: f32 = 0.9;
pub const SMALL_SPHERE_RADIUS: f32 = 0.2;
pub const GRID_EXTENT: i32 = 11;

pub fn exclusion_center() -> Vec3 {
    Vec3::new(4.0, 0.2, 0.0)
}

/// Ground plane, a jittered grid of small spheres and three large feature spheres.
pub fn generate_random_scene(seed: u64) -> Vec<PrimitiveDescriptor> {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut primitives = Vec::new();

    primitives.push(PrimitiveDescriptor::new(
        Vec3::new(0.0, -1000.0, 0.0),
        1000.0,
        Vec3::broadcast(0.5),
        MaterialKind::Diffuse,
        0.0,
    ));

    for a in -GRID_EXTENT..GRID_EXTENT {
        for b in -GRID_EXTENT..GRID_EXTENT {
            let choose_mat: f32 = rng.gen();
            let center = Vec3::new(
                a as f32 + 0.9 * rng.gen::<f32>(),
                SMALL_SPHERE_RADIUS,
                b as f32 + 0.9 * rng.gen::<f32>(),
            );
            if (center - exclusion_center()).mag() <= EXCLUSION_RADIUS {
                continue;
            }

            let primitive = if choose_mat < 0.8 {
                let albedo = Vec3::new(
                    rng.gen::<f32>() * rng.gen::<f32>(),
                    rng.gen::<f32>() * rng.gen::<f32>(),
                    rng.gen::<f32>() * rng.gen::<f32>(),
                );
                PrimitiveDescriptor::new(center, SMALL_SPHERE_RADIUS, albedo, MaterialKind::Diffuse, 0.0)
            } else if choose_mat < 0.95 {
                let albedo = Vec3::new(
                    rng.gen_range(0.5..1.0),
                    rng.gen_range(0.5..1.0),
                    rng.gen_range(0.5..1.0),
                );
                let fuzz = rng.gen_range(0.0..0.5);
                PrimitiveDescriptor::new(center, SMALL_SPHERE_RADIUS, albedo, MaterialKind::Reflective, fuzz)
            } else {
                PrimitiveDescriptor::new(center, SMALL_SPHERE_RADIUS, Vec3::one(), MaterialKind::Refractive, 1.5)
            };
            primitives.push(primitive);
        }
    }

    primitives.push(PrimitiveDescriptor::new(
        Vec3::new(0.0, 1.0, 0.0),
        1.0,
        Vec3::one(),
        MaterialKind::Refractive,
        1.5,
    ));
    primitives.push(PrimitiveDescriptor::new(
        Vec3::new(-4.0, 1.0, 0.0),
        1.0,
        Vec3::new(0.4, 0.2, 0.1),
        MaterialKind::Diffuse,
        0.0,
    ));
    primitives.push(PrimitiveDescriptor::new(
        Vec3::new(4.0, 1.0, 0.0),
        1.0,
        Vec3::new(0.7, 0.6, 0.5),
        MaterialKind::Reflective,
        0.0,
    ));

    primitives
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{mem, str::FromStr};

    #[test]
    fn material_data_is_tightly_packed() {
        assert_eq!(mem::size_of::<MaterialData>(), 48);
    }

    #[test]
    fn same_seed_generates_same_scene() {
        let a = generate_random_scene(7);
        let b = generate_random_scene(7);
        assert_eq!(a.len(), b.len());
        assert_eq!(a[..3], b[..3]);
        assert_eq!(a, b);
    }

    #[test]
    fn different_seeds_generate_different_grids() {
        let a = generate_random_scene(1);
        let b = generate_random_scene(2);
        assert_ne!(a[1..4], b[1..4]);
    }

    #[test]
    fn scene_starts_with_ground_and_ends_with_feature_spheres() {
        let scene = generate_random_scene(42);
        let ground = scene[0];
        assert_eq!(ground.center, Vec3::new(0.0, -1000.0, 0.0));
        assert_eq!(ground.radius, 1000.0);

        let tail = &scene[scene.len() - 3..];
        assert_eq!(tail[0].kind, MaterialKind::Refractive);
        assert_eq!(tail[0].center, Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(tail[1].kind, MaterialKind::Diffuse);
        assert_eq!(tail[1].center, Vec3::new(-4.0, 1.0, 0.0));
        assert_eq!(tail[2].kind, MaterialKind::Reflective);
        assert_eq!(tail[2].center, Vec3::new(4.0, 1.0, 0.0));
        assert_eq!(tail[2].param, 0.0);
    }

    #[test]
    fn small_spheres_respect_exclusion_zone() {
        let scene = generate_random_scene(3);
        let small = &scene[1..scene.len() - 3];
        let cells = (2 * GRID_EXTENT * 2 * GRID_EXTENT) as usize;
        assert!(small.len() <= cells);
        assert!(small.len() > cells / 2);
        for primitive in small {
            assert_eq!(primitive.radius, SMALL_SPHERE_RADIUS);
            assert!((primitive.center - exclusion_center()).mag() > EXCLUSION_RADIUS);
            match primitive.kind {
                MaterialKind::Reflective => assert!(primitive.param >= 0.0 && primitive.param < 0.5),
                MaterialKind::Refractive => assert_eq!(primitive.param, 1.5),
                MaterialKind::Diffuse => {}
            }
        }
    }

    #[test]
    fn material_kind_parses_kebab_case() {
        assert_eq!(MaterialKind::from_str("refractive").unwrap(), MaterialKind::Refractive);
        assert_eq!(MaterialKind::Reflective.to_string(), "reflective");
    }
}
