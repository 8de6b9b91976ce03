mod common;

use common::*;
use ember::{cpu::*, prelude::*};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::sync::Arc;

fn closest_sphere(primitives: &[PrimitiveDescriptor], ray: &Ray) -> Option<(u32, f32)> {
    primitives
        .iter()
        .enumerate()
        .filter_map(|(index, p)| intersect_sphere(p.center, p.radius, ray, RAY_T_MIN, f32::MAX).map(|hit| (index as u32, hit.t)))
        .fold(None, |best: Option<(u32, f32)>, (index, t)| match best {
            Some((_, best_t)) if best_t <= t => best,
            _ => Some((index, t)),
        })
}

#[test]
fn every_instance_shares_the_base_geometry() {
    let (_cpu, device) = cpu_device();
    let accel = built_scene(&device);
    let base = accel.base_geometry().unwrap();
    let primitives = generate_random_scene(TEST_SEED);

    assert_eq!(accel.instance_count() as usize, primitives.len());
    for (index, (instance, primitive)) in accel.instances().iter().zip(primitives.iter()).enumerate() {
        assert_eq!(instance.bottom_level, base);
        assert_eq!(instance.custom_index, index as u32);
        assert_eq!(instance.mask, INSTANCE_MASK);
        assert_eq!(instance.transform.scale, primitive.radius);
        assert_eq!(instance.transform.offset, primitive.center);
    }
}

#[test]
fn instanced_spheres_match_world_space_spheres() {
    let (cpu, device) = cpu_device();
    let accel = built_scene(&device);
    let top_level = accel.top_level().unwrap();
    let primitives = generate_random_scene(TEST_SEED);

    // aim at a sample of instances from outside the scene
    let eye = Vec3::new(0.0, 30.0, 40.0);
    for (index, primitive) in primitives.iter().enumerate().skip(1).step_by(7) {
        let ray = Ray::new(eye, primitive.center - eye);
        let expected = closest_sphere(&primitives, &ray);
        let hit = cpu.trace_ray(top_level, &ray).unwrap();
        match (hit, expected) {
            (Some(hit), Some((instance, t))) => {
                assert_eq!(hit.instance, instance, "ray towards instance {}", index);
                assert!((hit.t - t).abs() < 1.0e-3 * t);
                let owner = &primitives[hit.instance as usize];
                assert!(((hit.point - owner.center).mag() - owner.radius).abs() < 1.0e-3 * owner.radius.max(1.0));
                assert!((hit.normal.mag() - 1.0).abs() < 1.0e-3);
            }
            (hit, expected) => panic!("instance {}: {:?} vs {:?}", index, hit, expected),
        }

        // pass just outside the silhouette of the same instance
        let side = (primitive.center - eye).normalized().cross(Vec3::unit_y()).normalized();
        let ray = Ray::new(eye, primitive.center + side * (1.05 * primitive.radius) - eye);
        assert!(intersect_sphere(primitive.center, primitive.radius, &ray, RAY_T_MIN, f32::MAX).is_none());
        let hit = cpu.trace_ray(top_level, &ray).unwrap();
        assert_ne!(hit.as_ref().map(|hit| hit.instance), Some(index as u32), "grazing ray past instance {}", index);
        match (hit, closest_sphere(&primitives, &ray)) {
            (Some(hit), Some((instance, t))) => {
                assert_eq!(hit.instance, instance, "grazing ray past instance {}", index);
                assert!((hit.t - t).abs() < 1.0e-3 * t);
            }
            (None, None) => {}
            (hit, expected) => panic!("grazing ray past instance {}: {:?} vs {:?}", index, hit, expected),
        }
    }
}

#[test]
fn random_rays_agree_with_brute_force() {
    let (cpu, device) = cpu_device();
    let accel = built_scene(&device);
    let top_level = accel.top_level().unwrap();
    let primitives = generate_random_scene(TEST_SEED);

    let mut rng = SmallRng::seed_from_u64(99);
    let mut misses = 0;
    for _ in 0..200 {
        let origin = Vec3::new(rng.gen_range(-12.0..12.0), rng.gen_range(0.5..6.0), rng.gen_range(-12.0..12.0));
        let dir = Vec3::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0));
        // skip near-grazing rays against the ground sphere
        if dir.mag_sq() < 1.0e-4 || dir.normalized().y.abs() < 0.1 {
            continue;
        }
        let ray = Ray::new(origin, dir);
        let hit = cpu.trace_ray(top_level, &ray).unwrap();
        match (hit, closest_sphere(&primitives, &ray)) {
            (Some(hit), Some((instance, t))) => {
                assert!((hit.t - t).abs() < 1.0e-2 * t.max(1.0));
                if hit.instance != instance {
                    // only acceptable when two spheres are hit at the same distance
                    let other = &primitives[hit.instance as usize];
                    let other_hit = intersect_sphere(other.center, other.radius, &ray, RAY_T_MIN, f32::MAX).unwrap();
                    assert!((other_hit.t - t).abs() < 1.0e-2 * t.max(1.0));
                }
            }
            (None, None) => misses += 1,
            (hit, expected) => panic!("{:?}: {:?} vs {:?}", ray, hit, expected),
        }
    }
    assert!(misses > 0);
}

#[test]
fn rays_above_the_scene_miss() {
    let (cpu, device) = cpu_device();
    let accel = built_scene(&device);
    let ray = Ray::new(Vec3::new(0.0, 10.0, 0.0), Vec3::unit_y());
    assert!(cpu.trace_ray(accel.top_level().unwrap(), &ray).unwrap().is_none());
}

#[test]
fn material_buffer_follows_instance_order() {
    let (cpu, device) = cpu_device();
    let mut accel = SceneAccel::new(&device);
    accel.add_primitive(Vec3::new(0.0, 1.0, 0.0), Vec3::one(), 1.0, MaterialKind::Refractive, 1.5);
    accel.add_primitive(Vec3::new(3.0, 0.5, 0.0), Vec3::new(0.9, 0.1, 0.1), 0.5, MaterialKind::Diffuse, 0.0);
    accel.build().unwrap();
    assert!(accel.material_buffer().is_ok());

    let ray = Ray::new(Vec3::new(3.0, 0.5, 10.0), -Vec3::unit_z());
    let hit = cpu.trace_ray(accel.top_level().unwrap(), &ray).unwrap().unwrap();
    assert_eq!(hit.instance, 1);
    assert_eq!(accel.descriptors()[hit.instance as usize].kind, MaterialKind::Diffuse);
    assert!((hit.t - 9.5).abs() < 1.0e-3);
}

#[test]
fn empty_scene_cannot_be_built() {
    let (_cpu, device) = cpu_device();
    let mut accel = SceneAccel::new(&device);
    assert!(matches!(accel.build(), Err(Error::EmptyScene)));
    assert!(!accel.is_built());
    assert!(matches!(accel.top_level(), Err(Error::SceneNotBuilt)));
    assert_eq!(accel.instance_count(), 0);
    assert!(accel.instances().is_empty());
}

#[test]
fn scene_builds_only_once() {
    let (_cpu, device) = cpu_device();
    let mut accel = built_scene(&device);
    let top_level = accel.top_level().unwrap();
    assert!(matches!(accel.build(), Err(Error::SceneAlreadyBuilt)));
    assert_eq!(accel.top_level().unwrap(), top_level);
}

#[test]
fn scene_build_requires_acceleration_structures() {
    let cpu = Arc::new(CpuDevice::with_capabilities(
        [Capability::RayTracingPipeline, Capability::BufferDeviceAddress]
            .iter()
            .copied(),
    ));
    let device: SharedDevice = cpu.clone();
    let mut accel = SceneAccel::new(&device);
    accel.add_primitives(&generate_random_scene(TEST_SEED));
    assert!(matches!(
        accel.build(),
        Err(Error::MissingCapability(Capability::AccelerationStructure))
    ));
    assert_eq!(cpu.live_object_count(), 0);
}
