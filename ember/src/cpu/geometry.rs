use crate::{device::*, maths::*};
use std::collections::HashMap;

pub const RAY_T_MIN: f32 = 0.001;

#[derive(Debug, Clone, Copy)]
pub struct Ray {
    pub origin: Vec3,
    pub dir: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, dir: Vec3) -> Self {
        Self { origin, dir }
    }

    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.dir * t
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SphereHit {
    pub t: f32,
    pub normal: Vec3,
}

/// Closest intersection of a ray with a sphere in `(t_min, t_max)`.
pub fn intersect_sphere(center: Vec3, radius: f32, ray: &Ray, t_min: f32, t_max: f32) -> Option<SphereHit> {
    let oc = ray.origin - center;
    let a = ray.dir.mag_sq();
    let h = ray.dir.dot(oc);
    let c = oc.mag_sq() - radius * radius;
    let discriminant = h * h - a * c;
    if discriminant < 0.0 {
        return None;
    }
    let sqrt_d = discriminant.sqrt();
    let mut t = (-h - sqrt_d) / a;
    if t <= t_min || t >= t_max {
        t = (-h + sqrt_d) / a;
        if t <= t_min || t >= t_max {
            return None;
        }
    }
    Some(SphereHit {
        t,
        normal: (ray.at(t) - center).normalized(),
    })
}

/// Intersects the sphere inscribed in each box of the shared base geometry,
/// after moving the ray into the local space of the instance.
///
/// The transform is affine, so the ray parameter is the same in both spaces.
pub fn intersect_instance(
    transform: &Scale3Offset3,
    geometry: &[AabbData],
    ray: &Ray,
    t_min: f32,
    t_max: f32,
) -> Option<SphereHit> {
    let inverse = transform.inversed();
    let local = Ray::new(inverse.transform_point(ray.origin), inverse.transform_vector(ray.dir));
    let mut closest: Option<SphereHit> = None;
    for aabb in geometry {
        let center = (aabb.min + aabb.max) * 0.5;
        let radius = 0.5 * (aabb.max.x - aabb.min.x);
        let limit = closest.map_or(t_max, |hit| hit.t);
        if let Some(hit) = intersect_sphere(center, radius, &local, t_min, limit) {
            closest = Some(hit);
        }
    }
    // uniform scale keeps normals unchanged
    closest
}

fn slab_test(min: Vec3, max: Vec3, ray: &Ray, inv_dir: Vec3, t_max: f32) -> bool {
    let t0 = (min - ray.origin) * inv_dir;
    let t1 = (max - ray.origin) * inv_dir;
    let near = t0.min_by_component(t1);
    let far = t0.max_by_component(t1);
    let enter = near.x.max(near.y).max(near.z).max(RAY_T_MIN);
    let exit = far.x.min(far.y).min(far.z).min(t_max);
    enter <= exit
}

#[derive(Debug, Clone, Copy)]
struct TopLevelInstance {
    transform: Scale3Offset3,
    custom_index: u32,
    mask: u8,
    geometry: usize,
    min: Vec3,
    max: Vec3,
}

#[derive(Debug, Clone, Copy)]
enum NodeKind {
    Leaf { start: u32, count: u32 },
    Interior { left: u32, right: u32 },
}

#[derive(Debug, Clone, Copy)]
struct Node {
    min: Vec3,
    max: Vec3,
    kind: NodeKind,
}

const LEAF_SIZE: usize = 4;

#[derive(Debug, Clone, Copy)]
pub struct TraceHit {
    pub t: f32,
    pub instance: u32,
    pub point: Vec3,
    pub normal: Vec3,
}

/// Bounding volume hierarchy over instance bounds.
pub struct TopLevel {
    geometries: Vec<Vec<AabbData>>,
    instances: Vec<TopLevelInstance>,
    nodes: Vec<Node>,
}

impl TopLevel {
    pub fn new(instances: &[AccelInstance], lookup: impl Fn(AccelId) -> Option<Vec<AabbData>>) -> Option<Self> {
        let mut geometry_index = HashMap::new();
        let mut geometries = Vec::new();
        let mut built = Vec::with_capacity(instances.len());
        for instance in instances {
            let geometry = match geometry_index.get(&instance.bottom_level) {
                Some(&index) => index,
                None => {
                    let index = geometries.len();
                    geometries.push(lookup(instance.bottom_level)?);
                    geometry_index.insert(instance.bottom_level, index);
                    index
                }
            };
            let (mut min, mut max) = (Vec3::broadcast(f32::MAX), Vec3::broadcast(-f32::MAX));
            for aabb in &geometries[geometry] {
                min = min.min_by_component(instance.transform.transform_point(aabb.min));
                max = max.max_by_component(instance.transform.transform_point(aabb.max));
            }
            built.push(TopLevelInstance {
                transform: instance.transform,
                custom_index: instance.custom_index,
                mask: instance.mask,
                geometry,
                min,
                max,
            });
        }

        let mut top_level = Self {
            geometries,
            instances: built,
            nodes: Vec::new(),
        };
        if !top_level.instances.is_empty() {
            let count = top_level.instances.len();
            top_level.build_node(0, count);
        }
        Some(top_level)
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    fn bounds(&self, start: usize, end: usize) -> (Vec3, Vec3) {
        self.instances[start..end].iter().fold(
            (Vec3::broadcast(f32::MAX), Vec3::broadcast(-f32::MAX)),
            |(min, max), instance| (min.min_by_component(instance.min), max.max_by_component(instance.max)),
        )
    }

    fn build_node(&mut self, start: usize, end: usize) -> u32 {
        let (min, max) = self.bounds(start, end);
        let index = self.nodes.len() as u32;
        self.nodes.push(Node {
            min,
            max,
            kind: NodeKind::Leaf {
                start: start as u32,
                count: (end - start) as u32,
            },
        });
        if end - start > LEAF_SIZE {
            let extent = max - min;
            let axis = if extent.x > extent.y && extent.x > extent.z {
                0
            } else if extent.y > extent.z {
                1
            } else {
                2
            };
            let centroid = |instance: &TopLevelInstance| component(instance.min + instance.max, axis);
            self.instances[start..end].sort_by(|a, b| {
                centroid(a)
                    .partial_cmp(&centroid(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            let mid = (start + end) / 2;
            let left = self.build_node(start, mid);
            let right = self.build_node(mid, end);
            self.nodes[index as usize].kind = NodeKind::Interior { left, right };
        }
        index
    }

    pub fn trace(&self, ray: &Ray, t_max: f32, mask: u8) -> Option<TraceHit> {
        if self.nodes.is_empty() {
            return None;
        }
        let inv_dir = Vec3::new(1.0 / ray.dir.x, 1.0 / ray.dir.y, 1.0 / ray.dir.z);
        let mut closest: Option<TraceHit> = None;
        let mut stack = vec![0u32];
        while let Some(node_index) = stack.pop() {
            let node = &self.nodes[node_index as usize];
            let limit = closest.map_or(t_max, |hit| hit.t);
            if !slab_test(node.min, node.max, ray, inv_dir, limit) {
                continue;
            }
            match node.kind {
                NodeKind::Interior { left, right } => {
                    stack.push(right);
                    stack.push(left);
                }
                NodeKind::Leaf { start, count } => {
                    for instance in &self.instances[start as usize..(start + count) as usize] {
                        if instance.mask & mask == 0 {
                            continue;
                        }
                        let limit = closest.map_or(t_max, |hit| hit.t);
                        let geometry = &self.geometries[instance.geometry];
                        if let Some(hit) = intersect_instance(&instance.transform, geometry, ray, RAY_T_MIN, limit) {
                            closest = Some(TraceHit {
                                t: hit.t,
                                instance: instance.custom_index,
                                point: ray.at(hit.t),
                                normal: hit.normal,
                            });
                        }
                    }
                }
            }
        }
        closest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_geometry() -> Vec<AabbData> {
        vec![AabbData::unit_cube()]
    }

    #[test]
    fn instanced_unit_sphere_matches_world_sphere() {
        let center = Vec3::new(2.0, 0.5, -3.0);
        let radius = 0.7;
        let transform = Scale3Offset3::new(radius, center);
        let ray = Ray::new(Vec3::new(2.1, 0.4, 5.0), Vec3::new(0.0, 0.0, -1.0));

        let world = intersect_sphere(center, radius, &ray, RAY_T_MIN, f32::MAX).unwrap();
        let local = intersect_instance(&transform, &unit_geometry(), &ray, RAY_T_MIN, f32::MAX).unwrap();
        assert!((world.t - local.t).abs() < 1.0e-4);
        assert!((world.normal - local.normal).mag() < 1.0e-4);
    }

    #[test]
    fn normal_is_unit_length_for_unnormalized_rays() {
        let transform = Scale3Offset3::new(3.0, Vec3::new(1.0, -2.0, 0.5));
        let ray = Ray::new(Vec3::new(1.5, -1.0, 20.0), Vec3::new(0.0, 0.0, -7.5));

        let world = intersect_sphere(Vec3::new(1.0, -2.0, 0.5), 3.0, &ray, RAY_T_MIN, f32::MAX).unwrap();
        assert!((world.normal.mag() - 1.0).abs() < 1.0e-4);
        let local = intersect_instance(&transform, &unit_geometry(), &ray, RAY_T_MIN, f32::MAX).unwrap();
        assert!((local.normal.mag() - 1.0).abs() < 1.0e-4);
        assert!((world.normal - local.normal).mag() < 1.0e-4);
    }

    #[test]
    fn ray_past_the_radius_misses() {
        let transform = Scale3Offset3::new(0.5, Vec3::zero());
        let ray = Ray::new(Vec3::new(0.51, 0.0, 5.0), Vec3::new(0.0, 0.0, -1.0));
        assert!(intersect_instance(&transform, &unit_geometry(), &ray, RAY_T_MIN, f32::MAX).is_none());
    }

    #[test]
    fn hierarchy_returns_closest_instance() {
        let mut ids = slotmap::SlotMap::<AccelId, ()>::with_key();
        let bottom = ids.insert(());
        let instances: Vec<_> = (0..20)
            .map(|i| AccelInstance {
                transform: Scale3Offset3::new(0.25, Vec3::new(0.0, 0.0, -(i as f32))),
                custom_index: i,
                mask: 0xff,
                hit_group_offset: 0,
                bottom_level: bottom,
            })
            .collect();
        let top_level = TopLevel::new(&instances, |_| Some(unit_geometry())).unwrap();
        let ray = Ray::new(Vec3::new(0.0, 0.0, 10.0), Vec3::new(0.0, 0.0, -1.0));
        let hit = top_level.trace(&ray, f32::MAX, 0xff).unwrap();
        assert_eq!(hit.instance, 0);
        assert!((hit.t - 9.75).abs() < 1.0e-4);

        let ray = Ray::new(Vec3::new(0.0, 0.0, -7.5), Vec3::new(0.0, 0.0, -1.0));
        assert_eq!(top_level.trace(&ray, f32::MAX, 0xff).unwrap().instance, 8);
        assert!(top_level.trace(&ray, f32::MAX, 0).is_none());
    }
}
