use super::geometry::*;
use crate::{
    accel::INSTANCE_MASK, binding::*, camera::*, device::*, error::*, maths::*, params::*, scene::*,
};
use rayon::prelude::*;
use uv::IVec2;
use std::f32::consts::PI;

pub type Texel = [u32; 4];

pub fn texel(v: Vec4) -> Texel {
    [v.x.to_bits(), v.y.to_bits(), v.z.to_bits(), v.w.to_bits()]
}

pub fn texel_vec4(t: Texel) -> Vec4 {
    Vec4::new(
        f32::from_bits(t[0]),
        f32::from_bits(t[1]),
        f32::from_bits(t[2]),
        f32::from_bits(t[3]),
    )
}

pub fn clear_texel(value: ClearValue) -> Texel {
    match value {
        ClearValue::Float(v) => texel(Vec4::new(v[0], v[1], v[2], v[3])),
        ClearValue::Uint(v) => v,
    }
}

/// Octahedral mapping of a unit normal into two 16-bit fields.
pub fn encode_normal(n: Vec3) -> u32 {
    let sign = |x: f32| if x >= 0.0 { 1.0 } else { -1.0 };
    let l1 = n.x.abs() + n.y.abs() + n.z.abs();
    let mut p = Vec2::new(n.x / l1, n.y / l1);
    if n.z < 0.0 {
        p = Vec2::new((1.0 - p.y.abs()) * sign(p.x), (1.0 - p.x.abs()) * sign(p.y));
    }
    let quantize = |x: f32| ((x * 0.5 + 0.5).max(0.0).min(1.0) * 65535.0).round() as u32;
    quantize(p.x) | (quantize(p.y) << 16)
}

pub fn decode_normal(bits: u32) -> Vec3 {
    let sign = |x: f32| if x >= 0.0 { 1.0 } else { -1.0 };
    let unquantize = |x: u32| (x as f32 / 65535.0) * 2.0 - 1.0;
    let p = Vec2::new(unquantize(bits & 0xffff), unquantize(bits >> 16));
    let z = 1.0 - p.x.abs() - p.y.abs();
    let (x, y) = if z < 0.0 {
        ((1.0 - p.y.abs()) * sign(p.x), (1.0 - p.x.abs()) * sign(p.y))
    } else {
        (p.x, p.y)
    };
    Vec3::new(x, y, z).normalized()
}

#[derive(Clone, Copy)]
pub struct ImageView<'a> {
    pub size: UVec2,
    pub texels: &'a [Texel],
}

impl<'a> ImageView<'a> {
    pub fn contains(&self, p: IVec2) -> bool {
        p.x >= 0 && p.y >= 0 && (p.x as u32) < self.size.x && (p.y as u32) < self.size.y
    }

    pub fn load(&self, p: UVec2) -> Texel {
        self.texels[(p.y * self.size.x + p.x) as usize]
    }

    pub fn load_vec4(&self, p: UVec2) -> Vec4 {
        texel_vec4(self.load(p))
    }

    pub fn load_f32(&self, p: UVec2) -> f32 {
        f32::from_bits(self.load(p)[0])
    }
}

pub struct OutputImage {
    pub id: ImageId,
    pub size: UVec2,
    pub texels: Vec<Texel>,
}

pub trait Resources {
    fn image(&self, id: ImageId) -> Result<ImageView<'_>>;
    fn buffer(&self, id: BufferId) -> Result<&[u32]>;
    fn top_level(&self, id: AccelId) -> Result<&TopLevel>;
}

fn kernel_error(bound: &BoundSet, reason: impl Into<String>) -> Error {
    Error::BindingMismatch {
        pass: bound.pass,
        slot: 0,
        reason: reason.into(),
    }
}

fn check_outputs(bound: &BoundSet, outputs: &[OutputImage], count: usize, size: UVec2) -> Result<()> {
    if outputs.len() != count {
        return Err(kernel_error(bound, format!("expected {} outputs", count)));
    }
    if let Some(output) = outputs.iter().find(|output| output.size != size) {
        return Err(kernel_error(
            bound,
            format!("output {:?} does not match dispatch size", output.id),
        ));
    }
    Ok(())
}

fn for_each_pixel<F, const N: usize>(size: UVec2, outputs: &mut [OutputImage], f: F)
where
    F: Fn(UVec2) -> [Texel; N] + Sync + Send,
{
    let results: Vec<[Texel; N]> = (0..size.x * size.y)
        .into_par_iter()
        .map(|index| f(UVec2::new(index % size.x, index / size.x)))
        .collect();
    for (index, texels) in results.iter().enumerate() {
        for (output, value) in outputs.iter_mut().zip(texels.iter()) {
            output.texels[index] = *value;
        }
    }
}

fn offset_pixel(view: &ImageView, p: UVec2, dx: i32, dy: i32) -> Option<UVec2> {
    let q = IVec2::new(p.x as i32 + dx, p.y as i32 + dy);
    if view.contains(q) {
        Some(UVec2::new(q.x as u32, q.y as u32))
    } else {
        None
    }
}

struct Rng(u32);

impl Rng {
    fn next_u32(&mut self) -> u32 {
        self.0 = pcg_hash(self.0);
        self.0
    }

    fn next_f32(&mut self) -> f32 {
        (self.next_u32() >> 8) as f32 * (1.0 / 16_777_216.0)
    }

    fn unit_vector(&mut self) -> Vec3 {
        let z = 1.0 - 2.0 * self.next_f32();
        let phi = 2.0 * PI * self.next_f32();
        let r = (1.0 - z * z).max(0.0).sqrt();
        Vec3::new(r * phi.cos(), r * phi.sin(), z)
    }

    fn in_unit_disk(&mut self) -> Vec2 {
        let r = self.next_f32().sqrt();
        let theta = 2.0 * PI * self.next_f32();
        Vec2::new(r * theta.cos(), r * theta.sin())
    }
}

fn reflect(v: Vec3, n: Vec3) -> Vec3 {
    v - n * (2.0 * v.dot(n))
}

fn refract(uv: Vec3, n: Vec3, eta: f32) -> Vec3 {
    let cos_theta = (-uv).dot(n).min(1.0);
    let perp = (uv + n * cos_theta) * eta;
    let parallel = n * -(1.0 - perp.mag_sq()).abs().sqrt();
    perp + parallel
}

fn reflectance(cosine: f32, refraction_index: f32) -> f32 {
    // Schlick
    let r0 = (1.0 - refraction_index) / (1.0 + refraction_index);
    let r0 = r0 * r0;
    r0 + (1.0 - r0) * (1.0 - cosine).powi(5)
}

fn sky(dir: Vec3) -> Vec3 {
    let a = 0.5 * (dir.normalized().y + 1.0);
    Vec3::one() * (1.0 - a) + Vec3::new(0.5, 0.7, 1.0) * a
}

fn scatter(material: &MaterialData, ray: &Ray, hit: &TraceHit, rng: &mut Rng) -> Option<(Vec3, Vec3)> {
    let unit_dir = ray.dir.normalized();
    let front_face = unit_dir.dot(hit.normal) < 0.0;
    let normal = if front_face { hit.normal } else { -hit.normal };
    match material.material_kind() {
        MaterialKind::Diffuse => {
            let mut dir = normal + rng.unit_vector();
            if dir.mag_sq() < 1.0e-8 {
                dir = normal;
            }
            Some((material.albedo, dir))
        }
        MaterialKind::Reflective => {
            let dir = reflect(unit_dir, normal) + rng.unit_vector() * material.param;
            if dir.dot(normal) > 0.0 {
                Some((material.albedo, dir))
            } else {
                None
            }
        }
        MaterialKind::Refractive => {
            let ri = if front_face { 1.0 / material.param } else { material.param };
            let cos_theta = (-unit_dir).dot(normal).min(1.0);
            let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();
            let dir = if ri * sin_theta > 1.0 || reflectance(cos_theta, ri) > rng.next_f32() {
                reflect(unit_dir, normal)
            } else {
                refract(unit_dir, normal, ri)
            };
            Some((material.albedo, dir))
        }
    }
}

fn trace_path(
    top_level: &TopLevel,
    materials: &[MaterialData],
    mut ray: Ray,
    rng: &mut Rng,
    max_bounces: u32,
) -> (Vec3, Option<TraceHit>) {
    let mut throughput = Vec3::one();
    let mut primary = None;
    for bounce in 0..max_bounces {
        let hit = match top_level.trace(&ray, f32::MAX, INSTANCE_MASK) {
            Some(hit) => hit,
            None => return (throughput * sky(ray.dir), primary),
        };
        if bounce == 0 {
            primary = Some(hit);
        }
        let material = match materials.get(hit.instance as usize) {
            Some(material) => material,
            None => return (Vec3::zero(), primary),
        };
        match scatter(material, &ray, &hit, rng) {
            Some((attenuation, dir)) => {
                throughput = throughput * attenuation;
                ray = Ray::new(hit.point, dir);
            }
            None => return (Vec3::zero(), primary),
        }
    }
    (Vec3::zero(), primary)
}

fn miss_visibility() -> Texel {
    [MISS_INSTANCE, 0, FORWARD_DEPTH_CLEAR.to_bits(), MISS_INSTANCE]
}

fn pixel_center(p: UVec2) -> Vec2 {
    Vec2::new(p.x as f32 + 0.5, p.y as f32 + 0.5)
}

fn ray_generation<R: Resources + Sync>(
    bound: &BoundSet,
    res: &R,
    outputs: &mut [OutputImage],
    size: UVec2,
) -> Result<()> {
    let params: RayGenParams = bound.uniform(0)?;
    let top_level = res.top_level(bound.accel(1)?)?;
    let materials: &[MaterialData] = bytemuck::try_cast_slice(res.buffer(bound.buffer(2)?)?)
        .map_err(|err| kernel_error(bound, format!("bad material buffer: {:?}", err)))?;
    let forward_seed = res.image(bound.image(3)?)?;
    let forward_depth = res.image(bound.image(4)?)?;
    check_outputs(bound, outputs, 4, size)?;

    let camera = params.camera;
    let reuse_seeds = params.reuse_seeds != 0;
    for_each_pixel(size, outputs, |pixel| {
        let mut seed = initial_seed(pixel, size, params.frame_number);
        if reuse_seeds
            && stratum_representative(pixel / STRATUM_SIZE, params.frame_number, size) == pixel
            && forward_depth.load_f32(pixel) != FORWARD_DEPTH_CLEAR
        {
            seed = forward_seed.load(pixel)[0];
        }

        let mut rng = Rng(seed);
        let position = Vec2::new(pixel.x as f32 + rng.next_f32(), pixel.y as f32 + rng.next_f32());
        let ndc = Vec2::new(
            2.0 * position.x / size.x as f32 - 1.0,
            1.0 - 2.0 * position.y / size.y as f32,
        );
        let mut dir = camera.forward + camera.right * (ndc.x * camera.half_width) + camera.up * (ndc.y * camera.half_height);
        let mut origin = camera.position;
        if camera.defocus_radius > 0.0 {
            let focus = origin + dir * camera.focus_distance;
            let disk = rng.in_unit_disk() * camera.defocus_radius;
            origin = origin + camera.right * disk.x + camera.up * disk.y;
            dir = focus - origin;
        }

        let (radiance, primary) = trace_path(top_level, materials, Ray::new(origin, dir), &mut rng, params.max_bounces);

        let (visibility, motion) = match primary {
            Some(hit) => {
                let depth = (hit.point - camera.position).dot(camera.forward);
                let kind = materials.get(hit.instance as usize).map_or(0, |m| m.kind);
                let visibility = [hit.instance, encode_normal(hit.normal), depth.to_bits(), kind];
                let current = project_with(&params.view_proj, size, hit.point);
                let previous = project_with(&params.prev_view_proj, size, hit.point);
                let motion = match (current, previous) {
                    (Some((current, _)), Some((previous, previous_depth))) => Vec4::new(
                        previous.x - current.x,
                        previous.y - current.y,
                        previous_depth,
                        1.0,
                    ),
                    _ => Vec4::zero(),
                };
                (visibility, motion)
            }
            None => (miss_visibility(), Vec4::zero()),
        };

        [
            texel(Vec4::new(radiance.x, radiance.y, radiance.z, 1.0)),
            visibility,
            texel(motion),
            [seed, 0, 0, 0],
        ]
    });
    Ok(())
}

fn forward_projection<R: Resources>(bound: &BoundSet, res: &R, outputs: &mut [OutputImage], size: UVec2) -> Result<()> {
    let params: ForwardProjectParams = bound.uniform(0)?;
    let prev_radiance = res.image(bound.image(1)?)?;
    let prev_visibility = res.image(bound.image(2)?)?;
    let prev_seed = res.image(bound.image(3)?)?;
    check_outputs(bound, outputs, 3, size)?;

    // scatter in scan order, the last write to a pixel wins
    for y in 0..size.y {
        for x in 0..size.x {
            let src = UVec2::new(x, y);
            let visibility = prev_visibility.load(src);
            if visibility[0] == MISS_INSTANCE {
                continue;
            }
            let prev_depth = f32::from_bits(visibility[2]);
            let world = unproject_with(&params.prev_inv_view_proj, size, pixel_center(src), prev_depth);
            let (pixel, depth) = match project_with(&params.view_proj, size, world) {
                Some(projected) => projected,
                None => continue,
            };
            if depth < params.depth_threshold {
                continue;
            }
            let facing = decode_normal(visibility[1]).dot((params.position - world).normalized());
            if facing < 1.0 - params.normal_threshold {
                continue;
            }
            let dst = IVec2::new(pixel.x.floor() as i32, pixel.y.floor() as i32);
            if !prev_radiance.contains(dst) {
                continue;
            }
            let index = (dst.y as u32 * size.x + dst.x as u32) as usize;
            outputs[0].texels[index] = prev_radiance.load(src);
            outputs[1].texels[index] = prev_seed.load(src);
            outputs[2].texels[index] = [depth.to_bits(), 0, 0, 0];
        }
    }
    Ok(())
}

fn antilag(delta: f32, max: f32, min_luminance: f32) -> f32 {
    if max > min_luminance {
        (delta / max).min(1.0)
    } else {
        0.0
    }
}

const DEPTH_WEIGHT_SCALE: f32 = 0.05;

fn geometry_weight(p: Texel, q: Texel, sigma_depth: f32, sigma_normal: f32, step: u32) -> f32 {
    if p[0] == MISS_INSTANCE || q[0] == MISS_INSTANCE {
        return if p[0] == q[0] { 1.0 } else { 0.0 };
    }
    let depth_p = f32::from_bits(p[2]);
    let depth_q = f32::from_bits(q[2]);
    let w_depth = (-(depth_p - depth_q).abs() / (sigma_depth * DEPTH_WEIGHT_SCALE * step as f32 * depth_p + 1.0e-4)).exp();
    let w_normal = decode_normal(p[1]).dot(decode_normal(q[1])).max(0.0).powf(sigma_normal);
    w_depth * w_normal
}

fn gradient_sampling<R: Resources + Sync>(
    bound: &BoundSet,
    res: &R,
    outputs: &mut [OutputImage],
    size: UVec2,
) -> Result<()> {
    let params: GradientSampleParams = bound.uniform(0)?;
    let radiance = res.image(bound.image(1)?)?;
    let visibility = res.image(bound.image(2)?)?;
    let forward_color = res.image(bound.image(3)?)?;
    let forward_depth = res.image(bound.image(4)?)?;
    check_outputs(bound, outputs, 1, size)?;

    for_each_pixel(size, outputs, |cell| {
        let pixel = stratum_representative(cell, params.frame_number, params.size);
        let prev_depth = forward_depth.load_f32(pixel);
        let current = visibility.load(pixel);
        if prev_depth == FORWARD_DEPTH_CLEAR || current[0] == MISS_INSTANCE {
            return [[0; 4]];
        }
        let depth = f32::from_bits(current[2]);
        if (depth - prev_depth).abs() > params.depth_threshold * depth {
            return [[0; 4]];
        }
        let luminance_current = luminance(radiance.load_vec4(pixel).xyz());
        let luminance_prev = luminance(forward_color.load_vec4(pixel).xyz());
        let delta = (luminance_current - luminance_prev).abs() * params.gradient_scale;
        let max = luminance_current.max(luminance_prev);
        [texel(Vec4::new(delta, max, 1.0, antilag(delta, max, params.min_luminance)))]
    });
    Ok(())
}

fn gradient_smoothing<R: Resources + Sync>(
    bound: &BoundSet,
    res: &R,
    outputs: &mut [OutputImage],
    size: UVec2,
) -> Result<()> {
    let params: GradientSmoothParams = bound.uniform(0)?;
    let visibility = res.image(bound.image(1)?)?;
    let gradient_in = res.image(bound.image(2)?)?;
    check_outputs(bound, outputs, 1, size)?;

    let step = params.step_size as i32;
    let surface = |cell: UVec2| visibility.load(stratum_representative(cell, params.frame_number, params.size));
    for_each_pixel(size, outputs, |cell| {
        let center = surface(cell);
        let mut sum = Vec2::zero();
        let mut weight_sum = 0.0;
        for dy in -1..=1 {
            for dx in -1..=1 {
                let q = match offset_pixel(&gradient_in, cell, dx * step, dy * step) {
                    Some(q) => q,
                    None => continue,
                };
                let g = gradient_in.load_vec4(q);
                if g.z == 0.0 {
                    continue;
                }
                let w = geometry_weight(center, surface(q), params.sigma_depth, params.sigma_normal, params.step_size);
                sum += Vec2::new(g.x, g.y) * w;
                weight_sum += w;
            }
        }
        if weight_sum <= 0.0 {
            return [[0; 4]];
        }
        let filtered = sum / weight_sum;
        [texel(Vec4::new(
            filtered.x,
            filtered.y,
            1.0,
            antilag(filtered.x, filtered.y, MIN_GRADIENT_LUMINANCE),
        ))]
    });
    Ok(())
}

struct History {
    color: Vec3,
    moments: Vec2,
    length: f32,
}

fn mix3(a: Vec3, b: Vec3, t: f32) -> Vec3 {
    a * (1.0 - t) + b * t
}

fn mix2(a: Vec2, b: Vec2, t: f32) -> Vec2 {
    a * (1.0 - t) + b * t
}

fn mix(a: f32, b: f32, t: f32) -> f32 {
    a * (1.0 - t) + b * t
}

fn temporal_accumulation<R: Resources + Sync>(
    bound: &BoundSet,
    res: &R,
    outputs: &mut [OutputImage],
    size: UVec2,
) -> Result<()> {
    let params: TemporalParams = bound.uniform(0)?;
    let radiance = res.image(bound.image(1)?)?;
    let visibility = res.image(bound.image(2)?)?;
    let motion = res.image(bound.image(3)?)?;
    let prev_visibility = res.image(bound.image(4)?)?;
    let gradient = res.image(bound.image(5)?)?;
    let history_color = res.image(bound.image(6)?)?;
    let history_moments = res.image(bound.image(7)?)?;
    let history_length = res.image(bound.image(8)?)?;
    check_outputs(bound, outputs, 3, size)?;

    let reproject = |pixel: UVec2, current: Texel| -> Option<History> {
        let m = motion.load_vec4(pixel);
        if m.w == 0.0 {
            return None;
        }
        let position = pixel_center(pixel) + Vec2::new(m.x, m.y);
        let prev = IVec2::new(position.x.floor() as i32, position.y.floor() as i32);
        if !prev_visibility.contains(prev) {
            return None;
        }
        let prev = UVec2::new(prev.x as u32, prev.y as u32);
        let previous = prev_visibility.load(prev);
        if previous[0] != current[0] {
            return None;
        }
        let prev_depth = f32::from_bits(previous[2]);
        if (prev_depth - m.z).abs() > params.depth_threshold * m.z.max(1.0e-4) {
            return None;
        }
        if decode_normal(previous[1]).dot(decode_normal(current[1])) < params.normal_threshold {
            return None;
        }
        let moments = history_moments.load_vec4(prev);
        Some(History {
            color: history_color.load_vec4(prev).xyz(),
            moments: Vec2::new(moments.x, moments.y),
            length: history_length.load_f32(prev),
        })
    };

    for_each_pixel(size, outputs, |pixel| {
        let current_color = radiance.load_vec4(pixel).xyz();
        let l = luminance(current_color);
        let current_moments = Vec2::new(l, l * l);
        let current = visibility.load(pixel);

        let history = if params.frame_number == 0 || current[0] == MISS_INSTANCE {
            None
        } else {
            reproject(pixel, current)
        };

        let (color, moments, length) = match history {
            Some(history) => {
                let length = (history.length + 1.0).min(params.max_history_length);
                let mut alpha = params.alpha.max(1.0 / length);
                let mut moments_alpha = params.moments_alpha.max(1.0 / length);
                if params.adaptive != 0 {
                    let cell = UVec2::new(
                        (pixel.x / STRATUM_SIZE).min(params.stratum_size.x - 1),
                        (pixel.y / STRATUM_SIZE).min(params.stratum_size.y - 1),
                    );
                    let lambda = (gradient.load_vec4(cell).w * params.antilag_scale).max(0.0).min(1.0);
                    alpha = mix(alpha, 1.0, lambda);
                    moments_alpha = mix(moments_alpha, 1.0, lambda);
                }
                (
                    mix3(history.color, current_color, alpha),
                    mix2(history.moments, current_moments, moments_alpha),
                    length,
                )
            }
            None => (current_color, current_moments, 1.0),
        };

        let variance = (moments.y - moments.x * moments.x).max(0.0);
        [
            texel(Vec4::new(color.x, color.y, color.z, variance)),
            texel(Vec4::new(moments.x, moments.y, 0.0, 0.0)),
            texel(Vec4::new(length, 0.0, 0.0, 0.0)),
        ]
    });
    Ok(())
}

const ATROUS_KERNEL: [f32; 3] = [3.0 / 8.0, 1.0 / 4.0, 1.0 / 16.0];

fn spatial_filter<R: Resources + Sync>(bound: &BoundSet, res: &R, outputs: &mut [OutputImage], size: UVec2) -> Result<()> {
    let params: SpatialFilterParams = bound.uniform(0)?;
    let visibility = res.image(bound.image(1)?)?;
    let color_in = res.image(bound.image(2)?)?;
    check_outputs(bound, outputs, 1, size)?;

    let step = params.step_size as i32;
    for_each_pixel(size, outputs, |pixel| {
        let center = color_in.load_vec4(pixel);
        let surface = visibility.load(pixel);
        if surface[0] == MISS_INSTANCE {
            return [texel(center)];
        }
        let l_center = luminance(center.xyz());
        let sigma_l = params.sigma_luminance * center.w.max(0.0).sqrt() + 1.0e-4;

        let mut sum = Vec3::zero();
        let mut variance_sum = 0.0;
        let mut weight_sum = 0.0;
        for dy in -2i32..=2 {
            for dx in -2i32..=2 {
                let q = match offset_pixel(&color_in, pixel, dx * step, dy * step) {
                    Some(q) => q,
                    None => continue,
                };
                let neighbour = visibility.load(q);
                if neighbour[0] == MISS_INSTANCE {
                    continue;
                }
                let c = color_in.load_vec4(q);
                let h = ATROUS_KERNEL[dx.abs() as usize] * ATROUS_KERNEL[dy.abs() as usize];
                let w_l = (-(l_center - luminance(c.xyz())).abs() / sigma_l).exp();
                let w = h
                    * w_l
                    * geometry_weight(surface, neighbour, params.sigma_depth, params.sigma_normal, params.step_size);
                sum += c.xyz() * w;
                variance_sum += w * w * c.w;
                weight_sum += w;
            }
        }
        let color = sum / weight_sum;
        let variance = variance_sum / (weight_sum * weight_sum);
        [texel(Vec4::new(color.x, color.y, color.z, variance))]
    });
    Ok(())
}

/// Runs the reference implementation of one program over `size` invocations.
pub fn run_program<R: Resources + Sync>(
    program: Program,
    bound: &BoundSet,
    res: &R,
    outputs: &mut [OutputImage],
    size: UVec2,
) -> Result<()> {
    match program {
        Program::RayGeneration => ray_generation(bound, res, outputs, size),
        Program::ForwardProjection => forward_projection(bound, res, outputs, size),
        Program::GradientSampling => gradient_sampling(bound, res, outputs, size),
        Program::GradientSmoothing => gradient_smoothing(bound, res, outputs, size),
        Program::TemporalAccumulation => temporal_accumulation(bound, res, outputs, size),
        Program::SpatialFilter => spatial_filter(bound, res, outputs, size),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_encoding_is_close() {
        let normals = [
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(0.0, 0.0, -1.0),
            Vec3::new(1.0, -2.0, 0.5).normalized(),
            Vec3::new(-0.3, 0.2, -0.9).normalized(),
        ];
        for n in normals.iter() {
            let decoded = decode_normal(encode_normal(*n));
            assert!(decoded.dot(*n) > 0.9999, "{:?} -> {:?}", n, decoded);
        }
    }

    #[test]
    fn full_weight_blend_is_exact() {
        let current = Vec3::new(0.3, 0.7, 0.11);
        assert_eq!(mix3(Vec3::new(5.0, -2.0, 9.0), current, 1.0), current);
    }

    #[test]
    fn antilag_is_relative_change() {
        assert_eq!(antilag(0.5, 1.0, MIN_GRADIENT_LUMINANCE), 0.5);
        assert_eq!(antilag(3.0, 1.0, MIN_GRADIENT_LUMINANCE), 1.0);
        assert_eq!(antilag(0.0, 0.0, MIN_GRADIENT_LUMINANCE), 0.0);
    }

    #[test]
    fn geometry_weight_prefers_matching_surfaces() {
        let up = encode_normal(Vec3::unit_y());
        let side = encode_normal(Vec3::unit_x());
        let a = [1, up, 5.0f32.to_bits(), 0];
        let b = [2, up, 5.0f32.to_bits(), 0];
        let c = [3, side, 9.0f32.to_bits(), 0];
        assert!((geometry_weight(a, b, 1.0, 128.0, 1) - 1.0).abs() < 1.0e-3);
        assert!(geometry_weight(a, c, 1.0, 128.0, 1) < 1.0e-3);
        assert_eq!(geometry_weight(a, miss_visibility(), 1.0, 128.0, 1), 0.0);
    }
}
