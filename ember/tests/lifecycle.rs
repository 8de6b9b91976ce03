mod common;

use common::*;
use ember::{cpu::*, prelude::*};
use std::sync::Arc;
use strum::IntoEnumIterator;

fn position(events: &[LifetimeEvent], event: LifetimeEvent) -> usize {
    events
        .iter()
        .position(|e| *e == event)
        .unwrap_or_else(|| panic!("missing {:?}", event))
}

#[test_log::test]
fn objects_are_released_in_reverse_creation_order() {
    let (cpu, mut renderer) = renderer();
    renderer.render_frame(&Camera::default()).unwrap();
    assert!(cpu.live_object_count() > 0);
    drop(renderer);
    assert_eq!(cpu.live_object_count(), 0);

    let events = cpu.lifetime_events();
    let created: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            LifetimeEvent::Created(name) => Some(name.clone()),
            _ => None,
        })
        .collect();
    let released: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            LifetimeEvent::Released(name) => Some(name.clone()),
            _ => None,
        })
        .collect();
    let mut reversed = created.clone();
    reversed.reverse();
    assert_eq!(released, reversed);

    // every creation precedes every release
    let last_created = position(&events, LifetimeEvent::Created("image:filter-b".to_owned()));
    let first_released = position(&events, LifetimeEvent::Released("image:filter-b".to_owned()));
    assert!(last_created < first_released);
    assert_eq!(created.first().map(String::as_str), Some("accel:bottom-level"));
    assert_eq!(released.last().map(String::as_str), Some("accel:bottom-level"));
}

#[test]
fn scene_levels_outlive_the_programs_and_images() {
    let (cpu, mut renderer) = renderer();
    renderer.render_frame(&Camera::default()).unwrap();
    drop(renderer);

    let events = cpu.lifetime_events();
    let top_level = position(&events, LifetimeEvent::Released("accel:top-level".to_owned()));
    let materials = position(&events, LifetimeEvent::Released("buffer:materials".to_owned()));
    let bottom_level = position(&events, LifetimeEvent::Released("accel:bottom-level".to_owned()));
    let radiance = position(&events, LifetimeEvent::Released("image:radiance".to_owned()));
    let ray_generation = position(&events, LifetimeEvent::Released("program:ray-generation".to_owned()));
    assert!(radiance < ray_generation);
    assert!(ray_generation < top_level);
    assert!(top_level < materials);
    assert!(materials < bottom_level);
}

#[test]
fn missing_ray_tracing_support_is_fatal() {
    for missing in Capability::iter() {
        let cpu = Arc::new(CpuDevice::with_capabilities(
            Capability::iter().filter(|capability| *capability != missing),
        ));
        let device: SharedDevice = cpu.clone();
        let mut accel = SceneAccel::new(&device);
        accel.add_primitives(&generate_random_scene(TEST_SEED));
        let result = accel
            .build()
            .and_then(|_| Renderer::new(&device, accel, test_size(), RenderSettings::default()));
        match result {
            Err(Error::MissingCapability(capability)) => assert_eq!(capability, missing),
            Err(err) => panic!("unexpected error {}", err),
            Ok(_) => panic!("renderer created without {}", missing),
        }
        assert_eq!(cpu.live_object_count(), 0);
    }
}

#[test]
fn renderer_requires_a_built_scene() {
    let (cpu, device) = cpu_device();
    let mut accel = SceneAccel::new(&device);
    accel.add_primitives(&generate_random_scene(TEST_SEED));
    let result = Renderer::new(&device, accel, test_size(), RenderSettings::default());
    assert!(matches!(result, Err(Error::SceneNotBuilt)));
    assert_eq!(cpu.live_object_count(), 0);
}

#[test]
fn binding_one_image_for_read_and_write_is_rejected() {
    let (cpu, mut renderer) = renderer();
    renderer.render_frame(&Camera::default()).unwrap();
    cpu.take_commands();

    let device = SharedDevice::clone(renderer.device());
    let program = Pipeline::new(&device, program_desc(Program::SpatialFilter)).unwrap();
    let res = renderer.resources();
    let params = SpatialFilterParams {
        size: test_size(),
        step_size: 1,
        sigma_luminance: 4.0,
        sigma_depth: 1.0,
        sigma_normal: 128.0,
        pad: [0; 2],
    };
    let filter_a = res.filter_image(FilterImage::A, 0);
    let entries = SpatialFilterLayout::entries(&params, res.visibility(), filter_a, filter_a);
    let result = device.dispatch("spatial-filter", program.id(), &entries, test_size());
    match result {
        Err(Error::Hazard { pass, image }) => {
            assert_eq!(pass, "spatial-filter");
            assert!(!image.is_empty());
        }
        other => panic!("expected a hazard, got {:?}", other),
    }
    assert!(cpu.take_commands().is_empty());
}

#[test]
fn mismatched_bindings_are_rejected() {
    let (_cpu, renderer) = renderer();
    let device = SharedDevice::clone(renderer.device());
    let program = Pipeline::new(&device, program_desc(Program::SpatialFilter)).unwrap();
    let res = renderer.resources();
    let params = GradientSampleParams {
        size: test_size(),
        stratum_size: res.stratum_size(),
        frame_number: 0,
        gradient_scale: 1.0,
        depth_threshold: 0.1,
        min_luminance: MIN_GRADIENT_LUMINANCE,
    };
    // the gradient sampling layout against the spatial filter program
    let entries = GradientSamplingLayout::entries(
        &params,
        res.radiance(),
        res.visibility(),
        res.forward_color(),
        res.forward_depth(),
        res.gradient(0),
    );
    assert!(matches!(
        device.dispatch("spatial-filter", program.id(), &entries, test_size()),
        Err(Error::BindingMismatch { .. })
    ));
}

#[test]
fn program_names_are_stable() {
    let names: Vec<_> = Program::iter().map(|program| program.to_string()).collect();
    assert_eq!(
        names,
        vec![
            "ray-generation",
            "forward-projection",
            "gradient-sampling",
            "gradient-smoothing",
            "temporal-accumulation",
            "spatial-filter",
        ]
    );
    assert!(Program::RayGeneration.is_ray_tracing());
    assert!(!Program::SpatialFilter.is_ray_tracing());
}
