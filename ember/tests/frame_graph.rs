mod common;

use common::*;
use ember::{cpu::*, prelude::*};
use std::collections::HashSet;

#[test_log::test]
fn history_index_tracks_completed_frames() {
    let (_cpu, mut renderer) = renderer();
    let camera = Camera::default();
    for n in 1..=5u32 {
        let report = renderer.render_frame(&camera).unwrap();
        assert_eq!(report.frame_number, n - 1);
        let state = renderer.state();
        assert_eq!(state.frame_number, n);
        assert_eq!(state.history_index, (n % 2) as usize);
        assert!(!state.first_frame);
    }
}

#[test_log::test]
fn first_frame_skips_adaptive_passes_and_takes_current_sample() {
    let (cpu, mut renderer) = renderer();
    assert!(renderer.settings().adaptive);
    assert!(renderer.state().first_frame);

    let report = renderer.render_frame(&Camera::default()).unwrap();
    assert!(!report.adaptive_active);

    let passes = dispatched_passes(&cpu.take_commands());
    assert!(!passes.contains(&"forward-projection"));
    assert!(!passes.contains(&"gradient-sampling"));
    assert!(!passes.contains(&"gradient-smoothing"));

    let res = renderer.resources();
    let written = history_write(0);
    let radiance = cpu.read_image_vec4(res.radiance()).unwrap();
    let history = cpu.read_image_vec4(res.history_color(written)).unwrap();
    for (current, accumulated) in radiance.iter().zip(history.iter()) {
        assert_eq!(current.xyz(), accumulated.xyz());
    }
    let lengths = read_f32(&cpu, res.history_length(written));
    assert!(lengths.iter().all(|&length| length == 1.0));
}

#[test_log::test]
fn adaptive_frames_run_the_full_pass_sequence() {
    let settings = RenderSettings {
        filter_iterations: 2,
        ..Default::default()
    };
    let (cpu, mut renderer) = renderer_with(settings);
    let camera = Camera::default();
    renderer.render_frame(&camera).unwrap();
    cpu.take_commands();

    let report = renderer.render_frame(&camera).unwrap();
    assert!(report.adaptive_active);
    let commands = cpu.take_commands();
    assert_eq!(
        dispatched_passes(&commands),
        vec![
            "forward-projection",
            "ray-generation",
            "gradient-sampling",
            "gradient-smoothing",
            "gradient-smoothing",
            "gradient-smoothing",
            "temporal-accumulation",
            "spatial-filter",
            "spatial-filter",
        ]
    );

    // the three forward projection targets are cleared before the scatter
    let res = renderer.resources();
    let first_dispatch = commands
        .iter()
        .position(|command| command.pass().is_some())
        .unwrap();
    let cleared: HashSet<_> = commands[..first_dispatch]
        .iter()
        .filter_map(|command| match command {
            Command::Clear { image } => Some(*image),
            _ => None,
        })
        .collect();
    let expected: HashSet<_> = [res.forward_color(), res.forward_seed(), res.forward_depth()]
        .iter()
        .copied()
        .collect();
    assert_eq!(cleared, expected);
    assert!(matches!(commands.last(), Some(Command::Present { .. })));
}

#[test_log::test]
fn history_reads_are_never_written_within_a_frame() {
    let (cpu, mut renderer) = renderer();
    let camera = Camera::default();
    for _ in 0..4 {
        let history_index = renderer.state().history_index;
        renderer.render_frame(&camera).unwrap();
        let res = renderer.resources();
        let protected = [
            res.history_color(history_read(history_index)),
            res.history_moments(history_read(history_index)),
            res.history_length(history_read(history_index)),
        ];
        for command in cpu.take_commands() {
            if let Command::Dispatch { pass, reads, writes, .. } = command {
                for write in &writes {
                    assert!(!reads.contains(write), "{} reads its own target", pass);
                    assert!(!protected.contains(write), "{} overwrites history", pass);
                }
            }
        }
    }
}

#[test_log::test]
fn toggling_adaptive_takes_effect_on_the_next_frame() {
    let (cpu, mut renderer) = renderer();
    let camera = Camera::default();
    renderer.render_frame(&camera).unwrap();
    assert!(renderer.render_frame(&camera).unwrap().adaptive_active);
    cpu.take_commands();

    renderer.settings_mut().toggle_adaptive();
    let report = renderer.render_frame(&camera).unwrap();
    assert!(!report.adaptive_active);
    let passes = dispatched_passes(&cpu.take_commands());
    assert!(!passes.contains(&"forward-projection"));
    assert!(!passes.contains(&"gradient-sampling"));

    renderer.settings_mut().toggle_adaptive();
    let report = renderer.render_frame(&camera).unwrap();
    assert!(report.adaptive_active);
    let passes = dispatched_passes(&cpu.take_commands());
    assert!(passes.contains(&"forward-projection"));
    assert_eq!(passes.iter().filter(|&&pass| pass == "gradient-smoothing").count(), 3);

    let state = renderer.state();
    assert_eq!(state.frame_number, 4);
    assert_eq!(state.history_index, 0);
    let res = renderer.resources();
    let lengths = read_f32(&cpu, res.history_length(history_read(state.history_index)));
    assert!(lengths.iter().all(|&length| length >= 1.0 && length <= 4.0));
    let colors = cpu.read_image_vec4(res.history_color(history_read(state.history_index))).unwrap();
    assert!(colors.iter().all(|c| c.x.is_finite() && c.y.is_finite() && c.z.is_finite()));
}

#[test_log::test]
fn filter_output_follows_iteration_count() {
    let (cpu, mut renderer) = renderer();
    let camera = Camera::default();
    for k in 0..=MAX_FILTER_ITERATIONS {
        renderer.settings_mut().filter_iterations = k;
        let history_index = renderer.state().history_index;
        let report = renderer.render_frame(&camera).unwrap();
        assert_eq!(report.output, filter_output(k));

        let passes = dispatched_passes(&cpu.take_commands());
        assert_eq!(passes.iter().filter(|&&pass| pass == "spatial-filter").count(), k as usize);

        let res = renderer.resources();
        let expected_image = match k {
            0 => res.history_color(history_write(history_index)),
            k if (k - 1) % 2 == 0 => res.filter_image(FilterImage::B, history_index),
            _ => res.filter_image(FilterImage::A, history_index),
        };
        assert_eq!(report.output_image, expected_image);

        let (size, presented) = cpu.presented().unwrap();
        assert_eq!(size, test_size());
        assert_eq!(presented, cpu.read_image_vec4(expected_image).unwrap());
    }
}

#[test_log::test]
fn history_length_grows_by_one_or_resets() {
    let (cpu, mut renderer) = renderer();
    let camera = Camera::default();
    let max_length = renderer.settings().max_history_length as f32;

    renderer.render_frame(&camera).unwrap();
    let mut previous = read_f32(&cpu, renderer.resources().history_length(history_write(0)));
    for _ in 0..5 {
        let history_index = renderer.state().history_index;
        renderer.render_frame(&camera).unwrap();
        let current = read_f32(&cpu, renderer.resources().history_length(history_write(history_index)));
        for (before, after) in previous.iter().zip(current.iter()) {
            assert!(
                *after == 1.0 || *after == (before + 1.0).min(max_length),
                "history length went from {} to {}",
                before,
                after
            );
        }
        previous = current;
    }
    // the ground plane is stable enough to accumulate
    assert!(previous.iter().any(|&length| length == 6.0));
}

#[test_log::test]
fn static_camera_has_no_antilag() {
    let (cpu, mut renderer) = renderer();
    let camera = Camera::default();
    for _ in 0..3 {
        renderer.render_frame(&camera).unwrap();
    }
    let gradient = cpu
        .read_image_vec4(renderer.resources().gradient(gradient_output()))
        .unwrap();
    assert!(gradient.iter().any(|g| g.z == 1.0));
    for g in gradient.iter().filter(|g| g.z == 1.0) {
        assert_eq!(g.x, 0.0);
        assert_eq!(g.w, 0.0);
    }
}

#[test_log::test]
fn camera_motion_raises_antilag_and_shortens_the_blend() {
    let settings = RenderSettings {
        filter_iterations: 0,
        antilag_scale: 4.0,
        ..Default::default()
    };
    let (cpu, mut renderer) = renderer_with(settings);
    let mut camera = Camera::default();
    for _ in 0..4 {
        renderer.render_frame(&camera).unwrap();
    }
    let history_index = renderer.state().history_index;
    let history = cpu
        .read_image_vec4(renderer.resources().history_color(history_read(history_index)))
        .unwrap();

    camera.yaw += radians(1.0);
    let report = renderer.render_frame(&camera).unwrap();
    assert!(report.adaptive_active);

    let res = renderer.resources();
    let gradient = cpu.read_image_vec4(res.gradient(gradient_output())).unwrap();
    assert!(gradient.iter().any(|g| g.z == 1.0 && g.w > 0.0));

    let radiance = cpu.read_image_vec4(res.radiance()).unwrap();
    let motion = cpu.read_image_vec4(res.motion()).unwrap();
    let output = cpu.read_image_vec4(res.history_color(history_write(history_index))).unwrap();
    let lengths = read_f32(&cpu, res.history_length(history_write(history_index)));

    let size = test_size();
    let strata = stratum_size(size);
    let mut faster = 0;
    for y in 0..size.y {
        for x in 0..size.x {
            let index = (y * size.x + x) as usize;
            let length = lengths[index];
            if length == 1.0 {
                continue;
            }
            let m = motion[index];
            let prev_x = (x as f32 + 0.5 + m.x).floor() as u32;
            let prev_y = (y as f32 + 0.5 + m.y).floor() as u32;
            let previous = history[(prev_y * size.x + prev_x) as usize].xyz();

            let cell = ((y / STRATUM_SIZE) * strata.x + x / STRATUM_SIZE) as usize;
            let lambda = (gradient[cell].w * settings.antilag_scale).max(0.0).min(1.0);
            let fixed = settings.alpha.max(1.0 / length);
            let current = radiance[index].xyz();
            let gap = (previous - current).mag();
            let remaining = (output[index].xyz() - current).mag();
            assert!(
                (remaining - (1.0 - fixed) * (1.0 - lambda) * gap).abs() < 1.0e-4 * gap.max(1.0),
                "pixel ({}, {}) blended with the wrong weight",
                x,
                y
            );
            if lambda > 0.05 && gap > 1.0e-3 {
                assert!(remaining < (1.0 - fixed) * gap);
                faster += 1;
            }
        }
    }
    // shading changes on the moved view discard stale history faster than the fixed blend
    assert!(faster > 0);
}

#[test_log::test]
fn seeds_carry_over_only_at_stratum_representatives() {
    let (cpu, mut renderer) = renderer();
    let camera = Camera::default();
    renderer.render_frame(&camera).unwrap();
    let report = renderer.render_frame(&camera).unwrap();
    assert!(report.adaptive_active);

    let res = renderer.resources();
    let seeds = cpu.read_image(res.seed()).unwrap();
    let forward_seeds = cpu.read_image(res.forward_seed()).unwrap();
    let forward_depth = read_f32(&cpu, res.forward_depth());

    let size = test_size();
    let mut carried = 0;
    for y in 0..size.y {
        for x in 0..size.x {
            let pixel = UVec2::new(x, y);
            let index = (y * size.x + x) as usize;
            let representative = stratum_representative(pixel / STRATUM_SIZE, report.frame_number, size);
            if representative == pixel && forward_depth[index] != FORWARD_DEPTH_CLEAR {
                assert_eq!(seeds[index][0], forward_seeds[index][0]);
                carried += 1;
            } else {
                assert_eq!(seeds[index][0], initial_seed(pixel, size, report.frame_number));
            }
        }
    }
    assert!(carried > 0);
}

#[test_log::test]
fn forward_projection_is_cleared_after_a_camera_jump() {
    let (cpu, mut renderer) = renderer();
    let camera = Camera::default();
    renderer.render_frame(&camera).unwrap();
    renderer.render_frame(&camera).unwrap();

    let res = renderer.resources();
    let depth = read_f32(&cpu, res.forward_depth());
    assert!(depth.iter().any(|&d| d != FORWARD_DEPTH_CLEAR));

    // look straight up from high above the scene, nothing from last frame is visible
    let history_index = renderer.state().history_index;
    let jumped = Camera {
        position: Vec3::new(13.0, 50.0, 3.0),
        pitch: radians(MAX_PITCH_DEGREES),
        ..camera
    };
    let report = renderer.render_frame(&jumped).unwrap();
    assert!(report.adaptive_active);

    let res = renderer.resources();
    let depth = read_f32(&cpu, res.forward_depth());
    assert!(depth.iter().all(|&d| d == FORWARD_DEPTH_CLEAR));
    let color = cpu.read_image_vec4(res.forward_color()).unwrap();
    assert!(color.iter().all(|c| *c == Vec4::zero()));

    // every pixel now sees the sky and restarts its history
    let lengths = read_f32(&cpu, res.history_length(history_write(history_index)));
    assert!(lengths.iter().all(|&length| length == 1.0));
}

#[test_log::test]
fn camera_motion_produces_motion_vectors() {
    let (cpu, mut renderer) = renderer();
    let mut camera = Camera::default();
    renderer.render_frame(&camera).unwrap();
    camera.yaw += radians(1.0);
    renderer.render_frame(&camera).unwrap();

    let res = renderer.resources();
    let visibility = cpu.read_image(res.visibility()).unwrap();
    let motion = cpu.read_image_vec4(res.motion()).unwrap();
    let mut moving = 0;
    for (surface, m) in visibility.iter().zip(motion.iter()) {
        if surface[0] == MISS_INSTANCE {
            assert_eq!(m.w, 0.0);
        } else if m.w == 1.0 && m.x.abs() > 0.5 {
            moving += 1;
        }
    }
    assert!(moving > 0);
}

#[test_log::test]
fn suboptimal_surface_is_tolerated() {
    let (cpu, mut renderer) = renderer();
    cpu.set_surface_status(SurfaceStatus::Suboptimal);
    let camera = Camera::default();
    let size = test_size();
    for _ in 0..2 {
        let report = renderer.render_frame(&camera).unwrap();
        assert_eq!(report.surface_status, SurfaceStatus::Suboptimal);
        // nothing is recreated, the output keeps its startup size
        let output = cpu.read_image_vec4(report.output_image).unwrap();
        assert_eq!(output.len(), (size.x * size.y) as usize);
    }
    assert_eq!(cpu.frames_presented(), 2);
    assert_eq!(renderer.state().frame_number, 2);
}

#[test_log::test]
fn invalid_settings_abandon_the_frame() {
    let (cpu, mut renderer) = renderer();
    renderer.settings_mut().filter_iterations = 9;
    assert!(matches!(
        renderer.render_frame(&Camera::default()),
        Err(Error::InvalidSettings(_))
    ));
    assert_eq!(renderer.state().frame_number, 0);
    assert_eq!(cpu.frames_presented(), 0);
}
