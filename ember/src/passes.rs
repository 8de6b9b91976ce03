use crate::{binding::*, device::*, params::*};
use ember_macro::pass_layout;

pass_layout!(pub RayGenerationLayout {
    params: UniformData<RayGenParams>,
    accel: AccelerationStructure,
    materials: StorageBuffer,
    forward_seed: StorageImage<Read>,
    forward_depth: StorageImage<Read>,
    radiance: StorageImage<Write>,
    visibility: StorageImage<Write>,
    motion: StorageImage<Write>,
    seed: StorageImage<Write>,
});

pass_layout!(pub ForwardProjectionLayout {
    params: UniformData<ForwardProjectParams>,
    prev_radiance: StorageImage<Read>,
    prev_visibility: StorageImage<Read>,
    prev_seed: StorageImage<Read>,
    forward_color: StorageImage<Write>,
    forward_seed: StorageImage<Write>,
    forward_depth: StorageImage<Write>,
});

pass_layout!(pub GradientSamplingLayout {
    params: UniformData<GradientSampleParams>,
    radiance: StorageImage<Read>,
    visibility: StorageImage<Read>,
    forward_color: StorageImage<Read>,
    forward_depth: StorageImage<Read>,
    gradient: StorageImage<Write>,
});

pass_layout!(pub GradientSmoothingLayout {
    params: UniformData<GradientSmoothParams>,
    visibility: StorageImage<Read>,
    gradient_in: StorageImage<Read>,
    gradient_out: StorageImage<Write>,
});

pass_layout!(pub TemporalLayout {
    params: UniformData<TemporalParams>,
    radiance: StorageImage<Read>,
    visibility: StorageImage<Read>,
    motion: StorageImage<Read>,
    prev_visibility: StorageImage<Read>,
    gradient: StorageImage<Read>,
    history_color_in: StorageImage<Read>,
    history_moments_in: StorageImage<Read>,
    history_length_in: StorageImage<Read>,
    history_color_out: StorageImage<Write>,
    history_moments_out: StorageImage<Write>,
    history_length_out: StorageImage<Write>,
});

pass_layout!(pub SpatialFilterLayout {
    params: UniformData<SpatialFilterParams>,
    visibility: StorageImage<Read>,
    color_in: StorageImage<Read>,
    color_out: StorageImage<Write>,
});

pub fn program_bindings(program: Program) -> &'static [BindingSlot] {
    match program {
        Program::RayGeneration => RayGenerationLayout::BINDINGS,
        Program::ForwardProjection => ForwardProjectionLayout::BINDINGS,
        Program::GradientSampling => GradientSamplingLayout::BINDINGS,
        Program::GradientSmoothing => GradientSmoothingLayout::BINDINGS,
        Program::TemporalAccumulation => TemporalLayout::BINDINGS,
        Program::SpatialFilter => SpatialFilterLayout::BINDINGS,
    }
}

pub fn program_desc(program: Program) -> ProgramDesc {
    ProgramDesc {
        program,
        bindings: program_bindings(program),
    }
}

/// Half of each history pair that holds last frame's result.
pub fn history_read(history_index: usize) -> usize {
    history_index
}

pub fn history_write(history_index: usize) -> usize {
    1 - history_index
}

pub const GRADIENT_SAMPLE_TARGET: usize = 0;

/// Gradient buffers `(read, write)` for one smoothing iteration.
pub fn gradient_smooth_io(iteration: u32) -> (usize, usize) {
    let read = (iteration % 2) as usize;
    (read, 1 - read)
}

/// Gradient buffer holding the antilag weight after all smoothing iterations.
pub fn gradient_output() -> usize {
    gradient_smooth_io(GRADIENT_SMOOTHING_ITERATIONS - 1).1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterImage {
    Accumulated,
    A,
    B,
}

impl FilterImage {
    pub fn working_index(&self) -> Option<usize> {
        match self {
            FilterImage::Accumulated => None,
            FilterImage::A => Some(0),
            FilterImage::B => Some(1),
        }
    }
}

/// Images `(read, write)` for one spatial filter pass.
pub fn filter_pass_io(pass: u32) -> (FilterImage, FilterImage) {
    let write = if pass % 2 == 0 { FilterImage::B } else { FilterImage::A };
    let read = match pass {
        0 => FilterImage::Accumulated,
        _ if pass % 2 == 0 => FilterImage::A,
        _ => FilterImage::B,
    };
    (read, write)
}

pub fn filter_output(iterations: u32) -> FilterImage {
    match iterations {
        0 => FilterImage::Accumulated,
        k if (k - 1) % 2 == 0 => FilterImage::B,
        _ => FilterImage::A,
    }
}

pub fn filter_step_size(pass: u32) -> u32 {
    1 << pass
}

pub fn gradient_step_size(iteration: u32) -> u32 {
    1 << iteration
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_halves_are_disjoint() {
        for index in 0..2 {
            assert_ne!(history_read(index), history_write(index));
        }
        assert_eq!(history_write(0), 1);
        assert_eq!(history_write(1), 0);
    }

    #[test]
    fn gradient_smoothing_ping_pongs_into_second_buffer() {
        assert_eq!(gradient_smooth_io(0), (GRADIENT_SAMPLE_TARGET, 1));
        assert_eq!(gradient_smooth_io(1), (1, 0));
        assert_eq!(gradient_smooth_io(2), (0, 1));
        assert_eq!(gradient_output(), 1);
        let steps: Vec<_> = (0..GRADIENT_SMOOTHING_ITERATIONS).map(gradient_step_size).collect();
        assert_eq!(steps, vec![1, 2, 4]);
    }

    #[test]
    fn filter_output_selection() {
        let expected = [
            FilterImage::Accumulated,
            FilterImage::B,
            FilterImage::A,
            FilterImage::B,
            FilterImage::A,
            FilterImage::B,
        ];
        for (k, expected) in expected.iter().enumerate() {
            assert_eq!(filter_output(k as u32), *expected, "iterations = {}", k);
        }
    }

    #[test]
    fn filter_passes_chain_and_end_on_selected_output() {
        for k in 1..=5 {
            let mut last_write = FilterImage::Accumulated;
            for pass in 0..k {
                let (read, write) = filter_pass_io(pass);
                assert_eq!(read, last_write);
                assert_ne!(read, write);
                last_write = write;
            }
            assert_eq!(last_write, filter_output(k));
        }
    }

    #[test]
    fn layouts_are_distinct_per_program() {
        assert_eq!(program_bindings(Program::TemporalAccumulation).len(), 12);
        assert_eq!(program_bindings(Program::SpatialFilter).len(), 4);
        assert_eq!(RayGenerationLayout::BINDINGS[1].kind, BindingKind::AccelerationStructure);
    }
}
