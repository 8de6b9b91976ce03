mod accel;
mod binding;
mod camera;
pub mod cpu;
mod device;
mod error;
mod maths;
mod params;
mod passes;
mod renderer;
mod resource;
mod scene;
mod settings;

pub mod prelude {
    pub use ember_macro::*;

    pub use crate::accel::*;
    pub use crate::binding::*;
    pub use crate::camera::*;
    pub use crate::device::*;
    pub use crate::error::*;
    pub use crate::maths::*;
    pub use crate::params::*;
    pub use crate::passes::*;
    pub use crate::renderer::*;
    pub use crate::resource::*;
    pub use crate::scene::*;
    pub use crate::settings::*;
}
