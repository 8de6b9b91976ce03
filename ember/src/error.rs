use crate::device::{Capability, Program};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("device is missing required capability: {0}")]
    MissingCapability(Capability),

    #[error("scene has no primitives to build")]
    EmptyScene,

    #[error("scene acceleration structure has already been built")]
    SceneAlreadyBuilt,

    #[error("scene acceleration structure has not been built")]
    SceneNotBuilt,

    #[error("failed to create {what}: {reason}")]
    ResourceCreation { what: &'static str, reason: String },

    #[error("failed to resolve program {program}: {reason}")]
    ProgramResolution { program: Program, reason: String },

    #[error("pass {pass}: binding {slot}: {reason}")]
    BindingMismatch {
        pass: &'static str,
        slot: u32,
        reason: String,
    },

    #[error("pass {pass}: image {image} is bound for both read and write")]
    Hazard { pass: &'static str, image: String },

    #[error("unknown {0} handle")]
    UnknownResource(&'static str),

    #[error("failed to acquire surface image: {0}")]
    Acquire(String),

    #[error("failed to submit frame: {0}")]
    Submit(String),

    #[error("failed to present frame: {0}")]
    Present(String),

    #[error("invalid render settings: {0}")]
    InvalidSettings(String),
}
