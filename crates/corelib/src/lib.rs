//! Core types: math re-exports, errors, Camera, scene configuration.

pub use glam::{Mat4, Vec3, Vec4};

pub mod camera;
pub mod config;
pub mod error;

pub use error::{CoreError, CoreResult, ParseErrorKind, ShaderStage};
