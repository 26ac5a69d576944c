//! Sonoshade Render - Program Host and Display
//!
//! This crate runs generated rendering programs:
//! - `DisplaySurface` abstraction over whatever presents pixels
//! - `RenderHost`, which activates candidates without ever leaving the
//!   display without a working program
//! - wgpu backend and window surface

use thiserror::Error;

pub mod backend;
pub mod host;
pub mod surface;
pub mod wgpu_surface;

pub use backend::WgpuBackend;
pub use host::{ActiveProgramState, RenderHost};
pub use surface::{DisplaySurface, ProgramInputs};
pub use wgpu_surface::WgpuSurface;

/// Rendering errors
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Device error: {0}")]
    DeviceError(String),

    #[error("Shader compilation failed: {0}")]
    ShaderCompilation(String),

    /// The built-in program does not compile; nothing can be shown
    #[error("Built-in default program rejected: {0}")]
    DefaultProgramRejected(String),

    #[error("Device lost")]
    DeviceLost,

    #[error("Surface error: {0}")]
    SurfaceError(String),
}

/// Result type for rendering operations
pub type Result<T> = std::result::Result<T, RenderError>;
