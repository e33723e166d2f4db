mod render;
mod surface;

pub use render::*;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Could not create a window surface: {0}")]
    CreateSurface(#[from] wgpu::CreateSurfaceError),

    #[error("Could not find a graphics adapter compatible with the window")]
    NoAdapter,

    #[error("The window surface is not supported by the adapter")]
    UnsupportedSurface,

    #[error("Could not request a device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),
}
