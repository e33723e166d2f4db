pub mod arena;
pub mod depth_buffer;
pub mod dirty;
pub mod gizmos;
pub mod renderer;
pub mod transform;
pub mod uniform_buffer;

