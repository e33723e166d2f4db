//! Forward kinematics for a six joint arm and the pipeline that drives it from telemetry.

pub mod definition;
pub mod geometry;
pub mod joint;
pub mod kinematic_tree;
pub mod pose;
pub mod scheduler;

/// Base plus five driven joints.
pub const JOINT_COUNT: usize = 6;

/// One offset between every pair of consecutive joints.
pub const OFFSET_COUNT: usize = JOINT_COUNT - 1;

pub mod prelude {
    pub use super::definition::*;
    pub use super::geometry::*;
    pub use super::kinematic_tree::*;
    pub use super::scheduler::*;
    pub use super::{JOINT_COUNT, OFFSET_COUNT};
}
