use glam::Vec3;

use crate::engine::{arena::Handle, transform::Transform};

use super::geometry::GeometryResource;

/// A principal axis of a joint's local frame.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, strum::Display, strum::EnumString)]
#[strum(ascii_case_insensitive)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    #[inline]
    pub fn unit(self) -> Vec3 {
        match self {
            Axis::X => Vec3::X,
            Axis::Y => Vec3::Y,
            Axis::Z => Vec3::Z,
        }
    }

    #[inline]
    fn get(self, v: Vec3) -> f32 {
        match self {
            Axis::X => v.x,
            Axis::Y => v.y,
            Axis::Z => v.z,
        }
    }

    #[inline]
    fn set(self, v: &mut Vec3, value: f32) {
        match self {
            Axis::X => v.x = value,
            Axis::Y => v.y = value,
            Axis::Z => v.z = value,
        }
    }
}

/// The one or two axes a joint can be rotated around. Telemetry drives the primary axis.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct JointAxes {
    primary: Axis,
    secondary: Option<Axis>,
}

impl JointAxes {
    pub const fn single(axis: Axis) -> Self {
        Self {
            primary: axis,
            secondary: None,
        }
    }

    /// Returns `None` if both axes are the same.
    pub fn pair(primary: Axis, secondary: Axis) -> Option<Self> {
        (primary != secondary).then_some(Self {
            primary,
            secondary: Some(secondary),
        })
    }

    #[inline]
    pub fn primary(&self) -> Axis {
        self.primary
    }

    #[inline]
    pub fn secondary(&self) -> Option<Axis> {
        self.secondary
    }

    pub fn contains(&self, axis: Axis) -> bool {
        self.primary == axis || self.secondary == Some(axis)
    }
}

/// One rigid link of the arm. The rotation is always local; ancestors are only applied when the
/// world transform is composed.
#[derive(Debug)]
pub struct JointNode {
    /// 0 is the base, 1..=5 follow the arm towards the wrist.
    pub index: usize,
    /// The shape drawn at this joint's world transform.
    pub geometry: GeometryResource,
    /// The offset frame this joint hangs from. `None` only for the base.
    pub parent: Option<Handle<OffsetFrame>>,
    /// Axes telemetry may drive. `None` only for the base.
    axes: Option<JointAxes>,
    /// Euler angles in radians (XYZ order).
    rotation: Vec3,
    /// Bumped every time the rotation changes.
    generation: u64,
}

impl JointNode {
    pub(super) fn new(
        index: usize,
        geometry: GeometryResource,
        parent: Option<Handle<OffsetFrame>>,
        axes: Option<JointAxes>,
        rotation: Vec3,
    ) -> Self {
        Self {
            index,
            geometry,
            parent,
            axes,
            rotation,
            generation: 0,
        }
    }

    #[inline]
    pub fn axes(&self) -> Option<JointAxes> {
        self.axes
    }

    #[inline]
    pub fn rotation(&self) -> Vec3 {
        self.rotation
    }

    #[inline]
    pub fn angle(&self, axis: Axis) -> f32 {
        axis.get(self.rotation)
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(super) fn set_angle(&mut self, axis: Axis, value: f32) {
        axis.set(&mut self.rotation, value);
        self.generation += 1;
    }

    pub fn local_transform(&self) -> Transform {
        Transform::from_euler_rotation(self.rotation)
    }
}

/// Fixed translation between the pivots of two consecutive joints.
#[derive(Clone, Debug)]
pub struct OffsetFrame {
    translation: Vec3,
    /// The joint this offset is attached under.
    pub parent: Handle<JointNode>,
}

impl OffsetFrame {
    pub(super) fn new(translation: Vec3, parent: Handle<JointNode>) -> Self {
        Self {
            translation,
            parent,
        }
    }

    #[inline]
    pub fn translation(&self) -> Vec3 {
        self.translation
    }

    pub fn local_transform(&self) -> Transform {
        Transform::from_translation(self.translation)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn axis_names_parse_in_any_case() {
        assert_eq!(Axis::from_str("y").ok(), Some(Axis::Y));
        assert_eq!(Axis::from_str("Z").ok(), Some(Axis::Z));
        assert!(Axis::from_str("w").is_err());
    }

    #[test]
    fn axis_pair_must_be_distinct() {
        assert!(JointAxes::pair(Axis::X, Axis::X).is_none());

        let axes = JointAxes::pair(Axis::X, Axis::Z).unwrap();
        assert!(axes.contains(Axis::X));
        assert!(axes.contains(Axis::Z));
        assert!(!axes.contains(Axis::Y));
        assert_eq!(axes.primary(), Axis::X);
    }
}
