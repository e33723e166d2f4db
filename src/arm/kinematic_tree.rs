use std::cell::RefCell;

use glam::{Mat4, Vec3};

use crate::engine::{
    arena::{Arena, Handle},
    dirty::Dirty,
};

use super::{
    JOINT_COUNT, OFFSET_COUNT,
    geometry::GeometryResource,
    joint::{Axis, JointAxes, JointNode, OffsetFrame},
};

#[derive(Debug, thiserror::Error)]
pub enum StructuralError {
    #[error("An arm needs exactly 6 geometries, got {0}")]
    GeometryCount(usize),

    #[error("An arm needs exactly 5 offsets, got {0}")]
    OffsetCount(usize),

    #[error("The base can not be driven, but axes were given for it")]
    DrivenBase,

    #[error("Joint {0} has no axes to drive")]
    MissingAxes(usize),
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum JointError {
    #[error("The base (joint 0) is not driven by telemetry")]
    BaseNotDriven,

    #[error("Joint index {0} is out of range")]
    OutOfRange(usize),

    #[error("Joint {index} can not rotate around the {axis} axis")]
    AxisNotDriven { index: usize, axis: Axis },
}

/// Per joint description that is not loaded from geometry.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct JointSetup {
    /// `None` for the base, required for every other joint.
    pub axes: Option<JointAxes>,
    /// Rest rotation in radians.
    pub rotation: Vec3,
}

impl JointSetup {
    pub const BASE: Self = Self {
        axes: None,
        rotation: Vec3::ZERO,
    };

    pub const fn driven(axis: Axis) -> Self {
        Self {
            axes: Some(JointAxes::single(axis)),
            rotation: Vec3::ZERO,
        }
    }
}

/// Base fixed, waist around Y, shoulder and elbow around Z, wrist roll around X and wrist pitch
/// around Z.
pub const DEFAULT_JOINT_SETUPS: [JointSetup; JOINT_COUNT] = [
    JointSetup::BASE,
    JointSetup::driven(Axis::Y),
    JointSetup::driven(Axis::Z),
    JointSetup::driven(Axis::Z),
    JointSetup::driven(Axis::X),
    JointSetup::driven(Axis::Z),
];

#[derive(Clone, Copy)]
struct CachedWorld {
    transform: Mat4,
    /// Generation of the joint when this was composed.
    generation: u64,
    /// Stamp of the parent's entry when this was composed. 0 for the root.
    parent_stamp: u64,
    stamp: u64,
}

#[derive(Default)]
struct WorldCache {
    entries: [Option<CachedWorld>; JOINT_COUNT],
    next_stamp: u64,
}

/// A strict chain: joint[0] -> offset[0] -> joint[1] -> ... -> offset[4] -> joint[5].
pub struct KinematicTree {
    joints: Arena<JointNode>,
    offsets: Arena<OffsetFrame>,
    /// Set when any local rotation changed since the last full composition.
    dirty: Dirty,
    world: RefCell<WorldCache>,
}

impl KinematicTree {
    pub fn build(
        offsets: &[Vec3],
        geometries: Vec<GeometryResource>,
    ) -> Result<Self, StructuralError> {
        Self::build_with(offsets, geometries, &DEFAULT_JOINT_SETUPS)
    }

    /// Assemble the chain. Everything is validated up front so a partially built tree is never
    /// observable.
    pub fn build_with(
        offsets: &[Vec3],
        geometries: Vec<GeometryResource>,
        setups: &[JointSetup; JOINT_COUNT],
    ) -> Result<Self, StructuralError> {
        if geometries.len() != JOINT_COUNT {
            return Err(StructuralError::GeometryCount(geometries.len()));
        }
        if offsets.len() != OFFSET_COUNT {
            return Err(StructuralError::OffsetCount(offsets.len()));
        }
        if setups[0].axes.is_some() {
            return Err(StructuralError::DrivenBase);
        }
        if let Some(index) = (1..JOINT_COUNT).find(|&i| setups[i].axes.is_none()) {
            return Err(StructuralError::MissingAxes(index));
        }

        let mut joints = Arena::with_capacity(JOINT_COUNT);
        let mut frames = Arena::with_capacity(OFFSET_COUNT);

        let mut parent = None;
        for (index, (geometry, setup)) in geometries.into_iter().zip(setups).enumerate() {
            let joint = joints.insert(JointNode::new(
                index,
                geometry,
                parent,
                setup.axes,
                setup.rotation,
            ));

            parent = offsets
                .get(index)
                .map(|&translation| frames.insert(OffsetFrame::new(translation, joint)));
        }

        Ok(Self {
            joints,
            offsets: frames,
            dirty: Dirty::smudged(),
            world: RefCell::new(WorldCache::default()),
        })
    }

    #[inline]
    pub fn joint(&self, index: usize) -> Option<&JointNode> {
        self.joints.get(Handle::raw(index))
    }

    pub fn joints(&self) -> impl Iterator<Item = &JointNode> {
        self.joints.iter().map(|(_, joint)| joint)
    }

    /// The offset between joint `index` and joint `index + 1`.
    #[inline]
    pub fn offset(&self, index: usize) -> Option<&OffsetFrame> {
        self.offsets.get(Handle::raw(index))
    }

    /// True if a rotation changed since the last call to [Self::compose_all].
    pub fn is_dirty(&self) -> bool {
        self.dirty.is_dirty()
    }

    /// Set one component of a driven joint's local rotation. Angles are not clamped; they wrap
    /// through the rotation.
    pub fn set_joint_angle(&mut self, index: usize, axis: Axis, value: f32) -> Result<(), JointError> {
        if index == 0 {
            return Err(JointError::BaseNotDriven);
        }
        let joint = self
            .joints
            .get_mut(Handle::raw(index))
            .ok_or(JointError::OutOfRange(index))?;

        match joint.axes() {
            Some(axes) if axes.contains(axis) => {}
            _ => return Err(JointError::AxisNotDriven { index, axis }),
        }

        joint.set_angle(axis, value);
        self.dirty.smudge();

        Ok(())
    }

    /// world(0) = local(0), world(i) = world(i - 1) * offset(i - 1) * local(i).
    pub fn compose_world_transform(&self, index: usize) -> Result<Mat4, JointError> {
        if index >= self.joints.len() {
            return Err(JointError::OutOfRange(index));
        }

        let mut cache = self.world.borrow_mut();
        Ok(self.compose_into(&mut cache, index))
    }

    /// World transforms of every joint, in kinematic order.
    pub fn compose_all(&self) -> [Mat4; JOINT_COUNT] {
        let mut cache = self.world.borrow_mut();
        self.compose_into(&mut cache, JOINT_COUNT - 1);
        self.dirty.take();

        std::array::from_fn(|i| {
            cache.entries[i]
                .map(|entry| entry.transform)
                .unwrap_or(Mat4::IDENTITY)
        })
    }

    /// Reference composition without any caching.
    pub fn compose_uncached(&self, index: usize) -> Result<Mat4, JointError> {
        let mut joint = self.joint(index).ok_or(JointError::OutOfRange(index))?;
        let mut transform = joint.local_transform().to_mat4();

        while let Some(offset) = joint.parent {
            let frame = &self.offsets[offset];
            joint = &self.joints[frame.parent];
            transform = joint.local_transform().to_mat4() * frame.local_transform().to_mat4() * transform;
        }

        Ok(transform)
    }

    /// Walk from the root to `index`, only recomposing entries whose own generation or parent
    /// entry changed since they were cached.
    fn compose_into(&self, cache: &mut WorldCache, index: usize) -> Mat4 {
        for i in 0..=index {
            let joint = &self.joints[Handle::raw(i)];

            let parent = joint.parent.map(|offset| {
                let frame = &self.offsets[offset];
                (frame, frame.parent.index())
            });

            let parent_entry = parent.and_then(|(_, p)| cache.entries[p]);
            let parent_stamp = parent_entry.map_or(0, |entry| entry.stamp);

            if let Some(entry) = cache.entries[i] {
                if entry.generation == joint.generation() && entry.parent_stamp == parent_stamp {
                    continue;
                }
            }

            let local = joint.local_transform().to_mat4();
            let transform = match (parent, parent_entry) {
                (Some((frame, _)), Some(parent_entry)) => {
                    parent_entry.transform * frame.local_transform().to_mat4() * local
                }
                _ => local,
            };

            cache.next_stamp += 1;
            cache.entries[i] = Some(CachedWorld {
                transform,
                generation: joint.generation(),
                parent_stamp,
                stamp: cache.next_stamp,
            });
        }

        cache.entries[index]
            .map(|entry| entry.transform)
            .unwrap_or(Mat4::IDENTITY)
    }
}
