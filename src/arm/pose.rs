use serde::Deserialize;

use super::{
    JOINT_COUNT,
    kinematic_tree::{JointError, KinematicTree},
};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, strum::Display, strum::EnumString)]
#[strum(ascii_case_insensitive)]
pub enum AngleUnits {
    #[default]
    Degrees,
    Radians,
}

impl AngleUnits {
    #[inline]
    pub fn to_radians(self, value: f32) -> f32 {
        match self {
            AngleUnits::Degrees => value.to_radians(),
            AngleUnits::Radians => value,
        }
    }
}

/// One decoded telemetry message.
#[derive(Clone, Debug, PartialEq)]
pub struct PoseSample {
    /// Arrival order; never decreases.
    pub sequence: u64,
    pub units: AngleUnits,
    /// Angles as they arrived on the wire, index 0 drives joint 1.
    pub angles: Vec<f32>,
}

impl PoseSample {
    /// The local angle (in the sample's units) each driven joint should take. Joint 3 is
    /// measured relative to joint 2's commanded angle, so it gets the difference of the two.
    pub fn joint_targets(&self) -> impl Iterator<Item = (usize, f32)> {
        let a = &self.angles;
        [
            a.first().map(|&a0| (1, a0)),
            a.get(1).map(|&a1| (2, a1)),
            a.get(1).zip(a.get(2)).map(|(&a1, &a2)| (3, a2 - a1)),
        ]
        .into_iter()
        .flatten()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Telemetry payload is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Telemetry payload has no joints field")]
    MissingAngles,

    #[error("Telemetry payload has {0} angles, at most 6 are supported")]
    TooManyAngles(usize),

    #[error("Angle {0} in the telemetry payload is not a finite number")]
    NonFiniteAngle(usize),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum RejectedReason {
    #[error("The arm is not loaded yet")]
    NotReady,

    #[error("Sample {sequence} is not newer than sample {latest}")]
    Stale { sequence: u64, latest: u64 },
}

/// Decode or validation failure for one inbound message. The message is dropped either way.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Rejected(#[from] RejectedReason),
}

#[derive(Deserialize)]
struct JointsMessage {
    #[serde(default)]
    joints: Option<Vec<f32>>,
}

/// Turns raw telemetry into pose samples and applies them to the tree.
pub struct PoseIngestor {
    units: AngleUnits,
    last_applied: Option<u64>,
}

impl PoseIngestor {
    pub fn new(units: AngleUnits) -> Self {
        Self {
            units,
            last_applied: None,
        }
    }

    #[inline]
    pub fn last_applied(&self) -> Option<u64> {
        self.last_applied
    }

    /// Decode a `{"joints": [..]}` payload.
    pub fn decode(&self, payload: &[u8], sequence: u64) -> Result<PoseSample, DecodeError> {
        let message: JointsMessage = serde_json::from_slice(payload)?;
        let angles = message.joints.ok_or(DecodeError::MissingAngles)?;
        if angles.len() > JOINT_COUNT {
            return Err(DecodeError::TooManyAngles(angles.len()));
        }
        // Numbers beyond f32 range saturate to infinity.
        if let Some(index) = angles.iter().position(|angle| !angle.is_finite()) {
            return Err(DecodeError::NonFiniteAngle(index));
        }

        Ok(PoseSample {
            sequence,
            units: self.units,
            angles,
        })
    }

    /// Telemetry is dropped until the arm is loaded, and anything not newer than the last
    /// applied sample is stale.
    pub fn validate(
        &self,
        sample: &PoseSample,
        tree: Option<&KinematicTree>,
    ) -> Result<(), RejectedReason> {
        if tree.is_none() {
            return Err(RejectedReason::NotReady);
        }
        check_newer(sample.sequence, self.last_applied)
    }

    /// Set every joint the sample defines on its primary axis.
    pub fn apply(&mut self, sample: &PoseSample, tree: &mut KinematicTree) -> Result<(), JointError> {
        for (index, angle) in sample.joint_targets() {
            let axis = tree
                .joint(index)
                .and_then(|joint| joint.axes())
                .ok_or(JointError::OutOfRange(index))?
                .primary();
            tree.set_joint_angle(index, axis, sample.units.to_radians(angle))?;
        }

        self.last_applied = Some(sample.sequence);

        Ok(())
    }
}

pub(super) fn check_newer(sequence: u64, latest: Option<u64>) -> Result<(), RejectedReason> {
    match latest {
        Some(latest) if sequence <= latest => Err(RejectedReason::Stale { sequence, latest }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::arm::{
        definition::ArmDefinition,
        geometry::{GeometryResource, box_mesh},
        joint::Axis,
    };

    fn tree() -> KinematicTree {
        let geometries = (0..JOINT_COUNT)
            .map(|_| GeometryResource::new(box_mesh("box", Vec3::splat(0.05))))
            .collect();
        ArmDefinition::default().build_tree(geometries).unwrap()
    }

    fn angle(tree: &KinematicTree, index: usize, axis: Axis) -> f32 {
        tree.joint(index).unwrap().angle(axis)
    }

    #[test]
    fn decodes_joint_angles() {
        let ingestor = PoseIngestor::new(AngleUnits::Degrees);
        let sample = ingestor.decode(br#"{"joints":[10, 25.5, 40]}"#, 3).unwrap();

        assert_eq!(sample.sequence, 3);
        assert_eq!(sample.angles, vec![10.0, 25.5, 40.0]);
    }

    #[test]
    fn malformed_payloads_fail_to_decode() {
        let ingestor = PoseIngestor::new(AngleUnits::Degrees);

        assert!(matches!(
            ingestor.decode(b"joints: 1, 2", 1),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            ingestor.decode(br#"{"joints":["a"]}"#, 1),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            ingestor.decode(br#"{"angles":[1, 2, 3]}"#, 1),
            Err(DecodeError::MissingAngles)
        ));
        assert!(matches!(
            ingestor.decode(br#"{"joints":[1, 2, 3, 4, 5, 6, 7]}"#, 1),
            Err(DecodeError::TooManyAngles(7))
        ));
    }

    #[test]
    fn angles_beyond_f32_range_fail_to_decode() {
        let ingestor = PoseIngestor::new(AngleUnits::Degrees);

        assert!(matches!(
            ingestor.decode(br#"{"joints":[1e39, 0, 0]}"#, 1),
            Err(DecodeError::NonFiniteAngle(0))
        ));
        assert!(matches!(
            ingestor.decode(br#"{"joints":[0, 0, -1e39]}"#, 1),
            Err(DecodeError::NonFiniteAngle(2))
        ));
    }

    #[test]
    fn telemetry_is_rejected_until_the_arm_is_loaded() {
        let ingestor = PoseIngestor::new(AngleUnits::Degrees);
        let sample = ingestor.decode(br#"{"joints":[1]}"#, 1).unwrap();

        assert_eq!(
            ingestor.validate(&sample, None),
            Err(RejectedReason::NotReady)
        );
    }

    #[test]
    fn applies_joints_with_elbow_differential() {
        let mut tree = tree();
        let mut ingestor = PoseIngestor::new(AngleUnits::Degrees);

        let previous = ingestor.decode(br#"{"joints":[0, 0, 0]}"#, 4).unwrap();
        ingestor.apply(&previous, &mut tree).unwrap();

        let sample = ingestor.decode(br#"{"joints":[10, 25, 40]}"#, 5).unwrap();
        assert_eq!(ingestor.validate(&sample, Some(&tree)), Ok(()));
        ingestor.apply(&sample, &mut tree).unwrap();

        assert_eq!(angle(&tree, 1, Axis::Y), 10.0_f32.to_radians());
        assert_eq!(angle(&tree, 2, Axis::Z), 25.0_f32.to_radians());
        assert_eq!(angle(&tree, 3, Axis::Z), 15.0_f32.to_radians());
        assert_eq!(ingestor.last_applied(), Some(5));
    }

    #[test]
    fn duplicate_sequence_is_stale_and_changes_nothing() {
        let mut tree = tree();
        let mut ingestor = PoseIngestor::new(AngleUnits::Degrees);

        let sample = ingestor.decode(br#"{"joints":[10, 25, 40]}"#, 5).unwrap();
        ingestor.apply(&sample, &mut tree).unwrap();
        let before = tree.compose_all();

        let duplicate = ingestor.decode(br#"{"joints":[10, 25, 40]}"#, 5).unwrap();
        assert_eq!(
            ingestor.validate(&duplicate, Some(&tree)),
            Err(RejectedReason::Stale {
                sequence: 5,
                latest: 5
            })
        );
        let older = ingestor.decode(br#"{"joints":[90, 90, 90]}"#, 2).unwrap();
        assert!(ingestor.validate(&older, Some(&tree)).is_err());

        assert_eq!(tree.compose_all(), before);
        assert_eq!(angle(&tree, 1, Axis::Y), 10.0_f32.to_radians());
    }

    #[test]
    fn short_samples_only_drive_the_joints_they_define() {
        let mut tree = tree();
        let mut ingestor = PoseIngestor::new(AngleUnits::Radians);

        let sample = ingestor.decode(br#"{"joints":[0.5, 0.25]}"#, 1).unwrap();
        ingestor.apply(&sample, &mut tree).unwrap();

        assert_eq!(angle(&tree, 1, Axis::Y), 0.5);
        assert_eq!(angle(&tree, 2, Axis::Z), 0.25);
        assert_eq!(angle(&tree, 3, Axis::Z), 0.0);
    }

    #[test]
    fn angles_beyond_the_third_are_ignored() {
        let mut tree = tree();
        let mut ingestor = PoseIngestor::new(AngleUnits::Radians);

        let sample = ingestor
            .decode(br#"{"joints":[0.1, 0.2, 0.3, 0.4, 0.5, 0.6]}"#, 1)
            .unwrap();
        ingestor.apply(&sample, &mut tree).unwrap();

        assert_eq!(angle(&tree, 4, Axis::X), 0.0);
        assert_eq!(angle(&tree, 5, Axis::Z), 0.0);
    }
}
