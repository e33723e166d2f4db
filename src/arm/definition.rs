use std::path::{Path, PathBuf};

use glam::Vec3;

use crate::config::parser::{ConfigError, ConfigLine, ConfigLines};

use super::{
    JOINT_COUNT, OFFSET_COUNT,
    geometry::{GeometryRequest, GeometryResource},
    joint::{Axis, JointAxes},
    kinematic_tree::{DEFAULT_JOINT_SETUPS, JointSetup, KinematicTree, StructuralError},
    pose::AngleUnits,
};

#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    #[error("Could not read arm definition ({path}): {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("line {line}: {key} outside of a JOINT block")]
    OutsideJoint { line: usize, key: String },

    #[error("line {line}: joint index {found} is not in 0..6")]
    JointIndex { line: usize, found: f32 },

    #[error("line {line}: joint {index} is defined twice")]
    DuplicateJoint { line: usize, index: usize },

    #[error("line {line}: {key} is not allowed on the base")]
    NotOnBase { line: usize, key: String },

    #[error("line {line}: both axes are {axis}")]
    RepeatedAxis { line: usize, axis: Axis },

    #[error("Joint {0} is not defined")]
    MissingJoint(usize),

    #[error("Joint {0} has no AXES")]
    MissingAxes(usize),
}

#[derive(Clone, Debug, PartialEq)]
pub struct JointDefinition {
    /// Geometry file, relative to the definition file.
    pub geometry: PathBuf,
    /// Joint pivot in the geometry file's frame, in meters.
    pub pivot: Vec3,
    /// Rest rotation in radians.
    pub rotation: Vec3,
    pub axes: Option<JointAxes>,
    /// Translation from the previous joint's pivot. Always zero for the base.
    pub offset: Vec3,
}

impl JointDefinition {
    fn new(geometry: impl Into<PathBuf>) -> Self {
        Self {
            geometry: geometry.into(),
            pivot: Vec3::ZERO,
            rotation: Vec3::ZERO,
            axes: None,
            offset: Vec3::ZERO,
        }
    }
}

/// Everything needed to load and assemble an arm.
#[derive(Clone, Debug, PartialEq)]
pub struct ArmDefinition {
    /// Applied once to every geometry when it is loaded.
    pub geometry_scale: f32,
    /// Units of the angles arriving over telemetry.
    pub angle_units: AngleUnits,
    pub joints: [JointDefinition; JOINT_COUNT],
}

const DEFAULT_OFFSETS: [Vec3; OFFSET_COUNT] = [
    Vec3::new(0.0, -0.282, 0.0),
    Vec3::new(-0.312, -0.670, 0.117),
    Vec3::new(-0.26869, -1.74413, 0.19685),
    Vec3::new(-1.31519, -1.96913, 0.15),
    Vec3::new(-1.54869, -1.96913, 0.8715),
];

impl Default for ArmDefinition {
    fn default() -> Self {
        let joints = std::array::from_fn(|index| {
            let mut joint = JointDefinition::new(if index == 0 {
                "base.stl".to_string()
            } else {
                format!("joint{index}.stl")
            });
            joint.axes = DEFAULT_JOINT_SETUPS[index].axes;
            if index > 0 {
                joint.offset = DEFAULT_OFFSETS[index - 1];
            }
            joint
        });

        Self {
            geometry_scale: 0.001,
            angle_units: AngleUnits::Degrees,
            joints,
        }
    }
}

impl ArmDefinition {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DefinitionError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| DefinitionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, DefinitionError> {
        let mut definition = Self::default();
        let mut joints: [Option<JointDefinition>; JOINT_COUNT] = Default::default();
        let mut current: Option<(usize, JointDefinition)> = None;

        for line in ConfigLines::parse(text).iter() {
            match line.key.as_str() {
                "GEOMETRY_SCALE" => definition.geometry_scale = line.number(0)?,
                "ANGLE_UNITS" => definition.angle_units = line.parse(0)?,

                "JOINT" => {
                    let index = joint_index(line)?;
                    if let Some((previous, joint)) = current.take() {
                        joints[previous] = Some(joint);
                    }
                    if joints[index].is_some() {
                        return Err(DefinitionError::DuplicateJoint {
                            line: line.line,
                            index,
                        });
                    }
                    // Geometry falls back to the default file name for the joint.
                    let geometry = definition.joints[index].geometry.clone();
                    current = Some((index, JointDefinition::new(geometry)));
                }

                key @ ("GEOMETRY" | "PIVOT" | "ROTATION" | "AXES" | "OFFSET") => {
                    let Some((index, joint)) = current.as_mut() else {
                        return Err(DefinitionError::OutsideJoint {
                            line: line.line,
                            key: key.to_string(),
                        });
                    };
                    apply_joint_line(*index, joint, line)?;
                }

                key => tracing::warn!("Ignoring unknown arm definition key {key} on line {}", line.line),
            }
        }

        if let Some((index, joint)) = current.take() {
            joints[index] = Some(joint);
        }

        for (index, joint) in joints.into_iter().enumerate() {
            let joint = joint.ok_or(DefinitionError::MissingJoint(index))?;
            if index > 0 && joint.axes.is_none() {
                return Err(DefinitionError::MissingAxes(index));
            }
            definition.joints[index] = joint;
        }

        Ok(definition)
    }

    pub fn offsets(&self) -> [Vec3; OFFSET_COUNT] {
        std::array::from_fn(|i| self.joints[i + 1].offset)
    }

    pub fn setups(&self) -> [JointSetup; JOINT_COUNT] {
        std::array::from_fn(|i| JointSetup {
            axes: self.joints[i].axes,
            rotation: self.joints[i].rotation,
        })
    }

    /// Requests in load order, base first.
    pub fn geometry_requests(&self) -> Vec<GeometryRequest> {
        self.joints
            .iter()
            .map(|joint| GeometryRequest {
                path: joint.geometry.clone(),
                pivot: joint.pivot,
            })
            .collect()
    }

    pub fn build_tree(
        &self,
        geometries: Vec<GeometryResource>,
    ) -> Result<KinematicTree, StructuralError> {
        KinematicTree::build_with(&self.offsets(), geometries, &self.setups())
    }
}

fn joint_index(line: &ConfigLine) -> Result<usize, DefinitionError> {
    let found = line.number(0)?;
    if found.fract() != 0.0 || found < 0.0 || found >= JOINT_COUNT as f32 {
        return Err(DefinitionError::JointIndex {
            line: line.line,
            found,
        });
    }
    Ok(found as usize)
}

fn apply_joint_line(
    index: usize,
    joint: &mut JointDefinition,
    line: &ConfigLine,
) -> Result<(), DefinitionError> {
    let not_on_base = || DefinitionError::NotOnBase {
        line: line.line,
        key: line.key.clone(),
    };

    match line.key.as_str() {
        "GEOMETRY" => joint.geometry = PathBuf::from(line.string(0)?),
        "PIVOT" => joint.pivot = line.vec3(0)?,
        "ROTATION" => {
            let degrees = line.vec3(0)?;
            joint.rotation = Vec3::new(
                degrees.x.to_radians(),
                degrees.y.to_radians(),
                degrees.z.to_radians(),
            );
        }
        "AXES" => {
            if index == 0 {
                return Err(not_on_base());
            }
            let primary: Axis = line.parse(0)?;
            joint.axes = Some(match line.maybe_parse::<Axis>(1)? {
                None => JointAxes::single(primary),
                Some(secondary) => JointAxes::pair(primary, secondary).ok_or(
                    DefinitionError::RepeatedAxis {
                        line: line.line,
                        axis: primary,
                    },
                )?,
            });
        }
        "OFFSET" => {
            if index == 0 {
                return Err(not_on_base());
            }
            joint.offset = line.vec3(0)?;
        }
        _ => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFINITION: &str = r#"
; A small desk arm, units in millimeters.
GEOMETRY_SCALE 0.001
ANGLE_UNITS radians

JOINT 0
GEOMETRY "base.stl"
ROTATION -90 0 0

JOINT 1
GEOMETRY "parts/waist.stl"
PIVOT 0 0.1 0
AXES y
OFFSET 0 0.1 0

JOINT 2
GEOMETRY shoulder.stl
AXES Z
OFFSET 0 0.05 0

JOINT 3
GEOMETRY elbow.stl
AXES Z
OFFSET 0.2 0 0

JOINT 4
GEOMETRY wrist.stl
AXES X Z
OFFSET 0.2 0 0

JOINT 5
GEOMETRY hand.stl
AXES Z
OFFSET 0.05 0 0
"#;

    #[test]
    fn parses_a_full_definition() {
        let definition = ArmDefinition::parse(DEFINITION).unwrap();

        assert_eq!(definition.geometry_scale, 0.001);
        assert_eq!(definition.angle_units, AngleUnits::Radians);
        assert_eq!(definition.joints[1].geometry, PathBuf::from("parts/waist.stl"));
        assert_eq!(definition.joints[1].pivot, Vec3::new(0.0, 0.1, 0.0));
        assert_eq!(
            definition.joints[0].rotation.x,
            (-90.0_f32).to_radians()
        );
        assert_eq!(
            definition.joints[4].axes,
            JointAxes::pair(Axis::X, Axis::Z)
        );
        assert_eq!(definition.offsets()[2], Vec3::new(0.2, 0.0, 0.0));
        assert_eq!(definition.geometry_requests().len(), JOINT_COUNT);
    }

    #[test]
    fn default_definition_matches_default_setups() {
        let definition = ArmDefinition::default();
        assert_eq!(definition.setups(), DEFAULT_JOINT_SETUPS);
        assert_eq!(definition.offsets(), DEFAULT_OFFSETS);
        assert_eq!(definition.joints[0].geometry, PathBuf::from("base.stl"));
        assert_eq!(definition.joints[5].geometry, PathBuf::from("joint5.stl"));
    }

    #[test]
    fn missing_joint_is_an_error() {
        let text = DEFINITION.replace("JOINT 3", "JOINT 2");
        // Joint 2 now appears twice.
        assert!(matches!(
            ArmDefinition::parse(&text),
            Err(DefinitionError::DuplicateJoint { index: 2, .. })
        ));

        let text = DEFINITION.split("JOINT 5").next().unwrap();
        assert!(matches!(
            ArmDefinition::parse(text),
            Err(DefinitionError::MissingJoint(5))
        ));
    }

    #[test]
    fn base_can_not_have_axes_or_offset() {
        let text = DEFINITION.replace("ROTATION -90 0 0", "AXES Y");
        assert!(matches!(
            ArmDefinition::parse(&text),
            Err(DefinitionError::NotOnBase { .. })
        ));
    }

    #[test]
    fn joint_keys_need_a_joint_block() {
        assert!(matches!(
            ArmDefinition::parse("OFFSET 0 0 0\n"),
            Err(DefinitionError::OutsideJoint { line: 1, .. })
        ));
    }

    #[test]
    fn bad_values_are_reported() {
        assert!(matches!(
            ArmDefinition::parse("JOINT 7\n"),
            Err(DefinitionError::JointIndex { .. })
        ));
        assert!(matches!(
            ArmDefinition::parse("JOINT 1\nAXES W\n"),
            Err(DefinitionError::Config(ConfigError::InvalidValue { .. }))
        ));
        assert!(matches!(
            ArmDefinition::parse("JOINT 1\nAXES Y Y\n"),
            Err(DefinitionError::RepeatedAxis { axis: Axis::Y, .. })
        ));
    }
}
