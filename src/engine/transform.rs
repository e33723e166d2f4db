use glam::{EulerRot, Mat4, Quat, Vec3};

/// A translation and rotation that can be converted into a 4x4 matrix.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
}

impl Transform {
    pub const IDENTITY: Self = Self {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    /// Create a new transform from a translation.
    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            rotation: Quat::IDENTITY,
        }
    }

    /// Create a new transform from euler angles (radians, XYZ order) as a rotation.
    pub fn from_euler_rotation(rotation: Vec3) -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: euler_to_quat(rotation),
        }
    }

    pub fn to_mat4(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation, self.translation)
    }
}

pub fn euler_to_quat(rotation: Vec3) -> Quat {
    Quat::from_euler(EulerRot::XYZ, rotation.x, rotation.y, rotation.z)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic() {
        let transform = Transform::default().to_mat4();
        assert_eq!(transform, Mat4::IDENTITY);

        let transform = Transform::from_translation(Vec3::new(10.0, 8.0, 6.0)).to_mat4();
        let transform = transform * Transform::IDENTITY.to_mat4();

        assert_eq!(transform, Mat4::from_translation(Vec3::new(10.0, 8.0, 6.0)));
    }

    #[test]
    fn single_axis_euler_matches_axis_rotation() {
        let angle = 30.0_f32.to_radians();
        let transform = Transform::from_euler_rotation(Vec3::new(0.0, angle, 0.0)).to_mat4();

        assert!(transform.abs_diff_eq(Mat4::from_rotation_y(angle), 1e-6));
    }
}
