use glam::{Mat4, Vec3};

/// A fixed camera looking at a point.
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub fov: f32,
    aspect: f32,
    near: f32,
    far: f32,
}

#[derive(Clone, Copy, Default, bytemuck::NoUninit)]
#[repr(C)]
pub struct Matrices {
    pub projection: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub position: [f32; 4],
}

impl Camera {
    pub fn new(position: Vec3, target: Vec3) -> Self {
        Self {
            position,
            target,
            fov: 45.0_f32.to_radians(),
            aspect: 1.0,
            near: 0.1,
            far: 1000.0,
        }
    }

    /// Adjust the aspect ratio of the camera view plane.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.aspect = width.max(1) as f32 / height.max(1) as f32;
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection() * self.view()
    }

    fn projection(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov, self.aspect, self.near, self.far)
    }

    fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, Vec3::Y)
    }

    pub fn create_matrices(&self) -> Matrices {
        Matrices {
            projection: self.projection().to_cols_array_2d(),
            view: self.view().to_cols_array_2d(),
            position: self.position.extend(1.0).to_array(),
        }
    }
}

impl Default for Camera {
    /// Five meters out along every axis, looking at the base.
    fn default() -> Self {
        Self::new(Vec3::splat(5.0), Vec3::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_is_in_the_center_of_the_view() {
        let mut camera = Camera::default();
        camera.resize(1280, 800);

        let ndc = camera.view_projection().project_point3(Vec3::ZERO);
        assert!(ndc.truncate().abs_diff_eq(glam::Vec2::ZERO, 1e-6));
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
    }

    #[test]
    fn zero_height_does_not_break_the_aspect() {
        let mut camera = Camera::default();
        camera.resize(800, 0);
        assert!(camera.view_projection().is_finite());
    }
}
