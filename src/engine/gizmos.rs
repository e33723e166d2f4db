use glam::{Mat4, Vec3, Vec4};
use wgpu::vertex_attr_array;

use super::renderer::{BufferLayout, Frame, Renderer};

#[derive(Clone, Copy, Debug, PartialEq, bytemuck::NoUninit)]
#[repr(C)]
pub struct GizmoVertex {
    position: Vec3,
    _padding: f32,
    color: Vec4,
}

impl GizmoVertex {
    pub fn new(position: Vec3, color: Vec4) -> Self {
        Self {
            position,
            _padding: 1.0,
            color,
        }
    }

    #[inline]
    pub fn position(&self) -> Vec3 {
        self.position
    }
}

impl BufferLayout for GizmoVertex {
    fn vertex_buffers() -> &'static [wgpu::VertexBufferLayout<'static>] {
        const VERTEX_ATTR_ARRAY: &[wgpu::VertexAttribute] = &vertex_attr_array![
            0 => Float32x4, // position
            1 => Float32x4, // color
        ];

        &[wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<GizmoVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: VERTEX_ATTR_ARRAY,
        }]
    }
}

/// Draws line lists on top of whatever is already in the frame.
pub struct GizmosRenderer {
    pipeline: wgpu::RenderPipeline,
}

impl GizmosRenderer {
    pub fn new(renderer: &Renderer, camera_bind_group_layout: &wgpu::BindGroupLayout) -> Self {
        let shader = renderer.create_shader_module("gizmos", include_str!("gizmos.wgsl"));

        let pipeline = renderer
            .build_render_pipeline::<GizmoVertex>("gizmos", &shader)
            .binding(camera_bind_group_layout)
            .with_primitive(wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::LineList,
                ..Default::default()
            })
            .build();

        Self { pipeline }
    }

    pub fn render_frame(
        &self,
        renderer: &Renderer,
        frame: &mut Frame,
        camera_bind_group: &wgpu::BindGroup,
        vertices: &[GizmoVertex],
    ) {
        if vertices.is_empty() {
            return;
        }

        let vertex_buffer = renderer.create_vertex_buffer("gizmos_vertex_buffer", vertices);

        let mut render_pass = frame
            .encoder
            .begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("gizmos_render_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &frame.surface,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                ..Default::default()
            });

        render_pass.set_pipeline(&self.pipeline);
        render_pass.set_vertex_buffer(0, vertex_buffer.slice(..));
        render_pass.set_bind_group(0, camera_bind_group, &[]);
        render_pass.draw(0..(vertices.len() as u32), 0..1);
    }

    /// Red, green and blue lines along the X, Y and Z axes of `transform`.
    pub fn create_axis(transform: Mat4, size: f32) -> Vec<GizmoVertex> {
        let zero = transform.transform_point3(Vec3::ZERO);
        [
            (Vec3::X, Vec4::new(1.0, 0.0, 0.0, 1.0)),
            (Vec3::Y, Vec4::new(0.0, 1.0, 0.0, 1.0)),
            (Vec3::Z, Vec4::new(0.0, 0.0, 1.0, 1.0)),
        ]
        .into_iter()
        .flat_map(|(axis, color)| {
            [
                GizmoVertex::new(zero, color),
                GizmoVertex::new(transform.transform_point3(axis * size), color),
            ]
        })
        .collect()
    }

    pub fn create_line(from: Vec3, to: Vec3, color: Vec4) -> [GizmoVertex; 2] {
        [GizmoVertex::new(from, color), GizmoVertex::new(to, color)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_follows_the_transform() {
        let transform = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0))
            * Mat4::from_rotation_z(std::f32::consts::FRAC_PI_2);
        let vertices = GizmosRenderer::create_axis(transform, 0.5);

        assert_eq!(vertices.len(), 6);
        assert_eq!(vertices[0].position(), Vec3::new(1.0, 2.0, 3.0));
        // X rotated a quarter turn around Z points along Y.
        assert!(
            vertices[1]
                .position()
                .abs_diff_eq(Vec3::new(1.0, 2.5, 3.0), 1e-6)
        );
    }
}
