//! Draws the arm with wgpu from the world transforms handed over each tick.

mod camera;

pub use camera::*;

use glam::{Mat4, Vec4};
use tracing::info;
use wgpu::vertex_attr_array;

use crate::{
    arm::prelude::*,
    engine::{
        depth_buffer::DepthBuffer,
        gizmos::{GizmoVertex, GizmosRenderer},
        renderer::{BufferLayout, Renderer},
        uniform_buffer::UniformBuffer,
    },
};

/// Length of the axis lines drawn at every joint, in meters.
const AXIS_GIZMO_SIZE: f32 = 0.15;

const LINK_COLOR: Vec4 = Vec4::new(1.0, 1.0, 0.0, 1.0);

const CLEAR_COLOR: wgpu::Color = wgpu::Color {
    r: 0.08,
    g: 0.08,
    b: 0.1,
    a: 1.0,
};

const JOINT_COLORS: [Vec4; JOINT_COUNT] = [
    Vec4::new(0.35, 0.35, 0.38, 1.0),
    Vec4::new(0.90, 0.45, 0.10, 1.0),
    Vec4::new(0.85, 0.85, 0.85, 1.0),
    Vec4::new(0.90, 0.45, 0.10, 1.0),
    Vec4::new(0.85, 0.85, 0.85, 1.0),
    Vec4::new(0.20, 0.55, 0.90, 1.0),
];

impl BufferLayout for Vertex {
    fn vertex_buffers() -> &'static [wgpu::VertexBufferLayout<'static>] {
        const VERTEX_ATTR_ARRAY: &[wgpu::VertexAttribute] = &vertex_attr_array![
            0 => Float32x3, // position
            1 => Float32x3, // normal
        ];

        &[wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: VERTEX_ATTR_ARRAY,
        }]
    }
}

#[derive(Clone, Copy, bytemuck::NoUninit)]
#[repr(C)]
struct Instance {
    model: Mat4,
    color: Vec4,
}

impl BufferLayout for Instance {
    fn vertex_buffers() -> &'static [wgpu::VertexBufferLayout<'static>] {
        const INSTANCE_ATTR_ARRAY: &[wgpu::VertexAttribute] = &vertex_attr_array![
            2 => Float32x4, // model_0
            3 => Float32x4, // model_1
            4 => Float32x4, // model_2
            5 => Float32x4, // model_3
            6 => Float32x4, // color
        ];

        &[wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Instance>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: INSTANCE_ATTR_ARRAY,
        }]
    }
}

struct JointMesh {
    vertex_buffer: wgpu::Buffer,
    vertex_count: u32,
}

pub struct ArmRenderer {
    renderer: Renderer,
    depth_buffer: DepthBuffer,

    camera: Camera,
    camera_uniform: UniformBuffer<Matrices>,

    pipeline: wgpu::RenderPipeline,
    gizmos: GizmosRenderer,

    /// One instance per joint, rewritten every frame.
    instances: wgpu::Buffer,
    /// Uploaded once the arm is loaded, indexed like the joints.
    meshes: Vec<JointMesh>,

    pub show_gizmos: bool,
}

impl ArmRenderer {
    pub fn new(renderer: Renderer) -> Self {
        let size = renderer.surface.size();

        let depth_buffer = DepthBuffer::new(&renderer.device, size);

        let mut camera = Camera::default();
        camera.resize(size.x, size.y);

        let mut camera_uniform =
            UniformBuffer::new(&renderer, "camera", wgpu::ShaderStages::VERTEX_FRAGMENT);
        camera_uniform.upload(&renderer.queue, |matrices| {
            *matrices = camera.create_matrices();
        });

        let shader = renderer.create_shader_module("mesh", include_str!("mesh.wgsl"));
        let pipeline = renderer
            .build_render_pipeline::<Vertex>("mesh", &shader)
            .with_instances::<Instance>()
            .binding(&camera_uniform.bind_group_layout)
            .with_depth_compare(wgpu::CompareFunction::Less)
            .build();

        let gizmos = GizmosRenderer::new(&renderer, &camera_uniform.bind_group_layout);

        let instances = renderer.create_dynamic_vertex_buffer(
            "joint_instances",
            &build_instances(&[Mat4::IDENTITY; JOINT_COUNT]),
        );

        Self {
            renderer,
            depth_buffer,
            camera,
            camera_uniform,
            pipeline,
            gizmos,
            instances,
            meshes: Vec::new(),
            show_gizmos: true,
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.renderer.resize(width, height);
        self.depth_buffer
            .resize(&self.renderer.device, self.renderer.surface.size());

        self.camera.resize(width, height);
        let matrices = self.camera.create_matrices();
        self.camera_uniform
            .upload(&self.renderer.queue, |m| *m = matrices);
    }

    /// Upload the geometry of every joint. Called once the tree is built.
    pub fn set_arm(&mut self, tree: &KinematicTree) {
        self.meshes = tree
            .joints()
            .map(|joint| {
                let label = format!("joint_{}_vertices", joint.index);
                JointMesh {
                    vertex_buffer: self
                        .renderer
                        .create_vertex_buffer(&label, &joint.geometry.vertices),
                    vertex_count: joint.geometry.vertices.len() as u32,
                }
            })
            .collect();

        info!(
            "Uploaded {} triangles for {} joints",
            self.meshes.iter().map(|m| m.vertex_count / 3).sum::<u32>(),
            self.meshes.len()
        );
    }

    /// Clear the screen while there is no arm to draw.
    pub fn draw_idle(&mut self) {
        self.render(None);
    }

    fn render(&mut self, world: Option<&[Mat4; JOINT_COUNT]>) {
        let Some(mut frame) = self.renderer.begin_frame("arm_command_encoder") else {
            return;
        };

        {
            let mut render_pass = frame
                .encoder
                .begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("arm_render_pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &frame.surface,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(CLEAR_COLOR),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: Some(self.depth_buffer.clear_attachment()),
                    ..Default::default()
                });

            if world.is_some() {
                render_pass.set_pipeline(&self.pipeline);
                render_pass.set_bind_group(0, &self.camera_uniform.bind_group, &[]);
                render_pass.set_vertex_buffer(1, self.instances.slice(..));

                for (index, mesh) in self.meshes.iter().enumerate() {
                    let instance = index as u32;
                    render_pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
                    render_pass.draw(0..mesh.vertex_count, instance..instance + 1);
                }
            }
        }

        if let Some(world) = world.filter(|_| self.show_gizmos) {
            self.gizmos.render_frame(
                &self.renderer,
                &mut frame,
                &self.camera_uniform.bind_group,
                &pose_gizmos(world),
            );
        }

        self.renderer.finish_frame(frame);
    }
}

impl PoseRenderer for ArmRenderer {
    fn draw(&mut self, world: &[Mat4; JOINT_COUNT], changed: bool) {
        // Written even if the frame is skipped, the instances stay current.
        if changed {
            self.renderer.queue.write_buffer(
                &self.instances,
                0,
                bytemuck::cast_slice(&build_instances(world)),
            );
        }

        self.render(Some(world));
    }
}

fn build_instances(world: &[Mat4; JOINT_COUNT]) -> [Instance; JOINT_COUNT] {
    std::array::from_fn(|i| Instance {
        model: world[i],
        color: JOINT_COLORS[i],
    })
}

/// Axis lines at every joint and a line along each link.
fn pose_gizmos(world: &[Mat4; JOINT_COUNT]) -> Vec<GizmoVertex> {
    let mut vertices = world
        .iter()
        .flat_map(|&transform| GizmosRenderer::create_axis(transform, AXIS_GIZMO_SIZE))
        .collect::<Vec<_>>();

    vertices.extend(world.windows(2).flat_map(|pair| {
        GizmosRenderer::create_line(
            pair[0].w_axis.truncate(),
            pair[1].w_axis.truncate(),
            LINK_COLOR,
        )
    }));

    vertices
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;

    #[test]
    fn gizmos_connect_consecutive_joints() {
        let world = std::array::from_fn(|i| Mat4::from_translation(Vec3::X * i as f32));
        let vertices = pose_gizmos(&world);

        // 3 axis lines per joint, one line per link.
        assert_eq!(vertices.len(), JOINT_COUNT * 6 + OFFSET_COUNT * 2);

        let links = &vertices[JOINT_COUNT * 6..];
        assert_eq!(links[0].position(), Vec3::ZERO);
        assert_eq!(links[1].position(), Vec3::X);
        assert_eq!(links[9].position(), Vec3::X * 5.0);
    }

    #[test]
    fn instances_keep_joint_order() {
        let world = std::array::from_fn(|i| Mat4::from_translation(Vec3::Y * i as f32));
        let instances = build_instances(&world);

        assert_eq!(instances[3].model, world[3]);
        assert_eq!(instances[5].color, JOINT_COLORS[5]);
    }
}
