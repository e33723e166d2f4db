use wgpu::util::DeviceExt;

use super::renderer::Renderer;

/// A single uniform value with its own bind group at binding 0.
pub struct UniformBuffer<B: bytemuck::NoUninit + Default> {
    buffer: wgpu::Buffer,
    pub bind_group_layout: wgpu::BindGroupLayout,
    pub bind_group: wgpu::BindGroup,

    data: B,
}

impl<B: bytemuck::NoUninit + Default> UniformBuffer<B> {
    pub fn new(renderer: &Renderer, label: &str, visibility: wgpu::ShaderStages) -> Self {
        let data = B::default();

        let buffer = renderer
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::bytes_of(&data),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            });

        let bind_group_layout =
            renderer
                .device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(label),
                    entries: &[wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: wgpu::BufferSize::new(
                                std::mem::size_of::<B>() as u64
                            ),
                        },
                        count: None,
                    }],
                });

        let bind_group = renderer
            .device
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: &bind_group_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                }],
            });

        Self {
            buffer,
            bind_group_layout,
            bind_group,
            data,
        }
    }

    pub fn upload(&mut self, queue: &wgpu::Queue, f: impl FnOnce(&mut B)) {
        f(&mut self.data);
        queue.write_buffer(&self.buffer, 0, bytemuck::bytes_of(&self.data));
    }
}
