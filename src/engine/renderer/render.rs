use std::{ops::Deref, sync::Arc};

use glam::UVec2;
use tracing::{error, warn};
use wgpu::util::DeviceExt;

use crate::engine::depth_buffer::DepthBuffer;

use super::{RenderError, surface::Surface};

#[derive(Clone)]
pub struct RenderDevice(Arc<wgpu::Device>);

impl From<wgpu::Device> for RenderDevice {
    fn from(value: wgpu::Device) -> Self {
        Self(Arc::new(value))
    }
}

impl Deref for RenderDevice {
    type Target = wgpu::Device;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

#[derive(Clone)]
pub struct RenderQueue(Arc<wgpu::Queue>);

impl From<wgpu::Queue> for RenderQueue {
    fn from(value: wgpu::Queue) -> Self {
        Self(Arc::new(value))
    }
}

impl Deref for RenderQueue {
    type Target = wgpu::Queue;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

pub struct Renderer {
    pub device: RenderDevice,
    pub queue: RenderQueue,

    pub surface: Surface,
}

/// Vertex buffer layouts a pipeline expects, in slot order.
pub trait BufferLayout {
    fn vertex_buffers() -> &'static [wgpu::VertexBufferLayout<'static>];
}

impl Renderer {
    pub fn new(window: Arc<winit::window::Window>) -> Result<Self, RenderError> {
        let winit::dpi::PhysicalSize { width, height } = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let surface = instance.create_surface(window)?;

        let adapter =
            pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptionsBase {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: Some(&surface),
            }))
            .ok_or(RenderError::NoAdapter)?;

        let surface_caps = surface.get_capabilities(&adapter);

        // Find a sRGB surface format or use the first.
        let format = surface_caps
            .formats
            .iter()
            .find(|cap| cap.is_srgb())
            .or(surface_caps.formats.first())
            .copied()
            .ok_or(RenderError::UnsupportedSurface)?;

        let mut surface_config = surface
            .get_default_config(&adapter, width.max(1), height.max(1))
            .ok_or(RenderError::UnsupportedSurface)?;
        surface_config.format = format;
        surface_config.present_mode = wgpu::PresentMode::AutoVsync;

        let surface = Surface::new(surface, surface_config);

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("arm_viewer"),
                ..Default::default()
            },
            None,
        ))?;

        surface.configure(&device);

        Ok(Self {
            device: device.into(),
            queue: queue.into(),
            surface,
        })
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        let size = UVec2::new(width, height);
        self.surface.resize(&self.device, size);
    }

    pub fn create_vertex_buffer<B>(&self, label: &str, buffer: &[B]) -> wgpu::Buffer
    where
        B: bytemuck::NoUninit,
    {
        self.device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::cast_slice(buffer),
                usage: wgpu::BufferUsages::VERTEX,
            })
    }

    /// A vertex buffer that is rewritten with [wgpu::Queue::write_buffer].
    pub fn create_dynamic_vertex_buffer<B>(&self, label: &str, buffer: &[B]) -> wgpu::Buffer
    where
        B: bytemuck::NoUninit,
    {
        self.device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::cast_slice(buffer),
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            })
    }

    pub fn create_shader_module(&self, label: &str, source: &str) -> wgpu::ShaderModule {
        let shader_module_label = format!("{label}_shader_module");
        self.device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&shader_module_label),
                source: wgpu::ShaderSource::Wgsl(std::borrow::Cow::Borrowed(source)),
            })
    }

    #[must_use]
    pub fn build_render_pipeline<'a, B>(
        &'a self,
        label: &'a str,
        module: &'a wgpu::ShaderModule,
    ) -> RenderPipelineBuilder<'a>
    where
        B: BufferLayout,
    {
        RenderPipelineBuilder {
            renderer: self,
            label,
            bindings: vec![],
            buffers: B::vertex_buffers().to_vec(),
            module,
            primitive_state: None,
            depth_compare: None,
        }
    }

    /// Acquire the next surface texture. Returns `None` if this frame has to be skipped; a lost
    /// or outdated surface is reconfigured for the next one.
    pub fn begin_frame(&self, label: &str) -> Option<Frame> {
        let output = match self.surface.get_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                warn!("Surface lost or outdated, reconfiguring.");
                self.surface.configure(&self.device);
                return None;
            }
            Err(wgpu::SurfaceError::Timeout) => return None,
            Err(err) => {
                error!("Could not get the next surface texture: {err}");
                return None;
            }
        };

        let surface = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });

        Some(Frame {
            encoder,
            surface,
            output,
        })
    }

    pub fn finish_frame(&self, frame: Frame) {
        self.queue.submit(std::iter::once(frame.encoder.finish()));
        frame.output.present();
    }
}

/// A single object passed around during the rendering of a single frame.
pub struct Frame {
    /// The encoder to use for creating render passes.
    pub encoder: wgpu::CommandEncoder,

    /// The window surface.
    pub surface: wgpu::TextureView,

    output: wgpu::SurfaceTexture,
}

pub struct RenderPipelineBuilder<'a> {
    renderer: &'a Renderer,

    label: &'a str,

    bindings: Vec<&'a wgpu::BindGroupLayout>,

    buffers: Vec<wgpu::VertexBufferLayout<'static>>,

    module: &'a wgpu::ShaderModule,

    /// A specific primitive state, otherwise use the default.
    primitive_state: Option<wgpu::PrimitiveState>,

    /// Use depth testing in the pipeline.
    depth_compare: Option<wgpu::CompareFunction>,
}

impl<'a> RenderPipelineBuilder<'a> {
    pub fn with_primitive(mut self, primitive_state: wgpu::PrimitiveState) -> Self {
        self.primitive_state = Some(primitive_state);
        self
    }

    pub fn with_depth_compare(mut self, compare: wgpu::CompareFunction) -> Self {
        self.depth_compare = Some(compare);
        self
    }

    /// Append the buffers of `I` after the ones already in the layout, e.g. per instance data.
    pub fn with_instances<I: BufferLayout>(mut self) -> Self {
        self.buffers.extend_from_slice(I::vertex_buffers());
        self
    }

    pub fn binding(mut self, layout: &'a wgpu::BindGroupLayout) -> Self {
        self.bindings.push(layout);
        self
    }

    pub fn build(self) -> wgpu::RenderPipeline {
        let layout = self
            .renderer
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(self.label),
                bind_group_layouts: &self.bindings,
                push_constant_ranges: &[],
            });

        self.renderer
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(self.label),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: self.module,
                    entry_point: None,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    buffers: &self.buffers,
                },
                primitive: self.primitive_state.unwrap_or_default(),
                depth_stencil: self
                    .depth_compare
                    .map(|compare| DepthBuffer::depth_stencil_state(compare, true)),
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: self.module,
                    entry_point: None,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: self.renderer.surface.format(),
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                multiview: None,
                cache: None,
            })
    }
}
