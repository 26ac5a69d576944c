//! Window surface that compiles programs into wgpu render pipelines.

use crate::backend::WgpuBackend;
use crate::surface::{DisplaySurface, ProgramInputs};
use crate::{RenderError, Result};
use parking_lot::Mutex;
use sonoshade_core::program;
use std::sync::Arc;
use tracing::{debug, info, warn};
use winit::window::Window;

/// A compiled program: one render pipeline drawing a fullscreen triangle
pub struct WgpuProgram {
    pipeline: wgpu::RenderPipeline,
}

/// Presents programs into a winit window
pub struct WgpuSurface {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    surface: wgpu::Surface<'static>,
    config: Mutex<wgpu::SurfaceConfiguration>,
    uniform_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    pipeline_layout: wgpu::PipelineLayout,
    // Keep the window alive as long as the surface
    _window: Arc<Window>,
}

impl WgpuSurface {
    /// Create and configure a surface for `window`
    pub fn new(backend: &WgpuBackend, window: Arc<Window>) -> Result<Self> {
        let surface = backend.create_surface(window.clone())?;
        let size = window.inner_size();

        let caps = surface.get_capabilities(&backend.adapter);
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .ok_or_else(|| RenderError::SurfaceError("surface reports no formats".to_string()))?;

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Opaque),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&backend.device, &config);

        let device = backend.device.clone();

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Program Inputs Buffer"),
            size: std::mem::size_of::<ProgramInputs>() as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Program Inputs Bind Group Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Program Inputs Bind Group"),
            layout: &bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Program Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        info!(
            "Surface configured: {}x{} {:?}",
            config.width, config.height, config.format
        );

        Ok(Self {
            device,
            queue: backend.queue.clone(),
            surface,
            config: Mutex::new(config),
            uniform_buffer,
            bind_group,
            pipeline_layout,
            _window: window,
        })
    }

    fn build_pipeline(&self, module: &str, entry_point: &str) -> wgpu::RenderPipeline {
        let format = self.config.lock().format;
        let shader_module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("Program Shader"),
                source: wgpu::ShaderSource::Wgsl(module.into()),
            });

        self.device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("Program Pipeline"),
                layout: Some(&self.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader_module,
                    entry_point: Some("vs_main"),
                    buffers: &[],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader_module,
                    entry_point: Some(entry_point),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
    }

    fn reconfigure(&self) {
        let config = self.config.lock();
        self.surface.configure(&self.device, &config);
    }
}

impl DisplaySurface for WgpuSurface {
    type Program = WgpuProgram;

    fn compile(&self, module: &str) -> Result<WgpuProgram> {
        let entry_point = program::entry_point(module)
            .ok_or_else(|| RenderError::ShaderCompilation("no @fragment entry point".to_string()))?
            .to_string();

        // Validation errors surface through the error scope, not as panics
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self.build_pipeline(module, &entry_point);
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(RenderError::ShaderCompilation(err.to_string()));
        }

        debug!("Compiled program pipeline (entry point {})", entry_point);
        Ok(WgpuProgram { pipeline })
    }

    fn draw(&self, program: &WgpuProgram, inputs: &ProgramInputs) -> Result<()> {
        let frame = match self.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.reconfigure();
                return Err(RenderError::SurfaceError("surface lost, reconfigured".to_string()));
            }
            Err(wgpu::SurfaceError::OutOfMemory) => return Err(RenderError::DeviceLost),
            Err(e) => return Err(RenderError::SurfaceError(e.to_string())),
        };

        self.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(inputs));

        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Program Encoder"),
            });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Program Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            render_pass.set_pipeline(&program.pipeline);
            render_pass.set_bind_group(0, &self.bind_group, &[]);
            render_pass.draw(0..3, 0..1);
        }

        self.queue.submit(Some(encoder.finish()));
        frame.present();
        Ok(())
    }

    fn size(&self) -> (u32, u32) {
        let config = self.config.lock();
        (config.width, config.height)
    }

    fn resize(&self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            // Minimized; keep the last configuration
            return;
        }
        let mut config = self.config.lock();
        config.width = width;
        config.height = height;
        self.surface.configure(&self.device, &config);
        debug!("Surface resized to {}x{}", width, height);
    }

    fn release(&self) {
        self.uniform_buffer.destroy();
        if let Err(e) = self.device.poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        }) {
            warn!("Device poll failed while releasing surface: {}", e);
        }
        info!("Surface released");
    }
}
