//! wgpu backend: surface + device setup, WGSL programs, indexed draws.
//! wgpu = 26.x, winit = 0.30.x

use std::{collections::HashMap, num::NonZeroU64, sync::Arc};

use corelib::{CoreError, CoreResult, Mat4, ShaderStage};
use wgpu::{
    BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayoutDescriptor,
    BindGroupLayoutEntry, BindingType, BlendState, Buffer, BufferBindingType, BufferDescriptor,
    BufferUsages, ColorTargetState, ColorWrites, CommandEncoder, CommandEncoderDescriptor,
    CompositeAlphaMode, DepthBiasState, DepthStencilState, Device, DeviceDescriptor, ErrorFilter,
    Extent3d, Features, FragmentState, IndexFormat, Instance, InstanceDescriptor, Limits, LoadOp,
    Operations, PipelineLayoutDescriptor, PowerPreference, PresentMode, PrimitiveState,
    PrimitiveTopology, Queue, RenderPass, RenderPassColorAttachment,
    RenderPassDepthStencilAttachment, RenderPassDescriptor, RenderPipeline,
    RenderPipelineDescriptor, ShaderModule, ShaderModuleDescriptor, ShaderSource, ShaderStages,
    StoreOp, Surface, SurfaceConfiguration, SurfaceError, SurfaceTexture, TextureDescriptor,
    TextureDimension, TextureFormat, TextureUsages, TextureView, TextureViewDescriptor,
    VertexAttribute, VertexBufferLayout, VertexFormat, VertexState, VertexStepMode,
    util::DeviceExt,
};
use winit::{dpi::PhysicalSize, window::Window};

use crate::{
    backend::{
        AttributeState, BufferHandle, BufferKind, GraphicsBackend, ProgramHandle, ShaderHandle,
    },
    reflect::{self, AttributeFormat, ProgramLayout, ShaderReflection},
};

const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;

const CLEAR_COLOR: wgpu::Color = wgpu::Color {
    r: 0.05,
    g: 0.05,
    b: 0.08,
    a: 1.0,
};

struct CompiledShader {
    module: ShaderModule,
    reflection: ShaderReflection,
}

struct UniformSlot {
    buffer: Buffer,
    size: u32,
}

struct Program {
    layout: ProgramLayout,
    pipeline: RenderPipeline,
    bind_group: BindGroup,
    uniforms: Vec<UniformSlot>,
}

struct Frame {
    texture: SurfaceTexture,
    view: TextureView,
    cleared: bool,
}

pub struct WgpuBackend {
    // Surface
    surface: Surface<'static>,
    surface_config: SurfaceConfiguration,

    // Device/queue
    device: Device,
    queue: Queue,

    // Depth
    depth_view: TextureView,

    // Objects
    shaders: HashMap<ShaderHandle, CompiledShader>,
    programs: HashMap<ProgramHandle, Program>,
    buffers: HashMap<BufferHandle, (BufferKind, Buffer)>,
    next_handle: u64,

    // Draw state
    current_program: Option<ProgramHandle>,
    attributes: AttributeState,
    frame: Option<Frame>,
}

impl WgpuBackend {
    /// Create GPU state bound to an Arc<Window>.
    pub async fn new(window: Arc<Window>, backends: wgpu::Backends) -> CoreResult<Self> {
        let PhysicalSize { width, height } = window.inner_size();
        let width = width.max(1);
        let height = height.max(1);

        // Instance & surface
        let instance = Instance::new(&InstanceDescriptor {
            backends,
            ..Default::default()
        });
        let surface: Surface<'static> = instance
            .create_surface(window.clone())
            .map_err(|e| CoreError::Backend(format!("create_surface failed: {e}")))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| CoreError::Backend(format!("no suitable GPU adapter: {e}")))?;
        let info = adapter.get_info();
        log::info!("GPU adapter: {} ({:?})", info.name, info.backend);

        let (device, queue) = adapter
            .request_device(&DeviceDescriptor {
                label: Some("objview device"),
                required_features: Features::empty(),
                required_limits: Limits::downlevel_webgl2_defaults()
                    .using_resolution(adapter.limits()),
                memory_hints: Default::default(),
                trace: Default::default(),
            })
            .await
            .map_err(|e| CoreError::Backend(format!("request_device failed: {e}")))?;

        // Surface format (prefer sRGB)
        let caps = surface.get_capabilities(&adapter);
        let surface_format = caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .ok_or_else(|| CoreError::Backend("surface reports no formats".into()))?;

        let surface_config = SurfaceConfiguration {
            usage: TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width,
            height,
            // Frames are only produced on request, so vsync never idles the loop.
            present_mode: PresentMode::AutoVsync,
            alpha_mode: caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);

        let depth_view = create_depth_view(&device, &surface_config);

        Ok(Self {
            surface,
            surface_config,
            device,
            queue,
            depth_view,
            shaders: HashMap::new(),
            programs: HashMap::new(),
            buffers: HashMap::new(),
            next_handle: 0,
            current_program: None,
            attributes: AttributeState::default(),
            frame: None,
        })
    }

    pub fn recreate_surface(&mut self) {
        self.surface.configure(&self.device, &self.surface_config);
        self.depth_view = create_depth_view(&self.device, &self.surface_config);
    }

    fn next_id(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    /// Run `f` inside a validation error scope.
    fn scoped<T>(&self, f: impl FnOnce(&Device) -> T) -> Result<T, wgpu::Error> {
        self.device.push_error_scope(ErrorFilter::Validation);
        let value = f(&self.device);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(err),
            None => Ok(value),
        }
    }

    fn current(&self) -> CoreResult<&Program> {
        self.current_program
            .and_then(|p| self.programs.get(&p))
            .ok_or_else(|| CoreError::Draw("no program in use".into()))
    }
}

impl GraphicsBackend for WgpuBackend {
    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> CoreResult<ShaderHandle> {
        let reflection = reflect::reflect_shader(stage, source)?;
        let label = format!("{stage} shader");
        let module = self
            .scoped(|device| {
                device.create_shader_module(ShaderModuleDescriptor {
                    label: Some(label.as_str()),
                    source: ShaderSource::Wgsl(source.into()),
                })
            })
            .map_err(|err| CoreError::ShaderCompile {
                stage,
                log: err.to_string(),
            })?;

        let handle = ShaderHandle(self.next_id());
        self.shaders
            .insert(handle, CompiledShader { module, reflection });
        Ok(handle)
    }

    fn link_program(
        &mut self,
        vertex: ShaderHandle,
        fragment: ShaderHandle,
    ) -> CoreResult<ProgramHandle> {
        let lookup = |handle: ShaderHandle| {
            self.shaders
                .get(&handle)
                .ok_or_else(|| CoreError::ProgramLink(format!("unknown shader {handle:?}")))
        };
        let vs = lookup(vertex)?;
        let fs = lookup(fragment)?;
        let layout = reflect::link(&vs.reflection, &fs.reflection)?;
        if let Some(uniform) = layout.uniforms.iter().find(|u| u.group != 0) {
            return Err(CoreError::ProgramLink(format!(
                "uniform `{}` uses @group({}); only group 0 is supported",
                uniform.name, uniform.group
            )));
        }

        let target_format = self.surface_config.format;
        let program = self
            .scoped(|device| {
                let entries: Vec<BindGroupLayoutEntry> = layout
                    .uniforms
                    .iter()
                    .map(|u| BindGroupLayoutEntry {
                        binding: u.binding,
                        visibility: ShaderStages::VERTEX_FRAGMENT,
                        ty: BindingType::Buffer {
                            ty: BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: NonZeroU64::new(u64::from(u.size)),
                        },
                        count: None,
                    })
                    .collect();
                let bind_group_layout =
                    device.create_bind_group_layout(&BindGroupLayoutDescriptor {
                        label: Some("Mesh BGL"),
                        entries: &entries,
                    });

                let uniforms: Vec<UniformSlot> = layout
                    .uniforms
                    .iter()
                    .map(|u| UniformSlot {
                        buffer: device.create_buffer(&BufferDescriptor {
                            label: Some(u.name.as_str()),
                            size: u64::from(u.size),
                            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
                            mapped_at_creation: false,
                        }),
                        size: u.size,
                    })
                    .collect();
                let bind_entries: Vec<BindGroupEntry> = layout
                    .uniforms
                    .iter()
                    .zip(&uniforms)
                    .map(|(u, slot)| BindGroupEntry {
                        binding: u.binding,
                        resource: slot.buffer.as_entire_binding(),
                    })
                    .collect();
                let bind_group = device.create_bind_group(&BindGroupDescriptor {
                    label: Some("Mesh BG"),
                    layout: &bind_group_layout,
                    entries: &bind_entries,
                });

                let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
                    label: Some("Mesh PipelineLayout"),
                    bind_group_layouts: &[&bind_group_layout],
                    push_constant_ranges: &[],
                });

                // One buffer slot per attribute, in declaration order.
                let attributes: Vec<[VertexAttribute; 1]> = layout
                    .attributes
                    .iter()
                    .map(|a| {
                        [VertexAttribute {
                            format: vertex_format(a.format),
                            offset: 0,
                            shader_location: a.location,
                        }]
                    })
                    .collect();
                let buffers: Vec<VertexBufferLayout> = attributes
                    .iter()
                    .map(|attr| VertexBufferLayout {
                        array_stride: attr[0].format.size(),
                        step_mode: VertexStepMode::Vertex,
                        attributes: attr,
                    })
                    .collect();

                let pipeline = device.create_render_pipeline(&RenderPipelineDescriptor {
                    label: Some("Mesh Pipeline"),
                    layout: Some(&pipeline_layout),
                    vertex: VertexState {
                        module: &vs.module,
                        entry_point: Some(layout.vertex_entry.as_str()),
                        buffers: &buffers,
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    },
                    fragment: Some(FragmentState {
                        module: &fs.module,
                        entry_point: Some(layout.fragment_entry.as_str()),
                        targets: &[Some(ColorTargetState {
                            format: target_format,
                            blend: Some(BlendState::REPLACE),
                            write_mask: ColorWrites::ALL,
                        })],
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    }),
                    primitive: PrimitiveState {
                        topology: PrimitiveTopology::TriangleList,
                        cull_mode: None,
                        ..Default::default()
                    },
                    depth_stencil: Some(DepthStencilState {
                        format: DEPTH_FORMAT,
                        depth_write_enabled: true,
                        depth_compare: wgpu::CompareFunction::LessEqual,
                        stencil: wgpu::StencilState::default(),
                        bias: DepthBiasState::default(),
                    }),
                    multisample: wgpu::MultisampleState::default(),
                    multiview: None,
                    cache: None,
                });

                Program {
                    layout: layout.clone(),
                    pipeline,
                    bind_group,
                    uniforms,
                }
            })
            .map_err(|err| CoreError::ProgramLink(err.to_string()))?;

        let handle = ProgramHandle(self.next_id());
        self.programs.insert(handle, program);
        log::debug!("Linked program {handle:?}");
        Ok(handle)
    }

    fn use_program(&mut self, program: ProgramHandle) {
        self.current_program = Some(program);
    }

    fn attribute_location(&self, program: ProgramHandle, name: &str) -> Option<u32> {
        self.programs
            .get(&program)?
            .layout
            .attribute(name)
            .map(|a| a.location)
    }

    fn uniform_location(&self, program: ProgramHandle, name: &str) -> Option<u32> {
        self.programs.get(&program)?.layout.uniform_location(name)
    }

    fn create_buffer(&mut self, kind: BufferKind, contents: &[u8]) -> CoreResult<BufferHandle> {
        let (label, usage) = match kind {
            BufferKind::Vertex => ("Mesh VB", BufferUsages::VERTEX),
            BufferKind::Index => ("Mesh IB", BufferUsages::INDEX),
        };
        let buffer = self
            .scoped(|device| {
                device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(label),
                    contents,
                    usage,
                })
            })
            .map_err(|err| CoreError::Backend(format!("{label} creation failed: {err}")))?;

        let handle = BufferHandle(self.next_id());
        self.buffers.insert(handle, (kind, buffer));
        Ok(handle)
    }

    fn enable_vertex_attribute(&mut self, location: u32) {
        self.attributes.enable(location);
    }

    fn disable_vertex_attribute(&mut self, location: u32) {
        self.attributes.disable(location);
    }

    fn vertex_attribute_buffer(
        &mut self,
        location: u32,
        buffer: BufferHandle,
        components: u32,
    ) -> CoreResult<()> {
        lookup_buffer(&self.buffers, buffer, BufferKind::Vertex)?;
        if let Some(attr) = self
            .current()?
            .layout
            .attributes
            .iter()
            .find(|a| a.location == location)
        {
            if attr.format.components() != components {
                return Err(CoreError::Draw(format!(
                    "attribute `{}` has {} components, got {components}",
                    attr.name,
                    attr.format.components()
                )));
            }
        }
        self.attributes.bind(location, buffer);
        Ok(())
    }

    fn uniform_matrix4(&mut self, location: u32, matrix: &Mat4) -> CoreResult<()> {
        let slot = self
            .current()?
            .uniforms
            .get(location as usize)
            .ok_or_else(|| CoreError::Draw(format!("no uniform at location {location}")))?;
        if slot.size != 64 {
            return Err(CoreError::Draw(format!(
                "uniform at location {location} is {} bytes, expected a mat4x4<f32>",
                slot.size
            )));
        }
        self.queue
            .write_buffer(&slot.buffer, 0, bytemuck::cast_slice(&matrix.to_cols_array()));
        Ok(())
    }

    fn draw_indexed(&mut self, index_buffer: BufferHandle, count: u32) -> CoreResult<()> {
        let program = self
            .current_program
            .and_then(|p| self.programs.get(&p))
            .ok_or_else(|| CoreError::Draw("no program in use".into()))?;
        let mut vertex_buffers = Vec::with_capacity(program.layout.attributes.len());
        for handle in self.attributes.resolve(&program.layout)? {
            let buffer = lookup_buffer(&self.buffers, handle, BufferKind::Vertex)?;
            vertex_buffers.push((handle, buffer));
        }
        let indices = lookup_buffer(&self.buffers, index_buffer, BufferKind::Index)?;
        let frame = self
            .frame
            .as_mut()
            .ok_or_else(|| CoreError::Draw("draw issued outside of a frame".into()))?;
        if count == 0 {
            return Ok(());
        }
        if let Some((handle, _)) = vertex_buffers.iter().find(|(_, b)| b.size() == 0) {
            return Err(CoreError::Draw(format!("{handle:?} is empty")));
        }

        let clear = !frame.cleared;
        frame.cleared = true;

        self.device.push_error_scope(ErrorFilter::Validation);
        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("MeshEncoder"),
            });
        {
            let mut rpass = begin_pass(&mut encoder, &frame.view, &self.depth_view, clear);
            rpass.set_pipeline(&program.pipeline);
            rpass.set_bind_group(0, &program.bind_group, &[]);
            for (slot, (_, buffer)) in vertex_buffers.iter().enumerate() {
                rpass.set_vertex_buffer(slot as u32, buffer.slice(..));
            }
            rpass.set_index_buffer(indices.slice(..), IndexFormat::Uint16);
            rpass.draw_indexed(0..count, 0, 0..1);
        }
        self.queue.submit(Some(encoder.finish()));

        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(CoreError::Draw(err.to_string())),
            None => Ok(()),
        }
    }

    /// Resize: reconfigure surface & recreate depth view.
    fn set_viewport(&mut self, width: u32, height: u32) {
        self.surface_config.width = width.max(1);
        self.surface_config.height = height.max(1);
        self.recreate_surface();
    }

    fn begin_frame(&mut self) -> CoreResult<()> {
        let texture = match self.surface.get_current_texture() {
            Ok(texture) => texture,
            Err(err @ (SurfaceError::Lost | SurfaceError::Outdated)) => {
                self.recreate_surface();
                return Err(CoreError::Backend(format!("surface {err}; reconfigured")));
            }
            Err(err) => {
                return Err(CoreError::Backend(format!("failed to acquire frame: {err}")));
            }
        };
        let view = texture
            .texture
            .create_view(&TextureViewDescriptor::default());
        self.frame = Some(Frame {
            texture,
            view,
            cleared: false,
        });
        Ok(())
    }

    fn end_frame(&mut self) -> CoreResult<()> {
        let frame = self
            .frame
            .take()
            .ok_or_else(|| CoreError::Draw("end_frame without begin_frame".into()))?;
        if !frame.cleared {
            let mut encoder = self
                .device
                .create_command_encoder(&CommandEncoderDescriptor {
                    label: Some("ClearEncoder"),
                });
            begin_pass(&mut encoder, &frame.view, &self.depth_view, true);
            self.queue.submit(Some(encoder.finish()));
        }
        frame.texture.present();
        Ok(())
    }

    fn delete_buffer(&mut self, buffer: BufferHandle) {
        if let Some((_, gpu_buffer)) = self.buffers.remove(&buffer) {
            self.attributes.forget_buffer(buffer);
            gpu_buffer.destroy();
        }
    }

    fn delete_shader(&mut self, shader: ShaderHandle) {
        self.shaders.remove(&shader);
    }

    fn delete_program(&mut self, program: ProgramHandle) {
        if self.programs.remove(&program).is_some() && self.current_program == Some(program) {
            self.current_program = None;
        }
    }
}

fn lookup_buffer(
    buffers: &HashMap<BufferHandle, (BufferKind, Buffer)>,
    handle: BufferHandle,
    kind: BufferKind,
) -> CoreResult<&Buffer> {
    match buffers.get(&handle) {
        Some((k, buffer)) if *k == kind => Ok(buffer),
        Some((k, _)) => Err(CoreError::Draw(format!(
            "{handle:?} is a {k:?} buffer, expected {kind:?}"
        ))),
        None => Err(CoreError::Draw(format!("unknown buffer {handle:?}"))),
    }
}

fn vertex_format(format: AttributeFormat) -> VertexFormat {
    match format {
        AttributeFormat::Float32 => VertexFormat::Float32,
        AttributeFormat::Float32x2 => VertexFormat::Float32x2,
        AttributeFormat::Float32x3 => VertexFormat::Float32x3,
        AttributeFormat::Float32x4 => VertexFormat::Float32x4,
    }
}

/// Color + depth pass over the frame; clears both when `clear` is set.
fn begin_pass<'e>(
    encoder: &'e mut CommandEncoder,
    view: &TextureView,
    depth_view: &TextureView,
    clear: bool,
) -> RenderPass<'e> {
    let (color_load, depth_load) = if clear {
        (LoadOp::Clear(CLEAR_COLOR), LoadOp::Clear(1.0))
    } else {
        (LoadOp::Load, LoadOp::Load)
    };
    encoder.begin_render_pass(&RenderPassDescriptor {
        label: Some("MeshPass"),
        color_attachments: &[Some(RenderPassColorAttachment {
            view,
            depth_slice: None,
            resolve_target: None,
            ops: Operations {
                load: color_load,
                store: StoreOp::Store,
            },
        })],
        depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
            view: depth_view,
            depth_ops: Some(Operations {
                load: depth_load,
                store: StoreOp::Store,
            }),
            stencil_ops: None,
        }),
        occlusion_query_set: None,
        timestamp_writes: None,
    })
}

/// Create a depth texture view matching the surface config.
fn create_depth_view(device: &Device, sc: &SurfaceConfiguration) -> TextureView {
    let tex = device.create_texture(&TextureDescriptor {
        label: Some("DepthTex"),
        size: Extent3d {
            width: sc.width.max(1),
            height: sc.height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    tex.create_view(&TextureViewDescriptor::default())
}
