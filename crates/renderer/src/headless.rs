//! GPU-free backend. Runs the same compile/link/draw checks as the wgpu
//! backend, keeps buffer contents in memory and records every call.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;

use corelib::{CoreError, CoreResult, Mat4, ShaderStage};

use crate::{
    backend::{
        AttributeState, BufferHandle, BufferKind, GraphicsBackend, ProgramHandle, ShaderHandle,
    },
    reflect::{self, ProgramLayout, ShaderReflection},
};

#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    CompileShader { stage: ShaderStage, shader: ShaderHandle },
    LinkProgram(ProgramHandle),
    UseProgram(ProgramHandle),
    CreateBuffer {
        kind: BufferKind,
        buffer: BufferHandle,
        bytes: usize,
    },
    EnableAttribute(u32),
    DisableAttribute(u32),
    BindAttribute { location: u32, buffer: BufferHandle },
    UniformMatrix { location: u32, matrix: [f32; 16] },
    DrawIndexed { buffer: BufferHandle, count: u32 },
    Viewport { width: u32, height: u32 },
    BeginFrame,
    EndFrame,
    DeleteBuffer(BufferHandle),
    DeleteShader(ShaderHandle),
    DeleteProgram(ProgramHandle),
}

/// Shared, clonable call recorder. Clones observe the same log, so a test can
/// keep one while the backend is owned by a renderer.
#[derive(Clone, Debug, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    fn push(&self, call: Call) {
        self.0.lock().push(call);
    }

    pub fn snapshot(&self) -> Vec<Call> {
        self.0.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.0.lock().iter().filter(|c| pred(c)).count()
    }

    /// Index counts of every draw issued so far.
    pub fn draws(&self) -> Vec<u32> {
        self.0
            .lock()
            .iter()
            .filter_map(|c| match c {
                Call::DrawIndexed { count, .. } => Some(*count),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

#[derive(Debug, Default)]
pub struct HeadlessBackend {
    log: CallLog,
    next_handle: u64,
    shaders: HashMap<ShaderHandle, ShaderReflection>,
    programs: HashMap<ProgramHandle, ProgramLayout>,
    buffers: HashMap<BufferHandle, (BufferKind, Vec<u8>)>,
    current_program: Option<ProgramHandle>,
    attributes: AttributeState,
    viewport: (u32, u32),
    in_frame: bool,
    draw_failure: Option<String>,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record into an existing log.
    pub fn with_log(log: CallLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn log(&self) -> &CallLog {
        &self.log
    }

    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(|(_, bytes)| bytes.as_slice())
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    /// Shaders, programs and buffers not yet deleted.
    pub fn live_objects(&self) -> usize {
        self.shaders.len() + self.programs.len() + self.buffers.len()
    }

    /// Make every following draw fail with `reason` (simulates a lost device).
    pub fn set_draw_failure(&mut self, reason: Option<String>) {
        self.draw_failure = reason;
    }

    fn next_id(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn current_layout(&self) -> CoreResult<&ProgramLayout> {
        self.current_program
            .and_then(|p| self.programs.get(&p))
            .ok_or_else(|| CoreError::Draw("no program in use".into()))
    }

    fn buffer_of_kind(&self, buffer: BufferHandle, kind: BufferKind) -> CoreResult<&[u8]> {
        match self.buffers.get(&buffer) {
            Some((k, bytes)) if *k == kind => Ok(bytes.as_slice()),
            Some((k, _)) => Err(CoreError::Draw(format!(
                "{buffer:?} is a {k:?} buffer, expected {kind:?}"
            ))),
            None => Err(CoreError::Draw(format!("unknown buffer {buffer:?}"))),
        }
    }
}

impl GraphicsBackend for HeadlessBackend {
    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> CoreResult<ShaderHandle> {
        let reflection = reflect::reflect_shader(stage, source)?;
        let shader = ShaderHandle(self.next_id());
        self.shaders.insert(shader, reflection);
        self.log.push(Call::CompileShader { stage, shader });
        Ok(shader)
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
        let layout = reflect::link(lookup(vertex)?, lookup(fragment)?)?;
        let program = ProgramHandle(self.next_id());
        self.programs.insert(program, layout);
        self.log.push(Call::LinkProgram(program));
        Ok(program)
    }

    fn use_program(&mut self, program: ProgramHandle) {
        self.current_program = Some(program);
        self.log.push(Call::UseProgram(program));
    }

    fn attribute_location(&self, program: ProgramHandle, name: &str) -> Option<u32> {
        self.programs
            .get(&program)?
            .attribute(name)
            .map(|a| a.location)
    }

    fn uniform_location(&self, program: ProgramHandle, name: &str) -> Option<u32> {
        self.programs.get(&program)?.uniform_location(name)
    }

    fn create_buffer(&mut self, kind: BufferKind, contents: &[u8]) -> CoreResult<BufferHandle> {
        let buffer = BufferHandle(self.next_id());
        self.buffers.insert(buffer, (kind, contents.to_vec()));
        self.log.push(Call::CreateBuffer {
            kind,
            buffer,
            bytes: contents.len(),
        });
        Ok(buffer)
    }

    fn enable_vertex_attribute(&mut self, location: u32) {
        self.attributes.enable(location);
        self.log.push(Call::EnableAttribute(location));
    }

    fn disable_vertex_attribute(&mut self, location: u32) {
        self.attributes.disable(location);
        self.log.push(Call::DisableAttribute(location));
    }

    fn vertex_attribute_buffer(
        &mut self,
        location: u32,
        buffer: BufferHandle,
        components: u32,
    ) -> CoreResult<()> {
        self.buffer_of_kind(buffer, BufferKind::Vertex)?;
        if let Some(attr) = self
            .current_layout()?
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
        self.log.push(Call::BindAttribute { location, buffer });
        Ok(())
    }

    fn uniform_matrix4(&mut self, location: u32, matrix: &Mat4) -> CoreResult<()> {
        let uniform = self
            .current_layout()?
            .uniforms
            .get(location as usize)
            .ok_or_else(|| CoreError::Draw(format!("no uniform at location {location}")))?;
        if uniform.size != 64 {
            return Err(CoreError::Draw(format!(
                "uniform `{}` is {} bytes, expected a mat4x4<f32>",
                uniform.name, uniform.size
            )));
        }
        self.log.push(Call::UniformMatrix {
            location,
            matrix: matrix.to_cols_array(),
        });
        Ok(())
    }

    fn draw_indexed(&mut self, index_buffer: BufferHandle, count: u32) -> CoreResult<()> {
        if let Some(reason) = &self.draw_failure {
            return Err(CoreError::Draw(reason.clone()));
        }
        if !self.in_frame {
            return Err(CoreError::Draw("draw issued outside of a frame".into()));
        }
        let bound = self.attributes.resolve(self.current_layout()?)?;
        let indices = self.buffer_of_kind(index_buffer, BufferKind::Index)?;
        if count == 0 {
            return Ok(());
        }
        for handle in bound {
            if self.buffer_of_kind(handle, BufferKind::Vertex)?.is_empty() {
                return Err(CoreError::Draw(format!("{handle:?} is empty")));
            }
        }
        let needed = count as usize * std::mem::size_of::<u16>();
        if needed > indices.len() {
            return Err(CoreError::Draw(format!(
                "{count} indices requested but {index_buffer:?} holds {}",
                indices.len() / 2
            )));
        }
        self.log.push(Call::DrawIndexed {
            buffer: index_buffer,
            count,
        });
        Ok(())
    }

    fn set_viewport(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
        self.log.push(Call::Viewport { width, height });
    }

    fn begin_frame(&mut self) -> CoreResult<()> {
        self.in_frame = true;
        self.log.push(Call::BeginFrame);
        Ok(())
    }

    fn end_frame(&mut self) -> CoreResult<()> {
        if !self.in_frame {
            return Err(CoreError::Draw("end_frame without begin_frame".into()));
        }
        self.in_frame = false;
        self.log.push(Call::EndFrame);
        Ok(())
    }

    fn delete_buffer(&mut self, buffer: BufferHandle) {
        if self.buffers.remove(&buffer).is_some() {
            self.attributes.forget_buffer(buffer);
            self.log.push(Call::DeleteBuffer(buffer));
        }
    }

    fn delete_shader(&mut self, shader: ShaderHandle) {
        if self.shaders.remove(&shader).is_some() {
            self.log.push(Call::DeleteShader(shader));
        }
    }

    fn delete_program(&mut self, program: ProgramHandle) {
        if self.programs.remove(&program).is_some() {
            if self.current_program == Some(program) {
                self.current_program = None;
            }
            self.log.push(Call::DeleteProgram(program));
        }
    }
}
