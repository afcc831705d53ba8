//! Immediate-mode GPU call surface the mesh is written against.
//!
//! Implemented by [`crate::gpu::WgpuBackend`] for real output and by
//! [`crate::headless::HeadlessBackend`] for GPU-free runs.

use std::{
    collections::{HashMap, HashSet},
    ops::{Deref, DerefMut},
};

use corelib::{CoreError, CoreResult, Mat4, ShaderStage};

use crate::reflect::ProgramLayout;

/// Handle to a compiled shader stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderHandle(pub(crate) u64);

/// Handle to a linked program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub(crate) u64);

/// Handle to a GPU buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    /// 16-bit indices.
    Index,
}

pub trait GraphicsBackend {
    /// Compile one stage. Fails with `ShaderCompile` instead of returning a
    /// handle that cannot be used.
    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> CoreResult<ShaderHandle>;

    fn link_program(
        &mut self,
        vertex: ShaderHandle,
        fragment: ShaderHandle,
    ) -> CoreResult<ProgramHandle>;

    fn use_program(&mut self, program: ProgramHandle);

    fn attribute_location(&self, program: ProgramHandle, name: &str) -> Option<u32>;

    fn uniform_location(&self, program: ProgramHandle, name: &str) -> Option<u32>;

    fn create_buffer(&mut self, kind: BufferKind, contents: &[u8]) -> CoreResult<BufferHandle>;

    fn enable_vertex_attribute(&mut self, location: u32);

    fn disable_vertex_attribute(&mut self, location: u32);

    /// Source attribute `location` from `buffer`, `components` tightly packed floats per vertex.
    fn vertex_attribute_buffer(
        &mut self,
        location: u32,
        buffer: BufferHandle,
        components: u32,
    ) -> CoreResult<()>;

    /// Upload a column-major 4x4 matrix to the program in use.
    fn uniform_matrix4(&mut self, location: u32, matrix: &Mat4) -> CoreResult<()>;

    /// Draw `count` indices from `index_buffer` as a triangle list.
    fn draw_indexed(&mut self, index_buffer: BufferHandle, count: u32) -> CoreResult<()>;

    fn set_viewport(&mut self, width: u32, height: u32);

    fn begin_frame(&mut self) -> CoreResult<()> {
        Ok(())
    }

    fn end_frame(&mut self) -> CoreResult<()> {
        Ok(())
    }

    fn delete_buffer(&mut self, buffer: BufferHandle);

    fn delete_shader(&mut self, shader: ShaderHandle);

    fn delete_program(&mut self, program: ProgramHandle);
}

/// Keeps one vertex attribute enabled while alive; disables it on drop,
/// including when a call made through the scope fails.
pub struct AttributeScope<'a, B: GraphicsBackend + ?Sized> {
    backend: &'a mut B,
    location: u32,
}

impl<'a, B: GraphicsBackend + ?Sized> AttributeScope<'a, B> {
    pub fn enable(backend: &'a mut B, location: u32) -> Self {
        backend.enable_vertex_attribute(location);
        Self { backend, location }
    }

    pub fn location(&self) -> u32 {
        self.location
    }
}

impl<B: GraphicsBackend + ?Sized> Deref for AttributeScope<'_, B> {
    type Target = B;

    fn deref(&self) -> &B {
        self.backend
    }
}

impl<B: GraphicsBackend + ?Sized> DerefMut for AttributeScope<'_, B> {
    fn deref_mut(&mut self) -> &mut B {
        self.backend
    }
}

impl<B: GraphicsBackend + ?Sized> Drop for AttributeScope<'_, B> {
    fn drop(&mut self) {
        self.backend.disable_vertex_attribute(self.location);
    }
}

/// Enabled/bound vertex attribute bookkeeping shared by the backends.
#[derive(Debug, Default)]
pub(crate) struct AttributeState {
    enabled: HashSet<u32>,
    bound: HashMap<u32, BufferHandle>,
}

impl AttributeState {
    pub(crate) fn enable(&mut self, location: u32) {
        self.enabled.insert(location);
    }

    pub(crate) fn disable(&mut self, location: u32) {
        self.enabled.remove(&location);
    }

    pub(crate) fn bind(&mut self, location: u32, buffer: BufferHandle) {
        self.bound.insert(location, buffer);
    }

    pub(crate) fn forget_buffer(&mut self, buffer: BufferHandle) {
        self.bound.retain(|_, b| *b != buffer);
    }

    /// Buffers feeding each program attribute, in declaration order.
    pub(crate) fn resolve(&self, layout: &ProgramLayout) -> CoreResult<Vec<BufferHandle>> {
        layout
            .attributes
            .iter()
            .map(|attr| {
                if !self.enabled.contains(&attr.location) {
                    return Err(CoreError::Draw(format!(
                        "attribute `{}` (location {}) is not enabled",
                        attr.name, attr.location
                    )));
                }
                self.bound.get(&attr.location).copied().ok_or_else(|| {
                    CoreError::Draw(format!(
                        "attribute `{}` (location {}) has no buffer bound",
                        attr.name, attr.location
                    ))
                })
            })
            .collect()
    }
}
