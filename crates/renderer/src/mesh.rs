//! GPU-side mesh: vertex/index buffers plus the program that draws them.

use asset::{mesh::MeshData, shader::ShaderSources};
use corelib::{CoreError, CoreResult, Mat4, ShaderStage, config::ShaderBindings};

use crate::backend::{
    AttributeScope, BufferHandle, BufferKind, GraphicsBackend, ProgramHandle, ShaderHandle,
};

/// Components per position (`x, y, z`).
const POSITION_COMPONENTS: u32 = 3;

/// GPU objects owned by a mesh, released program-first.
#[derive(Debug, Default)]
struct Allocations {
    program: Option<ProgramHandle>,
    shaders: Vec<ShaderHandle>,
    buffers: Vec<BufferHandle>,
}

impl Allocations {
    fn is_empty(&self) -> bool {
        self.program.is_none() && self.shaders.is_empty() && self.buffers.is_empty()
    }

    fn release<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B) {
        if let Some(program) = self.program.take() {
            backend.delete_program(program);
        }
        for shader in self.shaders.drain(..) {
            backend.delete_shader(shader);
        }
        for buffer in self.buffers.drain(..) {
            backend.delete_buffer(buffer);
        }
    }
}

#[derive(Debug)]
pub struct Mesh {
    program: ProgramHandle,
    vertex_buffer: BufferHandle,
    index_buffer: BufferHandle,
    position: u32,
    matrix: u32,
    vertex_count: u32,
    index_count: u32,
    allocations: Allocations,
}

impl Mesh {
    /// Upload buffers, compile + link the shader pair and resolve the named
    /// bindings. On failure nothing created here outlives the call.
    pub fn upload<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        data: &MeshData,
        sources: &ShaderSources,
        bindings: &ShaderBindings,
    ) -> CoreResult<Self> {
        let mut allocations = Allocations::default();
        match Self::build(backend, data, sources, bindings, &mut allocations) {
            Ok(mut mesh) => {
                mesh.allocations = allocations;
                Ok(mesh)
            }
            Err(err) => {
                allocations.release(backend);
                Err(err)
            }
        }
    }

    fn build<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        data: &MeshData,
        sources: &ShaderSources,
        bindings: &ShaderBindings,
        allocations: &mut Allocations,
    ) -> CoreResult<Self> {
        let vertex_count = u32::try_from(data.vertex_count())
            .map_err(|_| CoreError::Backend("vertex count exceeds u32".into()))?;
        let index_count = u32::try_from(data.index_count())
            .map_err(|_| CoreError::Backend("index count exceeds u32".into()))?;

        let vertex_buffer = backend.create_buffer(BufferKind::Vertex, data.vertex_bytes())?;
        allocations.buffers.push(vertex_buffer);
        let index_buffer = backend.create_buffer(BufferKind::Index, data.index_bytes())?;
        allocations.buffers.push(index_buffer);

        let vertex =
            backend.compile_shader(ShaderStage::Vertex, sources.source(ShaderStage::Vertex))?;
        allocations.shaders.push(vertex);
        let fragment =
            backend.compile_shader(ShaderStage::Fragment, sources.source(ShaderStage::Fragment))?;
        allocations.shaders.push(fragment);

        let program = backend.link_program(vertex, fragment)?;
        allocations.program = Some(program);
        backend.use_program(program);

        let position = backend
            .attribute_location(program, &bindings.position)
            .ok_or_else(|| CoreError::MissingAttribute(bindings.position.clone()))?;
        let matrix = backend
            .uniform_location(program, &bindings.matrix)
            .ok_or_else(|| CoreError::MissingUniform(bindings.matrix.clone()))?;

        Ok(Self {
            program,
            vertex_buffer,
            index_buffer,
            position,
            matrix,
            vertex_count,
            index_count,
            allocations: Allocations::default(),
        })
    }

    /// One indexed draw of the whole mesh. Returns the number of indices requested.
    pub fn draw<B: GraphicsBackend + ?Sized>(
        &self,
        backend: &mut B,
        view_proj: &Mat4,
    ) -> CoreResult<u32> {
        let mut scope = AttributeScope::enable(backend, self.position);
        scope.vertex_attribute_buffer(self.position, self.vertex_buffer, POSITION_COMPONENTS)?;
        scope.uniform_matrix4(self.matrix, view_proj)?;
        scope.draw_indexed(self.index_buffer, self.index_count)?;
        Ok(self.index_count)
    }

    /// Delete the program, both shaders and both buffers.
    pub fn release<B: GraphicsBackend + ?Sized>(mut self, backend: &mut B) {
        self.allocations.release(backend);
        log::debug!("Released mesh program {:?}", self.program);
    }

    pub fn vertex_buffer(&self) -> BufferHandle {
        self.vertex_buffer
    }

    pub fn index_buffer(&self) -> BufferHandle {
        self.index_buffer
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

impl Drop for Mesh {
    fn drop(&mut self) {
        if !self.allocations.is_empty() {
            log::warn!(
                "Mesh with program {:?} dropped without release; GPU objects leak",
                self.program
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{Call, HeadlessBackend};
    use asset::obj::load_obj_from_str;

    const VERTEX: &str = include_str!("../../../assets/shaders/mesh.vert.wgsl");
    const FRAGMENT: &str = include_str!("../../../assets/shaders/mesh.frag.wgsl");
    const TRIANGLE: &str = "v 0.0 1.0 0.0\nv -1.0 -1.0 0.0\nv 1.0 -1.0 0.0\nf 1 2 3\n";

    fn sources() -> ShaderSources {
        ShaderSources::from_strings(VERTEX, FRAGMENT)
    }

    #[test]
    fn upload_then_draw_in_order() {
        let data = load_obj_from_str(TRIANGLE).unwrap();
        let mut backend = HeadlessBackend::new();
        let mesh = Mesh::upload(&mut backend, &data, &sources(), &ShaderBindings::default())
            .expect("upload");
        assert_eq!(mesh.vertex_count(), 3);
        assert_eq!(mesh.index_count(), 3);
        assert_eq!(
            backend.buffer_contents(mesh.vertex_buffer()),
            Some(data.vertex_bytes())
        );
        assert_eq!(
            backend.buffer_contents(mesh.index_buffer()),
            Some(data.index_bytes())
        );

        backend.log().clear();
        backend.begin_frame().unwrap();
        let drawn = mesh.draw(&mut backend, &Mat4::IDENTITY).unwrap();
        assert_eq!(drawn, 3);
        assert_eq!(
            backend.log().snapshot(),
            vec![
                Call::BeginFrame,
                Call::EnableAttribute(0),
                Call::BindAttribute {
                    location: 0,
                    buffer: mesh.vertex_buffer()
                },
                Call::UniformMatrix {
                    location: 0,
                    matrix: Mat4::IDENTITY.to_cols_array()
                },
                Call::DrawIndexed {
                    buffer: mesh.index_buffer(),
                    count: 3
                },
                Call::DisableAttribute(0),
            ]
        );

        mesh.release(&mut backend);
        assert_eq!(backend.live_objects(), 0);
    }

    #[test]
    fn compile_failure_releases_buffers() {
        let data = load_obj_from_str(TRIANGLE).unwrap();
        let mut backend = HeadlessBackend::new();
        let broken = ShaderSources::from_strings("fn nope( {", FRAGMENT);
        let err = Mesh::upload(&mut backend, &data, &broken, &ShaderBindings::default())
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::ShaderCompile {
                stage: ShaderStage::Vertex,
                ..
            }
        ));
        assert_eq!(backend.log().count(|c| matches!(c, Call::DeleteBuffer(_))), 2);
        assert_eq!(backend.live_objects(), 0);
    }

    #[test]
    fn missing_binding_releases_everything() {
        let data = load_obj_from_str(TRIANGLE).unwrap();
        let mut backend = HeadlessBackend::new();
        let bindings = ShaderBindings {
            position: "position".into(),
            matrix: "mvp".into(),
        };
        let err = Mesh::upload(&mut backend, &data, &sources(), &bindings).unwrap_err();
        assert!(matches!(err, CoreError::MissingUniform(ref name) if name == "mvp"));
        assert_eq!(backend.log().count(|c| matches!(c, Call::DeleteProgram(_))), 1);
        assert_eq!(backend.log().count(|c| matches!(c, Call::DeleteShader(_))), 2);
        assert_eq!(backend.live_objects(), 0);
    }

    #[test]
    fn failed_draw_still_disables_attribute() {
        let data = load_obj_from_str(TRIANGLE).unwrap();
        let mut backend = HeadlessBackend::new();
        let mesh =
            Mesh::upload(&mut backend, &data, &sources(), &ShaderBindings::default()).unwrap();
        backend.begin_frame().unwrap();
        backend.set_draw_failure(Some("device lost".into()));

        let err = mesh.draw(&mut backend, &Mat4::IDENTITY).unwrap_err();
        assert!(matches!(err, CoreError::Draw(ref msg) if msg == "device lost"));
        assert_eq!(
            backend.log().snapshot().last(),
            Some(&Call::DisableAttribute(0))
        );
        mesh.release(&mut backend);
    }
}
