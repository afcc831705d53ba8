//! Renderer: loads the configured mesh + shaders and draws it once per frame.
//! wgpu = 26.x, winit = 0.30.x

pub mod backend;
pub mod gpu;
pub mod headless;
pub mod mesh;
pub mod reflect;

use asset::{obj::load_obj_from_path, mesh::MeshData, shader::ShaderSources};
use corelib::{CoreResult, config::SceneConfig};

pub use backend::{BufferHandle, BufferKind, GraphicsBackend, ProgramHandle, ShaderHandle};
pub use gpu::WgpuBackend;
pub use headless::{Call, CallLog, HeadlessBackend};
pub use mesh::Mesh;

/// What a call to [`Renderer::draw_frame`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Nothing is loaded yet; no GPU work was issued.
    Skipped,
    /// One indexed draw of `indices` indices was submitted.
    Drawn { indices: u32 },
}

#[derive(Debug)]
enum State {
    Uninitialized,
    Ready(Mesh),
}

pub struct Renderer<B: GraphicsBackend> {
    backend: B,
    config: SceneConfig,
    state: State,
}

impl<B: GraphicsBackend> Renderer<B> {
    pub fn new(backend: B, config: SceneConfig) -> Self {
        Self {
            backend,
            config,
            state: State::Uninitialized,
        }
    }

    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, State::Ready(_))
    }

    pub fn mesh(&self) -> Option<&Mesh> {
        match &self.state {
            State::Ready(mesh) => Some(mesh),
            State::Uninitialized => None,
        }
    }

    /// Load the configured OBJ and shader pair and upload them.
    /// A renderer that is already ready keeps its mesh.
    pub fn initialize(&mut self) -> CoreResult<()> {
        if self.is_ready() {
            log::debug!("Renderer already initialized");
            return Ok(());
        }
        let data = load_obj_from_path(&self.config.mesh_path)?;
        let sources = ShaderSources::load(&self.config.shaders)?;
        self.initialize_with(&data, &sources)
    }

    /// Upload already-loaded mesh data and shader sources.
    pub fn initialize_with(&mut self, data: &MeshData, sources: &ShaderSources) -> CoreResult<()> {
        if self.is_ready() {
            return Ok(());
        }
        let mesh = Mesh::upload(&mut self.backend, data, sources, &self.config.bindings)?;
        log::info!(
            "Mesh ready: {} vertices, {} faces",
            mesh.vertex_count(),
            mesh.index_count() / 3
        );
        self.state = State::Ready(mesh);
        Ok(())
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        log::debug!("Viewport {width}x{height}");
        self.backend.set_viewport(width, height);
    }

    /// Draw the mesh with the camera's projection x view.
    pub fn draw_frame(&mut self) -> CoreResult<FrameOutcome> {
        let State::Ready(mesh) = &self.state else {
            return Ok(FrameOutcome::Skipped);
        };
        let view_proj = self.config.camera.proj_view();

        self.backend.begin_frame()?;
        let drawn = mesh.draw(&mut self.backend, &view_proj);
        // Close the frame even when the draw failed.
        let ended = self.backend.end_frame();
        let indices = drawn?;
        ended?;
        Ok(FrameOutcome::Drawn { indices })
    }
}

impl<B: GraphicsBackend> Drop for Renderer<B> {
    fn drop(&mut self) {
        if let State::Ready(mesh) = std::mem::replace(&mut self.state, State::Uninitialized) {
            mesh.release(&mut self.backend);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use asset::obj::load_obj_from_str;
    use corelib::{CoreError, Mat4, config::ShaderPaths};

    const TRIANGLE: &str = "v 0.0 1.0 0.0\nv -1.0 -1.0 0.0\nv 1.0 -1.0 0.0\nf 1 2 3\n";

    fn assets() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../assets")
    }

    fn shipped_config() -> SceneConfig {
        let dir = assets();
        SceneConfig::default()
            .with_mesh_path(dir.join("torus.obj"))
            .with_shaders(ShaderPaths {
                vertex: dir.join("shaders/mesh.vert.wgsl"),
                fragment: dir.join("shaders/mesh.frag.wgsl"),
            })
    }

    fn shipped_sources() -> ShaderSources {
        ShaderSources::load(&shipped_config().shaders).unwrap()
    }

    #[test]
    fn draw_before_initialize_is_skipped() {
        let mut renderer = Renderer::new(HeadlessBackend::new(), shipped_config());
        assert_eq!(renderer.draw_frame().unwrap(), FrameOutcome::Skipped);
        assert!(renderer.backend().log().snapshot().is_empty());
    }

    #[test]
    fn triangle_draws_three_indices_with_camera_matrix() {
        let config = shipped_config();
        let expected = config.camera.proj_view();
        let mut renderer = Renderer::new(HeadlessBackend::new(), config);
        let data = load_obj_from_str(TRIANGLE).unwrap();
        renderer.initialize_with(&data, &shipped_sources()).unwrap();

        assert_eq!(
            renderer.draw_frame().unwrap(),
            FrameOutcome::Drawn { indices: 3 }
        );
        let log = renderer.backend().log();
        assert_eq!(log.draws(), vec![3]);
        assert!(log.snapshot().contains(&Call::UniformMatrix {
            location: 0,
            matrix: expected.to_cols_array(),
        }));
        assert_ne!(expected, Mat4::IDENTITY);
    }

    #[test]
    fn shipped_torus_draws_every_face() {
        let mut renderer = Renderer::new(HeadlessBackend::new(), shipped_config());
        renderer.initialize().unwrap();
        let mesh = renderer.mesh().unwrap();
        assert_eq!(mesh.vertex_count(), 512);
        assert_eq!(mesh.index_count(), 3072);

        for _ in 0..3 {
            assert_eq!(
                renderer.draw_frame().unwrap(),
                FrameOutcome::Drawn { indices: 3072 }
            );
        }
        assert_eq!(renderer.backend().log().draws(), vec![3072; 3]);
    }

    #[test]
    fn missing_obj_leaves_renderer_uninitialized() {
        let config = shipped_config().with_mesh_path(assets().join("does-not-exist.obj"));
        let mut renderer = Renderer::new(HeadlessBackend::new(), config);

        let err = renderer.initialize().unwrap_err();
        assert!(matches!(err, CoreError::AssetRead { .. }));
        assert!(!renderer.is_ready());
        assert!(renderer.backend().log().snapshot().is_empty());
        assert_eq!(renderer.draw_frame().unwrap(), FrameOutcome::Skipped);
    }

    #[test]
    fn malformed_obj_reports_line() {
        let path = std::env::temp_dir().join(format!("objview-bad-{}.obj", std::process::id()));
        std::fs::write(&path, "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2\n").unwrap();
        let mut renderer =
            Renderer::new(HeadlessBackend::new(), shipped_config().with_mesh_path(&path));

        let err = renderer.initialize().unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, CoreError::Parse { line: 4, .. }));
        assert!(!renderer.is_ready());
        assert_eq!(renderer.backend().live_objects(), 0);
    }

    #[test]
    fn frame_after_failed_draw_runs_in_full() {
        let mut renderer = Renderer::new(HeadlessBackend::new(), shipped_config());
        renderer
            .initialize_with(&load_obj_from_str(TRIANGLE).unwrap(), &shipped_sources())
            .unwrap();

        renderer
            .backend_mut()
            .set_draw_failure(Some("context lost".into()));
        assert!(matches!(renderer.draw_frame(), Err(CoreError::Draw(_))));

        renderer.backend_mut().set_draw_failure(None);
        renderer.backend().log().clear();
        assert_eq!(
            renderer.draw_frame().unwrap(),
            FrameOutcome::Drawn { indices: 3 }
        );
        let calls = renderer.backend().log().snapshot();
        assert_eq!(calls.first(), Some(&Call::BeginFrame));
        assert_eq!(calls.last(), Some(&Call::EndFrame));
    }

    #[test]
    fn faces_without_vertices_fail_to_draw() {
        let mut renderer = Renderer::new(HeadlessBackend::new(), shipped_config());
        renderer
            .initialize_with(&load_obj_from_str("f 1 2 3\n").unwrap(), &shipped_sources())
            .unwrap();

        let err = renderer.draw_frame().unwrap_err();
        assert!(matches!(err, CoreError::Draw(ref msg) if msg.contains("is empty")));
        assert!(renderer.backend().log().draws().is_empty());
        assert_eq!(
            renderer.backend().log().snapshot().last(),
            Some(&Call::EndFrame)
        );
    }

    #[test]
    fn drop_releases_gpu_objects() {
        let log = CallLog::default();
        {
            let mut renderer =
                Renderer::new(HeadlessBackend::with_log(log.clone()), shipped_config());
            renderer.initialize().unwrap();
            renderer.draw_frame().unwrap();
        }
        assert_eq!(log.count(|c| matches!(c, Call::DeleteProgram(_))), 1);
        assert_eq!(log.count(|c| matches!(c, Call::DeleteShader(_))), 2);
        assert_eq!(log.count(|c| matches!(c, Call::DeleteBuffer(_))), 2);
    }

    #[test]
    fn resize_sets_viewport() {
        let mut renderer = Renderer::new(HeadlessBackend::new(), shipped_config());
        renderer.resize(800, 600);
        assert_eq!(renderer.backend().viewport(), (800, 600));
    }

    #[test]
    fn second_initialize_is_noop() {
        let mut renderer = Renderer::new(HeadlessBackend::new(), shipped_config());
        renderer.initialize().unwrap();
        renderer.initialize().unwrap();
        assert_eq!(
            renderer
                .backend()
                .log()
                .count(|c| matches!(c, Call::LinkProgram(_))),
            1
        );
    }

    #[test]
    fn same_inputs_give_same_calls() {
        let run = || {
            let mut renderer = Renderer::new(HeadlessBackend::new(), shipped_config());
            renderer.initialize().unwrap();
            renderer.draw_frame().unwrap();
            renderer.backend().log().snapshot()
        };
        assert_eq!(run(), run());
    }
}
