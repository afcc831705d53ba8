//! Scene configuration handed to the renderer at construction.

use std::path::{Path, PathBuf};

use crate::camera::Camera;

/// Vertex/fragment shader source files.
#[derive(Clone, Debug, PartialEq)]
pub struct ShaderPaths {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl Default for ShaderPaths {
    fn default() -> Self {
        Self {
            vertex: PathBuf::from("assets/shaders/mesh.vert.wgsl"),
            fragment: PathBuf::from("assets/shaders/mesh.frag.wgsl"),
        }
    }
}

/// Names the mesh looks up in the linked program.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderBindings {
    /// 3-component float vertex attribute fed from the vertex buffer.
    pub position: String,
    /// 4x4 float uniform receiving projection x view.
    pub matrix: String,
}

impl Default for ShaderBindings {
    fn default() -> Self {
        Self {
            position: "position".to_owned(),
            matrix: "matrix".to_owned(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SceneConfig {
    pub mesh_path: PathBuf,
    pub shaders: ShaderPaths,
    pub bindings: ShaderBindings,
    pub camera: Camera,
}

impl SceneConfig {
    pub fn with_mesh_path(mut self, path: impl AsRef<Path>) -> Self {
        self.mesh_path = path.as_ref().to_path_buf();
        self
    }

    pub fn with_shaders(mut self, shaders: ShaderPaths) -> Self {
        self.shaders = shaders;
        self
    }

    pub fn with_camera(mut self, camera: Camera) -> Self {
        self.camera = camera;
        self
    }
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            mesh_path: PathBuf::from("assets/torus.obj"),
            shaders: ShaderPaths::default(),
            bindings: ShaderBindings::default(),
            camera: Camera::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Vec3;

    #[test]
    fn defaults_point_at_shipped_assets() {
        let cfg = SceneConfig::default();
        assert_eq!(cfg.mesh_path, PathBuf::from("assets/torus.obj"));
        assert_eq!(cfg.bindings.position, "position");
        assert_eq!(cfg.bindings.matrix, "matrix");
        assert_eq!(cfg.camera.eye, Vec3::new(0.0, 3.0, -4.0));
    }

    #[test]
    fn builders_replace_fields() {
        let cam = Camera::default().with_eye(Vec3::new(0.0, 0.0, 5.0));
        let cfg = SceneConfig::default()
            .with_mesh_path("other.obj")
            .with_camera(cam);
        assert_eq!(cfg.mesh_path, PathBuf::from("other.obj"));
        assert_eq!(cfg.camera.eye.z, 5.0);
    }
}
