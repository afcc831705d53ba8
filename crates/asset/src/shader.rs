//! Shader source text loaded from disk.

use std::{fs, path::Path};

use corelib::{CoreError, CoreResult, ShaderStage, config::ShaderPaths};

/// A vertex/fragment source pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderSources {
    pub vertex: String,
    pub fragment: String,
}

impl ShaderSources {
    pub fn from_strings(vertex: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self {
            vertex: vertex.into(),
            fragment: fragment.into(),
        }
    }

    /// Read both files as raw bytes and decode them as UTF-8.
    pub fn load(paths: &ShaderPaths) -> CoreResult<Self> {
        let vertex = read_text(&paths.vertex)?;
        let fragment = read_text(&paths.fragment)?;
        log::info!(
            "Loaded shaders {} ({} bytes) and {} ({} bytes)",
            paths.vertex.display(),
            vertex.len(),
            paths.fragment.display(),
            fragment.len()
        );
        Ok(Self { vertex, fragment })
    }

    pub fn source(&self, stage: ShaderStage) -> &str {
        match stage {
            ShaderStage::Vertex => &self.vertex,
            ShaderStage::Fragment => &self.fragment,
        }
    }
}

fn read_text(path: &Path) -> CoreResult<String> {
    let bytes = fs::read(path).map_err(|source| CoreError::AssetRead {
        path: path.display().to_string(),
        source,
    })?;
    String::from_utf8(bytes).map_err(|_| CoreError::AssetDecode {
        path: path.display().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn asset(name: &str) -> PathBuf {
        PathBuf::from(format!("{}/../../assets/shaders/{name}", env!("CARGO_MANIFEST_DIR")))
    }

    #[test]
    fn loads_shipped_pair() {
        let paths = ShaderPaths {
            vertex: asset("mesh.vert.wgsl"),
            fragment: asset("mesh.frag.wgsl"),
        };
        let sources = ShaderSources::load(&paths).expect("load shaders");
        assert!(sources.source(ShaderStage::Vertex).contains("position"));
        assert!(sources.source(ShaderStage::Vertex).contains("matrix"));
        assert!(sources.source(ShaderStage::Fragment).contains("@fragment"));
    }

    #[test]
    fn missing_shader_is_read_error() {
        let paths = ShaderPaths {
            vertex: asset("mesh.vert.wgsl"),
            fragment: asset("missing.frag.wgsl"),
        };
        let err = ShaderSources::load(&paths).unwrap_err();
        assert!(matches!(err, CoreError::AssetRead { ref path, .. } if path.contains("missing")));
    }

    #[test]
    fn non_utf8_shader_is_decode_error() {
        let path = std::env::temp_dir().join(format!("asset-shader-{}.bin", std::process::id()));
        fs::write(&path, [0xff, 0xfe, 0x00, 0xc3]).unwrap();
        let err = read_text(&path).unwrap_err();
        fs::remove_file(&path).ok();
        assert!(matches!(err, CoreError::AssetDecode { .. }));
    }
}
