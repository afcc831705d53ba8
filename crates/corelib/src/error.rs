//! Error types shared by the asset, renderer and platform crates.

use std::fmt;

use thiserror::Error;

/// Programmable pipeline stage a shader source belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("vertex"),
            ShaderStage::Fragment => f.write_str("fragment"),
        }
    }
}

/// Why a single OBJ record was rejected.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ParseErrorKind {
    #[error("expected at least {expected} fields, found {found}")]
    MissingFields { expected: usize, found: usize },
    #[error("field {index} (`{token}`) is not a number")]
    InvalidNumber { index: usize, token: String },
    #[error("index {value} does not fit a 16-bit index buffer")]
    IndexOutOfRange { value: i64 },
    #[error("record is not valid UTF-8")]
    InvalidUtf8,
}

/// One variant per construction/draw stage, so hosts can tell failures apart.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to read asset {path}: {source}")]
    AssetRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("asset {path} is not valid UTF-8 text")]
    AssetDecode { path: String },
    #[error("OBJ line {line} (`{text}`): {kind}")]
    Parse {
        line: usize,
        text: String,
        kind: ParseErrorKind,
    },
    #[error("{stage} shader failed to compile: {log}")]
    ShaderCompile { stage: ShaderStage, log: String },
    #[error("shader program failed to link: {0}")]
    ProgramLink(String),
    #[error("shader program has no active attribute `{0}`")]
    MissingAttribute(String),
    #[error("shader program has no active uniform `{0}`")]
    MissingUniform(String),
    #[error("GPU backend error: {0}")]
    Backend(String),
    #[error("draw failed: {0}")]
    Draw(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
