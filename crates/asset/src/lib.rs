//! Asset loading/parsers (meshes, shaders).
//! OBJ positions + triangle faces into exact-size vertex/index buffers.

pub mod mesh;
pub mod obj;
pub mod shader;
