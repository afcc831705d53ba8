//! WGSL reflection: the compile and link status checks every backend runs.

use naga::{
    AddressSpace, Binding, Handle, Module, Scalar, ScalarKind, Type, TypeInner, VectorSize,
    valid::{Capabilities, ValidationFlags, Validator},
};

use corelib::{CoreError, CoreResult, ShaderStage};

/// Float vertex attribute layouts a program may declare.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttributeFormat {
    Float32,
    Float32x2,
    Float32x3,
    Float32x4,
}

impl AttributeFormat {
    pub fn components(self) -> u32 {
        match self {
            AttributeFormat::Float32 => 1,
            AttributeFormat::Float32x2 => 2,
            AttributeFormat::Float32x3 => 3,
            AttributeFormat::Float32x4 => 4,
        }
    }

    fn from_type(inner: &TypeInner) -> Option<Self> {
        const F32: Scalar = Scalar {
            kind: ScalarKind::Float,
            width: 4,
        };
        match *inner {
            TypeInner::Scalar(scalar) if scalar == F32 => Some(AttributeFormat::Float32),
            TypeInner::Vector { size, scalar } if scalar == F32 => Some(match size {
                VectorSize::Bi => AttributeFormat::Float32x2,
                VectorSize::Tri => AttributeFormat::Float32x3,
                VectorSize::Quad => AttributeFormat::Float32x4,
            }),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VertexInput {
    pub name: String,
    pub location: u32,
    pub format: AttributeFormat,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniformBinding {
    pub name: String,
    pub group: u32,
    pub binding: u32,
    /// Size in bytes.
    pub size: u32,
}

/// What one compiled stage exposes.
#[derive(Clone, Debug, PartialEq)]
pub struct ShaderReflection {
    pub stage: ShaderStage,
    pub entry_point: String,
    /// Vertex stage only.
    pub attributes: Vec<VertexInput>,
    /// `@location` inputs of the entry point.
    pub inputs: Vec<u32>,
    /// `@location` outputs of the entry point.
    pub outputs: Vec<u32>,
    pub uniforms: Vec<UniformBinding>,
}

/// Interface of a linked vertex/fragment pair.
#[derive(Clone, Debug, PartialEq)]
pub struct ProgramLayout {
    pub vertex_entry: String,
    pub fragment_entry: String,
    pub attributes: Vec<VertexInput>,
    pub uniforms: Vec<UniformBinding>,
}

impl ProgramLayout {
    pub fn attribute(&self, name: &str) -> Option<&VertexInput> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Uniform locations are indices into [`ProgramLayout::uniforms`].
    pub fn uniform_location(&self, name: &str) -> Option<u32> {
        self.uniforms
            .iter()
            .position(|u| u.name == name)
            .and_then(|i| u32::try_from(i).ok())
    }
}

struct InterfaceSlot {
    name: String,
    location: u32,
    ty: Handle<Type>,
}

/// Parse and validate `source`; any diagnostic is a compile failure.
pub fn reflect_shader(stage: ShaderStage, source: &str) -> CoreResult<ShaderReflection> {
    let compile_error = |log: String| CoreError::ShaderCompile { stage, log };

    let module = naga::front::wgsl::parse_str(source)
        .map_err(|err| compile_error(err.emit_to_string(source)))?;
    Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|err| compile_error(err.as_inner().to_string()))?;

    let naga_stage = match stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Fragment => naga::ShaderStage::Fragment,
    };
    let entry = module
        .entry_points
        .iter()
        .find(|ep| ep.stage == naga_stage)
        .ok_or_else(|| compile_error(format!("no @{stage} entry point")))?;

    let mut inputs = Vec::new();
    for arg in &entry.function.arguments {
        collect_locations(&module, arg.name.as_deref(), arg.ty, arg.binding.as_ref(), &mut inputs);
    }
    let mut outputs = Vec::new();
    if let Some(result) = &entry.function.result {
        collect_locations(&module, None, result.ty, result.binding.as_ref(), &mut outputs);
    }

    let mut attributes = Vec::new();
    if stage == ShaderStage::Vertex {
        for slot in &inputs {
            let format = AttributeFormat::from_type(&module.types[slot.ty].inner).ok_or_else(|| {
                compile_error(format!(
                    "attribute `{}` must be a 32-bit float scalar or vector",
                    slot.name
                ))
            })?;
            attributes.push(VertexInput {
                name: slot.name.clone(),
                location: slot.location,
                format,
            });
        }
    }

    Ok(ShaderReflection {
        stage,
        entry_point: entry.name.clone(),
        attributes,
        inputs: inputs.iter().map(|s| s.location).collect(),
        outputs: outputs.iter().map(|s| s.location).collect(),
        uniforms: uniforms(&module),
    })
}

/// Check that two stages form a usable program.
pub fn link(vertex: &ShaderReflection, fragment: &ShaderReflection) -> CoreResult<ProgramLayout> {
    if vertex.stage != ShaderStage::Vertex {
        return Err(CoreError::ProgramLink(format!(
            "expected a vertex shader, got a {} shader",
            vertex.stage
        )));
    }
    if fragment.stage != ShaderStage::Fragment {
        return Err(CoreError::ProgramLink(format!(
            "expected a fragment shader, got a {} shader",
            fragment.stage
        )));
    }

    if let Some(location) = fragment
        .inputs
        .iter()
        .find(|location| !vertex.outputs.contains(location))
    {
        return Err(CoreError::ProgramLink(format!(
            "fragment input @location({location}) is not written by the vertex shader"
        )));
    }

    let mut uniforms = vertex.uniforms.clone();
    for uniform in &fragment.uniforms {
        let slot = uniforms
            .iter()
            .position(|u| u.group == uniform.group && u.binding == uniform.binding);
        match slot {
            Some(i) if uniforms[i].name != uniform.name || uniforms[i].size != uniform.size => {
                return Err(CoreError::ProgramLink(format!(
                    "@group({}) @binding({}) is `{}` in the vertex shader but `{}` in the fragment shader",
                    uniform.group, uniform.binding, uniforms[i].name, uniform.name
                )));
            }
            Some(_) => {}
            None => uniforms.push(uniform.clone()),
        }
    }

    Ok(ProgramLayout {
        vertex_entry: vertex.entry_point.clone(),
        fragment_entry: fragment.entry_point.clone(),
        attributes: vertex.attributes.clone(),
        uniforms,
    })
}

fn collect_locations(
    module: &Module,
    name: Option<&str>,
    ty: Handle<Type>,
    binding: Option<&Binding>,
    out: &mut Vec<InterfaceSlot>,
) {
    match binding {
        Some(Binding::Location { location, .. }) => out.push(InterfaceSlot {
            name: name.unwrap_or_default().to_owned(),
            location: *location,
            ty,
        }),
        Some(Binding::BuiltIn(_)) => {}
        None => {
            if let TypeInner::Struct { members, .. } = &module.types[ty].inner {
                for member in members {
                    collect_locations(
                        module,
                        member.name.as_deref(),
                        member.ty,
                        member.binding.as_ref(),
                        out,
                    );
                }
            }
        }
    }
}

fn uniforms(module: &Module) -> Vec<UniformBinding> {
    module
        .global_variables
        .iter()
        .filter(|(_, var)| matches!(var.space, AddressSpace::Uniform))
        .filter_map(|(_, var)| {
            let binding = var.binding.as_ref()?;
            Some(UniformBinding {
                name: var.name.clone().unwrap_or_default(),
                group: binding.group,
                binding: binding.binding,
                size: module.types[var.ty].inner.size(module.to_ctx()),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERTEX: &str = include_str!("../../../assets/shaders/mesh.vert.wgsl");
    const FRAGMENT: &str = include_str!("../../../assets/shaders/mesh.frag.wgsl");

    const STRUCT_VS: &str = r#"
        struct VsIn {
            @location(0) position: vec3<f32>,
            @location(1) uv: vec2<f32>,
        };
        struct VsOut {
            @builtin(position) clip: vec4<f32>,
            @location(0) uv: vec2<f32>,
        };
        @vertex
        fn main(v: VsIn) -> VsOut {
            var o: VsOut;
            o.clip = vec4<f32>(v.position, 1.0);
            o.uv = v.uv;
            return o;
        }
    "#;

    #[test]
    fn shipped_vertex_shader_exposes_position_and_matrix() {
        let vs = reflect_shader(ShaderStage::Vertex, VERTEX).expect("compile vertex");
        assert_eq!(vs.entry_point, "vs_main");
        assert_eq!(
            vs.attributes,
            vec![VertexInput {
                name: "position".into(),
                location: 0,
                format: AttributeFormat::Float32x3,
            }]
        );
        assert_eq!(vs.uniforms.len(), 1);
        assert_eq!(vs.uniforms[0].name, "matrix");
        assert_eq!(vs.uniforms[0].size, 64);
        assert!(vs.outputs.is_empty());
    }

    #[test]
    fn shipped_pair_links() {
        let vs = reflect_shader(ShaderStage::Vertex, VERTEX).unwrap();
        let fs = reflect_shader(ShaderStage::Fragment, FRAGMENT).unwrap();
        let layout = link(&vs, &fs).expect("link");
        assert_eq!(layout.fragment_entry, "fs_main");
        assert_eq!(layout.attribute("position").map(|a| a.location), Some(0));
        assert_eq!(layout.uniform_location("matrix"), Some(0));
        assert_eq!(layout.uniform_location("missing"), None);
    }

    #[test]
    fn syntax_error_is_compile_failure() {
        let err = reflect_shader(ShaderStage::Fragment, "fn broken( {").unwrap_err();
        assert!(matches!(
            err,
            CoreError::ShaderCompile {
                stage: ShaderStage::Fragment,
                ..
            }
        ));
    }

    #[test]
    fn wrong_stage_has_no_entry_point() {
        let err = reflect_shader(ShaderStage::Vertex, FRAGMENT).unwrap_err();
        match err {
            CoreError::ShaderCompile { stage, log } => {
                assert_eq!(stage, ShaderStage::Vertex);
                assert!(log.contains("entry point"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn struct_inputs_are_flattened() {
        let vs = reflect_shader(ShaderStage::Vertex, STRUCT_VS).unwrap();
        let names: Vec<_> = vs.attributes.iter().map(|a| (a.name.as_str(), a.location)).collect();
        assert_eq!(names, vec![("position", 0), ("uv", 1)]);
        assert_eq!(vs.attributes[1].format.components(), 2);
        assert_eq!(vs.outputs, vec![0]);
    }

    #[test]
    fn unmatched_fragment_input_fails_link() {
        let vs = reflect_shader(ShaderStage::Vertex, STRUCT_VS).unwrap();
        let fs_src = r#"
            @fragment
            fn main(@location(1) tint: vec4<f32>) -> @location(0) vec4<f32> {
                return tint;
            }
        "#;
        let fs = reflect_shader(ShaderStage::Fragment, fs_src).unwrap();
        let err = link(&vs, &fs).unwrap_err();
        assert!(matches!(err, CoreError::ProgramLink(ref log) if log.contains("@location(1)")));
    }

    #[test]
    fn swapped_stages_fail_link() {
        let vs = reflect_shader(ShaderStage::Vertex, VERTEX).unwrap();
        let fs = reflect_shader(ShaderStage::Fragment, FRAGMENT).unwrap();
        assert!(matches!(link(&fs, &vs), Err(CoreError::ProgramLink(_))));
    }

    #[test]
    fn conflicting_uniform_slots_fail_link() {
        let vs = reflect_shader(ShaderStage::Vertex, VERTEX).unwrap();
        let fs_src = r#"
            @group(0) @binding(0) var<uniform> tint: vec4<f32>;
            @fragment
            fn main() -> @location(0) vec4<f32> {
                return tint;
            }
        "#;
        let fs = reflect_shader(ShaderStage::Fragment, fs_src).unwrap();
        assert!(matches!(link(&vs, &fs), Err(CoreError::ProgramLink(_))));
    }
}
