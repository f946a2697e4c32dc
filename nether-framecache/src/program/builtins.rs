//! Built-in programs registered at init.

use crate::device::ShaderStage;
use crate::pipeline::VertexLayoutKind;

use super::reflection::ReflectedBinding;

/// A program every renderer needs, created eagerly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinProgram {
    pub name: &'static str,
    pub vertex: &'static str,
    /// Depth-only programs have no fragment shader.
    pub fragment: Option<&'static str>,
    pub layout: VertexLayoutKind,
}

const fn both(name: &'static str, layout: VertexLayoutKind) -> BuiltinProgram {
    BuiltinProgram {
        name,
        vertex: name,
        fragment: Some(name),
        layout,
    }
}

const fn vertex_only(name: &'static str, layout: VertexLayoutKind) -> BuiltinProgram {
    BuiltinProgram {
        name,
        vertex: name,
        fragment: None,
        layout,
    }
}

pub const BUILTIN_PROGRAMS: [BuiltinProgram; 8] = [
    both("gui", VertexLayoutKind::DrawVert),
    both("color", VertexLayoutKind::DrawVert),
    both("texture_color", VertexLayoutKind::DrawVert),
    both("texture_color_alphatest", VertexLayoutKind::DrawVert),
    both("interaction", VertexLayoutKind::DrawVert),
    vertex_only("depth", VertexLayoutKind::DrawVert),
    vertex_only("shadow", VertexLayoutKind::DrawShadowVert),
    both("shadowDebug", VertexLayoutKind::DrawShadowVert),
];

const MVP: [&str; 4] = ["rpMVPmatrixX", "rpMVPmatrixY", "rpMVPmatrixZ", "rpMVPmatrixW"];

fn mvp_with(extra: &[&str]) -> ReflectedBinding {
    ReflectedBinding::uniform_buffer(MVP.iter().chain(extra).copied())
}

/// Reflection the stock shaders report.
pub fn builtin_reflection(name: &str, stage: ShaderStage) -> Option<Vec<ReflectedBinding>> {
    let bindings = match (name, stage) {
        ("gui", ShaderStage::Vertex) => vec![mvp_with(&[])],
        ("gui", ShaderStage::Fragment) => vec![ReflectedBinding::sampler("gui")],
        ("color", ShaderStage::Vertex) => vec![mvp_with(&["rpColor"])],
        ("color", ShaderStage::Fragment) => vec![],
        ("texture_color", ShaderStage::Vertex) | ("texture_color_alphatest", ShaderStage::Vertex) => {
            vec![mvp_with(&["rpTextureMatrixS", "rpTextureMatrixT", "rpColor"])]
        }
        ("texture_color", ShaderStage::Fragment) => vec![ReflectedBinding::sampler("image")],
        ("texture_color_alphatest", ShaderStage::Fragment) => vec![
            ReflectedBinding::uniform_buffer(["rpAlphaTest"]),
            ReflectedBinding::sampler("image"),
        ],
        ("interaction", ShaderStage::Vertex) => vec![ReflectedBinding::uniform_buffer(
            [
                "rpLocalLightOrigin",
                "rpLocalViewOrigin",
                "rpLightProjectionS",
                "rpLightProjectionT",
                "rpLightProjectionQ",
                "rpLightFalloffS",
                "rpBumpMatrixS",
                "rpBumpMatrixT",
                "rpDiffuseMatrixS",
                "rpDiffuseMatrixT",
                "rpSpecularMatrixS",
                "rpSpecularMatrixT",
                "rpVertexColorModulate",
                "rpVertexColorAdd",
            ]
            .into_iter()
            .chain(MVP),
        )],
        ("interaction", ShaderStage::Fragment) => vec![
            ReflectedBinding::uniform_buffer(["rpDiffuseModifier", "rpSpecularModifier"]),
            ReflectedBinding::sampler("bump"),
            ReflectedBinding::sampler("falloff"),
            ReflectedBinding::sampler("projection"),
            ReflectedBinding::sampler("diffuse"),
            ReflectedBinding::sampler("specular"),
        ],
        ("depth", ShaderStage::Vertex) => vec![mvp_with(&[])],
        ("shadow", ShaderStage::Vertex) | ("shadowDebug", ShaderStage::Vertex) => {
            vec![ReflectedBinding::uniform_buffer(
                ["rpLocalLightOrigin"].into_iter().chain(MVP),
            )]
        }
        ("shadowDebug", ShaderStage::Fragment) => vec![ReflectedBinding::uniform_buffer(["rpColor"])],
        _ => return None,
    };
    Some(bindings)
}

/// Minimal WGSL with the expected entry points.
pub fn builtin_source(stage: ShaderStage, layout: VertexLayoutKind) -> String {
    match (stage, layout) {
        (ShaderStage::Vertex, VertexLayoutKind::DrawVert) => "@vertex\n\
             fn MainVs(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {\n\
             \x20   return vec4<f32>(position, 1.0);\n\
             }\n"
            .to_string(),
        (ShaderStage::Vertex, VertexLayoutKind::DrawShadowVert) => "@vertex\n\
             fn MainVs(@location(0) position: vec4<f32>) -> @builtin(position) vec4<f32> {\n\
             \x20   return position;\n\
             }\n"
            .to_string(),
        (ShaderStage::Fragment, _) => "@fragment\n\
             fn MainPs() -> @location(0) vec4<f32> {\n\
             \x20   return vec4<f32>(1.0, 1.0, 1.0, 1.0);\n\
             }\n"
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::reflection::reflect;

    #[test]
    fn test_every_builtin_has_reflection() {
        for program in BUILTIN_PROGRAMS {
            assert!(builtin_reflection(program.vertex, ShaderStage::Vertex).is_some());
            if let Some(fragment) = program.fragment {
                assert!(builtin_reflection(fragment, ShaderStage::Fragment).is_some());
            }
        }
    }

    #[test]
    fn test_builtin_reflection_resolves() {
        for program in BUILTIN_PROGRAMS {
            let bindings = builtin_reflection(program.vertex, ShaderStage::Vertex).unwrap();
            assert!(reflect(program.vertex, &bindings).is_ok(), "{}", program.name);
        }
    }

    #[test]
    fn test_shadow_programs_use_shadow_layout() {
        let shadow: Vec<_> = BUILTIN_PROGRAMS
            .iter()
            .filter(|p| p.layout == VertexLayoutKind::DrawShadowVert)
            .map(|p| p.name)
            .collect();
        assert_eq!(shadow, vec!["shadow", "shadowDebug"]);
    }

    #[test]
    fn test_source_has_entry_points() {
        assert!(builtin_source(ShaderStage::Vertex, VertexLayoutKind::DrawVert).contains("fn MainVs"));
        assert!(builtin_source(ShaderStage::Fragment, VertexLayoutKind::DrawVert).contains("fn MainPs"));
    }
}
