//! Shader reflection against the fixed parameter table.

use nether_framecache_shared::RenderParm;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A binding as reported by the shader compiler, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReflectedBinding {
    /// A uniform block; each member is one vec4 parameter.
    UniformBuffer { members: Vec<String> },
    /// A combined image sampler.
    Sampler {
        #[serde(default)]
        name: String,
    },
}

impl ReflectedBinding {
    pub fn uniform_buffer<S: Into<String>>(members: impl IntoIterator<Item = S>) -> Self {
        ReflectedBinding::UniformBuffer {
            members: members.into_iter().map(Into::into).collect(),
        }
    }

    pub fn sampler(name: &str) -> Self {
        ReflectedBinding::Sampler {
            name: name.to_string(),
        }
    }
}

/// Kind of one descriptor slot of a shader or program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    UniformBuffer,
    Sampler,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReflectionError {
    #[error("shader '{shader}': Invalid uniform {uniform}")]
    UnknownUniform { shader: String, uniform: String },
}

/// Binding kinds and parameter slots a shader uses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reflection {
    pub bindings: Vec<BindingKind>,
    pub parms: Vec<RenderParm>,
}

/// Resolve reflected bindings. Every uniform member must name a render parm.
pub fn reflect(shader: &str, bindings: &[ReflectedBinding]) -> Result<Reflection, ReflectionError> {
    let mut out = Reflection::default();
    for binding in bindings {
        match binding {
            ReflectedBinding::UniformBuffer { members } => {
                out.bindings.push(BindingKind::UniformBuffer);
                for member in members {
                    let parm = RenderParm::from_name(member).map_err(|unknown| {
                        ReflectionError::UnknownUniform {
                            shader: shader.to_string(),
                            uniform: unknown.0,
                        }
                    })?;
                    out.parms.push(parm);
                }
            }
            ReflectedBinding::Sampler { .. } => out.bindings.push(BindingKind::Sampler),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reflect_orders_bindings_and_parms() {
        let bindings = [
            ReflectedBinding::uniform_buffer(["rpMVPmatrixX", "rpMVPmatrixY", "rpColor"]),
            ReflectedBinding::sampler("diffuse"),
        ];
        let reflection = reflect("color", &bindings).unwrap();
        assert_eq!(
            reflection.bindings,
            vec![BindingKind::UniformBuffer, BindingKind::Sampler]
        );
        assert_eq!(
            reflection.parms,
            vec![RenderParm::MvpMatrixX, RenderParm::MvpMatrixY, RenderParm::Color]
        );
    }

    #[test]
    fn test_unknown_uniform_is_rejected() {
        let bindings = [ReflectedBinding::uniform_buffer(["rpColor", "rpColour"])];
        let err = reflect("typo", &bindings).unwrap_err();
        assert_eq!(
            err,
            ReflectionError::UnknownUniform {
                shader: "typo".to_string(),
                uniform: "rpColour".to_string(),
            }
        );
        assert_eq!(err.to_string(), "shader 'typo': Invalid uniform rpColour");
    }

    #[test]
    fn test_member_names_are_case_sensitive() {
        let bindings = [ReflectedBinding::uniform_buffer(["rpcolor"])];
        assert!(reflect("case", &bindings).is_err());
    }

    #[test]
    fn test_sidecar_toml_format() {
        #[derive(Deserialize)]
        struct Sidecar {
            bindings: Vec<ReflectedBinding>,
        }
        let sidecar: Sidecar = toml::from_str(
            r#"
[[bindings]]
kind = "uniform_buffer"
members = ["rpColor"]

[[bindings]]
kind = "sampler"
"#,
        )
        .unwrap();
        assert_eq!(
            sidecar.bindings,
            vec![
                ReflectedBinding::uniform_buffer(["rpColor"]),
                ReflectedBinding::sampler(""),
            ]
        );
    }
}
