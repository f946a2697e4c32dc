//! Shader sources and their reflection.
//!
//! Compiling shaders is someone else's job; the registry only asks a
//! [`ShaderLibrary`] for source plus already-reflected bindings.

use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use super::builtins::{BUILTIN_PROGRAMS, builtin_reflection, builtin_source};
use super::reflection::ReflectedBinding;
use crate::device::ShaderStage;

/// Output of the external shader compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledShader {
    pub source: String,
    pub bindings: Vec<ReflectedBinding>,
}

#[derive(Debug, Error)]
pub enum ShaderLoadError {
    #[error("shader '{name}' ({stage:?}) not found")]
    NotFound { name: String, stage: ShaderStage },
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid reflection file {path}: {source}")]
    Reflection {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

pub trait ShaderLibrary {
    /// Load shader `name` for `stage`. `name` has no extension.
    fn load(&self, name: &str, stage: ShaderStage) -> Result<CompiledShader, ShaderLoadError>;
}

/// In-memory shader library.
#[derive(Debug, Clone, Default)]
pub struct MemoryShaderLibrary {
    shaders: HashMap<(String, ShaderStage), CompiledShader>,
}

impl MemoryShaderLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Library containing every built-in program's shaders.
    pub fn with_builtins() -> Self {
        let mut library = Self::new();
        for program in BUILTIN_PROGRAMS {
            let stages = std::iter::once((program.vertex, ShaderStage::Vertex))
                .chain(program.fragment.map(|f| (f, ShaderStage::Fragment)));
            for (name, stage) in stages {
                if let Some(bindings) = builtin_reflection(name, stage) {
                    library.insert(
                        name,
                        stage,
                        CompiledShader {
                            source: builtin_source(stage, program.layout),
                            bindings,
                        },
                    );
                }
            }
        }
        library
    }

    /// Add or replace a shader. Lookups are case-insensitive.
    pub fn insert(&mut self, name: &str, stage: ShaderStage, shader: CompiledShader) {
        self.shaders.insert((name.to_lowercase(), stage), shader);
    }
}

impl ShaderLibrary for MemoryShaderLibrary {
    fn load(&self, name: &str, stage: ShaderStage) -> Result<CompiledShader, ShaderLoadError> {
        self.shaders
            .get(&(name.to_lowercase(), stage))
            .cloned()
            .ok_or_else(|| ShaderLoadError::NotFound {
                name: name.to_string(),
                stage,
            })
    }
}

#[derive(Deserialize)]
struct ReflectionFile {
    #[serde(default)]
    bindings: Vec<ReflectedBinding>,
}

/// Reads `<name>.<vs|ps>.wgsl` with an optional `<name>.<vs|ps>.toml`
/// reflection sidecar from a directory.
#[derive(Debug, Clone)]
pub struct DirectoryShaderLibrary {
    root: PathBuf,
}

impl DirectoryShaderLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str, stage: ShaderStage, extension: &str) -> PathBuf {
        self.root
            .join(format!("{}.{}.{}", name, stage.suffix(), extension))
    }
}

impl ShaderLibrary for DirectoryShaderLibrary {
    fn load(&self, name: &str, stage: ShaderStage) -> Result<CompiledShader, ShaderLoadError> {
        let source_path = self.path(name, stage, "wgsl");
        let source = match std::fs::read_to_string(&source_path) {
            Ok(source) => source,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ShaderLoadError::NotFound {
                    name: name.to_string(),
                    stage,
                });
            }
            Err(source) => {
                return Err(ShaderLoadError::Io {
                    path: source_path,
                    source,
                });
            }
        };

        let sidecar_path = self.path(name, stage, "toml");
        let bindings = match std::fs::read_to_string(&sidecar_path) {
            Ok(text) => {
                let file: ReflectionFile =
                    toml::from_str(&text).map_err(|source| ShaderLoadError::Reflection {
                        path: sidecar_path.clone(),
                        source,
                    })?;
                file.bindings
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(source) => {
                return Err(ShaderLoadError::Io {
                    path: sidecar_path,
                    source,
                });
            }
        };

        debug!("loaded shader {} ({} bindings)", source_path.display(), bindings.len());
        Ok(CompiledShader { source, bindings })
    }
}
