//! Shader and program registry.
//!
//! Shaders are loaded from a [`ShaderLibrary`] on first use and reflected
//! against the render parameter table. A program pairs a vertex shader with
//! an optional fragment shader and owns the descriptor set layout derived
//! from their bindings: vertex bindings first, then fragment bindings,
//! numbered sequentially from zero.

mod builtins;
mod library;
mod reflection;

pub use builtins::{BUILTIN_PROGRAMS, BuiltinProgram, builtin_reflection, builtin_source};
pub use library::{CompiledShader, DirectoryShaderLibrary, MemoryShaderLibrary, ShaderLibrary, ShaderLoadError};
pub use reflection::{BindingKind, Reflection, ReflectedBinding, ReflectionError, reflect};

use nether_framecache_shared::RenderParm;
use thiserror::Error;
use tracing::{debug, info};

use crate::device::{
    DescriptorBinding, DescriptorKind, DescriptorSetLayoutId, DeviceError, PipelineLayoutId,
    RenderDevice, ShaderModuleId, ShaderStage,
};
use crate::pipeline::{PipelineCache, PipelineSource, VertexLayoutKind};

/// Vertex shaders that read the joint buffer when one is bound and the
/// placeholder otherwise.
const OPTIONAL_SKINNING_SHADERS: [&str; 3] = ["heatHaze", "heatHazeWithMask", "heatHazeWithMaskAndVertex"];

#[derive(Debug, Error)]
pub enum ProgramError {
    #[error(transparent)]
    Load(#[from] ShaderLoadError),
    #[error(transparent)]
    Reflection(#[from] ReflectionError),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// A loaded shader stage.
#[derive(Debug, Clone)]
pub struct ShaderRecord {
    pub name: String,
    pub stage: ShaderStage,
    pub module: Option<ShaderModuleId>,
    pub bindings: Vec<BindingKind>,
    /// Parameters written into this stage's uniform block, in member order.
    pub parms: Vec<RenderParm>,
}

/// A vertex/fragment pair plus its binding layout.
#[derive(Debug, Clone)]
pub struct ProgramRecord {
    pub name: String,
    pub vertex_shader: usize,
    pub fragment_shader: Option<usize>,
    pub vertex_layout: VertexLayoutKind,
    pub bindings: Vec<DescriptorBinding>,
    pub set_layout: Option<DescriptorSetLayoutId>,
    pub pipeline_layout: Option<PipelineLayoutId>,
    pub uses_joints: bool,
    pub optional_skinning: bool,
}

impl ProgramRecord {
    pub fn uniform_binding_count(&self) -> usize {
        self.bindings
            .iter()
            .filter(|b| b.kind == DescriptorKind::UniformBuffer)
            .count()
    }
}

/// Registry of every shader and program the renderer has seen.
pub struct ProgramRegistry {
    library: Box<dyn ShaderLibrary>,
    shaders: Vec<ShaderRecord>,
    programs: Vec<ProgramRecord>,
}

fn strip_extension(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

impl ProgramRegistry {
    pub fn new(library: Box<dyn ShaderLibrary>) -> Self {
        Self {
            library,
            shaders: Vec::new(),
            programs: Vec::new(),
        }
    }

    /// Load and register every built-in program, in [`BUILTIN_PROGRAMS`] order.
    pub fn init_builtins<D: RenderDevice>(&mut self, device: &mut D) -> Result<(), ProgramError> {
        for builtin in BUILTIN_PROGRAMS {
            let vertex = self.find_shader(device, builtin.vertex, ShaderStage::Vertex)?;
            let fragment = builtin
                .fragment
                .map(|name| self.find_shader(device, name, ShaderStage::Fragment))
                .transpose()?;
            self.create_program(device, builtin.name, vertex, fragment, builtin.layout)?;
        }
        info!(
            "registered {} built-in programs ({} shaders)",
            BUILTIN_PROGRAMS.len(),
            self.shaders.len()
        );
        Ok(())
    }

    /// Index of shader `name` for `stage`, loading it on first use.
    ///
    /// Matching ignores case and any file extension.
    pub fn find_shader<D: RenderDevice>(
        &mut self,
        device: &mut D,
        name: &str,
        stage: ShaderStage,
    ) -> Result<usize, ProgramError> {
        let name = strip_extension(name);
        if let Some(index) = self
            .shaders
            .iter()
            .position(|s| s.stage == stage && s.name.eq_ignore_ascii_case(name))
        {
            return Ok(index);
        }

        let mut record = ShaderRecord {
            name: name.to_string(),
            stage,
            module: None,
            bindings: Vec::new(),
            parms: Vec::new(),
        };
        self.load_shader(device, &mut record)?;
        self.shaders.push(record);
        Ok(self.shaders.len() - 1)
    }

    fn load_shader<D: RenderDevice>(
        &self,
        device: &mut D,
        record: &mut ShaderRecord,
    ) -> Result<(), ProgramError> {
        let compiled = self.library.load(&record.name, record.stage)?;
        let reflection = reflect(&record.name, &compiled.bindings)?;
        let label = format!("{}.{}", record.name, record.stage.suffix());
        let module = device.create_shader_module(&label, record.stage, &compiled.source)?;
        debug!(
            "loaded shader {} ({} bindings, {} parms)",
            label,
            reflection.bindings.len(),
            reflection.parms.len()
        );
        record.module = Some(module);
        record.bindings = reflection.bindings;
        record.parms = reflection.parms;
        Ok(())
    }

    /// Index of the program pairing `vertex` with `fragment`, creating it
    /// with the standard vertex layout when missing.
    pub fn find_program<D: RenderDevice>(
        &mut self,
        device: &mut D,
        name: &str,
        vertex: usize,
        fragment: Option<usize>,
    ) -> Result<usize, ProgramError> {
        if let Some(index) = self
            .programs
            .iter()
            .position(|p| p.vertex_shader == vertex && p.fragment_shader == fragment)
        {
            return Ok(index);
        }
        self.create_program(device, name, vertex, fragment, VertexLayoutKind::DrawVert)
    }

    fn create_program<D: RenderDevice>(
        &mut self,
        device: &mut D,
        name: &str,
        vertex: usize,
        fragment: Option<usize>,
        vertex_layout: VertexLayoutKind,
    ) -> Result<usize, ProgramError> {
        let optional_skinning = OPTIONAL_SKINNING_SHADERS
            .iter()
            .any(|n| n.eq_ignore_ascii_case(&self.shaders[vertex].name));

        let mut program = ProgramRecord {
            name: name.to_string(),
            vertex_shader: vertex,
            fragment_shader: fragment,
            vertex_layout,
            bindings: Vec::new(),
            set_layout: None,
            pipeline_layout: None,
            uses_joints: optional_skinning,
            optional_skinning,
        };
        self.build_layout(device, &mut program)?;
        debug!(
            "created program '{}' ({} bindings{})",
            program.name,
            program.bindings.len(),
            if optional_skinning { ", optional skinning" } else { "" }
        );
        self.programs.push(program);
        Ok(self.programs.len() - 1)
    }

    fn build_layout<D: RenderDevice>(
        &self,
        device: &mut D,
        program: &mut ProgramRecord,
    ) -> Result<(), ProgramError> {
        let stages = std::iter::once(program.vertex_shader).chain(program.fragment_shader);
        program.bindings = stages
            .flat_map(|index| {
                let shader = &self.shaders[index];
                shader.bindings.iter().map(move |kind| (shader.stage, *kind))
            })
            .enumerate()
            .map(|(binding, (stage, kind))| DescriptorBinding {
                binding: binding as u32,
                kind: match kind {
                    BindingKind::UniformBuffer => DescriptorKind::UniformBuffer,
                    BindingKind::Sampler => DescriptorKind::CombinedImageSampler,
                },
                stage,
            })
            .collect();

        let set_layout = device.create_descriptor_set_layout(&program.bindings)?;
        let pipeline_layout = match device.create_pipeline_layout(set_layout) {
            Ok(layout) => layout,
            Err(err) => {
                device.destroy_descriptor_set_layout(set_layout);
                return Err(err.into());
            }
        };
        program.set_layout = Some(set_layout);
        program.pipeline_layout = Some(pipeline_layout);
        Ok(())
    }

    fn destroy_layout<D: RenderDevice>(device: &mut D, program: &mut ProgramRecord) {
        if let Some(layout) = program.pipeline_layout.take() {
            device.destroy_pipeline_layout(layout);
        }
        if let Some(layout) = program.set_layout.take() {
            device.destroy_descriptor_set_layout(layout);
        }
        program.bindings.clear();
    }

    /// Reload every shader from the library and rebuild every program.
    ///
    /// Cached pipelines are destroyed since they reference the old modules.
    pub fn reload_shaders<D: RenderDevice>(
        &mut self,
        device: &mut D,
        pipelines: &mut PipelineCache,
    ) -> Result<(), ProgramError> {
        info!("reloading {} shaders", self.shaders.len());
        pipelines.clear_pipelines(device);

        let mut shaders = std::mem::take(&mut self.shaders);
        let mut result = Ok(());
        for shader in &mut shaders {
            if let Some(module) = shader.module.take() {
                device.destroy_shader_module(module);
            }
            if result.is_ok() {
                result = self.load_shader(device, shader);
            }
        }
        self.shaders = shaders;
        result?;

        let mut result = Ok(());
        let mut programs = std::mem::take(&mut self.programs);
        for program in &mut programs {
            Self::destroy_layout(device, program);
            if result.is_ok() {
                result = self.build_layout(device, program);
            }
        }
        self.programs = programs;
        result
    }

    /// Destroy every native object the registry created.
    pub fn shutdown<D: RenderDevice>(&mut self, device: &mut D) {
        for program in &mut self.programs {
            Self::destroy_layout(device, program);
        }
        for shader in &mut self.shaders {
            if let Some(module) = shader.module.take() {
                device.destroy_shader_module(module);
            }
        }
        self.programs.clear();
        self.shaders.clear();
    }

    pub fn program(&self, index: usize) -> Option<&ProgramRecord> {
        self.programs.get(index)
    }

    pub fn shader(&self, index: usize) -> Option<&ShaderRecord> {
        self.shaders.get(index)
    }

    /// Index of the first program named `name`.
    pub fn program_index(&self, name: &str) -> Option<usize> {
        self.programs.iter().position(|p| p.name == name)
    }

    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    pub fn shader_count(&self) -> usize {
        self.shaders.len()
    }

    /// Uniform parameters of a program's vertex and fragment stages.
    pub fn stage_parms(&self, program: usize) -> (&[RenderParm], &[RenderParm]) {
        let Some(record) = self.programs.get(program) else {
            return (&[], &[]);
        };
        let vertex = &self.shaders[record.vertex_shader].parms;
        let fragment = record
            .fragment_shader
            .map(|f| self.shaders[f].parms.as_slice())
            .unwrap_or(&[]);
        (vertex, fragment)
    }

    /// Everything the pipeline cache needs to build pipelines for `program`.
    ///
    /// `None` for unknown programs and programs whose modules or layout are
    /// not loaded.
    pub fn pipeline_source(&self, program: usize) -> Option<PipelineSource<'_>> {
        let record = self.programs.get(program)?;
        let vertex_module = self.shaders[record.vertex_shader].module?;
        let fragment_module = match record.fragment_shader {
            Some(index) => Some(self.shaders[index].module?),
            None => None,
        };
        Some(PipelineSource {
            name: &record.name,
            layout: record.pipeline_layout?,
            vertex_layout: record.vertex_layout,
            vertex_module,
            fragment_module,
        })
    }
}
