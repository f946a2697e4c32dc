//! Pipeline objects cached per (program, state bits).

use tracing::{debug, info};

use super::VertexLayoutKind;
use crate::device::{
    DeviceError, PipelineDescription, PipelineId, PipelineLayoutId, RenderDevice, ShaderModuleId,
};
use crate::render_state::{PipelineState, describe_state};

/// One compiled pipeline and the state it was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedPipeline {
    pub state_bits: u64,
    pub pipeline: PipelineId,
}

/// What a program contributes to pipeline creation.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSource<'a> {
    pub name: &'a str,
    pub layout: PipelineLayoutId,
    pub vertex_layout: VertexLayoutKind,
    pub vertex_module: ShaderModuleId,
    pub fragment_module: Option<ShaderModuleId>,
}

#[derive(Debug, Default)]
struct ProgramPipelines {
    name: String,
    entries: Vec<CachedPipeline>,
}

/// Append-only pipeline lists, one per program index.
#[derive(Debug, Default)]
pub struct PipelineCache {
    programs: Vec<ProgramPipelines>,
}

impl PipelineCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, program: usize, name: &str) -> &mut ProgramPipelines {
        if program >= self.programs.len() {
            self.programs.resize_with(program + 1, ProgramPipelines::default);
        }
        let slot = &mut self.programs[program];
        if slot.name != name {
            slot.name = name.to_string();
        }
        slot
    }

    /// Return the pipeline for `state_bits`, creating it on first use.
    pub fn get_pipeline<D: RenderDevice>(
        &mut self,
        device: &mut D,
        program: usize,
        source: &PipelineSource<'_>,
        state_bits: u64,
    ) -> Result<PipelineId, DeviceError> {
        let slot = self.slot(program, source.name);
        if let Some(cached) = slot.entries.iter().find(|c| c.state_bits == state_bits) {
            return Ok(cached.pipeline);
        }

        let pipeline = device.create_pipeline(&PipelineDescription {
            label: source.name,
            layout: source.layout,
            vertex_layout: source.vertex_layout.layout(),
            vertex_module: source.vertex_module,
            fragment_module: source.fragment_module,
            state: PipelineState::from_bits(state_bits),
        })?;
        slot.entries.push(CachedPipeline {
            state_bits,
            pipeline,
        });
        debug!(
            "created pipeline {} for program '{}' state {:#018x} ({} cached)",
            pipeline.0,
            source.name,
            state_bits,
            slot.entries.len()
        );
        Ok(pipeline)
    }

    /// Cached pipelines of one program.
    pub fn entries(&self, program: usize) -> &[CachedPipeline] {
        self.programs
            .get(program)
            .map(|p| p.entries.as_slice())
            .unwrap_or(&[])
    }

    /// Destroy the pipelines of one program.
    pub fn clear_program<D: RenderDevice>(&mut self, device: &mut D, program: usize) {
        if let Some(slot) = self.programs.get_mut(program) {
            for cached in slot.entries.drain(..) {
                device.destroy_pipeline(cached.pipeline);
            }
        }
    }

    /// Destroy every cached pipeline.
    pub fn clear_pipelines<D: RenderDevice>(&mut self, device: &mut D) {
        for program in 0..self.programs.len() {
            self.clear_program(device, program);
        }
    }

    pub fn total(&self) -> usize {
        self.programs.iter().map(|p| p.entries.len()).sum()
    }

    /// `(program name, pipeline count)` for every program with pipelines.
    pub fn pipeline_counts(&self) -> Vec<(String, usize)> {
        self.programs
            .iter()
            .filter(|p| !p.entries.is_empty())
            .map(|p| (p.name.clone(), p.entries.len()))
            .collect()
    }

    pub fn print_num_pipelines(&self) {
        info!("----------------");
        info!("Number of Pipelines:");
        for (name, count) in self.pipeline_counts() {
            info!("{:>24}: {}", name, count);
        }
        info!("{:>24}: {}", "TOTAL", self.total());
    }

    pub fn print_pipeline_states(&self) {
        for program in &self.programs {
            for cached in &program.entries {
                info!("{}: {:#018x}", program.name, cached.state_bits);
                for line in describe_state(cached.state_bits).lines() {
                    info!("    {}", line);
                }
            }
        }
    }
}
