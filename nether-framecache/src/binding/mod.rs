//! Per-draw resource binding.
//!
//! [`ProgramManager`] tracks the bound program, the current render parameter
//! values and texture units, and turns them into one descriptor set per draw.
//! Uniform blocks are written into a per-frame parameter ring; descriptor
//! sets come from a per-frame pool that is reset, not freed, when its slot
//! comes around again.


use anyhow::Context;
use glam::Vec4;
use nether_framecache_shared::{GeoHandle, RENDER_PARM_COUNT, RenderParm};
use smallvec::SmallVec;
use thiserror::Error;
use tracing::{debug, info};

use crate::buffer::{BufferError, BufferKind, BufferStore, BufferUsage, BufferView, align_up};
use crate::command::{CommandStream, RenderCommand};
use crate::config::{DescriptorConfig, FrameCacheConfig};
use crate::device::{
    DescriptorKind, DescriptorPoolId, DescriptorPoolSizes, DescriptorResource, DescriptorWrite,
    DeviceError, RenderDevice, TextureBinding,
};
use crate::error::fatal;
use crate::geometry::FrameGeometryCache;
use crate::pipeline::PipelineCache;
use crate::program::{ProgramError, ProgramRegistry, ShaderLibrary};

/// Uniform blocks a draw can bind: vertex parms, joints, fragment parms.
const MAX_DRAW_UNIFORM_BLOCKS: usize = 3;

/// Size of the zero-filled placeholder bound for absent joint data.
const EMPTY_UBO_BYTES: u64 = 16;

#[derive(Debug, Error)]
pub enum BindingError {
    #[error("no program is bound")]
    NoProgramBound,
    #[error("program {0} has no loaded shaders")]
    ProgramNotLoaded(usize),
    #[error("jointBuffer == NULL: joint handle {0:?} is not valid in this backend pass")]
    StaleJointHandle(GeoHandle),
    #[error("texture unit {unit} has no image bound")]
    MissingTexture { unit: usize },
    #[error("program '{program}' declares {expected} uniform blocks, {provided} available")]
    UniformBlockMismatch {
        program: String,
        expected: usize,
        provided: usize,
    },
    #[error("program '{program}' needs {writes} descriptor writes, limit is {limit}")]
    TooManyWrites {
        program: String,
        writes: usize,
        limit: u32,
    },
    #[error("parameter ring exhausted: {requested} bytes at offset {offset}, capacity {capacity}")]
    ParmRingExhausted {
        requested: u64,
        offset: u64,
        capacity: u64,
    },
    #[error("descriptor set limit of {0} per frame reached")]
    SetsExhausted(u32),
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Per-frame parameter rings.
///
/// Blocks are bump-allocated from the current slot's ring and live until the
/// slot is reused, so no handle packing is needed.
struct ParmRing {
    buffers: Vec<BufferStore>,
    offset: u64,
    capacity: u64,
    alignment: u64,
}

impl ParmRing {
    /// Write `parms` from `values` as consecutive vec4s and return a view of them.
    fn alloc_block<D: RenderDevice>(
        &mut self,
        device: &mut D,
        slot: usize,
        values: &[Vec4],
        parms: &[RenderParm],
    ) -> Result<BufferView, BindingError> {
        let size = (parms.len() * std::mem::size_of::<Vec4>()) as u64;
        if self.offset + size > self.capacity {
            return Err(BindingError::ParmRingExhausted {
                requested: size,
                offset: self.offset,
                capacity: self.capacity,
            });
        }

        let block: SmallVec<[Vec4; 32]> = parms.iter().map(|p| values[p.index()]).collect();
        let ring = &self.buffers[slot];
        ring.update(device, bytemuck::cast_slice(block.as_slice()), self.offset)?;
        let view = BufferStore::sub_range(ring, self.offset, size)?
            .view()
            .ok_or(BufferError::NotAllocated)?;

        self.offset += align_up(size, self.alignment);
        Ok(view)
    }
}

/// Binds programs and assembles their descriptor sets.
pub struct ProgramManager {
    registry: ProgramRegistry,
    pipelines: PipelineCache,
    limits: DescriptorConfig,
    pools: Vec<DescriptorPoolId>,
    ring: ParmRing,
    empty_ubo: BufferStore,
    counter: u64,
    slot: usize,
    sets_allocated: u32,
    current: Option<usize>,
    uniforms: Vec<Vec4>,
    textures: Vec<Option<TextureBinding>>,
    joint_handle: GeoHandle,
    print_pipeline_counts: bool,
}

impl ProgramManager {
    /// Create the per-frame pools and rings and load the built-in programs.
    pub fn new<D: RenderDevice>(
        device: &mut D,
        library: Box<dyn ShaderLibrary>,
        config: &FrameCacheConfig,
    ) -> anyhow::Result<Self> {
        let frames = config.geometry.frames_in_flight;
        let limits = config.descriptors.clone();
        let alignment = device.limits().min_uniform_buffer_offset_alignment.max(16);
        let capacity = config.parm_ring_bytes();

        let mut manager = Self {
            registry: ProgramRegistry::new(library),
            pipelines: PipelineCache::new(),
            limits,
            pools: Vec::with_capacity(frames),
            ring: ParmRing {
                buffers: Vec::with_capacity(frames),
                offset: 0,
                capacity,
                alignment,
            },
            empty_ubo: BufferStore::new(BufferKind::Uniform),
            counter: 0,
            slot: 0,
            sets_allocated: 0,
            current: None,
            uniforms: vec![Vec4::ZERO; RENDER_PARM_COUNT],
            textures: vec![None; config.descriptors.max_image_parms as usize],
            joint_handle: GeoHandle::NULL,
            print_pipeline_counts: config.diagnostics.print_pipeline_counts,
        };

        let sizes = DescriptorPoolSizes {
            max_sets: manager.limits.max_sets,
            uniform_buffers: manager.limits.max_uniform_buffers,
            image_samplers: manager.limits.max_image_samplers,
        };
        for _ in 0..frames {
            let pool = device
                .create_descriptor_pool(&sizes)
                .context("Failed to create descriptor pool")?;
            manager.pools.push(pool);

            let mut ring = BufferStore::new(BufferKind::Uniform);
            ring.alloc(device, None, capacity, BufferUsage::Dynamic)
                .context("Failed to allocate parameter ring")?;
            manager.ring.buffers.push(ring);
        }
        manager
            .empty_ubo
            .alloc(
                device,
                Some(&[0u8; EMPTY_UBO_BYTES as usize][..]),
                EMPTY_UBO_BYTES,
                BufferUsage::Dynamic,
            )
            .context("Failed to allocate placeholder uniform buffer")?;

        manager
            .registry
            .init_builtins(device)
            .context("Failed to load built-in programs")?;

        info!(
            "Program manager initialized: {} frames, {:.1} kB parameter ring per frame",
            frames,
            capacity as f64 / 1024.0
        );
        Ok(manager)
    }

    /// Destroy every pool, ring, pipeline and program.
    pub fn shutdown<D: RenderDevice>(&mut self, device: &mut D) {
        if self.print_pipeline_counts {
            self.pipelines.print_num_pipelines();
        }
        self.pipelines.clear_pipelines(device);
        self.registry.shutdown(device);
        for pool in self.pools.drain(..) {
            device.destroy_descriptor_pool(pool);
        }
        for ring in &mut self.ring.buffers {
            ring.free(device);
        }
        self.ring.buffers.clear();
        self.empty_ubo.free(device);
        self.current = None;
    }

    /// Start recording a frame. The caller has already waited for the GPU
    /// to finish with the slot.
    pub fn start_frame<D: RenderDevice>(&mut self, device: &mut D) {
        if self.pools.is_empty() {
            fatal("start_frame called on a shut down program manager");
        }
        self.counter += 1;
        self.slot = (self.counter % self.pools.len() as u64) as usize;
        self.sets_allocated = 0;
        self.ring.offset = 0;
        device.reset_descriptor_pool(self.pools[self.slot]);
    }

    pub fn bind_program(&mut self, program: usize) {
        if self.current == Some(program) {
            return;
        }
        let Some(record) = self.registry.program(program) else {
            fatal(format!("bind_program: program {program} does not exist"));
        };
        debug!("binding program {} ({})", program, record.name);
        self.current = Some(program);
    }

    /// Bind a built-in or previously created program by name.
    pub fn bind_program_named(&mut self, name: &str) -> Option<usize> {
        let program = self.registry.program_index(name)?;
        self.bind_program(program);
        Some(program)
    }

    pub fn unbind(&mut self) {
        self.current = None;
    }

    pub fn current_program(&self) -> Option<usize> {
        self.current
    }

    pub fn set_render_parm(&mut self, parm: RenderParm, value: Vec4) {
        self.uniforms[parm.index()] = value;
    }

    /// Set consecutive parameters starting at `first`. Values past the end
    /// of the table are dropped.
    pub fn set_render_parms(&mut self, first: RenderParm, values: &[Vec4]) {
        for (count, value) in values.iter().enumerate() {
            match first.offset(count) {
                Some(parm) => self.uniforms[parm.index()] = *value,
                None => break,
            }
        }
    }

    pub fn render_parm(&self, parm: RenderParm) -> Vec4 {
        self.uniforms[parm.index()]
    }

    /// Bind a texture to unit `unit`.
    pub fn set_texture(&mut self, unit: usize, texture: TextureBinding) {
        let Some(slot) = self.textures.get_mut(unit) else {
            fatal(format!(
                "texture unit {unit} exceeds max_image_parms ({})",
                self.limits.max_image_parms
            ));
        };
        *slot = Some(texture);
    }

    pub fn clear_textures(&mut self) {
        self.textures.fill(None);
    }

    /// Joint buffer for the next commit. `GeoHandle::NULL` disables skinning.
    pub fn set_joint_handle(&mut self, handle: GeoHandle) {
        self.joint_handle = handle;
    }

    pub fn joint_handle(&self) -> GeoHandle {
        self.joint_handle
    }

    /// Bind the current program's pipeline for `state_bits` and a descriptor
    /// set holding its uniform blocks and textures.
    pub fn commit_current<D: RenderDevice>(
        &mut self,
        device: &mut D,
        geometry: &FrameGeometryCache,
        state_bits: u64,
        commands: &mut CommandStream,
    ) -> Result<(), BindingError> {
        let program = self.current.ok_or(BindingError::NoProgramBound)?;
        let source = self
            .registry
            .pipeline_source(program)
            .ok_or(BindingError::ProgramNotLoaded(program))?;
        let pipeline = self
            .pipelines
            .get_pipeline(device, program, &source, state_bits)?;
        let layout = source.layout;

        let Some(record) = self.registry.program(program) else {
            return Err(BindingError::ProgramNotLoaded(program));
        };
        let set_layout = record
            .set_layout
            .ok_or(BindingError::ProgramNotLoaded(program))?;
        if record.bindings.len() > self.limits.max_set_writes as usize {
            return Err(BindingError::TooManyWrites {
                program: record.name.clone(),
                writes: record.bindings.len(),
                limit: self.limits.max_set_writes,
            });
        }
        // Everything that can fail without touching the pool or ring goes first.
        let (vertex_parms, fragment_parms) = self.registry.stage_parms(program);
        let joints = if record.uses_joints && !self.joint_handle.is_null() {
            Some(
                geometry
                    .get_joint_buffer(self.joint_handle)
                    .ok_or(BindingError::StaleJointHandle(self.joint_handle))?,
            )
        } else if record.optional_skinning {
            Some(self.empty_ubo.view().ok_or(BufferError::NotAllocated)?)
        } else {
            None
        };
        let images = record
            .bindings
            .iter()
            .filter(|b| matches!(b.kind, DescriptorKind::CombinedImageSampler))
            .count();
        if let Some(unit) =
            (0..images).find(|&unit| self.textures.get(unit).copied().flatten().is_none())
        {
            return Err(BindingError::MissingTexture { unit });
        }
        let expected = record.uniform_binding_count();
        let provided = usize::from(!vertex_parms.is_empty())
            + usize::from(joints.is_some())
            + usize::from(!fragment_parms.is_empty());
        if expected != provided {
            return Err(BindingError::UniformBlockMismatch {
                program: record.name.clone(),
                expected,
                provided,
            });
        }

        if self.sets_allocated >= self.limits.max_sets {
            return Err(BindingError::SetsExhausted(self.limits.max_sets));
        }
        let set = device.allocate_descriptor_set(self.pools[self.slot], set_layout)?;
        self.sets_allocated += 1;

        let mut ubos: SmallVec<[BufferView; MAX_DRAW_UNIFORM_BLOCKS]> = SmallVec::new();
        if !vertex_parms.is_empty() {
            ubos.push(
                self.ring
                    .alloc_block(device, self.slot, &self.uniforms, vertex_parms)?,
            );
        }
        ubos.extend(joints);
        if !fragment_parms.is_empty() {
            ubos.push(
                self.ring
                    .alloc_block(device, self.slot, &self.uniforms, fragment_parms)?,
            );
        }

        let mut writes: SmallVec<[DescriptorWrite; 8]> = SmallVec::new();
        let mut ubo_index = 0;
        let mut image_index = 0;
        for binding in &record.bindings {
            let resource = match binding.kind {
                DescriptorKind::UniformBuffer => {
                    let view = ubos[ubo_index];
                    ubo_index += 1;
                    DescriptorResource::UniformBuffer(view)
                }
                DescriptorKind::CombinedImageSampler => {
                    let texture = self
                        .textures
                        .get(image_index)
                        .copied()
                        .flatten()
                        .ok_or(BindingError::MissingTexture { unit: image_index })?;
                    image_index += 1;
                    DescriptorResource::ImageSampler(texture)
                }
            };
            writes.push(DescriptorWrite {
                binding: binding.binding,
                resource,
            });
        }
        device.update_descriptor_set(set, &writes)?;

        commands.push(RenderCommand::BindPipeline(pipeline));
        commands.push(RenderCommand::BindDescriptorSet { layout, set });
        Ok(())
    }

    /// Reload every shader; fatal on reflection mismatch is the caller's call.
    pub fn reload_shaders<D: RenderDevice>(&mut self, device: &mut D) -> Result<(), ProgramError> {
        self.registry.reload_shaders(device, &mut self.pipelines)
    }

    /// Destroy every cached pipeline so they are recreated on next use.
    pub fn clear_pipelines<D: RenderDevice>(&mut self, device: &mut D) {
        self.pipelines.clear_pipelines(device);
        info!("Cleared all pipelines");
    }

    pub fn print_num_pipelines(&self) {
        self.pipelines.print_num_pipelines();
    }

    pub fn print_pipeline_states(&self) {
        self.pipelines.print_pipeline_states();
    }

    pub fn registry(&self) -> &ProgramRegistry {
        &self.registry
    }

    /// Registry access for loading additional shaders and programs.
    pub fn registry_mut(&mut self) -> &mut ProgramRegistry {
        &mut self.registry
    }

    pub fn pipelines(&self) -> &PipelineCache {
        &self.pipelines
    }

    /// Slot whose pool and ring the current frame uses.
    pub fn frame_slot(&self) -> usize {
        self.slot
    }

    pub fn sets_allocated(&self) -> u32 {
        self.sets_allocated
    }

    /// Bytes of the current frame's parameter ring in use.
    pub fn parm_ring_used(&self) -> u64 {
        self.ring.offset
    }

    pub fn descriptor_pool(&self, slot: usize) -> Option<DescriptorPoolId> {
        self.pools.get(slot).copied()
    }

    pub fn empty_uniform_buffer(&self) -> Option<BufferView> {
        self.empty_ubo.view()
    }
}
