//! In-memory render device.
//!
//! Backs every native object with host memory and records submitted command
//! streams. Used by the test suite and the headless simulator.

use hashbrown::HashMap;
use tracing::{debug, trace};

use super::{
    BufferDescriptor, BufferId, BufferKind, BufferUsage, DescriptorBinding, DescriptorKind,
    DescriptorPoolId, DescriptorPoolSizes, DescriptorResource, DescriptorSetId,
    DescriptorSetLayoutId, DescriptorWrite, DeviceError, DeviceLimits, MemoryId, NativeBuffer,
    PipelineDescription, PipelineId, PipelineLayoutId, RenderDevice, SamplerId, ShaderModuleId,
    ShaderStage, TextureBinding, TextureViewId,
};
use crate::command::CommandStream;
use crate::render_state::PipelineState;

struct HostMemory {
    bytes: Vec<u8>,
    mapped: bool,
}

struct HostBuffer {
    memory: MemoryId,
    kind: BufferKind,
    usage: BufferUsage,
}

struct HostPool {
    sizes: DescriptorPoolSizes,
    sets: u32,
    uniform_buffers: u32,
    image_samplers: u32,
}

struct HostDescriptorSet {
    pool: DescriptorPoolId,
    layout: DescriptorSetLayoutId,
    writes: Vec<DescriptorWrite>,
}

struct HostPipeline {
    layout: PipelineLayoutId,
    state: PipelineState,
    has_fragment: bool,
}

/// One recorded `submit` call.
#[derive(Debug, Clone)]
pub struct Submission {
    pub slot: usize,
    pub commands: CommandStream,
}

/// Render device backed by host memory.
pub struct HostDevice {
    limits: DeviceLimits,
    next_id: u32,
    memory: HashMap<MemoryId, HostMemory>,
    buffers: HashMap<BufferId, HostBuffer>,
    shader_modules: HashMap<ShaderModuleId, ShaderStage>,
    set_layouts: HashMap<DescriptorSetLayoutId, Vec<DescriptorBinding>>,
    pipeline_layouts: HashMap<PipelineLayoutId, DescriptorSetLayoutId>,
    pipelines: HashMap<PipelineId, HostPipeline>,
    pools: HashMap<DescriptorPoolId, HostPool>,
    sets: HashMap<DescriptorSetId, HostDescriptorSet>,
    submissions: Vec<Submission>,
    buffers_destroyed: u64,
    pipelines_created: u64,
    slot_waits: u64,
}

impl Default for HostDevice {
    fn default() -> Self {
        Self::new(DeviceLimits::default())
    }
}

impl HostDevice {
    pub fn new(limits: DeviceLimits) -> Self {
        Self {
            limits,
            next_id: 1,
            memory: HashMap::new(),
            buffers: HashMap::new(),
            shader_modules: HashMap::new(),
            set_layouts: HashMap::new(),
            pipeline_layouts: HashMap::new(),
            pipelines: HashMap::new(),
            pools: HashMap::new(),
            sets: HashMap::new(),
            submissions: Vec::new(),
            buffers_destroyed: 0,
            pipelines_created: 0,
            slot_waits: 0,
        }
    }

    fn next(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Register a texture view and sampler pair for sampler bindings.
    pub fn register_texture(&mut self) -> TextureBinding {
        let view = TextureViewId(self.next());
        let sampler = SamplerId(self.next());
        TextureBinding { view, sampler }
    }

    /// Contents of a buffer's memory, or `None` once destroyed.
    pub fn buffer_bytes(&self, buffer: BufferId) -> Option<&[u8]> {
        let memory = self.buffers.get(&buffer)?.memory;
        self.memory.get(&memory).map(|m| m.bytes.as_slice())
    }

    pub fn buffer_kind(&self, buffer: BufferId) -> Option<(BufferKind, BufferUsage)> {
        self.buffers.get(&buffer).map(|b| (b.kind, b.usage))
    }

    pub fn is_buffer_live(&self, buffer: BufferId) -> bool {
        self.buffers.contains_key(&buffer)
    }

    pub fn is_memory_mapped(&self, memory: MemoryId) -> bool {
        self.memory.get(&memory).is_some_and(|m| m.mapped)
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn buffers_destroyed(&self) -> u64 {
        self.buffers_destroyed
    }

    pub fn live_pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    /// Total pipelines ever created, including destroyed ones.
    pub fn pipelines_created(&self) -> u64 {
        self.pipelines_created
    }

    pub fn pipeline_state(&self, pipeline: PipelineId) -> Option<PipelineState> {
        self.pipelines.get(&pipeline).map(|p| p.state)
    }

    pub fn pipeline_layout_of(&self, pipeline: PipelineId) -> Option<PipelineLayoutId> {
        self.pipelines.get(&pipeline).map(|p| p.layout)
    }

    pub fn pipeline_has_fragment(&self, pipeline: PipelineId) -> Option<bool> {
        self.pipelines.get(&pipeline).map(|p| p.has_fragment)
    }

    pub fn set_layout_bindings(&self, layout: DescriptorSetLayoutId) -> Option<&[DescriptorBinding]> {
        self.set_layouts.get(&layout).map(Vec::as_slice)
    }

    pub fn live_shader_module_count(&self) -> usize {
        self.shader_modules.len()
    }

    pub fn descriptor_writes(&self, set: DescriptorSetId) -> Option<&[DescriptorWrite]> {
        self.sets.get(&set).map(|s| s.writes.as_slice())
    }

    /// Number of sets currently allocated from `pool`.
    pub fn allocated_sets(&self, pool: DescriptorPoolId) -> Option<u32> {
        self.pools.get(&pool).map(|p| p.sets)
    }

    pub fn submissions(&self) -> &[Submission] {
        &self.submissions
    }

    pub fn slot_waits(&self) -> u64 {
        self.slot_waits
    }
}

impl RenderDevice for HostDevice {
    fn name(&self) -> &'static str {
        "host"
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor<'_>) -> Result<NativeBuffer, DeviceError> {
        let len = usize::try_from(desc.size).map_err(|_| DeviceError::OutOfMemory(desc.size))?;
        let memory = MemoryId(self.next());
        let buffer = BufferId(self.next());
        self.memory.insert(
            memory,
            HostMemory {
                bytes: vec![0; len],
                mapped: false,
            },
        );
        self.buffers.insert(
            buffer,
            HostBuffer {
                memory,
                kind: desc.kind,
                usage: desc.usage,
            },
        );
        trace!("host: created {} buffer '{}' ({} bytes)", desc.kind, desc.label, desc.size);
        Ok(NativeBuffer { buffer, memory })
    }

    fn destroy_buffer(&mut self, buffer: NativeBuffer) {
        if self.buffers.remove(&buffer.buffer).is_some() {
            self.memory.remove(&buffer.memory);
            self.buffers_destroyed += 1;
        }
    }

    fn map_memory(
        &mut self,
        memory: MemoryId,
        offset: u64,
        size: u64,
    ) -> Result<&mut [u8], DeviceError> {
        let mem = self.memory.get_mut(&memory).ok_or(DeviceError::InvalidHandle {
            kind: "memory",
            id: memory.0,
        })?;
        if mem.mapped {
            return Err(DeviceError::AlreadyMapped(memory.0));
        }
        let capacity = mem.bytes.len() as u64;
        let end = offset.checked_add(size).filter(|end| *end <= capacity).ok_or(
            DeviceError::MapOutOfRange {
                offset,
                size,
                capacity,
            },
        )?;
        mem.mapped = true;
        Ok(&mut mem.bytes[offset as usize..end as usize])
    }

    fn unmap_memory(&mut self, memory: MemoryId) {
        if let Some(mem) = self.memory.get_mut(&memory) {
            mem.mapped = false;
        }
    }

    fn create_shader_module(
        &mut self,
        label: &str,
        stage: ShaderStage,
        source: &str,
    ) -> Result<ShaderModuleId, DeviceError> {
        if source.trim().is_empty() {
            return Err(DeviceError::Backend(format!("shader '{label}' has no source")));
        }
        let id = ShaderModuleId(self.next());
        self.shader_modules.insert(id, stage);
        Ok(id)
    }

    fn destroy_shader_module(&mut self, module: ShaderModuleId) {
        self.shader_modules.remove(&module);
    }

    fn create_descriptor_set_layout(
        &mut self,
        bindings: &[DescriptorBinding],
    ) -> Result<DescriptorSetLayoutId, DeviceError> {
        let id = DescriptorSetLayoutId(self.next());
        self.set_layouts.insert(id, bindings.to_vec());
        Ok(id)
    }

    fn destroy_descriptor_set_layout(&mut self, layout: DescriptorSetLayoutId) {
        self.set_layouts.remove(&layout);
    }

    fn create_pipeline_layout(
        &mut self,
        set_layout: DescriptorSetLayoutId,
    ) -> Result<PipelineLayoutId, DeviceError> {
        if !self.set_layouts.contains_key(&set_layout) {
            return Err(DeviceError::InvalidHandle {
                kind: "descriptor set layout",
                id: set_layout.0,
            });
        }
        let id = PipelineLayoutId(self.next());
        self.pipeline_layouts.insert(id, set_layout);
        Ok(id)
    }

    fn destroy_pipeline_layout(&mut self, layout: PipelineLayoutId) {
        self.pipeline_layouts.remove(&layout);
    }

    fn create_pipeline(
        &mut self,
        desc: &PipelineDescription<'_>,
    ) -> Result<PipelineId, DeviceError> {
        if !self.pipeline_layouts.contains_key(&desc.layout) {
            return Err(DeviceError::InvalidHandle {
                kind: "pipeline layout",
                id: desc.layout.0,
            });
        }
        for module in std::iter::once(desc.vertex_module).chain(desc.fragment_module) {
            if !self.shader_modules.contains_key(&module) {
                return Err(DeviceError::InvalidHandle {
                    kind: "shader module",
                    id: module.0,
                });
            }
        }
        let id = PipelineId(self.next());
        self.pipelines.insert(
            id,
            HostPipeline {
                layout: desc.layout,
                state: desc.state,
                has_fragment: desc.fragment_module.is_some(),
            },
        );
        self.pipelines_created += 1;
        debug!("host: created pipeline '{}' ({:?})", desc.label, id);
        Ok(id)
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineId) {
        self.pipelines.remove(&pipeline);
    }

    fn create_descriptor_pool(
        &mut self,
        sizes: &DescriptorPoolSizes,
    ) -> Result<DescriptorPoolId, DeviceError> {
        let id = DescriptorPoolId(self.next());
        self.pools.insert(
            id,
            HostPool {
                sizes: *sizes,
                sets: 0,
                uniform_buffers: 0,
                image_samplers: 0,
            },
        );
        Ok(id)
    }

    fn reset_descriptor_pool(&mut self, pool: DescriptorPoolId) {
        if let Some(p) = self.pools.get_mut(&pool) {
            p.sets = 0;
            p.uniform_buffers = 0;
            p.image_samplers = 0;
        }
        self.sets.retain(|_, set| set.pool != pool);
    }

    fn destroy_descriptor_pool(&mut self, pool: DescriptorPoolId) {
        self.reset_descriptor_pool(pool);
        self.pools.remove(&pool);
    }

    fn allocate_descriptor_set(
        &mut self,
        pool: DescriptorPoolId,
        layout: DescriptorSetLayoutId,
    ) -> Result<DescriptorSetId, DeviceError> {
        let bindings = self.set_layouts.get(&layout).ok_or(DeviceError::InvalidHandle {
            kind: "descriptor set layout",
            id: layout.0,
        })?;
        let uniforms = bindings
            .iter()
            .filter(|b| b.kind == DescriptorKind::UniformBuffer)
            .count() as u32;
        let samplers = bindings.len() as u32 - uniforms;

        let p = self.pools.get_mut(&pool).ok_or(DeviceError::InvalidHandle {
            kind: "descriptor pool",
            id: pool.0,
        })?;
        let exhausted = |what| DeviceError::PoolExhausted { pool: pool.0, what };
        if p.sets >= p.sizes.max_sets {
            return Err(exhausted("sets"));
        }
        if p.uniform_buffers + uniforms > p.sizes.uniform_buffers {
            return Err(exhausted("uniform buffers"));
        }
        if p.image_samplers + samplers > p.sizes.image_samplers {
            return Err(exhausted("image samplers"));
        }
        p.sets += 1;
        p.uniform_buffers += uniforms;
        p.image_samplers += samplers;

        let id = DescriptorSetId(self.next());
        self.sets.insert(
            id,
            HostDescriptorSet {
                pool,
                layout,
                writes: Vec::new(),
            },
        );
        Ok(id)
    }

    fn update_descriptor_set(
        &mut self,
        set: DescriptorSetId,
        writes: &[DescriptorWrite],
    ) -> Result<(), DeviceError> {
        let record = self.sets.get_mut(&set).ok_or(DeviceError::InvalidHandle {
            kind: "descriptor set",
            id: set.0,
        })?;
        let bindings = self.set_layouts.get(&record.layout).ok_or(DeviceError::InvalidHandle {
            kind: "descriptor set layout",
            id: record.layout.0,
        })?;
        for write in writes {
            let expected = bindings.iter().find(|b| b.binding == write.binding).map(|b| b.kind);
            let actual = match write.resource {
                DescriptorResource::UniformBuffer(_) => DescriptorKind::UniformBuffer,
                DescriptorResource::ImageSampler(_) => DescriptorKind::CombinedImageSampler,
            };
            if expected != Some(actual) {
                return Err(DeviceError::LayoutMismatch {
                    binding: write.binding,
                });
            }
        }
        record.writes = writes.to_vec();
        Ok(())
    }

    fn wait_for_slot(&mut self, _slot: usize) -> Result<(), DeviceError> {
        // Host submissions complete immediately.
        self.slot_waits += 1;
        Ok(())
    }

    fn submit(&mut self, slot: usize, commands: &CommandStream) -> Result<(), DeviceError> {
        trace!("host: submit slot {} ({} commands)", slot, commands.len());
        self.submissions.push(Submission {
            slot,
            commands: commands.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertex_desc(size: u64) -> BufferDescriptor<'static> {
        BufferDescriptor {
            label: "test",
            size,
            kind: BufferKind::Vertex,
            usage: BufferUsage::Dynamic,
        }
    }

    #[test]
    fn test_map_write_unmap() {
        let mut device = HostDevice::default();
        let native = device.create_buffer(&vertex_desc(64)).unwrap();

        let bytes = device.map_memory(native.memory, 16, 4).unwrap();
        bytes.copy_from_slice(&[1, 2, 3, 4]);
        assert!(device.is_memory_mapped(native.memory));
        device.unmap_memory(native.memory);

        let contents = device.buffer_bytes(native.buffer).unwrap();
        assert_eq!(&contents[16..20], &[1, 2, 3, 4]);
        assert_eq!(contents[0], 0);
    }

    #[test]
    fn test_double_map_rejected() {
        let mut device = HostDevice::default();
        let native = device.create_buffer(&vertex_desc(64)).unwrap();
        device.map_memory(native.memory, 0, 16).unwrap();
        assert_eq!(
            device.map_memory(native.memory, 0, 16),
            Err(DeviceError::AlreadyMapped(native.memory.0))
        );
    }

    #[test]
    fn test_map_out_of_range() {
        let mut device = HostDevice::default();
        let native = device.create_buffer(&vertex_desc(32)).unwrap();
        assert!(matches!(
            device.map_memory(native.memory, 16, 32),
            Err(DeviceError::MapOutOfRange { .. })
        ));
    }

    #[test]
    fn test_destroy_buffer_counts() {
        let mut device = HostDevice::default();
        let native = device.create_buffer(&vertex_desc(32)).unwrap();
        assert_eq!(device.live_buffer_count(), 1);
        device.destroy_buffer(native);
        device.destroy_buffer(native);
        assert_eq!(device.live_buffer_count(), 0);
        assert_eq!(device.buffers_destroyed(), 1);
    }

    #[test]
    fn test_pool_exhaustion_and_reset() {
        let mut device = HostDevice::default();
        let layout = device
            .create_descriptor_set_layout(&[DescriptorBinding {
                binding: 0,
                kind: DescriptorKind::UniformBuffer,
                stage: ShaderStage::Vertex,
            }])
            .unwrap();
        let pool = device
            .create_descriptor_pool(&DescriptorPoolSizes {
                max_sets: 2,
                uniform_buffers: 8,
                image_samplers: 8,
            })
            .unwrap();

        device.allocate_descriptor_set(pool, layout).unwrap();
        device.allocate_descriptor_set(pool, layout).unwrap();
        assert!(matches!(
            device.allocate_descriptor_set(pool, layout),
            Err(DeviceError::PoolExhausted { what: "sets", .. })
        ));

        device.reset_descriptor_pool(pool);
        assert_eq!(device.allocated_sets(pool), Some(0));
        assert!(device.allocate_descriptor_set(pool, layout).is_ok());
    }

    #[test]
    fn test_update_rejects_kind_mismatch() {
        let mut device = HostDevice::default();
        let layout = device
            .create_descriptor_set_layout(&[DescriptorBinding {
                binding: 0,
                kind: DescriptorKind::CombinedImageSampler,
                stage: ShaderStage::Fragment,
            }])
            .unwrap();
        let pool = device
            .create_descriptor_pool(&DescriptorPoolSizes {
                max_sets: 1,
                uniform_buffers: 1,
                image_samplers: 1,
            })
            .unwrap();
        let set = device.allocate_descriptor_set(pool, layout).unwrap();
        let texture = device.register_texture();

        let ok = DescriptorWrite {
            binding: 0,
            resource: DescriptorResource::ImageSampler(texture),
        };
        device.update_descriptor_set(set, &[ok]).unwrap();
        assert_eq!(device.descriptor_writes(set), Some(&[ok][..]));

        let wrong = DescriptorWrite {
            binding: 1,
            resource: DescriptorResource::ImageSampler(texture),
        };
        assert_eq!(
            device.update_descriptor_set(set, &[wrong]),
            Err(DeviceError::LayoutMismatch { binding: 1 })
        );
    }
}
