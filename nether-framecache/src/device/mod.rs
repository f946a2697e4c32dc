//! Native device abstraction.
//!
//! Everything in the cache talks to the GPU through [`RenderDevice`]. Native
//! objects are plain integer ids so that buffer references, cached pipelines
//! and descriptor writes are cheap `Copy` values.
//!
//! # Available devices
//!
//! - [`HostDevice`]: in-memory device for tests and headless simulation
//! - `WgpuDevice` (feature `wgpu-backend`): wgpu-backed device

mod host;
#[cfg(feature = "wgpu-backend")]
mod wgpu_device;

pub use host::{HostDevice, Submission};
#[cfg(feature = "wgpu-backend")]
pub use wgpu_device::WgpuDevice;

use thiserror::Error;

use crate::buffer::BufferView;
use crate::command::CommandStream;
use crate::pipeline::VertexLayout;
use crate::render_state::PipelineState;

macro_rules! native_id {
    ($($(#[$meta:meta])* $name:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u32);
        )*
    };
}

native_id! {
    /// Native buffer object.
    BufferId;
    /// Native memory block backing a buffer.
    MemoryId;
    ShaderModuleId;
    DescriptorSetLayoutId;
    PipelineLayoutId;
    /// Compiled graphics pipeline.
    PipelineId;
    DescriptorPoolId;
    DescriptorSetId;
    /// Texture view supplied by the texture collaborator.
    TextureViewId;
    /// Sampler supplied by the texture collaborator.
    SamplerId;
}

/// Buffer plus the memory bound to it, as returned by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeBuffer {
    pub buffer: BufferId,
    pub memory: MemoryId,
}

/// What a buffer is bound as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
    Uniform,
}

impl std::fmt::Display for BufferKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            BufferKind::Vertex => "vertex",
            BufferKind::Index => "index",
            BufferKind::Uniform => "uniform",
        })
    }
}

/// Update policy of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BufferUsage {
    /// Written once at allocation time, never mapped afterwards.
    #[default]
    Static,
    /// Host-writable every frame.
    Dynamic,
}

#[derive(Debug, Clone)]
pub struct BufferDescriptor<'a> {
    pub label: &'a str,
    pub size: u64,
    pub kind: BufferKind,
    pub usage: BufferUsage,
}

/// Device properties the cache depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Minimum alignment of a uniform buffer binding offset.
    pub min_uniform_buffer_offset_alignment: u64,
    /// Largest range a single uniform binding may cover.
    pub max_uniform_buffer_binding_size: u64,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            min_uniform_buffer_offset_alignment: 256,
            max_uniform_buffer_binding_size: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    /// Short suffix used in file names and logs.
    pub fn suffix(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vs",
            ShaderStage::Fragment => "ps",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    UniformBuffer,
    CombinedImageSampler,
}

/// One slot of a descriptor set layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub kind: DescriptorKind,
    pub stage: ShaderStage,
}

/// Capacity of one descriptor pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorPoolSizes {
    pub max_sets: u32,
    pub uniform_buffers: u32,
    pub image_samplers: u32,
}

/// Opaque (view, sampler) pair bound into a sampler slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureBinding {
    pub view: TextureViewId,
    pub sampler: SamplerId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorResource {
    UniformBuffer(BufferView),
    ImageSampler(TextureBinding),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorWrite {
    pub binding: u32,
    pub resource: DescriptorResource,
}

/// Vertex shader entry point name.
pub const VERTEX_ENTRY_POINT: &str = "MainVs";
/// Fragment shader entry point name.
pub const FRAGMENT_ENTRY_POINT: &str = "MainPs";

/// Everything needed to create one graphics pipeline.
#[derive(Debug, Clone)]
pub struct PipelineDescription<'a> {
    pub label: &'a str,
    pub layout: PipelineLayoutId,
    pub vertex_layout: &'a VertexLayout,
    pub vertex_module: ShaderModuleId,
    /// Depth-only programs have no fragment stage.
    pub fragment_module: Option<ShaderModuleId>,
    pub state: PipelineState,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("out of device memory allocating {0} bytes")]
    OutOfMemory(u64),
    #[error("invalid {kind} handle {id}")]
    InvalidHandle { kind: &'static str, id: u32 },
    #[error("memory {0} is already mapped")]
    AlreadyMapped(u32),
    #[error("map range {offset}+{size} exceeds memory size {capacity}")]
    MapOutOfRange { offset: u64, size: u64, capacity: u64 },
    #[error("descriptor pool {pool} exhausted: {what}")]
    PoolExhausted { pool: u32, what: &'static str },
    #[error("descriptor write to binding {binding} does not match the set layout")]
    LayoutMismatch { binding: u32 },
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("backend error: {0}")]
    Backend(String),
}

/// Native GPU operations used by the cache.
///
/// Calls never block except [`RenderDevice::wait_for_slot`], which waits for
/// the GPU to finish the work previously submitted for a frame slot.
pub trait RenderDevice {
    fn name(&self) -> &'static str;

    fn limits(&self) -> DeviceLimits;

    /// Create a buffer and bind fresh memory to it.
    fn create_buffer(&mut self, desc: &BufferDescriptor<'_>) -> Result<NativeBuffer, DeviceError>;

    /// Destroy a buffer and free its memory.
    fn destroy_buffer(&mut self, buffer: NativeBuffer);

    /// Map `size` bytes of `memory` starting at `offset` for host access.
    ///
    /// The returned slice is valid until [`RenderDevice::unmap_memory`].
    fn map_memory(
        &mut self,
        memory: MemoryId,
        offset: u64,
        size: u64,
    ) -> Result<&mut [u8], DeviceError>;

    fn unmap_memory(&mut self, memory: MemoryId);

    fn create_shader_module(
        &mut self,
        label: &str,
        stage: ShaderStage,
        source: &str,
    ) -> Result<ShaderModuleId, DeviceError>;

    fn destroy_shader_module(&mut self, module: ShaderModuleId);

    fn create_descriptor_set_layout(
        &mut self,
        bindings: &[DescriptorBinding],
    ) -> Result<DescriptorSetLayoutId, DeviceError>;

    fn destroy_descriptor_set_layout(&mut self, layout: DescriptorSetLayoutId);

    fn create_pipeline_layout(
        &mut self,
        set_layout: DescriptorSetLayoutId,
    ) -> Result<PipelineLayoutId, DeviceError>;

    fn destroy_pipeline_layout(&mut self, layout: PipelineLayoutId);

    fn create_pipeline(&mut self, desc: &PipelineDescription<'_>)
    -> Result<PipelineId, DeviceError>;

    fn destroy_pipeline(&mut self, pipeline: PipelineId);

    fn create_descriptor_pool(
        &mut self,
        sizes: &DescriptorPoolSizes,
    ) -> Result<DescriptorPoolId, DeviceError>;

    /// Return every set allocated from `pool` to it.
    fn reset_descriptor_pool(&mut self, pool: DescriptorPoolId);

    fn destroy_descriptor_pool(&mut self, pool: DescriptorPoolId);

    fn allocate_descriptor_set(
        &mut self,
        pool: DescriptorPoolId,
        layout: DescriptorSetLayoutId,
    ) -> Result<DescriptorSetId, DeviceError>;

    fn update_descriptor_set(
        &mut self,
        set: DescriptorSetId,
        writes: &[DescriptorWrite],
    ) -> Result<(), DeviceError>;

    /// Block until the work last submitted for `slot` has completed.
    fn wait_for_slot(&mut self, slot: usize) -> Result<(), DeviceError>;

    /// Submit one frame's recorded commands for `slot`.
    fn submit(&mut self, slot: usize, commands: &CommandStream) -> Result<(), DeviceError>;
}
