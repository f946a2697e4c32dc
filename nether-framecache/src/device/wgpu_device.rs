//! wgpu-backed render device.
//!
//! Renders into an offscreen color + depth/stencil target. Host-visible
//! memory is emulated with a shadow copy per buffer that is flushed to the
//! GPU with `Queue::write_buffer` on unmap. Descriptor sets become bind
//! groups when they are updated.
//!
//! Binding `b` of a set layout maps to wgpu binding `2b`. A combined image
//! sampler additionally uses `2b + 1` for its sampler, so shaders declare
//! `@group(0) @binding(2b) var tex` and `@group(0) @binding(2b + 1) var smp`.

use std::borrow::Cow;
use std::num::NonZeroU64;

use anyhow::{Context, Result};
use hashbrown::HashMap;
use tracing::{debug, info, warn};

use super::{
    BufferDescriptor, BufferId, BufferKind, DescriptorBinding, DescriptorKind, DescriptorPoolId,
    DescriptorPoolSizes, DescriptorResource, DescriptorSetId, DescriptorSetLayoutId,
    DescriptorWrite, DeviceError, DeviceLimits, FRAGMENT_ENTRY_POINT, MemoryId, NativeBuffer,
    PipelineDescription, PipelineId, PipelineLayoutId, RenderDevice, SamplerId, ShaderModuleId,
    ShaderStage, TextureBinding, TextureViewId, VERTEX_ENTRY_POINT,
};
use crate::buffer::{BufferView, align_up};
use crate::command::{CommandStream, RenderCommand};
use crate::pipeline::{VertexFormat, VertexLayout};
use crate::render_state::{
    BlendFactor, CompareFunc, CullMode, PipelineState, PolygonMode, StencilFaceState, StencilOp,
};

const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24PlusStencil8;

/// Depth and stencil values every frame starts from.
const CLEAR_DEPTH: f32 = 1.0;
const CLEAR_STENCIL: u32 = 128;

/// Fragment stage for depth-only programs; color writes are masked off.
const NULL_FRAGMENT_SOURCE: &str =
    "@fragment\nfn MainPs() -> @location(0) vec4<f32> {\n    return vec4<f32>(0.0);\n}\n";

struct GpuMemory {
    buffer: wgpu::Buffer,
    shadow: Vec<u8>,
    mapped: Option<(u64, u64)>,
}

struct GpuSetLayout {
    layout: wgpu::BindGroupLayout,
    bindings: Vec<DescriptorBinding>,
}

struct GpuPipeline {
    pipeline: wgpu::RenderPipeline,
    stencil_reference: u32,
}

struct GpuPool {
    sizes: DescriptorPoolSizes,
    sets: u32,
}

struct GpuDescriptorSet {
    pool: DescriptorPoolId,
    layout: DescriptorSetLayoutId,
    bind_group: Option<wgpu::BindGroup>,
}

/// Render device driving a wgpu adapter.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    limits: DeviceLimits,
    polygon_line: bool,
    next_id: u32,
    memory: HashMap<MemoryId, GpuMemory>,
    buffers: HashMap<BufferId, MemoryId>,
    shader_modules: HashMap<ShaderModuleId, wgpu::ShaderModule>,
    null_fragment: wgpu::ShaderModule,
    set_layouts: HashMap<DescriptorSetLayoutId, GpuSetLayout>,
    pipeline_layouts: HashMap<PipelineLayoutId, wgpu::PipelineLayout>,
    pipelines: HashMap<PipelineId, GpuPipeline>,
    pools: HashMap<DescriptorPoolId, GpuPool>,
    sets: HashMap<DescriptorSetId, GpuDescriptorSet>,
    texture_views: HashMap<TextureViewId, wgpu::TextureView>,
    samplers: HashMap<SamplerId, wgpu::Sampler>,
    color_view: wgpu::TextureView,
    depth_view: wgpu::TextureView,
    width: u32,
    height: u32,
    in_flight: Vec<Option<wgpu::SubmissionIndex>>,
    warned_depth_bounds: bool,
}

impl WgpuDevice {
    /// Create a device with a 640x480 render target.
    pub fn new() -> Result<Self> {
        Self::new_with_size(640, 480)
    }

    pub fn new_with_size(width: u32, height: u32) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .context("Failed to find suitable GPU adapter")?;

        let required_features = adapter.features() & wgpu::Features::POLYGON_MODE_LINE;
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Frame Cache Device"),
            required_features,
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            experimental_features: Default::default(),
            trace: wgpu::Trace::Off,
        }))
        .context("Failed to create GPU device")?;

        let device_limits = device.limits();
        let limits = DeviceLimits {
            min_uniform_buffer_offset_alignment: device_limits.min_uniform_buffer_offset_alignment
                as u64,
            max_uniform_buffer_binding_size: device_limits.max_uniform_buffer_binding_size as u64,
        };

        let (color_view, depth_view) = create_render_target(&device, width.max(1), height.max(1));
        let null_fragment = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Null Fragment"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(NULL_FRAGMENT_SOURCE)),
        });

        info!(
            "wgpu device initialized: {} ({:?}), {}x{}",
            adapter.get_info().name,
            adapter.get_info().backend,
            width,
            height
        );

        Ok(Self {
            device,
            queue,
            limits,
            polygon_line: required_features.contains(wgpu::Features::POLYGON_MODE_LINE),
            next_id: 1,
            memory: HashMap::new(),
            buffers: HashMap::new(),
            shader_modules: HashMap::new(),
            null_fragment,
            set_layouts: HashMap::new(),
            pipeline_layouts: HashMap::new(),
            pipelines: HashMap::new(),
            pools: HashMap::new(),
            sets: HashMap::new(),
            texture_views: HashMap::new(),
            samplers: HashMap::new(),
            color_view,
            depth_view,
            width: width.max(1),
            height: height.max(1),
            in_flight: Vec::new(),
            warned_depth_bounds: false,
        })
    }

    fn next(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Register a texture view and sampler for use in sampler bindings.
    pub fn register_texture(
        &mut self,
        view: wgpu::TextureView,
        sampler: wgpu::Sampler,
    ) -> TextureBinding {
        let view_id = TextureViewId(self.next());
        let sampler_id = SamplerId(self.next());
        self.texture_views.insert(view_id, view);
        self.samplers.insert(sampler_id, sampler);
        TextureBinding {
            view: view_id,
            sampler: sampler_id,
        }
    }

    pub fn release_texture(&mut self, texture: TextureBinding) {
        self.texture_views.remove(&texture.view);
        self.samplers.remove(&texture.sampler);
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Color target the frame renders into.
    pub fn color_view(&self) -> &wgpu::TextureView {
        &self.color_view
    }

    fn gpu_buffer(&self, view: &BufferView) -> Result<&wgpu::Buffer, DeviceError> {
        self.memory
            .get(&view.owner.memory)
            .map(|m| &m.buffer)
            .ok_or(DeviceError::InvalidHandle {
                kind: "buffer",
                id: view.owner.buffer.0,
            })
    }

    /// Run `f` inside a validation error scope and turn a captured error
    /// into a `DeviceError`.
    fn validated<T>(&self, what: &str, f: impl FnOnce(&wgpu::Device) -> T) -> Result<T, DeviceError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f(&self.device);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(DeviceError::Backend(format!("{what}: {err}"))),
            None => Ok(value),
        }
    }

    fn bind_group_entries<'a>(
        &'a self,
        writes: &[DescriptorWrite],
    ) -> Result<Vec<wgpu::BindGroupEntry<'a>>, DeviceError> {
        let mut entries = Vec::with_capacity(writes.len() * 2);
        for write in writes {
            match write.resource {
                DescriptorResource::UniformBuffer(view) => {
                    entries.push(wgpu::BindGroupEntry {
                        binding: write.binding * 2,
                        resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer: self.gpu_buffer(&view)?,
                            offset: view.offset,
                            size: NonZeroU64::new(view.size),
                        }),
                    });
                }
                DescriptorResource::ImageSampler(texture) => {
                    let view = self.texture_views.get(&texture.view).ok_or(
                        DeviceError::InvalidHandle {
                            kind: "texture view",
                            id: texture.view.0,
                        },
                    )?;
                    let sampler =
                        self.samplers
                            .get(&texture.sampler)
                            .ok_or(DeviceError::InvalidHandle {
                                kind: "sampler",
                                id: texture.sampler.0,
                            })?;
                    entries.push(wgpu::BindGroupEntry {
                        binding: write.binding * 2,
                        resource: wgpu::BindingResource::TextureView(view),
                    });
                    entries.push(wgpu::BindGroupEntry {
                        binding: write.binding * 2 + 1,
                        resource: wgpu::BindingResource::Sampler(sampler),
                    });
                }
            }
        }
        Ok(entries)
    }

    fn encode(&self, commands: &CommandStream) -> Result<wgpu::CommandBuffer, DeviceError> {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Frame Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.color_view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(CLEAR_DEPTH),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(CLEAR_STENCIL),
                        store: wgpu::StoreOp::Store,
                    }),
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            for command in commands {
                match *command {
                    RenderCommand::BindPipeline(id) => {
                        let entry = self.pipelines.get(&id).ok_or(DeviceError::InvalidHandle {
                            kind: "pipeline",
                            id: id.0,
                        })?;
                        pass.set_pipeline(&entry.pipeline);
                        pass.set_stencil_reference(entry.stencil_reference);
                    }
                    RenderCommand::BindDescriptorSet { set, .. } => {
                        let bind_group = self
                            .sets
                            .get(&set)
                            .and_then(|s| s.bind_group.as_ref())
                            .ok_or(DeviceError::InvalidHandle {
                                kind: "descriptor set",
                                id: set.0,
                            })?;
                        pass.set_bind_group(0, bind_group, &[]);
                    }
                    RenderCommand::BindIndexBuffer(view) => {
                        let buffer = self.gpu_buffer(&view)?;
                        pass.set_index_buffer(
                            buffer.slice(view.offset..view.offset + view.size),
                            wgpu::IndexFormat::Uint32,
                        );
                    }
                    RenderCommand::BindVertexBuffer(view) => {
                        let buffer = self.gpu_buffer(&view)?;
                        pass.set_vertex_buffer(0, buffer.slice(view.offset..view.offset + view.size));
                    }
                    RenderCommand::SetViewport {
                        x,
                        y,
                        width,
                        height,
                    } => pass.set_viewport(x, y, width, height, 0.0, 1.0),
                    RenderCommand::SetScissor {
                        x,
                        y,
                        width,
                        height,
                    } => {
                        let x = x.min(self.width);
                        let y = y.min(self.height);
                        pass.set_scissor_rect(
                            x,
                            y,
                            width.min(self.width - x),
                            height.min(self.height - y),
                        );
                    }
                    // No depth bounds test in wgpu; the pipeline was warned about.
                    RenderCommand::SetDepthBounds { .. } => {}
                    RenderCommand::DrawIndexed {
                        index_count,
                        first_index,
                        base_vertex,
                    } => pass.draw_indexed(first_index..first_index + index_count, base_vertex, 0..1),
                }
            }
        }

        Ok(encoder.finish())
    }
}

fn create_render_target(
    device: &wgpu::Device,
    width: u32,
    height: u32,
) -> (wgpu::TextureView, wgpu::TextureView) {
    let size = wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    };
    let color = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Frame Color"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: COLOR_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let depth = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Frame Depth"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    (
        color.create_view(&wgpu::TextureViewDescriptor::default()),
        depth.create_view(&wgpu::TextureViewDescriptor::default()),
    )
}

// ============================================================================
// State conversion
// ============================================================================

fn shader_visibility(stage: ShaderStage) -> wgpu::ShaderStages {
    match stage {
        ShaderStage::Vertex => wgpu::ShaderStages::VERTEX,
        ShaderStage::Fragment => wgpu::ShaderStages::FRAGMENT,
    }
}

fn layout_entries(bindings: &[DescriptorBinding]) -> Vec<wgpu::BindGroupLayoutEntry> {
    let mut entries = Vec::with_capacity(bindings.len() * 2);
    for b in bindings {
        let visibility = shader_visibility(b.stage);
        match b.kind {
            DescriptorKind::UniformBuffer => entries.push(wgpu::BindGroupLayoutEntry {
                binding: b.binding * 2,
                visibility,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }),
            DescriptorKind::CombinedImageSampler => {
                entries.push(wgpu::BindGroupLayoutEntry {
                    binding: b.binding * 2,
                    visibility,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                });
                entries.push(wgpu::BindGroupLayoutEntry {
                    binding: b.binding * 2 + 1,
                    visibility,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                });
            }
        }
    }
    entries
}

fn blend_factor(factor: BlendFactor) -> wgpu::BlendFactor {
    match factor {
        BlendFactor::Zero => wgpu::BlendFactor::Zero,
        BlendFactor::One => wgpu::BlendFactor::One,
        BlendFactor::SrcColor => wgpu::BlendFactor::Src,
        BlendFactor::OneMinusSrcColor => wgpu::BlendFactor::OneMinusSrc,
        BlendFactor::DstColor => wgpu::BlendFactor::Dst,
        BlendFactor::OneMinusDstColor => wgpu::BlendFactor::OneMinusDst,
        BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
        BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
        BlendFactor::DstAlpha => wgpu::BlendFactor::DstAlpha,
        BlendFactor::OneMinusDstAlpha => wgpu::BlendFactor::OneMinusDstAlpha,
    }
}

fn compare_function(func: CompareFunc) -> wgpu::CompareFunction {
    match func {
        CompareFunc::Never => wgpu::CompareFunction::Never,
        CompareFunc::Less => wgpu::CompareFunction::Less,
        CompareFunc::Equal => wgpu::CompareFunction::Equal,
        CompareFunc::LessEqual => wgpu::CompareFunction::LessEqual,
        CompareFunc::Greater => wgpu::CompareFunction::Greater,
        CompareFunc::NotEqual => wgpu::CompareFunction::NotEqual,
        CompareFunc::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
        CompareFunc::Always => wgpu::CompareFunction::Always,
    }
}

fn stencil_operation(op: StencilOp) -> wgpu::StencilOperation {
    match op {
        StencilOp::Keep => wgpu::StencilOperation::Keep,
        StencilOp::Zero => wgpu::StencilOperation::Zero,
        StencilOp::Replace => wgpu::StencilOperation::Replace,
        StencilOp::IncrementClamp => wgpu::StencilOperation::IncrementClamp,
        StencilOp::DecrementClamp => wgpu::StencilOperation::DecrementClamp,
        StencilOp::Invert => wgpu::StencilOperation::Invert,
        StencilOp::IncrementWrap => wgpu::StencilOperation::IncrementWrap,
        StencilOp::DecrementWrap => wgpu::StencilOperation::DecrementWrap,
    }
}

fn stencil_face(face: &StencilFaceState) -> wgpu::StencilFaceState {
    wgpu::StencilFaceState {
        compare: compare_function(face.compare),
        fail_op: stencil_operation(face.fail_op),
        depth_fail_op: stencil_operation(face.depth_fail_op),
        pass_op: stencil_operation(face.pass_op),
    }
}

fn vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
    match format {
        VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
        VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
        VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
        VertexFormat::Unorm8x4 => wgpu::VertexFormat::Unorm8x4,
    }
}

fn vertex_attributes(layout: &VertexLayout) -> Vec<wgpu::VertexAttribute> {
    layout
        .attributes
        .iter()
        .map(|a| wgpu::VertexAttribute {
            format: vertex_format(a.format),
            offset: a.offset as u64,
            shader_location: a.location,
        })
        .collect()
}

fn color_target(state: &PipelineState, writes_color: bool) -> wgpu::ColorTargetState {
    let mut write_mask = wgpu::ColorWrites::empty();
    let w = state.color_writes;
    if writes_color {
        write_mask.set(wgpu::ColorWrites::RED, w.red);
        write_mask.set(wgpu::ColorWrites::GREEN, w.green);
        write_mask.set(wgpu::ColorWrites::BLUE, w.blue);
        write_mask.set(wgpu::ColorWrites::ALPHA, w.alpha);
    }
    let blend = state.blend.enabled.then(|| {
        let component = wgpu::BlendComponent {
            src_factor: blend_factor(state.blend.src),
            dst_factor: blend_factor(state.blend.dst),
            operation: wgpu::BlendOperation::Add,
        };
        wgpu::BlendState {
            color: component,
            alpha: component,
        }
    });
    wgpu::ColorTargetState {
        format: COLOR_FORMAT,
        blend,
        write_mask,
    }
}

fn depth_stencil(state: &PipelineState) -> wgpu::DepthStencilState {
    let ds = &state.depth_stencil;
    let stencil = if ds.stencil_test {
        wgpu::StencilState {
            front: stencil_face(&ds.front),
            back: stencil_face(&ds.back),
            read_mask: ds.compare_mask as u32,
            write_mask: ds.write_mask,
        }
    } else {
        wgpu::StencilState::default()
    };
    wgpu::DepthStencilState {
        format: DEPTH_FORMAT,
        depth_write_enabled: ds.depth_test && ds.depth_write,
        depth_compare: if ds.depth_test {
            compare_function(ds.depth_compare)
        } else {
            wgpu::CompareFunction::Always
        },
        stencil,
        bias: wgpu::DepthBiasState::default(),
    }
}

impl RenderDevice for WgpuDevice {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor<'_>) -> Result<NativeBuffer, DeviceError> {
        let size = align_up(desc.size.max(1), wgpu::COPY_BUFFER_ALIGNMENT);
        let len = usize::try_from(size).map_err(|_| DeviceError::OutOfMemory(desc.size))?;
        let usage = wgpu::BufferUsages::COPY_DST
            | match desc.kind {
                BufferKind::Vertex => wgpu::BufferUsages::VERTEX,
                BufferKind::Index => wgpu::BufferUsages::INDEX,
                BufferKind::Uniform => wgpu::BufferUsages::UNIFORM,
            };
        let buffer = self.validated(desc.label, |device| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(desc.label),
                size,
                usage,
                mapped_at_creation: false,
            })
        })?;

        let memory = MemoryId(self.next());
        let id = BufferId(self.next());
        self.memory.insert(
            memory,
            GpuMemory {
                buffer,
                shadow: vec![0; len],
                mapped: None,
            },
        );
        self.buffers.insert(id, memory);
        debug!("wgpu: created {} buffer '{}' ({} bytes)", desc.kind, desc.label, size);
        Ok(NativeBuffer { buffer: id, memory })
    }

    fn destroy_buffer(&mut self, buffer: NativeBuffer) {
        if self.buffers.remove(&buffer.buffer).is_some()
            && let Some(memory) = self.memory.remove(&buffer.memory)
        {
            memory.buffer.destroy();
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
        if mem.mapped.is_some() {
            return Err(DeviceError::AlreadyMapped(memory.0));
        }
        let capacity = mem.shadow.len() as u64;
        let end = offset.checked_add(size).filter(|end| *end <= capacity).ok_or(
            DeviceError::MapOutOfRange {
                offset,
                size,
                capacity,
            },
        )?;
        mem.mapped = Some((offset, end));
        Ok(&mut mem.shadow[offset as usize..end as usize])
    }

    fn unmap_memory(&mut self, memory: MemoryId) {
        let Some(mem) = self.memory.get_mut(&memory) else {
            return;
        };
        let Some((start, end)) = mem.mapped.take() else {
            return;
        };
        // write_buffer wants 4-byte aligned ranges; the shadow is padded to match.
        let start = start & !(wgpu::COPY_BUFFER_ALIGNMENT - 1);
        let end = align_up(end, wgpu::COPY_BUFFER_ALIGNMENT).min(mem.shadow.len() as u64);
        if end > start {
            self.queue
                .write_buffer(&mem.buffer, start, &mem.shadow[start as usize..end as usize]);
        }
    }

    fn create_shader_module(
        &mut self,
        label: &str,
        stage: ShaderStage,
        source: &str,
    ) -> Result<ShaderModuleId, DeviceError> {
        let label = format!("{label}.{}", stage.suffix());
        let module = self.validated(&label, |device| {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&label),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
            })
        })?;
        let id = ShaderModuleId(self.next());
        self.shader_modules.insert(id, module);
        Ok(id)
    }

    fn destroy_shader_module(&mut self, module: ShaderModuleId) {
        self.shader_modules.remove(&module);
    }

    fn create_descriptor_set_layout(
        &mut self,
        bindings: &[DescriptorBinding],
    ) -> Result<DescriptorSetLayoutId, DeviceError> {
        let entries = layout_entries(bindings);
        let layout = self.validated("descriptor set layout", |device| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Program Set Layout"),
                entries: &entries,
            })
        })?;
        let id = DescriptorSetLayoutId(self.next());
        self.set_layouts.insert(
            id,
            GpuSetLayout {
                layout,
                bindings: bindings.to_vec(),
            },
        );
        Ok(id)
    }

    fn destroy_descriptor_set_layout(&mut self, layout: DescriptorSetLayoutId) {
        self.set_layouts.remove(&layout);
    }

    fn create_pipeline_layout(
        &mut self,
        set_layout: DescriptorSetLayoutId,
    ) -> Result<PipelineLayoutId, DeviceError> {
        let set = self
            .set_layouts
            .get(&set_layout)
            .ok_or(DeviceError::InvalidHandle {
                kind: "descriptor set layout",
                id: set_layout.0,
            })?;
        let layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Program Pipeline Layout"),
                bind_group_layouts: &[&set.layout],
                push_constant_ranges: &[],
            });
        let id = PipelineLayoutId(self.next());
        self.pipeline_layouts.insert(id, layout);
        Ok(id)
    }

    fn destroy_pipeline_layout(&mut self, layout: PipelineLayoutId) {
        self.pipeline_layouts.remove(&layout);
    }

    fn create_pipeline(
        &mut self,
        desc: &PipelineDescription<'_>,
    ) -> Result<PipelineId, DeviceError> {
        let state = &desc.state;
        if state.depth_stencil.depth_bounds_test && !self.warned_depth_bounds {
            warn!("wgpu: depth bounds test is not supported and will be ignored");
            self.warned_depth_bounds = true;
        }
        let polygon_mode = match state.raster.polygon_mode {
            PolygonMode::Line if self.polygon_line => wgpu::PolygonMode::Line,
            PolygonMode::Line => {
                warn!("wgpu: line polygon mode unavailable, drawing '{}' filled", desc.label);
                wgpu::PolygonMode::Fill
            }
            PolygonMode::Fill => wgpu::PolygonMode::Fill,
        };
        let cull_mode = match state.raster.cull_mode {
            CullMode::None => None,
            CullMode::Front => Some(wgpu::Face::Front),
            CullMode::Back => Some(wgpu::Face::Back),
        };

        let layout = self
            .pipeline_layouts
            .get(&desc.layout)
            .ok_or(DeviceError::InvalidHandle {
                kind: "pipeline layout",
                id: desc.layout.0,
            })?;
        let module_of = |id: ShaderModuleId| {
            self.shader_modules.get(&id).ok_or(DeviceError::InvalidHandle {
                kind: "shader module",
                id: id.0,
            })
        };
        let vertex_module = module_of(desc.vertex_module)?;
        let fragment_module = match desc.fragment_module {
            Some(id) => module_of(id)?,
            None => &self.null_fragment,
        };

        let attributes = vertex_attributes(desc.vertex_layout);
        let targets = [Some(color_target(state, desc.fragment_module.is_some()))];

        let pipeline = self.validated(desc.label, |device| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(desc.label),
                layout: Some(layout),
                vertex: wgpu::VertexState {
                    module: vertex_module,
                    entry_point: Some(VERTEX_ENTRY_POINT),
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: desc.vertex_layout.stride as u64,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &attributes,
                    }],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: fragment_module,
                    entry_point: Some(FRAGMENT_ENTRY_POINT),
                    targets: &targets,
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode,
                    unclipped_depth: false,
                    polygon_mode,
                    conservative: false,
                },
                depth_stencil: Some(depth_stencil(state)),
                multisample: wgpu::MultisampleState {
                    count: 1,
                    mask: !0,
                    alpha_to_coverage_enabled: false,
                },
                multiview: None,
                cache: None,
            })
        })?;

        let id = PipelineId(self.next());
        self.pipelines.insert(
            id,
            GpuPipeline {
                pipeline,
                stencil_reference: state.depth_stencil.reference as u32,
            },
        );
        debug!("wgpu: created pipeline '{}' ({:?})", desc.label, id);
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
        self.pools.insert(id, GpuPool { sizes: *sizes, sets: 0 });
        Ok(id)
    }

    fn reset_descriptor_pool(&mut self, pool: DescriptorPoolId) {
        if let Some(p) = self.pools.get_mut(&pool) {
            p.sets = 0;
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
        if !self.set_layouts.contains_key(&layout) {
            return Err(DeviceError::InvalidHandle {
                kind: "descriptor set layout",
                id: layout.0,
            });
        }
        let p = self.pools.get_mut(&pool).ok_or(DeviceError::InvalidHandle {
            kind: "descriptor pool",
            id: pool.0,
        })?;
        if p.sets >= p.sizes.max_sets {
            return Err(DeviceError::PoolExhausted {
                pool: pool.0,
                what: "sets",
            });
        }
        p.sets += 1;

        let id = DescriptorSetId(self.next());
        self.sets.insert(
            id,
            GpuDescriptorSet {
                pool,
                layout,
                bind_group: None,
            },
        );
        Ok(id)
    }

    fn update_descriptor_set(
        &mut self,
        set: DescriptorSetId,
        writes: &[DescriptorWrite],
    ) -> Result<(), DeviceError> {
        let layout_id = self
            .sets
            .get(&set)
            .map(|s| s.layout)
            .ok_or(DeviceError::InvalidHandle {
                kind: "descriptor set",
                id: set.0,
            })?;
        let layout = self
            .set_layouts
            .get(&layout_id)
            .ok_or(DeviceError::InvalidHandle {
                kind: "descriptor set layout",
                id: layout_id.0,
            })?;
        for write in writes {
            let expected = layout.bindings.iter().find(|b| b.binding == write.binding);
            let kind = match write.resource {
                DescriptorResource::UniformBuffer(_) => DescriptorKind::UniformBuffer,
                DescriptorResource::ImageSampler(_) => DescriptorKind::CombinedImageSampler,
            };
            if expected.map(|b| b.kind) != Some(kind) {
                return Err(DeviceError::LayoutMismatch {
                    binding: write.binding,
                });
            }
        }

        let entries = self.bind_group_entries(writes)?;
        let bind_group = self.validated("descriptor set", |device| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Program Descriptor Set"),
                layout: &layout.layout,
                entries: &entries,
            })
        })?;
        if let Some(s) = self.sets.get_mut(&set) {
            s.bind_group = Some(bind_group);
        }
        Ok(())
    }

    fn wait_for_slot(&mut self, slot: usize) -> Result<(), DeviceError> {
        let Some(index) = self.in_flight.get_mut(slot).and_then(Option::take) else {
            return Ok(());
        };
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: Some(index),
                timeout: None,
            })
            .map_err(|err| DeviceError::Backend(err.to_string()))?;
        Ok(())
    }

    fn submit(&mut self, slot: usize, commands: &CommandStream) -> Result<(), DeviceError> {
        let buffer = self.encode(commands)?;
        let index = self.queue.submit(std::iter::once(buffer));
        if self.in_flight.len() <= slot {
            self.in_flight.resize_with(slot + 1, || None);
        }
        self.in_flight[slot] = Some(index);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nether_framecache_shared::state_bits::{
        DEPTHMASK, DEPTHTEST_DISABLE, DSTBLEND_ONE, SRCBLEND_ONE, STENCIL_FUNC_EQUAL,
    };

    #[test]
    fn test_sampler_bindings_take_two_slots() {
        let bindings = [
            DescriptorBinding {
                binding: 0,
                kind: DescriptorKind::UniformBuffer,
                stage: ShaderStage::Vertex,
            },
            DescriptorBinding {
                binding: 1,
                kind: DescriptorKind::CombinedImageSampler,
                stage: ShaderStage::Fragment,
            },
        ];
        let entries = layout_entries(&bindings);
        let slots: Vec<u32> = entries.iter().map(|e| e.binding).collect();
        assert_eq!(slots, vec![0, 2, 3]);
        assert_eq!(entries[0].visibility, wgpu::ShaderStages::VERTEX);
        assert_eq!(entries[2].visibility, wgpu::ShaderStages::FRAGMENT);
    }

    #[test]
    fn test_additive_blend_target() {
        let state = PipelineState::from_bits(SRCBLEND_ONE | DSTBLEND_ONE);
        let target = color_target(&state, true);
        let blend = target.blend.expect("additive blend is enabled");
        assert_eq!(blend.color.src_factor, wgpu::BlendFactor::One);
        assert_eq!(blend.color.dst_factor, wgpu::BlendFactor::One);
        assert_eq!(target.write_mask, wgpu::ColorWrites::ALL);
    }

    #[test]
    fn test_depth_only_target_writes_no_color() {
        let state = PipelineState::from_bits(0);
        assert_eq!(color_target(&state, false).write_mask, wgpu::ColorWrites::empty());
    }

    #[test]
    fn test_depth_test_disable_always_passes() {
        let state = PipelineState::from_bits(DEPTHTEST_DISABLE | DEPTHMASK);
        let ds = depth_stencil(&state);
        assert_eq!(ds.depth_compare, wgpu::CompareFunction::Always);
        assert!(!ds.depth_write_enabled);
    }

    #[test]
    fn test_stencil_state_follows_bits() {
        let state = PipelineState::from_bits(STENCIL_FUNC_EQUAL);
        let ds = depth_stencil(&state);
        assert_eq!(ds.stencil.front.compare, wgpu::CompareFunction::Equal);
        assert_eq!(ds.stencil.back.compare, wgpu::CompareFunction::Equal);
    }
}
