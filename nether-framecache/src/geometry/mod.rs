//! Frame-pipelined geometry cache.
//!
//! N transient buffer sets plus one static set. The frontend bump-allocates
//! vertex, index and joint data into the set for the frame it is building;
//! the backend resolves those handles one frame later, after
//! [`FrameGeometryCache::begin_back_end`] has moved the frontend on to the
//! next set. The frame counter advances in exactly one place.


use std::fmt;

use bytemuck::Pod;
use nether_framecache_shared::GeoHandle;
use nether_framecache_shared::handle::frame_tag;
use tracing::info;

use crate::buffer::{
    BufferError, BufferKind, BufferStore, BufferUsage, BufferView, UPDATE_ALIGNMENT, align_up,
};
use crate::config::GeometryConfig;
use crate::device::RenderDevice;
use crate::error::{OrFatal, fatal};

/// Static allocations keep every upload offset on this boundary.
pub const STATIC_ALIGNMENT: u64 = 16;

/// Uniform-backed joint data never aligns below this.
const MIN_JOINT_ALIGNMENT: u64 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    Vertex,
    Index,
    Joint,
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CacheKind::Vertex => "vertex",
            CacheKind::Index => "index",
            CacheKind::Joint => "joint",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arena {
    /// One of the per-frame transient sets.
    Frame,
    /// The level-lifetime static set.
    Static,
}

/// A budget was exceeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocError {
    pub kind: CacheKind,
    pub arena: Arena,
    pub requested: u64,
    pub available: u64,
}

impl AllocError {
    /// Name of the config field that has to grow.
    pub fn budget(&self) -> &'static str {
        match (self.arena, self.kind) {
            (Arena::Frame, CacheKind::Vertex) => "vertex_bytes_per_frame",
            (Arena::Frame, CacheKind::Index) => "index_bytes_per_frame",
            (Arena::Frame, CacheKind::Joint) => "joint_bytes_per_frame",
            (Arena::Static, CacheKind::Vertex) => "static_vertex_bytes",
            (Arena::Static, CacheKind::Index) => "static_index_bytes",
            (Arena::Static, CacheKind::Joint) => "static joint data",
        }
    }
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arena = match self.arena {
            Arena::Frame => "",
            Arena::Static => "static ",
        };
        write!(
            f,
            "Out of {}{} buffer cache: requested {} bytes, {} available, increase {}",
            arena,
            self.kind,
            self.requested,
            self.available,
            self.budget()
        )
    }
}

impl std::error::Error for AllocError {}

/// Usage snapshot for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub frame: u64,
    pub write_slot: usize,
    pub draw_list_slot: usize,
    pub allocations: u32,
    pub vertex_used: u64,
    pub index_used: u64,
    pub joint_used: u64,
    pub static_allocations: u32,
    pub static_vertex_used: u64,
    pub static_index_used: u64,
    pub most_used_vertex: u64,
    pub most_used_index: u64,
    pub most_used_joint: u64,
}

/// Vertex, index and joint stores for one frame (or the static data).
struct GeoBufferSet {
    vertex: BufferStore,
    index: BufferStore,
    joint: BufferStore,
    vertex_used: u64,
    index_used: u64,
    joint_used: u64,
    allocations: u32,
}

impl GeoBufferSet {
    fn new() -> Self {
        Self {
            vertex: BufferStore::new(BufferKind::Vertex),
            index: BufferStore::new(BufferKind::Index),
            joint: BufferStore::new(BufferKind::Uniform),
            vertex_used: 0,
            index_used: 0,
            joint_used: 0,
            allocations: 0,
        }
    }

    fn alloc<D: RenderDevice>(
        &mut self,
        device: &mut D,
        vertex_bytes: u64,
        index_bytes: u64,
        joint_bytes: u64,
        usage: BufferUsage,
    ) -> Result<(), BufferError> {
        for (store, bytes) in [
            (&mut self.vertex, vertex_bytes),
            (&mut self.index, index_bytes),
            (&mut self.joint, joint_bytes),
        ] {
            if bytes > 0 {
                store.alloc(device, None, bytes, usage)?;
            }
        }
        self.clear();
        Ok(())
    }

    fn free<D: RenderDevice>(&mut self, device: &mut D) {
        self.vertex.free(device);
        self.index.free(device);
        self.joint.free(device);
        self.clear();
    }

    fn clear(&mut self) {
        self.vertex_used = 0;
        self.index_used = 0;
        self.joint_used = 0;
        self.allocations = 0;
    }

    fn store(&self, kind: CacheKind) -> &BufferStore {
        match kind {
            CacheKind::Vertex => &self.vertex,
            CacheKind::Index => &self.index,
            CacheKind::Joint => &self.joint,
        }
    }

    fn used_mut(&mut self, kind: CacheKind) -> &mut u64 {
        match kind {
            CacheKind::Vertex => &mut self.vertex_used,
            CacheKind::Index => &mut self.index_used,
            CacheKind::Joint => &mut self.joint_used,
        }
    }

    /// Bump-allocate `bytes` of `kind`, uploading `data` at the new offset.
    ///
    /// Counters are untouched when the budget check fails.
    fn actually_alloc<D: RenderDevice>(
        &mut self,
        device: &mut D,
        kind: CacheKind,
        arena: Arena,
        data: Option<&[u8]>,
        bytes: u64,
        frame: u64,
    ) -> Result<GeoHandle, AllocError> {
        if bytes == 0 {
            return Ok(GeoHandle::NULL);
        }

        let capacity = self.store(kind).size();
        let used = *self.used_mut(kind);
        let available = capacity.saturating_sub(used);
        if bytes > available || bytes > GeoHandle::MAX_SIZE {
            return Err(AllocError {
                kind,
                arena,
                requested: bytes,
                available: available.min(GeoHandle::MAX_SIZE),
            });
        }

        *self.used_mut(kind) = used + bytes;
        let offset = used;

        if let Some(data) = data {
            if data.len() as u64 > bytes {
                fatal(format!(
                    "{kind} upload of {} bytes overruns its {bytes} byte allocation",
                    data.len()
                ));
            }
            self.store(kind).update(device, data, offset).or_fatal();
        }
        self.allocations += 1;

        Ok(GeoHandle::pack(frame, offset, bytes, arena == Arena::Static))
    }
}

/// The frame-pipelined geometry and joint allocator.
pub struct FrameGeometryCache {
    frames: Vec<GeoBufferSet>,
    static_data: GeoBufferSet,
    config: GeometryConfig,
    uniform_alignment: u64,
    current_frame: u64,
    list_num: usize,
    draw_list_num: usize,
    most_used_vertex: u64,
    most_used_index: u64,
    most_used_joint: u64,
    show_vertex_cache: bool,
}

impl FrameGeometryCache {
    /// Allocate every arena. The frame counter starts at zero. Vertex and
    /// index alignments below [`UPDATE_ALIGNMENT`] are raised to it.
    pub fn new<D: RenderDevice>(
        device: &mut D,
        config: &GeometryConfig,
        uniform_alignment: u64,
    ) -> Result<Self, BufferError> {
        // Uploads go straight to the allocation offset.
        let config = GeometryConfig {
            vertex_alignment: config.vertex_alignment.max(UPDATE_ALIGNMENT),
            index_alignment: config.index_alignment.max(UPDATE_ALIGNMENT),
            ..config.clone()
        };
        let mut cache = Self {
            frames: Vec::new(),
            static_data: GeoBufferSet::new(),
            config,
            uniform_alignment: uniform_alignment.max(MIN_JOINT_ALIGNMENT),
            current_frame: 0,
            list_num: 0,
            draw_list_num: 0,
            most_used_vertex: 0,
            most_used_index: 0,
            most_used_joint: 0,
            show_vertex_cache: false,
        };
        cache.init(device)?;
        Ok(cache)
    }

    fn init<D: RenderDevice>(&mut self, device: &mut D) -> Result<(), BufferError> {
        let frames_in_flight = self.config.frames_in_flight.max(1);
        self.frames = (0..frames_in_flight).map(|_| GeoBufferSet::new()).collect();
        for set in &mut self.frames {
            set.alloc(
                device,
                self.config.vertex_bytes_per_frame,
                self.config.index_bytes_per_frame,
                self.config.joint_bytes_per_frame,
                BufferUsage::Dynamic,
            )?;
        }
        self.static_data.alloc(
            device,
            self.config.static_vertex_bytes,
            self.config.static_index_bytes,
            0,
            BufferUsage::Static,
        )?;

        self.current_frame = 0;
        self.list_num = 0;
        self.draw_list_num = 0;
        self.most_used_vertex = 0;
        self.most_used_index = 0;
        self.most_used_joint = 0;

        info!(
            "geometry cache: {} frames x ({} kB vertex, {} kB index, {} kB joint), static {} kB vertex, {} kB index",
            frames_in_flight,
            self.config.vertex_bytes_per_frame / 1024,
            self.config.index_bytes_per_frame / 1024,
            self.config.joint_bytes_per_frame / 1024,
            self.config.static_vertex_bytes / 1024,
            self.config.static_index_bytes / 1024,
        );
        Ok(())
    }

    /// Free every arena.
    pub fn shutdown<D: RenderDevice>(&mut self, device: &mut D) {
        for set in &mut self.frames {
            set.free(device);
        }
        self.frames.clear();
        self.static_data.free(device);
    }

    /// Free and reallocate everything with the same configuration.
    pub fn purge_all<D: RenderDevice>(&mut self, device: &mut D) -> Result<(), BufferError> {
        self.shutdown(device);
        self.init(device)
    }

    /// Forget all static allocations. Their handles must not be used again.
    pub fn free_static_data(&mut self) {
        self.static_data.clear();
        self.most_used_vertex = 0;
        self.most_used_index = 0;
        self.most_used_joint = 0;
    }

    pub fn set_show_vertex_cache(&mut self, enabled: bool) {
        self.show_vertex_cache = enabled;
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    pub fn current_frame(&self) -> u64 {
        self.current_frame
    }

    /// Set the frontend is writing.
    pub fn write_slot(&self) -> usize {
        self.list_num
    }

    /// Set the backend is drawing from.
    pub fn draw_list_slot(&self) -> usize {
        self.draw_list_num
    }

    pub fn uniform_alignment(&self) -> u64 {
        self.uniform_alignment
    }

    // ========================================================================
    // Frontend allocation
    // ========================================================================

    fn alloc_frame<D: RenderDevice>(
        &mut self,
        device: &mut D,
        kind: CacheKind,
        data: Option<&[u8]>,
        count: usize,
        element_size: usize,
    ) -> Result<GeoHandle, AllocError> {
        let align = match kind {
            CacheKind::Vertex => self.config.vertex_alignment,
            CacheKind::Index => self.config.index_alignment,
            CacheKind::Joint => self.uniform_alignment,
        };
        let bytes = align_up(count as u64 * element_size as u64, align);
        let frame = self.current_frame;
        let set = &mut self.frames[self.list_num];
        set.actually_alloc(device, kind, Arena::Frame, data, bytes, frame)
    }

    pub fn try_alloc_vertex<D: RenderDevice>(
        &mut self,
        device: &mut D,
        data: Option<&[u8]>,
        count: usize,
        element_size: usize,
    ) -> Result<GeoHandle, AllocError> {
        self.alloc_frame(device, CacheKind::Vertex, data, count, element_size)
    }

    pub fn try_alloc_index<D: RenderDevice>(
        &mut self,
        device: &mut D,
        data: Option<&[u8]>,
        count: usize,
        element_size: usize,
    ) -> Result<GeoHandle, AllocError> {
        self.alloc_frame(device, CacheKind::Index, data, count, element_size)
    }

    pub fn try_alloc_joint<D: RenderDevice>(
        &mut self,
        device: &mut D,
        data: Option<&[u8]>,
        count: usize,
        element_size: usize,
    ) -> Result<GeoHandle, AllocError> {
        self.alloc_frame(device, CacheKind::Joint, data, count, element_size)
    }

    /// Allocate transient vertex data, terminating if the frame budget is exhausted.
    pub fn alloc_vertex<D: RenderDevice>(
        &mut self,
        device: &mut D,
        data: Option<&[u8]>,
        count: usize,
        element_size: usize,
    ) -> GeoHandle {
        self.try_alloc_vertex(device, data, count, element_size)
            .or_fatal()
    }

    pub fn alloc_index<D: RenderDevice>(
        &mut self,
        device: &mut D,
        data: Option<&[u8]>,
        count: usize,
        element_size: usize,
    ) -> GeoHandle {
        self.try_alloc_index(device, data, count, element_size)
            .or_fatal()
    }

    pub fn alloc_joint<D: RenderDevice>(
        &mut self,
        device: &mut D,
        data: Option<&[u8]>,
        count: usize,
        element_size: usize,
    ) -> GeoHandle {
        self.try_alloc_joint(device, data, count, element_size)
            .or_fatal()
    }

    /// Allocate and upload a slice of POD vertices.
    pub fn alloc_vertices<D: RenderDevice, T: Pod>(&mut self, device: &mut D, verts: &[T]) -> GeoHandle {
        self.alloc_vertex(
            device,
            Some(bytemuck::cast_slice(verts)),
            verts.len(),
            size_of::<T>(),
        )
    }

    pub fn alloc_indices<D: RenderDevice>(&mut self, device: &mut D, indices: &[u32]) -> GeoHandle {
        self.alloc_index(
            device,
            Some(bytemuck::cast_slice(indices)),
            indices.len(),
            size_of::<u32>(),
        )
    }

    fn alloc_static<D: RenderDevice>(
        &mut self,
        device: &mut D,
        kind: CacheKind,
        data: Option<&[u8]>,
        bytes: u64,
    ) -> Result<GeoHandle, AllocError> {
        let bytes = align_up(bytes, STATIC_ALIGNMENT);
        let frame = self.current_frame;
        self.static_data
            .actually_alloc(device, kind, Arena::Static, data, bytes, frame)
    }

    pub fn try_alloc_static_vertex<D: RenderDevice>(
        &mut self,
        device: &mut D,
        data: Option<&[u8]>,
        bytes: u64,
    ) -> Result<GeoHandle, AllocError> {
        self.alloc_static(device, CacheKind::Vertex, data, bytes)
    }

    pub fn try_alloc_static_index<D: RenderDevice>(
        &mut self,
        device: &mut D,
        data: Option<&[u8]>,
        bytes: u64,
    ) -> Result<GeoHandle, AllocError> {
        self.alloc_static(device, CacheKind::Index, data, bytes)
    }

    pub fn alloc_static_vertex<D: RenderDevice>(
        &mut self,
        device: &mut D,
        data: Option<&[u8]>,
        bytes: u64,
    ) -> GeoHandle {
        self.try_alloc_static_vertex(device, data, bytes).or_fatal()
    }

    pub fn alloc_static_index<D: RenderDevice>(
        &mut self,
        device: &mut D,
        data: Option<&[u8]>,
        bytes: u64,
    ) -> GeoHandle {
        self.try_alloc_static_index(device, data, bytes).or_fatal()
    }

    /// Run `write` over the mapped bytes of a handle allocated this frame.
    ///
    /// Static handles cannot be mapped.
    pub fn mapped_vertex_buffer<D: RenderDevice, R>(
        &self,
        device: &mut D,
        handle: GeoHandle,
        write: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, BufferError> {
        self.map_current(device, CacheKind::Vertex, handle, write)
    }

    pub fn mapped_index_buffer<D: RenderDevice, R>(
        &self,
        device: &mut D,
        handle: GeoHandle,
        write: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, BufferError> {
        self.map_current(device, CacheKind::Index, handle, write)
    }

    fn map_current<D: RenderDevice, R>(
        &self,
        device: &mut D,
        kind: CacheKind,
        handle: GeoHandle,
        write: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, BufferError> {
        let set = if handle.is_static() {
            &self.static_data
        } else {
            if !self.cache_is_current(handle) {
                fatal(format!(
                    "cannot map {kind} handle from frame {}: it is no longer being written",
                    handle.frame_tag()
                ));
            }
            &self.frames[self.list_num]
        };
        let mut range = BufferStore::sub_range(set.store(kind), handle.offset(), handle.size())?;
        let result = write(range.map_buffer(device)?);
        range.unmap_buffer(device)?;
        Ok(result)
    }

    // ========================================================================
    // Backend resolution
    // ========================================================================

    /// True for static handles and handles allocated in the frame being built.
    pub fn cache_is_current(&self, handle: GeoHandle) -> bool {
        handle.is_static() || handle.frame_tag() == frame_tag(self.current_frame)
    }

    pub fn cache_is_static(&self, handle: GeoHandle) -> bool {
        handle.is_static()
    }

    fn resolve(&self, kind: CacheKind, handle: GeoHandle) -> Option<BufferView> {
        let set = if handle.is_null() {
            return None;
        } else if handle.is_static() {
            &self.static_data
        } else if handle.frame_tag() == frame_tag(self.current_frame.wrapping_sub(1)) {
            &self.frames[self.draw_list_num]
        } else {
            return None;
        };
        BufferStore::sub_range(set.store(kind), handle.offset(), handle.size())
            .ok()?
            .view()
    }

    /// Resolve a vertex handle for the backend pass following its frame.
    ///
    /// Returns `None` for transient handles from any other frame.
    pub fn get_vertex_buffer(&self, handle: GeoHandle) -> Option<BufferView> {
        self.resolve(CacheKind::Vertex, handle)
    }

    pub fn get_index_buffer(&self, handle: GeoHandle) -> Option<BufferView> {
        self.resolve(CacheKind::Index, handle)
    }

    pub fn get_joint_buffer(&self, handle: GeoHandle) -> Option<BufferView> {
        self.resolve(CacheKind::Joint, handle)
    }

    /// Hand the frame just built to the backend and start writing the next set.
    pub fn begin_back_end(&mut self) {
        if self.frames.is_empty() {
            fatal("begin_back_end called on a shut down geometry cache");
        }
        let filled = &self.frames[self.list_num];
        self.most_used_vertex = self.most_used_vertex.max(filled.vertex_used);
        self.most_used_index = self.most_used_index.max(filled.index_used);
        self.most_used_joint = self.most_used_joint.max(filled.joint_used);

        if self.show_vertex_cache {
            info!(
                "{:08}: {} alloc, {:.1} kB vertex, {:.1} kB index, {:.1} kB joint : {:.1} kB vertex, {:.1} kB index, {:.1} kB joint",
                self.current_frame,
                filled.allocations,
                kilobytes(filled.vertex_used),
                kilobytes(filled.index_used),
                kilobytes(filled.joint_used),
                kilobytes(self.most_used_vertex),
                kilobytes(self.most_used_index),
                kilobytes(self.most_used_joint),
            );
        }

        self.draw_list_num = self.list_num;
        self.current_frame += 1;
        self.list_num = (self.current_frame % self.frames.len() as u64) as usize;
        self.frames[self.list_num].clear();
    }

    pub fn stats(&self) -> CacheStats {
        let (allocations, vertex_used, index_used, joint_used) = self
            .frames
            .get(self.list_num)
            .map(|set| (set.allocations, set.vertex_used, set.index_used, set.joint_used))
            .unwrap_or_default();
        CacheStats {
            frame: self.current_frame,
            write_slot: self.list_num,
            draw_list_slot: self.draw_list_num,
            allocations,
            vertex_used,
            index_used,
            joint_used,
            static_allocations: self.static_data.allocations,
            static_vertex_used: self.static_data.vertex_used,
            static_index_used: self.static_data.index_used,
            most_used_vertex: self.most_used_vertex,
            most_used_index: self.most_used_index,
            most_used_joint: self.most_used_joint,
        }
    }
}

fn kilobytes(bytes: u64) -> f64 {
    bytes as f64 / 1024.0
}
