//! GPU buffer objects.
//!
//! A [`BufferStore`] either owns a native buffer or references a byte range
//! of one owned elsewhere. References are how the geometry cache and the
//! uniform allocator hand out sub-ranges of their large arenas: freeing a
//! reference never releases the underlying buffer.

mod copy;
#[cfg(test)]
mod tests;

pub use copy::stream_copy;
pub use crate::device::{BufferKind, BufferUsage};

use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing::{info, trace, warn};

use crate::device::{BufferDescriptor, DeviceError, NativeBuffer, RenderDevice};

/// Uploads and mappings must start on this boundary.
pub const UPDATE_ALIGNMENT: u64 = 16;

/// Native buffers are allocated in multiples of this.
pub const ALLOCATION_GRANULARITY: u64 = 16;

static SHOW_BUFFERS: AtomicBool = AtomicBool::new(false);

/// Log every native buffer allocation and free at info level.
pub fn set_show_buffers(enabled: bool) {
    SHOW_BUFFERS.store(enabled, Ordering::Relaxed);
}

fn log_buffer_event(event: &str, kind: BufferKind, size: u64) {
    if SHOW_BUFFERS.load(Ordering::Relaxed) {
        info!("{} {} buffer: {} bytes", event, kind, size);
    } else {
        trace!("{} {} buffer: {} bytes", event, kind, size);
    }
}

/// Round `value` up to a multiple of `align` (a power of two).
pub const fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

/// A byte range inside a native buffer.
///
/// This is the value that gets bound for drawing or written into a
/// descriptor; it carries no ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferView {
    pub owner: NativeBuffer,
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    #[error("buffer is already allocated")]
    AlreadyAllocated,
    #[error("buffer allocation size must be positive")]
    InvalidSize,
    #[error("buffer is not allocated")]
    NotAllocated,
    #[error("size overrun: {size} bytes at offset {offset} exceeds buffer size {capacity}")]
    SizeOverrun { offset: u64, size: u64, capacity: u64 },
    #[error("update offset {0} is not 16-byte aligned")]
    MisalignedOffset(u64),
    #[error("Cannot map a buffer marked as static")]
    MapStatic,
    #[error("buffer is already mapped")]
    AlreadyMapped,
    #[error("buffer is not mapped")]
    NotMapped,
    #[error("cannot reference while mapped")]
    ReferenceWhileMapped,
    #[error("reference range {offset}+{size} exceeds source size {source_size}")]
    ReferenceOutOfRange {
        offset: u64,
        size: u64,
        source_size: u64,
    },
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// A GPU buffer, or a non-owning reference into one.
#[derive(Debug)]
pub struct BufferStore {
    kind: BufferKind,
    usage: BufferUsage,
    native: Option<NativeBuffer>,
    offset: u64,
    size: u64,
    owns_buffer: bool,
    mapped: bool,
}

impl BufferStore {
    /// An empty, unallocated store.
    pub fn new(kind: BufferKind) -> Self {
        Self {
            kind,
            usage: BufferUsage::Static,
            native: None,
            offset: 0,
            size: 0,
            owns_buffer: true,
            mapped: false,
        }
    }

    /// A non-owning store covering `view`.
    pub fn from_view(kind: BufferKind, usage: BufferUsage, view: BufferView) -> Self {
        Self {
            kind,
            usage,
            native: Some(view.owner),
            offset: view.offset,
            size: view.size,
            owns_buffer: false,
            mapped: false,
        }
    }

    /// A non-owning store covering `size` bytes of `other` starting at `offset`.
    pub fn sub_range(other: &BufferStore, offset: u64, size: u64) -> Result<Self, BufferError> {
        let view = other.range_view(offset, size)?;
        Ok(Self::from_view(other.kind, other.usage, view))
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Size actually reserved on the device for an owning store.
    pub fn allocated_size(&self) -> u64 {
        align_up(self.size, ALLOCATION_GRANULARITY)
    }

    /// Byte offset into the native buffer. Zero for owners.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn is_allocated(&self) -> bool {
        self.native.is_some()
    }

    pub fn owns_buffer(&self) -> bool {
        self.owns_buffer
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped
    }

    pub fn native(&self) -> Option<NativeBuffer> {
        self.native
    }

    /// The whole range this store covers.
    pub fn view(&self) -> Option<BufferView> {
        self.native.map(|owner| BufferView {
            owner,
            offset: self.offset,
            size: self.size,
        })
    }

    fn range_view(&self, offset: u64, size: u64) -> Result<BufferView, BufferError> {
        let owner = self.native.ok_or(BufferError::NotAllocated)?;
        if offset.checked_add(size).is_none_or(|end| end > self.size) {
            return Err(BufferError::ReferenceOutOfRange {
                offset,
                size,
                source_size: self.size,
            });
        }
        Ok(BufferView {
            owner,
            offset: self.offset + offset,
            size,
        })
    }

    /// Allocate a native buffer of `size` bytes, uploading `data` if given.
    pub fn alloc<D: RenderDevice>(
        &mut self,
        device: &mut D,
        data: Option<&[u8]>,
        size: u64,
        usage: BufferUsage,
    ) -> Result<(), BufferError> {
        if self.native.is_some() {
            return Err(BufferError::AlreadyAllocated);
        }
        if size == 0 {
            return Err(BufferError::InvalidSize);
        }

        let native = device.create_buffer(&BufferDescriptor {
            label: match self.kind {
                BufferKind::Vertex => "vertex cache",
                BufferKind::Index => "index cache",
                BufferKind::Uniform => "uniform cache",
            },
            size: align_up(size, ALLOCATION_GRANULARITY),
            kind: self.kind,
            usage,
        })?;

        self.native = Some(native);
        self.usage = usage;
        self.size = size;
        self.offset = 0;
        self.owns_buffer = true;
        self.mapped = false;
        log_buffer_event("allocated", self.kind, size);

        if let Some(data) = data {
            self.update(device, data, 0)?;
        }
        Ok(())
    }

    /// Release the buffer. References are only cleared.
    pub fn free<D: RenderDevice>(&mut self, device: &mut D) {
        if self.mapped {
            if let Some(native) = self.native {
                device.unmap_memory(native.memory);
            }
            self.mapped = false;
        }

        if !self.owns_buffer {
            self.clear_without_freeing();
            return;
        }

        let Some(native) = self.native.take() else {
            return;
        };
        device.destroy_buffer(native);
        log_buffer_event("freed", self.kind, self.size);
        self.clear_without_freeing();
    }

    /// Forget the native buffer without destroying it.
    pub fn clear_without_freeing(&mut self) {
        self.native = None;
        self.size = 0;
        self.offset = 0;
        self.owns_buffer = true;
        self.mapped = false;
    }

    /// Copy `data` into the buffer at `offset` (relative to this store).
    ///
    /// Goes straight through the device mapping, so this also works for
    /// static buffers, which cannot be mapped with [`BufferStore::map_buffer`].
    pub fn update<D: RenderDevice>(
        &self,
        device: &mut D,
        data: &[u8],
        offset: u64,
    ) -> Result<(), BufferError> {
        let native = self.native.ok_or(BufferError::NotAllocated)?;
        let size = data.len() as u64;
        if offset + size > self.size {
            return Err(BufferError::SizeOverrun {
                offset,
                size,
                capacity: self.size,
            });
        }
        let start = self.offset + offset;
        if start % UPDATE_ALIGNMENT != 0 {
            return Err(BufferError::MisalignedOffset(start));
        }
        if size == 0 {
            return Ok(());
        }

        let dst = device.map_memory(native.memory, start, size)?;
        stream_copy(dst, data);
        device.unmap_memory(native.memory);
        Ok(())
    }

    /// Map the whole range for host writes. Static buffers cannot be mapped.
    pub fn map_buffer<'d, D: RenderDevice>(
        &mut self,
        device: &'d mut D,
    ) -> Result<&'d mut [u8], BufferError> {
        let native = self.native.ok_or(BufferError::NotAllocated)?;
        if self.usage == BufferUsage::Static {
            return Err(BufferError::MapStatic);
        }
        if self.mapped {
            return Err(BufferError::AlreadyMapped);
        }
        let bytes = device.map_memory(native.memory, self.offset, self.size)?;
        self.mapped = true;
        Ok(bytes)
    }

    pub fn unmap_buffer<D: RenderDevice>(&mut self, device: &mut D) -> Result<(), BufferError> {
        let native = self.native.ok_or(BufferError::NotAllocated)?;
        if self.usage == BufferUsage::Static {
            return Err(BufferError::MapStatic);
        }
        if !self.mapped {
            return Err(BufferError::NotMapped);
        }
        device.unmap_memory(native.memory);
        self.mapped = false;
        Ok(())
    }

    /// Become a non-owning reference to all of `other`.
    pub fn reference<D: RenderDevice>(
        &mut self,
        device: &mut D,
        other: &BufferStore,
    ) -> Result<(), BufferError> {
        self.reference_range(device, other, 0, other.size)
    }

    /// Become a non-owning reference to `size` bytes of `other` at `offset`.
    ///
    /// Anything this store previously held is freed first.
    pub fn reference_range<D: RenderDevice>(
        &mut self,
        device: &mut D,
        other: &BufferStore,
        offset: u64,
        size: u64,
    ) -> Result<(), BufferError> {
        if self.mapped {
            return Err(BufferError::ReferenceWhileMapped);
        }
        let view = other.range_view(offset, size)?;
        self.free(device);
        *self = Self::from_view(other.kind, other.usage, view);
        Ok(())
    }
}

impl Drop for BufferStore {
    fn drop(&mut self) {
        if self.owns_buffer && self.native.is_some() {
            warn!("{} buffer dropped without free(); native buffer leaked", self.kind);
        }
    }
}
