//! Packed geometry cache handles.
//!
//! A handle is a self-describing 64-bit value: decoding it never needs a
//! table lookup. Layout, low bit first:
//!
//! | bits    | field      | width |
//! |---------|------------|-------|
//! | 0       | static     | 1     |
//! | 1..24   | byte size  | 23    |
//! | 24..49  | byte offset| 25    |
//! | 49..64  | frame tag  | 15    |

use serde::{Deserialize, Serialize};

/// Set on handles that live in the static arena.
pub const STATIC_BIT: u64 = 0x1;

pub const SIZE_SHIFT: u32 = 1;
pub const SIZE_MASK: u64 = 0x7f_ffff;

pub const OFFSET_SHIFT: u32 = 24;
pub const OFFSET_MASK: u64 = 0x1ff_ffff;

pub const FRAME_SHIFT: u32 = 49;
pub const FRAME_MASK: u64 = 0x7fff;

/// Opaque handle to a sub-allocation inside the frame geometry cache.
///
/// Produced by the allocator, copied into draw surfaces, decoded by the
/// backend one frame later. `GeoHandle::NULL` marks "no allocation".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct GeoHandle(u64);

impl GeoHandle {
    pub const NULL: GeoHandle = GeoHandle(0);

    /// Largest byte size a handle can describe.
    pub const MAX_SIZE: u64 = SIZE_MASK;

    /// Largest byte offset a handle can describe.
    pub const MAX_OFFSET: u64 = OFFSET_MASK;

    /// Pack a handle. Every field is masked to its width.
    pub const fn pack(frame: u64, offset: u64, size: u64, is_static: bool) -> Self {
        let mut raw = ((frame & FRAME_MASK) << FRAME_SHIFT)
            | ((offset & OFFSET_MASK) << OFFSET_SHIFT)
            | ((size & SIZE_MASK) << SIZE_SHIFT);
        if is_static {
            raw |= STATIC_BIT;
        }
        GeoHandle(raw)
    }

    pub const fn from_raw(raw: u64) -> Self {
        GeoHandle(raw)
    }

    pub const fn to_raw(self) -> u64 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    pub const fn is_static(self) -> bool {
        self.0 & STATIC_BIT != 0
    }

    pub const fn size(self) -> u64 {
        (self.0 >> SIZE_SHIFT) & SIZE_MASK
    }

    pub const fn offset(self) -> u64 {
        (self.0 >> OFFSET_SHIFT) & OFFSET_MASK
    }

    /// Frame number the handle was allocated in, masked to 15 bits.
    pub const fn frame_tag(self) -> u64 {
        (self.0 >> FRAME_SHIFT) & FRAME_MASK
    }
}

/// Mask a frame counter down to the width stored in a handle.
pub const fn frame_tag(frame: u64) -> u64 {
    frame & FRAME_MASK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_fields_roundtrip() {
        let h = GeoHandle::pack(7, 4096, 3200, false);
        assert_eq!(h.frame_tag(), 7);
        assert_eq!(h.offset(), 4096);
        assert_eq!(h.size(), 3200);
        assert!(!h.is_static());
        assert!(!h.is_null());
    }

    #[test]
    fn test_static_bit() {
        let h = GeoHandle::pack(0, 0, 16, true);
        assert!(h.is_static());
        assert_eq!(h.to_raw() & STATIC_BIT, STATIC_BIT);
    }

    #[test]
    fn test_frame_tag_wraps_at_mask() {
        let h = GeoHandle::pack(FRAME_MASK + 3, 0, 16, false);
        assert_eq!(h.frame_tag(), 2);
        assert_eq!(frame_tag(FRAME_MASK + 1), 0);
    }

    #[test]
    fn test_fields_do_not_overlap() {
        let h = GeoHandle::pack(FRAME_MASK, OFFSET_MASK, SIZE_MASK, true);
        assert_eq!(h.to_raw(), u64::MAX);
        assert_eq!(h.frame_tag(), FRAME_MASK);
        assert_eq!(h.offset(), OFFSET_MASK);
        assert_eq!(h.size(), SIZE_MASK);
    }

    #[test]
    fn test_null_handle() {
        assert!(GeoHandle::NULL.is_null());
        assert_eq!(GeoHandle::default(), GeoHandle::NULL);
    }
}
