//! Copies into mapped device memory.
//!
//! Mapped memory is typically write-combined, so large uploads use
//! non-temporal stores on x86_64 and finish with a store fence.

/// Copy `src` into `dst`. Both slices must have the same length.
pub fn stream_copy(dst: &mut [u8], src: &[u8]) {
    assert_eq!(dst.len(), src.len(), "stream_copy length mismatch");

    #[cfg(target_arch = "x86_64")]
    {
        if src.len() >= 64 && dst.as_ptr() as usize % 16 == 0 {
            // SAFETY: lengths match and `dst` is 16-byte aligned; SSE2 is part
            // of the x86_64 baseline.
            unsafe { stream_copy_sse2(dst, src) };
            return;
        }
    }

    dst.copy_from_slice(src);
}

#[cfg(target_arch = "x86_64")]
unsafe fn stream_copy_sse2(dst: &mut [u8], src: &[u8]) {
    use std::arch::x86_64::{__m128i, _mm_loadu_si128, _mm_sfence, _mm_stream_si128};

    let blocks = src.len() / 16;
    let d = dst.as_mut_ptr().cast::<__m128i>();
    let s = src.as_ptr().cast::<__m128i>();
    for i in 0..blocks {
        // SAFETY: i < blocks keeps both 16-byte accesses in bounds; `d` is
        // aligned, `s` is read unaligned.
        unsafe { _mm_stream_si128(d.add(i), _mm_loadu_si128(s.add(i))) };
    }

    let tail = blocks * 16;
    dst[tail..].copy_from_slice(&src[tail..]);

    // SAFETY: sfence has no memory preconditions.
    unsafe { _mm_sfence() };
}
