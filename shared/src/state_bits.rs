//! Packed render-state bits.
//!
//! One `u64` describes blend, write masks, depth, culling and stencil for a
//! draw. Pipelines are cached per program on the exact value. Mask bits
//! have inverse sense: a set bit disables the write.

// =============================================================================
// Blend
// =============================================================================

pub const SRCBLEND_ZERO: u64 = 0x1;
pub const SRCBLEND_ONE: u64 = 0x0;
pub const SRCBLEND_DST_COLOR: u64 = 0x3;
pub const SRCBLEND_ONE_MINUS_DST_COLOR: u64 = 0x4;
pub const SRCBLEND_SRC_ALPHA: u64 = 0x5;
pub const SRCBLEND_ONE_MINUS_SRC_ALPHA: u64 = 0x6;
pub const SRCBLEND_DST_ALPHA: u64 = 0x7;
pub const SRCBLEND_ONE_MINUS_DST_ALPHA: u64 = 0x8;
pub const SRCBLEND_ALPHA_SATURATE: u64 = 0x9;
pub const SRCBLEND_BITS: u64 = 0xf;

pub const DSTBLEND_ZERO: u64 = 0x0;
pub const DSTBLEND_ONE: u64 = 0x20;
pub const DSTBLEND_SRC_COLOR: u64 = 0x30;
pub const DSTBLEND_ONE_MINUS_SRC_COLOR: u64 = 0x40;
pub const DSTBLEND_SRC_ALPHA: u64 = 0x50;
pub const DSTBLEND_ONE_MINUS_SRC_ALPHA: u64 = 0x60;
pub const DSTBLEND_DST_ALPHA: u64 = 0x70;
pub const DSTBLEND_ONE_MINUS_DST_ALPHA: u64 = 0x80;
pub const DSTBLEND_BITS: u64 = 0xf0;

// =============================================================================
// Write masks
// =============================================================================

/// Disables depth writes.
pub const DEPTHMASK: u64 = 0x100;
pub const REDMASK: u64 = 0x200;
pub const GREENMASK: u64 = 0x400;
pub const BLUEMASK: u64 = 0x800;
pub const ALPHAMASK: u64 = 0x1000;
pub const COLORMASK: u64 = REDMASK | GREENMASK | BLUEMASK;

pub const POLYMODE_LINE: u64 = 0x2000;

// =============================================================================
// Depth and culling
// =============================================================================

pub const DEPTHTEST_DISABLE: u64 = 0x4000;
/// Translated to less-or-equal.
pub const DEPTHFUNC_LESS: u64 = 0x0;
pub const DEPTHFUNC_ALWAYS: u64 = 0x1_0000;
pub const DEPTHFUNC_EQUAL: u64 = 0x2_0000;
pub const DEPTHFUNC_BITS: u64 = 0x3_0000;

pub const CULL_FRONTSIDED: u64 = 0x0;
pub const CULL_BACKSIDED: u64 = 0x4_0000;
pub const CULL_TWOSIDED: u64 = 0x8_0000;
pub const CULL_BITS: u64 = 0xc_0000;

// =============================================================================
// Stencil
// =============================================================================

pub const STENCIL_FUNC_REF_SHIFT: u32 = 20;
pub const STENCIL_FUNC_REF_BITS: u64 = 0xff << STENCIL_FUNC_REF_SHIFT;

pub const STENCIL_FUNC_MASK_SHIFT: u32 = 28;
pub const STENCIL_FUNC_MASK_BITS: u64 = 0xff << STENCIL_FUNC_MASK_SHIFT;

/// Place a stencil reference value in its field.
pub const fn stencil_make_ref(value: u8) -> u64 {
    ((value as u64) << STENCIL_FUNC_REF_SHIFT) & STENCIL_FUNC_REF_BITS
}

/// Place a stencil compare mask in its field.
pub const fn stencil_make_mask(value: u8) -> u64 {
    ((value as u64) << STENCIL_FUNC_MASK_SHIFT) & STENCIL_FUNC_MASK_BITS
}

// The next 12 bits act as front and back unless a back op is set, in which
// case they describe the front face only.
pub const STENCIL_FUNC_ALWAYS: u64 = 0 << 36;
pub const STENCIL_FUNC_LESS: u64 = 1 << 36;
pub const STENCIL_FUNC_LEQUAL: u64 = 2 << 36;
pub const STENCIL_FUNC_GREATER: u64 = 3 << 36;
pub const STENCIL_FUNC_GEQUAL: u64 = 4 << 36;
pub const STENCIL_FUNC_EQUAL: u64 = 5 << 36;
pub const STENCIL_FUNC_NOTEQUAL: u64 = 6 << 36;
pub const STENCIL_FUNC_NEVER: u64 = 7 << 36;
pub const STENCIL_FUNC_BITS: u64 = 7 << 36;

pub const STENCIL_OP_FAIL_KEEP: u64 = 0 << 39;
pub const STENCIL_OP_FAIL_ZERO: u64 = 1 << 39;
pub const STENCIL_OP_FAIL_REPLACE: u64 = 2 << 39;
pub const STENCIL_OP_FAIL_INCR: u64 = 3 << 39;
pub const STENCIL_OP_FAIL_DECR: u64 = 4 << 39;
pub const STENCIL_OP_FAIL_INVERT: u64 = 5 << 39;
pub const STENCIL_OP_FAIL_INCR_WRAP: u64 = 6 << 39;
pub const STENCIL_OP_FAIL_DECR_WRAP: u64 = 7 << 39;
pub const STENCIL_OP_FAIL_BITS: u64 = 7 << 39;

pub const STENCIL_OP_ZFAIL_KEEP: u64 = 0 << 42;
pub const STENCIL_OP_ZFAIL_ZERO: u64 = 1 << 42;
pub const STENCIL_OP_ZFAIL_REPLACE: u64 = 2 << 42;
pub const STENCIL_OP_ZFAIL_INCR: u64 = 3 << 42;
pub const STENCIL_OP_ZFAIL_DECR: u64 = 4 << 42;
pub const STENCIL_OP_ZFAIL_INVERT: u64 = 5 << 42;
pub const STENCIL_OP_ZFAIL_INCR_WRAP: u64 = 6 << 42;
pub const STENCIL_OP_ZFAIL_DECR_WRAP: u64 = 7 << 42;
pub const STENCIL_OP_ZFAIL_BITS: u64 = 7 << 42;

pub const STENCIL_OP_PASS_KEEP: u64 = 0 << 45;
pub const STENCIL_OP_PASS_ZERO: u64 = 1 << 45;
pub const STENCIL_OP_PASS_REPLACE: u64 = 2 << 45;
pub const STENCIL_OP_PASS_INCR: u64 = 3 << 45;
pub const STENCIL_OP_PASS_DECR: u64 = 4 << 45;
pub const STENCIL_OP_PASS_INVERT: u64 = 5 << 45;
pub const STENCIL_OP_PASS_INCR_WRAP: u64 = 6 << 45;
pub const STENCIL_OP_PASS_DECR_WRAP: u64 = 7 << 45;
pub const STENCIL_OP_PASS_BITS: u64 = 7 << 45;

// Back-face state, only active when one of the back op fields is non-zero.
pub const BACK_STENCIL_FUNC_ALWAYS: u64 = 0 << 48;
pub const BACK_STENCIL_FUNC_LESS: u64 = 1 << 48;
pub const BACK_STENCIL_FUNC_LEQUAL: u64 = 2 << 48;
pub const BACK_STENCIL_FUNC_GREATER: u64 = 3 << 48;
pub const BACK_STENCIL_FUNC_GEQUAL: u64 = 4 << 48;
pub const BACK_STENCIL_FUNC_EQUAL: u64 = 5 << 48;
pub const BACK_STENCIL_FUNC_NOTEQUAL: u64 = 6 << 48;
pub const BACK_STENCIL_FUNC_NEVER: u64 = 7 << 48;
pub const BACK_STENCIL_FUNC_BITS: u64 = 7 << 48;

pub const BACK_STENCIL_OP_FAIL_KEEP: u64 = 0 << 51;
pub const BACK_STENCIL_OP_FAIL_ZERO: u64 = 1 << 51;
pub const BACK_STENCIL_OP_FAIL_REPLACE: u64 = 2 << 51;
pub const BACK_STENCIL_OP_FAIL_INCR: u64 = 3 << 51;
pub const BACK_STENCIL_OP_FAIL_DECR: u64 = 4 << 51;
pub const BACK_STENCIL_OP_FAIL_INVERT: u64 = 5 << 51;
pub const BACK_STENCIL_OP_FAIL_INCR_WRAP: u64 = 6 << 51;
pub const BACK_STENCIL_OP_FAIL_DECR_WRAP: u64 = 7 << 51;
pub const BACK_STENCIL_OP_FAIL_BITS: u64 = 7 << 51;

pub const BACK_STENCIL_OP_ZFAIL_KEEP: u64 = 0 << 54;
pub const BACK_STENCIL_OP_ZFAIL_ZERO: u64 = 1 << 54;
pub const BACK_STENCIL_OP_ZFAIL_REPLACE: u64 = 2 << 54;
pub const BACK_STENCIL_OP_ZFAIL_INCR: u64 = 3 << 54;
pub const BACK_STENCIL_OP_ZFAIL_DECR: u64 = 4 << 54;
pub const BACK_STENCIL_OP_ZFAIL_INVERT: u64 = 5 << 54;
pub const BACK_STENCIL_OP_ZFAIL_INCR_WRAP: u64 = 6 << 54;
pub const BACK_STENCIL_OP_ZFAIL_DECR_WRAP: u64 = 7 << 54;
pub const BACK_STENCIL_OP_ZFAIL_BITS: u64 = 7 << 54;

pub const BACK_STENCIL_OP_PASS_KEEP: u64 = 0 << 57;
pub const BACK_STENCIL_OP_PASS_ZERO: u64 = 1 << 57;
pub const BACK_STENCIL_OP_PASS_REPLACE: u64 = 2 << 57;
pub const BACK_STENCIL_OP_PASS_INCR: u64 = 3 << 57;
pub const BACK_STENCIL_OP_PASS_DECR: u64 = 4 << 57;
pub const BACK_STENCIL_OP_PASS_INVERT: u64 = 5 << 57;
pub const BACK_STENCIL_OP_PASS_INCR_WRAP: u64 = 6 << 57;
pub const BACK_STENCIL_OP_PASS_DECR_WRAP: u64 = 7 << 57;
pub const BACK_STENCIL_OP_PASS_BITS: u64 = 7 << 57;

/// Any back op bit selects independent front/back stencil state.
pub const SEPARATE_STENCIL: u64 =
    BACK_STENCIL_OP_FAIL_BITS | BACK_STENCIL_OP_ZFAIL_BITS | BACK_STENCIL_OP_PASS_BITS;
pub const STENCIL_OP_BITS: u64 =
    STENCIL_OP_FAIL_BITS | STENCIL_OP_ZFAIL_BITS | STENCIL_OP_PASS_BITS | SEPARATE_STENCIL;
pub const STENCIL_FRONT_OPS: u64 = STENCIL_OP_FAIL_BITS | STENCIL_OP_ZFAIL_BITS | STENCIL_OP_PASS_BITS;
pub const STENCIL_BACK_OPS: u64 = SEPARATE_STENCIL;

/// Distance between a back op field and its front counterpart.
pub const BACK_OPS_SHIFT: u32 = 12;

// =============================================================================
// Misc
// =============================================================================

pub const DEPTH_BOUNDS_TEST: u64 = 0x4000_0000_0000_0000;
/// Inverts the cull face for mirrored views.
pub const MIRROR_VIEW: u64 = 0x8000_0000_0000_0000;

pub const DEFAULT: u64 = DEPTHFUNC_ALWAYS;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_are_disjoint() {
        let fields = [
            SRCBLEND_BITS,
            DSTBLEND_BITS,
            DEPTHMASK,
            REDMASK | GREENMASK | BLUEMASK | ALPHAMASK,
            POLYMODE_LINE,
            DEPTHTEST_DISABLE,
            DEPTHFUNC_BITS,
            CULL_BITS,
            STENCIL_FUNC_REF_BITS,
            STENCIL_FUNC_MASK_BITS,
            STENCIL_FUNC_BITS,
            STENCIL_FRONT_OPS,
            BACK_STENCIL_FUNC_BITS,
            STENCIL_BACK_OPS,
            DEPTH_BOUNDS_TEST,
            MIRROR_VIEW,
        ];
        for (i, a) in fields.iter().enumerate() {
            for b in &fields[i + 1..] {
                assert_eq!(a & b, 0, "{a:#x} overlaps {b:#x}");
            }
        }
    }

    #[test]
    fn test_back_ops_shift_onto_front_ops() {
        assert_eq!(BACK_STENCIL_OP_FAIL_BITS >> BACK_OPS_SHIFT, STENCIL_OP_FAIL_BITS);
        assert_eq!(BACK_STENCIL_OP_ZFAIL_INVERT >> BACK_OPS_SHIFT, STENCIL_OP_ZFAIL_INVERT);
        assert_eq!(BACK_STENCIL_OP_PASS_DECR_WRAP >> BACK_OPS_SHIFT, STENCIL_OP_PASS_DECR_WRAP);
    }

    #[test]
    fn test_stencil_make_ref_and_mask() {
        assert_eq!(stencil_make_ref(0x80) >> STENCIL_FUNC_REF_SHIFT, 0x80);
        assert_eq!(stencil_make_mask(0xff), STENCIL_FUNC_MASK_BITS);
    }
}
