//! Render-state decoding.
//!
//! Turns the packed `u64` state bits into a backend-neutral pipeline
//! description and into a readable dump for diagnostics.

use std::fmt::Write;

use nether_framecache_shared::state_bits::*;
use smallvec::SmallVec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
}

/// Color blending, additive for both color and alpha.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub enabled: bool,
    pub src: BlendFactor,
    pub dst: BlendFactor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorWrites {
    pub red: bool,
    pub green: bool,
    pub blue: bool,
    pub alpha: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareFunc {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StencilOp {
    Keep,
    Zero,
    Replace,
    IncrementClamp,
    DecrementClamp,
    Invert,
    IncrementWrap,
    DecrementWrap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StencilFaceState {
    pub compare: CompareFunc,
    pub fail_op: StencilOp,
    pub depth_fail_op: StencilOp,
    pub pass_op: StencilOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilState {
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: CompareFunc,
    /// Bounds default to [0, 1] and are set per draw.
    pub depth_bounds_test: bool,
    pub stencil_test: bool,
    pub front: StencilFaceState,
    pub back: StencilFaceState,
    pub compare_mask: u8,
    pub reference: u8,
    pub write_mask: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolygonMode {
    Fill,
    Line,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Front,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RasterState {
    pub polygon_mode: PolygonMode,
    pub cull_mode: CullMode,
}

/// State left dynamic and set per draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DynamicState {
    Viewport,
    Scissor,
    DepthBounds,
}

/// Pipeline state decoded from state bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineState {
    pub bits: u64,
    pub blend: BlendState,
    pub color_writes: ColorWrites,
    pub depth_stencil: DepthStencilState,
    pub raster: RasterState,
}

fn src_blend_factor(bits: u64) -> BlendFactor {
    match bits & SRCBLEND_BITS {
        SRCBLEND_ZERO => BlendFactor::Zero,
        SRCBLEND_DST_COLOR => BlendFactor::DstColor,
        SRCBLEND_ONE_MINUS_DST_COLOR => BlendFactor::OneMinusDstColor,
        SRCBLEND_SRC_ALPHA => BlendFactor::SrcAlpha,
        SRCBLEND_ONE_MINUS_SRC_ALPHA => BlendFactor::OneMinusSrcAlpha,
        SRCBLEND_DST_ALPHA => BlendFactor::DstAlpha,
        SRCBLEND_ONE_MINUS_DST_ALPHA => BlendFactor::OneMinusDstAlpha,
        // Alpha saturate has no pipeline equivalent here.
        _ => BlendFactor::One,
    }
}

fn dst_blend_factor(bits: u64) -> BlendFactor {
    match bits & DSTBLEND_BITS {
        DSTBLEND_ONE => BlendFactor::One,
        DSTBLEND_SRC_COLOR => BlendFactor::SrcColor,
        DSTBLEND_ONE_MINUS_SRC_COLOR => BlendFactor::OneMinusSrcColor,
        DSTBLEND_SRC_ALPHA => BlendFactor::SrcAlpha,
        DSTBLEND_ONE_MINUS_SRC_ALPHA => BlendFactor::OneMinusSrcAlpha,
        DSTBLEND_DST_ALPHA => BlendFactor::DstAlpha,
        DSTBLEND_ONE_MINUS_DST_ALPHA => BlendFactor::OneMinusDstAlpha,
        _ => BlendFactor::Zero,
    }
}

fn depth_compare(bits: u64) -> CompareFunc {
    match bits & DEPTHFUNC_BITS {
        DEPTHFUNC_EQUAL => CompareFunc::Equal,
        DEPTHFUNC_ALWAYS => CompareFunc::Always,
        _ => CompareFunc::LessEqual,
    }
}

fn stencil_compare(bits: u64) -> CompareFunc {
    match bits & STENCIL_FUNC_BITS {
        STENCIL_FUNC_NEVER => CompareFunc::Never,
        STENCIL_FUNC_LESS => CompareFunc::Less,
        STENCIL_FUNC_EQUAL => CompareFunc::Equal,
        STENCIL_FUNC_LEQUAL => CompareFunc::LessEqual,
        STENCIL_FUNC_GREATER => CompareFunc::Greater,
        STENCIL_FUNC_NOTEQUAL => CompareFunc::NotEqual,
        STENCIL_FUNC_GEQUAL => CompareFunc::GreaterEqual,
        _ => CompareFunc::Always,
    }
}

fn stencil_op(field: u64) -> StencilOp {
    match field & 7 {
        1 => StencilOp::Zero,
        2 => StencilOp::Replace,
        3 => StencilOp::IncrementClamp,
        4 => StencilOp::DecrementClamp,
        5 => StencilOp::Invert,
        6 => StencilOp::IncrementWrap,
        7 => StencilOp::DecrementWrap,
        _ => StencilOp::Keep,
    }
}

/// Decode front-face ops from `ops`, which holds front-positioned op fields.
fn stencil_face(ops: u64, compare: CompareFunc) -> StencilFaceState {
    StencilFaceState {
        compare,
        fail_op: stencil_op(ops >> STENCIL_OP_FAIL_BITS.trailing_zeros()),
        depth_fail_op: stencil_op(ops >> STENCIL_OP_ZFAIL_BITS.trailing_zeros()),
        pass_op: stencil_op(ops >> STENCIL_OP_PASS_BITS.trailing_zeros()),
    }
}

fn cull_mode(bits: u64) -> CullMode {
    let mirrored = bits & MIRROR_VIEW != 0;
    match bits & CULL_BITS {
        CULL_TWOSIDED => CullMode::None,
        CULL_BACKSIDED if mirrored => CullMode::Back,
        CULL_BACKSIDED => CullMode::Front,
        _ if mirrored => CullMode::Front,
        _ => CullMode::Back,
    }
}

impl PipelineState {
    pub fn from_bits(bits: u64) -> Self {
        let src = src_blend_factor(bits);
        let dst = dst_blend_factor(bits);

        let compare = stencil_compare(bits);
        let front = stencil_face(bits & STENCIL_FRONT_OPS, compare);
        let back = if bits & SEPARATE_STENCIL != 0 {
            stencil_face((bits & STENCIL_BACK_OPS) >> BACK_OPS_SHIFT, compare)
        } else {
            front
        };

        Self {
            bits,
            blend: BlendState {
                enabled: src != BlendFactor::One || dst != BlendFactor::Zero,
                src,
                dst,
            },
            color_writes: ColorWrites {
                red: bits & REDMASK == 0,
                green: bits & GREENMASK == 0,
                blue: bits & BLUEMASK == 0,
                alpha: bits & ALPHAMASK == 0,
            },
            depth_stencil: DepthStencilState {
                depth_test: bits & DEPTHTEST_DISABLE == 0,
                depth_write: bits & DEPTHMASK == 0,
                depth_compare: depth_compare(bits),
                depth_bounds_test: bits & DEPTH_BOUNDS_TEST != 0,
                stencil_test: bits & (STENCIL_FUNC_BITS | STENCIL_OP_BITS) != 0,
                front,
                back,
                compare_mask: ((bits & STENCIL_FUNC_MASK_BITS) >> STENCIL_FUNC_MASK_SHIFT) as u8,
                reference: ((bits & STENCIL_FUNC_REF_BITS) >> STENCIL_FUNC_REF_SHIFT) as u8,
                write_mask: 0xFFFF_FFFF,
            },
            raster: RasterState {
                polygon_mode: if bits & POLYMODE_LINE != 0 {
                    PolygonMode::Line
                } else {
                    PolygonMode::Fill
                },
                cull_mode: cull_mode(bits),
            },
        }
    }

    pub fn dynamic_states(&self) -> SmallVec<[DynamicState; 3]> {
        let mut states = SmallVec::new();
        states.push(DynamicState::Scissor);
        states.push(DynamicState::Viewport);
        if self.depth_stencil.depth_bounds_test {
            states.push(DynamicState::DepthBounds);
        }
        states
    }
}

// ============================================================================
// Diagnostics
// ============================================================================

fn src_blend_name(bits: u64) -> &'static str {
    match bits & SRCBLEND_BITS {
        SRCBLEND_ZERO => "ZERO",
        SRCBLEND_ONE => "ONE",
        SRCBLEND_DST_COLOR => "DST_COLOR",
        SRCBLEND_ONE_MINUS_DST_COLOR => "ONE_MINUS_DST_COLOR",
        SRCBLEND_SRC_ALPHA => "SRC_ALPHA",
        SRCBLEND_ONE_MINUS_SRC_ALPHA => "ONE_MINUS_SRC_ALPHA",
        SRCBLEND_DST_ALPHA => "DST_ALPHA",
        SRCBLEND_ONE_MINUS_DST_ALPHA => "ONE_MINUS_DST_ALPHA",
        SRCBLEND_ALPHA_SATURATE => "ALPHA_SATURATE",
        _ => "NA",
    }
}

fn dst_blend_name(bits: u64) -> &'static str {
    match bits & DSTBLEND_BITS {
        DSTBLEND_ZERO => "ZERO",
        DSTBLEND_ONE => "ONE",
        DSTBLEND_SRC_COLOR => "SRC_COLOR",
        DSTBLEND_ONE_MINUS_SRC_COLOR => "ONE_MINUS_SRC_COLOR",
        DSTBLEND_SRC_ALPHA => "SRC_ALPHA",
        DSTBLEND_ONE_MINUS_SRC_ALPHA => "ONE_MINUS_SRC_ALPHA",
        DSTBLEND_DST_ALPHA => "DST_ALPHA",
        DSTBLEND_ONE_MINUS_DST_ALPHA => "ONE_MINUS_DST_ALPHA",
        _ => "NA",
    }
}

fn compare_name(func: CompareFunc) -> &'static str {
    match func {
        CompareFunc::Never => "NEVER",
        CompareFunc::Less => "LESS",
        CompareFunc::Equal => "EQUAL",
        CompareFunc::LessEqual => "LEQUAL",
        CompareFunc::Greater => "GREATER",
        CompareFunc::NotEqual => "NOTEQUAL",
        CompareFunc::GreaterEqual => "GEQUAL",
        CompareFunc::Always => "ALWAYS",
    }
}

fn stencil_op_name(op: StencilOp) -> &'static str {
    match op {
        StencilOp::Keep => "KEEP",
        StencilOp::Zero => "ZERO",
        StencilOp::Replace => "REPLACE",
        StencilOp::IncrementClamp => "INCR",
        StencilOp::DecrementClamp => "DECR",
        StencilOp::Invert => "INVERT",
        StencilOp::IncrementWrap => "INCR_WRAP",
        StencilOp::DecrementWrap => "DECR_WRAP",
    }
}

fn write_stencil_face(out: &mut String, face: &str, state: &StencilFaceState, ds: &DepthStencilState) {
    let _ = writeln!(
        out,
        "Stencil: ON, Face={}, Func={}, OpFail={}, ZFail={}, OpPass={}, mask={}, ref={}",
        face,
        compare_name(state.compare),
        stencil_op_name(state.fail_op),
        stencil_op_name(state.depth_fail_op),
        stencil_op_name(state.pass_op),
        ds.compare_mask,
        ds.reference,
    );
}

/// Readable multi-line dump of a state value.
pub fn describe_state(bits: u64) -> String {
    let state = PipelineState::from_bits(bits);
    let mut out = String::new();

    let culling = match bits & CULL_BITS {
        CULL_TWOSIDED => "TWOSIDED",
        CULL_BACKSIDED => "BACKSIDED -> FRONT",
        _ => "FRONTSIDED -> BACK",
    };
    let _ = writeln!(out, "Culling: {culling}");

    let polygon = match state.raster.polygon_mode {
        PolygonMode::Line => "LINE",
        PolygonMode::Fill => "FILL",
    };
    let _ = writeln!(out, "PolygonMode: {polygon}");

    let w = state.color_writes;
    let _ = writeln!(
        out,
        "ColorMask: {}{}{}{}",
        if w.red { 'R' } else { '_' },
        if w.green { 'G' } else { '_' },
        if w.blue { 'B' } else { '_' },
        if w.alpha { 'A' } else { '_' },
    );

    let _ = writeln!(out, "Blend: src={}, dst={}", src_blend_name(bits), dst_blend_name(bits));

    let ds = &state.depth_stencil;
    let _ = writeln!(out, "DepthFunc: {}", compare_name(ds.depth_compare));
    let _ = writeln!(out, "DepthWrite: {}", if ds.depth_write { "TRUE" } else { "FALSE" });

    if !ds.stencil_test {
        out.push_str("Stencil: OFF\n");
    } else if bits & SEPARATE_STENCIL != 0 {
        write_stencil_face(&mut out, "FRONT", &ds.front, ds);
        write_stencil_face(&mut out, "BACK", &ds.back, ds);
    } else {
        write_stencil_face(&mut out, "BOTH", &ds.front, ds);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state() {
        let state = PipelineState::from_bits(DEFAULT);
        assert!(!state.blend.enabled);
        assert_eq!(state.blend.src, BlendFactor::One);
        assert_eq!(state.blend.dst, BlendFactor::Zero);
        assert!(state.depth_stencil.depth_test);
        assert!(state.depth_stencil.depth_write);
        assert_eq!(state.depth_stencil.depth_compare, CompareFunc::Always);
        assert!(!state.depth_stencil.stencil_test);
        assert_eq!(state.raster.cull_mode, CullMode::Back);
        assert_eq!(state.raster.polygon_mode, PolygonMode::Fill);
        assert_eq!(state.dynamic_states().as_slice(), &[DynamicState::Scissor, DynamicState::Viewport]);
    }

    #[test]
    fn test_blend_enabled_for_alpha_blend() {
        let state = PipelineState::from_bits(SRCBLEND_SRC_ALPHA | DSTBLEND_ONE_MINUS_SRC_ALPHA);
        assert!(state.blend.enabled);
        assert_eq!(state.blend.src, BlendFactor::SrcAlpha);
        assert_eq!(state.blend.dst, BlendFactor::OneMinusSrcAlpha);
    }

    #[test]
    fn test_alpha_saturate_falls_back_to_one() {
        let state = PipelineState::from_bits(SRCBLEND_ALPHA_SATURATE);
        assert_eq!(state.blend.src, BlendFactor::One);
        assert!(!state.blend.enabled);
    }

    #[test]
    fn test_mask_bits_disable_writes() {
        let state = PipelineState::from_bits(DEPTHMASK | COLORMASK);
        assert!(!state.depth_stencil.depth_write);
        let w = state.color_writes;
        assert!(!w.red && !w.green && !w.blue);
        assert!(w.alpha);
    }

    #[test]
    fn test_depth_funcs() {
        let compare = |bits| PipelineState::from_bits(bits).depth_stencil.depth_compare;
        assert_eq!(compare(DEPTHFUNC_LESS), CompareFunc::LessEqual);
        assert_eq!(compare(DEPTHFUNC_EQUAL), CompareFunc::Equal);
        assert_eq!(compare(DEPTHFUNC_ALWAYS), CompareFunc::Always);
        assert!(!PipelineState::from_bits(DEPTHTEST_DISABLE).depth_stencil.depth_test);
    }

    #[test]
    fn test_cull_modes_and_mirror() {
        let cull = |bits| PipelineState::from_bits(bits).raster.cull_mode;
        assert_eq!(cull(CULL_FRONTSIDED), CullMode::Back);
        assert_eq!(cull(CULL_FRONTSIDED | MIRROR_VIEW), CullMode::Front);
        assert_eq!(cull(CULL_BACKSIDED), CullMode::Front);
        assert_eq!(cull(CULL_BACKSIDED | MIRROR_VIEW), CullMode::Back);
        assert_eq!(cull(CULL_TWOSIDED), CullMode::None);
        assert_eq!(cull(CULL_TWOSIDED | MIRROR_VIEW), CullMode::None);
    }

    #[test]
    fn test_shared_stencil() {
        let bits = STENCIL_FUNC_EQUAL
            | STENCIL_OP_FAIL_KEEP
            | STENCIL_OP_ZFAIL_INCR
            | STENCIL_OP_PASS_REPLACE
            | stencil_make_ref(128)
            | stencil_make_mask(255);
        let ds = PipelineState::from_bits(bits).depth_stencil;
        assert!(ds.stencil_test);
        assert_eq!(ds.front.compare, CompareFunc::Equal);
        assert_eq!(ds.front.fail_op, StencilOp::Keep);
        assert_eq!(ds.front.depth_fail_op, StencilOp::IncrementClamp);
        assert_eq!(ds.front.pass_op, StencilOp::Replace);
        assert_eq!(ds.back, ds.front);
        assert_eq!(ds.reference, 128);
        assert_eq!(ds.compare_mask, 255);
        assert_eq!(ds.write_mask, 0xFFFF_FFFF);
    }

    #[test]
    fn test_separate_stencil() {
        let bits = STENCIL_FUNC_ALWAYS
            | STENCIL_OP_ZFAIL_DECR_WRAP
            | BACK_STENCIL_OP_ZFAIL_INCR_WRAP
            | BACK_STENCIL_OP_PASS_INVERT;
        let ds = PipelineState::from_bits(bits).depth_stencil;
        assert!(ds.stencil_test);
        assert_eq!(ds.front.depth_fail_op, StencilOp::DecrementWrap);
        assert_eq!(ds.front.pass_op, StencilOp::Keep);
        assert_eq!(ds.back.depth_fail_op, StencilOp::IncrementWrap);
        assert_eq!(ds.back.pass_op, StencilOp::Invert);
        assert_eq!(ds.back.compare, CompareFunc::Always);
    }

    #[test]
    fn test_depth_bounds_is_dynamic() {
        let state = PipelineState::from_bits(DEPTH_BOUNDS_TEST);
        assert!(state.depth_stencil.depth_bounds_test);
        assert!(state.dynamic_states().contains(&DynamicState::DepthBounds));
    }

    #[test]
    fn test_polygon_line() {
        assert_eq!(
            PipelineState::from_bits(POLYMODE_LINE).raster.polygon_mode,
            PolygonMode::Line
        );
    }

    #[test]
    fn test_describe_default() {
        let text = describe_state(DEFAULT);
        assert_eq!(
            text,
            "Culling: FRONTSIDED -> BACK\n\
             PolygonMode: FILL\n\
             ColorMask: RGBA\n\
             Blend: src=ONE, dst=ZERO\n\
             DepthFunc: ALWAYS\n\
             DepthWrite: TRUE\n\
             Stencil: OFF\n"
        );
    }

    #[test]
    fn test_describe_masks_and_stencil() {
        let bits = CULL_TWOSIDED
            | REDMASK
            | ALPHAMASK
            | DEPTHMASK
            | STENCIL_FUNC_LESS
            | BACK_STENCIL_OP_PASS_ZERO;
        let text = describe_state(bits);
        assert!(text.contains("Culling: TWOSIDED\n"));
        assert!(text.contains("ColorMask: _GB_\n"));
        assert!(text.contains("DepthWrite: FALSE\n"));
        assert!(text.contains("DepthFunc: LEQUAL\n"));
        assert!(text.contains("Face=FRONT, Func=LESS"));
        assert!(text.contains("Face=BACK, Func=LESS, OpFail=KEEP, ZFail=KEEP, OpPass=ZERO"));
    }
}
