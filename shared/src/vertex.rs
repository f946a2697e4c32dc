//! Vertex and joint layouts uploaded into the geometry cache.
//!
//! These are POD types so the frontend can hand `bytemuck::cast_slice`
//! results straight to the allocator.

use bytemuck::{Pod, Zeroable};
use std::mem::{offset_of, size_of};

/// Standard surface vertex (60 bytes).
///
/// Matches the draw-vertex input layout: position, texcoord, normal, two
/// tangents and an RGBA8 color.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct DrawVert {
    pub xyz: [f32; 3],
    pub st: [f32; 2],
    pub normal: [f32; 3],
    pub tangents: [[f32; 3]; 2],
    pub color: [u8; 4],
}

impl DrawVert {
    pub const STRIDE: u32 = size_of::<DrawVert>() as u32;
    pub const XYZ_OFFSET: u32 = offset_of!(DrawVert, xyz) as u32;
    pub const ST_OFFSET: u32 = offset_of!(DrawVert, st) as u32;
    pub const NORMAL_OFFSET: u32 = offset_of!(DrawVert, normal) as u32;
    pub const TANGENT0_OFFSET: u32 = offset_of!(DrawVert, tangents) as u32;
    pub const TANGENT1_OFFSET: u32 = Self::TANGENT0_OFFSET + 12;
    pub const COLOR_OFFSET: u32 = offset_of!(DrawVert, color) as u32;

    pub fn new(xyz: [f32; 3], st: [f32; 2]) -> Self {
        Self {
            xyz,
            st,
            color: [255; 4],
            ..Default::default()
        }
    }
}

/// Shadow volume vertex: homogeneous position only (16 bytes).
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct ShadowVert {
    pub xyzw: [f32; 4],
}

impl ShadowVert {
    pub const STRIDE: u32 = size_of::<ShadowVert>() as u32;
}

/// 3x4 affine joint matrix (row-major, 48 bytes).
///
/// The implicit 4th row is [0, 0, 0, 1]. Joint palettes are uploaded into
/// the joint arena as arrays of these.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct JointMat3x4 {
    /// [m00, m01, m02, tx]
    pub row0: [f32; 4],
    /// [m10, m11, m12, ty]
    pub row1: [f32; 4],
    /// [m20, m21, m22, tz]
    pub row2: [f32; 4],
}

impl JointMat3x4 {
    pub const IDENTITY: Self = Self {
        row0: [1.0, 0.0, 0.0, 0.0],
        row1: [0.0, 1.0, 0.0, 0.0],
        row2: [0.0, 0.0, 1.0, 0.0],
    };

    pub fn from_translation(t: [f32; 3]) -> Self {
        Self {
            row0: [1.0, 0.0, 0.0, t[0]],
            row1: [0.0, 1.0, 0.0, t[1]],
            row2: [0.0, 0.0, 1.0, t[2]],
        }
    }

    pub fn translation(&self) -> [f32; 3] {
        [self.row0[3], self.row1[3], self.row2[3]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draw_vert_layout() {
        assert_eq!(DrawVert::STRIDE, 60);
        assert_eq!(DrawVert::XYZ_OFFSET, 0);
        assert_eq!(DrawVert::ST_OFFSET, 12);
        assert_eq!(DrawVert::NORMAL_OFFSET, 20);
        assert_eq!(DrawVert::TANGENT0_OFFSET, 32);
        assert_eq!(DrawVert::TANGENT1_OFFSET, 44);
        assert_eq!(DrawVert::COLOR_OFFSET, 56);
    }

    #[test]
    fn test_pod_sizes() {
        assert_eq!(ShadowVert::STRIDE, 16);
        assert_eq!(size_of::<JointMat3x4>(), 48);
        let joints = [JointMat3x4::IDENTITY; 4];
        assert_eq!(bytemuck::cast_slice::<_, u8>(&joints).len(), 192);
    }

    #[test]
    fn test_joint_translation() {
        let m = JointMat3x4::from_translation([1.0, 2.0, 3.0]);
        assert_eq!(m.translation(), [1.0, 2.0, 3.0]);
    }
}
