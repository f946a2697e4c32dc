//! Vertex input layouts.

use nether_framecache_shared::{DrawVert, ShadowVert};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Float32x2,
    Float32x3,
    Float32x4,
    Unorm8x4,
}

impl VertexFormat {
    pub fn size(self) -> u32 {
        match self {
            VertexFormat::Float32x2 => 8,
            VertexFormat::Float32x3 => 12,
            VertexFormat::Float32x4 => 16,
            VertexFormat::Unorm8x4 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: VertexFormat,
    pub offset: u32,
}

/// One interleaved vertex buffer binding.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    pub kind: VertexLayoutKind,
    pub stride: u32,
    pub attributes: &'static [VertexAttribute],
}

/// Vertex formats a program can consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VertexLayoutKind {
    #[default]
    DrawVert,
    DrawShadowVert,
}

const DRAW_VERT_ATTRIBUTES: [VertexAttribute; 6] = [
    VertexAttribute {
        location: 0,
        format: VertexFormat::Float32x3,
        offset: DrawVert::XYZ_OFFSET,
    },
    VertexAttribute {
        location: 1,
        format: VertexFormat::Float32x2,
        offset: DrawVert::ST_OFFSET,
    },
    VertexAttribute {
        location: 2,
        format: VertexFormat::Float32x3,
        offset: DrawVert::NORMAL_OFFSET,
    },
    VertexAttribute {
        location: 3,
        format: VertexFormat::Float32x3,
        offset: DrawVert::TANGENT0_OFFSET,
    },
    VertexAttribute {
        location: 4,
        format: VertexFormat::Float32x3,
        offset: DrawVert::TANGENT1_OFFSET,
    },
    VertexAttribute {
        location: 5,
        format: VertexFormat::Unorm8x4,
        offset: DrawVert::COLOR_OFFSET,
    },
];

const SHADOW_VERT_ATTRIBUTES: [VertexAttribute; 1] = [VertexAttribute {
    location: 0,
    format: VertexFormat::Float32x4,
    offset: 0,
}];

static DRAW_VERT_LAYOUT: VertexLayout = VertexLayout {
    kind: VertexLayoutKind::DrawVert,
    stride: DrawVert::STRIDE,
    attributes: &DRAW_VERT_ATTRIBUTES,
};

static SHADOW_VERT_LAYOUT: VertexLayout = VertexLayout {
    kind: VertexLayoutKind::DrawShadowVert,
    stride: ShadowVert::STRIDE,
    attributes: &SHADOW_VERT_ATTRIBUTES,
};

impl VertexLayoutKind {
    pub fn layout(self) -> &'static VertexLayout {
        match self {
            VertexLayoutKind::DrawVert => &DRAW_VERT_LAYOUT,
            VertexLayoutKind::DrawShadowVert => &SHADOW_VERT_LAYOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draw_vert_attributes_fit_stride() {
        let layout = VertexLayoutKind::DrawVert.layout();
        assert_eq!(layout.stride, 60);
        for attr in layout.attributes {
            assert!(attr.offset + attr.format.size() <= layout.stride);
        }
        let locations: Vec<u32> = layout.attributes.iter().map(|a| a.location).collect();
        assert_eq!(locations, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_shadow_vert_layout() {
        let layout = VertexLayoutKind::DrawShadowVert.layout();
        assert_eq!(layout.stride, 16);
        assert_eq!(layout.attributes.len(), 1);
        assert_eq!(layout.attributes[0].format, VertexFormat::Float32x4);
    }
}
