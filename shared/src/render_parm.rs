//! Fixed render-parameter table.
//!
//! Shaders declare uniform-block members by name; reflection resolves every
//! member against this table. The order is part of the contract between
//! the engine and its shaders and must not change.

use thiserror::Error;

/// Number of entries in the parameter table.
pub const RENDER_PARM_COUNT: usize = 61;

/// A named vec4 slot in the per-draw parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum RenderParm {
    ScreenCorrectionFactor = 0,
    WindowCoord = 1,
    DiffuseModifier = 2,
    SpecularModifier = 3,
    LocalLightOrigin = 4,
    LocalViewOrigin = 5,
    LightProjectionS = 6,
    LightProjectionT = 7,
    LightProjectionQ = 8,
    LightFalloffS = 9,
    BumpMatrixS = 10,
    BumpMatrixT = 11,
    DiffuseMatrixS = 12,
    DiffuseMatrixT = 13,
    SpecularMatrixS = 14,
    SpecularMatrixT = 15,
    VertexColorModulate = 16,
    VertexColorAdd = 17,
    Color = 18,
    ViewOrigin = 19,
    GlobalEyePos = 20,
    MvpMatrixX = 21,
    MvpMatrixY = 22,
    MvpMatrixZ = 23,
    MvpMatrixW = 24,
    ModelMatrixX = 25,
    ModelMatrixY = 26,
    ModelMatrixZ = 27,
    ModelMatrixW = 28,
    ProjectionMatrixX = 29,
    ProjectionMatrixY = 30,
    ProjectionMatrixZ = 31,
    ProjectionMatrixW = 32,
    ModelViewMatrixX = 33,
    ModelViewMatrixY = 34,
    ModelViewMatrixZ = 35,
    ModelViewMatrixW = 36,
    TextureMatrixS = 37,
    TextureMatrixT = 38,
    TexGen0S = 39,
    TexGen0T = 40,
    TexGen0Q = 41,
    TexGen0Enabled = 42,
    TexGen1S = 43,
    TexGen1T = 44,
    TexGen1Q = 45,
    TexGen1Enabled = 46,
    WobbleSkyX = 47,
    WobbleSkyY = 48,
    WobbleSkyZ = 49,
    Overbright = 50,
    EnableSkinning = 51,
    AlphaTest = 52,
    User0 = 53,
    User1 = 54,
    User2 = 55,
    User3 = 56,
    User4 = 57,
    User5 = 58,
    User6 = 59,
    User7 = 60,
}

/// Shader-side member names, indexed by `RenderParm as usize`.
const NAMES: [&str; RENDER_PARM_COUNT] = [
    "rpScreenCorrectionFactor",
    "rpWindowCoord",
    "rpDiffuseModifier",
    "rpSpecularModifier",
    "rpLocalLightOrigin",
    "rpLocalViewOrigin",
    "rpLightProjectionS",
    "rpLightProjectionT",
    "rpLightProjectionQ",
    "rpLightFalloffS",
    "rpBumpMatrixS",
    "rpBumpMatrixT",
    "rpDiffuseMatrixS",
    "rpDiffuseMatrixT",
    "rpSpecularMatrixS",
    "rpSpecularMatrixT",
    "rpVertexColorModulate",
    "rpVertexColorAdd",
    "rpColor",
    "rpViewOrigin",
    "rpGlobalEyePos",
    "rpMVPmatrixX",
    "rpMVPmatrixY",
    "rpMVPmatrixZ",
    "rpMVPmatrixW",
    "rpModelMatrixX",
    "rpModelMatrixY",
    "rpModelMatrixZ",
    "rpModelMatrixW",
    "rpProjectionMatrixX",
    "rpProjectionMatrixY",
    "rpProjectionMatrixZ",
    "rpProjectionMatrixW",
    "rpModelViewMatrixX",
    "rpModelViewMatrixY",
    "rpModelViewMatrixZ",
    "rpModelViewMatrixW",
    "rpTextureMatrixS",
    "rpTextureMatrixT",
    "rpTexGen0S",
    "rpTexGen0T",
    "rpTexGen0Q",
    "rpTexGen0Enabled",
    "rpTexGen1S",
    "rpTexGen1T",
    "rpTexGen1Q",
    "rpTexGen1Enabled",
    "rpWobbleSkyX",
    "rpWobbleSkyY",
    "rpWobbleSkyZ",
    "rpOverbright",
    "rpEnableSkinning",
    "rpAlphaTest",
    "rpUser0",
    "rpUser1",
    "rpUser2",
    "rpUser3",
    "rpUser4",
    "rpUser5",
    "rpUser6",
    "rpUser7",
];

/// Uniform member name that is not in the parameter table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid uniform {0}")]
pub struct UnknownRenderParm(pub String);

impl RenderParm {
    /// Every parameter in table order.
    pub const ALL: [RenderParm; RENDER_PARM_COUNT] = [
        RenderParm::ScreenCorrectionFactor,
        RenderParm::WindowCoord,
        RenderParm::DiffuseModifier,
        RenderParm::SpecularModifier,
        RenderParm::LocalLightOrigin,
        RenderParm::LocalViewOrigin,
        RenderParm::LightProjectionS,
        RenderParm::LightProjectionT,
        RenderParm::LightProjectionQ,
        RenderParm::LightFalloffS,
        RenderParm::BumpMatrixS,
        RenderParm::BumpMatrixT,
        RenderParm::DiffuseMatrixS,
        RenderParm::DiffuseMatrixT,
        RenderParm::SpecularMatrixS,
        RenderParm::SpecularMatrixT,
        RenderParm::VertexColorModulate,
        RenderParm::VertexColorAdd,
        RenderParm::Color,
        RenderParm::ViewOrigin,
        RenderParm::GlobalEyePos,
        RenderParm::MvpMatrixX,
        RenderParm::MvpMatrixY,
        RenderParm::MvpMatrixZ,
        RenderParm::MvpMatrixW,
        RenderParm::ModelMatrixX,
        RenderParm::ModelMatrixY,
        RenderParm::ModelMatrixZ,
        RenderParm::ModelMatrixW,
        RenderParm::ProjectionMatrixX,
        RenderParm::ProjectionMatrixY,
        RenderParm::ProjectionMatrixZ,
        RenderParm::ProjectionMatrixW,
        RenderParm::ModelViewMatrixX,
        RenderParm::ModelViewMatrixY,
        RenderParm::ModelViewMatrixZ,
        RenderParm::ModelViewMatrixW,
        RenderParm::TextureMatrixS,
        RenderParm::TextureMatrixT,
        RenderParm::TexGen0S,
        RenderParm::TexGen0T,
        RenderParm::TexGen0Q,
        RenderParm::TexGen0Enabled,
        RenderParm::TexGen1S,
        RenderParm::TexGen1T,
        RenderParm::TexGen1Q,
        RenderParm::TexGen1Enabled,
        RenderParm::WobbleSkyX,
        RenderParm::WobbleSkyY,
        RenderParm::WobbleSkyZ,
        RenderParm::Overbright,
        RenderParm::EnableSkinning,
        RenderParm::AlphaTest,
        RenderParm::User0,
        RenderParm::User1,
        RenderParm::User2,
        RenderParm::User3,
        RenderParm::User4,
        RenderParm::User5,
        RenderParm::User6,
        RenderParm::User7,
    ];

    /// Shader-side member name.
    pub fn name(self) -> &'static str {
        NAMES[self as usize]
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Resolve a reflected member name. Matching is exact.
    pub fn from_name(name: &str) -> Result<Self, UnknownRenderParm> {
        NAMES
            .iter()
            .position(|candidate| *candidate == name)
            .map(|index| Self::ALL[index])
            .ok_or_else(|| UnknownRenderParm(name.to_string()))
    }

    /// The parameter `count` slots after this one, if it exists.
    pub fn offset(self, count: usize) -> Option<Self> {
        Self::from_index(self as usize + count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_order() {
        for (i, parm) in RenderParm::ALL.iter().enumerate() {
            assert_eq!(parm.index(), i);
        }
        assert_eq!(RenderParm::ScreenCorrectionFactor.name(), "rpScreenCorrectionFactor");
        assert_eq!(RenderParm::MvpMatrixX.name(), "rpMVPmatrixX");
        assert_eq!(RenderParm::User7.name(), "rpUser7");
    }

    #[test]
    fn test_from_name() {
        assert_eq!(RenderParm::from_name("rpColor"), Ok(RenderParm::Color));
        assert_eq!(
            RenderParm::from_name("rpModelViewMatrixW"),
            Ok(RenderParm::ModelViewMatrixW)
        );
    }

    #[test]
    fn test_from_name_rejects_unknown_and_case() {
        let err = RenderParm::from_name("rpBogus").unwrap_err();
        assert_eq!(err.to_string(), "Invalid uniform rpBogus");
        assert!(RenderParm::from_name("rpcolor").is_err());
    }

    #[test]
    fn test_offset() {
        assert_eq!(RenderParm::MvpMatrixX.offset(3), Some(RenderParm::MvpMatrixW));
        assert_eq!(RenderParm::User7.offset(1), None);
    }
}
