//! Shared types for the frame geometry cache.
//!
//! Everything here is plain data: handles the frontend stores in draw
//! surfaces, the packed render-state bits the backend keys pipelines on,
//! the fixed render-parameter table shaders are reflected against, and the
//! vertex/joint layouts uploaded into the cache. No GPU dependency.

pub mod handle;
pub mod render_parm;
pub mod state_bits;
pub mod vertex;

pub use handle::GeoHandle;
pub use render_parm::{RENDER_PARM_COUNT, RenderParm, UnknownRenderParm};
pub use vertex::{DrawVert, JointMat3x4, ShadowVert};
