//! Graphics pipelines: vertex layouts and the per-program pipeline cache.

mod cache;
mod layout;

pub use cache::{CachedPipeline, PipelineCache, PipelineSource};
pub use layout::{VertexAttribute, VertexFormat, VertexLayout, VertexLayoutKind};
