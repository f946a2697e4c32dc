//! Nether Frame Cache - frame-pipelined GPU geometry and binding cache
//!
//! The frontend building frame `K` allocates vertex, index and joint data
//! from the arena slot `K % N` and stores the returned [`GeoHandle`]s in its
//! draw surfaces. The backend, one frame behind, resolves those handles
//! against slot `(K - 1) % N`, binds the program's pipeline and descriptor
//! set, and records indexed draws. No locking is involved: the two sides
//! never touch the same slot as long as the frame counter advances once per
//! backend pass.
//!
//! Entry point is [`RenderContext`]; the pieces are usable on their own.

pub mod backend;
pub mod binding;
pub mod buffer;
pub mod command;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod geometry;
pub mod pipeline;
pub mod program;
pub mod render_state;

pub use backend::{Backend, BackendCounters, DrawSurface};
pub use binding::{BindingError, ProgramManager};
pub use buffer::{BufferError, BufferStore, BufferView};
pub use command::{CommandStream, RenderCommand};
pub use config::FrameCacheConfig;
pub use context::RenderContext;
pub use device::{HostDevice, RenderDevice};
pub use geometry::{AllocError, FrameGeometryCache};
pub use pipeline::PipelineCache;
pub use program::{DirectoryShaderLibrary, MemoryShaderLibrary, ProgramRegistry, ShaderLibrary};

pub use nether_framecache_shared::{GeoHandle, RenderParm, state_bits};
