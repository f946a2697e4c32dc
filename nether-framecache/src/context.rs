//! Render context
//!
//! Owns the device and every cache service. The frontend allocates geometry
//! and sets render parameters through it; the backend pass consumes the
//! previous frame's allocations.
//!
//! A frame looks like:
//!
//! ```text
//! frontend: alloc_* ...            (writes slot current % N)
//! begin_back_end()                 (frame counter advances)
//! start_frame()
//! set_state / bind_program / draw_elements ...
//! end_frame()                      (submit)
//! ```

use anyhow::{Context, Result};
use nether_framecache_shared::GeoHandle;
use tracing::info;

use crate::backend::{Backend, BackendCounters, DrawSurface};
use crate::binding::{BindingError, ProgramManager};
use crate::buffer::{BufferError, set_show_buffers};
use crate::config::FrameCacheConfig;
use crate::device::{DeviceError, RenderDevice};
use crate::error::OrFatal;
use crate::geometry::{CacheStats, FrameGeometryCache};
use crate::program::ShaderLibrary;

pub struct RenderContext<D: RenderDevice> {
    device: D,
    geometry: FrameGeometryCache,
    programs: ProgramManager,
    backend: Backend,
    config: FrameCacheConfig,
}

impl<D: RenderDevice> RenderContext<D> {
    /// Validate `config` and bring up the geometry cache and program manager.
    pub fn new(
        mut device: D,
        library: Box<dyn ShaderLibrary>,
        config: FrameCacheConfig,
    ) -> Result<Self> {
        config.validate().context("Invalid frame cache configuration")?;
        set_show_buffers(config.diagnostics.show_buffers);

        let alignment = device.limits().min_uniform_buffer_offset_alignment;
        let mut geometry = FrameGeometryCache::new(&mut device, &config.geometry, alignment)
            .context("Failed to create geometry cache")?;
        geometry.set_show_vertex_cache(config.diagnostics.show_vertex_cache);

        let programs = ProgramManager::new(&mut device, library, &config)?;
        let backend = Backend::new(config.geometry.frames_in_flight);

        info!(
            "Render context initialized on {} device ({} frames in flight)",
            device.name(),
            config.geometry.frames_in_flight
        );
        Ok(Self {
            device,
            geometry,
            programs,
            backend,
            config,
        })
    }

    /// Release every native object and return the device.
    pub fn shutdown(mut self) -> D {
        self.programs.shutdown(&mut self.device);
        self.geometry.shutdown(&mut self.device);
        info!("Render context shut down");
        self.device
    }

    // ========================================================================
    // Frontend
    // ========================================================================

    pub fn alloc_vertex(&mut self, data: Option<&[u8]>, count: usize, element_size: usize) -> GeoHandle {
        self.geometry
            .alloc_vertex(&mut self.device, data, count, element_size)
    }

    pub fn alloc_index(&mut self, data: Option<&[u8]>, count: usize, element_size: usize) -> GeoHandle {
        self.geometry
            .alloc_index(&mut self.device, data, count, element_size)
    }

    pub fn alloc_joint(&mut self, data: Option<&[u8]>, count: usize, element_size: usize) -> GeoHandle {
        self.geometry
            .alloc_joint(&mut self.device, data, count, element_size)
    }

    pub fn alloc_static_vertex(&mut self, data: Option<&[u8]>, bytes: u64) -> GeoHandle {
        self.geometry
            .alloc_static_vertex(&mut self.device, data, bytes)
    }

    pub fn alloc_static_index(&mut self, data: Option<&[u8]>, bytes: u64) -> GeoHandle {
        self.geometry
            .alloc_static_index(&mut self.device, data, bytes)
    }

    pub fn free_static_data(&mut self) {
        self.geometry.free_static_data();
    }

    pub fn purge_all(&mut self) -> Result<(), BufferError> {
        self.geometry.purge_all(&mut self.device)
    }

    /// Hand the frame just built to the backend.
    pub fn begin_back_end(&mut self) {
        self.geometry.begin_back_end();
    }

    // ========================================================================
    // Backend
    // ========================================================================

    pub fn start_frame(&mut self) -> Result<(), DeviceError> {
        self.backend.start_frame(&mut self.device, &mut self.programs)
    }

    pub fn end_frame(&mut self) -> Result<(), DeviceError> {
        self.backend.end_frame(&mut self.device)
    }

    pub fn set_state(&mut self, bits: u64) {
        self.backend.set_state(bits);
    }

    pub fn draw_elements(&mut self, surface: &DrawSurface) -> Result<bool, BindingError> {
        self.backend
            .draw_elements(&mut self.device, &self.geometry, &mut self.programs, surface)
    }

    pub fn draw_shadow_elements(
        &mut self,
        surface: &DrawSurface,
        num_indexes: u32,
        zmin: f32,
        zmax: f32,
    ) -> Result<bool, BindingError> {
        self.backend.draw_shadow_elements(
            &mut self.device,
            &self.geometry,
            &mut self.programs,
            surface,
            num_indexes,
            zmin,
            zmax,
        )
    }

    /// Reload all shaders. A shader that no longer matches the parameter
    /// table terminates.
    pub fn reload_shaders(&mut self) {
        self.programs.reload_shaders(&mut self.device).or_fatal();
    }

    pub fn clear_pipelines(&mut self) {
        self.programs.clear_pipelines(&mut self.device);
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn geometry(&self) -> &FrameGeometryCache {
        &self.geometry
    }

    pub fn programs(&self) -> &ProgramManager {
        &self.programs
    }

    pub fn programs_mut(&mut self) -> &mut ProgramManager {
        &mut self.programs
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn config(&self) -> &FrameCacheConfig {
        &self.config
    }

    pub fn stats(&self) -> CacheStats {
        self.geometry.stats()
    }

    pub fn counters(&self) -> BackendCounters {
        self.backend.counters()
    }
}
