//! Backend frame loop
//!
//! Consumes the geometry handles the frontend produced one frame earlier and
//! records draw commands for them. Commands accumulate in a [`CommandStream`]
//! and are handed to the device at [`Backend::end_frame`].

use nether_framecache_shared::GeoHandle;
use nether_framecache_shared::state_bits::{DEPTH_BOUNDS_TEST, DEPTHMASK, DEPTHTEST_DISABLE};
use tracing::warn;

use crate::binding::{BindingError, ProgramManager};
use crate::command::{CommandStream, RenderCommand};
use crate::device::{DeviceError, RenderDevice};
use crate::geometry::FrameGeometryCache;

/// State bits that survive `set_state` until explicitly changed.
const STICKY_STATE_BITS: u64 = DEPTHMASK | DEPTHTEST_DISABLE;

/// Geometry of one draw, as stored by the frontend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrawSurface {
    pub vertex: GeoHandle,
    pub index: GeoHandle,
    /// Joint buffer for skinned programs, `GeoHandle::NULL` when unskinned.
    pub joints: GeoHandle,
    pub num_indexes: u32,
    pub num_verts: u32,
}

/// Per-frame performance counters. Index and vertex totals are summed in
/// 64 bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendCounters {
    pub draw_elements: u64,
    pub draw_indexes: u64,
    pub draw_vertexes: u64,
    pub shadow_elements: u64,
    pub shadow_indexes: u64,
    pub shadow_vertexes: u64,
    /// Indexes actually submitted
    pub vbo_indexes: u64,
    /// Draws dropped because a handle was stale
    pub skipped_draws: u64,
}

/// Records draws for the frame behind the frontend.
pub struct Backend {
    state_bits: u64,
    commands: CommandStream,
    counter: u64,
    slot: usize,
    frames_in_flight: usize,
    counters: BackendCounters,
}

impl Backend {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            state_bits: 0,
            commands: CommandStream::new(),
            counter: 0,
            slot: 0,
            frames_in_flight: frames_in_flight.max(1),
            counters: BackendCounters::default(),
        }
    }

    /// Wait until the GPU is done with this slot, then start recording.
    pub fn start_frame<D: RenderDevice>(
        &mut self,
        device: &mut D,
        programs: &mut ProgramManager,
    ) -> Result<(), DeviceError> {
        device.wait_for_slot(self.slot)?;
        programs.start_frame(device);
        self.commands.clear();
        self.counters = BackendCounters::default();
        Ok(())
    }

    /// Submit the recorded commands and move to the next slot.
    pub fn end_frame<D: RenderDevice>(&mut self, device: &mut D) -> Result<(), DeviceError> {
        device.submit(self.slot, &self.commands)?;
        self.counter += 1;
        self.slot = (self.counter % self.frames_in_flight as u64) as usize;
        Ok(())
    }

    /// Replace the render state. Depth mask and depth test disable carry
    /// over from the previous state.
    pub fn set_state(&mut self, bits: u64) {
        self.state_bits = bits | (self.state_bits & STICKY_STATE_BITS);
    }

    pub fn state_bits(&self) -> u64 {
        self.state_bits
    }

    pub fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32) {
        self.commands.push(RenderCommand::SetViewport {
            x,
            y,
            width,
            height,
        });
    }

    pub fn set_scissor(&mut self, x: u32, y: u32, width: u32, height: u32) {
        self.commands.push(RenderCommand::SetScissor {
            x,
            y,
            width,
            height,
        });
    }

    /// Draw a surface with the bound program.
    ///
    /// Returns `Ok(false)` without recording anything when either geometry
    /// handle is not valid in this backend pass.
    pub fn draw_elements<D: RenderDevice>(
        &mut self,
        device: &mut D,
        geometry: &FrameGeometryCache,
        programs: &mut ProgramManager,
        surface: &DrawSurface,
    ) -> Result<bool, BindingError> {
        self.counters.draw_elements += 1;
        self.counters.draw_indexes += u64::from(surface.num_indexes);
        self.counters.draw_vertexes += u64::from(surface.num_verts);

        let Some(vertex) = geometry.get_vertex_buffer(surface.vertex) else {
            warn!("draw_elements: vertexBuffer == NULL");
            self.counters.skipped_draws += 1;
            return Ok(false);
        };
        let Some(index) = geometry.get_index_buffer(surface.index) else {
            warn!("draw_elements: indexBuffer == NULL");
            self.counters.skipped_draws += 1;
            return Ok(false);
        };

        programs.set_joint_handle(surface.joints);
        programs.commit_current(device, geometry, self.state_bits, &mut self.commands)?;

        self.commands.push(RenderCommand::BindIndexBuffer(index));
        self.commands.push(RenderCommand::BindVertexBuffer(vertex));
        self.commands.push(RenderCommand::DrawIndexed {
            index_count: surface.num_indexes,
            first_index: 0,
            base_vertex: 0,
        });
        self.counters.vbo_indexes += u64::from(surface.num_indexes);
        Ok(true)
    }

    /// Draw `num_indexes` indexes of a shadow volume.
    ///
    /// `zmin`/`zmax` are applied when the state enables the depth bounds test.
    #[allow(clippy::too_many_arguments)]
    pub fn draw_shadow_elements<D: RenderDevice>(
        &mut self,
        device: &mut D,
        geometry: &FrameGeometryCache,
        programs: &mut ProgramManager,
        surface: &DrawSurface,
        num_indexes: u32,
        zmin: f32,
        zmax: f32,
    ) -> Result<bool, BindingError> {
        self.counters.shadow_elements += 1;
        self.counters.shadow_indexes += u64::from(num_indexes);
        self.counters.shadow_vertexes += u64::from(surface.num_verts);

        let Some(vertex) = geometry.get_vertex_buffer(surface.vertex) else {
            warn!("draw_shadow_elements: vertexBuffer == NULL");
            self.counters.skipped_draws += 1;
            return Ok(false);
        };
        let Some(index) = geometry.get_index_buffer(surface.index) else {
            warn!("draw_shadow_elements: indexBuffer == NULL");
            self.counters.skipped_draws += 1;
            return Ok(false);
        };

        programs.set_joint_handle(GeoHandle::NULL);
        programs.commit_current(device, geometry, self.state_bits, &mut self.commands)?;

        if self.state_bits & DEPTH_BOUNDS_TEST != 0 {
            self.commands.push(RenderCommand::SetDepthBounds {
                min: zmin,
                max: zmax,
            });
        }

        self.commands.push(RenderCommand::BindIndexBuffer(index));
        self.commands.push(RenderCommand::BindVertexBuffer(vertex));
        self.commands.push(RenderCommand::DrawIndexed {
            index_count: num_indexes,
            first_index: 0,
            base_vertex: 0,
        });
        self.counters.vbo_indexes += u64::from(num_indexes);
        Ok(true)
    }

    pub fn commands(&self) -> &CommandStream {
        &self.commands
    }

    pub fn counters(&self) -> BackendCounters {
        self.counters
    }

    /// Slot the next submission goes to.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Frames submitted so far.
    pub fn frames_submitted(&self) -> u64 {
        self.counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_state_keeps_depth_bits_sticky() {
        let mut backend = Backend::new(2);
        backend.set_state(DEPTHMASK | DEPTHTEST_DISABLE);
        backend.set_state(DEPTH_BOUNDS_TEST);
        assert_eq!(
            backend.state_bits(),
            DEPTH_BOUNDS_TEST | DEPTHMASK | DEPTHTEST_DISABLE
        );
    }

    #[test]
    fn test_set_state_replaces_other_bits() {
        let mut backend = Backend::new(2);
        backend.set_state(DEPTH_BOUNDS_TEST);
        backend.set_state(0);
        assert_eq!(backend.state_bits(), 0);
    }

    #[test]
    fn test_viewport_and_scissor_are_recorded() {
        let mut backend = Backend::new(2);
        backend.set_viewport(0.0, 0.0, 640.0, 480.0);
        backend.set_scissor(0, 0, 640, 480);
        assert_eq!(backend.commands().len(), 2);
    }
}
