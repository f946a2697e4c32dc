//! End-to-end frames through `RenderContext` on the host device.

use glam::Vec4;
use nether_framecache::config::{DescriptorConfig, FrameCacheConfig, GeometryConfig};
use nether_framecache::{
    DrawSurface, GeoHandle, HostDevice, MemoryShaderLibrary, RenderCommand, RenderContext,
    RenderParm, state_bits,
};
use nether_framecache_shared::{DrawVert, ShadowVert};

const QUAD_INDICES: [u32; 6] = [0, 1, 2, 2, 3, 0];

fn small_config() -> FrameCacheConfig {
    FrameCacheConfig {
        geometry: GeometryConfig {
            frames_in_flight: 2,
            vertex_bytes_per_frame: 1 << 16,
            index_bytes_per_frame: 1 << 16,
            joint_bytes_per_frame: 4096,
            static_vertex_bytes: 1 << 16,
            static_index_bytes: 1 << 16,
            vertex_alignment: 32,
            index_alignment: 16,
        },
        descriptors: DescriptorConfig {
            max_sets: 64,
            max_uniform_buffers: 256,
            max_image_samplers: 256,
            max_set_writes: 32,
            max_set_uniforms: 48,
            max_image_parms: 16,
        },
        ..Default::default()
    }
}

fn context() -> RenderContext<HostDevice> {
    RenderContext::new(
        HostDevice::default(),
        Box::new(MemoryShaderLibrary::with_builtins()),
        small_config(),
    )
    .unwrap()
}

fn quad(ctx: &mut RenderContext<HostDevice>) -> DrawSurface {
    let verts = [
        DrawVert::new([0.0, 0.0, 0.0], [0.0, 0.0]),
        DrawVert::new([1.0, 0.0, 0.0], [1.0, 0.0]),
        DrawVert::new([1.0, 1.0, 0.0], [1.0, 1.0]),
        DrawVert::new([0.0, 1.0, 0.0], [0.0, 1.0]),
    ];
    DrawSurface {
        vertex: ctx.alloc_vertex(
            Some(bytemuck::cast_slice(&verts)),
            verts.len(),
            DrawVert::STRIDE as usize,
        ),
        index: ctx.alloc_index(Some(bytemuck::cast_slice(&QUAD_INDICES)), 6, 4),
        joints: GeoHandle::NULL,
        num_indexes: 6,
        num_verts: 4,
    }
}

fn shadow_volume(ctx: &mut RenderContext<HostDevice>) -> DrawSurface {
    let verts = [ShadowVert::default(); 8];
    let indexes: Vec<u32> = (0..36).map(|i| i % 8).collect();
    DrawSurface {
        vertex: ctx.alloc_vertex(
            Some(bytemuck::cast_slice(&verts)),
            verts.len(),
            ShadowVert::STRIDE as usize,
        ),
        index: ctx.alloc_index(Some(bytemuck::cast_slice(&indexes)), indexes.len(), 4),
        joints: GeoHandle::NULL,
        num_indexes: 36,
        num_verts: 8,
    }
}

fn kinds(commands: &[RenderCommand]) -> Vec<&'static str> {
    commands
        .iter()
        .map(|c| match c {
            RenderCommand::BindPipeline(_) => "pipeline",
            RenderCommand::BindDescriptorSet { .. } => "set",
            RenderCommand::BindIndexBuffer(_) => "index",
            RenderCommand::BindVertexBuffer(_) => "vertex",
            RenderCommand::SetViewport { .. } => "viewport",
            RenderCommand::SetScissor { .. } => "scissor",
            RenderCommand::SetDepthBounds { .. } => "bounds",
            RenderCommand::DrawIndexed { .. } => "draw",
        })
        .collect()
}

#[test]
fn test_draw_records_bind_order_and_submits() {
    let mut ctx = context();
    let surface = quad(&mut ctx);

    ctx.begin_back_end();
    ctx.start_frame().unwrap();
    ctx.set_state(state_bits::DEPTHFUNC_LESS);
    ctx.programs_mut().bind_program_named("color").unwrap();
    ctx.programs_mut()
        .set_render_parm(RenderParm::Color, Vec4::new(1.0, 0.0, 0.0, 1.0));
    assert!(ctx.draw_elements(&surface).unwrap());
    ctx.end_frame().unwrap();

    let submission = &ctx.device().submissions()[0];
    assert_eq!(submission.slot, 0);
    let commands = submission.commands.as_slice();
    assert_eq!(kinds(commands), vec!["pipeline", "set", "index", "vertex", "draw"]);

    let index_view = ctx.geometry().get_index_buffer(surface.index).unwrap();
    let vertex_view = ctx.geometry().get_vertex_buffer(surface.vertex).unwrap();
    assert_eq!(commands[2], RenderCommand::BindIndexBuffer(index_view));
    assert_eq!(commands[3], RenderCommand::BindVertexBuffer(vertex_view));
    assert_eq!(
        commands[4],
        RenderCommand::DrawIndexed {
            index_count: 6,
            first_index: 0,
            base_vertex: 0,
        }
    );

    let counters = ctx.counters();
    assert_eq!(counters.draw_elements, 1);
    assert_eq!(counters.draw_indexes, 6);
    assert_eq!(counters.draw_vertexes, 4);
    assert_eq!(counters.vbo_indexes, 6);

    ctx.shutdown();
}

#[test]
fn test_stale_surface_is_skipped() {
    let mut ctx = context();
    let surface = quad(&mut ctx);

    // Two backend passes later the handles belong to a recycled set.
    ctx.begin_back_end();
    ctx.begin_back_end();
    ctx.start_frame().unwrap();
    ctx.programs_mut().bind_program_named("color").unwrap();
    assert!(!ctx.draw_elements(&surface).unwrap());
    assert!(ctx.backend().commands().is_empty());
    assert_eq!(ctx.counters().skipped_draws, 1);
    assert_eq!(ctx.counters().vbo_indexes, 0);
    ctx.end_frame().unwrap();

    ctx.shutdown();
}

#[test]
fn test_counters_sum_large_draws_without_wrapping() {
    let mut ctx = context();
    let huge = DrawSurface {
        num_indexes: u32::MAX,
        num_verts: u32::MAX,
        ..quad(&mut ctx)
    };

    // Stale by the time this backend pass runs, so nothing reaches the device.
    ctx.begin_back_end();
    ctx.begin_back_end();
    ctx.start_frame().unwrap();
    ctx.programs_mut().bind_program_named("shadow").unwrap();
    for _ in 0..2 {
        assert!(!ctx.draw_elements(&huge).unwrap());
        assert!(!ctx.draw_shadow_elements(&huge, u32::MAX, 0.0, 1.0).unwrap());
    }

    let counters = ctx.counters();
    assert_eq!(counters.draw_indexes, 2 * u64::from(u32::MAX));
    assert_eq!(counters.draw_vertexes, 2 * u64::from(u32::MAX));
    assert_eq!(counters.shadow_indexes, 2 * u64::from(u32::MAX));
    assert_eq!(counters.skipped_draws, 4);
    assert_eq!(counters.vbo_indexes, 0);
    ctx.end_frame().unwrap();

    ctx.shutdown();
}

#[test]
fn test_shadow_draw_applies_depth_bounds_only_when_enabled() {
    let mut ctx = context();
    let volume = shadow_volume(&mut ctx);

    ctx.begin_back_end();
    ctx.start_frame().unwrap();
    ctx.programs_mut().bind_program_named("shadow").unwrap();

    ctx.set_state(state_bits::DEPTH_BOUNDS_TEST | state_bits::CULL_TWOSIDED);
    assert!(ctx.draw_shadow_elements(&volume, 36, 0.25, 0.75).unwrap());
    ctx.set_state(state_bits::CULL_TWOSIDED);
    assert!(ctx.draw_shadow_elements(&volume, 12, 0.0, 1.0).unwrap());
    ctx.end_frame().unwrap();

    let commands = ctx.device().submissions()[0].commands.as_slice();
    assert_eq!(
        kinds(commands),
        vec![
            "pipeline", "set", "bounds", "index", "vertex", "draw", //
            "pipeline", "set", "index", "vertex", "draw",
        ]
    );
    assert_eq!(
        commands[2],
        RenderCommand::SetDepthBounds {
            min: 0.25,
            max: 0.75
        }
    );
    assert_eq!(
        commands[10],
        RenderCommand::DrawIndexed {
            index_count: 12,
            first_index: 0,
            base_vertex: 0,
        }
    );

    let counters = ctx.counters();
    assert_eq!(counters.shadow_elements, 2);
    assert_eq!(counters.shadow_indexes, 48);
    assert_eq!(counters.vbo_indexes, 48);

    ctx.shutdown();
}

#[test]
fn test_submissions_alternate_slots() {
    let mut ctx = context();
    for _ in 0..4 {
        let surface = quad(&mut ctx);
        ctx.begin_back_end();
        ctx.start_frame().unwrap();
        ctx.programs_mut().bind_program_named("depth").unwrap();
        assert!(ctx.draw_elements(&surface).unwrap());
        ctx.end_frame().unwrap();
    }

    let slots: Vec<usize> = ctx.device().submissions().iter().map(|s| s.slot).collect();
    assert_eq!(slots, vec![0, 1, 0, 1]);
    assert_eq!(ctx.backend().frames_submitted(), 4);
    assert_eq!(ctx.device().slot_waits(), 4);

    ctx.shutdown();
}

#[test]
fn test_pipelines_are_reused_across_frames() {
    let mut ctx = context();
    for frame in 0..3 {
        let surface = quad(&mut ctx);
        ctx.begin_back_end();
        ctx.start_frame().unwrap();
        ctx.programs_mut().bind_program_named("color").unwrap();
        ctx.set_state(state_bits::DEPTHFUNC_LESS);
        ctx.draw_elements(&surface).unwrap();
        if frame == 2 {
            ctx.set_state(state_bits::DEPTHFUNC_LESS | state_bits::POLYMODE_LINE);
            ctx.draw_elements(&surface).unwrap();
        }
        ctx.end_frame().unwrap();
    }
    assert_eq!(ctx.programs().pipelines().total(), 2);
    assert_eq!(ctx.device().pipelines_created(), 2);

    ctx.clear_pipelines();
    assert_eq!(ctx.programs().pipelines().total(), 0);
    assert_eq!(ctx.device().live_pipeline_count(), 0);

    ctx.shutdown();
}

#[test]
fn test_static_surface_draws_every_frame() {
    let mut ctx = context();
    let verts = [DrawVert::new([0.0; 3], [0.0; 2]); 4];
    let surface = DrawSurface {
        vertex: ctx.alloc_static_vertex(Some(bytemuck::cast_slice(&verts)), 240),
        index: ctx.alloc_static_index(Some(bytemuck::cast_slice(&QUAD_INDICES)), 24),
        joints: GeoHandle::NULL,
        num_indexes: 6,
        num_verts: 4,
    };

    for _ in 0..5 {
        ctx.begin_back_end();
        ctx.start_frame().unwrap();
        ctx.programs_mut().bind_program_named("depth").unwrap();
        assert!(ctx.draw_elements(&surface).unwrap());
        ctx.end_frame().unwrap();
    }
    assert_eq!(ctx.stats().static_allocations, 2);

    ctx.shutdown();
}

#[test]
fn test_shutdown_returns_clean_device() {
    let mut ctx = context();
    let surface = quad(&mut ctx);
    ctx.begin_back_end();
    ctx.start_frame().unwrap();
    ctx.programs_mut().bind_program_named("color").unwrap();
    ctx.draw_elements(&surface).unwrap();
    ctx.end_frame().unwrap();

    let device = ctx.shutdown();
    assert_eq!(device.live_buffer_count(), 0);
    assert_eq!(device.live_pipeline_count(), 0);
    assert_eq!(device.live_shader_module_count(), 0);
}

#[test]
fn test_invalid_config_is_rejected() {
    let mut config = small_config();
    config.geometry.vertex_alignment = 24;
    let result = RenderContext::new(
        HostDevice::default(),
        Box::new(MemoryShaderLibrary::with_builtins()),
        config,
    );
    let err = result.err().expect("misaligned config must fail");
    assert!(format!("{err:#}").contains("geometry.vertex_alignment"));
}
