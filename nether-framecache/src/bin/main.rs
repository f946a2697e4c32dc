//! Frame Cache Simulator
//!
//! Drives the frame cache through a synthetic workload: a depth prepass, an
//! additive color pass and stencil shadow volumes over a grid of quads, with
//! geometry re-uploaded every frame.
//!
//! # Usage
//!
//! ```bash
//! framecache-sim
//! framecache-sim --frames 600 --surfaces 256
//! framecache-sim --config my-config.toml --print-pipelines
//! framecache-sim --gpu
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use glam::{Mat4, Vec3, Vec4};
use tracing::info;

use nether_framecache::backend::DrawSurface;
use nether_framecache::config::{self, FrameCacheConfig};
use nether_framecache::device::{HostDevice, RenderDevice};
use nether_framecache::{GeoHandle, MemoryShaderLibrary, RenderContext, RenderParm, state_bits};
use nether_framecache_shared::{DrawVert, ShadowVert};

#[derive(Parser)]
#[command(name = "framecache-sim")]
#[command(author, version, about = "Frame-pipelined geometry cache simulator")]
struct Args {
    /// Number of frames to run
    #[arg(long, short = 'n', default_value = "120")]
    frames: u64,

    /// Quads drawn per frame
    #[arg(long, short = 's', default_value = "64")]
    surfaces: u32,

    /// Draw a shadow volume for every Nth quad (0 disables shadows)
    #[arg(long, default_value = "8")]
    shadow_every: u32,

    /// Config file (default: config.toml in the user config directory)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override geometry.frames_in_flight
    #[arg(long)]
    frames_in_flight: Option<usize>,

    /// Write the effective config to the user config directory
    #[arg(long)]
    save_config: bool,

    /// Dump every cached pipeline state after the run
    #[arg(long)]
    print_pipelines: bool,

    /// Render through wgpu instead of the in-memory device
    #[cfg(feature = "wgpu-backend")]
    #[arg(long)]
    gpu: bool,

    /// Debug logging
    #[arg(long, short = 'v')]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => FrameCacheConfig::load_from(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => config::load(),
    };
    if let Some(frames_in_flight) = args.frames_in_flight {
        config.geometry.frames_in_flight = frames_in_flight;
    }
    if args.save_config {
        config::save(&config).context("Failed to save config")?;
    }

    #[cfg(feature = "wgpu-backend")]
    if args.gpu {
        let device = nether_framecache::device::WgpuDevice::new()?;
        return simulate(device, config, &args);
    }

    simulate(HostDevice::default(), config, &args)
}

fn simulate<D: RenderDevice>(device: D, config: FrameCacheConfig, args: &Args) -> Result<()> {
    let library = Box::new(MemoryShaderLibrary::with_builtins());
    let mut ctx = RenderContext::new(device, library, config)?;

    let depth = program(&ctx, "depth")?;
    let color = program(&ctx, "color")?;
    let shadow = program(&ctx, "shadow")?;

    // Floor quad uploaded once and drawn every frame.
    let floor = DrawSurface {
        vertex: ctx.alloc_static_vertex(
            Some(bytemuck::cast_slice(&quad_vertices(0.0, 0.0, 16.0))),
            (4 * DrawVert::STRIDE) as u64,
        ),
        index: ctx.alloc_static_index(
            Some(bytemuck::cast_slice(&QUAD_INDICES)),
            std::mem::size_of_val(&QUAD_INDICES) as u64,
        ),
        joints: GeoHandle::NULL,
        num_indexes: QUAD_INDICES.len() as u32,
        num_verts: 4,
    };

    let view_proj = Mat4::perspective_rh(60f32.to_radians(), 4.0 / 3.0, 1.0, 1000.0)
        * Mat4::look_at_rh(Vec3::new(0.0, 20.0, 40.0), Vec3::ZERO, Vec3::Y);

    let mut totals = (0u64, 0u64, 0u64);
    for frame in 0..args.frames {
        // Frontend: build this frame's geometry.
        let mut surfaces = vec![floor];
        let mut volumes = Vec::new();
        for i in 0..args.surfaces {
            let (x, z) = ((i % 16) as f32 * 2.0 - 16.0, (i / 16) as f32 * 2.0 - 16.0);
            let y = ((frame as f32 * 0.05) + i as f32).sin();
            let verts = quad_vertices(x, z + y, 0.8);
            surfaces.push(DrawSurface {
                vertex: ctx.alloc_vertex(
                    Some(bytemuck::cast_slice(&verts)),
                    verts.len(),
                    DrawVert::STRIDE as usize,
                ),
                index: ctx.alloc_index(
                    Some(bytemuck::cast_slice(&QUAD_INDICES)),
                    QUAD_INDICES.len(),
                    4,
                ),
                joints: GeoHandle::NULL,
                num_indexes: QUAD_INDICES.len() as u32,
                num_verts: verts.len() as u32,
            });

            if args.shadow_every != 0 && i % args.shadow_every == 0 {
                let (verts, indexes) = shadow_volume(x, z);
                volumes.push(DrawSurface {
                    vertex: ctx.alloc_vertex(
                        Some(bytemuck::cast_slice(&verts)),
                        verts.len(),
                        ShadowVert::STRIDE as usize,
                    ),
                    index: ctx.alloc_index(Some(bytemuck::cast_slice(&indexes)), indexes.len(), 4),
                    joints: GeoHandle::NULL,
                    num_indexes: indexes.len() as u32,
                    num_verts: verts.len() as u32,
                });
            }
        }

        // Backend: draw what the frontend just produced.
        ctx.begin_back_end();
        ctx.start_frame()?;

        let mvp = view_proj.transpose();
        ctx.programs_mut()
            .set_render_parms(RenderParm::MvpMatrixX, &mvp.to_cols_array_2d().map(Vec4::from_array));

        ctx.set_state(state_bits::DEPTHFUNC_LESS);
        ctx.programs_mut().bind_program(depth);
        for surface in &surfaces {
            ctx.draw_elements(surface)?;
        }

        ctx.set_state(
            state_bits::SRCBLEND_ONE
                | state_bits::DSTBLEND_ONE
                | state_bits::DEPTHFUNC_EQUAL
                | state_bits::DEPTHMASK,
        );
        ctx.programs_mut().bind_program(color);
        for (i, surface) in surfaces.iter().enumerate() {
            let shade = (i % 8) as f32 / 8.0;
            ctx.programs_mut()
                .set_render_parm(RenderParm::Color, Vec4::new(shade, 0.5, 1.0 - shade, 1.0));
            ctx.draw_elements(surface)?;
        }

        ctx.set_state(
            state_bits::DEPTHMASK
                | state_bits::COLORMASK
                | state_bits::CULL_TWOSIDED
                | state_bits::DEPTHFUNC_LESS
                | state_bits::STENCIL_FUNC_ALWAYS
                | state_bits::STENCIL_OP_ZFAIL_INCR_WRAP
                | state_bits::DEPTH_BOUNDS_TEST,
        );
        ctx.programs_mut().bind_program(shadow);
        ctx.programs_mut()
            .set_render_parm(RenderParm::LocalLightOrigin, Vec4::new(0.0, 30.0, 0.0, 1.0));
        for volume in &volumes {
            ctx.draw_shadow_elements(volume, volume.num_indexes, 0.0, 1.0)?;
        }

        let counters = ctx.counters();
        totals.0 += counters.draw_elements;
        totals.1 += counters.shadow_elements;
        totals.2 += counters.skipped_draws;
        ctx.end_frame()?;

        if (frame + 1) % 60 == 0 {
            let stats = ctx.stats();
            info!(
                "frame {}: {} allocations, vertex {} / index {} bytes, {} descriptor sets",
                stats.frame,
                stats.allocations,
                stats.vertex_used,
                stats.index_used,
                ctx.programs().sets_allocated()
            );
        }
    }

    let stats = ctx.stats();
    info!(
        "{} frames: {} draws, {} shadow draws, {} skipped",
        args.frames, totals.0, totals.1, totals.2
    );
    info!(
        "peak usage: vertex {} / index {} / joint {} bytes; static {} + {} bytes",
        stats.most_used_vertex,
        stats.most_used_index,
        stats.most_used_joint,
        stats.static_vertex_used,
        stats.static_index_used
    );
    ctx.programs().print_num_pipelines();
    if args.print_pipelines {
        ctx.programs().print_pipeline_states();
    }

    ctx.shutdown();
    Ok(())
}

fn program<D: RenderDevice>(ctx: &RenderContext<D>, name: &str) -> Result<usize> {
    ctx.programs()
        .registry()
        .program_index(name)
        .with_context(|| format!("Built-in program '{name}' is missing"))
}

const QUAD_INDICES: [u32; 6] = [0, 1, 2, 2, 3, 0];

fn quad_vertices(x: f32, z: f32, half: f32) -> [DrawVert; 4] {
    [
        DrawVert::new([x - half, 0.0, z - half], [0.0, 0.0]),
        DrawVert::new([x + half, 0.0, z - half], [1.0, 0.0]),
        DrawVert::new([x + half, 0.0, z + half], [1.0, 1.0]),
        DrawVert::new([x - half, 0.0, z + half], [0.0, 1.0]),
    ]
}

/// Box extruded from a quad toward infinity (w = 0 for the far cap).
fn shadow_volume(x: f32, z: f32) -> ([ShadowVert; 8], [u32; 36]) {
    let near = [[-0.5, -0.5], [0.5, -0.5], [0.5, 0.5], [-0.5, 0.5]];
    let mut verts = [ShadowVert::default(); 8];
    for (i, [dx, dz]) in near.into_iter().enumerate() {
        verts[i].xyzw = [x + dx, 1.0, z + dz, 1.0];
        verts[i + 4].xyzw = [x + dx, 1.0, z + dz, 0.0];
    }
    let indexes = [
        0, 1, 2, 2, 3, 0, // near cap
        4, 6, 5, 6, 4, 7, // far cap
        0, 4, 5, 5, 1, 0, //
        1, 5, 6, 6, 2, 1, //
        2, 6, 7, 7, 3, 2, //
        3, 7, 4, 4, 0, 3, //
    ];
    (verts, indexes)
}
