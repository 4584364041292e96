//! Headless frame driver: renders a synthetic scene and runs one pick.

mod cli;
mod scene;

use anyhow::Result;
use clap::Parser;
use glam::{Mat4, Vec3};
use log::info;
use pointcloud_renderer::{
    GpuBackend, HitmapIdAllocator, PointClouds, RecordingBackend, RendererConfig, WgpuBackend,
};
use std::collections::HashSet;

use crate::cli::Config;
use crate::scene::Scene;

fn main() -> Result<()> {
    // Initialize logging; default to "info" if RUST_LOG is unset.
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")
    ).init();

    let args = Config::parse();
    let mut config = match &args.config {
        Some(path) => RendererConfig::from_path(path)?,
        None => RendererConfig::default(),
    };
    config.target_width = args.width.unwrap_or(config.target_width);
    config.target_height = args.height.unwrap_or(config.target_height);
    config.validate()?;
    info!("renderer config: {config:?}");

    if args.dry_run {
        let mut backend = RecordingBackend::new();
        run(&mut backend, &args, config)?;
        info!(
            "dry run: {} buffers allocated, {} destroyed, {} still live",
            backend.allocations,
            backend.destroyed,
            backend.live_buffers()
        );
    } else {
        let mut backend =
            pollster::block_on(WgpuBackend::new(config.target_width, config.target_height))?;
        run(&mut backend, &args, config)?;
        info!("{} point pipelines specialized", backend.pipeline_count());
    }

    Ok(())
}

fn run<B: GpuBackend>(backend: &mut B, args: &Config, config: RendererConfig) -> Result<()> {
    let (width, height) = (config.target_width, config.target_height);
    let aspect = width as f32 / height as f32;
    let mut clouds = PointClouds::new(config);
    let mut scene = Scene::new(args.grid_side);

    for frame in 0..args.frames {
        let markers = scene.advance(frame);
        backend.begin_frame(camera(frame, aspect));
        let report = clouds.render(backend, &markers, args.redecode)?;
        info!(
            "frame {frame}: {} drawn, {} skipped, {} decodes so far",
            report.drawn,
            report.skipped.len(),
            clouds.decode_count()
        );
    }

    // Pick whatever lies under the center of the last frame.
    let markers = scene.markers();
    let mut ids = HitmapIdAllocator::new();
    let report = clouds.render_hitmap(
        backend,
        &markers,
        |marker, count| ids.assign_next_colors(marker, count),
        &HashSet::new(),
    )?;
    info!("hitmap: {} markers drawn", report.drawn);

    let pixel = backend.read_hitmap_pixel(width / 2, height / 2)?;
    match ids.resolve(pixel) {
        Some(hit) => {
            let name = markers
                .iter()
                .find(|m| m.id() == hit.marker)
                .map_or("?", |m| m.name.as_str());
            info!("center pixel hits point {} of `{name}`", hit.point_index);
        }
        None => info!("center pixel hits nothing"),
    }

    Ok(())
}

/// Orbiting camera, one step per frame.
fn camera(frame: u32, aspect: f32) -> Mat4 {
    let angle = frame as f32 * 0.1;
    let eye = Vec3::new(angle.cos() * 8.0, angle.sin() * 8.0, 5.0);
    let proj = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 100.0);
    let view = Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Z);
    proj * view
}
