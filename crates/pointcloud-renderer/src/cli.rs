use clap::Parser;
use std::path::PathBuf;

/// Headless frame driver for the point-cloud renderer.
///
/// Renders a synthetic scene for a number of frames, then runs one picking
/// pass and reports what lies under the center pixel.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Number of frames to render.
    #[arg(long, env = "POINTCLOUD_FRAMES", default_value_t = 3)]
    pub frames: u32,

    /// Points along each side of the synthetic scan grid.
    #[arg(long, env = "POINTCLOUD_GRID_SIDE", default_value_t = 64)]
    pub grid_side: u32,

    /// Target width in pixels. Overrides the config file.
    #[arg(long, env = "POINTCLOUD_WIDTH")]
    pub width: Option<u32>,

    /// Target height in pixels. Overrides the config file.
    #[arg(long, env = "POINTCLOUD_HEIGHT")]
    pub height: Option<u32>,

    /// JSON renderer config.
    #[arg(long, env = "POINTCLOUD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Record draws in memory instead of opening a GPU device.
    #[arg(long)]
    pub dry_run: bool,

    /// Decode every marker again on every frame.
    #[arg(long)]
    pub redecode: bool,
}
