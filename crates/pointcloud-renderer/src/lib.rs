//! GPU core of the point-cloud marker renderer.
//!
//! Each frame the caller hands [`PointClouds`] the current list of
//! [`RawMarker`](pointcloud::RawMarker)s. Records are decoded once per
//! identity ([`cache::MarkerCache`]), their buffer views are uploaded once per
//! view ([`cache::VertexBufferCache`]), and every marker becomes one instanced
//! draw through a [`gpu::GpuBackend`]. Buffers and decodes no longer referenced
//! are dropped at the end of the frame.
//!
//! [`PointClouds::render_hitmap`] draws the same markers with per-point id
//! colors for picking; [`hitmap::HitmapIdAllocator`] maps a read-back pixel
//! to the point under it.

pub mod cache;
pub mod color;
pub mod command;
pub mod config;
pub mod error;
pub mod gpu;
pub mod hitmap;
pub mod renderer;

pub use self::command::{FrameReport, PointCloudCommand, PointClouds};
pub use self::config::RendererConfig;
pub use self::error::{CacheError, ConfigError, GpuError, SkipReason, SkippedMarker};
pub use self::gpu::{GpuBackend, RecordingBackend, TargetKind};
pub use self::hitmap::{HitmapIdAllocator, PickedPoint};
pub use self::renderer::WgpuBackend;
