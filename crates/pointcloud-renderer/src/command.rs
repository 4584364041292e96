//! Per-frame orchestration: decode, cache, resolve, draw.

use crate::cache::{MarkerCache, MemoizedGpuBuffer, VertexBufferCache};
use crate::color::{self, ColorModeSpec};
use crate::config::RendererConfig;
use crate::error::{GpuError, SkipReason, SkippedMarker};
use crate::gpu::{AttributeBinding, AttributeFormat, BufferHandle, DrawCall, GpuBackend, RenderState, TargetKind};
use crate::hitmap;
use log::{debug, warn};
use pointcloud::{DecodedMarker, MarkerId, RawMarker, ViewId};
use std::collections::HashSet;
use std::sync::Arc;

/// Outcome of one pass.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FrameReport {
    /// Markers whose draw reached the target.
    pub drawn: usize,
    pub skipped: Vec<SkippedMarker>,
}

/// Draws decoded markers into one target with its own pair of buffer caches.
pub struct PointCloudCommand {
    target: TargetKind,
    positions: VertexBufferCache,
    colors: VertexBufferCache,
    /// Buffers that only live for the current frame.
    transient: Vec<BufferHandle>,
}

impl PointCloudCommand {
    pub fn new(target: TargetKind) -> Self {
        let (positions, colors) = match target {
            TargetKind::Main => ("point positions", "point colors"),
            TargetKind::Hitmap => ("hitmap positions", "hitmap colors"),
        };
        Self {
            target,
            positions: VertexBufferCache::new(positions),
            colors: VertexBufferCache::new(colors),
            transient: Vec::new(),
        }
    }

    pub fn target(&self) -> TargetKind {
        self.target
    }

    pub fn positions(&self) -> &VertexBufferCache {
        &self.positions
    }

    pub fn colors(&self) -> &VertexBufferCache {
        &self.colors
    }

    /// Draws `markers` and flushes the target.
    ///
    /// Per-marker failures land in `report`. A fatal GPU error drops both
    /// caches and is returned.
    pub fn draw<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        markers: &[Arc<DecodedMarker>],
        config: &RendererConfig,
        report: &mut FrameReport,
    ) -> Result<(), GpuError> {
        self.positions.on_pre_render();
        self.colors.on_pre_render();

        let result = self.draw_batch(backend, markers, config, report);

        for handle in self.transient.drain(..) {
            backend.destroy_buffer(handle);
        }

        match result {
            Ok(()) => {
                self.positions.on_post_render(backend);
                self.colors.on_post_render(backend);
                Ok(())
            }
            Err(err) => {
                self.drop_caches(backend, &err);
                Err(err)
            }
        }
    }

    fn draw_batch<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        markers: &[Arc<DecodedMarker>],
        config: &RendererConfig,
        report: &mut FrameReport,
    ) -> Result<(), GpuError> {
        let batch = BatchState::of(markers);
        let mut drawn = Vec::new();

        for marker in markers {
            if marker.point_count == 0 {
                continue;
            }
            match self.draw_marker(backend, marker, &batch, config) {
                Ok(()) => drawn.push(marker.name.clone()),
                Err(reason) => {
                    if let Some(fatal) = reason.fatal() {
                        return Err(fatal.clone());
                    }
                    warn!("skipping point cloud `{}`: {reason}", marker.name);
                    report.skipped.push(SkippedMarker {
                        name: marker.name.clone(),
                        reason,
                    });
                }
            }
        }

        match backend.flush(self.target) {
            Ok(()) => report.drawn += drawn.len(),
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!("{:?} flush failed, {} draws lost: {err}", self.target, drawn.len());
                report.skipped.extend(drawn.into_iter().map(|name| SkippedMarker {
                    name,
                    reason: SkipReason::Gpu(err.clone()),
                }));
            }
        }
        Ok(())
    }

    fn draw_marker<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        marker: &DecodedMarker,
        batch: &BatchState,
        config: &RendererConfig,
    ) -> Result<(), SkipReason> {
        let count = marker.point_count;
        if count > config.max_points_per_marker {
            return Err(SkipReason::TooManyPoints {
                points: count,
                limit: config.max_points_per_marker,
            });
        }
        let instance_count = u32::try_from(count).map_err(|_| SkipReason::TooManyPoints {
            points: count,
            limit: u32::MAX as usize,
        })?;

        let resolved = color::resolve(marker);
        let id_colors = marker
            .hitmap_colors
            .as_deref()
            .map(|colors| {
                colors.get(..count * 4).ok_or(SkipReason::HitmapColorsTruncated {
                    required: count * 4,
                    available: colors.len(),
                })
            })
            .transpose()?;

        let position = binding(
            self.positions
                .get(backend, &marker.position_buffer, count, AttributeFormat::Float32x3.size())?,
            AttributeFormat::Float32x3,
        );

        let color = match (&resolved, id_colors) {
            (_, Some(bytes)) => {
                let handle = backend.create_vertex_buffer("hitmap id colors", bytes)?;
                self.transient.push(handle);
                AttributeBinding {
                    buffer: handle,
                    byte_offset: 0,
                    byte_stride: 4,
                    divisor: 1,
                    format: AttributeFormat::Unorm8x4,
                }
            }
            // The single-color program never reads the attribute in flat mode,
            // so the position buffer stands in for it.
            (ColorModeSpec::Flat(_), None) => AttributeBinding {
                format: AttributeFormat::Float32,
                ..position
            },
            (ColorModeSpec::Rgb | ColorModeSpec::Rgba, None) => {
                self.color_binding(backend, marker, AttributeFormat::Unorm8x4)?
            }
            (ColorModeSpec::Gradient { .. } | ColorModeSpec::Rainbow { .. } | ColorModeSpec::Turbo { .. }, None) => {
                self.color_binding(backend, marker, AttributeFormat::Float32)?
            }
        };

        let call = DrawCall {
            target: self.target,
            variant: resolved.variant(),
            position,
            color,
            uniforms: color::build_uniforms(marker, &resolved, config.default_point_size),
            state: batch.state,
            blend_constant: batch.blend_constant,
            instance_count,
        };
        backend.draw(&call)?;
        Ok(())
    }

    fn color_binding<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        marker: &DecodedMarker,
        format: AttributeFormat,
    ) -> Result<AttributeBinding, SkipReason> {
        let view = marker
            .color_buffer
            .as_ref()
            .ok_or(SkipReason::MissingColorBuffer)?;
        let slot = self
            .colors
            .get(backend, view, marker.point_count, format.size())?;
        Ok(binding(slot, format))
    }

    /// Frees cached buffers whose view no longer belongs to any of `markers`.
    /// For passes that do not run every frame.
    pub fn release_unreferenced<B: GpuBackend + ?Sized>(&mut self, backend: &mut B, markers: &[Arc<DecodedMarker>]) {
        let live: HashSet<ViewId> = markers
            .iter()
            .flat_map(|m| std::iter::once(m.position_buffer.id()).chain(m.color_buffer.as_ref().map(|v| v.id())))
            .collect();
        let released = self.positions.retain_views(backend, &live) + self.colors.retain_views(backend, &live);
        if released > 0 {
            debug!("{:?} pass: released {released} buffers of departed markers", self.target);
        }
    }

    /// Drops every cached buffer.
    pub fn clear<B: GpuBackend + ?Sized>(&mut self, backend: &mut B) {
        self.positions.clear(backend);
        self.colors.clear(backend);
    }

    fn drop_caches<B: GpuBackend + ?Sized>(&mut self, backend: &mut B, err: &GpuError) {
        if *err == GpuError::ContextLost {
            self.positions.forget();
            self.colors.forget();
        } else {
            self.clear(backend);
        }
    }
}

fn binding(slot: &MemoizedGpuBuffer, format: AttributeFormat) -> AttributeBinding {
    AttributeBinding {
        buffer: slot.handle,
        byte_offset: slot.byte_offset,
        byte_stride: slot.byte_stride,
        divisor: slot.divisor,
        format,
    }
}

/// GPU state shared by every draw of a batch, taken from its first marker.
struct BatchState {
    state: RenderState,
    blend_constant: Option<[f32; 4]>,
}

impl BatchState {
    fn of(markers: &[Arc<DecodedMarker>]) -> Self {
        let Some(first) = markers.first() else {
            return Self {
                state: RenderState::default(),
                blend_constant: None,
            };
        };

        if let Some(other) = markers[1..]
            .iter()
            .find(|m| m.blend != first.blend || m.depth != first.depth)
        {
            warn!(
                "point cloud `{}` requests different blend/depth state than `{}`; \
                 the whole batch uses the state of `{}`",
                other.name, first.name, first.name
            );
        }

        Self {
            state: RenderState::with_overrides(first.blend.as_ref(), first.depth.as_ref()),
            blend_constant: first.blend.and_then(|b| b.color).map(|c| c.to_array()),
        }
    }
}

/// Both render passes over one marker set.
pub struct PointClouds {
    config: RendererConfig,
    markers: MarkerCache,
    main: PointCloudCommand,
    hitmap: PointCloudCommand,
}

impl PointClouds {
    pub fn new(config: RendererConfig) -> Self {
        Self {
            config,
            markers: MarkerCache::new(),
            main: PointCloudCommand::new(TargetKind::Main),
            hitmap: PointCloudCommand::new(TargetKind::Hitmap),
        }
    }

    /// Draws the current marker list into the main target.
    ///
    /// `clear_cached_markers` decodes every record again instead of reusing
    /// earlier results.
    pub fn render<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        markers: &[Arc<RawMarker>],
        clear_cached_markers: bool,
    ) -> Result<FrameReport, GpuError> {
        let mut report = FrameReport::default();
        let decoded = if clear_cached_markers {
            self.markers.decode_fresh(markers, &mut report.skipped)
        } else {
            self.markers.update(markers, &mut report.skipped)
        };

        if let Err(err) = self.main.draw(backend, &decoded, &self.config, &mut report) {
            self.abort(backend, &err);
            return Err(err);
        }
        self.hitmap.release_unreferenced(backend, &decoded);

        debug!(
            "main pass: {} drawn, {} skipped, {} position / {} color buffers cached",
            report.drawn,
            report.skipped.len(),
            self.main.positions.len(),
            self.main.colors.len()
        );
        Ok(report)
    }

    /// Draws id-colored copies of the markers not in `excluded` into the
    /// picking target.
    ///
    /// `assign_next_colors(marker, count)` must return `count` normalized
    /// colors, one per point.
    pub fn render_hitmap<B, F>(
        &mut self,
        backend: &mut B,
        markers: &[Arc<RawMarker>],
        assign_next_colors: F,
        excluded: &HashSet<MarkerId>,
    ) -> Result<FrameReport, GpuError>
    where
        B: GpuBackend + ?Sized,
        F: FnMut(&DecodedMarker, usize) -> Vec<[f32; 4]>,
    {
        let mut report = FrameReport::default();
        let decoded = self.markers.update(markers, &mut report.skipped);
        let picking = hitmap::picking_pass(
            &decoded,
            assign_next_colors,
            excluded,
            self.config.hitmap_point_scale,
            self.config.default_point_size,
        );

        if let Err(err) = self.hitmap.draw(backend, &picking, &self.config, &mut report) {
            self.abort(backend, &err);
            return Err(err);
        }

        debug!(
            "hitmap pass: {} drawn, {} left out",
            report.drawn,
            decoded.len() - picking.len()
        );
        Ok(report)
    }

    /// Forgets every decoded marker and frees every cached GPU buffer.
    pub fn flush_caches<B: GpuBackend + ?Sized>(&mut self, backend: &mut B) {
        self.markers.clear();
        self.main.clear(backend);
        self.hitmap.clear(backend);
    }

    fn abort<B: GpuBackend + ?Sized>(&mut self, backend: &mut B, err: &GpuError) {
        warn!("{err}; dropping all point cloud caches");
        self.markers.clear();
        self.main.drop_caches(backend, err);
        self.hitmap.drop_caches(backend, err);
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn decode_count(&self) -> usize {
        self.markers.decode_count()
    }

    pub fn marker_cache(&self) -> &MarkerCache {
        &self.markers
    }

    pub fn main(&self) -> &PointCloudCommand {
        &self.main
    }

    pub fn hitmap(&self) -> &PointCloudCommand {
        &self.hitmap
    }
}
