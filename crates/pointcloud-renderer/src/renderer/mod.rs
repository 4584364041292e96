//! wgpu implementation of [`GpuBackend`] drawing into offscreen targets.
//!
//! Draws are queued per target and encoded into one render pass on
//! [`GpuBackend::flush`]. The first flush of a target after
//! [`GpuBackend::begin_frame`] clears it, later ones draw on top. Buffers
//! destroyed while draws still reference them stay alive until those draws
//! have been submitted.

pub mod context;
pub mod pipelines;
pub mod targets;

use self::{
    context::GfxContext,
    pipelines::{PipelineKey, PointPipelines},
    targets::Targets,
};
use crate::error::GpuError;
use crate::gpu::{AttributeBinding, BufferHandle, DrawCall, FrameUniforms, GpuBackend, PointUniforms, TargetKind};
use glam::Mat4;
use log::{info, warn};
use std::collections::{HashMap, HashSet};
use wgpu::util::DeviceExt;

/// Dynamic-offset uniform buffer holding one [`PointUniforms`] per draw.
struct UniformRing {
    buffer:    wgpu::Buffer,
    bind:      wgpu::BindGroup,
    slot_size: u64,
    slots:     usize,
}

impl UniformRing {
    fn new(device: &wgpu::Device, layout: &wgpu::BindGroupLayout, slot_size: u64, slots: usize) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Point Draw UBO"),
            size: slot_size * slots as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Point Draw BindGroup"),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(std::mem::size_of::<PointUniforms>() as u64),
                }),
            }],
        });
        Self {
            buffer,
            bind,
            slot_size,
            slots,
        }
    }

    fn ensure(&mut self, device: &wgpu::Device, layout: &wgpu::BindGroupLayout, slots: usize) {
        if slots > self.slots {
            *self = Self::new(device, layout, self.slot_size, slots.next_power_of_two());
        }
    }

    #[inline]
    fn offset(&self, slot: usize) -> u64 {
        slot as u64 * self.slot_size
    }
}

pub struct WgpuBackend {
    gfx:         GfxContext,
    targets:     Targets,
    pipelines:   PointPipelines,
    frame_ubo:   wgpu::Buffer,
    frame_bind:  wgpu::BindGroup,
    draw_ubo:    UniformRing,
    next_handle: u64,
    buffers:     HashMap<BufferHandle, wgpu::Buffer>,
    /// Destroyed by the caller, kept until queued draws using them are submitted.
    retired:     HashMap<BufferHandle, wgpu::Buffer>,
    pending:     Vec<DrawCall>,
    /// Targets already cleared this frame.
    cleared:     HashSet<TargetKind>,
    view_proj:   Mat4,
}

impl WgpuBackend {
    pub async fn new(width: u32, height: u32) -> anyhow::Result<Self> {
        let gfx = GfxContext::new().await?;
        let device = &gfx.device;

        let targets = Targets::new(device, width, height);
        let pipelines = PointPipelines::new(device, targets.color_fmt, targets.hitmap_fmt, targets.depth_fmt);

        let frame_ubo = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Point Frame UBO"),
            size: std::mem::size_of::<FrameUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let frame_bind = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Point Frame BindGroup"),
            layout: &pipelines.frame_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: frame_ubo.as_entire_binding(),
            }],
        });

        let alignment = device.limits().min_uniform_buffer_offset_alignment as u64;
        let slot_size = (std::mem::size_of::<PointUniforms>() as u64).div_ceil(alignment) * alignment;
        let draw_ubo = UniformRing::new(device, &pipelines.point_layout, slot_size, 64);

        info!("headless point renderer ready at {}x{}", targets.width, targets.height);

        let backend = Self {
            gfx,
            targets,
            pipelines,
            frame_ubo,
            frame_bind,
            draw_ubo,
            next_handle: 0,
            buffers: HashMap::new(),
            retired: HashMap::new(),
            pending: Vec::new(),
            cleared: HashSet::new(),
            view_proj: Mat4::IDENTITY,
        };
        backend.write_frame_uniforms();
        Ok(backend)
    }

    pub fn size(&self) -> (u32, u32) {
        (self.targets.width, self.targets.height)
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.targets.resize(&self.gfx.device, width, height);
            self.cleared.clear();
            self.write_frame_uniforms();
        }
    }

    /// Number of pipelines specialized so far.
    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    /// Every later call fails with [`GpuError::ContextLost`].
    pub fn mark_context_lost(&mut self) {
        self.gfx.mark_lost();
    }

    fn check_device(&self) -> Result<(), GpuError> {
        if self.gfx.is_lost() {
            return Err(GpuError::ContextLost);
        }
        Ok(())
    }

    fn push_error_scopes(&self) {
        self.gfx.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.gfx.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    }

    fn pop_error_scopes(&self) -> Result<(), GpuError> {
        let oom = pollster::block_on(self.gfx.device.pop_error_scope());
        let validation = pollster::block_on(self.gfx.device.pop_error_scope());
        if oom.is_some() {
            return Err(GpuError::OutOfMemory);
        }
        if let Some(err) = validation {
            return Err(GpuError::InvalidDraw(err.to_string()));
        }
        self.check_device()
    }

    fn write_frame_uniforms(&self) {
        let uniforms = FrameUniforms {
            view_proj: self.view_proj.to_cols_array_2d(),
            viewport_size: [self.targets.width as f32, self.targets.height as f32],
            _pad: [0.0; 2],
        };
        self.gfx.queue.write_buffer(&self.frame_ubo, 0, bytemuck::bytes_of(&uniforms));
    }

    fn lookup(&self, handle: BufferHandle) -> Option<&wgpu::Buffer> {
        self.buffers.get(&handle).or_else(|| self.retired.get(&handle))
    }

    fn check_binding(&self, what: &str, call: &DrawCall, binding: &AttributeBinding) -> Result<(), GpuError> {
        let buffer = self
            .buffers
            .get(&binding.buffer)
            .ok_or(GpuError::UnknownBuffer(binding.buffer))?;

        let max_stride = self.gfx.device.limits().max_vertex_buffer_array_stride as u64;
        if binding.byte_stride > max_stride {
            return Err(GpuError::InvalidDraw(format!(
                "{what} stride {} exceeds the device limit of {max_stride}",
                binding.byte_stride
            )));
        }
        if binding.byte_offset % wgpu::VERTEX_STRIDE_ALIGNMENT != 0
            || binding.byte_stride % wgpu::VERTEX_STRIDE_ALIGNMENT != 0
        {
            return Err(GpuError::InvalidDraw(format!(
                "{what} offset {} / stride {} not 4-byte aligned",
                binding.byte_offset, binding.byte_stride
            )));
        }

        let span = binding.span(call.instance_count);
        if span > buffer.size() {
            return Err(GpuError::InvalidDraw(format!(
                "{what} attribute reads {span} bytes from a {}-byte buffer",
                buffer.size()
            )));
        }
        Ok(())
    }

    /// Destroys retired buffers no queued draw refers to any more.
    fn release_retired(&mut self) {
        let pending = &self.pending;
        self.retired.retain(|handle, buffer| {
            let in_use = pending
                .iter()
                .any(|c| c.position.buffer == *handle || c.color.buffer == *handle);
            if !in_use {
                buffer.destroy();
            }
            in_use
        });
    }

    fn encode_pass(&self, target: TargetKind, draws: &[DrawCall], clear: bool) -> wgpu::CommandBuffer {
        let mut encoder = self
            .gfx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Point Cloud Encoder"),
            });

        let attachment = self.targets.get(target);
        let (color_load, depth_load) = if clear {
            (
                wgpu::LoadOp::Clear(wgpu::Color { r: 0.0, g: 0.0, b: 0.0, a: 0.0 }),
                wgpu::LoadOp::Clear(1.0),
            )
        } else {
            (wgpu::LoadOp::Load, wgpu::LoadOp::Load)
        };

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(match target {
                    TargetKind::Main => "Point Cloud Pass",
                    TargetKind::Hitmap => "Point Cloud Hitmap Pass",
                }),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &attachment.color,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: color_load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &attachment.depth,
                    depth_ops: Some(wgpu::Operations {
                        load: depth_load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            pass.set_bind_group(0, &self.frame_bind, &[]);
            pass.set_vertex_buffer(0, self.pipelines.quad_vb.slice(..));

            for (slot, call) in draws.iter().enumerate() {
                let (Some(pipeline), Some(position), Some(color)) = (
                    self.pipelines.get(&PipelineKey::of(call)),
                    self.lookup(call.position.buffer),
                    self.lookup(call.color.buffer),
                ) else {
                    warn!("dropping draw with missing pipeline or buffer");
                    continue;
                };

                pass.set_pipeline(pipeline);
                pass.set_bind_group(1, &self.draw_ubo.bind, &[self.draw_ubo.offset(slot) as u32]);
                pass.set_vertex_buffer(1, position.slice(call.position.byte_offset..));
                pass.set_vertex_buffer(2, color.slice(call.color.byte_offset..));
                if let Some([r, g, b, a]) = call.blend_constant {
                    pass.set_blend_constant(wgpu::Color {
                        r: r as f64,
                        g: g as f64,
                        b: b as f64,
                        a: a as f64,
                    });
                }
                pass.draw(0..6, 0..call.instance_count);
            }
        }

        encoder.finish()
    }
}

impl GpuBackend for WgpuBackend {
    fn create_vertex_buffer(&mut self, label: &str, contents: &[u8]) -> Result<BufferHandle, GpuError> {
        self.check_device()?;
        self.push_error_scopes();
        let buffer = self
            .gfx
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage: wgpu::BufferUsages::VERTEX,
            });
        self.pop_error_scopes()?;

        self.next_handle += 1;
        let handle = BufferHandle(self.next_handle);
        self.buffers.insert(handle, buffer);
        Ok(handle)
    }

    fn destroy_buffer(&mut self, handle: BufferHandle) {
        match self.buffers.remove(&handle) {
            Some(buffer) => {
                self.retired.insert(handle, buffer);
            }
            None => warn!("destroying unknown buffer {handle:?}"),
        }
        if self.pending.is_empty() {
            self.release_retired();
        }
    }

    fn draw(&mut self, call: &DrawCall) -> Result<(), GpuError> {
        self.check_device()?;
        self.check_binding("position", call, &call.position)?;
        self.check_binding("color", call, &call.color)?;
        self.pending.push(*call);
        Ok(())
    }

    fn flush(&mut self, target: TargetKind) -> Result<(), GpuError> {
        self.check_device()?;

        let (draws, rest): (Vec<DrawCall>, Vec<DrawCall>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|call| call.target == target);
        self.pending = rest;

        let clear = self.cleared.insert(target);
        if draws.is_empty() && !clear {
            self.release_retired();
            return Ok(());
        }

        self.push_error_scopes();

        let device = &self.gfx.device;
        self.draw_ubo.ensure(device, &self.pipelines.point_layout, draws.len());
        if !draws.is_empty() {
            let mut staging = vec![0u8; self.draw_ubo.offset(draws.len()) as usize];
            for (slot, call) in draws.iter().enumerate() {
                let at = self.draw_ubo.offset(slot) as usize;
                let bytes = bytemuck::bytes_of(&call.uniforms);
                staging[at..at + bytes.len()].copy_from_slice(bytes);
            }
            self.gfx.queue.write_buffer(&self.draw_ubo.buffer, 0, &staging);
        }

        for call in &draws {
            self.pipelines.prepare(device, PipelineKey::of(call));
        }

        let commands = self.encode_pass(target, &draws, clear);
        self.gfx.queue.submit(std::iter::once(commands));

        let result = self.pop_error_scopes();
        self.release_retired();
        result
    }

    fn read_hitmap_pixel(&mut self, x: u32, y: u32) -> Result<[u8; 4], GpuError> {
        self.check_device()?;
        let (width, height) = self.size();
        if x >= width || y >= height {
            return Err(GpuError::InvalidDraw(format!(
                "pixel ({x}, {y}) outside the {width}x{height} hitmap"
            )));
        }

        let device = &self.gfx.device;
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Hitmap Readback"),
            size: wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Hitmap Readback Encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.targets.hitmap.color_tex,
                mip_level: 0,
                origin: wgpu::Origin3d { x, y, z: 0 },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT),
                    rows_per_image: Some(1),
                },
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
        self.gfx.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device.poll(wgpu::Maintain::Wait);

        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                self.check_device()?;
                return Err(GpuError::InvalidDraw(format!("hitmap readback failed: {err}")));
            }
            Err(_) => {
                self.check_device()?;
                return Err(GpuError::InvalidDraw("hitmap readback never completed".into()));
            }
        }

        let data = slice.get_mapped_range();
        let pixel = [data[0], data[1], data[2], data[3]];
        drop(data);
        staging.unmap();
        Ok(pixel)
    }

    fn begin_frame(&mut self, view_proj: Mat4) {
        self.view_proj = view_proj;
        self.cleared.clear();
        self.write_frame_uniforms();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::{ShaderColorMode, ShaderVariant};
    use crate::gpu::{AttributeFormat, RenderState};

    /// Opens a backend, or returns `None` on machines without a usable adapter.
    fn backend() -> Option<WgpuBackend> {
        match pollster::block_on(WgpuBackend::new(16, 16)) {
            Ok(backend) => Some(backend),
            Err(err) => {
                eprintln!("skipping GPU test: {err}");
                None
            }
        }
    }

    fn binding(buffer: BufferHandle, byte_stride: u64, format: AttributeFormat) -> AttributeBinding {
        AttributeBinding {
            buffer,
            byte_offset: 0,
            byte_stride,
            divisor: 1,
            format,
        }
    }

    #[test]
    fn hitmap_pixel_reads_back_the_id_color() {
        let Some(mut gpu) = backend() else { return };

        let positions: [f32; 3] = [0.0, 0.0, 0.5];
        let pos = gpu
            .create_vertex_buffer("pos", bytemuck::cast_slice(&positions))
            .unwrap();
        let color = gpu.create_vertex_buffer("id", &[1, 2, 3, 255]).unwrap();

        let call = DrawCall {
            target: TargetKind::Hitmap,
            variant: ShaderVariant::RgbaColor,
            position: binding(pos, 12, AttributeFormat::Float32x3),
            color: binding(color, 4, AttributeFormat::Unorm8x4),
            uniforms: PointUniforms {
                point_size: 8.0,
                is_circle: 0,
                color_mode: ShaderColorMode::Rgb as u32,
                ..PointUniforms::default()
            },
            state: RenderState::default(),
            blend_constant: None,
            instance_count: 1,
        };

        gpu.begin_frame(Mat4::IDENTITY);
        gpu.draw(&call).unwrap();
        gpu.destroy_buffer(color);
        gpu.flush(TargetKind::Hitmap).unwrap();

        assert_eq!(gpu.read_hitmap_pixel(8, 8).unwrap(), [1, 2, 3, 255]);
        assert_eq!(gpu.read_hitmap_pixel(0, 0).unwrap(), [0, 0, 0, 0]);
        assert_eq!(gpu.pipeline_count(), 1);
    }

    #[test]
    fn rejects_unknown_buffers_and_overruns() {
        let Some(mut gpu) = backend() else { return };
        let pos = gpu.create_vertex_buffer("pos", &[0u8; 12]).unwrap();

        let mut call = DrawCall {
            target: TargetKind::Main,
            variant: ShaderVariant::SingleColor,
            position: binding(pos, 12, AttributeFormat::Float32x3),
            color: binding(BufferHandle(999), 4, AttributeFormat::Float32),
            uniforms: PointUniforms::default(),
            state: RenderState::default(),
            blend_constant: None,
            instance_count: 1,
        };
        assert_eq!(gpu.draw(&call), Err(GpuError::UnknownBuffer(BufferHandle(999))));

        call.color = binding(pos, 12, AttributeFormat::Float32);
        call.instance_count = 2;
        assert!(matches!(gpu.draw(&call), Err(GpuError::InvalidDraw(_))));
    }

    #[test]
    fn lost_context_is_fatal() {
        let Some(mut gpu) = backend() else { return };
        gpu.mark_context_lost();
        assert_eq!(gpu.create_vertex_buffer("x", &[0u8; 4]), Err(GpuError::ContextLost));
        assert_eq!(gpu.flush(TargetKind::Main), Err(GpuError::ContextLost));
    }
}
