//! Backend that keeps buffers in host memory and records draws.
//!
//! Used by tests and by the `--dry-run` mode of the frame driver. It enforces
//! the same handle and span rules a real device would.

use super::{BufferHandle, DrawCall, GpuBackend, TargetKind};
use crate::error::GpuError;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct RecordingBackend {
    next_handle: u64,
    live: BTreeMap<BufferHandle, Vec<u8>>,
    /// Buffers created since construction.
    pub allocations: usize,
    /// Buffers destroyed since construction.
    pub destroyed: usize,
    /// Draws recorded since the last [`RecordingBackend::take_draws`].
    pub draws: Vec<DrawCall>,
    pub flushes: Vec<TargetKind>,
    /// Value returned by [`GpuBackend::read_hitmap_pixel`].
    pub hitmap_pixel: [u8; 4],
    fail_next: Option<GpuError>,
    fail_next_flush: Option<GpuError>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_buffers(&self) -> usize {
        self.live.len()
    }

    pub fn is_live(&self, handle: BufferHandle) -> bool {
        self.live.contains_key(&handle)
    }

    /// Contents of a live buffer.
    pub fn contents(&self, handle: BufferHandle) -> Option<&[u8]> {
        self.live.get(&handle).map(Vec::as_slice)
    }

    /// Makes the next allocation or draw fail with `err`.
    pub fn fail_next(&mut self, err: GpuError) {
        self.fail_next = Some(err);
    }

    /// Makes the next flush fail with `err`.
    pub fn fail_next_flush(&mut self, err: GpuError) {
        self.fail_next_flush = Some(err);
    }

    pub fn take_draws(&mut self) -> Vec<DrawCall> {
        std::mem::take(&mut self.draws)
    }

    fn check_binding(&self, what: &str, call: &DrawCall, binding: &super::AttributeBinding) -> Result<(), GpuError> {
        let contents = self
            .live
            .get(&binding.buffer)
            .ok_or(GpuError::UnknownBuffer(binding.buffer))?;
        let span = binding.span(call.instance_count);
        if span > contents.len() as u64 {
            return Err(GpuError::InvalidDraw(format!(
                "{what} attribute reads {span} bytes from a {}-byte buffer",
                contents.len()
            )));
        }
        Ok(())
    }
}

impl GpuBackend for RecordingBackend {
    fn create_vertex_buffer(&mut self, _label: &str, contents: &[u8]) -> Result<BufferHandle, GpuError> {
        if let Some(err) = self.fail_next.take() {
            return Err(err);
        }
        self.next_handle += 1;
        let handle = BufferHandle(self.next_handle);
        self.live.insert(handle, contents.to_vec());
        self.allocations += 1;
        Ok(handle)
    }

    fn destroy_buffer(&mut self, handle: BufferHandle) {
        if self.live.remove(&handle).is_some() {
            self.destroyed += 1;
        } else {
            log::warn!("destroying unknown buffer {:?}", handle);
        }
    }

    fn draw(&mut self, call: &DrawCall) -> Result<(), GpuError> {
        if let Some(err) = self.fail_next.take() {
            return Err(err);
        }
        self.check_binding("position", call, &call.position)?;
        self.check_binding("color", call, &call.color)?;
        self.draws.push(*call);
        Ok(())
    }

    fn flush(&mut self, target: TargetKind) -> Result<(), GpuError> {
        if let Some(err) = self.fail_next_flush.take() {
            return Err(err);
        }
        self.flushes.push(target);
        Ok(())
    }

    fn read_hitmap_pixel(&mut self, _x: u32, _y: u32) -> Result<[u8; 4], GpuError> {
        Ok(self.hitmap_pixel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::ShaderVariant;
    use crate::gpu::{AttributeBinding, AttributeFormat, PointUniforms, RenderState};

    fn call(position: BufferHandle, color: BufferHandle, instance_count: u32) -> DrawCall {
        let binding = |buffer, format| AttributeBinding {
            buffer,
            byte_offset: 0,
            byte_stride: 12,
            divisor: 1,
            format,
        };
        DrawCall {
            target: TargetKind::Main,
            variant: ShaderVariant::SingleColor,
            position: binding(position, AttributeFormat::Float32x3),
            color: binding(color, AttributeFormat::Float32),
            uniforms: PointUniforms::default(),
            state: RenderState::default(),
            blend_constant: None,
            instance_count,
        }
    }

    #[test]
    fn validates_draw_bindings() {
        let mut backend = RecordingBackend::new();
        let buf = backend.create_vertex_buffer("pos", &[0u8; 24]).unwrap();

        assert!(backend.draw(&call(buf, buf, 2)).is_ok());
        assert_eq!(
            backend.draw(&call(buf, BufferHandle(42), 2)),
            Err(GpuError::UnknownBuffer(BufferHandle(42)))
        );
        assert!(matches!(
            backend.draw(&call(buf, buf, 3)),
            Err(GpuError::InvalidDraw(_))
        ));
        assert_eq!(backend.take_draws().len(), 1);
    }

    #[test]
    fn injected_failures_fire_once() {
        let mut backend = RecordingBackend::new();
        backend.fail_next(GpuError::OutOfMemory);
        assert_eq!(backend.create_vertex_buffer("x", &[1]), Err(GpuError::OutOfMemory));
        assert_eq!(backend.create_vertex_buffer("x", &[1]), Ok(BufferHandle(1)));
        assert_eq!(backend.allocations, 1);

        backend.destroy_buffer(BufferHandle(1));
        backend.destroy_buffer(BufferHandle(1));
        assert_eq!(backend.destroyed, 1);
        assert_eq!(backend.live_buffers(), 0);
    }
}
