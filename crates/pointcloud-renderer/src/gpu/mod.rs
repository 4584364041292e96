//! Capability interface between the render core and a graphics binding.
//!
//! The core only ever allocates vertex buffers from bytes, frees them, records
//! draw calls and asks the backend to flush a target. Everything else (device
//! setup, pipelines, render targets) belongs to the implementation.

pub mod recording;

use crate::color::ShaderVariant;
use crate::error::GpuError;
use glam::Mat4;
use pointcloud::{BlendFactor, BlendOverride, DepthCompare, DepthOverride};

pub use self::recording::RecordingBackend;

/// Opaque handle of a GPU-resident buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u64);

/// Layout of one attribute entry as the vertex stage reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeFormat {
    Float32,
    Float32x3,
    /// Four normalized bytes.
    Unorm8x4,
}

impl AttributeFormat {
    #[inline]
    pub const fn size(self) -> usize {
        match self {
            Self::Float32 | Self::Unorm8x4 => 4,
            Self::Float32x3 => 12,
        }
    }
}

/// One vertex attribute source: a GPU buffer plus how to walk it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeBinding {
    pub buffer: BufferHandle,
    pub byte_offset: u64,
    pub byte_stride: u64,
    /// Instances per attribute step; every point attribute advances per instance.
    pub divisor: u32,
    pub format: AttributeFormat,
}

impl AttributeBinding {
    /// Bytes the binding touches when read for `count` instances.
    #[inline]
    pub fn span(&self, count: u32) -> u64 {
        if count == 0 {
            return self.byte_offset;
        }
        self.byte_offset + (count as u64 - 1) * self.byte_stride + self.format.size() as u64
    }
}

/// Offscreen or on-screen destination of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Main,
    /// Picking target; colors are written unblended.
    Hitmap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub enable: bool,
    pub src: BlendFactor,
    pub dst: BlendFactor,
}

impl BlendState {
    /// Straight alpha blending.
    pub const DEFAULT: Self = Self {
        enable: true,
        src: BlendFactor::SrcAlpha,
        dst: BlendFactor::OneMinusSrcAlpha,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthState {
    pub enable: bool,
    pub write: bool,
    pub compare: DepthCompare,
}

impl DepthState {
    pub const DEFAULT: Self = Self {
        enable: true,
        write: true,
        compare: DepthCompare::Less,
    };
}

/// Fixed-function state of a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderState {
    pub blend: BlendState,
    pub depth: DepthState,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            blend: BlendState::DEFAULT,
            depth: DepthState::DEFAULT,
        }
    }
}

impl RenderState {
    /// Default state with whichever overrides are present applied on top.
    pub fn with_overrides(blend: Option<&BlendOverride>, depth: Option<&DepthOverride>) -> Self {
        let mut state = Self::default();
        if let Some(blend) = blend {
            state.blend = BlendState {
                enable: blend.enable,
                src: blend.src,
                dst: blend.dst,
            };
        }
        if let Some(depth) = depth {
            state.depth = DepthState {
                enable: depth.enable,
                write: depth.mask,
                compare: depth.func,
            };
        }
        state
    }
}

/// Per-draw uniforms shared by both shader variants.
/// Must match `PointUniforms` in `shaders/point_*.wgsl`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PointUniforms {
    pub model: [[f32; 4]; 4],          // 64 B
    /// Colors in the 0–255 range.
    pub flat_color: [f32; 4],          // +16
    pub min_gradient_color: [f32; 4],  // +16
    pub max_gradient_color: [f32; 4],  // +16 -> 112
    pub point_size: f32,               // +4
    pub alpha: f32,                    // +4
    pub min_color_field_value: f32,    // +4
    pub max_color_field_value: f32,    // +4 -> 128
    pub color_mode: u32,               // +4
    pub is_circle: u32,                // +4
    pub _pad: [u32; 2],                // +8 -> 144
}

const _: [(); 144] = [(); core::mem::size_of::<PointUniforms>()];

/// Per-frame uniforms. Must match `FrameUniforms` in `shaders/point_*.wgsl`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FrameUniforms {
    pub view_proj: [[f32; 4]; 4],
    /// Viewport size in physical pixels.
    pub viewport_size: [f32; 2],
    pub _pad: [f32; 2],
}

const _: [(); 80] = [(); core::mem::size_of::<FrameUniforms>()];

/// Everything a backend needs to draw one point cloud.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawCall {
    pub target: TargetKind,
    pub variant: ShaderVariant,
    pub position: AttributeBinding,
    pub color: AttributeBinding,
    pub uniforms: PointUniforms,
    pub state: RenderState,
    /// Constant used by `Constant` blend factors.
    pub blend_constant: Option<[f32; 4]>,
    pub instance_count: u32,
}

pub trait GpuBackend {
    /// Uploads `contents` into a new vertex buffer.
    fn create_vertex_buffer(&mut self, label: &str, contents: &[u8])
        -> Result<BufferHandle, GpuError>;

    /// Frees a buffer. Draws already recorded against it still complete.
    fn destroy_buffer(&mut self, handle: BufferHandle);

    /// Records one draw.
    fn draw(&mut self, call: &DrawCall) -> Result<(), GpuError>;

    /// Submits every draw recorded for `target`.
    fn flush(&mut self, target: TargetKind) -> Result<(), GpuError>;

    /// Reads one pixel of the picking target after it has been flushed.
    fn read_hitmap_pixel(&mut self, x: u32, y: u32) -> Result<[u8; 4], GpuError>;

    /// Starts a frame seen through `view_proj`. Called by the host, not the core.
    fn begin_frame(&mut self, _view_proj: Mat4) {}
}
