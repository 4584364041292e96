//! Offscreen render targets of the main and picking passes.

use crate::gpu::TargetKind;

/// Colormap output is written as computed, without sRGB encoding.
pub const MAIN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
/// Ids must read back bit-exact.
pub const HITMAP_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

pub struct Target {
    // Keep the textures alive for the lifetime of the views.
    pub color_tex: wgpu::Texture,
    _depth_tex:    wgpu::Texture,

    pub color: wgpu::TextureView,
    pub depth: wgpu::TextureView,
}

pub struct Targets {
    pub main:   Target,
    pub hitmap: Target,

    pub width:  u32,
    pub height: u32,

    // Formats required by pipeline creation.
    pub color_fmt:  wgpu::TextureFormat,
    pub hitmap_fmt: wgpu::TextureFormat,
    pub depth_fmt:  wgpu::TextureFormat,
}

impl Targets {
    pub fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let width = width.max(1);
        let height = height.max(1);

        let tex_size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };

        let color_fmt = MAIN_FORMAT;
        let hitmap_fmt = HITMAP_FORMAT;
        let depth_fmt = wgpu::TextureFormat::Depth32Float;

        let create_tex = |label: &str, format, usage| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: tex_size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage,
                view_formats: &[],
            })
        };

        let create_target = |name: &str, format| {
            let color_tex = create_tex(
                &format!("{name} Color Target"),
                format,
                wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            );
            let depth_tex = create_tex(
                &format!("{name} Depth Target"),
                depth_fmt,
                wgpu::TextureUsages::RENDER_ATTACHMENT,
            );
            Target {
                color: color_tex.create_view(&wgpu::TextureViewDescriptor::default()),
                depth: depth_tex.create_view(&wgpu::TextureViewDescriptor::default()),
                color_tex,
                _depth_tex: depth_tex,
            }
        };

        Self {
            main: create_target("Main", color_fmt),
            hitmap: create_target("Hitmap", hitmap_fmt),
            width,
            height,
            color_fmt,
            hitmap_fmt,
            depth_fmt,
        }
    }

    pub fn get(&self, kind: TargetKind) -> &Target {
        match kind {
            TargetKind::Main => &self.main,
            TargetKind::Hitmap => &self.hitmap,
        }
    }

    pub fn format(&self, kind: TargetKind) -> wgpu::TextureFormat {
        match kind {
            TargetKind::Main => self.color_fmt,
            TargetKind::Hitmap => self.hitmap_fmt,
        }
    }

    pub fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        *self = Self::new(device, width, height);
    }
}
