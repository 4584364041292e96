//! Point pipelines, specialized lazily per attribute layout and GPU state.

use crate::color::ShaderVariant;
use crate::gpu::{AttributeFormat, DrawCall, FrameUniforms, PointUniforms, RenderState, TargetKind};
use log::debug;
use pointcloud::{BlendFactor, DepthCompare};
use std::collections::HashMap;
use wgpu::util::DeviceExt;

const SINGLE_COLOR_WGSL: &str = include_str!("../../shaders/point_single.wgsl");
const RGBA_COLOR_WGSL: &str = include_str!("../../shaders/point_rgba.wgsl");

/// Everything a point pipeline is specialized on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub variant: ShaderVariant,
    pub target: TargetKind,
    pub position_stride: u64,
    pub color_stride: u64,
    pub color_format: AttributeFormat,
    pub state: RenderState,
}

impl PipelineKey {
    pub fn of(call: &DrawCall) -> Self {
        Self {
            variant: call.variant,
            target: call.target,
            position_stride: call.position.byte_stride,
            color_stride: call.color.byte_stride,
            color_format: call.color.format,
            state: call.state,
        }
    }
}

pub struct PointPipelines {
    single_shader: wgpu::ShaderModule,
    rgba_shader:   wgpu::ShaderModule,
    layout:        wgpu::PipelineLayout,
    pub frame_layout: wgpu::BindGroupLayout,
    pub point_layout: wgpu::BindGroupLayout,
    pub quad_vb:   wgpu::Buffer,
    color_fmt:     wgpu::TextureFormat,
    hitmap_fmt:    wgpu::TextureFormat,
    depth_fmt:     wgpu::TextureFormat,
    specialized:   HashMap<PipelineKey, wgpu::RenderPipeline>,
}

impl PointPipelines {
    pub fn new(
        device: &wgpu::Device,
        color_fmt: wgpu::TextureFormat,
        hitmap_fmt: wgpu::TextureFormat,
        depth_fmt: wgpu::TextureFormat,
    ) -> Self {
        let frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Point Frame UBO Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: wgpu::BufferSize::new(
                        std::mem::size_of::<FrameUniforms>() as u64,
                    ),
                },
                count: None,
            }],
        });

        // One slot per draw, selected with a dynamic offset.
        let point_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Point Draw UBO Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: wgpu::BufferSize::new(
                        std::mem::size_of::<PointUniforms>() as u64,
                    ),
                },
                count: None,
            }],
        });

        let single_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("shaders/point_single.wgsl"),
            source: wgpu::ShaderSource::Wgsl(SINGLE_COLOR_WGSL.into()),
        });
        let rgba_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("shaders/point_rgba.wgsl"),
            source: wgpu::ShaderSource::Wgsl(RGBA_COLOR_WGSL.into()),
        });

        // Two triangles covering the point sprite, in sprite-local units.
        let quad_corners: [[f32; 2]; 6] = [
            [-1.0, -1.0],
            [1.0, -1.0],
            [1.0, 1.0],
            [-1.0, -1.0],
            [1.0, 1.0],
            [-1.0, 1.0],
        ];
        let quad_vb = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Point Quad VB"),
            contents: bytemuck::cast_slice(&quad_corners),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Point PipelineLayout"),
            bind_group_layouts: &[&frame_layout, &point_layout],
            push_constant_ranges: &[],
        });

        Self {
            single_shader,
            rgba_shader,
            layout,
            frame_layout,
            point_layout,
            quad_vb,
            color_fmt,
            hitmap_fmt,
            depth_fmt,
            specialized: HashMap::new(),
        }
    }

    /// Builds the pipeline for `key` unless it already exists.
    pub fn prepare(&mut self, device: &wgpu::Device, key: PipelineKey) {
        if self.specialized.contains_key(&key) {
            return;
        }
        debug!("specializing point pipeline {key:?}");
        let pipeline = self.build(device, &key);
        self.specialized.insert(key, pipeline);
    }

    pub fn get(&self, key: &PipelineKey) -> Option<&wgpu::RenderPipeline> {
        self.specialized.get(key)
    }

    pub fn len(&self) -> usize {
        self.specialized.len()
    }

    fn build(&self, device: &wgpu::Device, key: &PipelineKey) -> wgpu::RenderPipeline {
        let (shader, color_format) = match key.variant {
            ShaderVariant::SingleColor => (&self.single_shader, wgpu::VertexFormat::Float32),
            ShaderVariant::RgbaColor => (&self.rgba_shader, vertex_format(key.color_format)),
        };

        let position_attr = [wgpu::VertexAttribute {
            shader_location: 1,
            offset: 0,
            format: wgpu::VertexFormat::Float32x3,
        }];
        let color_attr = [wgpu::VertexAttribute {
            shader_location: 2,
            offset: 0,
            format: color_format,
        }];

        let vbuf_layouts = [
            wgpu::VertexBufferLayout {
                array_stride: std::mem::size_of::<[f32; 2]>() as u64,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &[wgpu::VertexAttribute {
                    shader_location: 0,
                    offset: 0,
                    format: wgpu::VertexFormat::Float32x2,
                }],
            },
            // Every point attribute advances once per quad.
            wgpu::VertexBufferLayout {
                array_stride: key.position_stride,
                step_mode: wgpu::VertexStepMode::Instance,
                attributes: &position_attr,
            },
            wgpu::VertexBufferLayout {
                array_stride: key.color_stride,
                step_mode: wgpu::VertexStepMode::Instance,
                attributes: &color_attr,
            },
        ];

        let (format, blend) = match key.target {
            TargetKind::Main => (self.color_fmt, blend_state(&key.state)),
            TargetKind::Hitmap => (self.hitmap_fmt, None),
        };

        let depth = key.state.depth;
        let (depth_write_enabled, depth_compare) = if depth.enable {
            (depth.write, compare_function(depth.compare))
        } else {
            (false, wgpu::CompareFunction::Always)
        };

        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Point Pipeline"),
            layout: Some(&self.layout),
            vertex: wgpu::VertexState {
                module: shader,
                entry_point: "vs_main",
                buffers: &vbuf_layouts,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: self.depth_fmt,
                depth_write_enabled,
                depth_compare,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            fragment: Some(wgpu::FragmentState {
                module: shader,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        })
    }
}

fn vertex_format(format: AttributeFormat) -> wgpu::VertexFormat {
    match format {
        AttributeFormat::Float32 => wgpu::VertexFormat::Float32,
        AttributeFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
        AttributeFormat::Unorm8x4 => wgpu::VertexFormat::Unorm8x4,
    }
}

fn blend_state(state: &RenderState) -> Option<wgpu::BlendState> {
    if !state.blend.enable {
        return None;
    }
    let component = wgpu::BlendComponent {
        src_factor: blend_factor(state.blend.src),
        dst_factor: blend_factor(state.blend.dst),
        operation: wgpu::BlendOperation::Add,
    };
    Some(wgpu::BlendState {
        color: component,
        alpha: component,
    })
}

fn blend_factor(factor: BlendFactor) -> wgpu::BlendFactor {
    match factor {
        BlendFactor::Zero => wgpu::BlendFactor::Zero,
        BlendFactor::One => wgpu::BlendFactor::One,
        BlendFactor::SrcColor => wgpu::BlendFactor::Src,
        BlendFactor::OneMinusSrcColor => wgpu::BlendFactor::OneMinusSrc,
        BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
        BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
        BlendFactor::DstColor => wgpu::BlendFactor::Dst,
        BlendFactor::OneMinusDstColor => wgpu::BlendFactor::OneMinusDst,
        BlendFactor::DstAlpha => wgpu::BlendFactor::DstAlpha,
        BlendFactor::OneMinusDstAlpha => wgpu::BlendFactor::OneMinusDstAlpha,
        BlendFactor::Constant => wgpu::BlendFactor::Constant,
        BlendFactor::OneMinusConstant => wgpu::BlendFactor::OneMinusConstant,
    }
}

fn compare_function(compare: DepthCompare) -> wgpu::CompareFunction {
    match compare {
        DepthCompare::Never => wgpu::CompareFunction::Never,
        DepthCompare::Less => wgpu::CompareFunction::Less,
        DepthCompare::Equal => wgpu::CompareFunction::Equal,
        DepthCompare::LessEqual => wgpu::CompareFunction::LessEqual,
        DepthCompare::Greater => wgpu::CompareFunction::Greater,
        DepthCompare::NotEqual => wgpu::CompareFunction::NotEqual,
        DepthCompare::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
        DepthCompare::Always => wgpu::CompareFunction::Always,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::BlendState;

    #[test]
    fn disabled_blending_maps_to_none() {
        let mut state = RenderState::default();
        assert!(blend_state(&state).is_some());
        state.blend = BlendState {
            enable: false,
            ..BlendState::DEFAULT
        };
        assert!(blend_state(&state).is_none());
    }

    #[test]
    fn constant_factors_survive_translation() {
        assert_eq!(blend_factor(BlendFactor::Constant), wgpu::BlendFactor::Constant);
        assert_eq!(compare_function(DepthCompare::GreaterEqual), wgpu::CompareFunction::GreaterEqual);
        assert_eq!(vertex_format(AttributeFormat::Unorm8x4), wgpu::VertexFormat::Unorm8x4);
    }

    #[test]
    fn shaders_parse_and_validate() {
        use naga::valid::{Capabilities, ValidationFlags, Validator};

        for (name, source) in [("point_single", SINGLE_COLOR_WGSL), ("point_rgba", RGBA_COLOR_WGSL)] {
            let module = naga::front::wgsl::parse_str(source)
                .unwrap_or_else(|err| panic!("{name}: {}", err.emit_to_string(source)));
            Validator::new(ValidationFlags::all(), Capabilities::empty())
                .validate(&module)
                .unwrap_or_else(|err| panic!("{name}: {err:?}"));

            for entry in ["vs_main", "fs_main"] {
                assert!(
                    module.entry_points.iter().any(|ep| ep.name == entry),
                    "{name} lacks {entry}"
                );
            }
        }
    }
}
