//! Synthetic marker sets for the frame driver.

use glam::{Quat, Vec3};
use pointcloud::{ColorMode, FieldType, PointCloudSettings, PointField, Pose, RawMarker, Rgba};
use std::f32::consts::TAU;
use std::sync::Arc;

const SCAN_POINT_STEP: u32 = 16;

fn xyz_fields() -> Vec<PointField> {
    vec![
        PointField::new("x", 0, FieldType::Float32),
        PointField::new("y", 4, FieldType::Float32),
        PointField::new("z", 8, FieldType::Float32),
    ]
}

/// Rippling height field colored by `intensity` through the turbo map.
pub fn scan_grid(side: u32, phase: f32) -> RawMarker {
    let mut fields = xyz_fields();
    fields.push(PointField::new("intensity", 12, FieldType::Float32));

    let mut data = Vec::with_capacity(side as usize * side as usize * SCAN_POINT_STEP as usize);
    let half = side as f32 / 2.0;
    for row in 0..side {
        for col in 0..side {
            let x = (col as f32 - half) * 0.1;
            let y = (row as f32 - half) * 0.1;
            let r = (x * x + y * y).sqrt();
            let z = (r * 2.0 - phase).sin() * 0.2;
            for v in [x, y, z, z + 0.2] {
                data.extend_from_slice(&v.to_le_bytes());
            }
        }
    }

    let settings = PointCloudSettings::with_color_mode(ColorMode::Turbo {
        color_field: None,
        min_value: None,
        max_value: None,
    });
    RawMarker::new("scan", fields, data, side, SCAN_POINT_STEP)
        .with_grid(side, side, side * SCAN_POINT_STEP)
        .with_settings(settings)
}

/// Ring of points with packed per-point colors.
pub fn color_ring(points: u32) -> RawMarker {
    let mut fields = xyz_fields();
    fields.push(PointField::new("rgb", 12, FieldType::Uint32));

    let mut data = Vec::with_capacity(points as usize * 16);
    for i in 0..points {
        let t = i as f32 / points as f32;
        let (s, c) = (t * TAU).sin_cos();
        for v in [c * 4.0, s * 4.0, 0.5] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        // b, g, r, a
        data.extend_from_slice(&[(255.0 * (1.0 - t)) as u8, 128, (255.0 * t) as u8, 255]);
    }

    RawMarker::new("ring", fields, data, points, 16)
        .with_settings(PointCloudSettings::with_color_mode(ColorMode::Rgb))
}

/// Single flat-colored marker post, offset by a pose.
pub fn beacon() -> RawMarker {
    let data: Vec<u8> = (0..8)
        .flat_map(|i| [0.0f32, 0.0, i as f32 * 0.25])
        .flat_map(f32::to_le_bytes)
        .collect();
    let settings = PointCloudSettings {
        point_size: Some(6.0),
        ..PointCloudSettings::with_color_mode(ColorMode::Flat {
            flat_color: Some(Rgba::new(1.0, 0.8, 0.1, 1.0)),
        })
    };
    RawMarker::new("beacon", xyz_fields(), data, 8, 12)
        .with_settings(settings)
        .with_pose(Pose {
            position: Vec3::new(2.0, -2.0, 0.0),
            orientation: Quat::IDENTITY,
        })
}

/// Marker list that changes the way upstream data does: the scan is
/// replaced by a new record every frame, the rest are shared.
pub struct Scene {
    grid_side: u32,
    scan: Arc<RawMarker>,
    statics: Vec<Arc<RawMarker>>,
}

impl Scene {
    pub fn new(grid_side: u32) -> Self {
        Self {
            grid_side,
            scan: scan_grid(grid_side, 0.0).into_shared(),
            statics: vec![color_ring(360).into_shared(), beacon().into_shared()],
        }
    }

    pub fn advance(&mut self, frame: u32) -> Vec<Arc<RawMarker>> {
        self.scan = scan_grid(self.grid_side, frame as f32 * 0.3).into_shared();
        self.markers()
    }

    pub fn markers(&self) -> Vec<Arc<RawMarker>> {
        std::iter::once(self.scan.clone())
            .chain(self.statics.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_grid_holds_one_record_per_cell() {
        let scan = scan_grid(8, 0.5);
        assert_eq!(scan.data.len(), 8 * 8 * SCAN_POINT_STEP as usize);

        let decoded = pointcloud::decode_marker(&scan).unwrap();
        assert_eq!(decoded.point_count, 64);
    }
}
