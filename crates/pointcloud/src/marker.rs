//! Raw point-cloud records as produced by the data-source layer.

use crate::fields::PointField;
use crate::settings::{BlendOverride, DepthOverride, PointCloudSettings};
use glam::{Mat4, Quat, Vec3};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_MARKER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`RawMarker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarkerId(u64);

impl MarkerId {
    fn next() -> Self {
        Self(NEXT_MARKER_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Rigid transform applied to every point of a marker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub orientation: Quat,
}

impl Pose {
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        orientation: Quat::IDENTITY,
    };

    #[inline]
    pub fn to_mat4(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.orientation, self.position)
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// One point cloud as received from upstream.
///
/// A record is immutable once shared: hand it around as `Arc<RawMarker>` and
/// build a new record for any change. Identity is the [`MarkerId`] assigned in
/// [`RawMarker::new`], so two records with equal contents are still distinct.
#[derive(Debug)]
pub struct RawMarker {
    id: MarkerId,
    /// Stable key of the visual object across frames.
    pub name: String,
    pub fields: Vec<PointField>,
    pub data: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    pub point_step: u32,
    pub row_step: u32,
    pub is_bigendian: bool,
    pub pose: Pose,
    pub settings: PointCloudSettings,
    /// Per-point RGBA8 colors that replace whatever the settings select.
    pub hitmap_colors: Option<Arc<[u8]>>,
    pub blend: Option<BlendOverride>,
    pub depth: Option<DepthOverride>,
}

impl RawMarker {
    /// Creates an unorganized (single row) cloud of `width` points.
    pub fn new(
        name: impl Into<String>,
        fields: Vec<PointField>,
        data: impl Into<Arc<[u8]>>,
        width: u32,
        point_step: u32,
    ) -> Self {
        Self {
            id: MarkerId::next(),
            name: name.into(),
            fields,
            data: data.into(),
            width,
            height: 1,
            point_step,
            row_step: width.saturating_mul(point_step),
            is_bigendian: false,
            pose: Pose::IDENTITY,
            settings: PointCloudSettings::default(),
            hitmap_colors: None,
            blend: None,
            depth: None,
        }
    }

    /// Reshapes the cloud into `height` rows of `width` points with
    /// `row_step` bytes per row.
    pub fn with_grid(mut self, width: u32, height: u32, row_step: u32) -> Self {
        self.width = width;
        self.height = height;
        self.row_step = row_step;
        self
    }

    pub fn with_settings(mut self, settings: PointCloudSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_pose(mut self, pose: Pose) -> Self {
        self.pose = pose;
        self
    }

    pub fn with_hitmap_colors(mut self, colors: impl Into<Arc<[u8]>>) -> Self {
        self.hitmap_colors = Some(colors.into());
        self
    }

    pub fn with_blend(mut self, blend: BlendOverride) -> Self {
        self.blend = Some(blend);
        self
    }

    pub fn with_depth(mut self, depth: DepthOverride) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn big_endian(mut self, is_bigendian: bool) -> Self {
        self.is_bigendian = is_bigendian;
        self
    }

    #[inline]
    pub fn id(&self) -> MarkerId {
        self.id
    }

    #[inline]
    pub fn point_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn field(&self, name: &str) -> Option<&PointField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Rows are stored back to back without padding.
    #[inline]
    pub fn is_dense(&self) -> bool {
        self.height <= 1 || self.row_step as usize == self.width as usize * self.point_step as usize
    }

    /// Byte offset of point `index` in `data`.
    #[inline]
    pub fn point_offset(&self, index: usize) -> usize {
        let width = self.width.max(1) as usize;
        (index / width) * self.row_step as usize + (index % width) * self.point_step as usize
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FieldType;

    #[test]
    fn every_record_gets_a_fresh_identity() {
        let a = RawMarker::new("a", vec![], vec![0u8; 4], 1, 4);
        let b = RawMarker::new("a", vec![], vec![0u8; 4], 1, 4);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn point_offsets_follow_row_padding() {
        let marker = RawMarker::new(
            "grid",
            vec![PointField::new("x", 0, FieldType::Float32)],
            vec![0u8; 40],
            2,
            8,
        )
        .with_grid(2, 2, 20);

        assert!(!marker.is_dense());
        assert_eq!(marker.point_count(), 4);
        assert_eq!(marker.point_offset(1), 8);
        assert_eq!(marker.point_offset(2), 20);
        assert_eq!(marker.point_offset(3), 28);
    }
}
