//! Picking pass: per-point id colors drawn into an offscreen target.

use log::warn;
use pointcloud::{DecodedMarker, MarkerId};
use rayon::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

/// Builds the picking copies of `markers`.
///
/// Excluded markers and markers without points are dropped. Every other
/// marker is shallow-copied with `count` id colors from
/// `assign_next_colors` packed into its hitmap colors and its point size
/// multiplied by `point_scale`. The inputs are left untouched.
pub fn picking_pass<F>(
    markers: &[Arc<DecodedMarker>],
    mut assign_next_colors: F,
    excluded: &HashSet<MarkerId>,
    point_scale: f32,
    default_point_size: f32,
) -> Vec<Arc<DecodedMarker>>
where
    F: FnMut(&DecodedMarker, usize) -> Vec<[f32; 4]>,
{
    let mut out = Vec::with_capacity(markers.len());
    for marker in markers {
        if excluded.contains(&marker.source) || !marker.has_extent() {
            continue;
        }

        let count = marker.width as usize * marker.height as usize;
        let colors = assign_next_colors(marker, count);
        if colors.len() != count {
            warn!(
                "picking colors for `{}`: expected {count}, got {}",
                marker.name,
                colors.len()
            );
        }

        let mut copy = DecodedMarker::clone(marker);
        copy.hitmap_colors = Some(pack_colors(&colors, count));
        copy.settings.point_size =
            Some(copy.settings.point_size.unwrap_or(default_point_size) * point_scale);
        out.push(Arc::new(copy));
    }
    out
}

/// Packs normalized colors into `count` opaque RGBA8 entries. Missing entries
/// become id 0, which never resolves to a point.
fn pack_colors(colors: &[[f32; 4]], count: usize) -> Arc<[u8]> {
    let mut packed: Vec<[u8; 4]> = colors
        .par_iter()
        .take(count)
        .map(|c| [to_u8(c[0]), to_u8(c[1]), to_u8(c[2]), u8::MAX])
        .collect();
    packed.resize(count, [0, 0, 0, u8::MAX]);
    Arc::from(bytemuck::cast_slice::<[u8; 4], u8>(&packed))
}

#[inline]
fn to_u8(channel: f32) -> u8 {
    (channel * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Largest id that fits the 24 color bits of a hitmap pixel.
pub const MAX_PICKING_ID: u32 = 0x00ff_ffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IdRange {
    start: u32,
    len: u32,
    marker: MarkerId,
}

/// A point hit by a hitmap read-back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PickedPoint {
    pub marker: MarkerId,
    pub point_index: u32,
}

/// Sequential id colors for one picking pass, and their reverse lookup.
///
/// Id 0 is the cleared background. Call [`HitmapIdAllocator::reset`] before
/// each pass.
#[derive(Debug, Clone)]
pub struct HitmapIdAllocator {
    next_id: u32,
    ranges: Vec<IdRange>,
}

impl Default for HitmapIdAllocator {
    fn default() -> Self {
        Self {
            next_id: 1,
            ranges: Vec::new(),
        }
    }
}

impl HitmapIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.next_id = 1;
        self.ranges.clear();
    }

    /// Hands out `count` consecutive ids to `marker`.
    ///
    /// Once the id space is exhausted every point gets id 0 and is not
    /// pickable.
    pub fn assign_next_colors(&mut self, marker: &DecodedMarker, count: usize) -> Vec<[f32; 4]> {
        if count == 0 {
            return Vec::new();
        }
        let available = (MAX_PICKING_ID + 1).saturating_sub(self.next_id) as usize;
        if count > available {
            warn!(
                "out of picking ids: `{}` needs {count}, {available} left",
                marker.name
            );
            return vec![encode_id(0); count];
        }

        let start = self.next_id;
        let len = count as u32;
        self.ranges.push(IdRange {
            start,
            len,
            marker: marker.source,
        });
        self.next_id += len;

        (start..start + len).map(encode_id).collect()
    }

    /// Maps a hitmap pixel back to the point drawn there.
    pub fn resolve(&self, pixel: [u8; 4]) -> Option<PickedPoint> {
        let id = decode_id(pixel);
        if id == 0 {
            return None;
        }
        let idx = self.ranges.partition_point(|r| r.start + r.len <= id);
        let range = self.ranges.get(idx)?;
        (range.start <= id).then(|| PickedPoint {
            marker: range.marker,
            point_index: id - range.start,
        })
    }
}

#[inline]
pub fn encode_id(id: u32) -> [f32; 4] {
    [
        ((id >> 16) & 0xff) as f32 / 255.0,
        ((id >> 8) & 0xff) as f32 / 255.0,
        (id & 0xff) as f32 / 255.0,
        1.0,
    ]
}

#[inline]
pub fn decode_id(pixel: [u8; 4]) -> u32 {
    (pixel[0] as u32) << 16 | (pixel[1] as u32) << 8 | pixel[2] as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use pointcloud::{decode_marker, FieldType, PointField, RawMarker};

    fn decoded(name: &str, width: u32, height: u32) -> Arc<DecodedMarker> {
        let fields = vec![
            PointField::new("x", 0, FieldType::Float32),
            PointField::new("y", 4, FieldType::Float32),
            PointField::new("z", 8, FieldType::Float32),
        ];
        let points = (width * height) as usize;
        let raw = RawMarker::new(name, fields, vec![0u8; points * 12], width, 12)
            .with_grid(width, height, width * 12);
        Arc::new(decode_marker(&raw).unwrap())
    }

    #[test]
    fn excluded_markers_are_dropped() {
        let (a, b, c) = (decoded("a", 2, 1), decoded("b", 3, 1), decoded("c", 1, 1));
        let excluded = HashSet::from([b.source]);
        let mut ids = HitmapIdAllocator::new();

        let out = picking_pass(
            &[a.clone(), b.clone(), c.clone()],
            |m, n| ids.assign_next_colors(m, n),
            &excluded,
            5.0,
            2.0,
        );

        let names: Vec<_> = out.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["a", "c"]);
        assert!(out.iter().all(|m| m.hitmap_colors.is_some()));
        assert!(a.hitmap_colors.is_none());
        assert!(c.hitmap_colors.is_none());
        assert_eq!(a.settings.point_size, None);
    }

    #[test]
    fn copies_get_inflated_points_and_opaque_colors() {
        let a = decoded("a", 2, 2);
        let out = picking_pass(
            &[a.clone()],
            |_, n| vec![[1.0, 0.5, 0.0, 0.0]; n],
            &HashSet::new(),
            5.0,
            2.0,
        );
        let copy = &out[0];
        assert_eq!(copy.settings.point_size, Some(10.0));
        let colors = copy.hitmap_colors.as_deref().unwrap();
        assert_eq!(colors.len(), 16);
        assert_eq!(&colors[..4], &[255, 128, 0, 255]);
        assert!(copy.position_buffer.same_source(&a.position_buffer));
    }

    #[test]
    fn empty_markers_are_not_colored() {
        let empty = decoded("empty", 0, 1);
        let mut calls = 0;
        let out = picking_pass(
            &[empty],
            |_, n| {
                calls += 1;
                vec![[0.0; 4]; n]
            },
            &HashSet::new(),
            5.0,
            2.0,
        );
        assert!(out.is_empty());
        assert_eq!(calls, 0);
    }

    #[test]
    fn short_color_lists_are_padded_with_background() {
        let a = decoded("a", 3, 1);
        let out = picking_pass(&[a], |_, _| vec![[1.0; 4]], &HashSet::new(), 5.0, 2.0);
        let colors = out[0].hitmap_colors.as_deref().unwrap();
        assert_eq!(colors, &[255, 255, 255, 255, 0, 0, 0, 255, 0, 0, 0, 255]);
    }

    #[test]
    fn allocated_ids_resolve_back_to_points() {
        let (a, b) = (decoded("a", 300, 1), decoded("b", 2, 1));
        let mut ids = HitmapIdAllocator::new();
        let out = picking_pass(
            &[a.clone(), b.clone()],
            |m, n| ids.assign_next_colors(m, n),
            &HashSet::new(),
            5.0,
            2.0,
        );

        let pixel = |marker: usize, point: usize| -> [u8; 4] {
            let colors = out[marker].hitmap_colors.as_deref().unwrap();
            colors[point * 4..point * 4 + 4].try_into().unwrap()
        };

        assert_eq!(
            ids.resolve(pixel(0, 0)),
            Some(PickedPoint { marker: a.source, point_index: 0 })
        );
        assert_eq!(
            ids.resolve(pixel(0, 299)),
            Some(PickedPoint { marker: a.source, point_index: 299 })
        );
        assert_eq!(
            ids.resolve(pixel(1, 1)),
            Some(PickedPoint { marker: b.source, point_index: 1 })
        );
        assert_eq!(ids.resolve([0, 0, 0, 255]), None);
        assert_eq!(ids.resolve([0xff, 0xff, 0xff, 255]), None);
    }

    #[test]
    fn id_space_exhaustion_yields_background() {
        let a = decoded("a", 1, 1);
        let mut ids = HitmapIdAllocator::new();
        ids.next_id = MAX_PICKING_ID;
        assert_eq!(ids.assign_next_colors(&a, 2), vec![encode_id(0); 2]);
        assert_eq!(ids.assign_next_colors(&a, 1), vec![encode_id(MAX_PICKING_ID)]);
        assert_eq!(ids.assign_next_colors(&a, 1), vec![encode_id(0)]);

        ids.reset();
        assert_eq!(ids.assign_next_colors(&a, 1), vec![encode_id(1)]);
    }

    #[test]
    fn ids_round_trip_through_pixels() {
        for id in [1, 255, 256, 65_535, 65_536, MAX_PICKING_ID] {
            let c = encode_id(id);
            assert_eq!(decode_id([to_u8(c[0]), to_u8(c[1]), to_u8(c[2]), 255]), id);
        }
    }
}
