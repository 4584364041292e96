//! Decode memoization keyed by [`MarkerId`].

use crate::error::{SkipReason, SkippedMarker};
use log::warn;
use pointcloud::{decode_marker, DecodeError, DecodedMarker, MarkerId, RawMarker};
use std::collections::hash_map::Entry as MapEntry;
use std::collections::HashMap;
use std::sync::Arc;

struct Entry {
    decoded: Result<Arc<DecodedMarker>, DecodeError>,
    /// Last marker-set generation that referenced this record.
    generation: u64,
}

/// Decoded form of every record in the current marker set.
///
/// Entries live exactly as long as their record keeps appearing in the list
/// handed to [`MarkerCache::update`]. Failed decodes are cached too, so a bad
/// record is reported once and not re-decoded every frame.
#[derive(Default)]
pub struct MarkerCache {
    entries: HashMap<MarkerId, Entry>,
    generation: u64,
    decode_count: usize,
}

impl MarkerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes the records not seen before, reuses the rest and prunes
    /// entries of records no longer present. Records that fail to decode are
    /// appended to `skipped` and left out of the result.
    pub fn update(
        &mut self,
        markers: &[Arc<RawMarker>],
        skipped: &mut Vec<SkippedMarker>,
    ) -> Vec<Arc<DecodedMarker>> {
        self.collect(markers, skipped, false)
    }

    /// Like [`Self::update`] but decodes every record again, replacing the
    /// cached result.
    pub fn decode_fresh(
        &mut self,
        markers: &[Arc<RawMarker>],
        skipped: &mut Vec<SkippedMarker>,
    ) -> Vec<Arc<DecodedMarker>> {
        self.collect(markers, skipped, true)
    }

    fn collect(
        &mut self,
        markers: &[Arc<RawMarker>],
        skipped: &mut Vec<SkippedMarker>,
        force: bool,
    ) -> Vec<Arc<DecodedMarker>> {
        self.generation += 1;
        let generation = self.generation;
        let mut out = Vec::with_capacity(markers.len());

        for raw in markers {
            let entry = match self.entries.entry(raw.id()) {
                // Same record listed twice in one frame: draw it once.
                MapEntry::Occupied(entry) if entry.get().generation == generation => continue,
                MapEntry::Occupied(entry) => {
                    let entry = entry.into_mut();
                    if force {
                        self.decode_count += 1;
                        entry.decoded = decode(raw);
                    }
                    entry
                }
                MapEntry::Vacant(entry) => {
                    self.decode_count += 1;
                    let decoded = decode(raw);
                    if let Err(err) = &decoded {
                        warn!("point cloud `{}` failed to decode: {err}", raw.name);
                    }
                    entry.insert(Entry {
                        decoded,
                        generation,
                    })
                }
            };
            entry.generation = generation;

            match &entry.decoded {
                Ok(decoded) => out.push(decoded.clone()),
                Err(err) => skipped.push(SkippedMarker {
                    name: raw.name.clone(),
                    reason: SkipReason::Decode(err.clone()),
                }),
            }
        }

        self.entries.retain(|_, entry| entry.generation == generation);
        out
    }

    /// Number of decodes performed since construction.
    pub fn decode_count(&self) -> usize {
        self.decode_count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: MarkerId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

fn decode(raw: &RawMarker) -> Result<Arc<DecodedMarker>, DecodeError> {
    decode_marker(raw).map(Arc::new)
}
