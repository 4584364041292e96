//! Generational GPU buffer cache keyed by buffer-view identity.
//!
//! Frame protocol: [`VertexBufferCache::on_pre_render`] once, any number of
//! [`VertexBufferCache::get`] calls, then [`VertexBufferCache::on_post_render`]
//! once. The post-render sweep frees every buffer no `get` touched this frame.

use crate::error::CacheError;
use crate::gpu::{BufferHandle, GpuBackend};
use log::{debug, warn};
use pointcloud::{VertexBufferView, ViewId};
use std::collections::{HashMap, HashSet};

/// GPU-resident copy of one view's backing buffer.
#[derive(Debug, Clone)]
pub struct MemoizedGpuBuffer {
    /// View the upload was made from. Kept to detect layout changes.
    pub source: VertexBufferView,
    pub handle: BufferHandle,
    pub byte_offset: u64,
    pub byte_stride: u64,
    pub divisor: u32,
    /// Bumped every time the slot is re-uploaded.
    pub generation: u64,
    pub used_this_frame: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub uploads: u64,
    pub rebuilds: u64,
    pub evictions: u64,
    pub hits: u64,
}

pub struct VertexBufferCache {
    label: &'static str,
    slots: HashMap<ViewId, MemoizedGpuBuffer>,
    frame: u64,
    in_frame: bool,
    stats: CacheStats,
}

impl VertexBufferCache {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            slots: HashMap::new(),
            frame: 0,
            in_frame: false,
            stats: CacheStats::default(),
        }
    }

    pub fn on_pre_render(&mut self) {
        if self.in_frame {
            warn!("{}: on_pre_render called twice without on_post_render", self.label);
        }
        self.frame += 1;
        self.in_frame = true;
    }

    /// Returns the GPU buffer for `view`, uploading or re-uploading as needed.
    ///
    /// `count` entries of `entry_bytes` each must fit in the backing buffer,
    /// otherwise nothing is uploaded.
    pub fn get<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        view: &VertexBufferView,
        count: usize,
        entry_bytes: usize,
    ) -> Result<&MemoizedGpuBuffer, CacheError> {
        if !self.in_frame {
            warn!("{}: get outside of a frame", self.label);
        }

        let required = view.required_bytes(count, entry_bytes);
        if required > view.buffer.len() {
            return Err(CacheError::ViewOutOfBounds {
                view: view.id(),
                required,
                available: view.buffer.len(),
            });
        }

        let label = self.label;
        let stats = &mut self.stats;
        let slot = match self.slots.entry(view.id()) {
            std::collections::hash_map::Entry::Occupied(entry) => {
                let slot = entry.into_mut();
                if slot.source.same_source(view) {
                    stats.hits += 1;
                } else {
                    let handle = backend.create_vertex_buffer(label, &view.buffer)?;
                    backend.destroy_buffer(slot.handle);
                    debug!(
                        "{label}: view {} changed layout, rebuilt {:?} -> {:?}",
                        view.id().get(),
                        slot.handle,
                        handle
                    );
                    slot.source = view.clone();
                    slot.handle = handle;
                    slot.byte_offset = view.byte_offset() as u64;
                    slot.byte_stride = view.byte_stride() as u64;
                    slot.generation += 1;
                    stats.rebuilds += 1;
                }
                slot
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                let handle = backend.create_vertex_buffer(label, &view.buffer)?;
                stats.uploads += 1;
                entry.insert(MemoizedGpuBuffer {
                    source: view.clone(),
                    handle,
                    byte_offset: view.byte_offset() as u64,
                    byte_stride: view.byte_stride() as u64,
                    divisor: 1,
                    generation: 0,
                    used_this_frame: false,
                })
            }
        };
        slot.used_this_frame = true;
        Ok(slot)
    }

    /// Frees every buffer not referenced since [`Self::on_pre_render`].
    pub fn on_post_render<B: GpuBackend + ?Sized>(&mut self, backend: &mut B) {
        if !self.in_frame {
            warn!("{}: on_post_render without on_pre_render", self.label);
        }
        self.in_frame = false;

        let before = self.slots.len();
        self.slots.retain(|_, slot| {
            if slot.used_this_frame {
                slot.used_this_frame = false;
                true
            } else {
                backend.destroy_buffer(slot.handle);
                false
            }
        });
        let evicted = before - self.slots.len();
        self.stats.evictions += evicted as u64;

        debug!(
            "{}: frame {} kept {} buffers, evicted {}",
            self.label,
            self.frame,
            self.slots.len(),
            evicted
        );
    }

    /// Frees every entry whose view is not in `live`. Returns how many went.
    pub fn retain_views<B: GpuBackend + ?Sized>(&mut self, backend: &mut B, live: &HashSet<ViewId>) -> usize {
        let before = self.slots.len();
        self.slots.retain(|id, slot| {
            let keep = live.contains(id);
            if !keep {
                backend.destroy_buffer(slot.handle);
            }
            keep
        });
        let released = before - self.slots.len();
        self.stats.evictions += released as u64;
        released
    }

    /// Drops every entry, freeing its buffer.
    pub fn clear<B: GpuBackend + ?Sized>(&mut self, backend: &mut B) {
        for (_, slot) in self.slots.drain() {
            backend.destroy_buffer(slot.handle);
        }
        self.in_frame = false;
    }

    /// Drops every entry without touching the backend. For use after the
    /// device is gone and its handles are meaningless.
    pub fn forget(&mut self) {
        self.slots.clear();
        self.in_frame = false;
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, view: &VertexBufferView) -> bool {
        self.slots.contains_key(&view.id())
    }

    pub fn handle_of(&self, view: &VertexBufferView) -> Option<BufferHandle> {
        self.slots.get(&view.id()).map(|slot| slot.handle)
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}
