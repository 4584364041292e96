//! Typed views into backing byte buffers, as bound to vertex attributes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Size in bytes of one element addressed by a view's `offset` and `stride`.
pub const ELEMENT_SIZE: usize = 4;

static NEXT_VIEW_ID: AtomicU64 = AtomicU64::new(1);

/// Stable key of a view. Clones of a view share its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewId(u64);

impl ViewId {
    fn next() -> Self {
        Self(NEXT_VIEW_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

/// `{ buffer, offset, stride }` with offset and stride counted in
/// [`ELEMENT_SIZE`]-byte elements.
///
/// Equality compares the viewed bytes and layout, never the id.
#[derive(Debug, Clone)]
pub struct VertexBufferView {
    id: ViewId,
    pub buffer: Arc<[u8]>,
    pub offset: usize,
    pub stride: usize,
}

impl VertexBufferView {
    pub fn new(buffer: Arc<[u8]>, offset: usize, stride: usize) -> Self {
        Self {
            id: ViewId::next(),
            buffer,
            offset,
            stride,
        }
    }

    /// Packs `values` into a fresh backing buffer.
    pub fn from_f32(values: &[f32], stride: usize) -> Self {
        Self::new(Arc::from(bytemuck::cast_slice::<f32, u8>(values)), 0, stride)
    }

    #[inline]
    pub fn id(&self) -> ViewId {
        self.id
    }

    #[inline]
    pub fn byte_offset(&self) -> usize {
        self.offset * ELEMENT_SIZE
    }

    #[inline]
    pub fn byte_stride(&self) -> usize {
        self.stride * ELEMENT_SIZE
    }

    /// Bytes needed to read `count` entries of `entry_bytes` each.
    pub fn required_bytes(&self, count: usize, entry_bytes: usize) -> usize {
        if count == 0 {
            return self.byte_offset();
        }
        self.byte_offset() + (count - 1) * self.byte_stride() + entry_bytes
    }

    /// Whether both views read the same backing allocation with the same layout.
    #[inline]
    pub fn same_source(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.buffer, &other.buffer)
            && self.offset == other.offset
            && self.stride == other.stride
    }
}

impl PartialEq for VertexBufferView {
    fn eq(&self, other: &Self) -> bool {
        self.offset == other.offset && self.stride == other.stride && self.buffer == other.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_identity_new_views_do_not() {
        let view = VertexBufferView::from_f32(&[1.0, 2.0, 3.0], 3);
        let clone = view.clone();
        let other = VertexBufferView::new(view.buffer.clone(), 0, 3);

        assert_eq!(view.id(), clone.id());
        assert_ne!(view.id(), other.id());
        assert_eq!(view, other);
        assert!(view.same_source(&other));
    }

    #[test]
    fn value_equality_ignores_allocation() {
        let a = VertexBufferView::from_f32(&[1.0, 2.0], 1);
        let b = VertexBufferView::from_f32(&[1.0, 2.0], 1);
        assert_eq!(a, b);
        assert!(!a.same_source(&b));
    }

    #[test]
    fn required_bytes_accounts_for_offset_and_stride() {
        let view = VertexBufferView::new(Arc::from(vec![0u8; 64]), 1, 4);
        assert_eq!(view.byte_offset(), 4);
        assert_eq!(view.byte_stride(), 16);
        // 3 entries of vec3<f32>: 4 + 2 * 16 + 12
        assert_eq!(view.required_bytes(3, 12), 48);
        assert_eq!(view.required_bytes(0, 12), 4);
    }
}
