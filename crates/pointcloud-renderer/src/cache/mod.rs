//! Per-frame caches: decoded markers and the GPU buffers made from them.

pub mod markers;
pub mod vertex_buffer;

pub use self::markers::MarkerCache;
pub use self::vertex_buffer::{CacheStats, MemoizedGpuBuffer, VertexBufferCache};
