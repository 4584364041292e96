//! Point-cloud records and their decoding into GPU-ready buffer views.
//!
//! - [`RawMarker`]: one interleaved point cloud (fields, record bytes, grid
//!   shape, display settings, optional hitmap colors and GPU state overrides).
//! - [`decode_marker`]: pure conversion into a [`DecodedMarker`] holding typed
//!   [`VertexBufferView`]s for positions and colors.
//!
//! Nothing here talks to the GPU.

pub mod decode;
pub mod fields;
pub mod marker;
pub mod settings;
pub mod view;

pub use self::decode::{decode_marker, DecodeError, DecodedMarker};
pub use self::fields::{FieldType, PointField};
pub use self::marker::{MarkerId, Pose, RawMarker};
pub use self::settings::{
    BlendFactor, BlendOverride, ColorMode, DepthCompare, DepthOverride, PointCloudSettings,
    PointShape, Rgba,
};
pub use self::view::{VertexBufferView, ViewId, ELEMENT_SIZE};
