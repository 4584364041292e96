//! Field descriptors of an interleaved point record and scalar readers.

/// Scalar type of a point field, numbered the way point-cloud messages do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FieldType {
    Int8 = 1,
    Uint8 = 2,
    Int16 = 3,
    Uint16 = 4,
    Int32 = 5,
    Uint32 = 6,
    Float32 = 7,
    Float64 = 8,
}

impl FieldType {
    /// Maps a wire datatype code back to a `FieldType`.
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => Self::Int8,
            2 => Self::Uint8,
            3 => Self::Int16,
            4 => Self::Uint16,
            5 => Self::Int32,
            6 => Self::Uint32,
            7 => Self::Float32,
            8 => Self::Float64,
            _ => return None,
        })
    }

    /// Size of one scalar in bytes.
    #[inline]
    pub const fn size(self) -> usize {
        match self {
            Self::Int8 | Self::Uint8 => 1,
            Self::Int16 | Self::Uint16 => 2,
            Self::Int32 | Self::Uint32 | Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }
}

/// One named field inside a point record.
#[derive(Debug, Clone, PartialEq)]
pub struct PointField {
    pub name: String,
    /// Byte offset of the field from the start of the point record.
    pub offset: u32,
    pub datatype: FieldType,
    /// Number of scalars; `0` is treated like `1`.
    pub count: u32,
}

impl PointField {
    pub fn new(name: impl Into<String>, offset: u32, datatype: FieldType) -> Self {
        Self {
            name: name.into(),
            offset,
            datatype,
            count: 1,
        }
    }

    /// Bytes occupied by the field inside one record.
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.datatype.size() * self.count.max(1) as usize
    }

    /// Whether the field can be bound to the GPU straight from the record
    /// bytes as a 32-bit float.
    #[inline]
    pub fn is_aligned_f32(&self) -> bool {
        self.datatype == FieldType::Float32 && self.offset % 4 == 0
    }
}

#[inline(always)]
fn array_at<const N: usize>(buf: &[u8], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[at..at + N]);
    out
}

/// Reads one scalar at `at` and widens it to `f32`.
///
/// Callers validate that `at + datatype.size()` lies inside `buf`.
#[inline]
pub fn read_scalar(buf: &[u8], at: usize, datatype: FieldType, big_endian: bool) -> f32 {
    macro_rules! read {
        ($ty:ty, $n:literal) => {{
            let bytes = array_at::<$n>(buf, at);
            if big_endian {
                <$ty>::from_be_bytes(bytes)
            } else {
                <$ty>::from_le_bytes(bytes)
            }
        }};
    }

    match datatype {
        FieldType::Int8 => buf[at] as i8 as f32,
        FieldType::Uint8 => buf[at] as f32,
        FieldType::Int16 => read!(i16, 2) as f32,
        FieldType::Uint16 => read!(u16, 2) as f32,
        FieldType::Int32 => read!(i32, 4) as f32,
        FieldType::Uint32 => read!(u32, 4) as f32,
        FieldType::Float32 => read!(f32, 4),
        FieldType::Float64 => read!(f64, 8) as f32,
    }
}

/// Reads a packed 32-bit color whose little-endian memory order is B, G, R, A
/// and returns it as `[r, g, b, a]`.
#[inline]
pub fn read_packed_bgra(buf: &[u8], at: usize, big_endian: bool) -> [u8; 4] {
    let [b0, b1, b2, b3] = array_at::<4>(buf, at);
    if big_endian {
        [b1, b2, b3, b0]
    } else {
        [b2, b1, b0, b3]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datatype_codes_round_trip_sizes() {
        assert_eq!(FieldType::from_code(7), Some(FieldType::Float32));
        assert_eq!(FieldType::from_code(0), None);
        assert_eq!(FieldType::from_code(9), None);
        assert_eq!(FieldType::Float64.size(), 8);
        assert_eq!(FieldType::Uint16.size(), 2);
    }

    #[test]
    fn reads_scalars_in_both_byte_orders() {
        let le = 1.5f32.to_le_bytes();
        let be = 1.5f32.to_be_bytes();
        assert_eq!(read_scalar(&le, 0, FieldType::Float32, false), 1.5);
        assert_eq!(read_scalar(&be, 0, FieldType::Float32, true), 1.5);

        let buf = [0u8, 0xff, 0xfe];
        assert_eq!(read_scalar(&buf, 1, FieldType::Int8, false), -1.0);
        assert_eq!(read_scalar(&buf, 1, FieldType::Uint16, false), 65279.0);
    }

    #[test]
    fn packed_color_is_reordered_to_rgba() {
        // b, g, r, a in memory
        let buf = [10u8, 20, 30, 40];
        assert_eq!(read_packed_bgra(&buf, 0, false), [30, 20, 10, 40]);
        // a, r, g, b in memory
        let buf = [40u8, 30, 20, 10];
        assert_eq!(read_packed_bgra(&buf, 0, true), [30, 20, 10, 40]);
    }

    #[test]
    fn field_alignment() {
        assert!(PointField::new("x", 0, FieldType::Float32).is_aligned_f32());
        assert!(!PointField::new("x", 2, FieldType::Float32).is_aligned_f32());
        assert!(!PointField::new("x", 0, FieldType::Float64).is_aligned_f32());
    }
}
