//! Element base types

/// Base type of the elements moved by a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DType {
    Byte = 1,
    Short = 2,
    Int = 3,
    UInt = 4,
    Long = 5,
    ULong = 6,
    LongLong = 7,
    Float = 8,
    Double = 9,
}

impl DType {
    /// Size in bytes
    pub const fn size(&self) -> usize {
        match self {
            DType::Byte => 1,
            DType::Short => 2,
            DType::Int | DType::UInt | DType::Float => 4,
            DType::Long | DType::ULong | DType::LongLong | DType::Double => 8,
        }
    }
}
