use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Size of the little-endian header length prefix.
pub const N_LEN: usize = 8;

/// Upper bound on the declared header length.
pub const MAX_HEADER_SIZE: u64 = 100_000_000;

/// The header is space-padded so tensor data starts on this boundary.
pub const HEADER_ALIGNMENT: u64 = 8;

/// Reserved header key holding the free-form string attributes.
pub const METADATA_KEY: &str = "__metadata__";

/// Element type of a tensor.
///
/// The serialized form is the upper-case tag used in the header JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DType {
    #[serde(rename = "BOOL")]
    Bool,
    U8,
    I8,
    /// FP8 <https://arxiv.org/pdf/2209.05433.pdf>
    #[serde(rename = "F8_E5M2")]
    F8E5M2,
    /// FP8 <https://arxiv.org/pdf/2209.05433.pdf>
    #[serde(rename = "F8_E4M3")]
    F8E4M3,
    I16,
    U16,
    F16,
    BF16,
    I32,
    U32,
    F32,
    F64,
    I64,
    U64,
}

impl DType {
    /// Every legal dtype, in declaration order.
    pub const ALL: [DType; 15] = [
        DType::Bool,
        DType::U8,
        DType::I8,
        DType::F8E5M2,
        DType::F8E4M3,
        DType::I16,
        DType::U16,
        DType::F16,
        DType::BF16,
        DType::I32,
        DType::U32,
        DType::F32,
        DType::F64,
        DType::I64,
        DType::U64,
    ];

    /// Size in bytes of one element.
    pub const fn byte_size(&self) -> usize {
        match self {
            DType::F64 | DType::I64 | DType::U64 => 8,
            DType::F32 | DType::I32 | DType::U32 => 4,
            DType::F16 | DType::BF16 | DType::I16 | DType::U16 => 2,
            DType::F8E5M2 | DType::F8E4M3 | DType::I8 | DType::U8 | DType::Bool => 1,
        }
    }

    /// The header tag for this dtype.
    pub const fn as_str(&self) -> &'static str {
        match self {
            DType::Bool => "BOOL",
            DType::U8 => "U8",
            DType::I8 => "I8",
            DType::F8E5M2 => "F8_E5M2",
            DType::F8E4M3 => "F8_E4M3",
            DType::I16 => "I16",
            DType::U16 => "U16",
            DType::F16 => "F16",
            DType::BF16 => "BF16",
            DType::I32 => "I32",
            DType::U32 => "U32",
            DType::F32 => "F32",
            DType::F64 => "F64",
            DType::I64 => "I64",
            DType::U64 => "U64",
        }
    }

    /// Element width for a header tag, or `None` if the tag is not a dtype.
    pub fn width_of(tag: &str) -> Option<usize> {
        tag.parse::<DType>().ok().map(|d| d.byte_size())
    }

    pub fn is_valid(tag: &str) -> bool {
        tag.parse::<DType>().is_ok()
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DType::ALL
            .iter()
            .copied()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| format!("{s:?} is not a valid DType"))
    }
}

/// Placement of a single tensor inside the payload.
///
/// Endianness is little-endian and layout is row-major.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorInfo {
    pub dtype: DType,
    pub shape: Vec<u64>,
    /// Half-open `[start, end)` byte range relative to the payload start.
    pub data_offsets: [u64; 2],
}

impl TensorInfo {
    pub fn start(&self) -> u64 {
        self.data_offsets[0]
    }

    pub fn end(&self) -> u64 {
        self.data_offsets[1]
    }
}
