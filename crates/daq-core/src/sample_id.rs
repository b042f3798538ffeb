//! Composite sample identifiers.
//!
//! A sample id packs three fields into 32 bits:
//!
//! ```text
//!  31      26 25          16 15                 0
//! +----------+--------------+--------------------+
//! |   type   |    dsm id    |  sensor+sample id  |
//! +----------+--------------+--------------------+
//! ```
//!
//! The type bits describe the element type of the sample's data buffer. The remaining
//! 26 bits ("full id") identify the stream and are what subscribers register for.

use serde::{Deserialize, Serialize};
use std::fmt;

const TYPE_SHIFT: u32 = 26;
const TYPE_MASK: u32 = 0x3f;
const DSM_SHIFT: u32 = 16;
const DSM_MASK: u32 = 0x3ff;
const SPS_MASK: u32 = 0xffff;
const FULL_ID_MASK: u32 = (1 << TYPE_SHIFT) - 1;

/// Element type tag stored in the top bits of a [`SampleId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SampleType {
    /// Signed 8-bit characters.
    Char = 0,
    /// Unsigned bytes.
    UChar = 1,
    /// Signed 16-bit integers.
    Short = 2,
    /// Unsigned 16-bit integers.
    UShort = 3,
    /// Signed 32-bit integers.
    Int32 = 4,
    /// Unsigned 32-bit integers.
    UInt32 = 5,
    /// 32-bit floats.
    Float = 6,
    /// 64-bit floats.
    Double = 7,
    /// Signed 64-bit integers.
    Int64 = 8,
    /// Unrecognized type code.
    Unknown = 0x3f,
}

impl SampleType {
    /// Decode a 6-bit type code.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => SampleType::Char,
            1 => SampleType::UChar,
            2 => SampleType::Short,
            3 => SampleType::UShort,
            4 => SampleType::Int32,
            5 => SampleType::UInt32,
            6 => SampleType::Float,
            7 => SampleType::Double,
            8 => SampleType::Int64,
            _ => SampleType::Unknown,
        }
    }

    /// Numeric code stored in the id.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Size in bytes of one element, zero for `Unknown`.
    pub fn element_size(self) -> usize {
        match self {
            SampleType::Char | SampleType::UChar => 1,
            SampleType::Short | SampleType::UShort => 2,
            SampleType::Int32 | SampleType::UInt32 | SampleType::Float => 4,
            SampleType::Double | SampleType::Int64 => 8,
            SampleType::Unknown => 0,
        }
    }
}

impl fmt::Display for SampleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SampleType::Char => "char",
            SampleType::UChar => "uchar",
            SampleType::Short => "short",
            SampleType::UShort => "ushort",
            SampleType::Int32 => "int32",
            SampleType::UInt32 => "uint32",
            SampleType::Float => "float",
            SampleType::Double => "double",
            SampleType::Int64 => "int64",
            SampleType::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

/// Composite 32-bit sample identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleId(u32);

impl SampleId {
    /// Build an id from a DSM id and a sensor+sample id. DSM ids are masked to 10 bits.
    pub const fn new(dsm_id: u16, sps_id: u16) -> Self {
        SampleId((((dsm_id as u32) & DSM_MASK) << DSM_SHIFT) | sps_id as u32)
    }

    /// Wrap a raw 32-bit value, type bits included.
    pub const fn from_raw(raw: u32) -> Self {
        SampleId(raw)
    }

    /// Raw 32-bit value, type bits included.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// The 26-bit stream identity without the type bits.
    pub const fn full_id(self) -> SampleId {
        SampleId(self.0 & FULL_ID_MASK)
    }

    /// DSM (acquisition node) id.
    pub const fn dsm_id(self) -> u16 {
        ((self.0 >> DSM_SHIFT) & DSM_MASK) as u16
    }

    /// Sensor+sample id.
    pub const fn sps_id(self) -> u16 {
        (self.0 & SPS_MASK) as u16
    }

    /// Element type encoded in the id.
    pub fn sample_type(self) -> SampleType {
        SampleType::from_code(((self.0 >> TYPE_SHIFT) & TYPE_MASK) as u8)
    }

    /// Copy of this id with the type bits replaced.
    pub fn with_type(self, sample_type: SampleType) -> Self {
        SampleId((self.0 & FULL_ID_MASK) | ((sample_type.code() as u32 & TYPE_MASK) << TYPE_SHIFT))
    }

    /// Copy of this id with the DSM id replaced.
    pub const fn with_dsm_id(self, dsm_id: u16) -> Self {
        SampleId((self.0 & !(DSM_MASK << DSM_SHIFT)) | (((dsm_id as u32) & DSM_MASK) << DSM_SHIFT))
    }

    /// Copy of this id with the sensor+sample id replaced.
    pub const fn with_sps_id(self, sps_id: u16) -> Self {
        SampleId((self.0 & !SPS_MASK) | sps_id as u32)
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.dsm_id(), self.sps_id())
    }
}
