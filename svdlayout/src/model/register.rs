//! `Register` is the main primitive of the layout engine. It represents all declared metadata for
//! a single memory-mapped register or an inline array of registers.

use std::{collections::BTreeMap, fmt, str};

use crate::error::SvdParseError;

pub use svd::Access;

/// Register value bit-width
///
/// Only the widths supported by the generated structures are representable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegisterSize {
    U8,
    U16,
    U32,
}

impl RegisterSize {
    /// Convert a bit count to [`RegisterSize`]
    ///
    /// Returns None if the conversion cannot be done.
    #[must_use]
    pub const fn from_bit_count(bc: u64) -> Option<Self> {
        match bc {
            8 => Some(Self::U8),
            16 => Some(Self::U16),
            32 => Some(Self::U32),
            _bc => None,
        }
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Self::U8 => 8,
            Self::U16 => 16,
            Self::U32 => 32,
        }
    }

    #[must_use]
    pub const fn bytes(self) -> u32 {
        self.bits() / 8
    }

    /// E.g., u8, u16, u32
    #[must_use]
    pub const fn to_rust_type_str(&self) -> &str {
        match self {
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
        }
    }

    /// Maximum value representable by a register of this size
    #[must_use]
    pub const fn max_value(self) -> u64 {
        match self {
            Self::U8 => u8::MAX as u64,
            Self::U16 => u16::MAX as u64,
            Self::U32 => u32::MAX as u64,
        }
    }
}

impl TryFrom<u64> for RegisterSize {
    type Error = SvdParseError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::from_bit_count(value).ok_or(SvdParseError::InvalidRegisterSize(value))
    }
}

impl fmt::Display for RegisterSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_rust_type_str())
    }
}

/// Represents a single memory-mapped I/O register, or an inline array of identical registers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Register {
    pub name: String,
    pub description: Option<String>,
    /// Byte offset from the peripheral base address
    pub offset: u32,
    pub size: RegisterSize,
    /// Number of consecutive elements, 1 for a scalar register
    array_length: u32,
    pub access: Access,
    pub reset_value: Option<u64>,
    pub reset_mask: Option<u64>,
    pub fields: Vec<RegisterField>,
}

impl Register {
    /// Create a scalar register without fields
    pub fn new(name: impl Into<String>, offset: u32, size: RegisterSize, access: Access) -> Self {
        Self {
            name: name.into(),
            description: None,
            offset,
            size,
            array_length: 1,
            access,
            reset_value: None,
            reset_mask: None,
            fields: vec![],
        }
    }

    /// Turn this register into an inline array of `array_length` elements
    ///
    /// # Errors
    ///
    /// - `array_length` is zero
    pub fn with_array_length(mut self, array_length: u32) -> Result<Self, SvdParseError> {
        if array_length == 0 {
            return Err(SvdParseError::ZeroDim);
        }
        self.array_length = array_length;
        Ok(self)
    }

    #[must_use]
    pub fn with_fields(mut self, fields: Vec<RegisterField>) -> Self {
        self.fields = fields;
        self
    }

    #[must_use]
    pub const fn array_length(&self) -> u32 {
        self.array_length
    }

    #[must_use]
    pub const fn is_array(&self) -> bool {
        self.array_length > 1
    }

    /// Number of bytes covered by all elements of this register
    #[must_use]
    pub fn footprint(&self) -> u64 {
        u64::from(self.size.bytes()) * u64::from(self.array_length)
    }

    /// Byte range `[offset, offset + footprint)` relative to the peripheral base
    #[must_use]
    pub fn byte_range(&self) -> std::ops::Range<u64> {
        let start = u64::from(self.offset);
        start..start + self.footprint()
    }
}

/// A contiguous bit run within a register
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisterField {
    pub name: String,
    pub description: Option<String>,
    pub bit_offset: u32,
    pub bit_width: u32,
    /// Overrides the register's access when present
    pub access: Option<Access>,
    pub enum_values: Option<BTreeMap<String, u64>>,
}

impl RegisterField {
    pub fn new(name: impl Into<String>, bit_offset: u32, bit_width: u32) -> Self {
        Self {
            name: name.into(),
            description: None,
            bit_offset,
            bit_width,
            access: None,
            enum_values: None,
        }
    }

    #[must_use]
    pub fn with_enum_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        self.enum_values = Some(values.into_iter().map(|(n, v)| (n.into(), v)).collect());
        self
    }

    /// One past the most significant bit of this field
    #[must_use]
    pub const fn end_bit(&self) -> u64 {
        self.bit_offset as u64 + self.bit_width as u64
    }

    #[must_use]
    pub fn overlaps(&self, other: &RegisterField) -> bool {
        u64::from(self.bit_offset) < other.end_bit() && u64::from(other.bit_offset) < self.end_bit()
    }
}

/// Parse an access type from its CMSIS-SVD `accessType` string
pub(crate) fn parse_access(s: &str) -> Result<Access, SvdParseError> {
    Access::parse_str(s).ok_or_else(|| SvdParseError::InvalidAccessType(s.to_owned()))
}

#[test]
fn register_size_from_bit_count() {
    assert_eq!(RegisterSize::from_bit_count(8), Some(RegisterSize::U8));
    assert_eq!(RegisterSize::from_bit_count(32), Some(RegisterSize::U32));
    assert_eq!(RegisterSize::from_bit_count(64), None);
    assert!(matches!(
        RegisterSize::try_from(12),
        Err(SvdParseError::InvalidRegisterSize(12))
    ));
}

#[test]
fn array_footprint_counts_every_element() {
    let reg = Register::new("ABCDSR", 0x70, RegisterSize::U32, Access::ReadWrite)
        .with_array_length(2)
        .unwrap();
    assert_eq!(reg.footprint(), 8);
    assert_eq!(reg.byte_range(), 0x70..0x78);
    assert!(Register::new("X", 0, RegisterSize::U8, Access::ReadOnly)
        .with_array_length(0)
        .is_err());
}

#[test]
fn fields_overlap() {
    let a = RegisterField::new("A", 0, 4);
    let b = RegisterField::new("B", 3, 2);
    let c = RegisterField::new("C", 4, 4);
    assert!(a.overlaps(&b));
    assert!(!a.overlaps(&c));
    assert!(b.overlaps(&c));
}
