//! Error types for every stage of the pipeline
//!
//! Errors are attributed to the smallest scope that can be isolated: a field, a register, a
//! peripheral, a device or the whole run. See [`ErrorKind`] and [`Diagnostic`].

use std::{fmt, io, ops, path};

use thiserror::Error;

/// Classification of all failures the pipeline can report
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
pub enum ErrorKind {
    /// A file could not be read. The file is skipped.
    CatalogIo,
    /// Input could not be parsed. The file or peripheral is skipped.
    MalformedInput,
    /// A required element is absent. Fatal for that device.
    MissingField,
    /// Two registers share bytes. Fatal for that peripheral.
    OverlapDetected,
    /// A field does not fit its register. Fatal for that field.
    FieldOutOfRange,
    /// A field shares bits with another field of the same register. Fatal for that field.
    FieldOverlap,
    /// An enumerated value cannot be represented by its field. Fatal for that field.
    EnumValueOutOfRange,
}

/// Error that happened during parsing 'CMSIS-SVD'
#[derive(Error, Debug)]
pub enum SvdParseError {
    #[error("expected tag {tag:?} in element {elem_name:?}")]
    ExpectedTagInElement { elem_name: String, tag: String },
    #[error("element {0:?} has no text")]
    EmptyElement(String),
    #[error("could not parse int")]
    ParseInt(#[from] std::num::ParseIntError),
    #[error("could not parse nonneg int from {0:?}")]
    InvalidNonnegInt(String),
    #[error("invalid size multiplier suffix: {0}")]
    InvalidSizeMultiplierSuffix(char),
    #[error("value {0:?} does not fit in {1} bits")]
    ValueOverflow(String, u32),
    #[error("invalid register size {0} (bits), must be one of 8, 16 or 32")]
    InvalidRegisterSize(u64),
    #[error("invalid access type in input: {0}")]
    InvalidAccessType(String),
    #[error("invalid bit range {0:?}")]
    InvalidBitRange(String),
    #[error("field {0:?} defines no bit range (bitOffset/bitWidth, lsb/msb or bitRange)")]
    MissingBitRange(String),
    #[error("unsupported dimIndex format {0:?}")]
    InvalidDimIndex(String),
    #[error("dimIndex {index:?} lists {len} names but dim is {dim}")]
    DimIndexLength { index: String, len: usize, dim: u32 },
    #[error("register array must have at least one element")]
    ZeroDim,
    #[error("address offset of {name:?} overflows")]
    OffsetOverflow { name: String },
    #[error("peripheral {periph:?} is derived from {source_name:?}, which does not exist")]
    UnknownDerivationSource { periph: String, source_name: String },
    #[error("peripheral {0:?} is part of a derivation cycle")]
    DerivationCycle(String),
    #[error("peripheral {periph:?} is derived from {source_name:?}, which was skipped")]
    DerivationSourceFailed { periph: String, source_name: String },
    #[error("peripheral {0:?} is declared more than once")]
    DuplicatePeripheral(String),
    #[error("expected {expected_count:?} {node_name:?} elements, found {actual_count}")]
    InvalidNodeCount {
        node_name: String,
        expected_count: ops::RangeInclusive<usize>,
        actual_count: usize,
    },
}

impl SvdParseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ExpectedTagInElement { .. } | Self::EmptyElement(_) => ErrorKind::MissingField,
            _ => ErrorKind::MalformedInput,
        }
    }

    /// Convert into positional error, adding row and column information
    pub(crate) fn with_text_pos_range(
        self,
        pos: ops::Range<roxmltree::TextPos>,
    ) -> PositionalError<SvdParseError> {
        PositionalError {
            pos: pos.into(),
            err: self,
        }
    }

    pub(crate) fn with_byte_pos_range(
        self,
        byte_pos: ops::Range<usize>,
        doc: &roxmltree::Document,
    ) -> PositionalError<SvdParseError> {
        let text_pos = ops::Range {
            start: doc.text_pos_at(byte_pos.start),
            end: doc.text_pos_at(byte_pos.end),
        };
        self.with_text_pos_range(text_pos)
    }
}

/// Representation of a file position in an error
///
/// Indexes start from 1:1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Position {
    Point {
        line: u32,
        col: u32,
    },
    Line {
        line: u32,
        start_col: u32,
        end_col: u32,
    },
    MultiLine {
        start_line: u32,
        start_col: u32,
        end_line: u32,
        end_col: u32,
    },
}

impl From<ops::Range<roxmltree::TextPos>> for Position {
    fn from(value: ops::Range<roxmltree::TextPos>) -> Self {
        if value.start.row == value.end.row {
            // Same line, same column --> Point
            if value.start.col == value.end.col {
                Position::Point {
                    line: value.start.row,
                    col: value.start.col,
                }
            }
            // Same line but different column --> Line
            else {
                Position::Line {
                    line: value.start.row,
                    start_col: value.start.col,
                    end_col: value.end.col,
                }
            }
        }
        // Starts and ends on different lines --> MultiLine
        else {
            Position::MultiLine {
                start_line: value.start.row,
                start_col: value.start.col,
                end_line: value.end.row,
                end_col: value.end.col,
            }
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Point { line, col } => write!(f, "{line}:{col}"),
            Position::Line {
                line,
                start_col,
                end_col,
            } => write!(f, "{line}:{start_col}-{end_col}"),
            Position::MultiLine {
                start_line,
                start_col,
                end_line,
                end_col,
            } => write!(f, "{start_line}:{start_col}..{end_line}:{end_col}"),
        }
    }
}

#[derive(Error, Debug)]
#[error("{pos}\n{err}")]
pub struct PositionalError<T> {
    pub(crate) pos: Position,
    pub(crate) err: T,
}

impl<T> PositionalError<T> {
    pub(crate) fn with_fname(self, fname: String) -> ParseFileError<T> {
        ParseFileError { fname, err: self }
    }

    pub fn position(&self) -> &Position {
        &self.pos
    }

    pub fn inner(&self) -> &T {
        &self.err
    }
}

#[derive(Error, Debug)]
#[error("CMSIS-SVD parse error --> {fname}:{err}")]
pub struct ParseFileError<T> {
    pub(crate) fname: String,
    pub(crate) err: PositionalError<T>,
}

impl ParseFileError<SvdParseError> {
    pub fn kind(&self) -> ErrorKind {
        self.err.err.kind()
    }

    pub fn inner(&self) -> &SvdParseError {
        &self.err.err
    }
}

/// Error that makes a whole description file unusable
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("cannot read description")]
    Io(#[from] io::Error),
    #[error("malformed XML in {fname}")]
    MalformedXml {
        fname: String,
        #[source]
        source: roxmltree::Error,
    },
    #[error("{0}")]
    Svd(#[from] ParseFileError<SvdParseError>),
}

impl ParseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) => ErrorKind::CatalogIo,
            Self::MalformedXml { .. } => ErrorKind::MalformedInput,
            Self::Svd(e) => e.kind(),
        }
    }
}

/// A peripheral that was dropped from its device during parsing
#[derive(Error, Debug)]
#[error("peripheral {peripheral} was skipped: {err}")]
pub struct PeripheralError {
    pub peripheral: String,
    pub(crate) err: ParseFileError<SvdParseError>,
}

impl PeripheralError {
    pub fn kind(&self) -> ErrorKind {
        self.err.kind()
    }

    pub fn inner(&self) -> &SvdParseError {
        self.err.inner()
    }
}

/// Error that happened while scanning the description trees
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("cannot read {}", path.display())]
    Io {
        path: path::PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot walk {}", root.display())]
    Walk {
        root: path::PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("malformed XML in {}", path.display())]
    MalformedXml {
        path: path::PathBuf,
        #[source]
        source: roxmltree::Error,
    },
    #[error("{} does not declare a device name", path.display())]
    MissingDeviceName { path: path::PathBuf },
}

impl CatalogError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } | Self::Walk { .. } => ErrorKind::CatalogIo,
            Self::MalformedXml { .. } => ErrorKind::MalformedInput,
            Self::MissingDeviceName { .. } => ErrorKind::MissingField,
        }
    }
}

/// Two registers of one peripheral claim the same bytes
#[derive(Error, Clone, Debug, PartialEq, Eq)]
#[error("register {second} at {second_range:#x?} overlaps register {first} at {first_range:#x?}")]
pub struct OverlapError {
    pub first: String,
    pub first_range: ops::Range<u64>,
    pub second: String,
    pub second_range: ops::Range<u64>,
}

impl OverlapError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::OverlapDetected
    }
}

/// Error that disqualifies a single field of a register
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum FieldError {
    #[error("field {register}.{field} at bit {shift} with width {width} does not fit in {register_bits} bits")]
    OutOfRange {
        register: String,
        field: String,
        shift: u32,
        width: u32,
        register_bits: u32,
    },
    #[error("field {register}.{field} overlaps field {register}.{other}")]
    Overlap {
        register: String,
        field: String,
        other: String,
    },
    #[error("enumerated value {register}.{field}.{variant} = {value:#x} does not fit in {width} bits")]
    EnumValueOutOfRange {
        register: String,
        field: String,
        variant: String,
        value: u64,
        width: u32,
    },
}

impl FieldError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::OutOfRange { .. } => ErrorKind::FieldOutOfRange,
            Self::Overlap { .. } => ErrorKind::FieldOverlap,
            Self::EnumValueOutOfRange { .. } => ErrorKind::EnumValueOutOfRange,
        }
    }

    pub fn field(&self) -> &str {
        match self {
            Self::OutOfRange { field, .. }
            | Self::Overlap { field, .. }
            | Self::EnumValueOutOfRange { field, .. } => field,
        }
    }
}

/// Any error the pipeline collects instead of aborting
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Peripheral(#[from] PeripheralError),
    #[error(transparent)]
    Overlap(#[from] OverlapError),
    #[error(transparent)]
    Field(#[from] FieldError),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Parse(e) => e.kind(),
            Self::Peripheral(e) => e.kind(),
            Self::Overlap(e) => e.kind(),
            Self::Field(e) => e.kind(),
        }
    }
}

/// Location of a diagnostic within the device hierarchy
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Scope {
    pub device: String,
    pub peripheral: Option<String>,
    pub register: Option<String>,
    pub field: Option<String>,
}

impl Scope {
    pub fn device(name: impl Into<String>) -> Self {
        Self {
            device: name.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn peripheral(mut self, name: impl Into<String>) -> Self {
        self.peripheral = Some(name.into());
        self
    }

    #[must_use]
    pub fn register(mut self, name: impl Into<String>) -> Self {
        self.register = Some(name.into());
        self
    }

    #[must_use]
    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.field = Some(name.into());
        self
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.device)?;
        for part in [&self.peripheral, &self.register, &self.field]
            .into_iter()
            .flatten()
        {
            write!(f, "/{part}")?;
        }
        Ok(())
    }
}

/// An error paired with the scope it disqualified
#[derive(Debug)]
pub struct Diagnostic {
    pub scope: Scope,
    pub error: Error,
}

impl Diagnostic {
    pub fn new(scope: Scope, error: impl Into<Error>) -> Self {
        Self {
            scope,
            error: error.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind(), self.scope, self.error)
    }
}

#[test]
fn scope_displays_as_path() {
    let scope = Scope::device("SAM3X8E")
        .peripheral("PIOA")
        .register("ABCDSR")
        .field("P0");
    assert_eq!(scope.to_string(), "SAM3X8E/PIOA/ABCDSR/P0");
    assert_eq!(Scope::device("SAM3X8E").to_string(), "SAM3X8E");
}

#[test]
fn field_errors_map_to_kinds() {
    let err = FieldError::EnumValueOutOfRange {
        register: "CTRL".to_owned(),
        field: "MODE".to_owned(),
        variant: "D".to_owned(),
        value: 8,
        width: 3,
    };
    assert_eq!(err.kind(), ErrorKind::EnumValueOutOfRange);
    assert_eq!(err.field(), "MODE");
    assert_eq!(
        Error::from(err).to_string(),
        "enumerated value CTRL.MODE.D = 0x8 does not fit in 3 bits"
    );
}
