//! svdlayout --- Compute bit-exact register layouts and field accessor metadata from CMSIS-SVD
//! hardware descriptions.

// Export full API at crate root
pub use api::*;
pub use bitfield::{build as build_bitfields, BitfieldModel};
pub use catalog::{
    Catalog, CatalogConfig, Conflict, Origin, Resolution, SourceDescriptor, VersionPolicy,
};
pub use error::{
    CatalogError, Diagnostic, Error, ErrorKind, FieldError, OverlapError, ParseError,
    PeripheralError, Scope, SvdParseError,
};
pub use filtering::{Filters, ItemFilter};
pub use layout::{layout, total_size, LayoutSegment};

mod api;
mod bitfield;
mod catalog;
mod error;
pub mod export;
mod filtering;
mod frontend;
mod layout;
pub mod model;
mod util;
