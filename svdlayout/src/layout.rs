//! Register layout engine
//!
//! Turns the registers of one peripheral into an ordered, gap-free sequence of segments where
//! every byte between offset 0 and the end of the peripheral is covered by exactly one segment.

use itertools::Itertools;
use log::{debug, warn};

use crate::{
    error::OverlapError,
    model::{Peripheral, Register},
};

/// One contiguous byte range of a peripheral's register block
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LayoutSegment {
    /// A declared register, or an inline array of registers
    Field(Register),
    /// Bytes no register claims, i.e., reserved
    Filler { start_offset: u64, length_bytes: u64 },
}

impl LayoutSegment {
    /// Byte offset of the segment from the peripheral base
    pub fn start(&self) -> u64 {
        match self {
            Self::Field(reg) => u64::from(reg.offset),
            Self::Filler { start_offset, .. } => *start_offset,
        }
    }

    /// Number of bytes covered by the segment
    pub fn len(&self) -> u64 {
        match self {
            Self::Field(reg) => reg.footprint(),
            Self::Filler { length_bytes, .. } => *length_bytes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn end(&self) -> u64 {
        self.start() + self.len()
    }
}

/// Size of the structure described by `segments`, in bytes
pub fn total_size(segments: &[LayoutSegment]) -> u64 {
    segments.last().map_or(0, LayoutSegment::end)
}

/// Compute the layout of `peripheral`
///
/// Registers are ordered by offset, ties by name. A filler is emitted for every gap, and a
/// trailing filler up to the footprint declared by the peripheral's address blocks.
///
/// # Errors
///
/// - Two registers claim the same byte
pub fn layout(peripheral: &Peripheral) -> Result<Vec<LayoutSegment>, OverlapError> {
    layout_registers(&peripheral.registers, peripheral.size_bytes).map_err(|e| {
        warn!("peripheral {}: {e}", peripheral.name);
        e
    })
}

fn layout_registers(
    registers: &[Register],
    declared_size: Option<u64>,
) -> Result<Vec<LayoutSegment>, OverlapError> {
    let mut segments = Vec::with_capacity(registers.len() * 2 + 1);
    let mut cursor = 0u64;
    let mut previous: Option<&Register> = None;

    for reg in registers
        .iter()
        .sorted_by(|a, b| a.offset.cmp(&b.offset).then_with(|| a.name.cmp(&b.name)))
    {
        let start = u64::from(reg.offset);
        if let Some(prev) = previous.filter(|_| start < cursor) {
            return Err(OverlapError {
                first: prev.name.clone(),
                first_range: prev.byte_range(),
                second: reg.name.clone(),
                second_range: reg.byte_range(),
            });
        }
        if start > cursor {
            segments.push(LayoutSegment::Filler {
                start_offset: cursor,
                length_bytes: start - cursor,
            });
        }
        // The whole array is skipped, not one element
        cursor = start + reg.footprint();
        segments.push(LayoutSegment::Field(reg.clone()));
        previous = Some(reg);
    }

    match declared_size {
        Some(size) if size > cursor => segments.push(LayoutSegment::Filler {
            start_offset: cursor,
            length_bytes: size - cursor,
        }),
        Some(size) if size < cursor => {
            warn!("registers extend to {cursor:#x}, past the declared footprint of {size:#x} bytes")
        }
        _ => {}
    }
    debug!(
        "laid out {} registers in {} segments, {} bytes",
        registers.len(),
        segments.len(),
        total_size(&segments)
    );
    Ok(segments)
}
