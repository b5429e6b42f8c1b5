//! Bitfield and enumeration model builder
use itertools::Itertools;
use log::warn;

use crate::{
    error::FieldError,
    model::{Access, Partial, Register, RegisterField},
};

/// Accessor metadata for one field of a register
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BitfieldModel {
    pub register: String,
    pub field: String,
    pub shift: u32,
    /// `((1 << width) - 1) << shift`
    pub mask: u64,
    pub width: u32,
    /// Field access, falling back to the register's
    pub access: Access,
    /// Enumerated constants in ascending value order
    pub enum_entries: Vec<(String, u64)>,
}

impl BitfieldModel {
    /// Name of the CMSIS-style position alias, e.g., `MODE_Pos`
    pub fn pos_alias(&self) -> String {
        format!("{}_Pos", self.field)
    }

    /// Name of the CMSIS-style mask alias, e.g., `MODE_Msk`
    pub fn msk_alias(&self) -> String {
        format!("{}_Msk", self.field)
    }

    /// Both legacy aliases with their values
    pub fn legacy_aliases(&self) -> [(String, u64); 2] {
        [
            (self.pos_alias(), u64::from(self.shift)),
            (self.msk_alias(), self.mask),
        ]
    }

    /// Largest value the field can hold
    pub fn max_value(&self) -> u64 {
        self.mask >> self.shift
    }
}

/// Mask with the low `width` bits set, `width` at most 64
const fn low_bits(width: u32) -> u64 {
    if width >= u64::BITS {
        u64::MAX
    } else {
        (1 << width) - 1
    }
}

fn build_field(reg: &Register, field: &RegisterField) -> Result<BitfieldModel, FieldError> {
    let register_bits = reg.size.bits();
    if field.end_bit() > u64::from(register_bits) {
        return Err(FieldError::OutOfRange {
            register: reg.name.clone(),
            field: field.name.clone(),
            shift: field.bit_offset,
            width: field.bit_width,
            register_bits,
        });
    }
    let width = field.bit_width;
    let max = low_bits(width);

    let mut enum_entries = vec![];
    for (variant, value) in field.enum_values.iter().flatten() {
        if *value > max {
            return Err(FieldError::EnumValueOutOfRange {
                register: reg.name.clone(),
                field: field.name.clone(),
                variant: variant.clone(),
                value: *value,
                width,
            });
        }
        enum_entries.push((variant.clone(), *value));
    }
    // Ties are already in name order since the source map is ordered by name
    enum_entries.sort_by_key(|(_, value)| *value);

    Ok(BitfieldModel {
        register: reg.name.clone(),
        field: field.name.clone(),
        shift: field.bit_offset,
        mask: max << field.bit_offset,
        width,
        access: field.access.unwrap_or(reg.access),
        enum_entries,
    })
}

/// Build accessor metadata for every field of `reg`
///
/// A field that does not fit the register, overlaps an already accepted field, or has an
/// enumerated value its width cannot hold is reported in [`Partial::skipped`]. The remaining
/// fields are still built. Zero-width fields are dropped with a warning.
pub fn build(reg: &Register) -> Partial<Vec<BitfieldModel>, FieldError> {
    let mut accepted: Vec<&RegisterField> = vec![];
    let mut models = vec![];
    let mut skipped = vec![];

    for field in &reg.fields {
        if field.bit_width == 0 {
            warn!(
                "field {}.{} has zero width, skipping",
                reg.name, field.name
            );
            continue;
        }
        let result = build_field(reg, field).and_then(|model| {
            match accepted.iter().find(|other| other.overlaps(field)) {
                Some(other) => Err(FieldError::Overlap {
                    register: reg.name.clone(),
                    field: field.name.clone(),
                    other: other.name.clone(),
                }),
                None => Ok(model),
            }
        });
        match result {
            Ok(model) => {
                accepted.push(field);
                models.push(model);
            }
            Err(e) => {
                warn!("{e}");
                skipped.push(e);
            }
        }
    }

    let models = models
        .into_iter()
        .sorted_by(|a, b| a.shift.cmp(&b.shift).then_with(|| a.field.cmp(&b.field)))
        .collect();
    Partial::new(models, skipped)
}
