//! JSON hand-off of compiled devices to rendering collaborators
use json::JsonValue;

use crate::{
    api::{CompiledDevice, CompiledPeripheral, GENERATOR_ID},
    bitfield::BitfieldModel,
    layout::LayoutSegment,
    model::{DeviceModel, Interrupt, Register},
};

fn segment_to_json(segment: &LayoutSegment) -> JsonValue {
    let mut obj = JsonValue::new_object();
    match segment {
        LayoutSegment::Field(reg) => {
            obj["kind"] = "register".into();
            obj["offset"] = segment.start().into();
            register_to_json(reg, &mut obj);
        }
        LayoutSegment::Filler {
            start_offset,
            length_bytes,
        } => {
            obj["kind"] = "reserved".into();
            obj["offset"] = (*start_offset).into();
            obj["length"] = (*length_bytes).into();
        }
    }
    obj
}

fn register_to_json(reg: &Register, obj: &mut JsonValue) {
    obj["name"] = reg.name.as_str().into();
    obj["description"] = reg.description.clone().into();
    obj["size_bits"] = reg.size.bits().into();
    obj["array_length"] = reg.array_length().into();
    obj["length"] = reg.footprint().into();
    obj["access"] = reg.access.as_str().into();
    obj["reset_value"] = reg.reset_value.into();
    obj["reset_mask"] = reg.reset_mask.into();
}

fn bitfield_to_json(model: &BitfieldModel) -> JsonValue {
    let mut obj = JsonValue::new_object();
    obj["field"] = model.field.as_str().into();
    obj["shift"] = model.shift.into();
    obj["width"] = model.width.into();
    obj["mask"] = model.mask.into();
    obj["access"] = model.access.as_str().into();
    obj["enum"] = model
        .enum_entries
        .iter()
        .map(|(name, value)| {
            let mut entry = JsonValue::new_object();
            entry["name"] = name.as_str().into();
            entry["value"] = (*value).into();
            entry
        })
        .collect::<Vec<_>>()
        .into();
    let mut aliases = JsonValue::new_object();
    for (alias, value) in model.legacy_aliases() {
        aliases[alias.as_str()] = value.into();
    }
    obj["aliases"] = aliases;
    obj
}

fn peripheral_to_json(device: &DeviceModel, compiled: &CompiledPeripheral) -> JsonValue {
    let mut obj = JsonValue::new_object();
    obj["name"] = compiled.name.as_str().into();
    obj["base_address"] = compiled.base_address.into();
    if let Some(periph) = device.peripherals.get(&compiled.name) {
        obj["kind"] = periph.kind.to_string().into();
        obj["description"] = periph.description.clone().into();
        obj["derived_from"] = periph.derived_from.clone().into();
    }
    obj["size"] = compiled.size.into();
    obj["segments"] = compiled
        .segments
        .iter()
        .map(segment_to_json)
        .collect::<Vec<_>>()
        .into();
    let mut bitfields = JsonValue::new_object();
    for (reg, models) in &compiled.bitfields {
        if !models.is_empty() {
            bitfields[reg.as_str()] = models.iter().map(bitfield_to_json).collect::<Vec<_>>().into();
        }
    }
    obj["bitfields"] = bitfields;
    obj
}

fn interrupt_to_json(interrupt: &Interrupt) -> JsonValue {
    let mut obj = JsonValue::new_object();
    obj["name"] = interrupt.name.as_str().into();
    obj["value"] = interrupt.value.into();
    obj["description"] = interrupt.description.clone().into();
    obj
}

/// Serialize a compiled device, including the generator identifier and all diagnostics
pub fn device_to_json(compiled: &CompiledDevice) -> JsonValue {
    let device = &compiled.device;
    let mut obj = JsonValue::new_object();
    obj["generator"] = GENERATOR_ID.into();
    obj["name"] = device.name.as_str().into();
    obj["vendor"] = device.vendor.clone().into();
    obj["family"] = device.family.as_str().into();
    obj["version"] = device.version.clone().into();
    obj["description"] = device.description.clone().into();
    obj["interrupts"] = device
        .interrupts
        .iter()
        .map(interrupt_to_json)
        .collect::<Vec<_>>()
        .into();
    obj["peripherals"] = compiled
        .peripherals
        .values()
        .map(|p| peripheral_to_json(device, p))
        .collect::<Vec<_>>()
        .into();
    obj["diagnostics"] = compiled
        .diagnostics
        .iter()
        .map(|d| JsonValue::from(d.to_string()))
        .collect::<Vec<_>>()
        .into();
    obj
}
