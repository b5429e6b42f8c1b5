//! Exposes functionality supported by this crate
use std::{
    collections::{btree_map::Entry, BTreeMap},
    num::NonZeroUsize,
    path,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread,
};

use itertools::Itertools;
use log::{info, warn};

use crate::{
    bitfield::{self, BitfieldModel},
    catalog::{Catalog, SourceDescriptor},
    error::{Diagnostic, ParseError, PeripheralError, Scope},
    filtering::Filters,
    frontend::svd_xml,
    layout::{self, LayoutSegment},
    model::{DeviceModel, Partial, Peripheral},
};

/// Identifies the generator in the manifests of downstream collaborators
///
/// Depends only on the crate build, never on time or input.
pub const GENERATOR_ID: &str = concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"));

/// A device with the peripherals that could not be parsed
pub type ParsedDevice = Partial<DeviceModel, PeripheralError>;

/// Parse the description at `path`
///
/// # Errors
///
/// - The file cannot be read
/// - The file is not well-formed XML
/// - The device element or its name is missing
///
/// Errors confined to a single peripheral are returned in [`Partial::skipped`] instead.
pub fn parse(path: &path::Path) -> Result<ParsedDevice, ParseError> {
    svd_xml::parse_svd_file(path)
}

/// Parse a description held in memory, `fname` is used in error messages
pub fn parse_str(content: &str, fname: &str) -> Result<ParsedDevice, ParseError> {
    svd_xml::parse_svd_str(content, fname)
}

/// Cooperative cancellation flag shared between a run and whoever may stop it
///
/// Cancelling stops new devices and peripherals from being started. Work already in progress
/// completes.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Layout and accessor metadata of one peripheral
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompiledPeripheral {
    pub name: String,
    pub base_address: u64,
    pub segments: Vec<LayoutSegment>,
    /// Size of the register block in bytes, including trailing filler
    pub size: u64,
    /// Accepted fields per register name
    pub bitfields: BTreeMap<String, Vec<BitfieldModel>>,
}

/// A device with every peripheral that passed layout
#[derive(Debug)]
pub struct CompiledDevice {
    pub device: DeviceModel,
    pub peripherals: BTreeMap<String, CompiledPeripheral>,
    /// Everything that was skipped, attributed to the smallest scope
    pub diagnostics: Vec<Diagnostic>,
    /// Set when the run was cancelled before every peripheral was compiled
    pub cancelled: bool,
}

fn compile_peripheral(
    periph: &Peripheral,
    scope: &Scope,
    diagnostics: &mut Vec<Diagnostic>,
) -> Option<CompiledPeripheral> {
    let scope = scope.clone().peripheral(&periph.name);
    let segments = match layout::layout(periph) {
        Ok(segments) => segments,
        Err(e) => {
            diagnostics.push(Diagnostic::new(scope, e));
            return None;
        }
    };

    let mut bitfields = BTreeMap::new();
    for reg in &periph.registers {
        let built = bitfield::build(reg);
        diagnostics.extend(built.skipped.into_iter().map(|e| {
            let scope = scope.clone().register(&reg.name).field(e.field());
            Diagnostic::new(scope, e)
        }));
        match bitfields.entry(reg.name.clone()) {
            Entry::Vacant(entry) => {
                entry.insert(built.value);
            }
            Entry::Occupied(_) => warn!(
                "{}: register name {} is declared again at offset {:#x}, keeping the fields of the first declaration",
                periph.name, reg.name, reg.offset
            ),
        }
    }

    Some(CompiledPeripheral {
        name: periph.name.clone(),
        base_address: periph.base_address,
        size: layout::total_size(&segments),
        segments,
        bitfields,
    })
}

/// Compile a parsed device
///
/// A peripheral whose registers overlap is absent from the result and reported in
/// [`CompiledDevice::diagnostics`], its siblings are still compiled.
pub fn compile_parsed(parsed: ParsedDevice, cancel: &CancelToken) -> CompiledDevice {
    let Partial {
        value: device,
        skipped,
    } = parsed;
    let scope = Scope::device(&device.name);
    let mut diagnostics = skipped
        .into_iter()
        .map(|e| Diagnostic::new(scope.clone().peripheral(&e.peripheral), e))
        .collect_vec();

    let mut peripherals = BTreeMap::new();
    let mut cancelled = false;
    for periph in device.peripherals.values() {
        if cancel.is_cancelled() {
            warn!("{}: cancelled before peripheral {}", device.name, periph.name);
            cancelled = true;
            break;
        }
        if let Some(compiled) = compile_peripheral(periph, &scope, &mut diagnostics) {
            peripherals.insert(compiled.name.clone(), compiled);
        }
    }

    info!(
        "Compiled {}: {} of {} peripherals, {} diagnostics",
        device.name,
        peripherals.len(),
        device.peripherals.len(),
        diagnostics.len()
    );
    CompiledDevice {
        device,
        peripherals,
        diagnostics,
        cancelled,
    }
}

/// Parse and compile the description selected for one device
///
/// # Errors
///
/// - The description is unusable as a whole, see [`parse`]
pub fn compile_device(
    desc: &SourceDescriptor,
    cancel: &CancelToken,
) -> Result<CompiledDevice, ParseError> {
    let parsed = parse(&desc.path)?;
    if parsed.value.name != desc.device_name {
        warn!(
            "{} declares device {} but was catalogued as {}",
            desc.path.display(),
            parsed.value.name,
            desc.device_name
        );
    }
    Ok(compile_parsed(parsed, cancel))
}

/// Outcome of compiling a catalog
#[derive(Debug, Default)]
pub struct RunReport {
    /// Compiled devices in device name order
    pub devices: Vec<CompiledDevice>,
    /// Devices whose description was unusable
    pub failed: Vec<(String, ParseError)>,
    /// Set when the run stopped early
    pub cancelled: bool,
}

impl RunReport {
    /// All diagnostics of all devices
    pub fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.devices.iter().flat_map(|d| d.diagnostics.iter())
    }

    fn push(&mut self, name: &str, result: Result<CompiledDevice, ParseError>) {
        match result {
            Ok(device) => {
                self.cancelled |= device.cancelled;
                self.devices.push(device);
            }
            Err(e) => {
                warn!("{name}: {e}");
                self.failed.push((name.to_owned(), e));
            }
        }
    }
}

/// Compile every device of `catalog` selected by `filters`, one after another
pub fn compile_catalog(catalog: &Catalog, filters: &Filters, cancel: &CancelToken) -> RunReport {
    let mut report = RunReport::default();
    for desc in catalog.filter(filters) {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }
        report.push(&desc.device_name, compile_device(desc, cancel));
    }
    info!(
        "Compiled {} devices, {} failed",
        report.devices.len(),
        report.failed.len()
    );
    report
}

/// Like [`compile_catalog`], spreading devices over `jobs` threads
///
/// Each thread owns the devices it parses. The report is ordered as [`compile_catalog`] orders it.
pub fn compile_catalog_parallel(
    catalog: &Catalog,
    filters: &Filters,
    cancel: &CancelToken,
    jobs: NonZeroUsize,
) -> RunReport {
    let selected = catalog.filter(filters).collect_vec();
    let next = AtomicUsize::new(0);

    let mut results = thread::scope(|s| {
        let workers = (0..jobs.get().min(selected.len()))
            .map(|_| {
                s.spawn(|| {
                    let mut done = vec![];
                    while !cancel.is_cancelled() {
                        let idx = next.fetch_add(1, Ordering::SeqCst);
                        let Some(desc) = selected.get(idx) else {
                            break;
                        };
                        done.push((idx, compile_device(desc, cancel)));
                    }
                    done
                })
            })
            .collect_vec();
        workers
            .into_iter()
            .flat_map(|w| match w.join() {
                Ok(done) => done,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect_vec()
    });
    results.sort_by_key(|(idx, _)| *idx);

    let mut report = RunReport {
        cancelled: results.len() < selected.len(),
        ..Default::default()
    };
    for (idx, result) in results {
        report.push(&selected[idx].device_name, result);
    }
    info!(
        "Compiled {} devices on {jobs} threads, {} failed",
        report.devices.len(),
        report.failed.len()
    );
    report
}

#[cfg(test)]
mod tests {
    use std::fs;

    use indoc::indoc;

    use super::*;
    use crate::{
        catalog::{CatalogConfig, Origin},
        error::ErrorKind,
    };

    const DEVICE: &str = indoc! {r#"
        <device>
          <name>DEV</name>
          <size>32</size>
          <access>read-write</access>
          <peripherals>
            <peripheral>
              <name>BROKEN</name>
              <baseAddress>0x40000000</baseAddress>
              <registers>
                <register><name>A</name><addressOffset>0x4</addressOffset></register>
                <register><name>B</name><addressOffset>0x4</addressOffset></register>
              </registers>
            </peripheral>
            <peripheral>
              <name>TC0</name>
              <baseAddress>0x40080000</baseAddress>
              <registers>
                <register>
                  <name>CMR</name>
                  <addressOffset>0x0</addressOffset>
                  <size>8</size>
                  <fields>
                    <field>
                      <name>MODE</name>
                      <bitOffset>4</bitOffset>
                      <bitWidth>3</bitWidth>
                      <enumeratedValues>
                        <enumeratedValue><name>A</name><value>0</value></enumeratedValue>
                        <enumeratedValue><name>B</name><value>1</value></enumeratedValue>
                        <enumeratedValue><name>C</name><value>5</value></enumeratedValue>
                        <enumeratedValue><name>D</name><value>8</value></enumeratedValue>
                      </enumeratedValues>
                    </field>
                    <field><name>EN</name><bitOffset>0</bitOffset><bitWidth>1</bitWidth></field>
                  </fields>
                </register>
                <register><name>RA</name><addressOffset>0x10</addressOffset></register>
              </registers>
            </peripheral>
          </peripherals>
        </device>
    "#};

    #[test]
    fn generator_id_is_stable() {
        assert_eq!(
            GENERATOR_ID,
            format!("svdlayout {}", env!("CARGO_PKG_VERSION"))
        );
    }

    #[test]
    fn overlap_fails_only_its_peripheral() {
        let compiled = compile_parsed(parse_str(DEVICE, "dev.svd").unwrap(), &CancelToken::new());
        assert!(!compiled.peripherals.contains_key("BROKEN"));
        let tc0 = &compiled.peripherals["TC0"];
        assert_eq!(tc0.size, 0x14);
        assert_eq!(tc0.segments.len(), 3);
        assert_eq!(
            tc0.segments[1],
            LayoutSegment::Filler {
                start_offset: 1,
                length_bytes: 0xF
            }
        );

        let kinds = compiled
            .diagnostics
            .iter()
            .map(|d| (d.kind(), d.scope.to_string()))
            .collect_vec();
        assert_eq!(
            kinds,
            [
                (ErrorKind::OverlapDetected, "DEV/BROKEN".to_owned()),
                (ErrorKind::EnumValueOutOfRange, "DEV/TC0/CMR/MODE".to_owned()),
            ]
        );
    }

    #[test]
    fn failed_field_keeps_its_register() {
        let compiled = compile_parsed(parse_str(DEVICE, "dev.svd").unwrap(), &CancelToken::new());
        let cmr = &compiled.peripherals["TC0"].bitfields["CMR"];
        assert_eq!(cmr.iter().map(|b| b.field.as_str()).collect_vec(), ["EN"]);
        assert!(compiled.peripherals["TC0"].bitfields["RA"].is_empty());
    }

    #[test]
    fn repeated_register_name_keeps_first_fields() {
        use crate::model::{Access, Register, RegisterField, RegisterSize};

        let mut periph = Peripheral::new("TC0", 0x4008_0000);
        periph.registers = vec![
            Register::new("CTRL", 0x0, RegisterSize::U32, Access::ReadWrite)
                .with_fields(vec![RegisterField::new("EN", 0, 1)]),
            Register::new("CTRL", 0x4, RegisterSize::U32, Access::ReadWrite)
                .with_fields(vec![RegisterField::new("MODE", 4, 2)]),
        ];
        let mut diagnostics = vec![];
        let compiled =
            compile_peripheral(&periph, &Scope::device("DEV"), &mut diagnostics).unwrap();
        assert!(diagnostics.is_empty());
        assert_eq!(compiled.segments.len(), 2);
        let ctrl = &compiled.bitfields["CTRL"];
        assert_eq!(ctrl.iter().map(|b| b.field.as_str()).collect_vec(), ["EN"]);
    }

    #[test]
    fn cancellation_stops_before_next_peripheral() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let compiled = compile_parsed(parse_str(DEVICE, "dev.svd").unwrap(), &cancel);
        assert!(compiled.cancelled);
        assert!(compiled.peripherals.is_empty());
    }

    fn catalog_with_devices(dir: &path::Path) -> Catalog {
        fs::write(dir.join("dev.svd"), DEVICE).unwrap();
        fs::write(
            dir.join("other.svd"),
            DEVICE.replace("<name>DEV</name>", "<name>OTHER</name>"),
        )
        .unwrap();
        fs::write(
            dir.join("nameless.svd"),
            "<device><name>NOPERIPHS</name><peripherals/><peripherals/></device>",
        )
        .unwrap();
        Catalog::discover(&CatalogConfig::new().local_dir(dir))
    }

    #[test]
    fn compile_catalog_collects_failures() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog_with_devices(dir.path());
        assert_eq!(catalog.get("DEV").unwrap().origin, Origin::Local);

        let report = compile_catalog(&catalog, &Filters::all(), &CancelToken::new());
        assert!(!report.cancelled);
        assert_eq!(
            report.devices.iter().map(|d| d.device.name.as_str()).collect_vec(),
            ["DEV", "OTHER"]
        );
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "NOPERIPHS");
        assert_eq!(report.failed[0].1.kind(), ErrorKind::MalformedInput);
        assert_eq!(report.diagnostics().count(), 4);
    }

    #[test]
    fn parallel_run_matches_sequential() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog_with_devices(dir.path());
        let cancel = CancelToken::new();
        let sequential = compile_catalog(&catalog, &Filters::all(), &cancel);
        let parallel = compile_catalog_parallel(
            &catalog,
            &Filters::all(),
            &cancel,
            NonZeroUsize::new(4).unwrap(),
        );
        assert!(!parallel.cancelled);
        assert_eq!(
            parallel.devices.iter().map(|d| &d.peripherals).collect_vec(),
            sequential.devices.iter().map(|d| &d.peripherals).collect_vec()
        );
        assert_eq!(parallel.failed.len(), sequential.failed.len());
    }

    #[test]
    fn cancelled_catalog_run_starts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog_with_devices(dir.path());
        let cancel = CancelToken::new();
        cancel.cancel();
        let report = compile_catalog(&catalog, &Filters::all(), &cancel);
        assert!(report.cancelled);
        assert!(report.devices.is_empty());
        let report =
            compile_catalog_parallel(&catalog, &Filters::all(), &cancel, NonZeroUsize::MIN);
        assert!(report.cancelled);
        assert!(report.devices.is_empty());
    }
}
