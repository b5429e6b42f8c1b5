use std::{env, io, num::NonZeroUsize, path, thread};

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use regex::Regex;
use svdlayout::{ItemFilter, LayoutSegment};

#[derive(Parser)]
#[command(version, about, long_about = None, author = clap::crate_authors!(), subcommand_required = true)]
struct Cli {
    /// Directory of vendor-supplied CMSIS-SVD files
    #[arg(long, required_unless_present = "local")]
    upstream: Option<String>,

    /// Directory of curated CMSIS-SVD files that take priority over upstream ones
    #[arg(long)]
    local: Option<String>,

    /// How declared versions take part in choosing between descriptions of the same device
    #[arg(long = "version-policy", default_value = VersionPolicy(svdlayout::VersionPolicy::Disabled))]
    version_policy: VersionPolicy,

    /// Only select devices whose name matches the regex
    #[arg(long)]
    device: Option<String>,

    /// Only select devices whose vendor matches the regex
    #[arg(long)]
    vendor: Option<String>,

    /// Only select devices whose series (or name) matches the regex
    #[arg(long)]
    family: Option<String>,

    #[command(flatten)]
    verbose: Verbosity<WarnLevel>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// List the selected description of every device, followed by the resolved conflicts
    LsDevices,
    /// Compile every selected device without emitting anything
    DryRun {
        /// Number of devices compiled in parallel
        #[arg(short, long)]
        jobs: Option<NonZeroUsize>,
    },
    /// Print the layout of one peripheral
    Layout {
        #[arg(long, required = true)]
        device: String,
        #[arg(long, required = true)]
        peripheral: String,
    },
    /// Print the compiled device as JSON
    Dump {
        #[arg(long, required = true)]
        device: String,
    },
}

#[derive(Clone)]
struct VersionPolicy(svdlayout::VersionPolicy);

impl From<VersionPolicy> for clap::builder::OsStr {
    fn from(value: VersionPolicy) -> Self {
        match value.0 {
            svdlayout::VersionPolicy::Disabled => "disabled".into(),
            svdlayout::VersionPolicy::Lexicographic => "lexicographic".into(),
            svdlayout::VersionPolicy::Numeric => "numeric".into(),
        }
    }
}

impl ValueEnum for VersionPolicy {
    fn value_variants<'a>() -> &'a [Self] {
        &[
            Self(svdlayout::VersionPolicy::Disabled),
            Self(svdlayout::VersionPolicy::Lexicographic),
            Self(svdlayout::VersionPolicy::Numeric),
        ]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        use clap::builder::PossibleValue;
        match self.0 {
            svdlayout::VersionPolicy::Disabled => Some(PossibleValue::new("disabled")),
            svdlayout::VersionPolicy::Lexicographic => Some(PossibleValue::new("lexicographic")),
            svdlayout::VersionPolicy::Numeric => Some(PossibleValue::new("numeric")),
        }
    }
}

fn string_to_path(s: &str) -> Result<path::PathBuf, io::Error> {
    env::current_dir()?
        .join(s)
        // Canonicalize paths for clear output
        .canonicalize()
}

fn get_catalog_config(cli: &Cli) -> anyhow::Result<svdlayout::CatalogConfig> {
    let mut config = svdlayout::CatalogConfig::new().version_policy(cli.version_policy.0);
    if let Some(dir) = &cli.upstream {
        let dir = string_to_path(dir).with_context(|| format!("cannot access upstream {dir}"))?;
        config = config.upstream_dir(dir);
    }
    if let Some(dir) = &cli.local {
        let dir = string_to_path(dir).with_context(|| format!("cannot access local {dir}"))?;
        config = config.local_dir(dir);
    }
    Ok(config)
}

fn regex_filter(pattern: Option<&String>) -> anyhow::Result<Option<ItemFilter<String>>> {
    pattern
        .map(|p| {
            Regex::new(p)
                .map(|re| ItemFilter::regex(Some(re), None))
                .with_context(|| format!("invalid filter {p:?}"))
        })
        .transpose()
}

fn get_filters(cli: &Cli) -> anyhow::Result<svdlayout::Filters> {
    Ok(svdlayout::Filters::from_filters(
        regex_filter(cli.device.as_ref())?,
        regex_filter(cli.vendor.as_ref())?,
        regex_filter(cli.family.as_ref())?,
    ))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(cli.verbose.log_level_filter())
        .init();

    let catalog = svdlayout::Catalog::discover(&get_catalog_config(&cli)?);
    let filters = get_filters(&cli)?;
    let cancel = svdlayout::CancelToken::new();

    if let Some(cmd) = &cli.command {
        match cmd {
            Command::LsDevices => ls_devices(&catalog, &filters),
            Command::DryRun { jobs } => dry_run(&catalog, &filters, &cancel, *jobs),
            Command::Layout { device, peripheral } => {
                print_layout(&catalog, device, peripheral, &cancel)?
            }
            Command::Dump { device } => {
                let compiled = compile_one(&catalog, device, &cancel)?;
                println!("{}", svdlayout::export::device_to_json(&compiled).pretty(2));
            }
        }
    } else {
        println!("Nothing to do. Please issue a subcommand.")
    }

    Ok(())
}

fn ls_devices(catalog: &svdlayout::Catalog, filters: &svdlayout::Filters) {
    let selected = catalog.filter(filters).collect::<Vec<_>>();
    if selected.is_empty() {
        println!("svdlayout: no devices found in input");
        return;
    }
    let longest = selected
        .iter()
        .map(|d| d.device_name.len())
        .max()
        .unwrap_or_default();
    for desc in selected {
        println!(
            "{: <longest$} {: <8} {: <10} {}",
            desc.device_name,
            desc.origin.to_string(),
            desc.version.as_deref().unwrap_or("-"),
            desc.path.display()
        );
    }
    for conflict in catalog.conflicts() {
        println!(
            "conflict: {}: kept {} over {} by {}",
            conflict.device_name,
            conflict.winner.path.display(),
            conflict.loser.path.display(),
            conflict.resolution
        );
    }
    for skipped in catalog.skipped() {
        println!("skipped: [{}] {skipped}", skipped.kind());
    }
}

fn dry_run(
    catalog: &svdlayout::Catalog,
    filters: &svdlayout::Filters,
    cancel: &svdlayout::CancelToken,
    jobs: Option<NonZeroUsize>,
) {
    let jobs = jobs
        .or_else(|| thread::available_parallelism().ok())
        .unwrap_or(NonZeroUsize::MIN);
    let report = svdlayout::compile_catalog_parallel(catalog, filters, cancel, jobs);
    for diagnostic in report.diagnostics() {
        println!("{diagnostic}");
    }
    for (device, err) in &report.failed {
        println!("[{}] {device}: {err}", err.kind());
    }
    let peripherals: usize = report.devices.iter().map(|d| d.peripherals.len()).sum();
    println!(
        "svdlayout: compiled {} devices ({peripherals} peripherals), {} failed, {} diagnostics",
        report.devices.len(),
        report.failed.len(),
        report.diagnostics().count()
    );
}

fn compile_one(
    catalog: &svdlayout::Catalog,
    device: &str,
    cancel: &svdlayout::CancelToken,
) -> anyhow::Result<svdlayout::CompiledDevice> {
    let desc = catalog
        .get(device)
        .ok_or_else(|| anyhow!("device {device} was not found in the catalog"))?;
    svdlayout::compile_device(desc, cancel)
        .with_context(|| format!("could not compile {}", desc.path.display()))
}

fn print_layout(
    catalog: &svdlayout::Catalog,
    device: &str,
    peripheral: &str,
    cancel: &svdlayout::CancelToken,
) -> anyhow::Result<()> {
    let compiled = compile_one(catalog, device, cancel)?;
    for diagnostic in compiled
        .diagnostics
        .iter()
        .filter(|d| d.scope.peripheral.as_deref() == Some(peripheral))
    {
        println!("{diagnostic}");
    }
    let periph = compiled
        .peripherals
        .get(peripheral)
        .ok_or_else(|| anyhow!("peripheral {peripheral} has no layout in device {device}"))?;

    println!(
        "{} @ {:#010x}, {:#x} bytes",
        periph.name, periph.base_address, periph.size
    );
    for segment in &periph.segments {
        match segment {
            LayoutSegment::Field(reg) => {
                let name = if reg.is_array() {
                    format!("{}[{}]", reg.name, reg.array_length())
                } else {
                    reg.name.clone()
                };
                println!(
                    "{:#06x} {:>5} {name: <24} {} {}",
                    segment.start(),
                    segment.len(),
                    reg.size,
                    reg.access.as_str()
                );
            }
            LayoutSegment::Filler { .. } => {
                println!("{:#06x} {:>5} <reserved>", segment.start(), segment.len());
            }
        }
    }
    Ok(())
}
