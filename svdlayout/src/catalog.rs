//! Discovery of description files and selection of one authoritative description per device
use std::{
    cmp::Ordering,
    collections::{btree_map::Entry, BTreeMap},
    ffi::OsStr,
    path,
};

use itertools::Itertools;
use log::{debug, info, warn};
use roxmltree::Document;
use walkdir::WalkDir;

use crate::{error::CatalogError, filtering::Filters, util};

/// Which tree a description was found in
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Origin {
    /// Bulk tree of vendor-supplied descriptions
    Upstream,
    /// Curated tree of hand-fixed descriptions
    Local,
}

impl Origin {
    #[must_use]
    pub const fn priority(self) -> u8 {
        match self {
            Self::Upstream => 1,
            Self::Local => 2,
        }
    }
}

/// One candidate description of a device
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceDescriptor {
    pub device_name: String,
    pub path: path::PathBuf,
    pub origin: Origin,
    pub priority: u8,
    pub vendor: Option<String>,
    /// Declared `<series>`
    pub family: Option<String>,
    pub version: Option<String>,
}

impl SourceDescriptor {
    /// Read the header of the description at `path`
    ///
    /// Only the device-level elements are inspected. Peripherals are parsed later, by whoever
    /// requests the device.
    pub fn from_file(path: &path::Path, origin: Origin) -> Result<Self, CatalogError> {
        let content = util::read_file(path).map_err(|source| CatalogError::Io {
            path: path.to_owned(),
            source,
        })?;
        let doc = Document::parse(&content).map_err(|source| CatalogError::MalformedXml {
            path: path.to_owned(),
            source,
        })?;
        let root = doc.root_element();
        let text_of = |tag: &str| {
            root.children()
                .find(|n| n.has_tag_name(tag))
                .and_then(|n| n.text())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
        };
        let device_name = root
            .has_tag_name("device")
            .then(|| text_of("name"))
            .flatten()
            .ok_or_else(|| CatalogError::MissingDeviceName {
                path: path.to_owned(),
            })?;

        Ok(Self {
            device_name,
            path: path.to_owned(),
            origin,
            priority: origin.priority(),
            vendor: text_of("vendor"),
            family: text_of("series"),
            version: text_of("version"),
        })
    }

    /// Declared `<series>`, or the device name when there is none
    pub fn family_or_name(&self) -> &str {
        self.family.as_deref().unwrap_or(&self.device_name)
    }
}

/// How declared versions take part in conflict resolution
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "lowercase")]
pub enum VersionPolicy {
    /// Only origin priority is considered
    #[default]
    Disabled,
    /// The lexicographically greater version wins regardless of origin
    Lexicographic,
    /// Like `Lexicographic` but dot-separated numeric components are compared as integers
    Numeric,
}

impl VersionPolicy {
    /// Compare two declared versions
    ///
    /// Returns `None` when the policy is disabled.
    pub fn compare(self, a: &str, b: &str) -> Option<Ordering> {
        match self {
            Self::Disabled => None,
            Self::Lexicographic => Some(a.cmp(b)),
            Self::Numeric => Some(compare_numeric(a, b)),
        }
    }
}

fn compare_numeric(a: &str, b: &str) -> Ordering {
    let mut a_parts = a.split('.');
    let mut b_parts = b.split('.');
    loop {
        match (a_parts.next(), b_parts.next()) {
            (None, None) => return Ordering::Equal,
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (Some(x), Some(y)) => {
                let ord = match (x.trim().parse::<u64>(), y.trim().parse::<u64>()) {
                    (Ok(x), Ok(y)) => x.cmp(&y),
                    _ => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

#[test]
fn numeric_versions_compare_by_component() {
    use Ordering::*;
    assert_eq!(compare_numeric("10", "9"), Greater);
    assert_eq!(compare_numeric("1.10", "1.9"), Greater);
    assert_eq!(compare_numeric("1.0", "1.0"), Equal);
    assert_eq!(compare_numeric("1.0.1", "1.0"), Greater);
    assert_eq!(compare_numeric("1.0a", "1.0b"), Less);
    assert_eq!(VersionPolicy::Lexicographic.compare("9", "10"), Some(Greater));
    assert_eq!(VersionPolicy::Disabled.compare("9", "10"), None);
}

/// Where to look for descriptions and how to choose between them
#[derive(Clone, Debug, Default)]
pub struct CatalogConfig {
    upstream_dir: Option<path::PathBuf>,
    local_dir: Option<path::PathBuf>,
    version_policy: VersionPolicy,
}

impl CatalogConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn upstream_dir(mut self, dir: impl Into<path::PathBuf>) -> Self {
        self.upstream_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn local_dir(mut self, dir: impl Into<path::PathBuf>) -> Self {
        self.local_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn version_policy(mut self, version_policy: VersionPolicy) -> Self {
        self.version_policy = version_policy;
        self
    }
}

/// What decided a conflict
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Resolution {
    /// Declared versions differed under an active version policy
    Version,
    /// Origins differed
    Priority,
    /// Neither decided, the smaller path wins
    Path,
}

/// Two descriptions of the same device, and which one was kept
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Conflict {
    pub device_name: String,
    pub winner: SourceDescriptor,
    pub loser: SourceDescriptor,
    pub resolution: Resolution,
}

/// Decide which of two descriptions of one device is authoritative
fn resolve(
    a: SourceDescriptor,
    b: SourceDescriptor,
    policy: VersionPolicy,
) -> (SourceDescriptor, SourceDescriptor, Resolution) {
    let by_version = match (&a.version, &b.version) {
        (Some(va), Some(vb)) => policy.compare(va, vb).filter(|ord| ord.is_ne()),
        _ => None,
    };
    let (ord, resolution) = if let Some(ord) = by_version {
        (ord, Resolution::Version)
    } else if a.priority != b.priority {
        (a.priority.cmp(&b.priority), Resolution::Priority)
    } else {
        // The smaller path is preferred
        (b.path.cmp(&a.path), Resolution::Path)
    };
    if ord.is_ge() {
        (a, b, resolution)
    } else {
        (b, a, resolution)
    }
}

/// The authoritative description of every discovered device
///
/// Constructed once per run. Read-only afterwards, and safe to share by reference.
#[derive(Debug, Default)]
pub struct Catalog {
    entries: BTreeMap<String, SourceDescriptor>,
    conflicts: Vec<Conflict>,
    skipped: Vec<CatalogError>,
}

impl Catalog {
    /// Scan the configured trees
    ///
    /// Unreadable and invalid files are recorded in [`Catalog::skipped`] and do not stop the scan.
    pub fn discover(config: &CatalogConfig) -> Self {
        let mut candidates = vec![];
        let mut skipped = vec![];
        for (dir, origin) in [
            (&config.upstream_dir, Origin::Upstream),
            (&config.local_dir, Origin::Local),
        ] {
            let Some(dir) = dir else { continue };
            let (found, errors) = scan_tree(dir, origin);
            info!(
                "Found {} {origin} descriptions in {}",
                found.len(),
                dir.display()
            );
            candidates.extend(found);
            skipped.extend(errors);
        }

        let mut catalog = Self::from_descriptors(candidates, config.version_policy);
        catalog.skipped = skipped;
        catalog
    }

    /// Build a catalog from already read descriptors
    ///
    /// The selection does not depend on the order of `descriptors`.
    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = SourceDescriptor>,
        policy: VersionPolicy,
    ) -> Self {
        let mut entries: BTreeMap<String, SourceDescriptor> = BTreeMap::new();
        let mut conflicts = vec![];
        // Pairwise resolution is not transitive over mixed versioned and unversioned candidates,
        // so candidates are folded in a canonical order: higher priority first, then by path
        let descriptors = descriptors.into_iter().sorted_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.path.cmp(&b.path))
        });
        for candidate in descriptors {
            match entries.entry(candidate.device_name.clone()) {
                Entry::Vacant(entry) => {
                    entry.insert(candidate);
                }
                Entry::Occupied(mut entry) => {
                    let current = entry.get().clone();
                    let (winner, loser, resolution) = resolve(current, candidate, policy);
                    debug!(
                        "{}: {} ({}, version {:?}) supersedes {} ({}, version {:?}) by {resolution}",
                        winner.device_name,
                        winner.path.display(),
                        winner.origin,
                        winner.version,
                        loser.path.display(),
                        loser.origin,
                        loser.version,
                    );
                    entry.insert(winner.clone());
                    conflicts.push(Conflict {
                        device_name: winner.device_name.clone(),
                        winner,
                        loser,
                        resolution,
                    });
                }
            }
        }
        Self {
            entries,
            conflicts,
            skipped: vec![],
        }
    }

    pub fn get(&self, device_name: &str) -> Option<&SourceDescriptor> {
        self.entries.get(device_name)
    }

    /// Selected descriptors ordered by device name
    pub fn iter(&self) -> impl Iterator<Item = &SourceDescriptor> {
        self.entries.values()
    }

    /// Selected descriptors accepted by `filters`
    pub fn filter<'a>(
        &'a self,
        filters: &'a Filters,
    ) -> impl Iterator<Item = &'a SourceDescriptor> + 'a {
        self.iter().filter(|desc| filters.is_selected(desc))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn conflicts(&self) -> &[Conflict] {
        &self.conflicts
    }

    /// Files that were not considered, with the reason
    pub fn skipped(&self) -> &[CatalogError] {
        &self.skipped
    }
}

fn is_description_file(path: &path::Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| ext.eq_ignore_ascii_case("svd") || ext.eq_ignore_ascii_case("xml"))
}

/// Read the header of every description file below `root`, in file name order
fn scan_tree(
    root: &path::Path,
    origin: Origin,
) -> (Vec<SourceDescriptor>, Vec<CatalogError>) {
    let mut found = vec![];
    let mut errors = vec![];
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(source) => {
                let err = CatalogError::Walk {
                    root: root.to_owned(),
                    source,
                };
                warn!("{err}");
                errors.push(err);
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_description_file(entry.path()) {
            continue;
        }
        match SourceDescriptor::from_file(entry.path(), origin) {
            Ok(desc) => found.push(desc),
            Err(err) => {
                warn!("skipping description: {err}");
                errors.push(err);
            }
        }
    }
    (found, errors)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::error::ErrorKind;

    fn write_device(dir: &path::Path, file: &str, name: &str, version: Option<&str>) {
        let version = version
            .map(|v| format!("<version>{v}</version>"))
            .unwrap_or_default();
        fs::write(
            dir.join(file),
            format!(
                "<device><vendor>Atmel</vendor><name>{name}</name>{version}<peripherals/></device>"
            ),
        )
        .unwrap();
    }

    fn trees() -> (tempfile::TempDir, tempfile::TempDir) {
        (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap())
    }

    #[test]
    fn local_wins_without_version_policy() {
        let (upstream, local) = trees();
        write_device(upstream.path(), "ATSAM3X8E.svd", "ATSAM3X8E", Some("1.0"));
        write_device(local.path(), "ATSAM3X8E.svd", "ATSAM3X8E", Some("1.0"));

        let catalog = Catalog::discover(
            &CatalogConfig::new()
                .upstream_dir(upstream.path())
                .local_dir(local.path()),
        );
        assert_eq!(catalog.len(), 1);
        let selected = catalog.get("ATSAM3X8E").unwrap();
        assert_eq!(selected.origin, Origin::Local);
        assert_eq!(selected.priority, 2);
        assert_eq!(selected.vendor.as_deref(), Some("Atmel"));

        let conflicts = catalog.conflicts();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].loser.origin, Origin::Upstream);
        assert_eq!(conflicts[0].resolution, Resolution::Priority);
    }

    #[test]
    fn local_wins_over_newer_upstream_when_policy_disabled() {
        let (upstream, local) = trees();
        write_device(upstream.path(), "dev.svd", "DEV", Some("2.0"));
        write_device(local.path(), "dev.svd", "DEV", Some("1.0"));
        let catalog = Catalog::discover(
            &CatalogConfig::new()
                .upstream_dir(upstream.path())
                .local_dir(local.path()),
        );
        assert_eq!(catalog.get("DEV").unwrap().origin, Origin::Local);
    }

    #[test]
    fn version_policy_overrides_origin() {
        let (upstream, local) = trees();
        write_device(upstream.path(), "dev.svd", "DEV", Some("9"));
        write_device(local.path(), "dev.svd", "DEV", Some("10"));
        let config = CatalogConfig::new()
            .upstream_dir(upstream.path())
            .local_dir(local.path());

        // "9" sorts after "10" as text
        let lexicographic =
            Catalog::discover(&config.clone().version_policy(VersionPolicy::Lexicographic));
        let selected = lexicographic.get("DEV").unwrap();
        assert_eq!(selected.origin, Origin::Upstream);
        assert_eq!(lexicographic.conflicts()[0].resolution, Resolution::Version);

        let numeric = Catalog::discover(&config.version_policy(VersionPolicy::Numeric));
        assert_eq!(numeric.get("DEV").unwrap().version.as_deref(), Some("10"));
    }

    #[test]
    fn missing_version_falls_back_to_priority() {
        let (upstream, local) = trees();
        write_device(upstream.path(), "dev.svd", "DEV", Some("3.0"));
        write_device(local.path(), "dev.svd", "DEV", None);
        let catalog = Catalog::discover(
            &CatalogConfig::new()
                .upstream_dir(upstream.path())
                .local_dir(local.path())
                .version_policy(VersionPolicy::Lexicographic),
        );
        assert_eq!(catalog.get("DEV").unwrap().origin, Origin::Local);
    }

    #[test]
    fn equal_priority_prefers_smaller_path() {
        let upstream = tempfile::tempdir().unwrap();
        fs::create_dir(upstream.path().join("b")).unwrap();
        write_device(upstream.path(), "a.svd", "DEV", None);
        write_device(&upstream.path().join("b"), "z.svd", "DEV", None);

        let catalog = Catalog::discover(&CatalogConfig::new().upstream_dir(upstream.path()));
        let selected = catalog.get("DEV").unwrap();
        assert_eq!(selected.path, upstream.path().join("a.svd"));
        assert_eq!(catalog.conflicts()[0].resolution, Resolution::Path);
    }

    #[test]
    fn invalid_files_are_skipped() {
        let upstream = tempfile::tempdir().unwrap();
        write_device(upstream.path(), "good.SVD", "GOOD", None);
        fs::write(upstream.path().join("broken.svd"), "<device><name>X</name>").unwrap();
        fs::write(upstream.path().join("nameless.xml"), "<device></device>").unwrap();
        fs::write(upstream.path().join("README.md"), "not a description").unwrap();

        let catalog = Catalog::discover(&CatalogConfig::new().upstream_dir(upstream.path()));
        assert_eq!(catalog.iter().map(|d| d.device_name.as_str()).collect::<Vec<_>>(), ["GOOD"]);
        let mut kinds = catalog.skipped().iter().map(|e| e.kind()).collect::<Vec<_>>();
        kinds.sort_by_key(|k| k.to_string());
        assert_eq!(kinds, [ErrorKind::MalformedInput, ErrorKind::MissingField]);
    }

    #[test]
    fn missing_root_is_reported() {
        let upstream = tempfile::tempdir().unwrap();
        let catalog = Catalog::discover(
            &CatalogConfig::new().upstream_dir(upstream.path().join("does-not-exist")),
        );
        assert!(catalog.is_empty());
        assert_eq!(catalog.skipped().len(), 1);
        assert_eq!(catalog.skipped()[0].kind(), ErrorKind::CatalogIo);
    }

    #[test]
    fn selection_is_independent_of_input_order() {
        let desc = |path: &str, origin: Origin, version: &str| SourceDescriptor {
            device_name: "DEV".to_owned(),
            path: path.into(),
            origin,
            priority: origin.priority(),
            vendor: None,
            family: None,
            version: Some(version.to_owned()),
        };
        let candidates = vec![
            desc("u/dev.svd", Origin::Upstream, "1.0"),
            desc("l/dev.svd", Origin::Local, "1.0"),
            desc("l/dev2.svd", Origin::Local, "1.0"),
        ];
        let forward = Catalog::from_descriptors(candidates.clone(), VersionPolicy::Disabled);
        let backward =
            Catalog::from_descriptors(candidates.into_iter().rev(), VersionPolicy::Disabled);
        assert_eq!(forward.get("DEV"), backward.get("DEV"));
        assert_eq!(
            forward.get("DEV").unwrap().path,
            path::PathBuf::from("l/dev.svd")
        );
    }

    #[test]
    fn mixed_versions_select_the_same_winner_in_any_order() {
        let desc = |path: &str, origin: Origin, version: Option<&str>| SourceDescriptor {
            device_name: "DEV".to_owned(),
            path: path.into(),
            origin,
            priority: origin.priority(),
            vendor: None,
            family: None,
            version: version.map(str::to_owned),
        };
        let candidates = vec![
            desc("l/b.svd", Origin::Local, None),
            desc("u/x.svd", Origin::Upstream, Some("2")),
            desc("l/a.svd", Origin::Local, Some("1")),
        ];
        for policy in [VersionPolicy::Lexicographic, VersionPolicy::Numeric] {
            let forward = Catalog::from_descriptors(candidates.clone(), policy);
            let backward = Catalog::from_descriptors(candidates.iter().cloned().rev(), policy);
            let rotated = Catalog::from_descriptors(
                candidates.iter().cycle().skip(1).take(3).cloned(),
                policy,
            );
            assert_eq!(forward.get("DEV"), backward.get("DEV"));
            assert_eq!(forward.get("DEV"), rotated.get("DEV"));
            assert_eq!(
                forward.get("DEV").unwrap().path,
                path::PathBuf::from("u/x.svd")
            );
            assert_eq!(forward.conflicts().len(), 2);
        }
    }
}
