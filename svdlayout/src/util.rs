//! Methods for reading files

use std::{io, path};

use fs_err as fs;

/// Returns contents of a file at `path`
///
/// The returned error names the path, unlike a bare [`std::fs::read_to_string`] error.
pub(crate) fn read_file(path: &path::Path) -> io::Result<String> {
    fs::read_to_string(path)
}

/// Collapse runs of whitespace in free-form description text
pub(crate) fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[test]
fn normalize_whitespace_works() {
    assert_eq!(
        normalize_whitespace("  Parallel\n      I/O   Controller "),
        "Parallel I/O Controller"
    );
    assert_eq!(normalize_whitespace(""), "");
}
