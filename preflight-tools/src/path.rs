//! `PATH` handling.
//!
//! Nothing in here reads the process environment, callers pass the current `PATH` value in.

use std::path::{Path, PathBuf};

use preflight_buildcfg::EXTRA_PATH_DIRS;

/// Literal returned by [`look_path_or_not_found`] for unresolvable binaries.
pub const NOT_FOUND: &str = "NOT FOUND";

/// Append the well known system directories to a `PATH` value.
///
/// Existing entries keep their order, entries already present are not added again, so applying
/// this twice yields the same value as applying it once.
pub fn extend_path(current: &str) -> String {
    let mut entries: Vec<&str> = current.split(':').filter(|dir| !dir.is_empty()).collect();

    for dir in EXTRA_PATH_DIRS {
        if !entries.contains(dir) {
            entries.push(dir);
        }
    }

    entries.join(":")
}

/// Resolve `binary` on the given `PATH` value.
///
/// Names containing a slash are checked as they are. `is_executable` decides whether a candidate
/// qualifies, which keeps this usable with something other than the real file system.
pub fn lookup_path<F>(binary: &str, path_var: &str, is_executable: F) -> Option<PathBuf>
where
    F: Fn(&Path) -> bool,
{
    if binary.is_empty() {
        return None;
    }

    if binary.contains('/') {
        let candidate = PathBuf::from(binary);
        return is_executable(&candidate).then_some(candidate);
    }

    path_var
        .split(':')
        .filter(|dir| !dir.is_empty())
        .map(|dir| Path::new(dir).join(binary))
        .find(|candidate| is_executable(candidate))
}

/// Resolved absolute path of `binary` as string, or [`NOT_FOUND`].
pub fn look_path_or_not_found<F>(binary: &str, path_var: &str, is_executable: F) -> String
where
    F: Fn(&Path) -> bool,
{
    match lookup_path(binary, path_var, is_executable) {
        Some(path) => path.display().to_string(),
        None => NOT_FOUND.to_string(),
    }
}
