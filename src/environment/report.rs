//! Diagnostic report written when no Proxmox product could be detected.

use std::fmt::Write;
use std::path::{Path, PathBuf};

use anyhow::Error;

use preflight_buildcfg::{
    BINARY_SEARCH_DIRS, PBS_DIRS, PBS_MANAGER_BIN, PBS_VERSION_FN, PVE_DIRS,
    PVE_LEGACY_VERSION_FN, PVE_VERSION_BIN, PVE_VERSION_FN, TOOL_NAME,
};

use super::strategy::apt_source_files;
use crate::host::Host;

fn yes_no(value: bool) -> &'static str {
    if value {
        "YES"
    } else {
        "NO"
    }
}

/// Render the report text.
pub(crate) fn generate_debug_report(host: &dyn Host) -> Result<String, std::fmt::Error> {
    let now = host.now();
    let timestamp = proxmox_time::strftime_local("%Y-%m-%d %H:%M:%S", now)
        .unwrap_or_else(|_| now.to_string());

    let mut report = String::new();

    writeln!(report, "=== Proxmox Detection Failure Debug - {} ===", timestamp)?;
    writeln!(report, "PATH: {}", host.env_var("PATH").unwrap_or_default())?;
    writeln!(
        report,
        "User: {}",
        host.username().unwrap_or_else(|| String::from("unknown"))
    )?;
    writeln!(
        report,
        "Working directory: {}",
        host.current_dir()
            .map(|dir| dir.display().to_string())
            .unwrap_or_else(|| String::from("unknown"))
    )?;
    writeln!(report, "SHELL: {}", host.env_var("SHELL").unwrap_or_default())?;

    writeln!(report, "\n=== Command availability check ===")?;
    let path_var = host.env_var("PATH").unwrap_or_default();
    for binary in [PVE_VERSION_BIN, PBS_MANAGER_BIN] {
        let resolved = preflight_tools::path::look_path_or_not_found(binary, &path_var, |path| {
            host.is_executable(path)
        });
        writeln!(report, "{}: {}", binary, resolved)?;
    }

    writeln!(report, "\n=== File existence check ===")?;
    for binary in [PVE_VERSION_BIN, PBS_MANAGER_BIN] {
        for dir in BINARY_SEARCH_DIRS {
            let path = Path::new(dir).join(binary);
            writeln!(
                report,
                "{}: exists={} executable={}",
                path.display(),
                yes_no(host.file_exists(&path)),
                yes_no(host.is_executable(&path)),
            )?;
        }
    }

    writeln!(report, "\n=== Directory existence check ===")?;
    for dir in PVE_DIRS.iter().chain(PBS_DIRS.iter()) {
        writeln!(report, "{}: {}", dir, yes_no(host.dir_exists(Path::new(dir))))?;
    }

    writeln!(report, "\n=== Version file check ===")?;
    for file in [PVE_VERSION_FN, PVE_LEGACY_VERSION_FN, PBS_VERSION_FN] {
        let path = Path::new(file);
        let exists = host.file_exists(path);
        write!(report, "{}: {}", file, yes_no(exists))?;
        if exists {
            write!(report, " content={:?}", host.read_and_trim(path))?;
        }
        writeln!(report)?;
    }

    writeln!(report, "\n=== APT source files check ===")?;
    for file in apt_source_files(host) {
        writeln!(report, "{}: {}", file.display(), yes_no(host.file_exists(&file)))?;
    }

    Ok(report)
}

/// Write the report to `<base_dir>/<tool>/proxmox_detection_debug_<epoch>.log` (mode 0640).
pub(crate) fn write_debug_report(host: &dyn Host, base_dir: &Path) -> Result<PathBuf, Error> {
    let dir = base_dir.join(TOOL_NAME);
    host.create_dir_all(&dir, 0o755)?;

    let path = dir.join(format!("proxmox_detection_debug_{}.log", host.now()));
    let report = generate_debug_report(host)?;
    host.write_file(&path, report.as_bytes(), 0o640)?;

    Ok(path)
}
