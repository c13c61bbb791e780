//! Detection strategies.
//!
//! Per product the strategies run in this order, the first one not returning
//! [`Probe::NoMatch`] decides:
//!
//!  1. the version command (`pveversion`, `proxmox-backup-manager version`)
//!  2. the version files below `/etc`
//!  3. product specific tokens in the apt sources
//!  4. product specific directories
//!
//! Only the first two can produce a version, the others claim the product with an unknown
//! version.

use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;

use preflight_buildcfg::{
    APT_SOURCES_DIR, APT_SOURCE_FILES, PBS_DIRS, PBS_MANAGER_BIN, PBS_SOURCE_TOKENS,
    PBS_VERSION_FN, PVE_DIRS, PVE_LEGACY_VERSION_FN, PVE_SOURCE_TOKENS, PVE_VERSION_BIN,
    PVE_VERSION_FN,
};
use preflight_tools::ProbeContext;

use super::ProxmoxType;
use crate::host::{summarize_io_error, Host};

lazy_static! {
    static ref PVE_VERSION_REGEX: Regex =
        Regex::new(r"pve-manager/(\d+\.\d+(?:[-.]\d+)+)").unwrap();
    static ref PBS_VERSION_REGEX: Regex =
        Regex::new(r"version:\s*(\d+\.\d+(?:[-.]\d+)+)").unwrap();
}

/// Outcome of a single strategy
#[derive(Debug)]
pub enum Probe {
    /// Product detected, version extracted
    Version(String),
    /// Product detected, version unknown
    NoVersion,
    /// This strategy found nothing, try the next one
    NoMatch,
    /// The strategy could not look, e.g. an unreadable file; the cascade goes on
    Error(anyhow::Error),
}

/// Extract the version from `pveversion` output or the legacy version file.
pub fn extract_pve_version(text: &str) -> Option<String> {
    PVE_VERSION_REGEX
        .captures(text)
        .map(|caps| caps[1].to_string())
}

/// Extract the version from `proxmox-backup-manager version` output.
pub fn extract_pbs_version(text: &str) -> Option<String> {
    PBS_VERSION_REGEX
        .captures(text)
        .map(|caps| caps[1].to_string())
}

/// What to look at for one product
struct Product {
    proxmox_type: ProxmoxType,
    binary: &'static str,
    args: &'static [&'static str],
    version_file: &'static str,
    legacy_version_file: Option<&'static str>,
    source_tokens: &'static [&'static str],
    dirs: &'static [&'static str],
    extract: fn(&str) -> Option<String>,
}

const PVE: Product = Product {
    proxmox_type: ProxmoxType::VE,
    binary: PVE_VERSION_BIN,
    args: &[],
    version_file: PVE_VERSION_FN,
    legacy_version_file: Some(PVE_LEGACY_VERSION_FN),
    source_tokens: PVE_SOURCE_TOKENS,
    dirs: PVE_DIRS,
    extract: extract_pve_version,
};

const PBS: Product = Product {
    proxmox_type: ProxmoxType::BS,
    binary: PBS_MANAGER_BIN,
    args: &["version"],
    version_file: PBS_VERSION_FN,
    legacy_version_file: None,
    source_tokens: PBS_SOURCE_TOKENS,
    dirs: PBS_DIRS,
    extract: extract_pbs_version,
};

fn product(proxmox_type: ProxmoxType) -> Option<&'static Product> {
    match proxmox_type {
        ProxmoxType::VE => Some(&PVE),
        ProxmoxType::BS => Some(&PBS),
        ProxmoxType::Unknown => None,
    }
}

async fn command_probe(host: &dyn Host, ctx: &ProbeContext, product: &Product) -> Probe {
    let binary = match host.lookup_path(product.binary) {
        Some(binary) => binary,
        None => return Probe::NoMatch,
    };
    let binary = binary.to_string_lossy().into_owned();

    match host.run_command(ctx, &binary, product.args).await {
        Ok(output) => match (product.extract)(&output) {
            Some(version) => Probe::Version(version),
            None => {
                log::debug!("no version found in output of {}", binary);
                Probe::NoVersion
            }
        },
        Err(err) => {
            log::warn!("{} is installed but failed - {}", binary, err);
            Probe::NoVersion
        }
    }
}

fn version_file_probe(host: &dyn Host, product: &Product) -> Probe {
    let path = Path::new(product.version_file);
    match host.read_to_string(path) {
        Ok(content) => {
            let content = content.trim();
            if !content.is_empty() {
                return Probe::Version(content.to_string());
            }
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => (),
        Err(err) => {
            return Probe::Error(anyhow::format_err!(
                "unable to read {:?} - {}",
                path,
                summarize_io_error(&err)
            ));
        }
    }

    if let Some(legacy) = product.legacy_version_file {
        let path = Path::new(legacy);
        if host.file_exists(path) {
            return match (product.extract)(&host.read_and_trim(path)) {
                Some(version) => Probe::Version(version),
                None => Probe::NoVersion,
            };
        }
    }

    Probe::NoMatch
}

/// The fixed apt source files followed by every other `*.list` fragment.
pub(crate) fn apt_source_files(host: &dyn Host) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = APT_SOURCE_FILES.iter().map(PathBuf::from).collect();

    if let Ok(entries) = host.read_dir(Path::new(APT_SOURCES_DIR)) {
        for entry in entries {
            let is_list = entry.extension().map(|ext| ext == "list").unwrap_or(false);
            if is_list && !files.contains(&entry) {
                files.push(entry);
            }
        }
    }

    files
}

fn apt_source_probe(host: &dyn Host, product: &Product) -> Probe {
    let hit = apt_source_files(host)
        .iter()
        .find(|file| host.contains_any(file, product.source_tokens));

    match hit {
        Some(file) => {
            log::debug!("{:?} references {}", file, product.proxmox_type.product_name());
            Probe::NoVersion
        }
        None => Probe::NoMatch,
    }
}

fn directory_probe(host: &dyn Host, product: &Product) -> Probe {
    if product.dirs.iter().any(|dir| host.dir_exists(Path::new(dir))) {
        Probe::NoVersion
    } else {
        Probe::NoMatch
    }
}

/// Run the strategy cascade for one product.
///
/// Strategy errors are logged and the cascade continues. [`Probe::Error`] is only returned when
/// nothing matched and at least one strategy failed.
pub async fn probe_type(host: &dyn Host, ctx: &ProbeContext, proxmox_type: ProxmoxType) -> Probe {
    let product = match product(proxmox_type) {
        Some(product) => product,
        None => return Probe::NoMatch,
    };

    let mut last_error = None;

    for step in 0..4 {
        let probe = match step {
            0 => command_probe(host, ctx, product).await,
            1 => version_file_probe(host, product),
            2 => apt_source_probe(host, product),
            _ => directory_probe(host, product),
        };

        match probe {
            Probe::NoMatch => continue,
            Probe::Error(err) => {
                log::debug!("{} detection step {} failed - {}", proxmox_type, step + 1, err);
                last_error = Some(err);
            }
            found => return found,
        }
    }

    match last_error {
        Some(err) => Probe::Error(err),
        None => Probe::NoMatch,
    }
}
