//! Proxmox environment detection.
//!
//! Classifies the host as Proxmox VE, Proxmox Backup Server or unknown. Each product is probed
//! with an ordered cascade of strategies (see [`strategy`]), VE first, the first strategy that
//! claims the product wins. When nothing matches a diagnostic report is written to help finding
//! out why.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{bail, Error};
use serde::{Deserialize, Serialize};

use preflight_buildcfg::PREFLIGHT_DEBUG_BASE_DIR;
use preflight_tools::ProbeContext;

use crate::host::Host;

mod container;
mod report;
pub mod strategy;

pub use container::{
    detect_unprivileged_container, parse_id_map_outside_zero, FileValue, IdMapEntry,
    UnprivilegedContainerInfo,
};
pub use strategy::{extract_pbs_version, extract_pve_version, Probe};

/// Version sentinel used when the product is known but its version is not
pub const UNKNOWN_VERSION: &str = "unknown";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxmoxType {
    /// Proxmox Virtual Environment
    #[serde(rename = "pve")]
    VE,
    /// Proxmox Backup Server
    #[serde(rename = "pbs")]
    BS,
    Unknown,
}

impl ProxmoxType {
    pub fn product_name(&self) -> &'static str {
        match self {
            ProxmoxType::VE => "Proxmox VE",
            ProxmoxType::BS => "Proxmox Backup Server",
            ProxmoxType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ProxmoxType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProxmoxType::VE => write!(f, "pve"),
            ProxmoxType::BS => write!(f, "pbs"),
            ProxmoxType::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
/// Detected product and version
pub struct EnvironmentInfo {
    #[serde(rename = "type")]
    pub proxmox_type: ProxmoxType,
    /// Parsed version, or `"unknown"`
    pub version: String,
}

impl EnvironmentInfo {
    pub fn new(proxmox_type: ProxmoxType, version: Option<String>) -> Self {
        let version = match (proxmox_type, version) {
            (ProxmoxType::Unknown, _) | (_, None) => UNKNOWN_VERSION.to_string(),
            (_, Some(version)) => version,
        };
        Self {
            proxmox_type,
            version,
        }
    }

    pub fn unknown() -> Self {
        Self::new(ProxmoxType::Unknown, None)
    }
}

impl fmt::Display for EnvironmentInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.proxmox_type.product_name(), self.version)
    }
}

fn debug_path_suffix(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => format!(" (debug saved to {})", path.display()),
        None => String::new(),
    }
}

/// Neither Proxmox VE nor Proxmox Backup Server could be detected.
#[derive(Debug, thiserror::Error)]
#[error("unable to detect Proxmox environment{}", debug_path_suffix(.debug_path))]
pub struct DetectionError {
    /// Where the diagnostic report went, if it could be written
    pub debug_path: Option<PathBuf>,
}

impl DetectionError {
    /// The environment reported alongside this error, always unknown.
    pub fn environment(&self) -> EnvironmentInfo {
        EnvironmentInfo::unknown()
    }
}

/// Runs the detection strategies against a [`Host`].
pub struct Detector<'a> {
    host: &'a dyn Host,
    ctx: &'a ProbeContext,
    debug_base_dir: PathBuf,
}

impl<'a> Detector<'a> {
    pub fn new(host: &'a dyn Host, ctx: &'a ProbeContext) -> Self {
        Self {
            host,
            ctx,
            debug_base_dir: PathBuf::from(PREFLIGHT_DEBUG_BASE_DIR),
        }
    }

    /// Base directory for the diagnostic report, the report itself goes into a `<tool>`
    /// subdirectory.
    pub fn debug_base_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.debug_base_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Make sure the sbin directories are searched, Proxmox tools live there.
    fn prepare_path(&self) {
        let current = self.host.env_var("PATH").unwrap_or_default();
        let extended = preflight_tools::path::extend_path(&current);
        if extended != current {
            log::debug!("extending PATH to {}", extended);
            self.host.set_env_var("PATH", &extended);
        }
    }

    async fn classify(&self) -> Option<(ProxmoxType, Option<String>)> {
        self.prepare_path();

        for proxmox_type in [ProxmoxType::VE, ProxmoxType::BS] {
            match strategy::probe_type(self.host, self.ctx, proxmox_type).await {
                Probe::Version(version) => return Some((proxmox_type, Some(version))),
                Probe::NoVersion => return Some((proxmox_type, None)),
                Probe::NoMatch | Probe::Error(_) => continue,
            }
        }

        None
    }

    /// Detect only the product type.
    pub async fn detect_type(&self) -> ProxmoxType {
        match self.classify().await {
            Some((proxmox_type, _)) => proxmox_type,
            None => ProxmoxType::Unknown,
        }
    }

    /// Detect product type and version.
    ///
    /// On failure a diagnostic report is written, the returned error names its location.
    pub async fn detect(&self) -> Result<EnvironmentInfo, DetectionError> {
        if let Some((proxmox_type, version)) = self.classify().await {
            let info = EnvironmentInfo::new(proxmox_type, version);
            log::info!("detected {}", info);
            return Ok(info);
        }

        let debug_path = match report::write_debug_report(self.host, &self.debug_base_dir) {
            Ok(path) => Some(path),
            Err(err) => {
                log::debug!("unable to write detection debug report - {}", err);
                None
            }
        };

        Err(DetectionError { debug_path })
    }

    /// Like [`detect`](Self::detect), but logs the failure and returns the unknown environment.
    pub async fn detect_or_unknown(&self) -> EnvironmentInfo {
        match self.detect().await {
            Ok(info) => info,
            Err(err) => {
                log::warn!("{}", err);
                err.environment()
            }
        }
    }

    /// Run the strategies for `proxmox_type` again and return its version.
    ///
    /// Returns `"unknown"` when the product is present but no version could be extracted.
    pub async fn get_version(&self, proxmox_type: ProxmoxType) -> Result<String, Error> {
        if proxmox_type == ProxmoxType::Unknown {
            bail!("cannot determine the version of an unknown environment");
        }

        self.prepare_path();

        match strategy::probe_type(self.host, self.ctx, proxmox_type).await {
            Probe::Version(version) => Ok(version),
            Probe::NoVersion => Ok(UNKNOWN_VERSION.to_string()),
            Probe::NoMatch => bail!("{} not detected", proxmox_type.product_name()),
            Probe::Error(err) => Err(err),
        }
    }
}
