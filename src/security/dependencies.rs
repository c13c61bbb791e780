//! External tools the backup needs.

use std::fmt;

use preflight_config::{CompressionType, EmailDeliveryMethod, SecurityConfig};

use super::Checker;
use crate::environment::ProxmoxType;
use crate::host::Host;

type DependencyCheck = Box<dyn Fn(&dyn Host) -> (bool, String) + Send + Sync>;

/// One external tool, satisfied by any of its candidate binaries.
pub struct DependencyEntry {
    pub name: String,
    pub required: bool,
    pub reason: String,
    /// Returns whether the dependency is present, and a detail (`<binary> at <path>`)
    pub check: DependencyCheck,
}

impl fmt::Debug for DependencyEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DependencyEntry")
            .field("name", &self.name)
            .field("required", &self.required)
            .field("reason", &self.reason)
            .finish()
    }
}

impl DependencyEntry {
    fn binaries(name: &str, candidates: &[&str], required: bool, reason: &str) -> Self {
        let candidates: Vec<String> = candidates.iter().map(|c| c.to_string()).collect();
        let check: DependencyCheck = Box::new(move |host: &dyn Host| {
            for binary in candidates.iter() {
                if let Some(path) = host.lookup_path(binary) {
                    return (true, format!("{} at {}", binary, path.display()));
                }
            }
            (false, format!("none of [{}] found in PATH", candidates.join(", ")))
        });

        Self {
            name: name.to_string(),
            required,
            reason: reason.to_string(),
            check,
        }
    }

    fn required(name: &str, reason: &str) -> Self {
        Self::binaries(name, &[name], true, reason)
    }

    fn optional(name: &str, reason: &str) -> Self {
        Self::binaries(name, &[name], false, reason)
    }
}

/// Build the list of tools needed for `config` on a host of type `proxmox_type`.
pub fn build_dependency_list(
    config: &SecurityConfig,
    proxmox_type: ProxmoxType,
) -> Vec<DependencyEntry> {
    let mut list = vec![DependencyEntry::required("tar", "archive creation")];

    match config.compression_type {
        CompressionType::Xz => list.push(DependencyEntry::required("xz", "xz compression")),
        CompressionType::Zstd => list.push(DependencyEntry::required("zstd", "zstd compression")),
        CompressionType::Pigz => list.push(DependencyEntry::required("pigz", "pigz compression")),
        CompressionType::Bzip2 => list.push(DependencyEntry::binaries(
            "bzip2",
            &["pbzip2", "bzip2"],
            true,
            "bzip2 compression",
        )),
        CompressionType::Lzma => list.push(DependencyEntry::required("lzma", "lzma compression")),
        CompressionType::Gzip | CompressionType::None => (),
    }

    if config.cloud_enabled && !config.cloud_remote.trim().is_empty() {
        list.push(DependencyEntry::optional("rclone", "cloud upload"));
    }

    match config.email_delivery_method {
        EmailDeliveryMethod::Sendmail => {
            list.push(DependencyEntry::required("sendmail", "email delivery"));
        }
        EmailDeliveryMethod::Relay if config.email_fallback_sendmail => {
            list.push(DependencyEntry::optional("sendmail", "email relay fallback"));
        }
        EmailDeliveryMethod::Relay => (),
    }

    if config.backup_ceph_config {
        list.push(DependencyEntry::optional("ceph", "ceph configuration backup"));
    }

    if config.backup_zfs_config {
        list.push(DependencyEntry::optional("zpool", "zfs configuration backup"));
        list.push(DependencyEntry::optional("zfs", "zfs configuration backup"));
    }

    match proxmox_type {
        ProxmoxType::VE => {
            list.push(DependencyEntry::optional("pveversion", "Proxmox VE version info"));
            list.push(DependencyEntry::optional("pvecm", "Proxmox VE cluster info"));
        }
        ProxmoxType::BS => {
            list.push(DependencyEntry::optional(
                "proxmox-backup-manager",
                "Proxmox Backup Server configuration",
            ));
            if config.backup_tape_configs {
                list.push(DependencyEntry::optional("proxmox-tape", "tape configuration backup"));
            }
        }
        ProxmoxType::Unknown => (),
    }

    list
}

impl<'a> Checker<'a> {
    pub(super) fn check_dependencies(&mut self, proxmox_type: ProxmoxType) {
        self.step("Checking dependencies");

        for dependency in build_dependency_list(self.config, proxmox_type) {
            let (present, detail) = (dependency.check)(self.host);
            if present {
                log::info!("found {} ({})", dependency.name, detail);
            } else if dependency.required {
                self.error(format!(
                    "required dependency '{}' missing, needed for {} - {}",
                    dependency.name, dependency.reason, detail
                ));
            } else {
                self.warning(format!(
                    "optional dependency '{}' missing, needed for {} - {}",
                    dependency.name, dependency.reason, detail
                ));
            }
        }
    }
}
