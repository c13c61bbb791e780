//! Configuration consumed by the backup preflight probe.
//!
//! Only the settings the probe looks at are modelled here. Paths which are not set explicitly
//! are derived from `base-dir`, the same way the backup tool lays out its installation.

use std::path::{Path, PathBuf};

use anyhow::{format_err, Error};
use serde::{Deserialize, Serialize};

mod whitelist;
pub use whitelist::{PortWhitelist, PortWhitelistEntry};

/// Default installation directory of the backup tool
pub const DEFAULT_BASE_DIR: &str = "/opt/proxmox-backup";

/// Archive compression used by the backup tool, decides which compressor must be installed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    None,
    Gzip,
    Pigz,
    #[default]
    Zstd,
    Xz,
    Bzip2,
    Lzma,
}

/// How notification mails leave the host.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailDeliveryMethod {
    /// Send through the cloud relay, optionally falling back to the local MTA
    #[default]
    Relay,
    /// Hand mails to the local `sendmail`
    Sendmail,
}

fn default_suspicious_processes() -> Vec<String> {
    ["xmrig", "kdevtmpfsi", "kinsing", "minerd", "cpuminer", "cryptonight"]
        .iter()
        .map(|name| name.to_string())
        .collect()
}

fn default_suspicious_ports() -> Vec<u16> {
    vec![1337, 4444, 5555, 6666, 6667, 31337]
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
/// Security preflight settings
pub struct SecurityConfig {
    /// Master switch, when off the probe returns an empty result
    pub security_check_enabled: bool,
    /// Do not fail the run when errors were found
    pub continue_on_security_issues: bool,
    /// Correct wrong modes and ownership in place
    pub auto_fix_permissions: bool,
    /// Write or refresh the executable digest sidecar
    pub auto_update_hashes: bool,

    pub check_network_security: bool,
    pub check_firewall: bool,
    pub check_open_ports: bool,

    /// Command line fragments which are reported wherever they show up in the process list
    pub suspicious_processes: Vec<String>,
    /// Patterns for `[name]` processes which are known to be legitimate user space workers
    pub safe_bracket_processes: Vec<String>,
    /// Patterns for additional kernel threads which are known to be legitimate
    pub safe_kernel_processes: Vec<String>,

    pub suspicious_ports: Vec<u16>,
    /// Entries in `<program>:<port>` form
    pub port_whitelist: Vec<String>,

    pub compression_type: CompressionType,
    pub cloud_enabled: bool,
    pub cloud_remote: String,
    pub email_delivery_method: EmailDeliveryMethod,
    pub email_fallback_sendmail: bool,
    pub backup_ceph_config: bool,
    pub backup_zfs_config: bool,
    pub backup_tape_configs: bool,

    pub base_dir: PathBuf,
    pub backup_path: Option<PathBuf>,
    pub log_path: Option<PathBuf>,
    pub secondary_path: Option<PathBuf>,
    pub secondary_log_path: Option<PathBuf>,
    pub lock_path: Option<PathBuf>,
    pub secure_account: Option<PathBuf>,
    pub age_recipient_file: Option<PathBuf>,
    pub encrypt_archive: bool,
    /// Ownership of the backup and log roots is managed by the backup tool itself
    pub set_backup_permissions: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            security_check_enabled: true,
            continue_on_security_issues: false,
            auto_fix_permissions: false,
            auto_update_hashes: false,
            check_network_security: false,
            check_firewall: true,
            check_open_ports: true,
            suspicious_processes: default_suspicious_processes(),
            safe_bracket_processes: Vec::new(),
            safe_kernel_processes: Vec::new(),
            suspicious_ports: default_suspicious_ports(),
            port_whitelist: Vec::new(),
            compression_type: CompressionType::default(),
            cloud_enabled: false,
            cloud_remote: String::new(),
            email_delivery_method: EmailDeliveryMethod::default(),
            email_fallback_sendmail: false,
            backup_ceph_config: false,
            backup_zfs_config: false,
            backup_tape_configs: false,
            base_dir: PathBuf::from(DEFAULT_BASE_DIR),
            backup_path: None,
            log_path: None,
            secondary_path: None,
            secondary_log_path: None,
            lock_path: None,
            secure_account: None,
            age_recipient_file: None,
            encrypt_archive: false,
            set_backup_permissions: false,
        }
    }
}

fn configured(path: &Option<PathBuf>) -> Option<PathBuf> {
    path.as_ref()
        .filter(|path| !path.as_os_str().is_empty())
        .cloned()
}

impl SecurityConfig {
    /// Create a configuration with all paths below `base_dir`.
    pub fn with_base_dir<P: Into<PathBuf>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Default::default()
        }
    }

    pub fn backup_path(&self) -> PathBuf {
        configured(&self.backup_path).unwrap_or_else(|| self.base_dir.join("backup"))
    }

    pub fn log_path(&self) -> PathBuf {
        configured(&self.log_path).unwrap_or_else(|| self.base_dir.join("log"))
    }

    pub fn secondary_path(&self) -> Option<PathBuf> {
        configured(&self.secondary_path)
    }

    pub fn secondary_log_path(&self) -> Option<PathBuf> {
        configured(&self.secondary_log_path)
    }

    pub fn lock_path(&self) -> PathBuf {
        configured(&self.lock_path).unwrap_or_else(|| self.base_dir.join("lock"))
    }

    pub fn secure_account(&self) -> PathBuf {
        configured(&self.secure_account).unwrap_or_else(|| self.base_dir.join("secure_account"))
    }

    pub fn identity_dir(&self) -> PathBuf {
        self.base_dir.join("identity")
    }

    pub fn age_dir(&self) -> PathBuf {
        self.identity_dir().join("age")
    }

    /// File holding the server identity, created by the backup tool on first run
    pub fn server_identity_file(&self) -> PathBuf {
        self.identity_dir().join(".server_identity")
    }

    pub fn age_recipient_file(&self) -> PathBuf {
        configured(&self.age_recipient_file)
            .unwrap_or_else(|| self.age_dir().join("recipient.txt"))
    }

    /// Parse [`port_whitelist`](Self::port_whitelist), returning the malformed entries as well.
    pub fn parsed_port_whitelist(&self) -> (PortWhitelist, Vec<String>) {
        PortWhitelist::parse(&self.port_whitelist)
    }
}

/// Load the configuration from a JSON file, a missing file yields the defaults.
pub fn load<P: AsRef<Path>>(path: P) -> Result<SecurityConfig, Error> {
    let path = path.as_ref();
    let data = proxmox_sys::fs::file_get_json(path, Some(serde_json::json!({})))?;
    serde_json::from_value(data).map_err(|err| format_err!("unable to parse {:?} - {}", path, err))
}
