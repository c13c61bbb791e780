//! Exports configuration data from the build system

/// Prepend the Proxmox Backup Server configuration directory to a file name
///
/// #### Example:
/// ```
/// use preflight_buildcfg::configdir;
/// let version_file = configdir!("/version");
/// assert_eq!(version_file, "/etc/proxmox-backup/version");
/// ```
#[macro_export]
macro_rules! configdir {
    ($subdir:expr) => {
        concat!("/etc/proxmox-backup", $subdir)
    };
}

/// Prepend the Proxmox VE cluster file system mount point to a file name.
#[macro_export]
macro_rules! pvedir {
    ($subdir:expr) => {
        concat!("/etc/pve", $subdir)
    };
}

pub const PREFLIGHT_PKG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION_MAJOR"),
    ".",
    env!("CARGO_PKG_VERSION_MINOR"),
);
pub const PREFLIGHT_PKG_RELEASE: &str = env!("CARGO_PKG_VERSION_PATCH");
pub const PREFLIGHT_PKG_REPOID: &str = env!("REPOID");

/// Name used for the debug directory and in log output
pub const TOOL_NAME: &str = "proxmox-backup-preflight";

#[macro_export]
macro_rules! PREFLIGHT_DEBUG_BASE_DIR_M {
    () => {
        "/tmp"
    };
}

/// Default preflight configuration file of the CLI
pub const PREFLIGHT_CONFIG_FN: &str = "/etc/proxmox-backup-preflight.json";

/// Base directory below which the `<tool>` debug directory is created
pub const PREFLIGHT_DEBUG_BASE_DIR: &str = PREFLIGHT_DEBUG_BASE_DIR_M!();

/// Default deadline for external commands, in seconds
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 5;

/// Suffix of the digest sidecar next to the executable
pub const HASH_SIDECAR_SUFFIX: &str = ".md5";

/// System directories appended to `PATH` so that sbin tools are found from non-login shells
pub const EXTRA_PATH_DIRS: &[&str] = &["/usr/bin", "/usr/sbin", "/bin", "/sbin"];

/// Directories where the canonical Proxmox binaries are installed
pub const BINARY_SEARCH_DIRS: &[&str] = &["/usr/bin", "/usr/sbin", "/bin", "/sbin"];

/// Proxmox VE version command
pub const PVE_VERSION_BIN: &str = "pveversion";
/// Proxmox Backup Server management command
pub const PBS_MANAGER_BIN: &str = "proxmox-backup-manager";

pub const PVE_VERSION_FN: &str = "/etc/pve-manager/version";
pub const PVE_LEGACY_VERSION_FN: &str = pvedir!("/pve.version");
pub const PBS_VERSION_FN: &str = configdir!("/version");

pub const PVE_DIRS: &[&str] = &["/etc/pve", "/var/lib/pve-cluster"];
pub const PBS_DIRS: &[&str] = &["/etc/proxmox-backup", "/var/lib/proxmox-backup"];

pub const PVE_SOURCE_TOKENS: &[&str] = &["pve-enterprise", "pve"];
pub const PBS_SOURCE_TOKENS: &[&str] = &["proxmox-backup", "pbs"];

/// Directory holding the apt source fragments, every `*.list` below is inspected
pub const APT_SOURCES_DIR: &str = "/etc/apt/sources.list.d";

/// Apt source files always inspected, before the `*.list` fragments
pub const APT_SOURCE_FILES: &[&str] = &[
    "/etc/apt/sources.list",
    "/etc/apt/sources.list.d/pve-enterprise.list",
    "/etc/apt/sources.list.d/pve-no-subscription.list",
    "/etc/apt/sources.list.d/pbs-enterprise.list",
    "/etc/apt/sources.list.d/pbs-no-subscription.list",
    "/etc/apt/sources.list.d/proxmox.list",
];
