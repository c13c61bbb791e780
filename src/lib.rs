//! Security and environment preflight probe for Proxmox backup hosts.
//!
//! Before a backup starts the probe finds out which Proxmox product runs on the host
//! ([`environment`]), whether it runs inside an unprivileged container, and runs a set of
//! security checks over the backup tool installation and the host ([`security`]).
//!
//! All system access goes through the [`host::Host`] trait.

pub mod environment;
pub mod host;
pub mod security;

pub use environment::{DetectionError, Detector, EnvironmentInfo, ProxmoxType};
pub use host::{Host, SystemHost};
pub use security::{Issue, SecurityResult, SecurityRunError, Severity};

pub use preflight_config::SecurityConfig;
pub use preflight_tools::ProbeContext;
