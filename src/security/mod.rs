//! Security preflight checks.
//!
//! [`run`] executes the check stages in a fixed order and collects their findings in a
//! [`SecurityResult`]. Stages never abort the run, unavailable system data turns into warnings.
//! Only the final decision whether the issues found should block the backup is returned as an
//! error.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use preflight_config::SecurityConfig;
use preflight_tools::ProbeContext;

use crate::environment::EnvironmentInfo;
use crate::host::{FileStat, Host};

mod dependencies;
mod files;
mod integrity;
mod keys;
mod network;
mod permissions;
mod process;

pub use dependencies::{build_dependency_list, DependencyEntry};
pub use network::{parse_ss_line, SsEntry};
pub use process::{
    is_builtin_kernel_process, match_process_pattern, parse_ps_line, ProcInfo, PsEntry,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// A single finding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub severity: Severity,
    pub message: String,
}

/// Findings of one run, in the order they were found.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SecurityResult {
    issues: Vec<Issue>,
    errors: usize,
    warnings: usize,
}

impl SecurityResult {
    pub fn add_warning<S: Into<String>>(&mut self, message: S) {
        self.warnings += 1;
        self.issues.push(Issue {
            severity: Severity::Warning,
            message: message.into(),
        });
    }

    pub fn add_error<S: Into<String>>(&mut self, message: S) {
        self.errors += 1;
        self.issues.push(Issue {
            severity: Severity::Error,
            message: message.into(),
        });
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn errors(&self) -> usize {
        self.errors
    }

    pub fn warnings(&self) -> usize {
        self.warnings
    }

    pub fn total(&self) -> usize {
        self.errors + self.warnings
    }

    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }
}

/// The run found errors and the configuration does not allow to continue.
#[derive(Debug, thiserror::Error)]
#[error(
    "security checks found {} error(s); set continue-on-security-issues to bypass",
    .result.errors()
)]
pub struct SecurityRunError {
    /// Everything found up to the decision
    pub result: SecurityResult,
}

/// State shared by the check stages of one run.
struct Checker<'a> {
    ctx: &'a ProbeContext,
    host: &'a dyn Host,
    config: &'a SecurityConfig,
    result: SecurityResult,
}

impl<'a> Checker<'a> {
    fn step(&self, title: &str) {
        log::info!("==> {}", title);
    }

    fn warning<S: Into<String>>(&mut self, message: S) {
        let message = message.into();
        log::warn!("{}", message);
        self.result.add_warning(message);
    }

    fn error<S: Into<String>>(&mut self, message: S) {
        let message = message.into();
        log::error!("{}", message);
        self.result.add_error(message);
    }

    fn banner(&self, title: &str) {
        let line = "=".repeat(title.len().max(40) + 8);
        log::warn!("{}", line);
        log::warn!("    {}", title);
        log::warn!("{}", line);
    }

    /// `lstat` which turns failures into an issue.
    fn lstat_or_report(&mut self, path: &Path, description: &str) -> Option<FileStat> {
        match self.host.lstat(path) {
            Ok(stat) => Some(stat),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                self.warning(format!("{} {:?} does not exist", description, path));
                None
            }
            Err(err) => {
                self.warning(format!("cannot stat {} {:?} - {}", description, path, err));
                None
            }
        }
    }
}

/// Make `path` absolute relative to the working directory of the host, without resolving
/// symlinks.
fn absolute_path(host: &dyn Host, path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match host.current_dir() {
        Some(cwd) => cwd.join(path),
        None => path.to_path_buf(),
    }
}

/// Run all security checks.
///
/// `config_path` is the configuration file of the backup tool, `exec_path` its executable.
/// Returns an error holding the partial result when errors were found and
/// `continue-on-security-issues` is not set.
pub async fn run(
    ctx: &ProbeContext,
    host: &dyn Host,
    config: &SecurityConfig,
    config_path: &Path,
    exec_path: &Path,
    env: &EnvironmentInfo,
) -> Result<SecurityResult, SecurityRunError> {
    if !config.security_check_enabled {
        log::info!("security checks disabled");
        return Ok(SecurityResult::default());
    }

    let config_path = absolute_path(host, config_path);
    let exec_path = absolute_path(host, exec_path);

    let current = host.env_var("PATH").unwrap_or_default();
    let extended = preflight_tools::path::extend_path(&current);
    if extended != current {
        host.set_env_var("PATH", &extended);
    }

    let mut checker = Checker {
        ctx,
        host,
        config,
        result: SecurityResult::default(),
    };

    checker.check_dependencies(env.proxmox_type);
    checker.check_binary_integrity(&exec_path);
    checker.check_config_file(&config_path);
    checker.check_sensitive_files();
    checker.check_directories();
    checker.check_secure_account_files();
    checker.scan_private_keys();

    if config.check_network_security {
        checker.check_network().await;
    }

    checker.check_processes().await;

    let result = checker.result;

    log::info!(
        "security checks finished: {} error(s), {} warning(s)",
        result.errors(),
        result.warnings()
    );

    if result.has_errors() && !config.continue_on_security_issues {
        return Err(SecurityRunError { result });
    }

    Ok(result)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_result_counters() {
        let mut result = SecurityResult::default();
        assert!(result.is_empty());

        result.add_warning("first");
        result.add_error("second");
        result.add_warning("third");

        assert_eq!(result.warnings(), 2);
        assert_eq!(result.errors(), 1);
        assert_eq!(result.total(), result.warnings() + result.errors());

        let messages: Vec<&str> = result.issues().iter().map(|i| i.message.as_str()).collect();
        assert_eq!(messages, ["first", "second", "third"]);
        assert_eq!(result.issues()[1].severity, Severity::Error);
    }

    #[test]
    fn test_run_error_message() {
        let mut result = SecurityResult::default();
        result.add_error("a");
        result.add_error("b");
        let err = SecurityRunError { result };
        assert_eq!(
            err.to_string(),
            "security checks found 2 error(s); set continue-on-security-issues to bypass"
        );
    }

    #[test]
    fn test_serialize_result() {
        let mut result = SecurityResult::default();
        result.add_warning("w");
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "issues": [ { "severity": "warning", "message": "w" } ],
                "errors": 0,
                "warnings": 1,
            })
        );
    }
}
