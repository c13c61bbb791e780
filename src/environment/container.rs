//! Unprivileged container detection.
//!
//! A shifted user namespace (inside UID/GID 0 mapped to something else outside) is the
//! defining property of an unprivileged container. Container runtime hints (systemd marker,
//! cgroup names, the `container` environment variable, `/.dockerenv`) and a non-root effective
//! UID are taken into account as well, as all of them limit what the backup can do.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::host::{summarize_io_error, Host};

const UID_MAP_FN: &str = "/proc/self/uid_map";
const GID_MAP_FN: &str = "/proc/self/gid_map";
const SYSTEMD_CONTAINER_FN: &str = "/run/systemd/container";
const DOCKER_MARKER_FN: &str = "/.dockerenv";
const CGROUP_FILES: &[&str] = &["/proc/1/cgroup", "/proc/self/cgroup"];
const CGROUP_RUNTIME_TOKENS: &[&str] = &["docker", "lxc", "podman", "kubepods", "containerd"];

const NO_ROOT_MAPPING: &str = "no mapping for inside ID 0";

/// Mapping of inside ID 0 read from one ID map file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct IdMapEntry {
    pub ok: bool,
    /// Outside ID that inside ID 0 maps to
    pub outside0: i64,
    pub length: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
    pub source: PathBuf,
}

impl IdMapEntry {
    /// True if inside ID 0 is mapped to a non-zero outside ID.
    pub fn is_shifted(&self) -> bool {
        self.ok && self.outside0 != 0
    }

    fn describe(&self) -> String {
        if self.ok {
            format!("0->{}(len={})", self.outside0, self.length)
        } else if let Some(err) = &self.read_error {
            format!("unavailable(err={})", err)
        } else {
            let err = self.parse_error.as_deref().unwrap_or(NO_ROOT_MAPPING);
            format!("unparseable(err={})", err)
        }
    }
}

/// Trimmed content of an optional file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct FileValue {
    pub present: bool,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_error: Option<String>,
}

impl FileValue {
    fn read(host: &dyn Host, path: &Path) -> Self {
        match host.read_to_string(path) {
            Ok(data) => Self {
                present: true,
                value: data.trim().to_string(),
                read_error: None,
            },
            Err(err) => Self {
                present: false,
                value: String::new(),
                read_error: Some(summarize_io_error(&err).to_string()),
            },
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct UnprivilegedContainerInfo {
    pub uid_map: IdMapEntry,
    pub gid_map: IdMapEntry,
    pub systemd_container: FileValue,
    pub detected: bool,
    /// Single line summary, e.g. `uid_map=0->100000(len=65536), ..., euid=0`
    pub details: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_runtime: Option<String>,
    /// Where the runtime label came from: `systemd`, `cgroup`, `env` or `marker`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_source: Option<String>,
    pub euid: u32,
}

/// Find the `(outside, length)` mapping for inside ID 0.
///
/// Every line holds `<inside> <outside> <length>`, the first line with inside 0 and a non-zero
/// length is used.
pub fn parse_id_map_outside_zero(content: &str) -> Option<(i64, i64)> {
    content.lines().find_map(|line| {
        let fields: Vec<i64> = line
            .split_whitespace()
            .map(|field| field.parse::<i64>())
            .collect::<Result<_, _>>()
            .ok()?;

        match fields[..] {
            [0, outside, length] if length > 0 => Some((outside, length)),
            _ => None,
        }
    })
}

fn read_id_map(host: &dyn Host, path: &str) -> IdMapEntry {
    let mut entry = IdMapEntry {
        source: PathBuf::from(path),
        ..Default::default()
    };

    match host.read_to_string(Path::new(path)) {
        Ok(content) => match parse_id_map_outside_zero(&content) {
            Some((outside0, length)) => {
                entry.ok = true;
                entry.outside0 = outside0;
                entry.length = length;
            }
            None => entry.parse_error = Some(NO_ROOT_MAPPING.to_string()),
        },
        Err(err) => entry.read_error = Some(summarize_io_error(&err).to_string()),
    }

    entry
}

fn cgroup_runtime(host: &dyn Host) -> Option<String> {
    for file in CGROUP_FILES {
        let content = match host.read_to_string(Path::new(file)) {
            Ok(content) => content.to_lowercase(),
            Err(_) => continue,
        };
        if let Some(token) = CGROUP_RUNTIME_TOKENS
            .iter()
            .find(|token| content.contains(*token))
        {
            return Some(token.to_string());
        }
    }
    None
}

/// Runtime label and its source, first hit in the order systemd, cgroup, env, marker.
///
/// An empty systemd marker only counts when no other hint names the runtime.
fn container_runtime(host: &dyn Host, systemd: &FileValue) -> Option<(String, &'static str)> {
    if systemd.present && !systemd.value.is_empty() {
        return Some((systemd.value.clone(), "systemd"));
    }

    if let Some(runtime) = cgroup_runtime(host) {
        return Some((runtime, "cgroup"));
    }

    if let Some(runtime) = host.env_var("container") {
        let runtime = runtime.trim();
        if !runtime.is_empty() {
            return Some((runtime.to_string(), "env"));
        }
    }

    if host.path_exists(Path::new(DOCKER_MARKER_FN)) {
        return Some((String::from("docker"), "marker"));
    }

    // an empty systemd marker still says we are in a container
    if systemd.present {
        return Some((String::from("unknown"), "systemd"));
    }

    None
}

/// Inspect ID maps and container hints of the running process. Never fails, missing
/// information is recorded in the result.
pub fn detect_unprivileged_container(host: &dyn Host) -> UnprivilegedContainerInfo {
    let uid_map = read_id_map(host, UID_MAP_FN);
    let gid_map = read_id_map(host, GID_MAP_FN);
    let systemd_container = FileValue::read(host, Path::new(SYSTEMD_CONTAINER_FN));
    let euid = host.euid();

    let (container_runtime, container_source) = match container_runtime(host, &systemd_container)
    {
        Some((runtime, source)) => (Some(runtime), Some(source.to_string())),
        None => (None, None),
    };

    let detected = uid_map.is_shifted()
        || gid_map.is_shifted()
        || container_runtime.is_some()
        || euid != 0;

    let details = [
        format!("uid_map={}", uid_map.describe()),
        format!("gid_map={}", gid_map.describe()),
        format!("container={}", container_runtime.as_deref().unwrap_or("none")),
        format!("container_src={}", container_source.as_deref().unwrap_or("none")),
        format!("euid={}", euid),
    ]
    .join(", ");

    UnprivilegedContainerInfo {
        uid_map,
        gid_map,
        systemd_container,
        detected,
        details,
        container_runtime,
        container_source,
        euid,
    }
}
