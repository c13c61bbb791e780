//! Process list heuristics.
//!
//! Two kinds of findings: command lines containing a known malware signature, and processes
//! shown as `[name]` which are not a known kernel thread. Malware likes to hide behind kernel
//! thread names, so bracketed names are cross-checked against `/proc/<pid>`.

use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;

use super::Checker;
use crate::host::Host;

lazy_static! {
    static ref PS_LINE_REGEX: Regex =
        Regex::new(r"^\s*(\S+)\s+(\S+)\s+(\S+)\s+(\S+)\s+(.*)$").unwrap();
    static ref DRBD_REGEX: Regex = Regex::new(r"(?i)drbd").unwrap();
    static ref CRTC_REGEX: Regex = Regex::new(r"^card[0-9]+-crtc[0-9]+$").unwrap();
    static ref KVM_REGEX: Regex = Regex::new(r"(?i)kvm").unwrap();
    static ref ZFS_REGEX: Regex =
        Regex::new(r"(?i)(zfs|spa_|arc_|txg_|vdev|zil|l2arc|dbuf_)").unwrap();
}

const PS_ARGS: &[&str] = &["-eo", "user=,state=,vsz=,pid=,command="];

/// Parent of all kernel threads
const KTHREADD_PID: i64 = 2;

const DEFUNCT_SUFFIX: &str = " <defunct>";

/// Kernel thread name prefixes which are always accepted.
///
/// No `kdevtmpfs` here, it would also match the `kdevtmpfsi` miner.
const BUILTIN_KERNEL_PREFIXES: &[&str] = &[
    "kworker",
    "kswapd",
    "kthreadd",
    "rcu_",
    "ksoftirqd",
    "migration",
    "cpuhp",
    "idle_inject",
    "watchdog",
    "kcompactd",
    "khugepaged",
    "ksmd",
    "kblockd",
    "kintegrityd",
    "kthrotld",
    "khungtaskd",
    "oom_reaper",
    "writeback",
    "kauditd",
    "netns",
    "mm_percpu_wq",
    "inet_frag_wq",
    "ipv6_addrconf",
    "jbd2",
    "ext4-rsv-conversion",
    "xfs",
    "scsi_",
    "irq/",
    "nvme",
    "kcryptd",
    "dmcrypt_write",
    "kmpath",
    "psimon",
    "slub_flushwq",
    "zswap",
    "hwrng",
    "cryptd",
    "tpm_dev_wq",
    "edac-poller",
    "devfreq_wq",
    "blkcg_punt_bio",
    "vhost-",
    "zfs",
    "z_",
    "zvol",
    "spl_",
    "arc_",
    "txg_",
    "dbu_",
    "dbuf_",
    "l2arc",
    "zthr",
];

const TRUSTED_EXE_DIRS: &[&str] = &[
    "/usr/bin/",
    "/usr/sbin/",
    "/bin/",
    "/sbin/",
    "/lib/systemd/",
    "/usr/lib/systemd/",
];

/// One line of `ps -eo user=,state=,vsz=,pid=,command=`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PsEntry {
    pub user: String,
    pub state: String,
    pub vsz: String,
    pub pid: u32,
    pub command: String,
}

pub fn parse_ps_line(line: &str) -> Option<PsEntry> {
    let caps = PS_LINE_REGEX.captures(line)?;
    let pid = caps[4].parse::<u32>().ok()?;

    Some(PsEntry {
        user: caps[1].to_string(),
        state: caps[2].to_string(),
        vsz: caps[3].to_string(),
        pid,
        command: caps[5].trim().to_string(),
    })
}

/// Inner name of a `[name]` command line, a trailing `<defunct>` is ignored.
fn bracketed_name(command: &str) -> Option<&str> {
    let command = command.trim();
    let command = command.strip_suffix(DEFUNCT_SUFFIX).unwrap_or(command).trim_end();
    command.strip_prefix('[')?.strip_suffix(']')
}

/// Dead helper processes of the backup tool itself show up as `[proxmox-backup-...]` zombies.
fn is_dead_proxmox_helper(entry: &PsEntry, name: &str) -> bool {
    (entry.user == "root" || entry.user == "backup")
        && entry.state.starts_with('Z')
        && (entry.vsz == "0" || entry.vsz.is_empty())
        && name.starts_with("proxmox-backup-")
}

pub fn is_builtin_kernel_process(name: &str) -> bool {
    BUILTIN_KERNEL_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

/// Match a process name against a configured pattern, ignoring case.
///
/// `regex:<expr>` is a regular expression, `<prefix>*` a prefix, everything else must match
/// exactly. Empty patterns and invalid expressions never match.
pub fn match_process_pattern(pattern: &str, name: &str) -> bool {
    let pattern = pattern.trim();
    if pattern.is_empty() {
        return false;
    }

    if let Some(expr) = pattern.strip_prefix("regex:") {
        return match Regex::new(&format!("(?i){}", expr)) {
            Ok(regex) => regex.is_match(name),
            Err(err) => {
                log::debug!("invalid process pattern {:?} - {}", pattern, err);
                false
            }
        };
    }

    let name = name.to_lowercase();
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(&prefix.to_lowercase()),
        None => name == pattern.to_lowercase(),
    }
}

/// What `/proc/<pid>` tells about a process. Unreadable entries stay at their zero value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcInfo {
    pub ppid: i64,
    pub exe: String,
    pub comm: String,
}

impl ProcInfo {
    pub fn read(host: &dyn Host, pid: u32) -> Self {
        let base = Path::new("/proc").join(pid.to_string());

        let comm = host.read_and_trim(&base.join("comm"));

        let ppid = host
            .read_to_string(&base.join("status"))
            .ok()
            .and_then(|status| {
                status.lines().find_map(|line| {
                    line.strip_prefix("PPid:")
                        .and_then(|value| value.trim().parse::<i64>().ok())
                })
            })
            .unwrap_or(0);

        // kernel threads have no executable
        let exe = host
            .read_link(&base.join("exe"))
            .map(|path| path.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self { ppid, exe, comm }
    }

    fn is_kernel_child(&self) -> bool {
        self.ppid == KTHREADD_PID
    }

    fn has_trusted_exe(&self) -> bool {
        TRUSTED_EXE_DIRS.iter().any(|dir| self.exe.starts_with(dir))
    }
}

/// Whether a `[name]` process looks legitimate given its `/proc` info.
fn is_plausible_bracket_process(name: &str, info: &ProcInfo, safe_bracket: &[String]) -> bool {
    if name.trim().is_empty() {
        return false;
    }

    if info.is_kernel_child() {
        return info.exe.is_empty()
            || DRBD_REGEX.is_match(name)
            || CRTC_REGEX.is_match(name)
            || KVM_REGEX.is_match(name)
            || ZFS_REGEX.is_match(name);
    }

    info.ppid > 0
        && !info.exe.is_empty()
        && info.has_trusted_exe()
        && safe_bracket
            .iter()
            .any(|pattern| match_process_pattern(pattern, name))
}

impl<'a> Checker<'a> {
    /// Whether `name` alone marks a bracketed process as safe, without looking at `/proc`.
    fn is_whitelisted_bracket_name(&self, name: &str) -> bool {
        if name.trim().is_empty() {
            return false;
        }

        if is_builtin_kernel_process(name) {
            return true;
        }

        let config = self.config;
        config
            .safe_kernel_processes
            .iter()
            .chain(config.safe_bracket_processes.iter())
            .any(|pattern| match_process_pattern(pattern, name))
    }

    pub(super) async fn check_processes(&mut self) {
        self.step("Checking processes");

        let ps = match self.host.lookup_path("ps") {
            Some(ps) => ps.to_string_lossy().into_owned(),
            None => {
                self.warning("ps not found, skipping process check");
                return;
            }
        };

        let output = match self.host.run_command(self.ctx, &ps, PS_ARGS).await {
            Ok(output) => output,
            Err(err) => {
                self.warning(format!("unable to list processes - {}", err));
                return;
            }
        };

        let signatures: Vec<String> = self
            .config
            .suspicious_processes
            .iter()
            .map(|sig| sig.trim().to_lowercase())
            .filter(|sig| !sig.is_empty())
            .collect();

        for entry in output.lines().filter_map(parse_ps_line) {
            let command = entry.command.to_lowercase();
            if let Some(signature) = signatures.iter().find(|sig| command.contains(sig.as_str())) {
                self.warning(format!(
                    "suspicious process detected: '{}' (pid {}, user {}) matches '{}'",
                    entry.command, entry.pid, entry.user, signature
                ));
                continue;
            }

            let name = match bracketed_name(&entry.command) {
                Some(name) => name,
                None => continue,
            };

            if is_dead_proxmox_helper(&entry, name) || self.is_whitelisted_bracket_name(name) {
                continue;
            }

            let info = ProcInfo::read(self.host, entry.pid);
            if is_plausible_bracket_process(name, &info, &self.config.safe_bracket_processes) {
                continue;
            }

            self.warning(format!(
                "suspicious bracketed process [{}] (pid {}, user {}, ppid {}, exe '{}', comm '{}')",
                name, entry.pid, entry.user, info.ppid, info.exe, info.comm
            ));
        }
    }
}
