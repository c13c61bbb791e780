use anyhow::Error;

use proxmox_backup_preflight::environment::{detect_unprivileged_container, UNKNOWN_VERSION};
use proxmox_backup_preflight::{Detector, EnvironmentInfo, ProbeContext, ProxmoxType};

mod common;
use common::{FakeHost, FAKE_NOW};

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    proxmox_async::runtime::block_on(future)
}

#[test]
fn pve_via_legacy_version_file() -> Result<(), Error> {
    let host = FakeHost::new();
    host.write("/etc/pve/pve.version", "pve-manager/7.4-3/d4a3b4a1\n", 0o644);

    let ctx = ProbeContext::new();
    let info = block_on(Detector::new(&host, &ctx).detect())?;

    assert_eq!(info.proxmox_type, ProxmoxType::VE);
    assert_eq!(info.version, "7.4-3");

    Ok(())
}

#[test]
fn pve_version_file_is_taken_verbatim() -> Result<(), Error> {
    let host = FakeHost::new();
    host.write("/etc/pve-manager/version", "  8.2.4\n", 0o644);

    let ctx = ProbeContext::new();
    let info = block_on(Detector::new(&host, &ctx).detect())?;

    assert_eq!(info, EnvironmentInfo::new(ProxmoxType::VE, Some("8.2.4".into())));

    Ok(())
}

#[test]
fn pbs_via_command() -> Result<(), Error> {
    let host = FakeHost::new();
    host.install_binary("proxmox-backup-manager");
    host.script_command(
        "proxmox-backup-manager",
        "proxmox-backup-server 2.4.1-1 running version: 2.4.1\n",
    );

    let ctx = ProbeContext::new();
    let detector = Detector::new(&host, &ctx);
    let info = block_on(detector.detect())?;

    assert_eq!(info.proxmox_type, ProxmoxType::BS);
    assert_eq!(info.version, "2.4.1");

    assert_eq!(block_on(detector.get_version(ProxmoxType::BS))?, "2.4.1");
    assert!(block_on(detector.get_version(ProxmoxType::VE)).is_err());

    Ok(())
}

#[test]
fn failing_command_claims_type_without_version() -> Result<(), Error> {
    let host = FakeHost::new();
    host.install_binary("pveversion");
    host.script_failure("pveversion", "ipcc_send_rec failed");

    let ctx = ProbeContext::new();
    let info = block_on(Detector::new(&host, &ctx).detect())?;

    assert_eq!(info.proxmox_type, ProxmoxType::VE);
    assert_eq!(info.version, UNKNOWN_VERSION);

    Ok(())
}

#[test]
fn pbs_via_apt_sources_and_directories() -> Result<(), Error> {
    let host = FakeHost::new();
    host.write(
        "/etc/apt/sources.list.d/backup.list",
        "deb http://download.proxmox.com/debian/pbs bookworm pbs-no-subscription\n",
        0o644,
    );

    let ctx = ProbeContext::new();
    assert_eq!(
        block_on(Detector::new(&host, &ctx).detect_type()),
        ProxmoxType::BS
    );

    let host = FakeHost::new();
    host.mkdir("/var/lib/proxmox-backup", 0o755);
    let info = block_on(Detector::new(&host, &ctx).detect())?;
    assert_eq!(info, EnvironmentInfo::new(ProxmoxType::BS, None));
    assert_eq!(info.version, UNKNOWN_VERSION);

    Ok(())
}

#[test]
fn ve_is_probed_before_bs() -> Result<(), Error> {
    let host = FakeHost::new();
    host.mkdir("/etc/pve", 0o755);
    host.write("/etc/proxmox-backup/version", "3.2.2\n", 0o644);

    let ctx = ProbeContext::new();
    let info = block_on(Detector::new(&host, &ctx).detect())?;
    assert_eq!(info.proxmox_type, ProxmoxType::VE);

    Ok(())
}

#[test]
fn unknown_host_writes_debug_report() {
    let host = FakeHost::new();

    let ctx = ProbeContext::new();
    let detector = Detector::new(&host, &ctx).debug_base_dir("/var/tmp");

    let err = block_on(detector.detect()).unwrap_err();
    let message = err.to_string();
    assert!(message.starts_with("unable to detect Proxmox environment"));
    assert!(message.contains("debug saved to"));
    assert_eq!(err.environment(), EnvironmentInfo::unknown());

    let report_path = format!(
        "/var/tmp/proxmox-backup-preflight/proxmox_detection_debug_{}.log",
        FAKE_NOW
    );
    assert!(message.contains(&report_path));
    assert_eq!(host.mode(&report_path), 0o640);

    let report = host.read(&report_path);
    assert!(report.starts_with("=== Proxmox Detection Failure Debug - "));
    for section in [
        "=== Command availability check ===",
        "=== File existence check ===",
        "=== Directory existence check ===",
        "=== Version file check ===",
        "=== APT source files check ===",
    ] {
        assert!(report.contains(section), "missing section {}", section);
    }
    assert!(report.contains("pveversion: NOT FOUND"));
    assert!(report.contains("/usr/sbin/proxmox-backup-manager: exists=NO executable=NO"));
    assert!(report.contains("/etc/pve: NO"));

    assert_eq!(
        block_on(detector.detect_or_unknown()),
        EnvironmentInfo::unknown()
    );
}

#[test]
fn unwritable_debug_dir_omits_report_path() {
    let host = FakeHost::new();
    // a regular file where the report directory's parent should be
    host.write("/var/tmp", "", 0o644);

    let ctx = ProbeContext::new();
    let detector = Detector::new(&host, &ctx).debug_base_dir("/var/tmp");

    let err = block_on(detector.detect()).unwrap_err();
    assert_eq!(err.debug_path, None);
    assert_eq!(err.to_string(), "unable to detect Proxmox environment");
    assert!(!err.to_string().contains("debug saved to"));
    assert_eq!(err.environment(), EnvironmentInfo::unknown());
}

#[test]
fn detection_extends_path() -> Result<(), Error> {
    use proxmox_backup_preflight::Host;

    let host = FakeHost::new();
    host.set_env_var("PATH", "/usr/local/bin");
    host.write("/usr/sbin/pveversion", "#!/bin/sh\n", 0o755);
    host.script_command("pveversion", "pve-manager/8.2.4/faa83925c9641325\n");

    let ctx = ProbeContext::new();
    let info = block_on(Detector::new(&host, &ctx).detect())?;
    assert_eq!(info.version, "8.2.4");

    let path = host.env_var("PATH").unwrap();
    assert!(path.starts_with("/usr/local/bin"));
    assert!(path.contains("/usr/sbin"));

    // idempotent
    block_on(Detector::new(&host, &ctx).detect())?;
    assert_eq!(host.env_var("PATH").unwrap(), path);

    Ok(())
}

#[test]
fn unprivileged_container() {
    let host = FakeHost::new();
    host.write("/proc/self/uid_map", "0 100000 65536\n", 0o444);
    host.write("/proc/self/gid_map", "0 100000 65536\n", 0o444);
    host.write("/run/systemd/container", "lxc\n", 0o444);

    let info = detect_unprivileged_container(&host);

    assert!(info.detected);
    assert!(info.uid_map.ok);
    assert_eq!(info.uid_map.outside0, 100000);
    assert_eq!(info.uid_map.length, 65536);
    assert_eq!(info.container_runtime.as_deref(), Some("lxc"));
    assert_eq!(info.container_source.as_deref(), Some("systemd"));
    assert!(info.details.contains("uid_map=0->100000(len=65536)"));
    assert!(info.details.contains("container=lxc"));
    assert_eq!(
        info.details,
        "uid_map=0->100000(len=65536), gid_map=0->100000(len=65536), \
         container=lxc, container_src=systemd, euid=0"
    );
}

#[test]
fn privileged_host_is_not_a_container() {
    let host = FakeHost::new();
    host.write("/proc/self/uid_map", "         0          0 4294967295\n", 0o444);
    host.write("/proc/self/gid_map", "         0          0 4294967295\n", 0o444);
    host.write("/proc/1/cgroup", "0::/init.scope\n", 0o444);

    let info = detect_unprivileged_container(&host);
    assert!(!info.detected);
    assert_eq!(info.container_runtime, None);
    assert!(info.details.contains("container=none"));
}

#[test]
fn container_hints_without_shifted_maps() {
    let host = FakeHost::new();
    host.write("/proc/1/cgroup", "0::/docker/0123456789abcdef\n", 0o444);

    let info = detect_unprivileged_container(&host);
    assert!(info.detected);
    assert_eq!(info.container_runtime.as_deref(), Some("docker"));
    assert_eq!(info.container_source.as_deref(), Some("cgroup"));
    assert!(info.details.starts_with("uid_map=unavailable(err=not found)"));

    let host = FakeHost::new();
    host.write("/proc/self/uid_map", "garbage\n", 0o444);
    host.write("/.dockerenv", "", 0o644);
    let info = detect_unprivileged_container(&host);
    assert!(info.detected);
    assert_eq!(info.container_source.as_deref(), Some("marker"));
    assert!(info
        .details
        .contains("uid_map=unparseable(err=no mapping for inside ID 0)"));

    let mut host = FakeHost::new();
    host.euid = 1000;
    let info = detect_unprivileged_container(&host);
    assert!(info.detected);
    assert!(info.details.ends_with("euid=1000"));
}

#[test]
fn empty_systemd_marker_counts_as_container() {
    let host = FakeHost::new();
    host.write("/proc/self/uid_map", "0 0 4294967295\n", 0o444);
    host.write("/proc/self/gid_map", "0 0 4294967295\n", 0o444);
    host.write("/run/systemd/container", "\n", 0o444);

    let info = detect_unprivileged_container(&host);
    assert!(info.systemd_container.present);
    assert!(info.detected);
    assert_eq!(info.container_runtime.as_deref(), Some("unknown"));
    assert_eq!(info.container_source.as_deref(), Some("systemd"));

    // a cgroup hint names the runtime
    host.write("/proc/1/cgroup", "0::/lxc.payload.ct101/init.scope\n", 0o444);
    let info = detect_unprivileged_container(&host);
    assert_eq!(info.container_runtime.as_deref(), Some("lxc"));
    assert_eq!(info.container_source.as_deref(), Some("cgroup"));
}
