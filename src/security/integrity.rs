//! Executable integrity, checked against the digest sidecar next to the binary.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use preflight_buildcfg::HASH_SIDECAR_SUFFIX;

use super::Checker;

/// `<exec_path>.md5`
pub(super) fn sidecar_path(exec_path: &Path) -> PathBuf {
    let mut path = exec_path.as_os_str().to_owned();
    path.push(HASH_SIDECAR_SUFFIX);
    PathBuf::from(path)
}

impl<'a> Checker<'a> {
    pub(super) fn check_binary_integrity(&mut self, exec_path: &Path) {
        self.step("Checking executable integrity");

        let stat = match self.host.lstat(exec_path) {
            Ok(stat) => stat,
            Err(err) => {
                self.error(format!("cannot stat executable {:?} - {}", exec_path, err));
                return;
            }
        };

        if stat.is_symlink() {
            self.error(format!(
                "executable {:?} is a symlink, refusing to verify it",
                exec_path
            ));
            return;
        }

        self.ensure_ownership_and_perm(exec_path, Some(stat), 0o700, "executable");

        let digest = match self.host.open(exec_path) {
            Ok(mut file) => match preflight_tools::sha::sha256_hex(&mut file) {
                Ok(digest) => digest,
                Err(err) => {
                    self.error(format!("cannot read executable {:?} - {}", exec_path, err));
                    return;
                }
            },
            Err(err) => {
                self.error(format!("cannot open executable {:?} - {}", exec_path, err));
                return;
            }
        };

        let sidecar = sidecar_path(exec_path);

        let known = match self.host.read_to_string(&sidecar) {
            Ok(data) => data.trim().to_lowercase(),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                if self.config.auto_update_hashes {
                    self.write_sidecar(&sidecar, &digest);
                } else {
                    self.banner("EXECUTABLE HASH FILE MISSING");
                    self.warning(format!(
                        "hash file {:?} missing - enable auto-update-hashes to create it",
                        sidecar
                    ));
                }
                return;
            }
            Err(err) => {
                self.warning(format!("cannot read hash file {:?} - {}", sidecar, err));
                return;
            }
        };

        if known == digest {
            log::info!("executable hash verified ({})", digest);
            return;
        }

        self.banner("EXECUTABLE HASH MISMATCH");
        if self.config.auto_update_hashes {
            log::warn!(
                "executable hash changed ({} -> {}), updating {:?}",
                known,
                digest,
                sidecar
            );
            self.write_sidecar(&sidecar, &digest);
        } else {
            self.warning(format!(
                "Executable hash mismatch for {:?}: expected {}, got {}",
                exec_path, known, digest
            ));
        }
    }

    fn write_sidecar(&mut self, sidecar: &Path, digest: &str) {
        match self.host.write_file(sidecar, digest.as_bytes(), 0o600) {
            Ok(()) => log::info!("stored executable hash in {:?}", sidecar),
            Err(err) => self.warning(format!("unable to write hash file {:?} - {}", sidecar, err)),
        }
    }
}
