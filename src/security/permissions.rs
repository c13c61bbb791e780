//! Mode and ownership enforcement.

use std::path::Path;

use super::Checker;
use crate::host::FileStat;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum Ownership {
    /// Must be owned by `root:root`
    Root,
    /// Managed elsewhere, not checked
    Skip,
}

impl<'a> Checker<'a> {
    /// Make sure `path` has permission `expected_perm` and is owned by `root:root`.
    ///
    /// `info` is the `lstat` result if the caller already has it. An `expected_perm` of zero
    /// skips the mode check. Symlinks are never modified.
    pub(super) fn ensure_ownership_and_perm(
        &mut self,
        path: &Path,
        info: Option<FileStat>,
        expected_perm: u32,
        description: &str,
    ) {
        self.ensure_perm_with_ownership(path, info, expected_perm, description, Ownership::Root)
    }

    pub(super) fn ensure_perm_with_ownership(
        &mut self,
        path: &Path,
        info: Option<FileStat>,
        expected_perm: u32,
        description: &str,
        ownership: Ownership,
    ) {
        let mut stat = match info {
            Some(stat) => stat,
            None => match self.lstat_or_report(path, description) {
                Some(stat) => stat,
                None => return,
            },
        };

        let auto_fix = self.config.auto_fix_permissions;

        if stat.is_symlink() {
            if auto_fix {
                self.error(format!(
                    "{} {:?} is a symlink - refusing to chmod/chown symlinks",
                    description, path
                ));
            } else {
                self.warning(format!(
                    "{} {:?} is a symlink, skipping permission check",
                    description, path
                ));
            }
            return;
        }

        if expected_perm != 0 && stat.perm() != expected_perm {
            self.banner("INSECURE PERMISSIONS");
            if auto_fix {
                match self.host.chmod(path, expected_perm) {
                    Ok(()) => {
                        log::info!(
                            "fixed permissions of {} {:?} ({:o} -> {:o})",
                            description,
                            path,
                            stat.perm(),
                            expected_perm
                        );
                        if let Ok(new_stat) = self.host.lstat(path) {
                            stat = new_stat;
                        }
                    }
                    Err(err) => self.warning(format!(
                        "failed to fix permissions of {} {:?} - {}",
                        description, path, err
                    )),
                }
            } else {
                self.warning(format!(
                    "{} {:?} has permissions {:o}, expected {:o}",
                    description,
                    path,
                    stat.perm(),
                    expected_perm
                ));
            }
        }

        if ownership == Ownership::Skip || stat.owned_by_root() {
            return;
        }

        self.banner("INSECURE OWNERSHIP");
        if auto_fix {
            match self.host.lchown(path, 0, 0) {
                Ok(()) => log::info!(
                    "fixed ownership of {} {:?} ({}:{} -> 0:0)",
                    description,
                    path,
                    stat.uid,
                    stat.gid
                ),
                Err(err) => self.warning(format!(
                    "failed to fix ownership of {} {:?} - {}",
                    description, path, err
                )),
            }
        } else {
            self.warning(format!(
                "{} {:?} is owned by {}:{}, expected root:root",
                description, path, stat.uid, stat.gid
            ));
        }
    }
}
