//! Configuration file, sensitive files and data directories.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::permissions::Ownership;
use super::Checker;

struct DirectoryCheck {
    path: PathBuf,
    perm: u32,
    description: &'static str,
    /// backup and log roots, their ownership may be managed by the backup tool
    backup_root: bool,
}

impl<'a> Checker<'a> {
    pub(super) fn check_config_file(&mut self, config_path: &Path) {
        self.step("Checking configuration file");
        self.ensure_ownership_and_perm(config_path, None, 0o600, "config file");
    }

    pub(super) fn check_sensitive_files(&mut self) {
        self.step("Checking sensitive files");

        let mut files = vec![(self.config.server_identity_file(), "server identity", true)];
        if self.config.encrypt_archive {
            files.push((self.config.age_recipient_file(), "age recipient file", false));
        }

        for (path, description, optional) in files {
            let stat = match self.host.lstat(&path) {
                Ok(stat) => stat,
                Err(err) if optional && err.kind() == ErrorKind::NotFound => {
                    log::debug!("optional {} {:?} does not exist", description, path);
                    continue;
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    self.warning(format!("{} {:?} does not exist", description, path));
                    continue;
                }
                Err(err) => {
                    self.warning(format!("cannot stat {} {:?} - {}", description, path, err));
                    continue;
                }
            };
            self.ensure_ownership_and_perm(&path, Some(stat), 0o600, description);
        }
    }

    fn directory_list(&self) -> Vec<DirectoryCheck> {
        let config = self.config;
        let mut list = Vec::new();

        let mut push = |path: Option<PathBuf>, perm, description, backup_root| {
            if let Some(path) = path {
                list.push(DirectoryCheck {
                    path,
                    perm,
                    description,
                    backup_root,
                });
            }
        };

        push(Some(config.backup_path()), 0o755, "backup directory", true);
        push(Some(config.log_path()), 0o755, "log directory", true);
        push(config.secondary_path(), 0o755, "secondary backup directory", true);
        push(config.secondary_log_path(), 0o755, "secondary log directory", true);
        push(Some(config.lock_path()), 0o755, "lock directory", false);
        push(Some(config.secure_account()), 0o700, "secure account directory", false);
        push(Some(config.identity_dir()), 0o700, "identity directory", false);
        push(Some(config.age_dir()), 0o700, "age directory", false);

        list
    }

    pub(super) fn check_directories(&mut self) {
        self.step("Checking directories");

        for dir in self.directory_list() {
            match self.host.lstat(&dir.path) {
                Ok(_) => (),
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    if let Err(err) = self.host.create_dir_all(&dir.path, dir.perm) {
                        self.warning(format!(
                            "unable to create {} {:?} - {}",
                            dir.description, dir.path, err
                        ));
                        continue;
                    }
                    log::info!("created {} {:?}", dir.description, dir.path);
                }
                Err(err) => {
                    self.warning(format!(
                        "cannot stat {} {:?} - {}",
                        dir.description, dir.path, err
                    ));
                    continue;
                }
            }

            let ownership = if dir.backup_root && self.config.set_backup_permissions {
                Ownership::Skip
            } else {
                Ownership::Root
            };

            self.ensure_perm_with_ownership(&dir.path, None, dir.perm, dir.description, ownership);
        }
    }

    pub(super) fn check_secure_account_files(&mut self) {
        self.step("Checking secure account files");

        let dir = self.config.secure_account();
        let entries = match self.host.read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return,
            Err(err) => {
                self.warning(format!(
                    "cannot list secure account directory {:?} - {}",
                    dir, err
                ));
                return;
            }
        };

        for path in entries {
            let name = match path.file_name().and_then(|name| name.to_str()) {
                Some(name) => name,
                None => continue,
            };
            if name.starts_with('.') || !name.ends_with(".json") {
                continue;
            }

            // symlinks are passed on so they get reported
            match self.host.lstat(&path) {
                Ok(stat) if stat.is_file() || stat.is_symlink() => {}
                _ => continue,
            }

            self.ensure_ownership_and_perm(&path, None, 0o600, "secure account file");
        }
    }
}
