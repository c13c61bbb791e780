//! Access to the host the probe runs on.
//!
//! Everything the detector and the security checks learn about the system goes through the
//! [`Host`] trait, [`SystemHost`] is the implementation backed by the real machine. Tests plug
//! in their own implementation to get deterministic answers without touching the host.

use std::io::{self, Read};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use anyhow::{format_err, Error};
use async_trait::async_trait;
use nix::sys::stat::Mode;
use nix::unistd::{Gid, Uid};

use proxmox_sys::fs::{create_path, replace_file, CreateOptions};

use preflight_tools::ProbeContext;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
    Symlink,
    Other,
}

/// The parts of `stat(2)` the probe looks at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileStat {
    pub kind: FileKind,
    /// Full `st_mode`, including type and special bits
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
}

impl FileStat {
    /// Permission bits (low 9 bits of the mode)
    pub fn perm(&self) -> u32 {
        self.mode & 0o777
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == FileKind::Symlink
    }

    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }

    pub fn owned_by_root(&self) -> bool {
        self.uid == 0 && self.gid == 0
    }
}

impl From<&std::fs::Metadata> for FileStat {
    fn from(meta: &std::fs::Metadata) -> Self {
        let file_type = meta.file_type();
        let kind = if file_type.is_symlink() {
            FileKind::Symlink
        } else if file_type.is_dir() {
            FileKind::Directory
        } else if file_type.is_file() {
            FileKind::File
        } else {
            FileKind::Other
        };

        Self {
            kind,
            mode: meta.mode(),
            uid: meta.uid(),
            gid: meta.gid(),
            size: meta.size(),
        }
    }
}

/// Short summary of an I/O error, as used in reports.
pub fn summarize_io_error(err: &io::Error) -> &'static str {
    match err.kind() {
        io::ErrorKind::NotFound => "not found",
        io::ErrorKind::PermissionDenied => "permission denied",
        _ => "error",
    }
}

#[async_trait]
pub trait Host: Send + Sync {
    fn env_var(&self, name: &str) -> Option<String>;

    fn set_env_var(&self, name: &str, value: &str);

    /// `stat(2)`, follows symlinks
    fn stat(&self, path: &Path) -> io::Result<FileStat>;

    /// `lstat(2)`, does not follow symlinks
    fn lstat(&self, path: &Path) -> io::Result<FileStat>;

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>>;

    fn read_link(&self, path: &Path) -> io::Result<PathBuf>;

    /// Entries of a directory, sorted by name
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// All regular files below `root`, in a stable order. Unreadable entries are skipped.
    fn walk_files(&self, root: &Path) -> Vec<PathBuf>;

    /// Atomically replace `path` with `data`, using permission `mode`.
    fn write_file(&self, path: &Path, data: &[u8], mode: u32) -> Result<(), Error>;

    /// Create `path` and missing parents, the final directory gets permission `mode`.
    fn create_dir_all(&self, path: &Path, mode: u32) -> Result<(), Error>;

    fn chmod(&self, path: &Path, mode: u32) -> Result<(), Error>;

    /// Change ownership without following symlinks.
    fn lchown(&self, path: &Path, uid: u32, gid: u32) -> Result<(), Error>;

    fn euid(&self) -> u32;

    fn username(&self) -> Option<String>;

    fn current_dir(&self) -> Option<PathBuf>;

    /// Current time as unix epoch
    fn now(&self) -> i64;

    async fn run_command(
        &self,
        ctx: &ProbeContext,
        program: &str,
        args: &[&str],
    ) -> Result<String, Error>;

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        let mut data = String::new();
        self.open(path)?.read_to_string(&mut data)?;
        Ok(data)
    }

    fn read_and_trim(&self, path: &Path) -> String {
        preflight_tools::fs::trim_or_empty(self.read_to_string(path))
    }

    fn path_exists(&self, path: &Path) -> bool {
        self.stat(path).is_ok()
    }

    fn file_exists(&self, path: &Path) -> bool {
        matches!(self.stat(path), Ok(stat) if !stat.is_dir())
    }

    fn dir_exists(&self, path: &Path) -> bool {
        matches!(self.stat(path), Ok(stat) if stat.is_dir())
    }

    fn is_executable(&self, path: &Path) -> bool {
        match self.stat(path) {
            Ok(stat) => preflight_tools::fs::mode_is_executable(stat.mode, stat.is_dir()),
            Err(_) => false,
        }
    }

    fn contains_any(&self, path: &Path, tokens: &[&str]) -> bool {
        match self.read_to_string(path) {
            Ok(data) => preflight_tools::fs::text_contains_any(&data, tokens),
            Err(_) => false,
        }
    }

    /// Resolve `binary` on the current `PATH`.
    fn lookup_path(&self, binary: &str) -> Option<PathBuf> {
        let path_var = self.env_var("PATH").unwrap_or_default();
        preflight_tools::path::lookup_path(binary, &path_var, |candidate| {
            self.is_executable(candidate)
        })
    }
}

/// The machine we are running on.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemHost;

#[async_trait]
impl Host for SystemHost {
    fn env_var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }

    fn set_env_var(&self, name: &str, value: &str) {
        std::env::set_var(name, value);
    }

    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        Ok(FileStat::from(&std::fs::metadata(path)?))
    }

    fn lstat(&self, path: &Path) -> io::Result<FileStat> {
        Ok(FileStat::from(&std::fs::symlink_metadata(path)?))
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(std::fs::File::open(path)?))
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        std::fs::read_link(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut list = Vec::new();
        for entry in std::fs::read_dir(path)? {
            list.push(entry?.path());
        }
        list.sort();
        Ok(list)
    }

    fn walk_files(&self, root: &Path) -> Vec<PathBuf> {
        walkdir::WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(err) => {
                    log::debug!("skipping unreadable entry below {:?} - {}", root, err);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect()
    }

    fn write_file(&self, path: &Path, data: &[u8], mode: u32) -> Result<(), Error> {
        let options = CreateOptions::new().perm(Mode::from_bits_truncate(mode));
        replace_file(path, data, options, true)
    }

    fn create_dir_all(&self, path: &Path, mode: u32) -> Result<(), Error> {
        let options = CreateOptions::new().perm(Mode::from_bits_truncate(mode));
        create_path(path, None, Some(options))?;
        // the umask may have masked some of the requested bits
        self.chmod(path, mode)
    }

    fn chmod(&self, path: &Path, mode: u32) -> Result<(), Error> {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .map_err(|err| format_err!("chmod {:?} failed - {}", path, err))
    }

    fn lchown(&self, path: &Path, uid: u32, gid: u32) -> Result<(), Error> {
        nix::unistd::fchownat(
            None,
            path,
            Some(Uid::from_raw(uid)),
            Some(Gid::from_raw(gid)),
            nix::unistd::FchownatFlags::NoFollowSymlink,
        )
        .map_err(|err| format_err!("chown {:?} failed - {}", path, err))
    }

    fn euid(&self) -> u32 {
        nix::unistd::geteuid().as_raw()
    }

    fn username(&self) -> Option<String> {
        match nix::unistd::User::from_uid(nix::unistd::geteuid()) {
            Ok(Some(user)) => Some(user.name),
            _ => None,
        }
    }

    fn current_dir(&self) -> Option<PathBuf> {
        std::env::current_dir().ok()
    }

    fn now(&self) -> i64 {
        proxmox_time::epoch_i64()
    }

    async fn run_command(
        &self,
        ctx: &ProbeContext,
        program: &str,
        args: &[&str],
    ) -> Result<String, Error> {
        preflight_tools::run_command(ctx, program, args).await
    }
}
