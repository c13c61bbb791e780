#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{self, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{bail, format_err, Error};
use async_trait::async_trait;
use tempfile::TempDir;

use proxmox_backup_preflight::host::{FileStat, Host};
use proxmox_backup_preflight::ProbeContext;

pub const FAKE_NOW: i64 = 1_700_000_000;

/// Host with its file system below a temporary directory.
///
/// All absolute paths are mapped into the temporary directory. Files are owned by `root:root`
/// unless changed with [`FakeHost::set_owner`], commands are answered from a script keyed by
/// the binary name.
pub struct FakeHost {
    root: TempDir,
    env: Mutex<HashMap<String, String>>,
    commands: Mutex<HashMap<String, Result<String, String>>>,
    owners: Mutex<HashMap<PathBuf, (u32, u32)>>,
    opened: Mutex<HashMap<PathBuf, usize>>,
    pub euid: u32,
}

impl FakeHost {
    pub fn new() -> Self {
        let root = tempfile::tempdir().expect("unable to create temporary directory");

        let mut env = HashMap::new();
        env.insert(String::from("PATH"), String::from("/usr/bin:/usr/sbin:/bin:/sbin"));
        env.insert(String::from("SHELL"), String::from("/bin/bash"));

        Self {
            root,
            env: Mutex::new(env),
            commands: Mutex::new(HashMap::new()),
            owners: Mutex::new(HashMap::new()),
            opened: Mutex::new(HashMap::new()),
            euid: 0,
        }
    }

    /// Location of `path` on the real file system.
    pub fn real(&self, path: &Path) -> PathBuf {
        let relative = path.strip_prefix("/").unwrap_or(path);
        self.root.path().join(relative)
    }

    fn virtual_path(&self, real: &Path) -> PathBuf {
        match real.strip_prefix(self.root.path()) {
            Ok(relative) => Path::new("/").join(relative),
            Err(_) => real.to_path_buf(),
        }
    }

    pub fn mkdir<P: AsRef<Path>>(&self, path: P, mode: u32) {
        let real = self.real(path.as_ref());
        std::fs::create_dir_all(&real).unwrap();
        std::fs::set_permissions(&real, std::fs::Permissions::from_mode(mode)).unwrap();
    }

    pub fn write<P: AsRef<Path>, D: AsRef<[u8]>>(&self, path: P, data: D, mode: u32) {
        let real = self.real(path.as_ref());
        if let Some(parent) = real.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&real, data).unwrap();
        std::fs::set_permissions(&real, std::fs::Permissions::from_mode(mode)).unwrap();
    }

    pub fn read<P: AsRef<Path>>(&self, path: P) -> String {
        std::fs::read_to_string(self.real(path.as_ref())).unwrap()
    }

    pub fn exists<P: AsRef<Path>>(&self, path: P) -> bool {
        self.real(path.as_ref()).exists()
    }

    pub fn mode<P: AsRef<Path>>(&self, path: P) -> u32 {
        let meta = std::fs::symlink_metadata(self.real(path.as_ref())).unwrap();
        meta.permissions().mode() & 0o777
    }

    /// Symlink `link` to `target`, both given as host paths.
    pub fn symlink<P: AsRef<Path>, Q: AsRef<Path>>(&self, target: P, link: Q) {
        let link = self.real(link.as_ref());
        if let Some(parent) = link.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::os::unix::fs::symlink(self.real(target.as_ref()), link).unwrap();
    }

    pub fn set_owner<P: AsRef<Path>>(&self, path: P, uid: u32, gid: u32) {
        self.owners
            .lock()
            .unwrap()
            .insert(path.as_ref().to_path_buf(), (uid, gid));
    }

    pub fn owner<P: AsRef<Path>>(&self, path: P) -> (u32, u32) {
        self.owners
            .lock()
            .unwrap()
            .get(path.as_ref())
            .copied()
            .unwrap_or((0, 0))
    }

    /// Number of attempts to open `path`, failed ones included.
    pub fn open_count<P: AsRef<Path>>(&self, path: P) -> usize {
        self.opened
            .lock()
            .unwrap()
            .get(path.as_ref())
            .copied()
            .unwrap_or(0)
    }

    /// Executable file `/usr/bin/<name>`.
    pub fn install_binary(&self, name: &str) {
        self.write(Path::new("/usr/bin").join(name), "#!/bin/sh\n", 0o755);
    }

    pub fn script_command(&self, name: &str, output: &str) {
        self.commands
            .lock()
            .unwrap()
            .insert(name.to_string(), Ok(output.to_string()));
    }

    pub fn script_failure(&self, name: &str, error: &str) {
        self.commands
            .lock()
            .unwrap()
            .insert(name.to_string(), Err(error.to_string()));
    }

    fn fake_stat(&self, path: &Path, mut stat: FileStat) -> FileStat {
        let (uid, gid) = self.owner(path);
        stat.uid = uid;
        stat.gid = gid;
        stat
    }
}

#[async_trait]
impl Host for FakeHost {
    fn env_var(&self, name: &str) -> Option<String> {
        self.env.lock().unwrap().get(name).cloned()
    }

    fn set_env_var(&self, name: &str, value: &str) {
        self.env
            .lock()
            .unwrap()
            .insert(name.to_string(), value.to_string());
    }

    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        let meta = std::fs::metadata(self.real(path))?;
        Ok(self.fake_stat(path, FileStat::from(&meta)))
    }

    fn lstat(&self, path: &Path) -> io::Result<FileStat> {
        let meta = std::fs::symlink_metadata(self.real(path))?;
        Ok(self.fake_stat(path, FileStat::from(&meta)))
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        *self
            .opened
            .lock()
            .unwrap()
            .entry(path.to_path_buf())
            .or_insert(0) += 1;
        Ok(Box::new(std::fs::File::open(self.real(path))?))
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        let target = std::fs::read_link(self.real(path))?;
        Ok(self.virtual_path(&target))
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut list = Vec::new();
        for entry in std::fs::read_dir(self.real(path))? {
            list.push(self.virtual_path(&entry?.path()));
        }
        list.sort();
        Ok(list)
    }

    fn walk_files(&self, root: &Path) -> Vec<PathBuf> {
        walkdir::WalkDir::new(self.real(root))
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| self.virtual_path(entry.path()))
            .collect()
    }

    fn write_file(&self, path: &Path, data: &[u8], mode: u32) -> Result<(), Error> {
        let real = self.real(path);
        std::fs::write(&real, data)?;
        std::fs::set_permissions(&real, std::fs::Permissions::from_mode(mode))?;
        Ok(())
    }

    fn create_dir_all(&self, path: &Path, mode: u32) -> Result<(), Error> {
        let real = self.real(path);
        std::fs::create_dir_all(&real)?;
        std::fs::set_permissions(&real, std::fs::Permissions::from_mode(mode))?;
        Ok(())
    }

    fn chmod(&self, path: &Path, mode: u32) -> Result<(), Error> {
        std::fs::set_permissions(self.real(path), std::fs::Permissions::from_mode(mode))
            .map_err(|err| format_err!("chmod {:?} failed - {}", path, err))
    }

    fn lchown(&self, path: &Path, uid: u32, gid: u32) -> Result<(), Error> {
        self.set_owner(path, uid, gid);
        Ok(())
    }

    fn euid(&self) -> u32 {
        self.euid
    }

    fn username(&self) -> Option<String> {
        Some(String::from("root"))
    }

    fn current_dir(&self) -> Option<PathBuf> {
        Some(PathBuf::from("/root"))
    }

    fn now(&self) -> i64 {
        FAKE_NOW
    }

    async fn run_command(
        &self,
        ctx: &ProbeContext,
        program: &str,
        _args: &[&str],
    ) -> Result<String, Error> {
        if ctx.is_cancelled() {
            bail!("command {:?} cancelled", program);
        }

        let name = Path::new(program)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| program.to_string());

        match self.commands.lock().unwrap().get(&name) {
            Some(Ok(output)) => Ok(output.clone()),
            Some(Err(err)) => bail!("command {:?} failed - {}", program, err),
            None => bail!("failed to execute {:?} - not scripted", program),
        }
    }
}
