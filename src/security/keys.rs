//! Scan for private key material left in the identity directory.

use std::path::Path;

use super::Checker;

const KEY_MARKERS: &[&str] = &[
    "AGE-SECRET-KEY-",
    "BEGIN AGE PRIVATE KEY",
    "OPENSSH PRIVATE KEY",
];

/// Only the head of each file is scanned
const KEY_SCAN_LIMIT: u64 = 64 * 1024;

const SKIPPED_EXTENSIONS: &[&str] = &["md", "txt", "example"];

fn is_skipped(path: &Path) -> bool {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => SKIPPED_EXTENSIONS.contains(&ext),
        None => false,
    }
}

impl<'a> Checker<'a> {
    pub(super) fn scan_private_keys(&mut self) {
        self.step("Scanning for private keys");

        let identity_dir = self.config.identity_dir();

        for path in self.host.walk_files(&identity_dir) {
            if is_skipped(&path) {
                continue;
            }

            let found = self.host.open(&path).and_then(|mut file| {
                preflight_tools::fs::reader_contains_marker(&mut file, KEY_MARKERS, KEY_SCAN_LIMIT)
            });

            match found {
                Ok(true) => self.warning(format!(
                    "private key material found in {:?} - keep private keys off the backup host",
                    path
                )),
                Ok(false) => (),
                Err(err) => self.warning(format!("cannot scan {:?} - {}", path, err)),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_skipped_extensions() {
        assert!(is_skipped(Path::new("/x/identity/README.md")));
        assert!(is_skipped(Path::new("/x/identity/age/recipient.txt")));
        assert!(is_skipped(Path::new("/x/identity/key.example")));
        assert!(!is_skipped(Path::new("/x/identity/age/key")));
        assert!(!is_skipped(Path::new("/x/identity/.server_identity")));
    }
}
