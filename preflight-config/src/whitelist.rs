use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use anyhow::{bail, format_err, Error};

/// One `<program>:<port>` whitelist entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortWhitelistEntry {
    /// Lowercased program name as shown by `ss`
    pub program: String,
    pub port: u16,
}

impl FromStr for PortWhitelistEntry {
    type Err = Error;

    fn from_str(entry: &str) -> Result<Self, Error> {
        let entry = entry.trim();
        let (program, port) = entry
            .rsplit_once(':')
            .ok_or_else(|| format_err!("missing ':' in port whitelist entry '{}'", entry))?;

        let program = program.trim();
        if program.is_empty() {
            bail!("missing program in port whitelist entry '{}'", entry);
        }

        let port = port
            .trim()
            .parse::<u16>()
            .map_err(|err| format_err!("invalid port in whitelist entry '{}' - {}", entry, err))?;

        Ok(Self {
            program: program.to_lowercase(),
            port,
        })
    }
}

impl fmt::Display for PortWhitelistEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.program, self.port)
    }
}

/// Programs allowed to listen on otherwise suspicious ports.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PortWhitelist {
    ports: BTreeMap<u16, BTreeSet<String>>,
}

impl PortWhitelist {
    /// Parse a list of `<program>:<port>` entries, malformed entries are returned separately.
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> (Self, Vec<String>) {
        let mut list = Self::default();
        let mut invalid = Vec::new();

        for entry in entries {
            let entry = entry.as_ref();
            if entry.trim().is_empty() {
                continue;
            }
            match entry.parse::<PortWhitelistEntry>() {
                Ok(entry) => list.insert(entry),
                Err(err) => invalid.push(err.to_string()),
            }
        }

        (list, invalid)
    }

    pub fn insert(&mut self, entry: PortWhitelistEntry) {
        self.ports.entry(entry.port).or_default().insert(entry.program);
    }

    /// Program names are compared ignoring case.
    pub fn allows(&self, port: u16, program: &str) -> bool {
        match self.ports.get(&port) {
            Some(programs) => programs.contains(&program.to_lowercase()),
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_whitelist() {
        let (list, invalid) =
            PortWhitelist::parse(&["NC:4444", " sshd : 22 ", "", "broken", ":80", "x:99999"]);

        assert!(list.allows(4444, "nc"));
        assert!(list.allows(4444, "Nc"));
        assert!(!list.allows(4444, "ncat"));
        assert!(list.allows(22, "sshd"));
        assert!(!list.allows(80, "nginx"));
        assert_eq!(invalid.len(), 3);
    }

    #[test]
    fn test_entry_display() {
        let entry: PortWhitelistEntry = "Caddy:443".parse().unwrap();
        assert_eq!(entry.to_string(), "caddy:443");
    }
}
