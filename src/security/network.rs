//! Firewall and listening socket audit.

use std::collections::BTreeSet;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

use super::Checker;

lazy_static! {
    static ref SS_PROGRAM_REGEX: Regex = Regex::new(r#"users:\(\("([^"]+)""#).unwrap();
}

/// One listening socket as printed by `ss`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SsEntry {
    pub valid: bool,
    pub port: u16,
    pub address: String,
    /// Reachable from other hosts (not loopback)
    pub public: bool,
    /// Lowercased program name, empty without `-p`
    pub program: String,
}

fn is_public_address(address: &str) -> bool {
    !(address.starts_with("127.")
        || address == "::1"
        || address.to_lowercase().starts_with("local"))
}

/// Parse a line of `ss -tuln[ap]` output.
///
/// The fifth column holds the local `address:port`. Lines which do not carry a port (like the
/// header) are returned with `valid == false`.
pub fn parse_ss_line(line: &str) -> SsEntry {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 5 {
        return SsEntry::default();
    }

    let local = fields[4];
    let (host, port) = match local.rsplit_once(':') {
        Some(parts) => parts,
        None => return SsEntry::default(),
    };

    let port = match port.parse::<u16>() {
        Ok(port) => port,
        Err(_) => return SsEntry::default(),
    };

    let mut address = host.trim_start_matches('[').trim_end_matches(']').to_string();
    if address.is_empty() {
        address = String::from("0.0.0.0");
    }

    let program = SS_PROGRAM_REGEX
        .captures(line)
        .map(|caps| caps[1].to_lowercase())
        .unwrap_or_default();

    SsEntry {
        valid: true,
        port,
        public: is_public_address(&address),
        address,
        program,
    }
}

/// Number of actual rules in `iptables -L -n` output.
fn count_firewall_rules(output: &str) -> usize {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with("Chain ") && !line.starts_with("target"))
        .count()
}

impl<'a> Checker<'a> {
    /// Run `binary` with `args`, turning a missing binary or a failure into a warning.
    async fn network_command(&mut self, binary: &str, args: &[&str]) -> Option<String> {
        let path = match self.host.lookup_path(binary) {
            Some(path) => path,
            None => {
                self.warning(format!("{} not found, skipping check", binary));
                return None;
            }
        };
        let path = path.to_string_lossy().into_owned();

        match self.host.run_command(self.ctx, &path, args).await {
            Ok(output) => Some(output),
            Err(err) => {
                self.warning(format!("{} {} failed - {}", binary, args.join(" "), err));
                None
            }
        }
    }

    pub(super) async fn check_network(&mut self) {
        if self.config.check_firewall {
            self.check_firewall().await;
        }
        if self.config.check_open_ports {
            self.check_open_ports().await;
        }
        self.summarize_public_services().await;
    }

    async fn check_firewall(&mut self) {
        self.step("Checking firewall");

        let output = match self.network_command("iptables", &["-L", "-n"]).await {
            Some(output) => output,
            None => return,
        };

        match count_firewall_rules(&output) {
            0 => self.warning("no firewall rules found (iptables)"),
            rules => log::info!("found {} firewall rule(s)", rules),
        }
    }

    async fn check_open_ports(&mut self) {
        self.step("Checking open ports");

        let (whitelist, invalid) = self.config.parsed_port_whitelist();
        for err in invalid {
            self.warning(format!("ignoring port whitelist entry - {}", err));
        }

        let output = match self.network_command("ss", &["-tulnap"]).await {
            Some(output) => output,
            None => return,
        };

        let mut reported = BTreeSet::new();

        for entry in output.lines().map(parse_ss_line) {
            if !entry.valid || !entry.public {
                continue;
            }
            if !self.config.suspicious_ports.contains(&entry.port) {
                continue;
            }
            if whitelist.allows(entry.port, &entry.program) {
                log::debug!("port {} of {} is whitelisted", entry.port, entry.program);
                continue;
            }
            if !reported.insert((entry.port, entry.program.clone())) {
                continue;
            }

            let program = if entry.program.is_empty() {
                "unknown"
            } else {
                entry.program.as_str()
            };
            self.warning(format!(
                "Suspicious open port detected: {} (program {}, address {})",
                entry.port, program, entry.address
            ));
        }
    }

    /// Informational only, failures are logged and never recorded as issues.
    async fn summarize_public_services(&mut self) {
        let path = match self.host.lookup_path("ss") {
            Some(path) => path.to_string_lossy().into_owned(),
            None => {
                log::info!("ss not found, skipping public services summary");
                return;
            }
        };

        let output = match self.host.run_command(self.ctx, &path, &["-tuln"]).await {
            Ok(output) => output,
            Err(err) => {
                log::info!("unable to summarize public services - {}", err);
                return;
            }
        };

        let public = output
            .lines()
            .map(parse_ss_line)
            .filter(|entry| entry.valid && entry.public)
            .count();

        log::info!("{} publicly reachable listening socket(s)", public);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_ss_line() {
        let entry = parse_ss_line(
            r#"tcp   LISTEN 0      1      0.0.0.0:4444   0.0.0.0:*  users:(("nc",pid=1234,fd=3))"#,
        );
        assert!(entry.valid);
        assert!(entry.public);
        assert_eq!(entry.port, 4444);
        assert_eq!(entry.address, "0.0.0.0");
        assert_eq!(entry.program, "nc");

        let entry = parse_ss_line("tcp   LISTEN 0      4096       127.0.0.1:85         0.0.0.0:*");
        assert!(entry.valid);
        assert!(!entry.public);
        assert_eq!(entry.program, "");

        let entry = parse_ss_line(
            r#"tcp   LISTEN 0      128    [::]:22        [::]:*    users:(("SSHD",pid=1,fd=4))"#,
        );
        assert_eq!(entry.address, "::");
        assert!(entry.public);
        assert_eq!(entry.program, "sshd");

        let entry = parse_ss_line("udp   UNCONN 0      0              [::1]:323          [::]:*");
        assert_eq!(entry.address, "::1");
        assert!(!entry.public);

        let entry = parse_ss_line("tcp   LISTEN 0      128                *:8007             *:*");
        assert_eq!(entry.address, "*");
        assert!(entry.public);

        let entry = parse_ss_line("tcp   LISTEN 0      128                :9000             *:*");
        assert_eq!(entry.address, "0.0.0.0");

        let header = "Netid State  Recv-Q Send-Q Local Address:Port Peer Address:Port";
        assert!(!parse_ss_line(header).valid);
        assert!(!parse_ss_line("tcp LISTEN 0").valid);
    }

    #[test]
    fn test_count_firewall_rules() {
        let output = "Chain INPUT (policy ACCEPT)\n\
                      target     prot opt source               destination\n\
                      \n\
                      Chain FORWARD (policy ACCEPT)\n\
                      target     prot opt source               destination\n";
        assert_eq!(count_firewall_rules(output), 0);

        let output = "Chain INPUT (policy DROP)\n\
                      target     prot opt source               destination\n\
                      ACCEPT     tcp  --  0.0.0.0/0            0.0.0.0/0            tcp dpt:22\n";
        assert_eq!(count_firewall_rules(output), 1);
    }
}
