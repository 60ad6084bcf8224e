//! Unix strategies — darwin and linux differ only in the commands they
//! shell out to and the output grammar they parse.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use tracing::debug;

use super::{extract_csrf_token, extract_extension_port, Diagnostics, PlatformStrategy, ProcessInfo};

static LSOF_LISTEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:TCP|UDP)\s+(?:\*|[\d.]+|\[[\da-f:]+\]):(\d+)\s+\(LISTEN\)").unwrap()
});
static SS_LISTEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)LISTEN\s+\d+\s+\d+\s+(?:\*|[\d.]+|\[[\da-f:]*\]):(\d+)").unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnixFlavor {
    Darwin,
    Linux,
}

pub struct UnixStrategy {
    flavor: UnixFlavor,
}

impl UnixStrategy {
    pub fn new(flavor: UnixFlavor) -> Self {
        Self { flavor }
    }

    fn collect_ports(re: &Regex, stdout: &str) -> BTreeSet<u16> {
        re.captures_iter(stdout)
            .filter_map(|cap| cap[1].parse().ok())
            .collect()
    }
}

impl PlatformStrategy for UnixStrategy {
    fn process_list_command(&self, process_name: &str) -> String {
        match self.flavor {
            UnixFlavor::Darwin => format!("pgrep -fl {process_name}"),
            UnixFlavor::Linux => format!("pgrep -af {process_name}"),
        }
    }

    fn parse_process_info(&self, stdout: &str) -> Option<ProcessInfo> {
        for line in stdout.lines() {
            if !line.contains("--csrf_token") {
                continue;
            }
            let trimmed = line.trim();
            let (pid_field, command_line) = trimmed.split_once(char::is_whitespace)?;
            let Ok(pid) = pid_field.parse() else {
                debug!("pgrep line does not start with a PID: {}", trimmed);
                continue;
            };
            let csrf_token = extract_csrf_token(command_line)?;

            return Some(ProcessInfo {
                pid,
                extension_port: extract_extension_port(command_line),
                csrf_token,
            });
        }
        None
    }

    fn port_list_command(&self, pid: u32) -> String {
        match self.flavor {
            UnixFlavor::Darwin => format!("lsof -iTCP -sTCP:LISTEN -n -P -p {pid}"),
            // ss first; fall back to lsof when ss is missing or silent.
            UnixFlavor::Linux => format!(
                "ss -tlnp 2>/dev/null | grep \"pid={pid}\" || lsof -iTCP -sTCP:LISTEN -n -P -p {pid} 2>/dev/null"
            ),
        }
    }

    fn parse_listening_ports(&self, stdout: &str) -> Vec<u16> {
        let ports = match self.flavor {
            UnixFlavor::Darwin => Self::collect_ports(&LSOF_LISTEN_RE, stdout),
            UnixFlavor::Linux => {
                let ss_ports = Self::collect_ports(&SS_LISTEN_RE, stdout);
                if ss_ports.is_empty() {
                    Self::collect_ports(&LSOF_LISTEN_RE, stdout)
                } else {
                    ss_ports
                }
            }
        };
        ports.into_iter().collect()
    }

    fn requirements(&self) -> Diagnostics {
        Diagnostics {
            process_not_found: "Process not found",
            command_unavailable: "Command check failed",
            requirements: vec!["Antigravity is running", "pgrep and lsof (or ss on linux) are available"],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pgrep_line_parsed_into_triple() {
        let stdout = "\
1234 /usr/lib/systemd/systemd --user\n\
48291 /opt/antigravity/language_server_linux_x64 --extension_server_port 42100 --csrf_token 9f8e7d6c-1a2b-3c4d\n";
        let s = UnixStrategy::new(UnixFlavor::Linux);
        let info = s.parse_process_info(stdout).unwrap();
        assert_eq!(info.pid, 48291);
        assert_eq!(info.extension_port, 42100);
        assert_eq!(info.csrf_token, "9f8e7d6c-1a2b-3c4d");
    }

    #[test]
    fn test_line_without_token_is_not_found() {
        let stdout = "48291 /opt/antigravity/language_server_linux_x64 --extension_server_port 42100\n";
        let s = UnixStrategy::new(UnixFlavor::Linux);
        assert!(s.parse_process_info(stdout).is_none());
    }

    #[test]
    fn test_port_optional_defaults_zero() {
        let stdout = "48291 /opt/antigravity/ls --csrf_token deadbeef-1234\n";
        let s = UnixStrategy::new(UnixFlavor::Darwin);
        let info = s.parse_process_info(stdout).unwrap();
        assert_eq!(info.extension_port, 0);
    }

    #[test]
    fn test_darwin_lsof_listen_lines() {
        // Scenario: one LISTEN line on 51000, one non-listen line.
        let stdout = "\
COMMAND     PID USER   FD   TYPE             DEVICE SIZE/OFF NODE NAME\n\
language_ 48291  dev   23u  IPv4 0x1a2b3c4d      0t0  TCP 127.0.0.1:51000 (LISTEN)\n\
language_ 48291  dev   24u  IPv4 0x1a2b3c4e      0t0  TCP 127.0.0.1:51001->127.0.0.1:443 (ESTABLISHED)\n";
        let s = UnixStrategy::new(UnixFlavor::Darwin);
        assert_eq!(s.parse_listening_ports(stdout), vec![51000]);
    }

    #[test]
    fn test_linux_ss_output() {
        let stdout = "\
LISTEN 0 4096 127.0.0.1:42100 0.0.0.0:* users:((\"ls\",pid=48291,fd=23))\n\
LISTEN 0 4096 [::1]:51000 [::]:* users:((\"ls\",pid=48291,fd=24))\n";
        let s = UnixStrategy::new(UnixFlavor::Linux);
        assert_eq!(s.parse_listening_ports(stdout), vec![42100, 51000]);
    }

    #[test]
    fn test_linux_falls_back_to_lsof_grammar() {
        let stdout =
            "language_ 48291 dev 23u IPv4 0x0 0t0 TCP *:51000 (LISTEN)\n";
        let s = UnixStrategy::new(UnixFlavor::Linux);
        assert_eq!(s.parse_listening_ports(stdout), vec![51000]);
    }

    #[test]
    fn test_ports_idempotent_under_reordering_and_duplicates() {
        let a = "\
LISTEN 0 10 127.0.0.1:300 0.0.0.0:*\n\
LISTEN 0 10 127.0.0.1:100 0.0.0.0:*\n\
LISTEN 0 10 127.0.0.1:300 0.0.0.0:*\n\
LISTEN 0 10 127.0.0.1:200 0.0.0.0:*\n";
        let b = "\
LISTEN 0 10 127.0.0.1:200 0.0.0.0:*\n\
LISTEN 0 10 127.0.0.1:100 0.0.0.0:*\n\
LISTEN 0 10 127.0.0.1:300 0.0.0.0:*\n";
        let s = UnixStrategy::new(UnixFlavor::Linux);
        assert_eq!(s.parse_listening_ports(a), s.parse_listening_ports(b));
        assert_eq!(s.parse_listening_ports(a), vec![100, 200, 300]);
    }
}
