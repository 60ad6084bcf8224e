//! Per-OS process introspection strategies.
//!
//! Each strategy knows how to build the OS command that lists candidate
//! language-server processes, how to parse that command's output into a
//! [`ProcessInfo`], and how to list a process's listening ports. Parsers
//! are pure text → value functions so they can be tested against captured
//! command output without shelling out.

use once_cell::sync::Lazy;
use regex::Regex;

pub mod unix;
pub mod windows;

pub use unix::{UnixFlavor, UnixStrategy};
pub use windows::WindowsStrategy;

/// One discovered language-server process.
///
/// Either the full triple is produced or nothing — a process without a
/// csrf token in its launch arguments is useless to us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    /// Extension server port from the launch arguments; 0 when absent.
    pub extension_port: u16,
    pub csrf_token: String,
}

/// Operator-facing diagnostic strings, logged when discovery gives up.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    pub process_not_found: &'static str,
    pub command_unavailable: &'static str,
    pub requirements: Vec<&'static str>,
}

/// Capability set implemented once per OS, selected a single time at
/// startup — never re-checked at runtime.
pub trait PlatformStrategy: Send + Sync {
    /// Shell command that lists candidate processes by name.
    fn process_list_command(&self, process_name: &str) -> String;

    /// Parse process-list output. Complete triple or not-found, never a
    /// partial result.
    fn parse_process_info(&self, stdout: &str) -> Option<ProcessInfo>;

    /// Shell command that lists a process's listening TCP ports.
    fn port_list_command(&self, pid: u32) -> String;

    /// Parse port-list output into a sorted, de-duplicated ascending list.
    fn parse_listening_ports(&self, stdout: &str) -> Vec<u16>;

    fn requirements(&self) -> Diagnostics;
}

/// Pick the strategy and target process name for the running host.
pub fn select_strategy() -> (Box<dyn PlatformStrategy>, String) {
    let arch = std::env::consts::ARCH;
    match std::env::consts::OS {
        "windows" => (
            Box::new(WindowsStrategy::new()),
            "language_server_windows_x64.exe".to_string(),
        ),
        "macos" => {
            let suffix = if arch == "aarch64" { "_arm" } else { "" };
            (
                Box::new(UnixStrategy::new(UnixFlavor::Darwin)),
                format!("language_server_macos{suffix}"),
            )
        }
        _ => {
            let suffix = if arch == "aarch64" { "_arm" } else { "_x64" };
            (
                Box::new(UnixStrategy::new(UnixFlavor::Linux)),
                format!("language_server_linux{suffix}"),
            )
        }
    }
}

static EXTENSION_PORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"--extension_server_port[=\s]+(\d+)").unwrap());
static CSRF_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)--csrf_token[=\s]+([a-f0-9-]+)").unwrap());

/// Extension server port from a command line; 0 when the argument is
/// missing or out of range.
pub(crate) fn extract_extension_port(command_line: &str) -> u16 {
    EXTENSION_PORT_RE
        .captures(command_line)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(0)
}

/// The csrf token argument (hex/hyphen shape). Required — a command line
/// without it yields no [`ProcessInfo`].
pub(crate) fn extract_csrf_token(command_line: &str) -> Option<String> {
    CSRF_TOKEN_RE
        .captures(command_line)
        .map(|c| c[1].to_string())
}
