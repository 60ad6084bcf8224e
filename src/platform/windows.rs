//! Windows strategy — PowerShell structured queries with a legacy
//! wmic/netstat fallback.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use super::{extract_csrf_token, extract_extension_port, Diagnostics, PlatformStrategy, ProcessInfo};

static APP_DATA_DIR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)--app_data_dir\s+antigravity\b").unwrap());
static WMIC_PID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"ProcessId=(\d+)").unwrap());
static WMIC_CMDLINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"CommandLine=(.+)").unwrap());
static WMIC_BLOCK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n").unwrap());
static NETSTAT_LISTEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:127\.0\.0\.1|0\.0\.0\.0|\[::1?\]):(\d+)\s+(?:0\.0\.0\.0:0|\[::\]:0|\*:\*)")
        .unwrap()
});

pub struct WindowsStrategy {
    use_powershell: bool,
}

impl WindowsStrategy {
    pub fn new() -> Self {
        Self { use_powershell: true }
    }

    /// Switch to the legacy wmic/netstat surface (e.g. when PowerShell is
    /// restricted by policy).
    pub fn set_use_powershell(&mut self, use_powershell: bool) {
        self.use_powershell = use_powershell;
    }

    pub fn is_using_powershell(&self) -> bool {
        self.use_powershell
    }

    /// Is this command line the Antigravity language server? Matches the
    /// named launch argument or an `antigravity` path segment.
    fn is_target_process(command_line: &str) -> bool {
        if APP_DATA_DIR_RE.is_match(command_line) {
            return true;
        }
        let lower = command_line.to_lowercase();
        lower.contains(r"\antigravity\") || lower.contains("/antigravity/")
    }

    fn parse_json_process_info(&self, stdout: &str) -> Option<ProcessInfo> {
        let data: Value = match serde_json::from_str(stdout.trim()) {
            Ok(v) => v,
            Err(e) => {
                warn!("PowerShell output is not valid JSON: {}", e);
                debug!(
                    "Raw stdout (first 500 chars): {}",
                    stdout.chars().take(500).collect::<String>()
                );
                return None;
            }
        };

        let entry = match data {
            Value::Array(items) => {
                if items.is_empty() {
                    warn!("Empty process array - no language server processes found");
                    return None;
                }
                let total = items.len();
                let mut matches = items.into_iter().filter(|item| {
                    item["CommandLine"]
                        .as_str()
                        .is_some_and(Self::is_target_process)
                });
                let first = matches.next()?;
                let ambiguous = matches.count();
                if ambiguous > 0 {
                    info!(
                        "Selected Antigravity process PID {} (first match of {}, {} candidates total)",
                        first["ProcessId"], ambiguous + 1, total
                    );
                }
                first
            }
            single => {
                let command_line = single["CommandLine"].as_str().unwrap_or("");
                if !Self::is_target_process(command_line) {
                    warn!("Single process found but not Antigravity, skipping");
                    return None;
                }
                single
            }
        };

        let pid = entry["ProcessId"].as_u64()? as u32;
        let command_line = entry["CommandLine"].as_str().unwrap_or("");

        let csrf_token = match extract_csrf_token(command_line) {
            Some(t) => t,
            None => {
                warn!("CSRF token not found in command line for PID {}", pid);
                debug!("Full command line: {}", command_line);
                return None;
            }
        };

        Some(ProcessInfo {
            pid,
            extension_port: extract_extension_port(command_line),
            csrf_token,
        })
    }

    fn parse_wmic_process_info(&self, stdout: &str) -> Option<ProcessInfo> {
        let mut candidates = Vec::new();

        for block in WMIC_BLOCK_RE.split(stdout).filter(|b| !b.trim().is_empty()) {
            let Some(pid) = WMIC_PID_RE.captures(block).and_then(|c| c[1].parse().ok()) else {
                continue;
            };
            let Some(command_line) = WMIC_CMDLINE_RE.captures(block).map(|c| c[1].trim().to_string())
            else {
                continue;
            };

            if !Self::is_target_process(&command_line) {
                continue;
            }
            let Some(csrf_token) = extract_csrf_token(&command_line) else {
                debug!("wmic: PID {} has no CSRF token, skipping", pid);
                continue;
            };

            candidates.push(ProcessInfo {
                pid,
                extension_port: extract_extension_port(&command_line),
                csrf_token,
            });
        }

        if candidates.len() > 1 {
            info!(
                "wmic: {} Antigravity processes, using PID {}",
                candidates.len(),
                candidates[0].pid
            );
        }
        candidates.into_iter().next()
    }
}

impl PlatformStrategy for WindowsStrategy {
    fn process_list_command(&self, process_name: &str) -> String {
        if self.use_powershell {
            format!(
                "powershell -NoProfile -Command \"Get-CimInstance Win32_Process -Filter \\\"name='{process_name}'\\\" | Select-Object ProcessId,CommandLine | ConvertTo-Json\""
            )
        } else {
            format!("wmic process where \"name='{process_name}'\" get ProcessId,CommandLine /format:list")
        }
    }

    fn parse_process_info(&self, stdout: &str) -> Option<ProcessInfo> {
        let trimmed = stdout.trim();
        if self.use_powershell || trimmed.starts_with('{') || trimmed.starts_with('[') {
            if let Some(info) = self.parse_json_process_info(stdout) {
                return Some(info);
            }
            // JSON parse failures fall through to the legacy grammar; some
            // hosts alias `powershell` to something that prints plain text.
        }
        self.parse_wmic_process_info(stdout)
    }

    fn port_list_command(&self, pid: u32) -> String {
        if self.use_powershell {
            format!(
                "powershell -NoProfile -Command \"Get-NetTCPConnection -OwningProcess {pid} -State Listen | Select-Object -ExpandProperty LocalPort | ConvertTo-Json\""
            )
        } else {
            format!("netstat -ano | findstr \"{pid}\"")
        }
    }

    fn parse_listening_ports(&self, stdout: &str) -> Vec<u16> {
        let mut ports = BTreeSet::new();

        if self.use_powershell {
            match serde_json::from_str::<Value>(stdout.trim()) {
                Ok(Value::Array(items)) => {
                    for item in items {
                        if let Some(port) = item.as_u64().and_then(|p| u16::try_from(p).ok()) {
                            ports.insert(port);
                        }
                    }
                }
                Ok(Value::Number(n)) => {
                    if let Some(port) = n.as_u64().and_then(|p| u16::try_from(p).ok()) {
                        ports.insert(port);
                    }
                }
                _ => {}
            }
            return ports.into_iter().collect();
        }

        for cap in NETSTAT_LISTEN_RE.captures_iter(stdout) {
            if let Ok(port) = cap[1].parse() {
                ports.insert(port);
            }
        }
        ports.into_iter().collect()
    }

    fn requirements(&self) -> Diagnostics {
        Diagnostics {
            process_not_found: "language_server process not found",
            command_unavailable: if self.use_powershell {
                "PowerShell command failed; please check system permissions"
            } else {
                "wmic/PowerShell command unavailable; please check the system environment"
            },
            requirements: vec![
                "Antigravity is running",
                "language_server_windows_x64.exe process is running",
                if self.use_powershell {
                    "The system has permission to run PowerShell commands (Get-CimInstance, Get-NetTCPConnection)"
                } else {
                    "The system has permission to run wmic/PowerShell and netstat commands (auto-fallback supported)"
                },
            ],
        }
    }
}
