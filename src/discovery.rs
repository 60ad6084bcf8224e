//! Endpoint discovery — finds the running language server, extracts its
//! csrf token and candidate ports, and verifies one port with an
//! authenticated health probe.
//!
//! Command execution and probing sit behind traits so the retry loop can
//! be exercised in tests without shelling out or opening sockets.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::platform::{select_strategy, PlatformStrategy};
use crate::wire;

/// Sleep between failed discovery attempts.
const RETRY_DELAY: Duration = Duration::from_millis(100);
/// Per-port health probe timeout.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// A verified, reachable endpoint. Sole input to the local provider's
/// `init`; replaced wholesale on re-discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    pub extension_port: u16,
    pub connect_port: u16,
    pub csrf_token: String,
}

/// Runs an OS shell command and returns its stdout. A non-zero exit
/// status is an error, matching `exec` semantics — an empty `pgrep` is a
/// failed attempt, not an empty success.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str) -> Result<String>;
}

pub struct ShellRunner;

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str) -> Result<String> {
        let output = if cfg!(windows) {
            Command::new("cmd").args(["/C", command]).output().await
        } else {
            Command::new("sh").args(["-c", command]).output().await
        }
        .with_context(|| format!("Failed to execute: {command}"))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            warn!("Command stderr: {}", stderr.trim_end());
        }
        if !output.status.success() {
            bail!("Command exited with {}: {}", output.status, stderr.trim_end());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Single authenticated probe against one candidate port.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, port: u16, csrf_token: &str) -> bool;
}

/// POSTs an empty unleash-data request over HTTPS; the server uses a
/// self-signed certificate, so verification is disabled for this
/// loopback-only client.
pub struct HttpsProbe {
    client: reqwest::Client,
}

impl HttpsProbe {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(PROBE_TIMEOUT)
            .build()
            .context("Failed to build health probe client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthProbe for HttpsProbe {
    async fn probe(&self, port: u16, csrf_token: &str) -> bool {
        let url = format!(
            "https://{}:{}{}",
            wire::LOOPBACK_HOST,
            port,
            wire::UNLEASH_DATA_PATH
        );
        debug!("Probing {}", url);

        let result = self
            .client
            .post(&url)
            .header(wire::HEADER_CSRF_TOKEN, csrf_token)
            .header(wire::HEADER_PROTOCOL_VERSION, wire::PROTOCOL_VERSION)
            .json(&serde_json::json!({"wrapper_data": {}}))
            .send()
            .await;

        match result {
            Ok(resp) => {
                debug!("Port {} responded with status {}", port, resp.status());
                resp.status() == reqwest::StatusCode::OK
            }
            Err(e) => {
                debug!("Port {} probe failed: {}", port, e);
                false
            }
        }
    }
}

pub struct ProcessFinder {
    strategy: Box<dyn PlatformStrategy>,
    process_name: String,
    runner: Box<dyn CommandRunner>,
    probe: Box<dyn HealthProbe>,
}

impl ProcessFinder {
    /// Finder for the running host OS/arch, selected once at startup.
    pub fn new() -> Result<Self> {
        let (strategy, process_name) = select_strategy();
        info!("Target process name: {}", process_name);
        Ok(Self {
            strategy,
            process_name,
            runner: Box::new(ShellRunner),
            probe: Box::new(HttpsProbe::new()?),
        })
    }

    #[cfg(test)]
    pub fn with_parts(
        strategy: Box<dyn PlatformStrategy>,
        process_name: impl Into<String>,
        runner: Box<dyn CommandRunner>,
        probe: Box<dyn HealthProbe>,
    ) -> Self {
        Self {
            strategy,
            process_name: process_name.into(),
            runner,
            probe,
        }
    }

    /// Try up to `max_attempts` times to locate the process and verify one
    /// of its listening ports. Failures within an attempt are logged and
    /// do not abort the remaining attempts; 100 ms fixed sleep between
    /// attempts. `None` after the budget is exhausted — the caller retries
    /// on its own coarse timer.
    pub async fn discover(&self, max_attempts: u32) -> Option<ResolvedEndpoint> {
        info!("Starting process detection (max_attempts: {})", max_attempts);

        for attempt in 1..=max_attempts {
            debug!("Attempt {}/{}", attempt, max_attempts);

            if let Some(endpoint) = self.attempt().await {
                return Some(endpoint);
            }

            if attempt < max_attempts {
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }

        let diag = self.strategy.requirements();
        error!(
            "Process detection failed after {} attempt(s): {}",
            max_attempts, diag.process_not_found
        );
        for req in &diag.requirements {
            info!("Requirement: {}", req);
        }
        None
    }

    async fn attempt(&self) -> Option<ResolvedEndpoint> {
        let cmd = self.strategy.process_list_command(&self.process_name);
        let stdout = match self.runner.run(&cmd).await {
            Ok(out) => out,
            Err(e) => {
                warn!(
                    "{}: {}",
                    self.strategy.requirements().command_unavailable,
                    e
                );
                return None;
            }
        };

        let Some(info) = self.strategy.parse_process_info(&stdout) else {
            warn!("Failed to parse process info from command output");
            debug!(
                "Raw stdout ({} chars): {}",
                stdout.len(),
                stdout.chars().take(500).collect::<String>()
            );
            return None;
        };
        info!(
            "Found PID {} (extension_port: {}, csrf_token: {}...)",
            info.pid,
            info.extension_port,
            info.csrf_token.chars().take(8).collect::<String>()
        );

        let ports = self.listening_ports(info.pid).await;
        if ports.is_empty() {
            warn!("No listening ports found for PID {}", info.pid);
            return None;
        }
        debug!("Found {} listening port(s): {:?}", ports.len(), ports);

        // Strictly sequential, ascending; stop at the first responding
        // port so we never fan out connections to unknown local sockets.
        let connect_port = self.find_working_port(&ports, &info.csrf_token).await?;
        info!("Valid port found: {}", connect_port);

        Some(ResolvedEndpoint {
            extension_port: info.extension_port,
            connect_port,
            csrf_token: info.csrf_token,
        })
    }

    async fn listening_ports(&self, pid: u32) -> Vec<u16> {
        let cmd = self.strategy.port_list_command(pid);
        match self.runner.run(&cmd).await {
            Ok(stdout) => self.strategy.parse_listening_ports(&stdout),
            Err(e) => {
                warn!("Failed to list ports for PID {}: {}", pid, e);
                Vec::new()
            }
        }
    }

    async fn find_working_port(&self, ports: &[u16], csrf_token: &str) -> Option<u16> {
        for &port in ports {
            if self.probe.probe(port, csrf_token).await {
                return Some(port);
            }
            debug!("Port {} did not respond", port);
        }
        warn!("No ports responded successfully to health check");
        None
    }
}
