//! Antigravity quota monitor daemon.
//!
//! Locates the running language server, extracts its csrf token and
//! verified port, then polls it — plus any configured remote API
//! providers — for quota data, logging a merged summary and low-quota
//! alerts on every update.
//!
//! No failure here is fatal: discovery keeps retrying on a coarse timer,
//! and a failed fetch leaves the last snapshot in place.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

mod aggregator;
mod alerts;
mod config;
mod discovery;
mod error;
mod platform;
mod providers;
mod wire;

use aggregator::QuotaAggregator;
use alerts::QuotaAlerts;
use config::Config;
use discovery::ProcessFinder;
use providers::{
    antigravity, AnthropicProvider, AntigravityProvider, OpenAiProvider, QuotaSnapshot,
};

/// Initial discovery attempt budget at startup.
const DISCOVERY_ATTEMPTS: u32 = 3;
/// Coarse re-discovery period while the target application is not running.
const REDISCOVERY_PERIOD: Duration = Duration::from_secs(30);

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quotatray=info".into()),
        )
        .with_target(false)
        .init();

    info!("Antigravity Quota Monitor v{}", env!("CARGO_PKG_VERSION"));

    let config_path = Config::default_path()?;
    let config = Arc::new(Config::load(&config_path)?);
    info!("Config loaded from {}", config_path.display());

    // ── Providers & Aggregator ──────────────────────────────────────
    let antigravity_provider = AntigravityProvider::new()?;

    let mut aggregator = QuotaAggregator::new();
    aggregator.add_provider(Box::new(antigravity_provider.clone()));
    aggregator.add_provider(Box::new(AnthropicProvider::new(Arc::clone(&config))?));
    aggregator.add_provider(Box::new(OpenAiProvider::new(Arc::clone(&config))?));

    let alerts = Mutex::new(QuotaAlerts::new(config.low_quota_threshold));
    let summary_config = Arc::clone(&config);
    aggregator.on_update(Box::new(move |snapshots| {
        log_summary(&summary_config, snapshots);

        if summary_config.show_notifications {
            for alert in alerts.lock().unwrap().check(snapshots) {
                warn!("{}: {}", alert.title, alert.message);
            }
        }
    }));

    aggregator.on_error(Box::new(|provider, err| {
        error!("[{}] Quota fetch error: {}", provider, err);
    }));

    // ── Endpoint Discovery ──────────────────────────────────────────
    let finder = ProcessFinder::new()?;
    info!("Detecting Antigravity process...");

    let endpoint = loop {
        match finder.discover(DISCOVERY_ATTEMPTS).await {
            Some(endpoint) => break endpoint,
            None => {
                warn!(
                    "Could not find Antigravity process — retrying in {}s",
                    REDISCOVERY_PERIOD.as_secs()
                );
                tokio::time::sleep(REDISCOVERY_PERIOD).await;
            }
        }
    };

    info!("Connected to Antigravity on port {}", endpoint.connect_port);
    antigravity_provider.init(endpoint.connect_port, endpoint.csrf_token.clone());

    // ── Polling ─────────────────────────────────────────────────────
    let interval = config.polling_interval();
    info!(
        "Starting multi-provider polling (interval: {}s)",
        interval.as_secs()
    );
    aggregator.start_all(interval);

    wait_for_shutdown(&aggregator).await;

    info!("Shutting down");
    aggregator.stop_all();
    Ok(())
}

/// One-line status for the local provider on every merged update; the
/// remote liveness providers only get logged on error.
fn log_summary(config: &Config, snapshots: &HashMap<String, QuotaSnapshot>) {
    let Some(snapshot) = snapshots.get(antigravity::PROVIDER_NAME) else {
        return;
    };

    // Pinned models first, then the rest in snapshot order.
    let mut models: Vec<_> = snapshot.models.iter().collect();
    models.sort_by_key(|m| !config.pinned_models.contains(&m.model_id));

    let model_summary = models
        .iter()
        .map(|m| format!("{}: {:.0}%", m.label, m.remaining_percentage.unwrap_or(100.0)))
        .collect::<Vec<_>>()
        .join(", ");

    match &snapshot.prompt_credits {
        Some(credits) => info!(
            "AG: {} | Credits: {}/{} ({:.1}%)",
            model_summary, credits.available, credits.monthly, credits.remaining_percentage
        ),
        None => info!("AG: {}", model_summary),
    }
}

/// Block until Ctrl-C. On unix, SIGUSR1 triggers an immediate refresh of
/// every provider (the headless stand-in for the tray's manual refresh).
async fn wait_for_shutdown(aggregator: &QuotaAggregator) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut refresh = match signal(SignalKind::user_defined1()) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to install SIGUSR1 handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => return,
                _ = refresh.recv() => {
                    info!("Manual refresh requested");
                    aggregator.force_refresh_all().await;
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = aggregator;
        let _ = tokio::signal::ctrl_c().await;
    }
}
