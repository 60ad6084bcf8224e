//! Anthropic provider — same liveness-probe model as the OpenAI one;
//! standard keys expose no usage endpoint without organization scope.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::{
    api_error_from_body, CallbackSlot, ErrorCallback, ModelQuotaInfo, PollTimer, QuotaProvider,
    QuotaSnapshot, UpdateCallback, REMOTE_POLL_FLOOR,
};
use crate::config::Config;
use crate::error::ProviderError;

pub const PROVIDER_NAME: &str = "Anthropic Claude";

const MODELS_URL: &str = "https://api.anthropic.com/v1/models";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const FETCH_TIMEOUT: Duration = Duration::from_secs(8);

struct Inner {
    client: reqwest::Client,
    config: Arc<Config>,
    update: CallbackSlot<dyn Fn(QuotaSnapshot) + Send + Sync>,
    errors: CallbackSlot<dyn Fn(ProviderError) + Send + Sync>,
    poll: PollTimer,
}

#[derive(Clone)]
pub struct AnthropicProvider {
    inner: Arc<Inner>,
}

impl AnthropicProvider {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .context("Failed to build Anthropic client")?;

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                config,
                update: CallbackSlot::new(),
                errors: CallbackSlot::new(),
                poll: PollTimer::new(),
            }),
        })
    }
}

impl Inner {
    async fn fetch(&self) {
        // Unconfigured key: skip silently, emit nothing.
        let Some(key) = self.config.anthropic_api_key().map(str::to_owned) else {
            debug!("Anthropic API key not configured — skipping fetch");
            return;
        };

        match self.probe_models(&key).await {
            Ok(()) => self.update.emit(pseudo_snapshot()),
            Err(e) => {
                warn!("Anthropic quota fetch error: {}", e);
                self.errors.emit(e);
            }
        }
    }

    async fn probe_models(&self, key: &str) -> std::result::Result<(), ProviderError> {
        let resp = self
            .client
            .get(MODELS_URL)
            .header("x-api-key", key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            return Err(api_error_from_body("Anthropic", status.as_u16(), &body));
        }
        serde_json::from_str::<serde_json::Value>(&body)
            .map_err(|_| ProviderError::MalformedResponse("Anthropic"))?;
        Ok(())
    }
}

/// Key is live and billing-enabled; synthesize "unlimited".
fn pseudo_snapshot() -> QuotaSnapshot {
    let now = Utc::now();
    QuotaSnapshot {
        timestamp: now,
        prompt_credits: None,
        models: vec![ModelQuotaInfo {
            label: "Claude Sonnet/Opus".to_string(),
            model_id: "claude-3-anthropic".to_string(),
            remaining_fraction: Some(1.0),
            remaining_percentage: Some(100.0),
            is_exhausted: false,
            reset_time: now,
            time_until_reset: chrono::Duration::zero(),
            time_until_reset_formatted: "Pay-As-You-Go".to_string(),
        }],
    }
}

#[async_trait]
impl QuotaProvider for AnthropicProvider {
    fn provider_name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn on_update(&self, callback: UpdateCallback) {
        self.inner.update.set(callback);
    }

    fn on_error(&self, callback: ErrorCallback) {
        self.inner.errors.set(callback);
    }

    fn start_polling(&self, interval: Duration) {
        self.stop_polling();
        let interval = interval.max(REMOTE_POLL_FLOOR);
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                inner.fetch().await;
            }
        });
        self.inner.poll.replace(handle);
    }

    fn stop_polling(&self) {
        self.inner.poll.stop();
    }

    async fn fetch_quota(&self) {
        self.inner.fetch().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pseudo_snapshot_is_unlimited() {
        let snapshot = pseudo_snapshot();
        let model = &snapshot.models[0];
        assert_eq!(model.model_id, "claude-3-anthropic");
        assert_eq!(model.remaining_fraction, Some(1.0));
        assert!(!model.is_exhausted);
    }

    #[tokio::test]
    async fn test_unconfigured_key_emits_nothing() {
        let provider = AnthropicProvider::new(Arc::new(Config::default())).unwrap();
        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let f = Arc::clone(&fired);
        provider.on_update(Box::new(move |_| {
            f.store(true, std::sync::atomic::Ordering::SeqCst);
        }));
        let f = Arc::clone(&fired);
        provider.on_error(Box::new(move |_| {
            f.store(true, std::sync::atomic::Ordering::SeqCst);
        }));

        provider.fetch_quota().await;
        assert!(!fired.load(std::sync::atomic::Ordering::SeqCst));
    }
}
