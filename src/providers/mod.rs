//! Quota provider abstraction — one implementation per backend.
//!
//! A provider fetches and normalizes one immutable [`QuotaSnapshot`] at a
//! time and owns its own poll timer. Snapshots are superseded wholesale;
//! fields from successive fetches are never merged.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::error::ProviderError;

pub mod anthropic;
pub mod antigravity;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use antigravity::AntigravityProvider;
pub use openai::OpenAiProvider;

/// Remote API-key providers never poll faster than this, regardless of
/// the requested interval.
pub const REMOTE_POLL_FLOOR: Duration = Duration::from_secs(300);

// ── Data Model ──────────────────────────────────────────────────────

/// Quota state for one model within a snapshot. `model_id` is the unique
/// key within the snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelQuotaInfo {
    pub label: String,
    pub model_id: String,
    pub remaining_fraction: Option<f64>,
    pub remaining_percentage: Option<f64>,
    pub is_exhausted: bool,
    pub reset_time: DateTime<Utc>,
    pub time_until_reset: ChronoDuration,
    pub time_until_reset_formatted: String,
}

impl ModelQuotaInfo {
    /// Derive the percentage, exhaustion flag and reset countdown from a
    /// raw quota block.
    pub fn from_quota(
        label: String,
        model_id: String,
        remaining_fraction: Option<f64>,
        reset_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        let diff = reset_time - now;
        Self {
            label,
            model_id,
            remaining_fraction,
            remaining_percentage: remaining_fraction.map(|f| f * 100.0),
            is_exhausted: remaining_fraction == Some(0.0),
            reset_time,
            time_until_reset: diff,
            time_until_reset_formatted: format_reset_countdown(diff),
        }
    }
}

/// Prompt credit balance; percentages are derived from available/monthly
/// and always sum to 100.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptCreditsInfo {
    pub available: f64,
    pub monthly: f64,
    pub used_percentage: f64,
    pub remaining_percentage: f64,
}

impl PromptCreditsInfo {
    /// `None` unless the monthly allowance is positive — the ratios are
    /// meaningless otherwise.
    pub fn derive(available: f64, monthly: f64) -> Option<Self> {
        if monthly <= 0.0 {
            return None;
        }
        Some(Self {
            available,
            monthly,
            used_percentage: ((monthly - available) / monthly) * 100.0,
            remaining_percentage: (available / monthly) * 100.0,
        })
    }
}

/// One immutable fetch result from a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaSnapshot {
    pub timestamp: DateTime<Utc>,
    pub prompt_credits: Option<PromptCreditsInfo>,
    pub models: Vec<ModelQuotaInfo>,
}

/// `"Ready"` once the deadline has passed; minutes (rounded up) under an
/// hour; `"{h}h {m}m"` beyond.
pub fn format_reset_countdown(diff: ChronoDuration) -> String {
    let ms = diff.num_milliseconds();
    if ms <= 0 {
        return "Ready".to_string();
    }
    let mins = (ms + 59_999) / 60_000;
    if mins < 60 {
        return format!("{mins}m");
    }
    format!("{}h {}m", mins / 60, mins % 60)
}

// ── Provider Trait ──────────────────────────────────────────────────

pub type UpdateCallback = Box<dyn Fn(QuotaSnapshot) + Send + Sync>;
pub type ErrorCallback = Box<dyn Fn(ProviderError) + Send + Sync>;

/// Common capability set for all quota backends.
///
/// `on_update`/`on_error` hold at most one subscriber each — a new
/// registration replaces the previous one. `fetch_quota` is idempotent
/// and safe to call while a poll timer is running.
#[async_trait]
pub trait QuotaProvider: Send + Sync {
    /// Unique identity used as the key in the aggregate map.
    fn provider_name(&self) -> &'static str;

    fn on_update(&self, callback: UpdateCallback);
    fn on_error(&self, callback: ErrorCallback);

    /// Fetch immediately, then on every interval tick. Stops any previous
    /// timer first, so re-initialization never leaves two timers running.
    fn start_polling(&self, interval: Duration);

    /// Safe to call even when polling was never started.
    fn stop_polling(&self);

    async fn fetch_quota(&self);
}

// ── Poll Timer ──────────────────────────────────────────────────────

/// The single timer handle a provider owns. Replacing or stopping aborts
/// the running task; dropping the provider does the same.
pub(crate) struct PollTimer {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PollTimer {
    pub fn new() -> Self {
        Self {
            handle: Mutex::new(None),
        }
    }

    pub fn replace(&self, handle: JoinHandle<()>) {
        if let Some(old) = self.handle.lock().unwrap().replace(handle) {
            old.abort();
        }
    }

    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.abort();
        }
    }
}

impl Drop for PollTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Last-registration-wins callback slot shared by all providers.
pub(crate) struct CallbackSlot<T: ?Sized> {
    slot: Mutex<Option<Box<T>>>,
}

impl<T: ?Sized> CallbackSlot<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    pub fn set(&self, callback: Box<T>) {
        *self.slot.lock().unwrap() = Some(callback);
    }
}

impl CallbackSlot<dyn Fn(QuotaSnapshot) + Send + Sync> {
    pub fn emit(&self, snapshot: QuotaSnapshot) {
        if let Some(cb) = self.slot.lock().unwrap().as_ref() {
            cb(snapshot);
        }
    }
}

impl CallbackSlot<dyn Fn(ProviderError) + Send + Sync> {
    pub fn emit(&self, error: ProviderError) {
        if let Some(cb) = self.slot.lock().unwrap().as_ref() {
            cb(error);
        }
    }
}

/// Build an API error from an HTTP error response, carrying the parsed
/// `error.message` when the body is the standard error envelope.
pub(crate) fn api_error_from_body(
    provider: &'static str,
    status: u16,
    body: &str,
) -> ProviderError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from));
    ProviderError::Api {
        provider,
        status,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_countdown_formatting_boundaries() {
        assert_eq!(format_reset_countdown(ChronoDuration::zero()), "Ready");
        assert_eq!(format_reset_countdown(ChronoDuration::minutes(-5)), "Ready");
        assert_eq!(format_reset_countdown(ChronoDuration::milliseconds(1)), "1m");
        assert_eq!(format_reset_countdown(ChronoDuration::minutes(59)), "59m");
        assert_eq!(format_reset_countdown(ChronoDuration::minutes(60)), "1h 0m");
        assert_eq!(format_reset_countdown(ChronoDuration::minutes(90)), "1h 30m");
        assert_eq!(format_reset_countdown(ChronoDuration::minutes(135)), "2h 15m");
    }

    #[test]
    fn test_model_quota_derivations() {
        let now = Utc::now();
        let info = ModelQuotaInfo::from_quota(
            "Model".into(),
            "model-1".into(),
            Some(0.15),
            now + ChronoDuration::minutes(30),
            now,
        );
        assert_eq!(info.remaining_percentage, Some(15.0));
        assert!(!info.is_exhausted);
        assert_eq!(info.time_until_reset_formatted, "30m");

        let exhausted =
            ModelQuotaInfo::from_quota("M".into(), "m".into(), Some(0.0), now, now);
        assert!(exhausted.is_exhausted);
        assert_eq!(exhausted.remaining_percentage, Some(0.0));
        assert_eq!(exhausted.time_until_reset_formatted, "Ready");

        let unknown = ModelQuotaInfo::from_quota("M".into(), "m".into(), None, now, now);
        assert!(!unknown.is_exhausted);
        assert_eq!(unknown.remaining_percentage, None);
    }

    #[test]
    fn test_prompt_credits_require_positive_monthly() {
        let credits = PromptCreditsInfo::derive(250.0, 1000.0).unwrap();
        assert_eq!(credits.remaining_percentage, 25.0);
        assert_eq!(credits.used_percentage, 75.0);
        assert_eq!(credits.used_percentage + credits.remaining_percentage, 100.0);

        assert!(PromptCreditsInfo::derive(10.0, 0.0).is_none());
        assert!(PromptCreditsInfo::derive(10.0, -5.0).is_none());
    }
}
