//! Local Antigravity provider — polls the discovered language server for
//! real per-model quota and prompt-credit data.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::{
    CallbackSlot, ErrorCallback, ModelQuotaInfo, PollTimer, PromptCreditsInfo, QuotaProvider,
    QuotaSnapshot, UpdateCallback,
};
use crate::error::ProviderError;
use crate::wire;

pub const PROVIDER_NAME: &str = "Google Antigravity";

/// Local quota fetch timeout.
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

// ── Response Shape ──────────────────────────────────────────────────
// The backend emits camelCase; older builds emit snake_case. Field names
// are snake_case with a camelCase alias so both decode.

#[derive(Debug, Deserialize)]
struct UserStatusResponse {
    #[serde(alias = "userStatus")]
    user_status: UserStatus,
}

#[derive(Debug, Default, Deserialize)]
struct UserStatus {
    #[serde(default, alias = "planStatus")]
    plan_status: Option<PlanStatus>,
    #[serde(default, alias = "cascadeModelConfigData")]
    cascade_model_config_data: Option<ModelConfigData>,
}

#[derive(Debug, Deserialize)]
struct PlanStatus {
    #[serde(default, alias = "planInfo")]
    plan_info: Option<PlanInfo>,
    #[serde(default, alias = "availablePromptCredits")]
    available_prompt_credits: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct PlanInfo {
    #[serde(default, alias = "monthlyPromptCredits")]
    monthly_prompt_credits: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ModelConfigData {
    #[serde(default, alias = "clientModelConfigs")]
    client_model_configs: Vec<ModelConfig>,
}

#[derive(Debug, Deserialize)]
struct ModelConfig {
    #[serde(default)]
    label: Option<String>,
    #[serde(default, alias = "modelOrAlias")]
    model_or_alias: Option<ModelOrAlias>,
    #[serde(default, alias = "quotaInfo")]
    quota_info: Option<QuotaInfo>,
}

#[derive(Debug, Deserialize)]
struct ModelOrAlias {
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QuotaInfo {
    #[serde(default, alias = "remainingFraction")]
    remaining_fraction: Option<f64>,
    #[serde(default, alias = "resetTime")]
    reset_time: Option<String>,
}

// ── Provider ────────────────────────────────────────────────────────

struct Inner {
    client: reqwest::Client,
    /// `(connect_port, csrf_token)` from the resolved endpoint; set by
    /// `init`, replaced wholesale on re-discovery.
    endpoint: Mutex<Option<(u16, String)>>,
    update: CallbackSlot<dyn Fn(QuotaSnapshot) + Send + Sync>,
    errors: CallbackSlot<dyn Fn(ProviderError) + Send + Sync>,
    poll: PollTimer,
}

#[derive(Clone)]
pub struct AntigravityProvider {
    inner: Arc<Inner>,
}

impl AntigravityProvider {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(FETCH_TIMEOUT)
            .build()
            .context("Failed to build local endpoint client")?;

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                endpoint: Mutex::new(None),
                update: CallbackSlot::new(),
                errors: CallbackSlot::new(),
                poll: PollTimer::new(),
            }),
        })
    }

    /// Hand over the verified endpoint. Must run before the first fetch.
    pub fn init(&self, connect_port: u16, csrf_token: String) {
        *self.inner.endpoint.lock().unwrap() = Some((connect_port, csrf_token));
    }
}

impl Inner {
    async fn fetch(&self) {
        let Some((port, token)) = self.endpoint.lock().unwrap().clone() else {
            self.errors.emit(ProviderError::NotInitialized);
            return;
        };

        match self.request_user_status(port, &token).await {
            Ok(data) => self.update.emit(parse_user_status(data, Utc::now())),
            Err(e) => {
                warn!("Antigravity quota fetch error: {}", e);
                self.errors.emit(e);
            }
        }
    }

    async fn request_user_status(
        &self,
        port: u16,
        csrf_token: &str,
    ) -> std::result::Result<UserStatusResponse, ProviderError> {
        let url = format!(
            "https://{}:{}{}",
            wire::LOOPBACK_HOST,
            port,
            wire::USER_STATUS_PATH
        );

        let resp = self
            .client
            .post(&url)
            .header(wire::HEADER_CSRF_TOKEN, csrf_token)
            .header(wire::HEADER_PROTOCOL_VERSION, wire::PROTOCOL_VERSION)
            .json(&serde_json::json!({
                "metadata": {
                    "ideName": "antigravity",
                    "extensionName": "antigravity",
                    "locale": "en",
                }
            }))
            .send()
            .await?
            .error_for_status()?;

        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            debug!("Malformed user-status body: {}", e);
            ProviderError::MalformedResponse(PROVIDER_NAME)
        })
    }
}

#[async_trait]
impl QuotaProvider for AntigravityProvider {
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

/// Normalize the nested user-status payload into a snapshot. Models
/// without a quota block are dropped; an unparseable reset time counts as
/// already passed.
fn parse_user_status(data: UserStatusResponse, now: DateTime<Utc>) -> QuotaSnapshot {
    let status = data.user_status;

    let prompt_credits = status.plan_status.as_ref().and_then(|plan| {
        let monthly = plan
            .plan_info
            .as_ref()
            .and_then(|info| info.monthly_prompt_credits)?;
        let available = plan.available_prompt_credits?;
        PromptCreditsInfo::derive(available, monthly)
    });

    let models = status
        .cascade_model_config_data
        .map(|data| data.client_model_configs)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|config| {
            let quota = config.quota_info?;
            let reset_time = quota
                .reset_time
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or(now);

            Some(ModelQuotaInfo::from_quota(
                config.label.unwrap_or_default(),
                config
                    .model_or_alias
                    .and_then(|m| m.model)
                    .unwrap_or_else(|| "unknown".to_string()),
                quota.remaining_fraction,
                reset_time,
                now,
            ))
        })
        .collect();

    QuotaSnapshot {
        timestamp: now,
        prompt_credits,
        models,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn parse(json: &str) -> QuotaSnapshot {
        let now = Utc.with_ymd_and_hms(2026, 8, 27, 12, 0, 0).unwrap();
        let data: UserStatusResponse = serde_json::from_str(json).unwrap();
        parse_user_status(data, now)
    }

    #[test]
    fn test_parse_camel_case_response() {
        let snapshot = parse(
            r#"{
                "userStatus": {
                    "planStatus": {
                        "planInfo": {"monthlyPromptCredits": 1000},
                        "availablePromptCredits": 250
                    },
                    "cascadeModelConfigData": {
                        "clientModelConfigs": [
                            {
                                "label": "Gemini 3 Pro",
                                "modelOrAlias": {"model": "gemini-3-pro"},
                                "quotaInfo": {
                                    "remainingFraction": 0.15,
                                    "resetTime": "2026-08-27T13:30:00Z"
                                }
                            },
                            {"label": "No quota model", "modelOrAlias": {"model": "x"}}
                        ]
                    }
                }
            }"#,
        );

        let credits = snapshot.prompt_credits.unwrap();
        assert_eq!(credits.remaining_percentage, 25.0);
        assert_eq!(credits.used_percentage, 75.0);

        // The model without a quota block is dropped.
        assert_eq!(snapshot.models.len(), 1);
        let model = &snapshot.models[0];
        assert_eq!(model.model_id, "gemini-3-pro");
        assert_eq!(model.remaining_percentage, Some(15.0));
        assert!(!model.is_exhausted);
        assert_eq!(model.time_until_reset_formatted, "1h 30m");
    }

    #[test]
    fn test_parse_snake_case_response() {
        let snapshot = parse(
            r#"{
                "user_status": {
                    "cascade_model_config_data": {
                        "client_model_configs": [
                            {
                                "label": "Fast",
                                "model_or_alias": {"model": "gemini-3-flash"},
                                "quota_info": {
                                    "remaining_fraction": 0,
                                    "reset_time": "2026-08-27T11:00:00Z"
                                }
                            }
                        ]
                    }
                }
            }"#,
        );

        assert!(snapshot.prompt_credits.is_none());
        let model = &snapshot.models[0];
        assert_eq!(model.model_id, "gemini-3-flash");
        assert!(model.is_exhausted);
        assert_eq!(model.time_until_reset_formatted, "Ready");
    }

    #[test]
    fn test_zero_monthly_credits_yield_no_ratio() {
        let snapshot = parse(
            r#"{
                "userStatus": {
                    "planStatus": {
                        "planInfo": {"monthlyPromptCredits": 0},
                        "availablePromptCredits": 0
                    }
                }
            }"#,
        );
        assert!(snapshot.prompt_credits.is_none());
        assert!(snapshot.models.is_empty());
    }

    #[test]
    fn test_missing_user_status_is_malformed() {
        assert!(serde_json::from_str::<UserStatusResponse>(r#"{"other": 1}"#).is_err());
    }

    #[test]
    fn test_missing_model_id_falls_back_to_unknown() {
        let snapshot = parse(
            r#"{
                "userStatus": {
                    "cascadeModelConfigData": {
                        "client_model_configs": [
                            {"label": "L", "quotaInfo": {"remainingFraction": 0.5, "resetTime": "2026-08-27T12:30:00Z"}}
                        ]
                    }
                }
            }"#,
        );
        assert_eq!(snapshot.models[0].model_id, "unknown");
    }
}
