//! Low-quota alert logic — decides *when* to alert; delivery belongs to
//! the presentation layer (the daemon just logs).
//!
//! One alert per distinct `(model_id, reset_time)` pair: an identical
//! follow-up snapshot stays silent, and a new reset window alerts again
//! because stale keys are pruned once they leave the snapshot set.

use std::collections::{HashMap, HashSet};

use crate::providers::QuotaSnapshot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub provider: String,
    pub title: String,
    pub message: String,
}

pub struct QuotaAlerts {
    threshold: f64,
    notified: HashSet<String>,
}

impl QuotaAlerts {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            notified: HashSet::new(),
        }
    }

    /// Scan a merged snapshot map and return the alerts that should fire
    /// now. Models without a known percentage are treated as 100 %.
    pub fn check(&mut self, snapshots: &HashMap<String, QuotaSnapshot>) -> Vec<Alert> {
        let mut alerts = Vec::new();
        let mut current_keys = HashSet::new();

        for (provider, snapshot) in snapshots {
            for model in &snapshot.models {
                let pct = model.remaining_percentage.unwrap_or(100.0);
                let key = format!("{}-{}", model.model_id, model.reset_time.timestamp_millis());
                current_keys.insert(key.clone());

                if self.notified.contains(&key) {
                    continue;
                }

                if model.is_exhausted {
                    alerts.push(Alert {
                        provider: provider.clone(),
                        title: format!("{provider} Exhausted"),
                        message: format!(
                            "{} quota depleted. Resets in {}",
                            model.label, model.time_until_reset_formatted
                        ),
                    });
                    self.notified.insert(key);
                } else if pct < self.threshold {
                    alerts.push(Alert {
                        provider: provider.clone(),
                        title: format!("{provider} Low Quota"),
                        message: format!(
                            "{} only {:.0}% remaining. Resets in {}",
                            model.label, pct, model.time_until_reset_formatted
                        ),
                    });
                    self.notified.insert(key);
                }
            }
        }

        // Keys that left the snapshot set can alert again next window.
        self.notified.retain(|key| current_keys.contains(key));

        alerts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ModelQuotaInfo;
    use chrono::{Duration, Utc};

    fn snapshot_map(fraction: f64, reset_offset_mins: i64) -> HashMap<String, QuotaSnapshot> {
        let now = Utc::now();
        let mut map = HashMap::new();
        map.insert(
            "Google Antigravity".to_string(),
            QuotaSnapshot {
                timestamp: now,
                prompt_credits: None,
                models: vec![ModelQuotaInfo::from_quota(
                    "Gemini 3 Pro".into(),
                    "gemini-3-pro".into(),
                    Some(fraction),
                    now + Duration::minutes(reset_offset_mins),
                    now,
                )],
            },
        );
        map
    }

    #[test]
    fn test_low_quota_fires_once_per_reset_window() {
        let mut alerts = QuotaAlerts::new(20.0);

        // 15% remaining with a threshold of 20 → one alert.
        let map = snapshot_map(0.15, 30);
        let fired = alerts.check(&map);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].title, "Google Antigravity Low Quota");

        // Identical follow-up snapshot → silent.
        assert!(alerts.check(&map).is_empty());

        // New reset window for the same model → alerts again.
        let next_window = snapshot_map(0.15, 90);
        assert_eq!(alerts.check(&next_window).len(), 1);
    }

    #[test]
    fn test_exhausted_takes_priority_over_low() {
        let mut alerts = QuotaAlerts::new(20.0);
        let fired = alerts.check(&snapshot_map(0.0, 30));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].title, "Google Antigravity Exhausted");
    }

    #[test]
    fn test_healthy_quota_is_silent() {
        let mut alerts = QuotaAlerts::new(20.0);
        assert!(alerts.check(&snapshot_map(0.8, 30)).is_empty());
    }

    #[test]
    fn test_unknown_percentage_counts_as_full() {
        let now = Utc::now();
        let mut map = HashMap::new();
        map.insert(
            "p".to_string(),
            QuotaSnapshot {
                timestamp: now,
                prompt_credits: None,
                models: vec![ModelQuotaInfo::from_quota(
                    "M".into(),
                    "m".into(),
                    None,
                    now,
                    now,
                )],
            },
        );
        let mut alerts = QuotaAlerts::new(20.0);
        assert!(alerts.check(&map).is_empty());
    }
}
