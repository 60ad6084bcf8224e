//! Quota aggregation — merges per-provider snapshots into one keyed map.
//!
//! Every individual provider update overwrites that provider's entry and
//! immediately re-publishes the merged map; updates are never batched or
//! debounced here. Provider errors are re-published tagged with the
//! originating identity and never touch another provider's state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::ProviderError;
use crate::providers::{QuotaProvider, QuotaSnapshot};

pub type MergedUpdateCallback = Box<dyn Fn(&HashMap<String, QuotaSnapshot>) + Send + Sync>;
pub type TaggedErrorCallback = Box<dyn Fn(&str, ProviderError) + Send + Sync>;

pub struct QuotaAggregator {
    providers: Vec<Box<dyn QuotaProvider>>,
    snapshots: Arc<Mutex<HashMap<String, QuotaSnapshot>>>,
    update_callback: Arc<Mutex<Option<MergedUpdateCallback>>>,
    error_callback: Arc<Mutex<Option<TaggedErrorCallback>>>,
}

impl QuotaAggregator {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            snapshots: Arc::new(Mutex::new(HashMap::new())),
            update_callback: Arc::new(Mutex::new(None)),
            error_callback: Arc::new(Mutex::new(None)),
        }
    }

    /// Subscribe to the provider's events and record it. The provider's
    /// identity becomes its stable key in the merged map.
    pub fn add_provider(&mut self, provider: Box<dyn QuotaProvider>) {
        let name = provider.provider_name().to_string();

        let snapshots = Arc::clone(&self.snapshots);
        let update_callback = Arc::clone(&self.update_callback);
        provider.on_update(Box::new(move |snapshot| {
            let mut map = snapshots.lock().unwrap();
            map.insert(name.clone(), snapshot);
            if let Some(cb) = update_callback.lock().unwrap().as_ref() {
                cb(&map);
            }
        }));

        let name = provider.provider_name().to_string();
        let error_callback = Arc::clone(&self.error_callback);
        provider.on_error(Box::new(move |error| {
            if let Some(cb) = error_callback.lock().unwrap().as_ref() {
                cb(&name, error);
            }
        }));

        self.providers.push(provider);
    }

    /// Fan the interval out to every provider unchanged; each applies its
    /// own floor.
    pub fn start_all(&self, interval: Duration) {
        for provider in &self.providers {
            provider.start_polling(interval);
        }
    }

    pub fn stop_all(&self) {
        for provider in &self.providers {
            provider.stop_polling();
        }
    }

    /// Fetch every provider immediately, independent of its timer.
    pub async fn force_refresh_all(&self) {
        for provider in &self.providers {
            provider.fetch_quota().await;
        }
    }

    /// Replaces any previously registered merged-update subscriber.
    pub fn on_update(&self, callback: MergedUpdateCallback) {
        *self.update_callback.lock().unwrap() = Some(callback);
    }

    /// Replaces any previously registered error subscriber.
    pub fn on_error(&self, callback: TaggedErrorCallback) {
        *self.error_callback.lock().unwrap() = Some(callback);
    }
}
