//! Provider error taxonomy.
//!
//! Every failure is surfaced to the provider's error subscriber and never
//! halts future polling — the monitor degrades to a stale snapshot.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network-level failure: timeout, connection refused, TLS error.
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// The backend answered with an error status.
    #[error("{provider} API error: {status}{}", format_detail(.message))]
    Api {
        provider: &'static str,
        status: u16,
        message: Option<String>,
    },

    /// The backend answered 2xx but the body was not the expected JSON.
    #[error("invalid JSON response from {0}")]
    MalformedResponse(&'static str),

    /// The local provider was polled before discovery handed it a
    /// port/token pair.
    #[error("provider not initialized with port/token")]
    NotInitialized,
}

fn format_detail(message: &Option<String>) -> String {
    match message {
        Some(m) => format!(" - {m}"),
        None => String::new(),
    }
}
