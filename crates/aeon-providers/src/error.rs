//! Provider error taxonomy and classification.
//!
//! Classification decides everything downstream: non-retriable errors
//! (auth, billing, request format) surface to the user immediately with
//! no failover, while retriable ones put the provider in cooldown and
//! hand the request to the fallback.

use thiserror::Error;

/// A classified provider failure.
#[derive(Clone, Debug, Error)]
pub enum ProviderError {
    /// 401/403 — bad or revoked credentials. Not retriable.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// 402 — payment required / out of credit. Not retriable.
    #[error("billing problem: {0}")]
    Billing(String),

    /// 400 — malformed request; indicates a bug in our request shape.
    #[error("bad request: {0}")]
    Format(String),

    /// 429 — rate limited or quota exhausted. Retriable.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// 503/529 — provider at capacity. Retriable.
    #[error("provider overloaded: {0}")]
    Overloaded(String),

    /// Other 5xx. Retriable.
    #[error("server error: {0}")]
    Server(String),

    /// Deadline or transport failure. Retriable.
    #[error("request timed out: {0}")]
    Timeout(String),
}

impl ProviderError {
    /// Whether failover + cooldown should be attempted.
    pub fn is_retriable(&self) -> bool {
        !matches!(
            self,
            ProviderError::Auth(_) | ProviderError::Billing(_) | ProviderError::Format(_)
        )
    }

    /// Classify an HTTP status + response body into the taxonomy.
    pub fn from_status(status: u16, body: &str) -> Self {
        let msg = summarize(body);
        match status {
            401 | 403 => ProviderError::Auth(msg),
            402 => ProviderError::Billing(msg),
            400 => ProviderError::Format(msg),
            429 => ProviderError::RateLimited(msg),
            503 | 529 => ProviderError::Overloaded(msg),
            s if s >= 500 => ProviderError::Server(msg),
            _ => classify_message(status, &msg),
        }
    }
}

/// Status didn't decide; fall back to keywords in the body.
fn classify_message(status: u16, msg: &str) -> ProviderError {
    let lower = msg.to_lowercase();
    if lower.contains("invalid key") || lower.contains("invalid api key") || lower.contains("unauthorized") {
        ProviderError::Auth(msg.to_string())
    } else if lower.contains("payment required") || lower.contains("insufficient credit") {
        ProviderError::Billing(msg.to_string())
    } else if lower.contains("quota exceeded") || lower.contains("rate limit") {
        ProviderError::RateLimited(msg.to_string())
    } else if lower.contains("capacity") || lower.contains("overloaded") {
        ProviderError::Overloaded(msg.to_string())
    } else if lower.contains("malformed") {
        ProviderError::Format(msg.to_string())
    } else {
        ProviderError::Server(format!("unexpected status {status}: {msg}"))
    }
}

/// Keep error bodies short enough for a chat message.
fn summarize(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() > 300 {
        let cut: String = trimmed.chars().take(300).collect();
        format!("{cut}…")
    } else {
        trimmed.to_string()
    }
}
