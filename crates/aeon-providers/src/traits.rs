//! The provider contract every LLM backend implements.

use async_trait::async_trait;

use aeon_core::types::{CompletionRequest, CompletionResponse};

use crate::error::ProviderError;

/// Trait that all LLM providers must implement.
///
/// Providers may be stateful; the agent loop is sequential, so a provider
/// instance is never driven by two concurrent turns of the same session.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Send a completion request.
    ///
    /// Transport and API failures come back as typed [`ProviderError`]s so
    /// the chain can classify them for cooldown/failover decisions.
    async fn complete(&self, request: &CompletionRequest)
        -> Result<CompletionResponse, ProviderError>;

    /// Stable provider name (used for routing, cooldowns, and `/model`).
    fn name(&self) -> &str;

    /// Whether the provider is currently usable (e.g. has credentials).
    fn available(&self) -> bool {
        true
    }
}
