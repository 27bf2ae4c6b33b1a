//! LLM provider layer: the `Provider` contract, the error taxonomy with
//! retriability classification, the role-routing failover chain, and a
//! generic OpenAI-compatible HTTP provider.

pub mod chain;
pub mod error;
pub mod http;
pub mod traits;

pub use chain::ProviderChain;
pub use error::ProviderError;
pub use http::HttpProvider;
pub use traits::Provider;
