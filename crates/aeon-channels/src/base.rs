//! Channel trait — the contract every transport front-end implements.
//!
//! A channel adapts an external messaging modality (chat API, HTTP,
//! e-mail, voice) to the kernel's bus: it publishes `InboundMessage`s and
//! delivers `OutboundMessage`s handed to it by the manager's dispatcher.

use std::sync::Arc;

use async_trait::async_trait;

use aeon_core::bus::{MessageBus, OutboundMessage};

/// Every channel implements this trait.
///
/// The `ChannelManager` holds `Arc<dyn Channel>` and orchestrates
/// start/stop/delivery across all enabled channels.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Unique channel name, matching config keys and
    /// `OutboundMessage.channel` values.
    fn name(&self) -> &str;

    /// Start listening for incoming messages: a long-running task that
    /// publishes `InboundMessage`s to the bus until `stop()`.
    async fn start(&self, bus: Arc<MessageBus>) -> anyhow::Result<()>;

    /// Graceful shutdown.
    async fn stop(&self) -> anyhow::Result<()>;

    /// Deliver one outbound message to this channel's transport.
    ///
    /// Called by the manager's dispatcher for messages addressed to this
    /// channel (or broadcast). Channels may skip rendering messages whose
    /// `metadata["status"]` is `"true"`.
    async fn deliver(&self, msg: &OutboundMessage) -> anyhow::Result<()>;
}
