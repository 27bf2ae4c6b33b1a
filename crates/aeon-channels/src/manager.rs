//! Channel manager — lifecycle and outbound dispatch.
//!
//! Each registered channel gets its own bus subscription, so a slow
//! transport only ever drops its own messages. The dispatcher forwards
//! messages addressed to the channel (or broadcast: empty channel name)
//! and skips internal status hints.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use aeon_core::bus::MessageBus;

use crate::base::Channel;

/// Manages the lifecycle and outbound routing for all channels.
pub struct ChannelManager {
    channels: HashMap<String, Arc<dyn Channel>>,
    bus: Arc<MessageBus>,
    dispatchers: Vec<JoinHandle<()>>,
}

impl ChannelManager {
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self {
            channels: HashMap::new(),
            bus,
            dispatchers: Vec::new(),
        }
    }

    /// Register a channel. Overwrites any previous channel with the same name.
    pub fn register(&mut self, channel: Arc<dyn Channel>) {
        info!(channel = channel.name(), "registered channel");
        self.channels.insert(channel.name().to_string(), channel);
    }

    /// Names of all registered channels, sorted.
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether no channels are registered.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Start every channel and spawn its outbound dispatcher.
    pub async fn start_all(&mut self) -> anyhow::Result<()> {
        let channels: Vec<(String, Arc<dyn Channel>)> = self
            .channels
            .iter()
            .map(|(n, c)| (n.clone(), c.clone()))
            .collect();

        for (name, channel) in channels {
            channel.start(self.bus.clone()).await?;
            info!(channel = %name, "channel started");

            let mut rx = self.bus.subscribe();
            self.dispatchers.push(tokio::spawn(async move {
                while let Some(msg) = rx.recv().await {
                    // Filtering is the subscriber's responsibility.
                    if !msg.channel.is_empty() && msg.channel != name {
                        continue;
                    }
                    if msg.is_status() || msg.silent {
                        debug!(channel = %name, "skipping status/silent message");
                        continue;
                    }
                    if let Err(e) = channel.deliver(&msg).await {
                        error!(channel = %name, error = %e, "outbound delivery failed");
                    }
                }
                debug!(channel = %name, "outbound dispatcher ended");
            }));
        }
        Ok(())
    }

    /// Stop every channel and its dispatcher.
    pub async fn stop_all(&mut self) {
        for (name, channel) in &self.channels {
            if let Err(e) = channel.stop().await {
                error!(channel = %name, error = %e, "channel stop failed");
            } else {
                info!(channel = %name, "channel stopped");
            }
        }
        for handle in self.dispatchers.drain(..) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aeon_core::bus::OutboundMessage;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct RecordingChannel {
        name: String,
        delivered: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingChannel {
        fn new(name: &str) -> (Arc<Self>, Arc<Mutex<Vec<String>>>) {
            let delivered = Arc::new(Mutex::new(Vec::new()));
            (
                Arc::new(Self {
                    name: name.to_string(),
                    delivered: delivered.clone(),
                }),
                delivered,
            )
        }
    }

    #[async_trait]
    impl Channel for RecordingChannel {
        fn name(&self) -> &str {
            &self.name
        }

        async fn start(&self, _bus: Arc<MessageBus>) -> anyhow::Result<()> {
            Ok(())
        }

        async fn stop(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn deliver(&self, msg: &OutboundMessage) -> anyhow::Result<()> {
            self.delivered.lock().unwrap().push(msg.content.clone());
            Ok(())
        }
    }

    async fn drain_pause() {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_register_and_names() {
        let bus = Arc::new(MessageBus::new(8));
        let mut mgr = ChannelManager::new(bus);
        let (b, _) = RecordingChannel::new("beta");
        let (a, _) = RecordingChannel::new("alpha");
        mgr.register(b);
        mgr.register(a);
        assert_eq!(mgr.channel_names(), vec!["alpha", "beta"]);
        assert_eq!(mgr.len(), 2);
    }

    #[tokio::test]
    async fn test_dispatch_filters_by_channel() {
        let bus = Arc::new(MessageBus::new(8));
        let mut mgr = ChannelManager::new(bus.clone());
        let (tg, tg_seen) = RecordingChannel::new("telegram");
        let (dc, dc_seen) = RecordingChannel::new("discord");
        mgr.register(tg);
        mgr.register(dc);
        mgr.start_all().await.unwrap();

        bus.send(OutboundMessage::new("telegram", "c", "for telegram"));
        bus.send(OutboundMessage::new("discord", "c", "for discord"));
        drain_pause().await;

        assert_eq!(tg_seen.lock().unwrap().as_slice(), &["for telegram"]);
        assert_eq!(dc_seen.lock().unwrap().as_slice(), &["for discord"]);

        mgr.stop_all().await;
    }

    #[tokio::test]
    async fn test_broadcast_reaches_everyone() {
        let bus = Arc::new(MessageBus::new(8));
        let mut mgr = ChannelManager::new(bus.clone());
        let (tg, tg_seen) = RecordingChannel::new("telegram");
        let (dc, dc_seen) = RecordingChannel::new("discord");
        mgr.register(tg);
        mgr.register(dc);
        mgr.start_all().await.unwrap();

        bus.send(OutboundMessage::new("", "c", "to all"));
        drain_pause().await;

        assert_eq!(tg_seen.lock().unwrap().as_slice(), &["to all"]);
        assert_eq!(dc_seen.lock().unwrap().as_slice(), &["to all"]);

        mgr.stop_all().await;
    }

    #[tokio::test]
    async fn test_status_messages_skipped() {
        let bus = Arc::new(MessageBus::new(8));
        let mut mgr = ChannelManager::new(bus.clone());
        let (ch, seen) = RecordingChannel::new("cli");
        mgr.register(ch);
        mgr.start_all().await.unwrap();

        bus.send(OutboundMessage::status("cli", "c", "thinking..."));
        bus.send(OutboundMessage::new("cli", "c", "real message"));
        drain_pause().await;

        assert_eq!(seen.lock().unwrap().as_slice(), &["real message"]);

        mgr.stop_all().await;
    }
}
