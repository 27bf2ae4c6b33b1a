//! Async message bus — the central nervous system of Aeon.
//!
//! Ingress is a single bounded queue: channels publish inbound messages and
//! block when the agent falls behind (back-pressure). Egress is fan-out:
//! each subscriber gets its own bounded queue, and a send to a full
//! subscriber is dropped so one slow channel can never block the others.

use super::types::{InboundMessage, OutboundMessage};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Default capacity for the inbound queue and each subscriber queue.
pub const DEFAULT_CAPACITY: usize = 64;

/// The message bus connecting channels ↔ agent loop.
pub struct MessageBus {
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: tokio::sync::Mutex<mpsc::Receiver<InboundMessage>>,
    subscribers: Mutex<Vec<mpsc::Sender<OutboundMessage>>>,
    capacity: usize,
}

impl MessageBus {
    /// Create a new message bus with the given queue capacity.
    pub fn new(capacity: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);

        MessageBus {
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            subscribers: Mutex::new(Vec::new()),
            capacity,
        }
    }

    /// Publish a message from a channel to the agent.
    ///
    /// Blocks when the inbound queue is full (back-pressure to the channel).
    /// Errors only after `close()`.
    pub async fn publish(&self, msg: InboundMessage) -> Result<(), mpsc::error::SendError<InboundMessage>> {
        self.inbound_tx.send(msg).await
    }

    /// Consume the next inbound message. Returns `None` after `close()`.
    pub async fn consume_inbound(&self) -> Option<InboundMessage> {
        let mut rx = self.inbound_rx.lock().await;
        rx.recv().await
    }

    /// Create a fresh outbound subscription with its own bounded queue.
    pub fn subscribe(&self) -> mpsc::Receiver<OutboundMessage> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// Broadcast an outbound message to all current subscribers.
    ///
    /// Never blocks: full subscribers drop the message, dead subscribers
    /// are pruned.
    pub fn send(&self, msg: OutboundMessage) {
        let mut subs = self.subscribers.lock().unwrap();
        subs.retain(|tx| match tx.try_send(msg.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(channel = %msg.channel, "subscriber queue full, dropping outbound message");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("pruning closed subscriber");
                false
            }
        });
    }

    /// Get a clone of the inbound sender (for channels and services).
    pub fn inbound_sender(&self) -> mpsc::Sender<InboundMessage> {
        self.inbound_tx.clone()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    /// Shut the bus down: close ingress and drop all subscriber queues.
    ///
    /// Pending inbound messages are still drained by `consume_inbound`,
    /// which then returns `None`.
    pub async fn close(&self) {
        self.inbound_rx.lock().await.close();
        self.subscribers.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_inbound_message_flow() {
        let bus = MessageBus::new(10);

        let msg = InboundMessage::new("telegram", "chat_1", "user_1", "Hello!");
        bus.publish(msg).await.unwrap();

        let received = bus.consume_inbound().await.unwrap();
        assert_eq!(received.channel, "telegram");
        assert_eq!(received.content, "Hello!");
    }

    #[tokio::test]
    async fn test_message_ordering() {
        let bus = MessageBus::new(10);

        for i in 1..=3 {
            let msg = InboundMessage::new("cli", "default", "local", format!("msg-{}", i));
            bus.publish(msg).await.unwrap();
        }

        let m1 = bus.consume_inbound().await.unwrap();
        let m2 = bus.consume_inbound().await.unwrap();
        let m3 = bus.consume_inbound().await.unwrap();

        assert_eq!(m1.content, "msg-1");
        assert_eq!(m2.content, "msg-2");
        assert_eq!(m3.content, "msg-3");
    }

    #[tokio::test]
    async fn test_fanout_to_all_subscribers() {
        let bus = MessageBus::new(10);

        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.send(OutboundMessage::new("telegram", "c1", "hello"));

        assert_eq!(rx1.recv().await.unwrap().content, "hello");
        assert_eq!(rx2.recv().await.unwrap().content, "hello");
    }

    #[tokio::test]
    async fn test_full_subscriber_drops_without_blocking_others() {
        let bus = MessageBus::new(2);

        // rx_slow never drains, rx_live does.
        let mut rx_slow = bus.subscribe();
        let mut rx_live = bus.subscribe();

        // Fill the slow subscriber's queue (capacity 2), then overflow it.
        for i in 0..3 {
            bus.send(OutboundMessage::new("t", "c", format!("m{}", i)));
        }

        // The live subscriber drains everything.
        for i in 0..3 {
            assert_eq!(rx_live.recv().await.unwrap().content, format!("m{}", i));
        }

        // The slow subscriber got the first two; m2 was dropped.
        assert_eq!(rx_slow.recv().await.unwrap().content, "m0");
        assert_eq!(rx_slow.recv().await.unwrap().content, "m1");

        // After draining, a later message is delivered again.
        bus.send(OutboundMessage::new("t", "c", "m3"));
        assert_eq!(rx_slow.recv().await.unwrap().content, "m3");
        assert_eq!(rx_live.recv().await.unwrap().content, "m3");
    }

    #[tokio::test]
    async fn test_closed_subscriber_pruned() {
        let bus = MessageBus::new(10);

        let rx = bus.subscribe();
        drop(rx);

        bus.send(OutboundMessage::new("t", "c", "into the void"));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_close_ends_inbound_stream() {
        let bus = MessageBus::new(10);

        bus.publish(InboundMessage::new("cli", "c", "u", "last one"))
            .await
            .unwrap();
        bus.close().await;

        // Buffered message is still drained, then the stream ends.
        assert_eq!(bus.consume_inbound().await.unwrap().content, "last one");
        assert!(bus.consume_inbound().await.is_none());
    }

    #[tokio::test]
    async fn test_multiple_producers() {
        let bus = Arc::new(MessageBus::new(10));

        let bus1 = bus.clone();
        let bus2 = bus.clone();

        let h1 = tokio::spawn(async move {
            bus1.publish(InboundMessage::new("telegram", "c1", "u1", "from telegram"))
                .await
                .unwrap();
        });
        let h2 = tokio::spawn(async move {
            bus2.publish(InboundMessage::new("discord", "c2", "u2", "from discord"))
                .await
                .unwrap();
        });

        h1.await.unwrap();
        h2.await.unwrap();

        let r1 = bus.consume_inbound().await.unwrap();
        let r2 = bus.consume_inbound().await.unwrap();

        let channels = [r1.channel.as_str(), r2.channel.as_str()];
        assert!(channels.contains(&"telegram"));
        assert!(channels.contains(&"discord"));
    }
}
