//! An in-memory broker transport for tests, mirroring the teacher's
//! `MockHttpClient` seam: records every published frame and lets tests
//! inject inbound reply frames without a real broker.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{BrokerTransport, FrameHandler};
use crate::types::RoutingKey;

/// One frame the mock recorded as published.
#[derive(Debug, Clone)]
pub struct PublishedFrame {
    pub routing_key: String,
    pub bytes: Vec<u8>,
}

pub struct MockBrokerTransport {
    published: Mutex<Vec<PublishedFrame>>,
    reject_publishes: AtomicBool,
    inbound_tx: mpsc::UnboundedSender<Vec<u8>>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

impl MockBrokerTransport {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            published: Mutex::new(Vec::new()),
            reject_publishes: AtomicBool::new(false),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
        }
    }

    /// Makes the next (and every subsequent) `publish` call report rejection,
    /// simulating the "transport failure" error kind from §7.
    pub fn reject_publishes(&self, reject: bool) {
        self.reject_publishes.store(reject, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<PublishedFrame> {
        self.published.lock().clone()
    }

    /// Feeds a raw inbound frame to whatever consumer loop is running,
    /// simulating a reply arriving on the inbox.
    pub fn inject(&self, bytes: Vec<u8>) {
        let _ = self.inbound_tx.send(bytes);
    }
}

impl Default for MockBrokerTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerTransport for MockBrokerTransport {
    async fn publish(&self, key: &RoutingKey, bytes: Vec<u8>) -> bool {
        self.published.lock().push(PublishedFrame {
            routing_key: key.as_str().to_string(),
            bytes,
        });
        !self.reject_publishes.load(Ordering::SeqCst)
    }

    async fn consume(&self, handler: FrameHandler) -> anyhow::Result<()> {
        let mut rx = self
            .inbound_rx
            .lock()
            .take()
            .expect("the exclusive inbox can only be consumed once");

        while let Some(bytes) = rx.recv().await {
            handler(bytes);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn records_published_frames() {
        let transport = MockBrokerTransport::new();
        let key = RoutingKey::new("equipment", "get");
        assert!(transport.publish(&key, b"hello".to_vec()).await);

        let published = transport.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].routing_key, "equipment.details.get");
        assert_eq!(published[0].bytes, b"hello");
    }

    #[tokio::test]
    async fn rejected_publishes_report_failure() {
        let transport = MockBrokerTransport::new();
        transport.reject_publishes(true);
        let key = RoutingKey::new("equipment", "get");
        assert!(!transport.publish(&key, b"hello".to_vec()).await);
    }

    #[tokio::test]
    async fn injected_frames_reach_the_consumer() {
        let transport = Arc::new(MockBrokerTransport::new());
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();

        let consume_transport = transport.clone();
        let handle = tokio::spawn(async move {
            consume_transport
                .consume(Arc::new(move |bytes| received_clone.lock().push(bytes)))
                .await
        });

        transport.inject(b"frame-1".to_vec());
        transport.inject(b"frame-2".to_vec());

        // Give the consume task a chance to drain the channel.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert_eq!(received.lock().len(), 2);
        handle.abort();
    }
}
