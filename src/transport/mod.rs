//! The broker transport seam (§4.3): owns the two broker channels and
//! translates bytes to/from the dispatcher and demultiplexer.

pub mod amqp;
pub mod mock;

use std::sync::Arc;

use async_trait::async_trait;

use crate::types::RoutingKey;

pub use amqp::AmqpBrokerTransport;
pub use mock::MockBrokerTransport;

/// Invoked with each inbound frame's raw byte payload as it's consumed off
/// the inbox queue.
pub type FrameHandler = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// Abstracts the broker connection so the dispatch engine can be tested
/// without a real AMQP server, mirroring the teacher's `HttpClient` seam.
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    /// Publishes `bytes` to the request exchange under `key`. Returns
    /// whether the underlying channel accepted the frame — not whether any
    /// consumer received it.
    async fn publish(&self, key: &RoutingKey, bytes: Vec<u8>) -> bool;

    /// Runs the consume loop, handing each inbox frame to `handler`, until
    /// the underlying consumer is cancelled or the connection drops.
    async fn consume(&self, handler: FrameHandler) -> anyhow::Result<()>;
}
