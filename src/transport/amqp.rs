//! Production broker transport over AMQP, via `lapin`.
//!
//! Follows the startup contract in §4.3 exactly: publish channel with a
//! non-durable topic `request` exchange, consume channel with a direct
//! `gateway` exchange bound to an exclusive `inbox` queue, consumed with
//! auto-ack. Any step failing here is fatal to startup.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    options::{
        BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Connection, ConnectionProperties, ExchangeKind,
};

use super::{BrokerTransport, FrameHandler};
use crate::types::RoutingKey;

const INBOX_QUEUE: &str = "inbox";

pub struct AmqpBrokerTransport {
    publish_channel: lapin::Channel,
    consume_channel: lapin::Channel,
    request_exchange: String,
}

impl AmqpBrokerTransport {
    /// Connects to the broker and performs the four-step startup contract.
    /// Any failure here is fatal — the gateway should not start serving
    /// HTTP traffic without a working broker connection.
    pub async fn connect(
        uri: &str,
        request_exchange: &str,
        gateway_exchange: &str,
    ) -> anyhow::Result<Self> {
        let connection =
            Connection::connect(uri, ConnectionProperties::default()).await?;

        // 1. Publish channel + non-durable topic exchange.
        let publish_channel = connection.create_channel().await?;
        publish_channel
            .exchange_declare(
                request_exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        // 2. Consume channel + direct exchange.
        let consume_channel = connection.create_channel().await?;
        consume_channel
            .exchange_declare(
                gateway_exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        // 3. Exclusive inbox queue bound with an empty routing key.
        let queue = consume_channel
            .queue_declare(
                INBOX_QUEUE,
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        consume_channel
            .queue_bind(
                queue.name().as_str(),
                gateway_exchange,
                "",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        tracing::info!(
            request_exchange,
            gateway_exchange,
            inbox = queue.name().as_str(),
            "broker transport started up"
        );

        Ok(Self {
            publish_channel,
            consume_channel,
            request_exchange: request_exchange.to_string(),
        })
    }
}

#[async_trait]
impl BrokerTransport for AmqpBrokerTransport {
    async fn publish(&self, key: &RoutingKey, bytes: Vec<u8>) -> bool {
        match self
            .publish_channel
            .basic_publish(
                &self.request_exchange,
                key.as_str(),
                BasicPublishOptions::default(),
                &bytes,
                BasicProperties::default(),
            )
            .await
        {
            Ok(confirm) => confirm.await.is_ok(),
            Err(err) => {
                tracing::warn!(routing_key = %key, %err, "publish failed");
                false
            }
        }
    }

    async fn consume(&self, handler: FrameHandler) -> anyhow::Result<()> {
        // 4. Begin consuming from `inbox` with auto-ack.
        let mut consumer = self
            .consume_channel
            .basic_consume(
                INBOX_QUEUE,
                "gateway-inbox",
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        while let Some(delivery) = consumer.next().await {
            match delivery {
                Ok(delivery) if delivery.data.is_empty() => {
                    tracing::warn!("dropping null delivery with empty payload");
                }
                Ok(delivery) => handler(delivery.data),
                Err(err) => tracing::warn!(%err, "error receiving delivery from inbox"),
            }
        }

        Ok(())
    }
}
