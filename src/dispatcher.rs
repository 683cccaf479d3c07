//! The `send_request` primitive (§4.4): id, record, publish — in that order.

use std::sync::Arc;

use serde_json::Value;

use crate::request_table::{CompletionCallback, PendingRequest, Responder, Validator};
use crate::shared::Shared;
use crate::transport::BrokerTransport;
use crate::types::{RequestId, RoutingKey};

pub struct Dispatcher {
    shared: Arc<Shared>,
    transport: Arc<dyn BrokerTransport>,
}

impl Dispatcher {
    pub fn new(shared: Arc<Shared>, transport: Arc<dyn BrokerTransport>) -> Self {
        Self { shared, transport }
    }

    /// Sends a request that was already assigned `id` via [`Shared::allocate`].
    ///
    /// Insertion into the request table happens before the publish, so a
    /// reply can never arrive before the record exists to receive it.
    #[tracing::instrument(skip(self, message, responder, completion, validator))]
    pub async fn send_request(
        &self,
        id: RequestId,
        key: RoutingKey,
        message: Value,
        responder: Responder,
        completion: CompletionCallback,
        validator: Option<Validator>,
    ) -> bool {
        let record = PendingRequest {
            uid: id,
            responder,
            completion,
            timestamp: chrono::Utc::now(),
            validator,
        };

        if let Err(err) = self.shared.insert_pending(record) {
            tracing::error!(%err, "dispatcher asked to send a request for an id already pending");
            return false;
        }

        let bytes = match serde_json::to_vec(&message) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::error!(%err, "failed to serialize outgoing request message");
                return false;
            }
        };

        // A failed publish is not surfaced synchronously: the record stays
        // in the table and will be failed out by the terminator's sweep.
        self.transport.publish(&key, bytes).await
    }

    pub fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    pub fn transport(&self) -> &Arc<dyn BrokerTransport> {
        &self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockBrokerTransport;
    use crate::types::{build_request_message, MsgIntention};
    use serde_json::Map;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn insert_precedes_publish() {
        let shared = Arc::new(Shared::new());
        let transport = Arc::new(MockBrokerTransport::new());
        let dispatcher = Dispatcher::new(shared.clone(), transport.clone());

        let id = shared.allocate();
        let message = build_request_message(id, MsgIntention::Read, "u1", Map::new());
        let (tx, _rx) = oneshot::channel();

        let accepted = dispatcher
            .send_request(
                id,
                RoutingKey::new("equipment", "get"),
                message,
                tx,
                Box::new(|_, _, _| {}),
                None,
            )
            .await;

        assert!(accepted);
        assert_eq!(transport.published().len(), 1);
        // the record must already be in the table by the time publish runs
        assert_eq!(shared.pending_count(), 1);
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let shared = Arc::new(Shared::new());
        let transport = Arc::new(MockBrokerTransport::new());
        let dispatcher = Dispatcher::new(shared.clone(), transport.clone());

        let id = shared.allocate();
        let message = build_request_message(id, MsgIntention::Read, "u1", Map::new());
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();

        assert!(
            dispatcher
                .send_request(
                    id,
                    RoutingKey::new("equipment", "get"),
                    message.clone(),
                    tx1,
                    Box::new(|_, _, _| {}),
                    None,
                )
                .await
        );

        assert!(
            !dispatcher
                .send_request(
                    id,
                    RoutingKey::new("equipment", "get"),
                    message,
                    tx2,
                    Box::new(|_, _, _| {}),
                    None,
                )
                .await
        );
        assert_eq!(transport.published().len(), 1);
    }
}
