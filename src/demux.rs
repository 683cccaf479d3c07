//! Reply Demultiplexer (§4.5): routes each inbound frame to either the
//! resolver or the request table's completion path.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::request_table::PendingRequest;
use crate::resolver::Resolver;
use crate::shared::Shared;
use crate::transport::FrameHandler;
use crate::types::ReplyMessage;

pub struct Demultiplexer {
    shared: Arc<Shared>,
    resolver: Arc<Resolver>,
}

impl Demultiplexer {
    pub fn new(shared: Arc<Shared>, resolver: Arc<Resolver>) -> Self {
        Self { shared, resolver }
    }

    /// Wraps this demultiplexer as a [`FrameHandler`] for
    /// [`crate::transport::BrokerTransport::consume`].
    pub fn into_frame_handler(self: Arc<Self>) -> FrameHandler {
        Arc::new(move |bytes| self.handle_frame(bytes))
    }

    pub fn handle_frame(&self, bytes: Vec<u8>) {
        let reply = match ReplyMessage::parse(&bytes) {
            Ok(reply) => reply,
            Err(err) => {
                tracing::warn!(%err, "dropping malformed reply frame");
                return;
            }
        };

        if self.shared.is_intercepted(reply.msg_id) {
            self.shared.release_intercept(reply.msg_id);
            self.resolver.consume(reply);
            return;
        }

        let Some(record) = self.shared.take_pending(reply.msg_id) else {
            tracing::warn!(msg_id = %reply.msg_id, "reply for unknown or possibly timed-out request");
            return;
        };

        let PendingRequest {
            uid,
            responder,
            completion,
            timestamp,
            validator,
        } = record;

        match validator {
            None => completion(responder, timestamp, reply),
            Some(validator) => {
                let accepted =
                    catch_unwind(AssertUnwindSafe(|| validator(&reply))).unwrap_or_else(|_| {
                        tracing::error!(msg_id = %reply.msg_id, "validator panicked");
                        false
                    });

                if accepted {
                    completion(responder, timestamp, reply);
                } else {
                    // Leave the id pending: the responder must not be dropped
                    // here, or the handler's `rx.await` resolves immediately
                    // as a synthetic failure instead of riding out to the
                    // real Terminator sweep deadline (§4.5 step 5).
                    tracing::debug!(
                        msg_id = %reply.msg_id,
                        "reply rejected by validator; leaving request pending for the sweep"
                    );
                    let record = PendingRequest {
                        uid,
                        responder,
                        completion,
                        timestamp,
                        validator: Some(validator),
                    };
                    if self.shared.insert_pending(record).is_err() {
                        tracing::error!(
                            msg_id = %reply.msg_id,
                            "could not re-pend request after validator rejection"
                        );
                    }
                }
            }
        }
    }
}
