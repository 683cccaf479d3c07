//! Entity Resolver (§4.7): inflates id-valued fields in a reply into the
//! full nested objects before the outer HTTP completion fires.
//!
//! A resolution cycle tracks one outer reply's outstanding sub-fetches.
//! When a nested entity's own reply itself carries ids that need resolving,
//! a child cycle is created whose completion feeds back into the parent's
//! slot instead of an HTTP responder — the same bookkeeping, one level
//! deeper, bounded by `resolver_max_depth`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::entities::{self, EntityAdapter};
use crate::error::GatewayError;
use crate::request_table::{CompletionCallback, Responder};
use crate::shared::Shared;
use crate::transport::BrokerTransport;
use crate::types::{build_request_message, MsgIntention, ReplyMessage, RequestId, RoutingKey};

/// Where a finished resolution cycle's result goes.
enum CycleSink {
    /// The outermost request: hand the enriched reply to the HTTP handler's
    /// own completion.
    Outer {
        responder: Responder,
        completion: CompletionCallback,
    },
    /// A nested resolution: write the inflated value back into the parent
    /// cycle's slot and let the parent's own bookkeeping take it from there.
    Nested {
        parent: Arc<Mutex<CycleState>>,
        slot: (String, u64),
    },
}

struct CycleState {
    remaining: usize,
    failed: bool,
    /// `(target entity, raw id)` -> inflated entity value.
    resolved: HashMap<(String, u64), Value>,
    reply: ReplyMessage,
    /// The adapter of the entity this cycle's reply belongs to, so
    /// substitution can match each id field against the specific target
    /// entity the registry says it points to, instead of guessing from the
    /// raw id value alone.
    adapter: &'static EntityAdapter,
    #[allow(dead_code)]
    timestamp: DateTime<Utc>,
    sink: Option<CycleSink>,
}

/// What a single outstanding sub-fetch resolves back into.
struct SubFetch {
    target_entity: &'static str,
    raw_id: u64,
    depth: usize,
    cycle: Arc<Mutex<CycleState>>,
}

pub struct Resolver {
    shared: Arc<Shared>,
    transport: Arc<dyn BrokerTransport>,
    max_depth: usize,
    subfetches: Mutex<HashMap<RequestId, SubFetch>>,
}

impl Resolver {
    pub fn new(shared: Arc<Shared>, transport: Arc<dyn BrokerTransport>, max_depth: usize) -> Self {
        Self {
            shared,
            transport,
            max_depth,
            subfetches: Mutex::new(HashMap::new()),
        }
    }

    /// True iff `id` is a sub-fetch id this resolver is awaiting.
    pub fn intercept(&self, id: RequestId) -> bool {
        self.subfetches.lock().contains_key(&id)
    }

    /// Resolves `reply`'s nested ids (per the entity registry) and then
    /// invokes `completion` with the enriched reply. If `entity_kind` has no
    /// registered nested ids, resolution is a no-op and completion fires
    /// immediately.
    #[tracing::instrument(skip(self, reply, responder, completion))]
    pub async fn resolve(
        self: &Arc<Self>,
        entity_kind: &str,
        user_id: &str,
        depth: usize,
        reply: ReplyMessage,
        responder: Responder,
        completion: CompletionCallback,
    ) {
        let sink = CycleSink::Outer {
            responder,
            completion,
        };
        self.start_cycle(entity_kind, user_id, depth, reply, sink).await;
    }

    async fn start_cycle(
        self: &Arc<Self>,
        entity_kind: &str,
        user_id: &str,
        depth: usize,
        reply: ReplyMessage,
        sink: CycleSink,
    ) {
        let Some(adapter) = entities::lookup(entity_kind) else {
            self.finish_immediately(reply, sink);
            return;
        };

        if adapter.id_fields.is_empty() {
            self.finish_immediately(reply, sink);
            return;
        }

        if depth >= self.max_depth {
            self.fail_sink(sink, "resolver depth exceeded".to_string());
            return;
        }

        // Collect unique (target entity, raw id) references across every
        // item in the reply's result payload.
        let items = result_items(&reply.payload);
        let mut unique_refs: Vec<(&'static str, u64)> = Vec::new();
        for item in &items {
            for (field, target) in adapter.id_fields {
                if let Some(raw_id) = item.get(*field).and_then(Value::as_u64) {
                    let key = (*target, raw_id);
                    if !unique_refs.contains(&key) {
                        unique_refs.push(key);
                    }
                }
            }
        }

        if unique_refs.is_empty() {
            self.finish_immediately(reply, sink);
            return;
        }

        let cycle = Arc::new(Mutex::new(CycleState {
            remaining: unique_refs.len(),
            failed: false,
            resolved: HashMap::new(),
            reply,
            adapter,
            timestamp: Utc::now(),
            sink: Some(sink),
        }));

        for (target_entity, raw_id) in unique_refs {
            self.spawn_subfetch(target_entity, raw_id, depth + 1, user_id, cycle.clone())
                .await;
        }
    }

    async fn spawn_subfetch(
        self: &Arc<Self>,
        target_entity: &'static str,
        raw_id: u64,
        depth: usize,
        user_id: &str,
        cycle: Arc<Mutex<CycleState>>,
    ) {
        let sub_id = self.shared.allocate();
        self.shared.mark_intercepted(sub_id);
        self.subfetches.lock().insert(
            sub_id,
            SubFetch {
                target_entity,
                raw_id,
                depth,
                cycle,
            },
        );

        let mut fields = Map::new();
        fields.insert("id".to_string(), Value::from(raw_id));
        let message = build_request_message(sub_id, MsgIntention::Read, user_id, fields);
        let key = RoutingKey::new(target_entity, "get");

        let bytes = match serde_json::to_vec(&message) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::error!(%err, "failed to serialize resolver sub-fetch");
                self.fail_subfetch(sub_id);
                return;
            }
        };

        if !self.transport.publish(&key, bytes).await {
            tracing::warn!(target_entity, raw_id, "resolver sub-fetch publish failed");
            self.fail_subfetch(sub_id);
        }
    }

    fn fail_subfetch(self: &Arc<Self>, sub_id: RequestId) {
        self.shared.release_intercept(sub_id);
        if let Some(sub) = self.subfetches.lock().remove(&sub_id) {
            self.settle(sub, None);
        }
    }

    /// Satisfies an intercepted sub-fetch with its reply (§4.5 step 3).
    pub fn consume(self: &Arc<Self>, reply: ReplyMessage) {
        let Some(sub) = self.subfetches.lock().remove(&reply.msg_id) else {
            return;
        };
        self.settle(sub, Some(reply));
    }

    fn settle(self: &Arc<Self>, sub: SubFetch, reply: Option<ReplyMessage>) {
        let SubFetch {
            target_entity,
            raw_id,
            depth,
            cycle,
        } = sub;

        match reply {
            None => self.mark_cycle_failed(&cycle),
            Some(reply) if reply.status != 0 => self.mark_cycle_failed(&cycle),
            Some(reply) => {
                let nested_has_ids = entities::lookup(target_entity)
                    .map(|a| !a.id_fields.is_empty() && !result_items(&reply.payload).is_empty())
                    .unwrap_or(false);

                if nested_has_ids && depth < self.max_depth {
                    let sink = CycleSink::Nested {
                        parent: cycle,
                        slot: (target_entity.to_string(), raw_id),
                    };
                    let resolver = self.clone();
                    let target_owned = target_entity.to_string();
                    tokio::spawn(async move {
                        resolver
                            .start_cycle(&target_owned, "resolver", depth, reply, sink)
                            .await;
                    });
                } else if nested_has_ids {
                    self.mark_cycle_failed(&cycle);
                } else {
                    let value = entity_value(&reply);
                    self.store_and_maybe_finalize(&cycle, (target_entity.to_string(), raw_id), Some(value));
                }
            }
        }
    }

    fn mark_cycle_failed(self: &Arc<Self>, cycle: &Arc<Mutex<CycleState>>) {
        let mut guard = cycle.lock();
        guard.failed = true;
        guard.remaining = guard.remaining.saturating_sub(1);
        let done = guard.remaining == 0;
        drop(guard);
        if done {
            self.finalize(cycle.clone());
        }
    }

    fn store_and_maybe_finalize(
        self: &Arc<Self>,
        cycle: &Arc<Mutex<CycleState>>,
        key: (String, u64),
        value: Option<Value>,
    ) {
        let mut guard = cycle.lock();
        match value {
            Some(value) => {
                guard.resolved.insert(key, value);
            }
            None => guard.failed = true,
        }
        guard.remaining = guard.remaining.saturating_sub(1);
        let done = guard.remaining == 0;
        drop(guard);
        if done {
            self.finalize(cycle.clone());
        }
    }

    fn finalize(self: &Arc<Self>, cycle: Arc<Mutex<CycleState>>) {
        let mut guard = cycle.lock();
        let Some(sink) = guard.sink.take() else {
            return;
        };
        let failed = guard.failed;
        let reply = guard.reply.clone();
        let id_fields = guard.adapter.id_fields;
        let resolved = std::mem::take(&mut guard.resolved);
        drop(guard);

        if failed {
            self.fail_sink(sink, "a nested entity lookup failed".to_string());
            return;
        }

        let enriched = substitute(reply, id_fields, &resolved);
        self.succeed_sink(sink, enriched);
    }

    fn finish_immediately(self: &Arc<Self>, reply: ReplyMessage, sink: CycleSink) {
        self.succeed_sink(sink, reply);
    }

    fn fail_sink(self: &Arc<Self>, sink: CycleSink, message: String) {
        match sink {
            CycleSink::Outer { responder, .. } => {
                let response = axum::response::IntoResponse::into_response(
                    GatewayError::ResolutionFailed { message },
                );
                let _ = responder.send(response);
            }
            CycleSink::Nested { parent, slot } => {
                self.store_and_maybe_finalize(&parent, slot, None);
            }
        }
    }

    fn succeed_sink(self: &Arc<Self>, sink: CycleSink, reply: ReplyMessage) {
        match sink {
            CycleSink::Outer {
                responder,
                completion,
            } => {
                let timestamp = Utc::now();
                completion(responder, timestamp, reply);
            }
            CycleSink::Nested { parent, slot } => {
                let value = entity_value(&reply);
                self.store_and_maybe_finalize(&parent, slot, Some(value));
            }
        }
    }
}

fn result_items(payload: &Value) -> Vec<Map<String, Value>> {
    let Value::Object(obj) = payload else {
        return Vec::new();
    };
    match obj.get("result") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_object().cloned())
            .collect(),
        Some(Value::Object(single)) => vec![single.clone()],
        _ => Vec::new(),
    }
}

fn entity_value(reply: &ReplyMessage) -> Value {
    match &reply.payload {
        Value::Object(obj) => obj.get("result").cloned().unwrap_or(Value::Null),
        other => other.clone(),
    }
}

/// Replaces every id-valued field the registry knows about with its
/// inflated entity object, inside the reply's `result` payload.
///
/// Substitution is driven by `id_fields` rather than by matching `resolved`
/// values against every field in the item: two distinct id fields can
/// legitimately carry the same raw id for different target entities (e.g.
/// `venue_id` and `state_id` both happening to be `9`), and matching by raw
/// value alone can't tell those apart.
fn substitute(
    mut reply: ReplyMessage,
    id_fields: &'static [(&'static str, &'static str)],
    resolved: &HashMap<(String, u64), Value>,
) -> ReplyMessage {
    let Value::Object(obj) = &mut reply.payload else {
        return reply;
    };
    let Some(result) = obj.get_mut("result") else {
        return reply;
    };

    match result {
        Value::Array(items) => {
            for item in items.iter_mut() {
                substitute_item(item, id_fields, resolved);
            }
        }
        Value::Object(_) => substitute_item(result, id_fields, resolved),
        _ => {}
    }

    reply
}

fn substitute_item(
    item: &mut Value,
    id_fields: &'static [(&'static str, &'static str)],
    resolved: &HashMap<(String, u64), Value>,
) {
    let Value::Object(map) = item else { return };
    for (field, target) in id_fields {
        let Some(raw_id) = map.get(*field).and_then(Value::as_u64) else {
            continue;
        };
        if let Some(value) = resolved.get(&(target.to_string(), raw_id)) {
            map.insert((*field).to_string(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockBrokerTransport;
    use serde_json::json;
    use tokio::sync::oneshot;

    fn reply_with(status: i64, payload: Value) -> ReplyMessage {
        ReplyMessage::from_value(payload).unwrap().with_status(status)
    }

    #[test]
    fn substitution_disambiguates_fields_sharing_a_raw_id() {
        // `venue_id` and `state_id` both happen to be 9 here, but they
        // target different entities and must not be substituted with the
        // same resolved value.
        let reply = reply_with(
            0,
            json!({"msg_id": 1, "status": 0, "result": {"name": "drill", "venue_id": 9, "state_id": 9}}),
        );

        let mut resolved = HashMap::new();
        resolved.insert(("venue".to_string(), 9), json!({"name": "Main Hall"}));
        resolved.insert(("state".to_string(), 9), json!({"label": "available"}));

        let enriched = substitute(reply, entities::EQUIPMENT.id_fields, &resolved);
        assert_eq!(enriched.payload["result"]["venue_id"]["name"], "Main Hall");
        assert_eq!(enriched.payload["result"]["state_id"]["label"], "available");
    }

    impl ReplyMessage {
        fn with_status(mut self, status: i64) -> Self {
            self.status = status;
            self
        }
    }

    #[tokio::test]
    async fn entity_with_no_id_fields_completes_immediately() {
        let shared = Arc::new(Shared::new());
        let transport = Arc::new(MockBrokerTransport::new());
        let resolver = Arc::new(Resolver::new(shared, transport, 2));

        let reply = reply_with(0, json!({"msg_id": 1, "status": 0, "result": {"name": "alice"}}));
        let (tx, rx) = oneshot::channel();

        resolver
            .resolve(
                "user",
                "u1",
                0,
                reply,
                tx,
                Box::new(|responder, _ts, reply| {
                    let _ = responder.send(
                        axum::response::IntoResponse::into_response(axum::Json(
                            reply.payload.clone(),
                        )),
                    );
                }),
            )
            .await;

        assert!(rx.await.is_ok());
    }

    #[tokio::test]
    async fn depth_at_limit_fails_when_resolution_is_needed() {
        let shared = Arc::new(Shared::new());
        let transport = Arc::new(MockBrokerTransport::new());
        let resolver = Arc::new(Resolver::new(shared, transport, 2));

        let reply = reply_with(
            0,
            json!({"msg_id": 1, "status": 0, "result": {"name": "drill", "venue_id": 9}}),
        );
        let (tx, rx) = oneshot::channel();

        resolver
            .resolve(
                "equipment",
                "u1",
                2,
                reply,
                tx,
                Box::new(|responder, _ts, reply| {
                    let _ = responder.send(
                        axum::response::IntoResponse::into_response(axum::Json(
                            reply.payload.clone(),
                        )),
                    );
                }),
            )
            .await;

        let response = rx.await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }
}
