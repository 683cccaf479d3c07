//! The thin REST adapter layer (§4.8, §6): one uniform CRUD route group per
//! registered entity, built off the static adapter registry.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Map, Value};
use tokio::sync::oneshot;

use crate::dispatcher::Dispatcher;
use crate::entities::{self, EntityAdapter};
use crate::error::GatewayError;
use crate::request_table::CompletionCallback;
use crate::resolver::Resolver;
use crate::shared::Shared;
use crate::types::{build_request_message, MsgIntention, RoutingKey};

use super::envelope::reply_to_response;

#[derive(Clone)]
pub struct AppState {
    pub shared: Arc<Shared>,
    pub dispatcher: Arc<Dispatcher>,
    pub resolver: Arc<Resolver>,
}

#[derive(Clone)]
struct EntityState {
    app: AppState,
    adapter: &'static EntityAdapter,
}

fn caller_identity(headers: &HeaderMap) -> String {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("anonymous")
        .to_string()
}

fn coerce_query_value(raw: &str) -> Value {
    if let Ok(b) = raw.parse::<bool>() {
        return Value::from(b);
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Value::from(f);
    }
    Value::from(raw)
}

/// Dispatches `message` and, once the reply arrives, routes it through the
/// resolver before translating it to an HTTP response.
async fn dispatch_and_resolve(
    state: &EntityState,
    user_id: String,
    verb: &str,
    intention: MsgIntention,
    fields: Map<String, Value>,
) -> Response {
    let id = state.app.shared.allocate();
    let message = build_request_message(id, intention, &user_id, fields);
    let key = RoutingKey::new(state.adapter.routing_prefix, verb);
    let (tx, rx) = oneshot::channel();

    let resolver = state.app.resolver.clone();
    let entity_name = state.adapter.name;
    let completion: CompletionCallback = Box::new(move |responder, _timestamp, reply| {
        let resolver = resolver.clone();
        tokio::spawn(async move {
            resolver
                .resolve(
                    entity_name,
                    &user_id,
                    0,
                    reply,
                    responder,
                    Box::new(|responder, _ts, reply| {
                        let _ = responder.send(reply_to_response(reply));
                    }),
                )
                .await;
        });
    });

    state
        .app
        .dispatcher
        .send_request(id, key, message, tx, completion, None)
        .await;

    match rx.await {
        Ok(response) => response,
        Err(_) => GatewayError::Timeout.into_response(),
    }
}

async fn list(
    State(state): State<EntityState>,
    headers: HeaderMap,
    Query(params): Query<std::collections::HashMap<String, String>>,
) -> Response {
    let mut fields = Map::new();
    for (key, value) in params {
        fields.insert(key, coerce_query_value(&value));
    }
    dispatch_and_resolve(
        &state,
        caller_identity(&headers),
        "get",
        MsgIntention::Read,
        fields,
    )
    .await
}

async fn get_one(
    State(state): State<EntityState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let Ok(id) = id.parse::<u64>() else {
        return GatewayError::BadRequest {
            message: "path id must be a non-negative integer".to_string(),
            code: "BAD_REQUEST_INVALID_ID",
        }
        .into_response();
    };
    let mut fields = Map::new();
    fields.insert("id".to_string(), Value::from(id));
    dispatch_and_resolve(
        &state,
        caller_identity(&headers),
        "get",
        MsgIntention::Read,
        fields,
    )
    .await
}

async fn create(
    State(state): State<EntityState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let Value::Object(fields) = body else {
        return GatewayError::BadRequest {
            message: "request body must be a JSON object".to_string(),
            code: "BAD_REQUEST_INVALID_BODY",
        }
        .into_response();
    };

    for field in state.adapter.required_create_fields {
        if !fields.contains_key(*field) {
            return GatewayError::BadRequest {
                message: format!("missing required field `{field}`"),
                code: "BAD_REQUEST_MISSING_FIELD",
            }
            .into_response();
        }
    }

    dispatch_and_resolve(
        &state,
        caller_identity(&headers),
        "create",
        MsgIntention::Create,
        fields,
    )
    .await
}

async fn update(
    State(state): State<EntityState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let Ok(id) = id.parse::<u64>() else {
        return GatewayError::BadRequest {
            message: "path id must be a non-negative integer".to_string(),
            code: "BAD_REQUEST_INVALID_ID",
        }
        .into_response();
    };
    let Value::Object(mut fields) = body else {
        return GatewayError::BadRequest {
            message: "request body must be a JSON object".to_string(),
            code: "BAD_REQUEST_INVALID_BODY",
        }
        .into_response();
    };
    fields.insert("id".to_string(), Value::from(id));

    dispatch_and_resolve(
        &state,
        caller_identity(&headers),
        "update",
        MsgIntention::Update,
        fields,
    )
    .await
}

async fn delete_one(
    State(state): State<EntityState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let Ok(id) = id.parse::<u64>() else {
        return GatewayError::BadRequest {
            message: "path id must be a non-negative integer".to_string(),
            code: "BAD_REQUEST_INVALID_ID",
        }
        .into_response();
    };
    let mut fields = Map::new();
    fields.insert("id".to_string(), Value::from(id));
    dispatch_and_resolve(
        &state,
        caller_identity(&headers),
        "delete",
        MsgIntention::Delete,
        fields,
    )
    .await
}

fn entity_router(app: AppState, adapter: &'static EntityAdapter) -> Router<()> {
    let state = EntityState { app, adapter };
    let collection = format!("/{}", adapter.routing_prefix);
    let item = format!("/{}/{{id}}", adapter.routing_prefix);

    Router::new()
        .route(
            &collection,
            get(list).post(create),
        )
        .route(
            &item,
            get(get_one).patch(update).delete(delete_one),
        )
        .with_state(state)
}

async fn healthz() -> Response {
    Json(serde_json::json!({ "status": "OK", "result": "healthy" })).into_response()
}

/// Assembles the full REST router: one CRUD group per registered entity,
/// plus the liveness probe.
pub fn build_router(app: AppState) -> Router<()> {
    let mut router = Router::new().route("/healthz", get(healthz));
    for adapter in entities::REGISTRY {
        router = router.merge(entity_router(app.clone(), *adapter));
    }
    router
}
