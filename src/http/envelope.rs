//! The HTTP response envelope and the broker-status-to-HTTP mapping (§6).

use axum::response::{IntoResponse, Response};
use axum::{http::StatusCode, Json};
use serde_json::{json, Value};

use crate::error::GatewayError;
use crate::types::ReplyMessage;

fn extract_result(payload: &Value) -> Value {
    match payload {
        Value::Object(obj) => obj.get("result").cloned().unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

/// Applies the status-to-HTTP mapping table in §6 to a reply that the
/// request table (or the resolver) is ready to hand back to the client.
pub fn reply_to_response(reply: ReplyMessage) -> Response {
    match reply.status {
        0 => (
            StatusCode::OK,
            Json(json!({ "status": "OK", "result": extract_result(&reply.payload) })),
        )
            .into_response(),
        404 => GatewayError::NotFound.into_response(),
        status if (400..500).contains(&status) => GatewayError::BadRequest {
            message: format!("upstream rejected the request (status {status})"),
            code: "BAD_REQUEST_UPSTREAM",
        }
        .into_response(),
        other => GatewayError::UpstreamError {
            upstream_status: other,
        }
        .into_response(),
    }
}
