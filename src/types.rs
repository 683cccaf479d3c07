//! Wire-level types shared by the dispatcher, demultiplexer, and resolver.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A request identifier, unique among currently-outstanding requests.
///
/// Kept within the 53-bit safe integer range so it round-trips losslessly
/// through the JSON `number` type used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl RequestId {
    pub const MAX_SAFE: u64 = (1u64 << 53) - 1;
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The intention carried by an outgoing request message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MsgIntention {
    #[serde(rename = "READ")]
    Read,
    #[serde(rename = "CREATE")]
    Create,
    #[serde(rename = "UPDATE")]
    Update,
    #[serde(rename = "DELETE")]
    Delete,
}

/// A dotted routing key of the form `<entity>.details.<verb>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingKey(String);

impl RoutingKey {
    pub fn new(entity: &str, verb: &str) -> Self {
        Self(format!("{entity}.details.{verb}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Builds the JSON envelope for an outgoing request message: the fixed
/// `{msg_id, msg_intention, status, userID}` header merged with whatever
/// entity-specific fields the caller supplies.
pub fn build_request_message(
    msg_id: RequestId,
    intention: MsgIntention,
    user_id: &str,
    mut fields: Map<String, Value>,
) -> Value {
    fields.insert("msg_id".to_string(), Value::from(msg_id.0));
    fields.insert(
        "msg_intention".to_string(),
        serde_json::to_value(intention).expect("MsgIntention always serializes"),
    );
    fields.insert("status".to_string(), Value::from(0));
    fields.insert("userID".to_string(), Value::from(user_id));
    Value::Object(fields)
}

/// A parsed, validated reply frame: `{msg_id, status, ...payload}`.
#[derive(Debug, Clone)]
pub struct ReplyMessage {
    pub msg_id: RequestId,
    pub status: i64,
    pub payload: Value,
}

/// Why a raw inbound frame could not be turned into a [`ReplyMessage`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplyParseError {
    #[error("reply payload is not a JSON object")]
    NotAnObject,
    #[error("reply is missing a numeric msg_id")]
    MissingMsgId,
    #[error("reply is missing a numeric status")]
    MissingStatus,
}

impl ReplyMessage {
    /// Parses a raw inbound byte frame per §3's reply invariant: a reply
    /// without a numeric `msg_id` or numeric `status` is malformed.
    pub fn parse(bytes: &[u8]) -> Result<Self, ReplyParseError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|_| ReplyParseError::NotAnObject)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, ReplyParseError> {
        let Value::Object(obj) = value else {
            return Err(ReplyParseError::NotAnObject);
        };
        let msg_id = obj
            .get("msg_id")
            .and_then(Value::as_u64)
            .ok_or(ReplyParseError::MissingMsgId)?;
        let status = obj
            .get("status")
            .and_then(Value::as_i64)
            .ok_or(ReplyParseError::MissingStatus)?;
        Ok(ReplyMessage {
            msg_id: RequestId(msg_id),
            status,
            payload: Value::Object(obj),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_reply() {
        let reply = ReplyMessage::parse(br#"{"msg_id": 7, "status": 0}"#).unwrap();
        assert_eq!(reply.msg_id, RequestId(7));
        assert_eq!(reply.status, 0);
    }

    #[test]
    fn rejects_missing_msg_id() {
        let err = ReplyMessage::parse(br#"{"status": 0}"#).unwrap_err();
        assert_eq!(err, ReplyParseError::MissingMsgId);
    }

    #[test]
    fn rejects_missing_status() {
        let err = ReplyMessage::parse(br#"{"msg_id": 1}"#).unwrap_err();
        assert_eq!(err, ReplyParseError::MissingStatus);
    }

    #[test]
    fn rejects_non_object() {
        let err = ReplyMessage::parse(br#"[1,2,3]"#).unwrap_err();
        assert_eq!(err, ReplyParseError::NotAnObject);
    }

    #[test]
    fn builds_request_envelope() {
        let mut fields = Map::new();
        fields.insert("id".to_string(), Value::from("abc"));
        let msg = build_request_message(RequestId(1), MsgIntention::Read, "u1", fields);
        assert_eq!(msg["msg_id"], 1);
        assert_eq!(msg["msg_intention"], "READ");
        assert_eq!(msg["status"], 0);
        assert_eq!(msg["userID"], "u1");
        assert_eq!(msg["id"], "abc");
    }

    #[test]
    fn routing_key_shape() {
        let key = RoutingKey::new("equipment", "get");
        assert_eq!(key.as_str(), "equipment.details.get");
    }
}
