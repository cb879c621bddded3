//! JSON-RPC 2.0 wire types for the MCP stdio transport.
//!
//! Newline-delimited: one JSON object per line on the child's stdin/stdout, no HTTP framing
//! involved.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Serialize)]
pub struct OutgoingRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl<'a> OutgoingRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: Option<Value>) -> Self {
        OutgoingRequest { jsonrpc: "2.0", id, method, params }
    }

    /// Serialise as one newline-delimited JSON line, including the trailing `\n`.
    pub fn to_line(&self) -> String {
        format!("{}\n", serde_json::to_string(self).expect("OutgoingRequest must serialize"))
    }
}

#[derive(Serialize)]
pub struct OutgoingNotification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl<'a> OutgoingNotification<'a> {
    pub fn new(method: &'a str, params: Option<Value>) -> Self {
        OutgoingNotification { jsonrpc: "2.0", method, params }
    }

    pub fn to_line(&self) -> String {
        format!("{}\n", serde_json::to_string(self).expect("OutgoingNotification must serialize"))
    }
}

#[derive(Debug, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// One parsed line from the child's stdout: either a response correlated to a request `id`, or a
/// notification the supervisor doesn't expect to receive in this scope but tolerates.
#[derive(Debug)]
pub enum IncomingMessage {
    Response { id: u64, result: Result<Value, RpcErrorObject> },
    Notification { method: String, #[allow(dead_code)] params: Option<Value> },
    Unparseable,
}

/// Parse one line of the child's stdout. Malformed JSON or a message missing both `id` and
/// `method` is reported as [`IncomingMessage::Unparseable`] rather than erroring the whole
/// reader task — a single bad line from a misbehaving server must not take down the connection.
pub fn parse_line(line: &str) -> IncomingMessage {
    let Ok(value) = serde_json::from_str::<Value>(line) else {
        return IncomingMessage::Unparseable;
    };
    if let Some(id) = value.get("id").and_then(Value::as_u64) {
        if let Some(error) = value.get("error") {
            let error_object: RpcErrorObject = match serde_json::from_value(error.clone()) {
                Ok(e) => e,
                Err(_) => RpcErrorObject { code: -1, message: "malformed error object".to_string(), data: None },
            };
            return IncomingMessage::Response { id, result: Err(error_object) };
        }
        let result = value.get("result").cloned().unwrap_or(Value::Null);
        return IncomingMessage::Response { id, result: Ok(result) };
    }
    if let Some(method) = value.get("method").and_then(Value::as_str) {
        return IncomingMessage::Notification {
            method: method.to_string(),
            params: value.get("params").cloned(),
        };
    }
    IncomingMessage::Unparseable
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_successful_response() {
        match parse_line(r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#) {
            IncomingMessage::Response { id, result: Ok(value) } => {
                assert_eq!(id, 1);
                assert_eq!(value["ok"], true);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_error_response() {
        match parse_line(r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32601,"message":"method not found"}}"#) {
            IncomingMessage::Response { id, result: Err(error) } => {
                assert_eq!(id, 2);
                assert_eq!(error.code, -32601);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_notification_without_id() {
        match parse_line(r#"{"jsonrpc":"2.0","method":"notifications/progress","params":{}}"#) {
            IncomingMessage::Notification { method, .. } => assert_eq!(method, "notifications/progress"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn malformed_json_is_unparseable_not_fatal() {
        assert!(matches!(parse_line("not json at all"), IncomingMessage::Unparseable));
    }

    #[test]
    fn request_serializes_with_id_and_method() {
        let request = OutgoingRequest::new(7, "tools/list", None);
        let line = request.to_line();
        assert!(line.ends_with('\n'));
        let value: Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["method"], "tools/list");
        assert!(value.get("params").is_none());
    }
}
