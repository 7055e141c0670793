//! Wire Protocol Types
//!
//! Types for the message stream produced by an instrumented app: captured
//! HTTP exchanges plus control messages carrying session metadata. Each
//! WebSocket frame decodes to one [`CapturedMessage`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Control code announcing the server identity (name + description pair).
pub const CONTROL_SERVER_IDENTITY: i32 = 1;

/// Declared interpretation of a message body.
///
/// Derived from the `Content-Type` header at decode time; the body itself
/// stays opaque. Viewers pick a renderer based on this tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BodyFormat {
    /// No body, or a blank one
    None,
    /// JSON content
    Json,
    /// XML content
    Xml,
    /// Anything else; carries the raw MIME type
    Other(String),
}

impl fmt::Display for BodyFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodyFormat::None => write!(f, "none"),
            BodyFormat::Json => write!(f, "json"),
            BodyFormat::Xml => write!(f, "xml"),
            BodyFormat::Other(mime) => write!(f, "{mime}"),
        }
    }
}

impl BodyFormat {
    /// Classify a body from the message headers.
    fn classify(headers: &HashMap<String, Vec<String>>, body: Option<&str>) -> Self {
        match body {
            None => return BodyFormat::None,
            Some(b) if b.trim().is_empty() => return BodyFormat::None,
            Some(_) => {}
        }

        let content_type = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .and_then(|(_, values)| values.first())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase());

        match content_type.as_deref() {
            Some(ct) if ct.contains("json") => BodyFormat::Json,
            Some(ct) if ct.contains("xml") => BodyFormat::Xml,
            Some(ct) => BodyFormat::Other(ct.to_string()),
            None => BodyFormat::Other("application/octet-stream".to_string()),
        }
    }
}

/// One captured exchange or control event, immutable once decoded.
///
/// Equality is by [`message_id`](Self::message_id): the id is stable for the
/// message's lifetime and is what selection state should be keyed on.
/// Method, URL, status and timing are opaque passthrough fields rendered by
/// the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct CapturedMessage {
    /// Unique id, generated at decode time when the frame carries none
    pub message_id: String,
    /// Id correlating a request with its response
    pub request_id: Option<String>,
    /// Capture timestamp in milliseconds, as reported by the remote process
    pub timestamp: Option<u64>,
    /// HTTP method (requests only)
    pub method: Option<String>,
    /// Request URL (requests only)
    pub url: Option<String>,
    /// HTTP status code (responses only)
    pub status_code: Option<u16>,
    /// Header map as sent on the wire
    pub headers: HashMap<String, Vec<String>>,
    /// Declared body interpretation
    pub body_format: BodyFormat,
    /// Opaque body payload (Base64 text as received), absent for bodyless
    /// exchanges and control messages
    pub body: Option<String>,
    /// Control event kind; `Some` marks this as a control message
    pub control_code: Option<i32>,
    /// Control payload, only meaningful when the code is recognized
    pub control_data: Option<HashMap<String, serde_json::Value>>,
}

impl PartialEq for CapturedMessage {
    fn eq(&self, other: &Self) -> bool {
        self.message_id == other.message_id
    }
}

impl Eq for CapturedMessage {}

impl CapturedMessage {
    /// Whether this message carries protocol metadata rather than traffic.
    pub fn is_control(&self) -> bool {
        self.control_code.is_some()
    }

    /// Interpret this message as a control event.
    ///
    /// Returns `None` for data messages. Control messages with a code this
    /// build does not understand yield [`ControlError::UnknownCode`]; the
    /// session stays up and callers should surface a notice instead of
    /// failing.
    pub fn control_event(&self) -> Option<Result<ControlEvent, ControlError>> {
        let code = self.control_code?;
        Some(match code {
            CONTROL_SERVER_IDENTITY => self.server_identity().map(ControlEvent::ServerIdentity),
            other => Err(ControlError::UnknownCode(other)),
        })
    }

    fn server_identity(&self) -> Result<ServerIdentity, ControlError> {
        let data = self
            .control_data
            .as_ref()
            .ok_or(ControlError::MissingField("controlData"))?;
        let field = |name: &'static str| {
            data.get(name)
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or(ControlError::MissingField(name))
        };
        Ok(ServerIdentity {
            server_name: field("serverName")?,
            server_description: field("serverDescription")?,
        })
    }
}

/// Decoded control event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// The remote process announced who it is
    ServerIdentity(ServerIdentity),
}

/// Identity announcement sent by the instrumented process on connect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerIdentity {
    pub server_name: String,
    pub server_description: String,
}

/// Errors interpreting a structurally valid control message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    #[error("unknown control code {0}")]
    UnknownCode(i32),

    #[error("control message missing {0}")]
    MissingField(&'static str),
}

/// Errors decoding a single inbound frame.
///
/// Never fatal to the session: the frame is dropped and reported.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("binary frame is not UTF-8 text")]
    NotText,

    #[error("frame carries neither exchange data nor a control code")]
    EmptyFrame,
}

/// Header values on the wire are either a single string or a list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HeaderValues {
    One(String),
    Many(Vec<String>),
}

impl From<HeaderValues> for Vec<String> {
    fn from(values: HeaderValues) -> Self {
        match values {
            HeaderValues::One(value) => vec![value],
            HeaderValues::Many(values) => values,
        }
    }
}

/// Raw shape of one JSON frame as produced by the remote process.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFrame {
    message_id: Option<String>,
    request_id: Option<String>,
    timestamp: Option<u64>,
    method: Option<String>,
    url: Option<String>,
    status_code: Option<u16>,
    headers: Option<HashMap<String, HeaderValues>>,
    body: Option<String>,
    control_code: Option<i32>,
    control_data: Option<HashMap<String, serde_json::Value>>,
}

/// Decode one text frame into a [`CapturedMessage`].
///
/// Frames without a `messageId` get a generated one so every stored message
/// has a stable unique id. A JSON object carrying neither exchange fields
/// nor a control code is rejected as [`DecodeError::EmptyFrame`].
pub fn decode_frame(text: &str) -> Result<CapturedMessage, DecodeError> {
    let frame: WireFrame = serde_json::from_str(text)?;

    let is_exchange = frame.request_id.is_some()
        || frame.method.is_some()
        || frame.status_code.is_some()
        || frame.message_id.is_some();
    if frame.control_code.is_none() && !is_exchange {
        return Err(DecodeError::EmptyFrame);
    }

    let headers: HashMap<String, Vec<String>> = frame
        .headers
        .unwrap_or_default()
        .into_iter()
        .map(|(name, values)| (name, values.into()))
        .collect();

    let body_format = BodyFormat::classify(&headers, frame.body.as_deref());

    Ok(CapturedMessage {
        message_id: frame
            .message_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        request_id: frame.request_id,
        timestamp: frame.timestamp,
        method: frame.method,
        url: frame.url,
        status_code: frame.status_code,
        headers,
        body_format,
        body: frame.body,
        control_code: frame.control_code,
        control_data: frame.control_data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(value: serde_json::Value) -> CapturedMessage {
        decode_frame(&value.to_string()).unwrap()
    }

    #[test]
    fn test_decode_request_frame() {
        let message = decode(serde_json::json!({
            "requestId": "req-1",
            "url": "https://example.com/api/users",
            "method": "GET",
            "headers": { "Accept": "application/json" },
            "timestamp": 1500000000000u64
        }));

        assert_eq!(message.request_id.as_deref(), Some("req-1"));
        assert_eq!(message.method.as_deref(), Some("GET"));
        assert_eq!(message.timestamp, Some(1_500_000_000_000));
        assert!(!message.is_control());
        assert!(!message.message_id.is_empty());
    }

    #[test]
    fn test_decode_response_frame_with_json_body() {
        let message = decode(serde_json::json!({
            "requestId": "req-1",
            "statusCode": 200,
            "headers": { "Content-Type": "application/json; charset=utf-8" },
            "body": "eyJvayI6dHJ1ZX0="
        }));

        assert_eq!(message.status_code, Some(200));
        assert_eq!(message.body_format, BodyFormat::Json);
        assert_eq!(message.body.as_deref(), Some("eyJvayI6dHJ1ZX0="));
    }

    #[test]
    fn test_decode_header_list_values() {
        let message = decode(serde_json::json!({
            "requestId": "req-1",
            "method": "GET",
            "headers": { "Set-Cookie": ["a=1", "b=2"] }
        }));

        assert_eq!(
            message.headers.get("Set-Cookie"),
            Some(&vec!["a=1".to_string(), "b=2".to_string()])
        );
    }

    #[test]
    fn test_body_format_classification() {
        let xml = decode(serde_json::json!({
            "requestId": "r",
            "statusCode": 200,
            "headers": { "content-type": "text/xml" },
            "body": "PGEvPg=="
        }));
        assert_eq!(xml.body_format, BodyFormat::Xml);

        let blank = decode(serde_json::json!({
            "requestId": "r",
            "statusCode": 204,
            "headers": { "Content-Type": "application/json" },
            "body": ""
        }));
        assert_eq!(blank.body_format, BodyFormat::None);

        let other = decode(serde_json::json!({
            "requestId": "r",
            "statusCode": 200,
            "headers": { "Content-Type": "image/png" },
            "body": "AAAA"
        }));
        assert_eq!(other.body_format, BodyFormat::Other("image/png".to_string()));

        let untyped = decode(serde_json::json!({
            "requestId": "r",
            "statusCode": 200,
            "body": "AAAA"
        }));
        assert_eq!(
            untyped.body_format,
            BodyFormat::Other("application/octet-stream".to_string())
        );
    }

    #[test]
    fn test_decode_control_frame() {
        let message = decode(serde_json::json!({
            "controlCode": 1,
            "controlData": {
                "serverName": "Pixel",
                "serverDescription": "Android 13"
            }
        }));

        assert!(message.is_control());
        let event = message.control_event().unwrap().unwrap();
        assert_eq!(
            event,
            ControlEvent::ServerIdentity(ServerIdentity {
                server_name: "Pixel".to_string(),
                server_description: "Android 13".to_string(),
            })
        );
    }

    #[test]
    fn test_unknown_control_code() {
        let message = decode(serde_json::json!({
            "controlCode": 99,
            "controlData": {}
        }));

        let err = message.control_event().unwrap().unwrap_err();
        assert_eq!(err, ControlError::UnknownCode(99));
    }

    #[test]
    fn test_control_frame_missing_identity_fields() {
        let message = decode(serde_json::json!({
            "controlCode": 1,
            "controlData": { "serverName": "Pixel" }
        }));

        let err = message.control_event().unwrap().unwrap_err();
        assert_eq!(err, ControlError::MissingField("serverDescription"));
    }

    #[test]
    fn test_control_event_none_for_data_messages() {
        let message = decode(serde_json::json!({
            "requestId": "req-1",
            "method": "GET"
        }));
        assert!(message.control_event().is_none());
    }

    #[test]
    fn test_decode_rejects_malformed_frame() {
        assert!(matches!(
            decode_frame("not json at all"),
            Err(DecodeError::Json(_))
        ));
    }

    #[test]
    fn test_decode_rejects_empty_frame() {
        assert!(matches!(
            decode_frame("{}"),
            Err(DecodeError::EmptyFrame)
        ));
    }

    #[test]
    fn test_equality_is_by_message_id() {
        let a = decode(serde_json::json!({
            "messageId": "m-1",
            "requestId": "req-1",
            "method": "GET"
        }));
        let b = decode(serde_json::json!({
            "messageId": "m-1",
            "requestId": "req-2",
            "statusCode": 200
        }));
        let c = decode(serde_json::json!({
            "messageId": "m-2",
            "requestId": "req-1",
            "method": "GET"
        }));

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = decode(serde_json::json!({ "requestId": "r", "method": "GET" }));
        let b = decode(serde_json::json!({ "requestId": "r", "method": "GET" }));
        assert_ne!(a.message_id, b.message_id);
    }
}
