use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// The wire envelope for every control-channel frame, in both directions:
/// `{type, id?, payload}`. `id` correlates a request with its response when
/// present; unmarshal `payload` according to `type` once it has been
/// validated (§9 — frames are dynamically typed on the wire).
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub payload: Value,
}

impl OutboundFrame {
    pub fn new(kind: &str, payload: Value) -> Self {
        OutboundFrame {
            kind: kind.to_string(),
            id: None,
            payload,
        }
    }

    pub fn with_id(mut self, id: Option<String>) -> Self {
        self.id = id;
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("OutboundFrame serializes infallibly")
    }
}

/// Wire `error.code` values (§7). Distinct from `AppError`, which covers the
/// HTTP surface only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WireErrorCode {
    InvalidMessage,
    UnknownMessage,
    NotAuthenticated,
    RegistrationFailed,
    AccessDenied,
    MachineOffline,
    ConnectionNotFound,
    InvalidConnection,
    ConnectionTimeout,
}

/// Builds an `error` frame. Broadcasts never carry an `id`; request-triggered
/// errors echo the request's `id` so the caller can correlate it (§7: every
/// request carrying an `id` gets exactly one response or one error, never both).
pub fn error_frame(id: Option<String>, code: WireErrorCode, message: Option<&str>) -> OutboundFrame {
    let mut payload = json!({ "code": code });
    if let Some(message) = message {
        payload["message"] = Value::String(message.to_string());
    }
    OutboundFrame::new("error", payload).with_id(id)
}

// ── Client → server message types ────────────────────────────────────────────

pub const MSG_AUTH: &str = "auth";
pub const MSG_REGISTER_USER: &str = "register_user";
pub const MSG_REGISTER_MACHINE: &str = "register_machine";
pub const MSG_HEARTBEAT: &str = "heartbeat";
pub const MSG_LIST_MACHINES: &str = "list_machines";
pub const MSG_DELETE_MACHINE: &str = "delete_machine";
pub const MSG_RENAME_MACHINE: &str = "rename_machine";
pub const MSG_CONNECT_TO_MACHINE: &str = "connect_to_machine";
pub const MSG_CONNECTION_ACCEPTED: &str = "connection_accepted";
pub const MSG_CONNECTION_REJECTED: &str = "connection_rejected";
pub const MSG_RTC_OFFER: &str = "rtc_offer";
pub const MSG_RTC_ANSWER: &str = "rtc_answer";
pub const MSG_RTC_ICE_CANDIDATE: &str = "rtc_ice_candidate";

// ── Server → client message types ────────────────────────────────────────────

pub const MSG_AUTH_RESPONSE: &str = "auth_response";
pub const MSG_REGISTER_USER_RESPONSE: &str = "register_user_response";
pub const MSG_MACHINE_REGISTERED: &str = "machine_registered";
pub const MSG_HEARTBEAT_ACK: &str = "heartbeat_ack";
pub const MSG_MACHINES_LIST: &str = "machines_list";
pub const MSG_DELETE_MACHINE_RESPONSE: &str = "delete_machine_response";
pub const MSG_RENAME_MACHINE_RESPONSE: &str = "rename_machine_response";
pub const MSG_CONNECTION_REQUEST: &str = "connection_request";
pub const MSG_MACHINE_ONLINE: &str = "machine_online";
pub const MSG_MACHINE_OFFLINE: &str = "machine_offline";
pub const MSG_ERROR: &str = "error";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_frame_parses_minimal_json() {
        let raw = r#"{"type":"heartbeat"}"#;
        let frame: InboundFrame = serde_json::from_str(raw).unwrap();
        assert_eq!(frame.kind, "heartbeat");
        assert!(frame.id.is_none());
        assert!(frame.payload.is_null());
    }

    #[test]
    fn inbound_frame_rejects_missing_type() {
        let raw = r#"{"id":"1","payload":{}}"#;
        let result: Result<InboundFrame, _> = serde_json::from_str(raw);
        assert!(result.is_err());
    }

    #[test]
    fn outbound_frame_omits_id_when_none() {
        let frame = OutboundFrame::new("machine_online", json!({"machineId": "m1"}));
        let rendered = frame.to_json();
        assert!(!rendered.contains("\"id\""));
    }

    #[test]
    fn outbound_frame_includes_id_when_present() {
        let frame =
            OutboundFrame::new("heartbeat_ack", json!({})).with_id(Some("req-1".to_string()));
        let rendered = frame.to_json();
        assert!(rendered.contains("\"id\":\"req-1\""));
    }

    #[test]
    fn error_frame_serializes_code_as_screaming_snake_case() {
        let frame = error_frame(None, WireErrorCode::AccessDenied, None);
        let rendered = frame.to_json();
        assert!(rendered.contains("\"ACCESS_DENIED\""));
    }
}
