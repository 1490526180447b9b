//! Wire protocol between the bridge and editor clients.
//!
//! One JSON object per line over TCP. The bridge terminates every message
//! with `\n`; both sides also accept a trailing message without one (see
//! [`framing::FramedConnection`]). Reserved top-level keys: `command`,
//! `type`, `params`, `id`, `status`, `result`, `message`, `clientId`,
//! `clientInfo`.

pub mod framing;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol identifier carried in discovery announcements.
pub const PROTOCOL_NAME: &str = "mcp-bridge";

/// `type` value routing an envelope to the editor's command dispatcher.
pub const TYPE_COMMAND: &str = "";
/// `type` value routing an envelope to the editor's resource dispatcher.
pub const TYPE_RESOURCE: &str = "resource";
/// `type` value of the client-initiated identity-rewrite message.
pub const TYPE_REGISTRATION: &str = "registration";

/// Outbound request from the bridge to an editor client.
#[derive(Debug, Clone, Serialize)]
pub struct RequestEnvelope {
    pub command: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub params: Value,
    pub id: String,
}

impl RequestEnvelope {
    /// Serialize with the trailing newline the bridge always appends.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Reply from an editor client, correlated by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl ResponseEnvelope {
    pub fn success(result: Value, id: Option<String>) -> Self {
        Self {
            status: ResponseStatus::Success,
            result: Some(result),
            message: None,
            id,
        }
    }

    pub fn error(message: impl Into<String>, id: Option<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            result: None,
            message: Some(message.into()),
            id,
        }
    }

    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Metadata a client supplies when it registers. Nothing is validated;
/// every field is an opaque display string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_path_hash: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl ClientInfo {
    /// The product name when it identifies a real project. Placeholder
    /// values are treated as absent and hidden from user-visible listings.
    pub fn known_product_name(&self) -> Option<&str> {
        match self.product_name.as_deref() {
            None | Some("") | Some("Unknown") | Some("UnknownProject") => None,
            Some(name) => Some(name),
        }
    }
}

/// Classification of a framed message arriving from a client socket.
#[derive(Debug)]
pub enum InboundMessage {
    /// Identity rewrite: replace the address-derived client id.
    Registration {
        client_id: String,
        client_info: Option<ClientInfo>,
    },
    /// Correlated reply to an outstanding request.
    Response { id: String, payload: Value },
    /// Anything else without an `id`: an async event for subscribers.
    Event(Value),
}

impl InboundMessage {
    pub fn classify(value: Value) -> Self {
        if value.get("type").and_then(Value::as_str) == Some(TYPE_REGISTRATION) {
            if let Some(client_id) = value.get("clientId").and_then(Value::as_str) {
                let client_info = value
                    .get("clientInfo")
                    .cloned()
                    .and_then(|v| serde_json::from_value(v).ok());
                return Self::Registration {
                    client_id: client_id.to_string(),
                    client_info,
                };
            }
            // Registration without a clientId cannot rewrite anything.
            return Self::Event(value);
        }

        if let Some(id) = value.get("id").and_then(Value::as_str) {
            return Self::Response {
                id: id.to_string(),
                payload: value,
            };
        }

        Self::Event(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_envelope_serializes_wire_keys() {
        let envelope = RequestEnvelope {
            command: "menu.execute".into(),
            kind: TYPE_COMMAND.into(),
            params: json!({"menuItem": "File/Save Project"}),
            id: "1".into(),
        };
        let line = envelope.to_line().unwrap();
        assert!(line.ends_with('\n'));
        let value: Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["command"], "menu.execute");
        assert_eq!(value["type"], "");
        assert_eq!(value["params"]["menuItem"], "File/Save Project");
        assert_eq!(value["id"], "1");
    }

    #[test]
    fn classify_registration() {
        let msg = InboundMessage::classify(json!({
            "type": "registration",
            "clientId": "proj-x",
            "clientInfo": {"productName": "Demo", "customKey": 7}
        }));
        match msg {
            InboundMessage::Registration {
                client_id,
                client_info,
            } => {
                assert_eq!(client_id, "proj-x");
                let info = client_info.unwrap();
                assert_eq!(info.product_name.as_deref(), Some("Demo"));
                assert_eq!(info.extra["customKey"], 7);
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn classify_response_by_id_alone() {
        let msg = InboundMessage::classify(json!({
            "status": "success",
            "result": {"success": true},
            "id": "42"
        }));
        assert!(matches!(msg, InboundMessage::Response { ref id, .. } if id == "42"));
    }

    #[test]
    fn classify_idless_object_as_event() {
        let msg = InboundMessage::classify(json!({"event": "sceneChanged"}));
        assert!(matches!(msg, InboundMessage::Event(_)));
    }

    #[test]
    fn placeholder_product_names_are_hidden() {
        for hidden in ["", "Unknown", "UnknownProject"] {
            let info = ClientInfo {
                product_name: Some(hidden.to_string()),
                ..Default::default()
            };
            assert_eq!(info.known_product_name(), None);
        }
        let info = ClientInfo {
            product_name: Some("My Game".into()),
            ..Default::default()
        };
        assert_eq!(info.known_product_name(), Some("My Game"));
    }
}
