use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::{domain::SessionId, error::DecodeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    ContextualUpdate,
    QuoteReady,
    LabelCreated,
    ClientToolCall,
    ClientToolResult,
    Ping,
    Notification,
    Error,
    SessionState,
}

impl MessageKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "contextual_update" => Some(MessageKind::ContextualUpdate),
            "quote_ready" => Some(MessageKind::QuoteReady),
            "label_created" => Some(MessageKind::LabelCreated),
            "client_tool_call" => Some(MessageKind::ClientToolCall),
            "client_tool_result" => Some(MessageKind::ClientToolResult),
            "ping" => Some(MessageKind::Ping),
            "notification" => Some(MessageKind::Notification),
            "error" => Some(MessageKind::Error),
            "session_state" => Some(MessageKind::SessionState),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::ContextualUpdate => "contextual_update",
            MessageKind::QuoteReady => "quote_ready",
            MessageKind::LabelCreated => "label_created",
            MessageKind::ClientToolCall => "client_tool_call",
            MessageKind::ClientToolResult => "client_tool_result",
            MessageKind::Ping => "ping",
            MessageKind::Notification => "notification",
            MessageKind::Error => "error",
            MessageKind::SessionState => "session_state",
        }
    }
}

/// Operations the external service performs on behalf of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    GetShippingQuotes,
    CreateLabel,
}

impl ToolName {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "get_shipping_quotes" => Some(ToolName::GetShippingQuotes),
            "create_label" => Some(ToolName::CreateLabel),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ToolName::GetShippingQuotes => "get_shipping_quotes",
            ToolName::CreateLabel => "create_label",
        }
    }

    /// Substring older services embed in `tool_call_id` instead of naming the tool.
    pub fn call_id_marker(self) -> &'static str {
        match self {
            ToolName::GetShippingQuotes => "shipping_quotes",
            ToolName::CreateLabel => "create_label",
        }
    }
}

/// Loose inbound envelope. Everything beyond the common fields lands in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(
        rename = "requestId",
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub request_id: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<i64>,
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub session_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChannelMessage {
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(raw).map_err(DecodeError::InvalidJson)?;
        if !value.is_object() {
            return Err(DecodeError::NotAnObject);
        }
        serde_json::from_value(value).map_err(DecodeError::InvalidJson)
    }

    pub fn decode_bytes(raw: &[u8]) -> Result<Self, DecodeError> {
        let text = std::str::from_utf8(raw).map_err(|_| DecodeError::NotUtf8)?;
        Self::decode(text)
    }

    pub fn message_kind(&self) -> Option<MessageKind> {
        MessageKind::parse(&self.kind)
    }

    pub fn session(&self) -> Option<SessionId> {
        self.session_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .map(SessionId::from)
    }

    /// Contextual updates carry their body in `data`; direct messages in `payload`.
    pub fn body(&self) -> Option<&Value> {
        self.data.as_ref().or(self.payload.as_ref())
    }

    /// Looks a tool field up at the top level, then in `payload`, then in
    /// `payload.client_tool_call`.
    pub fn field(&self, name: &str) -> Option<&Value> {
        if let Some(value) = self.extra.get(name) {
            return Some(value);
        }
        let payload = self.payload.as_ref()?;
        payload
            .get(name)
            .or_else(|| payload.get("client_tool_call").and_then(|call| call.get(name)))
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(Value::as_str)
    }

    pub fn bool_field(&self, name: &str) -> bool {
        self.field(name).and_then(Value::as_bool).unwrap_or(false)
    }
}

/// Numbers are stringified; any other non-string reads as absent.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(text)) => Some(text),
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    })
}

fn lenient_millis<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|value| {
        value
            .as_i64()
            .or_else(|| value.as_f64().map(|millis| millis as i64))
    }))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: String,
    pub tool_call_id: String,
    #[serde(default)]
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallEnvelope {
    pub client_tool_call: ToolCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Ping {
        #[serde(rename = "requestId")]
        request_id: String,
        timestamp: i64,
    },
    ClientToolCall {
        payload: ToolCallEnvelope,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
}

impl OutboundMessage {
    pub fn ping(timestamp: i64) -> Self {
        OutboundMessage::Ping {
            request_id: uuid::Uuid::new_v4().to_string(),
            timestamp,
        }
    }

    pub fn tool_call(tool: ToolName, parameters: Value, session_id: Option<&SessionId>) -> Self {
        OutboundMessage::ClientToolCall {
            payload: ToolCallEnvelope {
                client_tool_call: ToolCall {
                    tool_name: tool.as_str().to_string(),
                    tool_call_id: format!("{}-{}", tool.call_id_marker(), uuid::Uuid::new_v4()),
                    parameters,
                },
            },
            session_id: session_id.map(|id| id.0.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub origin_zip: String,
    pub destination_zip: String,
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<String>,
    #[serde(default)]
    pub pickup_requested: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelRequest {
    pub carrier: String,
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_zip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_zip: Option<String>,
}
