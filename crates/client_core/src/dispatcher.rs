use serde_json::Value;
use shared::{
    domain::{normalize_cost, LabelData, Quote, ShippingSnapshot, ShippingStep},
    error::ServiceError,
    protocol::{ChannelMessage, MessageKind, ToolName},
};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// A funnel stage was reported as reached.
    StepReached(ShippingStep),
    ZipsCollected {
        origin_zip: Option<String>,
        destination_zip: Option<String>,
    },
    WeightConfirmed {
        weight: Option<f64>,
        unit: Option<String>,
    },
    QuotesReceived(Vec<Quote>),
    LabelReceived {
        label: LabelData,
        from_tool_result: bool,
    },
    QuotesRequested,
    LabelRequested,
    ToolFailed {
        tool_name: Option<String>,
        tool_call_id: Option<String>,
        error: String,
    },
    SnapshotReceived(ShippingSnapshot),
    Notification(String),
    ServiceError(ServiceError),
    Heartbeat,
    Ignored {
        reason: String,
    },
}

impl Action {
    fn ignored(reason: impl Into<String>) -> Self {
        Action::Ignored {
            reason: reason.into(),
        }
    }
}

/// Classifies a raw text frame. Undecodable input yields a single `Ignored`.
pub fn classify_frame(raw: &str) -> Vec<Action> {
    match ChannelMessage::decode(raw) {
        Ok(message) => classify(&message),
        Err(err) => {
            warn!(error = %err, "dispatch: dropping undecodable frame");
            vec![Action::ignored(format!("undecodable frame: {err}"))]
        }
    }
}

pub fn classify(message: &ChannelMessage) -> Vec<Action> {
    let actions = match message.message_kind() {
        Some(MessageKind::ContextualUpdate) => classify_contextual_update(message),
        Some(MessageKind::QuoteReady) => quote_ready_actions(message.body()),
        Some(MessageKind::LabelCreated) => label_created_actions(message.body()),
        Some(MessageKind::ClientToolCall) => classify_tool_call(message),
        Some(MessageKind::ClientToolResult) => vec![classify_tool_result(message)],
        Some(MessageKind::Ping) => vec![Action::Heartbeat],
        Some(MessageKind::Notification) => vec![Action::Notification(notification_text(message))],
        Some(MessageKind::Error) => vec![Action::ServiceError(service_error(message))],
        Some(MessageKind::SessionState) => vec![classify_snapshot(message)],
        None => vec![Action::ignored(format!(
            "unrecognized message type '{}'",
            message.kind
        ))],
    };

    for action in &actions {
        if let Action::Ignored { reason } = action {
            debug!(kind = %message.kind, reason = %reason, "dispatch: message ignored");
        }
    }
    actions
}

fn classify_contextual_update(message: &ChannelMessage) -> Vec<Action> {
    let text = message.text.as_deref().unwrap_or_default();
    let Some(step) = ShippingStep::from_tag(text) else {
        return vec![Action::ignored(format!(
            "unrecognized contextual update '{text}'"
        ))];
    };
    let data = message.data.as_ref().or(message.payload.as_ref());

    match step {
        ShippingStep::ZipCollected => vec![
            Action::StepReached(step),
            Action::ZipsCollected {
                origin_zip: first_string(data, &["from", "origin_zip"]),
                destination_zip: first_string(data, &["to", "destination_zip"]),
            },
        ],
        ShippingStep::WeightConfirmed => vec![
            Action::StepReached(step),
            Action::WeightConfirmed {
                weight: first_number(data, &["weight_lbs", "weight"]),
                unit: first_string(data, &["unit"]),
            },
        ],
        ShippingStep::QuoteReady => quote_ready_actions(data),
        ShippingStep::LabelCreated => label_created_actions(data),
    }
}

fn quote_ready_actions(body: Option<&Value>) -> Vec<Action> {
    let mut actions = vec![Action::StepReached(ShippingStep::QuoteReady)];
    match body.and_then(|body| body.get("all_options")).and_then(Value::as_array) {
        Some(options) => actions.push(Action::QuotesReceived(
            options.iter().map(quote_from_option).collect(),
        )),
        None => debug!("dispatch: quote_ready without an options list"),
    }
    actions
}

fn label_created_actions(body: Option<&Value>) -> Vec<Action> {
    vec![
        Action::StepReached(ShippingStep::LabelCreated),
        Action::LabelReceived {
            label: label_from_value(body),
            from_tool_result: false,
        },
    ]
}

fn classify_tool_call(message: &ChannelMessage) -> Vec<Action> {
    match message.str_field("tool_name").and_then(ToolName::parse) {
        Some(ToolName::GetShippingQuotes) => vec![Action::QuotesRequested],
        Some(ToolName::CreateLabel) => vec![Action::LabelRequested],
        None => vec![Action::ignored("tool call for an unknown tool")],
    }
}

fn classify_tool_result(message: &ChannelMessage) -> Action {
    let tool_name = message.str_field("tool_name");
    let tool_call_id = message.str_field("tool_call_id");
    let result = message.field("result");

    if message.bool_field("is_error") {
        let error = result
            .and_then(|result| result.get("error"))
            .and_then(Value::as_str)
            .or_else(|| result.and_then(Value::as_str))
            .unwrap_or("unknown error")
            .to_string();
        return Action::ToolFailed {
            tool_name: tool_name.map(str::to_string),
            tool_call_id: tool_call_id.map(str::to_string),
            error,
        };
    }

    let declared = tool_name.and_then(ToolName::parse);
    let call_id_names = |tool: ToolName| {
        tool_call_id.is_some_and(|id| id.contains(tool.call_id_marker()))
    };

    if declared == Some(ToolName::GetShippingQuotes) {
        return match result.and_then(Value::as_array) {
            Some(entries) => Action::QuotesReceived(entries.iter().map(quote_from_result).collect()),
            None => Action::ignored("quotes result is not a list"),
        };
    }
    if declared.is_none() && (call_id_names(ToolName::GetShippingQuotes) || looks_like_quotes(result))
    {
        if let Some(entries) = result.and_then(Value::as_array) {
            return Action::QuotesReceived(entries.iter().map(quote_from_result).collect());
        }
    }

    if declared == Some(ToolName::CreateLabel)
        || (declared.is_none() && (call_id_names(ToolName::CreateLabel) || looks_like_label(result)))
    {
        return Action::LabelReceived {
            label: label_from_result(result),
            from_tool_result: true,
        };
    }

    Action::ignored("could not identify tool result")
}

fn classify_snapshot(message: &ChannelMessage) -> Action {
    let Some(state) = message.field("state").or(message.body()) else {
        return Action::ignored("session_state without state");
    };
    match serde_json::from_value::<ShippingSnapshot>(state.clone()) {
        Ok(snapshot) => Action::SnapshotReceived(snapshot),
        Err(err) => Action::ignored(format!("invalid session_state: {err}")),
    }
}

fn notification_text(message: &ChannelMessage) -> String {
    message
        .text
        .clone()
        .or_else(|| message.str_field("message").map(str::to_string))
        .or_else(|| {
            message
                .body()
                .and_then(|body| body.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .or_else(|| message.body().map(Value::to_string))
        .unwrap_or_default()
}

fn service_error(message: &ChannelMessage) -> ServiceError {
    let text = message
        .str_field("message")
        .or(message.text.as_deref())
        .or_else(|| {
            message
                .body()
                .and_then(|body| body.get("message"))
                .and_then(Value::as_str)
        })
        .unwrap_or("unspecified service error");
    let mut error = ServiceError::new(text);
    let code = message
        .field("code")
        .or_else(|| message.body().and_then(|body| body.get("code")));
    match code {
        Some(Value::String(code)) => error = error.with_code(code.clone()),
        Some(Value::Number(code)) => error = error.with_code(code.to_string()),
        _ => {}
    }
    error
}

/// Heuristic for results that carry no tool name: a non-empty list of priced carriers.
fn looks_like_quotes(result: Option<&Value>) -> bool {
    result
        .and_then(Value::as_array)
        .and_then(|entries| entries.first())
        .is_some_and(|first| first.get("carrier").is_some() && first.get("price").is_some())
}

fn looks_like_label(result: Option<&Value>) -> bool {
    result.is_some_and(|result| {
        result.get("tracking_number").is_some() && result.get("label_url").is_some()
    })
}

fn quote_from_option(option: &Value) -> Quote {
    let estimated_delivery = match option.get("transit_days") {
        Some(Value::Number(days)) => format!("{days} days"),
        Some(Value::String(days)) if !days.is_empty() => format!("{days} days"),
        _ => "unknown".to_string(),
    };
    Quote {
        carrier: string_at(option, "carrier"),
        service: string_at(option, "service_name"),
        cost: normalize_cost(number_at(option, "cost").unwrap_or_default()),
        estimated_delivery,
    }
}

fn quote_from_result(entry: &Value) -> Quote {
    Quote {
        carrier: string_at(entry, "carrier"),
        service: string_at(entry, "service"),
        cost: normalize_cost(number_at(entry, "price").unwrap_or_default()),
        estimated_delivery: string_at(entry, "eta"),
    }
}

fn label_from_value(body: Option<&Value>) -> LabelData {
    LabelData {
        label_pdf_url: first_string(body, &["label_url"]),
        tracking_number: first_string(body, &["tracking_number"]),
        qr_code_url: first_string(body, &["qr_code"]),
    }
}

fn label_from_result(result: Option<&Value>) -> LabelData {
    label_from_value(result)
}

fn string_at(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn number_at(value: &Value, key: &str) -> Option<f64> {
    match value.get(key)? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn first_string(body: Option<&Value>, keys: &[&str]) -> Option<String> {
    let body = body?;
    keys.iter().find_map(|key| match body.get(*key)? {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    })
}

fn first_number(body: Option<&Value>, keys: &[&str]) -> Option<f64> {
    let body = body?;
    keys.iter().find_map(|key| number_at(body, key))
}

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod tests;
