use serde_json::json;

use crate::{
    domain::{
        format_cost, DetailsPatch, LabelData, Quote, SessionId, ShippingDetails, ShippingQuotes,
        ShippingSnapshot, ShippingStep, WorkflowStage,
    },
    error::DecodeError,
    protocol::{ChannelMessage, MessageKind, OutboundMessage, ToolName},
};

#[test]
fn decodes_contextual_update_envelope() {
    let raw = r#"{"type":"contextual_update","text":"zip_collected","data":{"from":"90210","to":"10001"},"timestamp":1712345678901,"requestId":"r-1","session_id":"s-1"}"#;
    let message = ChannelMessage::decode(raw).expect("decode");

    assert_eq!(message.message_kind(), Some(MessageKind::ContextualUpdate));
    assert_eq!(message.text.as_deref(), Some("zip_collected"));
    assert_eq!(message.timestamp, Some(1_712_345_678_901));
    assert_eq!(message.request_id.as_deref(), Some("r-1"));
    assert_eq!(message.session(), Some(SessionId::from("s-1")));
    assert_eq!(
        message.body().and_then(|body| body.get("from")),
        Some(&json!("90210"))
    );
}

#[test]
fn tolerates_fractional_timestamp_and_missing_type() {
    let message = ChannelMessage::decode(r#"{"timestamp":12.7}"#).expect("decode");
    assert_eq!(message.timestamp, Some(12));
    assert_eq!(message.message_kind(), None);
}

#[test]
fn rejects_non_json_and_non_object_frames() {
    assert!(matches!(
        ChannelMessage::decode("not json at all"),
        Err(DecodeError::InvalidJson(_))
    ));
    assert!(matches!(
        ChannelMessage::decode("[1,2,3]"),
        Err(DecodeError::NotAnObject)
    ));
    assert!(matches!(
        ChannelMessage::decode_bytes(&[0xff, 0xfe]),
        Err(DecodeError::NotUtf8)
    ));
}

#[test]
fn empty_session_id_is_not_a_session() {
    let message = ChannelMessage::decode(r#"{"type":"ping","session_id":""}"#).expect("decode");
    assert_eq!(message.session(), None);
}

#[test]
fn tool_fields_resolve_top_level_then_payload_then_nested_call() {
    let top = ChannelMessage::decode(
        r#"{"type":"client_tool_result","tool_name":"create_label","payload":{"tool_name":"get_shipping_quotes"}}"#,
    )
    .expect("decode");
    assert_eq!(top.str_field("tool_name"), Some("create_label"));

    let in_payload = ChannelMessage::decode(
        r#"{"type":"client_tool_call","payload":{"tool_name":"get_shipping_quotes"}}"#,
    )
    .expect("decode");
    assert_eq!(in_payload.str_field("tool_name"), Some("get_shipping_quotes"));

    let nested = ChannelMessage::decode(
        r#"{"type":"client_tool_call","payload":{"client_tool_call":{"tool_name":"create_label","tool_call_id":"c-9"}}}"#,
    )
    .expect("decode");
    assert_eq!(nested.str_field("tool_name"), Some("create_label"));
    assert_eq!(nested.str_field("tool_call_id"), Some("c-9"));
    assert!(!nested.bool_field("is_error"));
}

#[test]
fn ping_serializes_with_request_id_and_timestamp() {
    let ping = OutboundMessage::ping(42);
    let value = serde_json::to_value(&ping).expect("serialize");
    assert_eq!(value["type"], "ping");
    assert_eq!(value["timestamp"], 42);
    assert!(value["requestId"].as_str().is_some_and(|id| !id.is_empty()));
}

#[test]
fn tool_call_nests_under_payload_and_carries_session() {
    let session = SessionId::from("abc");
    let call = OutboundMessage::tool_call(
        ToolName::GetShippingQuotes,
        json!({"origin_zip":"90210"}),
        Some(&session),
    );
    let value = serde_json::to_value(&call).expect("serialize");

    assert_eq!(value["type"], "client_tool_call");
    assert_eq!(value["session_id"], "abc");
    let inner = &value["payload"]["client_tool_call"];
    assert_eq!(inner["tool_name"], "get_shipping_quotes");
    assert_eq!(inner["parameters"]["origin_zip"], "90210");
    assert!(inner["tool_call_id"]
        .as_str()
        .is_some_and(|id| id.starts_with("shipping_quotes-")));
}

#[test]
fn tool_call_without_session_omits_field() {
    let call = OutboundMessage::tool_call(ToolName::CreateLabel, json!({}), None);
    let value = serde_json::to_value(&call).expect("serialize");
    assert!(value.get("session_id").is_none());
}

#[test]
fn selected_index_out_of_range_reads_as_first() {
    let mut quotes = ShippingQuotes::new(vec![
        Quote {
            carrier: "UPS".into(),
            ..Quote::default()
        },
        Quote {
            carrier: "USPS".into(),
            ..Quote::default()
        },
    ]);
    quotes.selected_index = 1;
    assert_eq!(quotes.selected().map(|q| q.carrier.as_str()), Some("USPS"));

    quotes.selected_index = 7;
    assert_eq!(quotes.selected_index(), 0);
    assert_eq!(quotes.selected().map(|q| q.carrier.as_str()), Some("UPS"));

    assert_eq!(ShippingQuotes::default().selected(), None);
}

#[test]
fn costs_render_with_two_fraction_digits() {
    assert_eq!(format_cost(12.99), "12.99");
    assert_eq!(format_cost(7.5), "7.50");
    assert_eq!(format_cost(-3.0), "0.00");
    assert_eq!(format_cost(f64::NAN), "0.00");
}

#[test]
fn label_missing_fields_fall_back_to_placeholder() {
    let label = LabelData {
        tracking_number: Some("1Z999".into()),
        ..LabelData::default()
    };
    assert!(!label.is_ready());
    assert_eq!(label.tracking_number_or_placeholder(), "1Z999");
    assert_eq!(label.label_pdf_url_or_placeholder(), "pending");
    assert_eq!(label.qr_code_url_or_placeholder(), "pending");
}

#[test]
fn step_tags_round_trip() {
    for step in ShippingStep::ALL {
        assert_eq!(ShippingStep::from_tag(step.tag()), Some(step));
    }
    assert_eq!(ShippingStep::from_tag("payment_done"), None);
}

#[test]
fn steps_and_stages_order_by_workflow_position() {
    let mut sorted = ShippingStep::ALL;
    sorted.sort();
    assert_eq!(sorted, ShippingStep::ALL);

    let stages: Vec<_> = (0..5).filter_map(WorkflowStage::from_index).collect();
    assert_eq!(stages.len(), 5);
    assert!(stages.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(stages.first(), Some(&WorkflowStage::Details));
    assert_eq!(stages.last(), Some(&WorkflowStage::Label));
    assert_eq!(WorkflowStage::from_index(5), None);
}

#[test]
fn partial_snapshot_details_only_set_sent_fields() {
    let snapshot: ShippingSnapshot =
        serde_json::from_value(json!({"details": {"originZip": "11111"}})).expect("snapshot");
    assert_eq!(
        snapshot.details,
        Some(DetailsPatch {
            origin_zip: Some("11111".into()),
            ..Default::default()
        })
    );

    let mut details = ShippingDetails {
        origin_zip: "90210".into(),
        destination_zip: "10001".into(),
        weight: 5.2,
        unit: None,
    };
    details.merge(snapshot.details.as_ref().expect("details"));
    assert_eq!(details.origin_zip, "11111");
    assert_eq!(details.destination_zip, "10001");
    assert_eq!(details.weight, 5.2);
}

#[test]
fn non_string_envelope_fields_do_not_reject_the_frame() {
    let message = ChannelMessage::decode(
        &json!({
            "type": "contextual_update",
            "text": "zip_collected",
            "requestId": 7,
            "session_id": 12345,
            "data": {"from": "90210", "to": "10001"}
        })
        .to_string(),
    )
    .expect("decode");
    assert_eq!(message.request_id.as_deref(), Some("7"));
    assert_eq!(message.session(), Some(SessionId::from("12345")));
    assert_eq!(message.text.as_deref(), Some("zip_collected"));

    let odd = ChannelMessage::decode(
        r#"{"type":"ping","text":{"nested":true},"requestId":null,"session_id":false}"#,
    )
    .expect("decode");
    assert_eq!(odd.message_kind(), Some(MessageKind::Ping));
    assert_eq!(odd.text, None);
    assert_eq!(odd.request_id, None);
    assert_eq!(odd.session(), None);
}
