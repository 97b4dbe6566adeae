use serde_json::json;
use shared::domain::{
    LabelData, Quote, ShippingDetails, ShippingQuotes, ShippingSnapshot, WorkflowStage,
    DEFAULT_WEIGHT_UNIT,
};

use super::*;
use crate::fallback::demo_snapshot;

fn fold(state: &ShippingState, frame: serde_json::Value) -> ShippingState {
    apply_frame(state, &frame.to_string())
}

fn fold_all(frames: &[serde_json::Value]) -> ShippingState {
    frames
        .iter()
        .fold(ShippingState::default(), |state, frame| fold(&state, frame.clone()))
}

fn zip_update(data: serde_json::Value) -> serde_json::Value {
    json!({"type": "contextual_update", "text": "zip_collected", "data": data})
}

fn weight_update(data: serde_json::Value) -> serde_json::Value {
    json!({"type": "contextual_update", "text": "weight_confirmed", "data": data})
}

#[test]
fn zips_merge_without_clobbering_weight() {
    let state = fold_all(&[
        weight_update(json!({"weight_lbs": 4.0})),
        zip_update(json!({"from": "90210", "to": "10001"})),
    ]);
    let details = state.details.expect("details");
    assert_eq!(details.origin_zip, "90210");
    assert_eq!(details.destination_zip, "10001");
    assert_eq!(details.weight, 4.0);
    assert_eq!(details.unit, None);
    assert_eq!(details.unit_label(), DEFAULT_WEIGHT_UNIT);
}

#[test]
fn partial_zip_update_keeps_other_zip() {
    let state = fold_all(&[
        zip_update(json!({"from": "90210", "to": "10001"})),
        zip_update(json!({"to": "60601"})),
    ]);
    let details = state.details.expect("details");
    assert_eq!(details.origin_zip, "90210");
    assert_eq!(details.destination_zip, "60601");
}

#[test]
fn weight_keeps_zips_and_merges_unit_only_when_present() {
    let state = fold_all(&[
        zip_update(json!({"from": "1", "to": "2"})),
        weight_update(json!({"weight": 2.5, "unit": "kg"})),
        weight_update(json!({"weight": 3.0})),
    ]);
    let details = state.details.expect("details");
    assert_eq!(details.origin_zip, "1");
    assert_eq!(details.weight, 3.0);
    assert_eq!(details.unit.as_deref(), Some("kg"));
}

#[test]
fn quotes_replace_list_reset_selection_and_clear_loading() {
    let requested = fold(
        &ShippingState::default(),
        json!({"type": "client_tool_call", "tool_name": "get_shipping_quotes"}),
    );
    assert!(requested.loading_quotes);

    let mut with_selection = requested.clone();
    with_selection.quotes = Some(ShippingQuotes {
        quotes: vec![Quote::default(), Quote::default()],
        selected_index: 1,
    });

    let state = fold(
        &with_selection,
        json!({"type": "quote_ready", "payload": {"all_options": [
            {"carrier": "UPS", "service_name": "Ground", "cost": 10, "transit_days": 4}
        ]}}),
    );
    let quotes = state.quotes.as_ref().expect("quotes");
    assert_eq!(quotes.quotes.len(), 1);
    assert_eq!(quotes.selected_index, 0);
    assert_eq!(quotes.selected().map(|q| q.carrier.as_str()), Some("UPS"));
    assert!(!state.loading_quotes);
    assert_eq!(state.current_step, WorkflowStage::Quotes);
}

#[test]
fn empty_quote_list_is_still_a_list() {
    let state = fold(
        &ShippingState::default(),
        json!({"type": "contextual_update", "text": "quote_ready", "data": {"all_options": []}}),
    );
    assert_eq!(state.quotes, Some(ShippingQuotes::new(Vec::new())));
}

#[test]
fn contextual_label_keeps_loading_flag_but_tool_result_clears_it() {
    let requested = fold(
        &ShippingState::default(),
        json!({"type": "client_tool_call", "payload": {"tool_name": "create_label"}}),
    );
    assert!(requested.loading_label);

    let contextual = fold(
        &requested,
        json!({"type": "contextual_update", "text": "label_created", "data": {"tracking_number": "T1"}}),
    );
    assert!(contextual.loading_label);
    assert_eq!(
        contextual.label.as_ref().and_then(|l| l.tracking_number.as_deref()),
        Some("T1")
    );
    assert_eq!(contextual.current_step, WorkflowStage::Label);

    let resolved = fold(
        &contextual,
        json!({"type": "client_tool_result", "tool_name": "create_label",
               "result": {"tracking_number": "T2", "label_url": "https://l/2.pdf"}}),
    );
    assert!(!resolved.loading_label);
    assert_eq!(
        resolved.label,
        Some(LabelData {
            label_pdf_url: Some("https://l/2.pdf".into()),
            tracking_number: Some("T2".into()),
            qr_code_url: None,
        })
    );
}

#[test]
fn tool_failure_and_unknown_frames_leave_state_untouched() {
    let state = fold_all(&[
        zip_update(json!({"from": "1", "to": "2"})),
        json!({"type": "client_tool_call", "tool_name": "get_shipping_quotes"}),
    ]);
    let after = [
        json!({"type": "client_tool_result", "tool_name": "get_shipping_quotes",
               "is_error": true, "result": "timeout"}),
        json!({"type": "mystery"}),
        json!({"type": "ping"}),
        json!({"type": "notification", "text": "hi"}),
        json!({"type": "client_tool_result", "result": {"nothing": true}}),
    ]
    .iter()
    .fold(state.clone(), |current, frame| fold(&current, frame.clone()));
    assert_eq!(after, state);

    assert_eq!(apply_frame(&state, "<html>"), state);
}

#[test]
fn stage_marker_only_moves_forward() {
    let state = fold_all(&[
        json!({"type": "label_created", "payload": {"tracking_number": "T"}}),
        zip_update(json!({"from": "1"})),
    ]);
    assert_eq!(state.current_step, WorkflowStage::Label);
    assert_eq!(
        state.details.map(|d| d.origin_zip),
        Some("1".to_string())
    );
}

#[test]
fn snapshot_merges_present_records_only() {
    let base = fold_all(&[
        zip_update(json!({"from": "1", "to": "2"})),
        json!({"type": "client_tool_call", "tool_name": "get_shipping_quotes"}),
    ]);
    let snapshot = ShippingSnapshot {
        current_step: Some(2),
        quotes: Some(ShippingQuotes::new(vec![Quote {
            carrier: "DHL".into(),
            ..Default::default()
        }])),
        ..Default::default()
    };
    let state = reduce(base, &Action::SnapshotReceived(snapshot));

    assert_eq!(
        state.details,
        Some(ShippingDetails {
            origin_zip: "1".into(),
            destination_zip: "2".into(),
            ..Default::default()
        })
    );
    assert_eq!(state.quotes.as_ref().map(|q| q.quotes.len()), Some(1));
    assert!(!state.loading_quotes);
    assert_eq!(state.current_step, WorkflowStage::Confirm);
    assert!(state.label.is_none());
}

#[test]
fn partial_snapshot_details_merge_into_collected_details() {
    let state = fold_all(&[
        zip_update(json!({"from": "90210", "to": "10001"})),
        weight_update(json!({"weight_lbs": 5.2})),
        json!({"type": "session_state", "state": {"details": {"originZip": "11111"}}}),
    ]);
    assert_eq!(
        state.details,
        Some(ShippingDetails {
            origin_zip: "11111".into(),
            destination_zip: "10001".into(),
            weight: 5.2,
            unit: None,
        })
    );
}

#[test]
fn numeric_request_id_does_not_drop_the_update() {
    let state = fold_all(&[json!({
        "type": "contextual_update",
        "text": "zip_collected",
        "requestId": 7,
        "session_id": 12345,
        "data": {"from": "90210", "to": "10001"}
    })]);
    assert_eq!(
        state.details.map(|d| (d.origin_zip, d.destination_zip)),
        Some(("90210".to_string(), "10001".to_string()))
    );
}

#[test]
fn demo_snapshot_populates_every_record() {
    let state = reduce(
        ShippingState::default(),
        &Action::SnapshotReceived(demo_snapshot()),
    );
    assert!(state.details.is_some());
    assert_eq!(state.quotes.as_ref().map(|q| q.quotes.len()), Some(3));
    assert!(state.confirmation.is_some());
    assert!(state.payment.is_some());
    assert_eq!(
        state.label.as_ref().and_then(|l| l.tracking_number.as_deref()),
        Some("1Z999AA1234567890")
    );
    assert_eq!(state.current_step, WorkflowStage::Details);
}

#[test]
fn serializes_camel_case_for_renderers() {
    let state = fold_all(&[zip_update(json!({"from": "1", "to": "2"}))]);
    let value = serde_json::to_value(&state).expect("serialize");
    assert_eq!(value["details"]["originZip"], json!("1"));
    assert_eq!(value["loadingQuotes"], json!(false));
}
