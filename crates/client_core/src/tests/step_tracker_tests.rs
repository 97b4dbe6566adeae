use chrono::{TimeZone, Utc};
use serde_json::json;
use shared::domain::{ShippingSnapshot, ShippingStep};

use super::*;
use crate::dispatcher::Action;

fn at(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
}

fn update(text: &str) -> String {
    json!({"type": "contextual_update", "text": text, "data": {}}).to_string()
}

#[test]
fn starts_at_zip_with_nothing_completed() {
    let state = StepState::default();
    assert_eq!(state.current_step, ShippingStep::ZipCollected);
    assert!(state.completed_steps.is_empty());
    assert_eq!(state.last_updated, None);
}

#[test]
fn each_recognized_update_completes_its_step() {
    let mut state = StepState::default();
    for (index, step) in ShippingStep::ALL.into_iter().enumerate() {
        state = state.apply_frame(&update(step.tag()), at(index as i64));
        assert_eq!(state.current_step, step);
        assert!(state.is_completed(step));
        assert_eq!(state.last_updated, Some(at(index as i64)));
    }
    assert_eq!(state.completed_steps.len(), 4);
}

#[test]
fn completion_marks_are_never_removed() {
    let state = StepState::default()
        .apply_frame(&update("quote_ready"), at(0))
        .apply_frame(&update("zip_collected"), at(1));

    assert_eq!(state.current_step, ShippingStep::ZipCollected);
    assert!(state.is_completed(ShippingStep::QuoteReady));
    assert!(state.is_completed(ShippingStep::ZipCollected));

    let after_noise = state
        .apply_frame("not json", at(2))
        .apply_frame(&json!({"type": "ping"}).to_string(), at(3))
        .apply_frame(&update("teleport"), at(4));
    assert_eq!(after_noise, state);
}

#[test]
fn repeated_update_is_idempotent_apart_from_timestamp() {
    let once = StepState::default().apply_frame(&update("weight_confirmed"), at(0));
    let twice = once.apply_frame(&update("weight_confirmed"), at(5));
    assert_eq!(twice.completed_steps, once.completed_steps);
    assert_eq!(twice.current_step, once.current_step);
    assert_eq!(twice.last_updated, Some(at(5)));
}

#[test]
fn manual_overrides() {
    let state = StepState::default().set_step(ShippingStep::LabelCreated, at(1));
    assert_eq!(state.current_step, ShippingStep::LabelCreated);
    assert!(state.completed_steps.is_empty());
    assert_eq!(state.last_updated, Some(at(1)));

    let completed = state.complete_step(ShippingStep::WeightConfirmed, at(2));
    assert!(completed.is_completed(ShippingStep::WeightConfirmed));
    assert_eq!(completed.current_step, ShippingStep::LabelCreated);

    let again = completed.complete_step(ShippingStep::WeightConfirmed, at(3));
    assert_eq!(again, completed);
}

#[test]
fn snapshot_marks_evidenced_steps() {
    let snapshot = crate::fallback::demo_snapshot();
    let state = StepState::default().apply(&[Action::SnapshotReceived(snapshot)], at(0));
    assert_eq!(state.completed_steps.len(), 4);

    let partial = ShippingSnapshot {
        details: Some(shared::domain::DetailsPatch {
            origin_zip: Some("94105".into()),
            weight: Some(0.0),
            ..Default::default()
        }),
        ..Default::default()
    };
    let state = StepState::default().apply(&[Action::SnapshotReceived(partial)], at(0));
    assert_eq!(
        state.completed_steps.iter().copied().collect::<Vec<_>>(),
        vec![ShippingStep::ZipCollected]
    );
}

#[test]
fn tracker_reports_only_new_completions() {
    let mut tracker = StepTracker::new();
    assert_eq!(
        tracker.apply(&[Action::StepReached(ShippingStep::ZipCollected)]),
        vec![ShippingStep::ZipCollected]
    );
    assert!(tracker
        .apply(&[Action::StepReached(ShippingStep::ZipCollected)])
        .is_empty());
    assert_eq!(
        tracker.complete_step(ShippingStep::LabelCreated),
        vec![ShippingStep::LabelCreated]
    );
    assert!(tracker.complete_step(ShippingStep::LabelCreated).is_empty());
    assert!(tracker.state().last_updated.is_some());
}

#[test]
fn serializes_camel_case() {
    let state = StepState::default().apply_frame(&update("zip_collected"), at(0));
    let value = serde_json::to_value(&state).expect("serialize");
    assert_eq!(value["currentStep"], json!("zip_collected"));
    assert_eq!(value["completedSteps"], json!(["zip_collected"]));
    assert!(value["lastUpdated"].is_string());
}
