use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::domain::{ShippingSnapshot, ShippingStep};

use crate::dispatcher::{classify_frame, Action};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepState {
    pub current_step: ShippingStep,
    pub completed_steps: BTreeSet<ShippingStep>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl Default for StepState {
    fn default() -> Self {
        Self {
            current_step: ShippingStep::ZipCollected,
            completed_steps: BTreeSet::new(),
            last_updated: None,
        }
    }
}

impl StepState {
    pub fn is_completed(&self, step: ShippingStep) -> bool {
        self.completed_steps.contains(&step)
    }

    /// Folds classified actions. Completion marks are only ever added.
    pub fn apply(&self, actions: &[Action], now: DateTime<Utc>) -> StepState {
        let mut next = self.clone();
        for action in actions {
            match action {
                Action::StepReached(step) => next.reach(*step, now),
                Action::SnapshotReceived(snapshot) => {
                    for step in steps_evidenced_by(snapshot) {
                        next.reach(step, now);
                    }
                }
                _ => {}
            }
        }
        next
    }

    pub fn apply_frame(&self, raw: &str, now: DateTime<Utc>) -> StepState {
        self.apply(&classify_frame(raw), now)
    }

    pub fn set_step(&self, step: ShippingStep, now: DateTime<Utc>) -> StepState {
        StepState {
            current_step: step,
            completed_steps: self.completed_steps.clone(),
            last_updated: Some(now),
        }
    }

    pub fn complete_step(&self, step: ShippingStep, now: DateTime<Utc>) -> StepState {
        if self.is_completed(step) {
            return self.clone();
        }
        let mut next = self.clone();
        next.completed_steps.insert(step);
        next.last_updated = Some(now);
        next
    }

    fn reach(&mut self, step: ShippingStep, now: DateTime<Utc>) {
        self.current_step = step;
        self.completed_steps.insert(step);
        self.last_updated = Some(now);
    }
}

fn steps_evidenced_by(snapshot: &ShippingSnapshot) -> Vec<ShippingStep> {
    let mut steps = Vec::new();
    if let Some(details) = &snapshot.details {
        let has_zip = |zip: &Option<String>| zip.as_deref().is_some_and(|zip| !zip.is_empty());
        if has_zip(&details.origin_zip) || has_zip(&details.destination_zip) {
            steps.push(ShippingStep::ZipCollected);
        }
        if details.weight.is_some_and(|weight| weight > 0.0) {
            steps.push(ShippingStep::WeightConfirmed);
        }
    }
    if snapshot
        .quotes
        .as_ref()
        .is_some_and(|quotes| !quotes.quotes.is_empty())
    {
        steps.push(ShippingStep::QuoteReady);
    }
    if snapshot.label.is_some() {
        steps.push(ShippingStep::LabelCreated);
    }
    steps
}

/// Owning wrapper stamping updates with the wall clock.
#[derive(Debug, Clone, Default)]
pub struct StepTracker {
    state: StepState,
}

impl StepTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &StepState {
        &self.state
    }

    /// Returns the steps newly completed by this batch.
    pub fn apply(&mut self, actions: &[Action]) -> Vec<ShippingStep> {
        let next = self.state.apply(actions, Utc::now());
        self.replace(next)
    }

    pub fn set_step(&mut self, step: ShippingStep) {
        self.state = self.state.set_step(step, Utc::now());
    }

    pub fn complete_step(&mut self, step: ShippingStep) -> Vec<ShippingStep> {
        let next = self.state.complete_step(step, Utc::now());
        self.replace(next)
    }

    fn replace(&mut self, next: StepState) -> Vec<ShippingStep> {
        let added = next
            .completed_steps
            .difference(&self.state.completed_steps)
            .copied()
            .collect();
        self.state = next;
        added
    }
}

#[cfg(test)]
#[path = "tests/step_tracker_tests.rs"]
mod tests;
