use serde::Serialize;
use shared::domain::{
    LabelData, PaymentData, ShippingConfirmation, ShippingDetails, ShippingQuotes,
    ShippingSnapshot, WorkflowStage,
};
use tracing::{debug, warn};

use crate::dispatcher::{classify_frame, Action};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingState {
    /// Advisory and forward-only; record presence decides what to render.
    pub current_step: WorkflowStage,
    pub details: Option<ShippingDetails>,
    pub quotes: Option<ShippingQuotes>,
    pub confirmation: Option<ShippingConfirmation>,
    pub payment: Option<PaymentData>,
    pub label: Option<LabelData>,
    pub loading_quotes: bool,
    pub loading_label: bool,
}

impl ShippingState {
    fn advance_to(&mut self, stage: WorkflowStage) {
        if stage > self.current_step {
            self.current_step = stage;
        }
    }

    fn details_mut(&mut self) -> &mut ShippingDetails {
        self.details.get_or_insert_with(ShippingDetails::default)
    }
}

/// Applies every action in order. Never fails; unknown input leaves state as is.
pub fn apply(state: &ShippingState, actions: &[Action]) -> ShippingState {
    actions
        .iter()
        .fold(state.clone(), |current, action| reduce(current, action))
}

pub fn apply_frame(state: &ShippingState, raw: &str) -> ShippingState {
    apply(state, &classify_frame(raw))
}

pub fn reduce(mut state: ShippingState, action: &Action) -> ShippingState {
    match action {
        Action::ZipsCollected {
            origin_zip,
            destination_zip,
        } => {
            let details = state.details_mut();
            if let Some(origin_zip) = origin_zip {
                details.origin_zip = origin_zip.clone();
            }
            if let Some(destination_zip) = destination_zip {
                details.destination_zip = destination_zip.clone();
            }
            state.advance_to(WorkflowStage::Details);
        }
        Action::WeightConfirmed { weight, unit } => {
            let details = state.details_mut();
            if let Some(weight) = weight {
                details.weight = *weight;
            }
            if let Some(unit) = unit {
                details.unit = Some(unit.clone());
            }
        }
        Action::QuotesReceived(quotes) => {
            state.quotes = Some(ShippingQuotes::new(quotes.clone()));
            state.loading_quotes = false;
            state.advance_to(WorkflowStage::Quotes);
        }
        Action::LabelReceived {
            label,
            from_tool_result,
        } => {
            state.label = Some(label.clone());
            if *from_tool_result {
                state.loading_label = false;
            }
            state.advance_to(WorkflowStage::Label);
        }
        Action::QuotesRequested => state.loading_quotes = true,
        Action::LabelRequested => state.loading_label = true,
        Action::ToolFailed {
            tool_name,
            tool_call_id,
            error,
        } => {
            warn!(
                tool_name = tool_name.as_deref().unwrap_or("unknown"),
                tool_call_id = tool_call_id.as_deref().unwrap_or("unknown"),
                error = %error,
                "shipping: client tool reported an error"
            );
        }
        Action::SnapshotReceived(snapshot) => merge_snapshot(&mut state, snapshot),
        Action::StepReached(_)
        | Action::Notification(_)
        | Action::ServiceError(_)
        | Action::Heartbeat => {}
        Action::Ignored { reason } => {
            debug!(reason = %reason, "shipping: state unchanged");
        }
    }
    state
}

/// Records present in the snapshot replace ours; absent ones are kept.
fn merge_snapshot(state: &mut ShippingState, snapshot: &ShippingSnapshot) {
    if let Some(details) = &snapshot.details {
        state.details_mut().merge(details);
    }
    if let Some(quotes) = &snapshot.quotes {
        state.quotes = Some(quotes.clone());
        state.loading_quotes = false;
    }
    if let Some(confirmation) = &snapshot.confirmation {
        state.confirmation = Some(confirmation.clone());
    }
    if let Some(payment) = &snapshot.payment {
        state.payment = Some(payment.clone());
    }
    if let Some(label) = &snapshot.label {
        state.label = Some(label.clone());
        state.loading_label = false;
    }
    if let Some(stage) = snapshot.current_step.and_then(WorkflowStage::from_index) {
        state.advance_to(stage);
    }
}

#[cfg(test)]
#[path = "tests/shipping_reducer_tests.rs"]
mod tests;
