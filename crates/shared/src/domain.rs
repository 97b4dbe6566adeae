use std::fmt;

use serde::{Deserialize, Serialize};

/// Shown in place of any label field the service has not provided yet.
pub const LABEL_PLACEHOLDER: &str = "pending";
pub const DEFAULT_WEIGHT_UNIT: &str = "lbs";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Four-stage funnel tracked by the stepper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShippingStep {
    ZipCollected,
    WeightConfirmed,
    QuoteReady,
    LabelCreated,
}

impl ShippingStep {
    pub const ALL: [ShippingStep; 4] = [
        ShippingStep::ZipCollected,
        ShippingStep::WeightConfirmed,
        ShippingStep::QuoteReady,
        ShippingStep::LabelCreated,
    ];

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "zip_collected" => Some(ShippingStep::ZipCollected),
            "weight_confirmed" => Some(ShippingStep::WeightConfirmed),
            "quote_ready" => Some(ShippingStep::QuoteReady),
            "label_created" => Some(ShippingStep::LabelCreated),
            _ => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            ShippingStep::ZipCollected => "zip_collected",
            ShippingStep::WeightConfirmed => "weight_confirmed",
            ShippingStep::QuoteReady => "quote_ready",
            ShippingStep::LabelCreated => "label_created",
        }
    }
}

/// Five display stages of the full workflow feed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStage {
    #[default]
    Details,
    Quotes,
    Confirm,
    Payment,
    Label,
}

impl WorkflowStage {
    pub fn from_index(index: u64) -> Option<Self> {
        match index {
            0 => Some(WorkflowStage::Details),
            1 => Some(WorkflowStage::Quotes),
            2 => Some(WorkflowStage::Confirm),
            3 => Some(WorkflowStage::Payment),
            4 => Some(WorkflowStage::Label),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingDetails {
    #[serde(default)]
    pub origin_zip: String,
    #[serde(default)]
    pub destination_zip: String,
    #[serde(default)]
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl ShippingDetails {
    pub fn unit_label(&self) -> &str {
        self.unit.as_deref().unwrap_or(DEFAULT_WEIGHT_UNIT)
    }

    /// Overwrites only the fields the patch carries.
    pub fn merge(&mut self, patch: &DetailsPatch) {
        if let Some(origin_zip) = &patch.origin_zip {
            self.origin_zip = origin_zip.clone();
        }
        if let Some(destination_zip) = &patch.destination_zip {
            self.destination_zip = destination_zip.clone();
        }
        if let Some(weight) = patch.weight {
            self.weight = weight;
        }
        if let Some(unit) = &patch.unit {
            self.unit = Some(unit.clone());
        }
    }
}

/// Details as a snapshot sends them: any subset of fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_zip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_zip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    #[serde(default)]
    pub carrier: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub estimated_delivery: String,
}

/// Clamps a wire amount to a non-negative value rounded to cents.
pub fn normalize_cost(raw: f64) -> f64 {
    if !raw.is_finite() || raw <= 0.0 {
        return 0.0;
    }
    (raw * 100.0).round() / 100.0
}

pub fn format_cost(cost: f64) -> String {
    format!("{:.2}", normalize_cost(cost))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingQuotes {
    #[serde(default)]
    pub quotes: Vec<Quote>,
    #[serde(default)]
    pub selected_index: usize,
}

impl ShippingQuotes {
    pub fn new(quotes: Vec<Quote>) -> Self {
        Self {
            quotes,
            selected_index: 0,
        }
    }

    /// Out-of-range pointers read as the first option.
    pub fn selected_index(&self) -> usize {
        if self.selected_index < self.quotes.len() {
            self.selected_index
        } else {
            0
        }
    }

    pub fn selected(&self) -> Option<&Quote> {
        self.quotes.get(self.selected_index())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingConfirmation {
    #[serde(default)]
    pub from_address: String,
    #[serde(default)]
    pub to_address: String,
    #[serde(default)]
    pub package_details: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentData {
    #[serde(default)]
    pub card_number: String,
    #[serde(default)]
    pub expiry_date: String,
    #[serde(default)]
    pub cardholder_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_pdf_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_code_url: Option<String>,
}

impl LabelData {
    pub fn is_ready(&self) -> bool {
        [&self.label_pdf_url, &self.tracking_number, &self.qr_code_url]
            .iter()
            .all(|field| field.as_deref().is_some_and(|value| !value.is_empty()))
    }

    pub fn label_pdf_url_or_placeholder(&self) -> &str {
        or_placeholder(&self.label_pdf_url)
    }

    pub fn tracking_number_or_placeholder(&self) -> &str {
        or_placeholder(&self.tracking_number)
    }

    pub fn qr_code_url_or_placeholder(&self) -> &str {
        or_placeholder(&self.qr_code_url)
    }
}

fn or_placeholder(field: &Option<String>) -> &str {
    match field.as_deref() {
        Some(value) if !value.is_empty() => value,
        _ => LABEL_PLACEHOLDER,
    }
}

/// Whole or partial workflow state pushed by the service (or synthesized offline).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<DetailsPatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quotes: Option<ShippingQuotes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation: Option<ShippingConfirmation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment: Option<PaymentData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<LabelData>,
}
