use std::fmt;

use serde_json::json;
use shared::domain::{
    DetailsPatch, LabelData, PaymentData, Quote, SessionId, ShippingConfirmation, ShippingQuotes,
    ShippingSnapshot,
};

/// Address shipped in sample configs; never a real endpoint.
pub const PLACEHOLDER_URL: &str = "wss://your-websocket-endpoint.com";

const PREVIEW_HOST_PATTERNS: &[&str] = &["vercel.app", "codesandbox.io", "localhost", "127.0.0.1"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    EmptyUrl,
    PlaceholderUrl,
    SimulatedScheme(String),
    PreviewHost(String),
    InvalidUrl(String),
    ConnectTimeout,
    ReconnectExhausted { attempts: u32 },
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::EmptyUrl => f.write_str("no channel address configured"),
            FallbackReason::PlaceholderUrl => f.write_str("channel address is a placeholder"),
            FallbackReason::SimulatedScheme(scheme) => {
                write!(f, "scheme '{scheme}' selects the simulated channel")
            }
            FallbackReason::PreviewHost(host) => write!(f, "preview environment host '{host}'"),
            FallbackReason::InvalidUrl(err) => write!(f, "invalid channel address: {err}"),
            FallbackReason::ConnectTimeout => f.write_str("connection attempt timed out"),
            FallbackReason::ReconnectExhausted { attempts } => {
                write!(f, "gave up after {attempts} reconnect attempts")
            }
        }
    }
}

pub fn is_preview_host(host: &str) -> bool {
    let host = host.trim();
    host.is_empty() || PREVIEW_HOST_PATTERNS.iter().any(|pattern| host.contains(pattern))
}

/// Decides, before any connection attempt, whether to go straight to fallback.
pub fn proactive_fallback_reason(url: &str, runtime_host: Option<&str>) -> Option<FallbackReason> {
    let url = url.trim();
    if url.is_empty() {
        return Some(FallbackReason::EmptyUrl);
    }
    if url.trim_end_matches('/') == PLACEHOLDER_URL {
        return Some(FallbackReason::PlaceholderUrl);
    }
    if let Some(host) = runtime_host {
        if is_preview_host(host) {
            return Some(FallbackReason::PreviewHost(host.to_string()));
        }
    }
    match url::Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "ws" | "wss") => None,
        Ok(parsed) => Some(FallbackReason::SimulatedScheme(parsed.scheme().to_string())),
        Err(err) => Some(FallbackReason::InvalidUrl(err.to_string())),
    }
}

pub fn demo_snapshot() -> ShippingSnapshot {
    ShippingSnapshot {
        current_step: Some(0),
        details: Some(DetailsPatch {
            origin_zip: Some("94105".into()),
            destination_zip: Some("10001".into()),
            weight: Some(5.2),
            unit: Some("lbs".into()),
        }),
        quotes: Some(ShippingQuotes::new(vec![
            Quote {
                carrier: "FedEx".into(),
                service: "Ground".into(),
                cost: 12.99,
                estimated_delivery: "3 days".into(),
            },
            Quote {
                carrier: "UPS".into(),
                service: "Ground".into(),
                cost: 14.99,
                estimated_delivery: "3 days".into(),
            },
            Quote {
                carrier: "USPS".into(),
                service: "Priority Mail".into(),
                cost: 9.99,
                estimated_delivery: "2 days".into(),
            },
        ])),
        confirmation: Some(ShippingConfirmation {
            from_address: "123 Market St, San Francisco, CA 94105".into(),
            to_address: "350 5th Ave, New York, NY 10001".into(),
            package_details: "12x10x8 in, 5.2 lbs".into(),
        }),
        payment: Some(PaymentData {
            card_number: "**** **** **** 4242".into(),
            expiry_date: "12/28".into(),
            cardholder_name: "Demo Customer".into(),
        }),
        label: Some(LabelData {
            label_pdf_url: Some("/placeholder.svg?height=400&width=300".into()),
            tracking_number: Some("1Z999AA1234567890".into()),
            qr_code_url: Some("/placeholder.svg?height=200&width=200".into()),
        }),
    }
}

/// The single synthetic frame emitted on entering fallback. Deterministic.
pub fn snapshot_frame(session_id: Option<&SessionId>) -> String {
    let mut frame = json!({
        "type": "session_state",
        "state": demo_snapshot(),
    });
    if let Some(session_id) = session_id {
        frame["session_id"] = json!(session_id.as_str());
    }
    frame.to_string()
}
