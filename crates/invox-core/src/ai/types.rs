//! Model backend request/response types
//!
//! These types are backend-agnostic and used across all model implementations.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

/// Why the model stopped generating.
///
/// Mapped from Ollama `done_reason` / OpenAI-compatible `finish_reason`.
/// `Length` and `ContentFilter` drive the vision extractor's retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural stop; the output is complete.
    Stop,
    /// Output-length limit hit; the payload is likely truncated.
    Length,
    /// Response blocked or cut by content-safety filtering.
    ContentFilter,
}

impl FinishReason {
    pub fn from_wire(reason: Option<&str>) -> Self {
        match reason.map(|r| r.to_ascii_lowercase()).as_deref() {
            Some("length") | Some("max_tokens") => FinishReason::Length,
            Some("content_filter") | Some("safety") => FinishReason::ContentFilter,
            _ => FinishReason::Stop,
        }
    }
}

/// One completed generation from a model backend.
#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    pub finish: FinishReason,
}

impl Generation {
    pub fn stopped(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            finish: FinishReason::Stop,
        }
    }

    pub fn truncated(&self) -> bool {
        self.finish == FinishReason::Length
    }
}

/// Per-call generation parameters. Extraction uses low temperature and a
/// bounded output length; every call carries its own timeout.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 4096,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Accept numbers that arrive as JSON numbers, numeric strings, or null.
/// Model output is not reliable about which it uses.
pub(crate) fn flexible_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Text(String),
        Null,
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Num(n) => n,
        Raw::Text(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-' || *c == ',')
                .collect();
            cleaned.replace(',', ".").parse().unwrap_or(0.0)
        }
        Raw::Null => 0.0,
    })
}

pub(crate) fn flexible_f64_opt<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "flexible_f64")] f64);

    Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|w| w.0))
}

/// One line item as the model reports it, before validation/normalization.
/// Unknown fields are ignored; missing numerics default to 0.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawLineItem {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub quantity: f64,
    #[serde(default, deserialize_with = "flexible_f64", alias = "unitPrice")]
    pub unit_price: f64,
    #[serde(default, deserialize_with = "flexible_f64", alias = "discountPercent")]
    pub discount_percent: f64,
    #[serde(default, deserialize_with = "flexible_f64_opt", alias = "totalPrice")]
    pub total_price: Option<f64>,
}

/// The single JSON object a vision model returns for one invoice.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawVisionInvoice {
    #[serde(default)]
    pub supplier: Option<String>,
    #[serde(default, alias = "invoiceNumber")]
    pub invoice_number: Option<String>,
    #[serde(default, alias = "invoiceDate")]
    pub invoice_date: Option<String>,
    #[serde(default, deserialize_with = "flexible_f64_opt", alias = "totalAmount")]
    pub total_amount: Option<f64>,
    #[serde(default, deserialize_with = "flexible_f64_opt", alias = "totalExcludingTax")]
    pub total_excluding_tax: Option<f64>,
    #[serde(default, deserialize_with = "flexible_f64_opt", alias = "taxAmount")]
    pub tax_amount: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default, alias = "lineItems")]
    pub line_items: Vec<RawLineItem>,
}

/// The JSON object the algorithm-generation prompt asks for.
#[derive(Debug, Clone, Deserialize)]
pub struct RawGeneratedAlgorithm {
    #[serde(alias = "lineItemPattern")]
    pub line_item_pattern: String,
    #[serde(default)]
    pub groups: std::collections::HashMap<String, String>,
    #[serde(default, alias = "invoiceNumberPattern")]
    pub invoice_number_pattern: Option<String>,
    #[serde(default, alias = "datePattern")]
    pub date_pattern: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_reason_from_wire() {
        assert_eq!(FinishReason::from_wire(Some("stop")), FinishReason::Stop);
        assert_eq!(FinishReason::from_wire(Some("length")), FinishReason::Length);
        assert_eq!(FinishReason::from_wire(Some("MAX_TOKENS")), FinishReason::Length);
        assert_eq!(
            FinishReason::from_wire(Some("content_filter")),
            FinishReason::ContentFilter
        );
        assert_eq!(FinishReason::from_wire(None), FinishReason::Stop);
    }

    #[test]
    fn test_raw_line_item_accepts_string_numbers() {
        let json = r#"{"code": "A-1", "description": "Widget", "quantity": "4.00", "unitPrice": "R300.33", "discountPercent": 25.0, "totalPrice": "900,99"}"#;
        let item: RawLineItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.quantity, 4.0);
        assert_eq!(item.unit_price, 300.33);
        assert_eq!(item.total_price, Some(900.99));
    }

    #[test]
    fn test_raw_line_item_defaults() {
        let item: RawLineItem = serde_json::from_str(r#"{"description": "Thing"}"#).unwrap();
        assert_eq!(item.quantity, 0.0);
        assert_eq!(item.total_price, None);
        assert!(item.code.is_none());
    }

    #[test]
    fn test_raw_vision_invoice_aliases() {
        let json = r#"{"supplier": "Medis", "invoiceNumber": "INV-1", "totalAmount": 1036.14, "lineItems": [{"description": "Sleeve", "quantity": 4, "unitPrice": 300.33}]}"#;
        let invoice: RawVisionInvoice = serde_json::from_str(json).unwrap();
        assert_eq!(invoice.invoice_number.as_deref(), Some("INV-1"));
        assert_eq!(invoice.line_items.len(), 1);
        assert_eq!(invoice.total_amount, Some(1036.14));
    }
}
