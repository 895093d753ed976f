//! Response parsing for model outputs
//!
//! Models wrap JSON in markdown fences, preface it with prose, or truncate
//! it mid-payload. Every parser here runs the same ladder: strip fences,
//! cut out the balanced JSON span, strict-parse, then fall back to
//! truncation repair and finally object salvage.

use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};

use super::repair::{repair_truncated, salvage_objects};
use super::types::{RawGeneratedAlgorithm, RawLineItem, RawVisionInvoice};

/// Strip markdown code fences from a response
pub fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };
    let after_fence = &trimmed[start + 3..];
    // Skip the language tag on the fence line.
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    match body.find("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

/// Extract the first balanced `open...close` span, string-aware
fn balanced_span(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape = false;

    for (i, c) in text[start..].char_indices() {
        if in_string {
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        if c == '"' {
            in_string = true;
        } else if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                return Some(&text[start..start + i + 1]);
            }
        }
    }

    None
}

/// Parse a line-item array from a text-extraction response
///
/// Falls back through truncation repair and per-object salvage; every
/// complete item the model emitted before a cutoff is kept.
pub fn parse_line_items(text: &str) -> Result<Vec<RawLineItem>> {
    let cleaned = strip_fences(text);

    if let Some(span) = balanced_span(cleaned, '[', ']') {
        if let Ok(items) = serde_json::from_str::<Vec<RawLineItem>>(span) {
            return Ok(items);
        }
    }

    let tail = cleaned
        .find('[')
        .map(|i| &cleaned[i..])
        .unwrap_or(cleaned);
    if let Some(repaired) = repair_truncated(tail) {
        if let Ok(items) = serde_json::from_str::<Vec<RawLineItem>>(&repaired) {
            debug!(items = items.len(), "Parsed line items after truncation repair");
            return Ok(items);
        }
    }

    let salvaged: Vec<RawLineItem> = salvage_objects(cleaned)
        .into_iter()
        .filter_map(|v| serde_json::from_value::<RawLineItem>(v).ok())
        .filter(|item| !item.description.trim().is_empty())
        .collect();
    if !salvaged.is_empty() {
        debug!(items = salvaged.len(), "Salvaged line items from broken response");
        return Ok(salvaged);
    }

    Err(Error::ModelFormat(format!(
        "No line-item array in response: {}",
        truncate_for_log(text)
    )))
}

/// Parse the single invoice object a vision model returns
pub fn parse_vision_invoice(text: &str) -> Result<RawVisionInvoice> {
    let cleaned = strip_fences(text);

    if let Some(span) = balanced_span(cleaned, '{', '}') {
        if let Ok(invoice) = serde_json::from_str::<RawVisionInvoice>(span) {
            return Ok(invoice);
        }
    }

    let tail = cleaned
        .find('{')
        .map(|i| &cleaned[i..])
        .unwrap_or(cleaned);
    if let Some(repaired) = repair_truncated(tail) {
        if let Ok(invoice) = serde_json::from_str::<RawVisionInvoice>(&repaired) {
            debug!(
                items = invoice.line_items.len(),
                "Parsed vision invoice after truncation repair"
            );
            return Ok(invoice);
        }
    }

    // Last resort: any intact objects that look like line items become a
    // bare invoice with no header fields.
    let items: Vec<RawLineItem> = salvage_objects(cleaned)
        .into_iter()
        .filter_map(|v| object_as_line_item(&v))
        .collect();
    if !items.is_empty() {
        debug!(items = items.len(), "Salvaged vision line items from broken response");
        return Ok(RawVisionInvoice {
            line_items: items,
            ..Default::default()
        });
    }

    Err(Error::ModelFormat(format!(
        "No invoice object in response: {}",
        truncate_for_log(text)
    )))
}

fn object_as_line_item(value: &Value) -> Option<RawLineItem> {
    if value.get("description").is_none() {
        return None;
    }
    serde_json::from_value::<RawLineItem>(value.clone())
        .ok()
        .filter(|item| !item.description.trim().is_empty())
}

/// Parse the pattern object the algorithm-generation prompt asks for
pub fn parse_generated_algorithm(text: &str) -> Result<RawGeneratedAlgorithm> {
    let cleaned = strip_fences(text);

    if let Some(span) = balanced_span(cleaned, '{', '}') {
        if let Ok(algorithm) = serde_json::from_str::<RawGeneratedAlgorithm>(span) {
            return Ok(algorithm);
        }
    }

    let tail = cleaned
        .find('{')
        .map(|i| &cleaned[i..])
        .unwrap_or(cleaned);
    if let Some(repaired) = repair_truncated(tail) {
        if let Ok(algorithm) = serde_json::from_str::<RawGeneratedAlgorithm>(&repaired) {
            return Ok(algorithm);
        }
    }

    Err(Error::ModelFormat(format!(
        "No pattern object in response: {}",
        truncate_for_log(text)
    )))
}

fn truncate_for_log(text: &str) -> String {
    const MAX: usize = 200;
    let trimmed = text.trim();
    if trimmed.len() <= MAX {
        trimmed.to_string()
    } else {
        let mut end = MAX;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &trimmed[..end])
    }
}
