//! Vision model extraction
//!
//! Sends the page image to a vision model with a detailed prompt. Two
//! degraded outcomes get one retry with a deliberately minimal prompt:
//!
//! - content-filter stops (invoices with medical or personal terms trip
//!   safety filters surprisingly often)
//! - length-limit stops where truncation repair could not rescue a single
//!   complete line item
//!
//! A truncated response that still yields complete items is accepted as-is;
//! a second round trip costs more than the tail of a long invoice is worth.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::acquire::PageImage;
use crate::ai::{parsing, FinishReason, ModelClient, RawVisionInvoice};
use crate::config::ExtractionConfig;
use crate::error::{Error, Result};
use crate::extract::{self, ItemDraft};
use crate::models::{
    ExtractionMethod, ExtractionResult, InvoiceMetadata, ProcessingRules,
};
use crate::prompts::{PromptId, PromptLibrary};

/// Extract an invoice from a page image
pub async fn extract(
    client: &ModelClient,
    prompts: &mut PromptLibrary,
    config: &ExtractionConfig,
    page: &PageImage,
    supplier_hint: Option<&str>,
) -> Result<ExtractionResult> {
    let detailed = render(prompts, PromptId::ExtractInvoiceVision)?;
    let generation = client
        .generate_vision_with_retry(
            &detailed,
            &page.bytes,
            &page.mime_type,
            &config.model.generate_options(),
            config.model.max_retries,
            config.model.retry_base_delay(),
        )
        .await?;

    let first_attempt = match generation.finish {
        FinishReason::ContentFilter => {
            warn!("Vision response hit a content filter, retrying with minimal prompt");
            None
        }
        FinishReason::Length => {
            match parsing::parse_vision_invoice(&generation.text) {
                Ok(invoice) if !invoice.line_items.is_empty() => {
                    debug!(
                        items = invoice.line_items.len(),
                        "Accepting truncated vision response with complete items"
                    );
                    Some((invoice, generation.text, ExtractionMethod::Vision))
                }
                _ => {
                    warn!("Truncated vision response had no usable items, retrying with minimal prompt");
                    None
                }
            }
        }
        FinishReason::Stop => {
            let invoice = parsing::parse_vision_invoice(&generation.text)?;
            Some((invoice, generation.text, ExtractionMethod::Vision))
        }
    };

    let (invoice, raw, method) = match first_attempt {
        Some(parsed) => parsed,
        None => {
            let simple = render(prompts, PromptId::ExtractInvoiceVisionSimple)?;
            let retry = client
                .generate_vision_with_retry(
                    &simple,
                    &page.bytes,
                    &page.mime_type,
                    &config.model.generate_options(),
                    config.model.max_retries,
                    config.model.retry_base_delay(),
                )
                .await?;
            if retry.finish == FinishReason::ContentFilter {
                return Err(Error::ModelFormat(
                    "Vision model refused the invoice twice (content filter)".into(),
                ));
            }
            let invoice = parsing::parse_vision_invoice(&retry.text)?;
            (invoice, retry.text, ExtractionMethod::VisionSimple)
        }
    };

    Ok(build_result(invoice, raw, method, config, supplier_hint))
}

fn render(prompts: &mut PromptLibrary, id: PromptId) -> Result<String> {
    Ok(prompts.get(id)?.render_full(&HashMap::new()))
}

fn build_result(
    invoice: RawVisionInvoice,
    raw: String,
    method: ExtractionMethod,
    config: &ExtractionConfig,
    supplier_hint: Option<&str>,
) -> ExtractionResult {
    let supplier = invoice
        .supplier
        .clone()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| supplier_hint.map(str::to_string))
        .unwrap_or_else(|| "Unknown Supplier".to_string());

    let rules = ProcessingRules {
        currency: invoice
            .currency
            .clone()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| config.money.default_currency.clone()),
        tax_rate: config.money.default_tax_rate,
        prices_include_tax: false,
        has_discounts: true,
        date_format: None,
    };

    let source = method.as_str();
    let items: Vec<_> = invoice
        .line_items
        .into_iter()
        .map(|raw_item| {
            let draft = ItemDraft {
                code: raw_item.code,
                description: raw_item.description,
                quantity: raw_item.quantity,
                unit_price: raw_item.unit_price,
                discount_percent: raw_item.discount_percent,
                reported_total: raw_item.total_price,
            };
            extract::finalize_item(draft, &rules, config, source)
        })
        .collect();
    let mut items = extract::dedup_items(items, config.limits.max_line_items);
    if let Some(total) = invoice.total_amount {
        extract::reconcile_with_invoice_total(&mut items, total, config);
    }

    info!(%supplier, items = items.len(), ?method, "Vision extraction finished");

    ExtractionResult {
        method,
        supplier,
        metadata: InvoiceMetadata {
            invoice_number: invoice.invoice_number,
            date: invoice.invoice_date,
            total_amount: invoice.total_amount,
            total_excluding_tax: invoice.total_excluding_tax,
            tax_amount: invoice.tax_amount,
            currency: Some(rules.currency.clone()),
        },
        line_items: items,
        raw_trace: raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{Generation, MockBackend};

    fn page() -> PageImage {
        PageImage {
            bytes: vec![0u8; 16],
            mime_type: "image/png".into(),
        }
    }

    fn setup() -> (MockBackend, PromptLibrary, ExtractionConfig) {
        (
            MockBackend::new(),
            PromptLibrary::embedded_only(),
            ExtractionConfig::embedded(),
        )
    }

    #[tokio::test]
    async fn test_clean_stop_response() {
        let (mock, mut prompts, config) = setup();
        mock.push_vision(Generation::stopped(
            r#"{"supplier": "Medis", "invoiceNumber": "INV-1", "currency": "ZAR", "lineItems": [{"description": "Sleeve", "quantity": 4, "unitPrice": 300.33, "discountPercent": 25, "totalPrice": 900.99}]}"#,
        ));
        let client = ModelClient::Mock(mock.clone());

        let result = extract(&client, &mut prompts, &config, &page(), None)
            .await
            .unwrap();
        assert_eq!(result.method, ExtractionMethod::Vision);
        assert_eq!(result.supplier, "Medis");
        assert_eq!(result.line_items.len(), 1);
        assert!(result.line_items[0].is_valid);
        assert_eq!(mock.vision_calls(), 1);
    }

    #[tokio::test]
    async fn test_truncated_with_complete_items_accepted_without_retry() {
        let (mock, mut prompts, config) = setup();
        let truncated = r#"{"supplier": "Medis", "lineItems": [{"description": "Sleeve", "quantity": 4, "unitPrice": 300.33}, {"description": "Spreader", "quantity": 2, "unitPrice": 89.5}, {"description": "Band"#;
        mock.push_vision(Generation {
            text: truncated.into(),
            finish: FinishReason::Length,
        });
        let client = ModelClient::Mock(mock.clone());

        let result = extract(&client, &mut prompts, &config, &page(), None)
            .await
            .unwrap();
        assert_eq!(result.method, ExtractionMethod::Vision);
        assert_eq!(result.line_items.len(), 2);
        // No second model call for a salvageable truncation.
        assert_eq!(mock.vision_calls(), 1);
    }

    #[tokio::test]
    async fn test_content_filter_retries_with_simple_prompt() {
        let (mock, mut prompts, config) = setup();
        mock.push_vision(Generation {
            text: String::new(),
            finish: FinishReason::ContentFilter,
        });
        mock.push_vision(Generation::stopped(
            r#"{"supplier": "Clinic Supplies", "lineItems": [{"description": "Gauze", "quantity": 10, "unitPrice": 5}]}"#,
        ));
        let client = ModelClient::Mock(mock.clone());

        let result = extract(&client, &mut prompts, &config, &page(), None)
            .await
            .unwrap();
        assert_eq!(result.method, ExtractionMethod::VisionSimple);
        assert_eq!(result.line_items.len(), 1);
        assert_eq!(mock.vision_calls(), 2);
    }

    #[tokio::test]
    async fn test_double_content_filter_fails() {
        let (mock, mut prompts, config) = setup();
        for _ in 0..2 {
            mock.push_vision(Generation {
                text: String::new(),
                finish: FinishReason::ContentFilter,
            });
        }
        let client = ModelClient::Mock(mock);

        let result = extract(&client, &mut prompts, &config, &page(), None).await;
        assert!(matches!(result, Err(Error::ModelFormat(_))));
    }

    #[tokio::test]
    async fn test_declared_total_mismatch_warns_items() {
        let (mock, mut prompts, config) = setup();
        mock.push_vision(Generation::stopped(
            r#"{"supplier": "Medis", "totalAmount": 9999.0, "lineItems": [{"description": "Gauze", "quantity": 10, "unitPrice": 5}]}"#,
        ));
        let client = ModelClient::Mock(mock);

        let result = extract(&client, &mut prompts, &config, &page(), None)
            .await
            .unwrap();
        let item = &result.line_items[0];
        assert!(item.validation_errors.iter().any(|w| w.contains("declares")));
        // The invoice-level mismatch stays informational.
        assert!(item.is_valid);
    }

    #[tokio::test]
    async fn test_supplier_hint_fills_missing_supplier() {
        let (mock, mut prompts, config) = setup();
        mock.push_vision(Generation::stopped(
            r#"{"lineItems": [{"description": "Gauze", "quantity": 1, "unitPrice": 5}]}"#,
        ));
        let client = ModelClient::Mock(mock);

        let result = extract(&client, &mut prompts, &config, &page(), Some("Transpharm"))
            .await
            .unwrap();
        assert_eq!(result.supplier, "Transpharm");
    }
}
