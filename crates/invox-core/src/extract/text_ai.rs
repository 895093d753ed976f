//! Generic AI text extraction
//!
//! Sends the acquired invoice text to a text model and parses the
//! line-item array it returns. The last strategy in the cascade; it works
//! for any supplier but inherits every OCR artifact in the text.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::ai::{parsing, ModelClient};
use crate::config::ExtractionConfig;
use crate::error::Result;
use crate::extract::{self, ItemDraft};
use crate::models::{
    ExtractionMethod, ExtractionResult, InvoiceMetadata, ProcessingRules,
};
use crate::prompts::{PromptId, PromptLibrary};

const SOURCE: &str = "text-ai";

/// Extract line items from invoice text with a text model
///
/// Header fields already read by an earlier tier (`known`) are fed into the
/// prompt as cross-check hints and seed the result metadata. An empty
/// `line_items` in the result means the model found nothing; the caller
/// decides whether to fall through to the next strategy.
pub async fn extract(
    client: &ModelClient,
    prompts: &mut PromptLibrary,
    config: &ExtractionConfig,
    text: &str,
    supplier: &str,
    known: Option<&InvoiceMetadata>,
) -> Result<ExtractionResult> {
    let total_hint = known
        .and_then(|m| m.total_amount)
        .map(|t| format!("{:.2}", t));
    let prompt = {
        let template = prompts.get(PromptId::ExtractLineItems)?;
        let mut vars = HashMap::new();
        vars.insert("invoice_text", text);
        if let Some(number) = known.and_then(|m| m.invoice_number.as_deref()) {
            vars.insert("invoice_number", number);
        }
        if let Some(ref total) = total_hint {
            vars.insert("total_amount", total);
        }
        template.render_full(&vars)
    };

    let generation = client
        .generate_with_retry(
            &prompt,
            &config.model.generate_options(),
            config.model.max_retries,
            config.model.retry_base_delay(),
        )
        .await?;

    debug!(
        finish = ?generation.finish,
        chars = generation.text.len(),
        "Text extraction response"
    );

    let raw_items = parsing::parse_line_items(&generation.text)?;
    let rules = default_rules(config);

    let items: Vec<_> = raw_items
        .into_iter()
        .map(|raw| {
            let draft = ItemDraft {
                code: raw.code,
                description: raw.description,
                quantity: raw.quantity,
                unit_price: raw.unit_price,
                discount_percent: raw.discount_percent,
                reported_total: raw.total_price,
            };
            extract::finalize_item(draft, &rules, config, SOURCE)
        })
        .collect();
    let mut items = extract::dedup_items(items, config.limits.max_line_items);
    if let Some(total) = known.and_then(|m| m.total_amount) {
        extract::reconcile_with_invoice_total(&mut items, total, config);
    }

    info!(supplier, items = items.len(), "Text AI extraction finished");

    let mut metadata = known.cloned().unwrap_or_default();
    if metadata.currency.is_none() {
        metadata.currency = Some(config.money.default_currency.clone());
    }

    Ok(ExtractionResult {
        method: ExtractionMethod::TextAi,
        supplier: supplier.to_string(),
        metadata,
        line_items: items,
        raw_trace: generation.text,
    })
}

fn default_rules(config: &ExtractionConfig) -> ProcessingRules {
    ProcessingRules {
        currency: config.money.default_currency.clone(),
        tax_rate: config.money.default_tax_rate,
        prices_include_tax: false,
        has_discounts: true,
        date_format: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{Generation, MockBackend};
    use crate::error::Error;

    fn setup() -> (MockBackend, PromptLibrary, ExtractionConfig) {
        (
            MockBackend::new(),
            PromptLibrary::embedded_only(),
            ExtractionConfig::embedded(),
        )
    }

    #[tokio::test]
    async fn test_extracts_items_from_model_json() {
        let (mock, mut prompts, config) = setup();
        mock.push_text(Generation::stopped(
            r#"[{"code": "A-1", "description": "Widget", "quantity": 2, "unitPrice": 10.0, "discountPercent": 0, "totalPrice": 20.0}]"#,
        ));
        let client = ModelClient::Mock(mock);

        let result = extract(&client, &mut prompts, &config, "WIDGET 2 x 10.00", "Acme", None)
            .await
            .unwrap();
        assert_eq!(result.method, ExtractionMethod::TextAi);
        assert_eq!(result.line_items.len(), 1);
        let item = &result.line_items[0];
        assert!(item.is_valid, "{:?}", item.validation_errors);
        assert!((item.totals.net_total - 20.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_caps_and_dedups_model_output() {
        let (mock, mut prompts, config) = setup();
        let items: Vec<String> = (0..40)
            .map(|i| {
                format!(
                    r#"{{"description": "Item {}", "quantity": 1, "unitPrice": 5}}"#,
                    i % 30
                )
            })
            .collect();
        mock.push_text(Generation::stopped(format!("[{}]", items.join(","))));
        let client = ModelClient::Mock(mock);

        let result = extract(&client, &mut prompts, &config, "text", "Acme", None)
            .await
            .unwrap();
        assert_eq!(result.line_items.len(), config.limits.max_line_items);
    }

    #[tokio::test]
    async fn test_prose_response_is_format_error() {
        let (mock, mut prompts, config) = setup();
        mock.push_text(Generation::stopped("I see no line items here."));
        let client = ModelClient::Mock(mock);

        let result = extract(&client, &mut prompts, &config, "text", "Acme", None).await;
        assert!(matches!(result, Err(Error::ModelFormat(_))));
    }

    #[tokio::test]
    async fn test_known_metadata_seeds_result_and_cross_checks() {
        let (mock, mut prompts, config) = setup();
        mock.push_text(Generation::stopped(
            r#"[{"description": "Widget", "quantity": 2, "unitPrice": 10.0}]"#,
        ));
        let client = ModelClient::Mock(mock);

        let known = InvoiceMetadata {
            invoice_number: Some("INV-7".into()),
            total_amount: Some(999.0),
            ..Default::default()
        };
        let result = extract(&client, &mut prompts, &config, "text", "Acme", Some(&known))
            .await
            .unwrap();
        assert_eq!(result.metadata.invoice_number.as_deref(), Some("INV-7"));
        // 2 x 10.00 is nowhere near the declared 999; every row is warned.
        assert!(result.line_items[0]
            .validation_errors
            .iter()
            .any(|w| w.contains("declares")));
    }
}
