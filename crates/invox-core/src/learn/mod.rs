//! Supplier learning: train once, extract forever
//!
//! A training session takes one real invoice plus user-confirmed example
//! rows and produces a [`LearnedAlgorithm`]: a regex ruleset persisted per
//! supplier. Pattern generation is asked of the model first; when the
//! model's patterns fail to reproduce the confirmed examples, a manual
//! template derived directly from the annotated lines takes over, so a
//! training session always ends with a working algorithm.

pub mod store;

pub use store::{AlgorithmStore, FileStore, MemoryStore};

use std::collections::HashMap;

use chrono::Utc;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::ai::{parsing, ModelClient};
use crate::config::ExtractionConfig;
use crate::error::{Error, Result};
use crate::extract::{self, ItemDraft};
use crate::models::{
    AlgorithmPatterns, AnnotatedItem, ExtractionMethod, ExtractionResult, InvoiceMetadata,
    LearnedAlgorithm, ProcessingRules, TrainingAnnotations, TrainingReport, TrainingSession,
};
use crate::prompts::{PromptId, PromptLibrary};

/// Number token in learned patterns. Accepts decimal point or comma.
const NUM: &str = "[0-9]+(?:[.,][0-9]+)?";

/// Normalize a supplier name into a storage key
///
/// Case, punctuation and spacing are noise: "MEDIS (PTY) LTD" and
/// "medis pty ltd" are the same supplier.
pub fn normalize_supplier_key(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Run a learned algorithm over invoice text
pub fn apply_algorithm(
    algorithm: &LearnedAlgorithm,
    text: &str,
    config: &ExtractionConfig,
) -> Result<ExtractionResult> {
    let line_re = Regex::new(&multiline(&algorithm.patterns.line_item))?;
    let group = |field: &str| -> String {
        algorithm
            .patterns
            .groups
            .get(field)
            .cloned()
            .unwrap_or_else(|| field.to_string())
    };

    let source = format!("learned:{}", algorithm.supplier_key);
    let mut items = Vec::new();
    for caps in line_re.captures_iter(text) {
        let text_field = |field: &str| {
            caps.name(&group(field))
                .map(|m| m.as_str().trim().to_string())
        };
        let num_field = |field: &str| text_field(field).map(|s| parse_num(&s));

        let draft = ItemDraft {
            code: text_field("code").filter(|s| !s.is_empty()),
            description: text_field("description").unwrap_or_default(),
            quantity: num_field("quantity").unwrap_or(0.0),
            unit_price: num_field("unit_price").unwrap_or(0.0),
            discount_percent: num_field("discount").unwrap_or(0.0),
            reported_total: num_field("total"),
        };
        items.push(extract::finalize_item(
            draft,
            &algorithm.processing,
            config,
            &source,
        ));
    }
    let items = extract::dedup_items(items, config.limits.max_line_items);

    Ok(ExtractionResult {
        method: ExtractionMethod::LearnedAlgorithm,
        supplier: algorithm.supplier_name.clone(),
        metadata: InvoiceMetadata {
            invoice_number: capture_pattern(&algorithm.patterns.invoice_number, text)?,
            date: capture_pattern(&algorithm.patterns.date, text)?,
            total_amount: None,
            total_excluding_tax: None,
            tax_amount: None,
            currency: Some(algorithm.processing.currency.clone()),
        },
        line_items: items,
        raw_trace: format!("learned-algorithm v{}", algorithm.version),
    })
}

fn capture_pattern(pattern: &Option<String>, text: &str) -> Result<Option<String>> {
    let Some(pattern) = pattern else {
        return Ok(None);
    };
    let re = Regex::new(pattern)?;
    Ok(re.captures(text).map(|caps| {
        caps.get(1)
            .or_else(|| caps.get(0))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default()
    }))
}

fn multiline(pattern: &str) -> String {
    if pattern.starts_with("(?m") {
        pattern.to_string()
    } else {
        format!("(?m){}", pattern)
    }
}

fn parse_num(s: &str) -> f64 {
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',' || *c == '-')
        .collect();
    // "1,300.33" keeps the point; "300,33" means the comma is the decimal.
    let normalized = if cleaned.contains('.') {
        cleaned.replace(',', "")
    } else {
        cleaned.replace(',', ".")
    };
    normalized.parse().unwrap_or(0.0)
}

/// Manager over the algorithm store
pub struct LearningManager {
    store: Box<dyn AlgorithmStore>,
}

impl LearningManager {
    pub fn new(store: Box<dyn AlgorithmStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStore::new()))
    }

    pub fn algorithm_for(&self, supplier: &str) -> Result<Option<LearnedAlgorithm>> {
        self.store.get(&normalize_supplier_key(supplier))
    }

    /// True when no algorithm is stored for this supplier
    pub fn needs_training(&self, supplier: &str) -> Result<bool> {
        Ok(self.algorithm_for(supplier)?.is_none())
    }

    pub fn list(&self) -> Result<Vec<LearnedAlgorithm>> {
        self.store.list()
    }

    pub fn forget(&self, supplier: &str) -> Result<bool> {
        self.store.remove(&normalize_supplier_key(supplier))
    }

    pub fn apply(
        &self,
        algorithm: &LearnedAlgorithm,
        text: &str,
        config: &ExtractionConfig,
    ) -> Result<ExtractionResult> {
        apply_algorithm(algorithm, text, config)
    }

    /// Run one training pass and persist the resulting algorithm
    ///
    /// Model-generated patterns are accepted only when they reproduce every
    /// confirmed example from the session text; otherwise the manual
    /// template path is used. The accuracy report is informational and
    /// never blocks persistence.
    pub async fn train(
        &self,
        session: &TrainingSession,
        annotations: &TrainingAnnotations,
        client: &ModelClient,
        prompts: &mut PromptLibrary,
        config: &ExtractionConfig,
    ) -> Result<(LearnedAlgorithm, TrainingReport)> {
        if annotations.items.is_empty() {
            return Err(Error::Training(
                "Training requires at least one annotated line item".into(),
            ));
        }

        let rules = rules_from_annotations(annotations, config);

        let mut used_manual_template = false;
        let mut patterns = None;

        match generate_patterns(client, prompts, config, session, annotations).await {
            Ok(candidate) => {
                let reproduced =
                    self.count_reproduced(&candidate, &rules, session, annotations, config);
                if reproduced == annotations.items.len() {
                    debug!(reproduced, "Model-generated patterns verified");
                    patterns = Some(candidate);
                } else {
                    warn!(
                        reproduced,
                        expected = annotations.items.len(),
                        "Model patterns missed confirmed examples, using manual template"
                    );
                }
            }
            Err(e) => {
                warn!(error = %e, "Pattern generation failed, using manual template");
            }
        }

        let patterns = match patterns {
            Some(p) => p,
            None => {
                used_manual_template = true;
                manual_template(&session.raw_invoice_text, annotations)
            }
        };

        let existing = self.store.get(&session.supplier_key)?;
        let algorithm = LearnedAlgorithm {
            supplier_key: session.supplier_key.clone(),
            supplier_name: session.supplier.clone(),
            patterns,
            processing: rules,
            version: existing.as_ref().map(|a| a.version + 1).unwrap_or(1),
            created_at: Utc::now(),
            training_count: existing.map(|a| a.training_count + 1).unwrap_or(1),
        };

        let verification = apply_algorithm(&algorithm, &session.raw_invoice_text, config)
            .map(|r| r.line_items)
            .unwrap_or_default();
        let report = TrainingReport {
            supplier: session.supplier.clone(),
            matched_lines: verification.len(),
            annotated_examples: annotations.items.len(),
            examples_reproduced: annotations
                .items
                .iter()
                .filter(|example| {
                    verification
                        .iter()
                        .any(|item| reproduces(item, example, &algorithm.processing))
                })
                .count(),
            used_manual_template,
        };

        self.store.put(&algorithm)?;
        info!(
            supplier = %session.supplier,
            version = algorithm.version,
            matched = report.matched_lines,
            reproduced = report.examples_reproduced,
            manual = report.used_manual_template,
            "Training complete"
        );

        Ok((algorithm, report))
    }

    fn count_reproduced(
        &self,
        patterns: &AlgorithmPatterns,
        rules: &ProcessingRules,
        session: &TrainingSession,
        annotations: &TrainingAnnotations,
        config: &ExtractionConfig,
    ) -> usize {
        let candidate = LearnedAlgorithm {
            supplier_key: session.supplier_key.clone(),
            supplier_name: session.supplier.clone(),
            patterns: patterns.clone(),
            processing: rules.clone(),
            version: 0,
            created_at: Utc::now(),
            training_count: 0,
        };
        let Ok(result) = apply_algorithm(&candidate, &session.raw_invoice_text, config) else {
            return 0;
        };
        annotations
            .items
            .iter()
            .filter(|example| {
                result
                    .line_items
                    .iter()
                    .any(|item| reproduces(item, example, rules))
            })
            .count()
    }
}

fn rules_from_annotations(
    annotations: &TrainingAnnotations,
    config: &ExtractionConfig,
) -> ProcessingRules {
    ProcessingRules {
        currency: annotations
            .currency
            .clone()
            .unwrap_or_else(|| config.money.default_currency.clone()),
        tax_rate: annotations.tax_rate.unwrap_or(config.money.default_tax_rate),
        prices_include_tax: annotations.prices_include_tax,
        has_discounts: annotations.items.iter().any(|i| i.discount_percent > 0.0),
        date_format: None,
    }
}

/// Did the extracted item reproduce the annotated example?
fn reproduces(item: &crate::models::LineItem, example: &AnnotatedItem, rules: &ProcessingRules) -> bool {
    let expected_price = if rules.prices_include_tax {
        crate::tax::exclusive_price(example.unit_price, rules.tax_rate)
    } else {
        example.unit_price
    };
    item.description
        .trim()
        .eq_ignore_ascii_case(example.description.trim())
        && (item.quantity - example.quantity).abs() < 1e-6
        && (item.unit_price_excl_tax - expected_price).abs() < 0.01
}

async fn generate_patterns(
    client: &ModelClient,
    prompts: &mut PromptLibrary,
    config: &ExtractionConfig,
    session: &TrainingSession,
    annotations: &TrainingAnnotations,
) -> Result<AlgorithmPatterns> {
    let examples = serde_json::to_string_pretty(&annotations.items)?;
    let prompt = {
        let template = prompts.get(PromptId::GenerateAlgorithm)?;
        let mut vars = HashMap::new();
        vars.insert("supplier", session.supplier.as_str());
        vars.insert("invoice_text", session.raw_invoice_text.as_str());
        vars.insert("examples", examples.as_str());
        if let Some(ref number) = annotations.invoice_number {
            vars.insert("invoice_number", number.as_str());
        }
        if let Some(ref date) = annotations.invoice_date {
            vars.insert("invoice_date", date.as_str());
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

    let raw = parsing::parse_generated_algorithm(&generation.text)?;

    // Compile-check everything before accepting the model's patterns.
    Regex::new(&multiline(&raw.line_item_pattern))?;
    if let Some(ref p) = raw.invoice_number_pattern {
        Regex::new(p)?;
    }
    if let Some(ref p) = raw.date_pattern {
        Regex::new(p)?;
    }

    Ok(AlgorithmPatterns {
        line_item: raw.line_item_pattern,
        groups: raw.groups,
        invoice_number: raw.invoice_number_pattern,
        date: raw.date_pattern,
    })
}

/// Build patterns directly from the annotated lines. Infallible.
///
/// The template comes from the first annotated item's line in the invoice
/// text: the known field values are replaced by named capture groups and
/// everything else becomes escaped literal text, so the pattern matches
/// any future row in the same column layout.
fn manual_template(text: &str, annotations: &TrainingAnnotations) -> AlgorithmPatterns {
    let first = &annotations.items[0];
    let line_item = find_item_line(text, first)
        .map(|line| line_template(line, first))
        .unwrap_or_else(|| literal_template(first));

    AlgorithmPatterns {
        line_item,
        groups: HashMap::new(),
        invoice_number: annotations
            .invoice_number
            .as_ref()
            .and_then(|v| context_pattern(text, v, "([A-Za-z0-9/-]+)")),
        date: annotations
            .invoice_date
            .as_ref()
            .and_then(|v| context_pattern(text, v, "([0-9]{2,4}[./-][0-9]{1,2}[./-][0-9]{2,4})")),
    }
}

fn find_item_line<'a>(text: &'a str, item: &AnnotatedItem) -> Option<&'a str> {
    let needle = item.description.trim().to_ascii_lowercase();
    text.lines()
        .find(|line| line.to_ascii_lowercase().contains(&needle))
        .map(str::trim_end)
}

/// Claimed byte spans within the template line
struct Span {
    start: usize,
    end: usize,
    replacement: String,
}

fn line_template(line: &str, item: &AnnotatedItem) -> String {
    let mut spans: Vec<Span> = Vec::new();

    if let Some(start) = find_ci(line, item.description.trim()) {
        spans.push(Span {
            start,
            end: start + item.description.trim().len(),
            replacement: "(?P<description>.+?)".into(),
        });
    }
    if let Some(code) = item.code.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        if let Some(start) = find_free(line, code, &spans, false) {
            spans.push(Span {
                start,
                end: start + code.len(),
                replacement: r"(?P<code>\S+)".into(),
            });
        }
    }

    let claim_number = |value: f64, group: &str, spans: &mut Vec<Span>| {
        for candidate in number_variants(value) {
            if let Some(start) = find_free(line, &candidate, spans, true) {
                spans.push(Span {
                    start,
                    end: start + candidate.len(),
                    replacement: format!("(?P<{}>{})", group, NUM),
                });
                return;
            }
        }
    };

    claim_number(item.quantity, "quantity", &mut spans);
    claim_number(item.unit_price, "unit_price", &mut spans);
    if item.discount_percent > 0.0 {
        claim_number(item.discount_percent, "discount", &mut spans);
    }
    if let Some(total) = item.total_price {
        claim_number(total, "total", &mut spans);
    }

    spans.sort_by_key(|s| s.start);

    let mut pattern = String::from("^");
    let mut cursor = 0;
    for span in &spans {
        pattern.push_str(&escape_gap(&line[cursor..span.start]));
        pattern.push_str(&span.replacement);
        cursor = span.end;
    }
    pattern.push_str(&escape_gap(&line[cursor..]));
    pattern.push('$');
    pattern
}

/// Last resort: match the annotated values themselves as literals
fn literal_template(item: &AnnotatedItem) -> String {
    let code_part = item
        .code
        .as_deref()
        .map(|c| format!(r"(?:(?P<code>{})\s+)?", regex::escape(c.trim())))
        .unwrap_or_default();
    format!(
        "^{}(?P<description>{}).*$",
        code_part,
        regex::escape(item.description.trim())
    )
}

/// Case-insensitive ASCII substring search
fn find_ci(haystack: &str, needle: &str) -> Option<usize> {
    haystack
        .find(needle)
        .or_else(|| haystack.to_ascii_lowercase().find(&needle.to_ascii_lowercase()))
}

/// Find `needle` in `line` outside already-claimed spans. For numbers the
/// match must sit on digit boundaries so "4" never claims part of "47B".
fn find_free(line: &str, needle: &str, spans: &[Span], digit_boundary: bool) -> Option<usize> {
    let mut from = 0;
    while let Some(offset) = line[from..].find(needle) {
        let start = from + offset;
        let end = start + needle.len();
        let overlaps = spans.iter().any(|s| start < s.end && end > s.start);
        let bounded = !digit_boundary
            || (!prev_is_digit(line, start) && !next_is_digit(line, end));
        if !overlaps && bounded {
            return Some(start);
        }
        from = start + 1;
    }
    None
}

fn prev_is_digit(line: &str, index: usize) -> bool {
    line[..index]
        .chars()
        .next_back()
        .is_some_and(|c| c.is_ascii_digit() || c == '.')
}

fn next_is_digit(line: &str, index: usize) -> bool {
    line[index..]
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit() || c == '.')
}

/// Printed forms a numeric value might take on the invoice
fn number_variants(value: f64) -> Vec<String> {
    let mut variants = vec![format!("{:.2}", value), format!("{:.1}", value)];
    if value.fract() == 0.0 {
        variants.push(format!("{}", value as i64));
    } else {
        variants.push(format!("{}", value));
    }
    let commas: Vec<String> = variants.iter().map(|v| v.replace('.', ",")).collect();
    variants.extend(commas);
    variants.sort_by_key(|v| std::cmp::Reverse(v.len()));
    variants.dedup();
    variants
}

/// Escape literal text between captures, tolerating whitespace variation
fn escape_gap(gap: &str) -> String {
    let mut out = String::new();
    let mut chars = gap.chars().peekable();
    while let Some(c) = chars.next() {
        if c.is_whitespace() {
            while chars.peek().is_some_and(|n| n.is_whitespace()) {
                chars.next();
            }
            out.push_str(r"\s+");
        } else {
            out.push_str(&regex::escape(&c.to_string()));
        }
    }
    out
}

/// Build a capture pattern for a header value from its surrounding context
fn context_pattern(text: &str, value: &str, capture_class: &str) -> Option<String> {
    let line = text.lines().find(|l| l.contains(value))?;
    let pos = line.find(value)?;
    let prefix = line[..pos].trim_start();
    if prefix.is_empty() {
        return None;
    }
    Some(format!("{}{}", escape_gap(prefix), capture_class))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{Generation, MockBackend};

    const TRAINING_TEXT: &str = "\
ACME TRADING CC
Invoice: ACM-99
Date: 2025/05/01

WID-1 Blue Widget 4.00 120.50 482.00
GAD-2 Red Gadget 2.00 60.00 120.00

Total: R602.00
";

    fn annotations() -> TrainingAnnotations {
        TrainingAnnotations {
            items: vec![
                AnnotatedItem {
                    code: Some("WID-1".into()),
                    description: "Blue Widget".into(),
                    quantity: 4.0,
                    unit_price: 120.5,
                    discount_percent: 0.0,
                    total_price: Some(482.0),
                },
                AnnotatedItem {
                    code: Some("GAD-2".into()),
                    description: "Red Gadget".into(),
                    quantity: 2.0,
                    unit_price: 60.0,
                    discount_percent: 0.0,
                    total_price: Some(120.0),
                },
            ],
            invoice_number: Some("ACM-99".into()),
            invoice_date: Some("2025/05/01".into()),
            currency: None,
            tax_rate: None,
            prices_include_tax: false,
        }
    }

    fn session() -> TrainingSession {
        TrainingSession {
            supplier: "Acme Trading".into(),
            supplier_key: normalize_supplier_key("Acme Trading"),
            raw_invoice_text: TRAINING_TEXT.into(),
            started_at: Utc::now(),
        }
    }

    fn config() -> ExtractionConfig {
        ExtractionConfig::embedded()
    }

    #[test]
    fn test_supplier_key_normalization() {
        assert_eq!(normalize_supplier_key("MEDIS (PTY) LTD"), "medisptyltd");
        assert_eq!(normalize_supplier_key("medis pty ltd"), "medisptyltd");
        assert_ne!(
            normalize_supplier_key("Medis"),
            normalize_supplier_key("Transpharm")
        );
    }

    #[test]
    fn test_parse_num_formats() {
        assert_eq!(parse_num("300.33"), 300.33);
        assert_eq!(parse_num("300,33"), 300.33);
        assert_eq!(parse_num("1,300.33"), 1300.33);
        assert_eq!(parse_num("R900.99"), 900.99);
    }

    #[test]
    fn test_manual_template_reproduces_all_rows() {
        let patterns = manual_template(TRAINING_TEXT, &annotations());
        let re = Regex::new(&multiline(&patterns.line_item)).unwrap();
        let matches: Vec<_> = re.captures_iter(TRAINING_TEXT).collect();
        assert_eq!(matches.len(), 2);

        let second = &matches[1];
        assert_eq!(&second["code"], "GAD-2");
        assert_eq!(&second["description"], "Red Gadget");
        assert_eq!(&second["quantity"], "2.00");
        assert_eq!(&second["unit_price"], "60.00");
    }

    #[test]
    fn test_manual_template_header_patterns() {
        let patterns = manual_template(TRAINING_TEXT, &annotations());
        let number_re = Regex::new(patterns.invoice_number.as_deref().unwrap()).unwrap();
        assert_eq!(&number_re.captures(TRAINING_TEXT).unwrap()[1], "ACM-99");
        let date_re = Regex::new(patterns.date.as_deref().unwrap()).unwrap();
        assert_eq!(&date_re.captures(TRAINING_TEXT).unwrap()[1], "2025/05/01");
    }

    #[tokio::test]
    async fn test_train_accepts_verified_model_patterns() {
        let mock = MockBackend::new();
        mock.push_text(Generation::stopped(
            r#"{"lineItemPattern": "^(?P<code>[A-Z]{3}-\\d+)\\s+(?P<description>.+?)\\s+(?P<quantity>\\d+\\.\\d{2})\\s+(?P<unit_price>\\d+\\.\\d{2})\\s+(?P<total>\\d+\\.\\d{2})$", "groups": {}, "invoiceNumberPattern": "Invoice:\\s*([A-Z0-9-]+)", "datePattern": null}"#,
        ));
        let client = ModelClient::Mock(mock);
        let manager = LearningManager::in_memory();
        let mut prompts = PromptLibrary::embedded_only();

        assert!(manager.needs_training("Acme Trading").unwrap());

        let (algorithm, report) = manager
            .train(&session(), &annotations(), &client, &mut prompts, &config())
            .await
            .unwrap();

        assert!(!report.used_manual_template);
        assert_eq!(report.annotated_examples, 2);
        assert_eq!(report.examples_reproduced, 2);
        assert_eq!(algorithm.version, 1);
        assert!(!manager.needs_training("Acme Trading").unwrap());
        // Key normalization: spacing and case variants hit the same record.
        assert!(!manager.needs_training("ACME TRADING").unwrap());
    }

    #[tokio::test]
    async fn test_groups_map_renames_capture_groups_per_field() {
        // groups maps line-item field -> capture-group name; a pattern that
        // names its groups differently still extracts every field.
        let mock = MockBackend::new();
        mock.push_text(Generation::stopped(
            r#"{"lineItemPattern": "^(?P<sku>[A-Z]{3}-\\d+)\\s+(?P<description>.+?)\\s+(?P<qty>\\d+\\.\\d{2})\\s+(?P<unit_price>\\d+\\.\\d{2})\\s+(?P<amount>\\d+\\.\\d{2})$", "groups": {"code": "sku", "quantity": "qty", "total": "amount"}, "invoiceNumberPattern": null, "datePattern": null}"#,
        ));
        let client = ModelClient::Mock(mock);
        let manager = LearningManager::in_memory();
        let mut prompts = PromptLibrary::embedded_only();

        let (algorithm, report) = manager
            .train(&session(), &annotations(), &client, &mut prompts, &config())
            .await
            .unwrap();
        assert!(!report.used_manual_template);

        let result = manager.apply(&algorithm, TRAINING_TEXT, &config()).unwrap();
        assert_eq!(result.line_items.len(), 2);
        assert_eq!(result.line_items[0].code.as_deref(), Some("WID-1"));
        assert_eq!(result.line_items[0].quantity, 4.0);
        assert_eq!(result.line_items[0].total_price_as_reported, Some(482.0));
    }

    #[tokio::test]
    async fn test_train_falls_back_to_manual_template() {
        let mock = MockBackend::new();
        mock.push_text(Generation::stopped("I cannot write regular expressions."));
        let client = ModelClient::Mock(mock);
        let manager = LearningManager::in_memory();
        let mut prompts = PromptLibrary::embedded_only();

        let (algorithm, report) = manager
            .train(&session(), &annotations(), &client, &mut prompts, &config())
            .await
            .unwrap();

        assert!(report.used_manual_template);
        assert_eq!(report.examples_reproduced, 2);

        let result = manager
            .apply(&algorithm, TRAINING_TEXT, &config())
            .unwrap();
        assert_eq!(result.line_items.len(), 2);
        assert_eq!(result.line_items[0].description, "Blue Widget");
        assert!(result.line_items[0].is_valid);
        assert_eq!(result.metadata.invoice_number.as_deref(), Some("ACM-99"));
    }

    #[tokio::test]
    async fn test_train_rejects_unverified_model_patterns() {
        let mock = MockBackend::new();
        // Compiles fine but matches nothing in the invoice.
        mock.push_text(Generation::stopped(
            r#"{"lineItemPattern": "^ZZZ (?P<description>.+)$", "groups": {}, "invoiceNumberPattern": null, "datePattern": null}"#,
        ));
        let client = ModelClient::Mock(mock);
        let manager = LearningManager::in_memory();
        let mut prompts = PromptLibrary::embedded_only();

        let (_, report) = manager
            .train(&session(), &annotations(), &client, &mut prompts, &config())
            .await
            .unwrap();
        assert!(report.used_manual_template);
    }

    #[tokio::test]
    async fn test_retrain_bumps_version() {
        let mock = MockBackend::new();
        mock.push_text(Generation::stopped("garbage"));
        mock.push_text(Generation::stopped("garbage"));
        let client = ModelClient::Mock(mock);
        let manager = LearningManager::in_memory();
        let mut prompts = PromptLibrary::embedded_only();

        let (first, _) = manager
            .train(&session(), &annotations(), &client, &mut prompts, &config())
            .await
            .unwrap();
        let (second, _) = manager
            .train(&session(), &annotations(), &client, &mut prompts, &config())
            .await
            .unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_eq!(second.training_count, 2);
    }

    #[tokio::test]
    async fn test_train_requires_annotations() {
        let manager = LearningManager::in_memory();
        let client = ModelClient::mock();
        let mut prompts = PromptLibrary::embedded_only();
        let empty = TrainingAnnotations::default();

        let result = manager
            .train(&session(), &empty, &client, &mut prompts, &config())
            .await;
        assert!(matches!(result, Err(Error::Training(_))));
    }

    #[test]
    fn test_apply_rejects_invalid_stored_pattern() {
        let manager = LearningManager::in_memory();
        let algorithm = LearnedAlgorithm {
            supplier_key: "broken".into(),
            supplier_name: "Broken".into(),
            patterns: AlgorithmPatterns {
                line_item: "(unclosed".into(),
                groups: HashMap::new(),
                invoice_number: None,
                date: None,
            },
            processing: rules_from_annotations(&annotations(), &config()),
            version: 1,
            created_at: Utc::now(),
            training_count: 1,
        };
        assert!(matches!(
            manager.apply(&algorithm, "text", &config()),
            Err(Error::Regex(_))
        ));
    }
}
