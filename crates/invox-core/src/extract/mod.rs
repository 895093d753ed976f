//! Extraction strategies and shared line-item normalization
//!
//! Every strategy (supplier profiles, learned algorithms, text AI, vision)
//! produces drafts of line items; the functions here are the single path
//! that turns a draft into a [`LineItem`], so the money math, sanity checks
//! and reported-total reconciliation are identical no matter which strategy
//! found the row.

pub mod text_ai;
pub mod vision;

use std::collections::HashMap;

use tracing::debug;

use crate::config::ExtractionConfig;
use crate::models::{LineItem, ProcessingRules};
use crate::tax;

/// A line item as a strategy found it, before normalization
#[derive(Debug, Clone, Default)]
pub struct ItemDraft {
    pub code: Option<String>,
    pub description: String,
    pub quantity: f64,
    /// Unit price as printed; may include tax depending on the rules.
    pub unit_price: f64,
    pub discount_percent: f64,
    pub reported_total: Option<f64>,
}

/// Turn a draft into a finished line item
///
/// Computes the derived totals, applies the sanity limits, and reconciles
/// the printed total against the computed one. Sanity failures never drop
/// the row; they mark it invalid with a reason so a human can fix it
/// downstream. A printed total that does not reconcile only warns.
pub fn finalize_item(
    draft: ItemDraft,
    rules: &ProcessingRules,
    config: &ExtractionConfig,
    source: &str,
) -> LineItem {
    let unit_price_excl_tax = if rules.prices_include_tax {
        tax::exclusive_price(draft.unit_price, rules.tax_rate)
    } else {
        draft.unit_price
    };

    let discount_percent = if rules.has_discounts {
        draft.discount_percent
    } else {
        0.0
    };

    let totals = tax::line_totals(
        draft.quantity,
        unit_price_excl_tax,
        discount_percent,
        rules.tax_rate,
    );

    let mut item = LineItem {
        code: draft.code.filter(|c| !c.trim().is_empty()),
        description: draft.description.trim().to_string(),
        quantity: draft.quantity,
        unit_price_excl_tax,
        discount_percent,
        totals,
        total_price_as_reported: draft.reported_total,
        is_valid: true,
        validation_errors: Vec::new(),
        source: source.to_string(),
        suggestions: None,
    };

    if item.description.is_empty() {
        item.push_warning("Missing description");
    }
    if item.quantity <= 0.0 {
        item.push_warning("Quantity must be positive");
    } else if item.quantity > config.limits.max_quantity {
        item.push_warning(format!(
            "Quantity {} exceeds limit {}",
            item.quantity, config.limits.max_quantity
        ));
    }
    if item.unit_price_excl_tax < 0.0 {
        item.push_warning("Negative unit price");
    } else if item.unit_price_excl_tax > config.limits.max_unit_price {
        item.push_warning(format!(
            "Unit price {} exceeds limit {}",
            item.unit_price_excl_tax, config.limits.max_unit_price
        ));
    }

    item.is_valid = item.validation_errors.is_empty();

    // Reported-total reconciliation is recorded after validity is decided:
    // a printed total that does not add up warns but never invalidates.
    if let Some(reported) = item.total_price_as_reported {
        let matches_net = config.reconcile.within(item.totals.net_total, reported);
        let matches_gross = config
            .reconcile
            .within(item.totals.net_total_incl_tax, reported);
        if !matches_net && !matches_gross {
            item.push_warning(format!(
                "Reported total {:.2} does not reconcile with computed {:.2}",
                reported, item.totals.net_total
            ));
        }
    }

    item
}

/// Deduplicate items and enforce the line-item cap
///
/// Two rows are duplicates when their `(code, description)` key agrees,
/// case-folded. The duplicate with the larger reported total survives;
/// models repeat rows and the repeat with the bigger printed total is the
/// one that carried the real figures. Order is otherwise preserved, the
/// cap is applied after dedup. Idempotent.
pub fn dedup_items(items: Vec<LineItem>, max_items: usize) -> Vec<LineItem> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut result: Vec<LineItem> = Vec::new();

    for item in items {
        let key = format!(
            "{}|{}",
            item.code.as_deref().unwrap_or(""),
            item.description.to_lowercase()
        );
        match index.get(&key) {
            Some(&at) => {
                let kept = result[at].total_price_as_reported.unwrap_or(0.0);
                let candidate = item.total_price_as_reported.unwrap_or(0.0);
                if candidate > kept {
                    result[at] = item;
                }
            }
            None => {
                index.insert(key, result.len());
                result.push(item);
            }
        }
    }

    if result.len() > max_items {
        debug!(max_items, dropped = result.len() - max_items, "Line-item cap reached");
        result.truncate(max_items);
    }
    result
}

/// Cross-check the item sum against the invoice's declared total
///
/// A mismatch outside the reconciliation tolerance appends a warning to
/// every item. Informational only: the flag never flips `is_valid`, since
/// a wrong declared total (or a partial extraction) says nothing about any
/// individual row.
pub fn reconcile_with_invoice_total(
    items: &mut [LineItem],
    declared_total: f64,
    config: &ExtractionConfig,
) {
    if items.is_empty() || !(declared_total > 0.0) {
        return;
    }

    let gross: f64 = items.iter().map(|i| i.totals.net_total_incl_tax).sum();
    let net: f64 = items.iter().map(|i| i.totals.net_total).sum();
    if config.reconcile.within(declared_total, gross) || config.reconcile.within(declared_total, net)
    {
        return;
    }

    debug!(declared_total, gross, "Item sum does not reconcile with invoice total");
    let warning = format!(
        "Line items sum to {:.2}, invoice declares {:.2}",
        gross, declared_total
    );
    for item in items.iter_mut() {
        item.push_warning(warning.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ExtractionConfig {
        ExtractionConfig::embedded()
    }

    fn rules() -> ProcessingRules {
        ProcessingRules {
            currency: "ZAR".into(),
            tax_rate: 15.0,
            prices_include_tax: false,
            has_discounts: true,
            date_format: None,
        }
    }

    fn draft(description: &str, quantity: f64, unit_price: f64) -> ItemDraft {
        ItemDraft {
            description: description.into(),
            quantity,
            unit_price,
            ..Default::default()
        }
    }

    #[test]
    fn test_finalize_computes_totals() {
        let mut d = draft("Sleeve", 4.0, 300.33);
        d.discount_percent = 25.0;
        d.reported_total = Some(900.99);
        let item = finalize_item(d, &rules(), &config(), "test");
        assert!(item.is_valid, "{:?}", item.validation_errors);
        assert!((item.totals.net_total - 900.99).abs() < 1e-6);
    }

    #[test]
    fn test_finalize_converts_inclusive_prices() {
        let mut r = rules();
        r.prices_include_tax = true;
        let item = finalize_item(draft("Thing", 1.0, 115.0), &r, &config(), "test");
        assert!((item.unit_price_excl_tax - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_finalize_ignores_discount_when_rules_forbid() {
        let mut r = rules();
        r.has_discounts = false;
        let mut d = draft("Thing", 1.0, 100.0);
        d.discount_percent = 25.0;
        let item = finalize_item(d, &r, &config(), "test");
        assert_eq!(item.discount_percent, 0.0);
        assert!((item.totals.net_total - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_finalize_warns_on_unreconciled_total_but_keeps_item_valid() {
        let mut d = draft("Thing", 2.0, 50.0);
        d.reported_total = Some(500.0);
        let item = finalize_item(d, &rules(), &config(), "test");
        assert!(item.is_valid);
        assert!(item.validation_errors[0].contains("reconcile"));
    }

    #[test]
    fn test_reconcile_accepts_tax_inclusive_reported_total() {
        let mut d = draft("Thing", 2.0, 50.0);
        // 100 net, 115 with 15% tax printed on the invoice.
        d.reported_total = Some(115.0);
        let item = finalize_item(d, &rules(), &config(), "test");
        assert!(item.is_valid, "{:?}", item.validation_errors);
    }

    #[test]
    fn test_small_absolute_difference_tolerated() {
        let mut d = draft("Thing", 1.0, 10.0);
        // 0.60 off on a 10.00 line is over 5% but under the absolute band.
        d.reported_total = Some(10.60);
        let item = finalize_item(d, &rules(), &config(), "test");
        assert!(item.is_valid, "{:?}", item.validation_errors);
    }

    #[test]
    fn test_finalize_flags_insane_quantity() {
        let item = finalize_item(draft("Thing", 50000.0, 1.0), &rules(), &config(), "test");
        assert!(!item.is_valid);
    }

    #[test]
    fn test_dedup_is_idempotent_and_caps() {
        let items: Vec<LineItem> = (0..30)
            .map(|i| {
                let d = draft(&format!("Item {}", i % 25), 1.0, 10.0);
                finalize_item(d, &rules(), &config(), "test")
            })
            .collect();

        let once = dedup_items(items, 20);
        assert_eq!(once.len(), 20);
        let twice = dedup_items(once.clone(), 20);
        assert_eq!(once.len(), twice.len());
    }

    #[test]
    fn test_dedup_keeps_larger_reported_total() {
        let mut small = draft("Same", 1.0, 10.0);
        small.reported_total = Some(10.0);
        let mut large = draft("Same", 3.0, 10.0);
        large.reported_total = Some(30.0);
        let a = finalize_item(small, &rules(), &config(), "test");
        let b = finalize_item(large, &rules(), &config(), "test");

        let deduped = dedup_items(vec![a, b], 20);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].total_price_as_reported, Some(30.0));
    }

    #[test]
    fn test_dedup_distinguishes_codes() {
        let mut a = draft("Same", 1.0, 10.0);
        a.code = Some("A-1".into());
        let mut b = draft("Same", 1.0, 10.0);
        b.code = Some("A-2".into());
        let a = finalize_item(a, &rules(), &config(), "test");
        let b = finalize_item(b, &rules(), &config(), "test");
        assert_eq!(dedup_items(vec![a, b], 20).len(), 2);
    }

    #[test]
    fn test_invoice_reconcile_within_tolerance_is_silent() {
        let mut items = vec![
            finalize_item(draft("A", 2.0, 50.0), &rules(), &config(), "test"),
            finalize_item(draft("B", 1.0, 100.0), &rules(), &config(), "test"),
        ];
        // 200 net, 230 gross; declared 228 is inside the 5% band.
        reconcile_with_invoice_total(&mut items, 228.0, &config());
        assert!(items.iter().all(|i| i.validation_errors.is_empty()));
    }

    #[test]
    fn test_invoice_reconcile_mismatch_warns_every_item() {
        let mut items = vec![
            finalize_item(draft("A", 2.0, 50.0), &rules(), &config(), "test"),
            finalize_item(draft("B", 1.0, 100.0), &rules(), &config(), "test"),
        ];
        reconcile_with_invoice_total(&mut items, 500.0, &config());
        assert!(items
            .iter()
            .all(|i| i.validation_errors.iter().any(|w| w.contains("declares"))));
        // Informational only.
        assert!(items.iter().all(|i| i.is_valid));
    }
}
