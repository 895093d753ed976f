//! Invoice processing command

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use invox_core::{ExtractionResult, InvoiceDocument, Pipeline, ProcessOutcome};

pub async fn cmd_process(
    pipeline: &mut Pipeline,
    file: &Path,
    supplier: Option<&str>,
    json: bool,
) -> Result<()> {
    let bytes =
        fs::read(file).with_context(|| format!("Could not read {}", file.display()))?;
    let file_name = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("invoice")
        .to_string();

    let mut doc = InvoiceDocument::new(file_name, bytes);
    if let Some(supplier) = supplier {
        doc = doc.with_supplier_hint(supplier);
    }

    let outcome = pipeline.process(&doc).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    match outcome {
        ProcessOutcome::Extracted(result) => print_result(&result),
        ProcessOutcome::NeedsTraining { supplier, .. } => {
            println!();
            println!("🎓 No extraction strategy worked for \"{}\".", supplier);
            println!("   Annotate one invoice once and future invoices extract instantly:");
            println!();
            println!(
                "   invox train --file {} --supplier \"{}\" --annotations items.json",
                file.display(),
                supplier
            );
        }
    }

    Ok(())
}

fn print_result(result: &ExtractionResult) {
    let currency = result.metadata.currency.as_deref().unwrap_or("");

    println!();
    println!("📄 {} ({})", result.supplier, result.method.as_str());
    if let Some(ref number) = result.metadata.invoice_number {
        println!("   Invoice: {}", number);
    }
    if let Some(ref date) = result.metadata.date {
        println!("   Date: {}", date);
    }
    println!();
    println!(
        "   {:<10} {:<38} {:>7} {:>10} {:>6} {:>10}",
        "CODE", "DESCRIPTION", "QTY", "UNIT", "DISC%", "TOTAL"
    );
    println!("   {}", "-".repeat(86));

    for item in &result.line_items {
        let flag = if item.is_valid { " " } else { "⚠" };
        println!(
            "   {:<10} {:<38} {:>7.2} {:>10.2} {:>6.1} {:>10.2} {}",
            item.code.as_deref().unwrap_or("-"),
            truncate(&item.description, 38),
            item.quantity,
            item.unit_price_excl_tax,
            item.discount_percent,
            item.totals.net_total,
            flag
        );
        for warning in &item.validation_errors {
            println!("              ⚠ {}", warning);
        }
        if let Some(best) = item.suggestions.as_ref().and_then(|s| s.best.as_ref()) {
            println!(
                "              ↳ catalog: {} - {} ({:.0}%)",
                best.item.sku,
                best.item.name,
                best.score * 100.0
            );
        }
    }

    let net: f64 = result.line_items.iter().map(|i| i.totals.net_total).sum();
    let gross: f64 = result
        .line_items
        .iter()
        .map(|i| i.totals.net_total_incl_tax)
        .sum();

    println!("   {}", "-".repeat(86));
    println!("   Items: {}", result.line_items.len());
    println!("   Net total: {:.2} {}", net, currency);
    println!("   Incl. tax: {:.2} {}", gross, currency);
    if let Some(reported) = result.metadata.total_amount {
        println!("   Invoice total (reported): {:.2} {}", reported, currency);
    }
}

/// Truncate a string for table display, char-boundary safe
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", cut)
}
