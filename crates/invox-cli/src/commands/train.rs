//! Supplier training command

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use invox_core::acquire;
use invox_core::{
    normalize_supplier_key, InvoiceDocument, Pipeline, TrainingAnnotations, TrainingSession,
};

pub async fn cmd_train(
    pipeline: &mut Pipeline,
    file: &Path,
    supplier: &str,
    annotations_path: &Path,
) -> Result<()> {
    let raw = fs::read_to_string(annotations_path)
        .with_context(|| format!("Could not read {}", annotations_path.display()))?;
    let annotations: TrainingAnnotations = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid annotation file {}", annotations_path.display()))?;
    if annotations.items.is_empty() {
        bail!("Annotation file has no items; annotate at least one invoice line");
    }

    let bytes =
        fs::read(file).with_context(|| format!("Could not read {}", file.display()))?;
    let file_name = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("invoice")
        .to_string();
    let doc = InvoiceDocument::new(file_name, bytes).with_supplier_hint(supplier);

    println!("📖 Reading invoice text...");
    let acquired = acquire::acquire_text(&doc, &pipeline.config().limits)
        .await
        .context("Could not acquire text from the invoice; training needs a readable document")?;

    let session = TrainingSession {
        supplier: supplier.to_string(),
        supplier_key: normalize_supplier_key(supplier),
        raw_invoice_text: acquired.text,
        started_at: Utc::now(),
    };

    let retraining = !pipeline.learning().needs_training(supplier)?;
    println!(
        "🎓 {} \"{}\" from {} annotated example{}...",
        if retraining { "Retraining" } else { "Training" },
        supplier,
        annotations.items.len(),
        if annotations.items.len() == 1 { "" } else { "s" }
    );

    let (algorithm, report) = pipeline.train(&session, &annotations).await?;

    println!();
    println!("✅ Algorithm stored (version {})", algorithm.version);
    println!("   Key: {}", algorithm.supplier_key);
    println!(
        "   Patterns: {}",
        if report.used_manual_template {
            "manual template from annotations"
        } else {
            "model-generated, verified against annotations"
        }
    );
    println!(
        "   Reproduced {}/{} annotated examples, matched {} invoice line{}",
        report.examples_reproduced,
        report.annotated_examples,
        report.matched_lines,
        if report.matched_lines == 1 { "" } else { "s" }
    );
    println!();
    println!("   Future \"{}\" invoices will extract with this algorithm.", supplier);

    Ok(())
}
