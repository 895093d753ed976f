//! Catalog matching command

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use invox_core::{CatalogItem, MemoryCatalog, ProductMatcher};

/// Load a catalog JSON file into memory
pub fn load_catalog(path: &Path) -> Result<Vec<CatalogItem>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Could not read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid catalog file {}", path.display()))
}

pub fn cmd_match(description: &str, code: Option<&str>, catalog_path: &Path) -> Result<()> {
    let items = load_catalog(catalog_path)?;
    let matcher = ProductMatcher::new(Box::new(MemoryCatalog::new(items)));
    let suggestions = matcher.suggest(code, description);

    match suggestions.best {
        Some(best) => {
            println!();
            println!("Best match for \"{}\":", description);
            println!("  ✅ {} - {} ({:.0}%)", best.item.sku, best.item.name, best.score * 100.0);
            if !suggestions.alternates.is_empty() {
                println!();
                println!("Alternates:");
                for alt in &suggestions.alternates {
                    println!(
                        "     {} - {} ({:.0}%)",
                        alt.item.sku,
                        alt.item.name,
                        alt.score * 100.0
                    );
                }
            }
        }
        None => println!("No catalog item matches \"{}\"", description),
    }

    Ok(())
}
