//! Learned-algorithm management commands

use anyhow::Result;
use invox_core::LearningManager;

pub fn cmd_algorithms_list(learning: &LearningManager) -> Result<()> {
    let algorithms = learning.list()?;

    if algorithms.is_empty() {
        println!("No learned algorithms yet.");
        println!("Run `invox train` after processing reports a supplier needs training.");
        return Ok(());
    }

    println!(
        "{:<22} {:<28} {:>3} {:>8}  {}",
        "KEY", "SUPPLIER", "VER", "TRAINED", "CREATED"
    );
    println!("{}", "-".repeat(78));

    for algorithm in algorithms {
        println!(
            "{:<22} {:<28} {:>3} {:>7}x  {}",
            algorithm.supplier_key,
            algorithm.supplier_name,
            algorithm.version,
            algorithm.training_count,
            algorithm.created_at.format("%Y-%m-%d")
        );
    }

    Ok(())
}

pub fn cmd_algorithms_forget(learning: &LearningManager, supplier: &str) -> Result<()> {
    if learning.forget(supplier)? {
        println!("🗑️  Removed learned algorithm for \"{}\"", supplier);
    } else {
        println!("No learned algorithm stored for \"{}\"", supplier);
    }
    Ok(())
}
