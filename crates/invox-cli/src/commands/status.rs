//! Status command: backend connectivity and store locations

use std::path::Path;

use anyhow::Result;
use invox_core::learn::FileStore;
use invox_core::prompts::default_prompts_dir;
use invox_core::{ModelBackend, ModelClient};

use super::open_learning;

pub async fn cmd_status(algorithms_dir: Option<&Path>) -> Result<()> {
    println!();
    println!("📊 Invox Status");
    println!("   ─────────────────────────────────────────────────────────────");

    // Model backend
    let backend = std::env::var("INVOX_BACKEND").unwrap_or_else(|_| "ollama".to_string());
    println!("   Backend: {}", backend);
    match ModelClient::from_env() {
        Some(client) => {
            println!("   Host: {}", client.host());
            println!("   Model: {}", client.model());
            if client.health_check().await {
                println!("   ✅ Backend reachable");
            } else {
                println!("   ❌ Backend not reachable at {}", client.host());
                println!("      For Ollama: start it with `ollama serve` and pull the model");
            }
        }
        None => {
            println!("   ⚠️  No backend configured");
            println!("      export OLLAMA_HOST=http://localhost:11434");
        }
    }

    // Learned algorithms
    println!();
    let dir = algorithms_dir
        .map(|d| d.to_path_buf())
        .or_else(FileStore::default_dir);
    match dir {
        Some(dir) => {
            println!("   Algorithms: {}", dir.display());
            match open_learning(Some(&dir)) {
                Ok(learning) => match learning.list() {
                    Ok(algorithms) => println!("   Trained suppliers: {}", algorithms.len()),
                    Err(e) => println!("   ⚠️  Could not read algorithm store: {}", e),
                },
                Err(e) => println!("   ⚠️  Could not open algorithm store: {}", e),
            }
        }
        None => println!("   ⚠️  No data directory for learned algorithms"),
    }

    // Prompt overrides
    if let Some(prompts_dir) = default_prompts_dir() {
        let status = if prompts_dir.exists() { "" } else { " (none)" };
        println!("   Prompt overrides: {}{}", prompts_dir.display(), status);
    }

    println!();
    Ok(())
}
