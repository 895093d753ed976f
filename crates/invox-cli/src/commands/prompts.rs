//! Prompt library inspection commands

use anyhow::Result;
use invox_core::prompts::{default_prompts_dir, PromptId, PromptLibrary};

/// List all available prompts and their override status
pub fn cmd_prompts_list() -> Result<()> {
    let mut library = PromptLibrary::new();

    println!("Available Prompts:\n");
    println!("{:<35} {:>7}  {:<20}  {}", "ID", "VERSION", "TASK TYPE", "OVERRIDE");
    println!("{}", "-".repeat(80));

    for &id in PromptId::all() {
        match library.get(id) {
            Ok(prompt) => {
                let override_status = if prompt.is_override { "✓ Custom" } else { "Default" };
                println!(
                    "{:<35} {:>7}  {:<20}  {}",
                    prompt.metadata.id,
                    prompt.metadata.version,
                    prompt.metadata.task_type,
                    override_status
                );
            }
            Err(e) => println!("{:<35} (unreadable: {})", id.as_str(), e),
        }
    }

    println!();
    println!(
        "Override directory: {}",
        default_prompts_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(not available)".to_string())
    );
    println!();
    println!("To customize a prompt:");
    println!("  1. Copy the default to the override directory as <id>.md");
    println!("  2. Edit the file with your changes");
    println!("  3. The next run picks up the override");

    Ok(())
}

/// Show the content of a specific prompt
pub fn cmd_prompts_show(prompt_id: &str) -> Result<()> {
    let mut library = PromptLibrary::new();

    let id = match parse_prompt_id(prompt_id) {
        Some(id) => id,
        None => {
            eprintln!("Unknown prompt ID: {}", prompt_id);
            eprintln!();
            eprintln!("Available prompts:");
            for id in PromptId::all() {
                eprintln!("  {}", id.as_str());
            }
            anyhow::bail!("unknown prompt ID");
        }
    };

    let prompt = library.get(id)?;
    println!(
        "# {} (version {}{})",
        prompt.metadata.id,
        prompt.metadata.version,
        if prompt.is_override { ", custom override" } else { "" }
    );
    println!();
    println!("{}", prompt.content);

    Ok(())
}

pub(crate) fn parse_prompt_id(raw: &str) -> Option<PromptId> {
    PromptId::all().iter().copied().find(|id| id.as_str() == raw)
}
