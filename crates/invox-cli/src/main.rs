//! Invox CLI - Supplier invoice line-item extraction
//!
//! Usage:
//!   invox process invoice.pdf            Extract line items
//!   invox train --file invoice.pdf --supplier "Medis" --annotations items.json
//!   invox algorithms                     List learned supplier algorithms
//!   invox status                         Check backend connectivity

mod cli;
mod commands;


use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    let algorithms_dir = cli.algorithms_dir.as_deref();

    match cli.command {
        Commands::Process {
            file,
            supplier,
            json,
            catalog,
        } => {
            let mut pipeline = commands::open_pipeline(algorithms_dir)?;
            if let Some(ref path) = catalog {
                let items = commands::load_catalog(path)?;
                pipeline.set_catalog(Box::new(invox_core::MemoryCatalog::new(items)));
            }
            commands::cmd_process(&mut pipeline, &file, supplier.as_deref(), json).await
        }
        Commands::Train {
            file,
            supplier,
            annotations,
        } => {
            let mut pipeline = commands::open_pipeline(algorithms_dir)?;
            commands::cmd_train(&mut pipeline, &file, &supplier, &annotations).await
        }
        Commands::Algorithms { action } => {
            let learning = commands::open_learning(algorithms_dir)?;
            match action {
                None | Some(AlgorithmsAction::List) => commands::cmd_algorithms_list(&learning),
                Some(AlgorithmsAction::Forget { supplier }) => {
                    commands::cmd_algorithms_forget(&learning, &supplier)
                }
            }
        }
        Commands::Match {
            description,
            catalog,
            code,
        } => commands::cmd_match(&description, code.as_deref(), &catalog),
        Commands::Prompts { action } => match action {
            None | Some(PromptsAction::List) => commands::cmd_prompts_list(),
            Some(PromptsAction::Show { id }) => commands::cmd_prompts_show(&id),
        },
        Commands::Status => commands::cmd_status(algorithms_dir).await,
    }
}
