//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI arguments.
//! The actual command implementations are in the `commands` module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Invox - Extract line items from supplier invoices
#[derive(Parser)]
#[command(name = "invox")]
#[command(about = "Local-first supplier invoice line-item extractor", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Directory holding learned supplier algorithms
    ///
    /// Defaults to the platform data dir
    /// (e.g. ~/.local/share/invox/algorithms on Linux).
    #[arg(long, global = true)]
    pub algorithms_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Extract line items from an invoice file (PDF, PNG or JPEG)
    Process {
        /// Invoice file to process
        file: PathBuf,

        /// Supplier name (skips detection when known)
        #[arg(short, long)]
        supplier: Option<String>,

        /// Print the full result as JSON instead of a table
        #[arg(long)]
        json: bool,

        /// Product catalog JSON; extracted items get catalog suggestions
        #[arg(short, long)]
        catalog: Option<PathBuf>,
    },

    /// Train a supplier-specific extraction algorithm from annotated examples
    Train {
        /// Invoice file the annotations refer to
        #[arg(short, long)]
        file: PathBuf,

        /// Supplier name the algorithm is stored under
        #[arg(short, long)]
        supplier: String,

        /// JSON file with annotated line items (see `invox train --help`)
        ///
        /// Format: {"items": [{"code": "WID-1", "description": "Blue Widget",
        /// "quantity": 4, "unit_price": 120.5, "total_price": 482.0}],
        /// "invoice_number": "ACM-99", "tax_rate": 15.0}
        #[arg(short, long)]
        annotations: PathBuf,
    },

    /// Manage learned supplier algorithms
    Algorithms {
        #[command(subcommand)]
        action: Option<AlgorithmsAction>,
    },

    /// Match an extracted description against a product catalog
    Match {
        /// Line-item description to match
        description: String,

        /// JSON file with catalog items ([{"sku", "name", "description"?}])
        #[arg(short, long)]
        catalog: PathBuf,

        /// Product code from the invoice; an exact SKU hit wins outright
        #[arg(long)]
        code: Option<String>,
    },

    /// Inspect the prompt library
    Prompts {
        #[command(subcommand)]
        action: Option<PromptsAction>,
    },

    /// Show backend and algorithm store status
    Status,
}

#[derive(Subcommand)]
pub enum AlgorithmsAction {
    /// List learned algorithms
    List,

    /// Delete the learned algorithm for a supplier
    Forget {
        /// Supplier name or key
        supplier: String,
    },
}

#[derive(Subcommand)]
pub enum PromptsAction {
    /// List all prompts and their override status
    List,

    /// Show the content of a specific prompt
    Show {
        /// Prompt ID (e.g. extract_line_items)
        id: String,
    },
}
