//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Full-text acquisition and persistence engine for GEO dataset literature.
///
/// GeoHarvest takes a biomedical search query, finds the matching GEO
/// datasets and their publications, and acquires, validates, and parses
/// their full-text PDFs into a local store.
#[derive(Parser, Debug)]
#[command(name = "geoharvest")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the acquisition pipeline for a query.
    Run {
        /// Biomedical search query (already expanded; no NLP happens here)
        query: String,

        /// Maximum number of GEO datasets to process
        #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u16).range(1..=50))]
        max_datasets: u16,

        /// Skip URL discovery, download, and parsing (metadata only)
        #[arg(long)]
        no_enrichment: bool,

        /// Allow tier-7/8 last-resort mirror sources for this run
        #[arg(long)]
        mirrors: bool,

        /// Override the configured database location
        #[arg(long)]
        database_url: Option<String>,

        /// Override the configured PDF root directory
        #[arg(long)]
        pdf_root: Option<PathBuf>,
    },

    /// Show the configured source registry (names, tiers, rates).
    Sources,
}
