use clap::{Parser, Subcommand};
use leadwatch_core::LeadStatus;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "leadwatch")]
#[command(about = "Watches subreddits for tutoring requests and surfaces them for manual review")]
#[command(version)]
pub struct Cli {
    /// Configuration file (defaults to ./leadwatch.toml when present)
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short = 'v', global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Poll the configured subreddits until interrupted
    Run(RunArgs),

    /// List stored leads, highest priority first
    Leads(LeadsArgs),

    /// Update the review status of a lead
    Mark(MarkArgs),

    /// Write stored leads to a CSV file
    Export(ExportArgs),

    /// Show lead totals
    Stats,
}

#[derive(Parser)]
pub struct RunArgs {
    /// Run a single poll cycle and exit
    #[arg(long, default_value_t = false)]
    pub once: bool,
}

#[derive(Parser)]
pub struct LeadsArgs {
    /// Only leads with this status (new, contacted, replied, ignored)
    #[arg(long)]
    pub status: Option<LeadStatus>,

    /// Only leads scoring at least this much
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub min_score: Option<u8>,

    #[arg(long, default_value_t = 20)]
    pub limit: u32,
}

#[derive(Parser)]
pub struct MarkArgs {
    /// Reddit post id, as shown by `leadwatch leads`
    pub post_id: String,

    pub status: LeadStatus,

    /// Free-form note stored with the lead
    #[arg(long)]
    pub notes: Option<String>,
}

#[derive(Parser)]
pub struct ExportArgs {
    /// Output path (defaults to reddit_leads_YYYYMMDD_HHMM.csv)
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,

    #[arg(long)]
    pub status: Option<LeadStatus>,
}
