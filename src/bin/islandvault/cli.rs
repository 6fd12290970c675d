use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// IslandVault CLI: просмотр и обслуживание хранилища снимков
#[derive(Parser, Debug)]
#[command(name = "islandvault", version, about = "IslandVault snapshot store CLI")]
pub struct Cli {
    /// Store root (overrides IV_STORE_DIR)
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub cmd: Cmd,
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as Parser>::parse()
    }
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// List owners, or the records of one owner
    List {
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Show one record (summary, or the full tag tree with --json)
    Inspect {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        ts: u64,
        #[arg(long)]
        json: bool,
    },
    /// Keep only the newest N records of an owner
    Prune {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        keep: usize,
    },
    /// Delete one record
    Delete {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        ts: u64,
    },
    /// Print the effective configuration
    Config {
        #[arg(long)]
        json: bool,
    },
    /// Capture a small in-memory island and store it
    Demo {
        #[arg(long, default_value = "demo")]
        owner: String,
        /// Record timestamp (ms); current time if omitted
        #[arg(long)]
        ts: Option<u64>,
    },
}
