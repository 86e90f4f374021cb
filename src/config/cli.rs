use crate::domain::model::Priority;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "protocol-improver")]
#[command(about = "Analyze laboratory protocols and generate improved versions")]
#[command(version)]
pub struct Cli {
    /// Path to TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Start the HTTP API server
    Serve {
        /// Override the configured listen address
        #[arg(long)]
        host: Option<String>,

        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Analyze a protocol file and write a report bundle
    Analyze {
        /// PDF or DOCX protocol to analyze
        file: PathBuf,

        /// Directory the report ZIP is written to
        #[arg(short, long, default_value = "./reports")]
        output: PathBuf,

        /// Also generate an improved protocol from the suggestions
        #[arg(long)]
        improve: bool,

        /// Lowest priority applied when improving (HIGH, MEDIUM, LOW)
        #[arg(long, default_value = "LOW")]
        min_priority: Priority,
    },

    /// Verify configuration and connectivity to the model API
    Check,
}
