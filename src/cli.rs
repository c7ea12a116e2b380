use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "converge")]
#[command(version)]
#[command(about = "Converge this machine to a declared configuration", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Declaration file (default: ~/.config/converge/configuration.conf)
    #[arg(short, long, global = true, env = "CONVERGE_FILE")]
    pub file: Option<PathBuf>,

    /// Config file (default: ~/.config/converge/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show what apply would change, without changing anything
    Plan {
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,

        /// Only show actions for a kind or resource (e.g. package, package.git)
        #[arg(short, long)]
        target: Option<String>,
    },

    /// Converge the system to the declaration
    Apply {
        /// Apply without asking for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Parse and validate the declaration without probing the system
    Check,

    /// List the options a declaration may set
    Options {
        /// Only show options whose path contains this text
        filter: Option<String>,
    },

    /// Show the result of the last apply
    Status {
        /// Print the journal as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}
