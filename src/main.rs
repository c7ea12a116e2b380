mod cli;
mod commands;
mod config;
mod display;
mod paths;
mod progress;
mod runner;
mod state;
mod system;
mod ui;

use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub file: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        file: cli.file,
        config: cli.config,
    };

    let result = match cli.command {
        Command::Plan { json, target } => commands::plan::run(&ctx, json, target.as_deref()),
        Command::Apply { yes } => commands::apply::run(&ctx, yes),
        Command::Check => commands::check::run(&ctx),
        Command::Options { filter } => commands::options::run(&ctx, filter.as_deref()),
        Command::Status { json } => commands::status::run(&ctx, json),
        Command::Completions { shell } => {
            generate(shell, &mut Cli::command(), "converge", &mut io::stdout());
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            ui::error(&format!("{e:#}"));
            let code = e
                .downcast_ref::<declarative::Error>()
                .map_or(1, declarative::Error::exit_code);
            ExitCode::from(code as u8)
        }
    }
}
