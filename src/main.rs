mod builtin;
mod cli;
mod commands;
mod config;
mod progress;
mod state;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;
use std::path::PathBuf;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub config: PathBuf,
    pub state: PathBuf,
    pub vars: Vec<(String, String)>,
}

fn main() -> Result<()> {
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
        config: config::expand_path(&cli.config),
        state: config::expand_path(&cli.state),
        vars: cli.vars,
    };
    log::debug!(
        "config {}, state {}, verbosity {}",
        ctx.config.display(),
        ctx.state.display(),
        ctx.verbose
    );

    match cli.command {
        Command::Validate => commands::inspect::validate(&ctx),
        Command::Plan(args) => commands::run::plan(&ctx, args),
        Command::Apply(args) => commands::run::apply(&ctx, args),
        Command::Refresh(args) => commands::run::refresh(&ctx, &args),
        Command::Destroy(args) => commands::run::destroy(&ctx, args),
        Command::Import { address, id } => commands::inspect::import(&ctx, &address, &id),
        Command::Graph { operation } => commands::inspect::graph(&ctx, operation.into()),
        Command::Show { address, json } => commands::inspect::show(&ctx, address.as_deref(), json),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "strata", &mut io::stdout());
            Ok(())
        }
    }
}
