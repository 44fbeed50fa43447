// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use pkgrepo::{path::default_config_path, Reconciler, RunReport, Settings};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{fs::read_to_string, io::ErrorKind, path::PathBuf, process::exit};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "pkgrepo [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        let settings = load_settings(self.config)?;
        match self.command {
            Command::Reconcile => run_reconcile(settings),
            Command::Rebuild(opts) => run_rebuild(settings, opts),
            Command::Config => run_config(settings),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Sync recipe tree, then rebuild every stale recipe.
    #[command(override_usage = "pkgrepo reconcile [options]")]
    Reconcile,

    /// Rebuild one recipe unconditionally.
    #[command(override_usage = "pkgrepo rebuild [options] <recipe_name>")]
    Rebuild(RebuildOptions),

    /// Show effective configuration.
    #[command(override_usage = "pkgrepo config [options]")]
    Config,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RebuildOptions {
    /// Declared name of recipe to rebuild.
    #[arg(required = true, value_name = "recipe_name")]
    pub recipe_name: String,
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run() -> Result<()> {
    Cli::parse().run()
}

fn load_settings(path: Option<PathBuf>) -> Result<Settings> {
    let explicit = path.is_some();
    let path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };

    let data = match read_to_string(&path) {
        Ok(data) => data,
        Err(err) if err.kind() == ErrorKind::NotFound && !explicit => {
            info!("no configuration at {:?}, using defaults", path.display());
            String::new()
        }
        Err(err) => {
            return Err(err).with_context(|| format!("cannot read {:?}", path.display()));
        }
    };

    data.parse::<Settings>()
        .with_context(|| format!("invalid configuration {:?}", path.display()))
}

fn run_reconcile(settings: Settings) -> Result<()> {
    let report = Reconciler::from_settings(settings).reconcile_all()?;
    log_report(&report);

    Ok(())
}

fn run_rebuild(settings: Settings, opts: RebuildOptions) -> Result<()> {
    let report = Reconciler::from_settings(settings).reconcile_one(&opts.recipe_name)?;
    log_report(&report);

    Ok(())
}

fn run_config(settings: Settings) -> Result<()> {
    print!("{settings}");

    Ok(())
}

fn log_report(report: &RunReport) {
    for name in &report.removed {
        info!("removed {name}");
    }

    for name in &report.built {
        info!("built {name}");
    }
}
