//! # Autocraft Sim
//!
//! Headless driver for the crafting manager. Runs a scenario file tick by
//! tick against an in-memory network and prints a JSON report.
//!
//! ```text
//! autocraft-sim <scenario.toml> [--config autocraft.toml] [--save tasks.json]
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

mod scenario;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use autocraft_core::ManagerConfig;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::scenario::Scenario;

/// Command line options.
#[derive(Debug, Default)]
struct Options {
    scenario: PathBuf,
    config: Option<PathBuf>,
    save: Option<PathBuf>,
}

impl Options {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self> {
        let mut options = Self::default();
        let mut scenario = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => {
                    options.config = Some(args.next().context("--config needs a path")?.into());
                },
                "--save" => {
                    options.save = Some(args.next().context("--save needs a path")?.into());
                },
                flag if flag.starts_with("--") => bail!("unknown option {flag}"),
                path => scenario = Some(PathBuf::from(path)),
            }
        }

        options.scenario = scenario.context(
            "usage: autocraft-sim <scenario.toml> [--config autocraft.toml] [--save tasks.json]",
        )?;
        Ok(options)
    }
}

/// Main entry point.
fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("autocraft=info".parse()?))
        .init();

    let options = Options::parse(std::env::args().skip(1))?;
    info!("Autocraft sim {}", env!("CARGO_PKG_VERSION"));

    let mut scenario = Scenario::load(&options.scenario)?;
    if let Some(path) = &options.config {
        scenario.config = ManagerConfig::load_from(path);
    }

    let (report, manager) = scenario.run()?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(path) = &options.save {
        manager
            .save_to_file(path)
            .with_context(|| format!("failed to save tasks to {}", path.display()))?;
        info!("Saved {} active tasks to {}", manager.tasks().len(), path.display());
    }
    Ok(())
}
