//! `folio build`: one run of the build loop.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use folio_build::{BuildLoop, BuildOutcome, BuilderRegistry};
use folio_core::Settings;

#[derive(Args, Debug)]
pub struct BuildArgs {}

impl BuildArgs {
    pub fn run(self, settings: Settings) -> Result<()> {
        let mut build_loop = BuildLoop::new(settings, &BuilderRegistry::default())
            .context("invalid build configuration")?;
        let outcome = build_loop.run().context("build failed")?;

        match outcome {
            BuildOutcome::Busy => println!("{}", "another build is in progress".yellow()),
            BuildOutcome::Aborted { reason } => {
                println!("{} {reason}", "aborted:".yellow().bold());
            }
            BuildOutcome::Completed {
                published,
                decision,
            } => {
                for id in &published {
                    println!("{} {id}", "published".green().bold());
                }
                if published.is_empty() {
                    println!("{} ({decision:?})", "nothing to build".dimmed());
                }
            }
        }
        Ok(())
    }
}
