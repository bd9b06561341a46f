//! `folio id new` and `folio id check <id>`

use anyhow::{Context, Result};
use chrono::SecondsFormat;
use clap::Subcommand;

use folio_core::UniqueId;

#[derive(Subcommand, Debug)]
pub enum IdCommand {
    /// Print a freshly minted id.
    New,

    /// Validate an id and print its timestamp.
    Check {
        /// Id in `YYYY-MM-DD_HH-MM-SS.ffffff__NNNN` form.
        value: String,
    },
}

pub fn run(command: IdCommand) -> Result<()> {
    match command {
        IdCommand::New => println!("{}", UniqueId::generate()),
        IdCommand::Check { value } => {
            let timestamp = UniqueId::parse(&value).context("invalid id")?;
            println!("{}", timestamp.to_rfc3339_opts(SecondsFormat::Micros, true));
        }
    }
    Ok(())
}
