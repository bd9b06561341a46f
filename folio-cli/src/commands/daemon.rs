//! `folio daemon`: run the build loop in the foreground until ctrl-c.

use anyhow::{Context, Result};
use clap::Args;

use folio_build::BuilderRegistry;
use folio_core::Settings;

#[derive(Args, Debug)]
pub struct DaemonArgs {
    /// Seconds between build runs; overrides `build.interval_secs`.
    #[arg(long)]
    pub interval_secs: Option<u64>,
}

impl DaemonArgs {
    pub fn run(self, mut settings: Settings) -> Result<()> {
        if let Some(secs) = self.interval_secs {
            anyhow::ensure!(secs > 0, "--interval-secs must be greater than 0");
            settings.build.interval_secs = secs;
        }
        folio_daemon::start_blocking(settings, &BuilderRegistry::default())
            .context("daemon exited with error")
    }
}
