#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use clap::Parser;
use courier::{app, cli::Cli, settings::Settings, signals};
use courier_common::{internal, logging};
use tokio::sync::broadcast;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?.with_cli(&cli);

    logging::init(&settings.log)?;

    let (shutdown, _receiver) = broadcast::channel(64);
    let watcher = tokio::spawn(signals::shutdown(shutdown.clone()));

    let result = tokio::select! {
        result = app::run(&settings, &shutdown) => result,
        forced = watcher => {
            forced??;
            anyhow::bail!("Campaign interrupted before it could wind down");
        }
    };

    let report = result.inspect_err(|e| internal!(level = ERROR, "{e:#}"))?;
    if report.undelivered().next().is_some() {
        internal!(
            level = WARN,
            "{} recipients were not reached",
            report.failed.len() + report.abandoned.len()
        );
    }

    Ok(())
}
