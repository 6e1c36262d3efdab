use anyhow::Result;
use clap::Parser;
use tracing::info;

use tidepool::cli::{Cli, Command};
use tidepool::config::Config;
use tidepool::host::{embed, replay};
use tidepool::metrics;
use tidepool::telemetry::logging;

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.logging.to_config())?;

    let mut config = Config::from_env();
    cli.apply_overrides(&mut config);
    info!(?config, "starting tidepool");

    let stats = match &cli.command {
        Command::Embed(args) => embed::run(&config, &args.editor_args)?,
        Command::Replay(args) => replay::run(&args.capture, args.chunk, &config)?,
    };
    info!(?stats, "session finished");

    if cli.metrics {
        eprint!("{}", metrics::gather_text());
    }
    Ok(())
}
