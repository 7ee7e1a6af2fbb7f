use clap::Parser;
use env_logger::Env;

use iq_predictor::cli::{self, Cli};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    cli::run(Cli::parse())?;
    Ok(())
}
