use clap::Parser;
use rsfc::Cli;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let mut cmd: Cli = Cli::parse();
    let default_level = if cmd.verbose() { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();
    cmd.run_program()
}
