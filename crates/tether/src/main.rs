mod cli;
mod commands;
mod error;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let ctx = commands::Context::load(&cli.global)?;
    tracing::debug!(command = ?cli.command, profile = %ctx.profile_name, "dispatching command");

    let result = match cli.command {
        Command::Login(args) => commands::login::handle(&ctx, args).await,
        Command::Devices => commands::devices::handle(&ctx).await,
        Command::Watch(args) => commands::watch::handle(&ctx, args).await,
        Command::Send(args) => commands::send::handle(&ctx, args).await,
        Command::Logout => commands::logout::handle(&ctx).await,
    };
    result.map_err(|e| e.for_profile(&ctx.profile_name))
}
