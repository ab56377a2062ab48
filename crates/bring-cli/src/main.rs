//! bring CLI

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use bring_cli::cmd;
use bring_cli::cmd::install::InstallArgs;
use bring_cli::ui::print_error;
use bring_cli::{Cli, Commands};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // RUST_LOG wins over -v
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.global.log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            print_error(&e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions { shell } = cli.command {
        cmd::completions::completions(shell);
        return Ok(());
    }

    let bring = cmd::open(&cli.global)?;
    match cli.command {
        Commands::Install {
            package,
            vars,
            target,
            policy,
            copy,
            flatten,
            exclude_dirs,
        } => {
            let args = InstallArgs {
                vars: &vars,
                policy,
                copy,
                flatten,
                exclude_dirs: &exclude_dirs,
            };
            cmd::install::install(&bring, &package, &target, &args).await
        }
        Commands::Info { package, json } => cmd::info::info(&bring, &package, json).await,
        Commands::List => {
            cmd::list::list(&bring);
            Ok(())
        }
        Commands::Update { packages, force } => cmd::update::update(&bring, &packages, force).await,
        Commands::Completions { .. } => Ok(()),
    }
}
