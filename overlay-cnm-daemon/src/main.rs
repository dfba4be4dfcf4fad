use std::process::ExitCode;

use clap::Parser;

use overlay_cnm_daemon::cli::DaemonCli;
use overlay_cnm_daemon::logging::init_tracing;
use overlay_cnm_daemon::{DaemonError, Orchestrator, load_config};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = DaemonCli::parse();

    let config = match load_config(&cli).await {
        Ok(config) => config,
        Err(e) => return fail(&e),
    };

    if cli.validate {
        println!("configuration OK: {}", cli.config.display());
        return ExitCode::SUCCESS;
    }

    if let Err(e) = init_tracing(&config.general) {
        return fail(&DaemonError::Logging(e.to_string()));
    }
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "overlay-cnm-daemon starting");

    let mut orchestrator = match Orchestrator::build_from_config(config) {
        Ok(orchestrator) => orchestrator,
        Err(e) => return fail(&e),
    };

    match orchestrator.run().await {
        Ok(()) => {
            tracing::info!("overlay-cnm-daemon shut down");
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}

fn fail(e: &DaemonError) -> ExitCode {
    tracing::error!(error = %e, "overlay-cnm-daemon exiting");
    eprintln!("overlay-cnm-daemon: {e}");
    ExitCode::from(e.exit_code())
}
