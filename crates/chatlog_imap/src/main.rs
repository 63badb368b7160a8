use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Sync chat logs to an IMAP folder
#[derive(Parser, Debug)]
#[command(name = "chatlog-imap", version, about)]
struct Cli {
    /// Config file; defaults to the first of the standard locations that exists
    #[arg(long = "config-file", value_name = "PATH")]
    config_file: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // RUST_LOG overrides
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            EnvFilter::new("chatlog_imap=debug,info")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match chatlog_imap::run(cli.config_file.as_deref()).await {
        Ok(report) if report.failed == 0 => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, fatal = e.is_fatal(), "Sync aborted");
            ExitCode::FAILURE
        }
    }
}
