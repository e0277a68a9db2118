//! # farmcert CLI entry point
//!
//! Parses command-line arguments and dispatches to subcommand handlers.

use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use farmcert_cli::certification::{
    run_decide, run_revoke, run_stats, run_verify, DecideArgs, RevokeArgs, VerifyArgs,
};
use farmcert_cli::client::ApiClient;
use farmcert_cli::digest::{run_check, run_hash, CheckArgs, HashArgs};

/// Farmer certification operator tool.
///
/// Computes and checks document commitments locally, and queries or decides
/// certifications against a running farmcert-api.
#[derive(Parser, Debug)]
#[command(name = "farmcert", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Base URL of the farmcert API.
    #[arg(long, env = "FARMCERT_API_URL", default_value = "http://localhost:8080", global = true)]
    api_url: String,

    /// Bearer token, `{secret}` or `{role}:{subject}:{secret}`.
    #[arg(long, env = "FARMCERT_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    /// Request timeout in seconds.
    #[arg(long, default_value_t = 60, global = true)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compute the SHA-256 commitment of document files.
    Hash(HashArgs),

    /// Check a document against a commitment read from a certificate.
    Check(CheckArgs),

    /// Verify a certificate by id, or a farmer's latest certificate.
    Verify(VerifyArgs),

    /// Approve or reject a farmer's application.
    Decide(DecideArgs),

    /// Revoke a certificate.
    Revoke(RevokeArgs),

    /// Certification statistics.
    Stats,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    let client = || {
        ApiClient::new(
            &cli.api_url,
            cli.token.as_deref(),
            Duration::from_secs(cli.timeout_secs),
        )
    };

    match &cli.command {
        Commands::Hash(args) => run_hash(args),
        Commands::Check(args) => run_check(args),
        Commands::Verify(args) => run_verify(args, &client()?).await,
        Commands::Decide(args) => run_decide(args, &client()?).await,
        Commands::Revoke(args) => run_revoke(args, &client()?).await,
        Commands::Stats => run_stats(&client()?).await,
    }
}
