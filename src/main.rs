// Remote Builder - acquire a container build daemon
// Main entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::prelude::*;

use remote_builder::client::{DaemonClient, DaemonPing};
use remote_builder::config::{load_config, BuilderConfig};
use remote_builder::daemon::DaemonType;
use remote_builder::errors::{user_message, ConnectError};
use remote_builder::{ConnectionFactory, RemoteDeps};

#[derive(Parser, Debug)]
#[command(name = "remote-builder")]
#[command(about = "Connect to a local or remote container build daemon", version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Acquire a daemon and report what was chosen
    Connect {
        /// App the build is for
        #[arg(long)]
        app: String,

        /// Never use the local daemon
        #[arg(long = "no-local")]
        no_local: bool,

        /// Never use a remote builder
        #[arg(long = "no-remote")]
        no_remote: bool,
    },
    /// Ping the configured builder host, or the local daemon
    Ping {
        /// App to authenticate as against the builder host
        #[arg(long, default_value = "")]
        app: String,
    },
    /// Print the effective configuration
    Config,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = load_config().context("Failed to load configuration")?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    ctrlc::set_handler(move || on_interrupt.cancel())
        .context("Failed to install Ctrl-C handler")?;

    match args.command {
        Command::Connect {
            app,
            no_local,
            no_remote,
        } => run_connect(config, &app, DaemonType::new(!no_local, !no_remote), &cancel).await,
        Command::Ping { app } => run_ping(&config, &app, &cancel).await,
        Command::Config => {
            let rendered = toml::to_string_pretty(&config.redacted())
                .context("Failed to render configuration")?;
            print!("{}", rendered);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_connect(
    config: BuilderConfig,
    app: &str,
    daemon_type: DaemonType,
    cancel: &CancellationToken,
) -> Result<ExitCode> {
    let deps = RemoteDeps::platform(&config)?;

    let factory = match ConnectionFactory::new(daemon_type, app, config, deps).await {
        Ok(factory) => factory,
        Err(e) => return Ok(report(&e, app)),
    };

    match factory.acquire(cancel).await {
        Ok(client) => {
            println!("mode:        {}", factory.mode());
            println!("endpoint:    {}", client.endpoint());
            println!("api version: {}", client.api_version().unwrap_or("unknown"));
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => Ok(report(&e, app)),
    }
}

async fn run_ping(config: &BuilderConfig, app: &str, cancel: &CancellationToken) -> Result<ExitCode> {
    let client = match config.remote_builder_host.as_deref() {
        Some(host) => DaemonClient::remote(host, app, config)?,
        None => DaemonClient::local(&config.local_docker_host)?,
    };

    let result = tokio::select! {
        _ = cancel.cancelled() => Err(ConnectError::Canceled),
        result = client.ping() => result,
    };

    match result {
        Ok(()) => {
            println!("{}: OK (api {})", client.endpoint(), client.api_version().unwrap_or("unknown"));
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => Ok(report(&e, app)),
    }
}

fn report(err: &ConnectError, app: &str) -> ExitCode {
    if err.is_canceled() {
        eprintln!("Aborted.");
        return ExitCode::from(130);
    }
    eprintln!("Error: {}", user_message(err, app));
    ExitCode::FAILURE
}
