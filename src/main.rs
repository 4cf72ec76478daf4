//! aiidalab-launch CLI entry point.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cli;

/// aiidalab-launch - manage AiiDAlab instances on this host
#[derive(Parser, Debug)]
#[command(name = "aiidalab-launch")]
#[command(about = "Launch and manage AiiDAlab instances in containers")]
#[command(
    long_about = "aiidalab-launch runs AiiDAlab in a container on this host.\n\n\
Each profile describes one instance: image, port, home directory and \
extra mounts. Profiles are stored in the configuration file.\n\n\
Quick start:\n  \
aiidalab-launch start\n  \
aiidalab-launch status\n  \
aiidalab-launch stop"
)]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file to use
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the version
    Version,

    /// Manage profiles
    #[command(subcommand)]
    Profiles(cli::profiles::ProfilesCmd),

    /// Start an instance
    Start(cli::instance::StartCmd),

    /// Stop an instance
    Stop(cli::instance::StopCmd),

    /// Show the status of all instances
    Status(cli::instance::StatusCmd),

    /// Show the logs of an instance
    Logs(cli::instance::LogsCmd),

    /// Run a command inside an instance
    Exec(cli::instance::ExecCmd),

    /// Remove an instance's container and cached packages
    Reset(cli::instance::ResetCmd),
}

fn main() {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    tracing::debug!(version = aiidalab_launch::VERSION, "starting aiidalab-launch");

    if let Err(e) = run(cli) {
        tracing::error!(error = %e, "command failed");
        eprintln!("Error: {}", e);
        if let Some(hint) = e.remediation() {
            eprintln!();
            eprintln!("{}", hint);
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> aiidalab_launch::Result<()> {
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Version => {
            println!("AiiDAlab Launch {}", aiidalab_launch::VERSION);
            Ok(())
        }
        Commands::Profiles(cmd) => cmd.run(&cli::config_path(config)?),
        command => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(async {
                match command {
                    Commands::Start(cmd) => cmd.run(config).await,
                    Commands::Stop(cmd) => cmd.run(config).await,
                    Commands::Status(cmd) => cmd.run(config).await,
                    Commands::Logs(cmd) => cmd.run(config).await,
                    Commands::Exec(cmd) => cmd.run(config).await,
                    Commands::Reset(cmd) => cmd.run(config).await,
                    Commands::Version | Commands::Profiles(_) => Ok(()),
                }
            })
        }
    }
}

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` takes precedence over the `-v` flags.
fn init_logging(verbose: u8) {
    let level = cli::parsers::verbosity_level(verbose);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("aiidalab_launch={}", level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
