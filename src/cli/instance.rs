//! Instance lifecycle commands.
//!
//! Each command connects to the engine, loads the (migrated) configuration
//! and acts on one profile's instance, except `status` which reports on
//! all profiles.

use crate::cli::parsers::parse_duration;
use crate::cli::{connect, flush_output, format_table};
use aiidalab_launch::instance::DEFAULT_STATUS_TIMEOUT;
use aiidalab_launch::{Error, Instance, InstanceStatus};
use clap::Args;
use futures_util::StreamExt;
use std::path::Path;
use std::time::Duration;

/// Profile selection shared by the instance commands.
#[derive(Args, Debug, Clone, Default)]
pub struct ProfileArg {
    /// Profile to use (defaults to the configured default profile)
    #[arg(short = 'p', long, value_name = "PROFILE")]
    pub profile: Option<String>,
}

// ============================================================================
// Start
// ============================================================================

/// What `start` should do given the current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartAction {
    /// Create (if needed) and start the container.
    Start,
    /// Restart the running container.
    Restart,
    /// Leave the container alone.
    AlreadyRunning,
    /// Services are still coming up.
    AlreadyStarting,
}

/// Decide how to bring an instance up.
pub fn start_action(status: InstanceStatus, restart: bool) -> StartAction {
    match status {
        InstanceStatus::Down | InstanceStatus::Created | InstanceStatus::Exited => {
            StartAction::Start
        }
        InstanceStatus::Up | InstanceStatus::Unknown if restart => StartAction::Restart,
        InstanceStatus::Up | InstanceStatus::Unknown => StartAction::AlreadyRunning,
        InstanceStatus::Starting if restart => StartAction::Restart,
        InstanceStatus::Starting => StartAction::AlreadyStarting,
    }
}

/// Start an instance on this host.
///
/// Examples:
///   aiidalab-launch start
///   aiidalab-launch start -p dev --wait 5m
///   aiidalab-launch start --recreate
#[derive(Args, Debug)]
pub struct StartCmd {
    #[command(flatten)]
    pub profile: ProfileArg,

    /// Restart the container if it is already running
    #[arg(long)]
    pub restart: bool,

    /// Time to wait for the services to come up (0s to return immediately)
    #[arg(long, value_parser = parse_duration, default_value = "120s", value_name = "DURATION")]
    pub wait: Duration,

    /// Do not pull the image before creating the container
    #[arg(long)]
    pub no_pull: bool,

    /// Recreate the container if its configuration drifted from the profile
    #[arg(long)]
    pub recreate: bool,
}

impl StartCmd {
    pub async fn run(self, config: Option<&Path>) -> aiidalab_launch::Result<()> {
        let state = connect(config).await?;
        let instance = state.instance_for(self.profile.profile.as_deref())?;

        match instance.container().await? {
            None => {
                if !self.no_pull {
                    eprintln!("Pulling image '{}'...", instance.profile().image());
                    instance.pull().await?;
                } else if instance.image().await?.is_none() {
                    return Err(Error::ImagePull {
                        image: instance.profile().image().to_string(),
                        reason: "image not available locally and pulling is disabled".into(),
                    });
                }
            }
            Some(_) => self.check_drift(&instance).await?,
        }

        let status = instance.status().await?;
        match start_action(status, self.restart) {
            StartAction::Start => {
                eprintln!("Starting container (this may take a while)...");
                flush_output();
                instance.start().await?;
            }
            StartAction::Restart => {
                eprintln!("Restarting container (this may take a while)...");
                flush_output();
                instance.restart().await?;
            }
            StartAction::AlreadyRunning => {
                eprintln!("Container was already running, use --restart to restart it.");
            }
            StartAction::AlreadyStarting => {
                eprintln!("Container is already starting up...");
            }
        }

        if self.wait.is_zero() {
            println!(
                "Use 'aiidalab-launch status' to check the instance status and the URL to open it."
            );
            return Ok(());
        }

        instance.wait_for_services(Some(self.wait)).await?;
        let profile = instance.profile();
        println!("Open the following URL to access AiiDAlab:");
        println!();
        println!("  {}", instance.url().await?);
        println!();
        println!(
            "Home mounted: {} -> {}",
            profile.home_mount(),
            profile.home_dir()
        );
        Ok(())
    }

    async fn check_drift(&self, instance: &Instance) -> aiidalab_launch::Result<()> {
        let changes = instance.configuration_changes().await?;
        if changes.is_empty() {
            return Ok(());
        }

        if self.recreate {
            eprintln!("Configuration changed, recreating container...");
            flush_output();
            instance.recreate().await?;
        } else {
            for change in &changes {
                eprintln!("Warning: {}", change);
            }
            eprintln!("Use --recreate to apply the current profile configuration.");
        }
        Ok(())
    }
}

// ============================================================================
// Stop
// ============================================================================

/// Stop an instance on this host.
#[derive(Args, Debug)]
pub struct StopCmd {
    #[command(flatten)]
    pub profile: ProfileArg,

    /// Also remove the container (data volumes are kept)
    #[arg(short = 'r', long)]
    pub remove: bool,

    /// Time to wait for the instance to shut down before killing it
    #[arg(short = 't', long, value_parser = parse_duration, default_value = "20s", value_name = "DURATION")]
    pub timeout: Duration,
}

impl StopCmd {
    pub async fn run(self, config: Option<&Path>) -> aiidalab_launch::Result<()> {
        let state = connect(config).await?;
        let instance = state.instance_for(self.profile.profile.as_deref())?;

        eprint!("Stopping AiiDAlab... ");
        flush_output();
        instance.stop(Some(self.timeout)).await?;
        eprintln!("stopped.");

        if self.remove {
            eprint!("Removing container... ");
            flush_output();
            instance.remove(false, false).await?;
            eprintln!("done.");
        }
        Ok(())
    }
}

// ============================================================================
// Status
// ============================================================================

/// Column headers of the status table.
pub const STATUS_HEADERS: [&str; 5] = ["Profile", "Container", "Status", "Mount", "URL"];

/// Status as shown in the table.
pub fn status_label(status: InstanceStatus) -> String {
    match status {
        InstanceStatus::Starting => "starting...".to_string(),
        other => other.to_string(),
    }
}

/// URL column of the status table. A URL that cannot be determined is
/// logged and left blank.
pub fn url_cell(url: aiidalab_launch::Result<String>) -> String {
    url.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "unable to determine URL");
        String::new()
    })
}

/// One row of the status table.
pub async fn status_row(instance: &Instance) -> aiidalab_launch::Result<Vec<String>> {
    let status = instance.status_with_timeout(Some(DEFAULT_STATUS_TIMEOUT)).await?;
    let url = if status == InstanceStatus::Up {
        url_cell(instance.url().await)
    } else {
        String::new()
    };
    Ok(vec![
        instance.profile().name().to_string(),
        instance.container_name(),
        status_label(status),
        instance.profile().home_mount().to_string(),
        url,
    ])
}

/// Show status and entry point of all instances.
#[derive(Args, Debug)]
pub struct StatusCmd {}

impl StatusCmd {
    pub async fn run(self, config: Option<&Path>) -> aiidalab_launch::Result<()> {
        let state = connect(config).await?;

        let mut rows = Vec::new();
        for profile in &state.config.profiles {
            rows.push(status_row(&state.instance(profile.clone())).await?);
        }
        println!("{}", format_table(&STATUS_HEADERS, &rows));
        Ok(())
    }
}

// ============================================================================
// Logs
// ============================================================================

/// Show the output of an instance.
#[derive(Args, Debug)]
pub struct LogsCmd {
    #[command(flatten)]
    pub profile: ProfileArg,

    /// Follow log output
    #[arg(short = 'f', long)]
    pub follow: bool,
}

impl LogsCmd {
    pub async fn run(self, config: Option<&Path>) -> aiidalab_launch::Result<()> {
        let state = connect(config).await?;
        let instance = state.instance_for(self.profile.profile.as_deref())?;

        let mut logs = instance.logs(self.follow).await?;
        while let Some(chunk) = logs.next().await {
            print!("{}", chunk?);
            flush_output();
        }
        Ok(())
    }
}

// ============================================================================
// Exec
// ============================================================================

/// Run a command inside an instance.
///
/// Examples:
///   aiidalab-launch exec -- aiidalab list
///   aiidalab-launch exec --privileged -- apt-get update
#[derive(Args, Debug)]
pub struct ExecCmd {
    #[command(flatten)]
    pub profile: ProfileArg,

    /// Run as root with extended privileges
    #[arg(long)]
    pub privileged: bool,

    /// Exit with the command's exit code instead of reporting a failure
    #[arg(long)]
    pub forward_exit_code: bool,

    /// Command to execute
    #[arg(trailing_var_arg = true, required = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

impl ExecCmd {
    pub async fn run(self, config: Option<&Path>) -> aiidalab_launch::Result<()> {
        let state = connect(config).await?;
        let instance = state.instance_for(self.profile.profile.as_deref())?;

        let mut handle = instance.exec(&self.command, self.privileged).await?;
        while let Some(chunk) = handle.output.next().await {
            print!("{}", chunk?);
            flush_output();
        }

        let exit_code = handle.exit_code().await?;
        if exit_code != 0 {
            if self.forward_exit_code {
                std::process::exit(exit_code as i32);
            }
            return Err(Error::CommandFailed { exit_code });
        }
        Ok(())
    }
}

// ============================================================================
// Reset
// ============================================================================

/// Remove an instance's container and package cache.
///
/// The home directory is only removed with --yes-remove-data.
#[derive(Args, Debug)]
pub struct ResetCmd {
    #[command(flatten)]
    pub profile: ProfileArg,

    /// Also remove the home directory data (irreversible)
    #[arg(long)]
    pub yes_remove_data: bool,
}

impl ResetCmd {
    pub async fn run(self, config: Option<&Path>) -> aiidalab_launch::Result<()> {
        let state = connect(config).await?;
        let instance = state.instance_for(self.profile.profile.as_deref())?;

        if instance.container().await?.is_some() {
            eprint!("Stopping AiiDAlab... ");
            flush_output();
            instance.stop(None).await?;
            eprintln!("stopped.");
        }

        eprint!("Removing container and package cache... ");
        flush_output();
        instance.remove(true, self.yes_remove_data).await?;
        eprintln!("done.");
        if self.yes_remove_data {
            eprintln!("Removed home data: {}", instance.profile().home_mount());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_action() {
        use InstanceStatus::*;
        assert_eq!(start_action(Down, false), StartAction::Start);
        assert_eq!(start_action(Created, false), StartAction::Start);
        assert_eq!(start_action(Exited, true), StartAction::Start);
        assert_eq!(start_action(Up, false), StartAction::AlreadyRunning);
        assert_eq!(start_action(Up, true), StartAction::Restart);
        assert_eq!(start_action(Starting, false), StartAction::AlreadyStarting);
        assert_eq!(start_action(Unknown, true), StartAction::Restart);
    }

    #[test]
    fn test_status_label() {
        assert_eq!(status_label(InstanceStatus::Starting), "starting...");
        assert_eq!(status_label(InstanceStatus::Up), "up");
        assert_eq!(status_label(InstanceStatus::Down), "down");
    }

    #[test]
    fn test_url_cell_blank_on_error() {
        assert_eq!(
            url_cell(Ok("http://localhost:8888/?token=abc".into())),
            "http://localhost:8888/?token=abc"
        );
        assert_eq!(url_cell(Err(Error::requires_container("aiidalab_default"))), "");
    }
}
