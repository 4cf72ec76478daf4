//! Profile management commands.
//!
//! These commands only touch the configuration file; no engine connection
//! is made.

use crate::cli::parsers::{parse_host_port, HostPort};
use aiidalab_launch::{Config, Error, Profile};
use clap::{Args, Subcommand};
use std::path::Path;

/// Manage profiles
#[derive(Subcommand, Debug)]
pub enum ProfilesCmd {
    /// List all configured profiles (the default is marked with *)
    #[command(visible_alias = "ls")]
    List,

    /// Show a profile's configuration
    Show(ProfileNameArg),

    /// Add a new profile
    Add(ProfileAddCmd),

    /// Remove a profile from the configuration
    #[command(visible_alias = "rm")]
    Remove(ProfileNameArg),

    /// Make a profile the default
    SetDefault(ProfileNameArg),
}

/// Profile selected by name.
#[derive(Args, Debug)]
pub struct ProfileNameArg {
    /// Profile name
    #[arg(value_name = "PROFILE")]
    pub profile: String,
}

/// Add a new profile.
///
/// Examples:
///   aiidalab-launch profiles add dev --port 8889
///   aiidalab-launch profiles add dev --home-mount /srv/aiidalab --extra-mount data:/opt/data:ro
#[derive(Args, Debug)]
pub struct ProfileAddCmd {
    /// Profile name
    #[arg(value_name = "PROFILE")]
    pub profile: String,

    /// Host port, or 'auto' to let the engine assign one
    #[arg(long, value_parser = parse_host_port, value_name = "PORT")]
    pub port: Option<HostPort>,

    /// Image reference
    #[arg(long, value_name = "IMAGE")]
    pub image: Option<String>,

    /// Absolute host path or volume name for the home directory
    #[arg(long, value_name = "PATH|VOLUME")]
    pub home_mount: Option<String>,

    /// User account inside the container
    #[arg(long, value_name = "USER")]
    pub system_user: Option<String>,

    /// App installed on first start (can be used multiple times)
    #[arg(long = "default-app", value_name = "APP")]
    pub default_apps: Vec<String>,

    /// Additional mount (can be used multiple times)
    #[arg(long = "extra-mount", value_name = "SOURCE:TARGET[:ro|rw]")]
    pub extra_mounts: Vec<String>,
}

impl ProfileAddCmd {
    /// Build and validate the profile described by the flags.
    pub fn build_profile(&self) -> aiidalab_launch::Result<Profile> {
        let mut builder = Profile::builder(&self.profile)
            .default_apps(self.default_apps.clone())
            .extra_mounts(self.extra_mounts.iter().cloned());
        if let Some(HostPort(port)) = self.port {
            builder = builder.port(port);
        }
        if let Some(image) = &self.image {
            builder = builder.image(image);
        }
        if let Some(home_mount) = &self.home_mount {
            builder = builder.home_mount(home_mount);
        }
        if let Some(system_user) = &self.system_user {
            builder = builder.system_user(system_user);
        }
        builder.build()
    }
}

/// Lines printed by `profiles list`.
pub fn list_lines(config: &Config) -> Vec<String> {
    config
        .profiles
        .iter()
        .map(|p| {
            if p.name() == config.default_profile {
                format!("{} *", p.name())
            } else {
                p.name().to_string()
            }
        })
        .collect()
}

/// Remove a profile unless it is the default.
pub fn remove_profile(config: &mut Config, name: &str) -> aiidalab_launch::Result<Profile> {
    if config.default_profile == name {
        return Err(Error::config(
            "remove profile",
            format!(
                "'{}' is the default profile, set another default first",
                name
            ),
        ));
    }
    config.remove_profile(name)
}

impl ProfilesCmd {
    pub fn run(self, config_path: &Path) -> aiidalab_launch::Result<()> {
        let mut config = Config::load_or_default(config_path)?;

        match self {
            ProfilesCmd::List => {
                for line in list_lines(&config) {
                    println!("{}", line);
                }
            }
            ProfilesCmd::Show(arg) => {
                print!("{}", config.get_profile(&arg.profile)?.dumps()?);
            }
            ProfilesCmd::Add(cmd) => {
                let profile = cmd.build_profile()?;
                config.add_profile(profile)?;
                config.save(config_path, true)?;
                println!("Added profile '{}'.", cmd.profile);
            }
            ProfilesCmd::Remove(arg) => {
                remove_profile(&mut config, &arg.profile)?;
                config.save(config_path, true)?;
                println!("Removed profile '{}'.", arg.profile);
            }
            ProfilesCmd::SetDefault(arg) => {
                config.set_default_profile(&arg.profile)?;
                config.save(config_path, true)?;
                println!("Set default profile to '{}'.", arg.profile);
            }
        }
        Ok(())
    }
}
