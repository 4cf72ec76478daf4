//! Application configuration.
//!
//! The configuration is a human-editable TOML file holding the profiles and
//! the name of the default profile:
//!
//! ```toml
//! default_profile = "default"
//! version = "2024.1019.0"
//!
//! [profiles.default]
//! port = 8888
//! default_apps = []
//! system_user = "jovyan"
//! image = "aiidalab/full-stack:latest"
//! home_mount = "aiidalab_default_home"
//! extra_mounts = []
//! ```
//!
//! The file lives at `<config dir>/aiidalab-launch/config.toml`
//! (e.g. `~/.config/aiidalab-launch/config.toml` on Linux).

use crate::error::{Error, Result};
use crate::naming::Naming;
use crate::profile::{Profile, ProfileDocument, ProfileTable, MAIN_PROFILE_NAME};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory name below the platform config directory.
pub const APPLICATION_ID: &str = "aiidalab-launch";

/// File name of the configuration.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Configured profiles, unique by name.
    pub profiles: Vec<Profile>,
    /// Profile used when none is given on the command line.
    pub default_profile: String,
    /// Version of the tool that last wrote the file. `None` if it was never
    /// stored.
    pub version: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self::with_naming(&Naming::default())
    }
}

/// On-disk shape. Scalars come first so they are emitted before tables.
#[derive(Debug, Serialize, Deserialize)]
struct ConfigDocument {
    #[serde(default = "default_profile_name")]
    default_profile: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(default)]
    profiles: ProfileTable,
}

fn default_profile_name() -> String {
    MAIN_PROFILE_NAME.to_string()
}

impl Config {
    /// Configuration holding only the main profile, named by `naming`.
    pub fn with_naming(naming: &Naming) -> Self {
        Self {
            profiles: vec![Profile::main(naming)],
            default_profile: MAIN_PROFILE_NAME.to_string(),
            version: None,
        }
    }

    /// Default location of the configuration file.
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(APPLICATION_ID).join(CONFIG_FILE_NAME))
            .ok_or_else(|| Error::config("locate", "unable to determine the config directory"))
    }

    /// Parse a configuration document.
    pub fn loads(s: &str) -> Result<Self> {
        Self::loads_with_naming(s, &Naming::default())
    }

    /// Parse a configuration document, deriving default home volumes with
    /// `naming`.
    pub fn loads_with_naming(s: &str, naming: &Naming) -> Result<Self> {
        let document: ConfigDocument =
            toml::from_str(s).map_err(|e| Error::config("parse", e.to_string()))?;

        let profiles = document
            .profiles
            .into_iter()
            .map(|(name, profile)| profile.into_profile(&name, naming))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            profiles,
            default_profile: document.default_profile,
            version: document.version,
        })
    }

    /// Serialize to a configuration document.
    pub fn dumps(&self) -> Result<String> {
        let document = ConfigDocument {
            default_profile: self.default_profile.clone(),
            version: self.version.clone(),
            profiles: self
                .profiles
                .iter()
                .map(|p| (p.name().to_string(), ProfileDocument::from(p)))
                .collect(),
        };
        toml::to_string(&document).map_err(|e| Error::config("serialize", e.to_string()))
    }

    /// Load the configuration from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::loads(&contents)
    }

    /// Load the configuration, falling back to the default if the file does
    /// not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        Self::load_or_default_with_naming(path, &Naming::default())
    }

    /// Like [`Config::load_or_default`], deriving default home volumes with
    /// `naming`.
    pub fn load_or_default_with_naming(path: &Path, naming: &Naming) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::loads_with_naming(&contents, naming),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no configuration file, using defaults");
                Ok(Self::with_naming(naming))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Save the configuration to `path`, creating parent directories.
    ///
    /// With `safe`, the document is written to a uniquely named sibling
    /// first and then renamed over `path`, so readers never observe a
    /// partially written file.
    pub fn save(&self, path: &Path, safe: bool) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = self.dumps()?;

        if safe {
            let tmp = path.with_extension(uuid::Uuid::new_v4().to_string());
            std::fs::write(&tmp, contents)?;
            if let Err(e) = std::fs::rename(&tmp, path) {
                let _ = std::fs::remove_file(&tmp);
                return Err(e.into());
            }
        } else {
            std::fs::write(path, contents)?;
        }
        tracing::debug!(path = %path.display(), "saved configuration");
        Ok(())
    }

    /// Look up a profile by name.
    pub fn get_profile(&self, name: &str) -> Result<&Profile> {
        self.profiles
            .iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| Error::ProfileNotFound {
                name: name.to_string(),
            })
    }

    /// Add a new profile.
    pub fn add_profile(&mut self, profile: Profile) -> Result<()> {
        if self.profiles.iter().any(|p| p.name() == profile.name()) {
            return Err(Error::ProfileExists {
                name: profile.name().to_string(),
            });
        }
        self.profiles.push(profile);
        Ok(())
    }

    /// Replace an existing profile of the same name.
    pub fn update_profile(&mut self, profile: Profile) -> Result<()> {
        let slot = self
            .profiles
            .iter_mut()
            .find(|p| p.name() == profile.name())
            .ok_or_else(|| Error::ProfileNotFound {
                name: profile.name().to_string(),
            })?;
        *slot = profile;
        Ok(())
    }

    /// Remove a profile and return it.
    pub fn remove_profile(&mut self, name: &str) -> Result<Profile> {
        let index = self
            .profiles
            .iter()
            .position(|p| p.name() == name)
            .ok_or_else(|| Error::ProfileNotFound {
                name: name.to_string(),
            })?;
        Ok(self.profiles.remove(index))
    }

    /// Make an existing profile the default.
    pub fn set_default_profile(&mut self, name: &str) -> Result<()> {
        self.get_profile(name)?;
        self.default_profile = name.to_string();
        Ok(())
    }
}
