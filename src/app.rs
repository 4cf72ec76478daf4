//! Application state shared by the CLI commands.

use crate::config::Config;
use crate::engine::ContainerEngine;
use crate::error::Result;
use crate::instance::Instance;
use crate::introspect::profile_from_container;
use crate::naming::Naming;
use crate::profile::{Profile, MAIN_PROFILE_NAME};
use crate::VERSION;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Configuration plus engine connection for one invocation.
pub struct AppState {
    config_path: PathBuf,
    /// Loaded configuration.
    pub config: Config,
    engine: Arc<dyn ContainerEngine>,
    naming: Naming,
}

impl AppState {
    /// Load the configuration at `config_path` (defaults if absent).
    ///
    /// `naming` names the containers and the default home volumes of
    /// profiles that do not set one.
    pub fn new(
        config_path: PathBuf,
        engine: Arc<dyn ContainerEngine>,
        naming: Naming,
    ) -> Result<Self> {
        let config = Config::load_or_default_with_naming(&config_path, &naming)?;
        Ok(Self {
            config_path,
            config,
            engine,
            naming,
        })
    }

    /// The naming scheme.
    pub fn naming(&self) -> &Naming {
        &self.naming
    }

    /// Path of the configuration file.
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Write the configuration back to disk.
    pub fn save_config(&self) -> Result<()> {
        self.config.save(&self.config_path, true)
    }

    /// Instance for a profile.
    pub fn instance(&self, profile: Profile) -> Instance {
        Instance::new(self.engine.clone(), profile).with_naming(self.naming.clone())
    }

    /// Instance for the named profile, or the default profile for `None`.
    pub fn instance_for(&self, profile: Option<&str>) -> Result<Instance> {
        let name = profile.unwrap_or(&self.config.default_profile);
        Ok(self.instance(self.config.get_profile(name)?.clone()))
    }

    /// Bring an older or missing configuration up to date and save it if
    /// anything changed.
    ///
    /// Without a configuration file, the default profile is taken from an
    /// existing default container, or pointed at the legacy `~/aiidalab`
    /// home directory if that exists. A missing version is stamped with the
    /// current one.
    pub async fn apply_migrations(&mut self) -> Result<()> {
        let mut changed = false;

        if !self.config_path.is_file() {
            self.migrate_without_config(dirs::home_dir().map(|home| home.join("aiidalab")))
                .await?;
            changed = true;
        }

        if self.config.version.is_none() {
            self.config.version = Some(VERSION.to_string());
            changed = true;
        }

        if changed {
            tracing::info!(path = %self.config_path.display(), "writing migrated configuration");
            self.save_config()?;
        }
        Ok(())
    }

    async fn migrate_without_config(&mut self, legacy_home: Option<PathBuf>) -> Result<()> {
        let Some(index) = self
            .config
            .profiles
            .iter()
            .position(|p| p.name() == MAIN_PROFILE_NAME)
        else {
            return Ok(());
        };

        let instance = self.instance(self.config.profiles[index].clone());
        if let Some(container) = instance.container().await? {
            let image = self.engine.image(&container.image_id).await?;
            match profile_from_container(&container, image.as_ref(), &self.naming) {
                Ok(profile) => {
                    tracing::info!(container = %container.name, "adopting profile from existing container");
                    self.config.profiles[index] = profile;
                }
                Err(e) => {
                    tracing::warn!(container = %container.name, error = %e, "unable to adopt existing container")
                }
            }
        } else if let Some(legacy) = legacy_home.filter(|path| path.exists()) {
            tracing::info!(path = %legacy.display(), "using legacy home directory");
            self.config.profiles[index] = self.config.profiles[index]
                .to_builder()
                .home_mount(legacy.display().to_string())
                .build()?;
        }
        Ok(())
    }
}
